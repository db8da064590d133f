//! Field Schema Builder
//!
//! Describes which fields a caller still has to fill in, per template and
//! per device of a service.

use serde::Serialize;
use serde_json::Value;
use std::collections::BTreeMap;

use crate::catalog::{Catalog, CatalogError};
use crate::templates::{capitalize, Service, ServiceId, Template};
use crate::validation::DEFAULT_VALIDATOR;

/// Grouping key for device-service groups without a bound device.
pub const NO_NODE_KEY: &str = "__NONODE__";

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FieldSchema {
    pub label: String,
    pub validator: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ServiceFieldSchema {
    pub label: String,
    pub validator: String,
    pub default: Value,
}

/// Input form for an order against one service.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ServiceSchema {
    pub reference: Option<String>,
    pub customer: Option<String>,
    pub location: Option<String>,
    pub service: ServiceId,
    pub template_fields: BTreeMap<String, BTreeMap<String, ServiceFieldSchema>>,
}

/// Every tracked field of `template`, plus configurable tags not tracked yet.
pub fn template_schema(template: &Template) -> BTreeMap<String, FieldSchema> {
    let mut schema: BTreeMap<String, FieldSchema> = template
        .fields
        .iter()
        .map(|(field, validator)| {
            let entry = FieldSchema {
                label: template.label(field),
                validator: validator.clone(),
            };
            (field.clone(), entry)
        })
        .collect();

    for tag in template.configurable_tags() {
        schema.entry(tag).or_insert_with_key(|tag| FieldSchema {
            label: capitalize(tag),
            validator: DEFAULT_VALIDATOR.to_string(),
        });
    }
    schema
}

/// Configurable fields per bound device (or [`NO_NODE_KEY`]). Within one
/// group the first template to track a field defines it.
pub fn service_schema(catalog: &Catalog, service: &Service) -> Result<ServiceSchema, CatalogError> {
    let mut template_fields: BTreeMap<String, BTreeMap<String, ServiceFieldSchema>> = BTreeMap::new();

    for group in catalog.groups_of(service)? {
        let key = group.node.clone().unwrap_or_else(|| NO_NODE_KEY.to_string());
        let fields = template_fields.entry(key).or_default();
        let mut seen = Vec::new();

        for template in catalog.templates_of(group)? {
            for (field, validator) in &template.fields {
                if seen.contains(field) {
                    continue;
                }
                seen.push(field.clone());

                let (default, configurable) = match group.default_for(field) {
                    Some(entry) => (entry.default.clone(), entry.configurable),
                    None => (Value::Null, true),
                };
                if configurable {
                    fields.entry(field.clone()).or_insert_with(|| ServiceFieldSchema {
                        label: template.label(field),
                        validator: validator.clone(),
                        default,
                    });
                }
            }
        }
    }

    Ok(ServiceSchema {
        reference: None,
        customer: None,
        location: None,
        service: service.id,
        template_fields,
    })
}
