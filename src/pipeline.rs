//! Compilation Pipeline - Order to Device Configuration
//!
//! Every field value is validated before any text is rendered. A single
//! failure rejects the whole order; there is no partial output.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::catalog::{Catalog, CatalogError};
use crate::hashing::compute_config_hash;
use crate::merge::merge;
use crate::render::{render, Params};
use crate::schema::{service_schema, template_schema, FieldSchema, ServiceSchema};
use crate::tags::classify;
use crate::templates::{
    Device, DeviceId, DeviceServiceGroup, FieldSet, GroupId, Order, OrderId, Service, ServiceId,
    TemplateId,
};
use crate::validation::{ValidationError, ValidatorRegistry};
use crate::ENGINE_VERSION;

#[derive(Debug, Error)]
pub enum CompileError {
    #[error("{field} is not a valid {validator}")]
    TagValidation { field: String, validator: String },

    #[error("{field} uses unknown validator {validator}")]
    UnknownValidator { field: String, validator: String },

    #[error("Missing tag {tag}")]
    MissingTag { tag: String },

    #[error("No device resolved for group {group}: it is unbound and the order addresses no device")]
    UnresolvedDevice { group: GroupId },

    #[error(transparent)]
    Catalog(#[from] CatalogError),

    #[error("Serialization error: {0}")]
    SerializationError(#[from] serde_json::Error),
}

/// Rendered configuration for one device.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceConfig {
    pub node: DeviceId,
    pub service_up: String,
    pub service_down: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConfigurationManifest {
    pub id: String,
    pub order_id: OrderId,
    pub order_reference: String,
    pub engine_version: String,
    pub created_at: DateTime<Utc>,
    pub config_hash: String,
    pub configs: Vec<DeviceConfig>,
}

/// Render every device configuration an order reaches.
///
/// Groups are visited in service order. Output holds one entry per device,
/// in order of first appearance, with the text of every group resolving to
/// that device appended in turn.
pub fn compile_order(
    catalog: &Catalog,
    validators: &ValidatorRegistry,
    order: &Order,
) -> Result<Vec<DeviceConfig>, CompileError> {
    let service = catalog.service(order.service)?;
    let mut configs: Vec<DeviceConfig> = Vec::new();

    for group in catalog.groups_of(service)? {
        let device = resolve_device(catalog, group, order)?;
        let params = resolve_params(catalog, validators, group, order, service, device)?;

        let templates = catalog.templates_of(group)?;
        let up: Vec<&str> = templates.iter().map(|t| t.up_contents.as_str()).collect();
        let down: Vec<&str> = templates.iter().map(|t| t.down_contents.as_str()).collect();

        let service_up = render_checked(&merge(&up), &params)?;
        let service_down = render_checked(&merge(&down), &params)?;
        debug!(group = group.id, node = %device.hostname, templates = templates.len(), "group rendered");

        match configs.iter_mut().find(|c| c.node == device.hostname) {
            Some(config) => {
                append_text(&mut config.service_up, &service_up);
                append_text(&mut config.service_down, &service_down);
            }
            None => configs.push(DeviceConfig {
                node: device.hostname.clone(),
                service_up,
                service_down,
            }),
        }
    }

    info!(order = %order.reference, devices = configs.len(), "order compiled");
    Ok(configs)
}

/// A bound group uses its own device. An unbound group takes the device
/// the order lists first.
fn resolve_device<'a>(
    catalog: &'a Catalog,
    group: &DeviceServiceGroup,
    order: &Order,
) -> Result<&'a Device, CompileError> {
    let hostname = match &group.node {
        Some(node) => node.as_str(),
        None => {
            let first = order
                .template_fields
                .first_device()
                .ok_or(CompileError::UnresolvedDevice { group: group.id })?;
            if order.template_fields.len() > 1 {
                warn!(
                    group = group.id,
                    order = %order.reference,
                    node = %first,
                    "unbound group on a multi-device order, using first device"
                );
            }
            first.as_str()
        }
    };
    Ok(catalog.device(hostname)?)
}

/// Field values (order input, then group default, then null), validated,
/// with built-in values layered on top.
fn resolve_params(
    catalog: &Catalog,
    validators: &ValidatorRegistry,
    group: &DeviceServiceGroup,
    order: &Order,
    service: &Service,
    device: &Device,
) -> Result<Params, CompileError> {
    let submitted = order.template_fields.get(&device.hostname);
    let mut params = Params::new();

    for template in catalog.templates_of(group)? {
        for (field, validator) in &template.fields {
            let value = submitted
                .and_then(|values| values.get(field))
                .cloned()
                .or_else(|| group.default_for(field).map(|entry| entry.default.clone()))
                .unwrap_or(Value::Null);

            let value = validators.test(validator, value).map_err(|err| match err {
                ValidationError::Invalid { .. } => CompileError::TagValidation {
                    field: field.clone(),
                    validator: validator.clone(),
                },
                ValidationError::UnknownValidator(_) => CompileError::UnknownValidator {
                    field: field.clone(),
                    validator: validator.clone(),
                },
            })?;
            params.insert(field.clone(), value);
        }
    }

    params.extend(builtin_params(order, service, device));
    Ok(params)
}

/// Values supplied from order and device metadata. These take precedence
/// over field values of the same name.
pub fn builtin_params(order: &Order, service: &Service, device: &Device) -> Params {
    let text = |value: Option<String>| value.map_or(Value::Null, Value::String);

    let mut params = Params::new();
    params.insert("node".to_string(), Value::String(device.hostname.clone()));
    params.insert("node_ipv4".to_string(), text(device.ipv4.map(|ip| ip.to_string())));
    params.insert("node_ipv6".to_string(), text(device.ipv6.map(|ip| ip.to_string())));
    params.insert("reference".to_string(), Value::String(order.reference.clone()));
    params.insert("customer".to_string(), text(order.customer.clone()));
    params.insert("location".to_string(), text(order.location.clone()));
    params.insert("service".to_string(), Value::String(service.name.clone()));
    params
}

/// Render after checking every user tag of the merged text has a value.
fn render_checked(template: &str, params: &Params) -> Result<String, CompileError> {
    if let Some(tag) = classify(template)
        .user_tags
        .into_iter()
        .find(|tag| !params.contains_key(tag))
    {
        return Err(CompileError::MissingTag { tag });
    }
    Ok(render(template, params))
}

fn append_text(target: &mut String, text: &str) {
    if !target.is_empty() && !target.ends_with('\n') && !text.is_empty() {
        target.push('\n');
    }
    target.push_str(text);
}

/// The compilation pipeline - owns the catalog and shares the validators
pub struct CompilationPipeline {
    catalog: Catalog,
    validators: Arc<ValidatorRegistry>,
}

impl CompilationPipeline {
    pub fn new(catalog: Catalog, validators: Arc<ValidatorRegistry>) -> Self {
        Self { catalog, validators }
    }

    /// Load a catalog file and check it against the validators before use.
    pub fn load(path: &Path, validators: Arc<ValidatorRegistry>) -> Result<Self, CatalogError> {
        let catalog = Catalog::load_from_file(path)?;
        catalog.verify(&validators)?;
        Ok(Self::new(catalog, validators))
    }

    pub fn catalog(&self) -> &Catalog {
        &self.catalog
    }

    /// Administrative edits need exclusive access, so they never overlap
    /// with a compilation.
    pub fn catalog_mut(&mut self) -> &mut Catalog {
        &mut self.catalog
    }

    pub fn into_catalog(self) -> Catalog {
        self.catalog
    }

    pub fn validators(&self) -> &ValidatorRegistry {
        &self.validators
    }

    pub fn template_schema(&self, id: TemplateId) -> Result<BTreeMap<String, FieldSchema>, CatalogError> {
        Ok(template_schema(self.catalog.template(id)?))
    }

    pub fn service_schema(&self, id: ServiceId) -> Result<ServiceSchema, CatalogError> {
        service_schema(&self.catalog, self.catalog.service(id)?)
    }

    pub fn fieldset(&self, id: TemplateId) -> Result<FieldSet, CatalogError> {
        self.catalog.fieldset(id)
    }

    pub fn update_fieldset(&mut self, id: TemplateId, fieldset: &FieldSet) -> Result<FieldSet, CatalogError> {
        self.catalog.update_fieldset(id, fieldset, &self.validators)
    }

    /// Compile a stored order.
    pub fn compile(&self, order_id: OrderId) -> Result<Vec<DeviceConfig>, CompileError> {
        let order = self.catalog.order(order_id)?;
        compile_order(&self.catalog, &self.validators, order)
    }

    /// Compile a stored order and wrap the result with its digest.
    pub fn compile_manifest(&self, order_id: OrderId) -> Result<ConfigurationManifest, CompileError> {
        let order = self.catalog.order(order_id)?;
        let configs = compile_order(&self.catalog, &self.validators, order)?;
        let config_hash = compute_config_hash(&order.reference, &configs, ENGINE_VERSION)?;

        Ok(ConfigurationManifest {
            id: Uuid::new_v4().to_string(),
            order_id,
            order_reference: order.reference.clone(),
            engine_version: ENGINE_VERSION.to_string(),
            created_at: Utc::now(),
            config_hash,
            configs,
        })
    }
}
