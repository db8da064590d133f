//! Template System - Configuration Records
//!
//! Typed records for templates, device-service groups, services, orders and
//! devices. External JSON is checked against these shapes on load.

use serde::de::{MapAccess, Visitor};
use serde::ser::SerializeMap;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use serde_json::Value;
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::net::{Ipv4Addr, Ipv6Addr};
use thiserror::Error;
use tracing::debug;

use crate::tags::configurable_tags;
use crate::validation::{ValidatorRegistry, DEFAULT_VALIDATOR};

pub type TemplateId = u64;
pub type GroupId = u64;
pub type ServiceId = u64;
pub type OrderId = u64;
/// Devices are identified by hostname.
pub type DeviceId = String;

/// Submitted values for one device, keyed by field name.
pub type FieldValues = BTreeMap<String, Value>;

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum FieldSetError {
    #[error("{field} not in template {template}")]
    UnknownField { template: TemplateId, field: String },

    #[error("{field} has unknown validator {validator}")]
    UnknownValidator { field: String, validator: String },

    #[error("{field} is tracked by template {template} but not used by it")]
    StaleField { template: TemplateId, field: String },

    #[error("{tag} is used by template {template} but not tracked")]
    UntrackedTag { template: TemplateId, tag: String },

    #[error("{field} has no label in template {template}")]
    UnlabeledField { template: TemplateId, field: String },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Template {
    pub id: TemplateId,
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub platform: Option<String>,
    /// Activation text
    pub up_contents: String,
    /// Deactivation text
    pub down_contents: String,
    /// Tag name -> validator name
    #[serde(default)]
    pub fields: BTreeMap<String, String>,
    /// Tag name -> display label
    #[serde(default)]
    pub labels: BTreeMap<String, String>,
    #[serde(default)]
    pub deleted: bool,
}

/// Tags added and dropped by a field-set sync.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FieldChanges {
    pub added: Vec<String>,
    pub removed: Vec<String>,
}

impl FieldChanges {
    pub fn is_empty(&self) -> bool {
        self.added.is_empty() && self.removed.is_empty()
    }
}

impl Template {
    /// Create a template, tracking every configurable tag of both bodies.
    pub fn new(
        id: TemplateId,
        name: impl Into<String>,
        up_contents: impl Into<String>,
        down_contents: impl Into<String>,
    ) -> Self {
        let mut template = Self {
            id,
            name: name.into(),
            description: None,
            platform: None,
            up_contents: up_contents.into(),
            down_contents: down_contents.into(),
            fields: BTreeMap::new(),
            labels: BTreeMap::new(),
            deleted: false,
        };
        template.sync_fields();
        template
    }

    /// Configurable tags across the activation and deactivation bodies.
    pub fn configurable_tags(&self) -> BTreeSet<String> {
        let mut tags = configurable_tags(&self.up_contents);
        tags.extend(configurable_tags(&self.down_contents));
        tags
    }

    /// Replace one or both bodies and re-derive the tracked fields.
    pub fn update_contents(
        &mut self,
        up_contents: Option<String>,
        down_contents: Option<String>,
    ) -> FieldChanges {
        if let Some(up) = up_contents {
            self.up_contents = up;
        }
        if let Some(down) = down_contents {
            self.down_contents = down;
        }
        self.sync_fields()
    }

    /// Track new tags with the default validator and a capitalized label,
    /// drop tags no longer present. Existing entries are kept as they are.
    pub fn sync_fields(&mut self) -> FieldChanges {
        let tags = self.configurable_tags();
        let mut changes = FieldChanges::default();

        for tag in &tags {
            if !self.fields.contains_key(tag) {
                self.fields.insert(tag.clone(), DEFAULT_VALIDATOR.to_string());
                self.labels.insert(tag.clone(), capitalize(tag));
                changes.added.push(tag.clone());
            }
        }

        self.fields.retain(|field, _| {
            let keep = tags.contains(field);
            if !keep {
                changes.removed.push(field.clone());
            }
            keep
        });
        self.labels.retain(|field, _| tags.contains(field));
        // Labels may lag behind fields in hand-edited catalogs.
        for tag in &tags {
            if !self.labels.contains_key(tag) {
                self.labels.insert(tag.clone(), capitalize(tag));
            }
        }

        if !changes.is_empty() {
            debug!(template = self.id, added = ?changes.added, removed = ?changes.removed, "template fields synced");
        }
        changes
    }

    /// Display label for a tag, falling back to the capitalized tag name.
    pub fn label(&self, tag: &str) -> String {
        self.labels.get(tag).cloned().unwrap_or_else(|| capitalize(tag))
    }

    /// Check a stored template: tracked fields and labels match the
    /// configurable tags of both bodies and every validator is known.
    pub fn check(&self, validators: &ValidatorRegistry) -> Result<(), FieldSetError> {
        let tags = self.configurable_tags();

        if let Some(tag) = tags.iter().find(|tag| !self.fields.contains_key(*tag)) {
            return Err(FieldSetError::UntrackedTag { template: self.id, tag: tag.clone() });
        }
        for (field, validator) in &self.fields {
            if !tags.contains(field) {
                return Err(FieldSetError::StaleField { template: self.id, field: field.clone() });
            }
            if !validators.is_known(validator) {
                return Err(FieldSetError::UnknownValidator {
                    field: field.clone(),
                    validator: validator.clone(),
                });
            }
            if !self.labels.contains_key(field) {
                return Err(FieldSetError::UnlabeledField { template: self.id, field: field.clone() });
            }
        }
        if let Some(field) = self.labels.keys().find(|field| !self.fields.contains_key(*field)) {
            return Err(FieldSetError::StaleField { template: self.id, field: field.clone() });
        }
        Ok(())
    }

    pub fn fieldset(&self) -> FieldSet {
        FieldSet {
            resource_template_id: Some(self.id),
            resource_fieldset: self
                .fields
                .iter()
                .map(|(name, validator)| FieldSpec {
                    name: name.clone(),
                    validator: validator.clone(),
                    label: self.label(name),
                })
                .collect(),
        }
    }

    /// Apply validator and label edits. Every entry is checked before any
    /// of them is written.
    pub fn apply_fieldset(
        &mut self,
        specs: &[FieldSpec],
        validators: &ValidatorRegistry,
    ) -> Result<(), FieldSetError> {
        for spec in specs {
            if !self.fields.contains_key(&spec.name) {
                return Err(FieldSetError::UnknownField {
                    template: self.id,
                    field: spec.name.clone(),
                });
            }
            if !validators.is_known(&spec.validator) {
                return Err(FieldSetError::UnknownValidator {
                    field: spec.name.clone(),
                    validator: spec.validator.clone(),
                });
            }
        }

        for spec in specs {
            self.fields.insert(spec.name.clone(), spec.validator.clone());
            self.labels.insert(spec.name.clone(), spec.label.clone());
        }
        Ok(())
    }
}

/// First character uppercased, the rest lowercased.
pub fn capitalize(tag: &str) -> String {
    let mut chars = tag.chars();
    match chars.next() {
        Some(first) => {
            let rest = chars.as_str().to_lowercase();
            first.to_uppercase().chain(rest.chars()).collect()
        }
        None => String::new(),
    }
}

/// Wire shape of the field-set endpoint.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FieldSet {
    #[serde(default)]
    pub resource_template_id: Option<TemplateId>,
    pub resource_fieldset: Vec<FieldSpec>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldSpec {
    pub name: String,
    pub validator: String,
    pub label: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DefaultEntry {
    pub field: String,
    #[serde(default)]
    pub default: Value,
    #[serde(default = "default_true")]
    pub configurable: bool,
}

fn default_true() -> bool { true }

/// Templates grouped for one device, with per-field defaults.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeviceServiceGroup {
    pub id: GroupId,
    pub name: String,
    #[serde(default)]
    pub templates: Vec<TemplateId>,
    /// Bound device; unbound groups take the device addressed by the order
    #[serde(default)]
    pub node: Option<DeviceId>,
    #[serde(default)]
    pub defaults: Vec<DefaultEntry>,
}

impl DeviceServiceGroup {
    pub fn default_for(&self, field: &str) -> Option<&DefaultEntry> {
        self.defaults.iter().find(|entry| entry.field == field)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Service {
    pub id: ServiceId,
    pub name: String,
    #[serde(default)]
    pub groups: Vec<GroupId>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Order {
    pub id: OrderId,
    pub reference: String,
    #[serde(default)]
    pub customer: Option<String>,
    #[serde(default)]
    pub location: Option<String>,
    pub service: ServiceId,
    /// Device -> field -> submitted value
    #[serde(default)]
    pub template_fields: DeviceFields,
    #[serde(default)]
    pub deleted: bool,
}

/// Submitted values per device, kept in the order the devices were given.
/// A repeated device replaces its earlier values in place.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DeviceFields(Vec<(DeviceId, FieldValues)>);

impl DeviceFields {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, device: impl Into<DeviceId>, values: FieldValues) {
        let device = device.into();
        match self.0.iter_mut().find(|(known, _)| *known == device) {
            Some(entry) => entry.1 = values,
            None => self.0.push((device, values)),
        }
    }

    pub fn get(&self, device: &str) -> Option<&FieldValues> {
        self.0.iter().find(|(known, _)| known == device).map(|(_, values)| values)
    }

    /// The device given first.
    pub fn first_device(&self) -> Option<&DeviceId> {
        self.0.first().map(|(device, _)| device)
    }

    pub fn devices(&self) -> impl Iterator<Item = &DeviceId> {
        self.0.iter().map(|(device, _)| device)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&DeviceId, &FieldValues)> {
        self.0.iter().map(|(device, values)| (device, values))
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl FromIterator<(DeviceId, FieldValues)> for DeviceFields {
    fn from_iter<I: IntoIterator<Item = (DeviceId, FieldValues)>>(iter: I) -> Self {
        let mut fields = Self::new();
        for (device, values) in iter {
            fields.insert(device, values);
        }
        fields
    }
}

impl Serialize for DeviceFields {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.0.len()))?;
        for (device, values) in &self.0 {
            map.serialize_entry(device, values)?;
        }
        map.end()
    }
}

impl<'de> Deserialize<'de> for DeviceFields {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        struct DeviceFieldsVisitor;

        impl<'de> Visitor<'de> for DeviceFieldsVisitor {
            type Value = DeviceFields;

            fn expecting(&self, f: &mut fmt::Formatter) -> fmt::Result {
                f.write_str("a map of device to field values")
            }

            fn visit_map<A: MapAccess<'de>>(self, mut access: A) -> Result<DeviceFields, A::Error> {
                let mut fields = DeviceFields::new();
                while let Some((device, values)) = access.next_entry::<DeviceId, FieldValues>()? {
                    fields.insert(device, values);
                }
                Ok(fields)
            }
        }

        deserializer.deserialize_map(DeviceFieldsVisitor)
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Driver {
    Eos,
    Junos,
    Iosxr,
    Nxos,
    Ios,
    #[default]
    None,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Device {
    pub hostname: DeviceId,
    #[serde(default)]
    pub ipv4: Option<Ipv4Addr>,
    #[serde(default)]
    pub ipv6: Option<Ipv6Addr>,
    #[serde(default)]
    pub driver: Driver,
    #[serde(default)]
    pub comment: Option<String>,
    /// Name of the credentials group
    #[serde(default)]
    pub group: Option<String>,
    #[serde(default)]
    pub site: Option<String>,
}

impl Device {
    pub fn new(hostname: impl Into<DeviceId>) -> Self {
        Self {
            hostname: hostname.into(),
            ipv4: None,
            ipv6: None,
            driver: Driver::None,
            comment: None,
            group: None,
            site: None,
        }
    }
}

/// Credentials shared by a set of devices.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeviceGroup {
    pub name: String,
    #[serde(default)]
    pub username: Option<String>,
    #[serde(default)]
    pub password: Option<String>,
    #[serde(default)]
    pub enable_password: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    const UP: &str = "\nHere is a template.\nIt contains a {{ variable }}";
    const DOWN: &str = "\nSomething {{ variable }}";

    #[test]
    fn test_new_template_tracks_tags() {
        let template = Template::new(1, "templatename", UP, DOWN);
        assert_eq!(template.fields.get("variable").map(String::as_str), Some("novalidation"));
        assert_eq!(template.labels.get("variable").map(String::as_str), Some("Variable"));
        assert_eq!(template.fields.len(), 1);
    }

    #[test]
    fn test_builtins_are_not_tracked() {
        let template = Template::new(1, "t", "hostname {{ node }}\n{{ node_ipv4 }}", "{{ reference }} {{ vlan }}");
        assert_eq!(template.fields.keys().collect::<Vec<_>>(), vec!["vlan"]);
    }

    #[test]
    fn test_update_keeps_existing_and_drops_stale() {
        let mut template = Template::new(1, "t", "{{ a }} {{ b }}", "");
        template.fields.insert("a".to_string(), "vlan".to_string());
        template.labels.insert("a".to_string(), "Access VLAN".to_string());

        let changes = template.update_contents(Some("{{ a }} {{ c }}".to_string()), None);

        assert_eq!(changes.added, vec!["c"]);
        assert_eq!(changes.removed, vec!["b"]);
        assert_eq!(template.fields["a"], "vlan");
        assert_eq!(template.labels["a"], "Access VLAN");
        assert_eq!(template.fields["c"], "novalidation");
        assert!(!template.labels.contains_key("b"));
        assert_eq!(
            template.fields.keys().collect::<Vec<_>>(),
            template.labels.keys().collect::<Vec<_>>()
        );
    }

    #[test]
    fn test_fieldset_round_trip() {
        let mut template = Template::new(7, "t", UP, DOWN);
        let registry = ValidatorRegistry::new();
        let fieldset = template.fieldset();
        assert_eq!(fieldset.resource_template_id, Some(7));
        assert_eq!(fieldset.resource_fieldset[0].label, "Variable");

        let update = vec![FieldSpec {
            name: "variable".to_string(),
            validator: "string".to_string(),
            label: "TestVariable".to_string(),
        }];
        template.apply_fieldset(&update, &registry).unwrap();
        assert_eq!(template.labels["variable"], "TestVariable");
        assert_eq!(template.fields["variable"], "string");
    }

    #[test]
    fn test_fieldset_rejects_without_partial_write() {
        let mut template = Template::new(1, "t", "{{ a }} {{ b }}", "");
        let before = template.clone();
        let registry = ValidatorRegistry::new();

        let update = vec![
            FieldSpec { name: "a".to_string(), validator: "vlan".to_string(), label: "A".to_string() },
            FieldSpec { name: "b".to_string(), validator: "bogus".to_string(), label: "B".to_string() },
        ];
        let err = template.apply_fieldset(&update, &registry).unwrap_err();
        assert!(matches!(err, FieldSetError::UnknownValidator { ref validator, .. } if validator == "bogus"));
        assert_eq!(template, before);

        let update = vec![FieldSpec { name: "zzz".to_string(), validator: "vlan".to_string(), label: "Z".to_string() }];
        let err = template.apply_fieldset(&update, &registry).unwrap_err();
        assert_eq!(err.to_string(), "zzz not in template 1");
        assert_eq!(template, before);
    }

    #[test]
    fn test_capitalize() {
        assert_eq!(capitalize("variable"), "Variable");
        assert_eq!(capitalize("peer_ASN"), "Peer_asn");
        assert_eq!(capitalize(""), "");
    }

    #[test]
    fn test_default_entry_defaults_to_configurable() {
        let entry: DefaultEntry = serde_json::from_str(r#"{"field": "vlan"}"#).unwrap();
        assert!(entry.configurable);
        assert_eq!(entry.default, Value::Null);
    }

    #[test]
    fn test_check_accepts_synced_template() {
        let template = Template::new(1, "t", UP, DOWN);
        assert!(template.check(&ValidatorRegistry::new()).is_ok());
    }

    #[test]
    fn test_check_rejects_out_of_step_fields() {
        let registry = ValidatorRegistry::new();
        let synced = Template::new(4, "t", "{{ a }} {{ b }}", "");

        let mut template = synced.clone();
        template.fields.insert("a".to_string(), "bogus".to_string());
        assert!(matches!(
            template.check(&registry),
            Err(FieldSetError::UnknownValidator { ref validator, .. }) if validator == "bogus"
        ));

        let mut template = synced.clone();
        template.fields.remove("b");
        template.labels.remove("b");
        assert_eq!(
            template.check(&registry),
            Err(FieldSetError::UntrackedTag { template: 4, tag: "b".to_string() })
        );

        let mut template = synced.clone();
        template.fields.insert("gone".to_string(), "novalidation".to_string());
        assert_eq!(
            template.check(&registry),
            Err(FieldSetError::StaleField { template: 4, field: "gone".to_string() })
        );

        let mut template = synced.clone();
        template.labels.remove("a");
        assert_eq!(
            template.check(&registry),
            Err(FieldSetError::UnlabeledField { template: 4, field: "a".to_string() })
        );

        let mut template = synced;
        template.labels.insert("gone".to_string(), "Gone".to_string());
        assert_eq!(
            template.check(&registry),
            Err(FieldSetError::StaleField { template: 4, field: "gone".to_string() })
        );
    }

    #[test]
    fn test_device_fields_keep_given_order() {
        let fields: DeviceFields =
            serde_json::from_str(r#"{"z.node": {"vlan": 10}, "a.node": {}, "m.node": {"vlan": 30}}"#).unwrap();

        assert_eq!(fields.first_device().map(String::as_str), Some("z.node"));
        assert_eq!(fields.devices().collect::<Vec<_>>(), vec!["z.node", "a.node", "m.node"]);
        assert_eq!(fields.get("m.node").unwrap()["vlan"], 30);
        assert_eq!(
            serde_json::to_string(&fields).unwrap(),
            r#"{"z.node":{"vlan":10},"a.node":{},"m.node":{"vlan":30}}"#
        );
    }

    #[test]
    fn test_device_fields_repeated_device_keeps_position() {
        let mut fields = DeviceFields::new();
        fields.insert("b.node", FieldValues::new());
        fields.insert("a.node", FieldValues::new());
        fields.insert("b.node", [("vlan".to_string(), Value::from(7))].into());

        assert_eq!(fields.len(), 2);
        assert_eq!(fields.first_device().map(String::as_str), Some("b.node"));
        assert_eq!(fields.get("b.node").unwrap()["vlan"], 7);
    }

    #[test]
    fn test_device_group_keeps_credentials() {
        let group = DeviceGroup {
            name: "core".to_string(),
            username: Some("admin".to_string()),
            password: Some("s3cret".to_string()),
            enable_password: Some("en4ble".to_string()),
        };
        let reloaded: DeviceGroup = serde_json::from_str(&serde_json::to_string(&group).unwrap()).unwrap();
        assert_eq!(reloaded, group);
    }
}
