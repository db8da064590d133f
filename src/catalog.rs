//! Catalog - Record Store
//!
//! Holds templates, groups, services, devices and orders. Loaded from and
//! saved to a single JSON document.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::fs;
use std::path::Path;
use thiserror::Error;
use tracing::{debug, info};

use crate::templates::{
    Device, DeviceGroup, DeviceId, DeviceServiceGroup, FieldChanges, FieldSet, FieldSetError,
    GroupId, Order, OrderId, Service, ServiceId, Template, TemplateId,
};
use crate::validation::ValidatorRegistry;

#[derive(Debug, Error)]
pub enum CatalogError {
    #[error("Template not found: {0}")]
    TemplateNotFound(TemplateId),

    #[error("Device-service group not found: {0}")]
    GroupNotFound(GroupId),

    #[error("Service not found: {0}")]
    ServiceNotFound(ServiceId),

    #[error("Order not found: {0}")]
    OrderNotFound(OrderId),

    #[error("Device not found: {0}")]
    DeviceNotFound(DeviceId),

    #[error("Field set rejected: {0}")]
    FieldSet(#[from] FieldSetError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// On-disk shape of a catalog.
#[derive(Debug, Default, Serialize, Deserialize)]
struct CatalogDocument {
    #[serde(default)]
    templates: Vec<Template>,
    #[serde(default)]
    groups: Vec<DeviceServiceGroup>,
    #[serde(default)]
    services: Vec<Service>,
    #[serde(default)]
    devices: Vec<Device>,
    #[serde(default)]
    device_groups: Vec<DeviceGroup>,
    #[serde(default)]
    orders: Vec<Order>,
}

/// Edits accepted for a stored template. Absent fields are left unchanged.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct TemplateUpdate {
    pub name: Option<String>,
    pub description: Option<String>,
    pub platform: Option<String>,
    pub up_contents: Option<String>,
    pub down_contents: Option<String>,
    pub deleted: Option<bool>,
}

#[derive(Debug, Clone, Default)]
pub struct Catalog {
    templates: BTreeMap<TemplateId, Template>,
    groups: BTreeMap<GroupId, DeviceServiceGroup>,
    services: BTreeMap<ServiceId, Service>,
    devices: BTreeMap<DeviceId, Device>,
    device_groups: BTreeMap<String, DeviceGroup>,
    orders: BTreeMap<OrderId, Order>,
}

impl Catalog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_json_str(json: &str) -> Result<Self, CatalogError> {
        let document: CatalogDocument = serde_json::from_str(json)?;
        let mut catalog = Self::new();
        for template in document.templates {
            catalog.register_template(template);
        }
        for group in document.groups {
            catalog.add_group(group);
        }
        for service in document.services {
            catalog.add_service(service);
        }
        for device in document.devices {
            catalog.add_device(device);
        }
        for device_group in document.device_groups {
            catalog.add_device_group(device_group);
        }
        for order in document.orders {
            catalog.add_order(order);
        }
        Ok(catalog)
    }

    pub fn load_from_file(path: &Path) -> Result<Self, CatalogError> {
        let content = fs::read_to_string(path)?;
        let catalog = Self::from_json_str(&content)?;
        info!(
            path = %path.display(),
            templates = catalog.templates.len(),
            services = catalog.services.len(),
            orders = catalog.orders.len(),
            "catalog loaded"
        );
        Ok(catalog)
    }

    pub fn to_json_string(&self) -> Result<String, CatalogError> {
        let document = CatalogDocument {
            templates: self.templates.values().cloned().collect(),
            groups: self.groups.values().cloned().collect(),
            services: self.services.values().cloned().collect(),
            devices: self.devices.values().cloned().collect(),
            device_groups: self.device_groups.values().cloned().collect(),
            orders: self.orders.values().cloned().collect(),
        };
        Ok(serde_json::to_string_pretty(&document)?)
    }

    pub fn save_to_file(&self, path: &Path) -> Result<(), CatalogError> {
        fs::write(path, self.to_json_string()?)?;
        Ok(())
    }

    /// Check every template against the validators and every reference
    /// between records. Run once on catalogs coming from outside.
    pub fn verify(&self, validators: &ValidatorRegistry) -> Result<(), CatalogError> {
        for template in self.templates.values() {
            template.check(validators)?;
        }
        for group in self.groups.values() {
            self.templates_of(group)?;
            if let Some(node) = &group.node {
                self.device(node)?;
            }
        }
        for service in self.services.values() {
            self.groups_of(service)?;
        }
        for order in self.orders.values() {
            self.service(order.service)?;
            for device in order.template_fields.devices() {
                self.device(device)?;
            }
        }
        debug!(templates = self.templates.len(), groups = self.groups.len(), "catalog verified");
        Ok(())
    }

    // --- Registration ---

    /// Store a template as given. Use [`Catalog::create_template`] to have
    /// its fields derived from the bodies.
    pub fn register_template(&mut self, template: Template) {
        self.templates.insert(template.id, template);
    }

    pub fn add_group(&mut self, group: DeviceServiceGroup) {
        self.groups.insert(group.id, group);
    }

    pub fn add_service(&mut self, service: Service) {
        self.services.insert(service.id, service);
    }

    pub fn add_device(&mut self, device: Device) {
        self.devices.insert(device.hostname.clone(), device);
    }

    pub fn add_device_group(&mut self, group: DeviceGroup) {
        self.device_groups.insert(group.name.clone(), group);
    }

    pub fn add_order(&mut self, order: Order) {
        self.orders.insert(order.id, order);
    }

    // --- Lookups ---

    /// Soft-deleted templates stay addressable; groups may still use them.
    pub fn template(&self, id: TemplateId) -> Result<&Template, CatalogError> {
        self.templates.get(&id).ok_or(CatalogError::TemplateNotFound(id))
    }

    pub fn list_templates(&self) -> Vec<&Template> {
        self.templates.values().filter(|t| !t.deleted).collect()
    }

    pub fn group(&self, id: GroupId) -> Result<&DeviceServiceGroup, CatalogError> {
        self.groups.get(&id).ok_or(CatalogError::GroupNotFound(id))
    }

    pub fn service(&self, id: ServiceId) -> Result<&Service, CatalogError> {
        self.services.get(&id).ok_or(CatalogError::ServiceNotFound(id))
    }

    pub fn device(&self, hostname: &str) -> Result<&Device, CatalogError> {
        self.devices
            .get(hostname)
            .ok_or_else(|| CatalogError::DeviceNotFound(hostname.to_string()))
    }

    pub fn device_group(&self, name: &str) -> Option<&DeviceGroup> {
        self.device_groups.get(name)
    }

    /// Soft-deleted orders are not found.
    pub fn order(&self, id: OrderId) -> Result<&Order, CatalogError> {
        self.orders
            .get(&id)
            .filter(|order| !order.deleted)
            .ok_or(CatalogError::OrderNotFound(id))
    }

    pub fn list_orders(&self) -> Vec<&Order> {
        self.orders.values().filter(|o| !o.deleted).collect()
    }

    pub fn groups_of(&self, service: &Service) -> Result<Vec<&DeviceServiceGroup>, CatalogError> {
        service.groups.iter().map(|id| self.group(*id)).collect()
    }

    pub fn templates_of(&self, group: &DeviceServiceGroup) -> Result<Vec<&Template>, CatalogError> {
        group.templates.iter().map(|id| self.template(*id)).collect()
    }

    // --- Template administration ---

    /// Create a template with fields derived from its bodies.
    pub fn create_template(
        &mut self,
        name: impl Into<String>,
        up_contents: impl Into<String>,
        down_contents: impl Into<String>,
    ) -> TemplateId {
        let id = self.templates.keys().next_back().map_or(1, |last| last + 1);
        let template = Template::new(id, name, up_contents, down_contents);
        debug!(template = id, fields = template.fields.len(), "template created");
        self.templates.insert(id, template);
        id
    }

    /// Edit a template and reconcile every group that uses it. Defaults for
    /// fields no template of the group tracks any more are dropped. The
    /// template and its groups are written together.
    pub fn update_template(
        &mut self,
        id: TemplateId,
        update: TemplateUpdate,
    ) -> Result<FieldChanges, CatalogError> {
        let mut template = self.template(id)?.clone();
        if let Some(name) = update.name {
            template.name = name;
        }
        if update.description.is_some() {
            template.description = update.description;
        }
        if update.platform.is_some() {
            template.platform = update.platform;
        }
        if let Some(deleted) = update.deleted {
            template.deleted = deleted;
        }
        let changes = template.update_contents(update.up_contents, update.down_contents);

        let mut reconciled = Vec::new();
        if !changes.removed.is_empty() {
            for group in self.groups.values().filter(|g| g.templates.contains(&id)) {
                let tracked: BTreeSet<&str> = group
                    .templates
                    .iter()
                    .filter_map(|tid| {
                        if *tid == id {
                            Some(&template)
                        } else {
                            self.templates.get(tid)
                        }
                    })
                    .flat_map(|t| t.fields.keys().map(String::as_str))
                    .collect();

                if group.defaults.iter().all(|d| tracked.contains(d.field.as_str())) {
                    continue;
                }
                let mut group = group.clone();
                group.defaults.retain(|d| tracked.contains(d.field.as_str()));
                reconciled.push(group);
            }
        }

        for group in reconciled {
            info!(group = group.id, template = id, "group defaults reconciled");
            self.groups.insert(group.id, group);
        }
        self.templates.insert(id, template);
        Ok(changes)
    }

    pub fn soft_delete_template(&mut self, id: TemplateId) -> Result<(), CatalogError> {
        let template = self
            .templates
            .get_mut(&id)
            .ok_or(CatalogError::TemplateNotFound(id))?;
        template.deleted = true;
        Ok(())
    }

    pub fn soft_delete_order(&mut self, id: OrderId) -> Result<(), CatalogError> {
        let order = self
            .orders
            .get_mut(&id)
            .filter(|order| !order.deleted)
            .ok_or(CatalogError::OrderNotFound(id))?;
        order.deleted = true;
        Ok(())
    }

    pub fn fieldset(&self, id: TemplateId) -> Result<FieldSet, CatalogError> {
        Ok(self.template(id)?.fieldset())
    }

    /// Replace validators and labels of tracked fields. Nothing is written
    /// if any entry is rejected.
    pub fn update_fieldset(
        &mut self,
        id: TemplateId,
        fieldset: &FieldSet,
        validators: &ValidatorRegistry,
    ) -> Result<FieldSet, CatalogError> {
        let template = self
            .templates
            .get_mut(&id)
            .ok_or(CatalogError::TemplateNotFound(id))?;
        template.apply_fieldset(&fieldset.resource_fieldset, validators)?;
        debug!(template = id, entries = fieldset.resource_fieldset.len(), "field set updated");
        Ok(template.fieldset())
    }
}
