//! Viconf Core - Device Configuration Compiler
//!
//! Templates declare tags, device-service groups bind templates to devices,
//! and orders supply the values. The engine discovers tags, validates every
//! value and renders one configuration per device.
//!
//! ```rust
//! use viconf_core::{tags, merge, render::{render, Params}};
//!
//! assert!(tags::configurable_tags("vlan {{ vlan }} on {{ node }}").contains("vlan"));
//!
//! let body = merge::merge(&["interface {{ port }}", "description {{ descr }}"]);
//! let mut params = Params::new();
//! params.insert("port".into(), "Gi0/1".into());
//! params.insert("descr".into(), "uplink".into());
//! assert_eq!(render(&body, &params), "interface Gi0/1\ndescription uplink");
//! ```

pub mod tags;
pub mod render;
pub mod merge;
pub mod validation;
pub mod templates;
pub mod catalog;
pub mod schema;
pub mod hashing;
pub mod pipeline;

pub use tags::{classify, configurable_tags, discover, list_section_tags, TagClassification};
pub use validation::{ValidationError, ValidatorRegistry};
pub use templates::{
    DefaultEntry, Device, DeviceFields, DeviceServiceGroup, FieldSet, FieldSetError, FieldSpec, Order, Service,
    Template,
};
pub use catalog::{Catalog, CatalogError, TemplateUpdate};
pub use schema::{service_schema, template_schema, ServiceSchema, NO_NODE_KEY};
pub use pipeline::{
    compile_order, CompilationPipeline, CompileError, ConfigurationManifest, DeviceConfig,
};

pub const ENGINE_VERSION: &str = env!("CARGO_PKG_VERSION");
