//! Contract Invariant Tests
//!
//! These tests verify the non-negotiable guarantees.

use serde_json::json;
use std::sync::Arc;

use viconf_core::{
    compile_order, configurable_tags,
    merge::merge,
    render::{render, Params},
    Catalog, CatalogError, CompilationPipeline, CompileError, FieldSet, FieldSetError, FieldSpec,
    Template, TemplateUpdate, ValidatorRegistry, NO_NODE_KEY,
};

const CATALOG: &str = r#"{
    "templates": [
        {
            "id": 1,
            "name": "access vlan",
            "up_contents": "vlan {{ vlan }}\n name {{ customer }}",
            "down_contents": "no vlan {{ vlan }}",
            "fields": {"vlan": "vlan"},
            "labels": {"vlan": "VLAN"}
        },
        {
            "id": 2,
            "name": "uplink",
            "up_contents": "interface {{ port }}\n description {{ reference }}",
            "down_contents": "default interface {{ port }}",
            "fields": {"port": "ioxif"},
            "labels": {"port": "Port"}
        }
    ],
    "groups": [
        {"id": 1, "name": "pe", "templates": [1], "node": "pe1.example.net",
         "defaults": [{"field": "vlan", "default": 100, "configurable": true}]},
        {"id": 2, "name": "ce", "templates": [2]}
    ],
    "services": [{"id": 1, "name": "l2vpn", "groups": [1, 2]}],
    "devices": [
        {"hostname": "pe1.example.net", "ipv4": "192.0.2.1", "driver": "iosxr", "group": "core"},
        {"hostname": "test.node"},
        {"hostname": "a.node"}
    ],
    "device_groups": [
        {"name": "core", "username": "admin", "password": "s3cret", "enable_password": "en4ble"}
    ],
    "orders": [
        {"id": 1, "reference": "ORD-1", "customer": "ACME", "service": 1,
         "template_fields": {"test.node": {"port": "GigabitEthernet0/0/1"}}}
    ]
}"#;

fn pipeline() -> CompilationPipeline {
    let catalog = Catalog::from_json_str(CATALOG).unwrap();
    CompilationPipeline::new(catalog, Arc::new(ValidatorRegistry::new()))
}

/// INVARIANT: A new template tracks its tags with the default validator
#[test]
fn test_new_template_fields() {
    let mut catalog = Catalog::new();
    let id = catalog.create_template("t", "Here is a template. It contains a {{ variable }}", "");
    let template = catalog.template(id).unwrap();

    assert_eq!(template.fields.len(), 1);
    assert_eq!(template.fields["variable"], "novalidation");
    assert_eq!(template.labels["variable"], "Variable");
}

/// INVARIANT: Built-in tags are never configurable
#[test]
fn test_builtins_not_configurable() {
    let tags = configurable_tags(
        "{{ node }} {{ node_ipv4 }} {{ node_ipv6 }} {{ customer }} {{ location }} {{ reference }} {{ vlan }}",
    );
    assert_eq!(tags.into_iter().collect::<Vec<_>>(), vec!["vlan"]);
}

/// INVARIANT: Merged fragments render to the exact expected text
#[test]
fn test_merge_and_render() {
    let body = merge(&[
        "{{! maintemplate }}\nFurther content:\n{{! subtemplates }}\nNothing more here.\n",
        "template2: {{ var1 }}",
        "template3: {{ var1 }} {{ var2 }}",
    ]);
    let mut params = Params::new();
    params.insert("var1".to_string(), json!("Hello"));
    params.insert("var2".to_string(), json!("World"));

    assert_eq!(
        render(&body, &params),
        "Further content:\ntemplate2: Hello\ntemplate3: Hello World\n\nNothing more here.\n"
    );
}

/// INVARIANT: Without markers, merging is a newline join
#[test]
fn test_merge_without_markers() {
    let fragments = ["interface {{ port }}", "{{! maintemplate }}", "shutdown"];
    assert_eq!(merge(&fragments), fragments.join("\n"));
}

/// INVARIANT: Range lower bound is accepted, upper bound is not
#[test]
fn test_range_bounds() {
    let registry = ValidatorRegistry::new();
    for (name, start, end) in [("vlan", 1u64, 4094u64), ("bundle", 1, 65535), ("asn", 1, 4294967296)] {
        assert!(registry.validate(name, &json!(start)).unwrap(), "{name} start");
        assert!(registry.validate(name, &json!(end - 1)).unwrap(), "{name} last");
        assert!(!registry.validate(name, &json!(end)).unwrap(), "{name} end");
        assert!(!registry.validate(name, &json!(0)).unwrap(), "{name} zero");
    }
}

/// INVARIANT: Every pattern is anchored at the start of the value
#[test]
fn test_pattern_anchoring() {
    let registry = ValidatorRegistry::new();
    let valid = [
        ("string", "uplink"),
        ("cidrv4", "192.0.2.0/24"),
        ("digits", "42"),
        ("ioxif", "HundredGigE0/0/0/0"),
        ("ipv4", "10.0.0.1"),
        ("ipv6", "fe80::1"),
        ("cidrv6", "2001:db8::1/128"),
    ];

    let patterns: Vec<_> = registry.list().into_iter().filter(|v| v.kind == "regex").collect();
    assert_eq!(patterns.len(), valid.len());

    for (name, value) in valid {
        assert!(patterns.iter().any(|v| v.name == name), "{name} is a pattern validator");
        assert!(registry.validate(name, &json!(value)).unwrap(), "{name} accepts {value}");
        let garbled = format!("# {value}");
        assert!(!registry.validate(name, &json!(garbled.as_str())).unwrap(), "{name} rejects {garbled}");
    }
}

/// INVARIANT: An unbound group takes the device addressed by the order
#[test]
fn test_unbound_group_resolves_order_device() {
    let pipeline = pipeline();
    let configs = pipeline.compile(1).unwrap();

    let nodes: Vec<_> = configs.iter().map(|c| c.node.as_str()).collect();
    assert_eq!(nodes, vec!["pe1.example.net", "test.node"]);
    assert_eq!(configs[0].service_up, "vlan 100\n name ACME");
    assert_eq!(
        configs[1].service_up,
        "interface GigabitEthernet0/0/1\n description ORD-1"
    );
    assert_eq!(configs[1].service_down, "default interface GigabitEthernet0/0/1");
}

/// INVARIANT: An unbound group follows the device the order lists first
#[test]
fn test_unbound_group_on_multi_device_order() {
    let json = CATALOG.replace(
        r#"{"test.node": {"port": "GigabitEthernet0/0/1"}}"#,
        r#"{"test.node": {"port": "GigabitEthernet0/0/1"}, "a.node": {"port": "TenGigE0/0/0/9"}}"#,
    );
    let catalog = Catalog::from_json_str(&json).unwrap();
    let pipeline = CompilationPipeline::new(catalog, Arc::new(ValidatorRegistry::new()));

    let configs = pipeline.compile(1).unwrap();
    assert_eq!(configs[1].node, "test.node");
    assert_eq!(configs[1].service_up, "interface GigabitEthernet0/0/1\n description ORD-1");
}

/// INVARIANT: One invalid field rejects the whole order
#[test]
fn test_invalid_field_rejects_order() {
    let pipeline = pipeline();
    let mut order = pipeline.catalog().order(1).unwrap().clone();
    order
        .template_fields
        .insert("pe1.example.net".to_string(), [("vlan".to_string(), json!(5000))].into());

    let result = compile_order(pipeline.catalog(), pipeline.validators(), &order);
    match result {
        Err(CompileError::TagValidation { field, validator }) => {
            assert_eq!(field, "vlan");
            assert_eq!(validator, "vlan");
        }
        other => panic!("expected validation failure, got {:?}", other),
    }
}

/// INVARIANT: Same order, same catalog, same digest
#[test]
fn test_manifest_determinism() {
    let pipeline = pipeline();
    let first = pipeline.compile_manifest(1).unwrap();
    let second = pipeline.compile_manifest(1).unwrap();

    assert_eq!(first.config_hash, second.config_hash);
    assert_eq!(first.configs, second.configs);
    assert_eq!(first.engine_version, viconf_core::ENGINE_VERSION);
}

/// INVARIANT: Service schema keys unbound groups by the sentinel
#[test]
fn test_service_schema_keys() {
    let schema = pipeline().service_schema(1).unwrap();
    let keys: Vec<_> = schema.template_fields.keys().cloned().collect();
    assert_eq!(keys, vec![NO_NODE_KEY.to_string(), "pe1.example.net".to_string()]);

    let pe = &schema.template_fields["pe1.example.net"];
    assert_eq!(pe["vlan"].label, "VLAN");
    assert_eq!(pe["vlan"].default, json!(100));
    assert_eq!(schema.template_fields[NO_NODE_KEY]["port"].validator, "ioxif");
}

/// INVARIANT: A rejected field set writes nothing
#[test]
fn test_rejected_fieldset_is_atomic() {
    let mut pipeline = pipeline();
    let before: Template = pipeline.catalog().template(1).unwrap().clone();

    let fieldset = FieldSet {
        resource_template_id: Some(1),
        resource_fieldset: vec![
            FieldSpec { name: "vlan".to_string(), validator: "digits".to_string(), label: "Id".to_string() },
            FieldSpec { name: "vlan".to_string(), validator: "bogus".to_string(), label: "Id".to_string() },
        ],
    };
    let result = pipeline.update_fieldset(1, &fieldset);

    assert!(matches!(result, Err(CatalogError::FieldSet(_))));
    let after = pipeline.catalog().template(1).unwrap();
    assert_eq!(after.fields, before.fields);
    assert_eq!(after.labels, before.labels);
}

/// INVARIANT: Removing a tag from a template drops its group defaults
#[test]
fn test_template_edit_reconciles_defaults() {
    let mut pipeline = pipeline();
    let changes = pipeline
        .catalog_mut()
        .update_template(1, TemplateUpdate {
            up_contents: Some("vlan 1".to_string()),
            down_contents: Some("no vlan 1".to_string()),
            ..Default::default()
        })
        .unwrap();

    assert_eq!(changes.removed, vec!["vlan".to_string()]);
    assert!(pipeline.catalog().group(1).unwrap().defaults.is_empty());
}

/// INVARIANT: Catalog survives a save and load, credentials included
#[test]
fn test_catalog_file_round_trip() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("catalog.json");

    let catalog = Catalog::from_json_str(CATALOG).unwrap();
    catalog.save_to_file(&path).unwrap();

    let pipeline = CompilationPipeline::load(&path, Arc::new(ValidatorRegistry::new())).unwrap();
    assert_eq!(pipeline.compile(1).unwrap().len(), 2);

    let core = pipeline.catalog().device_group("core").unwrap();
    assert_eq!(core.password.as_deref(), Some("s3cret"));
    assert_eq!(core.enable_password.as_deref(), Some("en4ble"));
}

/// INVARIANT: A catalog with inconsistent templates is refused on load
#[test]
fn test_load_rejects_unknown_validator() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("catalog.json");
    std::fs::write(&path, CATALOG.replace(r#""port": "ioxif""#, r#""port": "xrif""#)).unwrap();

    let result = CompilationPipeline::load(&path, Arc::new(ValidatorRegistry::new()));
    assert!(matches!(
        result,
        Err(CatalogError::FieldSet(FieldSetError::UnknownValidator { ref validator, .. })) if validator == "xrif"
    ));
}
