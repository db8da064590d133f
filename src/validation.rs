//! Validation System - Named Field Rules
//!
//! Rules test a single field value. The registry maps validator names to
//! rules, is built once at startup and is read-only afterwards.

use regex::Regex;
use serde::Serialize;
use serde_json::Value;
use std::collections::BTreeMap;
use thiserror::Error;

use crate::render::display_value;

/// Validator assigned to newly discovered tags.
pub const DEFAULT_VALIDATOR: &str = "novalidation";

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ValidationError {
    #[error("{value} is not a valid {validator}")]
    Invalid { value: String, validator: String },

    #[error("unknown validator {0}")]
    UnknownValidator(String),
}

/// Validation rule trait - decides whether a value is acceptable
pub trait FieldRule: Send + Sync {
    fn kind(&self) -> &'static str;
    fn check(&self, value: &str) -> bool;
}

// --- Concrete Rules ---

pub struct NoValidation;

impl FieldRule for NoValidation {
    fn kind(&self) -> &'static str { "novalidation" }

    fn check(&self, _value: &str) -> bool {
        true
    }
}

pub struct RegexRule {
    pattern: Regex,
}

impl RegexRule {
    pub fn new(pattern: &str) -> Result<Self, regex::Error> {
        Ok(Self { pattern: Regex::new(pattern)? })
    }
}

impl FieldRule for RegexRule {
    fn kind(&self) -> &'static str { "regex" }

    fn check(&self, value: &str) -> bool {
        // Matches must start at the beginning of the value.
        self.pattern.find(value).is_some_and(|m| m.start() == 0)
    }
}

/// Integer range, `end` exclusive.
pub struct RangeRule {
    pub start: i64,
    pub end: i64,
}

impl FieldRule for RangeRule {
    fn kind(&self) -> &'static str { "range" }

    fn check(&self, value: &str) -> bool {
        value
            .trim()
            .parse::<i64>()
            .is_ok_and(|number| (self.start..self.end).contains(&number))
    }
}

/// A registry entry: a rule plus its user-facing metadata.
pub struct ValidatorDef {
    pub description: &'static str,
    pub error: Option<&'static str>,
    pub css_class: Option<&'static str>,
    pub rule: Box<dyn FieldRule>,
}

/// Serializable listing of one validator.
#[derive(Debug, Clone, Serialize)]
pub struct ValidatorInfo {
    pub name: String,
    #[serde(rename = "type")]
    pub kind: &'static str,
    pub description: &'static str,
    pub error: Option<&'static str>,
    pub css_class: Option<&'static str>,
}

const IPV4_OCTET: &str = r"(?:25[0-5]|2[0-4][0-9]|[01]?[0-9][0-9]?)";

/// Validator registry - immutable once built
pub struct ValidatorRegistry {
    validators: BTreeMap<String, ValidatorDef>,
}

impl ValidatorRegistry {
    /// Build the standard validator table.
    pub fn new() -> Self {
        let ipv4 = format!(r"^(?:{o}\.){{3}}{o}$", o = IPV4_OCTET);
        let cidrv4 = format!(r"^(?:{o}\.){{3}}{o}/[0-9]+$", o = IPV4_OCTET);

        let mut validators = BTreeMap::new();
        validators.insert(DEFAULT_VALIDATOR.to_string(), no_validation());
        // Catalogs authored before `novalidation` existed use `none`.
        validators.insert("none".to_string(), no_validation());
        validators.insert(
            "string".to_string(),
            regex_def("Basic String Validation", "Invalid string", "validatestring", r"^\S+$"),
        );
        validators.insert(
            "asn".to_string(),
            range_def("Validates AS-numbers", "Invalid ASN", "validateasn", 1, 4_294_967_296),
        );
        validators.insert(
            "bundle".to_string(),
            range_def(
                "Validates IOS-XR Bundle range",
                "Bundle must be a number between 1 and 65535",
                "validatexrbundle",
                1,
                65535,
            ),
        );
        validators.insert(
            "cidrv4".to_string(),
            regex_def("Validates IPv4 CIDR prefixes", "Invalid IPv4 Prefix", "validatecidrv4", &cidrv4),
        );
        validators.insert(
            "digits".to_string(),
            regex_def("Validates numbers", "Must be numbers only", "validatedigits", r"^[0-9]+$"),
        );
        validators.insert(
            "ioxif".to_string(),
            regex_def(
                "Validates IOS-XR Interface",
                "Invalid Interface name",
                "validatesxriface",
                r"^(GigabitEthernet|TenGigE|HundredGigE)([0-9+]/)+([0-9])$",
            ),
        );
        validators.insert(
            "ipv4".to_string(),
            regex_def("Validates IPv4 addresses", "Invalid IPv4 Address", "validateipv4", &ipv4),
        );
        validators.insert(
            "ipv6".to_string(),
            regex_def(
                "Validates IPv6 addresses",
                "Invalid IPv6 address",
                "validateipv6",
                r"^([A-f0-9:]+:+)+[A-f0-9]+$",
            ),
        );
        validators.insert(
            "cidrv6".to_string(),
            regex_def(
                "Validates IPv6 addresses with /prefix",
                "Invalid IPv6 address",
                "validatecidr6",
                r"^([A-f0-9:]+:+)+[A-f0-9]+/[0-9]+$",
            ),
        );
        validators.insert(
            "vlan".to_string(),
            range_def(
                "Validates Vlan",
                "VLAN must be a number between 1 and 4094",
                "validatevlan",
                1,
                4094,
            ),
        );

        Self { validators }
    }

    pub fn is_known(&self, name: &str) -> bool {
        self.validators.contains_key(name)
    }

    pub fn get(&self, name: &str) -> Option<&ValidatorDef> {
        self.validators.get(name)
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.validators.keys().map(String::as_str)
    }

    pub fn list(&self) -> Vec<ValidatorInfo> {
        self.validators
            .iter()
            .map(|(name, def)| ValidatorInfo {
                name: name.clone(),
                kind: def.rule.kind(),
                description: def.description,
                error: def.error,
                css_class: def.css_class,
            })
            .collect()
    }

    /// Check `value` against the named validator.
    pub fn validate(&self, validator: &str, value: &Value) -> Result<bool, ValidationError> {
        let def = self
            .validators
            .get(validator)
            .ok_or_else(|| ValidationError::UnknownValidator(validator.to_string()))?;
        Ok(def.rule.check(&display_value(value)))
    }

    /// Pass `value` through if it satisfies the named validator.
    pub fn test(&self, validator: &str, value: Value) -> Result<Value, ValidationError> {
        if self.validate(validator, &value)? {
            Ok(value)
        } else {
            Err(ValidationError::Invalid {
                value: display_value(&value),
                validator: validator.to_string(),
            })
        }
    }
}

impl Default for ValidatorRegistry {
    fn default() -> Self {
        Self::new()
    }
}

fn no_validation() -> ValidatorDef {
    ValidatorDef {
        description: "No validation",
        error: None,
        css_class: None,
        rule: Box::new(NoValidation),
    }
}

fn regex_def(
    description: &'static str,
    error: &'static str,
    css_class: &'static str,
    pattern: &str,
) -> ValidatorDef {
    let rule = RegexRule::new(pattern).expect("built-in validator pattern must compile");
    ValidatorDef {
        description,
        error: Some(error),
        css_class: Some(css_class),
        rule: Box::new(rule),
    }
}

fn range_def(
    description: &'static str,
    error: &'static str,
    css_class: &'static str,
    start: i64,
    end: i64,
) -> ValidatorDef {
    ValidatorDef {
        description,
        error: Some(error),
        css_class: Some(css_class),
        rule: Box::new(RangeRule { start, end }),
    }
}
