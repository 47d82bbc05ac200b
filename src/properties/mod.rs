//! Typed, inheritable metadata (spec §3 "Properties"), grounded in
//! `secop/properties.py`'s `Property`/`HasProperties` pair.
//!
//! frappy merges properties across a Python class MRO at class-definition
//! time; here a `Module`/`Accessible` builder clones its class-level
//! `PropertyBag` once per instance and applies config overrides on top
//! (`Module`/`module::builder`), so there is no metaclass machinery to port.

use std::collections::BTreeMap;

use serde_json::Value as Json;

use crate::errors::{Result, SecopError};
use crate::types::DataType;

/// One property slot: its declared datatype plus the behavioural flags
/// frappy attaches to every `Property()` descriptor.
#[derive(Debug, Clone)]
pub struct PropertyDef {
    pub name: &'static str,
    pub datatype: DataType,
    pub default: Json,
    pub mandatory: bool,
    /// Settable from a config file (`extname`/cfg override), vs. fixed by code.
    pub settable: bool,
    /// Sent to clients in descriptive data (spec §6 "properties starting
    /// with `_` are not exported" — modeled here as an explicit flag instead
    /// of a naming convention).
    pub export: bool,
}

impl PropertyDef {
    pub const fn new(name: &'static str, datatype: DataType, default: Json) -> Self {
        PropertyDef { name, datatype, default, mandatory: false, settable: true, export: true }
    }

    /// Marks this property as required to be set before `check_mandatory`
    /// passes. Pair with a `Json::Null` default — `check_mandatory` treats
    /// a still-null value as "not yet supplied", so a non-null default
    /// here would defeat the check.
    pub const fn mandatory(mut self) -> Self {
        self.mandatory = true;
        self
    }

    pub const fn fixed(mut self) -> Self {
        self.settable = false;
        self
    }

    pub const fn internal(mut self) -> Self {
        self.export = false;
        self
    }
}

/// A live set of property values for one module/accessible instance.
/// Construction order matters (spec: "merged across class hierarchies"):
/// `PropertyBag::new` seeds class defaults, then `apply_config` overlays
/// cfgdict values, mirroring frappy's `checkProperties`/`setProperty` pass
/// in `HasProperties.__init__`.
#[derive(Debug, Clone, Default)]
pub struct PropertyBag {
    defs: BTreeMap<&'static str, PropertyDef>,
    values: BTreeMap<&'static str, Json>,
}

impl PropertyBag {
    pub fn new(defs: impl IntoIterator<Item = PropertyDef>) -> Self {
        let mut bag = PropertyBag::default();
        for def in defs {
            bag.values.insert(def.name, def.default.clone());
            bag.defs.insert(def.name, def);
        }
        bag
    }

    /// Overlay a config-file value, validating it against the declared
    /// datatype (frappy `HasProperties.setProperty`).
    pub fn set(&mut self, name: &str, value: &Json) -> Result<()> {
        let def = self
            .defs
            .get(name)
            .ok_or_else(|| SecopError::ConfigError(format!("unknown property {name}")))?;
        if !def.settable {
            return Err(SecopError::ConfigError(format!("property {name} is not settable")));
        }
        let validated = def.datatype.validate(value).map_err(|e| {
            SecopError::ConfigError(format!("property {name}: {}", e.message()))
        })?;
        self.values.insert(def.name, def.datatype.export_value(&validated));
        Ok(())
    }

    pub fn get(&self, name: &str) -> Option<&Json> {
        self.values.get(name)
    }

    pub fn get_str(&self, name: &str) -> Option<&str> {
        self.values.get(name).and_then(Json::as_str)
    }

    pub fn get_bool(&self, name: &str) -> Option<bool> {
        self.values.get(name).and_then(Json::as_bool)
    }

    pub fn get_f64(&self, name: &str) -> Option<f64> {
        self.values.get(name).and_then(Json::as_f64)
    }

    /// Validates that every mandatory property was actually set (frappy
    /// `checkProperties`, called once at the end of `__init__`).
    pub fn check_mandatory(&self) -> Result<()> {
        for def in self.defs.values() {
            if def.mandatory && self.values.get(def.name).is_none_or(Json::is_null) {
                return Err(SecopError::ConfigError(format!(
                    "mandatory property {} was not given a value",
                    def.name
                )));
            }
        }
        Ok(())
    }

    /// The subset of properties sent out as descriptive data (spec §6).
    pub fn exported(&self) -> impl Iterator<Item = (&'static str, &Json)> {
        self.defs
            .values()
            .filter(|d| d.export)
            .filter_map(|d| self.values.get(d.name).map(|v| (d.name, v)))
    }
}
