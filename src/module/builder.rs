//! Applies a config-file `cfgdict` onto a module's class-level accessible
//! definitions (frappy `Module.__init__`'s property/parameter override pass).

use indexmap::IndexMap;
use serde::Deserialize;
use serde_json::Value as Json;

use crate::accessibles::{Command, Parameter};
use crate::errors::{Result, SecopError};
use crate::properties::PropertyBag;

/// One module's section of the node config file (spec AMBIENT "Config").
#[derive(Debug, Clone, Deserialize)]
pub struct ModuleConfig {
    pub class: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub group: Option<String>,
    #[serde(default)]
    pub visibility: Option<String>,
    /// Per-parameter overrides: `default` (initial/target value) or
    /// `constant` (frappy cfgdict entries like `value.default: 3`).
    #[serde(default)]
    pub parameters: IndexMap<String, ParameterOverride>,
}

#[derive(Debug, Clone, Deserialize, Default)]
pub struct ParameterOverride {
    #[serde(default)]
    pub default: Option<Json>,
    #[serde(default)]
    pub constant: Option<Json>,
    #[serde(default)]
    pub export: Option<bool>,
}

/// Applies a [`ModuleConfig`]'s overrides onto the class-level parameter
/// table a module's Rust type registers for itself, returning the per-
/// instance table the running [`crate::module::Module`] will own.
pub fn apply_overrides(
    mut parameters: IndexMap<String, Parameter>,
    cfg: &ModuleConfig,
) -> Result<IndexMap<String, Parameter>> {
    for (name, over) in &cfg.parameters {
        let param = parameters
            .get_mut(name)
            .ok_or_else(|| SecopError::ConfigError(format!("no such parameter {name}")))?;
        if let Some(default) = &over.default {
            param.default = Some(param.datatype.validate(default).map_err(|e| {
                SecopError::ConfigError(format!("{name}.default: {}", e.message()))
            })?);
        }
        if let Some(constant) = &over.constant {
            param.constant = Some(param.datatype.validate(constant).map_err(|e| {
                SecopError::ConfigError(format!("{name}.constant: {}", e.message()))
            })?);
        }
        if let Some(export) = over.export {
            param.export = export;
        }
    }
    Ok(parameters)
}

pub fn apply_module_properties(mut properties: PropertyBag, cfg: &ModuleConfig) -> Result<PropertyBag> {
    if let Some(description) = &cfg.description {
        properties.set("description", &Json::from(description.clone()))?;
    }
    if let Some(group) = &cfg.group {
        properties.set("group", &Json::from(group.clone()))?;
    }
    if let Some(visibility) = &cfg.visibility {
        properties.set("visibility", &Json::from(visibility.clone()))?;
    }
    Ok(properties)
}

/// Groups the pieces needed to instantiate a `Module`: its class-level
/// accessible tables plus the per-instance overrides from the node config.
pub struct ModuleBlueprint {
    pub class_name: &'static str,
    pub property_defs: Vec<crate::properties::PropertyDef>,
    pub parameters: IndexMap<String, Parameter>,
    pub commands: IndexMap<String, Command>,
}

impl ModuleBlueprint {
    pub fn build(self, cfg: &ModuleConfig) -> Result<(PropertyBag, IndexMap<String, Parameter>, IndexMap<String, Command>)> {
        let properties = apply_module_properties(PropertyBag::new(self.property_defs), cfg)?;
        let parameters = apply_overrides(self.parameters, cfg)?;
        properties.check_mandatory()?;
        Ok((properties, parameters, self.commands))
    }
}
