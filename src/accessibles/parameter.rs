//! `Parameter`, grounded in `frappy/params.py`'s `Parameter` class.

use std::collections::BTreeSet;

use serde_json::{Map, Value as Json};

use super::{Accessible, LimitChain};
use crate::errors::{Result, SecopError};
use crate::types::{DataType, Value};

/// Controls whether repeated identical updates reach the dispatcher (spec
/// §3 `update_unchanged ∈ {always, never, float seconds, default}` / frappy
/// `Parameter.update_unchanged`).
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum UpdateUnchanged {
    /// Use the module-wide `omit_unchanged_within` policy.
    Default,
    Always,
    Never,
    /// Coalesce identical-value updates within this many seconds of the
    /// previously broadcast one, overriding the module-wide window.
    Within(f64),
}

#[derive(Debug, Clone)]
pub struct Parameter {
    pub name: String,
    pub datatype: DataType,
    pub description: String,
    pub readonly: bool,
    pub group: Option<String>,
    pub visibility: Visibility,
    /// A value that never changes; if set, `read_P` is never called and no
    /// polling happens for this parameter (frappy `Parameter.constant`).
    pub constant: Option<Value>,
    pub default: Option<Value>,
    pub export: bool,
    pub update_unchanged: UpdateUnchanged,
    /// Names of other parameters whose `check_P` chain this one feeds into
    /// (frappy `Parameter.influences`, e.g. `target` influences `value`).
    pub influences: BTreeSet<String>,
    /// Present on writable numeric parameters with companion `<name>_min`/
    /// `<name>_max` sibling parameters (spec §4.3 "check_P limit chain").
    pub limits: Option<LimitChain>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Visibility {
    User,
    Advanced,
    Expert,
}

impl Parameter {
    pub fn new(name: impl Into<String>, datatype: DataType, description: impl Into<String>) -> Self {
        Parameter {
            name: name.into(),
            datatype,
            description: description.into(),
            readonly: true,
            group: None,
            visibility: Visibility::User,
            constant: None,
            default: None,
            export: true,
            update_unchanged: UpdateUnchanged::Default,
            influences: BTreeSet::new(),
            limits: None,
        }
    }

    pub fn writable(mut self) -> Self {
        self.readonly = false;
        self
    }

    pub fn with_limits(mut self, limits: LimitChain) -> Self {
        self.limits = Some(limits);
        self
    }

    /// Validate a value accepted from `change` or from a `write_P` result
    /// (spec §4.3: "write_P goes through the same validate + check_P chain
    /// as change requests").
    pub fn check(&self, raw: &Json) -> Result<Value> {
        if self.constant.is_some() {
            return Err(SecopError::ReadOnly(format!(
                "{} is a constant parameter",
                self.name
            )));
        }
        let value = self.datatype.validate(raw)?;
        if let Some(limits) = &self.limits {
            limits.check(&value)?;
        }
        Ok(value)
    }

    pub fn initial_value(&self) -> Value {
        self.constant
            .clone()
            .or_else(|| self.default.clone())
            .unwrap_or_else(|| self.datatype.default_value())
    }
}

impl Accessible for Parameter {
    fn name(&self) -> &str {
        &self.name
    }

    fn export_datatype(&self) -> Json {
        self.datatype.export_datatype()
    }

    fn export_properties(&self) -> Map<String, Json> {
        let mut props = Map::new();
        props.insert("description".to_string(), Json::from(self.description.clone()));
        props.insert("datainfo".to_string(), self.export_datatype());
        props.insert("readonly".to_string(), Json::from(self.readonly));
        props.insert(
            "visibility".to_string(),
            Json::from(match self.visibility {
                Visibility::User => "user",
                Visibility::Advanced => "advanced",
                Visibility::Expert => "expert",
            }),
        );
        if let Some(group) = &self.group {
            props.insert("group".to_string(), Json::from(group.clone()));
        }
        if !self.influences.is_empty() {
            props.insert(
                "influences".to_string(),
                Json::Array(self.influences.iter().cloned().map(Json::from).collect()),
            );
        }
        if let Some(constant) = &self.constant {
            props.insert("constant".to_string(), self.datatype.export_value(constant));
        }
        props
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::accessibles::limit::LimitChain;

    #[test]
    fn constant_parameter_rejects_change() {
        let mut p = Parameter::new("pi", DataType::float(0.0, 10.0), "a constant").writable();
        p.constant = Some(Value::Float(3.14));
        assert!(matches!(p.check(&Json::from(1.0)), Err(SecopError::ReadOnly(_))));
    }

    #[test]
    fn limit_chain_rejects_out_of_bound_target() {
        let limits = LimitChain::new(DataType::float(-100.0, 100.0), -10.0, 10.0);
        let p = Parameter::new("target", DataType::float(-100.0, 100.0), "target").writable().with_limits(limits);
        assert!(p.check(&Json::from(50.0)).is_err());
        assert!(p.check(&Json::from(5.0)).is_ok());
    }

    #[test]
    fn initial_value_prefers_constant_over_default() {
        let mut p = Parameter::new("x", DataType::int(0, 10), "x");
        p.default = Some(Value::Int(2));
        p.constant = Some(Value::Int(7));
        assert_eq!(p.initial_value(), Value::Int(7));
    }
}
