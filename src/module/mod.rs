//! The per-module runtime: cache, `announceUpdate`, and the accessLock /
//! updateLock discipline (spec §3 "Module", §5 locking model), grounded in
//! `frappy/modulebase.py`'s `Module`/`HasAccessibles`.

pub mod builder;
pub mod lifecycle;

use std::collections::BTreeMap;
use std::sync::{Arc, RwLock as StdRwLock};

use indexmap::IndexMap;
use tokio::sync::{Mutex, RwLock};

use crate::accessibles::{Command, Parameter};
use crate::errors::{Result, SecopError};
use crate::properties::PropertyBag;
use crate::types::Value;

/// One cached parameter reading (frappy's `(timestamp, value, readerror)`
/// triple, spec §5).
#[derive(Debug, Clone)]
pub struct CacheEntry {
    pub value: Value,
    pub timestamp: f64,
    pub read_error: Option<SecopError>,
    /// When this parameter was last actually broadcast to subscribers,
    /// distinct from `timestamp` (which also advances on suppressed
    /// reads). Used to measure the `omit_unchanged_within` coalescing
    /// window (spec §3/§4.4).
    last_broadcast: f64,
}

/// An update event, handed synchronously to every registered callback from
/// within `announce_update` — this is what frappy calls `self.updateCallbacks`
/// (`Module.registerCallbacks`/`addCallback` in `frappy/modulebase.py`): the
/// dispatcher registers one such callback per module at startup so that
/// cache-write and wire broadcast happen in the same call stack, giving the
/// "readback update before reply" ordering spec §5 requires without an
/// extra channel hop.
pub type UpdateCallback = Arc<dyn Fn(&str, &CacheEntry) + Send + Sync>;

/// Implemented by the module-specific business logic (what a concrete
/// instrument driver provides). Mirrors frappy's `read_<param>`/
/// `write_<param>`/`do_<command>` dynamically-dispatched methods, made
/// explicit since Rust has no attribute-name dispatch.
#[async_trait::async_trait]
pub trait ModuleLogic: Send + Sync {
    async fn read_parameter(&self, name: &str) -> Result<Value> {
        Err(SecopError::Internal(format!("no read_{name} implemented")))
    }

    async fn write_parameter(&self, name: &str, value: Value) -> Result<Value> {
        Ok(value)
    }

    async fn do_command(&self, name: &str, _argument: Option<Value>) -> Result<Option<Value>> {
        Err(SecopError::NoSuchCommand(format!("no do_{name} implemented")))
    }
}

/// A module with no custom logic: every parameter is purely cache-driven
/// (writable parameters accept whatever `check_P` allows, readable ones
/// never change without an explicit `announce_update`). Used for simple
/// modules and in tests.
pub struct PassiveLogic;

#[async_trait::async_trait]
impl ModuleLogic for PassiveLogic {
    async fn write_parameter(&self, _name: &str, value: Value) -> Result<Value> {
        Ok(value)
    }
}

pub struct Module {
    pub name: String,
    pub class_name: String,
    pub properties: PropertyBag,
    pub parameters: IndexMap<String, Parameter>,
    pub commands: IndexMap<String, Command>,
    cache: RwLock<BTreeMap<String, CacheEntry>>,
    /// Guards hardware access; frappy's `accessLock` is reentrant because a
    /// single thread may recurse through `read_P -> check_P -> read_Q`. Rust
    /// tasks don't recurse synchronously across `.await` points the way
    /// Python threads do, so a plain async mutex taken once per top-level
    /// request is sufficient here; nested calls within one logic
    /// implementation simply don't re-enter it.
    access_lock: Mutex<()>,
    callbacks: StdRwLock<Vec<UpdateCallback>>,
    /// Module-wide default coalescing window in seconds, used by
    /// parameters whose `update_unchanged` is `Default` (spec §3
    /// "omit_unchanged_within"). `None` means no coalescing applies unless
    /// a parameter opts in explicitly via `UpdateUnchanged::Within`.
    omit_unchanged_within: Option<f64>,
    pub logic: Arc<dyn ModuleLogic>,
}

impl Module {
    pub fn new(
        name: impl Into<String>,
        class_name: impl Into<String>,
        properties: PropertyBag,
        parameters: IndexMap<String, Parameter>,
        commands: IndexMap<String, Command>,
        logic: Arc<dyn ModuleLogic>,
    ) -> Self {
        let mut cache = BTreeMap::new();
        for (name, param) in &parameters {
            cache.insert(
                name.clone(),
                CacheEntry { value: param.initial_value(), timestamp: 0.0, read_error: None, last_broadcast: f64::NEG_INFINITY },
            );
        }
        Module {
            name: name.into(),
            class_name: class_name.into(),
            properties,
            parameters,
            commands,
            cache: RwLock::new(cache),
            access_lock: Mutex::new(()),
            callbacks: StdRwLock::new(Vec::new()),
            omit_unchanged_within: None,
            logic,
        }
    }

    /// Sets the module-wide `omit_unchanged_within` default (spec §3, §4.4).
    pub fn with_omit_unchanged_within(mut self, seconds: f64) -> Self {
        self.omit_unchanged_within = Some(seconds);
        self
    }

    /// Registers a callback invoked synchronously, inline, every time
    /// `announce_update` decides an update should be broadcast (frappy
    /// `Module.addCallback`). The dispatcher registers exactly one such
    /// callback per module at node startup.
    pub fn add_update_callback(&self, callback: UpdateCallback) {
        self.callbacks.write().unwrap_or_else(|e| e.into_inner()).push(callback);
    }

    /// The coalescing window that applies to one parameter, resolving
    /// `UpdateUnchanged::Default` against the module-wide setting.
    /// `None` means identical values are never suppressed.
    fn unchanged_window(&self, parameter: &str) -> Option<f64> {
        use crate::accessibles::parameter::UpdateUnchanged;
        match self.parameters.get(parameter).map(|p| p.update_unchanged) {
            Some(UpdateUnchanged::Never) => Some(f64::INFINITY),
            Some(UpdateUnchanged::Always) => None,
            Some(UpdateUnchanged::Within(seconds)) => Some(seconds),
            Some(UpdateUnchanged::Default) | None => self.omit_unchanged_within,
        }
    }

    pub async fn cached(&self, parameter: &str) -> Option<CacheEntry> {
        self.cache.read().await.get(parameter).cloned()
    }

    /// `announceUpdate`: stores the new reading and broadcasts it, applying
    /// the error-dedup and unchanged-value coalescing rules (spec §5).
    ///
    /// - An error is only broadcast the first time it occurs (same class
    ///   and same message); repeats just refresh the timestamp silently.
    /// - A value identical to the cached one is suppressed when the
    ///   parameter's coalescing window (`UpdateUnchanged::Never`, a fixed
    ///   `Within` duration, or the module's `omit_unchanged_within`
    ///   default) hasn't elapsed since the last broadcast.
    pub async fn announce_update(&self, parameter: &str, now: f64, outcome: Result<Value>) {
        let mut cache = self.cache.write().await;
        let previous = cache.get(parameter).cloned();
        let (value, read_error) = match outcome {
            Ok(v) => (v, None),
            Err(e) => {
                if let Some(prev) = &previous {
                    if let Some(prev_err) = &prev.read_error {
                        if prev_err.class_name() == e.class_name() && prev_err.message() == e.message() {
                            cache.insert(
                                parameter.to_string(),
                                CacheEntry {
                                    value: prev.value.clone(),
                                    timestamp: now,
                                    read_error: Some(e),
                                    last_broadcast: prev.last_broadcast,
                                },
                            );
                            return;
                        }
                    }
                }
                let prev_value =
                    previous.as_ref().map(|p| p.value.clone()).unwrap_or(Value::None);
                (prev_value, Some(e))
            },
        };

        let value_unchanged = read_error.is_none()
            && previous.as_ref().is_some_and(|p| p.read_error.is_none() && p.value == value);
        let suppress_unchanged = value_unchanged
            && previous.as_ref().is_some_and(|prev| {
                self.unchanged_window(parameter).is_some_and(|window| now - prev.last_broadcast < window)
            });

        let last_broadcast = if suppress_unchanged {
            previous.as_ref().map(|p| p.last_broadcast).unwrap_or(f64::NEG_INFINITY)
        } else {
            now
        };
        let entry = CacheEntry { value, timestamp: now, read_error, last_broadcast };
        cache.insert(parameter.to_string(), entry.clone());
        drop(cache);

        if suppress_unchanged {
            return;
        }
        let callbacks = self.callbacks.read().unwrap_or_else(|e| e.into_inner());
        for callback in callbacks.iter() {
            callback(parameter, &entry);
        }
    }

    /// Top-level `read_P`: takes the access lock, calls into the driver
    /// logic (unless the parameter is `constant`), and always funnels the
    /// result through `announce_update` (frappy `Module.readParameter`).
    pub async fn read(&self, parameter: &str, now: f64) -> Result<Value> {
        let param = self
            .parameters
            .get(parameter)
            .ok_or_else(|| SecopError::NoSuchParameter(parameter.to_string()))?;
        if let Some(constant) = &param.constant {
            return Ok(constant.clone());
        }
        let _guard = self.access_lock.lock().await;
        let outcome = self.logic.read_parameter(parameter).await;
        self.announce_update(parameter, now, outcome.clone()).await;
        outcome
    }

    /// Top-level `write_P`: validates via `Parameter::check` (which runs
    /// the `check_P` limit chain), then calls the driver's `write_P`, then
    /// announces the accepted value (frappy `Module.writeParameter`).
    pub async fn write(&self, parameter: &str, raw: &serde_json::Value, now: f64) -> Result<Value> {
        let param = self
            .parameters
            .get(parameter)
            .ok_or_else(|| SecopError::NoSuchParameter(parameter.to_string()))?;
        if param.readonly {
            return Err(SecopError::ReadOnly(format!("{parameter} is readonly")));
        }
        let validated = param.check(raw)?;
        let _guard = self.access_lock.lock().await;
        let outcome = self.logic.write_parameter(parameter, validated).await;
        self.announce_update(parameter, now, outcome.clone()).await;
        outcome
    }

    pub async fn do_command(&self, command: &str, raw_argument: Option<&serde_json::Value>) -> Result<Option<Value>> {
        let cmd = self
            .commands
            .get(command)
            .ok_or_else(|| SecopError::NoSuchCommand(command.to_string()))?;
        let argument = cmd.validate_argument(raw_argument)?;
        let _guard = self.access_lock.lock().await;
        self.logic.do_command(command, argument).await
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;
    use crate::types::DataType;

    fn bare_module() -> Module {
        let mut params = IndexMap::new();
        params.insert(
            "value".to_string(),
            Parameter::new("value", DataType::float(-10.0, 10.0), "value"),
        );
        Module::new("t", "Test", PropertyBag::default(), params, IndexMap::new(), Arc::new(PassiveLogic))
    }

    #[tokio::test]
    async fn announce_update_dedups_repeated_errors() {
        let m = bare_module();
        let received = Arc::new(std::sync::Mutex::new(Vec::new()));
        let sink = received.clone();
        m.add_update_callback(Arc::new(move |_param, entry| sink.lock().unwrap().push(entry.clone())));
        m.announce_update("value", 1.0, Err(SecopError::HardwareError("timeout".into()))).await;
        m.announce_update("value", 2.0, Err(SecopError::HardwareError("timeout".into()))).await;
        let events = received.lock().unwrap();
        assert_eq!(events.len(), 1, "repeated identical error must not re-broadcast");
        assert!(events[0].read_error.is_some());
    }

    #[tokio::test]
    async fn announce_update_does_not_dedup_distinct_error_messages() {
        let m = bare_module();
        let received = Arc::new(std::sync::Mutex::new(Vec::new()));
        let sink = received.clone();
        m.add_update_callback(Arc::new(move |_param, entry| sink.lock().unwrap().push(entry.clone())));
        m.announce_update("value", 1.0, Err(SecopError::HardwareError("timeout".into()))).await;
        m.announce_update("value", 2.0, Err(SecopError::HardwareError("bus reset".into()))).await;
        let events = received.lock().unwrap();
        assert_eq!(events.len(), 2, "a different error message must still be broadcast");
    }

    #[tokio::test]
    async fn omit_unchanged_within_coalesces_identical_values() {
        let mut params = IndexMap::new();
        params.insert("value".to_string(), Parameter::new("value", DataType::float(-10.0, 10.0), "value"));
        let m = Module::new("t", "Test", PropertyBag::default(), params, IndexMap::new(), Arc::new(PassiveLogic))
            .with_omit_unchanged_within(5.0);
        let received = Arc::new(std::sync::Mutex::new(Vec::new()));
        let sink = received.clone();
        m.add_update_callback(Arc::new(move |_param, entry| sink.lock().unwrap().push(entry.clone())));

        m.announce_update("value", 0.0, Ok(Value::Float(1.0))).await;
        m.announce_update("value", 1.0, Ok(Value::Float(1.0))).await;
        m.announce_update("value", 4.0, Ok(Value::Float(1.0))).await;
        assert_eq!(received.lock().unwrap().len(), 1, "updates within the window must coalesce");

        m.announce_update("value", 6.0, Ok(Value::Float(1.0))).await;
        assert_eq!(received.lock().unwrap().len(), 2, "an update past the window must broadcast again");
    }

    #[tokio::test]
    async fn update_unchanged_always_never_suppresses() {
        use crate::accessibles::parameter::UpdateUnchanged;
        let mut params = IndexMap::new();
        let mut value_param = Parameter::new("value", DataType::float(-10.0, 10.0), "value");
        value_param.update_unchanged = UpdateUnchanged::Always;
        params.insert("value".to_string(), value_param);
        let m = Module::new("t", "Test", PropertyBag::default(), params, IndexMap::new(), Arc::new(PassiveLogic))
            .with_omit_unchanged_within(100.0);
        let received = Arc::new(std::sync::Mutex::new(Vec::new()));
        let sink = received.clone();
        m.add_update_callback(Arc::new(move |_param, entry| sink.lock().unwrap().push(entry.clone())));

        m.announce_update("value", 0.0, Ok(Value::Float(1.0))).await;
        m.announce_update("value", 1.0, Ok(Value::Float(1.0))).await;
        assert_eq!(received.lock().unwrap().len(), 2, "UpdateUnchanged::Always must ignore the module default");
    }

    #[tokio::test]
    async fn write_runs_through_limit_chain() {
        use crate::accessibles::LimitChain;
        let mut params = IndexMap::new();
        params.insert(
            "target".to_string(),
            Parameter::new("target", DataType::float(-100.0, 100.0), "target")
                .writable()
                .with_limits(LimitChain::new(DataType::float(-100.0, 100.0), -5.0, 5.0)),
        );
        let m = Module::new("t", "Test", PropertyBag::default(), params, IndexMap::new(), Arc::new(PassiveLogic));
        assert!(m.write("target", &json!(50.0), 1.0).await.is_err());
        assert_eq!(m.write("target", &json!(2.0), 1.0).await.unwrap(), Value::Float(2.0));
    }

    #[tokio::test]
    async fn readonly_parameter_rejects_write() {
        let m = bare_module();
        assert!(matches!(
            m.write("value", &json!(1.0), 1.0).await,
            Err(SecopError::ReadOnly(_))
        ));
    }
}
