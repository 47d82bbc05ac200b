//! Module startup/shutdown phases, grounded in `frappy/modulebase.py`'s
//! `earlyInit` / `initModule` / `startModule` / `initialReads` /
//! `shutdownModule` sequence.

use std::sync::Arc;

use crate::errors::Result;
use crate::module::Module;

/// Extra lifecycle hooks a driver can implement beyond the read/write/do
/// triad in `ModuleLogic`. Most modules only need the default no-ops.
#[async_trait::async_trait]
pub trait ModuleLifecycle: Send + Sync {
    /// Runs before any module's `init_module`, in registration order
    /// (frappy: "earlyInit must not access other modules").
    async fn early_init(&self) -> Result<()> {
        Ok(())
    }

    /// Runs after every module's `early_init` has completed — this is
    /// where a module may look up sibling modules (frappy `initModule`).
    async fn init_module(&self) -> Result<()> {
        Ok(())
    }

    /// Runs once the poller is about to start; hardware connections are
    /// expected to be live from here on (frappy `startModule`).
    async fn start_module(&self) -> Result<()> {
        Ok(())
    }

    async fn shutdown_module(&self) -> Result<()> {
        Ok(())
    }
}

pub struct NoopLifecycle;

#[async_trait::async_trait]
impl ModuleLifecycle for NoopLifecycle {
    // all defaults
}

/// Writes every writable parameter's config-supplied value through `write_P`
/// once, in declaration order (frappy `writeInitParams`). Parameters left at
/// their datatype default are skipped — only `cfgdict`-supplied values (those
/// with a `default` coming from config rather than from `DataType::default_value`)
/// are pushed to hardware.
pub async fn write_init_params(module: &Arc<Module>, now: f64) -> Result<()> {
    for (name, param) in &module.parameters {
        if param.readonly || param.constant.is_some() {
            continue;
        }
        if let Some(default) = &param.default {
            let raw = param.datatype.export_value(default);
            module.write(name, &raw, now).await?;
        }
    }
    Ok(())
}

/// Performs the one-shot initial reads of every non-constant, non-poll-skip
/// parameter so the cache is populated before the poller's steady-state
/// cadence takes over (frappy `initialReads`).
pub async fn initial_reads(module: &Arc<Module>, now: f64) -> Result<()> {
    for name in module.parameters.keys() {
        // read() no-ops for constants internally; errors are funnelled
        // through announce_update rather than aborting startup.
        let _ = module.read(name, now).await;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use indexmap::IndexMap;

    use super::*;
    use crate::accessibles::Parameter;
    use crate::module::PassiveLogic;
    use crate::properties::PropertyBag;
    use crate::types::{DataType, Value};

    #[tokio::test]
    async fn write_init_params_pushes_configured_defaults_only() {
        let mut params = IndexMap::new();
        let mut configured = Parameter::new("setpoint", DataType::float(-10.0, 10.0), "setpoint").writable();
        configured.default = Some(Value::Float(2.5));
        params.insert("setpoint".to_string(), configured);
        params.insert(
            "unconfigured".to_string(),
            Parameter::new("unconfigured", DataType::float(-10.0, 10.0), "x").writable(),
        );
        let module = Arc::new(Module::new(
            "t",
            "Test",
            PropertyBag::default(),
            params,
            IndexMap::new(),
            Arc::new(PassiveLogic),
        ));
        write_init_params(&module, 1.0).await.unwrap();
        assert_eq!(module.cached("setpoint").await.unwrap().value, Value::Float(2.5));
    }

    #[tokio::test]
    async fn initial_reads_populates_cache_timestamps() {
        let mut params = IndexMap::new();
        params.insert("value".to_string(), Parameter::new("value", DataType::float(-10.0, 10.0), "v"));
        let module = Arc::new(Module::new(
            "t",
            "Test",
            PropertyBag::default(),
            params,
            IndexMap::new(),
            Arc::new(PassiveLogic),
        ));
        initial_reads(&module, 42.0).await.unwrap();
        assert_eq!(module.cached("value").await.unwrap().timestamp, 42.0);
    }
}
