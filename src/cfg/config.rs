// SPDX-License-Identifier: AGPL-3.0-or-later

use std::{collections::BTreeMap, fs, path::Path, time::Duration};

use anyhow::{Context, Result};
use indexmap::IndexMap;
use serde::Deserialize;

use crate::module::builder::ModuleConfig;

/// The full node config file (AMBIENT "Config loading"): a node-level
/// option map plus one [`ModuleConfig`] per configured module, the shape
/// frappy's own config files (`.cfg`/YAML) use — "a flat mapping of module
/// name → option map, plus a node-level option map".
#[derive(Debug, Clone, Deserialize)]
pub struct NodeConfig {
    pub node: NodeOptions,
    pub modules: IndexMap<String, ModuleConfig>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct NodeOptions {
    pub equipment_id: String,
    #[serde(default)]
    pub description: String,
    #[serde(default = "default_firmware")]
    pub firmware: String,
    #[serde(default = "default_bind_addr")]
    pub bind: String,
    /// Default fast-group poll interval in seconds (spec `pollinterval`)
    /// for modules that don't override it.
    #[serde(default = "default_poll_interval")]
    pub poll_interval: f64,
    /// Per-module fast-group poll interval overrides (seconds).
    #[serde(default)]
    pub poll_intervals: BTreeMap<String, f64>,
    /// Default slow-group round-robin interval in seconds (spec
    /// `slowinterval`) for modules that don't override it.
    #[serde(default = "default_slow_interval")]
    pub slow_interval: f64,
    /// Per-module slow-group interval overrides (seconds).
    #[serde(default)]
    pub slow_intervals: BTreeMap<String, f64>,
}

fn default_firmware() -> String {
    env!("CARGO_PKG_VERSION").to_string()
}

fn default_bind_addr() -> String {
    "0.0.0.0:10767".to_string()
}

fn default_poll_interval() -> f64 {
    5.0
}

fn default_slow_interval() -> f64 {
    15.0
}

impl NodeConfig {
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let raw = fs::read_to_string(path)
            .with_context(|| format!("reading node config at {}", path.display()))?;
        let cfg: NodeConfig = serde_yaml::from_str(&raw)
            .with_context(|| format!("parsing node config at {}", path.display()))?;
        Ok(cfg)
    }

    pub fn poll_interval_for(&self, module: &str) -> Duration {
        let secs = self.node.poll_intervals.get(module).copied().unwrap_or(self.node.poll_interval);
        Duration::from_secs_f64(secs.max(0.01))
    }

    pub fn slow_interval_for(&self, module: &str) -> Duration {
        let secs = self.node.slow_intervals.get(module).copied().unwrap_or(self.node.slow_interval);
        Duration::from_secs_f64(secs.max(0.01))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_minimal_node_config() {
        let yaml = r#"
node:
  equipment_id: demo.secop-rs.org
modules:
  t:
    class: Sensor
    description: a test sensor
"#;
        let cfg: NodeConfig = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(cfg.node.equipment_id, "demo.secop-rs.org");
        assert_eq!(cfg.node.bind, "0.0.0.0:10767");
        assert_eq!(cfg.modules.get("t").unwrap().class, "Sensor");
    }

    #[test]
    fn per_module_poll_interval_overrides_default() {
        let yaml = r#"
node:
  equipment_id: x
  poll_interval: 2.0
  poll_intervals:
    slow_module: 30.0
modules: {}
"#;
        let cfg: NodeConfig = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(cfg.poll_interval_for("slow_module"), Duration::from_secs_f64(30.0));
        assert_eq!(cfg.poll_interval_for("other"), Duration::from_secs_f64(2.0));
    }

    #[test]
    fn per_module_slow_interval_overrides_default() {
        let yaml = r#"
node:
  equipment_id: x
  poll_interval: 1.0
  slow_interval: 5.0
  slow_intervals:
    t: 5.0
modules: {}
"#;
        let cfg: NodeConfig = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(cfg.slow_interval_for("t"), Duration::from_secs_f64(5.0));
        assert_eq!(cfg.slow_interval_for("other"), Duration::from_secs_f64(5.0));
    }
}
