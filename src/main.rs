// SPDX-License-Identifier: AGPL-3.0-or-later

use std::collections::BTreeMap;
use std::sync::Arc;

use anyhow::{Context, Result, bail};
use indexmap::IndexMap;
use secop_node::builtins::{ActuatorLogic, SensorLogic};
use secop_node::cfg::cli::resolve_config_path;
use secop_node::cfg::config::NodeConfig;
use secop_node::cfg::logger::init_logger;
use secop_node::dispatcher::NodeIdentity;
use secop_node::module::Module;
use secop_node::module::builder::ModuleBlueprint;
use secop_node::node::SecNode;
use secop_node::types::DataType;
use tracing::info;

const DEFAULT_VALUE_RANGE: (f64, f64) = (-300.0, 300.0);

#[tokio::main]
async fn main() -> Result<()> {
    let mut args = std::env::args().skip(1);
    let node_cfg_path = args.next().unwrap_or_else(|| "config/node.yaml".to_string());
    let logger_cfg_path = args.next().unwrap_or_else(|| "config/logger.yaml".to_string());

    let _logger_guard = init_logger(&logger_cfg_path)?;

    let node_cfg_path = resolve_config_path(&node_cfg_path).context("resolving node config path")?;
    let cfg = NodeConfig::load(&node_cfg_path).context("loading node config")?;

    let mut modules = IndexMap::new();
    for (name, module_cfg) in &cfg.modules {
        let module = build_module(name, module_cfg)?;
        modules.insert(name.clone(), Arc::new(module));
    }

    let poll_intervals: BTreeMap<String, std::time::Duration> =
        modules.keys().map(|name| (name.clone(), cfg.poll_interval_for(name))).collect();
    let slow_intervals: BTreeMap<String, std::time::Duration> =
        modules.keys().map(|name| (name.clone(), cfg.slow_interval_for(name))).collect();

    let identity = NodeIdentity {
        equipment_id: cfg.node.equipment_id.clone(),
        description: cfg.node.description.clone(),
        firmware: cfg.node.firmware.clone(),
    };
    let bind_addr = cfg.node.bind.clone();

    let node = Arc::new(SecNode::new(identity, modules, poll_intervals, slow_intervals));
    node.start_modules().await.context("running module startup sequence")?;
    node.spawn_pollers();

    info!(bind = %bind_addr, "starting SECoP node");
    node.serve(&bind_addr).await.context("serving SECoP connections")
}

/// Instantiates one of the built-in demo module classes (spec AMBIENT
/// "Config loading"). Real instrument drivers would register themselves
/// into a lookup table the same way; only `Sensor`/`Drivable` exist here.
fn build_module(name: &str, module_cfg: &secop_node::module::builder::ModuleConfig) -> Result<Module> {
    let (min, max) = DEFAULT_VALUE_RANGE;
    let value_range = DataType::float(min, max);

    match module_cfg.class.as_str() {
        "Sensor" => {
            let blueprint = ModuleBlueprint {
                class_name: "Sensor",
                property_defs: SensorLogic::property_defs(),
                parameters: SensorLogic::parameters(value_range),
                commands: IndexMap::new(),
            };
            let (properties, parameters, commands) = blueprint.build(module_cfg)?;
            let logic = Arc::new(SensorLogic::new(0.0, 1.0));
            Ok(Module::new(name, "Sensor", properties, parameters, commands, logic))
        },
        "Drivable" => {
            let blueprint = ModuleBlueprint {
                class_name: "Drivable",
                property_defs: SensorLogic::property_defs(),
                parameters: ActuatorLogic::parameters(value_range, None),
                commands: ActuatorLogic::commands(),
            };
            let (properties, parameters, commands) = blueprint.build(module_cfg)?;
            let logic = Arc::new(ActuatorLogic::new(0.0, 0.1, 0.01));
            Ok(Module::new(name, "Drivable", properties, parameters, commands, logic))
        },
        other => bail!("unknown module class {other} for module {name}"),
    }
}
