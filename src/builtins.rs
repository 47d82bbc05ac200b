//! Built-in module classes a node config can reference directly, grounded in
//! `frappy/modules.py`'s `Readable`/`Writable`/`Drivable` base classes and
//! `frappy_demo/lscsim.py`'s per-poll-tick simulation (`simulate()` nudges
//! state a fixed step towards a target rather than modelling wall-clock
//! time). These are demonstration instruments, not hardware drivers: they
//! let a config file produce a runnable node without a real bus to talk to.

use std::sync::atomic::{AtomicI64, AtomicU64, Ordering};

use async_trait::async_trait;
use indexmap::IndexMap;
use rand::Rng;

use crate::accessibles::{Command, LimitChain, Parameter};
use crate::errors::{Result, SecopError};
use crate::module::ModuleLogic;
use crate::properties::PropertyDef;
use crate::types::{DataType, Value, status};

fn bits(v: f64) -> u64 {
    v.to_bits()
}

fn from_bits(b: u64) -> f64 {
    f64::from_bits(b)
}

/// `Readable`: a single simulated sensor value, drifting along a sine wave
/// driven by an internal step counter rather than the wall clock (frappy
/// `doPoll` -> `read_value`/`read_status`, advanced once per call here).
pub struct SensorLogic {
    center: f64,
    amplitude: f64,
    step: AtomicI64,
}

impl SensorLogic {
    pub fn new(center: f64, amplitude: f64) -> Self {
        SensorLogic { center, amplitude, step: AtomicI64::new(0) }
    }

    /// Standard accessible tables for a `Readable` (spec §3): `value`,
    /// `status`, `pollinterval`.
    pub fn parameters(range: DataType) -> IndexMap<String, Parameter> {
        let mut params = IndexMap::new();
        params.insert("value".to_string(), Parameter::new("value", range, "current value of the module"));
        params.insert(
            "status".to_string(),
            Parameter::new("status", DataType::status_type(), "current status of the module"),
        );
        params.insert(
            "pollinterval".to_string(),
            Parameter::new("pollinterval", DataType::float(0.1, 120.0), "default poll interval")
                .writable(),
        );
        params
    }

    pub fn property_defs() -> Vec<PropertyDef> {
        vec![
            PropertyDef::new("description", DataType::String(Default::default()), serde_json::Value::Null).mandatory(),
            PropertyDef::new("group", DataType::String(Default::default()), serde_json::Value::Null),
            PropertyDef::new("visibility", DataType::String(Default::default()), "user".into()),
        ]
    }
}

#[async_trait]
impl ModuleLogic for SensorLogic {
    async fn read_parameter(&self, name: &str) -> Result<Value> {
        match name {
            "value" => {
                let n = self.step.fetch_add(1, Ordering::Relaxed) as f64;
                let noise = rand::rng().random_range(-0.05..0.05) * self.amplitude;
                Ok(Value::Float(self.center + self.amplitude * (n * 0.1).sin() + noise))
            },
            "status" => Ok(Value::Tuple(vec![Value::Enum(status::IDLE), Value::String(String::new())])),
            "pollinterval" => Ok(Value::Float(5.0)),
            other => Err(SecopError::NoSuchParameter(other.to_string())),
        }
    }
}

/// `Drivable`: a `target` parameter that a simulated actuator approaches at
/// a fixed fractional step each poll, reporting `BUSY` while still moving
/// (`frappy_demo/lscsim.py`'s temperature-control `simulate`: "approach
/// setpoint with a fixed time constant"). Implements `stop` by pulling the
/// target back to the current value, unlike the no-op base in
/// `frappy/modules.py`.
pub struct ActuatorLogic {
    value_bits: AtomicU64,
    target_bits: AtomicU64,
    /// Fraction of the remaining distance covered per poll tick.
    approach_rate: f64,
    settle_tolerance: f64,
}

impl ActuatorLogic {
    pub fn new(initial: f64, approach_rate: f64, settle_tolerance: f64) -> Self {
        ActuatorLogic {
            value_bits: AtomicU64::new(bits(initial)),
            target_bits: AtomicU64::new(bits(initial)),
            approach_rate,
            settle_tolerance,
        }
    }

    /// Standard accessible tables for a `Drivable` (spec §3): `value`,
    /// `status`, `target`, `pollinterval`, plus the `stop` command.
    pub fn parameters(range: DataType, target_limits: Option<LimitChain>) -> IndexMap<String, Parameter> {
        let mut params = SensorLogic::parameters(range.clone());
        let mut target = Parameter::new("target", range, "target value of the module").writable();
        if let Some(limits) = target_limits {
            target = target.with_limits(limits);
        }
        params.insert("target".to_string(), target);
        params
    }

    pub fn commands() -> IndexMap<String, Command> {
        let mut commands = IndexMap::new();
        commands.insert("stop".to_string(), Command::new("stop", "stop approaching the target"));
        commands
    }

    fn busy(&self) -> bool {
        let value = from_bits(self.value_bits.load(Ordering::Relaxed));
        let target = from_bits(self.target_bits.load(Ordering::Relaxed));
        (value - target).abs() > self.settle_tolerance
    }

    fn advance(&self) -> f64 {
        let value = from_bits(self.value_bits.load(Ordering::Relaxed));
        let target = from_bits(self.target_bits.load(Ordering::Relaxed));
        let next = value + (target - value) * self.approach_rate;
        self.value_bits.store(bits(next), Ordering::Relaxed);
        next
    }
}

#[async_trait]
impl ModuleLogic for ActuatorLogic {
    async fn read_parameter(&self, name: &str) -> Result<Value> {
        match name {
            "value" => Ok(Value::Float(self.advance())),
            "status" => {
                let code = if self.busy() { status::BUSY } else { status::IDLE };
                Ok(Value::Tuple(vec![Value::Enum(code), Value::String(String::new())]))
            },
            "target" => Ok(Value::Float(from_bits(self.target_bits.load(Ordering::Relaxed)))),
            "pollinterval" => Ok(Value::Float(1.0)),
            other => Err(SecopError::NoSuchParameter(other.to_string())),
        }
    }

    async fn write_parameter(&self, name: &str, value: Value) -> Result<Value> {
        if name != "target" {
            return Ok(value);
        }
        let target = value.as_f64().ok_or_else(|| SecopError::WrongType("target must be numeric".to_string()))?;
        self.target_bits.store(bits(target), Ordering::Relaxed);
        Ok(Value::Float(target))
    }

    async fn do_command(&self, name: &str, _argument: Option<Value>) -> Result<Option<Value>> {
        if name != "stop" {
            return Err(SecopError::NoSuchCommand(name.to_string()));
        }
        let value = from_bits(self.value_bits.load(Ordering::Relaxed));
        self.target_bits.store(bits(value), Ordering::Relaxed);
        Ok(None)
    }
}
