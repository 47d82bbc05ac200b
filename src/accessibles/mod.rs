//! Parameters and commands (spec §3 "Accessibles", §4.3), grounded in
//! `frappy/params.py`'s `Accessible`/`Parameter` pair.

pub mod command;
pub mod limit;
pub mod parameter;

pub use command::Command;
pub use limit::LimitChain;
pub use parameter::Parameter;

/// Shared behaviour of `Parameter` and `Command` (frappy's `Accessible`
/// base class): every accessible has a datatype-bearing export shape and a
/// name it is addressed by on the wire.
pub trait Accessible {
    fn name(&self) -> &str;
    fn export_datatype(&self) -> serde_json::Value;
    fn export_properties(&self) -> serde_json::Map<String, serde_json::Value>;
}
