//! The SECoP error taxonomy (spec §7).
//!
//! Every variant maps to exactly one SECoP error class name, used verbatim
//! as the `error_<request>` reply's class string on the wire (dispatcher::messages).

use thiserror::Error;

pub type Result<T> = std::result::Result<T, SecopError>;

/// A single SECoP error class, carrying the human-readable text that goes
/// out over the wire alongside the class name.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum SecopError {
    #[error("{0}")]
    NoSuchModule(String),
    #[error("{0}")]
    NoSuchParameter(String),
    #[error("{0}")]
    NoSuchCommand(String),
    #[error("{0}")]
    ReadOnly(String),
    #[error("{0}")]
    WrongType(String),
    #[error("{0}")]
    RangeError(String),
    #[error("{0}")]
    BadValue(String),
    #[error("{0}")]
    ProtocolError(String),
    #[error("{0}")]
    CommandFailed(String),
    #[error("{0}")]
    CommandRunning(String),
    #[error("{0}")]
    CommunicationFailed(String),
    /// Same as `CommunicationFailed`, but callers should log at debug level
    /// instead of error (spec §4.5: "Silent SECoP errors log at debug level").
    #[error("{0}")]
    CommunicationFailedSilent(String),
    #[error("{0}")]
    IsBusy(String),
    #[error("{0}")]
    IsError(String),
    #[error("{0}")]
    Disabled(String),
    #[error("{0}")]
    HardwareError(String),
    #[error("{0}")]
    ConfigError(String),
    #[error("{0}")]
    Internal(String),
}

impl SecopError {
    /// The SECoP wire class name, e.g. `"RangeError"`, `"NoSuchModule"`.
    pub fn class_name(&self) -> &'static str {
        match self {
            SecopError::NoSuchModule(_) => "NoSuchModule",
            SecopError::NoSuchParameter(_) => "NoSuchParameter",
            SecopError::NoSuchCommand(_) => "NoSuchCommand",
            SecopError::ReadOnly(_) => "ReadOnly",
            SecopError::WrongType(_) => "WrongType",
            SecopError::RangeError(_) => "RangeError",
            SecopError::BadValue(_) => "BadValue",
            SecopError::ProtocolError(_) => "ProtocolError",
            SecopError::CommandFailed(_) => "CommandFailed",
            SecopError::CommandRunning(_) => "CommandRunning",
            SecopError::CommunicationFailed(_) | SecopError::CommunicationFailedSilent(_) => {
                "CommunicationFailed"
            },
            SecopError::IsBusy(_) => "IsBusy",
            SecopError::IsError(_) => "IsError",
            SecopError::Disabled(_) => "Disabled",
            SecopError::HardwareError(_) => "HardwareError",
            // ConfigError is a sub-case of InternalError on the wire (frappy/errors.py).
            SecopError::ConfigError(_) | SecopError::Internal(_) => "InternalError",
        }
    }

    /// True for `CommunicationFailedSilent` — repeated occurrences should not
    /// spam the log (spec §4.5, §7).
    pub fn is_silent(&self) -> bool {
        matches!(self, SecopError::CommunicationFailedSilent(_))
    }

    /// Build an error from a wire `[class, text, extra]` triple, as seen by a
    /// reconnecting client reconstructing a remote module's error (spec §7,
    /// "client side of a proxy"). Unknown classes degrade to `Internal`.
    pub fn from_wire(class: &str, text: &str) -> Self {
        match class {
            "NoSuchModule" => SecopError::NoSuchModule(text.to_string()),
            "NoSuchParameter" => SecopError::NoSuchParameter(text.to_string()),
            "NoSuchCommand" => SecopError::NoSuchCommand(text.to_string()),
            "ReadOnly" => SecopError::ReadOnly(text.to_string()),
            "WrongType" => SecopError::WrongType(text.to_string()),
            "RangeError" => SecopError::RangeError(text.to_string()),
            "BadValue" => SecopError::BadValue(text.to_string()),
            "ProtocolError" => SecopError::ProtocolError(text.to_string()),
            "CommandFailed" => SecopError::CommandFailed(text.to_string()),
            "CommandRunning" => SecopError::CommandRunning(text.to_string()),
            "CommunicationFailed" => SecopError::CommunicationFailed(text.to_string()),
            "IsBusy" => SecopError::IsBusy(text.to_string()),
            "IsError" => SecopError::IsError(text.to_string()),
            "Disabled" => SecopError::Disabled(text.to_string()),
            "HardwareError" => SecopError::HardwareError(text.to_string()),
            _ => SecopError::Internal(text.to_string()),
        }
    }

    pub fn message(&self) -> &str {
        match self {
            SecopError::NoSuchModule(s)
            | SecopError::NoSuchParameter(s)
            | SecopError::NoSuchCommand(s)
            | SecopError::ReadOnly(s)
            | SecopError::WrongType(s)
            | SecopError::RangeError(s)
            | SecopError::BadValue(s)
            | SecopError::ProtocolError(s)
            | SecopError::CommandFailed(s)
            | SecopError::CommandRunning(s)
            | SecopError::CommunicationFailed(s)
            | SecopError::CommunicationFailedSilent(s)
            | SecopError::IsBusy(s)
            | SecopError::IsError(s)
            | SecopError::Disabled(s)
            | SecopError::HardwareError(s)
            | SecopError::ConfigError(s)
            | SecopError::Internal(s) => s,
        }
    }

    /// Any uncaught, non-`SecopError` failure is reported to the wire as
    /// `InternalError` (spec §7: "Dispatcher converts any uncaught exception
    /// into `Internal`").
    pub fn internal(msg: impl Into<String>) -> Self {
        SecopError::Internal(msg.into())
    }
}

impl From<anyhow::Error> for SecopError {
    fn from(e: anyhow::Error) -> Self {
        SecopError::internal(format!("{e:#}"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn class_names_match_wire_taxonomy() {
        assert_eq!(SecopError::RangeError("x".into()).class_name(), "RangeError");
        assert_eq!(
            SecopError::CommunicationFailedSilent("x".into()).class_name(),
            "CommunicationFailed"
        );
        assert_eq!(SecopError::ConfigError("x".into()).class_name(), "InternalError");
    }

    #[test]
    fn from_wire_roundtrips_known_classes() {
        let e = SecopError::from_wire("IsBusy", "still moving");
        assert_eq!(e.class_name(), "IsBusy");
        assert_eq!(e.message(), "still moving");
    }

    #[test]
    fn from_wire_unknown_class_degrades_to_internal() {
        let e = SecopError::from_wire("SomeFutureError", "huh");
        assert_eq!(e.class_name(), "InternalError");
    }
}
