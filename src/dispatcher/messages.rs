//! Wire-facing request/reply shapes built on top of [`crate::codec::Frame`],
//! grounded in `secop/protocol/dispatcher.py`'s request table.

use serde_json::Value as Json;

use crate::codec::Frame;
use crate::errors::SecopError;

/// A specifier of the form `module`, `module:parameter`, or empty (node-wide).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Specifier {
    pub module: Option<String>,
    pub parameter: Option<String>,
}

impl Specifier {
    pub fn parse(raw: Option<&str>) -> Self {
        match raw {
            None => Specifier { module: None, parameter: None },
            Some(s) => match s.split_once(':') {
                Some((m, p)) => Specifier { module: Some(m.to_string()), parameter: Some(p.to_string()) },
                None => Specifier { module: Some(s.to_string()), parameter: None },
            },
        }
    }
}

#[derive(Debug, Clone)]
pub enum Request {
    Identify,
    Describe,
    Activate(Specifier),
    Deactivate(Specifier),
    Read(Specifier),
    Change(Specifier, Json),
    Do(Specifier, Option<Json>),
    Ping(Option<String>),
    Logging(Specifier, String),
}

pub fn parse_request(frame: &Frame) -> Result<Request, SecopError> {
    match frame.action.as_str() {
        "*IDN?" => Ok(Request::Identify),
        "describe" => Ok(Request::Describe),
        "activate" => Ok(Request::Activate(Specifier::parse(frame.specifier.as_deref()))),
        "deactivate" => Ok(Request::Deactivate(Specifier::parse(frame.specifier.as_deref()))),
        "read" => {
            let spec = Specifier::parse(frame.specifier.as_deref());
            if spec.module.is_none() {
                return Err(SecopError::ProtocolError("read needs a module specifier".to_string()));
            }
            Ok(Request::Read(spec))
        },
        "change" => {
            let spec = Specifier::parse(frame.specifier.as_deref());
            let data = frame
                .data
                .clone()
                .ok_or_else(|| SecopError::ProtocolError("change needs a data value".to_string()))?;
            Ok(Request::Change(spec, data))
        },
        "do" => {
            let spec = Specifier::parse(frame.specifier.as_deref());
            Ok(Request::Do(spec, frame.data.clone()))
        },
        "ping" => Ok(Request::Ping(frame.specifier.clone())),
        "logging" => {
            let spec = Specifier::parse(frame.specifier.as_deref());
            let level = frame
                .data
                .as_ref()
                .and_then(Json::as_str)
                .unwrap_or("info")
                .to_string();
            Ok(Request::Logging(spec, level))
        },
        other => Err(SecopError::ProtocolError(format!("unknown action {other}"))),
    }
}

pub fn error_frame(request_action: &str, specifier: Option<&str>, err: &SecopError) -> Frame {
    let mut frame = Frame::new(format!("error_{request_action}"));
    if let Some(spec) = specifier {
        frame = frame.with_specifier(spec.to_string());
    }
    frame.with_data(serde_json::json!([err.class_name(), err.message(), {}]))
}
