//! The SECoP line codec (spec §4.7, §6): `<action> SP [<specifier> [SP
//! <json-data>]] LF`.

use serde_json::Value as Json;

use crate::errors::{Result, SecopError};

#[derive(Debug, Clone, PartialEq)]
pub struct Frame {
    pub action: String,
    pub specifier: Option<String>,
    pub data: Option<Json>,
}

impl Frame {
    pub fn new(action: impl Into<String>) -> Self {
        Frame { action: action.into(), specifier: None, data: None }
    }

    pub fn with_specifier(mut self, specifier: impl Into<String>) -> Self {
        self.specifier = Some(specifier.into());
        self
    }

    pub fn with_data(mut self, data: Json) -> Self {
        self.data = Some(data);
        self
    }
}

/// Parses one line (without its trailing `\n`, `\r` already stripped by the
/// transport) into a [`Frame`]. A malformed line is a `ProtocolError`, the
/// only error class the dispatcher does not attribute to a specific module.
pub fn decode_line(line: &str) -> Result<Frame> {
    let line = line.trim_end();
    if line.is_empty() {
        return Err(SecopError::ProtocolError("empty line".to_string()));
    }
    let mut parts = line.splitn(2, ' ');
    let action = parts.next().unwrap_or("").to_string();
    if action.is_empty() {
        return Err(SecopError::ProtocolError("missing action".to_string()));
    }
    let rest = parts.next();
    let (specifier, data) = match rest {
        None => (None, None),
        Some(rest) => match rest.splitn(2, ' ').collect::<Vec<_>>().as_slice() {
            [spec] => (Some((*spec).to_string()), None),
            [spec, json_part] => {
                let data = serde_json::from_str(json_part)
                    .map_err(|e| SecopError::ProtocolError(format!("malformed JSON data: {e}")))?;
                (Some((*spec).to_string()), Some(data))
            },
            [] => (None, None),
        },
    };
    Ok(Frame { action, specifier, data })
}

/// Renders a [`Frame`] back into a wire line, without the trailing LF (the
/// transport owns framing, spec §4.7).
pub fn encode_line(frame: &Frame) -> String {
    let mut out = frame.action.clone();
    if let Some(specifier) = &frame.specifier {
        out.push(' ');
        out.push_str(specifier);
        if let Some(data) = &frame.data {
            out.push(' ');
            out.push_str(&data.to_string());
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn decodes_bare_action() {
        let f = decode_line("ping").unwrap();
        assert_eq!(f, Frame::new("ping"));
    }

    #[test]
    fn decodes_action_and_specifier() {
        let f = decode_line("read mod:param").unwrap();
        assert_eq!(f.action, "read");
        assert_eq!(f.specifier.as_deref(), Some("mod:param"));
        assert!(f.data.is_none());
    }

    #[test]
    fn decodes_action_specifier_and_data() {
        let f = decode_line(r#"change mod:target [23.5, {}]"#).unwrap();
        assert_eq!(f.action, "change");
        assert_eq!(f.specifier.as_deref(), Some("mod:target"));
        assert_eq!(f.data, Some(json!([23.5, {}])));
    }

    #[test]
    fn round_trips_through_encode() {
        let original = r#"change mod:target [23.5,{}]"#;
        let frame = decode_line(original).unwrap();
        let encoded = encode_line(&frame);
        assert_eq!(decode_line(&encoded).unwrap(), frame);
    }

    #[test]
    fn empty_line_is_protocol_error() {
        assert!(matches!(decode_line(""), Err(SecopError::ProtocolError(_))));
    }

    #[test]
    fn malformed_json_is_protocol_error() {
        assert!(matches!(
            decode_line("change mod:target {not json"),
            Err(SecopError::ProtocolError(_))
        ));
    }
}
