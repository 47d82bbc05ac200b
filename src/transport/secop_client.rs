//! Client-side SECoP handshake: `*IDN?` identity check, `describe`, and
//! `activate` event fan-in (spec §4.8), grounded in
//! `frappy/client/__init__.py`'s `SecopClient.connect()`.
//!
//! This talks to a remote SECoP node over any [`super::LineTransport`] — a
//! node embedding another node's modules over IO, not the server's own
//! client-facing listener.

use std::sync::Arc;

use serde_json::Value as Json;

use super::LineTransport;
use crate::codec::decode_line;
use crate::errors::{Result, SecopError};

/// Checks the reply to `*IDN?` against the identity prefix every SECoP node
/// publishes, equivalent to the `^[^,]*?ISSE[^,]*,SECoP,` pattern: the first
/// comma-separated field must contain `ISSE`, and the second must be
/// `SECoP` exactly.
fn identity_fields(line: &str) -> Option<(&str, &str)> {
    let mut parts = line.splitn(3, ',');
    match (parts.next(), parts.next()) {
        (Some(first), Some(second)) => Some((first, second)),
        _ => None,
    }
}

/// `Ok(true)` for a fully conforming `ISSE,SECoP,...` identifier, `Ok(false)`
/// for a legacy identifier that still names the SECoP protocol (warn but
/// proceed), `Err` for anything that isn't SECoP at all.
fn check_identity(line: &str) -> Result<bool> {
    match identity_fields(line) {
        Some((first, "SECoP")) if first.contains("ISSE") => Ok(line.starts_with("ISSE,SECoP,")),
        _ => Err(SecopError::ProtocolError(format!("not a SECoP identifier: {line}"))),
    }
}

/// Parsed `describe` reply, kept verbatim since callers generally just need
/// to forward or inspect it rather than re-derive module structure.
#[derive(Debug, Clone)]
pub struct DescriptiveData {
    pub equipment_id: String,
    pub raw: Json,
}

impl DescriptiveData {
    fn from_json(data: Json) -> Self {
        let equipment_id = data.get("equipment_id").and_then(Json::as_str).unwrap_or_default().to_string();
        DescriptiveData { equipment_id, raw: data }
    }
}

/// A value or error update pushed by the remote node once events are
/// activated.
#[derive(Debug, Clone)]
pub enum ClientEvent {
    Update { module: String, parameter: String, value: Json, timestamp: Option<f64> },
    ErrorUpdate { module: String, parameter: String, error: SecopError, timestamp: Option<f64> },
}

fn split_specifier(specifier: &str) -> (String, String) {
    match specifier.split_once(':') {
        Some((m, p)) => (m.to_string(), p.to_string()),
        None => (specifier.to_string(), "value".to_string()),
    }
}

fn timestamp_of(extra: &Json) -> Option<f64> {
    extra.get("t").and_then(Json::as_f64)
}

/// `update` data is `[value, {t}]`; `error_update` data is
/// `[class_name, message, {t}]` (see `encode_update_line`).
fn parse_event(action: &str, specifier: &str, data: Json) -> Result<ClientEvent> {
    let (module, parameter) = split_specifier(specifier);
    let items = match data {
        Json::Array(items) => items,
        other => return Err(SecopError::ProtocolError(format!("expected array data, got {other}"))),
    };
    match action {
        "update" => {
            let [value, extra]: [Json; 2] = items
                .try_into()
                .map_err(|_| SecopError::ProtocolError("expected a 2-element update payload".to_string()))?;
            Ok(ClientEvent::Update { module, parameter, value, timestamp: timestamp_of(&extra) })
        },
        "error_update" => {
            let [class, message, extra]: [Json; 3] = items
                .try_into()
                .map_err(|_| SecopError::ProtocolError("expected a 3-element error_update payload".to_string()))?;
            let class = class.as_str().unwrap_or("InternalError");
            let message = message.as_str().unwrap_or("");
            Ok(ClientEvent::ErrorUpdate {
                module,
                parameter,
                error: SecopError::from_wire(class, message),
                timestamp: timestamp_of(&extra),
            })
        },
        other => Err(SecopError::ProtocolError(format!("unexpected event action {other}"))),
    }
}

/// Drives the client-side half of the SECoP handshake over a transport that
/// already speaks lines (TCP, serial, or a reconnecting wrapper around
/// either).
pub struct SecopClientConnection {
    transport: Arc<dyn LineTransport>,
}

impl SecopClientConnection {
    pub fn new(transport: Arc<dyn LineTransport>) -> Self {
        SecopClientConnection { transport }
    }

    /// Sends `*IDN?`, validates the reply, then sends `describe` and
    /// returns the parsed descriptive data. Per spec, a legacy-but-SECoP
    /// identifier is logged as a warning, not treated as a failure.
    pub async fn handshake(&self) -> Result<DescriptiveData> {
        self.transport.write_line("*IDN?").await?;
        let idn = self.transport.read_line().await?;
        if !check_identity(&idn)? {
            tracing::warn!(identity = %idn, "remote node uses a legacy SECoP identifier");
        }

        self.transport.write_line("describe").await?;
        let line = self.transport.read_line().await?;
        let frame = decode_line(&line)?;
        if frame.action != "describing" {
            return Err(SecopError::ProtocolError(format!("expected describing reply, got {}", frame.action)));
        }
        let data = frame.data.ok_or_else(|| SecopError::ProtocolError("describing reply carried no data".to_string()))?;
        Ok(DescriptiveData::from_json(data))
    }

    /// Sends `activate` and feeds every `update`/`error_update` line the
    /// remote node pushes to `on_event` until the terminating `active`
    /// reply arrives, mirroring frappy's event fan-in on activation.
    pub async fn activate(&self, mut on_event: impl FnMut(ClientEvent)) -> Result<()> {
        self.transport.write_line("activate").await?;
        loop {
            let line = self.transport.read_line().await?;
            let frame = decode_line(&line)?;
            match frame.action.as_str() {
                "active" => return Ok(()),
                "update" | "error_update" => {
                    let specifier = frame.specifier.unwrap_or_default();
                    let data = frame.data.unwrap_or(Json::Null);
                    on_event(parse_event(&frame.action, &specifier, data)?);
                },
                other if other.starts_with("error_") => {
                    let (class, message) = frame
                        .data
                        .as_ref()
                        .and_then(Json::as_array)
                        .map(|items| {
                            (
                                items.first().and_then(Json::as_str).unwrap_or("InternalError").to_string(),
                                items.get(1).and_then(Json::as_str).unwrap_or("").to_string(),
                            )
                        })
                        .unwrap_or_else(|| ("InternalError".to_string(), format!("activate failed: {other}")));
                    return Err(SecopError::from_wire(&class, &message));
                },
                _ => {},
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use async_trait::async_trait;

    use super::*;

    struct ScriptedTransport {
        replies: Mutex<std::collections::VecDeque<String>>,
        sent: Mutex<Vec<String>>,
    }

    impl ScriptedTransport {
        fn new(replies: &[&str]) -> Self {
            ScriptedTransport {
                replies: Mutex::new(replies.iter().map(|s| s.to_string()).collect()),
                sent: Mutex::new(Vec::new()),
            }
        }
    }

    #[async_trait]
    impl LineTransport for ScriptedTransport {
        async fn write_line(&self, line: &str) -> Result<()> {
            self.sent.lock().unwrap_or_else(|e| e.into_inner()).push(line.to_string());
            Ok(())
        }

        async fn read_line(&self) -> Result<String> {
            self.replies
                .lock()
                .unwrap_or_else(|e| e.into_inner())
                .pop_front()
                .ok_or_else(|| SecopError::CommunicationFailed("no more scripted replies".to_string()))
        }

        async fn disconnect(&self) {}
    }

    #[test]
    fn accepts_conforming_identity() {
        assert!(check_identity("ISSE,SECoP,my.node,V2024").unwrap());
    }

    #[test]
    fn accepts_legacy_identity_with_warning() {
        assert!(!check_identity("legacy_ISSE,SECoP,my.node,V2024").unwrap());
    }

    #[test]
    fn rejects_non_secop_identity() {
        assert!(check_identity("garbage").is_err());
    }

    #[tokio::test]
    async fn handshake_parses_equipment_id_from_describe() {
        let transport = Arc::new(ScriptedTransport::new(&[
            "ISSE,SECoP,demo.example,V2024",
            r#"describing . {"equipment_id":"demo.example","modules":{}}"#,
        ]));
        let conn = SecopClientConnection::new(transport);
        let data = conn.handshake().await.unwrap();
        assert_eq!(data.equipment_id, "demo.example");
    }

    #[tokio::test]
    async fn activate_fans_in_updates_before_active() {
        let transport = Arc::new(ScriptedTransport::new(&[
            r#"update mod:value [23.5,{"t":1.0}]"#,
            r#"error_update mod:value ["HardwareError","bus reset",{"t":2.0}]"#,
            "active",
        ]));
        let conn = SecopClientConnection::new(transport);
        let mut events = Vec::new();
        conn.activate(|e| events.push(e)).await.unwrap();
        assert_eq!(events.len(), 2);
        assert!(matches!(&events[0], ClientEvent::Update { value, .. } if *value == serde_json::json!(23.5)));
        assert!(matches!(&events[1], ClientEvent::ErrorUpdate { error, .. } if error.message() == "bus reset"));
    }

    #[tokio::test]
    async fn activate_surfaces_error_reply() {
        let transport =
            Arc::new(ScriptedTransport::new(&[r#"error_activate . ["CommandFailed","not ready",{}]"#]));
        let conn = SecopClientConnection::new(transport);
        let err = conn.activate(|_| {}).await.unwrap_err();
        assert_eq!(err.class_name(), "CommandFailed");
    }
}
