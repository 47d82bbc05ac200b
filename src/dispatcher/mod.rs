//! The dispatcher / protocol state machine (spec §3, §4.6, §5, §6),
//! grounded in `secop/protocol/dispatcher.py`'s `Dispatcher` class.

pub mod messages;

use std::collections::BTreeSet;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use dashmap::DashMap;
use indexmap::IndexMap;
use serde_json::{Value as Json, json};
use tokio::sync::mpsc;

use crate::accessibles::Accessible;
use crate::codec::{Frame, encode_line};
use crate::errors::{Result, SecopError};
use crate::module::{CacheEntry, Module};
use messages::{Request, Specifier, error_frame, parse_request};

/// Default bounded depth of a connection's outgoing line queue (spec §5).
pub const DEFAULT_QUEUE_DEPTH: usize = 30;

struct Subscription {
    tx: mpsc::Sender<String>,
    /// Subscribed to every update from every module (frappy
    /// `active_connections`).
    active: bool,
    modules: BTreeSet<String>,
    params: BTreeSet<(String, String)>,
}

impl Subscription {
    fn covers(&self, module: &str, parameter: &str) -> bool {
        self.active
            || self.modules.contains(module)
            || self.params.contains(&(module.to_string(), parameter.to_string()))
    }
}

/// Node-wide identity fields exported by `*IDN?`/`describe` (spec §6).
pub struct NodeIdentity {
    pub equipment_id: String,
    pub description: String,
    pub firmware: String,
}

pub struct Dispatcher {
    pub identity: NodeIdentity,
    modules: IndexMap<String, Arc<Module>>,
    connections: DashMap<u64, Subscription>,
    next_conn_id: AtomicU64,
    /// Held only while a single request is being handled, never across
    /// `.await` points that do I/O or broadcast (spec §5: "dispatcher-wide
    /// reentrant lock held only during request handling").
    request_lock: tokio::sync::Mutex<()>,
}

impl Dispatcher {
    pub fn new(identity: NodeIdentity, modules: IndexMap<String, Arc<Module>>) -> Arc<Self> {
        let dispatcher = Arc::new(Dispatcher {
            identity,
            modules,
            connections: DashMap::new(),
            next_conn_id: AtomicU64::new(1),
            request_lock: tokio::sync::Mutex::new(()),
        });
        for (name, module) in &dispatcher.modules {
            let dispatcher_ref = Arc::downgrade(&dispatcher);
            let module_name = name.clone();
            module.add_update_callback(Arc::new(move |parameter, entry| {
                if let Some(dispatcher) = dispatcher_ref.upgrade() {
                    dispatcher.broadcast_update(&module_name, parameter, entry);
                }
            }));
        }
        dispatcher
    }

    pub fn register_connection(&self, tx: mpsc::Sender<String>) -> u64 {
        let id = self.next_conn_id.fetch_add(1, Ordering::Relaxed);
        self.connections.insert(id, Subscription { tx, active: false, modules: BTreeSet::new(), params: BTreeSet::new() });
        id
    }

    pub fn unregister_connection(&self, id: u64) {
        self.connections.remove(&id);
    }

    /// Pushes `update`/`error_update` lines to every listener whose
    /// subscription covers `module:parameter` (spec §4.6 broadcast policy).
    /// Best-effort: a full per-connection queue drops the update rather
    /// than blocking the broadcaster (spec §5 bounded queues).
    pub fn broadcast_update(&self, module: &str, parameter: &str, entry: &CacheEntry) {
        let line = encode_update_line(module, parameter, entry);
        for conn in self.connections.iter() {
            if conn.covers(module, parameter) {
                let _ = conn.tx.try_send(line.clone());
            }
        }
    }

    fn identify_line(&self) -> String {
        format!("ISSE,SECoP,{},V2024", self.identity.equipment_id)
    }

    fn describe_json(&self) -> Json {
        let mut modules_json = serde_json::Map::new();
        for (name, module) in &self.modules {
            let mut accessibles = serde_json::Map::new();
            for (pname, param) in &module.parameters {
                if !param.export {
                    continue;
                }
                accessibles.insert(pname.clone(), Json::Object(param.export_properties()));
            }
            for (cname, cmd) in &module.commands {
                accessibles.insert(cname.clone(), Json::Object(cmd.export_properties()));
            }
            let mut mod_entry = serde_json::Map::new();
            mod_entry.insert("accessibles".to_string(), Json::Object(accessibles));
            mod_entry.insert(
                "properties".to_string(),
                Json::Object(module.properties.exported().map(|(k, v)| (k.to_string(), v.clone())).collect()),
            );
            modules_json.insert(name.clone(), Json::Object(mod_entry));
        }
        json!({
            "equipment_id": self.identity.equipment_id,
            "description": self.identity.description,
            "firmware": self.identity.firmware,
            "modules": modules_json,
        })
    }

    fn resolve(&self, spec: &Specifier) -> Result<(&Arc<Module>, String)> {
        let module_name = spec
            .module
            .as_deref()
            .ok_or_else(|| SecopError::ProtocolError("missing module specifier".to_string()))?;
        let module = self
            .modules
            .get(module_name)
            .ok_or_else(|| SecopError::NoSuchModule(module_name.to_string()))?;
        Ok((module, module_name.to_string()))
    }

    /// Handles one decoded request, returning the reply line(s) to send back
    /// to the originating connection, in order (spec §5: "replies are FIFO").
    pub async fn handle_line(&self, conn_id: u64, line: &str, now: f64) -> Vec<String> {
        let frame = match crate::codec::decode_line(line) {
            Ok(f) => f,
            Err(e) => return vec![encode_line(&error_frame("", None, &e))],
        };
        let request = match parse_request(&frame) {
            Ok(r) => r,
            Err(e) => return vec![encode_line(&error_frame(&frame.action, frame.specifier.as_deref(), &e))],
        };
        let _guard = self.request_lock.lock().await;
        match self.handle_request(conn_id, &frame.action, request, now).await {
            Ok(lines) => lines,
            Err(e) => vec![encode_line(&error_frame(&frame.action, frame.specifier.as_deref(), &e))],
        }
    }

    async fn handle_request(&self, conn_id: u64, action: &str, request: Request, now: f64) -> Result<Vec<String>> {
        match request {
            Request::Identify => Ok(vec![self.identify_line()]),
            Request::Describe => {
                Ok(vec![encode_line(&Frame::new("describing").with_specifier(".").with_data(self.describe_json()))])
            },
            Request::Activate(spec) => self.activate(conn_id, spec, now).await,
            Request::Deactivate(spec) => self.deactivate(conn_id, spec),
            Request::Read(spec) => self.do_read(spec, now).await,
            Request::Change(spec, data) => self.do_change(spec, data, now).await,
            Request::Do(spec, data) => self.do_command(spec, data).await,
            Request::Ping(nonce) => Ok(vec![encode_line(
                &Frame::new("pong")
                    .with_specifier(nonce.unwrap_or_default())
                    .with_data(json!([Json::Null, {"t": now}])),
            )]),
            Request::Logging(spec, level) => {
                let spec_text = spec.module.clone().unwrap_or_default();
                Ok(vec![encode_line(
                    &Frame::new("logging").with_specifier(spec_text).with_data(json!([level, {}])),
                )])
            },
            _ => Err(SecopError::ProtocolError(format!("unhandled request for action {action}"))),
        }
    }

    async fn activate(&self, conn_id: u64, spec: Specifier, now: f64) -> Result<Vec<String>> {
        let mut lines = Vec::new();
        let targets: Vec<(&String, &Arc<Module>)> = match &spec.module {
            Some(name) => {
                let module = self.modules.get(name).ok_or_else(|| SecopError::NoSuchModule(name.clone()))?;
                vec![(name, module)]
            },
            None => self.modules.iter().collect(),
        };
        for (mod_name, module) in &targets {
            for (pname, param) in &module.parameters {
                if !param.export {
                    continue;
                }
                let entry = module.cached(pname).await.unwrap_or(CacheEntry {
                    value: param.initial_value(),
                    timestamp: now,
                    read_error: None,
                });
                lines.push(encode_update_line(mod_name, pname, &entry));
            }
        }
        if let Some(mut conn) = self.connections.get_mut(&conn_id) {
            match &spec.module {
                None => conn.active = true,
                Some(name) => {
                    conn.modules.insert(name.clone());
                },
            }
        }
        let spec_text = spec.module.clone().unwrap_or_default();
        lines.push(encode_line(&Frame::new("active").with_specifier(spec_text)));
        Ok(lines)
    }

    fn deactivate(&self, conn_id: u64, spec: Specifier) -> Result<Vec<String>> {
        if let Some(mut conn) = self.connections.get_mut(&conn_id) {
            match &spec.module {
                None => {
                    conn.active = false;
                    conn.modules.clear();
                    conn.params.clear();
                },
                Some(name) => {
                    conn.modules.remove(name);
                },
            }
        }
        let spec_text = spec.module.clone().unwrap_or_default();
        Ok(vec![encode_line(&Frame::new("inactive").with_specifier(spec_text))])
    }

    async fn do_read(&self, spec: Specifier, now: f64) -> Result<Vec<String>> {
        let (module, module_name) = self.resolve(&spec)?;
        let parameter = spec.parameter.unwrap_or_else(|| "value".to_string());
        let value = module.read(&parameter, now).await?;
        let entry = CacheEntry { value, timestamp: now, read_error: None };
        Ok(vec![encode_update_line(&module_name, &parameter, &entry)])
    }

    async fn do_change(&self, spec: Specifier, data: Json, now: f64) -> Result<Vec<String>> {
        let (module, module_name) = self.resolve(&spec)?;
        let parameter = spec.parameter.unwrap_or_else(|| "target".to_string());
        let value = module.write(&parameter, &data, now).await?;
        let entry = CacheEntry { value, timestamp: now, read_error: None };
        // The "update" broadcast already went out synchronously from inside
        // `module.write` (via the registered callback); the "changed" reply
        // below is only pushed after that call returns, so it is always
        // ordered after it on this connection's queue (spec §5).
        Ok(vec![encode_line(
            &Frame::new("changed")
                .with_specifier(format!("{module_name}:{parameter}"))
                .with_data(json!([entry.value.to_json(), {"t": now}])),
        )])
    }

    async fn do_command(&self, spec: Specifier, data: Option<Json>) -> Result<Vec<String>> {
        let module_name = spec
            .module
            .clone()
            .ok_or_else(|| SecopError::ProtocolError("missing module specifier".to_string()))?;
        let module = self.modules.get(&module_name).ok_or_else(|| SecopError::NoSuchModule(module_name.clone()))?;
        let command = spec
            .parameter
            .clone()
            .ok_or_else(|| SecopError::ProtocolError("do needs module:command".to_string()))?;
        let result = module.do_command(&command, data.as_ref()).await?;
        let result_json = result.map(|v| v.to_json()).unwrap_or(Json::Null);
        Ok(vec![encode_line(
            &Frame::new("done")
                .with_specifier(format!("{module_name}:{command}"))
                .with_data(json!([result_json, {}])),
        )])
    }
}

fn encode_update_line(module: &str, parameter: &str, entry: &CacheEntry) -> String {
    let specifier = format!("{module}:{parameter}");
    match &entry.read_error {
        None => encode_line(
            &Frame::new("update").with_specifier(specifier).with_data(json!([entry.value.to_json(), {"t": entry.timestamp}])),
        ),
        Some(e) => encode_line(
            &Frame::new("error_update")
                .with_specifier(specifier)
                .with_data(json!([e.class_name(), e.message(), {"t": entry.timestamp}])),
        ),
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::accessibles::Parameter;
    use crate::module::PassiveLogic;
    use crate::properties::PropertyBag;
    use crate::types::DataType;

    fn sample_dispatcher() -> Arc<Dispatcher> {
        let mut params = IndexMap::new();
        params.insert("value".to_string(), Parameter::new("value", DataType::float(-10.0, 10.0), "value"));
        params.insert(
            "target".to_string(),
            Parameter::new("target", DataType::float(-10.0, 10.0), "target").writable(),
        );
        let module = Arc::new(Module::new(
            "m1",
            "Test",
            PropertyBag::default(),
            params,
            IndexMap::new(),
            Arc::new(PassiveLogic),
        ));
        let mut modules = IndexMap::new();
        modules.insert("m1".to_string(), module);
        Dispatcher::new(
            NodeIdentity { equipment_id: "test-node".to_string(), description: "".to_string(), firmware: "0.1".to_string() },
            modules,
        )
    }

    #[tokio::test]
    async fn ping_echoes_nonce() {
        let d = sample_dispatcher();
        let (tx, _rx) = mpsc::channel(DEFAULT_QUEUE_DEPTH);
        let conn = d.register_connection(tx);
        let lines = d.handle_line(conn, "ping abc", 1.0).await;
        assert_eq!(lines.len(), 1);
        assert!(lines[0].starts_with("pong abc"));
    }

    #[tokio::test]
    async fn unknown_module_read_errors() {
        let d = sample_dispatcher();
        let (tx, _rx) = mpsc::channel(DEFAULT_QUEUE_DEPTH);
        let conn = d.register_connection(tx);
        let lines = d.handle_line(conn, "read ghost:value", 1.0).await;
        assert_eq!(lines.len(), 1);
        assert!(lines[0].starts_with("error_read"));
        assert!(lines[0].contains("NoSuchModule"));
    }

    #[tokio::test]
    async fn change_emits_update_before_changed_on_same_connection() {
        let d = sample_dispatcher();
        let (tx, mut rx) = mpsc::channel(DEFAULT_QUEUE_DEPTH);
        let conn = d.register_connection(tx);
        d.handle_line(conn, "activate m1", 1.0).await;
        // drain the activation-time flush (two parameters + the "active" reply).
        while rx.try_recv().is_ok() {}
        let replies = d.handle_line(conn, "change m1:target 3", 2.0).await;
        assert_eq!(replies.len(), 1);
        assert!(replies[0].starts_with("changed m1:target"));
        let broadcast_line = rx.try_recv().expect("update must have been enqueued");
        assert!(broadcast_line.starts_with("update m1:target"));
    }

    #[tokio::test]
    async fn activate_flushes_every_exported_parameter_before_active_reply() {
        let d = sample_dispatcher();
        let (tx, _rx) = mpsc::channel(DEFAULT_QUEUE_DEPTH);
        let conn = d.register_connection(tx);
        let lines = d.handle_line(conn, "activate m1", 1.0).await;
        assert_eq!(lines.len(), 3, "two parameters plus the active reply");
        assert!(lines.last().unwrap().starts_with("active"));
    }

    #[tokio::test]
    async fn describe_lists_module_and_parameters() {
        let d = sample_dispatcher();
        let (tx, _rx) = mpsc::channel(DEFAULT_QUEUE_DEPTH);
        let conn = d.register_connection(tx);
        let lines = d.handle_line(conn, "describe", 1.0).await;
        assert_eq!(lines.len(), 1);
        assert!(lines[0].starts_with("describing ."));
        assert!(lines[0].contains("\"m1\""));
        assert!(lines[0].contains("\"target\""));
    }
}
