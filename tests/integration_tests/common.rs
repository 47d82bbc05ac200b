// SPDX-License-Identifier: AGPL-3.0-or-later

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use indexmap::IndexMap;
use secop_node::builtins::{ActuatorLogic, SensorLogic};
use secop_node::dispatcher::NodeIdentity;
use secop_node::module::Module;
use secop_node::module::builder::{ModuleBlueprint, ModuleConfig};
use secop_node::node::SecNode;
use secop_node::types::DataType;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::TcpStream;
use tokio::net::tcp::OwnedReadHalf;

/// Builds a two-module node (`T` a `Sensor`, `heater` a `Drivable`) bound to
/// an OS-assigned port and starts serving it in the background, so each test
/// gets a fresh in-process node without needing a real instrument attached.
pub async fn spawn_test_node() -> Result<String> {
    let empty_cfg = ModuleConfig { class: "Sensor".to_string(), description: Some("".to_string()), group: None, visibility: None, parameters: IndexMap::new() };

    let sensor_blueprint = ModuleBlueprint {
        class_name: "Sensor",
        property_defs: SensorLogic::property_defs(),
        parameters: SensorLogic::parameters(DataType::float(-300.0, 300.0)),
        commands: IndexMap::new(),
    };
    let (props, params, commands) = sensor_blueprint.build(&empty_cfg)?;
    let sensor = Arc::new(Module::new("T", "Sensor", props, params, commands, Arc::new(SensorLogic::new(20.0, 0.5))));

    let heater_blueprint = ModuleBlueprint {
        class_name: "Drivable",
        property_defs: SensorLogic::property_defs(),
        parameters: ActuatorLogic::parameters(DataType::float(-300.0, 300.0), None),
        commands: ActuatorLogic::commands(),
    };
    let (props, params, commands) = heater_blueprint.build(&empty_cfg)?;
    let heater =
        Arc::new(Module::new("heater", "Drivable", props, params, commands, Arc::new(ActuatorLogic::new(0.0, 0.3, 0.01))));

    let mut modules = IndexMap::new();
    modules.insert("T".to_string(), sensor);
    modules.insert("heater".to_string(), heater);

    let identity =
        NodeIdentity { equipment_id: "test.secop-rs.org".to_string(), description: "".to_string(), firmware: "0.1".to_string() };
    let poll_intervals: BTreeMap<String, Duration> =
        modules.keys().map(|k| (k.clone(), Duration::from_millis(50))).collect();
    let slow_intervals: BTreeMap<String, Duration> =
        modules.keys().map(|k| (k.clone(), Duration::from_millis(200))).collect();

    let node = Arc::new(SecNode::new(identity, modules, poll_intervals, slow_intervals));
    node.start_modules().await.context("starting modules")?;
    node.spawn_pollers();

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.context("binding test listener")?;
    let addr = listener.local_addr()?.to_string();
    drop(listener);

    let bound = node.clone();
    let bind_addr = addr.clone();
    tokio::spawn(async move {
        let _ = bound.serve(&bind_addr).await;
    });
    // give the accept loop a moment to bind before the first client connects.
    tokio::time::sleep(Duration::from_millis(20)).await;
    Ok(addr)
}

pub struct TestClient {
    reader: BufReader<OwnedReadHalf>,
    writer: tokio::net::tcp::OwnedWriteHalf,
}

impl TestClient {
    pub async fn connect(addr: &str) -> Result<Self> {
        let stream = TcpStream::connect(addr).await.context("connecting test client")?;
        let (r, w) = stream.into_split();
        Ok(TestClient { reader: BufReader::new(r), writer: w })
    }

    pub async fn send(&mut self, line: &str) -> Result<()> {
        self.writer.write_all(format!("{line}\n").as_bytes()).await?;
        Ok(())
    }

    pub async fn recv_line(&mut self) -> Result<String> {
        let mut buf = String::new();
        tokio::time::timeout(Duration::from_secs(2), self.reader.read_line(&mut buf))
            .await
            .context("timed out waiting for a reply line")??;
        Ok(buf.trim_end_matches(['\r', '\n']).to_string())
    }
}
