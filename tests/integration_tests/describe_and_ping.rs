// SPDX-License-Identifier: AGPL-3.0-or-later

use super::common::{TestClient, spawn_test_node};

#[tokio::test]
async fn identify_describe_and_ping_round_trip() {
    let addr = spawn_test_node().await.unwrap();
    let mut client = TestClient::connect(&addr).await.unwrap();

    client.send("*IDN?").await.unwrap();
    let idn = client.recv_line().await.unwrap();
    assert!(idn.starts_with("ISSE,SECoP,test.secop-rs.org"));

    client.send("describe").await.unwrap();
    let describing = client.recv_line().await.unwrap();
    assert!(describing.starts_with("describing ."));
    assert!(describing.contains("\"T\""));
    assert!(describing.contains("\"heater\""));

    client.send("ping foo").await.unwrap();
    let pong = client.recv_line().await.unwrap();
    assert!(pong.starts_with("pong foo"));
}
