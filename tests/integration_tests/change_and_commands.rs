// SPDX-License-Identifier: AGPL-3.0-or-later

use super::common::{TestClient, spawn_test_node};

#[tokio::test]
async fn change_emits_update_before_the_changed_reply() {
    let addr = spawn_test_node().await.unwrap();
    let mut client = TestClient::connect(&addr).await.unwrap();

    client.send("activate heater").await.unwrap();
    loop {
        if client.recv_line().await.unwrap().starts_with("active") {
            break;
        }
    }

    client.send("change heater:target 12.5").await.unwrap();
    // the readback `update` line is enqueued on this same connection's queue
    // before the `changed` reply is (spec: write ordering), so it must be
    // the very next line.
    let first = client.recv_line().await.unwrap();
    assert!(first.starts_with("update heater:target"));
    let second = client.recv_line().await.unwrap();
    assert!(second.starts_with("changed heater:target"));
}

#[tokio::test]
async fn out_of_range_change_is_rejected() {
    let addr = spawn_test_node().await.unwrap();
    let mut client = TestClient::connect(&addr).await.unwrap();

    client.send("change heater:target 999999").await.unwrap();
    let line = client.recv_line().await.unwrap();
    assert!(line.starts_with("error_change"));
}

#[tokio::test]
async fn stop_command_halts_the_simulated_approach() {
    let addr = spawn_test_node().await.unwrap();
    let mut client = TestClient::connect(&addr).await.unwrap();

    client.send("change heater:target 100").await.unwrap();
    client.recv_line().await.unwrap(); // update
    client.recv_line().await.unwrap(); // changed

    client.send("do heater:stop").await.unwrap();
    let line = client.recv_line().await.unwrap();
    assert!(line.starts_with("done heater:stop"));
}

#[tokio::test]
async fn broadcast_update_reaches_every_subscribed_connection() {
    let addr = spawn_test_node().await.unwrap();
    let mut observer = TestClient::connect(&addr).await.unwrap();
    let mut actor = TestClient::connect(&addr).await.unwrap();

    observer.send("activate heater").await.unwrap();
    loop {
        if observer.recv_line().await.unwrap().starts_with("active") {
            break;
        }
    }

    actor.send("change heater:target 7").await.unwrap();
    actor.recv_line().await.unwrap(); // this connection's own update
    actor.recv_line().await.unwrap(); // changed

    let broadcast = observer.recv_line().await.unwrap();
    assert!(broadcast.starts_with("update heater:target"));
}
