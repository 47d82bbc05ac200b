// SPDX-License-Identifier: AGPL-3.0-or-later

use super::common::{TestClient, spawn_test_node};

#[tokio::test]
async fn activate_flushes_cached_parameters_then_confirms() {
    let addr = spawn_test_node().await.unwrap();
    let mut client = TestClient::connect(&addr).await.unwrap();

    client.send("activate T").await.unwrap();
    let mut saw_value_update = false;
    let mut saw_status_update = false;
    loop {
        let line = client.recv_line().await.unwrap();
        if line.starts_with("active") {
            break;
        }
        if line.starts_with("update T:value") {
            saw_value_update = true;
        }
        if line.starts_with("update T:status") {
            saw_status_update = true;
        }
    }
    assert!(saw_value_update, "activate must flush the cached value reading");
    assert!(saw_status_update, "activate must flush the cached status reading");
}

#[tokio::test]
async fn explicit_read_returns_an_update_line() {
    let addr = spawn_test_node().await.unwrap();
    let mut client = TestClient::connect(&addr).await.unwrap();

    client.send("read T:value").await.unwrap();
    let line = client.recv_line().await.unwrap();
    assert!(line.starts_with("update T:value"));
}

#[tokio::test]
async fn reading_an_unknown_module_errors() {
    let addr = spawn_test_node().await.unwrap();
    let mut client = TestClient::connect(&addr).await.unwrap();

    client.send("read ghost:value").await.unwrap();
    let line = client.recv_line().await.unwrap();
    assert!(line.starts_with("error_read"));
    assert!(line.contains("NoSuchModule"));
}
