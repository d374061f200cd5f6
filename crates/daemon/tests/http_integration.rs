//! End-to-end: a real `Daemon` bound to a loopback port, driven over HTTP.

use pommel_core::state_store::StateStore;
use pommel_core::{CancellationToken, Config};
use pommel_daemon::Daemon;
use serde_json::{json, Value};
use std::time::Duration;

/// Spawns a daemon with an explicit, pre-allocated port (the common case:
/// an operator or config pins a port).
async fn spawn_daemon(root: &std::path::Path) -> (u16, CancellationToken) {
    let probe = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
    let port = probe.local_addr().unwrap().port();
    drop(probe);

    let mut config = Config::default();
    config.embedding_dimension = Some(8);
    config.port = Some(port);

    let mut daemon = Daemon::new(root.to_path_buf(), config).expect("daemon should initialize");
    let cancel = CancellationToken::new();
    let run_cancel = cancel.clone();
    tokio::spawn(async move {
        let _ = daemon.run(run_cancel).await;
    });

    for _ in 0..50 {
        if reqwest::get(format!("http://127.0.0.1:{port}/health")).await.is_ok() {
            break;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    (port, cancel)
}

#[tokio::test]
async fn health_status_config_and_search_round_trip() {
    let dir = tempfile::tempdir().unwrap();
    std::fs::write(dir.path().join("a.rs"), "fn alpha() {\n    println!(\"hi\");\n}\n").unwrap();
    let (port, cancel) = spawn_daemon(dir.path()).await;
    let base = format!("http://127.0.0.1:{port}");

    let health: Value = reqwest::get(format!("{base}/health")).await.unwrap().json().await.unwrap();
    assert_eq!(health["status"], "healthy");

    let config: Value = reqwest::get(format!("{base}/config")).await.unwrap().json().await.unwrap();
    assert_eq!(config["config"]["rrf_k"], 60);

    // Give startup reconciliation a moment to index the fixture file.
    let mut status: Value = Value::Null;
    for _ in 0..50 {
        status = reqwest::get(format!("{base}/status")).await.unwrap().json().await.unwrap();
        if status["index"]["total_files"].as_u64() == Some(1) {
            break;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    assert_eq!(status["index"]["total_files"], 1);

    let client = reqwest::Client::new();
    let search: Value = client
        .post(format!("{base}/search"))
        .json(&json!({ "query": "alpha" }))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(search["results"][0]["file"], "a.rs");

    let reindex = client.post(format!("{base}/reindex")).send().await.unwrap();
    assert_eq!(reindex.status(), reqwest::StatusCode::ACCEPTED);

    cancel.cancel();
}

#[tokio::test]
async fn os_assigned_port_is_reported_everywhere_after_bind() {
    let dir = tempfile::tempdir().unwrap();

    let mut config = Config::default();
    config.embedding_dimension = Some(8);
    config.port = Some(0);

    let mut daemon = Daemon::new(dir.path().to_path_buf(), config).expect("daemon should initialize");
    let cancel = CancellationToken::new();
    let run_cancel = cancel.clone();
    tokio::spawn(async move {
        let _ = daemon.run(run_cancel).await;
    });

    // Poll the state manifest until the daemon has bound and persisted its
    // real port; 0 would mean the pre-bind placeholder leaked through.
    let store = StateStore::new(dir.path());
    let mut bound_port = 0u16;
    for _ in 0..50 {
        if let Ok(state) = store.load_state() {
            if let Some(info) = state.daemon {
                if info.port != 0 {
                    bound_port = info.port;
                    break;
                }
            }
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    assert_ne!(bound_port, 0, "state manifest never recorded a real bound port");

    let base = format!("http://127.0.0.1:{bound_port}");
    let health: Value = reqwest::get(format!("{base}/health")).await.unwrap().json().await.unwrap();
    assert_eq!(health["port"], bound_port);

    let status: Value = reqwest::get(format!("{base}/status")).await.unwrap().json().await.unwrap();
    assert_eq!(status["daemon"]["running"], true);

    cancel.cancel();
}

#[tokio::test]
async fn search_with_bad_json_is_rejected_with_400() {
    let dir = tempfile::tempdir().unwrap();
    let (port, cancel) = spawn_daemon(dir.path()).await;
    let base = format!("http://127.0.0.1:{port}");

    let client = reqwest::Client::new();
    let resp = client
        .post(format!("{base}/search"))
        .header("content-type", "application/json")
        .body("not json")
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), reqwest::StatusCode::BAD_REQUEST);

    cancel.cancel();
}
