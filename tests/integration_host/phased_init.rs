use std::time::Duration;

use cue_worker::{CapabilityState, ExportFormat, InitPayload, Workspace};
use httpmock::MockServer;
use serde_json::Value;
use tempfile::TempDir;

use super::support::{
    config, connect, engine_wat, init_options, reader_wat, serve, wait_full, ENGINE_PATH,
    READER_PATH,
};

#[tokio::test]
async fn reader_serves_while_engine_loads_then_unify_succeeds() {
    let dir = TempDir::new().unwrap();
    let server = MockServer::start_async().await;
    serve(&server, READER_PATH, reader_wat(), None).await;
    serve(&server, ENGINE_PATH, engine_wat(), Some(Duration::from_millis(1500))).await;

    let (client, mut state) = connect(&config(dir.path()));
    let outcome = client.init(init_options(&server, "v1")).await.expect("init");
    assert_eq!(outcome.capability, CapabilityState::Partial);
    assert!(!outcome.is_full_engine);

    assert_eq!(client.parse("a:1").await.unwrap(), r#"["a:1"]"#);
    let symbols = client.get_symbols("a: 1").await.unwrap();
    assert_eq!(symbols[0].name, "a");

    let mut ws = Workspace::new();
    ws.add_file("a.cue", "a: 1", true).unwrap();
    ws.add_file("b.cue", "b: 2", true).unwrap();
    let err = client.unify_overlay(&ws, vec![]).await.unwrap_err();
    assert!(err.is_not_ready(), "unexpected {err:?}");

    wait_full(&mut state).await;
    let merged: Value = serde_json::from_str(&client.unify_overlay(&ws, vec![]).await.unwrap()).unwrap();
    assert_eq!(merged["a"], 1);
    assert_eq!(merged["b"], 2);
    assert!(client.validate("a: int", "a: 1").await.unwrap());
    assert_eq!(
        client.export("a: 1\nb: 2", ExportFormat::Cue).await.unwrap(),
        "a: 1\nb: 2\n"
    );
}

#[tokio::test]
async fn engine_failure_keeps_reader_alive() {
    let dir = TempDir::new().unwrap();
    let server = MockServer::start_async().await;
    serve(&server, READER_PATH, reader_wat(), None).await;
    let missing = server
        .mock_async(|when, then| {
            when.path(ENGINE_PATH);
            then.status(404);
        })
        .await;

    let (client, state) = connect(&config(dir.path()));
    client.init(init_options(&server, "v1")).await.expect("init");

    while missing.hits_async().await == 0 {
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    assert_eq!(client.format("x:1").await.unwrap(), r#"["x:1"]"#);
    assert_eq!(*state.borrow(), CapabilityState::Partial);
    let err = client.validate("a: int", "a: 1").await.unwrap_err();
    assert!(err.is_not_ready());
}

#[tokio::test]
async fn reader_only_session_never_fetches_engine() {
    let dir = TempDir::new().unwrap();
    let server = MockServer::start_async().await;
    let reader = serve(&server, READER_PATH, reader_wat(), None).await;
    let engine = serve(&server, ENGINE_PATH, engine_wat(), None).await;

    let (client, _) = connect(&config(dir.path()));
    let outcome = client
        .init(InitPayload {
            wasm_path: server.url(READER_PATH),
            version: "v1".into(),
            is_reader: true,
            reader_path: None,
        })
        .await
        .unwrap();
    assert_eq!(outcome.capability, CapabilityState::Partial);
    tokio::time::sleep(Duration::from_millis(100)).await;

    assert_eq!(reader.hits_async().await, 1);
    assert_eq!(engine.hits_async().await, 0);
}

#[tokio::test]
async fn missing_reader_fails_init_with_load_error() {
    let dir = TempDir::new().unwrap();
    let server = MockServer::start_async().await;
    let engine = serve(&server, ENGINE_PATH, engine_wat(), None).await;

    let (client, state) = connect(&config(dir.path()));
    let err = client.init(init_options(&server, "v1")).await.unwrap_err();
    assert_eq!(err.code(), Some("Load.Failed"));
    assert_eq!(*state.borrow(), CapabilityState::None);
    assert_eq!(engine.hits_async().await, 0);

    let err = client.parse("a: 1").await.unwrap_err();
    assert!(err.is_not_ready());
}
