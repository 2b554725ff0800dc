use cue_worker::RpcError;
use futures_util::future::join_all;
use httpmock::MockServer;
use tempfile::TempDir;

use super::support::{
    config, connect, engine_wat, init_options, reader_wat, serve, wait_full, ENGINE_PATH,
    READER_PATH,
};

#[tokio::test]
async fn concurrent_calls_each_get_their_own_reply() {
    let dir = TempDir::new().unwrap();
    let server = MockServer::start_async().await;
    serve(&server, READER_PATH, reader_wat(), None).await;
    serve(&server, ENGINE_PATH, engine_wat(), None).await;

    let (client, mut state) = connect(&config(dir.path()));
    client.init(init_options(&server, "v1")).await.unwrap();
    wait_full(&mut state).await;

    let calls = (0..32).map(|i| {
        let client = client.clone();
        async move {
            let code = format!("field{i}: {i}");
            let out = if i % 2 == 0 {
                client.parse(&code).await
            } else {
                client.format(&code).await
            };
            (code, out)
        }
    });
    for (code, out) in join_all(calls).await {
        let echoed: Vec<String> = serde_json::from_str(&out.unwrap()).unwrap();
        assert_eq!(echoed, vec![code]);
    }
    assert_eq!(client.pending_len(), 0);
}

#[tokio::test]
async fn failures_do_not_leak_into_other_calls() {
    let dir = TempDir::new().unwrap();
    let server = MockServer::start_async().await;
    serve(&server, READER_PATH, reader_wat(), None).await;
    serve(&server, ENGINE_PATH, engine_wat(), None).await;

    let (client, _) = connect(&config(dir.path()));
    client.init(init_options(&server, "v1")).await.unwrap();

    // Interleave calls gated on the engine with ones the reader serves.
    let (parsed, unified, formatted) = tokio::join!(
        client.parse("a: 1"),
        client.unify(Default::default(), vec![], vec![]),
        client.format("b: 2"),
    );
    assert_eq!(parsed.unwrap(), r#"["a: 1"]"#);
    assert_eq!(formatted.unwrap(), r#"["b: 2"]"#);
    match unified {
        Ok(merged) => assert!(merged.contains("\"a\"")),
        Err(err) => assert!(matches!(err, RpcError::Remote { .. }) && err.is_not_ready()),
    }
}
