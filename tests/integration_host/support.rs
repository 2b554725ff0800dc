use std::{path::Path, time::Duration};

use cue_worker::{CapabilityState, Host, HostConfig, InitPayload, RpcClient};
use httpmock::{Method::GET, Mock, MockServer};
use tokio::sync::watch;

pub const READER_PATH: &str = "/bin/cue.reader.wasm";
pub const ENGINE_PATH: &str = "/bin/cue.wasm";

/// What an action export hands back.
pub enum Reply {
    /// A fixed `{"ok": ..}` / `{"err": ..}` document.
    Canned(&'static str),
    /// `{"ok": <arguments array>}`.
    Echo,
}

/// WAT text for a guest that registers itself and serves `exports`.
pub fn guest(exports: &[(&str, Reply)]) -> String {
    let mut data = String::new();
    let mut funcs = String::new();
    let mut offset = 1024usize;
    for (name, reply) in exports {
        match reply {
            Reply::Canned(body) => {
                let escaped = body.replace('\\', "\\\\").replace('"', "\\\"");
                data.push_str(&format!("  (data (i32.const {offset}) \"{escaped}\")\n"));
                funcs.push_str(&format!(
                    "  (func (export \"{name}\") (param i32 i32) (result i64)\n    \
                     (i64.or (i64.shl (i64.const {offset}) (i64.const 32)) (i64.const {len})))\n",
                    len = body.len()
                ));
                offset += body.len() + 16;
            }
            Reply::Echo => funcs.push_str(&format!(
                "  (func (export \"{name}\") (param i32 i32) (result i64)\n    \
                 (call $echo (local.get 0) (local.get 1)))\n"
            )),
        }
    }
    format!(
        r#"(module
  (import "cue_host" "register" (func $register))
  (import "cue_host" "log" (func $log (param i32 i32 i32)))
  (memory (export "memory") 4)
  (global $next (mut i32) (i32.const 16384))
  (func $alloc (export "cue_alloc") (param $len i32) (result i32)
    (local $ptr i32)
    (local.set $ptr (global.get $next))
    (global.set $next (i32.add (global.get $next) (local.get $len)))
    (local.get $ptr))
  (func $echo (param $ptr i32) (param $len i32) (result i64)
    (local $out i32)
    (local.set $out (call $alloc (i32.add (local.get $len) (i32.const 7))))
    (memory.copy (local.get $out) (i32.const 600) (i32.const 6))
    (memory.copy (i32.add (local.get $out) (i32.const 6)) (local.get $ptr) (local.get $len))
    (i32.store8
      (i32.add (i32.add (local.get $out) (i32.const 6)) (local.get $len))
      (i32.const 125))
    (i64.or
      (i64.shl (i64.extend_i32_u (local.get $out)) (i64.const 32))
      (i64.extend_i32_u (i32.add (local.get $len) (i32.const 7)))))
  (func (export "_initialize")
    (call $log (i32.const 2) (i32.const 512) (i32.const 5))
    (call $register))
  (data (i32.const 512) "ready")
  (data (i32.const 600) "{{\"ok\":")
{data}{funcs})"#
    )
}

const SYMBOLS: &str =
    r#"{"ok":"[{\"name\":\"a\",\"type\":\"field\",\"line\":1,\"column\":1}]"}"#;

pub fn reader_wat() -> String {
    guest(&[
        ("cue_parse", Reply::Echo),
        ("cue_format", Reply::Echo),
        ("cue_get_symbols", Reply::Canned(SYMBOLS)),
        (
            "cue_unify",
            Reply::Canned(r#"{"err":"{\"message\":\"Evaluation (Unify) requires the Full Engine\"}"}"#),
        ),
    ])
}

pub fn engine_wat() -> String {
    guest(&[
        ("cue_parse", Reply::Echo),
        ("cue_format", Reply::Echo),
        ("cue_get_symbols", Reply::Canned(SYMBOLS)),
        ("cue_unify", Reply::Canned(r#"{"ok":"{\"a\":1,\"b\":2}"}"#)),
        ("cue_validate", Reply::Canned(r#"{"ok":true}"#)),
        ("cue_export", Reply::Canned(r#"{"ok":"a: 1\nb: 2\n"}"#)),
    ])
}

pub async fn serve<'a>(
    server: &'a MockServer,
    path: &str,
    body: String,
    delay: Option<Duration>,
) -> Mock<'a> {
    let path = path.to_string();
    server
        .mock_async(move |when, then| {
            when.method(GET).path(path);
            let then = then.status(200).body(body);
            if let Some(delay) = delay {
                then.delay(delay);
            }
        })
        .await
}

pub fn config(data_dir: &Path) -> HostConfig {
    HostConfig {
        data_dir: data_dir.to_path_buf(),
        cache_disabled: false,
        ..HostConfig::default()
    }
}

pub fn connect(config: &HostConfig) -> (RpcClient, watch::Receiver<CapabilityState>) {
    let host = Host::spawn_with_config(config).expect("host");
    let state = host.state.clone();
    (RpcClient::new(host.requests, host.replies), state)
}

pub fn init_options(server: &MockServer, version: &str) -> InitPayload {
    InitPayload {
        wasm_path: server.url(ENGINE_PATH),
        version: version.to_string(),
        is_reader: false,
        reader_path: None,
    }
}

pub async fn wait_full(state: &mut watch::Receiver<CapabilityState>) {
    tokio::time::timeout(
        Duration::from_secs(10),
        state.wait_for(|s| *s == CapabilityState::Full),
    )
    .await
    .expect("engine within 10s")
    .expect("host alive");
}
