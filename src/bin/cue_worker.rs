//! Stdio bridge: Message frames in as newline-delimited JSON on stdin, Reply
//! frames out the same way on stdout. Logs go to stderr.

use std::{env, path::PathBuf};

use anyhow::{bail, Context, Result};
use serde_json::Value;
use tokio::io::{self, AsyncBufReadExt, AsyncWriteExt, BufReader};

use cue_worker::{core::init_tracing, Host, HostConfig};

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing();
    let config = parse_args(env::args().skip(1), HostConfig::from_env())?;
    let host = Host::spawn_with_config(&config)?;
    let requests = host.requests;
    let mut replies = host.replies;

    let writer = tokio::spawn(async move {
        let mut stdout = io::stdout();
        while let Some(frame) = replies.recv().await {
            let mut line = serde_json::to_vec(&frame).context("encode reply frame")?;
            line.push(b'\n');
            stdout.write_all(&line).await.context("write reply")?;
            stdout.flush().await.context("flush stdout")?;
        }
        anyhow::Ok(())
    });

    let mut lines = BufReader::new(io::stdin()).lines();
    while let Some(line) = lines.next_line().await.context("read stdin")? {
        if line.trim().is_empty() {
            continue;
        }
        let frame: Value = match serde_json::from_str(&line) {
            Ok(frame) => frame,
            Err(err) => {
                tracing::warn!(target: "cue_worker", error = %err, "dropping non-JSON line");
                continue;
            }
        };
        if requests.send(frame).is_err() {
            break;
        }
    }

    // EOF: let the host drain, then wait for the last replies to be written.
    drop(requests);
    host.task.await.context("join host task")?;
    writer.await.context("join writer task")??;
    Ok(())
}

fn parse_args(mut args: impl Iterator<Item = String>, mut config: HostConfig) -> Result<HostConfig> {
    while let Some(arg) = args.next() {
        match arg.as_str() {
            "--data-dir" => {
                let path = args.next().context("--data-dir requires a value")?;
                config.data_dir = PathBuf::from(path);
            }
            "--no-cache" => config.cache_disabled = true,
            flag => bail!("unknown flag: {flag}"),
        }
    }
    Ok(config)
}
