use std::path::PathBuf;
use std::process::Stdio;

use async_trait::async_trait;
use log::{debug, info, warn};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::process::Command;
use tokio::sync::mpsc;

use crate::error::Result;
use crate::uci::{SearchWorker, WorkerLink};

/// Runs a UCI engine binary (Stockfish or compatible) as a child process and
/// bridges its stdin/stdout to line channels.
pub struct UciProcess {
    path: PathBuf,
}

impl UciProcess {
    pub fn new(path: impl Into<PathBuf>) -> UciProcess {
        UciProcess { path: path.into() }
    }
}

#[async_trait]
impl SearchWorker for UciProcess {
    async fn spawn(&self) -> Result<WorkerLink> {
        let mut child = Command::new(&self.path)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .kill_on_drop(true)
            .spawn()?;
        info!("spawned uci engine {}", self.path.display());

        let mut stdin = child
            .stdin
            .take()
            .ok_or_else(|| std::io::Error::other("engine stdin not captured"))?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| std::io::Error::other("engine stdout not captured"))?;

        let (to_worker, mut cmd_rx) = mpsc::unbounded_channel::<String>();
        let (line_tx, from_worker) = mpsc::unbounded_channel::<String>();

        tokio::spawn(async move {
            while let Some(cmd) = cmd_rx.recv().await {
                if stdin.write_all(format!("{cmd}\n").as_bytes()).await.is_err() {
                    warn!("engine stdin closed while sending '{cmd}'");
                    break;
                }
            }
            // command side dropped, let the engine wind down
            let _ = stdin.write_all(b"quit\n").await;
        });

        // Owning the child here keeps kill_on_drop armed until stdout ends.
        tokio::spawn(async move {
            let mut lines = BufReader::new(stdout).lines();
            loop {
                match lines.next_line().await {
                    Ok(Some(line)) => {
                        if line_tx.send(line).is_err() {
                            break;
                        }
                    }
                    Ok(None) => break,
                    Err(e) => {
                        warn!("error reading engine stdout: {e}");
                        break;
                    }
                }
            }
            match child.wait().await {
                Ok(status) => debug!("uci engine exited: {status}"),
                Err(e) => warn!("failed to reap uci engine: {e}"),
            }
        });

        Ok(WorkerLink {
            to_worker,
            from_worker,
        })
    }
}
