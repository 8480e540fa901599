//! Scripted stand-in for a UCI engine process, used across the test suites.

use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::mpsc;

use crate::error::Result;
use crate::uci::{SearchWorker, WorkerLink};

/// Plays a fixed list of moves in order, honouring the `movetime` it is given
/// and answering `stop` early like a real engine. With `with_noise` it also
/// emits id/option chatter and a malformed bare `bestmove` line.
pub(crate) struct ScriptedWorker {
    moves: Vec<String>,
    handshake_delay: Duration,
    noise: bool,
}

impl ScriptedWorker {
    pub(crate) fn new(moves: &[&str]) -> ScriptedWorker {
        ScriptedWorker {
            moves: moves.iter().map(|m| m.to_string()).collect(),
            handshake_delay: Duration::ZERO,
            noise: false,
        }
    }

    pub(crate) fn with_handshake_delay(mut self, delay: Duration) -> ScriptedWorker {
        self.handshake_delay = delay;
        self
    }

    pub(crate) fn with_noise(mut self) -> ScriptedWorker {
        self.noise = true;
        self
    }
}

#[async_trait]
impl SearchWorker for ScriptedWorker {
    async fn spawn(&self) -> Result<WorkerLink> {
        let (to_worker, mut cmd_rx) = mpsc::unbounded_channel::<String>();
        let (line_tx, from_worker) = mpsc::unbounded_channel::<String>();
        let delay = self.handshake_delay;
        let noise = self.noise;
        let mut moves = self.moves.clone().into_iter();

        tokio::spawn(async move {
            while let Some(cmd) = cmd_rx.recv().await {
                if cmd == "uci" {
                    tokio::time::sleep(delay).await;
                    let _ = line_tx.send("id name scripted 1.0".to_string());
                    if noise {
                        let _ =
                            line_tx.send("option name Hash type spin default 16".to_string());
                    }
                    let _ = line_tx.send("uciok".to_string());
                } else if let Some(go) = cmd.strip_prefix("go ") {
                    let movetime: u64 = go
                        .split_whitespace()
                        .skip_while(|w| *w != "movetime")
                        .nth(1)
                        .and_then(|v| v.parse().ok())
                        .unwrap_or(0);
                    let deadline = tokio::time::sleep(Duration::from_millis(movetime));
                    tokio::pin!(deadline);
                    loop {
                        tokio::select! {
                            _ = &mut deadline => break,
                            next = cmd_rx.recv() => match next.as_deref() {
                                Some("stop") => break,
                                Some(_) => {}
                                None => return,
                            },
                        }
                    }
                    if noise {
                        let _ = line_tx.send("bestmove".to_string());
                    }
                    let mv = moves.next().unwrap_or_else(|| "0000".to_string());
                    let _ = line_tx.send("info depth 1 score cp 13".to_string());
                    let _ = line_tx.send(format!("bestmove {mv} ponder a7a6"));
                }
                // "position fen ..." and anything else is accepted silently
            }
        });

        Ok(WorkerLink {
            to_worker,
            from_worker,
        })
    }
}
