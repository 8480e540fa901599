mod process;

use std::fmt;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use log::{debug, warn};
use serde::Serialize;
use shakmaty::Color;
use tokio::sync::{mpsc, oneshot, watch};

use crate::error::{Error, Result};

pub use process::UciProcess;

/// Which side the search engine is assigned to play.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum EngineColor {
    White,
    Black,
    Both,
    None,
}

impl EngineColor {
    pub fn plays(&self, turn: Color) -> bool {
        match self {
            EngineColor::White => turn == Color::White,
            EngineColor::Black => turn == Color::Black,
            EngineColor::Both => true,
            EngineColor::None => false,
        }
    }
}

impl fmt::Display for EngineColor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            EngineColor::White => "white",
            EngineColor::Black => "black",
            EngineColor::Both => "both",
            EngineColor::None => "none",
        };
        f.write_str(s)
    }
}

/// Search limits and colour assignment; immutable once the session is built.
/// Depth and move time are both passed to the worker, which stops at whichever
/// bound it hits first.
#[derive(Debug, Clone)]
pub struct SearchOptions {
    pub move_time: Duration,
    pub depth: u32,
    pub color: EngineColor,
}

impl Default for SearchOptions {
    fn default() -> Self {
        SearchOptions {
            move_time: Duration::from_millis(2000),
            depth: 40,
            color: EngineColor::Black,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SearchState {
    Uninitialised,
    Initialising,
    Waiting,
    Searching,
}

impl fmt::Display for SearchState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            SearchState::Uninitialised => "uninitialised",
            SearchState::Initialising => "initialising",
            SearchState::Waiting => "waiting",
            SearchState::Searching => "searching",
        };
        f.write_str(s)
    }
}

/// Line channels to a spawned worker. Text in both directions, one message
/// per line, delivered in send order.
pub struct WorkerLink {
    pub to_worker: mpsc::UnboundedSender<String>,
    pub from_worker: mpsc::UnboundedReceiver<String>,
}

/// Spawns the out-of-process (or scripted, in tests) move-search worker.
#[async_trait]
pub trait SearchWorker: Send + Sync {
    async fn spawn(&self) -> Result<WorkerLink>;
}

type UciTap = Box<dyn Fn(&str) + Send + Sync>;

struct Shared {
    opts: SearchOptions,
    worker: Box<dyn SearchWorker>,
    state_tx: watch::Sender<SearchState>,
    to_worker: Mutex<Option<mpsc::UnboundedSender<String>>>,
    // Single-outstanding-request handshakes, resolved by message pattern
    // (no request ids): "uciok" for init, "bestmove ..." for a search.
    pending_ready: Mutex<Option<oneshot::Sender<()>>>,
    pending_best: Mutex<Option<oneshot::Sender<String>>>,
    uci_tap: Mutex<Option<UciTap>>,
}

/// Async client for a UCI-speaking move-search worker.
///
/// Cheap to clone; all clones share the worker and its state machine
/// (`Uninitialised -> Initialising -> Waiting <-> Searching`). At most one
/// request is in flight at a time; a second concurrent `get_move` or `init`
/// is rejected with [`Error::EngineNotReady`] rather than queued.
///
/// Cancellation is cooperative: [`UciSession::stop_search`] trusts the worker
/// to answer `stop` with a `bestmove` line. A worker that never does leaves
/// the caller suspended; a worker that exits wakes every waiter with
/// [`Error::EngineExited`].
#[derive(Clone)]
pub struct UciSession {
    shared: Arc<Shared>,
}

impl UciSession {
    pub fn new(opts: SearchOptions, worker: impl SearchWorker + 'static) -> UciSession {
        let (state_tx, _) = watch::channel(SearchState::Uninitialised);
        UciSession {
            shared: Arc::new(Shared {
                opts,
                worker: Box::new(worker),
                state_tx,
                to_worker: Mutex::new(None),
                pending_ready: Mutex::new(None),
                pending_best: Mutex::new(None),
                uci_tap: Mutex::new(None),
            }),
        }
    }

    /// Spawns the worker and runs the `uci`/`uciok` handshake. Resolves
    /// exactly once; calling again fails with [`Error::EngineNotReady`].
    pub async fn init(&self) -> Result<()> {
        let begun = self.shared.state_tx.send_if_modified(|s| {
            if *s == SearchState::Uninitialised {
                *s = SearchState::Initialising;
                true
            } else {
                false
            }
        });
        if !begun {
            return Err(Error::EngineNotReady(self.state()));
        }

        let link = match self.shared.worker.spawn().await {
            Ok(link) => link,
            Err(e) => {
                self.shared.state_tx.send_replace(SearchState::Uninitialised);
                return Err(e);
            }
        };
        *self.shared.to_worker.lock().unwrap() = Some(link.to_worker);

        let (tx, rx) = oneshot::channel();
        *self.shared.pending_ready.lock().unwrap() = Some(tx);
        tokio::spawn(read_loop(Arc::clone(&self.shared), link.from_worker));

        self.post("uci")?;
        rx.await.map_err(|_| Error::EngineExited)
    }

    /// Requests the best move for `fen`. Suspends until the worker's
    /// `bestmove` arrives and resolves with the move in long algebraic
    /// notation.
    pub async fn get_move(&self, fen: &str) -> Result<String> {
        if self.shared.to_worker.lock().unwrap().is_none() {
            return Err(Error::EngineNotInitialised);
        }
        let begun = self.shared.state_tx.send_if_modified(|s| {
            if *s == SearchState::Waiting {
                *s = SearchState::Searching;
                true
            } else {
                false
            }
        });
        if !begun {
            return Err(match self.state() {
                SearchState::Uninitialised => Error::EngineNotInitialised,
                other => Error::EngineNotReady(other),
            });
        }

        let (tx, rx) = oneshot::channel();
        *self.shared.pending_best.lock().unwrap() = Some(tx);
        self.post(&format!("position fen {fen}"))?;
        self.post(&format!(
            "go depth {} movetime {}",
            self.shared.opts.depth,
            self.shared.opts.move_time.as_millis()
        ))?;
        rx.await.map_err(|_| Error::EngineExited)
    }

    /// Cancels an in-flight search. No-op when not searching; otherwise sends
    /// the stop directive and suspends until the worker confirms with its
    /// `bestmove` line, which also resolves the pending [`UciSession::get_move`].
    pub async fn stop_search(&self) -> Result<()> {
        if !self.is_searching() {
            return Ok(());
        }
        self.post("stop")?;
        let mut rx = self.shared.state_tx.subscribe();
        rx.wait_for(|s| *s != SearchState::Searching)
            .await
            .map_err(|_| Error::EngineExited)?;
        Ok(())
    }

    pub fn is_searching(&self) -> bool {
        self.state() == SearchState::Searching
    }

    pub fn state(&self) -> SearchState {
        *self.shared.state_tx.borrow()
    }

    pub fn color(&self) -> EngineColor {
        self.shared.opts.color
    }

    pub fn options(&self) -> &SearchOptions {
        &self.shared.opts
    }

    /// Registers a diagnostic observer that receives every raw worker line,
    /// including the ones the session itself ignores.
    pub fn set_uci_callback(&self, tap: impl Fn(&str) + Send + Sync + 'static) {
        *self.shared.uci_tap.lock().unwrap() = Some(Box::new(tap));
    }

    fn post(&self, line: &str) -> Result<()> {
        debug!("uci -> {line}");
        let guard = self.shared.to_worker.lock().unwrap();
        let tx = guard.as_ref().ok_or(Error::EngineNotInitialised)?;
        tx.send(line.to_string()).map_err(|_| Error::EngineExited)
    }
}

/// Forwards worker lines into the session state machine. Lines that match no
/// expected pattern are dropped, apart from the diagnostic tap.
async fn read_loop(shared: Arc<Shared>, mut from_worker: mpsc::UnboundedReceiver<String>) {
    while let Some(raw) = from_worker.recv().await {
        let line = raw.trim();
        debug!("uci <- {line}");

        if line == "uciok" {
            let pending = shared.pending_ready.lock().unwrap().take();
            if let Some(tx) = pending {
                shared.state_tx.send_if_modified(|s| {
                    if *s == SearchState::Initialising {
                        *s = SearchState::Waiting;
                        true
                    } else {
                        false
                    }
                });
                let _ = tx.send(());
            }
        } else if let Some(rest) = line.strip_prefix("bestmove ") {
            // second whitespace-separated field; a bare "bestmove" is dropped
            if let Some(lan) = rest.split_whitespace().next() {
                let pending = shared.pending_best.lock().unwrap().take();
                shared.state_tx.send_if_modified(|s| {
                    if *s == SearchState::Searching {
                        *s = SearchState::Waiting;
                        true
                    } else {
                        false
                    }
                });
                if let Some(tx) = pending {
                    let _ = tx.send(lan.to_string());
                }
            }
        }

        if let Some(tap) = shared.uci_tap.lock().unwrap().as_ref() {
            tap(line);
        }
    }

    // Worker is gone; wake every waiter by dropping its sender.
    warn!("uci worker closed its message stream");
    shared.pending_ready.lock().unwrap().take();
    shared.pending_best.lock().unwrap().take();
    *shared.to_worker.lock().unwrap() = None;
    shared.state_tx.send_replace(SearchState::Uninitialised);
}
