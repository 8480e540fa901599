use thiserror::Error;

use crate::uci::SearchState;

/// Everything that can go wrong while coordinating the rules engine, the
/// board widget and the search worker.
#[derive(Error, Debug)]
pub enum Error {
    #[error("invalid position: {0}")]
    InvalidPosition(String),

    #[error("illegal move: {0}")]
    IllegalMove(String),

    #[error("game is already over")]
    GameOver,

    #[error("engine not initialised")]
    EngineNotInitialised,

    #[error("engine not ready (state: {0})")]
    EngineNotReady(SearchState),

    #[error("engine is searching")]
    EngineBusy,

    #[error("engine worker exited")]
    EngineExited,

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, Error>;
