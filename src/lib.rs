//! Glue layer for a chess game: a rules engine (shakmaty), an interactive
//! board widget and an optional UCI search engine, coordinated behind one
//! async [`Game`] handle.
//!
//! The pieces line up as:
//! - [`rules`] wraps move legality, SAN, FEN and terminal detection behind
//!   the [`Rules`] trait,
//! - [`position`] keeps the authoritative position plus move history,
//! - [`board`] mirrors that state into whatever widget renders the board,
//! - [`uci`] talks the UCI line protocol to an engine worker,
//! - [`game`] ties them together, owns the lifecycle and fires the events.
//!
//! ```no_run
//! use chesslink::Game;
//!
//! # async fn demo() -> chesslink::Result<()> {
//! let game = Game::builder().build()?;
//! game.play_san("e4").await?;
//! game.play_san("e5").await?;
//! assert_eq!(game.history().await.len(), 2);
//! # Ok(())
//! # }
//! ```

pub mod board;
pub mod error;
pub mod game;
pub mod position;
pub mod rules;
pub mod uci;
pub mod util;

#[cfg(test)]
pub(crate) mod testkit;

pub use board::{BoardAdapter, BoardSync, BoardWidget, NullBoard};
pub use error::{Error, Result};
pub use game::{Game, GameBuilder, GamePhase, GameSnapshot, MovePolicy};
pub use position::PositionStore;
pub use rules::{
    Dests, GameOverInfo, GameOverReason, GameResult, MoveCandidate, MoveFlags, MoveRecord,
    PieceAt, Rules, STARTING_FEN, ShakmatyRules, standard_rules,
};
pub use uci::{
    EngineColor, SearchOptions, SearchState, SearchWorker, UciProcess, UciSession, WorkerLink,
};
