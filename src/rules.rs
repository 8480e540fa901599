mod shakmaty_rules;

use std::collections::HashMap;

use serde::Serialize;
use serde_json::{Value, json};
use shakmaty::{Color, Role, Square};

use crate::error::Result;

pub use shakmaty_rules::ShakmatyRules;

pub const STARTING_FEN: &str = "rnbqkbnr/pppppppp/8/8/8/8/PPPPPPPP/RNBQKBNR w KQkq - 0 1";

/// Origin square -> sorted legal destination squares. Derived fresh from the
/// position on every query, never cached across mutations.
pub type Dests = HashMap<Square, Vec<Square>>;

pub fn standard_rules() -> Box<dyn Rules> {
    Box::new(ShakmatyRules::new())
}

/// Capability contract around the rules engine. The coordinator only talks to
/// this trait, so alternate rules engines can be swapped in.
pub trait Rules: Send {
    /// Replaces the position. Must leave the previous position untouched when
    /// the FEN does not parse.
    fn load(&mut self, fen: &str) -> Result<()>;

    fn fen(&self) -> String;

    fn turn(&self) -> Color;

    fn move_number(&self) -> u32;

    fn in_check(&self) -> bool;

    /// All legal moves, optionally restricted to one origin square. Empty when
    /// the game is over.
    fn legal_moves(&self, from: Option<Square>) -> Vec<MoveCandidate>;

    fn dests(&self) -> Dests;

    /// Whether the move from `from` to `to` would promote a pawn. Callers must
    /// pre-check this before `apply`, since a promoting move without a piece
    /// choice (and vice versa) is rejected.
    fn is_promotion(&self, from: Square, to: Square) -> bool;

    fn apply(&mut self, from: Square, to: Square, promotion: Option<Role>) -> Result<MoveRecord>;

    fn apply_san(&mut self, san: &str) -> Result<MoveRecord>;

    /// Reverts exactly one ply.
    fn undo(&mut self) -> Option<MoveRecord>;

    /// Terminal status, checked in fixed priority order: checkmate, stalemate,
    /// insufficient material, threefold repetition, fifty-move rule.
    fn game_over(&self) -> Option<GameOverInfo>;

    /// Rank-major 8x8 board array, rank 8 first.
    fn piece_grid(&self) -> Vec<Vec<Option<PieceAt>>>;
}

/// A lightweight legal-move candidate, as produced by `Rules::legal_moves`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MoveCandidate {
    pub from: Square,
    pub to: Square,
    pub promotion: Option<Role>,
    pub san: String,
    pub capture: bool,
}

/// Full record of an accepted move. Immutable once constructed; the move
/// history owned by the position store is a list of these.
#[derive(Debug, Clone)]
pub struct MoveRecord {
    pub from: Square,
    pub to: Square,
    pub promotion: Option<Role>,
    pub san: String,
    pub lan: String,
    pub flags: MoveFlags,
    pub piece: Role,
    pub color: Color,
    pub captured: Option<Role>,
    /// FEN before the move was applied.
    pub before: String,
    /// FEN after the move was applied.
    pub after: String,
    pub check: bool,
    pub checkmate: bool,
}

impl MoveRecord {
    /// shakmaty's types carry no serde impls, so the JSON shape is built by
    /// hand here.
    pub fn to_json(&self) -> Value {
        json!({
            "from": self.from.to_string(),
            "to": self.to.to_string(),
            "promotion": self.promotion.map(|r| r.char().to_string()),
            "san": self.san,
            "lan": self.lan,
            "piece": self.piece.char().to_string(),
            "color": match self.color {
                Color::White => "w",
                Color::Black => "b",
            },
            "captured": self.captured.map(|r| r.char().to_string()),
            "before": self.before,
            "after": self.after,
            "check": self.check,
            "checkmate": self.checkmate,
        })
    }
}

/// Special-move kinds of an accepted move.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MoveFlags {
    pub capture: bool,
    pub en_passant: bool,
    pub promotion: bool,
    pub castle: bool,
    pub double_pawn_push: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum GameOverReason {
    Checkmate,
    Stalemate,
    InsufficientMaterial,
    Repetition,
    FiftyMoveRule,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum GameResult {
    White,
    Black,
    Draw,
}

impl GameResult {
    /// Score from White's perspective: 1 win, 0 loss, 0.5 draw.
    pub fn score(&self) -> f64 {
        match self {
            GameResult::White => 1.0,
            GameResult::Black => 0.0,
            GameResult::Draw => 0.5,
        }
    }
}

/// Terminal status, re-derived after every move or load rather than stored.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct GameOverInfo {
    pub reason: GameOverReason,
    pub result: GameResult,
}

/// One occupied cell of the rank-major board array.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PieceAt {
    pub square: Square,
    pub role: Role,
    pub color: Color,
}
