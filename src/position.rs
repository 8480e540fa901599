use shakmaty::{Color, Role, Square};

use crate::error::{Error, Result};
use crate::rules::{Dests, GameOverInfo, MoveRecord, PieceAt, Rules, STARTING_FEN};

/// Owns the authoritative game state: the rules adapter, the ordered move
/// history and the derived terminal status. All mutation goes through the
/// validated operations below; the coordinator is the only caller.
pub struct PositionStore {
    rules: Box<dyn Rules>,
    history: Vec<MoveRecord>,
    game_over: Option<GameOverInfo>,
    announced: bool,
}

impl PositionStore {
    pub fn new(mut rules: Box<dyn Rules>, fen: Option<&str>) -> Result<PositionStore> {
        if let Some(fen) = fen {
            rules.load(fen)?;
        }
        let mut store = PositionStore {
            rules,
            history: Vec::new(),
            game_over: None,
            announced: false,
        };
        store.refresh_status();
        Ok(store)
    }

    pub fn fen(&self) -> String {
        self.rules.fen()
    }

    pub fn turn(&self) -> Color {
        self.rules.turn()
    }

    pub fn move_number(&self) -> u32 {
        self.rules.move_number()
    }

    pub fn in_check(&self) -> bool {
        self.rules.in_check()
    }

    pub fn dests(&self) -> Dests {
        self.rules.dests()
    }

    pub fn piece_grid(&self) -> Vec<Vec<Option<PieceAt>>> {
        self.rules.piece_grid()
    }

    pub fn is_promotion(&self, from: Square, to: Square) -> bool {
        self.rules.is_promotion(from, to)
    }

    pub fn history(&self) -> &[MoveRecord] {
        &self.history
    }

    pub fn last_move(&self) -> Option<(Square, Square)> {
        self.history.last().map(|m| (m.from, m.to))
    }

    pub fn game_over(&self) -> Option<GameOverInfo> {
        self.game_over
    }

    pub fn apply(
        &mut self,
        from: Square,
        to: Square,
        promotion: Option<Role>,
    ) -> Result<MoveRecord> {
        if self.game_over.is_some() {
            return Err(Error::GameOver);
        }
        let record = self.rules.apply(from, to, promotion)?;
        self.history.push(record.clone());
        self.refresh_status();
        Ok(record)
    }

    pub fn apply_san(&mut self, san: &str) -> Result<MoveRecord> {
        if self.game_over.is_some() {
            return Err(Error::GameOver);
        }
        let record = self.rules.apply_san(san)?;
        self.history.push(record.clone());
        self.refresh_status();
        Ok(record)
    }

    pub fn undo(&mut self) -> Option<MoveRecord> {
        let record = self.rules.undo()?;
        self.history.pop();
        self.refresh_status();
        Some(record)
    }

    pub fn load(&mut self, fen: &str) -> Result<()> {
        self.rules.load(fen)?;
        self.history.clear();
        self.announced = false;
        self.refresh_status();
        Ok(())
    }

    pub fn reset(&mut self) -> Result<()> {
        self.load(STARTING_FEN)
    }

    /// Returns the terminal status exactly once per detection, for the
    /// game-over event. Subsequent calls return `None` until the game ends
    /// again after a load or undo.
    pub fn take_announcement(&mut self) -> Option<GameOverInfo> {
        match self.game_over {
            Some(info) if !self.announced => {
                self.announced = true;
                Some(info)
            }
            _ => None,
        }
    }

    /// Re-derives the terminal status from the rules engine. Never cached
    /// across mutations; an undo out of a terminal position re-arms the
    /// announcement.
    fn refresh_status(&mut self) {
        self.game_over = self.rules.game_over();
        if self.game_over.is_none() {
            self.announced = false;
        }
    }
}
