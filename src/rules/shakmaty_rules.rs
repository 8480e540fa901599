use std::str::FromStr;

use log::trace;
use shakmaty::{
    CastlingMode, Chess, Color, EnPassantMode, File, Move, Position, Rank, Role, Square, fen::Fen,
    san::SanPlus, uci::UciMove,
};

use super::{
    Dests, GameOverInfo, GameOverReason, GameResult, MoveCandidate, MoveRecord, PieceAt, Rules,
};
use crate::error::{Error, Result};

/// shakmaty-backed implementation of the [`Rules`] contract.
///
/// shakmaty positions carry no history, so undo and threefold-repetition
/// detection are handled here: every applied move pushes a position snapshot
/// and a repetition key (the first four FEN fields) onto internal stacks.
pub struct ShakmatyRules {
    pos: Chess,
    undo_stack: Vec<(Chess, MoveRecord)>,
    repetition_keys: Vec<String>,
}

impl Default for ShakmatyRules {
    fn default() -> Self {
        Self::new()
    }
}

impl ShakmatyRules {
    pub fn new() -> ShakmatyRules {
        let pos = Chess::new();
        let key = repetition_key(&pos);
        ShakmatyRules {
            pos,
            undo_stack: Vec::new(),
            repetition_keys: vec![key],
        }
    }

    /// Matches `from`/`to`/`promotion` against the legal moves, normalising
    /// castling to the king-destination (e1g1) form.
    fn find_legal(&self, from: Square, to: Square, promotion: Option<Role>) -> Option<Move> {
        self.pos.legal_moves().into_iter().find(|m| {
            matches!(
                m.to_uci(CastlingMode::Standard),
                UciMove::Normal { from: f, to: t, promotion: p }
                    if f == from && t == to && p == promotion
            )
        })
    }

    fn commit(&mut self, m: Move) -> MoveRecord {
        let before_pos = self.pos.clone();
        let san = SanPlus::from_move(self.pos.clone(), m);
        let uci = m.to_uci(CastlingMode::Standard);
        let (from, to, promotion) = match uci {
            UciMove::Normal { from, to, promotion } => (from, to, promotion),
            // Null moves and drops never come out of legal_moves().
            _ => unreachable!("unexpected uci move kind"),
        };

        self.pos.play_unchecked(m);

        let record = MoveRecord {
            from,
            to,
            promotion,
            san: san.to_string(),
            lan: uci.to_string(),
            flags: super::MoveFlags {
                capture: m.is_capture(),
                en_passant: m.is_en_passant(),
                promotion: m.is_promotion(),
                castle: m.is_castle(),
                double_pawn_push: m.role() == Role::Pawn
                    && from.rank().distance(to.rank()) == 2,
            },
            piece: m.role(),
            color: before_pos.turn(),
            captured: m.capture(),
            before: fen_of(&before_pos),
            after: fen_of(&self.pos),
            check: self.pos.is_check(),
            checkmate: self.pos.is_checkmate(),
        };

        trace!("applied {} ({})", record.san, record.lan);
        self.undo_stack.push((before_pos, record.clone()));
        self.repetition_keys.push(repetition_key(&self.pos));
        record
    }

    fn current_repetitions(&self) -> usize {
        let current = self.repetition_keys.last().expect("key stack never empty");
        self.repetition_keys.iter().filter(|k| *k == current).count()
    }
}

impl Rules for ShakmatyRules {
    fn load(&mut self, fen: &str) -> Result<()> {
        // Parse fully before committing anything, so a bad FEN leaves the
        // previous position in place.
        let parsed = Fen::from_str(fen.trim())
            .map_err(|e| Error::InvalidPosition(format!("{fen}: {e}")))?;
        let pos: Chess = parsed
            .into_position(CastlingMode::Standard)
            .map_err(|e| Error::InvalidPosition(format!("{fen}: {e}")))?;

        self.pos = pos;
        self.undo_stack.clear();
        self.repetition_keys = vec![repetition_key(&self.pos)];
        Ok(())
    }

    fn fen(&self) -> String {
        fen_of(&self.pos)
    }

    fn turn(&self) -> Color {
        self.pos.turn()
    }

    fn move_number(&self) -> u32 {
        self.pos.fullmoves().get()
    }

    fn in_check(&self) -> bool {
        self.pos.is_check()
    }

    fn legal_moves(&self, from: Option<Square>) -> Vec<MoveCandidate> {
        self.pos
            .legal_moves()
            .into_iter()
            .filter_map(|m| {
                let (f, t, promotion) = match m.to_uci(CastlingMode::Standard) {
                    UciMove::Normal { from, to, promotion } => (from, to, promotion),
                    _ => return None,
                };
                if from.is_some_and(|origin| origin != f) {
                    return None;
                }
                Some(MoveCandidate {
                    from: f,
                    to: t,
                    promotion,
                    san: SanPlus::from_move(self.pos.clone(), m).to_string(),
                    capture: m.is_capture(),
                })
            })
            .collect()
    }

    fn dests(&self) -> Dests {
        let mut dests = Dests::new();
        for m in self.pos.legal_moves() {
            if let UciMove::Normal { from, to, .. } = m.to_uci(CastlingMode::Standard) {
                let entry: &mut Vec<Square> = dests.entry(from).or_default();
                // promotions produce one move per piece choice
                if !entry.contains(&to) {
                    entry.push(to);
                }
            }
        }
        for targets in dests.values_mut() {
            targets.sort_unstable();
        }
        dests
    }

    fn is_promotion(&self, from: Square, to: Square) -> bool {
        self.pos.legal_moves().into_iter().any(|m| {
            matches!(
                m.to_uci(CastlingMode::Standard),
                UciMove::Normal { from: f, to: t, .. } if f == from && t == to
            ) && m.is_promotion()
        })
    }

    fn apply(&mut self, from: Square, to: Square, promotion: Option<Role>) -> Result<MoveRecord> {
        if self.is_promotion(from, to) {
            if promotion.is_none() {
                return Err(Error::IllegalMove(format!(
                    "{from}{to} requires a promotion piece"
                )));
            }
        } else if promotion.is_some() {
            return Err(Error::IllegalMove(format!("{from}{to} does not promote")));
        }

        let m = self
            .find_legal(from, to, promotion)
            .ok_or_else(|| Error::IllegalMove(format!("{from}{to} is not legal here")))?;
        Ok(self.commit(m))
    }

    fn apply_san(&mut self, san: &str) -> Result<MoveRecord> {
        let parsed = SanPlus::from_str(san.trim())
            .map_err(|_| Error::IllegalMove(format!("cannot parse SAN '{san}'")))?;
        let m = parsed
            .san
            .to_move(&self.pos)
            .map_err(|_| Error::IllegalMove(format!("'{san}' is not legal here")))?;
        Ok(self.commit(m))
    }

    fn undo(&mut self) -> Option<MoveRecord> {
        let (pos, record) = self.undo_stack.pop()?;
        self.pos = pos;
        self.repetition_keys.pop();
        Some(record)
    }

    fn game_over(&self) -> Option<GameOverInfo> {
        if self.pos.is_checkmate() {
            // the side to move is the side that got mated
            let result = match self.pos.turn() {
                Color::White => GameResult::Black,
                Color::Black => GameResult::White,
            };
            return Some(GameOverInfo {
                reason: GameOverReason::Checkmate,
                result,
            });
        }
        let draw = |reason| {
            Some(GameOverInfo {
                reason,
                result: GameResult::Draw,
            })
        };
        if self.pos.is_stalemate() {
            return draw(GameOverReason::Stalemate);
        }
        if self.pos.is_insufficient_material() {
            return draw(GameOverReason::InsufficientMaterial);
        }
        if self.current_repetitions() >= 3 {
            return draw(GameOverReason::Repetition);
        }
        if self.pos.halfmoves() >= 100 {
            return draw(GameOverReason::FiftyMoveRule);
        }
        None
    }

    fn piece_grid(&self) -> Vec<Vec<Option<PieceAt>>> {
        (0..8)
            .rev()
            .map(|rank| {
                (0..8)
                    .map(|file| {
                        let square = Square::from_coords(File::new(file), Rank::new(rank));
                        self.pos.board().piece_at(square).map(|piece| PieceAt {
                            square,
                            role: piece.role,
                            color: piece.color,
                        })
                    })
                    .collect()
            })
            .collect()
    }
}

fn fen_of(pos: &Chess) -> String {
    Fen::from_position(pos, EnPassantMode::Legal).to_string()
}

/// Board layout, side to move, castling rights and en-passant square; the two
/// clock fields are irrelevant for repetition detection.
fn repetition_key(pos: &Chess) -> String {
    let fen = fen_of(pos);
    fen.split_whitespace().take(4).collect::<Vec<_>>().join(" ")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rules::STARTING_FEN;

    fn play(rules: &mut ShakmatyRules, sans: &[&str]) {
        for san in sans {
            rules.apply_san(san).unwrap_or_else(|e| panic!("{san}: {e}"));
        }
    }

    #[test]
    fn starting_position_dests() {
        let rules = ShakmatyRules::new();
        let dests = rules.dests();

        let expected: Dests = [
            ("a2", vec!["a3", "a4"]),
            ("b2", vec!["b3", "b4"]),
            ("c2", vec!["c3", "c4"]),
            ("d2", vec!["d3", "d4"]),
            ("e2", vec!["e3", "e4"]),
            ("f2", vec!["f3", "f4"]),
            ("g2", vec!["g3", "g4"]),
            ("h2", vec!["h3", "h4"]),
            ("b1", vec!["a3", "c3"]),
            ("g1", vec!["f3", "h3"]),
        ]
        .into_iter()
        .map(|(from, to)| {
            (
                Square::from_str(from).unwrap(),
                to.into_iter()
                    .map(|s| Square::from_str(s).unwrap())
                    .collect(),
            )
        })
        .collect();

        assert_eq!(dests, expected);
    }

    #[test]
    fn starting_fen_round_trip() {
        let rules = ShakmatyRules::new();
        assert_eq!(rules.fen(), STARTING_FEN);
    }

    #[test]
    fn scholars_mate_sequence() {
        let mut rules = ShakmatyRules::new();
        play(&mut rules, &["e4", "e5", "Bc4", "Nc6", "Qh5", "Nf6"]);
        let last = rules.apply_san("Qxf7").unwrap();
        assert!(last.checkmate);
        assert!(last.flags.capture);
        assert_eq!(last.san, "Qxf7#");
    }

    #[test]
    fn fools_mate_variant_ends_with_black_win() {
        let mut rules = ShakmatyRules::new();
        play(&mut rules, &["f4", "e6", "g4", "Qh4"]);
        assert_eq!(
            rules.game_over(),
            Some(GameOverInfo {
                reason: GameOverReason::Checkmate,
                result: GameResult::Black,
            })
        );
        assert_eq!(rules.game_over().unwrap().result.score(), 0.0);
    }

    #[test]
    fn stalemate_scenario() {
        let mut rules = ShakmatyRules::new();
        rules.load("8/7k/4K3/8/8/6Q1/8/8 b - - 0 1").unwrap();
        play(&mut rules, &["Kh8", "Qg6"]);
        assert_eq!(
            rules.game_over(),
            Some(GameOverInfo {
                reason: GameOverReason::Stalemate,
                result: GameResult::Draw,
            })
        );
        assert_eq!(rules.game_over().unwrap().result.score(), 0.5);
    }

    #[test]
    fn no_moves_after_checkmate() {
        let mut rules = ShakmatyRules::new();
        play(&mut rules, &["f4", "e6", "g4", "Qh4"]);
        assert!(rules.dests().is_empty());
        assert!(rules.legal_moves(None).is_empty());
        let err = rules.apply(Square::A2, Square::A3, None).unwrap_err();
        assert!(matches!(err, Error::IllegalMove(_)));
    }

    #[test]
    fn undo_restores_exact_fen() {
        let mut rules = ShakmatyRules::new();
        play(&mut rules, &["e4", "e5", "Bc4"]);
        let before = rules.fen();
        let record = rules.apply_san("Nc6").unwrap();
        assert_eq!(record.before, before);
        let undone = rules.undo().unwrap();
        assert_eq!(undone.san, "Nc6");
        assert_eq!(rules.fen(), before);
    }

    #[test]
    fn undo_on_empty_history() {
        let mut rules = ShakmatyRules::new();
        assert!(rules.undo().is_none());
    }

    #[test]
    fn promotion_requires_a_piece_choice() {
        let mut rules = ShakmatyRules::new();
        rules.load("8/P7/8/8/8/8/8/k6K w - - 0 1").unwrap();
        assert!(rules.is_promotion(Square::A7, Square::A8));

        let err = rules.apply(Square::A7, Square::A8, None).unwrap_err();
        assert!(matches!(err, Error::IllegalMove(_)));

        let record = rules
            .apply(Square::A7, Square::A8, Some(Role::Knight))
            .unwrap();
        assert_eq!(record.promotion, Some(Role::Knight));
        assert!(record.flags.promotion);
        assert_eq!(record.lan, "a7a8n");
    }

    #[test]
    fn promotion_piece_on_plain_move_is_rejected() {
        let mut rules = ShakmatyRules::new();
        let err = rules
            .apply(Square::E2, Square::E4, Some(Role::Queen))
            .unwrap_err();
        assert!(matches!(err, Error::IllegalMove(_)));
    }

    #[test]
    fn en_passant_capture_is_flagged() {
        let mut rules = ShakmatyRules::new();
        play(&mut rules, &["e4", "a6", "e5", "d5"]);
        let record = rules.apply_san("exd6").unwrap();
        assert!(record.flags.en_passant);
        assert!(record.flags.capture);
        assert_eq!(record.captured, Some(Role::Pawn));
    }

    #[test]
    fn castling_is_reported_in_king_form() {
        let mut rules = ShakmatyRules::new();
        play(&mut rules, &["e4", "e5", "Nf3", "Nc6", "Bc4", "Bc5"]);
        let record = rules.apply_san("O-O").unwrap();
        assert!(record.flags.castle);
        assert_eq!(record.lan, "e1g1");
        assert_eq!(record.from, Square::E1);
        assert_eq!(record.to, Square::G1);
    }

    #[test]
    fn double_pawn_push_is_flagged() {
        let mut rules = ShakmatyRules::new();
        let record = rules.apply_san("e4").unwrap();
        assert!(record.flags.double_pawn_push);
        let record = rules.apply_san("e6").unwrap();
        assert!(!record.flags.double_pawn_push);
    }

    #[test]
    fn invalid_fen_leaves_position_unchanged() {
        let mut rules = ShakmatyRules::new();
        play(&mut rules, &["e4"]);
        let before = rules.fen();

        assert!(matches!(
            rules.load("not a fen at all"),
            Err(Error::InvalidPosition(_))
        ));
        // parseable fields but no kings on the board
        assert!(matches!(
            rules.load("8/8/8/8/8/8/8/8 w - - 0 1"),
            Err(Error::InvalidPosition(_))
        ));
        assert_eq!(rules.fen(), before);
    }

    #[test]
    fn insufficient_material_draw() {
        let mut rules = ShakmatyRules::new();
        rules.load("8/8/8/4k3/8/8/8/4K3 w - - 0 1").unwrap();
        assert_eq!(
            rules.game_over(),
            Some(GameOverInfo {
                reason: GameOverReason::InsufficientMaterial,
                result: GameResult::Draw,
            })
        );
    }

    #[test]
    fn fifty_move_rule_draw() {
        let mut rules = ShakmatyRules::new();
        rules.load("8/8/8/4k3/8/8/8/R3K3 w - - 100 60").unwrap();
        assert_eq!(
            rules.game_over(),
            Some(GameOverInfo {
                reason: GameOverReason::FiftyMoveRule,
                result: GameResult::Draw,
            })
        );
    }

    #[test]
    fn threefold_repetition_draw() {
        let mut rules = ShakmatyRules::new();
        play(
            &mut rules,
            &["Nf3", "Nf6", "Ng1", "Ng8", "Nf3", "Nf6", "Ng1"],
        );
        assert_eq!(rules.game_over(), None);
        rules.apply_san("Ng8").unwrap();
        assert_eq!(
            rules.game_over(),
            Some(GameOverInfo {
                reason: GameOverReason::Repetition,
                result: GameResult::Draw,
            })
        );
    }

    #[test]
    fn legal_moves_filtered_by_origin() {
        let rules = ShakmatyRules::new();
        let knight_moves = rules.legal_moves(Some(Square::G1));
        assert_eq!(knight_moves.len(), 2);
        assert!(knight_moves.iter().all(|c| c.from == Square::G1));
        assert!(rules.legal_moves(Some(Square::A1)).is_empty());
        assert_eq!(rules.legal_moves(None).len(), 20);
    }

    #[test]
    fn piece_grid_is_rank_major_from_rank_eight() {
        let rules = ShakmatyRules::new();
        let grid = rules.piece_grid();
        assert_eq!(grid.len(), 8);

        let a8 = grid[0][0].unwrap();
        assert_eq!(a8.square, Square::A8);
        assert_eq!(a8.role, Role::Rook);
        assert_eq!(a8.color, Color::Black);

        let e1 = grid[7][4].unwrap();
        assert_eq!(e1.square, Square::E1);
        assert_eq!(e1.role, Role::King);
        assert_eq!(e1.color, Color::White);

        assert!(grid[3][3].is_none());
    }

    #[test]
    fn move_record_serialises_to_json() {
        let mut rules = ShakmatyRules::new();
        let record = rules.apply_san("e4").unwrap();
        let value = record.to_json();
        assert_eq!(value["from"], "e2");
        assert_eq!(value["to"], "e4");
        assert_eq!(value["san"], "e4");
        assert_eq!(value["color"], "w");
    }
}
