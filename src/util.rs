use std::str::FromStr;

use shakmaty::uci::UciMove;

use crate::error::{Error, Result};

pub fn parse_uci_move(move_str: &str) -> Result<UciMove> {
    let trimmed = move_str.trim();
    UciMove::from_str(trimmed)
        .map_err(|_| Error::IllegalMove(format!("unparseable uci move '{trimmed}'")))
}

/// Parses a whitespace-separated move list, e.g. an opening line "e2e4 e7e5".
pub fn parse_uci_moves(move_str: &str) -> Result<Vec<UciMove>> {
    move_str.split_whitespace().map(parse_uci_move).collect()
}
