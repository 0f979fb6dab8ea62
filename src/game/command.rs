//! Text command parsing.
//!
//! One logical line becomes one command. The verb and coordinate letter are
//! case-insensitive; surrounding whitespace is trimmed.

use crate::core::error::CommandError;
use crate::game::coord::parse_coord;

/// A parsed client command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    /// `CHAT <text>` — relay a chat line.
    Chat(String),
    /// `FIRE <coord>` — shoot at a cell.
    Fire {
        /// Zero-based row.
        row: usize,
        /// Zero-based column.
        col: usize,
    },
    /// `QUIT` — concede immediately.
    Quit,
}

/// Parse one line into a [`Command`].
pub fn parse_command(line: &str) -> Result<Command, CommandError> {
    let raw = line.trim();
    if raw.is_empty() {
        return Err(CommandError::Empty);
    }

    let (verb, rest) = match raw.split_once(char::is_whitespace) {
        Some((verb, rest)) => (verb, rest.trim()),
        None => (raw, ""),
    };

    match verb.to_ascii_uppercase().as_str() {
        "CHAT" => {
            if rest.is_empty() {
                Err(CommandError::MissingChatText)
            } else {
                Ok(Command::Chat(rest.to_string()))
            }
        }
        "FIRE" => {
            if rest.is_empty() {
                Err(CommandError::MissingCoordinate)
            } else {
                let (row, col) = parse_coord(rest)
                    .ok_or_else(|| CommandError::BadCoordinate(rest.to_ascii_uppercase()))?;
                Ok(Command::Fire { row, col })
            }
        }
        "QUIT" if rest.is_empty() => Ok(Command::Quit),
        _ => Err(CommandError::Unknown(raw.to_string())),
    }
}
