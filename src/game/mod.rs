//! Board engine, coordinates, command parsing, and session events.

pub mod board;
pub mod command;
pub mod coord;
pub mod event;

pub use board::{Board, Orientation, SHIPS};
pub use command::{parse_command, Command};
pub use coord::{format_coord, parse_coord};
pub use event::{EndReason, Event, ShotResult, Slot, SystemEvent, TurnEvent};
