//! Core constants, configuration, and error types.

pub mod config;
pub mod constants;
pub mod error;

pub use config::{SecurityMode, Settings};
pub use error::{BeerError, CommandError, CryptoError, WireError};
