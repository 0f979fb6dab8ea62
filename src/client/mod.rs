//! BEER Protocol - Client Runtime
//!
//! Connect, run the key exchange when requested, present the reconnect
//! token, then read frames and send commands. Rendering is left to the
//! caller; [`GameClient`] yields parsed payloads.

mod runtime;

pub use runtime::{ClientConfig, ClientError, GameClient};
