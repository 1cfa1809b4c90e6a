//! Authoritative side of predicted character movement.
//!
//! One [`ServerMoveHandler`] per connected client validates incoming move packets, re-simulates
//! them with the shared movement step and queues an acknowledgement or correction.

pub mod config;
pub mod error;
pub mod move_handler;

pub use config::ServerConfig;
pub use error::{MoveError, MoveResult};
pub use move_handler::{MontagePosition, ServerMoveHandler};
