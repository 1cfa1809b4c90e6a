//! Autonomous proxy: local prediction and reconciliation against server responses.

pub mod id_mapping;
pub mod prediction;
pub mod saved_move;

pub use id_mapping::{IdMapping, RootMotionIdMappings, UnmatchedSource};
pub use prediction::{ClientPrediction, MontageCorrection};
pub use saved_move::{MoveInput, SavedMove};
