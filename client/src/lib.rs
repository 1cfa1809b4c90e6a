//! Client side of networked character movement.
//!
//! [`ClientPrediction`] drives the locally controlled character, [`SimulatedProxy`] the
//! remote ones, and [`GravityViewController`] keeps the view upright under changing gravity.

pub mod camera;
pub mod config;
pub mod error;
pub mod movement;
pub mod simulated;

pub use camera::{GravityViewController, ViewInput};
pub use config::ClientConfig;
pub use error::{ResponseError, ResponseResult};
pub use movement::{ClientPrediction, MontageCorrection, MoveInput, RootMotionIdMappings, SavedMove};
pub use simulated::{MontageId, MontageTrack, RepRootMotion, SimulatedProxy};
