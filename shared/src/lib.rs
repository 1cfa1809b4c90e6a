pub mod bitmask_flags;
pub mod bits;
pub mod body;
pub mod config;
pub mod constants;
pub mod curve;
pub mod error;
pub mod gravity;
pub mod math;
pub mod movement;
pub mod moves;
pub mod quantize;
pub mod rapier_world;
pub mod response;
pub mod root_motion;
pub mod wire;

pub use bits::{BitReader, BitWriter, PackedBits};
pub use body::{ActorId, BaseId, BaseLookup, BodyAccess, BodyState, MovementMode};
pub use config::{MovementConfig, RootMotionConfig};
pub use error::{ConfigError, WireError, WireResult};
pub use gravity::{GravityState, to_gravity_relative, to_world};
pub use math::{Quat, Transform, Vec3};
pub use movement::{MoverState, MovementSweep, StepInput, StepOutcome, SweepResult, step_movement};
pub use moves::{CompressedFlags, MoveDataContainer, MoveFlag, MoveType, NetworkMoveData};
pub use rapier_world::{ColliderShapeDef, RapierSweep, StaticWorld, WorldStaticDef};
pub use response::{ClientAdjustment, MoveResponse};
pub use root_motion::RootMotionGroup;
pub use root_motion::source::{RootMotionSource, SourceId, SourceIdAllocator, SourceKind};
pub use wire::WireCodec;
