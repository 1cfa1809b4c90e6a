//! Root-motion sources: prioritized, time-boxed velocity contributors composed per tick.

pub mod group;
pub mod source;

pub use group::RootMotionGroup;
pub use source::{
    AccumulateMode, ConstantForce, FinishVelocity, FinishVelocityMode, JumpForce,
    MoveToDynamicForce, MoveToForce, RadialForce, RootMotionSource, SourceId, SourceIdAllocator,
    SourceKind, SourceSetting, SourceStatus,
};
