pub mod montage;
pub mod proxy;

pub use montage::{MontageId, MontageTrack, RepRootMotion, RootMotionRepMove};
pub use proxy::{ProxyNetworkFlags, ReplicatedMovement, SimulatedProxy};
