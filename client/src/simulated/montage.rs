//! Replicated root-motion montage state and the animation track it is replayed against.

use shared::{BaseId, MovementMode, Quat, Transform, Vec3};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct MontageId(pub u32);

/// The montage a simulated proxy is currently playing, supplied by the animation layer.
pub trait MontageTrack {
    fn montage(&self) -> Option<MontageId>;

    /// Current track position in seconds.
    fn position(&self) -> f32;

    /// Signed; negative plays backwards.
    fn play_rate(&self) -> f32;

    fn section_index(&self, position: f32) -> Option<usize>;

    /// Section played after `section`. A section that loops returns itself.
    fn next_section(&self, section: usize) -> Option<usize>;

    fn section_length(&self, section: usize) -> f32;

    /// Component-local root motion between two track positions.
    fn extract_root_motion(&self, from: f32, to: f32) -> Transform;
}

/// Root-motion montage state as replicated by the server.
#[derive(Clone, Debug, PartialEq)]
pub struct RepRootMotion {
    pub is_active: bool,
    pub montage: Option<MontageId>,
    pub position: f32,
    /// Base-relative when `relative_position` is set.
    pub location: Vec3,
    /// Base-relative when `relative_rotation` is set.
    pub rotation: Quat,
    pub velocity: Vec3,
    pub movement_mode: MovementMode,
    pub movement_base: Option<BaseId>,
    pub relative_position: bool,
    pub relative_rotation: bool,
}

impl Default for RepRootMotion {
    fn default() -> Self {
        Self {
            is_active: false,
            montage: None,
            position: 0.0,
            location: Vec3::zeros(),
            rotation: Quat::identity(),
            velocity: Vec3::zeros(),
            movement_mode: MovementMode::Walking,
            movement_base: None,
            relative_position: false,
            relative_rotation: false,
        }
    }
}

/// A received [`RepRootMotion`] with the local time it arrived.
#[derive(Clone, Debug, PartialEq)]
pub struct RootMotionRepMove {
    pub time: f32,
    pub root_motion: RepRootMotion,
}

impl RootMotionRepMove {
    /// Whether the proxy can rewind to this move and replay forward to `client_position`.
    pub(crate) fn can_replay_to<T: MontageTrack + ?Sized>(
        &self,
        track: &T,
        montage: MontageId,
        client_position: f32,
        play_rate: f32,
    ) -> bool {
        let rep = &self.root_motion;
        if rep.montage != Some(montage) {
            return false;
        }

        let (Some(client_section), Some(server_section)) =
            (track.section_index(client_position), track.section_index(rep.position))
        else {
            return false;
        };
        if client_section != server_section {
            return false;
        }

        let delta = client_position - rep.position;
        // Positions more than half a looping section apart are on different laps.
        if track.next_section(client_section) == Some(client_section)
            && delta.abs() > track.section_length(client_section) * 0.5
        {
            return false;
        }

        // The server must not be ahead of us in play direction.
        delta * play_rate >= 0.0
    }
}
