//! Collaborator interfaces the simulation core reads and writes through.
//!
//! The core never owns the moving body: the movement driver lends it for one tick.

use crate::math::{Quat, Transform, Vec3};

/// Opaque handle of another actor (e.g. the origin of a tracked radial force).
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct ActorId(pub u32);

/// Opaque handle of a movement base the body can stand on.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct BaseId(pub u32);

/// Read/write access to the simulated body for the duration of one call.
pub trait BodyAccess {
    fn location(&self) -> Vec3;
    fn rotation(&self) -> Quat;
    fn velocity(&self) -> Vec3;
    fn set_velocity(&mut self, velocity: Vec3);

    /// World location of another actor, if it still exists.
    fn actor_location(&self, _actor: ActorId) -> Option<Vec3> {
        None
    }
}

/// Resolves movement bases to their *current* world transform.
pub trait BaseLookup {
    fn base_transform(&self, base: BaseId) -> Option<Transform>;
}

/// No bases in the world.
impl BaseLookup for () {
    fn base_transform(&self, _base: BaseId) -> Option<Transform> {
        None
    }
}

/// Plain kinematic body state, the default [`BodyAccess`] implementation.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct BodyState {
    pub location: Vec3,
    pub rotation: Quat,
    pub velocity: Vec3,
}

impl Default for BodyState {
    fn default() -> Self {
        Self {
            location: Vec3::zeros(),
            rotation: Quat::identity(),
            velocity: Vec3::zeros(),
        }
    }
}

impl BodyState {
    pub fn at(location: Vec3) -> Self {
        Self {
            location,
            ..Self::default()
        }
    }
}

impl BodyAccess for BodyState {
    fn location(&self) -> Vec3 {
        self.location
    }

    fn rotation(&self) -> Quat {
        self.rotation
    }

    fn velocity(&self) -> Vec3 {
        self.velocity
    }

    fn set_velocity(&mut self, velocity: Vec3) {
        self.velocity = velocity;
    }
}

/// Movement mode as carried by moves and corrections.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub enum MovementMode {
    None,
    #[default]
    Walking,
    NavWalking,
    Falling,
    Swimming,
    Flying,
    Custom(u8),
}

impl MovementMode {
    /// Pack into one byte: mode in the low nibble, custom sub-mode in the high nibble.
    pub fn pack(self) -> u8 {
        match self {
            MovementMode::None => 0,
            MovementMode::Walking => 1,
            MovementMode::NavWalking => 2,
            MovementMode::Falling => 3,
            MovementMode::Swimming => 4,
            MovementMode::Flying => 5,
            MovementMode::Custom(sub) => 6 | ((sub & 0x0f) << 4),
        }
    }

    /// Returns `None` if the low nibble is not a known mode.
    pub fn unpack(byte: u8) -> Option<Self> {
        match byte & 0x0f {
            0 => Some(MovementMode::None),
            1 => Some(MovementMode::Walking),
            2 => Some(MovementMode::NavWalking),
            3 => Some(MovementMode::Falling),
            4 => Some(MovementMode::Swimming),
            5 => Some(MovementMode::Flying),
            6 => Some(MovementMode::Custom(byte >> 4)),
            _ => None,
        }
    }

    pub fn is_grounded_mode(self) -> bool {
        matches!(self, MovementMode::Walking | MovementMode::NavWalking)
    }
}
