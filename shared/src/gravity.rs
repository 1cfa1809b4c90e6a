//! Conversions between world space and the frame where gravity points along canonical down.

use crate::math::{Quat, Vec3, canonical_down, find_between_normals};

/// Rotation taking world space into gravity-relative space.
///
/// Identity only when `gravity_dir` is exactly canonical down; no tolerance is applied.
fn world_to_relative(gravity_dir: &Vec3) -> Quat {
    let down = canonical_down();
    if *gravity_dir == down {
        return Quat::identity();
    }
    find_between_normals(gravity_dir, &down)
}

fn relative_to_world(gravity_dir: &Vec3) -> Quat {
    let down = canonical_down();
    if *gravity_dir == down {
        return Quat::identity();
    }
    find_between_normals(&down, gravity_dir)
}

pub fn to_gravity_relative(rotation: &Quat, gravity_dir: &Vec3) -> Quat {
    world_to_relative(gravity_dir) * rotation
}

pub fn to_world(rotation: &Quat, gravity_dir: &Vec3) -> Quat {
    relative_to_world(gravity_dir) * rotation
}

pub fn vector_to_gravity_relative(v: &Vec3, gravity_dir: &Vec3) -> Vec3 {
    world_to_relative(gravity_dir) * v
}

pub fn vector_to_world(v: &Vec3, gravity_dir: &Vec3) -> Vec3 {
    relative_to_world(gravity_dir) * v
}

/// Pre-rotation that carries an orientation along when gravity swings from `last` to `current`.
///
/// A zero `last` means there is no previous frame yet.
pub fn gravity_change_warp(last: &Vec3, current: &Vec3) -> Quat {
    if *last == Vec3::zeros() {
        return Quat::identity();
    }
    find_between_normals(last, current)
}

/// Body facing that follows the control rotation's yaw about the gravity axis.
pub fn facing_from_control(control: &Quat, gravity_dir: &Vec3) -> Quat {
    let (_roll, _pitch, yaw) = to_gravity_relative(control, gravity_dir).euler_angles();
    to_world(&Quat::from_euler_angles(0.0, 0.0, yaw), gravity_dir)
}

/// Gravity direction of one body, plus what it was on the previous tick.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct GravityState {
    direction: Vec3,
    previous_direction: Vec3,
}

impl Default for GravityState {
    fn default() -> Self {
        Self {
            direction: canonical_down(),
            previous_direction: canonical_down(),
        }
    }
}

impl GravityState {
    pub fn new(direction: Vec3) -> Self {
        let mut state = Self::default();
        state.set_direction(direction);
        state.previous_direction = state.direction;
        state
    }

    pub fn direction(&self) -> Vec3 {
        self.direction
    }

    pub fn previous_direction(&self) -> Vec3 {
        self.previous_direction
    }

    /// Set the new direction (normalized; zero falls back to canonical down).
    ///
    /// Returns whether the direction changed.
    pub fn set_direction(&mut self, direction: Vec3) -> bool {
        let direction = direction
            .try_normalize(f32::EPSILON)
            .unwrap_or_else(canonical_down);
        self.previous_direction = self.direction;
        self.direction = direction;
        let changed = self.previous_direction != self.direction;
        if changed {
            log::debug!(
                "gravity direction changed from {:?} to {:?}",
                self.previous_direction,
                self.direction
            );
        }
        changed
    }

    /// Acceleration vector for a gravity magnitude in m/s^2.
    pub fn acceleration(&self, magnitude: f32) -> Vec3 {
        self.direction * magnitude
    }

    pub fn to_relative(&self, rotation: &Quat) -> Quat {
        to_gravity_relative(rotation, &self.direction)
    }

    pub fn to_world(&self, rotation: &Quat) -> Quat {
        to_world(rotation, &self.direction)
    }
}
