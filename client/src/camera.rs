//! View rotation that stays upright relative to the current gravity direction.

use shared::gravity::gravity_change_warp;
use shared::math::{from_euler, to_euler};
use shared::{Quat, Vec3, to_gravity_relative, to_world};

const MAX_VIEW_PITCH_DEG: f32 = 89.9;

/// Look input for one frame, in radians.
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct ViewInput {
    pub pitch: f32,
    pub yaw: f32,
}

#[derive(Clone, Copy, Debug)]
pub struct GravityViewController {
    /// Zero until the first update.
    last_frame_gravity: Vec3,
}

impl Default for GravityViewController {
    fn default() -> Self {
        Self {
            last_frame_gravity: Vec3::zeros(),
        }
    }
}

impl GravityViewController {
    pub fn last_frame_gravity(&self) -> Vec3 {
        self.last_frame_gravity
    }

    /// Apply look input to `control` and return the new world-space view rotation.
    ///
    /// A gravity change since the last frame first rotates the view along with it, so the
    /// camera does not snap when crossing between gravity volumes.
    pub fn update_rotation(&mut self, control: &Quat, gravity_dir: &Vec3, input: ViewInput) -> Quat {
        let warp = gravity_change_warp(&self.last_frame_gravity, gravity_dir);
        self.last_frame_gravity = *gravity_dir;

        let relative = to_gravity_relative(&(warp * control), gravity_dir);
        let (_roll, pitch, yaw) = to_euler(&relative);

        let max_pitch = MAX_VIEW_PITCH_DEG.to_radians();
        let pitch = (pitch + input.pitch).clamp(-max_pitch, max_pitch);
        to_world(&from_euler(0.0, pitch, yaw + input.yaw), gravity_dir)
    }
}
