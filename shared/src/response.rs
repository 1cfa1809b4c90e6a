//! Server→client move acknowledgements and corrections.

use crate::bits::{BitReader, BitWriter, PackedBits};
use crate::body::{BaseId, MovementMode};
use crate::error::{WireError, WireResult};
use crate::math::{Quat, Vec3, canonical_down};
use crate::quantize::{
    read_location, read_normal, read_rotation, write_location, write_normal, write_rotation,
};
use crate::root_motion::RootMotionGroup;
use crate::wire::{WireCodec, read_group_into};

/// Authoritative state the client must adopt when its move disagreed with the server.
#[derive(Clone, Debug, PartialEq)]
pub struct ClientAdjustment {
    pub time_stamp: f32,
    pub delta_time: f32,
    /// Base-relative when `base_relative_position` is set.
    pub new_location: Vec3,
    /// Base-relative when `base_relative_velocity` is set.
    pub new_velocity: Vec3,
    pub new_rotation: Quat,
    pub gravity_direction: Vec3,
    pub new_base: Option<BaseId>,
    pub ack_good_move: bool,
    pub base_relative_position: bool,
    pub base_relative_velocity: bool,
    pub movement_mode: MovementMode,
}

impl Default for ClientAdjustment {
    fn default() -> Self {
        Self {
            time_stamp: 0.0,
            delta_time: 0.0,
            new_location: Vec3::zeros(),
            new_velocity: Vec3::zeros(),
            new_rotation: Quat::identity(),
            gravity_direction: canonical_down(),
            new_base: None,
            ack_good_move: false,
            base_relative_position: false,
            base_relative_velocity: false,
            movement_mode: MovementMode::Walking,
        }
    }
}

#[derive(Clone, Debug, Default)]
pub struct MoveResponse {
    pub adjustment: ClientAdjustment,
    pub has_base: bool,
    /// Rotation is only sent when set.
    pub has_rotation: bool,
    pub root_motion_montage_correction: bool,
    pub root_motion_source_correction: bool,
    pub root_motion_track_position: f32,
    pub root_motion_rotation: Quat,
    pub root_motion_group: RootMotionGroup,
}

impl MoveResponse {
    pub fn good_move(time_stamp: f32) -> Self {
        Self {
            adjustment: ClientAdjustment {
                time_stamp,
                ack_good_move: true,
                ..ClientAdjustment::default()
            },
            ..Self::default()
        }
    }

    pub fn correction(adjustment: ClientAdjustment) -> Self {
        Self {
            has_base: adjustment.new_base.is_some(),
            adjustment: ClientAdjustment {
                ack_good_move: false,
                ..adjustment
            },
            ..Self::default()
        }
    }

    pub fn is_good_move(&self) -> bool {
        self.adjustment.ack_good_move
    }

    pub fn is_correction(&self) -> bool {
        !self.is_good_move()
    }

    pub fn to_packed_bits(&self) -> PackedBits {
        let mut w = BitWriter::with_capacity_bits(128);
        self.encode(&mut w);
        w.into_packed()
    }

    pub fn from_packed_bits(packed: &PackedBits) -> WireResult<Self> {
        Self::decode(&mut BitReader::from_packed(packed))
    }
}

impl WireCodec for MoveResponse {
    fn encode(&self, w: &mut BitWriter) {
        let adj = &self.adjustment;
        w.write_bit(adj.ack_good_move);
        w.write_f32(adj.time_stamp);
        if self.is_good_move() {
            return;
        }

        w.write_bit(self.has_base);
        w.write_bit(self.has_rotation);
        w.write_bit(self.root_motion_montage_correction);
        w.write_bit(self.root_motion_source_correction);

        w.write_f32(adj.delta_time);
        write_location(w, &adj.new_location);
        write_location(w, &adj.new_velocity);
        if self.has_rotation {
            write_rotation(w, &adj.new_rotation);
        }
        write_normal(w, &adj.gravity_direction);
        w.write_u8(adj.movement_mode.pack());
        w.write_bit(adj.base_relative_position);
        w.write_bit(adj.base_relative_velocity);
        if self.has_base {
            w.write_u32(adj.new_base.map_or(0, |BaseId(id)| id));
        }

        if self.root_motion_montage_correction {
            w.write_f32(self.root_motion_track_position);
            write_rotation(w, &self.root_motion_rotation);
        }
        if self.root_motion_source_correction {
            self.root_motion_group.encode(w);
        }
    }

    fn decode(r: &mut BitReader) -> WireResult<Self> {
        let mut response = MoveResponse::default();
        response.adjustment.ack_good_move = r.read_bit()?;
        response.adjustment.time_stamp = r.read_f32()?;
        if response.is_good_move() {
            return Ok(response);
        }

        response.has_base = r.read_bit()?;
        response.has_rotation = r.read_bit()?;
        response.root_motion_montage_correction = r.read_bit()?;
        response.root_motion_source_correction = r.read_bit()?;

        let adj = &mut response.adjustment;
        adj.delta_time = r.read_f32()?;
        adj.new_location = read_location(r)?;
        adj.new_velocity = read_location(r)?;
        if response.has_rotation {
            adj.new_rotation = read_rotation(r)?;
        }
        adj.gravity_direction = read_normal(r)?;
        let mode = r.read_u8()?;
        adj.movement_mode = MovementMode::unpack(mode).ok_or_else(|| {
            r.fail(WireError::InvalidEnum {
                what: "movement mode",
                value: mode as u32,
            })
        })?;
        adj.base_relative_position = r.read_bit()?;
        adj.base_relative_velocity = r.read_bit()?;
        if response.has_base {
            adj.new_base = Some(BaseId(r.read_u32()?));
        }

        if response.root_motion_montage_correction {
            response.root_motion_track_position = r.read_f32()?;
            response.root_motion_rotation = read_rotation(r)?;
        }
        if response.root_motion_source_correction {
            read_group_into(r, &mut response.root_motion_group)?;
        }
        Ok(response)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::body::BodyState;
    use crate::math::{from_euler, rotations_equal};
    use crate::root_motion::source::{RootMotionSource, SourceIdAllocator};
    use approx::assert_abs_diff_eq;

    #[test]
    fn good_move_is_ack_bit_and_timestamp() {
        let packed = MoveResponse::good_move(3.5).to_packed_bits();
        assert_eq!(packed.num_bits, 33);
        let decoded = MoveResponse::from_packed_bits(&packed).unwrap();
        assert!(decoded.is_good_move());
        assert_eq!(decoded.adjustment.time_stamp, 3.5);
    }

    #[test]
    fn correction_carries_optional_sections() {
        let mut ids = SourceIdAllocator::default();
        let mut group = RootMotionGroup::default();
        group.apply(RootMotionSource::constant_force(Vec3::x(), 1.0).with_name("push"), &mut ids);
        group.prepare(0.1, &BodyState::default(), None, false);

        let mut response = MoveResponse::correction(ClientAdjustment {
            time_stamp: 4.0,
            delta_time: 0.05,
            new_location: Vec3::new(1.0, 2.0, 3.0),
            new_velocity: Vec3::new(0.0, -4.0, 0.5),
            new_rotation: from_euler(0.0, 0.0, 1.5),
            gravity_direction: Vec3::new(1.0, 0.0, 0.0),
            new_base: Some(BaseId(3)),
            base_relative_position: true,
            movement_mode: MovementMode::Falling,
            ..ClientAdjustment::default()
        });
        response.has_rotation = true;
        response.root_motion_source_correction = true;
        response.root_motion_group = group.clone();

        let decoded = MoveResponse::from_packed_bits(&response.to_packed_bits()).unwrap();
        let adj = &decoded.adjustment;
        assert!(decoded.is_correction());
        assert!(decoded.has_base);
        assert_eq!(adj.new_base, Some(BaseId(3)));
        assert!(adj.base_relative_position);
        assert_eq!(adj.movement_mode, MovementMode::Falling);
        assert_abs_diff_eq!(adj.new_location, Vec3::new(1.0, 2.0, 3.0), epsilon = 0.006);
        assert_abs_diff_eq!(adj.gravity_direction, Vec3::x(), epsilon = 1e-4);
        assert!(rotations_equal(&adj.new_rotation, &from_euler(0.0, 0.0, 1.5), 0.05));
        assert!(!decoded.root_motion_montage_correction);
        assert!(decoded.root_motion_group.same_state_as(&group));
    }

    #[test]
    fn rotation_is_skipped_unless_flagged() {
        let response = MoveResponse::correction(ClientAdjustment {
            new_rotation: from_euler(0.0, 0.0, 1.0),
            ..ClientAdjustment::default()
        });
        let decoded = MoveResponse::from_packed_bits(&response.to_packed_bits()).unwrap();
        assert_eq!(decoded.adjustment.new_rotation, Quat::identity());
        assert!(!decoded.has_base);
    }
}
