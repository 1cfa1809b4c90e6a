//! Client→server move packets.

use crate::bitmask_flags::BitmaskFlags;
use crate::bits::{BitReader, BitWriter, PackedBits};
use crate::body::{BaseId, MovementMode};
use crate::error::{WireError, WireResult};
use crate::math::{Quat, Vec3};
use crate::quantize::{
    read_acceleration, read_location, read_rotation, write_acceleration, write_location,
    write_rotation,
};
use crate::wire::WireCodec;

crate::define_bitmask_flags!(
    /// Input bits carried with every move.
    MoveFlag, u8, {
        Jump,
        WantsToCrouch,
        Reserved1,
        Reserved2,
        Custom0,
        Custom1,
        Custom2,
        Custom3,
    }
);

pub type CompressedFlags = BitmaskFlags<u8>;

/// Which slot of a [`MoveDataContainer`] a move travels in.
///
/// Only the new move carries the fields used for error checking.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum MoveType {
    #[default]
    NewMove,
    PendingMove,
    OldMove,
}

#[derive(Clone, Debug, PartialEq)]
pub struct NetworkMoveData {
    pub move_type: MoveType,
    pub time_stamp: f32,
    pub acceleration: Vec3,
    /// World location, or base-relative when `movement_base` is set.
    pub location: Vec3,
    pub control_rotation: Quat,
    pub compressed_flags: CompressedFlags,
    pub movement_mode: MovementMode,
    pub movement_base: Option<BaseId>,
}

impl Default for NetworkMoveData {
    fn default() -> Self {
        Self {
            move_type: MoveType::NewMove,
            time_stamp: 0.0,
            acceleration: Vec3::zeros(),
            location: Vec3::zeros(),
            control_rotation: Quat::identity(),
            compressed_flags: CompressedFlags::default(),
            movement_mode: MovementMode::Walking,
            movement_base: None,
        }
    }
}

impl NetworkMoveData {
    pub fn write(&self, w: &mut BitWriter, move_type: MoveType) {
        w.write_f32(self.time_stamp);
        write_acceleration(w, &self.acceleration);
        write_location(w, &self.location);
        write_rotation(w, &self.control_rotation);

        let flags = self.compressed_flags.bits;
        w.write_bit(flags != 0);
        if flags != 0 {
            w.write_u8(flags);
        }

        if move_type == MoveType::NewMove {
            w.write_bit(self.movement_base.is_some());
            if let Some(BaseId(id)) = self.movement_base {
                w.write_u32(id);
            }
            let mode = self.movement_mode.pack();
            let walking = MovementMode::Walking.pack();
            w.write_bit(mode != walking);
            if mode != walking {
                w.write_u8(mode);
            }
        }
    }

    pub fn read(r: &mut BitReader, move_type: MoveType) -> WireResult<Self> {
        let mut data = NetworkMoveData {
            move_type,
            time_stamp: r.read_f32()?,
            acceleration: read_acceleration(r)?,
            location: read_location(r)?,
            control_rotation: read_rotation(r)?,
            ..Self::default()
        };
        if r.read_bit()? {
            data.compressed_flags = CompressedFlags::new(r.read_u8()?);
        }

        if move_type == MoveType::NewMove {
            if r.read_bit()? {
                data.movement_base = Some(BaseId(r.read_u32()?));
            }
            if r.read_bit()? {
                let byte = r.read_u8()?;
                data.movement_mode = MovementMode::unpack(byte).ok_or_else(|| {
                    r.fail(WireError::InvalidEnum {
                        what: "movement mode",
                        value: byte as u32,
                    })
                })?;
            }
        }
        Ok(data)
    }

    pub fn has_flag(&self, flag: MoveFlag) -> bool {
        self.compressed_flags.has(flag)
    }
}

/// Up to three moves sent in one packet: the newest, an optional pending move that could
/// not be combined with it, and an optional unacknowledged important move resent for
/// reliability.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct MoveDataContainer {
    pub new_move: NetworkMoveData,
    pub pending_move: Option<NetworkMoveData>,
    pub old_move: Option<NetworkMoveData>,
    /// The pending move was root motion while the new move was not, or the reverse.
    pub is_dual_hybrid_root_motion_move: bool,
    pub disable_combined_scoped_move: bool,
}

impl MoveDataContainer {
    pub fn to_packed_bits(&self) -> PackedBits {
        let mut w = BitWriter::with_capacity_bits(256);
        self.encode(&mut w);
        w.into_packed()
    }

    pub fn from_packed_bits(packed: &PackedBits) -> WireResult<Self> {
        let mut r = BitReader::from_packed(packed);
        Self::decode(&mut r)
    }

    /// Moves in simulation order: old, pending, new.
    pub fn moves(&self) -> impl Iterator<Item = &NetworkMoveData> {
        self.old_move
            .iter()
            .chain(self.pending_move.iter())
            .chain(std::iter::once(&self.new_move))
    }
}

impl WireCodec for MoveDataContainer {
    fn encode(&self, w: &mut BitWriter) {
        self.new_move.write(w, MoveType::NewMove);

        w.write_bit(self.pending_move.is_some());
        if let Some(pending) = &self.pending_move {
            w.write_bit(self.is_dual_hybrid_root_motion_move);
            pending.write(w, MoveType::PendingMove);
        }

        w.write_bit(self.old_move.is_some());
        if let Some(old) = &self.old_move {
            old.write(w, MoveType::OldMove);
        }

        w.write_bit(self.disable_combined_scoped_move);
    }

    fn decode(r: &mut BitReader) -> WireResult<Self> {
        let new_move = NetworkMoveData::read(r, MoveType::NewMove)?;

        let mut is_dual_hybrid_root_motion_move = false;
        let pending_move = if r.read_bit()? {
            is_dual_hybrid_root_motion_move = r.read_bit()?;
            Some(NetworkMoveData::read(r, MoveType::PendingMove)?)
        } else {
            None
        };

        let old_move = if r.read_bit()? {
            Some(NetworkMoveData::read(r, MoveType::OldMove)?)
        } else {
            None
        };

        Ok(Self {
            new_move,
            pending_move,
            old_move,
            is_dual_hybrid_root_motion_move,
            disable_combined_scoped_move: r.read_bit()?,
        })
    }
}
