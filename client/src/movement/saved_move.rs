use shared::{
    BaseId, BaseLookup, BodyState, CompressedFlags, MoveType, MovementMode, MoverState,
    NetworkMoveData, Quat, RootMotionGroup, Vec3,
};

/// Accelerations further apart than this (cosine) are neither combined nor considered the same.
const ACCEL_DOT_THRESHOLD: f32 = 0.9;
/// Acceleration magnitude change (m/s^2) that keeps two moves apart.
const ACCEL_MAG_THRESHOLD: f32 = 0.01;

/// Player input for one client tick.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct MoveInput {
    pub acceleration: Vec3,
    pub control_rotation: Quat,
    pub flags: CompressedFlags,
}

impl Default for MoveInput {
    fn default() -> Self {
        Self {
            acceleration: Vec3::zeros(),
            control_rotation: Quat::identity(),
            flags: CompressedFlags::default(),
        }
    }
}

/// A locally simulated move kept until the server acknowledges it.
#[derive(Clone, Debug)]
pub struct SavedMove {
    pub time_stamp: f32,
    pub delta_time: f32,
    pub acceleration: Vec3,
    pub control_rotation: Quat,
    pub flags: CompressedFlags,
    pub start_mode: MovementMode,
    pub end_mode: MovementMode,
    pub start: BodyState,
    pub end: BodyState,
    pub movement_base: Option<BaseId>,
    pub gravity_direction: Vec3,
    /// Group state before the move ran.
    pub root_motion: RootMotionGroup,
    /// Made before the last timestamp reset; never resent as an old move.
    pub old_time_stamp_before_reset: bool,
}

impl SavedMove {
    /// Capture inputs and the starting state; the end state is filled in by [`Self::record_end`].
    pub fn new(
        state: &MoverState,
        movement_base: Option<BaseId>,
        time_stamp: f32,
        delta_time: f32,
        input: &MoveInput,
    ) -> Self {
        Self {
            time_stamp,
            delta_time,
            acceleration: input.acceleration,
            control_rotation: input.control_rotation,
            flags: input.flags,
            start_mode: state.mode,
            end_mode: state.mode,
            start: state.body,
            end: state.body,
            movement_base,
            gravity_direction: state.gravity.direction(),
            root_motion: state.root_motion.clone(),
            old_time_stamp_before_reset: false,
        }
    }

    /// Re-capture the starting state, used before a replay re-runs the move.
    pub fn rebase_start(&mut self, state: &MoverState, movement_base: Option<BaseId>) {
        self.start = state.body;
        self.start_mode = state.mode;
        self.movement_base = movement_base;
        self.gravity_direction = state.gravity.direction();
        self.root_motion = state.root_motion.clone();
    }

    pub fn record_end(&mut self, state: &MoverState) {
        self.end = state.body;
        self.end_mode = state.mode;
    }

    pub fn has_root_motion(&self) -> bool {
        self.root_motion.has_active_sources()
    }

    /// Whether sending may wait for the next tick so the two moves can be combined.
    pub fn can_delay_sending(&self) -> bool {
        !self.has_root_motion()
    }

    /// Whether `newer` can be folded into this move and simulated as one longer move.
    pub fn can_combine_with(&self, newer: &SavedMove, max_delta_time: f32) -> bool {
        if self.has_root_motion() || newer.has_root_motion() {
            return false;
        }
        if self.old_time_stamp_before_reset != newer.old_time_stamp_before_reset {
            return false;
        }
        if self.delta_time + newer.delta_time > max_delta_time {
            return false;
        }
        if self.flags != newer.flags {
            return false;
        }
        if self.start_mode != newer.start_mode || self.end_mode != self.start_mode {
            return false;
        }
        if self.movement_base != newer.movement_base || self.gravity_direction != newer.gravity_direction {
            return false;
        }
        same_acceleration(&self.acceleration, &newer.acceleration)
    }

    /// Fold `newer` into this move: this move's start, the newer inputs and timestamp.
    pub fn combine_with(self, newer: SavedMove) -> SavedMove {
        SavedMove {
            delta_time: self.delta_time + newer.delta_time,
            start: self.start,
            start_mode: self.start_mode,
            root_motion: self.root_motion,
            ..newer
        }
    }

    /// Whether losing this move would change the server's result compared to `last_acked`.
    pub fn is_important_move(&self, last_acked: &SavedMove) -> bool {
        if self.flags != last_acked.flags {
            return true;
        }
        if self.start_mode != last_acked.end_mode || self.end_mode != last_acked.end_mode {
            return true;
        }
        !same_acceleration(&self.acceleration, &last_acked.acceleration)
    }

    /// Wire form of the move. The location is base-relative when the base can be resolved.
    pub fn to_network<L: BaseLookup + ?Sized>(&self, move_type: MoveType, bases: &L) -> NetworkMoveData {
        let based = self
            .movement_base
            .and_then(|base| bases.base_transform(base).map(|transform| (base, transform)));
        let (location, movement_base) = match based {
            Some((base, transform)) => (transform.inverse_transform_point(self.end.location), Some(base)),
            None => (self.end.location, None),
        };

        NetworkMoveData {
            move_type,
            time_stamp: self.time_stamp,
            acceleration: self.acceleration,
            location,
            control_rotation: self.control_rotation,
            compressed_flags: self.flags,
            movement_mode: self.end_mode,
            movement_base,
        }
    }
}

fn same_acceleration(a: &Vec3, b: &Vec3) -> bool {
    if a == b {
        return true;
    }
    let (mag_a, mag_b) = (a.norm(), b.norm());
    if (mag_a - mag_b).abs() > ACCEL_MAG_THRESHOLD {
        return false;
    }
    if mag_a == 0.0 || mag_b == 0.0 {
        return mag_a == mag_b;
    }
    a.dot(b) / (mag_a * mag_b) >= ACCEL_DOT_THRESHOLD
}
