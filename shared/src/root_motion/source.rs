//! A single time-boxed root-motion source and its variants.

use std::fmt;

use crate::bitmask_flags::BitmaskFlags;
use crate::body::{ActorId, BodyAccess};
use crate::constants::{INVALID_SOURCE_ID, INVALID_START_TIME, KINDA_SMALL_NUMBER, SMALL_NUMBER};
use crate::curve::{FloatCurve, VectorCurve};
use crate::math::{
    Quat, Transform, Vec3, facing_yaw, is_nearly_zero, points_are_near, rotations_equal,
    safe_normal, without_pitch,
};

pub type SourceId = u16;

crate::define_bitmask_flags!(
    /// Per-source behaviour switches. The group unions them every prepare.
    SourceSetting, u8, {
        DisablePartialEndTick,
        IgnoreZAccumulate,
    }
);

crate::define_bitmask_flags!(
    SourceStatus, u8, {
        Prepared,
        Finished,
        MarkedForRemoval,
    }
);

pub type SourceSettings = BitmaskFlags<u8>;
pub type SourceStatusFlags = BitmaskFlags<u8>;

/// Slack (m/s) allowed over the ideal path speed before a move-to force is clamped.
const EXPECTED_SPEED_ALLOWANCE: f32 = 0.005;

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub enum AccumulateMode {
    #[default]
    Override,
    Additive,
}

impl AccumulateMode {
    pub fn to_u8(self) -> u8 {
        match self {
            AccumulateMode::Override => 0,
            AccumulateMode::Additive => 1,
        }
    }

    pub fn from_u8(value: u8) -> Option<Self> {
        match value {
            0 => Some(AccumulateMode::Override),
            1 => Some(AccumulateMode::Additive),
            _ => None,
        }
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub enum FinishVelocityMode {
    #[default]
    MaintainLastRootMotionVelocity,
    SetVelocity,
    ClampVelocity,
}

impl FinishVelocityMode {
    pub fn to_u8(self) -> u8 {
        match self {
            FinishVelocityMode::MaintainLastRootMotionVelocity => 0,
            FinishVelocityMode::SetVelocity => 1,
            FinishVelocityMode::ClampVelocity => 2,
        }
    }

    pub fn from_u8(value: u8) -> Option<Self> {
        match value {
            0 => Some(FinishVelocityMode::MaintainLastRootMotionVelocity),
            1 => Some(FinishVelocityMode::SetVelocity),
            2 => Some(FinishVelocityMode::ClampVelocity),
            _ => None,
        }
    }
}

/// What happens to the body's velocity when the source is removed.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct FinishVelocity {
    pub mode: FinishVelocityMode,
    pub set_velocity: Vec3,
    pub clamp_velocity: f32,
}

impl Default for FinishVelocity {
    fn default() -> Self {
        Self {
            mode: FinishVelocityMode::default(),
            set_velocity: Vec3::zeros(),
            clamp_velocity: 0.0,
        }
    }
}

impl FinishVelocity {
    pub fn set(velocity: Vec3) -> Self {
        Self {
            mode: FinishVelocityMode::SetVelocity,
            set_velocity: velocity,
            ..Self::default()
        }
    }

    pub fn clamp(max_speed: f32) -> Self {
        Self {
            mode: FinishVelocityMode::ClampVelocity,
            clamp_velocity: max_speed,
            ..Self::default()
        }
    }
}

fn strength_time_value(time: f32, duration: f32) -> f32 {
    if duration > 0.0 {
        (time / duration).clamp(0.0, 1.0)
    } else {
        time
    }
}

/// Constant velocity, optionally scaled by a strength curve over normalized time.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct ConstantForce {
    pub force: Vec3,
    pub strength_over_time: Option<FloatCurve>,
}

impl ConstantForce {
    fn force_at(&self, time: f32, duration: f32, simulation_time: f32, tick_time: f32) -> Vec3 {
        let mut force = self.force;
        if let Some(curve) = &self.strength_over_time {
            force *= curve.value_at(strength_time_value(time, duration));
        }

        // Catching up means applying more than one tick's worth of force in one tick.
        let multiplier = if tick_time > SMALL_NUMBER {
            simulation_time / tick_time
        } else {
            1.0
        };
        force * multiplier
    }
}

/// Push or pull around a point (or a tracked actor) within a radius.
#[derive(Clone, Debug, PartialEq)]
pub struct RadialForce {
    pub location: Vec3,
    pub location_actor: Option<ActorId>,
    pub radius: f32,
    pub strength: f32,
    pub is_push: bool,
    pub no_z_force: bool,
    pub strength_distance_falloff: Option<FloatCurve>,
    pub strength_over_time: Option<FloatCurve>,
    pub use_fixed_world_direction: bool,
    /// Forward (+X) of this rotation is the force direction when `use_fixed_world_direction`.
    pub fixed_world_direction: Quat,
}

impl Default for RadialForce {
    fn default() -> Self {
        Self {
            location: Vec3::zeros(),
            location_actor: None,
            radius: 1.0,
            strength: 0.0,
            is_push: true,
            no_z_force: false,
            strength_distance_falloff: None,
            strength_over_time: None,
            use_fixed_world_direction: false,
            fixed_world_direction: Quat::identity(),
        }
    }
}

impl RadialForce {
    fn force_at<B: BodyAccess + ?Sized>(
        &self,
        time: f32,
        duration: f32,
        simulation_time: f32,
        tick_time: f32,
        body: &B,
    ) -> Vec3 {
        let body_location = body.location();
        let force_location = self
            .location_actor
            .and_then(|actor| body.actor_location(actor))
            .unwrap_or(self.location);

        let mut force = Vec3::zeros();
        let distance = (force_location - body_location).norm();
        if distance < self.radius {
            let mut factor = 1.0f32;
            if let Some(falloff) = &self.strength_distance_falloff {
                factor -= 1.0 - falloff.value_at((distance / self.radius).clamp(0.0, 1.0));
            }
            if let Some(curve) = &self.strength_over_time {
                factor -= 1.0 - curve.value_at(strength_time_value(time, duration));
            }
            let strength = self.strength * factor.clamp(0.0, 1.0);

            if self.use_fixed_world_direction {
                force = (self.fixed_world_direction * Vec3::x()) * strength;
            } else {
                force = safe_normal(&(force_location - body_location)) * strength;
                if self.is_push {
                    force = -force;
                }
            }
        }

        if self.no_z_force {
            force.z = 0.0;
        }

        if simulation_time != tick_time && tick_time > SMALL_NUMBER {
            force *= simulation_time / tick_time;
        }
        force
    }
}

/// Speed cap used by move-to forces so a blocked body does not build up runaway velocity.
fn restrict_to_expected_speed(
    force: Vec3,
    target_location: Vec3,
    expected_location: Vec3,
    tick_time: f32,
) -> Vec3 {
    if is_nearly_zero(&force, KINDA_SMALL_NUMBER) {
        return force;
    }
    let expected_speed = ((target_location - expected_location) / tick_time).norm();
    let allowed = expected_speed + EXPECTED_SPEED_ALLOWANCE;
    if force.norm_squared() > allowed * allowed {
        force.normalize() * expected_speed
    } else {
        force
    }
}

/// Path offset expressed in the yaw-only frame facing from `start` to `target`.
fn facing_path_offset(curve: &Option<VectorCurve>, start: Vec3, target: Vec3, fraction: f32) -> Vec3 {
    match curve {
        Some(curve) => facing_yaw(&(target - start)) * curve.value_at_fraction(fraction),
        None => Vec3::zeros(),
    }
}

/// Moves the body from `start_location` to `target_location` over the duration.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct MoveToForce {
    pub start_location: Vec3,
    pub target_location: Vec3,
    pub restrict_speed_to_expected: bool,
    pub path_offset_curve: Option<VectorCurve>,
}

impl MoveToForce {
    fn location_at(&self, fraction: f32) -> Vec3 {
        self.start_location.lerp(&self.target_location, fraction)
            + facing_path_offset(
                &self.path_offset_curve,
                self.start_location,
                self.target_location,
                fraction,
            )
    }

    fn force_at(
        &self,
        time: f32,
        duration: f32,
        simulation_time: f32,
        tick_time: f32,
        current_location: Vec3,
    ) -> Vec3 {
        if !(duration > SMALL_NUMBER && tick_time > SMALL_NUMBER) {
            return Vec3::zeros();
        }

        let target = self.location_at((time + simulation_time) / duration);
        let force = (target - current_location) / tick_time;
        if self.restrict_speed_to_expected {
            restrict_to_expected_speed(force, target, self.location_at(time / duration), tick_time)
        } else {
            force
        }
    }
}

/// Move-to whose target may be changed while running. Start and target are replicated state.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct MoveToDynamicForce {
    pub start_location: Vec3,
    pub initial_target_location: Vec3,
    pub target_location: Vec3,
    pub restrict_speed_to_expected: bool,
    pub path_offset_curve: Option<VectorCurve>,
    pub time_mapping_curve: Option<FloatCurve>,
}

impl MoveToDynamicForce {
    pub fn set_target_location(&mut self, target: Vec3) {
        self.target_location = target;
    }

    fn map_fraction(&self, fraction: f32) -> f32 {
        match &self.time_mapping_curve {
            Some(curve) => curve.value_at_fraction(fraction),
            None => fraction,
        }
    }

    fn location_at(&self, fraction: f32) -> Vec3 {
        self.start_location.lerp(&self.target_location, fraction)
            + facing_path_offset(
                &self.path_offset_curve,
                self.start_location,
                self.target_location,
                fraction,
            )
    }

    fn force_at(
        &self,
        time: f32,
        duration: f32,
        simulation_time: f32,
        tick_time: f32,
        current_location: Vec3,
    ) -> Vec3 {
        if !(duration > SMALL_NUMBER && tick_time > SMALL_NUMBER) {
            return Vec3::zeros();
        }

        let fraction = self.map_fraction((time + simulation_time) / duration);
        let target = self.location_at(fraction);
        let force = (target - current_location) / tick_time;
        if self.restrict_speed_to_expected {
            let expected = self.location_at(self.map_fraction(time / duration));
            restrict_to_expected_speed(force, target, expected, tick_time)
        } else {
            force
        }
    }
}

/// Parametric jump arc of `distance` along the facing of `rotation`.
#[derive(Clone, Debug, PartialEq)]
pub struct JumpForce {
    pub rotation: Quat,
    pub distance: f32,
    /// Scales the arc's Z. Negative means the path curve's Z is used as-is.
    pub height: f32,
    pub disable_timeout: bool,
    pub path_offset_curve: Option<VectorCurve>,
    pub time_mapping_curve: Option<FloatCurve>,
}

impl Default for JumpForce {
    fn default() -> Self {
        Self {
            rotation: Quat::identity(),
            distance: -1.0,
            height: -1.0,
            disable_timeout: false,
            path_offset_curve: None,
            time_mapping_curve: None,
        }
    }
}

impl JumpForce {
    fn path_offset(&self, fraction: f32) -> Vec3 {
        let mut offset = match &self.path_offset_curve {
            Some(curve) => curve.value_at_fraction(fraction),
            None => {
                // Upside-down parabola through (0,0), (0.5,1), (1,0).
                let phi = 2.0 * fraction - 1.0;
                Vec3::new(0.0, 0.0, -(phi * phi) + 1.0)
            }
        };
        if self.height >= 0.0 {
            offset.z *= self.height;
        }
        offset
    }

    pub fn relative_location(&self, fraction: f32) -> Vec3 {
        let facing_space = Vec3::new(fraction * self.distance, 0.0, 0.0) + self.path_offset(fraction);
        without_pitch(&self.rotation) * facing_space
    }

    fn force_at(&self, time: f32, duration: f32, simulation_time: f32, tick_time: f32) -> Vec3 {
        if !(duration > SMALL_NUMBER && tick_time > SMALL_NUMBER && simulation_time > SMALL_NUMBER) {
            return Vec3::zeros();
        }

        let mut current_fraction = time / duration;
        let mut target_fraction = (time + simulation_time) / duration;

        // Past the end, keep sampling the last stretch so the exit velocity carries on.
        if target_fraction > 1.0 {
            let past = target_fraction - 1.0;
            target_fraction -= past;
            current_fraction -= past;
        }

        if let Some(curve) = &self.time_mapping_curve {
            current_fraction = curve.value_at_fraction(current_fraction);
            target_fraction = curve.value_at_fraction(target_fraction);
        }

        (self.relative_location(target_fraction) - self.relative_location(current_fraction))
            / tick_time
    }
}

/// Closed set of source variants.
#[derive(Clone, Debug, PartialEq)]
pub enum SourceKind {
    ConstantForce(ConstantForce),
    RadialForce(RadialForce),
    MoveTo(MoveToForce),
    MoveToDynamic(MoveToDynamicForce),
    Jump(JumpForce),
}

impl SourceKind {
    pub fn name(&self) -> &'static str {
        match self {
            SourceKind::ConstantForce(_) => "ConstantForce",
            SourceKind::RadialForce(_) => "RadialForce",
            SourceKind::MoveTo(_) => "MoveToForce",
            SourceKind::MoveToDynamic(_) => "MoveToDynamicForce",
            SourceKind::Jump(_) => "JumpForce",
        }
    }

    pub fn same_variant(&self, other: &SourceKind) -> bool {
        std::mem::discriminant(self) == std::mem::discriminant(other)
    }

    fn requires_duration(&self) -> bool {
        matches!(
            self,
            SourceKind::MoveTo(_) | SourceKind::MoveToDynamic(_) | SourceKind::Jump(_)
        )
    }

    fn matches(&self, other: &SourceKind) -> bool {
        match (self, other) {
            (SourceKind::ConstantForce(a), SourceKind::ConstantForce(b)) => {
                points_are_near(&a.force, &b.force, 0.1) && a.strength_over_time == b.strength_over_time
            }
            (SourceKind::RadialForce(a), SourceKind::RadialForce(b)) => {
                a.is_push == b.is_push
                    && a.no_z_force == b.no_z_force
                    && a.use_fixed_world_direction == b.use_fixed_world_direction
                    && a.strength_distance_falloff == b.strength_distance_falloff
                    && a.strength_over_time == b.strength_over_time
                    && (a.location_actor == b.location_actor
                        || points_are_near(&a.location, &b.location, 1.0))
                    && (a.radius - b.radius).abs() <= SMALL_NUMBER
                    && (a.strength - b.strength).abs() <= SMALL_NUMBER
                    && rotations_equal(&a.fixed_world_direction, &b.fixed_world_direction, 3.0)
            }
            (SourceKind::MoveTo(a), SourceKind::MoveTo(b)) => {
                a.restrict_speed_to_expected == b.restrict_speed_to_expected
                    && a.path_offset_curve == b.path_offset_curve
                    && points_are_near(&a.target_location, &b.target_location, 0.1)
            }
            // Start and target move at runtime, so they are state, not identity.
            (SourceKind::MoveToDynamic(a), SourceKind::MoveToDynamic(b)) => {
                a.restrict_speed_to_expected == b.restrict_speed_to_expected
                    && a.path_offset_curve == b.path_offset_curve
                    && a.time_mapping_curve == b.time_mapping_curve
            }
            (SourceKind::Jump(a), SourceKind::Jump(b)) => {
                a.disable_timeout == b.disable_timeout
                    && a.path_offset_curve == b.path_offset_curve
                    && a.time_mapping_curve == b.time_mapping_curve
                    && (a.distance - b.distance).abs() <= SMALL_NUMBER
                    && (a.height - b.height).abs() <= SMALL_NUMBER
                    && rotations_equal(&a.rotation, &b.rotation, 1.0)
            }
            _ => false,
        }
    }
}

/// One root-motion source: shared bookkeeping plus its variant parameters.
#[derive(Clone, Debug, PartialEq)]
pub struct RootMotionSource {
    /// Higher wins when several override sources are active.
    pub priority: u16,
    pub local_id: SourceId,
    pub accumulate_mode: AccumulateMode,
    /// Stable cross-machine identity; local ids are not.
    pub instance_name: Option<String>,
    /// Absolute movement time the source activates at, or [`INVALID_START_TIME`].
    pub start_time: f32,
    current_time: f32,
    previous_time: f32,
    /// Negative disables the timeout.
    pub duration: f32,
    pub in_local_space: bool,
    pub settings: SourceSettings,
    pub status: SourceStatusFlags,
    pub finish_velocity: FinishVelocity,
    pub(crate) needs_simulated_catchup: bool,
    pub(crate) simulated_needs_smoothing: bool,
    root_motion: Transform,
    pub kind: SourceKind,
}

impl RootMotionSource {
    pub fn new(kind: SourceKind) -> Self {
        let mut settings = SourceSettings::default();
        // Constant and jump forces keep their full velocity through the last tick.
        if matches!(kind, SourceKind::ConstantForce(_) | SourceKind::Jump(_)) {
            settings.add(SourceSetting::DisablePartialEndTick);
        }

        Self {
            priority: 0,
            local_id: INVALID_SOURCE_ID,
            accumulate_mode: AccumulateMode::Override,
            instance_name: None,
            start_time: INVALID_START_TIME,
            current_time: 0.0,
            previous_time: 0.0,
            duration: -1.0,
            in_local_space: false,
            settings,
            status: SourceStatusFlags::default(),
            finish_velocity: FinishVelocity::default(),
            needs_simulated_catchup: false,
            simulated_needs_smoothing: false,
            root_motion: Transform::identity(),
            kind,
        }
    }

    pub fn constant_force(force: Vec3, duration: f32) -> Self {
        Self::new(SourceKind::ConstantForce(ConstantForce {
            force,
            strength_over_time: None,
        }))
        .with_duration(duration)
    }

    pub fn move_to(start: Vec3, target: Vec3, duration: f32) -> Self {
        Self::new(SourceKind::MoveTo(MoveToForce {
            start_location: start,
            target_location: target,
            ..MoveToForce::default()
        }))
        .with_duration(duration)
    }

    pub fn jump(rotation: Quat, distance: f32, height: f32, duration: f32) -> Self {
        Self::new(SourceKind::Jump(JumpForce {
            rotation,
            distance,
            height,
            ..JumpForce::default()
        }))
        .with_duration(duration)
    }

    pub fn with_priority(mut self, priority: u16) -> Self {
        self.priority = priority;
        self
    }

    pub fn with_mode(mut self, mode: AccumulateMode) -> Self {
        self.accumulate_mode = mode;
        self
    }

    pub fn with_duration(mut self, duration: f32) -> Self {
        self.duration = duration;
        self
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        let name = name.into();
        self.instance_name = (!name.is_empty()).then_some(name);
        self
    }

    pub fn with_start_time(mut self, start_time: f32) -> Self {
        self.start_time = start_time;
        self
    }

    pub fn with_setting(mut self, setting: SourceSetting, on: bool) -> Self {
        self.settings.set(setting, on);
        self
    }

    pub fn with_finish_velocity(mut self, finish_velocity: FinishVelocity) -> Self {
        self.finish_velocity = finish_velocity;
        self
    }

    pub fn with_local_space(mut self, in_local_space: bool) -> Self {
        self.in_local_space = in_local_space;
        self
    }

    pub fn time(&self) -> f32 {
        self.current_time
    }

    pub fn previous_time(&self) -> f32 {
        self.previous_time
    }

    pub fn is_start_time_valid(&self) -> bool {
        self.start_time != INVALID_START_TIME
    }

    pub fn is_time_out_enabled(&self) -> bool {
        if matches!(&self.kind, SourceKind::Jump(jump) if jump.disable_timeout) {
            return false;
        }
        self.duration >= 0.0
    }

    pub fn is_finished(&self) -> bool {
        self.status.has(SourceStatus::Finished)
    }

    pub fn is_marked_for_removal(&self) -> bool {
        self.status.has(SourceStatus::MarkedForRemoval)
    }

    pub fn is_prepared(&self) -> bool {
        self.status.has(SourceStatus::Prepared)
    }

    pub fn needs_simulated_catchup(&self) -> bool {
        self.needs_simulated_catchup
    }

    /// Transform computed by the last prepare. Translation is a velocity.
    pub fn root_motion(&self) -> &Transform {
        &self.root_motion
    }

    /// Advance the time cursor and re-evaluate the timeout.
    pub fn set_time(&mut self, time: f32) {
        self.previous_time = self.current_time;
        self.current_time = time;

        if self.is_time_out_enabled() {
            let timed_out = self.current_time >= self.duration;
            self.status.set(SourceStatus::Finished, timed_out);
        }
    }

    /// Compute this tick's contribution and advance time by `simulation_time`.
    pub fn prepare_root_motion<B: BodyAccess + ?Sized>(
        &mut self,
        simulation_time: f32,
        movement_tick_time: f32,
        body: &B,
    ) {
        self.root_motion = Transform::identity();

        if self.kind.requires_duration() && !(self.duration > SMALL_NUMBER) {
            log::error!("{self} prepared with invalid duration");
            debug_assert!(false, "{} prepared with invalid duration", self.kind.name());
        }

        let (time, duration) = (self.current_time, self.duration);
        let force = match &self.kind {
            SourceKind::ConstantForce(c) => {
                c.force_at(time, duration, simulation_time, movement_tick_time)
            }
            SourceKind::RadialForce(r) => {
                r.force_at(time, duration, simulation_time, movement_tick_time, body)
            }
            SourceKind::MoveTo(m) => {
                m.force_at(time, duration, simulation_time, movement_tick_time, body.location())
            }
            SourceKind::MoveToDynamic(m) => {
                m.force_at(time, duration, simulation_time, movement_tick_time, body.location())
            }
            SourceKind::Jump(j) => j.force_at(time, duration, simulation_time, movement_tick_time),
        };
        self.root_motion.translation = force;

        self.set_time(time + simulation_time);
    }

    /// Same logical source, ignoring time-varying state.
    pub fn matches(&self, other: &RootMotionSource) -> bool {
        self.kind.same_variant(&other.kind)
            && self.priority == other.priority
            && self.accumulate_mode == other.accumulate_mode
            && self.in_local_space == other.in_local_space
            && self.instance_name == other.instance_name
            && (self.duration - other.duration).abs() <= SMALL_NUMBER
            && self.kind.matches(&other.kind)
    }

    pub fn matches_and_has_same_state(&self, other: &RootMotionSource) -> bool {
        if !self.matches(other) {
            return false;
        }
        if self.status != other.status || self.current_time != other.current_time {
            return false;
        }
        match (&self.kind, &other.kind) {
            (SourceKind::MoveToDynamic(a), SourceKind::MoveToDynamic(b)) => {
                points_are_near(&a.start_location, &b.start_location, KINDA_SMALL_NUMBER)
                    && points_are_near(&a.target_location, &b.target_location, KINDA_SMALL_NUMBER)
            }
            _ => true,
        }
    }

    /// Adopt status and time from a matching source. Returns false for a different variant.
    pub fn update_state_from(&mut self, other: &RootMotionSource, mark_for_catchup: bool) -> bool {
        if !self.kind.same_variant(&other.kind) {
            log::error!("{self} updated from non-matching source {other}");
            debug_assert!(false, "update_state_from called with a different source variant");
            return false;
        }

        self.needs_simulated_catchup = mark_for_catchup;

        let was_marked_for_removal = self.is_marked_for_removal();
        self.status = other.status;
        // Removal is never undone by a state update.
        if was_marked_for_removal {
            self.status.add(SourceStatus::MarkedForRemoval);
        }

        self.set_time(other.current_time);

        if let (SourceKind::MoveToDynamic(mine), SourceKind::MoveToDynamic(theirs)) =
            (&mut self.kind, &other.kind)
        {
            mine.start_location = theirs.start_location;
            mine.target_location = theirs.target_location;
        }
        true
    }

    pub(crate) fn set_time_raw(&mut self, current: f32) {
        self.current_time = current;
    }
}

impl fmt::Display for RootMotionSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "[{}] {} {} prio {} {:?} status {:#05b} time {:.3}/{:.3}",
            self.local_id,
            self.kind.name(),
            self.instance_name.as_deref().unwrap_or("-"),
            self.priority,
            self.accumulate_mode,
            self.status.bits,
            self.current_time,
            self.duration,
        )
    }
}

/// Hands out local source ids. Owned by whoever owns the movement session.
///
/// Ids wrap after 65535 allocations, so a very long-lived source can share an id with a
/// new one. That is accepted rather than tracking live ids.
#[derive(Clone, Debug, Default)]
pub struct SourceIdAllocator {
    last: SourceId,
}

impl SourceIdAllocator {
    pub fn next_id(&mut self) -> SourceId {
        self.last = self.last.wrapping_add(1);
        if self.last == INVALID_SOURCE_ID {
            self.last = self.last.wrapping_add(1);
        }
        self.last
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::body::BodyState;
    use crate::math::from_euler;
    use approx::{assert_abs_diff_eq, assert_relative_eq};
    use std::f32::consts::FRAC_PI_2;

    #[test]
    fn constant_force_finishes_on_tenth_tick_without_partial_end() {
        let body = BodyState::default();
        let mut source = RootMotionSource::constant_force(Vec3::new(0.0, 0.0, 500.0), 1.0);
        assert!(source.settings.has(SourceSetting::DisablePartialEndTick));

        let mut displacement = Vec3::zeros();
        for tick in 1..=10 {
            source.prepare_root_motion(0.1, 0.1, &body);
            displacement += source.root_motion().translation * 0.1;
            assert_eq!(source.is_finished(), tick == 10, "tick {tick}");
        }
        assert_eq!(displacement, Vec3::new(0.0, 0.0, 500.0));
    }

    #[test]
    fn constant_force_scales_by_simulation_ratio() {
        let body = BodyState::default();
        let mut source = RootMotionSource::constant_force(Vec3::new(2.0, 0.0, 0.0), -1.0);
        source.prepare_root_motion(0.3, 0.1, &body);
        assert_relative_eq!(source.root_motion().translation.x, 6.0, epsilon = 1e-5);

        // Zero tick time means no scaling.
        source.prepare_root_motion(0.3, 0.0, &body);
        assert_relative_eq!(source.root_motion().translation.x, 2.0, epsilon = 1e-6);
    }

    #[test]
    fn constant_force_strength_curve_uses_normalized_time() {
        let body = BodyState::default();
        let mut source = RootMotionSource::new(SourceKind::ConstantForce(ConstantForce {
            force: Vec3::new(10.0, 0.0, 0.0),
            strength_over_time: Some(FloatCurve::new([(0.0, 1.0), (1.0, 0.0)])),
        }))
        .with_duration(2.0);
        source.set_time(1.0);
        source.prepare_root_motion(0.1, 0.1, &body);
        assert_relative_eq!(source.root_motion().translation.x, 5.0, epsilon = 1e-5);
    }

    #[test]
    fn radial_pull_points_at_location_and_push_away() {
        let body = BodyState::at(Vec3::new(3.0, 0.0, 0.0));
        let radial = RadialForce {
            location: Vec3::zeros(),
            radius: 10.0,
            strength: 4.0,
            is_push: false,
            ..RadialForce::default()
        };
        let mut pull = RootMotionSource::new(SourceKind::RadialForce(radial.clone()));
        pull.prepare_root_motion(0.1, 0.1, &body);
        assert_relative_eq!(pull.root_motion().translation, Vec3::new(-4.0, 0.0, 0.0), epsilon = 1e-5);

        let mut push = RootMotionSource::new(SourceKind::RadialForce(RadialForce {
            is_push: true,
            ..radial
        }));
        push.prepare_root_motion(0.1, 0.1, &body);
        assert_relative_eq!(push.root_motion().translation, Vec3::new(4.0, 0.0, 0.0), epsilon = 1e-5);
    }

    #[test]
    fn radial_outside_radius_and_no_z() {
        let far = BodyState::at(Vec3::new(20.0, 0.0, 0.0));
        let mut source = RootMotionSource::new(SourceKind::RadialForce(RadialForce {
            radius: 10.0,
            strength: 4.0,
            ..RadialForce::default()
        }));
        source.prepare_root_motion(0.1, 0.1, &far);
        assert_eq!(source.root_motion().translation, Vec3::zeros());

        let below = BodyState::at(Vec3::new(0.0, 0.0, -2.0));
        let mut flat = RootMotionSource::new(SourceKind::RadialForce(RadialForce {
            radius: 10.0,
            strength: 4.0,
            no_z_force: true,
            ..RadialForce::default()
        }));
        flat.prepare_root_motion(0.1, 0.1, &below);
        assert_eq!(flat.root_motion().translation.z, 0.0);
    }

    #[test]
    fn radial_falloff_reduces_strength() {
        let body = BodyState::at(Vec3::new(5.0, 0.0, 0.0));
        let mut source = RootMotionSource::new(SourceKind::RadialForce(RadialForce {
            radius: 10.0,
            strength: 4.0,
            strength_distance_falloff: Some(FloatCurve::new([(0.0, 1.0), (1.0, 0.0)])),
            ..RadialForce::default()
        }));
        source.prepare_root_motion(0.1, 0.1, &body);
        assert_relative_eq!(source.root_motion().translation.norm(), 2.0, epsilon = 1e-5);
    }

    #[test]
    fn move_to_reaches_target_in_duration() {
        let mut body = BodyState::default();
        let target = Vec3::new(4.0, 2.0, 0.0);
        let mut source = RootMotionSource::move_to(Vec3::zeros(), target, 1.0);
        for _ in 0..4 {
            source.prepare_root_motion(0.25, 0.25, &body);
            body.location += source.root_motion().translation * 0.25;
        }
        assert_abs_diff_eq!(body.location, target, epsilon = 1e-4);
        assert!(source.is_finished());
    }

    #[test]
    fn move_to_speed_restriction_caps_catch_up() {
        // Body stuck behind the ideal path: unrestricted force would be large.
        let body = BodyState::at(Vec3::new(-10.0, 0.0, 0.0));
        let mut source = RootMotionSource::new(SourceKind::MoveTo(MoveToForce {
            start_location: Vec3::zeros(),
            target_location: Vec3::new(10.0, 0.0, 0.0),
            restrict_speed_to_expected: true,
            path_offset_curve: None,
        }))
        .with_duration(1.0);
        source.prepare_root_motion(0.1, 0.1, &body);
        assert_relative_eq!(source.root_motion().translation.norm(), 10.0, epsilon = 1e-3);
    }

    #[test]
    fn move_to_path_offset_is_in_facing_frame() {
        let body = BodyState::default();
        let mut source = RootMotionSource::new(SourceKind::MoveTo(MoveToForce {
            start_location: Vec3::zeros(),
            target_location: Vec3::new(0.0, 10.0, 0.0),
            restrict_speed_to_expected: false,
            // Constant sideways offset of 1 along facing +Y.
            path_offset_curve: Some(VectorCurve::new([
                (0.0, Vec3::new(0.0, 1.0, 0.0)),
                (1.0, Vec3::new(0.0, 1.0, 0.0)),
            ])),
        }))
        .with_duration(1.0);
        source.prepare_root_motion(0.5, 0.5, &body);
        // Facing +Y, so facing-space +Y is world -X.
        let expected = (Vec3::new(-1.0, 5.0, 0.0) - body.location) / 0.5;
        assert_abs_diff_eq!(source.root_motion().translation, expected, epsilon = 1e-4);
    }

    #[test]
    fn move_to_dynamic_follows_retargeting() {
        let body = BodyState::default();
        let mut source = RootMotionSource::new(SourceKind::MoveToDynamic(MoveToDynamicForce {
            target_location: Vec3::new(10.0, 0.0, 0.0),
            ..MoveToDynamicForce::default()
        }))
        .with_duration(1.0);
        if let SourceKind::MoveToDynamic(dynamic) = &mut source.kind {
            dynamic.set_target_location(Vec3::new(0.0, 10.0, 0.0));
        }
        source.prepare_root_motion(0.5, 0.5, &body);
        assert_abs_diff_eq!(source.root_motion().translation, Vec3::new(0.0, 10.0, 0.0), epsilon = 1e-4);
    }

    #[test]
    #[cfg_attr(debug_assertions, should_panic)]
    fn move_to_without_duration_is_a_contract_violation() {
        let body = BodyState::default();
        let mut source = RootMotionSource::move_to(Vec3::zeros(), Vec3::x(), 0.0);
        source.prepare_root_motion(0.1, 0.1, &body);
        // Release builds skip the contribution but still advance time.
        assert_eq!(source.root_motion().translation, Vec3::zeros());
        assert_relative_eq!(source.time(), 0.1);
    }

    #[test]
    fn jump_follows_default_parabola() {
        let jump = JumpForce {
            rotation: from_euler(0.0, 0.0, FRAC_PI_2),
            distance: 4.0,
            height: 2.0,
            ..JumpForce::default()
        };
        assert_abs_diff_eq!(jump.relative_location(0.5), Vec3::new(0.0, 2.0, 2.0), epsilon = 1e-5);
        assert_abs_diff_eq!(jump.relative_location(1.0), Vec3::new(0.0, 4.0, 0.0), epsilon = 1e-5);
    }

    #[test]
    fn jump_past_duration_keeps_exit_velocity() {
        let body = BodyState::default();
        let mut source = RootMotionSource::jump(Quat::identity(), 4.0, 2.0, 1.0);
        if let SourceKind::Jump(jump) = &mut source.kind {
            jump.disable_timeout = true;
        }
        assert!(!source.is_time_out_enabled());

        source.set_time(0.9);
        source.prepare_root_motion(0.1, 0.1, &body);
        let exit = source.root_motion().translation;
        source.prepare_root_motion(0.1, 0.1, &body);
        assert_abs_diff_eq!(source.root_motion().translation, exit, epsilon = 1e-3);
        assert!(!source.is_finished());
    }

    #[test]
    fn set_time_sets_and_clears_finished() {
        let mut source = RootMotionSource::constant_force(Vec3::x(), 1.0);
        source.set_time(1.5);
        assert!(source.is_finished());
        source.set_time(0.5);
        assert!(!source.is_finished());
        assert_eq!(source.previous_time(), 1.5);
    }

    #[test]
    fn matches_ignores_time_but_same_state_does_not() {
        let a = RootMotionSource::constant_force(Vec3::new(1.0, 0.0, 0.0), 1.0).with_name("dash");
        let mut b = a.clone();
        b.set_time(0.4);
        assert!(a.matches(&b));
        assert!(!a.matches_and_has_same_state(&b));

        let c = RootMotionSource::constant_force(Vec3::new(1.5, 0.0, 0.0), 1.0).with_name("dash");
        assert!(!a.matches(&c));
    }

    #[test]
    fn update_state_keeps_removal_mark_and_flags_catchup() {
        let mut local = RootMotionSource::constant_force(Vec3::x(), 2.0);
        local.set_time(1.0);
        local.status.add(SourceStatus::MarkedForRemoval);
        let mut server = local.clone();
        server.status.clear();
        server.set_time(0.6);

        assert!(local.update_state_from(&server, true));
        assert!(local.is_marked_for_removal());
        assert!(local.needs_simulated_catchup());
        assert_relative_eq!(local.time(), 0.6);
        assert_relative_eq!(local.previous_time(), 1.0);
    }

    #[test]
    fn allocator_skips_invalid_id_on_wrap() {
        let mut ids = SourceIdAllocator { last: u16::MAX - 1 };
        assert_eq!(ids.next_id(), u16::MAX);
        assert_eq!(ids.next_id(), 1);
    }
}
