use crate::body::{BodyState, MovementMode};
use crate::config::MovementConfig;
use crate::gravity::GravityState;
use crate::math::{Quat, Vec3};
use crate::root_motion::RootMotionGroup;

/// Collision-resolved result of one sweep.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct SweepResult {
    /// Translation actually applied (world space).
    pub translation: Vec3,
    /// Whether the body ended on walkable ground.
    pub grounded: bool,
}

/// Moves the body's collision shape through the world.
pub trait MovementSweep {
    /// Sweep from `location` by `delta`. `up` is the opposite of the current gravity.
    fn sweep(&self, location: Vec3, rotation: Quat, delta: Vec3, up: Vec3, dt: f32) -> SweepResult;
}

/// Empty world: every move succeeds and nothing is ever ground.
impl MovementSweep for () {
    fn sweep(&self, _location: Vec3, _rotation: Quat, delta: Vec3, _up: Vec3, _dt: f32) -> SweepResult {
        SweepResult {
            translation: delta,
            grounded: false,
        }
    }
}

/// Everything one simulated body carries from tick to tick.
#[derive(Clone, Debug, Default)]
pub struct MoverState {
    pub body: BodyState,
    pub mode: MovementMode,
    pub gravity: GravityState,
    pub root_motion: RootMotionGroup,
}

impl MoverState {
    pub fn new(body: BodyState, config: &MovementConfig) -> Self {
        Self {
            body,
            root_motion: RootMotionGroup::new(config.root_motion),
            ..Self::default()
        }
    }
}

/// Input for one tick.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct StepInput {
    pub acceleration: Vec3,
    pub delta_time: f32,
    /// Movement clock at the start of the tick, when it is known (not replaying).
    pub movement_time: Option<f32>,
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct StepOutcome {
    pub translation: Vec3,
    pub grounded: bool,
}

/// Simulate one tick: root motion, input, gravity, collision, then source cleanup.
///
/// Server simulation, client prediction and client replay all run through this.
pub fn step_movement<S: MovementSweep + ?Sized>(
    state: &mut MoverState,
    input: &StepInput,
    config: &MovementConfig,
    sweep: &S,
) -> StepOutcome {
    let dt = input.delta_time.max(0.0);
    let MoverState {
        body,
        mode,
        gravity,
        root_motion,
    } = state;

    // 1) Last tick's additive contribution must not feed into this one.
    root_motion.restore_pre_additive_velocity(&mut body.velocity);

    // 2)
    root_motion.prepare(dt, &*body, input.movement_time, false);

    // 3) Override root motion replaces input driven velocity.
    let mut velocity = body.velocity;
    if root_motion.has_override_velocity() {
        root_motion.accumulate_override_velocity(&*body, &mut velocity);
    } else {
        let mut acceleration = input.acceleration;
        if acceleration.norm() > config.max_acceleration {
            acceleration = acceleration.normalize() * config.max_acceleration;
        }
        velocity += acceleration * dt;
    }

    // 4)
    let gravity_dir = gravity.direction();
    let override_owns_z =
        root_motion.has_override_velocity() && !root_motion.has_override_velocity_ignoring_z();
    if !override_owns_z {
        velocity += gravity_dir * config.gravity_mps2 * dt;
    }

    // 5)
    if root_motion.has_additive_velocity() {
        root_motion.apply_additive_velocity(&*body, &mut velocity);
    }

    // 6)
    let result = sweep.sweep(body.location, body.rotation, velocity * dt, -gravity_dir, dt);
    body.location += result.translation;
    if result.grounded {
        let into_ground = velocity.dot(&gravity_dir);
        if into_ground > 0.0 {
            velocity -= gravity_dir * into_ground;
        }
    }
    body.velocity = velocity;
    *mode = next_mode(*mode, result.grounded);

    // 7)
    if let Some(rotation) = root_motion.override_rotation() {
        body.rotation = rotation;
    }

    // 8)
    root_motion.cleanup_invalid(body);

    log::trace!(
        "step dt {dt:.4} loc {:?} vel {:?} grounded {}",
        body.location,
        body.velocity,
        result.grounded
    );

    StepOutcome {
        translation: result.translation,
        grounded: result.grounded,
    }
}

/// Walking and falling follow ground contact; other modes are left to their owners.
fn next_mode(mode: MovementMode, grounded: bool) -> MovementMode {
    match mode {
        MovementMode::Walking | MovementMode::NavWalking | MovementMode::Falling => {
            if grounded {
                if mode == MovementMode::NavWalking {
                    mode
                } else {
                    MovementMode::Walking
                }
            } else {
                MovementMode::Falling
            }
        }
        other => other,
    }
}
