//! Ordered, prioritized collection of root-motion sources owned by one moving body.

use crate::body::BodyAccess;
use crate::config::RootMotionConfig;
use crate::constants::{INVALID_SOURCE_ID, KINDA_SMALL_NUMBER};
use crate::math::{Quat, Vec3, clamp_2d, points_are_near};

use super::source::{
    AccumulateMode, FinishVelocityMode, RootMotionSource, SourceId, SourceIdAllocator,
    SourceSetting, SourceSettings, SourceStatus,
};

#[derive(Clone, Debug, Default)]
pub struct RootMotionGroup {
    /// Sorted by descending priority after every prepare.
    pub(crate) active: Vec<RootMotionSource>,
    /// Promoted to `active` on the next prepare.
    pub(crate) pending: Vec<RootMotionSource>,
    pub(crate) has_additive_sources: bool,
    pub(crate) has_override_sources: bool,
    pub(crate) has_override_sources_ignoring_z: bool,
    /// Velocity right before additive sources were last folded in.
    pub last_pre_additive_velocity: Vec3,
    pub is_additive_velocity_applied: bool,
    pub last_accumulated_settings: SourceSettings,
    pub config: RootMotionConfig,
}

impl RootMotionGroup {
    pub fn new(config: RootMotionConfig) -> Self {
        Self {
            config,
            ..Self::default()
        }
    }

    pub fn active(&self) -> &[RootMotionSource] {
        &self.active
    }

    pub fn pending(&self) -> &[RootMotionSource] {
        &self.pending
    }

    /// Active sources in place, e.g. to rewrite the ids of a received group.
    pub fn active_mut(&mut self) -> &mut [RootMotionSource] {
        &mut self.active
    }

    pub fn has_active_sources(&self) -> bool {
        !self.active.is_empty() || !self.pending.is_empty()
    }

    pub fn has_override_velocity(&self) -> bool {
        self.has_override_sources
    }

    pub fn has_override_velocity_ignoring_z(&self) -> bool {
        self.has_override_sources_ignoring_z
    }

    pub fn has_additive_velocity(&self) -> bool {
        self.has_additive_sources
    }

    pub fn has_velocity(&self) -> bool {
        self.has_override_velocity() || self.has_additive_velocity()
    }

    pub fn has_root_motion_to_apply(&self) -> bool {
        self.has_active_sources()
    }

    /// Queue a source for the next prepare and return its new local id.
    pub fn apply(&mut self, mut source: RootMotionSource, ids: &mut SourceIdAllocator) -> SourceId {
        let id = ids.next_id();
        source.local_id = id;
        log::trace!("root motion source added to pending: {source}");
        self.pending.push(source);
        id
    }

    fn all(&self) -> impl Iterator<Item = &RootMotionSource> {
        self.active.iter().chain(self.pending.iter())
    }

    fn all_mut(&mut self) -> impl Iterator<Item = &mut RootMotionSource> {
        self.active.iter_mut().chain(self.pending.iter_mut())
    }

    pub fn get(&self, name: &str) -> Option<&RootMotionSource> {
        self.all().find(|s| s.instance_name.as_deref() == Some(name))
    }

    pub fn get_mut(&mut self, name: &str) -> Option<&mut RootMotionSource> {
        self.all_mut().find(|s| s.instance_name.as_deref() == Some(name))
    }

    pub fn get_by_id(&self, id: SourceId) -> Option<&RootMotionSource> {
        self.all().find(|s| s.local_id == id)
    }

    pub fn get_by_id_mut(&mut self, id: SourceId) -> Option<&mut RootMotionSource> {
        self.all_mut().find(|s| s.local_id == id)
    }

    /// Mark every source with this instance name for removal. Empty names are ignored.
    pub fn remove(&mut self, name: &str) {
        if name.is_empty() {
            return;
        }
        for source in self.all_mut().filter(|s| s.instance_name.as_deref() == Some(name)) {
            source.status.add(SourceStatus::MarkedForRemoval);
        }
    }

    pub fn remove_by_id(&mut self, id: SourceId) {
        if id == INVALID_SOURCE_ID {
            return;
        }
        for source in self.all_mut().filter(|s| s.local_id == id) {
            source.status.add(SourceStatus::MarkedForRemoval);
        }
    }

    /// Promote pending sources, sort, and compute each unprepared source's contribution.
    ///
    /// `movement_time` is the body's movement clock at the start of this tick, when known;
    /// it drives partial activation of sources with a future start time.
    pub fn prepare<B: BodyAccess + ?Sized>(
        &mut self,
        delta_time: f32,
        body: &B,
        movement_time: Option<f32>,
        force_prepare_all: bool,
    ) {
        self.active.append(&mut self.pending);

        // Stable: equal priorities keep insertion order, which decides override ties.
        self.active.sort_by(|a, b| b.priority.cmp(&a.priority));

        self.has_override_sources = false;
        self.has_override_sources_ignoring_z = false;
        self.has_additive_sources = false;
        self.last_accumulated_settings.clear();

        let config = self.config;
        for source in &mut self.active {
            if !source.is_prepared() || force_prepare_all {
                let simulation_time = simulation_time_for(source, delta_time, movement_time, &config);

                source.simulated_needs_smoothing = false;
                source.prepare_root_motion(simulation_time, delta_time, body);
                self.last_accumulated_settings.union(source.settings);
                source.status.add(SourceStatus::Prepared);
                source.needs_simulated_catchup = false;
            }

            match source.accumulate_mode {
                AccumulateMode::Additive => self.has_additive_sources = true,
                AccumulateMode::Override => {
                    self.has_override_sources = true;
                    if source.settings.has(SourceSetting::IgnoreZAccumulate) {
                        self.has_override_sources_ignoring_z = true;
                    }
                }
            }
        }
    }

    /// Fold contributions of `mode` into `velocity`.
    ///
    /// Override applies only the highest-priority override source.
    pub fn accumulate_velocity<B: BodyAccess + ?Sized>(
        &self,
        mode: AccumulateMode,
        body: &B,
        velocity: &mut Vec3,
    ) {
        for source in self.active.iter().filter(|s| s.accumulate_mode == mode) {
            accumulate_from_source(source, body, velocity);
            if mode == AccumulateMode::Override {
                break;
            }
        }
    }

    pub fn accumulate_override_velocity<B: BodyAccess + ?Sized>(&self, body: &B, velocity: &mut Vec3) {
        self.accumulate_velocity(AccumulateMode::Override, body, velocity);
    }

    pub fn accumulate_additive_velocity<B: BodyAccess + ?Sized>(&self, body: &B, velocity: &mut Vec3) {
        self.accumulate_velocity(AccumulateMode::Additive, body, velocity);
    }

    /// Undo last tick's additive contribution before simulating a new tick.
    pub fn restore_pre_additive_velocity(&mut self, velocity: &mut Vec3) {
        if self.is_additive_velocity_applied {
            *velocity = self.last_pre_additive_velocity;
            self.is_additive_velocity_applied = false;
        }
    }

    /// Snapshot `velocity`, then add every additive source into it.
    pub fn apply_additive_velocity<B: BodyAccess + ?Sized>(&mut self, body: &B, velocity: &mut Vec3) {
        self.last_pre_additive_velocity = *velocity;
        self.accumulate_additive_velocity(body, velocity);
        self.is_additive_velocity_applied = true;
    }

    /// Sweep finished or removed sources, applying their finish-velocity policy to `body`.
    pub fn cleanup_invalid<B: BodyAccess + ?Sized>(&mut self, body: &mut B) {
        let mut velocity = body.velocity();
        let mut kept = Vec::with_capacity(self.active.len());

        for source in std::mem::take(&mut self.active) {
            if !source.is_finished() && !source.is_marked_for_removal() {
                kept.push(source);
                continue;
            }

            // Removing an additive source keeps its momentum rather than stopping dead.
            if source.accumulate_mode == AccumulateMode::Additive && self.is_additive_velocity_applied {
                accumulate_from_source(&source, &*body, &mut self.last_pre_additive_velocity);
            }

            let finish = source.finish_velocity;
            match finish.mode {
                FinishVelocityMode::ClampVelocity => {
                    // Only cap upward Z so a fall is never slowed.
                    velocity = clamp_2d(velocity, finish.clamp_velocity);
                    velocity.z = velocity.z.min(finish.clamp_velocity);
                    if self.is_additive_velocity_applied {
                        let snapshot = clamp_2d(self.last_pre_additive_velocity, finish.clamp_velocity);
                        self.last_pre_additive_velocity =
                            Vec3::new(snapshot.x, snapshot.y, snapshot.z.min(finish.clamp_velocity));
                    }
                }
                FinishVelocityMode::SetVelocity => {
                    velocity = finish.set_velocity;
                    if self.is_additive_velocity_applied {
                        self.last_pre_additive_velocity = finish.set_velocity;
                    }
                }
                FinishVelocityMode::MaintainLastRootMotionVelocity => {}
            }

            log::trace!("root motion source removed: {source}");
        }
        self.active = kept;

        self.pending.retain(|source| {
            let remove = source.is_finished() || source.is_marked_for_removal();
            if remove {
                log::trace!("pending root motion source removed: {source}");
            }
            !remove
        });

        body.set_velocity(velocity);
    }

    /// Adopt authoritative (or recorded) state from `other`, matched by local id.
    pub fn update_state_from(&mut self, other: &RootMotionGroup, mark_for_catchup: bool) {
        self.is_additive_velocity_applied = other.is_additive_velocity_applied;
        self.last_pre_additive_velocity = other.last_pre_additive_velocity;

        // Pending sources the other side already runs become active here too.
        let (promoted, still_pending): (Vec<_>, Vec<_>) =
            std::mem::take(&mut self.pending).into_iter().partition(|source| {
                source.local_id != INVALID_SOURCE_ID
                    && other.active.iter().any(|o| o.local_id == source.local_id)
            });
        self.pending = still_pending;
        for source in promoted {
            log::trace!("promoting pending root motion source during state update: {source}");
            self.active.push(source);
        }

        for theirs in other.active.iter().filter(|s| s.local_id != INVALID_SOURCE_ID) {
            let Some(index) = self.active.iter().position(|s| s.local_id == theirs.local_id) else {
                continue;
            };

            if !self.active[index].matches(theirs) {
                log::warn!(
                    "root motion source {} shares local id {} with non-matching {theirs}",
                    self.active[index],
                    theirs.local_id
                );
                self.log_match_candidates(theirs);
                continue;
            }

            let mine = &mut self.active[index];
            if mine.update_state_from(theirs, mark_for_catchup) {
                // New state must be prepared before it contributes.
                mine.status.remove(SourceStatus::Prepared);
                log::trace!("root motion source updated state: {mine}");
            } else {
                mine.status.add(SourceStatus::MarkedForRemoval);
                log::warn!("root motion source {mine} failed to update from matching source, marking for removal");
            }
        }
    }

    fn log_match_candidates(&self, theirs: &RootMotionSource) {
        let count = self.active.len();
        for (i, candidate) in self.active.iter().enumerate() {
            log::warn!(
                "[{}/{count}] {candidate}: matches by rules {}, by id {}",
                i + 1,
                candidate.matches(theirs),
                candidate.local_id == theirs.local_id
            );
        }
    }

    /// Rotation of the winning override source, if it carries one.
    pub fn override_rotation(&self) -> Option<Quat> {
        let source = self
            .active
            .iter()
            .find(|s| s.accumulate_mode == AccumulateMode::Override)?;
        let rotation = source.root_motion().rotation;
        (rotation.angle() > KINDA_SMALL_NUMBER).then_some(rotation)
    }

    pub fn needs_simulated_smoothing(&self) -> bool {
        self.active.iter().any(|s| s.simulated_needs_smoothing)
    }

    pub fn set_pending_min_start_times(&mut self, start_time: f32) {
        for source in &mut self.pending {
            let previous = source.start_time;
            source.start_time = previous.max(start_time);
            if previous != source.start_time {
                log::trace!("pending {source} start time moved from {previous} to {}", source.start_time);
            }
        }
    }

    /// Shift valid start times back after the movement clock wrapped by `delta_time`.
    pub fn apply_time_stamp_reset(&mut self, delta_time: f32) {
        for source in self.all_mut().filter(|s| s.is_start_time_valid()) {
            source.start_time -= delta_time;
        }
    }

    /// Drop active sources that never got a local id (unmapped server sources).
    pub fn cull_invalid_sources(&mut self) {
        self.active.retain(|source| {
            let valid = source.local_id != INVALID_SOURCE_ID;
            if !valid {
                log::trace!("culling root motion source without local id: {source}");
            }
            valid
        });
    }

    pub fn clear(&mut self) {
        self.active.clear();
        self.pending.clear();
        self.is_additive_velocity_applied = false;
        self.has_additive_sources = false;
        self.has_override_sources = false;
        self.has_override_sources_ignoring_z = false;
        self.last_accumulated_settings.clear();
    }

    /// Equality used for correction checks and saved-move comparison.
    pub fn same_state_as(&self, other: &RootMotionGroup) -> bool {
        fn lists_match(a: &[RootMotionSource], b: &[RootMotionSource]) -> bool {
            a.len() == b.len() && a.iter().zip(b).all(|(x, y)| x.matches_and_has_same_state(y))
        }

        self.has_additive_sources == other.has_additive_sources
            && self.has_override_sources == other.has_override_sources
            && self.has_override_sources_ignoring_z == other.has_override_sources_ignoring_z
            && self.is_additive_velocity_applied == other.is_additive_velocity_applied
            && points_are_near(&self.last_pre_additive_velocity, &other.last_pre_additive_velocity, 1.0)
            && lists_match(&self.active, &other.active)
            && lists_match(&self.pending, &other.pending)
    }
}

/// Simulation time for one source this tick after catch-up and partial-tick adjustment.
fn simulation_time_for(
    source: &RootMotionSource,
    delta_time: f32,
    movement_time: Option<f32>,
    config: &RootMotionConfig,
) -> f32 {
    let mut simulation_time = delta_time;

    // Rewound by an authoritative update: blend toward it instead of snapping.
    if source.needs_simulated_catchup {
        let gap = source.previous_time() - source.time();
        if gap > 0.0 {
            simulation_time += config.catch_up_time(gap);
        }
    }

    // Starts partway through this tick.
    if source.time() == 0.0 && source.is_start_time_valid() {
        if let Some(movement_time) = movement_time.filter(|t| *t >= 0.0) {
            if source.start_time > movement_time {
                let end = movement_time + simulation_time;
                simulation_time = if end <= source.start_time {
                    0.0
                } else {
                    end - source.start_time
                };
            }
        }
    }

    // Ends partway through this tick; overshoot slightly so it reliably finishes.
    if source.is_time_out_enabled()
        && !source.settings.has(SourceSetting::DisablePartialEndTick)
        && source.time() + simulation_time >= source.duration
    {
        simulation_time = source.duration - source.time() + KINDA_SMALL_NUMBER;
    }

    simulation_time.max(0.0)
}

fn accumulate_from_source<B: BodyAccess + ?Sized>(
    source: &RootMotionSource,
    body: &B,
    velocity: &mut Vec3,
) {
    let mut contribution = source.root_motion().translation;
    if source.in_local_space {
        contribution = body.rotation() * contribution;
    }

    let input = *velocity;
    match source.accumulate_mode {
        AccumulateMode::Override => *velocity = contribution,
        AccumulateMode::Additive => *velocity += contribution,
    }

    if source.settings.has(SourceSetting::IgnoreZAccumulate) {
        velocity.z = input.z;
    }
}
