//! Simulated proxies: remote characters driven by replicated state instead of input.

use shared::constants::KINDA_SMALL_NUMBER;
use shared::math::{canonical_down, nearly_equal};
use shared::{
    BaseId, BaseLookup, BodyState, MovementMode, MovementSweep, MoverState, Quat, RootMotionGroup,
    SourceId, SourceIdAllocator, StepInput, StepOutcome, Transform, Vec3, step_movement,
};

use super::montage::{MontageTrack, RepRootMotion, RootMotionRepMove};
use crate::config::ClientConfig;
use crate::movement::id_mapping::RootMotionIdMappings;

/// Replicated movement of a simulated proxy.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct ReplicatedMovement {
    pub location: Vec3,
    pub rotation: Quat,
    pub velocity: Vec3,
    pub movement_mode: MovementMode,
    pub gravity_direction: Vec3,
}

impl Default for ReplicatedMovement {
    fn default() -> Self {
        Self {
            location: Vec3::zeros(),
            rotation: Quat::identity(),
            velocity: Vec3::zeros(),
            movement_mode: MovementMode::Walking,
            gravity_direction: canonical_down(),
        }
    }
}

/// Conditions raised by network updates and consumed by the next simulated tick.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct ProxyNetworkFlags {
    pub gravity_direction_changed: bool,
    pub movement_mode_changed: bool,
    pub update_received: bool,
    pub just_teleported: bool,
}

pub struct SimulatedProxy {
    config: ClientConfig,
    state: MoverState,
    movement_base: Option<BaseId>,
    ids: SourceIdAllocator,
    id_mappings: RootMotionIdMappings,
    replicated: ReplicatedMovement,
    pre_net_gravity: Vec3,
    pre_net_mode: MovementMode,
    rep_moves: Vec<RootMotionRepMove>,
    flags: ProxyNetworkFlags,
}

impl SimulatedProxy {
    pub fn new(config: ClientConfig, body: BodyState) -> Self {
        let replicated = ReplicatedMovement {
            location: body.location,
            rotation: body.rotation,
            velocity: body.velocity,
            ..ReplicatedMovement::default()
        };
        Self {
            state: MoverState::new(body, &config.movement),
            id_mappings: RootMotionIdMappings::new(config.id_mapping_validity),
            config,
            movement_base: None,
            ids: SourceIdAllocator::default(),
            pre_net_gravity: replicated.gravity_direction,
            pre_net_mode: replicated.movement_mode,
            replicated,
            rep_moves: Vec::new(),
            flags: ProxyNetworkFlags::default(),
        }
    }

    pub fn state(&self) -> &MoverState {
        &self.state
    }

    pub fn root_motion(&self) -> &RootMotionGroup {
        &self.state.root_motion
    }

    pub fn movement_base(&self) -> Option<BaseId> {
        self.movement_base
    }

    pub fn network_flags(&self) -> ProxyNetworkFlags {
        self.flags
    }

    pub fn rep_moves(&self) -> &[RootMotionRepMove] {
        &self.rep_moves
    }

    pub fn id_mappings(&self) -> &RootMotionIdMappings {
        &self.id_mappings
    }

    /// Remember the replicated values an update is about to overwrite.
    pub fn pre_net_receive(&mut self) {
        self.pre_net_gravity = self.replicated.gravity_direction;
        self.pre_net_mode = self.replicated.movement_mode;
    }

    /// The body follows replicated movement unless root motion is being replayed.
    pub fn receive_replicated_movement(&mut self, movement: ReplicatedMovement) {
        self.replicated = movement;
        if !self.rep_moves.is_empty() {
            return;
        }

        let body = &mut self.state.body;
        if !nearly_equal(&body.location, &movement.location, KINDA_SMALL_NUMBER) {
            self.flags.just_teleported = true;
        }
        body.location = movement.location;
        body.rotation = movement.rotation;
        body.velocity = movement.velocity;
    }

    pub fn post_net_receive(&mut self) {
        let gravity_changed = !nearly_equal(
            &self.pre_net_gravity,
            &self.replicated.gravity_direction,
            KINDA_SMALL_NUMBER,
        );
        let mode_changed = self.pre_net_mode != self.replicated.movement_mode
            || self.state.mode != self.replicated.movement_mode;

        if gravity_changed {
            tracing::debug!(
                from = ?self.pre_net_gravity,
                to = ?self.replicated.gravity_direction,
                "replicated gravity direction changed"
            );
        }

        let flags = &mut self.flags;
        flags.gravity_direction_changed |= gravity_changed;
        flags.movement_mode_changed |= mode_changed;
        flags.update_received |= mode_changed || flags.just_teleported || gravity_changed;
    }

    /// Buffer a replicated montage snapshot, or forget them all once root motion stopped.
    pub fn on_rep_root_motion(&mut self, root_motion: RepRootMotion, world_time: f32) {
        if root_motion.is_active {
            let max_age = self.config.root_motion_rep_move_max_age;
            self.rep_moves.retain(|m| world_time - m.time <= max_age);
            self.rep_moves.push(RootMotionRepMove {
                time: world_time,
                root_motion,
            });
        } else {
            self.rep_moves.clear();
        }
        self.flags.update_received = true;
    }

    /// Rewind to the newest compatible replicated snapshot and replay the montage from there
    /// to the local track position. Returns whether a snapshot was used.
    ///
    /// Without a compatible snapshot nothing is corrected this tick.
    pub fn simulated_root_motion_position_fixup<T, L, S>(
        &mut self,
        world_time: f32,
        track: &T,
        bases: &L,
        sweep: &S,
    ) -> bool
    where
        T: MontageTrack + ?Sized,
        L: BaseLookup + ?Sized,
        S: MovementSweep + ?Sized,
    {
        let Some(montage) = track.montage() else {
            return false;
        };
        let client_position = track.position();
        let play_rate = track.play_rate();
        let max_age = self.config.root_motion_rep_move_max_age;

        let Some(index) = self.rep_moves.iter().rposition(|m| {
            world_time - m.time <= max_age && m.can_replay_to(track, montage, client_position, play_rate)
        }) else {
            tracing::trace!(client_position, buffered = self.rep_moves.len(), "no usable root motion rep move");
            return false;
        };

        let Some(rep_move) = self.rep_moves.drain(..=index).last() else {
            return false;
        };
        let rep = rep_move.root_motion;
        if !self.restore_rep_move(&rep, bases) {
            return false;
        }

        let delta = client_position - rep.position;
        if delta.abs() > KINDA_SMALL_NUMBER && play_rate != 0.0 {
            let root_motion = track.extract_root_motion(rep.position, client_position);
            self.simulate_root_motion(delta / play_rate, &root_motion, sweep);
        }
        tracing::debug!(
            server = rep.position,
            client = client_position,
            "replayed root motion from server position"
        );
        true
    }

    /// Adopt a replicated root-motion group, marking adopted sources for catch-up.
    ///
    /// Server sources with no local counterpart are added locally; local sources the server
    /// no longer runs are removed.
    pub fn on_rep_root_motion_sources(&mut self, server_group: &RootMotionGroup, world_time: f32) {
        let mut server = server_group.clone();
        let unmatched = self
            .id_mappings
            .map_server_ids(&self.state.root_motion, &mut server, world_time);

        for missing in unmatched {
            let Some(slot) = server.active_mut().get_mut(missing.index) else {
                continue;
            };
            let local_id = self.state.root_motion.apply(slot.clone(), &mut self.ids);
            slot.local_id = local_id;
            self.id_mappings.insert(missing.server_id, local_id, world_time);
            tracing::trace!(server_id = missing.server_id, local_id, "adopted replicated root motion source");
        }

        let stale: Vec<SourceId> = self
            .state
            .root_motion
            .active()
            .iter()
            .map(|s| s.local_id)
            .filter(|id| !server.active().iter().any(|s| s.local_id == *id))
            .collect();
        for id in stale {
            tracing::trace!(local_id = id, "root motion source no longer replicated");
            self.state.root_motion.remove_by_id(id);
        }

        self.state.root_motion.update_state_from(&server, true);
        self.flags.update_received = true;
    }

    /// Advance the proxy one tick without input, consuming pending network flags.
    pub fn simulated_tick<S: MovementSweep + ?Sized>(&mut self, delta_time: f32, sweep: &S) -> StepOutcome {
        let flags = std::mem::take(&mut self.flags);
        if flags.gravity_direction_changed {
            self.state.gravity.set_direction(self.replicated.gravity_direction);
        }
        if flags.movement_mode_changed {
            self.state.mode = self.replicated.movement_mode;
        }

        let input = StepInput {
            acceleration: Vec3::zeros(),
            delta_time,
            movement_time: None,
        };
        step_movement(&mut self.state, &input, &self.config.movement, sweep)
    }

    fn restore_rep_move<L: BaseLookup + ?Sized>(&mut self, rep: &RepRootMotion, bases: &L) -> bool {
        let (location, rotation) = match rep.movement_base.filter(|_| rep.relative_position) {
            Some(base) => {
                let Some(transform) = bases.base_transform(base) else {
                    tracing::warn!(?base, "root motion rep move relative to unknown base");
                    return false;
                };
                let rotation = if rep.relative_rotation {
                    transform.rotation * rep.rotation
                } else {
                    rep.rotation
                };
                (transform.transform_point(rep.location), rotation)
            }
            None => (rep.location, rep.rotation),
        };

        let body = &mut self.state.body;
        body.location = location;
        body.rotation = rotation;
        body.velocity = rep.velocity;
        self.state.mode = rep.movement_mode;
        self.movement_base = rep.movement_base;
        self.flags.just_teleported = true;
        true
    }

    /// Move by component-local montage root motion over `delta_time`.
    fn simulate_root_motion<S: MovementSweep + ?Sized>(
        &mut self,
        delta_time: f32,
        root_motion: &Transform,
        sweep: &S,
    ) {
        let body = &mut self.state.body;
        let translation = body.rotation * root_motion.translation;
        if delta_time > 0.0 {
            body.velocity = translation / delta_time;
        }
        let up = -self.state.gravity.direction();
        let result = sweep.sweep(body.location, body.rotation, translation, up, delta_time);
        body.location += result.translation;
        body.rotation = body.rotation * root_motion.rotation;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::simulated::montage::MontageId;
    use approx::assert_abs_diff_eq;
    use shared::{RootMotionSource, SourceIdAllocator};

    /// One-second sections; root motion is 2 m of local +X per second of track.
    struct Track {
        position: f32,
        play_rate: f32,
        sections: usize,
        looping: bool,
    }

    impl Track {
        fn at(position: f32) -> Self {
            Self {
                position,
                play_rate: 1.0,
                sections: 2,
                looping: false,
            }
        }
    }

    impl MontageTrack for Track {
        fn montage(&self) -> Option<MontageId> {
            Some(MontageId(1))
        }

        fn position(&self) -> f32 {
            self.position
        }

        fn play_rate(&self) -> f32 {
            self.play_rate
        }

        fn section_index(&self, position: f32) -> Option<usize> {
            let index = position.floor();
            (index >= 0.0 && (index as usize) < self.sections).then_some(index as usize)
        }

        fn next_section(&self, section: usize) -> Option<usize> {
            if self.looping {
                Some(section)
            } else {
                Some(section + 1).filter(|&next| next < self.sections)
            }
        }

        fn section_length(&self, _section: usize) -> f32 {
            1.0
        }

        fn extract_root_motion(&self, from: f32, to: f32) -> Transform {
            Transform::from_translation(Vec3::new(2.0 * (to - from), 0.0, 0.0))
        }
    }

    fn rep(position: f32, location: Vec3) -> RepRootMotion {
        RepRootMotion {
            is_active: true,
            montage: Some(MontageId(1)),
            position,
            location,
            ..RepRootMotion::default()
        }
    }

    fn proxy() -> SimulatedProxy {
        SimulatedProxy::new(ClientConfig::default(), BodyState::default())
    }

    #[test]
    fn gravity_and_mode_changes_raise_flags() {
        let mut proxy = proxy();
        proxy.pre_net_receive();
        proxy.receive_replicated_movement(ReplicatedMovement {
            gravity_direction: Vec3::x(),
            movement_mode: MovementMode::Flying,
            ..ReplicatedMovement::default()
        });
        proxy.post_net_receive();

        let flags = proxy.network_flags();
        assert!(flags.gravity_direction_changed);
        assert!(flags.movement_mode_changed);
        assert!(flags.update_received);
        assert!(!flags.just_teleported);

        proxy.simulated_tick(0.1, &());
        assert_eq!(proxy.network_flags(), ProxyNetworkFlags::default());
        assert_abs_diff_eq!(proxy.state().gravity.direction(), Vec3::x(), epsilon = 1e-6);
        assert_eq!(proxy.state().mode, MovementMode::Flying);
    }

    #[test]
    fn location_jump_counts_as_teleport() {
        let mut proxy = proxy();
        proxy.pre_net_receive();
        proxy.receive_replicated_movement(ReplicatedMovement {
            location: Vec3::new(0.0, 0.0, 5.0),
            ..ReplicatedMovement::default()
        });
        proxy.post_net_receive();

        let flags = proxy.network_flags();
        assert!(flags.just_teleported);
        assert!(flags.update_received);
        assert!(!flags.gravity_direction_changed);
        assert_eq!(proxy.state().body.location, Vec3::new(0.0, 0.0, 5.0));
    }

    #[test]
    fn rep_moves_age_out_and_clear_when_inactive() {
        let mut proxy = proxy();
        proxy.on_rep_root_motion(rep(0.1, Vec3::zeros()), 1.0);
        proxy.on_rep_root_motion(rep(0.2, Vec3::zeros()), 1.3);
        proxy.on_rep_root_motion(rep(0.3, Vec3::zeros()), 1.6);
        assert_eq!(proxy.rep_moves().len(), 2);

        proxy.on_rep_root_motion(RepRootMotion::default(), 1.7);
        assert!(proxy.rep_moves().is_empty());
    }

    #[test]
    fn fixup_rewinds_and_replays_to_client_position() {
        let mut proxy = proxy();
        proxy.on_rep_root_motion(rep(0.1, Vec3::new(9.0, 0.0, 0.0)), 0.9);
        proxy.on_rep_root_motion(rep(0.2, Vec3::new(10.0, 0.0, 0.0)), 1.0);
        proxy.on_rep_root_motion(rep(0.7, Vec3::new(11.0, 0.0, 0.0)), 1.05);

        // The last snapshot is ahead of the local track and is skipped.
        assert!(proxy.simulated_root_motion_position_fixup(1.1, &Track::at(0.5), &(), &()));
        let body = &proxy.state().body;
        assert_abs_diff_eq!(body.location, Vec3::new(10.6, 0.0, 0.0), epsilon = 1e-4);
        assert_abs_diff_eq!(body.velocity, Vec3::new(2.0, 0.0, 0.0), epsilon = 1e-3);
        assert!(proxy.network_flags().just_teleported);
        assert_eq!(proxy.rep_moves().len(), 1);
        assert_eq!(proxy.rep_moves()[0].root_motion.position, 0.7);
    }

    #[test]
    fn fixup_rejects_other_section_and_other_lap() {
        let mut proxy = proxy();
        proxy.on_rep_root_motion(rep(0.9, Vec3::new(10.0, 0.0, 0.0)), 1.0);
        assert!(!proxy.simulated_root_motion_position_fixup(1.1, &Track::at(1.2), &(), &()));

        let looping = Track {
            looping: true,
            ..Track::at(0.95)
        };
        let mut proxy = self::proxy();
        proxy.on_rep_root_motion(rep(0.05, Vec3::new(10.0, 0.0, 0.0)), 1.0);
        assert!(!proxy.simulated_root_motion_position_fixup(1.1, &looping, &(), &()));
        assert_eq!(proxy.rep_moves().len(), 1);
        assert_eq!(proxy.state().body.location, Vec3::zeros());
    }

    #[test]
    fn fixup_ignores_stale_snapshots() {
        let mut proxy = proxy();
        proxy.on_rep_root_motion(rep(0.2, Vec3::new(10.0, 0.0, 0.0)), 1.0);
        assert!(!proxy.simulated_root_motion_position_fixup(1.8, &Track::at(0.5), &(), &()));
    }

    #[test]
    fn fixup_restores_base_relative_snapshot() {
        struct Lift;
        impl BaseLookup for Lift {
            fn base_transform(&self, _base: BaseId) -> Option<Transform> {
                Some(Transform::from_translation(Vec3::new(0.0, 0.0, 3.0)))
            }
        }

        let mut proxy = proxy();
        proxy.on_rep_root_motion(
            RepRootMotion {
                movement_base: Some(BaseId(2)),
                relative_position: true,
                ..rep(0.5, Vec3::new(1.0, 0.0, 0.0))
            },
            1.0,
        );
        assert!(proxy.simulated_root_motion_position_fixup(1.0, &Track::at(0.5), &Lift, &()));
        assert_abs_diff_eq!(proxy.state().body.location, Vec3::new(1.0, 0.0, 3.0), epsilon = 1e-5);
        assert_eq!(proxy.movement_base(), Some(BaseId(2)));
    }

    #[test]
    fn replicated_sources_are_adopted_for_catch_up() {
        let mut server = RootMotionGroup::default();
        let mut server_ids = SourceIdAllocator::default();
        server.apply(
            RootMotionSource::constant_force(Vec3::new(0.0, 3.0, 0.0), 2.0).with_name("dash"),
            &mut server_ids,
        );
        server.prepare(0.4, &BodyState::default(), None, false);
        server.active_mut()[0].local_id = 90;

        let mut proxy = proxy();
        proxy.on_rep_root_motion_sources(&server, 1.0);
        let adopted = &proxy.root_motion().active()[0];
        assert_eq!(proxy.root_motion().active().len(), 1);
        assert!(adopted.needs_simulated_catchup());
        assert_abs_diff_eq!(adopted.time(), 0.4, epsilon = 1e-6);
        assert_eq!(proxy.id_mappings().local_id_for(90), Some(adopted.local_id));
        assert!(proxy.network_flags().update_received);

        // Dropped on the server: removed locally.
        proxy.on_rep_root_motion_sources(&RootMotionGroup::default(), 1.1);
        assert!(proxy.root_motion().active()[0].is_marked_for_removal());
    }
}
