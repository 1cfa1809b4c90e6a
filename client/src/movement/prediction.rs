//! Autonomous proxy prediction: simulate locally, send moves, reconcile with the server.

use std::collections::VecDeque;

use shared::constants::KINDA_SMALL_NUMBER;
use shared::gravity::facing_from_control;
use shared::math::{canonical_down, nearly_equal};
use shared::{
    BaseId, BaseLookup, BodyState, ClientAdjustment, MoveDataContainer, MoveResponse, MoveType,
    MovementSweep, MoverState, PackedBits, Quat, RootMotionGroup, RootMotionSource, SourceId,
    SourceIdAllocator, StepInput, Vec3, step_movement,
};

use super::id_mapping::RootMotionIdMappings;
use super::saved_move::{MoveInput, SavedMove};
use crate::config::ClientConfig;
use crate::error::{ResponseError, ResponseResult};

/// Montage track position and rotation from the last root-motion montage correction.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct MontageCorrection {
    pub track_position: f32,
    pub rotation: Quat,
}

pub struct ClientPrediction {
    config: ClientConfig,
    state: MoverState,
    movement_base: Option<BaseId>,
    ids: SourceIdAllocator,
    current_time_stamp: f32,
    time_since_send: f32,
    /// Sent and not yet acknowledged, oldest first.
    saved_moves: VecDeque<SavedMove>,
    /// Simulated but held back to be combined with the next move.
    pending_move: Option<SavedMove>,
    last_acked_move: Option<SavedMove>,
    id_mappings: RootMotionIdMappings,
    last_received_gravity: Vec3,
    gravity_direction_changed: bool,
    montage_correction: Option<MontageCorrection>,
}

impl ClientPrediction {
    pub fn new(config: ClientConfig, body: BodyState) -> Self {
        Self {
            state: MoverState::new(body, &config.movement),
            id_mappings: RootMotionIdMappings::new(config.id_mapping_validity),
            config,
            movement_base: None,
            ids: SourceIdAllocator::default(),
            current_time_stamp: 0.0,
            time_since_send: 0.0,
            saved_moves: VecDeque::new(),
            pending_move: None,
            last_acked_move: None,
            last_received_gravity: canonical_down(),
            gravity_direction_changed: false,
            montage_correction: None,
        }
    }

    pub fn state(&self) -> &MoverState {
        &self.state
    }

    pub fn root_motion(&self) -> &RootMotionGroup {
        &self.state.root_motion
    }

    pub fn root_motion_mut(&mut self) -> &mut RootMotionGroup {
        &mut self.state.root_motion
    }

    pub fn movement_base(&self) -> Option<BaseId> {
        self.movement_base
    }

    pub fn current_time_stamp(&self) -> f32 {
        self.current_time_stamp
    }

    pub fn saved_moves(&self) -> impl Iterator<Item = &SavedMove> {
        self.saved_moves.iter()
    }

    pub fn saved_move_count(&self) -> usize {
        self.saved_moves.len()
    }

    pub fn has_pending_move(&self) -> bool {
        self.pending_move.is_some()
    }

    pub fn last_acked_time_stamp(&self) -> Option<f32> {
        self.last_acked_move.as_ref().map(|m| m.time_stamp)
    }

    pub fn id_mappings(&self) -> &RootMotionIdMappings {
        &self.id_mappings
    }

    /// Set by a correction whose gravity differs from the previous one.
    pub fn gravity_direction_changed(&self) -> bool {
        self.gravity_direction_changed
    }

    /// Consume the gravity change signal, e.g. to re-derive floor state.
    pub fn take_gravity_direction_changed(&mut self) -> bool {
        std::mem::take(&mut self.gravity_direction_changed)
    }

    pub fn take_montage_correction(&mut self) -> Option<MontageCorrection> {
        self.montage_correction.take()
    }

    pub fn apply_root_motion_source(&mut self, source: RootMotionSource) -> SourceId {
        self.state.root_motion.apply(source, &mut self.ids)
    }

    /// Predicted gravity change, e.g. from entering a gravity volume.
    pub fn set_gravity_direction(&mut self, direction: Vec3) {
        self.state.gravity.set_direction(direction);
    }

    /// Simulate one tick and return the move packet to send, if this tick sends one.
    pub fn tick<L, S>(
        &mut self,
        delta_time: f32,
        input: &MoveInput,
        bases: &L,
        sweep: &S,
    ) -> Option<PackedBits>
    where
        L: BaseLookup + ?Sized,
        S: MovementSweep + ?Sized,
    {
        let max_delta_time = self.config.movement.max_move_delta_time;
        let delta_time = delta_time.min(max_delta_time);
        if !(delta_time > 0.0) {
            return None;
        }
        self.advance_time_stamp(delta_time);

        if self.saved_moves.len() >= self.config.max_saved_moves {
            tracing::warn!(
                count = self.saved_moves.len(),
                "hit the saved move limit, dropping unacknowledged moves"
            );
            self.saved_moves.clear();
        }

        let mut new_move = SavedMove::new(
            &self.state,
            self.movement_base,
            self.current_time_stamp,
            delta_time,
            input,
        );

        let combine = self
            .pending_move
            .as_ref()
            .is_some_and(|pending| pending.can_combine_with(&new_move, max_delta_time));
        if combine {
            if let Some(pending) = self.pending_move.take() {
                tracing::trace!(
                    pending = pending.time_stamp,
                    new = new_move.time_stamp,
                    "combining moves"
                );
                self.state.body = pending.start;
                self.state.mode = pending.start_mode;
                self.state.root_motion = pending.root_motion.clone();
                new_move = pending.combine_with(new_move);
            }
        }

        let movement_time = new_move.time_stamp - new_move.delta_time;
        self.perform_move(&new_move, Some(movement_time), sweep);
        new_move.record_end(&self.state);

        self.time_since_send += delta_time;
        if self.pending_move.is_none()
            && self.time_since_send < self.config.net_send_interval
            && new_move.can_delay_sending()
        {
            self.pending_move = Some(new_move);
            return None;
        }
        Some(self.send(new_move, bases))
    }

    /// Decode and apply a server response in its wire form.
    pub fn receive_response<L, S>(&mut self, bytes: &[u8], bases: &L, sweep: &S) -> ResponseResult<()>
    where
        L: BaseLookup + ?Sized,
        S: MovementSweep + ?Sized,
    {
        let response = PackedBits::from_wire(bytes, self.config.max_packed_bits)
            .and_then(|packed| MoveResponse::from_packed_bits(&packed))
            .map_err(|err| {
                tracing::warn!(%err, "dropping move response");
                ResponseError::from(err)
            })?;
        self.handle_response(&response, bases, sweep)
    }

    /// Acknowledge saved moves up to the response, and on a correction adopt the server state
    /// and replay what is still unacknowledged.
    pub fn handle_response<L, S>(&mut self, response: &MoveResponse, bases: &L, sweep: &S) -> ResponseResult<()>
    where
        L: BaseLookup + ?Sized,
        S: MovementSweep + ?Sized,
    {
        let time_stamp = response.adjustment.time_stamp;
        let Some(index) = self.saved_move_index(time_stamp) else {
            tracing::debug!(time_stamp, "no saved move for response");
            return Err(ResponseError::MissingSavedMove { time_stamp });
        };

        if response.is_good_move() {
            self.ack_move(index);
            return Ok(());
        }

        let adjustment = &response.adjustment;
        let (location, velocity) = resolve_adjustment(adjustment, bases)?;
        self.ack_move(index);

        if response.root_motion_source_correction {
            let mut server_group = response.root_motion_group.clone();
            self.id_mappings
                .map_server_ids(&self.state.root_motion, &mut server_group, self.current_time_stamp);
            server_group.cull_invalid_sources();
            self.state.root_motion.update_state_from(&server_group, false);
        }
        if response.root_motion_montage_correction {
            self.montage_correction = Some(MontageCorrection {
                track_position: response.root_motion_track_position,
                rotation: response.root_motion_rotation,
            });
        }

        let body = &mut self.state.body;
        body.location = location;
        body.velocity = velocity;
        if response.has_rotation {
            body.rotation = adjustment.new_rotation;
        }
        self.state.mode = adjustment.movement_mode;
        self.movement_base = adjustment.new_base;

        if !nearly_equal(&self.last_received_gravity, &adjustment.gravity_direction, KINDA_SMALL_NUMBER) {
            tracing::debug!(
                from = ?self.last_received_gravity,
                to = ?adjustment.gravity_direction,
                "corrected gravity direction changed"
            );
            self.gravity_direction_changed = true;
        }
        self.last_received_gravity = adjustment.gravity_direction;
        self.state.gravity.set_direction(adjustment.gravity_direction);

        tracing::debug!(
            time_stamp,
            ?location,
            replay = self.saved_moves.len(),
            "applying server correction"
        );
        self.replay_saved_moves(sweep);
        Ok(())
    }

    fn advance_time_stamp(&mut self, delta_time: f32) {
        self.current_time_stamp += delta_time;
        let interval = self.config.min_time_between_timestamp_resets;
        if self.current_time_stamp <= interval {
            return;
        }

        tracing::debug!(time_stamp = self.current_time_stamp, "resetting client timestamp");
        self.current_time_stamp -= interval;
        for saved in self
            .saved_moves
            .iter_mut()
            .chain(self.pending_move.iter_mut())
            .chain(self.last_acked_move.iter_mut())
        {
            saved.old_time_stamp_before_reset = true;
        }
        self.state.root_motion.apply_time_stamp_reset(interval);
        self.id_mappings.apply_time_stamp_reset(interval);
    }

    fn perform_move<S: MovementSweep + ?Sized>(
        &mut self,
        saved: &SavedMove,
        movement_time: Option<f32>,
        sweep: &S,
    ) {
        let gravity_dir = self.state.gravity.direction();
        self.state.body.rotation = facing_from_control(&saved.control_rotation, &gravity_dir);
        let input = StepInput {
            acceleration: saved.acceleration,
            delta_time: saved.delta_time,
            movement_time,
        };
        step_movement(&mut self.state, &input, &self.config.movement, sweep);
    }

    fn send<L: BaseLookup + ?Sized>(&mut self, new_move: SavedMove, bases: &L) -> PackedBits {
        let pending = self.pending_move.take();
        let old_move = self.last_acked_move.as_ref().and_then(|acked| {
            self.saved_moves
                .iter()
                .find(|m| !m.old_time_stamp_before_reset && m.is_important_move(acked))
        });

        let container = MoveDataContainer {
            new_move: new_move.to_network(MoveType::NewMove, bases),
            pending_move: pending
                .as_ref()
                .map(|m| m.to_network(MoveType::PendingMove, bases)),
            old_move: old_move.map(|m| m.to_network(MoveType::OldMove, bases)),
            is_dual_hybrid_root_motion_move: pending
                .as_ref()
                .is_some_and(|m| m.has_root_motion() != new_move.has_root_motion()),
            disable_combined_scoped_move: false,
        };
        tracing::trace!(
            time_stamp = new_move.time_stamp,
            dual = container.pending_move.is_some(),
            resend = container.old_move.is_some(),
            "sending move"
        );

        self.saved_moves.extend(pending);
        self.saved_moves.push_back(new_move);
        self.time_since_send = 0.0;
        container.to_packed_bits()
    }

    fn saved_move_index(&self, time_stamp: f32) -> Option<usize> {
        if let Some(acked) = &self.last_acked_move {
            if !acked.old_time_stamp_before_reset && time_stamp <= acked.time_stamp {
                return None;
            }
        }
        self.saved_moves.iter().position(|m| m.time_stamp == time_stamp)
    }

    fn ack_move(&mut self, index: usize) {
        if let Some(acked) = self.saved_moves.drain(..=index).last() {
            self.last_acked_move = Some(acked);
        }
    }

    /// Re-run every unacknowledged move, then the held-back one, from the corrected state.
    fn replay_saved_moves<S: MovementSweep + ?Sized>(&mut self, sweep: &S) {
        let mut moves = std::mem::take(&mut self.saved_moves);
        let mut pending = self.pending_move.take();
        for saved in moves.iter_mut().chain(pending.iter_mut()) {
            saved.rebase_start(&self.state, self.movement_base);
            self.perform_move(saved, None, sweep);
            saved.record_end(&self.state);
        }
        self.saved_moves = moves;
        self.pending_move = pending;
    }
}

/// World-space location and velocity of a correction.
fn resolve_adjustment<L: BaseLookup + ?Sized>(
    adjustment: &ClientAdjustment,
    bases: &L,
) -> ResponseResult<(Vec3, Vec3)> {
    let relative = adjustment.base_relative_position || adjustment.base_relative_velocity;
    let Some(base) = adjustment.new_base.filter(|_| relative) else {
        return Ok((adjustment.new_location, adjustment.new_velocity));
    };
    let Some(transform) = bases.base_transform(base) else {
        tracing::warn!(?base, "correction relative to unknown movement base");
        return Err(ResponseError::UnknownBase(base));
    };

    let location = if adjustment.base_relative_position {
        transform.transform_point(adjustment.new_location)
    } else {
        adjustment.new_location
    };
    let velocity = if adjustment.base_relative_velocity {
        transform.transform_vector(adjustment.new_velocity)
    } else {
        adjustment.new_velocity
    };
    Ok((location, velocity))
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;
    use shared::{MovementMode, SweepResult, Transform, WireError};

    struct Floor;

    impl MovementSweep for Floor {
        fn sweep(&self, location: Vec3, _rotation: Quat, delta: Vec3, _up: Vec3, _dt: f32) -> SweepResult {
            let mut end = location + delta;
            let grounded = end.z <= 0.0;
            end.z = end.z.max(0.0);
            SweepResult {
                translation: end - location,
                grounded,
            }
        }
    }

    fn config(net_send_interval: f32) -> ClientConfig {
        ClientConfig {
            net_send_interval,
            ..ClientConfig::default()
        }
    }

    fn forward() -> MoveInput {
        MoveInput {
            acceleration: Vec3::new(10.0, 0.0, 0.0),
            ..MoveInput::default()
        }
    }

    fn decode(packed: &PackedBits) -> MoveDataContainer {
        MoveDataContainer::from_packed_bits(packed).unwrap()
    }

    fn wire(response: &MoveResponse) -> Vec<u8> {
        response.to_packed_bits().to_wire()
    }

    /// Three sent moves of 0.1s each, accelerating along +X.
    fn three_moves() -> ClientPrediction {
        let mut client = ClientPrediction::new(config(0.0), BodyState::default());
        for _ in 0..3 {
            assert!(client.tick(0.1, &forward(), &(), &Floor).is_some());
        }
        client
    }

    fn time_stamps(client: &ClientPrediction) -> Vec<f32> {
        client.saved_moves().map(|m| m.time_stamp).collect()
    }

    #[test]
    fn short_ticks_are_combined_before_sending() {
        let mut client = ClientPrediction::new(config(0.015), BodyState::default());
        assert!(client.tick(0.01, &forward(), &(), &Floor).is_none());
        assert!(client.has_pending_move());

        let sent = decode(&client.tick(0.01, &forward(), &(), &Floor).unwrap());
        assert!(sent.pending_move.is_none());
        assert_abs_diff_eq!(sent.new_move.time_stamp, 0.02, epsilon = 1e-6);
        assert_eq!(client.saved_move_count(), 1);
        assert_abs_diff_eq!(client.saved_moves().next().unwrap().delta_time, 0.02, epsilon = 1e-6);
        // One combined 0.02s move: v = 0.2, x = 0.004.
        assert_abs_diff_eq!(client.state().body.location.x, 0.004, epsilon = 1e-6);
    }

    #[test]
    fn changed_input_is_sent_as_dual_move() {
        let mut client = ClientPrediction::new(config(0.015), BodyState::default());
        assert!(client.tick(0.01, &forward(), &(), &Floor).is_none());

        let backward = MoveInput {
            acceleration: Vec3::new(-10.0, 0.0, 0.0),
            ..MoveInput::default()
        };
        let sent = decode(&client.tick(0.01, &backward, &(), &Floor).unwrap());
        let pending = sent.pending_move.expect("pending move sent along");
        assert_abs_diff_eq!(pending.acceleration, Vec3::new(10.0, 0.0, 0.0), epsilon = 0.1);
        assert_abs_diff_eq!(sent.new_move.acceleration, Vec3::new(-10.0, 0.0, 0.0), epsilon = 0.1);
        assert!(!sent.is_dual_hybrid_root_motion_move);
        assert_eq!(client.saved_move_count(), 2);
    }

    #[test]
    fn good_move_acknowledges_older_moves() {
        let mut client = three_moves();
        let stamps = time_stamps(&client);

        client
            .receive_response(&wire(&MoveResponse::good_move(stamps[1])), &(), &Floor)
            .unwrap();
        assert_eq!(time_stamps(&client), vec![stamps[2]]);
        assert_eq!(client.last_acked_time_stamp(), Some(stamps[1]));

        // Acks older than the last acknowledged move are ignored.
        let err = client
            .receive_response(&wire(&MoveResponse::good_move(stamps[0])), &(), &Floor)
            .unwrap_err();
        assert_eq!(err, ResponseError::MissingSavedMove { time_stamp: stamps[0] });
    }

    #[test]
    fn correction_replays_unacknowledged_moves() {
        let mut client = three_moves();
        let stamps = time_stamps(&client);

        let correction = MoveResponse::correction(ClientAdjustment {
            time_stamp: stamps[0],
            new_location: Vec3::new(5.0, 0.0, 0.0),
            new_velocity: Vec3::new(1.0, 0.0, 0.0),
            movement_mode: MovementMode::Walking,
            ..ClientAdjustment::default()
        });
        client.receive_response(&wire(&correction), &(), &Floor).unwrap();

        // Replayed at 2 m/s then 3 m/s.
        assert_abs_diff_eq!(client.state().body.location, Vec3::new(5.5, 0.0, 0.0), epsilon = 1e-4);
        assert_eq!(client.saved_move_count(), 2);
        assert!(!client.gravity_direction_changed());
        assert_eq!(client.state().gravity.direction(), canonical_down());
        let replayed = client.saved_moves().next().unwrap();
        assert_abs_diff_eq!(replayed.start.location.x, 5.0, epsilon = 1e-4);
    }

    #[test]
    fn gravity_change_in_correction_is_signalled_once() {
        let mut client = three_moves();
        let stamps = time_stamps(&client);

        let correction = MoveResponse::correction(ClientAdjustment {
            time_stamp: stamps[2],
            new_location: Vec3::new(0.0, 0.0, 4.0),
            gravity_direction: Vec3::x(),
            movement_mode: MovementMode::Falling,
            ..ClientAdjustment::default()
        });
        client.receive_response(&wire(&correction), &(), &Floor).unwrap();

        assert!(client.gravity_direction_changed());
        assert_abs_diff_eq!(client.state().gravity.direction(), Vec3::x(), epsilon = 1e-4);
        assert!(client.take_gravity_direction_changed());
        assert!(!client.gravity_direction_changed());
        assert_eq!(client.state().mode, MovementMode::Falling);
    }

    #[test]
    fn correction_relative_to_unknown_base_is_rejected() {
        let mut client = three_moves();
        let stamps = time_stamps(&client);

        let correction = MoveResponse::correction(ClientAdjustment {
            time_stamp: stamps[0],
            new_base: Some(BaseId(9)),
            base_relative_position: true,
            ..ClientAdjustment::default()
        });
        let err = client.receive_response(&wire(&correction), &(), &Floor).unwrap_err();
        assert_eq!(err, ResponseError::UnknownBase(BaseId(9)));
        assert_eq!(client.saved_move_count(), 3);
    }

    #[test]
    fn based_correction_uses_base_transform() {
        struct Lift;
        impl BaseLookup for Lift {
            fn base_transform(&self, _base: BaseId) -> Option<Transform> {
                Some(Transform::from_translation(Vec3::new(0.0, 0.0, 2.0)))
            }
        }

        let mut client = three_moves();
        let last = time_stamps(&client)[2];
        let correction = MoveResponse::correction(ClientAdjustment {
            time_stamp: last,
            new_location: Vec3::new(1.0, 0.0, 0.0),
            new_base: Some(BaseId(3)),
            base_relative_position: true,
            ..ClientAdjustment::default()
        });
        client.handle_response(&correction, &Lift, &Floor).unwrap();
        assert_abs_diff_eq!(client.state().body.location, Vec3::new(1.0, 0.0, 2.0), epsilon = 1e-4);
        assert_eq!(client.movement_base(), Some(BaseId(3)));
    }

    #[test]
    fn malformed_response_is_dropped() {
        let mut client = three_moves();
        let mut bytes = wire(&MoveResponse::good_move(0.1));
        bytes.truncate(2);
        let err = client.receive_response(&bytes, &(), &Floor).unwrap_err();
        assert!(matches!(err, ResponseError::Wire(WireError::MalformedBitCount { .. })));
        assert_eq!(client.saved_move_count(), 3);
    }

    #[test]
    fn correction_with_unknown_source_tag_is_dropped() {
        let mut client = three_moves();
        let before = client.state().body;
        let stamp = time_stamps(&client)[0];

        let mut correction = MoveResponse::correction(ClientAdjustment {
            time_stamp: stamp,
            new_location: Vec3::new(9.0, 0.0, 0.0),
            ..ClientAdjustment::default()
        });
        correction.root_motion_source_correction = true;
        // With an empty group the packet ends after both array counts, which is where the
        // first pending source's tag lands once one is queued.
        let tag_offset = correction.to_packed_bits().num_bits;
        correction.root_motion_group.apply(
            RootMotionSource::constant_force(Vec3::x(), 1.0),
            &mut SourceIdAllocator::default(),
        );
        let mut packed = correction.to_packed_bits();
        for bit in tag_offset..tag_offset + 8 {
            packed.bytes[(bit / 8) as usize] &= !(1 << (bit % 8));
        }

        let err = client.receive_response(&packed.to_wire(), &(), &Floor).unwrap_err();
        assert_eq!(err, ResponseError::Wire(WireError::UnknownSourceType(0)));
        assert_eq!(client.saved_move_count(), 3);
        assert_eq!(client.state().body, before);
        assert!(client.root_motion().active().is_empty());
    }

    #[test]
    fn root_motion_correction_adopts_mapped_sources_only() {
        let mut client = ClientPrediction::new(config(0.0), BodyState::default());
        let dash = RootMotionSource::constant_force(Vec3::new(0.0, 3.0, 0.0), 2.0).with_name("dash");
        let local_id = client.apply_root_motion_source(dash.clone());
        client.tick(0.1, &MoveInput::default(), &(), &Floor).unwrap();
        let stamp = time_stamps(&client)[0];

        let mut server_group = RootMotionGroup::default();
        let mut server_ids = SourceIdAllocator::default();
        server_group.apply(dash, &mut server_ids);
        server_group.apply(
            RootMotionSource::constant_force(Vec3::new(0.0, 0.0, 8.0), 1.0).with_name("launch"),
            &mut server_ids,
        );
        server_group.prepare(0.3, &BodyState::default(), None, false);
        for (slot, server_id) in server_group.active_mut().iter_mut().zip([70, 71]) {
            slot.local_id = server_id;
        }

        let mut correction = MoveResponse::correction(ClientAdjustment {
            time_stamp: stamp,
            ..ClientAdjustment::default()
        });
        correction.root_motion_source_correction = true;
        correction.root_motion_group = server_group;
        client.receive_response(&wire(&correction), &(), &Floor).unwrap();

        let group = client.root_motion();
        assert_eq!(group.active().len(), 1);
        assert_eq!(group.active()[0].local_id, local_id);
        assert_abs_diff_eq!(group.active()[0].time(), 0.3, epsilon = 1e-5);
        assert_eq!(client.id_mappings().local_id_for(70), Some(local_id));
        assert_eq!(client.id_mappings().local_id_for(71), None);
    }

    #[test]
    fn timestamp_wraps_and_marks_buffered_moves() {
        let mut client = ClientPrediction::new(
            ClientConfig {
                net_send_interval: 0.0,
                min_time_between_timestamp_resets: 1.0,
                ..ClientConfig::default()
            },
            BodyState::default(),
        );
        for _ in 0..8 {
            client.tick(0.125, &forward(), &(), &Floor);
        }
        assert_eq!(client.current_time_stamp(), 1.0);
        assert!(client.saved_moves().all(|m| !m.old_time_stamp_before_reset));

        let sent = decode(&client.tick(0.125, &forward(), &(), &Floor).unwrap());
        assert_eq!(client.current_time_stamp(), 0.125);
        assert_eq!(sent.new_move.time_stamp, 0.125);
        assert_eq!(client.saved_moves().filter(|m| m.old_time_stamp_before_reset).count(), 8);
    }
}
