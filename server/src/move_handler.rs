//! Authoritative processing of one client's packed moves.

use shared::gravity::facing_from_control;
use shared::{
    BaseId, BaseLookup, BodyState, ClientAdjustment, MoveDataContainer, MoveResponse,
    MovementSweep, MoverState, NetworkMoveData, PackedBits, Quat, RootMotionGroup,
    RootMotionSource, SourceId, SourceIdAllocator, StepInput, Vec3, step_movement,
};

use crate::config::ServerConfig;
use crate::error::{MoveError, MoveResult};

/// Position of the active root-motion montage, sent with corrections.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct MontagePosition {
    pub track_position: f32,
    pub rotation: Quat,
}

/// Per-connection authoritative movement state.
pub struct ServerMoveHandler {
    config: ServerConfig,
    state: MoverState,
    movement_base: Option<BaseId>,
    current_client_time_stamp: f32,
    /// Response for the last new move, sent on the next network tick.
    pending_adjustment: Option<MoveResponse>,
    ids: SourceIdAllocator,
    montage: Option<MontagePosition>,
    /// Set when gravity changed since the last correction; the client cannot detect it.
    gravity_changed: bool,
}

impl ServerMoveHandler {
    pub fn new(config: ServerConfig, body: BodyState) -> Self {
        Self {
            state: MoverState::new(body, &config.movement),
            config,
            movement_base: None,
            current_client_time_stamp: 0.0,
            pending_adjustment: None,
            ids: SourceIdAllocator::default(),
            montage: None,
            gravity_changed: false,
        }
    }

    pub fn state(&self) -> &MoverState {
        &self.state
    }

    pub fn movement_base(&self) -> Option<BaseId> {
        self.movement_base
    }

    pub fn current_client_time_stamp(&self) -> f32 {
        self.current_client_time_stamp
    }

    pub fn pending_response(&self) -> Option<&MoveResponse> {
        self.pending_adjustment.as_ref()
    }

    pub fn root_motion(&self) -> &RootMotionGroup {
        &self.state.root_motion
    }

    pub fn root_motion_mut(&mut self) -> &mut RootMotionGroup {
        &mut self.state.root_motion
    }

    pub fn apply_root_motion_source(&mut self, source: RootMotionSource) -> SourceId {
        self.state.root_motion.apply(source, &mut self.ids)
    }

    pub fn set_gravity_direction(&mut self, direction: Vec3) {
        if self.state.gravity.set_direction(direction) {
            self.gravity_changed = true;
        }
    }

    pub fn set_root_motion_montage(&mut self, montage: Option<MontagePosition>) {
        self.montage = montage;
    }

    /// Decode and simulate one move packet in its wire form.
    ///
    /// A packet that fails to decode is dropped whole and leaves all state untouched. Once
    /// decoded, see [`Self::receive_moves`].
    pub fn receive_packed<L, S>(&mut self, bytes: &[u8], bases: &L, sweep: &S) -> MoveResult<()>
    where
        L: BaseLookup + ?Sized,
        S: MovementSweep + ?Sized,
    {
        let container = PackedBits::from_wire(bytes, self.config.max_packed_bits)
            .and_then(|packed| MoveDataContainer::from_packed_bits(&packed))
            .map_err(|err| {
                log::warn!("dropping move packet: {err}");
                MoveError::from(err)
            })?;
        self.receive_moves(&container, bases, sweep)
    }

    /// Simulate old, pending and new moves in order; only the new move is error checked.
    ///
    /// Each move stands on its own: earlier moves stay applied when the new move's timestamp
    /// is rejected, and no response is queued for it.
    pub fn receive_moves<L, S>(
        &mut self,
        container: &MoveDataContainer,
        bases: &L,
        sweep: &S,
    ) -> MoveResult<()>
    where
        L: BaseLookup + ?Sized,
        S: MovementSweep + ?Sized,
    {
        for earlier in container.old_move.iter().chain(container.pending_move.iter()) {
            if let Err(err) = self.simulate(earlier, sweep) {
                log::debug!("skipping {:?}: {err}", earlier.move_type);
            }
        }

        let new_move = &container.new_move;
        let delta_time = self.simulate(new_move, sweep).inspect_err(|err| {
            log::warn!("rejecting move: {err}");
        })?;

        let (client_location, base_known) = self.client_world_location(new_move, bases);
        self.movement_base = new_move.movement_base.filter(|_| base_known);

        let error_sq = (self.state.body.location - client_location).norm_squared();
        let needs_correction = !base_known
            || error_sq > self.config.movement.max_position_error_sq
            || new_move.movement_mode != self.state.mode
            || self.gravity_changed;

        let response = if needs_correction {
            log::debug!(
                "correcting client at {:.3}: error {:.4}m, mode {:?} vs {:?}",
                new_move.time_stamp,
                error_sq.sqrt(),
                new_move.movement_mode,
                self.state.mode
            );
            self.gravity_changed = false;
            self.build_correction(new_move.time_stamp, delta_time, bases)
        } else {
            MoveResponse::good_move(new_move.time_stamp)
        };
        self.pending_adjustment = Some(response);
        Ok(())
    }

    /// Take the pending response in its wire form.
    pub fn send_client_adjustment(&mut self) -> Option<Vec<u8>> {
        self.pending_adjustment
            .take()
            .map(|response| response.to_packed_bits().to_wire())
    }

    /// Validate the timestamp, then run one movement step. Returns the simulated delta time.
    fn simulate<S: MovementSweep + ?Sized>(
        &mut self,
        data: &NetworkMoveData,
        sweep: &S,
    ) -> MoveResult<f32> {
        let (raw_delta, is_reset) = self.time_stamp_delta(data.time_stamp)?;
        if is_reset {
            log::debug!(
                "client timestamp reset: {} -> {}",
                self.current_client_time_stamp,
                data.time_stamp
            );
            self.state
                .root_motion
                .apply_time_stamp_reset(self.config.min_time_between_timestamp_resets);
        }
        let delta_time = raw_delta.clamp(0.0, self.config.movement.max_move_delta_time);

        let gravity_dir = self.state.gravity.direction();
        self.state.body.rotation = facing_from_control(&data.control_rotation, &gravity_dir);
        let input = StepInput {
            acceleration: data.acceleration,
            delta_time,
            movement_time: Some(data.time_stamp - delta_time),
        };
        step_movement(&mut self.state, &input, &self.config.movement, sweep);

        self.current_client_time_stamp = data.time_stamp;
        Ok(delta_time)
    }

    /// Unclamped time since the current client timestamp, and whether the client reset it.
    fn time_stamp_delta(&self, time_stamp: f32) -> MoveResult<(f32, bool)> {
        if !time_stamp.is_finite() || time_stamp <= 0.0 {
            return Err(MoveError::InvalidTimeStamp(time_stamp));
        }

        let current = self.current_client_time_stamp;
        let delta = time_stamp - current;
        if delta > 0.0 {
            return Ok((delta, false));
        }

        let reset_interval = self.config.min_time_between_timestamp_resets;
        if delta < -0.5 * reset_interval {
            return Ok(((reset_interval - current) + time_stamp, true));
        }

        Err(MoveError::StaleTimeStamp {
            time_stamp,
            current,
        })
    }

    /// The client's claimed location in world space, re-expressed with the base's current
    /// transform. The flag is false when the base is unknown here.
    fn client_world_location<L: BaseLookup + ?Sized>(
        &self,
        data: &NetworkMoveData,
        bases: &L,
    ) -> (Vec3, bool) {
        let Some(base) = data.movement_base else {
            return (data.location, true);
        };
        match bases.base_transform(base) {
            Some(transform) => (transform.transform_point(data.location), true),
            None => {
                log::warn!("client move relative to unknown base {base:?}");
                (data.location, false)
            }
        }
    }

    fn build_correction<L: BaseLookup + ?Sized>(
        &self,
        time_stamp: f32,
        delta_time: f32,
        bases: &L,
    ) -> MoveResponse {
        let body = &self.state.body;
        let mut adjustment = ClientAdjustment {
            time_stamp,
            delta_time,
            new_location: body.location,
            new_velocity: body.velocity,
            new_rotation: body.rotation,
            gravity_direction: self.state.gravity.direction(),
            movement_mode: self.state.mode,
            ..ClientAdjustment::default()
        };
        if let Some(base) = self.movement_base {
            if let Some(transform) = bases.base_transform(base) {
                adjustment.new_location = transform.inverse_transform_point(body.location);
                adjustment.base_relative_position = true;
                adjustment.new_base = Some(base);
            }
        }

        let mut response = MoveResponse::correction(adjustment);
        response.has_rotation = true;
        if let Some(montage) = self.montage {
            response.root_motion_montage_correction = true;
            response.root_motion_track_position = montage.track_position;
            response.root_motion_rotation = montage.rotation;
        }
        if self.state.root_motion.has_active_sources() {
            response.root_motion_source_correction = true;
            response.root_motion_group = self.state.root_motion.clone();
        }
        response
    }
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

    struct OneBase(Transform);

    impl BaseLookup for OneBase {
        fn base_transform(&self, base: BaseId) -> Option<Transform> {
            (base == BaseId(1)).then_some(self.0)
        }
    }

    fn handler() -> ServerMoveHandler {
        ServerMoveHandler::new(ServerConfig::default(), BodyState::default())
    }

    fn new_move(time_stamp: f32, location: Vec3) -> MoveDataContainer {
        MoveDataContainer {
            new_move: NetworkMoveData {
                time_stamp,
                acceleration: Vec3::new(10.0, 0.0, 0.0),
                location,
                ..NetworkMoveData::default()
            },
            ..MoveDataContainer::default()
        }
    }

    fn send(server: &mut ServerMoveHandler, container: &MoveDataContainer) -> MoveResult<MoveResponse> {
        let bytes = container.to_packed_bits().to_wire();
        server.receive_packed(&bytes, &(), &Floor)?;
        let reply = server.send_client_adjustment().expect("response queued");
        let packed = PackedBits::from_wire(&reply, 4096).unwrap();
        Ok(MoveResponse::from_packed_bits(&packed).unwrap())
    }

    #[test]
    fn matching_move_is_acknowledged() {
        let mut server = handler();
        let response = send(&mut server, &new_move(0.1, Vec3::new(0.1, 0.0, 0.0))).unwrap();
        assert!(response.is_good_move());
        assert_eq!(response.adjustment.time_stamp, 0.1);
        assert_abs_diff_eq!(server.state().body.location.x, 0.1, epsilon = 1e-6);
        assert!(server.send_client_adjustment().is_none());
    }

    #[test]
    fn diverged_move_gets_full_correction() {
        let mut server = handler();
        let response = send(&mut server, &new_move(0.1, Vec3::new(3.0, 0.0, 0.0))).unwrap();
        assert!(response.is_correction());
        assert!(response.has_rotation);
        assert!(!response.has_base);
        assert!(!response.root_motion_source_correction);
        assert_abs_diff_eq!(response.adjustment.new_location.x, 0.1, epsilon = 0.006);
        assert_abs_diff_eq!(response.adjustment.gravity_direction, Vec3::new(0.0, 0.0, -1.0), epsilon = 1e-4);
        assert_eq!(response.adjustment.movement_mode, MovementMode::Walking);
    }

    #[test]
    fn mode_mismatch_is_corrected() {
        let mut server = handler();
        let mut container = new_move(0.1, Vec3::new(0.1, 0.0, 0.0));
        container.new_move.movement_mode = MovementMode::Falling;
        assert!(send(&mut server, &container).unwrap().is_correction());
    }

    #[test]
    fn stale_move_is_rejected_without_simulating() {
        let mut server = handler();
        send(&mut server, &new_move(1.0, Vec3::new(0.125, 0.0, 0.0))).unwrap();
        let before = server.state().body;

        let err = send(&mut server, &new_move(0.9, Vec3::zeros())).unwrap_err();
        assert!(matches!(err, MoveError::StaleTimeStamp { .. }));
        assert_eq!(server.state().body, before);
        assert_eq!(server.current_client_time_stamp(), 1.0);
    }

    #[test]
    fn timestamp_reset_is_accepted() {
        let mut server = handler();
        server.current_client_time_stamp = 200.0;
        send(&mut server, &new_move(10.0, Vec3::zeros())).unwrap();
        assert_eq!(server.current_client_time_stamp(), 10.0);
        // Clamped to the longest simulated move.
        assert_abs_diff_eq!(server.state().body.velocity.x, 1.25, epsilon = 1e-5);
    }

    #[test]
    fn invalid_timestamp_is_rejected() {
        let mut server = handler();
        let err = send(&mut server, &new_move(-1.0, Vec3::zeros())).unwrap_err();
        assert_eq!(err, MoveError::InvalidTimeStamp(-1.0));
    }

    #[test]
    fn malformed_packet_is_dropped() {
        let mut server = handler();
        let mut bytes = new_move(0.1, Vec3::zeros()).to_packed_bits().to_wire();
        bytes.truncate(3);
        let err = server.receive_packed(&bytes, &(), &Floor).unwrap_err();
        assert!(matches!(err, MoveError::Wire(WireError::MalformedBitCount { .. })));
        assert!(server.pending_response().is_none());
        assert_eq!(server.current_client_time_stamp(), 0.0);
    }

    #[test]
    fn based_location_uses_current_base_transform() {
        let bases = OneBase(Transform::from_translation(Vec3::new(10.0, 0.0, 0.0)));
        let mut server = ServerMoveHandler::new(
            ServerConfig::default(),
            BodyState::at(Vec3::new(10.0, 0.0, 0.0)),
        );
        let mut container = new_move(0.1, Vec3::new(0.1, 0.0, 0.0));
        container.new_move.movement_base = Some(BaseId(1));
        server.receive_moves(&container, &bases, &Floor).unwrap();
        assert!(server.pending_response().unwrap().is_good_move());
        assert_eq!(server.movement_base(), Some(BaseId(1)));

        // An unknown base forces a correction in world space.
        container.new_move.time_stamp = 0.2;
        container.new_move.movement_base = Some(BaseId(7));
        server.receive_moves(&container, &bases, &Floor).unwrap();
        let response = server.pending_response().unwrap();
        assert!(response.is_correction());
        assert!(!response.adjustment.base_relative_position);
        assert_eq!(server.movement_base(), None);
    }

    #[test]
    fn correction_relative_to_known_base() {
        let bases = OneBase(Transform::from_translation(Vec3::new(10.0, 0.0, 0.0)));
        let mut server = ServerMoveHandler::new(
            ServerConfig::default(),
            BodyState::at(Vec3::new(10.0, 0.0, 0.0)),
        );
        let mut container = new_move(0.1, Vec3::new(5.0, 0.0, 0.0));
        container.new_move.movement_base = Some(BaseId(1));
        server.receive_moves(&container, &bases, &Floor).unwrap();

        let adjustment = &server.pending_response().unwrap().adjustment;
        assert!(adjustment.base_relative_position);
        assert_eq!(adjustment.new_base, Some(BaseId(1)));
        assert_abs_diff_eq!(adjustment.new_location.x, 0.1, epsilon = 1e-5);
    }

    #[test]
    fn old_and_pending_moves_run_before_new_move() {
        let mut server = handler();
        let mut container = new_move(0.3, Vec3::new(0.6, 0.0, 0.0));
        container.old_move = Some(NetworkMoveData {
            time_stamp: 0.1,
            acceleration: Vec3::new(10.0, 0.0, 0.0),
            ..NetworkMoveData::default()
        });
        container.pending_move = Some(NetworkMoveData {
            time_stamp: 0.2,
            acceleration: Vec3::new(10.0, 0.0, 0.0),
            ..NetworkMoveData::default()
        });

        let response = send(&mut server, &container).unwrap();
        // Velocity 1, 2 then 3 m/s over three 0.1s moves.
        assert_abs_diff_eq!(server.state().body.location.x, 0.6, epsilon = 1e-5);
        assert!(response.is_good_move());
    }

    #[test]
    fn earlier_moves_stay_applied_when_new_move_is_rejected() {
        let mut server = handler();
        let mut container = new_move(0.15, Vec3::zeros());
        container.pending_move = Some(NetworkMoveData {
            time_stamp: 0.2,
            acceleration: Vec3::new(10.0, 0.0, 0.0),
            ..NetworkMoveData::default()
        });

        let err = send(&mut server, &container).unwrap_err();
        assert!(matches!(err, MoveError::StaleTimeStamp { .. }));
        assert_eq!(server.current_client_time_stamp(), 0.2);
        // The pending move ran for the clamped 0.125s: 1.25 m/s.
        assert_abs_diff_eq!(server.state().body.location.x, 0.15625, epsilon = 1e-5);
        assert!(server.pending_response().is_none());
    }

    #[test]
    fn active_root_motion_is_sent_with_corrections() {
        let mut server = handler();
        server.apply_root_motion_source(
            RootMotionSource::constant_force(Vec3::new(0.0, 2.0, 0.0), 1.0).with_name("dash"),
        );
        server.set_root_motion_montage(Some(MontagePosition {
            track_position: 0.4,
            rotation: Quat::identity(),
        }));

        let response = send(&mut server, &new_move(0.1, Vec3::zeros())).unwrap();
        assert!(response.is_correction());
        assert!(response.root_motion_source_correction);
        assert!(response.root_motion_montage_correction);
        assert_eq!(response.root_motion_track_position, 0.4);
        assert!(response.root_motion_group.same_state_as(server.root_motion()));
        assert_eq!(response.root_motion_group.active()[0].instance_name.as_deref(), Some("dash"));
    }

    #[test]
    fn gravity_change_forces_one_correction() {
        let mut server = handler();
        server.set_gravity_direction(Vec3::new(0.0, 0.0, 1.0));
        let response = send(&mut server, &new_move(0.1, Vec3::zeros())).unwrap();
        assert!(response.is_correction());
        assert_abs_diff_eq!(response.adjustment.gravity_direction, Vec3::z(), epsilon = 1e-4);

        // The flag is cleared by the correction; a matching move is acked again.
        let expected = {
            let mut probe = server.state().clone();
            let input = StepInput {
                acceleration: Vec3::zeros(),
                delta_time: 0.1,
                movement_time: Some(0.1),
            };
            step_movement(&mut probe, &input, &ServerConfig::default().movement, &Floor);
            probe.body.location
        };
        let mut next = new_move(0.2, expected);
        next.new_move.acceleration = Vec3::zeros();
        next.new_move.movement_mode = MovementMode::Falling;
        assert!(send(&mut server, &next).unwrap().is_good_move());
    }
}
