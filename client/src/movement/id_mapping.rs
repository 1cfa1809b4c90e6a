//! Server-to-local root-motion source id mapping.
//!
//! Ids are allocated independently on each machine, so a source the client applied
//! predictively and the server's copy of it carry different ids. Received groups are
//! rewritten to local ids before their state is adopted.

use shared::constants::INVALID_SOURCE_ID;
use shared::{RootMotionGroup, RootMotionSource, SourceId};

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct IdMapping {
    pub server_id: SourceId,
    pub local_id: SourceId,
    /// Last time the mapping was used.
    pub time_stamp: f32,
}

impl IdMapping {
    fn is_still_valid(&self, now: f32, validity: f32) -> bool {
        self.time_stamp >= now - validity
    }
}

/// A server source that matched nothing local. Its id in the group is reset to 0.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct UnmatchedSource {
    /// Index into the rewritten group's active sources.
    pub index: usize,
    pub server_id: SourceId,
}

#[derive(Clone, Debug)]
pub struct RootMotionIdMappings {
    mappings: Vec<IdMapping>,
    validity: f32,
}

impl RootMotionIdMappings {
    pub fn new(validity: f32) -> Self {
        Self {
            mappings: Vec::new(),
            validity,
        }
    }

    pub fn len(&self) -> usize {
        self.mappings.len()
    }

    pub fn is_empty(&self) -> bool {
        self.mappings.is_empty()
    }

    pub fn local_id_for(&self, server_id: SourceId) -> Option<SourceId> {
        self.mappings
            .iter()
            .find(|m| m.server_id == server_id)
            .map(|m| m.local_id)
    }

    pub fn insert(&mut self, server_id: SourceId, local_id: SourceId, time_stamp: f32) {
        self.mappings.retain(|m| m.server_id != server_id);
        self.mappings.push(IdMapping {
            server_id,
            local_id,
            time_stamp,
        });
    }

    /// Rewrite the active sources of `server` to local ids, then drop expired mappings.
    ///
    /// A server source without a mapping is matched against the local group by its matching
    /// rules; local sources already mapped are not reused.
    pub fn map_server_ids(
        &mut self,
        local: &RootMotionGroup,
        server: &mut RootMotionGroup,
        time_stamp: f32,
    ) -> Vec<UnmatchedSource> {
        let mut unmatched = Vec::new();

        for (index, source) in server.active_mut().iter_mut().enumerate() {
            let server_id = source.local_id;
            let local_id = match self.mappings.iter().position(|m| m.server_id == server_id) {
                Some(i) => {
                    self.mappings[i].time_stamp = time_stamp;
                    Some(self.mappings[i].local_id)
                }
                None => self.find_local_match(local, source).inspect(|&local_id| {
                    tracing::trace!(server_id, local_id, "mapped root motion source");
                    self.mappings.push(IdMapping {
                        server_id,
                        local_id,
                        time_stamp,
                    });
                }),
            };

            match local_id {
                Some(local_id) => source.local_id = local_id,
                None => {
                    tracing::trace!(server_id, %source, "no local root motion source for server id");
                    source.local_id = INVALID_SOURCE_ID;
                    unmatched.push(UnmatchedSource { index, server_id });
                }
            }
        }

        let validity = self.validity;
        self.mappings.retain(|m| m.is_still_valid(time_stamp, validity));
        unmatched
    }

    /// Shift mapping times after the movement clock wrapped back by `delta_time`.
    pub fn apply_time_stamp_reset(&mut self, delta_time: f32) {
        for mapping in &mut self.mappings {
            mapping.time_stamp -= delta_time;
        }
    }

    fn find_local_match(&self, local: &RootMotionGroup, theirs: &RootMotionSource) -> Option<SourceId> {
        local
            .active()
            .iter()
            .chain(local.pending())
            .filter(|mine| mine.local_id != INVALID_SOURCE_ID)
            .filter(|mine| !self.mappings.iter().any(|m| m.local_id == mine.local_id))
            .find(|mine| mine.matches(theirs))
            .map(|mine| mine.local_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use shared::{SourceIdAllocator, Vec3};

    fn dash() -> RootMotionSource {
        RootMotionSource::constant_force(Vec3::new(4.0, 0.0, 0.0), 0.5).with_name("dash")
    }

    /// A group holding `sources` as active entries with the given server ids.
    fn server_group(sources: &[(RootMotionSource, SourceId)]) -> RootMotionGroup {
        let mut group = RootMotionGroup::default();
        let mut ids = SourceIdAllocator::default();
        for (source, _) in sources {
            group.apply(source.clone(), &mut ids);
        }
        group.prepare(0.1, &shared::BodyState::default(), None, false);
        for (slot, (_, server_id)) in group.active_mut().iter_mut().zip(sources) {
            slot.local_id = *server_id;
        }
        group
    }

    #[test]
    fn matching_source_is_mapped_and_reused() {
        let mut local = RootMotionGroup::default();
        let local_id = local.apply(dash(), &mut SourceIdAllocator::default());

        let mut mappings = RootMotionIdMappings::new(3.0);
        let mut server = server_group(&[(dash(), 40)]);
        let unmatched = mappings.map_server_ids(&local, &mut server, 1.0);
        assert!(unmatched.is_empty());
        assert_eq!(server.active()[0].local_id, local_id);
        assert_eq!(mappings.local_id_for(40), Some(local_id));

        // The existing mapping wins even once the local source has gone.
        let mut again = server_group(&[(dash(), 40)]);
        mappings.map_server_ids(&RootMotionGroup::default(), &mut again, 2.0);
        assert_eq!(again.active()[0].local_id, local_id);
    }

    #[test]
    fn unmatched_source_gets_invalid_id() {
        let mut local = RootMotionGroup::default();
        local.apply(dash(), &mut SourceIdAllocator::default());

        let other = RootMotionSource::constant_force(Vec3::new(0.0, 0.0, 9.0), 0.5).with_name("launch");
        let mut server = server_group(&[(other, 12)]);
        let mut mappings = RootMotionIdMappings::new(3.0);
        let unmatched = mappings.map_server_ids(&local, &mut server, 1.0);

        assert_eq!(unmatched, vec![UnmatchedSource { index: 0, server_id: 12 }]);
        assert_eq!(server.active()[0].local_id, INVALID_SOURCE_ID);
        server.cull_invalid_sources();
        assert!(server.active().is_empty());
    }

    #[test]
    fn local_source_is_claimed_once() {
        let mut local = RootMotionGroup::default();
        local.apply(dash(), &mut SourceIdAllocator::default());

        let mut mappings = RootMotionIdMappings::new(3.0);
        let mut server = server_group(&[(dash(), 5), (dash(), 6)]);
        let unmatched = mappings.map_server_ids(&local, &mut server, 1.0);
        assert_eq!(unmatched.len(), 1);
        assert_eq!(mappings.len(), 1);
    }

    #[test]
    fn mappings_expire_after_validity_window() {
        let mut mappings = RootMotionIdMappings::new(3.0);
        mappings.insert(7, 1, 0.0);
        mappings.map_server_ids(&RootMotionGroup::default(), &mut RootMotionGroup::default(), 2.5);
        assert_eq!(mappings.len(), 1);
        mappings.map_server_ids(&RootMotionGroup::default(), &mut RootMotionGroup::default(), 3.5);
        assert!(mappings.is_empty());
    }

    #[test]
    fn time_stamp_reset_keeps_mappings_alive() {
        let mut mappings = RootMotionIdMappings::new(3.0);
        mappings.insert(7, 1, 239.0);
        mappings.apply_time_stamp_reset(240.0);
        mappings.map_server_ids(&RootMotionGroup::default(), &mut RootMotionGroup::default(), 0.5);
        assert_eq!(mappings.local_id_for(7), Some(1));
    }
}
