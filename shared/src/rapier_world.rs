//! Rapier-backed static collision world and the capsule sweep used by the movement step.
//!
//! The world is immutable after construction: build it once from [`WorldStaticDef`]s and
//! share it between simulations. Sweeps run Rapier's `KinematicCharacterController` with its
//! `up` axis following the current gravity.

// Re-export Rapier so downstream crates can use its types without depending on it directly.
pub use rapier3d;

use rapier3d::control::{CharacterAutostep, CharacterLength, KinematicCharacterController};
use rapier3d::na::{Translation3, UnitQuaternion};
use rapier3d::prelude::*;

use crate::math::{Quat, Vec3, find_between_normals};
use crate::movement::{MovementSweep, SweepResult};

/// Definition of one immutable world collider.
///
/// Units are meters. Shapes are Z-up: a plane's normal is `rotation * +Z` and capsules run
/// along the local Z axis.
#[derive(Clone, Debug)]
pub struct WorldStaticDef {
    /// Insertion order key, so identical inputs build identical sets.
    pub id: u32,
    pub translation: Vector<f32>,
    pub rotation: UnitQuaternion<f32>,
    pub shape: ColliderShapeDef,
}

#[derive(Clone, Debug)]
pub enum ColliderShapeDef {
    /// Infinite half-space, shifted along its normal by `offset_along_normal`.
    Plane { offset_along_normal: f32 },
    Cuboid { half_extents: Vector<f32> },
    Sphere { radius: f32 },
    CapsuleZ { radius: f32, half_height: f32 },
}

impl WorldStaticDef {
    /// Horizontal ground plane at height `z`.
    pub fn ground(id: u32, z: f32) -> Self {
        Self {
            id,
            translation: vector![0.0, 0.0, z],
            rotation: UnitQuaternion::identity(),
            shape: ColliderShapeDef::Plane {
                offset_along_normal: 0.0,
            },
        }
    }
}

/// Collider relative to its fixed parent body, which carries the pose.
fn collider_from_def(def: &WorldStaticDef) -> Collider {
    match &def.shape {
        ColliderShapeDef::Plane {
            offset_along_normal,
        } => ColliderBuilder::halfspace(Vector::z_axis())
            .translation(vector![0.0, 0.0, *offset_along_normal])
            .build(),
        ColliderShapeDef::Cuboid { half_extents } => {
            ColliderBuilder::cuboid(half_extents.x, half_extents.y, half_extents.z).build()
        }
        ColliderShapeDef::Sphere { radius } => ColliderBuilder::ball(*radius).build(),
        ColliderShapeDef::CapsuleZ {
            radius,
            half_height,
        } => ColliderBuilder::capsule_z(*half_height, *radius).build(),
    }
}

/// Rapier sets needed for scene queries against static geometry.
pub struct StaticWorld {
    pub bodies: RigidBodySet,
    pub colliders: ColliderSet,
    pub broad_phase: BroadPhaseBvh,
    pub narrow_phase: NarrowPhase,
}

impl StaticWorld {
    pub fn build(mut defs: Vec<WorldStaticDef>) -> Self {
        defs.sort_by_key(|d| d.id);

        let mut bodies = RigidBodySet::new();
        let mut colliders = ColliderSet::new();
        for def in &defs {
            let pose = Isometry::from_parts(Translation3::from(def.translation), def.rotation);
            let handle = bodies.insert(RigidBodyBuilder::fixed().pose(pose).build());
            colliders.insert_with_parent(collider_from_def(def), handle, &mut bodies);
        }

        // Collision detection only (no dynamics) to populate the broad and narrow phases.
        let mut broad_phase = BroadPhaseBvh::new();
        let mut narrow_phase = NarrowPhase::new();
        let mut collision_pipeline = CollisionPipeline::new();
        collision_pipeline.step(
            0.0,
            &mut broad_phase,
            &mut narrow_phase,
            &mut bodies,
            &mut colliders,
            &(),
            &(),
        );
        log::debug!("static world built with {} colliders", colliders.len());

        Self {
            bodies,
            colliders,
            broad_phase,
            narrow_phase,
        }
    }

    /// Borrowed query view; use it within the scope of the borrow.
    pub fn query_pipeline<'a>(&'a self, filter: QueryFilter<'a>) -> QueryPipeline<'a> {
        self.broad_phase.as_query_pipeline(
            self.narrow_phase.query_dispatcher(),
            &self.bodies,
            &self.colliders,
            filter,
        )
    }
}

/// Capsule sweep through a [`StaticWorld`].
pub struct RapierSweep<'w> {
    world: &'w StaticWorld,
    capsule: Capsule,
    controller: KinematicCharacterController,
}

impl<'w> RapierSweep<'w> {
    pub fn new(world: &'w StaticWorld, radius: f32, half_height: f32) -> Self {
        Self {
            world,
            capsule: Capsule::new_z(half_height, radius),
            controller: KinematicCharacterController {
                autostep: Some(CharacterAutostep {
                    include_dynamic_bodies: false,
                    max_height: CharacterLength::Relative(0.4),
                    ..CharacterAutostep::default()
                }),
                offset: CharacterLength::Relative(0.025),
                ..KinematicCharacterController::default()
            },
        }
    }
}

impl MovementSweep for RapierSweep<'_> {
    fn sweep(&self, location: Vec3, _rotation: Quat, delta: Vec3, up: Vec3, dt: f32) -> SweepResult {
        let Some(up_axis) = UnitVector::try_new(up, f32::EPSILON) else {
            log::warn!("sweep without an up axis, moving unobstructed");
            return SweepResult {
                translation: delta,
                grounded: false,
            };
        };
        let controller = KinematicCharacterController {
            up: up_axis,
            ..self.controller
        };

        // The capsule stands along the gravity axis; its yaw does not matter.
        let shape_rotation = find_between_normals(&Vec3::z(), &up_axis.into_inner());
        let pose = Isometry::from_parts(Translation3::from(location), shape_rotation);
        let pipeline = self.world.query_pipeline(QueryFilter::only_fixed());
        let movement = controller.move_shape(dt, &pipeline, &self.capsule, &pose, delta, |_| {});

        SweepResult {
            translation: movement.translation,
            grounded: movement.grounded,
        }
    }
}
