//! Bit-stream encoding of root-motion sources and groups.
//!
//! Sources are written with a one-byte type tag. Decoding only accepts the known tags, so a
//! peer cannot make us construct anything outside the closed set of variants.

use crate::bits::{BitReader, BitWriter};
use crate::body::ActorId;
use crate::curve::{FloatCurve, VectorCurve};
use crate::error::{WireError, WireResult};
use crate::math::{Quat, Vec3};
use crate::quantize::{read_location, write_location};
use crate::root_motion::source::{
    AccumulateMode, ConstantForce, FinishVelocity, FinishVelocityMode, JumpForce,
    MoveToDynamicForce, MoveToForce, RadialForce, RootMotionSource, SourceKind, SourceSettings,
    SourceStatusFlags,
};
use crate::root_motion::RootMotionGroup;

pub const TAG_CONSTANT_FORCE: u8 = 1;
pub const TAG_RADIAL_FORCE: u8 = 2;
pub const TAG_MOVE_TO_FORCE: u8 = 3;
pub const TAG_MOVE_TO_DYNAMIC_FORCE: u8 = 4;
pub const TAG_JUMP_FORCE: u8 = 5;

/// Values with a fixed bit-stream layout.
pub trait WireCodec: Sized {
    fn encode(&self, w: &mut BitWriter);
    fn decode(r: &mut BitReader) -> WireResult<Self>;
}

fn kind_tag(kind: &SourceKind) -> u8 {
    match kind {
        SourceKind::ConstantForce(_) => TAG_CONSTANT_FORCE,
        SourceKind::RadialForce(_) => TAG_RADIAL_FORCE,
        SourceKind::MoveTo(_) => TAG_MOVE_TO_FORCE,
        SourceKind::MoveToDynamic(_) => TAG_MOVE_TO_DYNAMIC_FORCE,
        SourceKind::Jump(_) => TAG_JUMP_FORCE,
    }
}

/// Default-constructed variant for a tag, or `None` when the tag is not accepted.
fn kind_for_tag(tag: u8) -> Option<SourceKind> {
    let kind = match tag {
        TAG_CONSTANT_FORCE => SourceKind::ConstantForce(ConstantForce::default()),
        TAG_RADIAL_FORCE => SourceKind::RadialForce(RadialForce::default()),
        TAG_MOVE_TO_FORCE => SourceKind::MoveTo(MoveToForce::default()),
        TAG_MOVE_TO_DYNAMIC_FORCE => SourceKind::MoveToDynamic(MoveToDynamicForce::default()),
        TAG_JUMP_FORCE => SourceKind::Jump(JumpForce::default()),
        _ => return None,
    };
    Some(kind)
}

fn write_vec3(w: &mut BitWriter, v: &Vec3) {
    w.write_f32(v.x);
    w.write_f32(v.y);
    w.write_f32(v.z);
}

fn read_vec3(r: &mut BitReader) -> WireResult<Vec3> {
    Ok(Vec3::new(r.read_f32()?, r.read_f32()?, r.read_f32()?))
}

/// Raw f32 that must be finite; sample times and curve keys drive curve lookups.
fn read_finite_f32(r: &mut BitReader, what: &'static str) -> WireResult<f32> {
    let value = r.read_f32()?;
    if !value.is_finite() {
        log::error!("rejected non-finite {what} from the wire");
        return Err(r.fail(WireError::NonFinite { what }));
    }
    Ok(value)
}

fn read_finite_vec3(r: &mut BitReader, what: &'static str) -> WireResult<Vec3> {
    Ok(Vec3::new(
        read_finite_f32(r, what)?,
        read_finite_f32(r, what)?,
        read_finite_f32(r, what)?,
    ))
}

fn write_quat(w: &mut BitWriter, q: &Quat) {
    let c = q.coords;
    for v in [c.x, c.y, c.z, c.w] {
        w.write_f32(v);
    }
}

/// Degenerate quaternions decode as identity.
fn read_quat(r: &mut BitReader) -> WireResult<Quat> {
    let (i, j, k, w) = (r.read_f32()?, r.read_f32()?, r.read_f32()?, r.read_f32()?);
    let raw = nalgebra::Quaternion::new(w, i, j, k);
    Ok(Quat::try_new(raw, f32::EPSILON).unwrap_or_else(Quat::identity))
}

fn key_count(len: usize, what: &str) -> u8 {
    if len > u8::MAX as usize {
        log::warn!("{what} has {len} keys, only the first {} are sent", u8::MAX);
    }
    len.min(u8::MAX as usize) as u8
}

fn write_float_curve(w: &mut BitWriter, curve: &Option<FloatCurve>) {
    w.write_bit(curve.is_some());
    let Some(curve) = curve else { return };
    let count = key_count(curve.keys().len(), "float curve");
    w.write_u8(count);
    for key in &curve.keys()[..count as usize] {
        w.write_f32(key.time);
        w.write_f32(key.value);
    }
}

fn read_float_curve(r: &mut BitReader) -> WireResult<Option<FloatCurve>> {
    if !r.read_bit()? {
        return Ok(None);
    }
    let count = r.read_u8()?;
    let mut points = Vec::with_capacity(count as usize);
    for _ in 0..count {
        points.push((read_finite_f32(r, "curve key time")?, read_finite_f32(r, "curve key value")?));
    }
    Ok(Some(FloatCurve::new(points)))
}

fn write_vector_curve(w: &mut BitWriter, curve: &Option<VectorCurve>) {
    w.write_bit(curve.is_some());
    let Some(curve) = curve else { return };
    let count = key_count(curve.keys().len(), "vector curve");
    w.write_u8(count);
    for key in &curve.keys()[..count as usize] {
        w.write_f32(key.time);
        write_vec3(w, &key.value);
    }
}

fn read_vector_curve(r: &mut BitReader) -> WireResult<Option<VectorCurve>> {
    if !r.read_bit()? {
        return Ok(None);
    }
    let count = r.read_u8()?;
    let mut points = Vec::with_capacity(count as usize);
    for _ in 0..count {
        points.push((read_finite_f32(r, "curve key time")?, read_finite_vec3(r, "curve key value")?));
    }
    Ok(Some(VectorCurve::new(points)))
}

fn write_kind(w: &mut BitWriter, kind: &SourceKind) {
    match kind {
        SourceKind::ConstantForce(f) => {
            write_vec3(w, &f.force);
            write_float_curve(w, &f.strength_over_time);
        }
        SourceKind::RadialForce(f) => {
            write_vec3(w, &f.location);
            w.write_bit(f.location_actor.is_some());
            if let Some(ActorId(id)) = f.location_actor {
                w.write_u32(id);
            }
            w.write_f32(f.radius);
            w.write_f32(f.strength);
            w.write_bit(f.is_push);
            w.write_bit(f.no_z_force);
            write_float_curve(w, &f.strength_distance_falloff);
            write_float_curve(w, &f.strength_over_time);
            w.write_bit(f.use_fixed_world_direction);
            write_quat(w, &f.fixed_world_direction);
        }
        SourceKind::MoveTo(f) => {
            write_vec3(w, &f.start_location);
            write_vec3(w, &f.target_location);
            w.write_bit(f.restrict_speed_to_expected);
            write_vector_curve(w, &f.path_offset_curve);
        }
        SourceKind::MoveToDynamic(f) => {
            write_vec3(w, &f.start_location);
            write_vec3(w, &f.initial_target_location);
            write_vec3(w, &f.target_location);
            w.write_bit(f.restrict_speed_to_expected);
            write_vector_curve(w, &f.path_offset_curve);
            write_float_curve(w, &f.time_mapping_curve);
        }
        SourceKind::Jump(f) => {
            write_quat(w, &f.rotation);
            w.write_f32(f.distance);
            w.write_f32(f.height);
            w.write_bit(f.disable_timeout);
            write_vector_curve(w, &f.path_offset_curve);
            write_float_curve(w, &f.time_mapping_curve);
        }
    }
}

fn read_kind_into(r: &mut BitReader, kind: &mut SourceKind) -> WireResult<()> {
    match kind {
        SourceKind::ConstantForce(f) => {
            f.force = read_vec3(r)?;
            f.strength_over_time = read_float_curve(r)?;
        }
        SourceKind::RadialForce(f) => {
            f.location = read_vec3(r)?;
            f.location_actor = if r.read_bit()? {
                Some(ActorId(r.read_u32()?))
            } else {
                None
            };
            f.radius = r.read_f32()?;
            f.strength = r.read_f32()?;
            f.is_push = r.read_bit()?;
            f.no_z_force = r.read_bit()?;
            f.strength_distance_falloff = read_float_curve(r)?;
            f.strength_over_time = read_float_curve(r)?;
            f.use_fixed_world_direction = r.read_bit()?;
            f.fixed_world_direction = read_quat(r)?;
        }
        SourceKind::MoveTo(f) => {
            f.start_location = read_vec3(r)?;
            f.target_location = read_vec3(r)?;
            f.restrict_speed_to_expected = r.read_bit()?;
            f.path_offset_curve = read_vector_curve(r)?;
        }
        SourceKind::MoveToDynamic(f) => {
            f.start_location = read_vec3(r)?;
            f.initial_target_location = read_vec3(r)?;
            f.target_location = read_vec3(r)?;
            f.restrict_speed_to_expected = r.read_bit()?;
            f.path_offset_curve = read_vector_curve(r)?;
            f.time_mapping_curve = read_float_curve(r)?;
        }
        SourceKind::Jump(f) => {
            f.rotation = read_quat(r)?;
            f.distance = r.read_f32()?;
            f.height = r.read_f32()?;
            f.disable_timeout = r.read_bit()?;
            f.path_offset_curve = read_vector_curve(r)?;
            f.time_mapping_curve = read_float_curve(r)?;
        }
    }
    Ok(())
}

/// Shared fields plus variant fields; the type tag is written by the caller.
fn write_source_body(w: &mut BitWriter, source: &RootMotionSource) {
    w.write_u16(source.priority);
    w.write_u16(source.local_id);
    w.write_u8(source.accumulate_mode.to_u8());
    w.write_string(source.instance_name.as_deref().unwrap_or(""));
    w.write_f32(source.start_time);
    w.write_f32(source.time());
    w.write_f32(source.duration);
    w.write_u8(source.status.bits);
    w.write_u8(source.settings.bits);
    w.write_bit(source.in_local_space);

    let finish = &source.finish_velocity;
    w.write_u8(finish.mode.to_u8());
    write_vec3(w, &finish.set_velocity);
    w.write_f32(finish.clamp_velocity);

    write_kind(w, &source.kind);
}

fn read_source_body(r: &mut BitReader, source: &mut RootMotionSource) -> WireResult<()> {
    source.priority = r.read_u16()?;
    source.local_id = r.read_u16()?;
    let mode = r.read_u8()?;
    source.accumulate_mode = AccumulateMode::from_u8(mode).ok_or_else(|| {
        r.fail(WireError::InvalidEnum {
            what: "accumulate mode",
            value: mode as u32,
        })
    })?;
    let name = r.read_string()?;
    source.instance_name = (!name.is_empty()).then_some(name);
    source.start_time = read_finite_f32(r, "start time")?;
    source.set_time_raw(read_finite_f32(r, "source time")?);
    source.duration = read_finite_f32(r, "duration")?;
    source.status = SourceStatusFlags::new(r.read_u8()?);
    source.settings = SourceSettings::new(r.read_u8()?);
    source.in_local_space = r.read_bit()?;

    let finish_mode = r.read_u8()?;
    let mode = FinishVelocityMode::from_u8(finish_mode).ok_or_else(|| {
        r.fail(WireError::InvalidEnum {
            what: "finish velocity mode",
            value: finish_mode as u32,
        })
    })?;
    source.finish_velocity = FinishVelocity {
        mode,
        set_velocity: read_vec3(r)?,
        clamp_velocity: r.read_f32()?,
    };

    read_kind_into(r, &mut source.kind)
}

impl WireCodec for RootMotionSource {
    fn encode(&self, w: &mut BitWriter) {
        w.write_u8(kind_tag(&self.kind));
        write_source_body(w, self);
    }

    fn decode(r: &mut BitReader) -> WireResult<Self> {
        let mut slot = None;
        read_source_into(r, &mut slot)?;
        slot.ok_or(WireError::ReadPastEnd)
    }
}

/// Decode one tagged source, reusing `slot` when it already holds the same variant.
pub fn read_source_into(
    r: &mut BitReader,
    slot: &mut Option<RootMotionSource>,
) -> WireResult<()> {
    let tag = r.read_u8()?;
    let Some(kind) = kind_for_tag(tag) else {
        log::error!("rejected root motion source with type tag {tag}");
        return Err(r.fail(WireError::UnknownSourceType(tag)));
    };

    match slot {
        Some(existing) if existing.kind.same_variant(&kind) => {}
        _ => *slot = Some(RootMotionSource::new(kind)),
    }
    match slot.as_mut() {
        Some(source) => read_source_body(r, source),
        None => Err(WireError::ReadPastEnd),
    }
}

/// Count byte then each source. Lists longer than `max` are clamped with a warning.
pub fn write_source_array(w: &mut BitWriter, sources: &[RootMotionSource], max: u8) {
    if sources.len() > max as usize {
        log::warn!(
            "too many root motion sources ({}) to serialize, clamping to {max}",
            sources.len()
        );
    }
    let count = sources.len().min(max as usize);
    w.write_u8(count as u8);
    for source in &sources[..count] {
        source.encode(w);
    }
}

/// Decode into `sources`, reusing matching slots.
///
/// On error the sources decoded so far are kept and the rest of the list is dropped.
pub fn read_source_array(r: &mut BitReader, sources: &mut Vec<RootMotionSource>) -> WireResult<()> {
    let count = r.read_u8()? as usize;
    let mut slots: Vec<Option<RootMotionSource>> = std::mem::take(sources)
        .into_iter()
        .map(Some)
        .collect();
    slots.resize_with(count, || None);

    for index in 0..count {
        if let Err(err) = read_source_into(r, &mut slots[index]) {
            slots.truncate(index);
            sources.extend(slots.into_iter().flatten());
            return Err(err);
        }
    }
    sources.extend(slots.into_iter().flatten());
    Ok(())
}

pub fn write_group(w: &mut BitWriter, group: &RootMotionGroup) {
    w.write_bit(group.has_additive_sources);
    w.write_bit(group.has_override_sources);
    w.write_bit(group.has_override_sources_ignoring_z);
    write_location(w, &group.last_pre_additive_velocity);
    w.write_bit(group.is_additive_velocity_applied);
    w.write_u8(group.last_accumulated_settings.bits);

    let max = group.config.max_sources_to_serialize;
    let active_count = group.active.len().min(max as usize) as u8;
    write_source_array(w, &group.active, max);
    write_source_array(w, &group.pending, max - active_count);
}

/// Decode over an existing group so same-variant slots are reused.
///
/// The group may be left partially updated on error; callers decode into a scratch copy.
pub fn read_group_into(r: &mut BitReader, group: &mut RootMotionGroup) -> WireResult<()> {
    group.has_additive_sources = r.read_bit()?;
    group.has_override_sources = r.read_bit()?;
    group.has_override_sources_ignoring_z = r.read_bit()?;
    group.last_pre_additive_velocity = read_location(r)?;
    group.is_additive_velocity_applied = r.read_bit()?;
    group.last_accumulated_settings = SourceSettings::new(r.read_u8()?);
    read_source_array(r, &mut group.active)?;
    read_source_array(r, &mut group.pending)
}

impl WireCodec for RootMotionGroup {
    fn encode(&self, w: &mut BitWriter) {
        write_group(w, self);
    }

    fn decode(r: &mut BitReader) -> WireResult<Self> {
        let mut group = RootMotionGroup::default();
        read_group_into(r, &mut group)?;
        Ok(group)
    }
}
