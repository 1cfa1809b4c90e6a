//! Bounded-precision encodings for vectors and rotations sent with moves and corrections.

use std::f32::consts::TAU;

use crate::bits::{BitReader, BitWriter};
use crate::constants::{ACCELERATION_QUANTIZE_SCALE, LOCATION_QUANTIZE_SCALE};
use crate::error::{WireError, WireResult};
use crate::math::{Quat, Vec3, from_euler, to_euler};

/// Width of the per-vector "bits per component" header.
const PACKED_VECTOR_HEADER_BITS: u32 = 5;

const ACCELERATION_MAX_BITS: u32 = 24;
const LOCATION_MAX_BITS: u32 = 30;

/// Signed width needed to hold `magnitude` (at least 1 bit).
fn bits_for(magnitude: u64) -> u32 {
    (u64::BITS - magnitude.leading_zeros()) + 1
}

/// Write `v * scale` rounded, with the component width chosen per vector.
///
/// Components outside the range of `max_bits` saturate.
pub fn write_packed_vector(w: &mut BitWriter, v: &Vec3, scale: f32, max_bits: u32) {
    debug_assert!(max_bits < (1 << PACKED_VECTOR_HEADER_BITS) && max_bits >= 2);

    let scaled = [v.x, v.y, v.z].map(|c| (c * scale).round() as i64);
    let max_abs = scaled.iter().map(|c| c.unsigned_abs()).max().unwrap_or(0);
    let bits = bits_for(max_abs).min(max_bits);
    let bias = 1i64 << (bits - 1);

    w.write_bits(bits, PACKED_VECTOR_HEADER_BITS);
    for c in scaled {
        let clamped = c.clamp(-bias, bias - 1);
        w.write_bits((clamped + bias) as u32, bits);
    }
}

pub fn read_packed_vector(r: &mut BitReader, scale: f32, max_bits: u32) -> WireResult<Vec3> {
    let bits = r.read_bits(PACKED_VECTOR_HEADER_BITS)?;
    if bits == 0 || bits > max_bits {
        return Err(r.fail(WireError::InvalidEnum {
            what: "packed vector width",
            value: bits,
        }));
    }
    let bias = 1i64 << (bits - 1);
    let mut out = [0.0f32; 3];
    for c in &mut out {
        let raw = r.read_bits(bits)? as i64;
        *c = (raw - bias) as f32 / scale;
    }
    Ok(Vec3::new(out[0], out[1], out[2]))
}

/// 0.1 m/s^2 steps.
pub fn write_acceleration(w: &mut BitWriter, v: &Vec3) {
    write_packed_vector(w, v, ACCELERATION_QUANTIZE_SCALE, ACCELERATION_MAX_BITS);
}

pub fn read_acceleration(r: &mut BitReader) -> WireResult<Vec3> {
    read_packed_vector(r, ACCELERATION_QUANTIZE_SCALE, ACCELERATION_MAX_BITS)
}

/// 1cm steps; used for locations and velocities.
pub fn write_location(w: &mut BitWriter, v: &Vec3) {
    write_packed_vector(w, v, LOCATION_QUANTIZE_SCALE, LOCATION_MAX_BITS);
}

pub fn read_location(r: &mut BitReader) -> WireResult<Vec3> {
    read_packed_vector(r, LOCATION_QUANTIZE_SCALE, LOCATION_MAX_BITS)
}

const NORMAL_SCALE: f32 = i16::MAX as f32;
const NORMAL_BIAS: i32 = 1 << 15;

/// Zero-centred, so 0 and +-1 survive exactly.
fn unit_to_u16(x: f32) -> u16 {
    let scaled = (x.clamp(-1.0, 1.0) * NORMAL_SCALE).round() as i32;
    (scaled + NORMAL_BIAS) as u16
}

fn unit_from_u16(code: u16) -> f32 {
    ((code as i32 - NORMAL_BIAS) as f32 / NORMAL_SCALE).clamp(-1.0, 1.0)
}

/// Unit vector at 16 bits per component (gravity direction).
pub fn write_normal(w: &mut BitWriter, n: &Vec3) {
    for c in [n.x, n.y, n.z] {
        w.write_u16(unit_to_u16(c));
    }
}

pub fn read_normal(r: &mut BitReader) -> WireResult<Vec3> {
    let x = unit_from_u16(r.read_u16()?);
    let y = unit_from_u16(r.read_u16()?);
    let z = unit_from_u16(r.read_u16()?);
    Ok(Vec3::new(x, y, z))
}

/// Quantize radians into a u16 turn fraction.
pub fn angle_to_u16(radians: f32) -> u16 {
    const SCALE: f32 = 65536.0 / TAU;
    // i32 first so negative angles wrap instead of saturating at 0.
    (radians * SCALE).round() as i32 as u16
}

/// Dequantize into radians in [-π, π).
pub fn angle_from_u16(code: u16) -> f32 {
    const REV_SCALE: f32 = TAU / 65536.0;
    (code as i16) as f32 * REV_SCALE
}

/// Roll, pitch and yaw as shorts; each is preceded by a "non-zero" bit.
pub fn write_rotation(w: &mut BitWriter, rotation: &Quat) {
    let (roll, pitch, yaw) = to_euler(rotation);
    for angle in [roll, pitch, yaw] {
        let short = angle_to_u16(angle);
        w.write_bit(short != 0);
        if short != 0 {
            w.write_u16(short);
        }
    }
}

pub fn read_rotation(r: &mut BitReader) -> WireResult<Quat> {
    let mut angles = [0.0f32; 3];
    for angle in &mut angles {
        if r.read_bit()? {
            *angle = angle_from_u16(r.read_u16()?);
        }
    }
    Ok(from_euler(angles[0], angles[1], angles[2]))
}
