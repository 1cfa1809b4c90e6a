//! Bit-level stream used for move and response payloads.
//!
//! Bits are packed LSB-first into bytes. Readers latch an error flag on the first failure
//! so a caller that only checks at the end still sees that the payload was bad.

use crate::error::{WireError, WireResult};

/// Longest length-prefixed string accepted on the wire.
pub const MAX_WIRE_STRING_BYTES: usize = u8::MAX as usize;

#[derive(Debug, Default, Clone)]
pub struct BitWriter {
    bytes: Vec<u8>,
    num_bits: u32,
}

impl BitWriter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_capacity_bits(bits: u32) -> Self {
        Self {
            bytes: Vec::with_capacity(bits.div_ceil(8) as usize),
            num_bits: 0,
        }
    }

    pub fn num_bits(&self) -> u32 {
        self.num_bits
    }

    pub fn write_bit(&mut self, bit: bool) {
        let byte = (self.num_bits / 8) as usize;
        if byte == self.bytes.len() {
            self.bytes.push(0);
        }
        if bit {
            self.bytes[byte] |= 1 << (self.num_bits % 8);
        }
        self.num_bits += 1;
    }

    /// Write the low `count` bits of `value` (count <= 32).
    pub fn write_bits(&mut self, value: u32, count: u32) {
        debug_assert!(count <= 32);
        for i in 0..count {
            self.write_bit((value >> i) & 1 == 1);
        }
    }

    pub fn write_u8(&mut self, value: u8) {
        self.write_bits(value as u32, 8);
    }

    pub fn write_u16(&mut self, value: u16) {
        self.write_bits(value as u32, 16);
    }

    pub fn write_u32(&mut self, value: u32) {
        self.write_bits(value, 32);
    }

    pub fn write_f32(&mut self, value: f32) {
        self.write_u32(value.to_bits());
    }

    /// 7 bits per group, high bit of each group set when more follow.
    pub fn write_packed_u32(&mut self, mut value: u32) {
        loop {
            let group = value & 0x7f;
            value >>= 7;
            let more = value != 0;
            self.write_bits(group | if more { 0x80 } else { 0 }, 8);
            if !more {
                break;
            }
        }
    }

    /// Length-prefixed UTF-8. Strings over the limit are truncated at a char boundary.
    pub fn write_string(&mut self, value: &str) {
        let mut end = value.len().min(MAX_WIRE_STRING_BYTES);
        while !value.is_char_boundary(end) {
            end -= 1;
        }
        if end < value.len() {
            log::warn!("truncating {} byte string to {end} bytes for the wire", value.len());
        }
        self.write_u8(end as u8);
        for &b in &value.as_bytes()[..end] {
            self.write_u8(b);
        }
    }

    pub fn into_packed(self) -> PackedBits {
        PackedBits {
            bytes: self.bytes,
            num_bits: self.num_bits,
        }
    }
}

#[derive(Debug)]
pub struct BitReader<'a> {
    bytes: &'a [u8],
    num_bits: u32,
    pos: u32,
    error: bool,
}

impl<'a> BitReader<'a> {
    /// Read at most `num_bits` bits from `bytes`.
    pub fn new(bytes: &'a [u8], num_bits: u32) -> Self {
        let available = (bytes.len() as u64 * 8).min(u32::MAX as u64) as u32;
        Self {
            bytes,
            num_bits: num_bits.min(available),
            pos: 0,
            error: false,
        }
    }

    pub fn from_packed(packed: &'a PackedBits) -> Self {
        Self::new(&packed.bytes, packed.num_bits)
    }

    pub fn is_error(&self) -> bool {
        self.error
    }

    /// Mark the stream invalid and hand back `err` for propagation.
    pub fn fail(&mut self, err: WireError) -> WireError {
        self.error = true;
        err
    }

    pub fn bits_left(&self) -> u32 {
        self.num_bits - self.pos
    }

    pub fn read_bit(&mut self) -> WireResult<bool> {
        if self.error {
            return Err(WireError::ReadPastEnd);
        }
        if self.pos >= self.num_bits {
            return Err(self.fail(WireError::ReadPastEnd));
        }
        let byte = self.bytes[(self.pos / 8) as usize];
        let bit = (byte >> (self.pos % 8)) & 1 == 1;
        self.pos += 1;
        Ok(bit)
    }

    pub fn read_bits(&mut self, count: u32) -> WireResult<u32> {
        debug_assert!(count <= 32);
        if count > self.bits_left() {
            return Err(self.fail(WireError::ReadPastEnd));
        }
        let mut value = 0u32;
        for i in 0..count {
            if self.read_bit()? {
                value |= 1 << i;
            }
        }
        Ok(value)
    }

    pub fn read_u8(&mut self) -> WireResult<u8> {
        Ok(self.read_bits(8)? as u8)
    }

    pub fn read_u16(&mut self) -> WireResult<u16> {
        Ok(self.read_bits(16)? as u16)
    }

    pub fn read_u32(&mut self) -> WireResult<u32> {
        self.read_bits(32)
    }

    pub fn read_f32(&mut self) -> WireResult<f32> {
        Ok(f32::from_bits(self.read_u32()?))
    }

    pub fn read_packed_u32(&mut self) -> WireResult<u32> {
        let mut value = 0u32;
        // Five groups cover 35 bits; anything longer is garbage.
        for shift in (0..35).step_by(7) {
            let group = self.read_u8()?;
            value |= ((group & 0x7f) as u32).checked_shl(shift).unwrap_or(0);
            if group & 0x80 == 0 {
                return Ok(value);
            }
        }
        Err(self.fail(WireError::InvalidEnum {
            what: "packed integer",
            value,
        }))
    }

    pub fn read_string(&mut self) -> WireResult<String> {
        let len = self.read_u8()? as usize;
        if len as u32 * 8 > self.bits_left() {
            return Err(self.fail(WireError::ReadPastEnd));
        }
        let mut buf = Vec::with_capacity(len);
        for _ in 0..len {
            buf.push(self.read_u8()?);
        }
        String::from_utf8(buf).map_err(|_| self.fail(WireError::InvalidUtf8))
    }
}

/// A finished bit payload plus its exact bit count.
///
/// On the wire it is a packed bit count followed by `ceil(num_bits / 8)` bytes.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct PackedBits {
    pub bytes: Vec<u8>,
    pub num_bits: u32,
}

impl PackedBits {
    pub fn to_wire(&self) -> Vec<u8> {
        let mut header = BitWriter::new();
        header.write_packed_u32(self.num_bits);
        let mut out = header.into_packed().bytes;
        out.extend_from_slice(&self.bytes[..self.num_bits.div_ceil(8) as usize]);
        out
    }

    /// Parse the wire form, rejecting bit counts larger than the payload or `max_bits`.
    pub fn from_wire(data: &[u8], max_bits: u32) -> WireResult<Self> {
        let mut reader = BitReader::new(data, u32::MAX);
        let num_bits = reader.read_packed_u32()?;
        let header_bytes = (reader.pos / 8) as usize;
        let payload = &data[header_bytes..];
        let available = (payload.len() as u64 * 8).min(u32::MAX as u64) as u32;

        if num_bits > max_bits {
            log::error!("packed payload declares {num_bits} bits, limit is {max_bits}");
            return Err(WireError::PacketTooLarge {
                bits: num_bits,
                max: max_bits,
            });
        }
        if num_bits > available {
            log::error!("packed payload declares {num_bits} bits but carries {available}");
            return Err(WireError::MalformedBitCount {
                declared: num_bits,
                available,
            });
        }

        Ok(Self {
            bytes: payload[..num_bits.div_ceil(8) as usize].to_vec(),
            num_bits,
        })
    }
}
