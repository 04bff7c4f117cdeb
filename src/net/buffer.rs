//! Packet buffer implementation
//!
//! Provides a byte buffer with the read/write operations the update protocol
//! needs:
//! - Unsigned/signed bytes and 16/32/64-bit integers
//! - Little-endian words (update payloads, movement data)
//! - Big-endian shorts (frame size header)
//! - IEEE-754 single precision floats as raw bit patterns

use bytes::{BufMut, Bytes, BytesMut};

/// Maximum frame size (size header is an unsigned short)
pub const MAX_PACKET_SIZE: usize = 65535;

/// Packet buffer for reading and writing protocol data
#[derive(Debug, Clone, Default)]
pub struct PacketBuffer {
    /// Internal byte buffer
    data: BytesMut,
    /// Current read position
    read_pos: usize,
}

impl PacketBuffer {
    /// Create a new empty packet buffer
    pub fn new() -> Self {
        Self {
            data: BytesMut::new(),
            read_pos: 0,
        }
    }

    /// Create a packet buffer with a specific capacity
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            data: BytesMut::with_capacity(capacity),
            read_pos: 0,
        }
    }

    /// Create a packet buffer from existing bytes
    pub fn from_bytes(bytes: &[u8]) -> Self {
        Self {
            data: BytesMut::from(bytes),
            read_pos: 0,
        }
    }

    // ============ Properties ============

    /// Get the total length of the buffer
    #[inline]
    pub fn len(&self) -> usize {
        self.data.len()
    }

    /// Check if the buffer is empty
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Get the number of bytes remaining to read
    #[inline]
    pub fn remaining(&self) -> usize {
        self.data.len().saturating_sub(self.read_pos)
    }

    /// Check if there are bytes remaining to read
    #[inline]
    pub fn has_remaining(&self) -> bool {
        self.remaining() > 0
    }

    /// Get a reference to the underlying bytes
    #[inline]
    pub fn as_bytes(&self) -> &[u8] {
        &self.data
    }

    /// Freeze the written bytes into an immutable, cheaply clonable handle
    pub fn freeze(self) -> Bytes {
        self.data.freeze()
    }

    /// Reset read position to start
    pub fn reset(&mut self) {
        self.read_pos = 0;
    }

    /// Skip a number of bytes when reading
    pub fn skip(&mut self, count: usize) {
        self.read_pos = (self.read_pos + count).min(self.data.len());
    }

    // ============ Reading Methods ============

    /// Read an unsigned byte (0 past the end)
    pub fn read_ubyte(&mut self) -> u8 {
        if self.read_pos >= self.data.len() {
            return 0;
        }
        let value = self.data[self.read_pos];
        self.read_pos += 1;
        value
    }

    /// Read an unsigned big-endian short (2 bytes)
    pub fn read_ushort(&mut self) -> u16 {
        let b1 = self.read_ubyte() as u16;
        let b2 = self.read_ubyte() as u16;
        (b1 << 8) | b2
    }

    /// Read an unsigned little-endian short (2 bytes)
    pub fn read_ushort_le(&mut self) -> u16 {
        let b1 = self.read_ubyte() as u16;
        let b2 = self.read_ubyte() as u16;
        (b2 << 8) | b1
    }

    /// Read an unsigned little-endian int (4 bytes)
    pub fn read_uint_le(&mut self) -> u32 {
        let mut bytes = [0u8; 4];
        self.read_bytes_into(&mut bytes);
        u32::from_le_bytes(bytes)
    }

    /// Read an unsigned little-endian long (8 bytes)
    pub fn read_ulong_le(&mut self) -> u64 {
        let low = self.read_uint_le() as u64;
        let high = self.read_uint_le() as u64;
        (high << 32) | low
    }

    /// Read a little-endian IEEE-754 float
    pub fn read_float_le(&mut self) -> f32 {
        f32::from_bits(self.read_uint_le())
    }

    /// Read a specific number of bytes
    pub fn read_bytes(&mut self, length: usize) -> Vec<u8> {
        let end = (self.read_pos + length).min(self.data.len());
        let bytes = self.data[self.read_pos..end].to_vec();
        self.read_pos = end;
        bytes
    }

    /// Read bytes into an existing slice, zero-filling past the end
    pub fn read_bytes_into(&mut self, dest: &mut [u8]) {
        let len = dest.len().min(self.remaining());
        dest[..len].copy_from_slice(&self.data[self.read_pos..self.read_pos + len]);
        dest[len..].fill(0);
        self.read_pos += len;
    }

    // ============ Writing Methods ============

    /// Write an unsigned byte
    pub fn write_ubyte(&mut self, value: u8) {
        self.data.put_u8(value);
    }

    /// Write an unsigned big-endian short (2 bytes)
    pub fn write_ushort(&mut self, value: u16) {
        self.data.put_u16(value);
    }

    /// Write an unsigned little-endian short (2 bytes)
    pub fn write_ushort_le(&mut self, value: u16) {
        self.data.put_u16_le(value);
    }

    /// Write an unsigned little-endian int (4 bytes)
    pub fn write_uint_le(&mut self, value: u32) {
        self.data.put_u32_le(value);
    }

    /// Write an unsigned little-endian long (8 bytes)
    pub fn write_ulong_le(&mut self, value: u64) {
        self.data.put_u64_le(value);
    }

    /// Write a little-endian IEEE-754 float
    pub fn write_float_le(&mut self, value: f32) {
        self.data.put_f32_le(value);
    }

    /// Write raw bytes
    pub fn write_bytes(&mut self, bytes: &[u8]) {
        self.data.extend_from_slice(bytes);
    }
}

impl From<Vec<u8>> for PacketBuffer {
    fn from(vec: Vec<u8>) -> Self {
        Self::from_bytes(&vec)
    }
}

impl From<&[u8]> for PacketBuffer {
    fn from(slice: &[u8]) -> Self {
        Self::from_bytes(slice)
    }
}

impl AsRef<[u8]> for PacketBuffer {
    fn as_ref(&self) -> &[u8] {
        &self.data
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_basic_read_write() {
        let mut buf = PacketBuffer::new();

        buf.write_ubyte(255);
        buf.write_ushort(1234);
        buf.write_uint_le(987654);
        buf.write_ulong_le(123456789012345);

        buf.reset();

        assert_eq!(buf.read_ubyte(), 255);
        assert_eq!(buf.read_ushort(), 1234);
        assert_eq!(buf.read_uint_le(), 987654);
        assert_eq!(buf.read_ulong_le(), 123456789012345);
    }

    #[test]
    fn test_little_endian_layout() {
        let mut buf = PacketBuffer::new();
        buf.write_uint_le(0x12345678);
        buf.write_ushort_le(0xABCD);

        assert_eq!(buf.as_bytes(), &[0x78, 0x56, 0x34, 0x12, 0xCD, 0xAB]);

        buf.reset();
        assert_eq!(buf.read_uint_le(), 0x12345678);
        assert_eq!(buf.read_ushort_le(), 0xABCD);
    }

    #[test]
    fn test_big_endian_short() {
        let mut buf = PacketBuffer::new();
        buf.write_ushort(0x0102);
        assert_eq!(buf.as_bytes(), &[0x01, 0x02]);
    }

    #[test]
    fn test_float_bits() {
        let mut buf = PacketBuffer::new();
        buf.write_float_le(7.0);

        assert_eq!(buf.as_bytes(), &7.0f32.to_bits().to_le_bytes());

        buf.reset();
        assert_eq!(buf.read_float_le(), 7.0);
    }

    #[test]
    fn test_read_past_end() {
        let mut buf = PacketBuffer::from_bytes(&[0x01, 0x02]);
        assert_eq!(buf.read_uint_le(), 0x0201);
        assert!(!buf.has_remaining());
        assert_eq!(buf.read_ubyte(), 0);
    }

    #[test]
    fn test_remaining() {
        let mut buf = PacketBuffer::new();
        buf.write_uint_le(12345);

        buf.reset();
        assert_eq!(buf.remaining(), 4);

        buf.read_ushort_le();
        assert_eq!(buf.remaining(), 2);

        buf.skip(10);
        assert_eq!(buf.remaining(), 0);
        assert!(!buf.has_remaining());
    }

    #[test]
    fn test_bytes() {
        let mut buf = PacketBuffer::new();
        let data = [1, 2, 3, 4, 5];

        buf.write_bytes(&data);

        buf.reset();

        assert_eq!(buf.read_bytes(5), data.to_vec());
        assert_eq!(buf.freeze().as_ref(), &data);
    }
}
