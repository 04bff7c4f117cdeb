//! Compression stage
//!
//! Wraps encoded update bodies in a small envelope. Bodies above the
//! threshold are zlib-compressed with their original length prefixed;
//! everything else passes through behind a "not compressed" tag.

use std::io::{Read, Write};

use bytes::Bytes;
use flate2::read::ZlibDecoder;
use flate2::write::ZlibEncoder;
use flate2::Compression;
use tracing::{trace, warn};

use crate::error::EncodeError;
use crate::net::buffer::PacketBuffer;

/// Bodies up to this many bytes are sent uncompressed
pub const DEFAULT_THRESHOLD: usize = 100;

/// Largest envelope a single frame can carry
pub const DEFAULT_MAX_FRAME_SIZE: usize = 65533;

/// Envelope algorithm tag
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum CompressionTag {
    None = 0,
    Zlib = 1,
}

impl CompressionTag {
    pub fn from_u8(value: u8) -> Option<Self> {
        match value {
            0 => Some(Self::None),
            1 => Some(Self::Zlib),
            _ => None,
        }
    }
}

/// A body ready for framing
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Envelope {
    tag: CompressionTag,
    original_len: usize,
    bytes: Bytes,
}

impl Envelope {
    fn plain(body: &[u8]) -> Self {
        let mut buf = PacketBuffer::with_capacity(body.len() + 1);
        buf.write_ubyte(CompressionTag::None as u8);
        buf.write_bytes(body);
        Self {
            tag: CompressionTag::None,
            original_len: body.len(),
            bytes: buf.freeze(),
        }
    }

    fn zlib(original_len: usize, compressed: &[u8]) -> Self {
        let mut buf = PacketBuffer::with_capacity(compressed.len() + 5);
        buf.write_ubyte(CompressionTag::Zlib as u8);
        buf.write_uint_le(original_len as u32);
        buf.write_bytes(compressed);
        Self {
            tag: CompressionTag::Zlib,
            original_len,
            bytes: buf.freeze(),
        }
    }

    pub fn tag(&self) -> CompressionTag {
        self.tag
    }

    pub fn is_compressed(&self) -> bool {
        self.tag == CompressionTag::Zlib
    }

    /// Length of the body before compression
    pub fn original_size(&self) -> usize {
        self.original_len
    }

    /// Length of the carried body (equal to the original when not compressed)
    pub fn compressed_size(&self) -> usize {
        match self.tag {
            CompressionTag::None => self.bytes.len() - 1,
            CompressionTag::Zlib => self.bytes.len() - 5,
        }
    }

    /// Total envelope length including the header
    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes
    }

    pub fn into_bytes(self) -> Bytes {
        self.bytes
    }
}

/// Size-threshold zlib compressor
#[derive(Debug, Clone)]
pub struct Compressor {
    threshold: usize,
    max_frame_size: usize,
    level: Compression,
}

impl Default for Compressor {
    fn default() -> Self {
        Self::new(DEFAULT_THRESHOLD, DEFAULT_MAX_FRAME_SIZE)
    }
}

impl Compressor {
    pub fn new(threshold: usize, max_frame_size: usize) -> Self {
        Self {
            threshold,
            max_frame_size,
            level: Compression::default(),
        }
    }

    pub fn threshold(&self) -> usize {
        self.threshold
    }

    pub fn max_frame_size(&self) -> usize {
        self.max_frame_size
    }

    fn deflate(&self, body: &[u8]) -> std::io::Result<Vec<u8>> {
        let mut encoder = ZlibEncoder::new(Vec::with_capacity(body.len() / 2), self.level);
        encoder.write_all(body)?;
        encoder.finish()
    }

    /// Wrap a body in an envelope
    ///
    /// Never truncates: a body that cannot be brought under the maximum
    /// frame size is rejected with `EncodingOverflow`.
    pub fn compress(&self, body: &[u8]) -> Result<Envelope, EncodeError> {
        if body.len() <= self.threshold {
            return self.fit(Envelope::plain(body));
        }

        match self.deflate(body) {
            Ok(compressed) => {
                let envelope = Envelope::zlib(body.len(), &compressed);
                trace!(
                    original = body.len(),
                    compressed = envelope.compressed_size(),
                    "Compressed update body"
                );
                if envelope.len() <= self.max_frame_size {
                    return Ok(envelope);
                }
                // compressed output still too large; the raw body may fit
                self.fit(Envelope::plain(body))
                    .map_err(|_| EncodeError::EncodingOverflow {
                        size: envelope.len(),
                        max: self.max_frame_size,
                    })
            }
            Err(e) => {
                warn!(
                    error = %EncodeError::CompressionFailure(e.to_string()),
                    size = body.len(),
                    "Falling back to uncompressed framing"
                );
                self.fit(Envelope::plain(body))
            }
        }
    }

    fn fit(&self, envelope: Envelope) -> Result<Envelope, EncodeError> {
        if envelope.len() > self.max_frame_size {
            return Err(EncodeError::EncodingOverflow {
                size: envelope.len(),
                max: self.max_frame_size,
            });
        }
        Ok(envelope)
    }
}

/// Recover the original body from an envelope
pub fn decompress(envelope: &[u8]) -> Result<Vec<u8>, EncodeError> {
    let (&tag, rest) = envelope
        .split_first()
        .ok_or_else(|| EncodeError::Malformed("empty envelope".to_string()))?;

    match CompressionTag::from_u8(tag) {
        Some(CompressionTag::None) => Ok(rest.to_vec()),
        Some(CompressionTag::Zlib) => {
            if rest.len() < 4 {
                return Err(EncodeError::Malformed(
                    "compressed envelope too short".to_string(),
                ));
            }
            let original_len = u32::from_le_bytes([rest[0], rest[1], rest[2], rest[3]]) as usize;

            // at most one byte past the declared length
            let mut decoder = ZlibDecoder::new(&rest[4..]).take(original_len as u64 + 1);
            let mut body = Vec::new();
            decoder
                .read_to_end(&mut body)
                .map_err(|e| EncodeError::DecompressionFailure(e.to_string()))?;

            if body.len() != original_len {
                return Err(EncodeError::DecompressionFailure(format!(
                    "expected {} bytes, got {}",
                    original_len,
                    body.len()
                )));
            }
            Ok(body)
        }
        None => Err(EncodeError::Malformed(format!(
            "unknown compression tag {}",
            tag
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_small_body_passes_through() {
        let compressor = Compressor::default();
        let body = vec![7u8; DEFAULT_THRESHOLD];
        let envelope = compressor.compress(&body).unwrap();

        assert!(!envelope.is_compressed());
        assert_eq!(envelope.compressed_size(), envelope.original_size());
        assert_eq!(envelope.as_bytes()[0], 0);
        assert_eq!(decompress(envelope.as_bytes()).unwrap(), body);
    }

    #[test]
    fn test_large_body_is_compressed() {
        let compressor = Compressor::default();
        let body = vec![0u8; 4096];
        let envelope = compressor.compress(&body).unwrap();

        assert!(envelope.is_compressed());
        assert_eq!(envelope.original_size(), 4096);
        assert!(envelope.compressed_size() < 4096);
        assert_eq!(&envelope.as_bytes()[1..5], &4096u32.to_le_bytes());
        assert_eq!(decompress(envelope.as_bytes()).unwrap(), body);
    }

    #[test]
    fn test_overflow_is_rejected() {
        let compressor = Compressor::new(16, 64);
        // incompressible body well above the frame limit
        let mut state = 0x9E37_79B9u32;
        let body: Vec<u8> = (0..1024)
            .map(|_| {
                state ^= state << 13;
                state ^= state >> 17;
                state ^= state << 5;
                state as u8
            })
            .collect();

        let err = compressor.compress(&body).unwrap_err();
        assert!(matches!(err, EncodeError::EncodingOverflow { max: 64, .. }));
    }

    #[test]
    fn test_compressed_body_may_exceed_raw_limit() {
        let compressor = Compressor::new(16, 128);
        let body = vec![1u8; 1000];
        let envelope = compressor.compress(&body).unwrap();
        assert!(envelope.is_compressed());
        assert!(envelope.len() <= 128);
    }

    #[test]
    fn test_decompress_rejects_garbage() {
        assert!(decompress(&[]).is_err());
        assert!(matches!(
            decompress(&[9, 1, 2]),
            Err(EncodeError::Malformed(_))
        ));
        assert!(matches!(
            decompress(&[1, 10, 0, 0, 0, 0xFF, 0xFF]),
            Err(EncodeError::DecompressionFailure(_))
        ));
    }

    #[test]
    fn test_decompress_stops_at_declared_length() {
        let mut encoder = ZlibEncoder::new(Vec::new(), Compression::default());
        encoder.write_all(&vec![0u8; 1 << 20]).unwrap();
        let deflated = encoder.finish().unwrap();

        let mut envelope = vec![1u8];
        envelope.extend_from_slice(&10u32.to_le_bytes());
        envelope.extend_from_slice(&deflated);

        match decompress(&envelope) {
            Err(EncodeError::DecompressionFailure(msg)) => {
                assert_eq!(msg, "expected 10 bytes, got 11")
            }
            other => panic!("unexpected result: {:?}", other),
        }
    }
}
