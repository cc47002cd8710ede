//! PCM frames and frame assembly.
//!
//! All audio in the core is 16-bit little-endian mono PCM. The VAD consumes
//! fixed-size frames; inbound transport chunks are re-cut into frames by
//! [`FrameAssembler`].

use std::sync::Arc;

/// One fixed-duration chunk of 16-bit PCM samples.
///
/// Frames are immutable once received; cloning is cheap.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AudioFrame {
    bytes: Arc<[u8]>,
}

impl AudioFrame {
    pub fn from_bytes(bytes: impl Into<Arc<[u8]>>) -> Self {
        Self {
            bytes: bytes.into(),
        }
    }

    pub fn from_samples(samples: &[i16]) -> Self {
        Self::from_bytes(samples_to_bytes(samples))
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes
    }

    pub fn len_bytes(&self) -> usize {
        self.bytes.len()
    }

    /// Decode to samples. A trailing odd byte is ignored.
    pub fn samples(&self) -> Vec<i16> {
        bytes_to_samples(&self.bytes)
    }

    /// Root-mean-square energy on the i16 scale.
    pub fn rms(&self) -> f32 {
        rms(&self.samples())
    }
}

/// Encode samples as little-endian bytes.
pub fn samples_to_bytes(samples: &[i16]) -> Vec<u8> {
    let mut out = Vec::with_capacity(samples.len() * 2);
    for s in samples {
        out.extend_from_slice(&s.to_le_bytes());
    }
    out
}

/// Decode little-endian bytes into samples.
pub fn bytes_to_samples(bytes: &[u8]) -> Vec<i16> {
    bytes
        .chunks_exact(2)
        .map(|pair| i16::from_le_bytes([pair[0], pair[1]]))
        .collect()
}

/// RMS of i16 samples. Returns 0.0 for an empty slice.
pub fn rms(samples: &[i16]) -> f32 {
    if samples.is_empty() {
        return 0.0;
    }
    let sum: f64 = samples.iter().map(|&s| (s as f64) * (s as f64)).sum();
    (sum / samples.len() as f64).sqrt() as f32
}

/// Re-cuts arbitrarily sized byte chunks into exact frames.
///
/// Bytes that do not fill a frame are carried over to the next `push`.
#[derive(Debug)]
pub struct FrameAssembler {
    frame_bytes: usize,
    carry: Vec<u8>,
}

impl FrameAssembler {
    pub fn new(frame_bytes: usize) -> Self {
        Self {
            frame_bytes,
            carry: Vec::with_capacity(frame_bytes),
        }
    }

    /// Append `bytes` and return every complete frame now available.
    pub fn push(&mut self, bytes: &[u8]) -> Vec<AudioFrame> {
        if self.frame_bytes == 0 {
            return Vec::new();
        }
        self.carry.extend_from_slice(bytes);
        let whole = self.carry.len() / self.frame_bytes * self.frame_bytes;
        if whole == 0 {
            return Vec::new();
        }
        let frames = self.carry[..whole]
            .chunks_exact(self.frame_bytes)
            .map(|chunk| AudioFrame::from_bytes(chunk.to_vec()))
            .collect();
        self.carry.drain(..whole);
        frames
    }

    /// Bytes waiting for the rest of their frame.
    pub fn pending(&self) -> usize {
        self.carry.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rms_of_constant_signal() {
        let frame = AudioFrame::from_samples(&[1000; 480]);
        assert!((frame.rms() - 1000.0).abs() < 0.5);
        assert_eq!(frame.len_bytes(), 960);
    }

    #[test]
    fn rms_of_silence_is_zero() {
        assert_eq!(rms(&[]), 0.0);
        assert_eq!(AudioFrame::from_samples(&[0; 160]).rms(), 0.0);
    }

    #[test]
    fn assembler_carries_partial_frames() {
        let mut asm = FrameAssembler::new(960);
        assert!(asm.push(&[0u8; 500]).is_empty());
        assert_eq!(asm.pending(), 500);

        let frames = asm.push(&[0u8; 1500]);
        assert_eq!(frames.len(), 2);
        assert!(frames.iter().all(|f| f.len_bytes() == 960));
        assert_eq!(asm.pending(), 80);
    }

    #[test]
    fn assembler_preserves_byte_order() {
        let mut asm = FrameAssembler::new(4);
        let frames = asm.push(&[1, 2, 3, 4, 5, 6]);
        assert_eq!(frames.len(), 1);
        assert_eq!(frames[0].as_bytes(), &[1, 2, 3, 4]);
        let frames = asm.push(&[7, 8]);
        assert_eq!(frames[0].as_bytes(), &[5, 6, 7, 8]);
    }
}
