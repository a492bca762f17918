//! # PCM Types
//!
//! Interleaved signed 16-bit audio passed from decoders to writers.

use serde::{Deserialize, Serialize};

/// Format of a PCM stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PcmSpec {
    pub sample_rate: u32,
    pub channels: u16,
    pub bits_per_sample: u16,
}

impl PcmSpec {
    /// 16-bit spec, the only depth the decoders produce.
    pub fn s16(sample_rate: u32, channels: u16) -> Self {
        Self {
            sample_rate,
            channels,
            bits_per_sample: 16,
        }
    }

    /// Bytes per interleaved frame.
    pub fn block_align(&self) -> u16 {
        self.channels * (self.bits_per_sample / 8)
    }

    pub fn byte_rate(&self) -> u32 {
        self.sample_rate * self.block_align() as u32
    }
}

/// A run of interleaved samples decoded from one packet.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PcmBuffer {
    pub spec: PcmSpec,
    /// Interleaved samples, `frames() * spec.channels` long.
    pub samples: Vec<i16>,
}

impl PcmBuffer {
    pub fn new(spec: PcmSpec, samples: Vec<i16>) -> Self {
        debug_assert_eq!(samples.len() % spec.channels.max(1) as usize, 0);
        Self { spec, samples }
    }

    /// Number of sample frames (one sample per channel).
    pub fn frames(&self) -> usize {
        self.samples.len() / self.spec.channels.max(1) as usize
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_spec_derived_sizes() {
        let spec = PcmSpec::s16(44_100, 2);
        assert_eq!(spec.block_align(), 4);
        assert_eq!(spec.byte_rate(), 176_400);
    }

    #[test]
    fn test_buffer_frames() {
        let buffer = PcmBuffer::new(PcmSpec::s16(48_000, 2), vec![0; 960 * 2]);
        assert_eq!(buffer.frames(), 960);
        assert!(!buffer.is_empty());
    }
}
