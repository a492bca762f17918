//! # AAC Encoder
//!
//! AAC-LC through FDK-AAC, producing raw access units (no ADTS headers) for
//! the M4A muxer.
//!
//! ## Priming and drain
//!
//! The encoder delays its output by [`ENCODER_DELAY`] samples. At end of
//! input it is fed silence until every source sample has been covered by an
//! access unit; access units past that point are dropped so the track is
//! exactly `ceil((frames + delay) / 1024)` units long.

use core_runtime::AacBitrate;
use fdk_aac::enc::{BitRate, ChannelMode, Encoder, EncoderParams, Transport};
use tracing::{debug, trace};

use crate::error::{ConvertError, Result};
use crate::pcm::PcmSpec;

/// Samples per channel in one AAC-LC access unit.
pub const AAC_FRAME_LEN: usize = 1024;

/// Priming samples FDK-AAC emits ahead of the source audio.
pub const ENCODER_DELAY: u64 = 2048;

/// Upper bound for a single raw access unit.
const MAX_ACCESS_UNIT_LEN: usize = 8192;

/// Silence fed beyond the priming delay before giving up on draining.
const MAX_DRAIN_FRAMES: u64 = ENCODER_DELAY + 8 * AAC_FRAME_LEN as u64;

/// Streaming PCM → AAC-LC encoder.
pub struct AacEncoder {
    encoder: Encoder,
    spec: PcmSpec,
    bitrate: AacBitrate,
    pending: Vec<i16>,
    output: Vec<u8>,
    input_frames: u64,
    units: u64,
}

impl AacEncoder {
    /// Set up FDK-AAC for the given PCM format.
    ///
    /// # Errors
    ///
    /// [`ConvertError::Encode`] for anything other than mono or stereo, or
    /// if FDK-AAC rejects the configuration.
    pub fn new(spec: PcmSpec, bitrate: AacBitrate) -> Result<Self> {
        let channels = match spec.channels {
            1 => ChannelMode::Mono,
            2 => ChannelMode::Stereo,
            n => {
                return Err(ConvertError::Encode(format!(
                    "unsupported channel layout: {} channels",
                    n
                )))
            }
        };

        let encoder = Encoder::new(EncoderParams {
            bit_rate: fdk_bitrate(bitrate),
            sample_rate: spec.sample_rate,
            transport: Transport::Raw,
            channels,
        })
        .map_err(|e| ConvertError::Encode(format!("AAC encoder init failed: {:?}", e)))?;

        debug!(
            sample_rate = spec.sample_rate,
            channels = spec.channels,
            bitrate = ?bitrate,
            "opened AAC encoder"
        );

        Ok(Self {
            encoder,
            spec,
            bitrate,
            pending: Vec::new(),
            output: vec![0u8; MAX_ACCESS_UNIT_LEN],
            input_frames: 0,
            units: 0,
        })
    }

    pub fn spec(&self) -> PcmSpec {
        self.spec
    }

    pub fn bitrate(&self) -> AacBitrate {
        self.bitrate
    }

    /// Source frames accepted so far, excluding drain padding.
    pub fn input_frames(&self) -> u64 {
        self.input_frames
    }

    /// Access units handed to `emit` so far.
    pub fn units(&self) -> u64 {
        self.units
    }

    /// Access units needed to cover `frames` source frames.
    pub fn units_for(frames: u64) -> u64 {
        (frames + ENCODER_DELAY).div_ceil(AAC_FRAME_LEN as u64)
    }

    /// Encode interleaved samples, passing each finished access unit to
    /// `emit`.
    ///
    /// # Errors
    ///
    /// [`ConvertError::Encode`] if FDK-AAC fails, or whatever `emit` returns.
    pub fn encode<F>(&mut self, samples: &[i16], mut emit: F) -> Result<()>
    where
        F: FnMut(&[u8]) -> Result<()>,
    {
        self.input_frames += (samples.len() / self.spec.channels as usize) as u64;
        self.pending.extend_from_slice(samples);
        self.feed(None, &mut emit)
    }

    /// Drain the encoder with silence, emitting the remaining access units.
    ///
    /// Returns the number of source frames encoded.
    ///
    /// # Errors
    ///
    /// [`ConvertError::Encode`] if FDK-AAC fails or never produces the
    /// expected number of access units.
    pub fn finish<F>(mut self, mut emit: F) -> Result<u64>
    where
        F: FnMut(&[u8]) -> Result<()>,
    {
        let target = Self::units_for(self.input_frames);
        let silence = vec![0i16; AAC_FRAME_LEN * self.spec.channels as usize];
        let mut padded = 0u64;

        while self.units < target {
            if padded >= MAX_DRAIN_FRAMES {
                return Err(ConvertError::Encode(format!(
                    "AAC encoder stalled at {} of {} access units",
                    self.units, target
                )));
            }
            self.pending.extend_from_slice(&silence);
            padded += AAC_FRAME_LEN as u64;
            self.feed(Some(target), &mut emit)?;
        }

        debug!(
            frames = self.input_frames,
            units = self.units,
            padded,
            "AAC encoder drained"
        );
        Ok(self.input_frames)
    }

    fn feed(
        &mut self,
        limit: Option<u64>,
        emit: &mut dyn FnMut(&[u8]) -> Result<()>,
    ) -> Result<()> {
        let mut offset = 0;

        while offset < self.pending.len() {
            let info = self
                .encoder
                .encode(&self.pending[offset..], &mut self.output)
                .map_err(|e| ConvertError::Encode(format!("AAC encode failed: {:?}", e)))?;

            if info.output_size > 0 {
                if limit.map_or(true, |max| self.units < max) {
                    emit(&self.output[..info.output_size])?;
                    self.units += 1;
                } else {
                    trace!(bytes = info.output_size, "dropped surplus access unit");
                }
            }

            offset += info.input_consumed;
            if info.input_consumed == 0 && info.output_size == 0 {
                break;
            }
        }

        self.pending.drain(..offset.min(self.pending.len()));
        Ok(())
    }
}

fn fdk_bitrate(bitrate: AacBitrate) -> BitRate {
    match bitrate {
        AacBitrate::Cbr(bps) => BitRate::Cbr(bps),
        AacBitrate::VbrLow => BitRate::VbrLow,
        AacBitrate::VbrMedium => BitRate::VbrMedium,
        AacBitrate::VbrHigh => BitRate::VbrHigh,
    }
}
