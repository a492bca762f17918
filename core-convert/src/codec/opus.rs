//! # Opus Decoder
//!
//! Decodes an Opus logical stream with libopus, always at the 48 kHz
//! reference rate. The rate stored in `OpusHead` only records what the
//! encoder was fed and is not used for playback.

use std::io::Read;

use tracing::{debug, trace};

use super::sample_converter::SampleConverter;
use super::PcmDecoder;
use crate::error::{ConvertError, Result};
use crate::ogg::demux::OPUS_HEAD_MAGIC;
use crate::ogg::OggDemuxer;
use crate::pcm::{PcmBuffer, PcmSpec};

/// Output rate of every Opus decoder.
pub const OPUS_RATE: u32 = 48_000;

/// Longest Opus packet: 120 ms at 48 kHz.
pub const MAX_FRAME_SAMPLES: usize = 5_760;

const OPUS_TAGS_MAGIC: &[u8; 8] = b"OpusTags";

/// Parsed `OpusHead` identification header.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OpusHead {
    pub version: u8,
    pub channels: u8,
    /// Samples (at 48 kHz) to discard from the start of the decoded output.
    pub pre_skip: u16,
    pub input_sample_rate: u32,
    /// Q7.8 fixed-point gain in dB.
    pub output_gain: i16,
    pub mapping_family: u8,
    /// Stream count, coupled count and channel mapping for family != 0.
    pub mapping: Option<ChannelMapping>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChannelMapping {
    pub stream_count: u8,
    pub coupled_count: u8,
    pub mapping: Vec<u8>,
}

impl OpusHead {
    /// Parse an identification header packet.
    ///
    /// # Errors
    ///
    /// [`ConvertError::Decode`] for truncated or inconsistent headers;
    /// [`ConvertError::UnsupportedCodec`] for an incompatible major version.
    pub fn parse(packet: &[u8]) -> Result<Self> {
        if packet.len() < 19 || !packet.starts_with(OPUS_HEAD_MAGIC) {
            return Err(ConvertError::Decode(format!(
                "OpusHead too short or missing signature ({} bytes)",
                packet.len()
            )));
        }

        let version = packet[8];
        if version >> 4 != 0 {
            return Err(ConvertError::UnsupportedCodec(format!(
                "Opus header version {} is not supported",
                version
            )));
        }

        let channels = packet[9];
        if channels == 0 {
            return Err(ConvertError::Decode(
                "OpusHead declares zero channels".to_string(),
            ));
        }

        let pre_skip = u16::from_le_bytes([packet[10], packet[11]]);
        let input_sample_rate = u32::from_le_bytes([packet[12], packet[13], packet[14], packet[15]]);
        let output_gain = i16::from_le_bytes([packet[16], packet[17]]);
        let mapping_family = packet[18];

        let mapping = if mapping_family == 0 {
            None
        } else {
            let needed = 21 + channels as usize;
            if packet.len() < needed {
                return Err(ConvertError::Decode(format!(
                    "OpusHead channel mapping table truncated ({} of {} bytes)",
                    packet.len(),
                    needed
                )));
            }
            Some(ChannelMapping {
                stream_count: packet[19],
                coupled_count: packet[20],
                mapping: packet[21..needed].to_vec(),
            })
        };

        Ok(Self {
            version,
            channels,
            pre_skip,
            input_sample_rate,
            output_gain,
            mapping_family,
            mapping,
        })
    }

    /// Channel layout libopus can decode with a single-stream decoder.
    ///
    /// # Errors
    ///
    /// [`ConvertError::UnsupportedCodec`] for multistream or surround
    /// configurations.
    pub fn decoder_channels(&self) -> Result<opus::Channels> {
        let layout = match self.channels {
            1 => opus::Channels::Mono,
            2 => opus::Channels::Stereo,
            n => {
                return Err(ConvertError::UnsupportedCodec(format!(
                    "Opus stream with {} channels (mapping family {}) is not supported",
                    n, self.mapping_family
                )))
            }
        };

        match (self.mapping_family, &self.mapping) {
            (0, _) => Ok(layout),
            (1, Some(m)) => {
                let coupled = u8::from(self.channels == 2);
                let identity = m.mapping.iter().enumerate().all(|(i, &c)| c as usize == i);
                if m.stream_count == 1 && m.coupled_count == coupled && identity {
                    Ok(layout)
                } else {
                    Err(ConvertError::UnsupportedCodec(format!(
                        "Opus multistream layout ({} streams, {} coupled) is not supported",
                        m.stream_count, m.coupled_count
                    )))
                }
            }
            (family, _) => Err(ConvertError::UnsupportedCodec(format!(
                "Opus channel mapping family {} is not supported",
                family
            ))),
        }
    }
}

/// Streaming Opus → PCM decoder over a demuxed OGG stream.
pub struct OpusPacketDecoder<R> {
    demuxer: OggDemuxer<R>,
    head: OpusHead,
    decoder: opus::Decoder,
    spec: PcmSpec,
    scratch: Vec<i16>,
    /// Samples per channel decoded so far, pre-skip included.
    decoded: u64,
    emitted: u64,
    done: bool,
}

impl<R: Read> OpusPacketDecoder<R> {
    /// Read both Opus header packets and set up libopus.
    ///
    /// # Errors
    ///
    /// - [`ConvertError::UnsupportedCodec`] if the stream is not Opus or
    ///   uses an unsupported channel layout.
    /// - [`ConvertError::Decode`] for invalid headers or a missing `OpusTags`.
    pub fn new(mut demuxer: OggDemuxer<R>) -> Result<Self> {
        let head_packet = demuxer
            .next_packet()?
            .ok_or_else(|| ConvertError::Decode("stream has no OpusHead".to_string()))?;
        let head = OpusHead::parse(&head_packet.data)?;
        let layout = head.decoder_channels()?;

        let tags = demuxer
            .next_packet()?
            .ok_or_else(|| ConvertError::Decode("stream ended before OpusTags".to_string()))?;
        if !tags.data.starts_with(OPUS_TAGS_MAGIC) {
            return Err(ConvertError::Decode(
                "second Opus packet is not OpusTags".to_string(),
            ));
        }

        let mut decoder = opus::Decoder::new(OPUS_RATE, layout)
            .map_err(|e| ConvertError::Decode(format!("libopus init failed: {}", e)))?;
        if head.output_gain != 0 {
            decoder
                .set_gain(head.output_gain as i32)
                .map_err(|e| ConvertError::Decode(format!("libopus gain rejected: {}", e)))?;
        }

        debug!(
            channels = head.channels,
            pre_skip = head.pre_skip,
            input_rate = head.input_sample_rate,
            gain_q8 = head.output_gain,
            "opened Opus stream"
        );

        let channels = head.channels as usize;
        Ok(Self {
            demuxer,
            spec: PcmSpec::s16(OPUS_RATE, head.channels as u16),
            head,
            decoder,
            scratch: vec![0i16; MAX_FRAME_SAMPLES * channels],
            decoded: 0,
            emitted: 0,
            done: tags.eos,
        })
    }

    pub fn head(&self) -> &OpusHead {
        &self.head
    }
}

impl<R: Read> PcmDecoder for OpusPacketDecoder<R> {
    fn spec(&self) -> PcmSpec {
        self.spec
    }

    fn decode_next(&mut self) -> Result<Option<PcmBuffer>> {
        let channels = self.head.channels as usize;
        let pre_skip = self.head.pre_skip as u64;

        while !self.done {
            let Some(packet) = self.demuxer.next_packet()? else {
                self.done = true;
                break;
            };
            if packet.eos {
                self.done = true;
            }
            if packet.data.is_empty() {
                continue;
            }

            let frames = self
                .decoder
                .decode(&packet.data, &mut self.scratch, false)
                .map_err(|e| {
                    ConvertError::Decode(format!(
                        "Opus packet at sample {} rejected: {}",
                        self.decoded, e
                    ))
                })? as u64;

            let start = self.decoded;
            let mut end = start + frames;
            self.decoded = end;

            if packet.eos {
                if let Some(granule) = packet.granule_position {
                    end = end.min(granule.max(start));
                }
            }

            let first = start.max(pre_skip);
            if end <= first {
                trace!(start, end, "packet consumed by pre-skip or end trim");
                continue;
            }

            let mut samples = self.scratch[..frames as usize * channels].to_vec();
            SampleConverter::trim_frames(
                &mut samples,
                channels,
                (first - start) as usize,
                (end - first) as usize,
            );
            self.emitted += end - first;
            return Ok(Some(PcmBuffer::new(self.spec, samples)));
        }

        Ok(None)
    }

    fn frames_emitted(&self) -> u64 {
        self.emitted
    }
}
