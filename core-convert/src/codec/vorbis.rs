//! # Vorbis Decoder
//!
//! Header validation happens here; audio packets go through Symphonia's
//! Vorbis decoder, fed straight from the OGG demuxer.

use std::io::Read;

use symphonia::core::codecs::{CodecParameters, Decoder, DecoderOptions, CODEC_TYPE_VORBIS};
use symphonia::core::errors::Error as SymphoniaError;
use symphonia::core::formats::Packet;
use symphonia::core::units::TimeBase;
use tracing::{debug, trace};

use super::sample_converter::SampleConverter;
use super::PcmDecoder;
use crate::error::{ConvertError, Result};
use crate::ogg::demux::VORBIS_IDENT_MAGIC;
use crate::ogg::{CodecPacket, OggDemuxer};
use crate::pcm::{PcmBuffer, PcmSpec};

const IDENT_HEADER_LEN: usize = 30;
const COMMENT_HEADER_TYPE: u8 = 3;
const SETUP_HEADER_TYPE: u8 = 5;

/// Parsed Vorbis identification header.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VorbisIdent {
    pub channels: u8,
    pub sample_rate: u32,
    pub bitrate_maximum: i32,
    pub bitrate_nominal: i32,
    pub bitrate_minimum: i32,
    pub blocksize_0: u16,
    pub blocksize_1: u16,
}

impl VorbisIdent {
    /// Parse and validate an identification header packet.
    ///
    /// # Errors
    ///
    /// [`ConvertError::Decode`] when the header is truncated or violates the
    /// Vorbis I constraints (version, channel count, rate, block sizes,
    /// framing bit).
    pub fn parse(packet: &[u8]) -> Result<Self> {
        if packet.len() < IDENT_HEADER_LEN || !packet.starts_with(VORBIS_IDENT_MAGIC) {
            return Err(ConvertError::Decode(format!(
                "Vorbis identification header too short or missing signature ({} bytes)",
                packet.len()
            )));
        }

        let version = u32::from_le_bytes([packet[7], packet[8], packet[9], packet[10]]);
        if version != 0 {
            return Err(ConvertError::Decode(format!(
                "Vorbis version {} is not Vorbis I",
                version
            )));
        }

        let channels = packet[11];
        let sample_rate = u32::from_le_bytes([packet[12], packet[13], packet[14], packet[15]]);
        let read_i32 = |at: usize| {
            i32::from_le_bytes([packet[at], packet[at + 1], packet[at + 2], packet[at + 3]])
        };
        let blocksize_0 = 1u16 << (packet[28] & 0x0F);
        let blocksize_1 = 1u16 << (packet[28] >> 4);

        if channels == 0 {
            return Err(ConvertError::Decode(
                "Vorbis header declares zero channels".to_string(),
            ));
        }
        if sample_rate == 0 {
            return Err(ConvertError::Decode(
                "Vorbis header declares a zero sample rate".to_string(),
            ));
        }
        let valid_block = |b: u16| (64..=8192).contains(&b);
        if !valid_block(blocksize_0) || !valid_block(blocksize_1) || blocksize_0 > blocksize_1 {
            return Err(ConvertError::Decode(format!(
                "invalid Vorbis block sizes {}/{}",
                blocksize_0, blocksize_1
            )));
        }
        if packet[29] & 0x01 == 0 {
            return Err(ConvertError::Decode(
                "Vorbis identification header framing bit not set".to_string(),
            ));
        }

        Ok(Self {
            channels,
            sample_rate,
            bitrate_maximum: read_i32(16),
            bitrate_nominal: read_i32(20),
            bitrate_minimum: read_i32(24),
            blocksize_0,
            blocksize_1,
        })
    }
}

fn expect_header(packet: Option<CodecPacket>, kind: u8, name: &str) -> Result<CodecPacket> {
    match packet {
        Some(p) if p.data.len() >= 7 && p.data[0] == kind && &p.data[1..7] == b"vorbis" => Ok(p),
        Some(_) => Err(ConvertError::Decode(format!(
            "expected Vorbis {} header",
            name
        ))),
        None => Err(ConvertError::Decode(format!(
            "stream ended before the Vorbis {} header",
            name
        ))),
    }
}

/// Streaming Vorbis → PCM decoder over a demuxed OGG stream.
pub struct VorbisPacketDecoder<R> {
    demuxer: OggDemuxer<R>,
    ident: VorbisIdent,
    decoder: Box<dyn Decoder>,
    spec: PcmSpec,
    emitted: u64,
    packet_index: u64,
    done: bool,
}

impl<R: Read> VorbisPacketDecoder<R> {
    /// Read the three Vorbis header packets and set up the decoder.
    ///
    /// # Errors
    ///
    /// - [`ConvertError::Decode`] for invalid or out-of-order headers.
    /// - [`ConvertError::UnsupportedCodec`] if Symphonia cannot handle the
    ///   stream's configuration (for example its channel count).
    pub fn new(mut demuxer: OggDemuxer<R>) -> Result<Self> {
        let ident_packet = demuxer.next_packet()?.ok_or_else(|| {
            ConvertError::Decode("stream has no Vorbis identification header".to_string())
        })?;
        let ident = VorbisIdent::parse(&ident_packet.data)?;

        expect_header(demuxer.next_packet()?, COMMENT_HEADER_TYPE, "comment")?;
        let setup = expect_header(demuxer.next_packet()?, SETUP_HEADER_TYPE, "setup")?;

        // Symphonia expects the identification and setup headers back to back.
        let mut extra_data = ident_packet.data;
        extra_data.extend_from_slice(&setup.data);

        let mut params = CodecParameters::new();
        params
            .for_codec(CODEC_TYPE_VORBIS)
            .with_sample_rate(ident.sample_rate)
            .with_time_base(TimeBase::new(1, ident.sample_rate))
            .with_extra_data(extra_data.into_boxed_slice());

        let decoder = symphonia::default::get_codecs()
            .make(&params, &DecoderOptions::default())
            .map_err(|e| match e {
                SymphoniaError::Unsupported(msg) => ConvertError::UnsupportedCodec(format!(
                    "Vorbis configuration not supported: {}",
                    msg
                )),
                other => ConvertError::Decode(format!("Vorbis setup rejected: {}", other)),
            })?;

        debug!(
            channels = ident.channels,
            sample_rate = ident.sample_rate,
            nominal_bitrate = ident.bitrate_nominal,
            "opened Vorbis stream"
        );

        Ok(Self {
            demuxer,
            spec: PcmSpec::s16(ident.sample_rate, ident.channels as u16),
            ident,
            decoder,
            emitted: 0,
            packet_index: 0,
            done: setup.eos,
        })
    }

    pub fn ident(&self) -> &VorbisIdent {
        &self.ident
    }
}

impl<R: Read> PcmDecoder for VorbisPacketDecoder<R> {
    fn spec(&self) -> PcmSpec {
        self.spec
    }

    fn decode_next(&mut self) -> Result<Option<PcmBuffer>> {
        let channels = self.ident.channels as usize;

        while !self.done {
            let Some(packet) = self.demuxer.next_packet()? else {
                self.done = true;
                break;
            };
            if packet.eos {
                self.done = true;
            }

            let symphonia_packet =
                Packet::new_from_slice(0, self.emitted, 0, &packet.data);
            let decoded = self.decoder.decode(&symphonia_packet).map_err(|e| {
                ConvertError::Decode(format!(
                    "Vorbis packet {} rejected: {}",
                    self.packet_index, e
                ))
            })?;
            self.packet_index += 1;

            let mut samples = SampleConverter::to_interleaved_i16(&decoded);
            let mut frames = (samples.len() / channels) as u64;

            if packet.eos {
                if let Some(granule) = packet.granule_position {
                    let allowed = granule.saturating_sub(self.emitted);
                    if allowed < frames {
                        SampleConverter::trim_frames(&mut samples, channels, 0, allowed as usize);
                        frames = allowed;
                    }
                }
            }

            if frames == 0 {
                trace!(packet = self.packet_index, "packet produced no frames");
                continue;
            }

            self.emitted += frames;
            return Ok(Some(PcmBuffer::new(self.spec, samples)));
        }

        Ok(None)
    }

    fn frames_emitted(&self) -> u64 {
        self.emitted
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ident_bytes(channels: u8, rate: u32, blocksizes: u8, framing: u8) -> Vec<u8> {
        let mut v = b"\x01vorbis".to_vec();
        v.extend_from_slice(&0u32.to_le_bytes());
        v.push(channels);
        v.extend_from_slice(&rate.to_le_bytes());
        v.extend_from_slice(&0i32.to_le_bytes());
        v.extend_from_slice(&128_000i32.to_le_bytes());
        v.extend_from_slice(&0i32.to_le_bytes());
        v.push(blocksizes);
        v.push(framing);
        v
    }

    #[test]
    fn test_parse_valid_ident() {
        let ident = VorbisIdent::parse(&ident_bytes(2, 44_100, 0xB8, 1)).unwrap();
        assert_eq!(ident.channels, 2);
        assert_eq!(ident.sample_rate, 44_100);
        assert_eq!(ident.blocksize_0, 256);
        assert_eq!(ident.blocksize_1, 2048);
        assert_eq!(ident.bitrate_nominal, 128_000);
    }

    #[test]
    fn test_rejects_bad_headers() {
        // zero channels
        assert!(VorbisIdent::parse(&ident_bytes(0, 44_100, 0xB8, 1)).is_err());
        // zero rate
        assert!(VorbisIdent::parse(&ident_bytes(2, 0, 0xB8, 1)).is_err());
        // blocksize_0 > blocksize_1
        assert!(VorbisIdent::parse(&ident_bytes(2, 44_100, 0x8B, 1)).is_err());
        // blocksize 32 is below the minimum
        assert!(VorbisIdent::parse(&ident_bytes(2, 44_100, 0xB5, 1)).is_err());
        // framing bit clear
        assert!(VorbisIdent::parse(&ident_bytes(2, 44_100, 0xB8, 0)).is_err());
        // truncated
        assert!(VorbisIdent::parse(&ident_bytes(2, 44_100, 0xB8, 1)[..20]).is_err());
    }

    #[test]
    fn test_rejects_nonzero_version() {
        let mut bytes = ident_bytes(2, 44_100, 0xB8, 1);
        bytes[7] = 1;
        assert!(matches!(
            VorbisIdent::parse(&bytes),
            Err(ConvertError::Decode(_))
        ));
    }

    #[test]
    fn test_expect_header_order() {
        let packet = |data: &[u8]| CodecPacket {
            data: data.to_vec(),
            granule_position: None,
            bos: false,
            eos: false,
            serial: 1,
        };

        assert!(expect_header(Some(packet(b"\x03vorbis\0\0")), COMMENT_HEADER_TYPE, "comment").is_ok());
        assert!(expect_header(Some(packet(b"\x05vorbis\0\0")), COMMENT_HEADER_TYPE, "comment").is_err());
        assert!(expect_header(None, SETUP_HEADER_TYPE, "setup").is_err());
    }
}
