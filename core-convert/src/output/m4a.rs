//! # M4A Muxer
//!
//! Minimal ISO BMFF writer for a single AAC track:
//!
//! ```text
//! ftyp  M4A / mp42 / isom
//! mdat  64-bit size, access units streamed as they arrive
//! moov  mvhd, trak(tkhd, edts/elst, mdia(mdhd, hdlr, minf(smhd, dinf, stbl)))
//! ```
//!
//! `moov` goes last so nothing needs buffering besides the sample size
//! table. The edit list hides the encoder priming samples and cuts the
//! drain padding, so players output exactly the source frames.

use std::io::{Seek, SeekFrom, Write};

use core_runtime::AacBitrate;
use tracing::debug;

use super::aac::{AacEncoder, AAC_FRAME_LEN, ENCODER_DELAY};
use super::PcmSink;
use crate::error::{ConvertError, Result};
use crate::pcm::{PcmBuffer, PcmSpec};

const MDAT_HEADER_LEN: u64 = 16;
const LANGUAGE_UND: u16 = 0x55C4;
const AAC_LC_OBJECT_TYPE: u64 = 2;
const MPEG4_AUDIO_OTI: u8 = 0x40;
const AUDIO_STREAM_TYPE: u8 = (0x05 << 2) | 0x01;

const SAMPLING_FREQUENCIES: [u32; 13] = [
    96_000, 88_200, 64_000, 48_000, 44_100, 32_000, 24_000, 22_050, 16_000, 12_000, 11_025,
    8_000, 7_350,
];

/// Build the AAC-LC `AudioSpecificConfig` for a rate and channel count.
///
/// Rates outside the standard table use the explicit 24-bit escape.
pub fn audio_specific_config(sample_rate: u32, channels: u16) -> Vec<u8> {
    let mut bits = BitWriter::default();
    bits.push(AAC_LC_OBJECT_TYPE, 5);
    match SAMPLING_FREQUENCIES.iter().position(|&r| r == sample_rate) {
        Some(index) => bits.push(index as u64, 4),
        None => {
            bits.push(0xF, 4);
            bits.push(sample_rate as u64, 24);
        }
    }
    bits.push(channels as u64 & 0xF, 4);
    // frameLengthFlag, dependsOnCoreCoder, extensionFlag
    bits.push(0, 3);
    bits.into_bytes()
}

#[derive(Default)]
struct BitWriter {
    acc: u64,
    len: u32,
}

impl BitWriter {
    fn push(&mut self, value: u64, width: u32) {
        self.acc = (self.acc << width) | (value & ((1 << width) - 1));
        self.len += width;
    }

    fn into_bytes(self) -> Vec<u8> {
        let bytes = self.len.div_ceil(8);
        let acc = self.acc << (bytes * 8 - self.len);
        acc.to_be_bytes()[(8 - bytes as usize)..].to_vec()
    }
}

/// Track parameters written into `moov`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct M4aTrack {
    pub sample_rate: u32,
    pub channels: u16,
    /// Advertised when the track ends up empty.
    pub nominal_bitrate: u32,
    /// `AudioSpecificConfig` bytes for the `esds` box.
    pub decoder_config: Vec<u8>,
}

/// Streaming single-track M4A muxer.
pub struct M4aMuxer<W: Write + Seek> {
    writer: W,
    track: M4aTrack,
    mdat_start: u64,
    data_len: u64,
    sample_sizes: Vec<u32>,
}

impl<W: Write + Seek> M4aMuxer<W> {
    /// Write `ftyp` and open the `mdat` box.
    ///
    /// # Errors
    ///
    /// [`ConvertError::Encode`] if the writer fails.
    pub fn new(mut writer: W, track: M4aTrack) -> Result<Self> {
        let mut head = Vec::new();
        write_box(&mut head, b"ftyp", |b| {
            b.extend_from_slice(b"M4A ");
            b.extend_from_slice(&0u32.to_be_bytes());
            b.extend_from_slice(b"M4A mp42isom");
        });

        let start = writer.stream_position().map_err(mux_failed)?;
        let mdat_start = start + head.len() as u64;

        // size 1 means a 64-bit largesize follows the type
        head.extend_from_slice(&1u32.to_be_bytes());
        head.extend_from_slice(b"mdat");
        head.extend_from_slice(&0u64.to_be_bytes());
        writer.write_all(&head).map_err(mux_failed)?;

        Ok(Self {
            writer,
            track,
            mdat_start,
            data_len: 0,
            sample_sizes: Vec::new(),
        })
    }

    /// Append one access unit to `mdat`.
    ///
    /// # Errors
    ///
    /// [`ConvertError::Encode`] if the writer fails.
    pub fn write_sample(&mut self, sample: &[u8]) -> Result<()> {
        let size = u32::try_from(sample.len())
            .map_err(|_| ConvertError::Encode("access unit larger than 4 GiB".to_string()))?;
        self.writer.write_all(sample).map_err(mux_failed)?;
        self.data_len += sample.len() as u64;
        self.sample_sizes.push(size);
        Ok(())
    }

    pub fn sample_count(&self) -> usize {
        self.sample_sizes.len()
    }

    /// Patch the `mdat` size, append `moov` and hand back the writer.
    ///
    /// `source_frames` is the number of real audio frames; `encoder_delay`
    /// the priming samples at the start of the first access unit.
    ///
    /// # Errors
    ///
    /// [`ConvertError::Encode`] if seeking or writing fails.
    pub fn finish(mut self, source_frames: u64, encoder_delay: u64) -> Result<W> {
        let moov = self.build_moov(source_frames, encoder_delay);

        self.writer
            .seek(SeekFrom::Start(self.mdat_start + 8))
            .and_then(|_| {
                self.writer
                    .write_all(&(MDAT_HEADER_LEN + self.data_len).to_be_bytes())
            })
            .and_then(|_| self.writer.seek(SeekFrom::End(0)))
            .and_then(|_| self.writer.write_all(&moov))
            .and_then(|_| self.writer.flush())
            .map_err(mux_failed)?;

        debug!(
            samples = self.sample_sizes.len(),
            mdat_bytes = self.data_len,
            source_frames,
            "finished M4A"
        );
        Ok(self.writer)
    }

    fn build_moov(&self, source_frames: u64, encoder_delay: u64) -> Vec<u8> {
        let rate = self.track.sample_rate;
        let count = self.sample_sizes.len() as u32;
        let media_duration = count as u64 * AAC_FRAME_LEN as u64;
        let chunk_offset = self.mdat_start + MDAT_HEADER_LEN;

        let (avg_bitrate, max_bitrate) = if count == 0 {
            (self.track.nominal_bitrate, self.track.nominal_bitrate)
        } else {
            let peak = self.sample_sizes.iter().copied().max().unwrap_or(0) as u64;
            (
                bits_per_second(self.data_len, count as u64, rate),
                bits_per_second(peak, 1, rate),
            )
        };
        let buffer_size = self.sample_sizes.iter().copied().max().unwrap_or(0);

        let mut moov = Vec::new();
        write_box(&mut moov, b"moov", |b| {
            write_mvhd(b, rate, source_frames);
            write_box(b, b"trak", |b| {
                write_tkhd(b, source_frames);
                write_box(b, b"edts", |b| write_elst(b, source_frames, encoder_delay));
                write_box(b, b"mdia", |b| {
                    write_mdhd(b, rate, media_duration);
                    write_full_box(b, b"hdlr", 0, 0, |b| {
                        b.extend_from_slice(&0u32.to_be_bytes());
                        b.extend_from_slice(b"soun");
                        b.extend_from_slice(&[0u8; 12]);
                        b.extend_from_slice(b"SoundHandler\0");
                    });
                    write_box(b, b"minf", |b| {
                        write_full_box(b, b"smhd", 0, 0, |b| b.extend_from_slice(&[0u8; 4]));
                        write_box(b, b"dinf", |b| {
                            write_full_box(b, b"dref", 0, 0, |b| {
                                b.extend_from_slice(&1u32.to_be_bytes());
                                // flag 1: media data is in this file
                                write_full_box(b, b"url ", 0, 1, |_| {});
                            });
                        });
                        write_box(b, b"stbl", |b| {
                            write_full_box(b, b"stsd", 0, 0, |b| {
                                b.extend_from_slice(&1u32.to_be_bytes());
                                self.write_mp4a(b, buffer_size, max_bitrate, avg_bitrate);
                            });
                            write_full_box(b, b"stts", 0, 0, |b| {
                                write_entries(b, count, &[count, AAC_FRAME_LEN as u32]);
                            });
                            write_full_box(b, b"stsc", 0, 0, |b| {
                                write_entries(b, count, &[1, count, 1]);
                            });
                            write_full_box(b, b"stsz", 0, 0, |b| {
                                b.extend_from_slice(&0u32.to_be_bytes());
                                b.extend_from_slice(&count.to_be_bytes());
                                for size in &self.sample_sizes {
                                    b.extend_from_slice(&size.to_be_bytes());
                                }
                            });
                            match u32::try_from(chunk_offset) {
                                Ok(offset) => write_full_box(b, b"stco", 0, 0, |b| {
                                    write_entries(b, count, &[offset]);
                                }),
                                Err(_) => write_full_box(b, b"co64", 0, 0, |b| {
                                    b.extend_from_slice(&u32::from(count > 0).to_be_bytes());
                                    if count > 0 {
                                        b.extend_from_slice(&chunk_offset.to_be_bytes());
                                    }
                                }),
                            }
                        });
                    });
                });
            });
        });
        moov
    }

    fn write_mp4a(&self, b: &mut Vec<u8>, buffer_size: u32, max_bitrate: u32, avg_bitrate: u32) {
        let track = &self.track;
        write_box(b, b"mp4a", |b| {
            b.extend_from_slice(&[0u8; 6]);
            b.extend_from_slice(&1u16.to_be_bytes());
            b.extend_from_slice(&[0u8; 8]);
            b.extend_from_slice(&track.channels.to_be_bytes());
            b.extend_from_slice(&16u16.to_be_bytes());
            b.extend_from_slice(&[0u8; 4]);
            // 16.16 fixed point; rates above 65535 rely on the esds config
            let rate = if track.sample_rate > u16::MAX as u32 {
                0
            } else {
                track.sample_rate << 16
            };
            b.extend_from_slice(&rate.to_be_bytes());

            write_full_box(b, b"esds", 0, 0, |b| {
                let mut decoder_specific = Vec::new();
                write_descriptor(&mut decoder_specific, 0x05, &track.decoder_config);

                let mut decoder_config = vec![MPEG4_AUDIO_OTI, AUDIO_STREAM_TYPE];
                decoder_config.extend_from_slice(&buffer_size.to_be_bytes()[1..]);
                decoder_config.extend_from_slice(&max_bitrate.to_be_bytes());
                decoder_config.extend_from_slice(&avg_bitrate.to_be_bytes());
                decoder_config.extend_from_slice(&decoder_specific);

                let mut es = Vec::new();
                es.extend_from_slice(&1u16.to_be_bytes());
                es.push(0);
                write_descriptor(&mut es, 0x04, &decoder_config);
                write_descriptor(&mut es, 0x06, &[0x02]);

                write_descriptor(b, 0x03, &es);
            });
        });
    }
}

/// AAC encoder feeding an [`M4aMuxer`].
pub struct M4aWriter<W: Write + Seek> {
    encoder: AacEncoder,
    muxer: M4aMuxer<W>,
}

impl<W: Write + Seek> M4aWriter<W> {
    /// # Errors
    ///
    /// [`ConvertError::Encode`] for unsupported channel layouts, encoder
    /// init failure or a failing writer.
    pub fn new(writer: W, spec: PcmSpec, bitrate: AacBitrate) -> Result<Self> {
        let encoder = AacEncoder::new(spec, bitrate)?;
        let muxer = M4aMuxer::new(
            writer,
            M4aTrack {
                sample_rate: spec.sample_rate,
                channels: spec.channels,
                nominal_bitrate: bitrate.nominal_bps(),
                decoder_config: audio_specific_config(spec.sample_rate, spec.channels),
            },
        )?;
        Ok(Self { encoder, muxer })
    }

    /// Drain the encoder, write `moov` and hand back the writer.
    ///
    /// # Errors
    ///
    /// [`ConvertError::Encode`] if draining or muxing fails.
    pub fn finish(self) -> Result<W> {
        let Self { encoder, mut muxer } = self;
        let frames = encoder.finish(|au| muxer.write_sample(au))?;
        muxer.finish(frames, ENCODER_DELAY)
    }
}

impl<W: Write + Seek> PcmSink for M4aWriter<W> {
    fn write_pcm(&mut self, buffer: &PcmBuffer) -> Result<()> {
        let Self { encoder, muxer } = self;
        if buffer.spec != encoder.spec() {
            return Err(ConvertError::Encode(format!(
                "PCM format changed mid-stream ({:?} -> {:?})",
                encoder.spec(),
                buffer.spec
            )));
        }
        encoder.encode(&buffer.samples, |au| muxer.write_sample(au))
    }
}

/// Bitrate of `bytes` spread over `units` access units, saturating at
/// `u32::MAX`.
fn bits_per_second(bytes: u64, units: u64, sample_rate: u32) -> u32 {
    let duration_frames = units.max(1) * AAC_FRAME_LEN as u64;
    let bps = bytes.saturating_mul(8).saturating_mul(sample_rate as u64) / duration_frames;
    u32::try_from(bps).unwrap_or(u32::MAX)
}

fn mux_failed(err: std::io::Error) -> ConvertError {
    ConvertError::Encode(format!("M4A write failed: {}", err))
}

fn write_box(out: &mut Vec<u8>, kind: &[u8; 4], body: impl FnOnce(&mut Vec<u8>)) {
    let start = out.len();
    out.extend_from_slice(&[0u8; 4]);
    out.extend_from_slice(kind);
    body(out);
    let size = (out.len() - start) as u32;
    out[start..start + 4].copy_from_slice(&size.to_be_bytes());
}

fn write_full_box(
    out: &mut Vec<u8>,
    kind: &[u8; 4],
    version: u8,
    flags: u32,
    body: impl FnOnce(&mut Vec<u8>),
) {
    write_box(out, kind, |b| {
        b.push(version);
        b.extend_from_slice(&flags.to_be_bytes()[1..]);
        body(b);
    });
}

/// Entry count followed by one entry, or an empty table when `count` is 0.
fn write_entries(out: &mut Vec<u8>, count: u32, entry: &[u32]) {
    if count == 0 {
        out.extend_from_slice(&0u32.to_be_bytes());
        return;
    }
    out.extend_from_slice(&1u32.to_be_bytes());
    for field in entry {
        out.extend_from_slice(&field.to_be_bytes());
    }
}

fn write_descriptor(out: &mut Vec<u8>, tag: u8, body: &[u8]) {
    out.push(tag);
    let len = body.len();
    let mut groups = Vec::new();
    let mut rest = len;
    loop {
        groups.push((rest & 0x7F) as u8);
        rest >>= 7;
        if rest == 0 {
            break;
        }
    }
    for (i, group) in groups.iter().rev().enumerate() {
        let more = if i + 1 < groups.len() { 0x80 } else { 0 };
        out.push(group | more);
    }
    out.extend_from_slice(body);
}

fn write_mvhd(out: &mut Vec<u8>, timescale: u32, duration: u64) {
    let wide = duration > u32::MAX as u64;
    write_full_box(out, b"mvhd", u8::from(wide), 0, |b| {
        write_times(b, wide, timescale, duration);
        b.extend_from_slice(&0x0001_0000u32.to_be_bytes());
        b.extend_from_slice(&0x0100u16.to_be_bytes());
        b.extend_from_slice(&[0u8; 10]);
        write_matrix(b);
        b.extend_from_slice(&[0u8; 24]);
        b.extend_from_slice(&2u32.to_be_bytes());
    });
}

fn write_tkhd(out: &mut Vec<u8>, duration: u64) {
    let wide = duration > u32::MAX as u64;
    // enabled | in movie
    write_full_box(out, b"tkhd", u8::from(wide), 0x3, |b| {
        if wide {
            b.extend_from_slice(&[0u8; 16]);
            b.extend_from_slice(&1u32.to_be_bytes());
            b.extend_from_slice(&[0u8; 4]);
            b.extend_from_slice(&duration.to_be_bytes());
        } else {
            b.extend_from_slice(&[0u8; 8]);
            b.extend_from_slice(&1u32.to_be_bytes());
            b.extend_from_slice(&[0u8; 4]);
            b.extend_from_slice(&(duration as u32).to_be_bytes());
        }
        b.extend_from_slice(&[0u8; 8]);
        b.extend_from_slice(&0u16.to_be_bytes());
        b.extend_from_slice(&0u16.to_be_bytes());
        b.extend_from_slice(&0x0100u16.to_be_bytes());
        b.extend_from_slice(&[0u8; 2]);
        write_matrix(b);
        b.extend_from_slice(&[0u8; 8]);
    });
}

fn write_elst(out: &mut Vec<u8>, segment_duration: u64, media_time: u64) {
    let wide = segment_duration > u32::MAX as u64 || media_time > i32::MAX as u64;
    write_full_box(out, b"elst", u8::from(wide), 0, |b| {
        b.extend_from_slice(&1u32.to_be_bytes());
        if wide {
            b.extend_from_slice(&segment_duration.to_be_bytes());
            b.extend_from_slice(&(media_time as i64).to_be_bytes());
        } else {
            b.extend_from_slice(&(segment_duration as u32).to_be_bytes());
            b.extend_from_slice(&(media_time as i32).to_be_bytes());
        }
        b.extend_from_slice(&1u16.to_be_bytes());
        b.extend_from_slice(&0u16.to_be_bytes());
    });
}

fn write_mdhd(out: &mut Vec<u8>, timescale: u32, duration: u64) {
    let wide = duration > u32::MAX as u64;
    write_full_box(out, b"mdhd", u8::from(wide), 0, |b| {
        write_times(b, wide, timescale, duration);
        b.extend_from_slice(&LANGUAGE_UND.to_be_bytes());
        b.extend_from_slice(&0u16.to_be_bytes());
    });
}

/// Creation/modification times (zero), timescale and duration.
fn write_times(out: &mut Vec<u8>, wide: bool, timescale: u32, duration: u64) {
    if wide {
        out.extend_from_slice(&[0u8; 16]);
        out.extend_from_slice(&timescale.to_be_bytes());
        out.extend_from_slice(&duration.to_be_bytes());
    } else {
        out.extend_from_slice(&[0u8; 8]);
        out.extend_from_slice(&timescale.to_be_bytes());
        out.extend_from_slice(&(duration as u32).to_be_bytes());
    }
}

fn write_matrix(out: &mut Vec<u8>) {
    for value in [0x0001_0000u32, 0, 0, 0, 0x0001_0000, 0, 0, 0, 0x4000_0000] {
        out.extend_from_slice(&value.to_be_bytes());
    }
}
