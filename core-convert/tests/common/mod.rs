//! Shared fixtures: OGG streams built with libopus and the crate's own page
//! writer, plus helpers for temp work directories and M4A inspection.

#![allow(dead_code)]

use std::num::{NonZeroU32, NonZeroU8};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use bridge_traits::time::{Clock, FixedClock};
use chrono::{TimeZone, Utc};
use core_convert::ogg::PacketWriter;
use core_runtime::ConverterConfig;
use uuid::Uuid;
use vorbis_rs::VorbisEncoderBuilder;

pub const SERIAL: u32 = 0x5EED;
pub const OPUS_FRAME: usize = 960;
pub const PRE_SKIP: u16 = 312;

/// An encoded Opus stream and the frame count a decoder must return.
pub struct OpusFixture {
    pub bytes: Vec<u8>,
    pub channels: u8,
    pub expected_frames: u64,
}

pub fn opus_head(channels: u8, pre_skip: u16) -> Vec<u8> {
    let mut head = b"OpusHead".to_vec();
    head.push(1);
    head.push(channels);
    head.extend_from_slice(&pre_skip.to_le_bytes());
    head.extend_from_slice(&48_000u32.to_le_bytes());
    head.extend_from_slice(&0i16.to_le_bytes());
    head.push(0);
    head
}

pub fn opus_tags() -> Vec<u8> {
    let vendor = b"fixture";
    let mut tags = b"OpusTags".to_vec();
    tags.extend_from_slice(&(vendor.len() as u32).to_le_bytes());
    tags.extend_from_slice(vendor);
    tags.extend_from_slice(&0u32.to_le_bytes());
    tags
}

fn tone(channels: u8, frames: usize, offset: usize) -> Vec<i16> {
    let mut samples = Vec::with_capacity(frames * channels as usize);
    for i in 0..frames {
        let t = (offset + i) as f32 / 48_000.0;
        let s = ((t * 440.0 * std::f32::consts::TAU).sin() * 12_000.0) as i16;
        for _ in 0..channels {
            samples.push(s);
        }
    }
    samples
}

/// Encode `packets` 20 ms Opus packets of a 440 Hz tone. The last page's
/// granule cuts `end_trim` frames off the final packet.
///
/// `corrupt_at` replaces that audio packet with one libopus rejects.
pub fn opus_stream(channels: u8, packets: usize, end_trim: u64, corrupt_at: Option<usize>) -> OpusFixture {
    let layout = if channels == 1 {
        opus::Channels::Mono
    } else {
        opus::Channels::Stereo
    };
    let mut encoder = opus::Encoder::new(48_000, layout, opus::Application::Audio).unwrap();
    let mut writer = PacketWriter::new(Vec::new(), SERIAL);

    writer.write_packet(&opus_head(channels, PRE_SKIP), 0, false).unwrap();
    writer.write_packet(&opus_tags(), 0, false).unwrap();

    let total = (packets * OPUS_FRAME) as u64;
    let final_granule = total - end_trim;
    let mut out = vec![0u8; 4_000];

    for i in 0..packets {
        let pcm = tone(channels, OPUS_FRAME, i * OPUS_FRAME);
        let len = encoder.encode(&pcm, &mut out).unwrap();
        // code 3 packet declaring zero frames
        let packet: &[u8] = if corrupt_at == Some(i) { &[0x03, 0x00] } else { &out[..len] };

        let last = i + 1 == packets;
        let granule = if last {
            final_granule
        } else {
            ((i + 1) * OPUS_FRAME) as u64
        };
        writer.write_packet(packet, granule, last).unwrap();
    }

    OpusFixture {
        bytes: writer.into_inner(),
        channels,
        expected_frames: final_granule - PRE_SKIP as u64,
    }
}

/// Peak level of each Vorbis channel in [`vorbis_stream`], in Vorbis
/// channel order.
pub const VORBIS_LEVELS: [f32; 3] = [0.6, 0.1, 0.35];

/// Encode `frames` frames of a 440 Hz tone with libvorbis. Channel `i`
/// peaks at `VORBIS_LEVELS[i]`.
pub fn vorbis_stream(sample_rate: u32, channels: u8, frames: usize) -> Vec<u8> {
    let mut out = Vec::new();
    let mut encoder = VorbisEncoderBuilder::new_with_serial(
        NonZeroU32::new(sample_rate).unwrap(),
        NonZeroU8::new(channels).unwrap(),
        &mut out,
        SERIAL as i32,
    )
    .build()
    .unwrap();

    let mut written = 0;
    while written < frames {
        let len = (frames - written).min(1024);
        let block: Vec<Vec<f32>> = (0..channels as usize)
            .map(|ch| {
                (written..written + len)
                    .map(|i| {
                        let t = i as f32 / sample_rate as f32;
                        (t * 440.0 * std::f32::consts::TAU).sin() * VORBIS_LEVELS[ch]
                    })
                    .collect()
            })
            .collect();
        encoder.encode_audio_block(&block).unwrap();
        written += len;
    }
    encoder.finish().unwrap();
    out
}

/// Largest absolute sample of each channel of interleaved `samples`.
pub fn channel_peaks(samples: &[i16], channels: usize) -> Vec<i32> {
    let mut peaks = vec![0i32; channels];
    for frame in samples.chunks_exact(channels) {
        for (peak, &s) in peaks.iter_mut().zip(frame) {
            *peak = (*peak).max((s as i32).abs());
        }
    }
    peaks
}

/// Vorbis headers whose setup packet is garbage.
pub fn vorbis_stream_with_bad_setup() -> Vec<u8> {
    let mut ident = b"\x01vorbis".to_vec();
    ident.extend_from_slice(&0u32.to_le_bytes());
    ident.push(2);
    ident.extend_from_slice(&44_100u32.to_le_bytes());
    ident.extend_from_slice(&0i32.to_le_bytes());
    ident.extend_from_slice(&128_000i32.to_le_bytes());
    ident.extend_from_slice(&0i32.to_le_bytes());
    ident.push(0xB8);
    ident.push(1);

    let mut comment = b"\x03vorbis".to_vec();
    comment.extend_from_slice(&7u32.to_le_bytes());
    comment.extend_from_slice(b"fixture");
    comment.extend_from_slice(&0u32.to_le_bytes());
    comment.push(1);

    let mut setup = b"\x05vorbis".to_vec();
    setup.extend_from_slice(&[0u8; 16]);

    let mut writer = PacketWriter::new(Vec::new(), SERIAL);
    writer.write_packet(&ident, 0, false).unwrap();
    writer.write_packet(&comment, 0, false).unwrap();
    writer.write_packet(&setup, 0, true).unwrap();
    writer.into_inner()
}

/// A stream whose only BOS packet is neither Opus nor Vorbis.
pub fn unknown_codec_stream() -> Vec<u8> {
    let mut writer = PacketWriter::new(Vec::new(), SERIAL);
    writer.write_packet(b"\x80theora\x03\x02\x01", 0, false).unwrap();
    writer.write_packet(b"frame", 1, true).unwrap();
    writer.into_inner()
}

/// Fresh scratch/output directories under the system temp dir.
pub struct WorkDirs {
    pub root: PathBuf,
}

impl WorkDirs {
    pub fn new(tag: &str) -> Self {
        let root = std::env::temp_dir().join(format!("{}-{}", tag, Uuid::new_v4()));
        Self { root }
    }

    pub fn scratch(&self) -> PathBuf {
        self.root.join("ogg_tmp")
    }

    pub fn output(&self) -> PathBuf {
        self.root.join("converted")
    }

    pub fn config(&self) -> ConverterConfig {
        self.config_builder().build().unwrap()
    }

    pub fn config_builder(&self) -> core_runtime::ConverterConfigBuilder {
        ConverterConfig::builder()
            .scratch_dir(self.scratch())
            .output_dir(self.output())
            .clock(fixed_clock())
    }
}

impl Drop for WorkDirs {
    fn drop(&mut self) {
        let _ = std::fs::remove_dir_all(&self.root);
    }
}

pub fn fixed_clock() -> Arc<dyn Clock> {
    Arc::new(FixedClock(
        Utc.with_ymd_and_hms(2024, 3, 9, 14, 5, 7).unwrap(),
    ))
}

/// File names in `dir`, sorted; empty when the directory is missing.
pub fn list_dir(dir: &Path) -> Vec<String> {
    let mut names: Vec<String> = match std::fs::read_dir(dir) {
        Ok(entries) => entries
            .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
            .collect(),
        Err(_) => Vec::new(),
    };
    names.sort();
    names
}

/// Body of the first box matching `path`, descending through containers.
pub fn find_box<'a>(data: &'a [u8], path: &[&[u8; 4]]) -> Option<&'a [u8]> {
    let mut pos = 0;
    while pos + 8 <= data.len() {
        let mut size = u32::from_be_bytes(data[pos..pos + 4].try_into().ok()?) as usize;
        let kind = &data[pos + 4..pos + 8];
        let mut header = 8;
        if size == 1 {
            size = u64::from_be_bytes(data[pos + 8..pos + 16].try_into().ok()?) as usize;
            header = 16;
        }
        if size < header || pos + size > data.len() {
            return None;
        }
        if kind == path[0] {
            let body = &data[pos + header..pos + size];
            return if path.len() == 1 {
                Some(body)
            } else {
                find_box(body, &path[1..])
            };
        }
        pos += size;
    }
    None
}

pub fn be_u32(bytes: &[u8], at: usize) -> u32 {
    u32::from_be_bytes(bytes[at..at + 4].try_into().unwrap())
}
