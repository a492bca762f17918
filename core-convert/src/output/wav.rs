//! # WAV Writer
//!
//! RIFF/WAVE with 16-bit PCM. Mono and stereo get the canonical 44-byte
//! header; more channels use `WAVE_FORMAT_EXTENSIBLE` with a speaker mask.
//! Sizes are written as placeholders and patched in [`WavWriter::finish`],
//! so the writer streams without knowing the length up front.

use std::io::{Read, Seek, SeekFrom, Write};

use super::{write_i16_le, PcmSink};
use crate::error::{ConvertError, Result};
use crate::pcm::{PcmBuffer, PcmSpec};

const WAVE_FORMAT_PCM: u16 = 1;
const WAVE_FORMAT_EXTENSIBLE: u16 = 0xFFFE;
/// KSDATAFORMAT_SUBTYPE_PCM, GUID 00000001-0000-0010-8000-00aa00389b71.
const SUBTYPE_PCM: [u8; 16] = [
    0x01, 0x00, 0x00, 0x00, 0x00, 0x00, 0x10, 0x00, 0x80, 0x00, 0x00, 0xAA, 0x00, 0x38, 0x9B, 0x71,
];
const HEADER_LEN: u64 = 44;
const EXTENSIBLE_HEADER_LEN: u64 = 68;
const RIFF_SIZE_OFFSET: u64 = 4;

/// Largest `data` chunk whose RIFF size still fits in 32 bits with the
/// canonical header.
pub const MAX_WAV_DATA_LEN: u64 = u32::MAX as u64 - (HEADER_LEN - 8);

/// Speaker mask for `channels` interleaved in WAV speaker order.
///
/// Layouts for 3 to 8 channels are the Vorbis I channel layouts, which the
/// decoders already emit in ascending mask-bit order. Wider streams get no
/// speaker assignment (mask 0).
pub fn speaker_mask(channels: u16) -> u32 {
    const FL: u32 = 0x1;
    const FR: u32 = 0x2;
    const FC: u32 = 0x4;
    const LFE: u32 = 0x8;
    const BL: u32 = 0x10;
    const BR: u32 = 0x20;
    const BC: u32 = 0x100;
    const SL: u32 = 0x200;
    const SR: u32 = 0x400;

    match channels {
        1 => FC,
        2 => FL | FR,
        3 => FL | FR | FC,
        4 => FL | FR | BL | BR,
        5 => FL | FR | FC | BL | BR,
        6 => FL | FR | FC | LFE | BL | BR,
        7 => FL | FR | FC | LFE | BC | SL | SR,
        8 => FL | FR | FC | LFE | BL | BR | SL | SR,
        _ => 0,
    }
}

/// Streaming WAV writer.
pub struct WavWriter<W: Write + Seek> {
    writer: W,
    spec: PcmSpec,
    header_len: u64,
    data_len: u64,
}

impl<W: Write + Seek> WavWriter<W> {
    /// Write the header with placeholder sizes.
    ///
    /// # Errors
    ///
    /// [`ConvertError::Encode`] for a zero channel count or rate, or if the
    /// header cannot be written.
    pub fn new(mut writer: W, spec: PcmSpec) -> Result<Self> {
        if spec.channels == 0 || spec.sample_rate == 0 {
            return Err(ConvertError::Encode(format!(
                "cannot write WAV with {} channels at {} Hz",
                spec.channels, spec.sample_rate
            )));
        }

        let extensible = spec.channels > 2;
        let header_len = if extensible {
            EXTENSIBLE_HEADER_LEN
        } else {
            HEADER_LEN
        };

        let mut header = Vec::with_capacity(header_len as usize);
        header.extend_from_slice(b"RIFF");
        header.extend_from_slice(&0u32.to_le_bytes());
        header.extend_from_slice(b"WAVE");
        header.extend_from_slice(b"fmt ");
        if extensible {
            header.extend_from_slice(&40u32.to_le_bytes());
            header.extend_from_slice(&WAVE_FORMAT_EXTENSIBLE.to_le_bytes());
        } else {
            header.extend_from_slice(&16u32.to_le_bytes());
            header.extend_from_slice(&WAVE_FORMAT_PCM.to_le_bytes());
        }
        header.extend_from_slice(&spec.channels.to_le_bytes());
        header.extend_from_slice(&spec.sample_rate.to_le_bytes());
        header.extend_from_slice(&spec.byte_rate().to_le_bytes());
        header.extend_from_slice(&spec.block_align().to_le_bytes());
        header.extend_from_slice(&spec.bits_per_sample.to_le_bytes());
        if extensible {
            header.extend_from_slice(&22u16.to_le_bytes());
            header.extend_from_slice(&spec.bits_per_sample.to_le_bytes());
            header.extend_from_slice(&speaker_mask(spec.channels).to_le_bytes());
            header.extend_from_slice(&SUBTYPE_PCM);
        }
        header.extend_from_slice(b"data");
        header.extend_from_slice(&0u32.to_le_bytes());

        writer.write_all(&header).map_err(write_failed)?;

        Ok(Self {
            writer,
            spec,
            header_len,
            data_len: 0,
        })
    }

    pub fn spec(&self) -> PcmSpec {
        self.spec
    }

    /// Bytes of sample data written so far.
    pub fn data_len(&self) -> u64 {
        self.data_len
    }

    /// Largest `data` chunk this writer's header allows.
    pub fn max_data_len(&self) -> u64 {
        u32::MAX as u64 - (self.header_len - 8)
    }

    /// Append interleaved samples.
    ///
    /// # Errors
    ///
    /// [`ConvertError::Encode`] if the data chunk would exceed 4 GiB or the
    /// write fails.
    pub fn write_samples(&mut self, samples: &[i16]) -> Result<()> {
        let added = samples.len() as u64 * 2;
        if self.data_len + added > self.max_data_len() {
            return Err(ConvertError::Encode(format!(
                "WAV data would exceed the 4 GiB RIFF limit ({} bytes)",
                self.data_len + added
            )));
        }

        write_i16_le(&mut self.writer, samples).map_err(write_failed)?;
        self.data_len += added;
        Ok(())
    }

    /// Patch the RIFF and data sizes and hand back the writer.
    ///
    /// # Errors
    ///
    /// [`ConvertError::Encode`] if seeking or writing fails.
    pub fn finish(mut self) -> Result<W> {
        let data_len = self.data_len as u32;
        let riff_len = data_len + (self.header_len - 8) as u32;

        self.writer
            .seek(SeekFrom::Start(RIFF_SIZE_OFFSET))
            .and_then(|_| self.writer.write_all(&riff_len.to_le_bytes()))
            .and_then(|_| self.writer.seek(SeekFrom::Start(self.header_len - 4)))
            .and_then(|_| self.writer.write_all(&data_len.to_le_bytes()))
            .and_then(|_| self.writer.seek(SeekFrom::End(0)))
            .and_then(|_| self.writer.flush())
            .map_err(write_failed)?;

        Ok(self.writer)
    }
}

impl<W: Write + Seek> PcmSink for WavWriter<W> {
    fn write_pcm(&mut self, buffer: &PcmBuffer) -> Result<()> {
        if buffer.spec != self.spec {
            return Err(ConvertError::Encode(format!(
                "PCM format changed mid-stream ({:?} -> {:?})",
                self.spec, buffer.spec
            )));
        }
        self.write_samples(&buffer.samples)
    }
}

fn write_failed(err: std::io::Error) -> ConvertError {
    ConvertError::Encode(format!("WAV write failed: {}", err))
}

/// Header fields of a parsed WAV file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WavHeader {
    pub spec: PcmSpec,
    /// Format tag, or the sub-format code of an extensible file whose
    /// sub-format is not PCM.
    pub format_tag: u16,
    /// Speaker mask of a `WAVE_FORMAT_EXTENSIBLE` file.
    pub channel_mask: Option<u32>,
    /// Length of the `data` chunk in bytes.
    pub data_len: u32,
}

impl WavHeader {
    /// Whether the samples are integer PCM, plain or extensible.
    pub fn is_pcm(&self) -> bool {
        self.format_tag == WAVE_FORMAT_PCM || self.format_tag == WAVE_FORMAT_EXTENSIBLE
    }

    pub fn frames(&self) -> u64 {
        self.data_len as u64 / self.spec.block_align().max(1) as u64
    }
}

/// Reader for PCM WAV files, used to verify written output.
pub struct WavReader;

impl WavReader {
    /// Parse chunks up to the start of `data`, leaving the reader positioned
    /// at the first sample byte. Unknown chunks are skipped.
    ///
    /// # Errors
    ///
    /// [`ConvertError::Decode`] if the file is not RIFF/WAVE, has no `fmt `
    /// chunk before `data`, or is truncated.
    pub fn read_header<R: Read>(reader: &mut R) -> Result<WavHeader> {
        let mut riff = [0u8; 12];
        reader.read_exact(&mut riff).map_err(read_failed)?;
        if &riff[0..4] != b"RIFF" || &riff[8..12] != b"WAVE" {
            return Err(ConvertError::Decode("not a RIFF/WAVE file".to_string()));
        }

        let mut format: Option<(u16, Option<u32>, PcmSpec)> = None;
        loop {
            let mut chunk = [0u8; 8];
            reader.read_exact(&mut chunk).map_err(read_failed)?;
            let len = u32::from_le_bytes([chunk[4], chunk[5], chunk[6], chunk[7]]);

            match &chunk[0..4] {
                b"fmt " => {
                    if len < 16 {
                        return Err(ConvertError::Decode(format!(
                            "fmt chunk too short ({} bytes)",
                            len
                        )));
                    }
                    let mut body = vec![0u8; len as usize + (len as usize & 1)];
                    reader.read_exact(&mut body).map_err(read_failed)?;
                    let tag = u16::from_le_bytes([body[0], body[1]]);
                    let channels = u16::from_le_bytes([body[2], body[3]]);
                    let sample_rate = u32::from_le_bytes([body[4], body[5], body[6], body[7]]);
                    let bits_per_sample = u16::from_le_bytes([body[14], body[15]]);
                    let (tag, channel_mask) = if tag == WAVE_FORMAT_EXTENSIBLE && len >= 40 {
                        let mask = u32::from_le_bytes([body[20], body[21], body[22], body[23]]);
                        let sub_tag = if body[24..40] == SUBTYPE_PCM {
                            WAVE_FORMAT_EXTENSIBLE
                        } else {
                            u16::from_le_bytes([body[24], body[25]])
                        };
                        (sub_tag, Some(mask))
                    } else {
                        (tag, None)
                    };
                    format = Some((
                        tag,
                        channel_mask,
                        PcmSpec {
                            sample_rate,
                            channels,
                            bits_per_sample,
                        },
                    ));
                }
                b"data" => {
                    let (format_tag, channel_mask, spec) = format.ok_or_else(|| {
                        ConvertError::Decode("data chunk before fmt chunk".to_string())
                    })?;
                    return Ok(WavHeader {
                        spec,
                        format_tag,
                        channel_mask,
                        data_len: len,
                    });
                }
                _ => {
                    let skip = len as u64 + (len as u64 & 1);
                    std::io::copy(&mut reader.by_ref().take(skip), &mut std::io::sink())
                        .map_err(read_failed)?;
                }
            }
        }
    }

    /// Parse a whole 16-bit PCM WAV held in memory.
    ///
    /// # Errors
    ///
    /// As [`WavReader::read_header`], plus [`ConvertError::Decode`] for a
    /// non-16-bit or non-PCM file or a data chunk shorter than declared.
    pub fn read_wav(bytes: &[u8]) -> Result<(WavHeader, Vec<i16>)> {
        let mut cursor = std::io::Cursor::new(bytes);
        let header = Self::read_header(&mut cursor)?;
        if !header.is_pcm() || header.spec.bits_per_sample != 16 {
            return Err(ConvertError::Decode(format!(
                "expected 16-bit PCM, found tag {} with {} bits",
                header.format_tag, header.spec.bits_per_sample
            )));
        }

        let start = cursor.position() as usize;
        let end = start + header.data_len as usize;
        let data = bytes.get(start..end).ok_or_else(|| {
            ConvertError::Decode(format!(
                "data chunk declares {} bytes, {} present",
                header.data_len,
                bytes.len().saturating_sub(start)
            ))
        })?;

        let samples = data
            .chunks_exact(2)
            .map(|b| i16::from_le_bytes([b[0], b[1]]))
            .collect();
        Ok((header, samples))
    }
}

fn read_failed(err: std::io::Error) -> ConvertError {
    ConvertError::Decode(format!("WAV read failed: {}", err))
}
