//! # Stream Selection
//!
//! Picks the first logical stream carrying a codec this crate converts and
//! hands out only that stream's packets.

use std::collections::VecDeque;
use std::fmt;
use std::io::{Cursor, Read};

use tracing::{debug, warn};

use super::packet::{CodecPacket, PacketReader};
use crate::error::{ConvertError, Result};

/// Signature of an Opus identification header.
pub const OPUS_HEAD_MAGIC: &[u8; 8] = b"OpusHead";

/// Signature of a Vorbis identification header (packet type 1).
pub const VORBIS_IDENT_MAGIC: &[u8; 7] = b"\x01vorbis";

/// Codec carried by a logical stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CodecKind {
    Opus,
    Vorbis,
}

impl CodecKind {
    /// Identify a codec from the first packet of a stream.
    pub fn detect(first_packet: &[u8]) -> Option<Self> {
        if first_packet.starts_with(OPUS_HEAD_MAGIC) {
            Some(CodecKind::Opus)
        } else if first_packet.starts_with(VORBIS_IDENT_MAGIC) {
            Some(CodecKind::Vorbis)
        } else {
            None
        }
    }
}

impl fmt::Display for CodecKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CodecKind::Opus => f.write_str("Opus"),
            CodecKind::Vorbis => f.write_str("Vorbis"),
        }
    }
}

/// Packet source for a single selected logical stream.
///
/// # Example
///
/// ```ignore
/// use core_convert::ogg::OggDemuxer;
///
/// let mut demuxer = OggDemuxer::from_bytes(&bytes)?;
/// println!("codec: {}", demuxer.codec());
/// while let Some(packet) = demuxer.next_packet()? {
///     // feed packet.data to a decoder
/// }
/// ```
pub struct OggDemuxer<R> {
    packets: PacketReader<R>,
    codec: CodecKind,
    serial: u32,
    queued: VecDeque<CodecPacket>,
    finished: bool,
}

impl<'a> OggDemuxer<Cursor<&'a [u8]>> {
    /// Demux an in-memory file.
    pub fn from_bytes(bytes: &'a [u8]) -> Result<Self> {
        Self::new(Cursor::new(bytes))
    }
}

impl<R: Read> OggDemuxer<R> {
    /// Read beginning-of-stream packets until a recognised codec is found.
    ///
    /// # Errors
    ///
    /// - [`ConvertError::MalformedContainer`] if the input has no pages or
    ///   is structurally broken before a stream is selected.
    /// - [`ConvertError::UnsupportedCodec`] if no stream starts with an
    ///   Opus or Vorbis identification header.
    pub fn new(reader: R) -> Result<Self> {
        let mut packets = PacketReader::new(reader);
        let mut seen_streams = 0usize;

        loop {
            let packet = match packets.next_packet()? {
                Some(packet) => packet,
                None if seen_streams == 0 => {
                    return Err(ConvertError::malformed("input contains no OGG pages"));
                }
                None => break,
            };

            if !packet.bos && seen_streams == 0 {
                return Err(ConvertError::malformed(
                    "first page does not begin a logical stream",
                ));
            }
            if !packet.bos {
                // Header pages of every stream come first; data means we are
                // past the point where a stream could still start.
                break;
            }
            seen_streams += 1;

            match CodecKind::detect(&packet.data) {
                Some(codec) => {
                    debug!(serial = packet.serial, %codec, "selected logical stream");
                    let serial = packet.serial;
                    let finished = packet.eos;
                    let mut queued = VecDeque::new();
                    queued.push_back(packet);
                    return Ok(Self {
                        packets,
                        codec,
                        serial,
                        queued,
                        finished,
                    });
                }
                None => {
                    debug!(serial = packet.serial, "skipping stream with unknown codec");
                }
            }
        }

        Err(ConvertError::UnsupportedCodec(format!(
            "none of {} logical stream(s) carries Opus or Vorbis",
            seen_streams
        )))
    }

    pub fn codec(&self) -> CodecKind {
        self.codec
    }

    pub fn serial(&self) -> u32 {
        self.serial
    }

    /// Next packet of the selected stream, `None` after its end page.
    ///
    /// # Errors
    ///
    /// [`ConvertError::MalformedContainer`] if the input ends before the
    /// selected stream's end page, or on any page-level corruption.
    pub fn next_packet(&mut self) -> Result<Option<CodecPacket>> {
        if let Some(packet) = self.queued.pop_front() {
            return Ok(Some(packet));
        }
        if self.finished {
            return Ok(None);
        }

        loop {
            match self.packets.next_packet()? {
                Some(packet) if packet.serial != self.serial => continue,
                Some(packet) => {
                    if packet.eos {
                        self.finished = true;
                    }
                    return Ok(Some(packet));
                }
                None => {
                    warn!(serial = self.serial, "input ended before end of stream");
                    return Err(ConvertError::malformed(
                        "input ended before the end-of-stream page",
                    ));
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ogg::page::{OggPage, PageFlags};

    fn single_page(serial: u32, sequence: u32, flags: u8, packet: &[u8]) -> Vec<u8> {
        assert!(packet.len() < 255);
        OggPage {
            version: 0,
            flags: PageFlags(flags),
            granule_position: Some(0),
            serial,
            sequence,
            checksum: 0,
            segments: vec![packet.len() as u8],
            body: packet.to_vec(),
        }
        .to_bytes()
    }

    fn opus_head() -> Vec<u8> {
        let mut head = b"OpusHead".to_vec();
        head.extend_from_slice(&[1, 2, 0x38, 0x01, 0x80, 0xBB, 0, 0, 0, 0, 0]);
        head
    }

    #[test]
    fn test_detect() {
        assert_eq!(CodecKind::detect(&opus_head()), Some(CodecKind::Opus));
        assert_eq!(
            CodecKind::detect(b"\x01vorbis\0\0\0\0"),
            Some(CodecKind::Vorbis)
        );
        assert_eq!(CodecKind::detect(b"\x7fFLAC"), None);
        assert_eq!(CodecKind::detect(b""), None);
    }

    #[test]
    fn test_empty_input_is_malformed() {
        assert!(matches!(
            OggDemuxer::from_bytes(&[]),
            Err(ConvertError::MalformedContainer(_))
        ));
    }

    #[test]
    fn test_unknown_codec_is_unsupported() {
        let mut bytes = single_page(7, 0, PageFlags::BOS, b"\x7fFLAC\x01\x00");
        bytes.extend(single_page(7, 1, PageFlags::EOS, b"frame"));
        assert!(matches!(
            OggDemuxer::from_bytes(&bytes),
            Err(ConvertError::UnsupportedCodec(_))
        ));
    }

    #[test]
    fn test_selects_first_known_stream_and_skips_others() {
        let mut bytes = single_page(7, 0, PageFlags::BOS, b"fishead\0");
        bytes.extend(single_page(9, 0, PageFlags::BOS, &opus_head()));
        bytes.extend(single_page(7, 1, PageFlags::EOS, b"skeleton"));
        bytes.extend(single_page(9, 1, 0, b"OpusTags"));
        bytes.extend(single_page(9, 2, PageFlags::EOS, b"audio"));

        let mut demuxer = OggDemuxer::from_bytes(&bytes).unwrap();
        assert_eq!(demuxer.codec(), CodecKind::Opus);
        assert_eq!(demuxer.serial(), 9);

        let mut payloads = Vec::new();
        while let Some(packet) = demuxer.next_packet().unwrap() {
            assert_eq!(packet.serial, 9);
            payloads.push(packet.data);
        }
        assert_eq!(payloads.len(), 3);
        assert_eq!(payloads[2], b"audio");
    }

    #[test]
    fn test_missing_eos_is_malformed() {
        let mut bytes = single_page(9, 0, PageFlags::BOS, &opus_head());
        bytes.extend(single_page(9, 1, 0, b"OpusTags"));

        let mut demuxer = OggDemuxer::from_bytes(&bytes).unwrap();
        assert!(demuxer.next_packet().unwrap().is_some());
        assert!(demuxer.next_packet().unwrap().is_some());
        assert!(matches!(
            demuxer.next_packet(),
            Err(ConvertError::MalformedContainer(_))
        ));
    }

    #[test]
    fn test_chained_stream_stops_at_first_eos() {
        let mut bytes = single_page(9, 0, PageFlags::BOS, &opus_head());
        bytes.extend(single_page(9, 1, PageFlags::EOS, b"OpusTags"));
        bytes.extend(single_page(10, 0, PageFlags::BOS, &opus_head()));

        let mut demuxer = OggDemuxer::from_bytes(&bytes).unwrap();
        assert!(demuxer.next_packet().unwrap().is_some());
        assert!(demuxer.next_packet().unwrap().unwrap().eos);
        assert!(demuxer.next_packet().unwrap().is_none());
    }
}
