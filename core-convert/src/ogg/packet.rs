//! # Packet Reassembly
//!
//! Joins page segments back into codec packets, per logical stream.
//!
//! A lacing value of 255 means the packet continues in the next segment; any
//! smaller value ends it. A packet that runs off the end of a page resumes on
//! the next page of the same serial, which must carry the continued flag.

use std::collections::{HashMap, VecDeque};
use std::io::Read;

use super::page::{OggPage, PageReader};
use crate::error::{ConvertError, Result};

/// A complete codec packet.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CodecPacket {
    pub data: Vec<u8>,
    /// Granule position of the page this packet completed on. Only the last
    /// packet completing on a page carries it.
    pub granule_position: Option<u64>,
    /// First packet of its logical stream.
    pub bos: bool,
    /// Last packet of its logical stream.
    pub eos: bool,
    pub serial: u32,
}

#[derive(Default)]
struct StreamState {
    pending: Option<Vec<u8>>,
    last_sequence: Option<u32>,
    ended: bool,
}

/// Reassembles packets from every logical stream of a physical stream.
pub struct PacketReader<R> {
    pages: PageReader<R>,
    streams: HashMap<u32, StreamState>,
    ready: VecDeque<CodecPacket>,
}

impl<R: Read> PacketReader<R> {
    pub fn new(reader: R) -> Self {
        Self {
            pages: PageReader::new(reader),
            streams: HashMap::new(),
            ready: VecDeque::new(),
        }
    }

    /// Next complete packet of any stream, `None` when the input is exhausted.
    pub fn next_packet(&mut self) -> Result<Option<CodecPacket>> {
        loop {
            if let Some(packet) = self.ready.pop_front() {
                return Ok(Some(packet));
            }
            match self.pages.next() {
                Some(page) => self.push_page(page?)?,
                None => return Ok(None),
            }
        }
    }

    fn push_page(&mut self, page: OggPage) -> Result<()> {
        let state = self.streams.entry(page.serial).or_default();

        if page.flags.is_bos() {
            if state.last_sequence.is_some() && !state.ended {
                return Err(ConvertError::malformed(format!(
                    "stream {:#x} restarted before its end page",
                    page.serial
                )));
            }
            *state = StreamState::default();
        } else if state.ended {
            return Err(ConvertError::malformed(format!(
                "page {} of stream {:#x} follows its end page",
                page.sequence, page.serial
            )));
        }

        if let Some(last) = state.last_sequence {
            if page.sequence != last.wrapping_add(1) {
                return Err(ConvertError::malformed(format!(
                    "page sequence gap in stream {:#x}: expected {}, found {}",
                    page.serial,
                    last.wrapping_add(1),
                    page.sequence
                )));
            }
        }
        state.last_sequence = Some(page.sequence);

        match (page.flags.is_continued(), state.pending.is_some()) {
            (true, false) => {
                return Err(ConvertError::malformed(format!(
                    "page {} of stream {:#x} continues a packet that was never started",
                    page.sequence, page.serial
                )));
            }
            (false, true) => {
                return Err(ConvertError::malformed(format!(
                    "page {} of stream {:#x} drops an unfinished packet",
                    page.sequence, page.serial
                )));
            }
            _ => {}
        }

        let mut completed: Vec<Vec<u8>> = Vec::new();
        let mut current = state.pending.take().unwrap_or_default();
        let mut open = false;
        for (lacing, bytes) in page.segment_slices() {
            current.extend_from_slice(bytes);
            open = true;
            if lacing < 255 {
                completed.push(std::mem::take(&mut current));
                open = false;
            }
        }
        if open {
            state.pending = Some(current);
        }

        if page.flags.is_eos() {
            if state.pending.is_some() {
                return Err(ConvertError::malformed(format!(
                    "end page of stream {:#x} ends mid-packet",
                    page.serial
                )));
            }
            state.ended = true;
        }

        let count = completed.len();
        for (index, data) in completed.into_iter().enumerate() {
            let last = index + 1 == count;
            self.ready.push_back(CodecPacket {
                data,
                granule_position: if last { page.granule_position } else { None },
                bos: page.flags.is_bos() && index == 0,
                eos: page.flags.is_eos() && last,
                serial: page.serial,
            });
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ogg::page::PageFlags;
    use std::io::Cursor;

    fn page(serial: u32, sequence: u32, flags: u8, granule: Option<u64>, segments: &[u8]) -> OggPage {
        let len: usize = segments.iter().map(|&s| s as usize).sum();
        OggPage {
            version: 0,
            flags: PageFlags(flags),
            granule_position: granule,
            serial,
            sequence,
            checksum: 0,
            segments: segments.to_vec(),
            body: (0..len).map(|i| (i % 251) as u8).collect(),
        }
    }

    fn reader(pages: &[OggPage]) -> PacketReader<Cursor<Vec<u8>>> {
        let bytes: Vec<u8> = pages.iter().flat_map(|p| p.to_bytes()).collect();
        PacketReader::new(Cursor::new(bytes))
    }

    fn drain(reader: &mut PacketReader<Cursor<Vec<u8>>>) -> Result<Vec<CodecPacket>> {
        let mut out = Vec::new();
        while let Some(packet) = reader.next_packet()? {
            out.push(packet);
        }
        Ok(out)
    }

    #[test]
    fn test_multiple_packets_on_one_page() {
        let mut r = reader(&[page(1, 0, PageFlags::BOS | PageFlags::EOS, Some(960), &[10, 20, 0])]);
        let packets = drain(&mut r).unwrap();

        assert_eq!(packets.len(), 3);
        assert_eq!(packets[0].data.len(), 10);
        assert!(packets[0].bos);
        assert_eq!(packets[0].granule_position, None);
        assert!(packets[2].data.is_empty());
        assert!(packets[2].eos);
        assert_eq!(packets[2].granule_position, Some(960));
    }

    #[test]
    fn test_packet_spanning_pages() {
        let mut r = reader(&[
            page(1, 0, PageFlags::BOS, None, &[255, 255]),
            page(1, 1, PageFlags::CONTINUED | PageFlags::EOS, Some(100), &[255, 4]),
        ]);
        let packets = drain(&mut r).unwrap();

        assert_eq!(packets.len(), 1);
        assert_eq!(packets[0].data.len(), 255 * 3 + 4);
        assert!(packets[0].bos);
        assert!(packets[0].eos);
        assert_eq!(packets[0].granule_position, Some(100));
    }

    #[test]
    fn test_exact_multiple_of_255_needs_zero_lacing() {
        let mut r = reader(&[
            page(1, 0, PageFlags::BOS, None, &[255]),
            page(1, 1, PageFlags::CONTINUED | PageFlags::EOS, Some(1), &[0]),
        ]);
        let packets = drain(&mut r).unwrap();
        assert_eq!(packets.len(), 1);
        assert_eq!(packets[0].data.len(), 255);
    }

    #[test]
    fn test_interleaved_streams_are_kept_apart() {
        let mut r = reader(&[
            page(1, 0, PageFlags::BOS, Some(0), &[3]),
            page(2, 0, PageFlags::BOS, Some(0), &[5]),
            page(1, 1, PageFlags::EOS, Some(10), &[7]),
            page(2, 1, PageFlags::EOS, Some(10), &[9]),
        ]);
        let packets = drain(&mut r).unwrap();
        let serials: Vec<u32> = packets.iter().map(|p| p.serial).collect();
        assert_eq!(serials, vec![1, 2, 1, 2]);
        assert_eq!(packets[3].data.len(), 9);
    }

    #[test]
    fn test_sequence_gap_is_malformed() {
        let mut r = reader(&[
            page(1, 0, PageFlags::BOS, Some(0), &[3]),
            page(1, 2, PageFlags::EOS, Some(10), &[3]),
        ]);
        let err = drain(&mut r).unwrap_err();
        assert!(err.to_string().contains("sequence gap"));
    }

    #[test]
    fn test_orphan_continuation_is_malformed() {
        let mut r = reader(&[
            page(1, 0, PageFlags::BOS, Some(0), &[3]),
            page(1, 1, PageFlags::CONTINUED, Some(10), &[3]),
        ]);
        assert!(matches!(
            drain(&mut r),
            Err(ConvertError::MalformedContainer(_))
        ));
    }

    #[test]
    fn test_missing_continuation_flag_is_malformed() {
        let mut r = reader(&[
            page(1, 0, PageFlags::BOS, None, &[255]),
            page(1, 1, PageFlags::EOS, Some(10), &[3]),
        ]);
        assert!(matches!(
            drain(&mut r),
            Err(ConvertError::MalformedContainer(_))
        ));
    }

    #[test]
    fn test_eos_mid_packet_is_malformed() {
        let mut r = reader(&[page(1, 0, PageFlags::BOS | PageFlags::EOS, None, &[255])]);
        assert!(drain(&mut r).is_err());
    }

    #[test]
    fn test_page_after_eos_is_malformed() {
        let mut r = reader(&[
            page(1, 0, PageFlags::BOS | PageFlags::EOS, Some(0), &[3]),
            page(1, 1, 0, Some(10), &[3]),
        ]);
        assert!(drain(&mut r).is_err());
    }
}
