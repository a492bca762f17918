//! # OGG Page Reader
//!
//! Splits a byte stream into checksummed OGG pages.

use std::io::{ErrorKind as IoErrorKind, Read};

use tracing::trace;

use super::crc::{page_checksum, CHECKSUM_OFFSET};
use crate::error::{ConvertError, Result};

/// Capture pattern at the start of every page.
pub const CAPTURE_PATTERN: [u8; 4] = *b"OggS";

/// Fixed header length, before the segment table.
pub const HEADER_LEN: usize = 27;

/// Largest body a single page can carry (255 segments of 255 bytes).
pub const MAX_BODY_LEN: usize = 255 * 255;

/// Header-type flags of a page.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct PageFlags(pub u8);

impl PageFlags {
    pub const CONTINUED: u8 = 0x01;
    pub const BOS: u8 = 0x02;
    pub const EOS: u8 = 0x04;

    /// First segment continues a packet from the previous page.
    pub fn is_continued(&self) -> bool {
        self.0 & Self::CONTINUED != 0
    }

    pub fn is_bos(&self) -> bool {
        self.0 & Self::BOS != 0
    }

    pub fn is_eos(&self) -> bool {
        self.0 & Self::EOS != 0
    }
}

/// One OGG page.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OggPage {
    pub version: u8,
    pub flags: PageFlags,
    /// `None` when the stored value has all bits set.
    pub granule_position: Option<u64>,
    pub serial: u32,
    pub sequence: u32,
    pub checksum: u32,
    /// Lacing values.
    pub segments: Vec<u8>,
    pub body: Vec<u8>,
}

impl OggPage {
    /// Serialize the page, computing a fresh checksum.
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(HEADER_LEN + self.segments.len() + self.body.len());
        out.extend_from_slice(&CAPTURE_PATTERN);
        out.push(self.version);
        out.push(self.flags.0);
        out.extend_from_slice(&self.granule_position.unwrap_or(u64::MAX).to_le_bytes());
        out.extend_from_slice(&self.serial.to_le_bytes());
        out.extend_from_slice(&self.sequence.to_le_bytes());
        out.extend_from_slice(&[0u8; 4]);
        out.push(self.segments.len() as u8);
        out.extend_from_slice(&self.segments);
        out.extend_from_slice(&self.body);

        let crc = page_checksum(&out);
        out[CHECKSUM_OFFSET..CHECKSUM_OFFSET + 4].copy_from_slice(&crc.to_le_bytes());
        out
    }

    /// Byte ranges of the body addressed by each lacing value.
    pub(crate) fn segment_slices(&self) -> impl Iterator<Item = (u8, &[u8])> {
        let mut offset = 0usize;
        self.segments.iter().map(move |&lacing| {
            let start = offset;
            offset += lacing as usize;
            (lacing, &self.body[start..offset])
        })
    }
}

/// Lazy iterator over the pages of an OGG byte stream.
///
/// Every page is checksum-verified. Iteration stops at the first error.
pub struct PageReader<R> {
    reader: R,
    offset: u64,
    failed: bool,
}

impl<R: Read> PageReader<R> {
    pub fn new(reader: R) -> Self {
        Self {
            reader,
            offset: 0,
            failed: false,
        }
    }

    /// Byte offset of the next page.
    pub fn offset(&self) -> u64 {
        self.offset
    }

    fn read_page(&mut self) -> Result<Option<OggPage>> {
        let mut header = [0u8; HEADER_LEN];
        let got = read_fully(&mut self.reader, &mut header)
            .map_err(|e| ConvertError::malformed(format!("read error: {}", e)))?;
        if got == 0 {
            return Ok(None);
        }
        if got < HEADER_LEN {
            return Err(ConvertError::malformed(format!(
                "truncated page header at offset {} ({} of {} bytes)",
                self.offset, got, HEADER_LEN
            )));
        }
        if header[..4] != CAPTURE_PATTERN {
            return Err(ConvertError::malformed(format!(
                "missing capture pattern at offset {}",
                self.offset
            )));
        }
        if header[4] != 0 {
            return Err(ConvertError::malformed(format!(
                "unsupported page version {} at offset {}",
                header[4], self.offset
            )));
        }

        let segment_count = header[26] as usize;
        let mut segments = vec![0u8; segment_count];
        let got = read_fully(&mut self.reader, &mut segments)
            .map_err(|e| ConvertError::malformed(format!("read error: {}", e)))?;
        if got < segment_count {
            return Err(ConvertError::malformed(format!(
                "truncated segment table at offset {}",
                self.offset
            )));
        }

        let body_len: usize = segments.iter().map(|&l| l as usize).sum();
        let mut body = vec![0u8; body_len];
        let got = read_fully(&mut self.reader, &mut body)
            .map_err(|e| ConvertError::malformed(format!("read error: {}", e)))?;
        if got < body_len {
            return Err(ConvertError::malformed(format!(
                "truncated page body at offset {} ({} of {} bytes)",
                self.offset, got, body_len
            )));
        }

        let stored = u32::from_le_bytes([header[22], header[23], header[24], header[25]]);
        let mut raw = Vec::with_capacity(HEADER_LEN + segment_count + body_len);
        raw.extend_from_slice(&header);
        raw.extend_from_slice(&segments);
        raw.extend_from_slice(&body);
        let computed = page_checksum(&raw);
        if computed != stored {
            return Err(ConvertError::malformed(format!(
                "checksum mismatch at offset {}: stored {:#010x}, computed {:#010x}",
                self.offset, stored, computed
            )));
        }

        let granule = u64::from_le_bytes([
            header[6], header[7], header[8], header[9], header[10], header[11], header[12],
            header[13],
        ]);

        let page = OggPage {
            version: header[4],
            flags: PageFlags(header[5]),
            granule_position: (granule != u64::MAX).then_some(granule),
            serial: u32::from_le_bytes([header[14], header[15], header[16], header[17]]),
            sequence: u32::from_le_bytes([header[18], header[19], header[20], header[21]]),
            checksum: stored,
            segments,
            body,
        };

        trace!(
            offset = self.offset,
            serial = page.serial,
            sequence = page.sequence,
            flags = page.flags.0,
            "read page"
        );

        self.offset += raw.len() as u64;
        Ok(Some(page))
    }
}

impl<R: Read> Iterator for PageReader<R> {
    type Item = Result<OggPage>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.failed {
            return None;
        }
        match self.read_page() {
            Ok(Some(page)) => Some(Ok(page)),
            Ok(None) => None,
            Err(e) => {
                self.failed = true;
                Some(Err(e))
            }
        }
    }
}

/// Read until `buf` is full or the reader is exhausted; returns bytes read.
fn read_fully<R: Read>(reader: &mut R, buf: &mut [u8]) -> std::io::Result<usize> {
    let mut filled = 0;
    while filled < buf.len() {
        match reader.read(&mut buf[filled..]) {
            Ok(0) => break,
            Ok(n) => filled += n,
            Err(e) if e.kind() == IoErrorKind::Interrupted => continue,
            Err(e) => return Err(e),
        }
    }
    Ok(filled)
}
