//! # OGG Page Writer
//!
//! Packs codec packets of one logical stream into pages. Used to build test
//! fixtures and to re-wrap packets; the conversion pipeline itself only reads.

use std::io::Write;

use super::page::{OggPage, PageFlags, MAX_BODY_LEN};

/// Writes the packets of one logical stream, one or more pages per packet.
pub struct PacketWriter<W> {
    writer: W,
    serial: u32,
    sequence: u32,
    started: bool,
}

impl<W: Write> PacketWriter<W> {
    pub fn new(writer: W, serial: u32) -> Self {
        Self {
            writer,
            serial,
            sequence: 0,
            started: false,
        }
    }

    /// Write `packet` on fresh pages.
    ///
    /// `granule` is stored on the page where the packet completes; pages the
    /// packet merely passes through carry no granule position. `end_of_stream`
    /// marks that final page with the EOS flag.
    pub fn write_packet(
        &mut self,
        packet: &[u8],
        granule: u64,
        end_of_stream: bool,
    ) -> std::io::Result<()> {
        let mut lacing = Vec::with_capacity(packet.len() / 255 + 1);
        let mut remaining = packet.len();
        while remaining >= 255 {
            lacing.push(255u8);
            remaining -= 255;
        }
        lacing.push(remaining as u8);

        let mut offset = 0usize;
        let mut chunks = lacing.chunks(255).peekable();
        let mut first = true;
        while let Some(chunk) = chunks.next() {
            let last = chunks.peek().is_none();
            let body_len: usize = chunk.iter().map(|&l| l as usize).sum();
            debug_assert!(body_len <= MAX_BODY_LEN);

            let mut flags = 0u8;
            if !self.started {
                flags |= PageFlags::BOS;
                self.started = true;
            }
            if !first {
                flags |= PageFlags::CONTINUED;
            }
            if last && end_of_stream {
                flags |= PageFlags::EOS;
            }

            let page = OggPage {
                version: 0,
                flags: PageFlags(flags),
                granule_position: last.then_some(granule),
                serial: self.serial,
                sequence: self.sequence,
                checksum: 0,
                segments: chunk.to_vec(),
                body: packet[offset..offset + body_len].to_vec(),
            };
            self.writer.write_all(&page.to_bytes())?;

            offset += body_len;
            self.sequence += 1;
            first = false;
        }
        Ok(())
    }

    pub fn into_inner(self) -> W {
        self.writer
    }
}
