//! # OGG Container
//!
//! Reading side of the OGG bitstream format: pages, packet reassembly and
//! logical stream selection. The module is codec-agnostic apart from the
//! identification signatures used to pick a stream.

pub mod crc;
pub mod demux;
pub mod packet;
pub mod page;
pub mod writer;

pub use demux::{CodecKind, OggDemuxer};
pub use packet::{CodecPacket, PacketReader};
pub use page::{OggPage, PageFlags, PageReader};
pub use writer::PacketWriter;
