//! # Codec Decoders
//!
//! Packet-at-a-time decoders turning a demuxed OGG stream into 16-bit PCM.
//!
//! ## Supported Codecs
//!
//! | Codec | Backend | Output rate |
//! |-------|---------|-------------|
//! | Opus | libopus (`opus` crate) | always 48 kHz |
//! | Vorbis | Symphonia | declared rate |
//!
//! Memory stays bounded by one packet's worth of output: nothing here
//! buffers the whole stream.

mod opus;
mod sample_converter;
mod vorbis;

use std::io::Read;

pub use self::opus::{ChannelMapping, OpusHead, OpusPacketDecoder, MAX_FRAME_SAMPLES, OPUS_RATE};
pub use self::vorbis::{VorbisIdent, VorbisPacketDecoder};
pub use sample_converter::SampleConverter;

use crate::error::Result;
use crate::ogg::{CodecKind, OggDemuxer};
use crate::pcm::{PcmBuffer, PcmSpec};

/// Streaming decoder from codec packets to interleaved PCM.
pub trait PcmDecoder {
    /// Format of every buffer this decoder yields.
    fn spec(&self) -> PcmSpec;

    /// Decode packets until one produces audio; `None` at end of stream.
    ///
    /// # Errors
    ///
    /// [`ConvertError::Decode`](crate::ConvertError::Decode) on corrupt
    /// packet data, or a container error surfaced by the demuxer.
    fn decode_next(&mut self) -> Result<Option<PcmBuffer>>;

    /// Frames (samples per channel) returned so far.
    fn frames_emitted(&self) -> u64;
}

/// Build the decoder matching the demuxer's selected stream.
pub fn open_decoder<'a, R: Read + 'a>(demuxer: OggDemuxer<R>) -> Result<Box<dyn PcmDecoder + 'a>> {
    match demuxer.codec() {
        CodecKind::Opus => Ok(Box::new(OpusPacketDecoder::new(demuxer)?)),
        CodecKind::Vorbis => Ok(Box::new(VorbisPacketDecoder::new(demuxer)?)),
    }
}
