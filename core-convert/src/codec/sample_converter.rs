//! # Sample Format Converter
//!
//! Normalizes decoder output to interleaved signed 16-bit samples.

use symphonia::core::audio::{AudioBuffer, AudioBufferRef, Signal};
use symphonia::core::conv::IntoSample;
use symphonia::core::sample::Sample;

/// Sample converter producing interleaved `i16`.
///
/// Symphonia hands out planar buffers in the codec's native sample format
/// (Vorbis decodes to `f32`). Writers want interleaved 16-bit frames
/// (LRLRLR... for stereo).
pub struct SampleConverter;

impl SampleConverter {
    /// Convert a Symphonia buffer of any sample format to interleaved `i16`.
    ///
    /// Float input is scaled and saturated by Symphonia's sample conversion.
    ///
    /// # Example
    ///
    /// ```rust,ignore
    /// let decoded = decoder.decode(&packet)?;
    /// let samples = SampleConverter::to_interleaved_i16(&decoded);
    /// ```
    pub fn to_interleaved_i16(buffer: &AudioBufferRef<'_>) -> Vec<i16> {
        match buffer {
            AudioBufferRef::S16(buf) => Self::convert_and_interleave(&**buf, |s: i16| s),
            AudioBufferRef::F32(buf) => {
                Self::convert_and_interleave(&**buf, |s: f32| s.into_sample())
            }
            AudioBufferRef::F64(buf) => {
                Self::convert_and_interleave(&**buf, |s: f64| s.into_sample())
            }
            AudioBufferRef::S32(buf) => {
                Self::convert_and_interleave(&**buf, |s: i32| s.into_sample())
            }
            AudioBufferRef::S24(buf) => {
                Self::convert_and_interleave(&**buf, |s| IntoSample::<i16>::into_sample(s))
            }
            AudioBufferRef::S8(buf) => Self::convert_and_interleave(&**buf, |s: i8| s.into_sample()),
            AudioBufferRef::U32(buf) => {
                Self::convert_and_interleave(&**buf, |s: u32| s.into_sample())
            }
            AudioBufferRef::U24(buf) => {
                Self::convert_and_interleave(&**buf, |s| IntoSample::<i16>::into_sample(s))
            }
            AudioBufferRef::U16(buf) => {
                Self::convert_and_interleave(&**buf, |s: u16| s.into_sample())
            }
            AudioBufferRef::U8(buf) => Self::convert_and_interleave(&**buf, |s: u8| s.into_sample()),
        }
    }

    fn convert_and_interleave<T>(buf: &AudioBuffer<T>, convert: fn(T) -> i16) -> Vec<i16>
    where
        T: Sample + Copy,
    {
        let num_channels = buf.spec().channels.count();
        let num_frames = buf.frames();
        let mut interleaved = Vec::with_capacity(num_frames * num_channels);

        for frame_idx in 0..num_frames {
            for chan_idx in 0..num_channels {
                interleaved.push(convert(buf.chan(chan_idx)[frame_idx]));
            }
        }

        interleaved
    }

    /// Drop whole frames from the front and cut the buffer to `keep` frames.
    ///
    /// Used for pre-skip and end-of-stream trimming.
    pub fn trim_frames(samples: &mut Vec<i16>, channels: usize, skip: usize, keep: usize) {
        let channels = channels.max(1);
        let total = samples.len() / channels;
        let skip = skip.min(total);
        let keep = keep.min(total - skip);
        if skip > 0 {
            samples.drain(..skip * channels);
        }
        samples.truncate(keep * channels);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use symphonia::core::audio::{Channels, SignalSpec};

    #[test]
    fn test_planar_f32_is_interleaved_and_scaled() {
        let spec = SignalSpec::new(48_000, Channels::FRONT_LEFT | Channels::FRONT_RIGHT);
        let mut buf = AudioBuffer::<f32>::new(4, spec);
        buf.render_reserved(Some(2));
        buf.chan_mut(0).copy_from_slice(&[0.0, 1.0]);
        buf.chan_mut(1).copy_from_slice(&[-1.0, 0.5]);

        let out = SampleConverter::to_interleaved_i16(&AudioBufferRef::F32(
            std::borrow::Cow::Borrowed(&buf),
        ));

        assert_eq!(out.len(), 4);
        assert_eq!(out[0], 0);
        assert_eq!(out[1], i16::MIN);
        assert_eq!(out[2], i16::MAX);
        assert!((out[3] - 16_384).abs() <= 1);
    }

    #[test]
    fn test_trim_frames() {
        let mut samples: Vec<i16> = (0..12).collect();
        SampleConverter::trim_frames(&mut samples, 2, 2, 3);
        assert_eq!(samples, vec![4, 5, 6, 7, 8, 9]);
    }

    #[test]
    fn test_trim_frames_saturates() {
        let mut samples: Vec<i16> = (0..6).collect();
        SampleConverter::trim_frames(&mut samples, 2, 5, 10);
        assert!(samples.is_empty());

        let mut samples: Vec<i16> = (0..6).collect();
        SampleConverter::trim_frames(&mut samples, 2, 0, 10);
        assert_eq!(samples.len(), 6);
    }
}
