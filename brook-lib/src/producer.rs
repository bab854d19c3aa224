//! Pull producers supplying raw sample bytes on demand.

use std::io::{self, Read};

use rand::Rng;

use crate::backend::AudioFormat;

fn seek_unsupported() -> io::Error {
    io::Error::new(io::ErrorKind::Unsupported, "seeking not supported")
}

/// Source of raw PCM bytes pulled by the streaming engine.
///
/// `fill` writes up to `dest.len()` bytes and returns how many were
/// written. Zero means "no data right now", not necessarily end of stream;
/// the engine pads any shortfall with silence and never treats it as an
/// error. Positioning operations are capability-gated: the engine checks
/// the `can_*` flags and reports an unsupported-operation error instead of
/// calling through.
pub trait SampleProducer: Send {
    fn fill(&mut self, dest: &mut [u8]) -> io::Result<usize>;

    /// True when byte positioning is supported.
    fn can_seek(&self) -> bool {
        false
    }

    /// Current byte position.
    fn position(&self) -> io::Result<u64> {
        Err(seek_unsupported())
    }

    /// Move to an absolute byte position, returning the position taken.
    fn seek_bytes(&mut self, _position: u64) -> io::Result<u64> {
        Err(seek_unsupported())
    }

    /// True when positioning by play time is supported.
    fn can_seek_time(&self) -> bool {
        false
    }

    /// Move to an absolute play time in seconds.
    fn seek_seconds(&mut self, _seconds: f64) -> io::Result<()> {
        Err(seek_unsupported())
    }

    /// True when positioning by track index is supported.
    fn can_seek_track(&self) -> bool {
        false
    }

    /// Move to the start of a track.
    fn seek_track(&mut self, _index: u32) -> io::Result<()> {
        Err(seek_unsupported())
    }

    /// Number of addressable tracks, when track seeking is supported.
    fn track_count(&self) -> Option<u32> {
        None
    }
}

/// Producer pulling from any byte stream, e.g. a socket or a pipe.
///
/// End of stream reads as a permanent drought: the engine keeps the voice
/// fed with silence rather than failing.
pub struct ReaderProducer<R: Read + Send> {
    reader: R,
}

impl<R: Read + Send> ReaderProducer<R> {
    pub fn new(reader: R) -> Self {
        Self { reader }
    }
}

impl<R: Read + Send> SampleProducer for ReaderProducer<R> {
    fn fill(&mut self, dest: &mut [u8]) -> io::Result<usize> {
        self.reader.read(dest)
    }
}

/// Seekable producer over an in-memory PCM image.
pub struct MemoryProducer {
    data: Vec<u8>,
    position: usize,
}

impl MemoryProducer {
    pub fn new(data: Vec<u8>) -> Self {
        Self { data, position: 0 }
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }
}

impl SampleProducer for MemoryProducer {
    fn fill(&mut self, dest: &mut [u8]) -> io::Result<usize> {
        let available = self.data.len() - self.position;
        let count = available.min(dest.len());
        dest[..count].copy_from_slice(&self.data[self.position..self.position + count]);
        self.position += count;
        Ok(count)
    }

    fn can_seek(&self) -> bool {
        true
    }

    fn position(&self) -> io::Result<u64> {
        Ok(self.position as u64)
    }

    fn seek_bytes(&mut self, position: u64) -> io::Result<u64> {
        self.position = (position as usize).min(self.data.len());
        Ok(self.position as u64)
    }
}

/// Endless sine tone at a fixed frequency and amplitude.
pub struct SineProducer {
    format: AudioFormat,
    sample_rate: u32,
    tone_hz: f32,
    amplitude: f32,
    phase: f32,
}

impl SineProducer {
    /// Create a tone producer.
    ///
    /// `amplitude` is linear full-scale gain, clamped to `0.0..=1.0`.
    pub fn new(format: AudioFormat, sample_rate: u32, tone_hz: f32, amplitude: f32) -> Self {
        Self {
            format,
            sample_rate,
            tone_hz,
            amplitude: amplitude.clamp(0.0, 1.0),
            phase: 0.0,
        }
    }
}

impl SampleProducer for SineProducer {
    fn fill(&mut self, dest: &mut [u8]) -> io::Result<usize> {
        let frame = self.format.frame_size();
        let frames = dest.len() / frame;
        let step = self.tone_hz / self.sample_rate as f32;

        let mut written = 0;
        for _ in 0..frames {
            let value = (self.phase * std::f32::consts::TAU).sin() * self.amplitude;
            self.phase += step;
            if self.phase >= 1.0 {
                self.phase -= 1.0;
            }
            written += encode_frame(&mut dest[written..], self.format, value);
        }
        Ok(written)
    }
}

/// Endless white noise.
pub struct NoiseProducer {
    format: AudioFormat,
    amplitude: f32,
}

impl NoiseProducer {
    pub fn new(format: AudioFormat, amplitude: f32) -> Self {
        Self {
            format,
            amplitude: amplitude.clamp(0.0, 1.0),
        }
    }
}

impl SampleProducer for NoiseProducer {
    fn fill(&mut self, dest: &mut [u8]) -> io::Result<usize> {
        let frame = self.format.frame_size();
        let frames = dest.len() / frame;
        let mut rng = rand::thread_rng();

        let mut written = 0;
        for _ in 0..frames {
            let value = rng.gen_range(-1.0f32..1.0) * self.amplitude;
            written += encode_frame(&mut dest[written..], self.format, value);
        }
        Ok(written)
    }
}

/// Encode one frame of `value` across all channels; returns bytes written.
fn encode_frame(dest: &mut [u8], format: AudioFormat, value: f32) -> usize {
    let channels = format.channels() as usize;
    match format.bits() {
        8 => {
            let sample = ((value * 127.0) + 128.0).clamp(0.0, 255.0) as u8;
            for slot in dest.iter_mut().take(channels) {
                *slot = sample;
            }
            channels
        }
        _ => {
            let sample = (value * i16::MAX as f32).clamp(i16::MIN as f32, i16::MAX as f32) as i16;
            let bytes = sample.to_le_bytes();
            for channel in 0..channels {
                dest[channel * 2] = bytes[0];
                dest[channel * 2 + 1] = bytes[1];
            }
            channels * 2
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn memory_producer_drains_then_droughts() {
        let mut producer = MemoryProducer::new(vec![1, 2, 3, 4, 5]);
        let mut dest = [0u8; 4];

        assert_eq!(producer.fill(&mut dest).unwrap(), 4);
        assert_eq!(dest, [1, 2, 3, 4]);
        assert_eq!(producer.fill(&mut dest).unwrap(), 1);
        assert_eq!(producer.fill(&mut dest).unwrap(), 0);
    }

    #[test]
    fn memory_producer_seeks_by_bytes() {
        let mut producer = MemoryProducer::new(vec![0, 1, 2, 3]);
        assert!(producer.can_seek());
        assert_eq!(producer.seek_bytes(2).unwrap(), 2);

        let mut dest = [0u8; 4];
        assert_eq!(producer.fill(&mut dest).unwrap(), 2);
        assert_eq!(&dest[..2], &[2, 3]);

        // Past-the-end positions clamp.
        assert_eq!(producer.seek_bytes(100).unwrap(), 4);
    }

    #[test]
    fn reader_producer_reports_unsupported_seeks() {
        let producer = ReaderProducer::new(std::io::empty());
        assert!(!producer.can_seek());
        assert!(!producer.can_seek_time());
        assert!(!producer.can_seek_track());
        assert!(producer.position().is_err());
    }

    #[test]
    fn sine_fills_whole_frames_only() {
        let mut producer = SineProducer::new(AudioFormat::Stereo16, 44_100, 440.0, 0.5);
        let mut dest = [0u8; 10];
        // 10 bytes holds two stereo16 frames; the ragged tail is left alone.
        assert_eq!(producer.fill(&mut dest).unwrap(), 8);
    }

    #[test]
    fn sine_first_sample_is_silence_center() {
        let mut producer = SineProducer::new(AudioFormat::Mono8, 8_000, 100.0, 1.0);
        let mut dest = [0u8; 1];
        producer.fill(&mut dest).unwrap();
        // Phase starts at zero, so the first 8-bit sample sits at midpoint.
        assert_eq!(dest[0], 128);
    }

    #[test]
    fn noise_respects_frame_alignment() {
        let mut producer = NoiseProducer::new(AudioFormat::Mono16, 1.0);
        let mut dest = [0u8; 7];
        assert_eq!(producer.fill(&mut dest).unwrap(), 6);
    }
}
