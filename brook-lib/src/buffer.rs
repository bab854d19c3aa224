//! Fixed PCM blocks cycled through a voice's playback queue.

use crate::backend::{AudioFormat, BufferId};

/// One fixed block of PCM audio plus its format metadata.
///
/// Buffers are allocated once by the engine and live until it is disposed;
/// their backend content is overwritten in place on each refill.
#[derive(Debug, Clone, Copy)]
pub struct StreamBuffer {
    id: BufferId,
    format: AudioFormat,
    frequency: u32,
    size: usize,
}

impl StreamBuffer {
    pub(crate) fn new(id: BufferId, format: AudioFormat, frequency: u32) -> Self {
        Self {
            id,
            format,
            frequency,
            size: 0,
        }
    }

    pub fn id(&self) -> BufferId {
        self.id
    }

    pub fn format(&self) -> AudioFormat {
        self.format
    }

    pub fn frequency(&self) -> u32 {
        self.frequency
    }

    /// Byte size of the buffer's current content.
    pub fn size(&self) -> usize {
        self.size
    }

    pub(crate) fn set_size(&mut self, size: usize) {
        self.size = size;
    }

    /// Sample frames held, derived from size and format.
    pub fn samples(&self) -> usize {
        self.size / self.format.frame_size()
    }

    /// Play time held, in seconds.
    pub fn seconds(&self) -> f32 {
        self.samples() as f32 / self.frequency as f32
    }
}
