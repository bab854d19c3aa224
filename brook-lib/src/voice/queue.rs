//! In-memory mirror of a voice's backend buffer queue.

use std::collections::VecDeque;

use crate::buffer::StreamBuffer;
use crate::error::{Error, Result};

/// Ordered record of the buffers outstanding on a voice.
///
/// Insertion order is playback order. The backend's own queue must never
/// diverge from this one, so callers mutate it only after the matching
/// backend call has succeeded.
#[derive(Debug, Default)]
pub struct BufferQueue {
    entries: VecDeque<StreamBuffer>,
}

impl BufferQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Total bytes held across all queued buffers.
    pub fn bytes_queued(&self) -> usize {
        self.entries.iter().map(StreamBuffer::size).sum()
    }

    /// Total sample frames held across all queued buffers.
    pub fn samples_queued(&self) -> usize {
        self.entries.iter().map(StreamBuffer::samples).sum()
    }

    /// Total play time held across all queued buffers, in seconds.
    pub fn seconds_queued(&self) -> f32 {
        self.entries.iter().map(StreamBuffer::seconds).sum()
    }

    pub(crate) fn push(&mut self, buffer: StreamBuffer) {
        self.entries.push_back(buffer);
    }

    /// Validate a removal of `count` buffers before any state changes.
    ///
    /// Removing more buffers than the queue holds is a contract violation,
    /// never a silent truncation.
    pub(crate) fn check_removal(&self, count: usize) -> Result<()> {
        if count > self.entries.len() {
            return Err(Error::QueueUnderflow {
                requested: count,
                queued: self.entries.len(),
            });
        }
        Ok(())
    }

    pub(crate) fn pop(&mut self) -> Result<StreamBuffer> {
        self.entries.pop_front().ok_or(Error::QueueUnderflow {
            requested: 1,
            queued: 0,
        })
    }

    pub(crate) fn pop_many(&mut self, count: usize) -> Result<Vec<StreamBuffer>> {
        self.check_removal(count)?;
        Ok(self.entries.drain(..count).collect())
    }

    pub(crate) fn ids(&self) -> impl Iterator<Item = crate::backend::BufferId> + '_ {
        self.entries.iter().map(StreamBuffer::id)
    }
}
