//! Backend capability surface consumed by the streaming engine.
//!
//! The engine only needs a small queue-oriented voice API from the native
//! audio layer: buffers filled with raw bytes, queued in FIFO order, and
//! consumed while a voice plays. [`AudioBackend`] captures exactly that
//! surface so the engine, queue, and watcher can be driven by a real device
//! adapter ([`rodio::RodioBackend`]) or by the scripted mock in
//! [`crate::testing`].

pub mod rodio;

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, Weak};

use crate::error::{BackendError, Error, Result};

/// Handle to a backend sample buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct BufferId(pub u32);

/// Handle to a backend playback voice.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct VoiceId(pub u32);

/// Playback state reported by the backend for a voice.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VoiceState {
    Initial,
    Playing,
    Paused,
    Stopped,
}

/// PCM layout of a buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AudioFormat {
    Mono8,
    Mono16,
    Stereo8,
    Stereo16,
}

impl AudioFormat {
    /// Map a bit depth and channel count onto a backend format.
    pub fn from_depth_channels(bits: u16, channels: u16) -> Result<Self> {
        match (bits, channels) {
            (8, 1) => Ok(Self::Mono8),
            (8, 2) => Ok(Self::Stereo8),
            (16, 1) => Ok(Self::Mono16),
            (16, 2) => Ok(Self::Stereo16),
            _ => Err(Error::Config(format!(
                "unsupported format: {} bits, {} channels",
                bits, channels
            ))),
        }
    }

    /// Bytes per sample frame across all channels.
    pub fn frame_size(self) -> usize {
        (self.bits() as usize / 8) * self.channels() as usize
    }

    pub fn bits(self) -> u16 {
        match self {
            Self::Mono8 | Self::Stereo8 => 8,
            Self::Mono16 | Self::Stereo16 => 16,
        }
    }

    pub fn channels(self) -> u16 {
        match self {
            Self::Mono8 | Self::Mono16 => 1,
            Self::Stereo8 | Self::Stereo16 => 2,
        }
    }
}

/// Result alias for raw backend calls.
pub type BackendResult<T> = std::result::Result<T, BackendError>;

/// Capability surface of a native playback backend.
///
/// Implementations mirror the queue discipline the engine relies on:
/// [`dequeue`](Self::dequeue) returns buffers in exactly the order they were
/// enqueued, and [`processed_count`](Self::processed_count) never counts a
/// buffer that is still pending playback.
pub trait AudioBackend: Send + Sync + 'static {
    /// Allocate `count` buffer handles.
    fn create_buffers(&self, count: usize) -> BackendResult<Vec<BufferId>>;

    /// Release previously allocated buffer handles.
    fn release_buffers(&self, ids: &[BufferId]) -> BackendResult<()>;

    /// Overwrite a buffer's content and format in place.
    fn set_buffer_data(
        &self,
        id: BufferId,
        format: AudioFormat,
        frequency: u32,
        data: &[u8],
    ) -> BackendResult<()>;

    /// Allocate a playback voice.
    fn create_voice(&self) -> BackendResult<VoiceId>;

    /// Release a playback voice.
    fn release_voice(&self, voice: VoiceId) -> BackendResult<()>;

    /// Append buffers to the tail of the voice's playback queue.
    fn enqueue(&self, voice: VoiceId, ids: &[BufferId]) -> BackendResult<()>;

    /// Remove the `count` oldest buffers from the voice's queue, in queue
    /// order.
    fn dequeue(&self, voice: VoiceId, count: usize) -> BackendResult<Vec<BufferId>>;

    fn play(&self, voice: VoiceId) -> BackendResult<()>;

    fn pause(&self, voice: VoiceId) -> BackendResult<()>;

    fn stop(&self, voice: VoiceId) -> BackendResult<()>;

    /// Return the voice to its initial state.
    fn rewind(&self, voice: VoiceId) -> BackendResult<()>;

    fn voice_state(&self, voice: VoiceId) -> BackendResult<VoiceState>;

    /// Number of queued buffers the voice has fully consumed.
    fn processed_count(&self, voice: VoiceId) -> BackendResult<usize>;

    /// Number of buffers currently queued on the voice.
    fn queued_count(&self, voice: VoiceId) -> BackendResult<usize>;

    /// Playback position within the queued data, in seconds.
    fn offset_seconds(&self, voice: VoiceId) -> BackendResult<f32>;

    /// Register a dependent validity flag to be cleared at backend teardown.
    ///
    /// The default implementation ignores the flag; adapters that own real
    /// device state should route it into a [`DependentRegistry`].
    fn register_dependent(&self, _flag: &Arc<AtomicBool>) {}
}

/// Non-owning registry of dependent validity flags.
///
/// An owner (typically a backend adapter) registers the flags of objects
/// created against it and clears them all, synchronously, when it tears
/// down. Dependents observe the cleared flag and refuse further work
/// instead of touching released device state.
#[derive(Debug, Default)]
pub struct DependentRegistry {
    slots: Mutex<Vec<Weak<AtomicBool>>>,
}

impl DependentRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Track a dependent. Dead slots are compacted on the way in.
    pub fn register(&self, flag: &Arc<AtomicBool>) {
        let mut slots = self.slots.lock().unwrap();
        slots.retain(|slot| slot.strong_count() > 0);
        slots.push(Arc::downgrade(flag));
    }

    /// Clear every live dependent flag.
    pub fn invalidate_all(&self) {
        let mut slots = self.slots.lock().unwrap();
        for slot in slots.drain(..) {
            if let Some(flag) = slot.upgrade() {
                flag.store(false, Ordering::SeqCst);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn format_maps_depth_and_channels() {
        assert_eq!(
            AudioFormat::from_depth_channels(16, 2).unwrap(),
            AudioFormat::Stereo16
        );
        assert_eq!(
            AudioFormat::from_depth_channels(8, 1).unwrap(),
            AudioFormat::Mono8
        );
        assert!(AudioFormat::from_depth_channels(24, 2).is_err());
        assert!(AudioFormat::from_depth_channels(16, 6).is_err());
    }

    #[test]
    fn frame_size_covers_all_channels() {
        assert_eq!(AudioFormat::Mono8.frame_size(), 1);
        assert_eq!(AudioFormat::Mono16.frame_size(), 2);
        assert_eq!(AudioFormat::Stereo8.frame_size(), 2);
        assert_eq!(AudioFormat::Stereo16.frame_size(), 4);
    }

    #[test]
    fn registry_invalidates_live_dependents() {
        let registry = DependentRegistry::new();
        let alive = Arc::new(AtomicBool::new(true));
        let dropped = Arc::new(AtomicBool::new(true));
        registry.register(&alive);
        registry.register(&dropped);
        drop(dropped);

        registry.invalidate_all();
        assert!(!alive.load(Ordering::SeqCst));
    }
}
