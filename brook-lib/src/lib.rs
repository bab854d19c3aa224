//! # Brook Streaming Library
//!
//! This library streams PCM audio to a playback voice through a fixed pool
//! of fixed-size buffers. It keeps the voice continuously fed from a pull
//! producer, detects when a voice finishes on its own without busy-polling,
//! and recovers automatically when a starved producer comes back.
//!
//! The backend is abstract: anything exposing a small queue-oriented voice
//! surface ([`backend::AudioBackend`]) can sit underneath. A rodio adapter
//! for the default output device ships in [`backend::rodio`], and a fully
//! scripted mock for tests ships in [`testing`].

pub mod backend;
mod buffer;
pub mod engine;
pub mod error;
pub mod player;
pub mod producer;
pub mod settings;
pub mod testing;
pub mod voice;

pub use buffer::StreamBuffer;
pub use error::{BackendError, Error, Result};
pub use settings::PlayerSettings;
