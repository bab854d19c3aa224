//! Best-effort [`AudioBackend`] adapter over rodio.
//!
//! Each voice maps onto one rodio [`Sink`]; buffer bytes are converted to
//! f32 samples at enqueue time. Rodio reports no processed-buffer counter,
//! so consumption is inferred from sink queue depth: the sink's length
//! counts chunks not yet finished, and everything appended beyond that has
//! been processed. The output stream itself is pinned to a keeper thread
//! because it must stay alive without being `Send`.

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::AtomicBool;
use std::sync::{mpsc, Arc, Mutex};
use std::thread;

use log::warn;
use rodio::buffer::SamplesBuffer;
use rodio::{mixer::Mixer, OutputStreamBuilder, Sink};

use super::{
    AudioBackend, AudioFormat, BackendResult, BufferId, DependentRegistry, VoiceId, VoiceState,
};
use crate::error::BackendError;

#[derive(Default, Clone)]
struct BufferData {
    format: Option<AudioFormat>,
    frequency: u32,
    bytes: Vec<u8>,
}

impl BufferData {
    fn seconds(&self) -> f32 {
        match self.format {
            Some(format) if self.frequency > 0 => {
                (self.bytes.len() / format.frame_size()) as f32 / self.frequency as f32
            }
            _ => 0.0,
        }
    }
}

struct RodioVoice {
    sink: Sink,
    /// Mirror of appended chunks: id plus play time, oldest first.
    chunks: VecDeque<(BufferId, f32)>,
    started: bool,
}

impl RodioVoice {
    fn processed(&self) -> usize {
        self.chunks.len().saturating_sub(self.sink.len())
    }

    fn state(&self) -> VoiceState {
        if !self.started {
            VoiceState::Initial
        } else if self.sink.empty() {
            VoiceState::Stopped
        } else if self.sink.is_paused() {
            VoiceState::Paused
        } else {
            VoiceState::Playing
        }
    }
}

#[derive(Default)]
struct RodioState {
    next_buffer: u32,
    next_voice: u32,
    buffers: HashMap<BufferId, BufferData>,
    voices: HashMap<VoiceId, RodioVoice>,
}

/// Adapter feeding the default output device through rodio.
pub struct RodioBackend {
    mixer: Mixer,
    keeper: Mutex<Option<(mpsc::Sender<()>, thread::JoinHandle<()>)>>,
    state: Mutex<RodioState>,
    registry: DependentRegistry,
}

impl RodioBackend {
    /// Open the default output device.
    pub fn open_default() -> BackendResult<Self> {
        let (mixer_tx, mixer_rx) = mpsc::channel();
        let (quit_tx, quit_rx) = mpsc::channel::<()>();

        let keeper = thread::spawn(move || match OutputStreamBuilder::open_default_stream() {
            Ok(stream) => {
                let _ = mixer_tx.send(Ok(stream.mixer().clone()));
                // Hold the stream open until teardown asks us to let go.
                let _ = quit_rx.recv();
                drop(stream);
            }
            Err(err) => {
                let _ = mixer_tx.send(Err(err.to_string()));
            }
        });

        let mixer = match mixer_rx.recv() {
            Ok(Ok(mixer)) => mixer,
            Ok(Err(message)) => return Err(BackendError::Device(message)),
            Err(_) => return Err(BackendError::Device("output stream thread died".to_string())),
        };

        Ok(Self {
            mixer,
            keeper: Mutex::new(Some((quit_tx, keeper))),
            state: Mutex::new(RodioState::default()),
            registry: DependentRegistry::new(),
        })
    }

    /// Tear down: invalidate dependents, drop voices, release the device.
    pub fn close(&self) {
        self.registry.invalidate_all();
        self.state.lock().unwrap().voices.clear();
        if let Some((quit_tx, handle)) = self.keeper.lock().unwrap().take() {
            drop(quit_tx);
            if handle.join().is_err() {
                warn!("output stream keeper thread panicked");
            }
        }
    }
}

impl Drop for RodioBackend {
    fn drop(&mut self) {
        self.close();
    }
}

/// Decode little-endian PCM bytes into f32 samples.
fn bytes_to_samples(format: AudioFormat, bytes: &[u8]) -> Vec<f32> {
    match format.bits() {
        8 => bytes
            .iter()
            .map(|&byte| (byte as f32 - 128.0) / 128.0)
            .collect(),
        _ => bytes
            .chunks_exact(2)
            .map(|pair| i16::from_le_bytes([pair[0], pair[1]]) as f32 / 32_768.0)
            .collect(),
    }
}

impl AudioBackend for RodioBackend {
    fn create_buffers(&self, count: usize) -> BackendResult<Vec<BufferId>> {
        let mut state = self.state.lock().unwrap();
        let mut ids = Vec::with_capacity(count);
        for _ in 0..count {
            let id = BufferId(state.next_buffer);
            state.next_buffer += 1;
            state.buffers.insert(id, BufferData::default());
            ids.push(id);
        }
        Ok(ids)
    }

    fn release_buffers(&self, ids: &[BufferId]) -> BackendResult<()> {
        let mut state = self.state.lock().unwrap();
        for id in ids {
            if state.buffers.remove(id).is_none() {
                return Err(BackendError::InvalidName);
            }
        }
        Ok(())
    }

    fn set_buffer_data(
        &self,
        id: BufferId,
        format: AudioFormat,
        frequency: u32,
        data: &[u8],
    ) -> BackendResult<()> {
        let mut state = self.state.lock().unwrap();
        let buffer = state.buffers.get_mut(&id).ok_or(BackendError::InvalidName)?;
        buffer.format = Some(format);
        buffer.frequency = frequency;
        buffer.bytes = data.to_vec();
        Ok(())
    }

    fn create_voice(&self) -> BackendResult<VoiceId> {
        let mut state = self.state.lock().unwrap();
        let sink = Sink::connect_new(&self.mixer);
        // New voices idle until told to play.
        sink.pause();
        let id = VoiceId(state.next_voice);
        state.next_voice += 1;
        state.voices.insert(
            id,
            RodioVoice {
                sink,
                chunks: VecDeque::new(),
                started: false,
            },
        );
        Ok(id)
    }

    fn release_voice(&self, voice: VoiceId) -> BackendResult<()> {
        let mut state = self.state.lock().unwrap();
        let voice = state.voices.remove(&voice).ok_or(BackendError::InvalidName)?;
        voice.sink.stop();
        Ok(())
    }

    fn enqueue(&self, voice: VoiceId, ids: &[BufferId]) -> BackendResult<()> {
        let mut state = self.state.lock().unwrap();
        let mut staged = Vec::with_capacity(ids.len());
        for id in ids {
            let data = state.buffers.get(id).ok_or(BackendError::InvalidName)?;
            let format = data.format.ok_or(BackendError::InvalidOperation)?;
            let samples = bytes_to_samples(format, &data.bytes);
            staged.push((
                *id,
                data.seconds(),
                SamplesBuffer::new(format.channels(), data.frequency, samples),
            ));
        }
        let voice = state.voices.get_mut(&voice).ok_or(BackendError::InvalidName)?;
        for (id, seconds, source) in staged {
            voice.sink.append(source);
            voice.chunks.push_back((id, seconds));
        }
        Ok(())
    }

    fn dequeue(&self, voice: VoiceId, count: usize) -> BackendResult<Vec<BufferId>> {
        let mut state = self.state.lock().unwrap();
        let voice = state.voices.get_mut(&voice).ok_or(BackendError::InvalidName)?;
        if count > voice.processed() {
            return Err(BackendError::InvalidOperation);
        }
        Ok(voice.chunks.drain(..count).map(|(id, _)| id).collect())
    }

    fn play(&self, voice: VoiceId) -> BackendResult<()> {
        let mut state = self.state.lock().unwrap();
        let voice = state.voices.get_mut(&voice).ok_or(BackendError::InvalidName)?;
        voice.sink.play();
        voice.started = true;
        Ok(())
    }

    fn pause(&self, voice: VoiceId) -> BackendResult<()> {
        let state = self.state.lock().unwrap();
        let voice = state.voices.get(&voice).ok_or(BackendError::InvalidName)?;
        voice.sink.pause();
        Ok(())
    }

    fn stop(&self, voice: VoiceId) -> BackendResult<()> {
        let state = self.state.lock().unwrap();
        let voice = state.voices.get(&voice).ok_or(BackendError::InvalidName)?;
        // Rodio's stop empties the sink; the mirror keeps the ids so they
        // can still be dequeued, all counting as processed.
        voice.sink.stop();
        Ok(())
    }

    fn rewind(&self, voice: VoiceId) -> BackendResult<()> {
        let mut state = self.state.lock().unwrap();
        let voice = state.voices.get_mut(&voice).ok_or(BackendError::InvalidName)?;
        voice.sink.stop();
        voice.started = false;
        Ok(())
    }

    fn voice_state(&self, voice: VoiceId) -> BackendResult<VoiceState> {
        let state = self.state.lock().unwrap();
        state
            .voices
            .get(&voice)
            .map(RodioVoice::state)
            .ok_or(BackendError::InvalidName)
    }

    fn processed_count(&self, voice: VoiceId) -> BackendResult<usize> {
        let state = self.state.lock().unwrap();
        state
            .voices
            .get(&voice)
            .map(RodioVoice::processed)
            .ok_or(BackendError::InvalidName)
    }

    fn queued_count(&self, voice: VoiceId) -> BackendResult<usize> {
        let state = self.state.lock().unwrap();
        state
            .voices
            .get(&voice)
            .map(|voice| voice.chunks.len())
            .ok_or(BackendError::InvalidName)
    }

    fn offset_seconds(&self, voice: VoiceId) -> BackendResult<f32> {
        let state = self.state.lock().unwrap();
        let voice = state.voices.get(&voice).ok_or(BackendError::InvalidName)?;
        // Fully played chunks plus the position within the current one.
        let processed = voice.processed();
        let played: f32 = voice
            .chunks
            .iter()
            .take(processed)
            .map(|(_, seconds)| seconds)
            .sum();
        let current = voice
            .chunks
            .get(processed)
            .map(|(_, seconds)| *seconds)
            .unwrap_or(0.0);
        let within = (voice.sink.get_pos().as_secs_f32()).min(current);
        Ok(played + within)
    }

    fn register_dependent(&self, flag: &Arc<AtomicBool>) {
        self.registry.register(flag);
    }
}
