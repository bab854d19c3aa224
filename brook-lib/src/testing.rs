//! Scripted backend and producer for driving the engine without hardware.
//!
//! [`MockBackend`] models the queue discipline of a real voice backend with
//! explicit knobs: tests advance processed counts, force voice states, and
//! inject failures per operation. [`ScriptedProducer`] plays back a fixed
//! plan of fill results.

use std::collections::{HashMap, VecDeque};
use std::io;
use std::sync::atomic::AtomicBool;
use std::sync::{Arc, Mutex};

use crate::backend::{
    AudioBackend, AudioFormat, BackendResult, BufferId, DependentRegistry, VoiceId, VoiceState,
};
use crate::error::BackendError;
use crate::producer::SampleProducer;

#[derive(Debug, Default, Clone)]
struct MockBuffer {
    format: Option<AudioFormat>,
    frequency: u32,
    data: Vec<u8>,
}

#[derive(Debug, Default)]
struct MockVoice {
    queued: VecDeque<BufferId>,
    processed: usize,
    state: Option<VoiceState>,
    offset_seconds: f32,
    play_calls: usize,
    stop_calls: usize,
}

impl MockVoice {
    fn state(&self) -> VoiceState {
        self.state.unwrap_or(VoiceState::Initial)
    }
}

#[derive(Default)]
struct MockState {
    next_buffer: u32,
    next_voice: u32,
    buffers: HashMap<BufferId, MockBuffer>,
    voices: HashMap<VoiceId, MockVoice>,
    fail_next: HashMap<&'static str, BackendError>,
}

/// In-process backend with scripted behavior.
#[derive(Default)]
pub struct MockBackend {
    state: Mutex<MockState>,
    registry: DependentRegistry,
}

impl MockBackend {
    pub fn new() -> Self {
        Self::default()
    }

    /// Mark the `count` oldest queued buffers as consumed by playback.
    pub fn advance(&self, voice: VoiceId, count: usize) {
        let mut state = self.state.lock().unwrap();
        if let Some(voice) = state.voices.get_mut(&voice) {
            voice.processed = (voice.processed + count).min(voice.queued.len());
        }
    }

    /// Force the reported state of a voice, e.g. a starvation auto-stop.
    pub fn force_state(&self, voice: VoiceId, forced: VoiceState) {
        let mut state = self.state.lock().unwrap();
        if let Some(voice) = state.voices.get_mut(&voice) {
            voice.state = Some(forced);
            if forced == VoiceState::Stopped {
                voice.processed = voice.queued.len();
            }
        }
    }

    /// Set the reported playback offset of a voice, in seconds.
    pub fn set_offset(&self, voice: VoiceId, seconds: f32) {
        let mut state = self.state.lock().unwrap();
        if let Some(voice) = state.voices.get_mut(&voice) {
            voice.offset_seconds = seconds;
        }
    }

    /// Fail the next call of `op` (`"enqueue"`, `"dequeue"`, `"play"`,
    /// `"set_buffer_data"`, ...) with `err`.
    pub fn fail_next(&self, op: &'static str, err: BackendError) {
        self.state.lock().unwrap().fail_next.insert(op, err);
    }

    /// Queued buffer ids of a voice, oldest first.
    pub fn queued_ids(&self, voice: VoiceId) -> Vec<BufferId> {
        let state = self.state.lock().unwrap();
        state
            .voices
            .get(&voice)
            .map(|voice| voice.queued.iter().copied().collect())
            .unwrap_or_default()
    }

    /// Current content of a buffer.
    pub fn buffer_data(&self, id: BufferId) -> Vec<u8> {
        let state = self.state.lock().unwrap();
        state
            .buffers
            .get(&id)
            .map(|buffer| buffer.data.clone())
            .unwrap_or_default()
    }

    /// Format and frequency last written to a buffer.
    pub fn buffer_format(&self, id: BufferId) -> Option<(AudioFormat, u32)> {
        let state = self.state.lock().unwrap();
        let buffer = state.buffers.get(&id)?;
        buffer.format.map(|format| (format, buffer.frequency))
    }

    pub fn play_count(&self, voice: VoiceId) -> usize {
        self.state
            .lock()
            .unwrap()
            .voices
            .get(&voice)
            .map(|voice| voice.play_calls)
            .unwrap_or(0)
    }

    pub fn stop_count(&self, voice: VoiceId) -> usize {
        self.state
            .lock()
            .unwrap()
            .voices
            .get(&voice)
            .map(|voice| voice.stop_calls)
            .unwrap_or(0)
    }

    /// True while the voice handle is live.
    pub fn has_voice(&self, voice: VoiceId) -> bool {
        self.state.lock().unwrap().voices.contains_key(&voice)
    }

    /// True while the buffer handle is live.
    pub fn has_buffer(&self, id: BufferId) -> bool {
        self.state.lock().unwrap().buffers.contains_key(&id)
    }

    /// Tear down the backend, invalidating every registered dependent.
    pub fn close(&self) {
        self.registry.invalidate_all();
    }

    fn take_failure(state: &mut MockState, op: &'static str) -> BackendResult<()> {
        match state.fail_next.remove(op) {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }
}

impl AudioBackend for MockBackend {
    fn create_buffers(&self, count: usize) -> BackendResult<Vec<BufferId>> {
        let mut state = self.state.lock().unwrap();
        Self::take_failure(&mut state, "create_buffers")?;
        let mut ids = Vec::with_capacity(count);
        for _ in 0..count {
            let id = BufferId(state.next_buffer);
            state.next_buffer += 1;
            state.buffers.insert(id, MockBuffer::default());
            ids.push(id);
        }
        Ok(ids)
    }

    fn release_buffers(&self, ids: &[BufferId]) -> BackendResult<()> {
        let mut state = self.state.lock().unwrap();
        Self::take_failure(&mut state, "release_buffers")?;
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
        Self::take_failure(&mut state, "set_buffer_data")?;
        let buffer = state.buffers.get_mut(&id).ok_or(BackendError::InvalidName)?;
        buffer.format = Some(format);
        buffer.frequency = frequency;
        buffer.data = data.to_vec();
        Ok(())
    }

    fn create_voice(&self) -> BackendResult<VoiceId> {
        let mut state = self.state.lock().unwrap();
        Self::take_failure(&mut state, "create_voice")?;
        let id = VoiceId(state.next_voice);
        state.next_voice += 1;
        state.voices.insert(id, MockVoice::default());
        Ok(id)
    }

    fn release_voice(&self, voice: VoiceId) -> BackendResult<()> {
        let mut state = self.state.lock().unwrap();
        Self::take_failure(&mut state, "release_voice")?;
        state
            .voices
            .remove(&voice)
            .map(|_| ())
            .ok_or(BackendError::InvalidName)
    }

    fn enqueue(&self, voice: VoiceId, ids: &[BufferId]) -> BackendResult<()> {
        let mut state = self.state.lock().unwrap();
        Self::take_failure(&mut state, "enqueue")?;
        for id in ids {
            if !state.buffers.contains_key(id) {
                return Err(BackendError::InvalidName);
            }
        }
        let voice = state.voices.get_mut(&voice).ok_or(BackendError::InvalidName)?;
        voice.queued.extend(ids.iter().copied());
        Ok(())
    }

    fn dequeue(&self, voice: VoiceId, count: usize) -> BackendResult<Vec<BufferId>> {
        let mut state = self.state.lock().unwrap();
        Self::take_failure(&mut state, "dequeue")?;
        let voice = state.voices.get_mut(&voice).ok_or(BackendError::InvalidName)?;
        // Only processed buffers may leave the queue while the voice runs.
        let removable = match voice.state() {
            VoiceState::Playing | VoiceState::Paused => voice.processed,
            VoiceState::Stopped | VoiceState::Initial => voice.queued.len(),
        };
        if count > removable {
            return Err(BackendError::InvalidOperation);
        }
        let ids: Vec<BufferId> = voice.queued.drain(..count).collect();
        voice.processed = voice.processed.saturating_sub(count);
        Ok(ids)
    }

    fn play(&self, voice: VoiceId) -> BackendResult<()> {
        let mut state = self.state.lock().unwrap();
        Self::take_failure(&mut state, "play")?;
        let voice = state.voices.get_mut(&voice).ok_or(BackendError::InvalidName)?;
        voice.state = Some(VoiceState::Playing);
        voice.play_calls += 1;
        Ok(())
    }

    fn pause(&self, voice: VoiceId) -> BackendResult<()> {
        let mut state = self.state.lock().unwrap();
        Self::take_failure(&mut state, "pause")?;
        let voice = state.voices.get_mut(&voice).ok_or(BackendError::InvalidName)?;
        voice.state = Some(VoiceState::Paused);
        Ok(())
    }

    fn stop(&self, voice: VoiceId) -> BackendResult<()> {
        let mut state = self.state.lock().unwrap();
        Self::take_failure(&mut state, "stop")?;
        let voice = state.voices.get_mut(&voice).ok_or(BackendError::InvalidName)?;
        voice.state = Some(VoiceState::Stopped);
        voice.processed = voice.queued.len();
        voice.stop_calls += 1;
        Ok(())
    }

    fn rewind(&self, voice: VoiceId) -> BackendResult<()> {
        let mut state = self.state.lock().unwrap();
        Self::take_failure(&mut state, "rewind")?;
        let voice = state.voices.get_mut(&voice).ok_or(BackendError::InvalidName)?;
        voice.state = Some(VoiceState::Initial);
        voice.processed = voice.queued.len();
        voice.offset_seconds = 0.0;
        Ok(())
    }

    fn voice_state(&self, voice: VoiceId) -> BackendResult<VoiceState> {
        let state = self.state.lock().unwrap();
        state
            .voices
            .get(&voice)
            .map(MockVoice::state)
            .ok_or(BackendError::InvalidName)
    }

    fn processed_count(&self, voice: VoiceId) -> BackendResult<usize> {
        let state = self.state.lock().unwrap();
        state
            .voices
            .get(&voice)
            .map(|voice| voice.processed)
            .ok_or(BackendError::InvalidName)
    }

    fn queued_count(&self, voice: VoiceId) -> BackendResult<usize> {
        let state = self.state.lock().unwrap();
        state
            .voices
            .get(&voice)
            .map(|voice| voice.queued.len())
            .ok_or(BackendError::InvalidName)
    }

    fn offset_seconds(&self, voice: VoiceId) -> BackendResult<f32> {
        let state = self.state.lock().unwrap();
        state
            .voices
            .get(&voice)
            .map(|voice| voice.offset_seconds)
            .ok_or(BackendError::InvalidName)
    }

    fn register_dependent(&self, flag: &Arc<AtomicBool>) {
        self.registry.register(flag);
    }
}

/// One step of a [`ScriptedProducer`] plan.
#[derive(Debug, Clone)]
pub enum FillStep {
    /// Fill the whole request with this byte value.
    Full(u8),
    /// Supply exactly `len` bytes of `value` (capped at the request size).
    Partial { len: usize, value: u8 },
    /// Supply no bytes.
    Dry,
    /// Fail with an io error.
    Fail,
}

/// Producer that replays a fixed plan of fill results, then a fallback.
///
/// The plan and call counter sit behind shared handles so a test can keep a
/// [`probe`](Self::probe) after moving the producer into an engine.
pub struct ScriptedProducer {
    steps: Arc<Mutex<VecDeque<FillStep>>>,
    fallback: FillStep,
    calls: Arc<Mutex<usize>>,
}

/// Shared view of a [`ScriptedProducer`] plan.
#[derive(Clone)]
pub struct ScriptedProbe {
    steps: Arc<Mutex<VecDeque<FillStep>>>,
    calls: Arc<Mutex<usize>>,
}

impl ScriptedProbe {
    /// Number of fill calls observed so far.
    pub fn calls(&self) -> usize {
        *self.calls.lock().unwrap()
    }

    /// Append a step to the remaining plan.
    pub fn push(&self, step: FillStep) {
        self.steps.lock().unwrap().push_back(step);
    }
}

impl ScriptedProducer {
    /// Producer that always fills the whole request with `value`.
    pub fn constant(value: u8) -> Self {
        Self::with_plan(Vec::new(), FillStep::Full(value))
    }

    /// Producer that runs `steps` in order, then repeats `fallback`.
    pub fn with_plan(steps: Vec<FillStep>, fallback: FillStep) -> Self {
        Self {
            steps: Arc::new(Mutex::new(steps.into())),
            fallback,
            calls: Arc::new(Mutex::new(0)),
        }
    }

    /// Handle for inspecting and extending the plan after the producer has
    /// been handed to an engine.
    pub fn probe(&self) -> ScriptedProbe {
        ScriptedProbe {
            steps: self.steps.clone(),
            calls: self.calls.clone(),
        }
    }
}

impl SampleProducer for ScriptedProducer {
    fn fill(&mut self, dest: &mut [u8]) -> io::Result<usize> {
        *self.calls.lock().unwrap() += 1;
        let step = self
            .steps
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| self.fallback.clone());
        match step {
            FillStep::Full(value) => {
                dest.fill(value);
                Ok(dest.len())
            }
            FillStep::Partial { len, value } => {
                let count = len.min(dest.len());
                dest[..count].fill(value);
                Ok(count)
            }
            FillStep::Dry => Ok(0),
            FillStep::Fail => Err(io::Error::new(io::ErrorKind::Other, "scripted failure")),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mock_tracks_queue_and_processed_counts() {
        let backend = MockBackend::new();
        let voice = backend.create_voice().unwrap();
        let ids = backend.create_buffers(3).unwrap();

        backend.enqueue(voice, &ids).unwrap();
        backend.play(voice).unwrap();
        assert_eq!(backend.queued_count(voice).unwrap(), 3);
        assert_eq!(backend.processed_count(voice).unwrap(), 0);

        backend.advance(voice, 2);
        assert_eq!(backend.processed_count(voice).unwrap(), 2);

        let popped = backend.dequeue(voice, 2).unwrap();
        assert_eq!(popped, ids[..2]);
        assert_eq!(backend.processed_count(voice).unwrap(), 0);
        assert_eq!(backend.queued_count(voice).unwrap(), 1);
    }

    #[test]
    fn dequeueing_unprocessed_buffers_fails_while_playing() {
        let backend = MockBackend::new();
        let voice = backend.create_voice().unwrap();
        let ids = backend.create_buffers(2).unwrap();
        backend.enqueue(voice, &ids).unwrap();
        backend.play(voice).unwrap();

        assert_eq!(
            backend.dequeue(voice, 1),
            Err(BackendError::InvalidOperation)
        );

        // Stopping marks everything processed.
        backend.stop(voice).unwrap();
        assert_eq!(backend.dequeue(voice, 2).unwrap(), ids);
    }

    #[test]
    fn scripted_producer_follows_plan() {
        let mut producer = ScriptedProducer::with_plan(
            vec![FillStep::Full(7), FillStep::Dry],
            FillStep::Full(9),
        );
        let probe = producer.probe();
        let mut dest = [0u8; 4];

        assert_eq!(producer.fill(&mut dest).unwrap(), 4);
        assert_eq!(dest, [7, 7, 7, 7]);
        assert_eq!(producer.fill(&mut dest).unwrap(), 0);
        assert_eq!(producer.fill(&mut dest).unwrap(), 4);
        assert_eq!(dest, [9, 9, 9, 9]);
        assert_eq!(probe.calls(), 3);
    }
}
