//! Playback voices: queue bookkeeping, transport, and completion interest.
//!
//! A [`Voice`] mirrors the backend's per-voice buffer FIFO under
//! single-writer/multi-reader discipline and runs the transition
//! notifications that arm and disarm the completion watcher.

mod queue;
mod watcher;

pub use queue::BufferQueue;

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Condvar, Mutex, RwLock};

use log::warn;

use crate::backend::{AudioBackend, BufferId, VoiceId, VoiceState};
use crate::buffer::StreamBuffer;
use crate::error::{Error, Result};

use watcher::WatchState;

/// Identifier returned by [`Voice::watch_stopped`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WatchId(u64);

type StoppedCallback = Arc<dyn Fn(VoiceState) + Send + Sync>;

/// Queue state guarded by one reader/writer lock.
///
/// The scratch id vector is reused for batched backend calls; it grows
/// lazily and shares the write-exclusive section with queue mutation.
struct VoiceInner {
    queue: BufferQueue,
    scratch: Vec<BufferId>,
}

pub(crate) struct VoiceShared<B: AudioBackend> {
    backend: Arc<B>,
    id: VoiceId,
    inner: RwLock<VoiceInner>,
    watch: Mutex<WatchState>,
    watch_wake: Condvar,
    looping: AtomicBool,
    valid: Arc<AtomicBool>,
}

/// A backend playback voice and the FIFO of buffers queued on it.
pub struct Voice<B: AudioBackend> {
    shared: Arc<VoiceShared<B>>,
}

impl<B: AudioBackend> Voice<B> {
    /// Create a voice on `backend`, registering it for teardown
    /// invalidation.
    pub fn new(backend: Arc<B>) -> Result<Self> {
        let id = backend.create_voice()?;
        let valid = Arc::new(AtomicBool::new(true));
        backend.register_dependent(&valid);

        Ok(Self {
            shared: Arc::new(VoiceShared {
                backend,
                id,
                inner: RwLock::new(VoiceInner {
                    queue: BufferQueue::new(),
                    scratch: Vec::new(),
                }),
                watch: Mutex::new(WatchState::new()),
                watch_wake: Condvar::new(),
                looping: AtomicBool::new(false),
                valid,
            }),
        })
    }

    pub fn id(&self) -> VoiceId {
        self.shared.id
    }

    fn ensure_valid(&self) -> Result<()> {
        if !self.shared.valid.load(Ordering::SeqCst) {
            return Err(Error::Disposed("voice"));
        }
        Ok(())
    }

    /// Queue one buffer for playback.
    pub fn enqueue(&self, buffer: StreamBuffer) -> Result<()> {
        self.ensure_valid()?;
        let mut inner = self.shared.inner.write().unwrap();
        // Backend first: memory records only what the backend accepted.
        self.shared.backend.enqueue(self.shared.id, &[buffer.id()])?;
        inner.queue.push(buffer);
        Ok(())
    }

    /// Queue a range of buffers for playback with one batched backend call.
    pub fn enqueue_range(&self, buffers: Vec<StreamBuffer>) -> Result<()> {
        self.ensure_valid()?;
        if buffers.is_empty() {
            return Ok(());
        }
        let mut guard = self.shared.inner.write().unwrap();
        let inner = &mut *guard;
        inner.scratch.clear();
        inner.scratch.extend(buffers.iter().map(StreamBuffer::id));
        self.shared.backend.enqueue(self.shared.id, &inner.scratch)?;
        for buffer in buffers {
            inner.queue.push(buffer);
        }
        Ok(())
    }

    /// Remove the oldest buffer from the queue.
    pub fn dequeue(&self) -> Result<StreamBuffer> {
        self.ensure_valid()?;
        let mut inner = self.shared.inner.write().unwrap();
        inner.queue.check_removal(1)?;
        self.shared.backend.dequeue(self.shared.id, 1)?;
        inner.queue.pop()
    }

    /// Remove the `count` oldest buffers from the queue, in queue order.
    pub fn dequeue_range(&self, count: usize) -> Result<Vec<StreamBuffer>> {
        self.ensure_valid()?;
        if count == 0 {
            return Ok(Vec::new());
        }
        let mut inner = self.shared.inner.write().unwrap();
        inner.queue.check_removal(count)?;
        self.shared.backend.dequeue(self.shared.id, count)?;
        inner.queue.pop_many(count)
    }

    pub fn len(&self) -> usize {
        self.shared.inner.read().unwrap().queue.len()
    }

    pub fn is_empty(&self) -> bool {
        self.shared.inner.read().unwrap().queue.is_empty()
    }

    /// Total bytes queued on the voice.
    pub fn bytes_queued(&self) -> usize {
        self.shared.inner.read().unwrap().queue.bytes_queued()
    }

    /// Total sample frames queued on the voice.
    pub fn samples_queued(&self) -> usize {
        self.shared.inner.read().unwrap().queue.samples_queued()
    }

    /// Total queued play time, in seconds.
    pub fn seconds_queued(&self) -> f32 {
        self.shared.inner.read().unwrap().queue.seconds_queued()
    }

    /// Queued buffer ids, oldest first.
    pub fn queued_ids(&self) -> Vec<BufferId> {
        self.shared.inner.read().unwrap().queue.ids().collect()
    }

    /// Start or restart playback.
    ///
    /// A restart cancels the outstanding completion wake before a fresh one
    /// is scheduled, so a stale deadline can never report completion.
    pub fn play(&self) -> Result<()> {
        self.ensure_valid()?;
        self.shared.backend.play(self.shared.id)?;
        {
            // A fresh playing session: drop any stale wake and allow the
            // next stop to be reported again.
            let mut watch = self.shared.watch.lock().unwrap();
            self.shared.cancel_watch(&mut watch);
            watch.stop_reported = false;
        }
        self.shared.watch_wake.notify_all();
        watcher::arm(&self.shared);
        Ok(())
    }

    pub fn pause(&self) -> Result<()> {
        self.ensure_valid()?;
        let last = self.shared.backend.voice_state(self.shared.id)?;
        self.shared.backend.pause(self.shared.id)?;
        self.shared.on_paused(last);
        Ok(())
    }

    pub fn stop(&self) -> Result<()> {
        self.ensure_valid()?;
        let last = self.shared.backend.voice_state(self.shared.id)?;
        self.shared.backend.stop(self.shared.id)?;
        self.shared.on_stopped(last);
        Ok(())
    }

    /// Return the voice to its initial state.
    pub fn rewind(&self) -> Result<()> {
        self.ensure_valid()?;
        let last = self.shared.backend.voice_state(self.shared.id)?;
        self.shared.backend.rewind(self.shared.id)?;
        self.shared.on_rewound(last);
        Ok(())
    }

    /// Current backend-reported state.
    pub fn state(&self) -> Result<VoiceState> {
        self.ensure_valid()?;
        Ok(self.shared.backend.voice_state(self.shared.id)?)
    }

    /// Mark the voice as looping. A looping voice never finishes on its
    /// own, so the completion watcher stays disarmed while this is set.
    pub fn set_looping(&self, looping: bool) {
        self.shared.looping.store(looping, Ordering::SeqCst);
    }

    pub fn is_looping(&self) -> bool {
        self.shared.looping.load(Ordering::SeqCst)
    }

    /// Register interest in the voice's next unassisted stop.
    ///
    /// The completion watcher is armed lazily: no timer exists until at
    /// least one listener is registered, and the wake is cancelled when the
    /// last listener leaves.
    pub fn watch_stopped(
        &self,
        callback: impl Fn(VoiceState) + Send + Sync + 'static,
    ) -> WatchId {
        let id = {
            let mut watch = self.shared.watch.lock().unwrap();
            let id = watch.next_listener;
            watch.next_listener += 1;
            watch.listeners.push((id, Arc::new(callback)));
            id
        };
        watcher::arm(&self.shared);
        WatchId(id)
    }

    /// Drop a stop listener, disarming the watcher when none remain.
    pub fn unwatch_stopped(&self, id: WatchId) {
        let mut watch = self.shared.watch.lock().unwrap();
        watch.listeners.retain(|(listener, _)| *listener != id.0);
        if watch.listeners.is_empty() {
            self.shared.cancel_watch(&mut watch);
            self.shared.watch_wake.notify_all();
        }
    }

    /// Stop playback and drop every queue entry.
    pub(crate) fn clear(&self) -> Result<()> {
        self.stop()?;
        let mut inner = self.shared.inner.write().unwrap();
        let count = inner.queue.len();
        if count > 0 {
            self.shared.backend.dequeue(self.shared.id, count)?;
            inner.queue.pop_many(count)?;
        }
        Ok(())
    }
}

impl<B: AudioBackend> Drop for Voice<B> {
    fn drop(&mut self) {
        self.shared.cancel_watch_now();
        if self.shared.valid.swap(false, Ordering::SeqCst) {
            if let Err(err) = self.shared.backend.release_voice(self.shared.id) {
                warn!("voice release failed: {}", err);
            }
        }
    }
}

impl<B: AudioBackend> VoiceShared<B> {
    /// Cancel any outstanding completion wake. Caller holds the watch lock.
    fn cancel_watch(&self, watch: &mut WatchState) {
        if watch.armed {
            watch.armed = false;
            watch.generation += 1;
        }
    }

    fn cancel_watch_now(&self) {
        let mut watch = self.watch.lock().unwrap();
        self.cancel_watch(&mut watch);
        drop(watch);
        self.watch_wake.notify_all();
    }

    /// Seconds of queued audio not yet played, recomputed from live state.
    fn remaining_seconds(&self) -> f32 {
        let queued = self.inner.read().unwrap().queue.seconds_queued();
        let offset = self.backend.offset_seconds(self.id).unwrap_or(0.0);
        (queued - offset).max(0.0)
    }

    fn snapshot_listeners(watch: &WatchState) -> Vec<StoppedCallback> {
        watch.listeners.iter().map(|(_, cb)| cb.clone()).collect()
    }

    fn on_paused(&self, last: VoiceState) {
        if last == VoiceState::Paused || last == VoiceState::Initial {
            return;
        }
        self.cancel_watch_now();
    }

    /// Run the stop transition: cancel the wake and notify listeners once.
    ///
    /// Firing is decided inside the guard section shared with the watcher
    /// poll, which is what keeps each Playing session to exactly one stop
    /// notification; the callbacks themselves run outside it so they may
    /// call back into the voice.
    fn on_stopped(&self, last: VoiceState) {
        if last == VoiceState::Stopped || last == VoiceState::Initial {
            return;
        }
        let mut watch = self.watch.lock().unwrap();
        self.cancel_watch(&mut watch);
        if watch.stop_reported {
            // The poll wake got here first; this session is already
            // reported.
            return;
        }
        watch.stop_reported = true;
        let callbacks = Self::snapshot_listeners(&watch);
        drop(watch);
        self.watch_wake.notify_all();
        for callback in callbacks {
            callback(last);
        }
    }

    fn on_rewound(&self, last: VoiceState) {
        if last == VoiceState::Initial {
            return;
        }
        if last == VoiceState::Playing {
            self.on_stopped(last);
        } else {
            self.cancel_watch_now();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::AudioFormat;
    use crate::error::BackendError;
    use crate::testing::MockBackend;

    fn filled(id: BufferId) -> StreamBuffer {
        let mut buffer = StreamBuffer::new(id, AudioFormat::Mono8, 1_000);
        buffer.set_size(100);
        buffer
    }

    fn voice_with_buffers(count: usize) -> (Arc<MockBackend>, Voice<MockBackend>, Vec<BufferId>) {
        let backend = Arc::new(MockBackend::new());
        let voice = Voice::new(backend.clone()).unwrap();
        let ids = backend.create_buffers(count).unwrap();
        (backend, voice, ids)
    }

    #[test]
    fn queue_mirrors_backend_count() {
        let (backend, voice, ids) = voice_with_buffers(4);

        for &id in &ids {
            voice.enqueue(filled(id)).unwrap();
            assert_eq!(voice.len(), backend.queued_count(voice.id()).unwrap());
        }

        backend.advance(voice.id(), 2);
        voice.dequeue_range(2).unwrap();
        assert_eq!(voice.len(), backend.queued_count(voice.id()).unwrap());

        backend.advance(voice.id(), 1);
        voice.dequeue().unwrap();
        assert_eq!(voice.len(), backend.queued_count(voice.id()).unwrap());
        assert_eq!(voice.len(), 1);
    }

    #[test]
    fn failed_enqueue_leaves_memory_untouched() {
        let (backend, voice, ids) = voice_with_buffers(1);

        backend.fail_next("enqueue", BackendError::InvalidOperation);
        let err = voice.enqueue(filled(ids[0])).unwrap_err();
        assert!(matches!(err, Error::Backend(BackendError::InvalidOperation)));
        assert_eq!(voice.len(), 0);
        assert_eq!(backend.queued_count(voice.id()).unwrap(), 0);
    }

    #[test]
    fn dequeue_past_queue_is_a_contract_violation() {
        let (backend, voice, ids) = voice_with_buffers(2);
        voice.enqueue(filled(ids[0])).unwrap();
        backend.advance(voice.id(), 1);

        let err = voice.dequeue_range(2).unwrap_err();
        assert!(matches!(err, Error::QueueUnderflow { requested: 2, queued: 1 }));
        // No backend call was issued; both sides still agree.
        assert_eq!(voice.len(), backend.queued_count(voice.id()).unwrap());
    }

    #[test]
    fn aggregates_track_buffer_content() {
        let (_backend, voice, ids) = voice_with_buffers(2);
        voice.enqueue(filled(ids[0])).unwrap();
        voice.enqueue(filled(ids[1])).unwrap();

        assert_eq!(voice.bytes_queued(), 200);
        assert_eq!(voice.samples_queued(), 200);
        assert!((voice.seconds_queued() - 0.2).abs() < 1e-6);
    }

    #[test]
    fn invalidated_voice_refuses_work() {
        let (backend, voice, ids) = voice_with_buffers(1);
        backend.close();

        assert!(matches!(voice.enqueue(filled(ids[0])), Err(Error::Disposed(_))));
        assert!(matches!(voice.play(), Err(Error::Disposed(_))));
        assert!(matches!(voice.state(), Err(Error::Disposed(_))));
    }

    #[test]
    fn explicit_stop_notifies_with_pre_stop_state() {
        let (_backend, voice, ids) = voice_with_buffers(1);
        voice.enqueue(filled(ids[0])).unwrap();

        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = seen.clone();
        voice.watch_stopped(move |last| sink.lock().unwrap().push(last));

        voice.play().unwrap();
        voice.stop().unwrap();
        // A second stop is not a transition and must not notify again.
        voice.stop().unwrap();

        let seen = seen.lock().unwrap();
        assert_eq!(seen.as_slice(), &[VoiceState::Playing]);
    }

    #[test]
    fn pause_is_not_a_stop() {
        let (_backend, voice, ids) = voice_with_buffers(1);
        voice.enqueue(filled(ids[0])).unwrap();

        let count = Arc::new(Mutex::new(0usize));
        let sink = count.clone();
        voice.watch_stopped(move |_| *sink.lock().unwrap() += 1);

        voice.play().unwrap();
        voice.pause().unwrap();
        assert_eq!(*count.lock().unwrap(), 0);

        voice.play().unwrap();
        voice.stop().unwrap();
        assert_eq!(*count.lock().unwrap(), 1);
    }

    #[test]
    fn rewind_from_playing_counts_as_stop() {
        let (_backend, voice, ids) = voice_with_buffers(1);
        voice.enqueue(filled(ids[0])).unwrap();

        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = seen.clone();
        voice.watch_stopped(move |last| sink.lock().unwrap().push(last));

        voice.play().unwrap();
        voice.rewind().unwrap();
        assert_eq!(seen.lock().unwrap().as_slice(), &[VoiceState::Playing]);
    }
}
