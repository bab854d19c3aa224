//! High-level streaming player: engine, voice, and update worker in one.

mod worker;

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;

use log::{error, info, warn};

use crate::backend::AudioBackend;
use crate::engine::StreamingEngine;
use crate::error::{Error, Result};
use crate::producer::SampleProducer;
use crate::settings::PlayerSettings;
use crate::voice::{Voice, WatchId};

use worker::{run_update_worker, WorkerContext};

/// Lifecycle state of a [`StreamPlayer`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlayerState {
    Constructed,
    Playing,
    Paused,
    Stopped,
    Disposed,
}

/// Owns a voice, a streaming engine, and the dedicated worker that drives
/// update cycles at a fixed interval.
///
/// The worker starts with the first [`play`](Self::play) and is joined by
/// [`stop`](Self::stop) after it completes its current cycle. Disposal
/// blocks until the worker has fully exited before backend buffers are
/// released, so an in-flight cycle can never touch freed buffers.
pub struct StreamPlayer<B: AudioBackend> {
    engine: Arc<Mutex<StreamingEngine<B>>>,
    settings: PlayerSettings,
    state: PlayerState,
    run: Arc<AtomicBool>,
    worker_alive: Arc<AtomicBool>,
    worker: Option<thread::JoinHandle<()>>,
    last_error: Arc<Mutex<Option<Error>>>,
}

impl<B: AudioBackend> StreamPlayer<B> {
    /// Build a player: voice, engine, and a fully pre-filled buffer pool.
    pub fn new(
        backend: Arc<B>,
        producer: Box<dyn SampleProducer>,
        settings: PlayerSettings,
    ) -> Result<Self> {
        settings.validate()?;
        let voice = Voice::new(backend.clone())?;
        let engine = StreamingEngine::new(backend, voice, producer, settings)?;

        Ok(Self {
            engine: Arc::new(Mutex::new(engine)),
            settings,
            state: PlayerState::Constructed,
            run: Arc::new(AtomicBool::new(false)),
            worker_alive: Arc::new(AtomicBool::new(false)),
            worker: None,
            last_error: Arc::new(Mutex::new(None)),
        })
    }

    fn ensure_live(&self) -> Result<()> {
        if self.state == PlayerState::Disposed {
            return Err(Error::Disposed("player"));
        }
        Ok(())
    }

    /// Start or resume playback, spawning the update worker on first use.
    pub fn play(&mut self) -> Result<()> {
        self.ensure_live()?;
        self.engine.lock().unwrap().play()?;
        self.ensure_worker();
        self.state = PlayerState::Playing;
        Ok(())
    }

    fn ensure_worker(&mut self) {
        if self.worker.is_some() {
            return;
        }
        info!(
            "starting stream worker at {} ms intervals",
            self.settings.update_interval_ms
        );
        self.run.store(true, Ordering::SeqCst);
        let context = WorkerContext {
            engine: self.engine.clone(),
            run: self.run.clone(),
            alive: self.worker_alive.clone(),
            last_error: self.last_error.clone(),
            interval: self.settings.update_interval(),
        };
        self.worker = Some(thread::spawn(move || run_update_worker(context)));
    }

    /// Pause playback; the worker keeps running so resume is immediate.
    pub fn pause(&mut self) -> Result<()> {
        self.ensure_live()?;
        self.engine.lock().unwrap().pause()?;
        self.state = PlayerState::Paused;
        Ok(())
    }

    /// Stop playback and join the worker after its current cycle.
    pub fn stop(&mut self) -> Result<()> {
        self.ensure_live()?;
        self.halt_worker();
        self.engine.lock().unwrap().stop()?;
        self.state = PlayerState::Stopped;
        Ok(())
    }

    fn halt_worker(&mut self) {
        self.run.store(false, Ordering::SeqCst);
        if let Some(handle) = self.worker.take() {
            if handle.join().is_err() {
                error!("stream worker panicked");
            }
        }
    }

    /// Seek to an absolute play time, in seconds. Playback restarts at the
    /// new position.
    pub fn seek_seconds(&mut self, seconds: f64) -> Result<()> {
        self.ensure_live()?;
        let result = self.engine.lock().unwrap().seek_seconds(seconds);
        if result.is_ok() {
            self.ensure_worker();
            self.state = PlayerState::Playing;
        }
        result
    }

    /// Seek to an absolute byte position in the producer. Playback restarts
    /// at the new position.
    pub fn seek_bytes(&mut self, position: u64) -> Result<u64> {
        self.ensure_live()?;
        let result = self.engine.lock().unwrap().seek_bytes(position);
        if result.is_ok() {
            self.ensure_worker();
            self.state = PlayerState::Playing;
        }
        result
    }

    /// Seek to the start of a track. Playback restarts at the new position.
    pub fn seek_track(&mut self, index: u32) -> Result<()> {
        self.ensure_live()?;
        let result = self.engine.lock().unwrap().seek_track(index);
        if result.is_ok() {
            self.ensure_worker();
            self.state = PlayerState::Playing;
        }
        result
    }

    /// Register interest in the voice's next unassisted stop.
    pub fn watch_stopped(
        &self,
        callback: impl Fn(crate::backend::VoiceState) + Send + Sync + 'static,
    ) -> Result<WatchId> {
        self.ensure_live()?;
        Ok(self.engine.lock().unwrap().voice().watch_stopped(callback))
    }

    /// Drop a previously registered stop listener.
    pub fn unwatch_stopped(&self, id: WatchId) {
        self.engine.lock().unwrap().voice().unwatch_stopped(id);
    }

    pub fn state(&self) -> PlayerState {
        self.state
    }

    pub fn is_playing(&self) -> bool {
        self.state == PlayerState::Playing
    }

    /// True while the update worker thread is alive.
    pub fn worker_alive(&self) -> bool {
        self.worker_alive.load(Ordering::SeqCst)
    }

    /// Take the most recent per-cycle error, if any.
    pub fn take_error(&self) -> Option<Error> {
        self.last_error.lock().unwrap().take()
    }

    pub fn settings(&self) -> &PlayerSettings {
        &self.settings
    }

    /// Run a closure against the engine while the worker is held off.
    pub fn with_engine<T>(&self, f: impl FnOnce(&mut StreamingEngine<B>) -> T) -> T {
        let mut engine = self.engine.lock().unwrap();
        f(&mut engine)
    }

    /// Stop the worker, release backend resources, and invalidate the
    /// player.
    pub fn dispose(&mut self) -> Result<()> {
        if self.state == PlayerState::Disposed {
            return Ok(());
        }
        // The worker must be gone before buffers are released.
        self.halt_worker();
        self.engine.lock().unwrap().dispose()?;
        self.state = PlayerState::Disposed;
        Ok(())
    }
}

impl<B: AudioBackend> Drop for StreamPlayer<B> {
    fn drop(&mut self) {
        if let Err(err) = self.dispose() {
            warn!("player dispose failed: {}", err);
        }
    }
}
