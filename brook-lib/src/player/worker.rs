//! Interval-driven update worker for `StreamPlayer`.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Duration;

use log::warn;

use crate::backend::AudioBackend;
use crate::engine::StreamingEngine;
use crate::error::Error;

/// Shared state captured at worker spawn time.
pub(super) struct WorkerContext<B: AudioBackend> {
    pub(super) engine: Arc<Mutex<StreamingEngine<B>>>,
    pub(super) run: Arc<AtomicBool>,
    pub(super) alive: Arc<AtomicBool>,
    pub(super) last_error: Arc<Mutex<Option<Error>>>,
    pub(super) interval: Duration,
}

/// Guard that keeps the worker-alive flag accurate on every exit path.
pub(super) struct WorkerGuard {
    alive: Arc<AtomicBool>,
}

impl WorkerGuard {
    pub(super) fn new(alive: Arc<AtomicBool>) -> Self {
        alive.store(true, Ordering::SeqCst);
        Self { alive }
    }
}

impl Drop for WorkerGuard {
    fn drop(&mut self) {
        self.alive.store(false, Ordering::SeqCst);
    }
}

/// Drive update cycles until the run flag clears.
///
/// The worker is the sole queue writer during steady playback. It sleeps
/// between cycles rather than spinning, and a failing cycle is fatal to
/// that cycle only: the error is logged, stashed for the owner, and the
/// next cycle runs on schedule.
pub(super) fn run_update_worker<B: AudioBackend>(ctx: WorkerContext<B>) {
    let _guard = WorkerGuard::new(ctx.alive.clone());

    while ctx.run.load(Ordering::SeqCst) {
        {
            let mut engine = ctx.engine.lock().unwrap();
            if let Err(err) = engine.update() {
                warn!("update cycle failed: {}", err);
                *ctx.last_error.lock().unwrap() = Some(err);
            }
        }
        thread::sleep(ctx.interval);
    }
}
