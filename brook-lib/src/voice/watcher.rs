//! Deferred completion detection for playing voices.
//!
//! Instead of polling the backend continuously, a single wait is scheduled
//! for the moment the queued audio should run out. On wake the backend state
//! is re-queried: a voice that stopped on its own is reported exactly once,
//! anything else reschedules the wait from a freshly computed estimate.

use std::sync::atomic::Ordering;
use std::sync::{Arc, Weak};
use std::thread;
use std::time::{Duration, Instant};

use log::warn;

use crate::backend::{AudioBackend, VoiceState};

use super::{StoppedCallback, VoiceShared};

/// Bookkeeping for the single outstanding completion wait of a voice.
///
/// The armed flag and generation counter are guarded by the same mutex the
/// transition handlers take, which closes the race between arming and
/// cancelling.
pub(super) struct WatchState {
    /// True while a wait is scheduled.
    pub(super) armed: bool,
    /// Bumped to cancel the outstanding wait.
    pub(super) generation: u64,
    /// Remaining play time estimated at the last (re)schedule, in seconds.
    pub(super) remaining: f32,
    /// True once the current playing session's stop has been reported.
    /// Cleared on play; checked and set by both notification paths so a
    /// poll wake racing an explicit stop reports exactly once.
    pub(super) stop_reported: bool,
    pub(super) listeners: Vec<(u64, StoppedCallback)>,
    pub(super) next_listener: u64,
}

impl WatchState {
    pub(super) fn new() -> Self {
        Self {
            armed: false,
            generation: 0,
            remaining: 0.0,
            stop_reported: false,
            listeners: Vec::new(),
            next_listener: 0,
        }
    }
}

/// Arm the watcher when a listener is interested, the voice is playing
/// without looping, and no wait is already outstanding.
pub(super) fn arm<B: AudioBackend>(shared: &Arc<VoiceShared<B>>) {
    let mut watch = shared.watch.lock().unwrap();
    if watch.armed || watch.listeners.is_empty() || shared.looping.load(Ordering::SeqCst) {
        return;
    }
    match shared.backend.voice_state(shared.id) {
        Ok(VoiceState::Playing) => {}
        Ok(_) => return,
        Err(err) => {
            warn!("completion watch not armed, state query failed: {}", err);
            return;
        }
    }

    watch.armed = true;
    watch.generation += 1;
    let generation = watch.generation;
    drop(watch);

    let weak = Arc::downgrade(shared);
    thread::spawn(move || run_completion_wait(weak, generation));
}

/// Body of the one-shot wait. Exits as soon as its generation is stale.
fn run_completion_wait<B: AudioBackend>(shared: Weak<VoiceShared<B>>, generation: u64) {
    loop {
        let Some(voice) = shared.upgrade() else {
            return;
        };

        // Recompute the estimate before every schedule; queued durations may
        // have changed since the last wake.
        let remaining = voice.remaining_seconds();
        let wait_ms = ((remaining as f64 * 1000.0).ceil() as u64).max(1);
        let deadline = Instant::now() + Duration::from_millis(wait_ms);

        let mut watch = voice.watch.lock().unwrap();
        if watch.generation != generation || !watch.armed {
            return;
        }
        watch.remaining = remaining;

        // Sleep until the deadline, tolerating spurious condvar wakes.
        loop {
            let now = Instant::now();
            if now >= deadline {
                break;
            }
            let (guard, _timeout) = voice
                .watch_wake
                .wait_timeout(watch, deadline - now)
                .unwrap();
            watch = guard;
            if watch.generation != generation || !watch.armed {
                return;
            }
        }

        // Deadline reached; the decision to fire happens inside the guard
        // section so a racing explicit stop cannot double-report.
        match voice.backend.voice_state(voice.id) {
            Ok(VoiceState::Stopped) => {
                watch.armed = false;
                if watch.stop_reported {
                    return;
                }
                watch.stop_reported = true;
                let callbacks: Vec<StoppedCallback> =
                    watch.listeners.iter().map(|(_, cb)| cb.clone()).collect();
                drop(watch);
                for callback in callbacks {
                    callback(VoiceState::Playing);
                }
                return;
            }
            Ok(_) => {
                // Still audible: the queue grew or the estimate ran short.
                drop(watch);
            }
            Err(err) => {
                warn!("completion watch state query failed: {}", err);
                watch.armed = false;
                return;
            }
        }
    }
}
