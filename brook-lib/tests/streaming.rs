//! End-to-end streaming scenarios against the scripted mock backend.

use std::sync::mpsc;
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Duration;

use brook_lib::backend::{AudioBackend, AudioFormat, VoiceState};
use brook_lib::engine::StreamingEngine;
use brook_lib::error::Error;
use brook_lib::player::{PlayerState, StreamPlayer};
use brook_lib::producer::MemoryProducer;
use brook_lib::testing::{FillStep, MockBackend, ScriptedProbe, ScriptedProducer};
use brook_lib::voice::Voice;
use brook_lib::PlayerSettings;

fn mono8_settings(buffer_size: usize, buffer_count: usize) -> PlayerSettings {
    PlayerSettings {
        bits_per_sample: 8,
        frequency: 8_000,
        channel_count: 1,
        buffer_size,
        buffer_count,
        update_interval_ms: 1,
    }
}

fn scripted_engine(
    plan: Vec<FillStep>,
    fallback: FillStep,
    settings: PlayerSettings,
) -> (Arc<MockBackend>, StreamingEngine<MockBackend>, ScriptedProbe) {
    let backend = Arc::new(MockBackend::new());
    let producer = ScriptedProducer::with_plan(plan, fallback);
    let probe = producer.probe();
    let voice = Voice::new(backend.clone()).unwrap();
    let engine =
        StreamingEngine::new(backend.clone(), voice, Box::new(producer), settings).unwrap();
    (backend, engine, probe)
}

#[test]
fn construction_queues_every_buffer() {
    let settings = mono8_settings(8, 4);
    let (backend, engine, _) = scripted_engine(Vec::new(), FillStep::Full(0x10), settings);

    let voice = engine.voice();
    assert_eq!(voice.len(), 4);
    assert_eq!(voice.len(), backend.queued_count(voice.id()).unwrap());
    assert_eq!(voice.bytes_queued(), 32);
    assert_eq!(engine.parked_count(), 0);

    for id in voice.queued_ids() {
        assert_eq!(
            backend.buffer_format(id),
            Some((AudioFormat::Mono8, 8_000))
        );
    }
}

#[test]
fn construction_pads_drought_with_silence() {
    // The producer dries up after the first buffer; the rest are queued as
    // full blocks of silence rather than short or missing.
    let settings = mono8_settings(4, 2);
    let (backend, engine, _) =
        scripted_engine(vec![FillStep::Full(0x55)], FillStep::Dry, settings);

    let voice = engine.voice();
    assert_eq!(voice.len(), 2);
    let ids = voice.queued_ids();
    assert_eq!(backend.buffer_data(ids[0]), vec![0x55; 4]);
    assert_eq!(backend.buffer_data(ids[1]), vec![0x00; 4]);
}

#[test]
fn round_trip_requeues_every_processed_buffer() {
    let count = 4;
    let settings = mono8_settings(8, count);
    let (backend, mut engine, _) =
        scripted_engine(Vec::new(), FillStep::Full(0x22), settings);
    engine.play().unwrap();

    let voice_id = engine.voice().id();
    let original = backend.queued_ids(voice_id);

    for _ in 0..count {
        backend.advance(voice_id, 1);
        engine.update().unwrap();
    }

    // All buffers cycled through exactly once and nothing is parked.
    assert_eq!(engine.voice().len(), count);
    assert_eq!(engine.parked_count(), 0);
    assert_eq!(backend.queued_ids(voice_id), original);
}

#[test]
fn fifo_order_survives_ten_refill_cycles() {
    // Buffer size 4, two buffers, producer always returns 4 bytes of 0x7F.
    let settings = mono8_settings(4, 2);
    let (backend, mut engine, _) =
        scripted_engine(Vec::new(), FillStep::Full(0x7F), settings);
    engine.play().unwrap();

    let voice_id = engine.voice().id();
    let original = backend.queued_ids(voice_id);
    assert_eq!(original.len(), 2);

    for cycle in 0..10 {
        backend.advance(voice_id, 1);
        engine.update().unwrap();

        let expected = if cycle % 2 == 0 {
            vec![original[1], original[0]]
        } else {
            original.clone()
        };
        assert_eq!(backend.queued_ids(voice_id), expected);
        assert_eq!(engine.voice().queued_ids(), expected);
    }

    for id in original {
        assert_eq!(backend.buffer_data(id), vec![0x7F; 4]);
    }
}

#[test]
fn first_fill_drought_parks_then_requeues_in_order() {
    let settings = mono8_settings(4, 2);
    let plan = vec![FillStep::Full(1), FillStep::Full(2), FillStep::Dry];
    let (backend, mut engine, _) = scripted_engine(plan, FillStep::Full(3), settings);
    engine.play().unwrap();

    let voice_id = engine.voice().id();
    let ids = backend.queued_ids(voice_id);

    // First cycle: the oldest buffer droughts and is parked, unqueued.
    backend.advance(voice_id, 1);
    engine.update().unwrap();
    assert_eq!(engine.parked_count(), 1);
    assert_eq!(backend.queued_ids(voice_id), vec![ids[1]]);

    // Producer recovered: the next cycle refills the processed buffer and
    // then drains the parked one back into the FIFO.
    backend.advance(voice_id, 1);
    engine.update().unwrap();
    assert_eq!(engine.parked_count(), 0);
    assert_eq!(backend.queued_ids(voice_id), vec![ids[1], ids[0]]);
}

#[test]
fn starvation_recovery_reissues_play_exactly_once() {
    let settings = mono8_settings(4, 4);
    let plan = vec![
        FillStep::Full(9),
        FillStep::Full(9),
        FillStep::Full(9),
        FillStep::Full(9),
        FillStep::Dry,
        FillStep::Dry,
        FillStep::Dry,
    ];
    let (backend, mut engine, _) = scripted_engine(plan, FillStep::Full(5), settings);
    engine.play().unwrap();

    let voice_id = engine.voice().id();
    assert_eq!(backend.play_count(voice_id), 1);

    // Three starved cycles park three buffers; no recovery attempts yet.
    for _ in 0..3 {
        backend.advance(voice_id, 1);
        engine.update().unwrap();
    }
    assert_eq!(engine.parked_count(), 3);
    assert_eq!(backend.play_count(voice_id), 1);

    // The backend runs out of audio and auto-stops.
    backend.force_state(voice_id, VoiceState::Stopped);

    // Data returns: one cycle refills everything and issues exactly one
    // recovery play.
    engine.update().unwrap();
    assert_eq!(engine.parked_count(), 0);
    assert_eq!(engine.voice().len(), 4);
    assert_eq!(backend.play_count(voice_id), 2);

    // Further healthy cycles must not re-issue play.
    backend.advance(voice_id, 1);
    engine.update().unwrap();
    assert_eq!(backend.play_count(voice_id), 2);
}

#[test]
fn full_pool_starvation_recovers_when_data_returns() {
    // Every buffer ends up parked; the queue is empty so the backend will
    // never report another processed buffer. A later cycle must still drain
    // the parked set once the producer recovers.
    let settings = mono8_settings(4, 2);
    let plan = vec![
        FillStep::Full(1),
        FillStep::Full(2),
        FillStep::Dry,
        FillStep::Dry,
        FillStep::Dry,
    ];
    let (backend, mut engine, _) = scripted_engine(plan, FillStep::Full(8), settings);
    engine.play().unwrap();

    let voice_id = engine.voice().id();
    backend.advance(voice_id, 1);
    engine.update().unwrap();
    backend.advance(voice_id, 1);
    backend.force_state(voice_id, VoiceState::Stopped);
    engine.update().unwrap();
    assert_eq!(engine.parked_count(), 2);
    assert!(engine.voice().is_empty());

    engine.update().unwrap();
    assert_eq!(engine.parked_count(), 0);
    assert_eq!(engine.voice().len(), 2);
    assert_eq!(backend.play_count(voice_id), 2);
}

#[test]
fn seek_discards_all_pre_seek_content() {
    let settings = mono8_settings(4, 2);
    let backend = Arc::new(MockBackend::new());
    let data: Vec<u8> = (0..=255).collect();
    let producer = MemoryProducer::new(data);
    let voice = Voice::new(backend.clone()).unwrap();
    let mut engine =
        StreamingEngine::new(backend.clone(), voice, Box::new(producer), settings).unwrap();
    engine.play().unwrap();

    let voice_id = engine.voice().id();
    backend.advance(voice_id, 1);
    engine.update().unwrap();

    engine.seek_bytes(100).unwrap();

    let ids = backend.queued_ids(voice_id);
    assert_eq!(ids.len(), 2);
    assert_eq!(backend.buffer_data(ids[0]), vec![100, 101, 102, 103]);
    assert_eq!(backend.buffer_data(ids[1]), vec![104, 105, 106, 107]);
    for id in ids {
        assert!(backend.buffer_data(id).iter().all(|&byte| byte >= 100));
    }
    assert_eq!(backend.voice_state(voice_id).unwrap(), VoiceState::Playing);
    assert_eq!(engine.position().unwrap(), 108);
}

#[test]
fn seeking_an_unseekable_producer_is_unsupported() {
    let settings = mono8_settings(4, 2);
    let (_backend, mut engine, _) =
        scripted_engine(Vec::new(), FillStep::Full(1), settings);

    assert!(matches!(engine.seek_bytes(10), Err(Error::Unsupported(_))));
    assert!(matches!(engine.seek_seconds(1.0), Err(Error::Unsupported(_))));
    assert!(matches!(engine.seek_track(0), Err(Error::Unsupported(_))));
    assert!(matches!(engine.position(), Err(Error::Unsupported(_))));
}

#[test]
fn producer_failure_is_fatal_to_the_cycle_only() {
    let settings = mono8_settings(4, 2);
    let plan = vec![FillStep::Full(1), FillStep::Full(2), FillStep::Fail];
    let (backend, mut engine, _) = scripted_engine(plan, FillStep::Full(3), settings);
    engine.play().unwrap();

    let voice_id = engine.voice().id();
    backend.advance(voice_id, 1);
    assert!(matches!(engine.update(), Err(Error::Producer(_))));

    // The failing buffer was parked, not lost; the next cycle recovers it.
    assert_eq!(engine.parked_count(), 1);
    backend.advance(voice_id, 1);
    engine.update().unwrap();
    assert_eq!(engine.parked_count(), 0);
    assert_eq!(engine.voice().len(), 2);
}

#[test]
fn natural_stop_fires_exactly_one_notification() {
    let settings = mono8_settings(8, 2);
    let (backend, mut engine, _) =
        scripted_engine(Vec::new(), FillStep::Full(4), settings);
    engine.play().unwrap();

    let (tx, rx) = mpsc::channel();
    let notified = Arc::new(Mutex::new(0usize));
    let counter = notified.clone();
    engine.voice().watch_stopped(move |last| {
        *counter.lock().unwrap() += 1;
        let _ = tx.send(last);
    });

    // The voice runs out of queued audio and stops on its own.
    let voice_id = engine.voice().id();
    backend.force_state(voice_id, VoiceState::Stopped);

    let last = rx.recv_timeout(Duration::from_secs(2)).unwrap();
    assert_eq!(last, VoiceState::Playing);

    // A racing explicit stop after the fact is not a second transition.
    engine.stop().unwrap();
    thread::sleep(Duration::from_millis(100));
    assert_eq!(*notified.lock().unwrap(), 1);
}

#[test]
fn explicit_stop_beats_the_poll_without_duplicates() {
    let settings = mono8_settings(800, 2);
    let (_backend, mut engine, _) =
        scripted_engine(Vec::new(), FillStep::Full(4), settings);
    engine.play().unwrap();

    let notified = Arc::new(Mutex::new(Vec::new()));
    let sink = notified.clone();
    engine.voice().watch_stopped(move |last| sink.lock().unwrap().push(last));

    // 200 ms of queued audio: stop long before the scheduled wake.
    engine.stop().unwrap();
    thread::sleep(Duration::from_millis(300));

    let seen = notified.lock().unwrap();
    assert_eq!(seen.as_slice(), &[VoiceState::Playing]);
}

#[test]
fn pause_cancels_the_pending_wake() {
    let settings = mono8_settings(8, 2);
    let (backend, mut engine, _) =
        scripted_engine(Vec::new(), FillStep::Full(4), settings);
    engine.play().unwrap();

    let notified = Arc::new(Mutex::new(0usize));
    let counter = notified.clone();
    engine.voice().watch_stopped(move |_| *counter.lock().unwrap() += 1);

    engine.pause().unwrap();
    // Even if the backend later reads Stopped, the cancelled wake must not
    // report a completion for a paused session.
    backend.force_state(engine.voice().id(), VoiceState::Stopped);
    thread::sleep(Duration::from_millis(100));
    assert_eq!(*notified.lock().unwrap(), 0);
}

#[test]
fn spurious_wake_reschedules_until_the_voice_stops() {
    // 100 ms per buffer. The first wake finds the voice still playing and
    // must re-arm instead of reporting completion.
    let settings = mono8_settings(800, 2);
    let (backend, mut engine, _) =
        scripted_engine(Vec::new(), FillStep::Full(4), settings);
    engine.play().unwrap();

    let (tx, rx) = mpsc::channel();
    let notified = Arc::new(Mutex::new(0usize));
    let counter = notified.clone();
    engine.voice().watch_stopped(move |last| {
        *counter.lock().unwrap() += 1;
        let _ = tx.send(last);
    });

    let voice_id = engine.voice().id();
    thread::sleep(Duration::from_millis(250));
    assert_eq!(*notified.lock().unwrap(), 0);

    backend.force_state(voice_id, VoiceState::Stopped);
    let last = rx.recv_timeout(Duration::from_secs(2)).unwrap();
    assert_eq!(last, VoiceState::Playing);
    thread::sleep(Duration::from_millis(100));
    assert_eq!(*notified.lock().unwrap(), 1);
}

#[test]
fn backend_teardown_invalidates_engine_operations() {
    let settings = mono8_settings(4, 2);
    let (backend, mut engine, _) =
        scripted_engine(Vec::new(), FillStep::Full(1), settings);
    engine.play().unwrap();

    backend.close();
    assert!(matches!(engine.play(), Err(Error::Disposed(_))));

    backend.advance(engine.voice().id(), 1);
    assert!(matches!(engine.update(), Err(Error::Disposed(_))));
}

#[test]
fn player_drives_cycles_and_joins_its_worker() {
    let settings = mono8_settings(8, 4);
    let backend = Arc::new(MockBackend::new());
    let producer = ScriptedProducer::constant(0x33);
    let mut player = StreamPlayer::new(backend.clone(), Box::new(producer), settings).unwrap();
    assert_eq!(player.state(), PlayerState::Constructed);

    player.play().unwrap();
    assert!(player.is_playing());

    // Let the worker observe some processed buffers.
    let voice_id = player.with_engine(|engine| engine.voice().id());
    for _ in 0..4 {
        backend.advance(voice_id, 1);
        thread::sleep(Duration::from_millis(10));
    }
    assert!(player.worker_alive());

    player.pause().unwrap();
    assert_eq!(player.state(), PlayerState::Paused);
    player.play().unwrap();

    player.stop().unwrap();
    assert_eq!(player.state(), PlayerState::Stopped);
    assert!(!player.worker_alive());
    assert!(player.take_error().is_none());

    // Queue and backend still agree after the worker is gone.
    let (queued, mirrored) = player.with_engine(|engine| {
        let voice = engine.voice();
        (
            backend.queued_count(voice.id()).unwrap(),
            voice.len(),
        )
    });
    assert_eq!(queued, mirrored);

    player.dispose().unwrap();
    assert_eq!(player.state(), PlayerState::Disposed);
    assert!(matches!(player.play(), Err(Error::Disposed(_))));
}

#[test]
fn disposal_releases_the_buffer_pool() {
    let settings = mono8_settings(4, 3);
    let backend = Arc::new(MockBackend::new());
    let producer = ScriptedProducer::constant(0x01);
    let mut player = StreamPlayer::new(backend.clone(), Box::new(producer), settings).unwrap();

    let ids = player.with_engine(|engine| engine.voice().queued_ids());
    assert_eq!(ids.len(), 3);
    for &id in &ids {
        assert!(backend.has_buffer(id));
    }

    player.dispose().unwrap();
    for &id in &ids {
        assert!(!backend.has_buffer(id));
    }
}

#[test]
fn invalid_settings_fail_before_any_allocation() {
    let backend = Arc::new(MockBackend::new());
    let mut settings = mono8_settings(0, 2);
    let producer = ScriptedProducer::constant(0);
    assert!(matches!(
        StreamPlayer::new(backend.clone(), Box::new(producer), settings),
        Err(Error::Config(_))
    ));

    settings = mono8_settings(4, 0);
    let producer = ScriptedProducer::constant(0);
    assert!(matches!(
        StreamPlayer::new(backend, Box::new(producer), settings),
        Err(Error::Config(_))
    ));
}
