//! Source selection and the playback run loop.

use std::fs;
use std::sync::mpsc;
use std::sync::Arc;
use std::time::Duration;

use clap::ArgMatches;
use log::info;

use brook_lib::backend::rodio::RodioBackend;
use brook_lib::player::StreamPlayer;
use brook_lib::producer::{MemoryProducer, NoiseProducer, SampleProducer, SineProducer};
use brook_lib::PlayerSettings;

type RunResult<T> = Result<T, Box<dyn std::error::Error>>;

pub fn run(args: &ArgMatches) -> RunResult<i32> {
    let mut settings = match args.get_one::<String>("settings") {
        Some(path) => PlayerSettings::from_json(&fs::read_to_string(path)?)?,
        None => PlayerSettings::default(),
    };

    // A WAV input fixes the stream format; generated sources follow the
    // configured settings.
    let (producer, total_seconds) = if let Some(path) = args.get_one::<String>("INPUT") {
        let (producer, wav_settings, duration) = load_wav(path, settings)?;
        settings = wav_settings;
        (producer, Some(duration))
    } else if let Some(tone) = args.get_one::<String>("tone") {
        let tone_hz = tone.parse::<f32>()?;
        let producer: Box<dyn SampleProducer> = Box::new(SineProducer::new(
            settings.format()?,
            settings.frequency,
            tone_hz,
            0.4,
        ));
        (producer, None)
    } else if args.get_flag("noise") {
        let producer: Box<dyn SampleProducer> =
            Box::new(NoiseProducer::new(settings.format()?, 0.2));
        (producer, None)
    } else {
        return Err("no input given; pass a WAV path, --tone, or --noise".into());
    };

    let backend = Arc::new(RodioBackend::open_default().map_err(brook_lib::Error::Backend)?);
    let mut player = StreamPlayer::new(backend, producer, settings)?;

    let (finished_tx, finished_rx) = mpsc::channel();
    player.watch_stopped(move |_| {
        let _ = finished_tx.send(());
    })?;

    if let Some(seek) = args.get_one::<String>("seek") {
        let seconds = seek.parse::<f64>()?;
        info!("starting playback at {:.2} s", seconds);
        player.seek_seconds(seconds)?;
    } else {
        player.play()?;
    }

    match total_seconds {
        Some(duration) => {
            // Finite input: wait for the voice to drain on its own.
            let limit = Duration::from_secs_f64(duration + 5.0);
            if finished_rx.recv_timeout(limit).is_err() {
                info!("timed out waiting for playback to finish");
            }
        }
        None => {
            let seconds = args
                .get_one::<String>("seconds")
                .map(|value| value.parse::<f64>())
                .transpose()?
                .unwrap_or(5.0);
            info!("playing for {:.1} s", seconds);
            std::thread::sleep(Duration::from_secs_f64(seconds));
        }
    }

    player.stop()?;
    player.dispose()?;
    Ok(0)
}

/// Load a 16-bit integer WAV into memory and derive settings from it.
fn load_wav(
    path: &str,
    base: PlayerSettings,
) -> RunResult<(Box<dyn SampleProducer>, PlayerSettings, f64)> {
    let mut reader = hound::WavReader::open(path)?;
    let spec = reader.spec();

    if spec.sample_format != hound::SampleFormat::Int || spec.bits_per_sample != 16 {
        return Err("only 16-bit integer wav input is supported".into());
    }
    if spec.channels != 1 && spec.channels != 2 {
        return Err("only mono and stereo wav input is supported".into());
    }

    let mut bytes = Vec::with_capacity(reader.len() as usize * 2);
    for sample in reader.samples::<i16>() {
        bytes.extend_from_slice(&sample?.to_le_bytes());
    }

    let settings = PlayerSettings {
        bits_per_sample: 16,
        frequency: spec.sample_rate,
        channel_count: spec.channels,
        ..base
    };
    settings.validate()?;

    let frames = bytes.len() / settings.format()?.frame_size();
    let duration = frames as f64 / spec.sample_rate as f64;
    info!(
        "loaded {}: {} Hz, {} channel(s), {:.2} s",
        path, spec.sample_rate, spec.channels, duration
    );

    Ok((Box::new(MemoryProducer::new(bytes)), settings, duration))
}
