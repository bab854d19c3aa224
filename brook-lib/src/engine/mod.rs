//! The streaming engine: keeps a voice continuously fed from a producer.
//!
//! The engine owns a fixed pool of backend buffers. Each update cycle
//! reclaims the buffers the backend has finished with, refills them from
//! the producer, and queues them again ahead of consumption. A producer
//! with no data parks buffers aside rather than failing, and a voice the
//! backend halted for lack of data is restarted as soon as data returns.

use std::collections::VecDeque;
use std::sync::Arc;

use log::{info, warn};

use crate::backend::{AudioBackend, AudioFormat, BufferId, VoiceState};
use crate::buffer::StreamBuffer;
use crate::error::{Error, Result};
use crate::producer::SampleProducer;
use crate::settings::PlayerSettings;
use crate::voice::Voice;

/// Streams producer output through a fixed buffer pool into a voice.
pub struct StreamingEngine<B: AudioBackend> {
    backend: Arc<B>,
    voice: Voice<B>,
    producer: Box<dyn SampleProducer>,
    settings: PlayerSettings,
    format: AudioFormat,
    /// Every pool buffer id, kept for release at dispose.
    pool: Vec<BufferId>,
    /// Buffers parked after a drought, waiting for the producer to recover.
    parked: VecDeque<StreamBuffer>,
    /// Refill staging region, one buffer wide.
    scratch: Vec<u8>,
    playing: bool,
    disposed: bool,
}

impl<B: AudioBackend> StreamingEngine<B> {
    /// Build the engine: allocate the pool, pre-fill every buffer, and
    /// queue all of them ahead of the first play.
    ///
    /// A producer drought during pre-fill is not an error; the unfilled
    /// tail of each buffer is zero-padded so the backend never receives
    /// partially defined audio.
    pub fn new(
        backend: Arc<B>,
        voice: Voice<B>,
        producer: Box<dyn SampleProducer>,
        settings: PlayerSettings,
    ) -> Result<Self> {
        settings.validate()?;
        let format = settings.format()?;
        voice.stop()?;

        let pool = backend.create_buffers(settings.buffer_count)?;
        let mut engine = Self {
            backend,
            voice,
            producer,
            settings,
            format,
            pool: pool.clone(),
            parked: VecDeque::new(),
            scratch: vec![0u8; settings.buffer_size],
            playing: false,
            disposed: false,
        };

        let mut prefilled = Vec::with_capacity(pool.len());
        for id in pool {
            let mut buffer = StreamBuffer::new(id, format, settings.frequency);
            engine.pull_scratch()?;
            engine.submit_scratch(&mut buffer)?;
            prefilled.push(buffer);
        }
        engine.voice.enqueue_range(prefilled)?;

        Ok(engine)
    }

    fn ensure_live(&self) -> Result<()> {
        if self.disposed {
            return Err(Error::Disposed("engine"));
        }
        Ok(())
    }

    /// Run one refill cycle. Call periodically while streaming.
    ///
    /// Processed buffers are reclaimed oldest first and re-queued as soon
    /// as they hold data. The first drought parks its buffer and ends the
    /// reclaim pass; once any refill succeeds, parked buffers are retried
    /// in order until the set drains or the producer runs dry again. A
    /// voice that the backend halted from starvation is restarted at most
    /// once per cycle, and only in a cycle that produced data.
    pub fn update(&mut self) -> Result<()> {
        self.ensure_live()?;

        let mut filled = 0usize;
        let mut processed = self.backend.processed_count(self.voice.id())?;
        while processed > 0 {
            processed -= 1;
            let mut buffer = self.voice.dequeue()?;
            match self.pull_scratch() {
                Ok(0) => {
                    // The backend drains past this point no matter what.
                    self.parked.push_back(buffer);
                    break;
                }
                Ok(_) => {
                    self.requeue(&mut buffer)?;
                    filled += 1;
                }
                Err(err) => {
                    self.parked.push_back(buffer);
                    return Err(err);
                }
            }
        }

        // Parked buffers may have data again once any refill succeeds, or
        // once the backend queue has fully drained and the parked set is the
        // only way playback can ever resume.
        if filled > 0 || (!self.parked.is_empty() && self.voice.is_empty()) {
            filled += self.drain_parked()?;

            if filled > 0 && self.playing {
                let state = self.backend.voice_state(self.voice.id())?;
                if state != VoiceState::Playing {
                    info!("voice starved by the backend, reissuing play");
                    self.voice.play()?;
                }
            }
        }

        Ok(())
    }

    /// Retry parked buffers in FIFO order, stopping on a renewed drought.
    fn drain_parked(&mut self) -> Result<usize> {
        let mut recovered = 0usize;
        while let Some(mut buffer) = self.parked.pop_front() {
            match self.pull_scratch() {
                Ok(0) => {
                    // Still dry; the buffer keeps its slot for next time.
                    self.parked.push_front(buffer);
                    break;
                }
                Ok(_) => {
                    self.requeue(&mut buffer)?;
                    recovered += 1;
                }
                Err(err) => {
                    self.parked.push_front(buffer);
                    return Err(err);
                }
            }
        }
        Ok(recovered)
    }

    /// Upload the scratch region into `buffer` and queue it again.
    ///
    /// On backend failure the buffer is parked: it is out of both queues
    /// already, and the parked path refills it before any later submission.
    fn requeue(&mut self, buffer: &mut StreamBuffer) -> Result<()> {
        if let Err(err) = self.submit_scratch(buffer) {
            self.parked.push_back(*buffer);
            return Err(err);
        }
        if let Err(err) = self.voice.enqueue(*buffer) {
            self.parked.push_back(*buffer);
            return Err(err);
        }
        Ok(())
    }

    /// Pull from the producer until the scratch region is full or the
    /// producer runs dry. Returns bytes produced; the tail is zeroed.
    fn pull_scratch(&mut self) -> Result<usize> {
        let mut total = 0usize;
        while total < self.scratch.len() {
            let read = self.producer.fill(&mut self.scratch[total..])?;
            if read == 0 {
                break;
            }
            total += read;
        }
        for byte in &mut self.scratch[total..] {
            *byte = 0;
        }
        Ok(total)
    }

    fn submit_scratch(&mut self, buffer: &mut StreamBuffer) -> Result<()> {
        self.backend
            .set_buffer_data(buffer.id(), self.format, self.settings.frequency, &self.scratch)?;
        buffer.set_size(self.scratch.len());
        Ok(())
    }

    /// Start or resume playback.
    pub fn play(&mut self) -> Result<()> {
        self.ensure_live()?;
        self.voice.play()?;
        self.playing = true;
        Ok(())
    }

    pub fn pause(&mut self) -> Result<()> {
        self.ensure_live()?;
        self.voice.pause()?;
        self.playing = false;
        Ok(())
    }

    pub fn stop(&mut self) -> Result<()> {
        self.ensure_live()?;
        self.voice.stop()?;
        self.playing = false;
        Ok(())
    }

    /// True while the engine intends to keep the voice audible.
    pub fn playing(&self) -> bool {
        self.playing
    }

    /// Seek the producer to an absolute byte position and restart the
    /// stream there.
    pub fn seek_bytes(&mut self, position: u64) -> Result<u64> {
        self.ensure_live()?;
        if !self.producer.can_seek() {
            return Err(Error::Unsupported("byte seeking"));
        }
        let taken = self.producer.seek_bytes(position)?;
        self.reposition()?;
        Ok(taken)
    }

    /// Seek the producer to an absolute play time and restart the stream
    /// there. Producers without native time seeking fall back to byte
    /// positioning computed from the stream format.
    pub fn seek_seconds(&mut self, seconds: f64) -> Result<()> {
        self.ensure_live()?;
        if self.producer.can_seek_time() {
            self.producer.seek_seconds(seconds.max(0.0))?;
        } else if self.producer.can_seek() {
            let bytes_per_second = (self.settings.frequency as usize * self.format.frame_size()) as f64;
            let position = (seconds.max(0.0) * bytes_per_second) as u64;
            // Keep the position frame-aligned.
            let frame = self.format.frame_size() as u64;
            self.producer.seek_bytes(position - position % frame)?;
        } else {
            return Err(Error::Unsupported("time seeking"));
        }
        self.reposition()
    }

    /// Seek the producer to the start of a track and restart the stream
    /// there.
    pub fn seek_track(&mut self, index: u32) -> Result<()> {
        self.ensure_live()?;
        if !self.producer.can_seek_track() {
            return Err(Error::Unsupported("track seeking"));
        }
        self.producer.seek_track(index)?;
        self.reposition()
    }

    /// Current producer byte position.
    pub fn position(&self) -> Result<u64> {
        self.ensure_live()?;
        if !self.producer.can_seek() {
            return Err(Error::Unsupported("byte positioning"));
        }
        Ok(self.producer.position()?)
    }

    /// Reclaim every buffer, refill from the producer's new position, and
    /// restart playback. No content produced before the seek survives.
    fn reposition(&mut self) -> Result<()> {
        self.voice.stop()?;
        let queued = self.voice.len();
        let mut reclaimed = self.voice.dequeue_range(queued)?;
        reclaimed.extend(self.parked.drain(..));

        let mut requeue = Vec::with_capacity(reclaimed.len());
        for mut buffer in reclaimed {
            match self.pull_scratch()? {
                0 => self.parked.push_back(buffer),
                _ => {
                    if let Err(err) = self.submit_scratch(&mut buffer) {
                        self.parked.push_back(buffer);
                        return Err(err);
                    }
                    requeue.push(buffer);
                }
            }
        }
        self.voice.enqueue_range(requeue)?;
        self.voice.play()?;
        self.playing = true;
        Ok(())
    }

    /// The voice this engine feeds.
    pub fn voice(&self) -> &Voice<B> {
        &self.voice
    }

    /// Settings the engine was built with.
    pub fn settings(&self) -> &PlayerSettings {
        &self.settings
    }

    /// Number of buffers currently parked after droughts.
    pub fn parked_count(&self) -> usize {
        self.parked.len()
    }

    /// Stop the voice, drop the queue, and release the buffer pool.
    pub fn dispose(&mut self) -> Result<()> {
        if self.disposed {
            return Ok(());
        }
        self.voice.clear()?;
        self.parked.clear();
        self.backend.release_buffers(&self.pool)?;
        self.pool.clear();
        self.disposed = true;
        Ok(())
    }
}

impl<B: AudioBackend> Drop for StreamingEngine<B> {
    fn drop(&mut self) {
        if !self.disposed {
            if let Err(err) = self.dispose() {
                warn!("engine dispose failed: {}", err);
            }
        }
    }
}
