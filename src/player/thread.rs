use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::mpsc::{self, TryRecvError};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use cpal::Sample;
use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use reqwest::blocking::Client;
use symphonia::core::audio::{SampleBuffer, SignalSpec};
use symphonia::core::codecs::{CODEC_TYPE_NULL, Decoder, DecoderOptions};
use symphonia::core::errors::Error as SymphoniaError;
use symphonia::core::formats::{FormatOptions, FormatReader, SeekMode, SeekTo};
use symphonia::core::io::MediaSourceStream;
use symphonia::core::meta::MetadataOptions;
use symphonia::core::probe::Hint;
use symphonia::core::units::Time;
use tracing::{debug, info, warn};

use crate::events::types::AppEvent;
use crate::media::element::{MediaSnapshot, SharedSnapshot, lock_snapshot};
use crate::media::error::MediaError;
use crate::media::notification::{MediaNotification, TimeRange};
use crate::media::source::{Buffering, MediaLocation, open_location};
use crate::player::commands::PlayerCommand;

const POSITION_INTERVAL: Duration = Duration::from_millis(100);
const BUFFERED_INTERVAL: Duration = Duration::from_millis(250);
const IDLE_SLEEP: Duration = Duration::from_millis(50);

struct AudioOutput {
    ring_buffer: Arc<Mutex<VecDeque<f32>>>,
    spec: SignalSpec,
    _stream: cpal::Stream,
    paused: Arc<AtomicBool>,
    volume: Arc<AtomicU32>,
}

fn lock_ring(ring: &Mutex<VecDeque<f32>>) -> MutexGuard<'_, VecDeque<f32>> {
    ring.lock().unwrap_or_else(PoisonError::into_inner)
}

impl AudioOutput {
    fn new(spec: SignalSpec, volume: f32) -> Result<Self, MediaError> {
        let host = cpal::default_host();
        let device = host
            .default_output_device()
            .ok_or_else(|| MediaError::Output("no output device available".to_string()))?;

        let config = cpal::StreamConfig {
            channels: spec.channels.count() as u16,
            sample_rate: cpal::SampleRate(spec.rate),
            buffer_size: cpal::BufferSize::Default,
        };

        let buffer_capacity = spec.rate as usize * spec.channels.count() * 5;
        let ring_buffer = Arc::new(Mutex::new(VecDeque::with_capacity(buffer_capacity)));
        let ring_buffer_clone = ring_buffer.clone();
        let paused = Arc::new(AtomicBool::new(true));
        let paused_clone = paused.clone();
        let volume = Arc::new(AtomicU32::new(volume.to_bits()));
        let volume_clone = volume.clone();

        let stream = device
            .build_output_stream(
                &config,
                move |data: &mut [f32], _: &cpal::OutputCallbackInfo| {
                    let mut buffer = lock_ring(&ring_buffer_clone);
                    let gain = f32::from_bits(volume_clone.load(Ordering::Relaxed));
                    for sample in data.iter_mut() {
                        if paused_clone.load(Ordering::Relaxed) {
                            *sample = Sample::EQUILIBRIUM;
                        } else {
                            *sample = buffer.pop_front().unwrap_or(Sample::EQUILIBRIUM) * gain;
                        }
                    }
                },
                |err| warn!(error = %err, "audio stream error"),
                None,
            )
            .map_err(|e| MediaError::Output(e.to_string()))?;

        stream
            .play()
            .map_err(|e| MediaError::Output(e.to_string()))?;

        Ok(AudioOutput {
            ring_buffer,
            spec,
            _stream: stream,
            paused,
            volume,
        })
    }

    fn write_samples(&self, samples: &[f32]) {
        lock_ring(&self.ring_buffer).extend(samples.iter().copied());
    }

    fn buffer_len(&self) -> usize {
        lock_ring(&self.ring_buffer).len()
    }

    fn set_paused(&self, paused: bool) {
        self.paused.store(paused, Ordering::Relaxed);
    }

    fn set_volume(&self, volume: f32) {
        self.volume.store(volume.to_bits(), Ordering::Relaxed);
    }

    fn clear_buffer(&self) {
        lock_ring(&self.ring_buffer).clear();
    }
}

struct PlaybackContext {
    format: Box<dyn FormatReader>,
    decoder: Box<dyn Decoder>,
    track_id: u32,
    audio_output: AudioOutput,
    sample_buf: SampleBuffer<f32>,
    total_frames_decoded: u64,
    duration: f64,
    buffering: Buffering,
    last_buffered: Vec<TimeRange>,
    draining: bool,
    ended: bool,
}

impl PlaybackContext {
    /// Position of what is audible, not of what has been decoded.
    fn position(&self) -> f64 {
        let channels = self.audio_output.spec.channels.count().max(1) as u64;
        let queued = self.audio_output.buffer_len() as u64 / channels;
        self.total_frames_decoded.saturating_sub(queued) as f64
            / self.audio_output.spec.rate as f64
    }

    fn seek(&mut self, position: f64) -> Result<(), MediaError> {
        self.audio_output.clear_buffer();

        let seek_to = SeekTo::Time {
            time: Time::from(position),
            track_id: Some(self.track_id),
        };
        self.format
            .seek(SeekMode::Accurate, seek_to)
            .map_err(|e| MediaError::Decode(format!("seek failed: {}", e)))?;

        self.decoder.reset();
        self.total_frames_decoded = (position * self.audio_output.spec.rate as f64) as u64;
        self.draining = false;
        self.ended = false;
        Ok(())
    }
}

struct Engine {
    snapshot: SharedSnapshot,
    event_tx: mpsc::Sender<AppEvent>,
    client: Client,
    ctx: Option<PlaybackContext>,
    generation: u64,
    last_position_update: Instant,
    last_buffered_check: Instant,
}

impl Engine {
    fn notify(&self, notification: MediaNotification) {
        let _ = self.event_tx.send(AppEvent::Media {
            generation: self.generation,
            notification,
        });
    }

    fn report(&self, err: MediaError) {
        warn!(error = %err, "media error");
        let _ = self.event_tx.send(AppEvent::MediaError(err));
    }

    fn handle(&mut self, cmd: PlayerCommand) {
        match cmd {
            PlayerCommand::Load {
                location,
                generation,
            } => {
                self.ctx = None;
                self.generation = generation;
                let volume = {
                    let mut snap = lock_snapshot(&self.snapshot);
                    let volume = snap.volume;
                    *snap = MediaSnapshot {
                        volume,
                        ..Default::default()
                    };
                    volume as f32
                };

                info!(%location, generation, "loading media");
                match load_audio(&self.client, &location, volume) {
                    Ok(ctx) => {
                        let duration = ctx.duration;
                        self.ctx = Some(ctx);
                        lock_snapshot(&self.snapshot).duration = duration;
                        if duration.is_finite() {
                            self.notify(MediaNotification::DurationKnown(duration));
                        }
                        self.notify(MediaNotification::PositionChanged(0.0));
                        self.publish_buffered(true);
                    }
                    Err(e) => self.report(e),
                }
            }

            PlayerCommand::Play => {
                let restart = self.ctx.as_ref().is_some_and(|c| c.ended);
                if restart {
                    self.seek(0.0);
                }
                if let Some(ref c) = self.ctx {
                    c.audio_output.set_paused(false);
                    let mut snap = lock_snapshot(&self.snapshot);
                    snap.paused = false;
                    snap.ended = false;
                }
            }

            PlayerCommand::Pause => {
                if let Some(ref c) = self.ctx {
                    c.audio_output.set_paused(true);
                    lock_snapshot(&self.snapshot).paused = true;
                }
            }

            PlayerCommand::Stop => {
                if let Some(ref c) = self.ctx {
                    c.audio_output.clear_buffer();
                }
                self.ctx = None;
                let mut snap = lock_snapshot(&self.snapshot);
                snap.paused = true;
                snap.current_time = 0.0;
            }

            PlayerCommand::Seek(position) => self.seek(position),

            PlayerCommand::SetVolume(volume) => {
                if let Some(ref c) = self.ctx {
                    c.audio_output.set_volume(volume);
                }
                lock_snapshot(&self.snapshot).volume = volume as f64;
            }
        }
    }

    fn seek(&mut self, position: f64) {
        let Some(ref mut c) = self.ctx else {
            return;
        };
        let position = if c.duration.is_finite() {
            position.clamp(0.0, c.duration)
        } else {
            position.max(0.0)
        };

        match c.seek(position) {
            Ok(()) => {
                lock_snapshot(&self.snapshot).current_time = position;
                self.notify(MediaNotification::PositionChanged(position));
            }
            Err(e) => self.report(e),
        }
    }

    fn publish_buffered(&mut self, force: bool) {
        if !force && self.last_buffered_check.elapsed() < BUFFERED_INTERVAL {
            return;
        }
        self.last_buffered_check = Instant::now();

        let Some(ref mut c) = self.ctx else {
            return;
        };
        let ranges = c.buffering.time_ranges(c.duration);
        if ranges == c.last_buffered {
            return;
        }
        c.last_buffered = ranges.clone();
        lock_snapshot(&self.snapshot).buffered = ranges.clone();
        self.notify(MediaNotification::BufferingProgress(ranges));
    }

    /// Decode one packet into the output. Returns false when there was
    /// nothing to do.
    fn pump(&mut self) -> bool {
        let paused = lock_snapshot(&self.snapshot).paused;
        let step = match self.ctx {
            Some(ref mut c) if !c.ended && !paused => decode_next(c),
            _ => Step::Idle,
        };

        match step {
            Step::Idle => false,
            Step::Busy => true,
            Step::Decoded => {
                if self.last_position_update.elapsed() >= POSITION_INTERVAL {
                    if let Some(position) = self.ctx.as_ref().map(PlaybackContext::position) {
                        lock_snapshot(&self.snapshot).current_time = position;
                        self.last_position_update = Instant::now();
                        self.notify(MediaNotification::PositionChanged(position));
                    }
                }
                true
            }
            Step::Failed(err) => {
                self.report(err);
                true
            }
            Step::Ended(duration) => {
                {
                    let mut snap = lock_snapshot(&self.snapshot);
                    snap.paused = true;
                    snap.ended = true;
                    if duration.is_finite() {
                        snap.current_time = duration;
                    }
                }
                debug!("playback ended");
                if duration.is_finite() {
                    self.notify(MediaNotification::PositionChanged(duration));
                }
                self.notify(MediaNotification::PlaybackEnded);
                true
            }
            Step::Lost(err) => {
                self.ctx = None;
                lock_snapshot(&self.snapshot).paused = true;
                self.report(err);
                self.notify(MediaNotification::PlaybackEnded);
                true
            }
        }
    }
}

enum Step {
    Idle,
    Busy,
    Decoded,
    Failed(MediaError),
    Ended(f64),
    Lost(MediaError),
}

fn decode_next(c: &mut PlaybackContext) -> Step {
    if c.draining {
        if c.audio_output.buffer_len() > 0 {
            return Step::Idle;
        }
        c.draining = false;
        c.ended = true;
        c.audio_output.set_paused(true);
        return Step::Ended(c.duration);
    }

    let max_buffer = c.audio_output.spec.rate as usize * c.audio_output.spec.channels.count() * 3;
    if c.audio_output.buffer_len() > max_buffer {
        std::thread::sleep(Duration::from_millis(10));
        return Step::Busy;
    }

    let packet = match c.format.next_packet() {
        Ok(packet) => packet,
        Err(SymphoniaError::IoError(e)) if e.kind() == std::io::ErrorKind::UnexpectedEof => {
            // Let the output play out what is queued before reporting the end.
            c.draining = true;
            return Step::Busy;
        }
        Err(e) => return Step::Lost(MediaError::Decode(format!("read error: {}", e))),
    };

    if packet.track_id() != c.track_id {
        return Step::Busy;
    }

    match c.decoder.decode(&packet) {
        Ok(decoded) => {
            let spec = *decoded.spec();
            if decoded.capacity() * spec.channels.count() > c.sample_buf.capacity() {
                c.sample_buf = SampleBuffer::new(decoded.capacity() as u64, spec);
            }
            c.sample_buf.copy_interleaved_ref(decoded);
            c.total_frames_decoded +=
                c.sample_buf.len() as u64 / c.audio_output.spec.channels.count() as u64;
            c.audio_output.write_samples(c.sample_buf.samples());
            Step::Decoded
        }
        Err(SymphoniaError::DecodeError(e)) => {
            debug!(error = %e, "skipping undecodable packet");
            Step::Busy
        }
        Err(e) => Step::Failed(MediaError::Decode(e.to_string())),
    }
}

pub fn spawn(
    cmd_rx: mpsc::Receiver<PlayerCommand>,
    event_tx: mpsc::Sender<AppEvent>,
    snapshot: SharedSnapshot,
    client: Client,
) -> JoinHandle<()> {
    std::thread::spawn(move || {
        let mut engine = Engine {
            snapshot,
            event_tx,
            client,
            ctx: None,
            generation: 0,
            last_position_update: Instant::now(),
            last_buffered_check: Instant::now(),
        };

        loop {
            match cmd_rx.try_recv() {
                Ok(cmd) => {
                    debug!(?cmd, "player command");
                    engine.handle(cmd);
                    continue;
                }
                Err(TryRecvError::Empty) => {}
                Err(TryRecvError::Disconnected) => break,
            }

            engine.publish_buffered(false);

            if !engine.pump() {
                std::thread::sleep(IDLE_SLEEP);
            }
        }
        debug!("player thread exiting");
    })
}

fn load_audio(
    client: &Client,
    location: &MediaLocation,
    volume: f32,
) -> Result<PlaybackContext, MediaError> {
    let codecs = symphonia::default::get_codecs();
    let probe = symphonia::default::get_probe();

    let (source, buffering) = open_location(client, location)?;
    let mss = MediaSourceStream::new(source, Default::default());

    let mut hint = Hint::new();
    if let Some(ext) = location.extension() {
        hint.with_extension(&ext);
    }

    let probed = probe
        .format(
            &hint,
            mss,
            &FormatOptions::default(),
            &MetadataOptions::default(),
        )
        .map_err(|e| MediaError::UnsupportedMediaType(e.to_string()))?;
    let mut format = probed.format;

    let track = format
        .tracks()
        .iter()
        .find(|t| t.codec_params.codec != CODEC_TYPE_NULL)
        .ok_or_else(|| MediaError::UnsupportedMediaType("no audio track found".to_string()))?;

    let track_id = track.id;
    let codec_params = track.codec_params.clone();

    let duration = codec_params
        .time_base
        .and_then(|tb| {
            codec_params.n_frames.map(|frames| {
                let time = tb.calc_time(frames);
                time.seconds as f64 + time.frac
            })
        })
        .unwrap_or(f64::NAN);

    let mut decoder = codecs
        .make(&codec_params, &DecoderOptions::default())
        .map_err(|e| MediaError::UnsupportedMediaType(e.to_string()))?;

    // The output stream needs the decoded spec, so prime the decoder with
    // the first good packet.
    let (spec, first_samples) = loop {
        let packet = format
            .next_packet()
            .map_err(|e| MediaError::Decode(e.to_string()))?;

        if packet.track_id() != track_id {
            continue;
        }

        match decoder.decode(&packet) {
            Ok(decoded) => {
                let spec = *decoded.spec();
                let mut sample_buf = SampleBuffer::new(decoded.capacity() as u64, spec);
                sample_buf.copy_interleaved_ref(decoded);
                break (spec, sample_buf);
            }
            Err(SymphoniaError::DecodeError(_)) => continue,
            Err(e) => return Err(MediaError::Decode(e.to_string())),
        }
    };

    let audio_output = AudioOutput::new(spec, volume)?;
    audio_output.write_samples(first_samples.samples());

    let initial_frames = first_samples.len() as u64 / spec.channels.count() as u64;
    let sample_buf = SampleBuffer::new(first_samples.capacity() as u64, spec);

    Ok(PlaybackContext {
        format,
        decoder,
        track_id,
        audio_output,
        sample_buf,
        total_frames_decoded: initial_frames,
        duration,
        buffering,
        last_buffered: Vec::new(),
        draining: false,
        ended: false,
    })
}
