//! View-model binding a [`MediaElement`] to the spectrogram seek region and
//! its transport controls.
//!
//! Media notifications enter through [`AudioPlayerController::dispatch`],
//! user gestures through [`AudioPlayerController::handle_control`]. Both run
//! on the UI thread and never block.

use std::time::Instant;

use tracing::{debug, trace};

use crate::media::element::MediaElement;
use crate::media::error::MediaError;
use crate::media::notification::{MediaNotification, TimeRange};
use crate::player::state::PlaybackState;
use crate::player::time::format_progress;
use crate::ui::controls::{BufferedRange, ControlWidgetSet, Reconciliation};

/// The image whose width defines the clickable seek region, in columns.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Visualization {
    pub width: f64,
}

impl Visualization {
    pub fn new(width: f64) -> Self {
        Self { width }
    }
}

/// User gestures on the controls.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ControlEvent {
    Attached,
    SeekClick { offset_x: f64 },
    PlayPauseClick,
    VolumeChange(f64),
}

pub struct AudioPlayerController<M: MediaElement> {
    media: M,
    state: PlaybackState,
    visual: Option<Visualization>,
    controls: Option<ControlWidgetSet>,
}

impl<M: MediaElement> AudioPlayerController<M> {
    /// Take over `media`, hiding its native controls. Fails when there is
    /// nothing to play.
    pub fn init(media: Option<M>) -> Result<Self, MediaError> {
        let mut media = media.ok_or(MediaError::MissingMediaSource)?;
        media.set_native_controls_visible(false);
        debug!("audio player initialized");

        Ok(Self {
            media,
            state: PlaybackState::Paused,
            visual: None,
            controls: None,
        })
    }

    /// Build the transport next to `image` and let dependent widgets sync to
    /// the media.
    pub fn attach_to_image(&mut self, image: Option<Visualization>) -> Result<(), MediaError> {
        let visual = image.ok_or(MediaError::MissingVisualization)?;

        let mut controls = ControlWidgetSet::new(visual.width);
        if self.state != PlaybackState::Paused {
            controls.play_pause.restyle(self.state);
        }

        self.visual = Some(visual);
        self.controls = Some(controls);
        debug!(width = visual.width, "controls attached");

        self.handle_control(ControlEvent::Attached)
    }

    pub fn resize_visualization(&mut self, width: f64) {
        let Some(ref mut visual) = self.visual else {
            return;
        };
        if visual.width == width {
            return;
        }
        visual.width = width;
        if let Some(ref mut controls) = self.controls {
            controls.resize(width);
        }
    }

    pub fn dispatch(&mut self, notification: MediaNotification) -> Result<(), MediaError> {
        trace!(?notification, "media notification");
        match notification {
            MediaNotification::DurationKnown(duration) => self.on_duration_known(duration),
            MediaNotification::PositionChanged(position) => self.on_position_changed(position),
            MediaNotification::BufferingProgress(ranges) => {
                self.on_buffering_progress(&ranges, Instant::now())
                    .map(|_| ())
            }
            MediaNotification::PlaybackEnded => {
                self.set_state(PlaybackState::Paused);
                Ok(())
            }
        }
    }

    pub fn handle_control(&mut self, event: ControlEvent) -> Result<(), MediaError> {
        match event {
            ControlEvent::Attached => {
                self.on_controls_attached();
                Ok(())
            }
            ControlEvent::SeekClick { offset_x } => self.on_seek(offset_x).map(|_| ()),
            ControlEvent::PlayPauseClick => {
                self.play_pause();
                Ok(())
            }
            ControlEvent::VolumeChange(value) => {
                self.on_volume_change(value);
                Ok(())
            }
        }
    }

    /// Advance indicator fades.
    pub fn tick(&mut self, now: Instant) {
        if let Some(ref mut controls) = self.controls {
            controls.buffered.tick(now);
        }
    }

    /// Nudge the position by `delta` seconds without touching the state.
    pub fn seek_by(&mut self, delta: f64) -> Result<(), MediaError> {
        let duration = self.known_duration()?.ok_or(MediaError::DurationUnknown)?;
        let target = (self.media.current_time() + delta).clamp(0.0, duration);
        self.media.set_current_time(target);
        self.on_position_changed(target)
    }

    pub fn state(&self) -> PlaybackState {
        self.state
    }

    pub fn controls(&self) -> Option<&ControlWidgetSet> {
        self.controls.as_ref()
    }

    pub fn visualization(&self) -> Option<Visualization> {
        self.visual
    }

    pub fn media(&self) -> &M {
        &self.media
    }

    pub fn media_mut(&mut self) -> &mut M {
        &mut self.media
    }

    /// Idempotent transition; restyles the play/pause control only when the
    /// state actually changes. Returns whether it did.
    fn set_state(&mut self, state: PlaybackState) -> bool {
        if state == self.state {
            return false;
        }
        self.state = state;
        if let Some(ref mut controls) = self.controls {
            controls.play_pause.restyle(state);
            trace!(restyles = controls.play_pause.restyles(), "play/pause restyled");
        }
        debug!(?state, "playback state changed");
        true
    }

    /// Duration if the media knows it. NaN, infinite and zero mean "not
    /// yet"; negative is malformed.
    fn known_duration(&self) -> Result<Option<f64>, MediaError> {
        let duration = self.media.duration();
        if duration < 0.0 {
            return Err(MediaError::MalformedDuration(duration));
        }
        if duration.is_finite() && duration > 0.0 {
            Ok(Some(duration))
        } else {
            Ok(None)
        }
    }

    fn on_duration_known(&mut self, duration: f64) -> Result<(), MediaError> {
        if duration.is_nan() || duration < 0.0 {
            return Err(MediaError::MalformedDuration(duration));
        }
        self.on_position_changed(self.media.current_time())
    }

    fn on_position_changed(&mut self, position: f64) -> Result<(), MediaError> {
        let duration = self.known_duration()?;
        let Some(ref mut controls) = self.controls else {
            return Ok(());
        };

        let fraction = duration.map_or(0.0, |d| position / d);
        controls.set_playhead(fraction);
        controls.time_label.text = format_progress(position, duration);
        Ok(())
    }

    fn on_buffering_progress(
        &mut self,
        ranges: &[TimeRange],
        now: Instant,
    ) -> Result<Reconciliation, MediaError> {
        let duration = self.known_duration()?;
        let (Some(visual), Some(controls)) = (self.visual, self.controls.as_mut()) else {
            return Ok(Reconciliation::default());
        };
        let Some(duration) = duration else {
            return Ok(Reconciliation::default());
        };

        let fractions: Vec<BufferedRange> = ranges
            .iter()
            .map(|r| {
                BufferedRange::new(
                    (r.start / duration).clamp(0.0, 1.0),
                    (r.end / duration).clamp(0.0, 1.0),
                )
            })
            .collect();

        let outcome = controls.buffered.reconcile(&fractions, visual.width, now);
        if outcome != Reconciliation::default() {
            trace!(
                created = outcome.created,
                removed = outcome.removed,
                "buffered indicators reconciled"
            );
        }
        Ok(outcome)
    }

    /// Returns the position the media was sent to.
    fn on_seek(&mut self, offset_x: f64) -> Result<f64, MediaError> {
        let visual = self.visual.ok_or(MediaError::MissingVisualization)?;
        let duration = self.known_duration()?.ok_or(MediaError::DurationUnknown)?;
        if visual.width <= 0.0 {
            return Err(MediaError::MissingVisualization);
        }

        let fraction = (offset_x / visual.width).clamp(0.0, 1.0);
        let position = fraction * duration;
        debug!(fraction, position, "seek");

        self.media.set_current_time(position);
        self.media.play();
        self.set_state(PlaybackState::Playing);
        self.on_position_changed(position)?;
        Ok(position)
    }

    fn play_pause(&mut self) {
        if self.media.paused() {
            self.media.play();
            self.set_state(PlaybackState::Playing);
        } else {
            self.media.pause();
            self.set_state(PlaybackState::Paused);
        }
    }

    fn on_volume_change(&mut self, value: f64) {
        let Some(ref mut controls) = self.controls else {
            self.media.set_volume(value.clamp(0.0, 1.0));
            return;
        };
        let volume = controls.volume.set(value);
        self.media.set_volume(volume);
    }

    fn on_controls_attached(&mut self) {
        let volume = self.media.volume();
        if let Some(ref mut controls) = self.controls {
            controls.volume.set(volume);
        }
    }
}
