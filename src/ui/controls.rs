use std::time::{Duration, Instant};

use crate::player::state::PlaybackState;

pub const FADE_DURATION: Duration = Duration::from_millis(500);

/// The volume slider moves in steps of 0.001.
const VOLUME_STEPS: f64 = 1000.0;

/// A buffered span as fractions of the total duration.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BufferedRange {
    pub start: f64,
    pub end: f64,
}

impl BufferedRange {
    pub fn new(start: f64, end: f64) -> Self {
        Self { start, end }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Glyph {
    Play,
    Pause,
}

impl Glyph {
    pub fn symbol(self) -> &'static str {
        match self {
            Glyph::Play => "▶",
            Glyph::Pause => "▮▮",
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct Playhead {
    pub fraction: f64,
    pub width: f64,
}

#[derive(Debug, Clone, Default)]
pub struct SeekBar {
    pub width: f64,
}

#[derive(Debug, Clone)]
pub struct PlayPauseButton {
    glyph: Glyph,
    restyles: u32,
}

impl PlayPauseButton {
    fn new() -> Self {
        Self {
            glyph: Glyph::Play,
            restyles: 0,
        }
    }

    pub fn glyph(&self) -> Glyph {
        self.glyph
    }

    /// How many times the button has been restyled since creation.
    pub fn restyles(&self) -> u32 {
        self.restyles
    }

    pub fn restyle(&mut self, state: PlaybackState) {
        self.glyph = match state {
            PlaybackState::Playing => Glyph::Pause,
            PlaybackState::Paused => Glyph::Play,
        };
        self.restyles += 1;
    }
}

#[derive(Debug, Clone)]
pub struct TimeLabel {
    pub text: String,
}

#[derive(Debug, Clone)]
pub struct VolumeSlider {
    value: f64,
}

impl VolumeSlider {
    pub const MIN: f64 = 0.0;
    pub const MAX: f64 = 1.0;

    fn new() -> Self {
        Self { value: Self::MAX }
    }

    pub fn value(&self) -> f64 {
        self.value
    }

    /// Clamp to the slider's range and snap to its step. Returns the value
    /// the slider settled on.
    pub fn set(&mut self, value: f64) -> f64 {
        let value = if value.is_finite() { value } else { Self::MAX };
        let clamped = value.clamp(Self::MIN, Self::MAX);
        self.value = (clamped * VOLUME_STEPS).round() / VOLUME_STEPS;
        self.value
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Fade {
    In(Instant),
    Shown,
    Out(Instant),
}

#[derive(Debug, Clone)]
pub struct Indicator {
    pub range: BufferedRange,
    pub left: f64,
    pub width: f64,
    pub fade: Fade,
}

impl Indicator {
    /// 0.0 (invisible) to 1.0 (fully shown).
    pub fn opacity(&self, now: Instant) -> f64 {
        let progress = |start: Instant| {
            (now.saturating_duration_since(start).as_secs_f64() / FADE_DURATION.as_secs_f64())
                .clamp(0.0, 1.0)
        };
        match self.fade {
            Fade::In(start) => progress(start),
            Fade::Shown => 1.0,
            Fade::Out(start) => 1.0 - progress(start),
        }
    }

    fn place(&mut self, range: BufferedRange, visual_width: f64) {
        self.range = range;
        self.left = range.start * visual_width;
        self.width = (range.end - range.start).max(0.0) * visual_width;
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Reconciliation {
    pub created: usize,
    pub removed: usize,
}

/// Buffered-range indicators. Live indicators track the current ranges;
/// retiring ones are fading out and are dropped once the fade completes.
#[derive(Debug, Clone, Default)]
pub struct BufferedIndicators {
    live: Vec<Indicator>,
    retiring: Vec<Indicator>,
}

impl BufferedIndicators {
    pub fn live(&self) -> &[Indicator] {
        &self.live
    }

    pub fn retiring(&self) -> &[Indicator] {
        &self.retiring
    }

    pub fn reconcile(
        &mut self,
        ranges: &[BufferedRange],
        visual_width: f64,
        now: Instant,
    ) -> Reconciliation {
        let mut outcome = Reconciliation::default();

        for (i, range) in ranges.iter().enumerate() {
            if i >= self.live.len() {
                self.live.push(Indicator {
                    range: *range,
                    left: 0.0,
                    width: 0.0,
                    fade: Fade::In(now),
                });
                outcome.created += 1;
            }
            self.live[i].place(*range, visual_width);
        }

        if self.live.len() > ranges.len() {
            for mut surplus in self.live.drain(ranges.len()..) {
                surplus.fade = Fade::Out(now);
                self.retiring.push(surplus);
                outcome.removed += 1;
            }
        }

        outcome
    }

    /// Finish fades that have run their course.
    pub fn tick(&mut self, now: Instant) {
        for indicator in &mut self.live {
            if let Fade::In(start) = indicator.fade {
                if now.saturating_duration_since(start) >= FADE_DURATION {
                    indicator.fade = Fade::Shown;
                }
            }
        }
        self.retiring.retain(|indicator| match indicator.fade {
            Fade::Out(start) => now.saturating_duration_since(start) < FADE_DURATION,
            _ => true,
        });
    }

    fn relayout(&mut self, visual_width: f64) {
        for indicator in self.live.iter_mut().chain(self.retiring.iter_mut()) {
            let range = indicator.range;
            indicator.place(range, visual_width);
        }
    }
}

/// Transport widgets drawn alongside the spectrogram.
#[derive(Debug, Clone)]
pub struct ControlWidgetSet {
    pub playhead: Playhead,
    pub seek_bar: SeekBar,
    pub play_pause: PlayPauseButton,
    pub time_label: TimeLabel,
    pub volume: VolumeSlider,
    pub buffered: BufferedIndicators,
}

impl ControlWidgetSet {
    pub fn new(visual_width: f64) -> Self {
        Self {
            playhead: Playhead::default(),
            seek_bar: SeekBar {
                width: visual_width,
            },
            play_pause: PlayPauseButton::new(),
            time_label: TimeLabel {
                text: "00:00".to_string(),
            },
            volume: VolumeSlider::new(),
            buffered: BufferedIndicators::default(),
        }
    }

    pub fn set_playhead(&mut self, fraction: f64) {
        let fraction = fraction.clamp(0.0, 1.0);
        self.playhead.fraction = fraction;
        self.playhead.width = fraction * self.seek_bar.width;
    }

    pub fn resize(&mut self, visual_width: f64) {
        self.seek_bar.width = visual_width;
        self.set_playhead(self.playhead.fraction);
        self.buffered.relayout(visual_width);
    }
}
