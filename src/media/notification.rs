/// A span of media time in seconds, as the media element reports it.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TimeRange {
    pub start: f64,
    pub end: f64,
}

impl TimeRange {
    pub fn new(start: f64, end: f64) -> Self {
        Self { start, end }
    }
}

/// Everything the media element tells its observers.
#[derive(Debug, Clone, PartialEq)]
pub enum MediaNotification {
    DurationKnown(f64),
    PositionChanged(f64),
    BufferingProgress(Vec<TimeRange>),
    PlaybackEnded,
}
