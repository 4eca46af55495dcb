use thiserror::Error;

#[derive(Debug, Clone, Error)]
pub enum MediaError {
    #[error("no media source to attach the player to")]
    MissingMediaSource,

    #[error("no visualization to attach the controls to")]
    MissingVisualization,

    #[error("unsupported media type: {0}")]
    UnsupportedMediaType(String),

    #[error("malformed duration: {0}")]
    MalformedDuration(f64),

    #[error("duration is not known yet")]
    DurationUnknown,

    #[error("failed to open {location}: {reason}")]
    Open { location: String, reason: String },

    #[error("decode error: {0}")]
    Decode(String),

    #[error("audio output error: {0}")]
    Output(String),

    #[error("download failed: {0}")]
    Download(String),

    #[error("spectrogram failed: {0}")]
    Spectrogram(String),
}
