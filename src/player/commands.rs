use crate::media::source::MediaLocation;

#[derive(Debug, Clone, PartialEq)]
pub enum PlayerCommand {
    /// `generation` tags every notification published for this media.
    Load {
        location: MediaLocation,
        generation: u64,
    },
    Play,
    Pause,
    Stop,
    Seek(f64),
    SetVolume(f32),
}
