use crossterm::event::{KeyEvent, MouseEvent};

use crate::media::error::MediaError;
use crate::media::notification::MediaNotification;
use crate::ui::spectrogram::Spectrogram;

#[derive(Debug, Clone)]
pub enum AppEvent {
    // From input thread
    Input(KeyEvent),
    Mouse(MouseEvent),
    Resize(u16, u16),

    // From player thread
    Media {
        generation: u64,
        notification: MediaNotification,
    },
    MediaError(MediaError),

    // From spectrogram builder
    SpectrogramReady { item: usize, image: Spectrogram },
    SpectrogramFailed { item: usize, error: MediaError },
}
