use std::sync::mpsc;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use tracing::warn;

use crate::media::notification::TimeRange;
use crate::player::commands::PlayerCommand;

/// A playable audio resource: observed through its live properties and
/// commanded through play/pause/seek/volume.
pub trait MediaElement {
    fn current_time(&self) -> f64;
    fn set_current_time(&mut self, seconds: f64);

    /// `NaN` until the media has been probed.
    fn duration(&self) -> f64;

    fn paused(&self) -> bool;
    fn play(&mut self);
    fn pause(&mut self);

    fn volume(&self) -> f64;
    fn set_volume(&mut self, volume: f64);

    fn buffered(&self) -> Vec<TimeRange>;

    /// Show or hide the plain progress bar drawn when no custom controls
    /// are attached.
    fn set_native_controls_visible(&mut self, visible: bool);
    fn native_controls_visible(&self) -> bool;
}

/// Live properties of the loaded media, written by both the engine thread
/// and the handle.
#[derive(Debug, Clone)]
pub struct MediaSnapshot {
    pub current_time: f64,
    pub duration: f64,
    pub paused: bool,
    pub ended: bool,
    pub volume: f64,
    pub buffered: Vec<TimeRange>,
}

impl Default for MediaSnapshot {
    fn default() -> Self {
        Self {
            current_time: 0.0,
            duration: f64::NAN,
            paused: true,
            ended: false,
            volume: 1.0,
            buffered: Vec::new(),
        }
    }
}

pub type SharedSnapshot = Arc<Mutex<MediaSnapshot>>;

pub fn lock_snapshot(snapshot: &SharedSnapshot) -> MutexGuard<'_, MediaSnapshot> {
    snapshot.lock().unwrap_or_else(PoisonError::into_inner)
}

/// [`MediaElement`] backed by the engine thread. Commands go over the
/// channel; the snapshot reflects them right away.
#[derive(Clone)]
pub struct PlayerHandle {
    tx: mpsc::Sender<PlayerCommand>,
    snapshot: SharedSnapshot,
    native_controls: bool,
}

impl PlayerHandle {
    pub fn new(tx: mpsc::Sender<PlayerCommand>, snapshot: SharedSnapshot) -> Self {
        Self {
            tx,
            snapshot,
            native_controls: true,
        }
    }

    pub fn send(&self, cmd: PlayerCommand) {
        if self.tx.send(cmd).is_err() {
            warn!("player thread is gone, command dropped");
        }
    }

    fn snapshot(&self) -> MutexGuard<'_, MediaSnapshot> {
        lock_snapshot(&self.snapshot)
    }
}

impl MediaElement for PlayerHandle {
    fn current_time(&self) -> f64 {
        self.snapshot().current_time
    }

    fn set_current_time(&mut self, seconds: f64) {
        let seconds = seconds.max(0.0);
        {
            let mut snap = self.snapshot();
            snap.current_time = seconds;
            snap.ended = false;
        }
        self.send(PlayerCommand::Seek(seconds));
    }

    fn duration(&self) -> f64 {
        self.snapshot().duration
    }

    fn paused(&self) -> bool {
        self.snapshot().paused
    }

    fn play(&mut self) {
        {
            let mut snap = self.snapshot();
            if snap.ended {
                snap.current_time = 0.0;
                snap.ended = false;
            }
            snap.paused = false;
        }
        self.send(PlayerCommand::Play);
    }

    fn pause(&mut self) {
        self.snapshot().paused = true;
        self.send(PlayerCommand::Pause);
    }

    fn volume(&self) -> f64 {
        self.snapshot().volume
    }

    fn set_volume(&mut self, volume: f64) {
        let volume = volume.clamp(0.0, 1.0);
        self.snapshot().volume = volume;
        self.send(PlayerCommand::SetVolume(volume as f32));
    }

    fn buffered(&self) -> Vec<TimeRange> {
        self.snapshot().buffered.clone()
    }

    fn set_native_controls_visible(&mut self, visible: bool) {
        self.native_controls = visible;
    }

    fn native_controls_visible(&self) -> bool {
        self.native_controls
    }
}
