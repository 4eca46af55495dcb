use crossterm::event::{KeyCode, KeyEvent, MouseButton, MouseEvent, MouseEventKind};
use ratatui::layout::Rect;
use tracing::{debug, info, warn};

use crate::app::{decrement, increment};
use crate::media::element::{MediaElement, PlayerHandle};
use crate::media::error::MediaError;
use crate::media::notification::MediaNotification;
use crate::media::source::MediaLocation;
use crate::player::commands::PlayerCommand;
use crate::player::controller::{AudioPlayerController, ControlEvent, Visualization};
use crate::ui::notifications::NotificationManager;

const VOLUME_NUDGE: f64 = 0.05;

#[derive(Default, Clone)]
pub struct LayoutRegions {
    pub playlist: Option<Rect>,
    pub visualization: Option<Rect>,
    pub seek_row: Option<Rect>,
    pub play_pause: Option<Rect>,
    pub volume: Option<Rect>,
    pub native_bar: Option<Rect>,
}

/// Where the current item's spectrogram is at.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub enum VisualStatus {
    #[default]
    Rendering,
    Ready,
    Failed,
}

pub struct App {
    pub playlist: Vec<MediaLocation>,
    pub current_index: usize,

    pub player: Option<AudioPlayerController<PlayerHandle>>,
    handle: PlayerHandle,
    /// Bumped on every load; engine notifications from older loads are dropped.
    generation: u64,

    pub visual_status: VisualStatus,
    visual_width: u16,
    seek_step: f64,

    pub notifications: NotificationManager,

    pub should_quit: bool,
    pub layout_regions: LayoutRegions,
}

impl App {
    pub fn new(
        playlist: Vec<MediaLocation>,
        mut handle: PlayerHandle,
        initial_volume: f64,
        seek_step: f64,
    ) -> Self {
        handle.set_volume(initial_volume);

        Self {
            playlist,
            current_index: 0,

            player: None,
            handle,
            generation: 0,

            visual_status: VisualStatus::Rendering,
            visual_width: 0,
            seek_step,

            notifications: NotificationManager::new(),

            should_quit: false,
            layout_regions: LayoutRegions::default(),
        }
    }

    pub fn current_location(&self) -> Option<&MediaLocation> {
        self.playlist.get(self.current_index)
    }

    /// Hand the current item to the engine and take it over with a fresh
    /// controller. The controller stays detached until the item's
    /// spectrogram arrives.
    pub fn load_current(&mut self) {
        let Some(location) = self.current_location().cloned() else {
            return;
        };

        self.generation = self.generation.wrapping_add(1);
        self.handle.pause();
        self.handle.send(PlayerCommand::Load {
            location: location.clone(),
            generation: self.generation,
        });
        self.visual_status = VisualStatus::Rendering;

        match AudioPlayerController::init(Some(self.handle.clone())) {
            Ok(player) => self.player = Some(player),
            Err(e) => {
                self.player = None;
                self.report(&e);
            }
        }

        info!(item = self.current_index, %location, "item loaded");
        self.notifications
            .info(format!("Loading {}", location.display_name()));
    }

    fn report(&mut self, err: &MediaError) {
        warn!(error = %err, "player error");
        self.notifications.report(err);
    }

    fn with_player(
        &mut self,
        f: impl FnOnce(&mut AudioPlayerController<PlayerHandle>) -> Result<(), MediaError>,
    ) {
        let Some(ref mut player) = self.player else {
            return;
        };
        if let Err(e) = f(player) {
            self.report(&e);
        }
    }

    pub fn on_media(&mut self, generation: u64, notification: MediaNotification) {
        if generation != self.generation {
            debug!(generation, current = self.generation, "dropping stale notification");
            return;
        }
        self.with_player(|p| p.dispatch(notification));
    }

    pub fn on_media_error(&mut self, err: MediaError) {
        self.report(&err);
    }

    /// Attach the controls for `item` if it is still the current one.
    /// Returns whether the spectrogram should be shown.
    pub fn on_spectrogram_ready(&mut self, item: usize) -> bool {
        if item != self.current_index {
            return false;
        }
        self.visual_status = VisualStatus::Ready;

        let width = f64::from(self.visual_width.max(1));
        self.with_player(|p| {
            p.attach_to_image(Some(Visualization::new(width)))?;
            let position = p.media().current_time();
            let buffered = p.media().buffered();
            p.dispatch(MediaNotification::PositionChanged(position))?;
            p.dispatch(MediaNotification::BufferingProgress(buffered))
        });
        true
    }

    /// Without a spectrogram there is nothing to seek on, so the plain
    /// progress bar comes back.
    pub fn on_spectrogram_failed(&mut self, item: usize, err: MediaError) {
        if item != self.current_index {
            return;
        }
        self.visual_status = VisualStatus::Failed;
        self.report(&err);
        if let Some(ref mut player) = self.player {
            player.media_mut().set_native_controls_visible(true);
        }
    }

    pub fn sync_visualization_width(&mut self, width: u16) {
        self.visual_width = width;
        if let Some(ref mut player) = self.player {
            if player.visualization().is_some() {
                player.resize_visualization(f64::from(width));
            }
        }
    }

    pub fn handle_input(&mut self, key: KeyEvent) {
        match key.code {
            KeyCode::Char('q') => {
                self.handle.send(PlayerCommand::Stop);
                self.should_quit = true;
            }
            KeyCode::Char(' ') => self.toggle_playback(),
            KeyCode::Left => self.previous_item(),
            KeyCode::Right => self.next_item(),
            KeyCode::Char('h') => self.seek_by(-self.seek_step),
            KeyCode::Char('l') => self.seek_by(self.seek_step),
            KeyCode::Char('+') | KeyCode::Char('=') => self.nudge_volume(VOLUME_NUDGE),
            KeyCode::Char('-') => self.nudge_volume(-VOLUME_NUDGE),
            _ => {}
        }
    }

    fn point_in_rect(&self, x: u16, y: u16, rect: &Rect) -> bool {
        x >= rect.x && x < rect.x + rect.width && y >= rect.y && y < rect.y + rect.height
    }

    fn hit(&self, region: Option<Rect>, x: u16, y: u16) -> Option<Rect> {
        region.filter(|r| self.point_in_rect(x, y, r))
    }

    pub fn handle_mouse(&mut self, event: MouseEvent) {
        let (x, y) = (event.column, event.row);
        let regions = self.layout_regions.clone();

        match event.kind {
            MouseEventKind::Down(MouseButton::Left) => {
                if let Some(region) = self.hit(regions.playlist, x, y) {
                    if y > region.y && y < region.y + region.height - 1 {
                        let clicked_index = (y - region.y - 1) as usize;
                        self.select_item(clicked_index);
                    }
                    return;
                }

                if let Some(region) = self
                    .hit(regions.visualization, x, y)
                    .or_else(|| self.hit(regions.seek_row, x, y))
                {
                    let offset_x = f64::from(x - region.x);
                    self.with_player(|p| p.handle_control(ControlEvent::SeekClick { offset_x }));
                    return;
                }

                if self.hit(regions.play_pause, x, y).is_some() {
                    self.toggle_playback();
                    return;
                }

                if let Some(region) = self.hit(regions.volume, x, y) {
                    // First cell is silence, last cell is full volume.
                    let steps = region.width.saturating_sub(1).max(1);
                    let value = f64::from(x - region.x) / f64::from(steps);
                    self.with_player(|p| p.handle_control(ControlEvent::VolumeChange(value)));
                    return;
                }

                if let Some(region) = self.hit(regions.native_bar, x, y) {
                    let fraction = f64::from(x - region.x) / f64::from(region.width);
                    self.native_seek(fraction);
                }
            }

            MouseEventKind::Down(MouseButton::Middle) => self.toggle_playback(),

            MouseEventKind::ScrollUp => {
                if self.hit(regions.volume, x, y).is_some() {
                    self.nudge_volume(VOLUME_NUDGE);
                } else {
                    self.seek_by(self.seek_step);
                }
            }

            MouseEventKind::ScrollDown => {
                if self.hit(regions.volume, x, y).is_some() {
                    self.nudge_volume(-VOLUME_NUDGE);
                } else {
                    self.seek_by(-self.seek_step);
                }
            }

            _ => {}
        }
    }

    pub fn toggle_playback(&mut self) {
        self.with_player(|p| p.handle_control(ControlEvent::PlayPauseClick));
    }

    pub fn seek_by(&mut self, delta: f64) {
        self.with_player(|p| p.seek_by(delta));
    }

    fn nudge_volume(&mut self, delta: f64) {
        self.with_player(|p| {
            let current = p
                .controls()
                .map_or_else(|| p.media().volume(), |c| c.volume.value());
            p.handle_control(ControlEvent::VolumeChange(current + delta))
        });
    }

    /// Seek from the plain progress bar, which has no visualization behind it.
    fn native_seek(&mut self, fraction: f64) {
        self.with_player(|p| {
            let duration = p.media().duration();
            if !(duration.is_finite() && duration > 0.0) {
                return Err(MediaError::DurationUnknown);
            }
            p.media_mut()
                .set_current_time(fraction.clamp(0.0, 1.0) * duration);
            Ok(())
        });
    }

    fn select_item(&mut self, index: usize) {
        if index < self.playlist.len() && index != self.current_index {
            self.current_index = index;
            self.load_current();
        }
    }

    pub fn next_item(&mut self) {
        let next = increment(self.current_index, self.playlist.len());
        self.select_item(next);
    }

    pub fn previous_item(&mut self) {
        let previous = decrement(self.current_index, self.playlist.len());
        self.select_item(previous);
    }
}

#[cfg(test)]
mod tests {
    use std::sync::mpsc;

    use crossterm::event::KeyModifiers;

    use super::*;
    use crate::media::element::{SharedSnapshot, lock_snapshot};
    use crate::player::state::PlaybackState;
    use crate::ui::notifications::NotificationLevel;

    fn app_with(items: &[&str]) -> (App, mpsc::Receiver<PlayerCommand>, SharedSnapshot) {
        let (tx, rx) = mpsc::channel();
        let snapshot = SharedSnapshot::default();
        let handle = PlayerHandle::new(tx, snapshot.clone());
        let playlist = items.iter().map(|s| MediaLocation::parse(s)).collect();

        let mut app = App::new(playlist, handle, 1.0, 5.0);
        app.load_current();
        (app, rx, snapshot)
    }

    fn drain(rx: &mpsc::Receiver<PlayerCommand>) -> Vec<PlayerCommand> {
        rx.try_iter().collect()
    }

    fn key(code: KeyCode) -> KeyEvent {
        KeyEvent::new(code, KeyModifiers::NONE)
    }

    fn click(column: u16, row: u16) -> MouseEvent {
        MouseEvent {
            kind: MouseEventKind::Down(MouseButton::Left),
            column,
            row,
            modifiers: KeyModifiers::NONE,
        }
    }

    fn loads(commands: &[PlayerCommand]) -> Vec<&MediaLocation> {
        commands
            .iter()
            .filter_map(|c| match c {
                PlayerCommand::Load { location, .. } => Some(location),
                _ => None,
            })
            .collect()
    }

    /// Duration known and controls attached over a 50 column spectrogram.
    fn attached(app: &mut App, snapshot: &SharedSnapshot, duration: f64) {
        lock_snapshot(snapshot).duration = duration;
        app.sync_visualization_width(50);
        assert!(app.on_spectrogram_ready(app.current_index));
        app.layout_regions.visualization = Some(Rect::new(10, 2, 50, 10));
    }

    #[test]
    fn navigation_does_not_wrap() {
        let (mut app, rx, _) = app_with(&["a.mp3", "b.mp3", "c.mp3"]);
        drain(&rx);

        app.handle_input(key(KeyCode::Left));
        assert_eq!(app.current_index, 0);
        assert!(loads(&drain(&rx)).is_empty());

        app.handle_input(key(KeyCode::Right));
        app.handle_input(key(KeyCode::Right));
        assert_eq!(app.current_index, 2);
        drain(&rx);

        app.handle_input(key(KeyCode::Right));
        assert_eq!(app.current_index, 2);
        assert!(loads(&drain(&rx)).is_empty());
    }

    #[test]
    fn switching_items_loads_a_fresh_controller() {
        let (mut app, rx, snapshot) = app_with(&["a.mp3", "b.mp3"]);
        attached(&mut app, &snapshot, 100.0);
        assert!(app.player.as_ref().unwrap().controls().is_some());
        drain(&rx);

        app.handle_input(key(KeyCode::Right));
        let commands = drain(&rx);
        assert_eq!(loads(&commands), vec![&MediaLocation::parse("b.mp3")]);
        assert_eq!(app.visual_status, VisualStatus::Rendering);
        assert!(app.player.as_ref().unwrap().controls().is_none());
    }

    #[test]
    fn stale_spectrograms_are_ignored() {
        let (mut app, _rx, _) = app_with(&["a.mp3", "b.mp3"]);
        app.handle_input(key(KeyCode::Right));

        assert!(!app.on_spectrogram_ready(0));
        assert_eq!(app.visual_status, VisualStatus::Rendering);

        app.on_spectrogram_failed(0, MediaError::Spectrogram("boom".into()));
        assert_eq!(app.visual_status, VisualStatus::Rendering);
        assert!(
            app.notifications
                .active_notifications()
                .iter()
                .all(|n| n.level != NotificationLevel::Error)
        );
    }

    #[test]
    fn failed_spectrogram_restores_the_native_bar() {
        let (mut app, _rx, _) = app_with(&["a.mp3"]);
        assert!(!app.player.as_ref().unwrap().media().native_controls_visible());

        app.on_spectrogram_failed(0, MediaError::Spectrogram("no audio".into()));
        assert_eq!(app.visual_status, VisualStatus::Failed);
        assert!(app.player.as_ref().unwrap().media().native_controls_visible());
    }

    #[test]
    fn click_on_spectrogram_seeks_proportionally() {
        let (mut app, rx, snapshot) = app_with(&["a.mp3"]);
        attached(&mut app, &snapshot, 100.0);
        drain(&rx);

        app.handle_mouse(click(35, 5));

        let commands = drain(&rx);
        assert!(commands.contains(&PlayerCommand::Seek(50.0)));
        assert!(commands.contains(&PlayerCommand::Play));
        assert_eq!(app.player.as_ref().unwrap().state(), PlaybackState::Playing);
    }

    #[test]
    fn volume_slider_spans_its_whole_width() {
        let (mut app, _rx, snapshot) = app_with(&["a.mp3"]);
        attached(&mut app, &snapshot, 100.0);
        app.layout_regions.volume = Some(Rect::new(70, 13, 20, 1));

        app.handle_mouse(click(70, 13));
        assert_eq!(lock_snapshot(&snapshot).volume, 0.0);

        app.handle_mouse(click(89, 13));
        assert_eq!(lock_snapshot(&snapshot).volume, 1.0);
    }

    #[test]
    fn notifications_from_a_previous_load_are_dropped() {
        let (mut app, rx, snapshot) = app_with(&["a.mp3", "b.mp3"]);
        let first = app.generation;
        app.handle_input(key(KeyCode::Right));
        attached(&mut app, &snapshot, 100.0);

        let generations: Vec<u64> = drain(&rx)
            .into_iter()
            .filter_map(|c| match c {
                PlayerCommand::Load { generation, .. } => Some(generation),
                _ => None,
            })
            .collect();
        assert_eq!(generations, vec![first + 1]);

        let playhead = |app: &App| {
            app.player.as_ref().unwrap().controls().unwrap().playhead.width
        };
        app.on_media(first, MediaNotification::PositionChanged(50.0));
        assert_eq!(playhead(&app), 0.0);

        app.on_media(app.generation, MediaNotification::PositionChanged(50.0));
        assert_eq!(playhead(&app), 25.0);
    }

    #[test]
    fn space_toggles_playback() {
        let (mut app, rx, snapshot) = app_with(&["a.mp3"]);
        drain(&rx);

        app.handle_input(key(KeyCode::Char(' ')));
        assert!(!lock_snapshot(&snapshot).paused);
        assert_eq!(drain(&rx), vec![PlayerCommand::Play]);

        app.handle_input(key(KeyCode::Char(' ')));
        assert!(lock_snapshot(&snapshot).paused);
        assert_eq!(drain(&rx), vec![PlayerCommand::Pause]);
    }

    #[test]
    fn volume_keys_step_through_the_slider() {
        let (mut app, _rx, snapshot) = app_with(&["a.mp3"]);
        attached(&mut app, &snapshot, 100.0);

        app.handle_input(key(KeyCode::Char('+')));
        assert_eq!(lock_snapshot(&snapshot).volume, 1.0);

        app.handle_input(key(KeyCode::Char('-')));
        assert_eq!(lock_snapshot(&snapshot).volume, 0.95);
    }

    #[test]
    fn seeking_without_a_duration_is_reported() {
        let (mut app, _rx, _) = app_with(&["a.mp3"]);
        app.handle_input(key(KeyCode::Char('l')));

        let active = app.notifications.active_notifications();
        assert!(active.iter().any(|n| n.text == MediaError::DurationUnknown.to_string()));
    }

    #[test]
    fn quitting_stops_the_engine() {
        let (mut app, rx, _) = app_with(&["a.mp3"]);
        drain(&rx);

        app.handle_input(key(KeyCode::Char('q')));
        assert!(app.should_quit);
        assert_eq!(drain(&rx), vec![PlayerCommand::Stop]);
    }
}
