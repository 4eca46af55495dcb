use std::sync::mpsc;
use std::thread::JoinHandle;

use crossterm::event::{self, Event, KeyEventKind, MouseEventKind};
use tracing::warn;

use crate::events::types::AppEvent;

/// Forward terminal input to the main loop until it stops listening.
/// Mouse motion is dropped; only presses and scrolls matter to the player.
pub fn spawn(event_tx: mpsc::Sender<AppEvent>) -> JoinHandle<()> {
    std::thread::spawn(move || {
        loop {
            let event = match event::read() {
                Ok(Event::Key(key_event)) if key_event.kind == KeyEventKind::Press => {
                    AppEvent::Input(key_event)
                }
                Ok(Event::Mouse(mouse_event)) => match mouse_event.kind {
                    MouseEventKind::Down(_)
                    | MouseEventKind::ScrollUp
                    | MouseEventKind::ScrollDown => AppEvent::Mouse(mouse_event),
                    _ => continue,
                },
                Ok(Event::Resize(width, height)) => AppEvent::Resize(width, height),
                Ok(_) => continue,
                Err(e) => {
                    warn!(error = %e, "terminal input failed");
                    break;
                }
            };

            if event_tx.send(event).is_err() {
                break;
            }
        }
    })
}
