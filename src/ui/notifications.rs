use std::time::{Duration, Instant};

use crate::media::error::MediaError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NotificationLevel {
    Info,
    Warning,
    Error,
}

impl NotificationLevel {
    pub fn prefix(&self) -> &'static str {
        match self {
            NotificationLevel::Info => "INFO",
            NotificationLevel::Warning => "WARN",
            NotificationLevel::Error => "ERROR",
        }
    }

    fn lifetime(&self) -> Duration {
        match self {
            NotificationLevel::Info => Duration::from_secs(2),
            NotificationLevel::Warning => Duration::from_secs(3),
            NotificationLevel::Error => Duration::from_secs(5),
        }
    }
}

#[derive(Debug, Clone)]
pub struct Notification {
    pub level: NotificationLevel,
    pub text: String,
    pub created_at: Instant,
}

impl Notification {
    pub fn is_expired(&self, now: Instant) -> bool {
        now.saturating_duration_since(self.created_at) >= self.level.lifetime()
    }
}

/// Transient messages shown over the player. Identical messages still on
/// screen are not stacked; the existing one is refreshed instead.
#[derive(Debug, Default)]
pub struct NotificationManager {
    notifications: Vec<Notification>,
}

impl NotificationManager {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn notify(&mut self, level: NotificationLevel, text: impl Into<String>) {
        let text = text.into();
        let now = Instant::now();

        if let Some(existing) = self
            .notifications
            .iter_mut()
            .find(|n| n.level == level && n.text == text)
        {
            existing.created_at = now;
            return;
        }

        self.notifications.push(Notification {
            level,
            text,
            created_at: now,
        });
    }

    pub fn info(&mut self, text: impl Into<String>) {
        self.notify(NotificationLevel::Info, text);
    }

    pub fn report(&mut self, err: &MediaError) {
        let level = match err {
            MediaError::DurationUnknown | MediaError::MalformedDuration(_) => {
                NotificationLevel::Warning
            }
            _ => NotificationLevel::Error,
        };
        self.notify(level, err.to_string());
    }

    pub fn tick(&mut self, now: Instant) {
        self.notifications.retain(|n| !n.is_expired(now));
    }

    pub fn active_notifications(&self) -> &[Notification] {
        &self.notifications
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn duplicates_are_refreshed_not_stacked() {
        let mut manager = NotificationManager::new();
        manager.report(&MediaError::DurationUnknown);
        manager.report(&MediaError::DurationUnknown);
        manager.info("loaded");

        let active = manager.active_notifications();
        assert_eq!(active.len(), 2);
        assert_eq!(active[0].level, NotificationLevel::Warning);
    }

    #[test]
    fn errors_outlive_info() {
        let mut manager = NotificationManager::new();
        manager.info("loaded");
        manager.report(&MediaError::MissingVisualization);

        let now = manager.active_notifications()[1].created_at;
        manager.tick(now + Duration::from_secs(3));

        let active = manager.active_notifications();
        assert_eq!(active.len(), 1);
        assert_eq!(active[0].level, NotificationLevel::Error);
    }
}
