//! Notification admission control.
//!
//! A keyed map from (target, alert kind) to the instant of the last
//! admitted notification. Admission checks and records under one lock,
//! so two attempts for the same key cannot both pass inside a cooldown
//! window. Each monitor owns its throttle; state is never global.

use std::collections::HashMap;
use std::time::{Duration, Instant};

use parking_lot::Mutex;

/// Kinds of alert that may be notified.
///
/// Unreachability is deliberately absent: when a target cannot be
/// reached, the path to the webhook may be down too, so unreachable
/// targets are only ever logged locally. With no kind there can be no
/// key, and with no key no notification.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AlertKind {
    HighLatency,
}

/// Throttle map key: one cooldown window per target and alert kind.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct AlertKey {
    pub target: String,
    pub kind: AlertKind,
}

impl AlertKey {
    pub fn high_latency(target: impl Into<String>) -> Self {
        Self {
            target: target.into(),
            kind: AlertKind::HighLatency,
        }
    }
}

/// Per-key notification rate limiter.
///
/// Grows to at most #targets x #alert-kinds entries, so no eviction is
/// needed.
#[derive(Debug, Default)]
pub struct NotificationThrottle {
    last_admitted: Mutex<HashMap<AlertKey, Instant>>,
}

impl NotificationThrottle {
    pub fn new() -> Self {
        Self::default()
    }

    /// Admit a notification for `key` iff none was admitted within the
    /// last `cooldown`, recording `now` as the new admission time.
    ///
    /// A rejected attempt leaves the stored time untouched, so the
    /// window is always measured from the last *admitted* notification.
    pub fn admit(&self, key: AlertKey, now: Instant, cooldown: Duration) -> bool {
        let mut map = self.last_admitted.lock();
        match map.get(&key) {
            Some(last) if now.duration_since(*last) < cooldown => false,
            _ => {
                map.insert(key, now);
                true
            }
        }
    }

    #[cfg(test)]
    fn len(&self) -> usize {
        self.last_admitted.lock().len()
    }
}
