use std::sync::{Arc, Mutex};

use crate::models::Notification;

/// Delivery hook. The engine records every notification in the store inbox
/// and hands it here; how it reaches the person is up to the implementor.
pub trait Notifier: Send + Sync {
    fn deliver(&self, notification: &Notification);
}

/// Writes notifications to the log.
pub struct LogNotifier;

impl Notifier for LogNotifier {
    fn deliver(&self, notification: &Notification) {
        tracing::info!(
            recipient = %notification.recipient,
            kind = ?notification.kind,
            lead = ?notification.lead_id,
            "{}",
            notification.message
        );
    }
}

/// Keeps delivered notifications in memory.
#[derive(Clone, Default)]
pub struct RecordingNotifier {
    delivered: Arc<Mutex<Vec<Notification>>>,
}

impl RecordingNotifier {
    pub fn delivered(&self) -> Vec<Notification> {
        self.delivered
            .lock()
            .map(|delivered| delivered.clone())
            .unwrap_or_default()
    }
}

impl Notifier for RecordingNotifier {
    fn deliver(&self, notification: &Notification) {
        if let Ok(mut delivered) = self.delivered.lock() {
            delivered.push(notification.clone());
        }
    }
}
