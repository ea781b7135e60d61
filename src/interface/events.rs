//! Event fan-out towards user interfaces
//!
//! [`EventBroadcaster`] is the notifier a front end normally installs on the
//! phone. Every subscriber gets its own copy of each notification; a
//! subscriber that falls behind loses the oldest ones instead of slowing the
//! phone down.

use crate::application::notifier::{Notification, Notifier};
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

/// Default number of notifications buffered per subscriber
pub const DEFAULT_CAPACITY: usize = 1000;

/// Event broadcaster
#[derive(Clone)]
pub struct EventBroadcaster {
    tx: broadcast::Sender<Notification>,
}

impl EventBroadcaster {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity.max(1));
        Self { tx }
    }

    /// Publish a notification
    pub fn publish(&self, notification: Notification) {
        // Ignore send errors (no receivers)
        let _ = self.tx.send(notification);
    }

    /// Subscribe to notifications published from now on
    pub fn subscribe(&self) -> broadcast::Receiver<Notification> {
        self.tx.subscribe()
    }

    /// Get number of active subscribers
    pub fn subscriber_count(&self) -> usize {
        self.tx.receiver_count()
    }
}

impl Default for EventBroadcaster {
    fn default() -> Self {
        Self::new(DEFAULT_CAPACITY)
    }
}

impl Notifier for EventBroadcaster {
    fn notify(&self, notification: Notification) {
        self.publish(notification);
    }
}

/// Write every notification as a JSON line to the log
///
/// Used by the demo binary as a stand-in for a real user interface.
pub fn spawn_json_logger(broadcaster: &EventBroadcaster) -> JoinHandle<()> {
    let mut rx = broadcaster.subscribe();

    tokio::spawn(async move {
        info!("Event logger attached");
        loop {
            match rx.recv().await {
                Ok(notification) => match serde_json::to_string(&notification.event) {
                    Ok(json) => info!(
                        event = %notification.metadata.event_type,
                        id = %notification.metadata.event_id,
                        "{}",
                        json
                    ),
                    Err(e) => error!("Failed to serialize event: {}", e),
                },
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    warn!(skipped, "Event logger fell behind");
                }
                Err(broadcast::error::RecvError::Closed) => break,
            }
        }
        debug!("Event logger detached");
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::application::notifier::PhoneEvent;

    #[test]
    fn test_publish_without_subscribers() {
        let broadcaster = EventBroadcaster::default();
        assert_eq!(broadcaster.subscriber_count(), 0);
        broadcaster.notify(Notification::new(PhoneEvent::Ringtone { playing: true }));
    }

    #[tokio::test]
    async fn test_every_subscriber_receives() {
        let broadcaster = EventBroadcaster::new(16);
        let mut first = broadcaster.subscribe();
        let mut second = broadcaster.subscribe();
        assert_eq!(broadcaster.subscriber_count(), 2);

        broadcaster.notify(Notification::new(PhoneEvent::SoundLevel { level: 7 }));

        for rx in [&mut first, &mut second] {
            let notification = rx.recv().await.unwrap();
            assert_eq!(notification.event, PhoneEvent::SoundLevel { level: 7 });
        }
    }

    #[tokio::test]
    async fn test_slow_subscriber_lags() {
        let broadcaster = EventBroadcaster::new(2);
        let mut rx = broadcaster.subscribe();

        for level in 0..4 {
            broadcaster.notify(Notification::new(PhoneEvent::MicroLevel { level }));
        }

        assert!(matches!(
            rx.recv().await,
            Err(broadcast::error::RecvError::Lagged(2))
        ));
        let next = rx.recv().await.unwrap();
        assert_eq!(next.event, PhoneEvent::MicroLevel { level: 2 });
    }
}
