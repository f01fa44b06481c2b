use std::sync::Arc;

use tokio::sync::watch;

/// Creates a change-notification channel.
///
/// The notifier side is held by whatever mutates the underlying data; the
/// subscription side drives re-reconciliation. Notifications carry no payload,
/// only a generation counter, so a burst of writes wakes the subscriber once.
pub fn change_channel() -> (ChangeNotifier, ChangeSubscription) {
    let (tx, rx) = watch::channel(0u64);
    (
        ChangeNotifier { tx: Arc::new(tx) },
        ChangeSubscription { rx },
    )
}

/// Publishing half of [`change_channel`]. Cloning shares the channel.
#[derive(Debug, Clone)]
pub struct ChangeNotifier {
    tx: Arc<watch::Sender<u64>>,
}

impl ChangeNotifier {
    /// Signals that the source data changed.
    pub fn notify(&self) {
        self.tx.send_modify(|generation| *generation = generation.wrapping_add(1));
    }

    /// A new subscription that sees only notifications sent after this call.
    pub fn subscribe(&self) -> ChangeSubscription {
        ChangeSubscription {
            rx: self.tx.subscribe(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct ChangeSubscription {
    rx: watch::Receiver<u64>,
}

impl ChangeSubscription {
    /// Waits for the next notification.
    ///
    /// Returns `false` once every [`ChangeNotifier`] has been dropped and no
    /// unseen notification is left.
    pub async fn changed(&mut self) -> bool {
        self.rx.changed().await.is_ok()
    }

    /// Number of notifications sent so far.
    pub fn generation(&self) -> u64 {
        *self.rx.borrow()
    }

    pub fn has_pending(&self) -> bool {
        self.rx.has_changed().unwrap_or(false)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn test_notify_wakes_subscriber() {
        let (notifier, mut sub) = change_channel();
        assert!(!sub.has_pending());

        notifier.notify();
        assert!(sub.has_pending());
        assert!(sub.changed().await);
        assert_eq!(sub.generation(), 1);
        assert!(!sub.has_pending());
    }

    #[tokio::test]
    async fn test_bursts_coalesce() {
        let (notifier, mut sub) = change_channel();
        for _ in 0..5 {
            notifier.notify();
        }

        assert!(sub.changed().await);
        assert_eq!(sub.generation(), 5);

        let second = tokio::time::timeout(Duration::from_millis(50), sub.changed()).await;
        assert!(second.is_err(), "no further notification expected");
    }

    #[tokio::test]
    async fn test_closed_after_all_notifiers_dropped() {
        let (notifier, mut sub) = change_channel();
        let clone = notifier.clone();
        drop(notifier);

        clone.notify();
        drop(clone);

        // Pending notification is still delivered, then the channel reports closed
        assert!(sub.changed().await);
        assert!(!sub.changed().await);
    }

    #[tokio::test]
    async fn test_subscribe_sees_later_notifications() {
        let (notifier, _first) = change_channel();
        notifier.notify();

        let mut late = notifier.subscribe();
        assert!(!late.has_pending());
        notifier.notify();
        assert!(late.changed().await);
        assert_eq!(late.generation(), 2);
    }
}
