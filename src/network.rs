//! Push-based reachability notifications.

use tokio::sync::watch;

/// Anything that can tell the uploader when the service becomes reachable.
pub trait ReachabilitySource: Send + Sync {
    /// Registers a listener. Dropping the subscription unregisters it.
    fn subscribe(&self) -> ReachabilitySubscription;
}

/// A registered reachability listener.
#[derive(Debug)]
pub struct ReachabilitySubscription {
    rx: watch::Receiver<bool>,
}

impl ReachabilitySubscription {
    /// Current reachability.
    pub fn is_reachable(&self) -> bool {
        *self.rx.borrow()
    }

    /// Waits for the next transition; `None` once the source is gone.
    pub async fn changed(&mut self) -> Option<bool> {
        self.rx.changed().await.ok()?;
        Some(*self.rx.borrow_and_update())
    }
}

/// Reachability multicast fed by the host platform.
#[derive(Debug)]
pub struct NetworkStatus {
    tx: watch::Sender<bool>,
}

impl NetworkStatus {
    /// Starts with the given reachability.
    pub fn new(reachable: bool) -> Self {
        let (tx, _) = watch::channel(reachable);
        Self { tx }
    }

    /// Publishes a status; listeners only hear about actual transitions.
    pub fn set_reachable(&self, reachable: bool) {
        self.tx.send_if_modified(|current| {
            if *current == reachable {
                return false;
            }
            *current = reachable;
            true
        });
    }

    /// Last published status.
    pub fn is_reachable(&self) -> bool {
        *self.tx.borrow()
    }

    /// Number of registered listeners.
    pub fn listener_count(&self) -> usize {
        self.tx.receiver_count()
    }
}

impl ReachabilitySource for NetworkStatus {
    fn subscribe(&self) -> ReachabilitySubscription {
        ReachabilitySubscription {
            rx: self.tx.subscribe(),
        }
    }
}
