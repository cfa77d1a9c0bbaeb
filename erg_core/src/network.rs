//! Connectivity signal consumed by the sync reconciler.

use tokio::sync::watch;

/// Reports whether the network is reachable and notifies on changes
pub trait ConnectivitySignal: Send + Sync {
    fn is_online(&self) -> bool;

    /// Receiver that observes every online/offline transition
    fn subscribe(&self) -> watch::Receiver<bool>;
}

/// Connectivity state driven by whoever owns the platform hook
#[derive(Debug)]
pub struct ConnectivityMonitor {
    sender: watch::Sender<bool>,
}

impl ConnectivityMonitor {
    pub fn new(online: bool) -> Self {
        let (sender, _) = watch::channel(online);
        Self { sender }
    }

    /// Record a transition; subscribers are only woken on actual changes
    pub fn set_online(&self, online: bool) {
        let changed = self.sender.send_if_modified(|current| {
            if *current == online {
                false
            } else {
                *current = online;
                true
            }
        });
        if changed {
            tracing::info!("Network is now {}", if online { "online" } else { "offline" });
        }
    }
}

impl Default for ConnectivityMonitor {
    fn default() -> Self {
        Self::new(true)
    }
}

impl ConnectivitySignal for ConnectivityMonitor {
    fn is_online(&self) -> bool {
        *self.sender.borrow()
    }

    fn subscribe(&self) -> watch::Receiver<bool> {
        self.sender.subscribe()
    }
}
