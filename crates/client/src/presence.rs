//! Online roster tracking
//!
//! The server always sends the full roster, so each update replaces the
//! previous one. Subscribers observe changes through a `watch` channel and
//! never reach into the tracker itself.

use std::collections::BTreeSet;

use parley_shared::UserId;
use tokio::sync::watch;

/// Identities currently online
pub type Roster = BTreeSet<UserId>;

#[derive(Debug)]
pub struct PresenceTracker {
    sender: watch::Sender<Roster>,
}

impl Default for PresenceTracker {
    fn default() -> Self {
        Self::new()
    }
}

impl PresenceTracker {
    pub fn new() -> Self {
        let (sender, _) = watch::channel(Roster::new());
        Self { sender }
    }

    /// Receive roster updates. The current value is available immediately.
    pub fn subscribe(&self) -> watch::Receiver<Roster> {
        self.sender.subscribe()
    }

    /// Replace the roster. Subscribers are only woken when it differs.
    pub fn apply_roster(&self, online_users: Vec<UserId>) -> bool {
        let next: Roster = online_users.into_iter().collect();
        self.sender.send_if_modified(|current| {
            if *current == next {
                return false;
            }
            tracing::debug!(online = next.len(), "Presence roster updated");
            *current = next;
            true
        })
    }

    /// Forget everything; used when the live channel drops and the roster
    /// can no longer be trusted.
    pub fn clear(&self) -> bool {
        self.apply_roster(Vec::new())
    }

    pub fn is_online(&self, user_id: UserId) -> bool {
        self.sender.borrow().contains(&user_id)
    }

    pub fn online_users(&self) -> Roster {
        self.sender.borrow().clone()
    }
}
