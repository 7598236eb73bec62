// src/core/registry.rs

//! Per-server lifecycle registry.
//!
//! Servers move from `Stopped` to `Started` exactly once per connection
//! session, when the connector has both sockets up. Waiters subscribe either
//! to one server or to the aggregate "at least one started" event; the two
//! notification levels are kept separate so waiters on unrelated servers are
//! not woken.

use tokio::sync::watch;

/// Lifecycle phase of one configured server.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServerPhase {
    Stopped,
    Started,
}

/// Registry of all configured servers. The only exposed transition is
/// `Stopped` → `Started`; retry policy on connection loss belongs to the
/// connector, not to the registry.
pub struct ServerRegistry {
    slots: Vec<watch::Sender<ServerPhase>>,
    any_started: watch::Sender<usize>,
}

impl ServerRegistry {
    pub fn new(count: usize) -> Self {
        Self {
            slots: (0..count)
                .map(|_| watch::channel(ServerPhase::Stopped).0)
                .collect(),
            any_started: watch::channel(0).0,
        }
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    /// Marks server `index` started and wakes both its own waiters and the
    /// aggregate waiters. Idempotent.
    pub fn set_started(&self, index: usize) {
        let changed = self.slots[index].send_if_modified(|phase| {
            if *phase == ServerPhase::Started {
                false
            } else {
                *phase = ServerPhase::Started;
                true
            }
        });
        if changed {
            self.any_started.send_modify(|n| *n += 1);
        }
    }

    pub fn is_started(&self, index: usize) -> bool {
        *self.slots[index].borrow() == ServerPhase::Started
    }

    /// Waits until server `index` is started.
    pub async fn wait_started(&self, index: usize) {
        let mut rx = self.slots[index].subscribe();
        // the sender lives in self, so the channel cannot close under us
        let _ = rx.wait_for(|phase| *phase == ServerPhase::Started).await;
    }

    /// Waits until at least one server is started.
    pub async fn wait_any_started(&self) {
        let mut rx = self.any_started.subscribe();
        let _ = rx.wait_for(|n| *n > 0).await;
    }
}
