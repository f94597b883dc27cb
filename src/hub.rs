use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};

use axum::extract::ws::Message;
use parking_lot::Mutex;
use tokio::sync::mpsc::UnboundedSender;

/// A session's outbound queue. The session's writer task drains it into the
/// socket, so fanout never waits on a slow peer.
pub type Outbound = UnboundedSender<Message>;

/// Process-wide broadcast coordinator: one entry per vault with at least one
/// connected session.
#[derive(Default)]
pub struct Hub {
    vaults: Mutex<HashMap<String, HashMap<u64, Outbound>>>,
    next_id: AtomicU64,
}

impl Hub {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a session on a vault and returns its membership id.
    pub fn join(&self, vault_id: &str, outbound: Outbound) -> u64 {
        let session_id = self.next_id.fetch_add(1, Ordering::Relaxed);
        self.vaults
            .lock()
            .entry(vault_id.to_string())
            .or_default()
            .insert(session_id, outbound);
        session_id
    }

    /// Removes a session; the vault entry disappears with its last member.
    pub fn leave(&self, vault_id: &str, session_id: u64) {
        let mut vaults = self.vaults.lock();
        if let Some(sessions) = vaults.get_mut(vault_id) {
            sessions.remove(&session_id);
            if sessions.is_empty() {
                vaults.remove(vault_id);
            }
        }
    }

    /// Sends a JSON text frame to every session on the vault, the originator
    /// included (clients dedupe by `device` and `uid`). Sessions whose queue
    /// is gone are skipped; their own exit path performs the leave.
    pub fn broadcast(&self, vault_id: &str, msg: &serde_json::Value) {
        let frame = Message::Text(msg.to_string().into());
        let vaults = self.vaults.lock();
        if let Some(sessions) = vaults.get(vault_id) {
            for outbound in sessions.values() {
                let _ = outbound.send(frame.clone());
            }
        }
    }

    #[cfg(test)]
    fn member_count(&self, vault_id: &str) -> usize {
        self.vaults
            .lock()
            .get(vault_id)
            .map(|s| s.len())
            .unwrap_or(0)
    }

    #[cfg(test)]
    fn vault_count(&self) -> usize {
        self.vaults.lock().len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::sync::mpsc;

    fn member() -> (Outbound, mpsc::UnboundedReceiver<Message>) {
        mpsc::unbounded_channel()
    }

    fn text_of(msg: Message) -> String {
        match msg {
            Message::Text(t) => t.to_string(),
            other => panic!("expected text frame, got {other:?}"),
        }
    }

    #[test]
    fn join_and_leave_lifecycle() {
        let hub = Hub::new();
        let (tx_a, _rx_a) = member();
        let (tx_b, _rx_b) = member();

        let a = hub.join("v1", tx_a);
        let b = hub.join("v1", tx_b);
        assert_eq!(hub.member_count("v1"), 2);

        hub.leave("v1", a);
        assert_eq!(hub.member_count("v1"), 1);

        // Empty entries are removed outright.
        hub.leave("v1", b);
        assert_eq!(hub.vault_count(), 0);
    }

    #[test]
    fn broadcast_reaches_every_member_including_sender() {
        let hub = Hub::new();
        let (tx_a, mut rx_a) = member();
        let (tx_b, mut rx_b) = member();
        hub.join("v1", tx_a);
        hub.join("v1", tx_b);

        let msg = serde_json::json!({"op": "push", "path": "notes/a.md"});
        hub.broadcast("v1", &msg);

        for rx in [&mut rx_a, &mut rx_b] {
            let frame = rx.try_recv().expect("frame delivered");
            let parsed: serde_json::Value = serde_json::from_str(&text_of(frame)).unwrap();
            assert_eq!(parsed, msg);
        }
    }

    #[test]
    fn broadcast_is_vault_scoped() {
        let hub = Hub::new();
        let (tx_a, mut rx_a) = member();
        let (tx_b, mut rx_b) = member();
        hub.join("v1", tx_a);
        hub.join("v2", tx_b);

        hub.broadcast("v1", &serde_json::json!({"op": "ping"}));

        assert!(rx_a.try_recv().is_ok());
        assert!(rx_b.try_recv().is_err());
    }

    #[test]
    fn broadcast_to_empty_vault_is_a_noop() {
        let hub = Hub::new();
        hub.broadcast("nobody", &serde_json::json!({"op": "ping"}));
    }

    #[test]
    fn dead_member_does_not_block_fanout() {
        let hub = Hub::new();
        let (tx_dead, rx_dead) = member();
        let (tx_live, mut rx_live) = member();
        hub.join("v1", tx_dead);
        hub.join("v1", tx_live);
        drop(rx_dead);

        hub.broadcast("v1", &serde_json::json!({"op": "ping"}));
        assert!(rx_live.try_recv().is_ok());
    }
}
