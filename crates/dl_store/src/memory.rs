//! In-memory `SessionStore`, for tests and for short-lived contexts where
//! persistence isn't needed. No encryption: callers that need at-rest
//! protection should use `SqliteStore`.

use std::collections::HashMap;
use std::sync::Mutex;

use dl_crypto::ratchet::SessionSnapshot;
use dl_crypto::sender_key::{OwnSenderKey, ReceivedSenderKey};
use dl_proto::{ProtoError, SessionStore};

#[derive(Default)]
struct Inner {
    sessions: HashMap<String, SessionSnapshot>,
    own_keys: HashMap<String, OwnSenderKey>,
    received_keys: HashMap<(String, String), ReceivedSenderKey>,
    distributed: HashMap<String, bool>,
    channel_peers: HashMap<String, String>,
}

#[derive(Default)]
pub struct MemoryStore {
    inner: Mutex<Inner>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record which peer a channel's own sender key was distributed to, so
    /// `peer_for_channel` can answer it. Test/demo convenience — a real
    /// multi-member channel would map to many peers, which is out of scope
    /// here (see the group membership non-goal).
    pub fn set_channel_peer(&self, channel_id: &str, peer_id: &str) {
        self.inner
            .lock()
            .unwrap()
            .channel_peers
            .insert(channel_id.to_string(), peer_id.to_string());
    }
}

impl SessionStore for MemoryStore {
    fn load_session(&self, peer_id: &str) -> Result<Option<SessionSnapshot>, ProtoError> {
        Ok(self.inner.lock().unwrap().sessions.get(peer_id).cloned())
    }

    fn save_session(&self, peer_id: &str, snapshot: SessionSnapshot) -> Result<(), ProtoError> {
        self.inner.lock().unwrap().sessions.insert(peer_id.to_string(), snapshot);
        Ok(())
    }

    fn delete_session(&self, peer_id: &str) -> Result<(), ProtoError> {
        self.inner.lock().unwrap().sessions.remove(peer_id);
        Ok(())
    }

    fn load_own_sender_key(&self, channel_id: &str) -> Result<Option<OwnSenderKey>, ProtoError> {
        Ok(self.inner.lock().unwrap().own_keys.get(channel_id).cloned())
    }

    fn save_own_sender_key(&self, channel_id: &str, key: &OwnSenderKey) -> Result<(), ProtoError> {
        self.inner.lock().unwrap().own_keys.insert(channel_id.to_string(), key.clone());
        Ok(())
    }

    fn load_received_sender_key(
        &self,
        channel_id: &str,
        sender_id: &str,
    ) -> Result<Option<ReceivedSenderKey>, ProtoError> {
        Ok(self
            .inner
            .lock()
            .unwrap()
            .received_keys
            .get(&(channel_id.to_string(), sender_id.to_string()))
            .cloned())
    }

    fn save_received_sender_key(
        &self,
        channel_id: &str,
        sender_id: &str,
        key: &ReceivedSenderKey,
    ) -> Result<(), ProtoError> {
        self.inner
            .lock()
            .unwrap()
            .received_keys
            .insert((channel_id.to_string(), sender_id.to_string()), key.clone());
        Ok(())
    }

    fn is_distributed(&self, channel_id: &str) -> Result<bool, ProtoError> {
        Ok(self.inner.lock().unwrap().distributed.get(channel_id).copied().unwrap_or(false))
    }

    fn mark_distributed(&self, channel_id: &str) -> Result<(), ProtoError> {
        self.inner.lock().unwrap().distributed.insert(channel_id.to_string(), true);
        Ok(())
    }

    fn peer_for_channel(&self, channel_id: &str) -> Result<Option<String>, ProtoError> {
        Ok(self.inner.lock().unwrap().channel_peers.get(channel_id).cloned())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn save_then_load_roundtrips() {
        let store = MemoryStore::new();
        assert!(store.load_session("alice").unwrap().is_none());
        assert!(!store.is_distributed("general").unwrap());
        store.mark_distributed("general").unwrap();
        assert!(store.is_distributed("general").unwrap());
    }
}
