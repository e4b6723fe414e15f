//! The session/key-store interface the dispatcher depends on (C6, as seen
//! from C8). `dl_store` provides the concrete implementations; keeping the
//! trait here lets the dispatcher stay storage-agnostic.
//!
//! Each entity updates atomically with respect to crash recovery; no
//! transactions spanning multiple entities are required.

use dl_crypto::{ratchet::SessionSnapshot, sender_key::{OwnSenderKey, ReceivedSenderKey}};

use crate::error::ProtoError;

pub trait SessionStore {
    fn load_session(&self, peer_id: &str) -> Result<Option<SessionSnapshot>, ProtoError>;
    /// Must never silently overwrite an existing session; callers delete first.
    fn save_session(&self, peer_id: &str, snapshot: SessionSnapshot) -> Result<(), ProtoError>;
    fn delete_session(&self, peer_id: &str) -> Result<(), ProtoError>;

    fn load_own_sender_key(&self, channel_id: &str) -> Result<Option<OwnSenderKey>, ProtoError>;
    fn save_own_sender_key(&self, channel_id: &str, key: &OwnSenderKey) -> Result<(), ProtoError>;

    fn load_received_sender_key(
        &self,
        channel_id: &str,
        sender_id: &str,
    ) -> Result<Option<ReceivedSenderKey>, ProtoError>;
    fn save_received_sender_key(
        &self,
        channel_id: &str,
        sender_id: &str,
        key: &ReceivedSenderKey,
    ) -> Result<(), ProtoError>;

    fn is_distributed(&self, channel_id: &str) -> Result<bool, ProtoError>;
    fn mark_distributed(&self, channel_id: &str) -> Result<(), ProtoError>;

    fn peer_for_channel(&self, channel_id: &str) -> Result<Option<String>, ProtoError>;
}
