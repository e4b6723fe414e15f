//! Envelope dispatcher (C8): routes inbound bytes by a single leading type
//! byte and drives outbound pairwise/group encryption through the store.
//!
//! Type bytes:
//!   `0x01` — pairwise ciphertext (this crate's own assignment; see below)
//!   `0x02` — sealed sender-key distribution message (this crate's own assignment)
//!   `0x03` — group frame (named explicitly by the wire format)
//!
//! The distilled wire format only names the group frame's leading byte.
//! `0x01`/`0x02` are a documented choice made here, not carried over from a
//! reference implementation.

use dl_crypto::{
    identity::IdentityKeyPair,
    ratchet::Session,
    sender_key::{self, OwnSenderKey, ReceivedSenderKey},
    x3dh::{self, InitHeader, PrekeyBundle},
    CryptoError,
};
use x25519_dalek::StaticSecret;

use crate::{error::ProtoError, store::SessionStore};

const TYPE_PAIRWISE: u8 = 0x01;
const TYPE_SKDM: u8 = 0x02;
const TYPE_GROUP: u8 = 0x03;

const INIT_HEADER_LEN: usize = 32 + 32 + 1;

/// What an inbound frame resolved to.
pub enum DispatchOutcome {
    Plaintext(Vec<u8>),
    SenderKeyInstalled,
}

/// Local prekey material the dispatcher needs to respond to a fresh
/// pairwise handshake or unseal an SKDM.
pub trait PrekeyInventory {
    fn identity(&self) -> &IdentityKeyPair;
    fn signed_prekey_secret(&self) -> &StaticSecret;
    /// Identity key converted to X25519, used to open sealed SKDMs.
    fn dh_identity_secret(&self) -> StaticSecret {
        self.identity().to_x25519_secret()
    }
    /// Hand back the one-time prekey secret an inbound init header consumed,
    /// if the dispatcher's caller still has one available. Returning `None`
    /// when the header claims one was used still lets the handshake
    /// proceed (loses one-shot forward secrecy, per §4.3's edge case).
    fn take_one_time_prekey(&self) -> Option<StaticSecret>;
}

/// Fetches a peer's published prekey bundle for outbound session bootstrap.
pub trait PrekeySource {
    fn fetch_bundle(&self, peer_id: &str) -> Result<PrekeyBundle, ProtoError>;
}

fn encode_init_header(header: &InitHeader) -> [u8; INIT_HEADER_LEN] {
    let mut out = [0u8; INIT_HEADER_LEN];
    out[..32].copy_from_slice(&header.ik_pub);
    out[32..64].copy_from_slice(&header.ek_pub);
    out[64] = header.opk_used as u8;
    out
}

fn decode_init_header(bytes: &[u8]) -> Result<InitHeader, ProtoError> {
    if bytes.len() < INIT_HEADER_LEN {
        return Err(CryptoError::Malformed("init header truncated".into()).into());
    }
    let mut ik_pub = [0u8; 32];
    ik_pub.copy_from_slice(&bytes[..32]);
    let mut ek_pub = [0u8; 32];
    ek_pub.copy_from_slice(&bytes[32..64]);
    Ok(InitHeader { ik_pub, ek_pub, opk_used: bytes[64] != 0 })
}

pub struct Dispatcher<'a> {
    store: &'a dyn SessionStore,
}

impl<'a> Dispatcher<'a> {
    pub fn new(store: &'a dyn SessionStore) -> Self {
        Self { store }
    }

    /// Encrypt a pairwise message to `peer_id`, bootstrapping a session via
    /// X3DH through `bundles` if none exists yet.
    pub fn encrypt_pairwise(
        &self,
        peer_id: &str,
        plaintext: &[u8],
        my_identity: &IdentityKeyPair,
        bundles: &dyn PrekeySource,
    ) -> Result<Vec<u8>, ProtoError> {
        let existing = self.store.load_session(peer_id)?;

        let (mut session, init_header) = match existing {
            Some(snapshot) => (Session::from_snapshot(snapshot), None),
            None => {
                tracing::debug!(peer_id, "no pairwise session yet, bootstrapping via X3DH");
                let bundle = bundles.fetch_bundle(peer_id)?;
                let result = x3dh::initiate(my_identity, &bundle)?;
                let session =
                    Session::init_initiator(result.shared_secret, result.associated_data, bundle.spk_pub)?;
                (session, Some(result.header))
            }
        };

        let envelope = session.encrypt(plaintext)?;
        self.store.save_session(peer_id, session.to_snapshot())?;

        let mut out = Vec::with_capacity(2 + INIT_HEADER_LEN + envelope.len());
        out.push(TYPE_PAIRWISE);
        match init_header {
            Some(h) => {
                out.push(1);
                out.extend_from_slice(&encode_init_header(&h));
            }
            None => out.push(0),
        }
        out.extend_from_slice(&envelope);
        Ok(out)
    }

    /// Classify and route an inbound frame.
    pub fn dispatch_inbound(
        &self,
        bytes: &[u8],
        sender_id: &str,
        channel_id: Option<&str>,
        prekeys: &dyn PrekeyInventory,
    ) -> Result<DispatchOutcome, ProtoError> {
        let Some(&type_byte) = bytes.first() else {
            return Err(ProtoError::Empty);
        };

        match type_byte {
            TYPE_PAIRWISE => self.dispatch_pairwise(&bytes[1..], sender_id, prekeys).map(DispatchOutcome::Plaintext),
            TYPE_SKDM => {
                let channel_id = channel_id.ok_or_else(|| ProtoError::Store("SKDM requires a channel id".into()))?;
                self.dispatch_skdm(&bytes[1..], sender_id, channel_id, prekeys)?;
                Ok(DispatchOutcome::SenderKeyInstalled)
            }
            TYPE_GROUP => {
                let channel_id = channel_id.ok_or_else(|| ProtoError::Store("group frame requires a channel id".into()))?;
                self.dispatch_group(bytes, sender_id, channel_id).map(DispatchOutcome::Plaintext)
            }
            other => {
                tracing::warn!(type_byte = other, sender_id, "rejecting envelope with unknown type byte");
                Err(ProtoError::UnknownType(other))
            }
        }
    }

    fn dispatch_pairwise(
        &self,
        body: &[u8],
        sender_id: &str,
        prekeys: &dyn PrekeyInventory,
    ) -> Result<Vec<u8>, ProtoError> {
        if body.is_empty() {
            return Err(ProtoError::Empty);
        }
        let has_init = body[0] != 0;
        let rest = &body[1..];

        if has_init {
            if self.store.load_session(sender_id)?.is_some() {
                return Err(ProtoError::SessionAlreadyExists(sender_id.to_string()));
            }

            let header = decode_init_header(rest)?;
            let envelope = &rest[INIT_HEADER_LEN..];

            let opk_secret = if header.opk_used { prekeys.take_one_time_prekey() } else { None };
            let (shared_secret, associated_data) =
                x3dh::respond(prekeys.identity(), prekeys.signed_prekey_secret(), opk_secret.as_ref(), &header)?;

            let mut session = Session::init_responder(
                shared_secret,
                associated_data,
                prekeys.signed_prekey_secret().clone(),
            );
            let plaintext = session.decrypt(envelope)?;
            self.store.save_session(sender_id, session.to_snapshot())?;
            Ok(plaintext)
        } else {
            let snapshot = self.store.load_session(sender_id)?.ok_or(CryptoError::NoSession)?;
            let mut session = Session::from_snapshot(snapshot);
            let plaintext = session.decrypt(rest)?;
            self.store.save_session(sender_id, session.to_snapshot())?;
            Ok(plaintext)
        }
    }

    fn dispatch_skdm(
        &self,
        sealed: &[u8],
        sender_id: &str,
        channel_id: &str,
        prekeys: &dyn PrekeyInventory,
    ) -> Result<(), ProtoError> {
        let payload = sender_key::open_distribution(&prekeys.dh_identity_secret(), sealed)?;
        let received = ReceivedSenderKey::install(&payload)?;
        self.store.save_received_sender_key(channel_id, sender_id, &received)?;
        tracing::debug!(channel_id, sender_id, "installed sender key from SKDM");
        Ok(())
    }

    fn dispatch_group(&self, frame: &[u8], sender_id: &str, channel_id: &str) -> Result<Vec<u8>, ProtoError> {
        let mut received = self
            .store
            .load_received_sender_key(channel_id, sender_id)?
            .ok_or(CryptoError::NoSession)?;
        let plaintext = received.decrypt(frame)?;
        self.store.save_received_sender_key(channel_id, sender_id, &received)?;
        Ok(plaintext)
    }

    /// Encrypt a group message, creating this channel's own sender key on
    /// first use.
    pub fn encrypt_group(&self, channel_id: &str) -> Result<OwnSenderKeyHandle, ProtoError> {
        let key = match self.store.load_own_sender_key(channel_id)? {
            Some(k) => k,
            None => OwnSenderKey::generate(),
        };
        Ok(OwnSenderKeyHandle { dispatcher: self, channel_id: channel_id.to_string(), key })
    }

    /// Generate a fresh sender key for `channel_id` and mark it as not yet
    /// distributed, so callers know to re-run the SKDM fan-out. Used on
    /// membership changes.
    pub fn rotate_sender_key(&self, channel_id: &str) -> Result<OwnSenderKey, ProtoError> {
        let key = sender_key::rotate_sender_key();
        self.store.save_own_sender_key(channel_id, &key)?;
        Ok(key)
    }
}

/// Borrow-scoped handle returned by `Dispatcher::encrypt_group`; persists
/// the advanced chain state back to the store when a message is encrypted.
pub struct OwnSenderKeyHandle<'a> {
    dispatcher: &'a Dispatcher<'a>,
    channel_id: String,
    key: OwnSenderKey,
}

impl<'a> OwnSenderKeyHandle<'a> {
    pub fn encrypt(mut self, plaintext: &[u8]) -> Result<Vec<u8>, ProtoError> {
        let frame = self.key.encrypt(plaintext)?;
        self.dispatcher.store.save_own_sender_key(&self.channel_id, &self.key)?;
        Ok(frame)
    }

    pub fn distribution_payload(&self) -> [u8; 52] {
        self.key.distribution_payload()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::{cell::RefCell, collections::HashMap};

    #[derive(Default)]
    struct MemoryStore {
        sessions: RefCell<HashMap<String, dl_crypto::ratchet::SessionSnapshot>>,
        own_keys: RefCell<HashMap<String, OwnSenderKey>>,
        received_keys: RefCell<HashMap<(String, String), ReceivedSenderKey>>,
    }

    impl SessionStore for MemoryStore {
        fn load_session(&self, peer_id: &str) -> Result<Option<dl_crypto::ratchet::SessionSnapshot>, ProtoError> {
            Ok(self.sessions.borrow().get(peer_id).cloned())
        }
        fn save_session(&self, peer_id: &str, snapshot: dl_crypto::ratchet::SessionSnapshot) -> Result<(), ProtoError> {
            self.sessions.borrow_mut().insert(peer_id.to_string(), snapshot);
            Ok(())
        }
        fn delete_session(&self, peer_id: &str) -> Result<(), ProtoError> {
            self.sessions.borrow_mut().remove(peer_id);
            Ok(())
        }
        fn load_own_sender_key(&self, channel_id: &str) -> Result<Option<OwnSenderKey>, ProtoError> {
            Ok(self.own_keys.borrow().get(channel_id).cloned())
        }
        fn save_own_sender_key(&self, channel_id: &str, key: &OwnSenderKey) -> Result<(), ProtoError> {
            self.own_keys.borrow_mut().insert(channel_id.to_string(), key.clone());
            Ok(())
        }
        fn load_received_sender_key(
            &self,
            channel_id: &str,
            sender_id: &str,
        ) -> Result<Option<ReceivedSenderKey>, ProtoError> {
            Ok(self.received_keys.borrow().get(&(channel_id.to_string(), sender_id.to_string())).cloned())
        }
        fn save_received_sender_key(
            &self,
            channel_id: &str,
            sender_id: &str,
            key: &ReceivedSenderKey,
        ) -> Result<(), ProtoError> {
            self.received_keys
                .borrow_mut()
                .insert((channel_id.to_string(), sender_id.to_string()), key.clone());
            Ok(())
        }
        fn is_distributed(&self, _channel_id: &str) -> Result<bool, ProtoError> {
            Ok(false)
        }
        fn mark_distributed(&self, _channel_id: &str) -> Result<(), ProtoError> {
            Ok(())
        }
        fn peer_for_channel(&self, _channel_id: &str) -> Result<Option<String>, ProtoError> {
            Ok(None)
        }
    }

    struct FixedPrekeys {
        identity: IdentityKeyPair,
        spk_secret: StaticSecret,
    }

    impl PrekeyInventory for FixedPrekeys {
        fn identity(&self) -> &IdentityKeyPair {
            &self.identity
        }
        fn signed_prekey_secret(&self) -> &StaticSecret {
            &self.spk_secret
        }
        fn take_one_time_prekey(&self) -> Option<StaticSecret> {
            None
        }
    }

    struct FixedBundle(PrekeyBundle);
    impl PrekeySource for FixedBundle {
        fn fetch_bundle(&self, _peer_id: &str) -> Result<PrekeyBundle, ProtoError> {
            let b = &self.0;
            Ok(PrekeyBundle { ik_pub: b.ik_pub, spk_pub: b.spk_pub, spk_sig: b.spk_sig, opk_pub: b.opk_pub })
        }
    }

    #[test]
    fn pairwise_bootstrap_then_reply() {
        let alice_ik = IdentityKeyPair::generate();
        let bob_ik = IdentityKeyPair::generate();
        let bob_spk = dl_crypto::identity::generate_signed_prekey(&bob_ik);

        let alice_store = MemoryStore::default();
        let bob_store = MemoryStore::default();
        let alice_dispatcher = Dispatcher::new(&alice_store);
        let bob_dispatcher = Dispatcher::new(&bob_store);

        let bundle_source =
            FixedBundle(PrekeyBundle { ik_pub: bob_ik.public.0, spk_pub: *bob_spk.public.as_bytes(), spk_sig: bob_spk.signature, opk_pub: None });

        let wire = alice_dispatcher.encrypt_pairwise("bob", b"hello bob", &alice_ik, &bundle_source).unwrap();

        let bob_prekeys = FixedPrekeys { identity: bob_ik, spk_secret: bob_spk.secret };
        let outcome = bob_dispatcher.dispatch_inbound(&wire, "alice", None, &bob_prekeys).unwrap();
        match outcome {
            DispatchOutcome::Plaintext(pt) => assert_eq!(pt, b"hello bob"),
            _ => panic!("expected plaintext"),
        }
    }

    #[test]
    fn reinit_over_existing_session_is_rejected() {
        let alice_ik = IdentityKeyPair::generate();
        let bob_ik = IdentityKeyPair::generate();
        let bob_spk = dl_crypto::identity::generate_signed_prekey(&bob_ik);

        let alice_store = MemoryStore::default();
        let bob_store = MemoryStore::default();
        let alice_dispatcher = Dispatcher::new(&alice_store);
        let bob_dispatcher = Dispatcher::new(&bob_store);

        let bundle_source =
            FixedBundle(PrekeyBundle { ik_pub: bob_ik.public.0, spk_pub: *bob_spk.public.as_bytes(), spk_sig: bob_spk.signature, opk_pub: None });
        let bob_prekeys = FixedPrekeys { identity: bob_ik, spk_secret: bob_spk.secret };

        let wire = alice_dispatcher.encrypt_pairwise("bob", b"hello bob", &alice_ik, &bundle_source).unwrap();
        bob_dispatcher.dispatch_inbound(&wire, "alice", None, &bob_prekeys).unwrap();

        let session_before = bob_store.load_session("alice").unwrap();

        // Replaying the same init-bearing frame must not silently
        // re-initialize (and thus reset) the session that was just
        // established.
        let err = bob_dispatcher.dispatch_inbound(&wire, "alice", None, &bob_prekeys);
        assert!(matches!(err, Err(ProtoError::SessionAlreadyExists(ref peer)) if peer == "alice"));

        let session_after = bob_store.load_session("alice").unwrap();
        assert_eq!(
            serde_json::to_vec(&session_before).unwrap(),
            serde_json::to_vec(&session_after).unwrap(),
            "rejected reinit must leave the existing session untouched"
        );
    }

    #[test]
    fn unknown_type_byte_rejected() {
        let store = MemoryStore::default();
        let dispatcher = Dispatcher::new(&store);
        let prekeys = FixedPrekeys { identity: IdentityKeyPair::generate(), spk_secret: StaticSecret::random_from_rng(rand::rngs::OsRng) };
        let err = dispatcher.dispatch_inbound(&[0xFF, 1, 2, 3], "x", None, &prekeys);
        assert!(matches!(err, Err(ProtoError::UnknownType(0xFF))));
    }
}
