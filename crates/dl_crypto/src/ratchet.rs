//! Double Ratchet session (C4).
//!
//! State separation:
//!   root key    — updated on every DH ratchet step
//!   send chain  — advanced once per outbound message
//!   recv chain  — advanced once per inbound message, possibly skipping ahead
//!   message key — derived from a chain key, used once, then discarded
//!
//! Wire envelope (§6):
//! `[dh_pub:32][prev_send_len:u32 LE][send_index:u32 LE][nonce:24][ciphertext+tag]`.
//! Associated data is the session's 64-byte X3DH blob followed by those same
//! 40 header bytes.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use x25519_dalek::{PublicKey as X25519Public, StaticSecret};
use zeroize::Zeroize;

use crate::{aead, error::CryptoError, kdf, MAX_SKIP};

/// `serde` only derives `Serialize`/`Deserialize` for arrays up to 32
/// elements, so the 64-byte associated-data blob needs a manual `with`
/// module.
mod array64 {
    use serde::{Deserialize, Deserializer, Serialize, Serializer};

    pub fn serialize<S: Serializer>(bytes: &[u8; 64], s: S) -> Result<S::Ok, S::Error> {
        bytes.as_slice().serialize(s)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<[u8; 64], D::Error> {
        let v = <Vec<u8>>::deserialize(d)?;
        <[u8; 64]>::try_from(v).map_err(|v| {
            serde::de::Error::invalid_length(v.len(), &"64 bytes")
        })
    }
}

const HEADER_LEN: usize = 32 + 4 + 4;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SessionState {
    Uninitialized,
    /// Has a sending chain; no receiving chain yet.
    InitiatorPreFirstRecv,
    /// Has the root key only; chains derive on the first inbound message.
    ResponderPreFirstSend,
    Established,
    /// An unrecoverable framing violation occurred; the session must be discarded.
    Poisoned,
}

struct RatchetHeader {
    dh_pub: [u8; 32],
    prev_send_len: u32,
    send_index: u32,
}

impl RatchetHeader {
    fn encode(&self) -> [u8; HEADER_LEN] {
        let mut out = [0u8; HEADER_LEN];
        out[..32].copy_from_slice(&self.dh_pub);
        out[32..36].copy_from_slice(&self.prev_send_len.to_le_bytes());
        out[36..40].copy_from_slice(&self.send_index.to_le_bytes());
        out
    }

    fn decode(bytes: &[u8]) -> Result<Self, CryptoError> {
        if bytes.len() < HEADER_LEN {
            return Err(CryptoError::Malformed("envelope shorter than header".into()));
        }
        let mut dh_pub = [0u8; 32];
        dh_pub.copy_from_slice(&bytes[..32]);
        let prev_send_len = u32::from_le_bytes(bytes[32..36].try_into().unwrap());
        let send_index = u32::from_le_bytes(bytes[36..40].try_into().unwrap());
        Ok(Self { dh_pub, prev_send_len, send_index })
    }
}

#[derive(Serialize, Deserialize, Clone)]
struct SkippedEntry {
    dh_pub: [u8; 32],
    index: u32,
    message_key: [u8; 32],
}

/// A pairwise Double Ratchet session. Serializes to exactly the fields
/// named in `SessionSnapshot`; round-tripping through serialize/deserialize
/// produces an observationally identical session.
pub struct Session {
    state: SessionState,
    /// `IK_initiator_pub || IK_responder_pub`, fixed for the life of the session.
    associated_data: [u8; 64],

    root_key: [u8; 32],

    dh_send_secret: StaticSecret,
    dh_send_pub: X25519Public,
    send_chain: Option<[u8; 32]>,
    send_index: u32,

    dh_recv_pub: Option<[u8; 32]>,
    recv_chain: Option<[u8; 32]>,
    recv_index: u32,
    prev_send_len: u32,

    /// Oldest-first queue of skipped `(dh_pub, index)` keys, bounded at `MAX_SKIP`.
    skip_order: Vec<(([u8; 32]), u32)>,
    skipped: HashMap<([u8; 32], u32), [u8; 32]>,
}

impl Drop for Session {
    fn drop(&mut self) {
        self.root_key.zeroize();
        if let Some(ck) = self.send_chain.as_mut() {
            ck.zeroize();
        }
        if let Some(ck) = self.recv_chain.as_mut() {
            ck.zeroize();
        }
        for mk in self.skipped.values_mut() {
            mk.zeroize();
        }
    }
}

impl Session {
    /// Start a session as the initiator: the X3DH shared secret becomes the
    /// initial root key, the peer's signed-prekey public becomes the current
    /// remote DH. A fresh sending DH key pair is generated and the root-key
    /// KDF derives the new root and the first sending chain key.
    pub fn init_initiator(
        x3dh_shared_secret: [u8; 32],
        associated_data: [u8; 64],
        peer_signed_prekey: [u8; 32],
    ) -> Result<Self, CryptoError> {
        let dh_send_secret = StaticSecret::random_from_rng(rand::rngs::OsRng);
        let dh_send_pub = X25519Public::from(&dh_send_secret);
        let remote = X25519Public::from(peer_signed_prekey);

        let dh_output = dh_send_secret.diffie_hellman(&remote);
        let (new_root, send_chain) = kdf::root_kdf(&x3dh_shared_secret, dh_output.as_bytes())?;

        Ok(Self {
            state: SessionState::InitiatorPreFirstRecv,
            associated_data,
            root_key: new_root,
            dh_send_secret,
            dh_send_pub,
            send_chain: Some(send_chain),
            send_index: 0,
            dh_recv_pub: Some(peer_signed_prekey),
            recv_chain: None,
            recv_index: 0,
            prev_send_len: 0,
            skip_order: Vec::new(),
            skipped: HashMap::new(),
        })
    }

    /// Start a session as the responder: the X3DH shared secret seeds the
    /// root key directly; the responder's own signed-prekey pair is the
    /// current sending DH. No chains are derived until the first inbound
    /// message triggers a DH ratchet step.
    pub fn init_responder(
        x3dh_shared_secret: [u8; 32],
        associated_data: [u8; 64],
        my_signed_prekey_secret: StaticSecret,
    ) -> Self {
        let dh_send_pub = X25519Public::from(&my_signed_prekey_secret);
        Self {
            state: SessionState::ResponderPreFirstSend,
            associated_data,
            root_key: x3dh_shared_secret,
            dh_send_secret: my_signed_prekey_secret,
            dh_send_pub,
            send_chain: None,
            send_index: 0,
            dh_recv_pub: None,
            recv_chain: None,
            recv_index: 0,
            prev_send_len: 0,
            skip_order: Vec::new(),
            skipped: HashMap::new(),
        }
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    fn build_ad(&self, header: &RatchetHeader) -> Vec<u8> {
        let mut ad = Vec::with_capacity(64 + HEADER_LEN);
        ad.extend_from_slice(&self.associated_data);
        ad.extend_from_slice(&header.encode());
        ad
    }

    /// Encrypt `plaintext`, advancing the sending chain by one step.
    pub fn encrypt(&mut self, plaintext: &[u8]) -> Result<Vec<u8>, CryptoError> {
        let chain = self.send_chain.ok_or(CryptoError::NotInitialized)?;
        let (next_chain, msg_key) = kdf::chain_kdf(&chain)?;
        self.send_chain = Some(next_chain);

        let header = RatchetHeader {
            dh_pub: *self.dh_send_pub.as_bytes(),
            prev_send_len: self.prev_send_len,
            send_index: self.send_index,
        };
        self.send_index += 1;

        let ad = self.build_ad(&header);
        let sealed = aead::seal(&msg_key, plaintext, &ad)?;

        let mut out = Vec::with_capacity(HEADER_LEN + sealed.len());
        out.extend_from_slice(&header.encode());
        out.extend_from_slice(&sealed);
        Ok(out)
    }

    /// Decrypt an inbound envelope, performing a DH ratchet step and/or
    /// skipped-key derivation as needed.
    pub fn decrypt(&mut self, envelope: &[u8]) -> Result<Vec<u8>, CryptoError> {
        if self.state == SessionState::Poisoned {
            return Err(CryptoError::NotInitialized);
        }
        let header = RatchetHeader::decode(envelope)?;
        let body = &envelope[HEADER_LEN..];

        if let Some(mk) = self.skipped.remove(&(header.dh_pub, header.send_index)) {
            self.skip_order.retain(|k| *k != (header.dh_pub, header.send_index));
            let ad = self.build_ad(&header);
            return aead::open(&mk, body, &ad).map(|pt| pt.to_vec());
        }

        let need_ratchet = match self.dh_recv_pub {
            Some(current) => current != header.dh_pub,
            None => true,
        };

        if need_ratchet {
            if self.dh_recv_pub.is_some() {
                self.skip_to(header.prev_send_len)?;
            }

            // The new receiving chain starts at index 0, so the skip distance
            // for this message is exactly `header.send_index`. Check it here,
            // before any ratchet-step mutation below, so a message that would
            // fail `skip_to` below leaves the session untouched rather than
            // committing a DH ratchet and key rotation for a message that's
            // about to be rejected anyway.
            if header.send_index as u64 > MAX_SKIP as u64 {
                return Err(CryptoError::TooManySkipped(header.send_index));
            }

            self.prev_send_len = self.send_index;
            self.send_index = 0;
            self.recv_index = 0;
            self.dh_recv_pub = Some(header.dh_pub);

            let remote = X25519Public::from(header.dh_pub);
            let recv_dh = self.dh_send_secret.diffie_hellman(&remote);
            let (root_after_recv, recv_chain) = match kdf::root_kdf(&self.root_key, recv_dh.as_bytes()) {
                Ok(v) => v,
                Err(e) => {
                    self.state = SessionState::Poisoned;
                    return Err(e);
                }
            };
            self.root_key = root_after_recv;
            self.recv_chain = Some(recv_chain);

            let new_send_secret = StaticSecret::random_from_rng(rand::rngs::OsRng);
            self.dh_send_pub = X25519Public::from(&new_send_secret);
            let send_dh = new_send_secret.diffie_hellman(&remote);
            let (root_after_send, send_chain) = match kdf::root_kdf(&self.root_key, send_dh.as_bytes()) {
                Ok(v) => v,
                Err(e) => {
                    self.state = SessionState::Poisoned;
                    return Err(e);
                }
            };
            self.root_key = root_after_send;
            self.send_chain = Some(send_chain);
            self.dh_send_secret = new_send_secret;
            self.state = SessionState::Established;
        }

        self.skip_to(header.send_index)?;

        let chain = self.recv_chain.ok_or(CryptoError::NotInitialized)?;
        let (next_chain, msg_key) = kdf::chain_kdf(&chain)?;
        self.recv_chain = Some(next_chain);
        self.recv_index += 1;

        let ad = self.build_ad(&header);
        aead::open(&msg_key, body, &ad).map(|pt| pt.to_vec())
    }

    /// Derive and cache receiving-chain keys for indices `[recv_index, until)`.
    fn skip_to(&mut self, until: u32) -> Result<(), CryptoError> {
        if until <= self.recv_index {
            return Ok(());
        }
        let distance = until - self.recv_index;
        if distance as u64 > MAX_SKIP as u64 {
            return Err(CryptoError::TooManySkipped(distance));
        }
        let Some(dh_pub) = self.dh_recv_pub else {
            return Ok(());
        };

        while self.recv_index < until {
            let chain = self.recv_chain.ok_or(CryptoError::NotInitialized)?;
            let (next_chain, mk) = kdf::chain_kdf(&chain)?;
            self.recv_chain = Some(next_chain);
            let key = (dh_pub, self.recv_index);
            self.skipped.insert(key, mk);
            self.skip_order.push(key);
            self.recv_index += 1;
        }

        while self.skip_order.len() > MAX_SKIP as usize {
            let oldest = self.skip_order.remove(0);
            if let Some(mut mk) = self.skipped.remove(&oldest) {
                mk.zeroize();
            }
        }

        Ok(())
    }

    pub fn our_ratchet_public(&self) -> [u8; 32] {
        *self.dh_send_pub.as_bytes()
    }

    /// Serializable snapshot of all session state (§4.4). Round-tripping
    /// through `to_snapshot`/`from_snapshot` must produce an observationally
    /// identical session.
    pub fn to_snapshot(&self) -> SessionSnapshot {
        SessionSnapshot {
            state: self.state,
            associated_data: self.associated_data,
            root_key: self.root_key,
            dh_send_secret: self.dh_send_secret.to_bytes(),
            dh_recv_pub: self.dh_recv_pub,
            send_chain: self.send_chain,
            recv_chain: self.recv_chain,
            send_index: self.send_index,
            recv_index: self.recv_index,
            prev_send_len: self.prev_send_len,
            skipped_keys: self
                .skip_order
                .iter()
                .map(|k| SkippedEntry { dh_pub: k.0, index: k.1, message_key: self.skipped[k] })
                .collect(),
        }
    }

    pub fn from_snapshot(s: SessionSnapshot) -> Self {
        let dh_send_secret = StaticSecret::from(s.dh_send_secret);
        let dh_send_pub = X25519Public::from(&dh_send_secret);
        let mut skip_order = Vec::with_capacity(s.skipped_keys.len());
        let mut skipped = HashMap::with_capacity(s.skipped_keys.len());
        for entry in s.skipped_keys {
            let key = (entry.dh_pub, entry.index);
            skip_order.push(key);
            skipped.insert(key, entry.message_key);
        }
        Self {
            state: s.state,
            associated_data: s.associated_data,
            root_key: s.root_key,
            dh_send_secret,
            dh_send_pub,
            send_chain: s.send_chain,
            recv_chain: s.recv_chain,
            send_index: s.send_index,
            recv_index: s.recv_index,
            prev_send_len: s.prev_send_len,
            dh_recv_pub: s.dh_recv_pub,
            skip_order,
            skipped,
        }
    }
}

#[derive(Serialize, Deserialize, Clone)]
pub struct SessionSnapshot {
    state: SessionState,
    #[serde(with = "array64")]
    associated_data: [u8; 64],
    root_key: [u8; 32],
    dh_send_secret: [u8; 32],
    dh_recv_pub: Option<[u8; 32]>,
    send_chain: Option<[u8; 32]>,
    recv_chain: Option<[u8; 32]>,
    send_index: u32,
    recv_index: u32,
    prev_send_len: u32,
    skipped_keys: Vec<SkippedEntry>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn paired_sessions() -> (Session, Session) {
        let shared = [7u8; 32];
        let ad = [1u8; 64];
        let bob_spk_secret = StaticSecret::random_from_rng(rand::rngs::OsRng);
        let bob_spk_pub = *X25519Public::from(&bob_spk_secret).as_bytes();

        let alice = Session::init_initiator(shared, ad, bob_spk_pub).unwrap();
        let bob = Session::init_responder(shared, ad, bob_spk_secret);
        (alice, bob)
    }

    #[test]
    fn basic_exchange_both_directions() {
        let (mut alice, mut bob) = paired_sessions();

        let env = alice.encrypt(b"hi bob").unwrap();
        let pt = bob.decrypt(&env).unwrap();
        assert_eq!(pt, b"hi bob");
        assert_eq!(bob.state(), SessionState::Established);

        let env2 = bob.encrypt(b"hi alice").unwrap();
        let pt2 = alice.decrypt(&env2).unwrap();
        assert_eq!(pt2, b"hi alice");
    }

    #[test]
    fn out_of_order_delivery() {
        let (mut alice, mut bob) = paired_sessions();

        let e0 = alice.encrypt(b"zero").unwrap();
        let e1 = alice.encrypt(b"one").unwrap();
        let e2 = alice.encrypt(b"two").unwrap();

        assert_eq!(bob.decrypt(&e2).unwrap(), b"two");
        assert_eq!(bob.decrypt(&e0).unwrap(), b"zero");
        assert_eq!(bob.decrypt(&e1).unwrap(), b"one");
    }

    #[test]
    fn dh_ratchet_after_reply() {
        let (mut alice, mut bob) = paired_sessions();

        let env = alice.encrypt(b"one").unwrap();
        bob.decrypt(&env).unwrap();

        let reply = bob.encrypt(b"two").unwrap();
        alice.decrypt(&reply).unwrap();

        let env2 = alice.encrypt(b"three").unwrap();
        assert_eq!(bob.decrypt(&env2).unwrap(), b"three");
    }

    #[test]
    fn exceeding_skip_bound_is_rejected_without_poisoning() {
        let (mut alice, mut bob) = paired_sessions();

        let root_before = bob.root_key;
        let dh_recv_before = bob.dh_recv_pub;
        let dh_send_secret_before = bob.dh_send_secret.to_bytes();
        let send_chain_before = bob.send_chain;
        let recv_chain_before = bob.recv_chain;

        for _ in 0..=MAX_SKIP {
            alice.encrypt(b"filler").unwrap();
        }
        let last = alice.encrypt(b"final").unwrap();
        let err = bob.decrypt(&last);
        assert!(matches!(err, Err(CryptoError::TooManySkipped(_))));
        assert_ne!(bob.state(), SessionState::Poisoned);

        // The rejected message must not have triggered a DH ratchet step or
        // any other state mutation — bob should be able to still receive
        // alice's very first message afterward as if nothing happened.
        assert_eq!(bob.root_key, root_before);
        assert_eq!(bob.dh_recv_pub, dh_recv_before);
        assert_eq!(bob.dh_send_secret.to_bytes(), dh_send_secret_before);
        assert_eq!(bob.send_chain, send_chain_before);
        assert_eq!(bob.recv_chain, recv_chain_before);
    }

    #[test]
    fn snapshot_roundtrip_preserves_behavior() {
        let (mut alice, mut bob) = paired_sessions();
        let env = alice.encrypt(b"before snapshot").unwrap();
        bob.decrypt(&env).unwrap();

        let snapshot = alice.to_snapshot();
        let mut restored = Session::from_snapshot(snapshot);

        let env2 = restored.encrypt(b"after snapshot").unwrap();
        assert_eq!(bob.decrypt(&env2).unwrap(), b"after snapshot");
    }
}
