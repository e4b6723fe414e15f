//! Sender-key group engine (C5).
//!
//! One sender key per `(channel, author)`: a chain key that ratchets
//! forward by chain index, shared out-of-band to the channel's members via
//! a sealed distribution message (SKDM). The AEAD associated data is
//! exactly the 16-byte distribution id — binding to channel or sender is
//! left to the transport, since a distribution id is 128 bits of entropy
//! and is never reused across channels or senders.

use rand::RngCore;
use serde::{Deserialize, Serialize};
use x25519_dalek::{PublicKey as X25519Public, StaticSecret};

use crate::{aead, error::CryptoError, kdf, MAX_SKIP};

const FRAME_TYPE: u8 = 0x03;
const SKDM_LEN: usize = 16 + 4 + 32;

/// A channel member's own outgoing sender key.
#[derive(Serialize, Deserialize, Clone)]
pub struct OwnSenderKey {
    pub distribution_id: [u8; 16],
    chain_key: [u8; 32],
    chain_index: u32,
}

impl OwnSenderKey {
    pub fn generate() -> Self {
        let mut distribution_id = [0u8; 16];
        rand::rngs::OsRng.fill_bytes(&mut distribution_id);
        let mut chain_key = [0u8; 32];
        rand::rngs::OsRng.fill_bytes(&mut chain_key);
        Self { distribution_id, chain_key, chain_index: 0 }
    }

    pub fn distribution_payload(&self) -> [u8; SKDM_LEN] {
        let mut out = [0u8; SKDM_LEN];
        out[..16].copy_from_slice(&self.distribution_id);
        out[16..20].copy_from_slice(&self.chain_index.to_le_bytes());
        out[20..].copy_from_slice(&self.chain_key);
        out
    }

    /// Encrypt a group message. Emits the frame at the *current* chain
    /// index, then advances state to the next chain key and index.
    pub fn encrypt(&mut self, plaintext: &[u8]) -> Result<Vec<u8>, CryptoError> {
        let (next_chain, msg_key) = kdf::chain_kdf(&self.chain_key)?;
        let frame_index = self.chain_index;

        let sealed = aead::seal(&msg_key, plaintext, &self.distribution_id)?;

        let mut out = Vec::with_capacity(1 + 16 + 4 + sealed.len());
        out.push(FRAME_TYPE);
        out.extend_from_slice(&self.distribution_id);
        out.extend_from_slice(&frame_index.to_le_bytes());
        out.extend_from_slice(&sealed);

        self.chain_key = next_chain;
        self.chain_index += 1;
        Ok(out)
    }
}

/// A received member's copy of someone else's sender key.
#[derive(Serialize, Deserialize, Clone)]
pub struct ReceivedSenderKey {
    pub distribution_id: [u8; 16],
    chain_key: [u8; 32],
    chain_index: u32,
}

impl ReceivedSenderKey {
    /// Install a freshly-received SKDM payload (already unsealed).
    pub fn install(payload: &[u8]) -> Result<Self, CryptoError> {
        if payload.len() != SKDM_LEN {
            return Err(CryptoError::Malformed("SKDM payload must be 52 bytes".into()));
        }
        let mut distribution_id = [0u8; 16];
        distribution_id.copy_from_slice(&payload[..16]);
        let chain_index = u32::from_le_bytes(payload[16..20].try_into().unwrap());
        let mut chain_key = [0u8; 32];
        chain_key.copy_from_slice(&payload[20..]);
        Ok(Self { distribution_id, chain_key, chain_index })
    }

    /// Decrypt a group frame. On AEAD failure the state is left untouched
    /// so a single corrupt frame cannot poison the chain.
    pub fn decrypt(&mut self, frame: &[u8]) -> Result<Vec<u8>, CryptoError> {
        if frame.is_empty() || frame[0] != FRAME_TYPE {
            return Err(CryptoError::Malformed("not a group frame".into()));
        }
        if frame.len() < 1 + 16 + 4 + 24 {
            return Err(CryptoError::Malformed("group frame too short".into()));
        }
        let mut distribution_id = [0u8; 16];
        distribution_id.copy_from_slice(&frame[1..17]);
        if distribution_id != self.distribution_id {
            return Err(CryptoError::DistributionMismatch);
        }
        let frame_index = u32::from_le_bytes(frame[17..21].try_into().unwrap());
        let body = &frame[21..];

        if frame_index < self.chain_index {
            return Err(CryptoError::Replay { frame: frame_index, stored: self.chain_index });
        }
        let steps = frame_index - self.chain_index;
        if steps > MAX_SKIP {
            return Err(CryptoError::TooManySkipped(steps));
        }

        let mut chain = self.chain_key;
        let mut msg_key = [0u8; 32];
        for _ in 0..=steps {
            let (next_chain, mk) = kdf::chain_kdf(&chain)?;
            chain = next_chain;
            msg_key = mk;
        }

        let plaintext = aead::open(&msg_key, body, &self.distribution_id)?;

        self.chain_key = chain;
        self.chain_index = frame_index + 1;
        Ok(plaintext.to_vec())
    }
}

/// Generate a fresh sender key for `channel`, replacing any existing one.
/// Called on membership changes (a member leaving) so remaining members
/// lose the ability for the departed member to keep reading with an old key.
pub fn rotate_sender_key() -> OwnSenderKey {
    OwnSenderKey::generate()
}

/// Seal an SKDM payload to a recipient's DH-form identity public key, using
/// an ephemeral X25519 key pair and the core's single AEAD — the same
/// public-key "box" shape X3DH uses for its own DH set, with the ephemeral
/// public bound in as associated data.
pub fn seal_distribution(recipient_dh_pub: &[u8; 32], payload: &[u8; SKDM_LEN]) -> Result<Vec<u8>, CryptoError> {
    let ephemeral_secret = StaticSecret::random_from_rng(rand::rngs::OsRng);
    let ephemeral_pub = X25519Public::from(&ephemeral_secret);
    let recipient = X25519Public::from(*recipient_dh_pub);
    let dh = ephemeral_secret.diffie_hellman(&recipient);

    let mut seal_key = [0u8; 32];
    kdf::hkdf_expand(dh.as_bytes(), None, b"dl-skdm-seal", &mut seal_key)?;

    let sealed = aead::seal(&seal_key, payload, ephemeral_pub.as_bytes())?;
    let mut out = Vec::with_capacity(32 + sealed.len());
    out.extend_from_slice(ephemeral_pub.as_bytes());
    out.extend_from_slice(&sealed);
    Ok(out)
}

/// Open an SKDM sealed by `seal_distribution`, using the recipient's own
/// identity X25519 secret.
pub fn open_distribution(my_dh_secret: &StaticSecret, sealed: &[u8]) -> Result<[u8; SKDM_LEN], CryptoError> {
    if sealed.len() < 32 {
        return Err(CryptoError::Malformed("sealed SKDM shorter than ephemeral key".into()));
    }
    let (ephemeral_pub_bytes, body) = sealed.split_at(32);
    let ephemeral_pub = X25519Public::from(<[u8; 32]>::try_from(ephemeral_pub_bytes).unwrap());
    let dh = my_dh_secret.diffie_hellman(&ephemeral_pub);

    let mut seal_key = [0u8; 32];
    kdf::hkdf_expand(dh.as_bytes(), None, b"dl-skdm-seal", &mut seal_key)?;

    let payload = aead::open(&seal_key, body, ephemeral_pub_bytes)?;
    if payload.len() != SKDM_LEN {
        return Err(CryptoError::Malformed("SKDM payload must be 52 bytes".into()));
    }
    let mut out = [0u8; SKDM_LEN];
    out.copy_from_slice(&payload);
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn group_of_three_basic_flow() {
        let mut alice_key = OwnSenderKey::generate();
        let mut bob_copy = ReceivedSenderKey::install(&alice_key.distribution_payload()).unwrap();
        let mut carol_copy = ReceivedSenderKey::install(&alice_key.distribution_payload()).unwrap();

        let frame = alice_key.encrypt(b"hello group").unwrap();
        assert_eq!(bob_copy.decrypt(&frame).unwrap(), b"hello group");
        assert_eq!(carol_copy.decrypt(&frame).unwrap(), b"hello group");
    }

    #[test]
    fn out_of_order_group_frames_catch_up() {
        let mut alice_key = OwnSenderKey::generate();
        let mut bob_copy = ReceivedSenderKey::install(&alice_key.distribution_payload()).unwrap();

        let f0 = alice_key.encrypt(b"zero").unwrap();
        let f1 = alice_key.encrypt(b"one").unwrap();
        let _ = f0;
        assert_eq!(bob_copy.decrypt(&f1).unwrap(), b"one");
    }

    #[test]
    fn replay_is_rejected() {
        let mut alice_key = OwnSenderKey::generate();
        let mut bob_copy = ReceivedSenderKey::install(&alice_key.distribution_payload()).unwrap();

        let frame = alice_key.encrypt(b"once").unwrap();
        bob_copy.decrypt(&frame).unwrap();
        assert!(matches!(bob_copy.decrypt(&frame), Err(CryptoError::Replay { .. })));
    }

    #[test]
    fn membership_change_rotation_breaks_old_members() {
        let mut alice_key = OwnSenderKey::generate();
        let mut bob_copy = ReceivedSenderKey::install(&alice_key.distribution_payload()).unwrap();

        alice_key = rotate_sender_key();
        let frame = alice_key.encrypt(b"post-rotation").unwrap();
        assert!(matches!(bob_copy.decrypt(&frame), Err(CryptoError::DistributionMismatch)));
    }

    #[test]
    fn skdm_seal_roundtrip() {
        let recipient_secret = StaticSecret::random_from_rng(rand::rngs::OsRng);
        let recipient_pub = *X25519Public::from(&recipient_secret).as_bytes();

        let key = OwnSenderKey::generate();
        let payload = key.distribution_payload();
        let sealed = seal_distribution(&recipient_pub, &payload).unwrap();
        let opened = open_distribution(&recipient_secret, &sealed).unwrap();
        assert_eq!(opened, payload);
    }
}
