//! Encrypted backup codec (C7).
//!
//! The backup payload is a versioned snapshot of identity, prekeys, sessions
//! and sender keys, serialized as JSON and sealed with a passphrase-derived
//! key using a secretbox-style XSalsa20-Poly1305 AEAD (distinct from the
//! XChaCha20-Poly1305 used for live traffic, matching the source format's
//! choice of primitive for this one offline artifact).
//!
//! Every binary field in the decrypted document is base64 text, so the
//! backup is a plain JSON document once unsealed — easy to inspect or
//! migrate by hand if the in-memory types ever change shape.

use base32::Alphabet;
use base64::{engine::general_purpose::STANDARD, Engine as _};
use rand::RngCore;
use serde::{Deserialize, Serialize};
use x25519_dalek::{PublicKey as X25519Public, StaticSecret};
use xsalsa20poly1305::{
    aead::{Aead, KeyInit},
    Nonce, XSalsa20Poly1305,
};

use crate::{
    error::CryptoError,
    identity::{IdentityKeyPair, SignedPrekey},
    kdf,
    ratchet::SessionSnapshot,
    sender_key::{OwnSenderKey, ReceivedSenderKey},
};

pub const BACKUP_VERSION: u32 = 1;

fn b64(bytes: &[u8]) -> String {
    STANDARD.encode(bytes)
}

fn unb64(s: &str) -> Result<Vec<u8>, CryptoError> {
    STANDARD.decode(s).map_err(CryptoError::Base64Decode)
}

fn unb64_array<const N: usize>(s: &str, what: &str) -> Result<[u8; N], CryptoError> {
    let bytes = unb64(s)?;
    bytes
        .try_into()
        .map_err(|_| CryptoError::Malformed(format!("{what} must be {N} bytes")))
}

#[derive(Serialize, Deserialize)]
pub struct IdentitySnapshot {
    pub public_key: String,
    pub private_key: String,
}

impl IdentitySnapshot {
    pub fn capture(identity: &IdentityKeyPair) -> Self {
        Self { public_key: b64(&identity.public.0), private_key: b64(identity.secret_bytes()) }
    }

    pub fn restore(&self) -> Result<IdentityKeyPair, CryptoError> {
        let secret = unb64(&self.private_key)?;
        IdentityKeyPair::from_bytes(&secret)
    }
}

#[derive(Serialize, Deserialize)]
pub struct SignedPrekeySnapshot {
    pub public_key: String,
    pub private_key: String,
    pub signature: String,
}

impl SignedPrekeySnapshot {
    pub fn capture(spk: &SignedPrekey) -> Self {
        Self {
            public_key: b64(spk.public.as_bytes()),
            private_key: b64(&spk.secret.to_bytes()),
            signature: b64(&spk.signature),
        }
    }

    pub fn restore(&self) -> Result<SignedPrekey, CryptoError> {
        let secret: [u8; 32] = unb64_array(&self.private_key, "signed prekey secret")?;
        let public: [u8; 32] = unb64_array(&self.public_key, "signed prekey public")?;
        let signature: [u8; 64] = unb64_array(&self.signature, "signed prekey signature")?;
        Ok(SignedPrekey {
            secret: StaticSecret::from(secret),
            public: X25519Public::from(public),
            signature,
        })
    }
}

/// A ratchet session, captured as base64 of its own JSON serialization
/// rather than hand-duplicated fields — the session snapshot's shape is
/// owned by `ratchet`, not by the backup format.
#[derive(Serialize, Deserialize)]
pub struct SessionSnapshotEntry(String);

impl SessionSnapshotEntry {
    pub fn capture(snapshot: &SessionSnapshot) -> Result<Self, CryptoError> {
        Ok(Self(b64(&serde_json::to_vec(snapshot)?)))
    }

    pub fn restore(&self) -> Result<SessionSnapshot, CryptoError> {
        let bytes = unb64(&self.0)?;
        Ok(serde_json::from_slice(&bytes)?)
    }
}

#[derive(Serialize, Deserialize)]
pub struct OwnSenderKeySnapshot(String);

impl OwnSenderKeySnapshot {
    pub fn capture(key: &OwnSenderKey) -> Result<Self, CryptoError> {
        Ok(Self(b64(&serde_json::to_vec(key)?)))
    }

    pub fn restore(&self) -> Result<OwnSenderKey, CryptoError> {
        let bytes = unb64(&self.0)?;
        Ok(serde_json::from_slice(&bytes)?)
    }
}

#[derive(Serialize, Deserialize)]
pub struct ReceivedSenderKeySnapshot(String);

impl ReceivedSenderKeySnapshot {
    pub fn capture(key: &ReceivedSenderKey) -> Result<Self, CryptoError> {
        Ok(Self(b64(&serde_json::to_vec(key)?)))
    }

    pub fn restore(&self) -> Result<ReceivedSenderKey, CryptoError> {
        let bytes = unb64(&self.0)?;
        Ok(serde_json::from_slice(&bytes)?)
    }
}

/// The full backup document (§3, §4.7).
#[derive(Serialize, Deserialize)]
pub struct BackupPayload {
    pub version: u32,
    pub identity: IdentitySnapshot,
    pub signed_prekey: SignedPrekeySnapshot,
    pub sessions: std::collections::HashMap<String, SessionSnapshotEntry>,
    pub my_sender_keys: std::collections::HashMap<String, OwnSenderKeySnapshot>,
    pub received_sender_keys: std::collections::HashMap<String, ReceivedSenderKeySnapshot>,
    pub distributed_channels: Vec<String>,
    pub channel_peer_map: std::collections::HashMap<String, String>,
    pub timestamp: String,
}

/// The three values that must be persisted together for restore.
pub struct SealedBackup {
    pub ciphertext: Vec<u8>,
    pub nonce: [u8; 24],
    pub salt: [u8; 16],
}

/// Encrypt a serialized backup payload under a passphrase.
pub fn encrypt(payload: &BackupPayload, passphrase: &[u8]) -> Result<SealedBackup, CryptoError> {
    if payload.version != BACKUP_VERSION {
        return Err(CryptoError::UnknownVersion(payload.version));
    }
    let plaintext = serde_json::to_vec(payload)?;

    let salt = kdf::generate_salt();
    let key = kdf::derive_key_argon2id(passphrase, &salt)?;

    let mut nonce_bytes = [0u8; 24];
    rand::rngs::OsRng.fill_bytes(&mut nonce_bytes);
    let nonce = Nonce::from_slice(&nonce_bytes);

    let cipher = XSalsa20Poly1305::new_from_slice(&key.0).map_err(|_| CryptoError::InvalidKey("backup key".into()))?;
    let ciphertext = cipher.encrypt(nonce, plaintext.as_ref()).map_err(|_| CryptoError::BadPassphrase)?;

    Ok(SealedBackup { ciphertext, nonce: nonce_bytes, salt })
}

/// Decrypt a sealed backup. A tag-check failure is the only authentication
/// signal and surfaces as `BadPassphrase` — there is no separate password
/// check performed beforehand.
pub fn decrypt(sealed: &SealedBackup, passphrase: &[u8]) -> Result<BackupPayload, CryptoError> {
    let key = kdf::derive_key_argon2id(passphrase, &sealed.salt)?;
    let nonce = Nonce::from_slice(&sealed.nonce);

    let cipher = XSalsa20Poly1305::new_from_slice(&key.0).map_err(|_| CryptoError::InvalidKey("backup key".into()))?;
    let plaintext = cipher.decrypt(nonce, sealed.ciphertext.as_ref()).map_err(|_| CryptoError::BadPassphrase)?;

    let payload: BackupPayload = serde_json::from_slice(&plaintext)?;
    if payload.version != BACKUP_VERSION {
        return Err(CryptoError::UnknownVersion(payload.version));
    }
    Ok(payload)
}

/// Generate a recovery key: 20 bytes of entropy encoded as base32 in five-
/// character groups separated by hyphens (32 characters, 160 bits). Usable
/// as an alternative passphrase input to the same Argon2id derivation.
pub fn generate_recovery_key() -> String {
    let mut entropy = [0u8; 20];
    rand::rngs::OsRng.fill_bytes(&mut entropy);
    let encoded = base32::encode(Alphabet::Rfc4648 { padding: false }, &entropy);
    encoded
        .as_bytes()
        .chunks(5)
        .map(|c| std::str::from_utf8(c).unwrap())
        .collect::<Vec<_>>()
        .join("-")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::identity::generate_signed_prekey;

    fn sample_payload() -> BackupPayload {
        let identity = IdentityKeyPair::generate();
        let spk = generate_signed_prekey(&identity);
        let own_key = OwnSenderKey::generate();

        let mut my_sender_keys = std::collections::HashMap::new();
        my_sender_keys.insert("general".to_string(), OwnSenderKeySnapshot::capture(&own_key).unwrap());

        BackupPayload {
            version: BACKUP_VERSION,
            identity: IdentitySnapshot::capture(&identity),
            signed_prekey: SignedPrekeySnapshot::capture(&spk),
            sessions: Default::default(),
            my_sender_keys,
            received_sender_keys: Default::default(),
            distributed_channels: vec!["general".into()],
            channel_peer_map: Default::default(),
            timestamp: "2026-01-01T00:00:00Z".into(),
        }
    }

    #[test]
    fn roundtrip_with_correct_passphrase() {
        let payload = sample_payload();
        let sealed = encrypt(&payload, b"correct horse battery staple").unwrap();
        let restored = decrypt(&sealed, b"correct horse battery staple").unwrap();
        assert_eq!(restored.distributed_channels, payload.distributed_channels);

        let identity = restored.identity.restore().unwrap();
        assert_eq!(identity.public.0, payload.identity.restore().unwrap().public.0);

        let mut own_key = restored.my_sender_keys.get("general").unwrap().restore().unwrap();
        assert_eq!(own_key.distribution_payload().len(), 52);
        assert!(own_key.encrypt(b"hi").is_ok());
    }

    #[test]
    fn wrong_passphrase_fails_closed() {
        let payload = sample_payload();
        let sealed = encrypt(&payload, b"right phrase").unwrap();
        assert!(matches!(decrypt(&sealed, b"wrong phrase"), Err(CryptoError::BadPassphrase)));
    }

    #[test]
    fn recovery_key_has_expected_shape() {
        let key = generate_recovery_key();
        let without_hyphens: String = key.chars().filter(|c| *c != '-').collect();
        assert_eq!(without_hyphens.len(), 32);
        assert!(key.contains('-'));
    }
}
