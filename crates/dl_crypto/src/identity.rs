//! Identity keys and prekeys (C2).
//!
//! Each party has one long-term `IdentityKeyPair` (Ed25519), used both to
//! sign prekeys and — after conversion to X25519 — to participate in the
//! X3DH Diffie-Hellman set. Signed prekeys rotate periodically; one-time
//! prekeys are generated in batches and consumed once each.

use ed25519_dalek::{Signature, Signer, SigningKey, Verifier as _, VerifyingKey};
use rand::rngs::OsRng;
use serde::{Deserialize, Serialize};
use x25519_dalek::{PublicKey as X25519Public, StaticSecret};
use zeroize::{Zeroize, ZeroizeOnDrop};

use crate::error::CryptoError;

/// 32-byte Ed25519 public key.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PublicKeyBytes(pub [u8; 32]);

impl PublicKeyBytes {
    pub fn from_slice(bytes: &[u8]) -> Result<Self, CryptoError> {
        let arr: [u8; 32] = bytes
            .try_into()
            .map_err(|_| CryptoError::InvalidKey(format!("public key must be 32 bytes, got {}", bytes.len())))?;
        Ok(Self(arr))
    }

    /// Human-readable fingerprint: BLAKE3 of the public key, truncated to
    /// 20 bytes, hex-encoded in groups of 4 for manual safety-number
    /// comparison between two parties.
    pub fn fingerprint(&self) -> String {
        let hash = crate::hash::hash(&self.0);
        let hex = hex::encode(&hash[..20]);
        hex.chars()
            .collect::<Vec<_>>()
            .chunks(4)
            .map(|c| c.iter().collect::<String>())
            .collect::<Vec<_>>()
            .join(" ")
    }

    /// Numeric fingerprint for QR codes: 12 groups of 5 digits (60 digits),
    /// matching Signal's safety number format.
    pub fn numeric_fingerprint(&self) -> String {
        let hash = crate::hash::hash(&self.0);
        let mut groups = Vec::with_capacity(12);
        for i in 0..12 {
            // Take 2.5 bytes (20 bits) per group, mod 100000.
            let offset = i * 5 / 2;
            let val = if i % 2 == 0 {
                ((hash[offset] as u32) << 12) | ((hash[offset + 1] as u32) << 4) | ((hash[offset + 2] as u32) >> 4)
            } else {
                (((hash[offset] & 0x0F) as u32) << 16) | ((hash[offset + 1] as u32) << 8) | (hash[offset + 2] as u32)
            };
            groups.push(format!("{:05}", val % 100_000));
        }
        groups.join(" ")
    }

    /// Constant-time comparison of the two keys' fingerprints.
    pub fn fingerprints_match(&self, other: &PublicKeyBytes) -> bool {
        let h1 = crate::hash::hash(&self.0);
        let h2 = crate::hash::hash(&other.0);
        let mut diff = 0u8;
        for (a, b) in h1.iter().zip(h2.iter()) {
            diff |= a ^ b;
        }
        diff == 0
    }
}

/// Long-term identity signing key. Secret bytes zeroize on drop.
#[derive(ZeroizeOnDrop)]
pub struct IdentityKeyPair {
    #[zeroize(skip)]
    pub public: PublicKeyBytes,
    secret_bytes: [u8; 32],
}

impl IdentityKeyPair {
    pub fn generate() -> Self {
        let signing_key = SigningKey::generate(&mut OsRng);
        let public = PublicKeyBytes(signing_key.verifying_key().to_bytes());
        Self { public, secret_bytes: signing_key.to_bytes() }
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self, CryptoError> {
        let arr: [u8; 32] = bytes
            .try_into()
            .map_err(|_| CryptoError::InvalidKey(format!("identity key must be 32 bytes, got {}", bytes.len())))?;
        let signing_key = SigningKey::from_bytes(&arr);
        let public = PublicKeyBytes(signing_key.verifying_key().to_bytes());
        Ok(Self { public, secret_bytes: arr })
    }

    pub fn secret_bytes(&self) -> &[u8; 32] {
        &self.secret_bytes
    }

    fn signing_key(&self) -> SigningKey {
        SigningKey::from_bytes(&self.secret_bytes)
    }

    /// Sign arbitrary bytes, returning a 64-byte raw Ed25519 signature.
    pub fn sign(&self, msg: &[u8]) -> [u8; 64] {
        self.signing_key().sign(msg).to_bytes()
    }

    /// Verify a signature made by any Ed25519 public key.
    pub fn verify(public_bytes: &[u8; 32], msg: &[u8], sig_bytes: &[u8]) -> Result<(), CryptoError> {
        let vk = VerifyingKey::from_bytes(public_bytes).map_err(|e| CryptoError::InvalidKey(e.to_string()))?;
        let sig_arr: [u8; 64] = sig_bytes
            .try_into()
            .map_err(|_| CryptoError::InvalidKey("signature must be 64 bytes".into()))?;
        let sig = Signature::from_bytes(&sig_arr);
        vk.verify(msg, &sig).map_err(|_| CryptoError::BadSignature)
    }

    /// Convert this identity's secret to an X25519 static secret for X3DH,
    /// via the clamped SHA-512 expansion ed25519-dalek uses internally.
    pub fn to_x25519_secret(&self) -> StaticSecret {
        ed25519_secret_to_x25519(&self.secret_bytes)
    }

    /// Convert this identity's public key to an X25519 public key.
    pub fn to_x25519_public(&self) -> Result<X25519Public, CryptoError> {
        ed25519_pub_to_x25519(&self.public.0)
    }
}

/// Convert an Ed25519 signing secret to an X25519 static secret, using the
/// clamped SHA-512 expansion that ed25519-dalek uses internally.
pub fn ed25519_secret_to_x25519(ed_secret: &[u8; 32]) -> StaticSecret {
    use sha2::{Digest, Sha512};
    let mut h = Sha512::digest(ed_secret);
    h[0] &= 248;
    h[31] &= 127;
    h[31] |= 64;
    let mut key = [0u8; 32];
    key.copy_from_slice(&h[..32]);
    h.as_mut_slice().zeroize();
    StaticSecret::from(key)
}

/// Convert an Ed25519 public key to an X25519 public key via the birational
/// map from the Edwards curve to Curve25519.
pub fn ed25519_pub_to_x25519(ed_pub: &[u8; 32]) -> Result<X25519Public, CryptoError> {
    use curve25519_dalek::edwards::CompressedEdwardsY;
    let compressed = CompressedEdwardsY(*ed_pub);
    let point = compressed
        .decompress()
        .ok_or_else(|| CryptoError::InvalidKey("Ed25519 public key decompression failed".into()))?;
    Ok(X25519Public::from(point.to_montgomery().to_bytes()))
}

/// A signed prekey: an X25519 keypair whose public half is signed by the
/// owning identity key, plus the detached signature.
pub struct SignedPrekey {
    pub secret: StaticSecret,
    pub public: X25519Public,
    pub signature: [u8; 64],
}

/// Generate a signed prekey for `identity`.
pub fn generate_signed_prekey(identity: &IdentityKeyPair) -> SignedPrekey {
    let secret = StaticSecret::random_from_rng(OsRng);
    let public = X25519Public::from(&secret);
    let signature = identity.sign(public.as_bytes());
    SignedPrekey { secret, public, signature }
}

/// Generate `count` one-time prekeys (X25519). Each is consumed once by an
/// initiator and then discarded by the responder.
pub fn generate_one_time_prekeys(count: usize) -> Vec<(StaticSecret, X25519Public)> {
    (0..count)
        .map(|_| {
            let s = StaticSecret::random_from_rng(OsRng);
            let p = X25519Public::from(&s);
            (s, p)
        })
        .collect()
}
