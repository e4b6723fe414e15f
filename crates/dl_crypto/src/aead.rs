//! The core's single AEAD (§4.1): XChaCha20-Poly1305, 24-byte random
//! nonces, 16-byte tags.
//!
//! Wire format: `[ nonce (24 bytes) | ciphertext + tag ]`.

use chacha20poly1305::{
    aead::{Aead, AeadCore, KeyInit, OsRng as AeadOsRng},
    XChaCha20Poly1305,
};
use zeroize::Zeroizing;

use crate::error::CryptoError;

/// Encrypt `plaintext` with a 32-byte key, prepending a random 24-byte nonce.
/// `aad` is authenticated but not encrypted.
pub fn encrypt(key: &[u8; 32], plaintext: &[u8], aad: &[u8]) -> Result<Vec<u8>, CryptoError> {
    let cipher =
        XChaCha20Poly1305::new_from_slice(key).map_err(|_| CryptoError::InvalidKey("AEAD key".into()))?;

    let nonce = XChaCha20Poly1305::generate_nonce(&mut AeadOsRng);

    let ciphertext = cipher
        .encrypt(&nonce, chacha20poly1305::aead::Payload { msg: plaintext, aad })
        .map_err(|_| CryptoError::DecryptFailure)?;

    let mut out = Vec::with_capacity(24 + ciphertext.len());
    out.extend_from_slice(&nonce);
    out.extend_from_slice(&ciphertext);
    Ok(out)
}

/// Decrypt wire-format bytes (nonce || ciphertext+tag).
pub fn decrypt(key: &[u8; 32], data: &[u8], aad: &[u8]) -> Result<Zeroizing<Vec<u8>>, CryptoError> {
    if data.len() < 24 {
        return Err(CryptoError::Malformed("ciphertext shorter than nonce".into()));
    }
    let (nonce_bytes, ct) = data.split_at(24);
    let nonce = chacha20poly1305::XNonce::from_slice(nonce_bytes);

    let cipher =
        XChaCha20Poly1305::new_from_slice(key).map_err(|_| CryptoError::InvalidKey("AEAD key".into()))?;

    let plaintext = cipher
        .decrypt(nonce, chacha20poly1305::aead::Payload { msg: ct, aad })
        .map_err(|_| CryptoError::DecryptFailure)?;

    Ok(Zeroizing::new(plaintext))
}

/// Encrypt/decrypt a single message using the same AEAD and a fresh random
/// nonce, with the message key supplied by the ratchet or sender-key chain
/// and the header bytes as associated data. Thin naming wrapper over
/// `encrypt`/`decrypt` used by `ratchet` and `sender_key` so their call
/// sites read as "seal this message key" rather than "encrypt generically".
pub fn seal(message_key: &[u8; 32], plaintext: &[u8], ad: &[u8]) -> Result<Vec<u8>, CryptoError> {
    encrypt(message_key, plaintext, ad)
}

pub fn open(message_key: &[u8; 32], sealed: &[u8], ad: &[u8]) -> Result<Zeroizing<Vec<u8>>, CryptoError> {
    decrypt(message_key, sealed, ad)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn roundtrip() {
        let key = [9u8; 32];
        let ct = encrypt(&key, b"hello", b"ad").unwrap();
        let pt = decrypt(&key, &ct, b"ad").unwrap();
        assert_eq!(&pt[..], b"hello");
    }

    #[test]
    fn wrong_key_fails() {
        let key = [9u8; 32];
        let other = [8u8; 32];
        let ct = encrypt(&key, b"hello", b"ad").unwrap();
        assert!(decrypt(&other, &ct, b"ad").is_err());
    }

    #[test]
    fn wrong_ad_fails() {
        let key = [9u8; 32];
        let ct = encrypt(&key, b"hello", b"ad-a").unwrap();
        assert!(decrypt(&key, &ct, b"ad-b").is_err());
    }
}
