//! Key derivation: Argon2id for passphrase-derived keys, HKDF-SHA256 for the
//! ratchet's root-key and chain-key steps.
//!
//! The root-key and chain-key derivations are kept as two distinct HKDF
//! calls with different info strings so that leaking a chain key never
//! reveals the next root key, and a message key can never be extended back
//! into a chain (§4.1).

use argon2::{Argon2, Params, Version};
use hkdf::Hkdf;
use sha2::Sha256;
use zeroize::ZeroizeOnDrop;

use crate::error::CryptoError;

/// A 32-byte key derived from a user passphrase. Zeroized on drop.
#[derive(ZeroizeOnDrop)]
pub struct PassphraseKey(pub [u8; 32]);

/// Argon2id parameters: 64 MiB memory, 3 iterations, 1 degree of parallelism.
pub fn argon2_params() -> Params {
    Params::new(64 * 1024, 3, 1, Some(32)).expect("static Argon2 params are always valid")
}

/// Derive a 32-byte key from a passphrase and 16-byte salt via Argon2id.
/// Used both for the local store's at-rest encryption key and for the
/// backup codec (§4.7).
pub fn derive_key_argon2id(passphrase: &[u8], salt: &[u8; 16]) -> Result<PassphraseKey, CryptoError> {
    let argon2 = Argon2::new(argon2::Algorithm::Argon2id, Version::V0x13, argon2_params());
    let mut output = [0u8; 32];
    argon2
        .hash_password_into(passphrase, salt, &mut output)
        .map_err(|e| CryptoError::KeyDerivation(e.to_string()))?;
    Ok(PassphraseKey(output))
}

/// Generate a fresh random 16-byte salt.
pub fn generate_salt() -> [u8; 16] {
    use rand::RngCore;
    let mut salt = [0u8; 16];
    rand::rngs::OsRng.fill_bytes(&mut salt);
    salt
}

/// Expand `ikm` into `output.len()` bytes of key material under `info`.
/// `salt` may be `None`, in which case HKDF uses an all-zero salt.
pub fn hkdf_expand(
    ikm: &[u8],
    salt: Option<&[u8]>,
    info: &[u8],
    output: &mut [u8],
) -> Result<(), CryptoError> {
    let hk = Hkdf::<Sha256>::new(salt, ikm);
    hk.expand(info, output)
        .map_err(|e| CryptoError::KeyDerivation(e.to_string()))
}

/// Root-key KDF (§4.1): `(root_key, dh_output) -> (new_root_key, chain_key)`.
/// Called once per new chain derived during a DH ratchet step — the caller
/// invokes it once for the receiving chain and once for the sending chain.
pub fn root_kdf(root_key: &[u8; 32], dh_output: &[u8]) -> Result<([u8; 32], [u8; 32]), CryptoError> {
    let hk = Hkdf::<Sha256>::new(Some(root_key), dh_output);
    let mut new_root = [0u8; 32];
    let mut chain_key = [0u8; 32];
    hk.expand(b"dl-ratchet-root", &mut new_root)
        .map_err(|e| CryptoError::KeyDerivation(e.to_string()))?;
    hk.expand(b"dl-ratchet-chain", &mut chain_key)
        .map_err(|e| CryptoError::KeyDerivation(e.to_string()))?;
    Ok((new_root, chain_key))
}

/// Chain-key KDF (§4.1): `chain_key -> (next_chain_key, message_key)`.
pub fn chain_kdf(chain_key: &[u8; 32]) -> Result<([u8; 32], [u8; 32]), CryptoError> {
    let hk = Hkdf::<Sha256>::new(Some(chain_key), b"dl-chain-step");
    let mut next_ck = [0u8; 32];
    let mut mk = [0u8; 32];
    hk.expand(b"next-chain-key", &mut next_ck)
        .map_err(|e| CryptoError::KeyDerivation(e.to_string()))?;
    hk.expand(b"message-key", &mut mk)
        .map_err(|e| CryptoError::KeyDerivation(e.to_string()))?;
    Ok((next_ck, mk))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn argon2id_is_deterministic_for_same_salt() {
        let salt = [7u8; 16];
        let a = derive_key_argon2id(b"correct-horse-battery-staple", &salt).unwrap();
        let b = derive_key_argon2id(b"correct-horse-battery-staple", &salt).unwrap();
        assert_eq!(a.0, b.0);
    }

    #[test]
    fn chain_kdf_advances_and_differs_from_message_key() {
        let ck = [1u8; 32];
        let (next_ck, mk) = chain_kdf(&ck).unwrap();
        assert_ne!(next_ck, ck);
        assert_ne!(next_ck, mk);
    }

    #[test]
    fn root_kdf_domain_separates_root_and_chain() {
        let root = [2u8; 32];
        let (new_root, chain) = root_kdf(&root, b"dh-output").unwrap();
        assert_ne!(new_root, chain);
        assert_ne!(new_root, root);
    }
}
