//! Row shapes for the identity table. Sessions and sender keys are stored
//! as opaque vault-encrypted blobs keyed by id (see `db.rs`); they don't
//! need typed row structs since their shape is owned by `dl_crypto`.

/// A single local identity: the long-term Ed25519 key, the signed prekey,
/// and the Argon2id salt used to unlock the vault protecting both.
#[derive(Debug, Clone)]
pub struct AccountRow {
    pub id: String,
    /// Raw 32-byte Ed25519 identity public key.
    pub identity_pubkey: Vec<u8>,
    /// Vault-encrypted Ed25519 identity secret key.
    pub identity_secret_enc: Vec<u8>,
    /// Vault-encrypted signed-prekey bundle (secret, public key, and
    /// signature, serialized together as one JSON blob before encryption).
    pub signed_prekey_enc: Vec<u8>,
    /// 16-byte Argon2id salt for vault key derivation. Not secret.
    pub vault_salt: Vec<u8>,
    pub created_at: i64,
}
