use thiserror::Error;

/// The crate's error taxonomy. Each variant has a distinct surface per the
/// propagation policy: `DecryptFailure` and `TooManySkipped` leave session
/// state unchanged and drop only the offending message; `BadSignature`,
/// `Malformed`, and `UnknownVersion` are terminal for that input.
#[derive(Debug, Error)]
pub enum CryptoError {
    /// Operation requires a chain that has not been derived yet.
    #[error("chain not initialized")]
    NotInitialized,

    /// Signed prekey's signature does not verify against the identity key.
    #[error("signed prekey signature does not verify")]
    BadSignature,

    /// AEAD tag check failed.
    #[error("AEAD authentication failed")]
    DecryptFailure,

    /// Skip distance exceeds `MAX_SKIP`.
    #[error("skip distance exceeds {0} keys")]
    TooManySkipped(u32),

    /// Inbound group frame's chain index is at or behind the stored index.
    #[error("group frame chain index {frame} is not ahead of stored index {stored}")]
    Replay { frame: u32, stored: u32 },

    /// Group frame's distribution id differs from the installed received key.
    #[error("distribution id mismatch")]
    DistributionMismatch,

    /// Backup AEAD tag check failed.
    #[error("incorrect passphrase")]
    BadPassphrase,

    /// Backup version tag is not the one this crate understands.
    #[error("unknown backup version {0}")]
    UnknownVersion(u32),

    /// Wire bytes are too short, or an unknown leading type byte was seen.
    #[error("malformed input: {0}")]
    Malformed(String),

    /// Inbound pairwise ciphertext for a peer with no session and no
    /// reachable prekey bundle.
    #[error("no session for peer")]
    NoSession,

    /// A key did not have the expected length or internal structure.
    #[error("invalid key material: {0}")]
    InvalidKey(String),

    /// HKDF/Argon2id could not produce the requested output.
    #[error("key derivation failed: {0}")]
    KeyDerivation(String),

    #[error("base64 decode error: {0}")]
    Base64Decode(#[from] base64::DecodeError),

    #[error("base32 decode error")]
    Base32Decode,

    #[error("hex decode error: {0}")]
    HexDecode(#[from] hex::FromHexError),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}
