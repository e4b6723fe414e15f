use thiserror::Error;

/// The dispatcher's error taxonomy. Most variants simply forward the
/// underlying `CryptoError`; the dispatcher adds only the routing-layer
/// failures that have no equivalent inside `dl_crypto`.
#[derive(Debug, Error)]
pub enum ProtoError {
    #[error(transparent)]
    Crypto(#[from] dl_crypto::CryptoError),

    /// Leading type byte did not match any known frame kind.
    #[error("unknown envelope type byte {0:#04x}")]
    UnknownType(u8),

    /// Envelope was empty.
    #[error("empty envelope")]
    Empty,

    /// The session/key store reported a failure during load or save.
    #[error("store error: {0}")]
    Store(String),

    /// Prekey bundle or local prekey inventory could not supply what the
    /// handshake needed.
    #[error("prekey unavailable: {0}")]
    PrekeyUnavailable(String),

    /// An inbound X3DH init header targeted a peer that already has an
    /// established session; callers must delete the existing session before
    /// re-initializing.
    #[error("a session already exists for peer {0}; delete it before re-initializing")]
    SessionAlreadyExists(String),
}
