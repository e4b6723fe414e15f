use thiserror::Error;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("vault is locked — unlock with a passphrase first")]
    VaultLocked,

    #[error(transparent)]
    Crypto(#[from] dl_crypto::CryptoError),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("record not found: {0}")]
    NotFound(String),
}

impl From<StoreError> for dl_proto::ProtoError {
    fn from(e: StoreError) -> Self {
        match e {
            StoreError::Crypto(c) => dl_proto::ProtoError::Crypto(c),
            other => dl_proto::ProtoError::Store(other.to_string()),
        }
    }
}
