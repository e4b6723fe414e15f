use std::path::PathBuf;

/// Store configuration: where the database lives, how far the ratchet and
/// sender-key catch-up windows may skip ahead, and how long the vault stays
/// unlocked without activity.
#[derive(Debug, Clone)]
pub struct StoreConfig {
    pub db_path: PathBuf,
    /// Forwarded to `dl_crypto` call sites that accept a skip bound override;
    /// defaults to `dl_crypto::MAX_SKIP`.
    pub max_skip: u32,
    pub auto_lock_secs: u64,
}

impl StoreConfig {
    pub fn new(db_path: impl Into<PathBuf>) -> Self {
        Self {
            db_path: db_path.into(),
            max_skip: dl_crypto::MAX_SKIP,
            auto_lock_secs: 1800,
        }
    }
}
