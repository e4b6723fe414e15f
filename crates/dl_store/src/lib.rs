//! dl_store — encrypted local database for session and key material.
//!
//! # Encryption strategy
//! SQLite does not natively encrypt. Sensitive columns (identity secrets,
//! ratchet sessions, sender-key chains) are stored as XChaCha20-Poly1305
//! ciphertext. The vault key is derived from the user's passphrase via
//! Argon2id and held in memory only while the vault is unlocked.
//!
//! # Synchronous contract
//! Every public method here is synchronous: `rusqlite` and `parking_lot`
//! replace the teacher's async `sqlx`/`tokio` stack because this crate is
//! meant to be called from both native UI event loops and from contexts
//! with no async runtime already running.

pub mod config;
pub mod db;
pub mod error;
pub mod memory;
pub mod models;
pub mod vault;

pub use config::StoreConfig;
pub use db::SqliteStore;
pub use error::StoreError;
pub use memory::MemoryStore;
pub use vault::Vault;
