//! dl_crypto — the end-to-end cryptographic core.
//!
//! # Design principles
//! - No custom primitives; everything comes from audited Rust crates.
//! - Secret material zeroizes on drop.
//! - Entry points are synchronous; the only slow primitive is Argon2id,
//!   which callers should run off their UI thread.
//!
//! # Module layout
//! - `kdf`      — root-key / chain-key derivation, Argon2id (C1, part of C7)
//! - `aead`     — XChaCha20-Poly1305 wrapper with the wire nonce-prefix layout (C1)
//! - `identity` — identity keys, curve conversion, signed + one-time prekeys (C2)
//! - `x3dh`     — X3DH handshake (C3)
//! - `ratchet`  — Double Ratchet session (C4)
//! - `sender_key` — sender-key group engine and SKDM sealing (C5)
//! - `backup`   — encrypted backup codec and recovery-key generator (C7)
//! - `hash`     — BLAKE3 utilities shared by the modules above
//! - `error`    — the crate's error taxonomy

pub mod aead;
pub mod backup;
pub mod error;
pub mod hash;
pub mod identity;
pub mod kdf;
pub mod ratchet;
pub mod sender_key;
pub mod x3dh;

pub use error::CryptoError;

/// Maximum number of message keys a single direction may skip ahead before
/// the ratchet refuses to derive further keys. Shared by the Double Ratchet
/// skipped-key cache and the sender-key catch-up walk.
pub const MAX_SKIP: u32 = 256;
