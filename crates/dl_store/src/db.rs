//! SQLite-backed store, via `rusqlite` (synchronous, per the store's
//! single-threaded-per-connection contract — callers share a `SqliteStore`
//! across threads via its internal mutex rather than pooling connections).
//!
//! # Encryption strategy
//! SQLite does not natively encrypt. Sensitive columns (identity secrets,
//! session state, sender-key chains) are stored as XChaCha20-Poly1305
//! ciphertext blobs under the vault key. Non-sensitive metadata (ids,
//! timestamps, distribution flags) is stored in plaintext to allow direct
//! queries.

use std::path::Path;
use std::sync::Mutex;

use rusqlite::{params, Connection, OptionalExtension};
use zeroize::Zeroizing;

use dl_crypto::ratchet::SessionSnapshot;
use dl_crypto::sender_key::{OwnSenderKey, ReceivedSenderKey};
use dl_proto::{ProtoError, SessionStore};

use crate::config::StoreConfig;
use crate::error::StoreError;
use crate::models::AccountRow;
use crate::vault::Vault;

const AEAD_CONTEXT: &[u8] = b"dl-store-v1";

const SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS accounts (
    id                   TEXT PRIMARY KEY,
    identity_pubkey      BLOB NOT NULL,
    identity_secret_enc  BLOB NOT NULL,
    signed_prekey_enc    BLOB NOT NULL,
    vault_salt           BLOB NOT NULL,
    created_at           INTEGER NOT NULL
);
CREATE TABLE IF NOT EXISTS sessions (
    peer_id      TEXT PRIMARY KEY,
    session_enc  BLOB NOT NULL,
    updated_at   INTEGER NOT NULL
);
CREATE TABLE IF NOT EXISTS own_sender_keys (
    channel_id  TEXT PRIMARY KEY,
    key_enc     BLOB NOT NULL
);
CREATE TABLE IF NOT EXISTS received_sender_keys (
    channel_id  TEXT NOT NULL,
    sender_id   TEXT NOT NULL,
    key_enc     BLOB NOT NULL,
    PRIMARY KEY (channel_id, sender_id)
);
CREATE TABLE IF NOT EXISTS distributed_channels (
    channel_id  TEXT PRIMARY KEY
);
CREATE TABLE IF NOT EXISTS channel_peers (
    channel_id  TEXT PRIMARY KEY,
    peer_id     TEXT NOT NULL
);
";

/// Central store handle. Holds one connection behind a mutex — rusqlite
/// connections aren't `Sync`, and WAL mode lets readers and the single
/// writer coexist without contention in practice.
pub struct SqliteStore {
    conn: Mutex<Connection>,
    vault: Vault,
    max_skip: u32,
}

impl SqliteStore {
    /// Open (or create) the database at the configured path and initialize
    /// its schema. WAL journal mode and foreign-key enforcement are set at
    /// connection time, same as schema creation — SQLite forbids changing
    /// `journal_mode` inside a transaction, so this must not be wrapped in
    /// one.
    pub fn open(config: &StoreConfig, vault: Vault) -> Result<Self, StoreError> {
        let conn = Self::open_connection(&config.db_path)?;
        conn.execute_batch(SCHEMA)?;
        Ok(Self { conn: Mutex::new(conn), vault, max_skip: config.max_skip })
    }

    fn open_connection(db_path: &Path) -> Result<Connection, StoreError> {
        let conn = Connection::open(db_path)?;
        conn.pragma_update(None, "journal_mode", "WAL")?;
        conn.pragma_update(None, "foreign_keys", true)?;
        Ok(conn)
    }

    pub fn max_skip(&self) -> u32 {
        self.max_skip
    }

    // ── Vault-backed helpers ────────────────────────────────────────────

    pub fn encrypt_value(&self, plaintext: &[u8]) -> Result<Vec<u8>, StoreError> {
        self.vault.with_key(|key| {
            dl_crypto::aead::encrypt(key, plaintext, AEAD_CONTEXT).map_err(StoreError::Crypto)
        })
    }

    pub fn decrypt_value(&self, ciphertext: &[u8]) -> Result<Zeroizing<Vec<u8>>, StoreError> {
        self.vault.with_key(|key| {
            dl_crypto::aead::decrypt(key, ciphertext, AEAD_CONTEXT).map_err(StoreError::Crypto)
        })
    }

    // ── Accounts ────────────────────────────────────────────────────────

    pub fn save_account(&self, row: &AccountRow) -> Result<(), StoreError> {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "INSERT INTO accounts (id, identity_pubkey, identity_secret_enc, signed_prekey_enc, vault_salt, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)
             ON CONFLICT(id) DO UPDATE SET
                identity_pubkey = excluded.identity_pubkey,
                identity_secret_enc = excluded.identity_secret_enc,
                signed_prekey_enc = excluded.signed_prekey_enc,
                vault_salt = excluded.vault_salt",
            params![
                row.id,
                row.identity_pubkey,
                row.identity_secret_enc,
                row.signed_prekey_enc,
                row.vault_salt,
                row.created_at,
            ],
        )?;
        Ok(())
    }

    pub fn load_account(&self, id: &str) -> Result<Option<AccountRow>, StoreError> {
        let conn = self.conn.lock().unwrap();
        conn.query_row(
            "SELECT id, identity_pubkey, identity_secret_enc, signed_prekey_enc, vault_salt, created_at
             FROM accounts WHERE id = ?1",
            params![id],
            |r| {
                Ok(AccountRow {
                    id: r.get(0)?,
                    identity_pubkey: r.get(1)?,
                    identity_secret_enc: r.get(2)?,
                    signed_prekey_enc: r.get(3)?,
                    vault_salt: r.get(4)?,
                    created_at: r.get(5)?,
                })
            },
        )
        .optional()
        .map_err(StoreError::from)
    }
}

/// Serialize, vault-encrypt, and persist with a monotonic `updated_at`; and
/// the reverse for reads. Kept as free functions so `SessionStore`'s trait
/// methods stay a thin dispatch over them.
fn to_enc_blob(store: &SqliteStore, value: &impl serde::Serialize) -> Result<Vec<u8>, StoreError> {
    let json = serde_json::to_vec(value)?;
    store.encrypt_value(&json)
}

fn from_enc_blob<T: serde::de::DeserializeOwned>(store: &SqliteStore, blob: &[u8]) -> Result<T, StoreError> {
    let plaintext = store.decrypt_value(blob)?;
    Ok(serde_json::from_slice(&plaintext)?)
}

impl SessionStore for SqliteStore {
    fn load_session(&self, peer_id: &str) -> Result<Option<SessionSnapshot>, ProtoError> {
        let blob: Option<Vec<u8>> = {
            let conn = self.conn.lock().unwrap();
            conn.query_row(
                "SELECT session_enc FROM sessions WHERE peer_id = ?1",
                params![peer_id],
                |r| r.get(0),
            )
            .optional()
            .map_err(StoreError::from)?
        };
        match blob {
            Some(b) => Ok(Some(from_enc_blob(self, &b)?)),
            None => Ok(None),
        }
    }

    fn save_session(&self, peer_id: &str, snapshot: SessionSnapshot) -> Result<(), ProtoError> {
        let blob = to_enc_blob(self, &snapshot)?;
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "INSERT INTO sessions (peer_id, session_enc, updated_at) VALUES (?1, ?2, 0)
             ON CONFLICT(peer_id) DO UPDATE SET session_enc = excluded.session_enc, updated_at = sessions.updated_at + 1",
            params![peer_id, blob],
        )
        .map_err(StoreError::from)?;
        Ok(())
    }

    fn delete_session(&self, peer_id: &str) -> Result<(), ProtoError> {
        let conn = self.conn.lock().unwrap();
        conn.execute("DELETE FROM sessions WHERE peer_id = ?1", params![peer_id])
            .map_err(StoreError::from)?;
        Ok(())
    }

    fn load_own_sender_key(&self, channel_id: &str) -> Result<Option<OwnSenderKey>, ProtoError> {
        let blob: Option<Vec<u8>> = {
            let conn = self.conn.lock().unwrap();
            conn.query_row(
                "SELECT key_enc FROM own_sender_keys WHERE channel_id = ?1",
                params![channel_id],
                |r| r.get(0),
            )
            .optional()
            .map_err(StoreError::from)?
        };
        match blob {
            Some(b) => Ok(Some(from_enc_blob(self, &b)?)),
            None => Ok(None),
        }
    }

    fn save_own_sender_key(&self, channel_id: &str, key: &OwnSenderKey) -> Result<(), ProtoError> {
        let blob = to_enc_blob(self, key)?;
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "INSERT INTO own_sender_keys (channel_id, key_enc) VALUES (?1, ?2)
             ON CONFLICT(channel_id) DO UPDATE SET key_enc = excluded.key_enc",
            params![channel_id, blob],
        )
        .map_err(StoreError::from)?;
        Ok(())
    }

    fn load_received_sender_key(
        &self,
        channel_id: &str,
        sender_id: &str,
    ) -> Result<Option<ReceivedSenderKey>, ProtoError> {
        let blob: Option<Vec<u8>> = {
            let conn = self.conn.lock().unwrap();
            conn.query_row(
                "SELECT key_enc FROM received_sender_keys WHERE channel_id = ?1 AND sender_id = ?2",
                params![channel_id, sender_id],
                |r| r.get(0),
            )
            .optional()
            .map_err(StoreError::from)?
        };
        match blob {
            Some(b) => Ok(Some(from_enc_blob(self, &b)?)),
            None => Ok(None),
        }
    }

    fn save_received_sender_key(
        &self,
        channel_id: &str,
        sender_id: &str,
        key: &ReceivedSenderKey,
    ) -> Result<(), ProtoError> {
        let blob = to_enc_blob(self, key)?;
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "INSERT INTO received_sender_keys (channel_id, sender_id, key_enc) VALUES (?1, ?2, ?3)
             ON CONFLICT(channel_id, sender_id) DO UPDATE SET key_enc = excluded.key_enc",
            params![channel_id, sender_id, blob],
        )
        .map_err(StoreError::from)?;
        Ok(())
    }

    fn is_distributed(&self, channel_id: &str) -> Result<bool, ProtoError> {
        let conn = self.conn.lock().unwrap();
        let found: Option<String> = conn
            .query_row(
                "SELECT channel_id FROM distributed_channels WHERE channel_id = ?1",
                params![channel_id],
                |r| r.get(0),
            )
            .optional()
            .map_err(StoreError::from)?;
        Ok(found.is_some())
    }

    fn mark_distributed(&self, channel_id: &str) -> Result<(), ProtoError> {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "INSERT OR IGNORE INTO distributed_channels (channel_id) VALUES (?1)",
            params![channel_id],
        )
        .map_err(StoreError::from)?;
        Ok(())
    }

    fn peer_for_channel(&self, channel_id: &str) -> Result<Option<String>, ProtoError> {
        let conn = self.conn.lock().unwrap();
        conn.query_row(
            "SELECT peer_id FROM channel_peers WHERE channel_id = ?1",
            params![channel_id],
            |r| r.get(0),
        )
        .optional()
        .map_err(StoreError::from)
        .map_err(ProtoError::from)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn open_unlocked(path: &Path) -> SqliteStore {
        let vault = Vault::new();
        let salt = crate::vault::new_vault_salt();
        vault.unlock(b"hunter2", &salt).unwrap();
        SqliteStore::open(&StoreConfig::new(path), vault).unwrap()
    }

    #[test]
    fn session_roundtrips_through_encryption() {
        let dir = tempfile::tempdir().unwrap();
        let store = open_unlocked(&dir.path().join("test.db"));

        let (_ident_a, snapshot) = {
            let ident_a = dl_crypto::identity::IdentityKeyPair::generate();
            let ident_b = dl_crypto::identity::IdentityKeyPair::generate();
            let spk_b = dl_crypto::identity::generate_signed_prekey(&ident_b);
            let bundle = dl_crypto::x3dh::PrekeyBundle {
                ik_pub: ident_b.public.0,
                spk_pub: *spk_b.public.as_bytes(),
                spk_sig: spk_b.signature,
                opk_pub: None,
            };
            let x3dh = dl_crypto::x3dh::initiate(&ident_a, &bundle).unwrap();
            let session = dl_crypto::ratchet::Session::init_initiator(
                x3dh.shared_secret,
                x3dh.associated_data,
                bundle.spk_pub,
            )
            .unwrap();
            (ident_a, session.to_snapshot())
        };

        store.save_session("bob", snapshot.clone()).unwrap();
        let loaded = store.load_session("bob").unwrap().unwrap();
        assert_eq!(
            serde_json::to_vec(&loaded).unwrap(),
            serde_json::to_vec(&snapshot).unwrap()
        );
    }

    #[test]
    fn distribution_flag_persists() {
        let dir = tempfile::tempdir().unwrap();
        let store = open_unlocked(&dir.path().join("test.db"));
        assert!(!store.is_distributed("general").unwrap());
        store.mark_distributed("general").unwrap();
        assert!(store.is_distributed("general").unwrap());
    }

    #[test]
    fn account_roundtrips() {
        let dir = tempfile::tempdir().unwrap();
        let store = open_unlocked(&dir.path().join("test.db"));
        let row = AccountRow {
            id: "alice".into(),
            identity_pubkey: vec![1; 32],
            identity_secret_enc: store.encrypt_value(&[2; 32]).unwrap(),
            signed_prekey_enc: store.encrypt_value(&[3; 96]).unwrap(),
            vault_salt: vec![4; 16],
            created_at: 0,
        };
        store.save_account(&row).unwrap();
        let loaded = store.load_account("alice").unwrap().unwrap();
        assert_eq!(loaded.identity_pubkey, row.identity_pubkey);
    }
}
