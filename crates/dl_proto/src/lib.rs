//! dl_proto — the envelope dispatcher (C8): classifies inbound bytes by a
//! leading type byte and routes them to the pairwise ratchet, the
//! sender-key installer, or the group decrypt path.
//!
//! # Module layout
//! - `dispatcher` — classification and routing of inbound/outbound bytes
//! - `store`      — the session/key-store interface the dispatcher depends on
//! - `error`      — the crate's error taxonomy

pub mod dispatcher;
pub mod error;
pub mod store;

pub use dispatcher::{DispatchOutcome, Dispatcher, OwnSenderKeyHandle, PrekeyInventory, PrekeySource};
pub use error::ProtoError;
pub use store::SessionStore;
