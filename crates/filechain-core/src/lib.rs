//! filechain-core: password-encrypted file storage with a tamper-evident
//! hash-chained ledger of plaintext digests.
//!
//! - `crypto`     — PBKDF2 key derivation, AES-256-CBC, SHA-256 digests
//! - `blob`       — `salt || iv || ciphertext` blob layout
//! - `ledger`     — mined, hash-chained block ledger and per-file history
//! - `file_store` — store / retrieve / delete / list over blobs + metadata
//! - `settings`   — on-disk store configuration
//! - `paths`      — data directory resolution
//! - `error`      — typed error taxonomy

mod atomic;
pub mod blob;
pub mod crypto;
pub mod error;
pub mod file_store;
pub mod ledger;
pub mod paths;
pub mod settings;

pub use error::{CryptoError, LedgerError, StoreError};
pub use file_store::{
    AuditReport, FileAudit, FileDetails, FileStatus, FileStore, RetrievedFile, StoredFileRecord,
};
pub use ledger::{Block, HistoryEntry, Ledger};
pub use settings::StoreSettings;
