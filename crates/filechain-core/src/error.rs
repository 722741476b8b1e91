use std::path::PathBuf;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum CryptoError {
    /// The trailing pad byte cannot describe a valid padding run. Almost
    /// always a wrong password or a corrupted blob.
    #[error("padding invalid (wrong password or corrupted ciphertext)")]
    PaddingInvalid,

    #[error("ciphertext length {0} is not a positive multiple of the AES block size")]
    CiphertextLength(usize),

    #[error("encrypted blob too short: {0} bytes")]
    BlobTooShort(usize),

    #[error("invalid key material: {0}")]
    InvalidKeyMaterial(String),
}

#[derive(Debug, Error)]
pub enum LedgerError {
    #[error("ledger io: {0}")]
    Io(#[from] std::io::Error),

    #[error("ledger corrupt: {0}")]
    Corrupt(String),

    #[error("ledger serialisation: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("file id \"genesis\" is reserved for the root block")]
    ReservedFileId,

    #[error("difficulty {0} exceeds maximum {max}", max = crate::ledger::MAX_DIFFICULTY)]
    DifficultyTooHigh(usize),
}

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("file id not found: {0}")]
    NotFound(String),

    #[error("encrypted blob missing: {}", .0.display())]
    BlobMissing(PathBuf),

    #[error("path has no file name: {}", .0.display())]
    InvalidPath(PathBuf),

    #[error("metadata index corrupt: {0}")]
    MetadataCorrupt(String),

    #[error("invalid settings: {0}")]
    InvalidSettings(String),

    #[error(transparent)]
    Crypto(#[from] CryptoError),

    #[error(transparent)]
    Ledger(#[from] LedgerError),

    #[error("io: {0}")]
    Io(#[from] std::io::Error),

    #[error("serialisation: {0}")]
    Serialization(#[from] serde_json::Error),
}

pub type Result<T, E = StoreError> = std::result::Result<T, E>;
