//! Encrypted file store backed by the integrity ledger.
//!
//! Layout under the store root:
//!  - `blobs/<file_id>.enc`  – `salt || iv || AES-256-CBC ciphertext`
//!  - `file_metadata.json`   – index of [`StoredFileRecord`] keyed by file id
//!  - `ledger.json`          – the hash chain (owned by [`Ledger`])
//!
//! The blob and the metadata record are written before the ledger block is
//! appended. A crash in between leaves a file without ledger coverage; it
//! then retrieves as unverified and shows up as `UNLEDGERED` in [`FileStore::audit`].

use crate::atomic::write_atomic;
use crate::blob::EncryptedBlob;
use crate::crypto::{self, IV_LEN, SALT_LEN};
use crate::error::{Result, StoreError};
use crate::ledger::{HistoryEntry, Ledger};
use crate::paths;
use crate::settings::StoreSettings;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{info, warn};
use uuid::Uuid;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoredFileRecord {
    pub file_id: String,
    pub original_filename: String,
    pub encrypted_path: PathBuf,
    pub description: String,
    #[serde(rename = "timestamp")]
    pub created_at: DateTime<Utc>,
    #[serde(with = "base64_array")]
    pub salt: [u8; SALT_LEN],
    #[serde(with = "base64_array")]
    pub iv: [u8; IV_LEN],
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RetrievedFile {
    pub path: PathBuf,
    pub integrity_ok: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct FileDetails {
    pub record: StoredFileRecord,
    pub history: Vec<HistoryEntry>,
    pub blob_size: Option<u64>,
    pub integrity_tracked: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum FileStatus {
    Tracked,
    Unledgered,
    BlobMissing,
}

#[derive(Debug, Clone, Serialize)]
pub struct FileAudit {
    pub file_id: String,
    pub original_filename: String,
    pub status: FileStatus,
}

#[derive(Debug, Clone, Serialize)]
pub struct AuditReport {
    pub chain_valid: bool,
    pub files: Vec<FileAudit>,
}

type MetadataIndex = BTreeMap<String, StoredFileRecord>;

pub struct FileStore {
    root: PathBuf,
    blobs_root: PathBuf,
    index_path: PathBuf,
    ledger: Arc<Ledger>,
    index: Mutex<MetadataIndex>,
}

impl FileStore {
    /// Open (or initialise) the store at `root`, recording into `ledger`.
    pub fn open(
        root: impl AsRef<Path>,
        settings: &StoreSettings,
        ledger: Arc<Ledger>,
    ) -> Result<Self> {
        settings.validate()?;
        let root = root.as_ref().to_path_buf();
        let blobs_root = paths::blob_dir(&root, settings);
        let index_path = paths::index_path(&root, settings);
        fs::create_dir_all(&blobs_root)?;
        restrict_dir_permissions(&root);

        let index = if index_path.exists() {
            load_index(&index_path)?
        } else {
            let empty = MetadataIndex::new();
            persist_index(&index_path, &empty)?;
            empty
        };

        Ok(Self {
            root,
            blobs_root,
            index_path,
            ledger,
            index: Mutex::new(index),
        })
    }

    /// Open the ledger and the store together under `root`.
    pub fn open_with_settings(root: impl AsRef<Path>, settings: &StoreSettings) -> Result<Self> {
        let root = root.as_ref();
        settings.validate()?;
        fs::create_dir_all(root)?;
        let ledger = Ledger::open(paths::ledger_path(root, settings), settings.difficulty)?;
        Self::open(root, settings, Arc::new(ledger))
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn ledger(&self) -> &Arc<Ledger> {
        &self.ledger
    }

    /// Encrypt the file at `file_path` under `password`, record its plaintext
    /// digest in the ledger and return the new file id.
    pub fn store(&self, file_path: &Path, password: &[u8], description: &str) -> Result<String> {
        let original_filename = file_name_of(file_path)?;
        let plaintext = fs::read(file_path)?;
        let original_hash = crypto::hash(&plaintext);
        let blob = crypto::encrypt(&plaintext, password)?;

        let file_id = Uuid::new_v4().to_string();
        let encrypted_path = self.blobs_root.join(format!("{file_id}.enc"));
        write_atomic(&encrypted_path, &blob.to_bytes())?;

        let record = StoredFileRecord {
            file_id: file_id.clone(),
            original_filename,
            encrypted_path,
            description: description.to_string(),
            created_at: Utc::now(),
            salt: blob.salt,
            iv: blob.iv,
        };
        {
            let mut index = self.index.lock();
            index.insert(file_id.clone(), record.clone());
            if let Err(err) = persist_index(&self.index_path, &index) {
                index.remove(&file_id);
                drop(index);
                remove_blob(&record.encrypted_path);
                return Err(err);
            }
        }

        if let Err(err) = self.ledger.append_block(&file_id, &original_hash) {
            warn!(
                file_id = %file_id,
                error = %err,
                "ledger append failed; stored file has no ledger coverage"
            );
            return Err(err.into());
        }

        info!(
            file_id = %file_id,
            filename = %record.original_filename,
            bytes = plaintext.len(),
            "file stored"
        );
        Ok(file_id)
    }

    /// Decrypt `file_id` into `output_dir/<original filename>` and check the
    /// plaintext digest against the ledger.
    ///
    /// The decrypted file is written even when `integrity_ok` is false; the
    /// caller decides whether to keep it.
    pub fn retrieve(
        &self,
        file_id: &str,
        password: &[u8],
        output_dir: &Path,
    ) -> Result<RetrievedFile> {
        let record = self.record(file_id)?;
        let raw = match fs::read(&record.encrypted_path) {
            Ok(raw) => raw,
            Err(e) if e.kind() == ErrorKind::NotFound => {
                return Err(StoreError::BlobMissing(record.encrypted_path));
            }
            Err(e) => return Err(e.into()),
        };
        let blob = EncryptedBlob::from_bytes(&raw)?;
        if blob.salt != record.salt || blob.iv != record.iv {
            warn!(file_id, "blob header disagrees with metadata; using metadata salt and iv");
        }
        let plaintext = crypto::decrypt(&record.salt, &record.iv, &blob.ciphertext, password)?;

        let filename = file_name_of(Path::new(&record.original_filename))?;
        fs::create_dir_all(output_dir)?;
        let output_path = output_dir.join(filename);
        fs::write(&output_path, &plaintext)?;

        let current_hash = crypto::hash(&plaintext);
        let integrity_ok = self.ledger.verify_file_integrity(file_id, &current_hash);
        if integrity_ok {
            info!(file_id, path = %output_path.display(), "file retrieved and verified");
        } else {
            warn!(
                file_id,
                path = %output_path.display(),
                "integrity check failed; decrypted output left for caller to inspect"
            );
        }
        Ok(RetrievedFile {
            path: output_path,
            integrity_ok,
        })
    }

    /// Remove the metadata record for `file_id`, then its blob. Ledger
    /// history is kept.
    ///
    /// The index is committed first: if that write fails nothing changes. A
    /// blob that cannot be removed afterwards is left orphaned and logged.
    pub fn delete(&self, file_id: &str) -> Result<bool> {
        let mut index = self.index.lock();
        let Some(record) = index.remove(file_id) else {
            return Ok(false);
        };
        if let Err(err) = persist_index(&self.index_path, &index) {
            index.insert(file_id.to_string(), record);
            return Err(err);
        }
        drop(index);

        match fs::remove_file(&record.encrypted_path) {
            Ok(()) => {}
            Err(e) if e.kind() == ErrorKind::NotFound => {
                warn!(file_id, "blob was already gone");
            }
            Err(e) => {
                warn!(file_id, error = %e, "cannot remove blob; left orphaned");
            }
        }
        info!(file_id, "file deleted; ledger history retained");
        Ok(true)
    }

    /// All records, oldest first.
    pub fn list(&self) -> Vec<StoredFileRecord> {
        let mut records: Vec<_> = self.index.lock().values().cloned().collect();
        records.sort_by(|a, b| {
            a.created_at
                .cmp(&b.created_at)
                .then_with(|| a.file_id.cmp(&b.file_id))
        });
        records
    }

    pub fn get_history(&self, file_id: &str) -> Vec<HistoryEntry> {
        self.ledger.get_file_history(file_id)
    }

    pub fn verify_chain(&self) -> bool {
        self.ledger.verify_chain()
    }

    pub fn details(&self, file_id: &str) -> Result<FileDetails> {
        let record = self.record(file_id)?;
        let blob_size = fs::metadata(&record.encrypted_path).ok().map(|m| m.len());
        let history = self.ledger.get_file_history(file_id);
        Ok(FileDetails {
            integrity_tracked: !history.is_empty(),
            record,
            history,
            blob_size,
        })
    }

    /// Verify the chain and classify every stored file. Reports problems,
    /// repairs nothing.
    pub fn audit(&self) -> AuditReport {
        let chain_valid = self.ledger.verify_chain();
        let files: Vec<FileAudit> = self
            .list()
            .into_iter()
            .map(|record| {
                let status = if !record.encrypted_path.exists() {
                    FileStatus::BlobMissing
                } else if self.ledger.get_file_history(&record.file_id).is_empty() {
                    FileStatus::Unledgered
                } else {
                    FileStatus::Tracked
                };
                FileAudit {
                    file_id: record.file_id,
                    original_filename: record.original_filename,
                    status,
                }
            })
            .collect();
        let flagged = files
            .iter()
            .filter(|f| f.status != FileStatus::Tracked)
            .count();
        if !chain_valid || flagged > 0 {
            warn!(chain_valid, flagged, "store audit found problems");
        }
        AuditReport { chain_valid, files }
    }

    fn record(&self, file_id: &str) -> Result<StoredFileRecord> {
        self.index
            .lock()
            .get(file_id)
            .cloned()
            .ok_or_else(|| StoreError::NotFound(file_id.to_string()))
    }
}

fn file_name_of(path: &Path) -> Result<String> {
    path.file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .ok_or_else(|| StoreError::InvalidPath(path.to_path_buf()))
}

fn load_index(path: &Path) -> Result<MetadataIndex> {
    let raw = fs::read(path)?;
    let index: MetadataIndex = serde_json::from_slice(&raw)
        .map_err(|e| StoreError::MetadataCorrupt(format!("parse {}: {e}", path.display())))?;
    if let Some((key, _)) = index.iter().find(|(key, record)| **key != record.file_id) {
        return Err(StoreError::MetadataCorrupt(format!(
            "record under {key} carries a different file id"
        )));
    }
    Ok(index)
}

fn persist_index(path: &Path, index: &MetadataIndex) -> Result<()> {
    let json = serde_json::to_vec_pretty(index)?;
    write_atomic(path, &json)?;
    Ok(())
}

fn remove_blob(path: &Path) {
    if let Err(e) = fs::remove_file(path) {
        warn!(path = %path.display(), error = %e, "cannot remove orphaned blob");
    }
}

fn restrict_dir_permissions(path: &Path) {
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        if let Err(e) = fs::set_permissions(path, fs::Permissions::from_mode(0o700)) {
            warn!("cannot restrict permissions on {}: {}", path.display(), e);
        }
    }
    #[cfg(not(unix))]
    let _ = path;
}

mod base64_array {
    use base64::{engine::general_purpose, Engine as _};
    use serde::de::Error as _;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S, const N: usize>(bytes: &[u8; N], serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(&general_purpose::STANDARD.encode(bytes))
    }

    pub fn deserialize<'de, D, const N: usize>(deserializer: D) -> Result<[u8; N], D::Error>
    where
        D: Deserializer<'de>,
    {
        let encoded = String::deserialize(deserializer)?;
        let decoded = general_purpose::STANDARD
            .decode(encoded)
            .map_err(D::Error::custom)?;
        let len = decoded.len();
        decoded
            .try_into()
            .map_err(|_| D::Error::custom(format!("expected {N} bytes, got {len}")))
    }
}
