//! Append-only, hash-chained ledger of stored-file digests.
//!
//! Every block commits to its predecessor's hash and to a SHA-256 digest of
//! one file's plaintext. Non-genesis blocks are mined until their hash
//! carries `difficulty` leading hex zeros. The whole ledger (chain plus the
//! per-file history index) lives in one JSON file that is rewritten
//! atomically on every append.

use crate::atomic::write_atomic;
use crate::crypto;
use crate::error::LedgerError;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

pub const DEFAULT_DIFFICULTY: usize = 2;
/// Upper bound on leading hex zeros; mining cost grows 16x per step.
pub const MAX_DIFFICULTY: usize = 6;
pub const GENESIS_FILE_ID: &str = "genesis";
pub const GENESIS_FILE_HASH: &str = "genesis_hash";
pub const GENESIS_PREVIOUS_HASH: &str = "0";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Block {
    pub index: u64,
    pub timestamp: DateTime<Utc>,
    pub file_id: String,
    pub file_hash: String,
    pub previous_hash: String,
    pub nonce: u64,
    pub hash: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HistoryEntry {
    pub timestamp: DateTime<Utc>,
    pub file_hash: String,
    pub block_index: u64,
    pub block_hash: String,
}

type FileHistories = BTreeMap<String, Vec<HistoryEntry>>;

#[derive(Debug, Deserialize)]
struct LedgerFile {
    chain: Vec<Block>,
    #[serde(default)]
    file_histories: FileHistories,
}

#[derive(Serialize)]
struct LedgerFileRef<'a> {
    chain: &'a [Block],
    file_histories: &'a FileHistories,
}

impl Block {
    fn genesis() -> Self {
        let mut block = Self {
            index: 0,
            timestamp: Utc::now(),
            file_id: GENESIS_FILE_ID.to_string(),
            file_hash: GENESIS_FILE_HASH.to_string(),
            previous_hash: GENESIS_PREVIOUS_HASH.to_string(),
            nonce: 0,
            hash: String::new(),
        };
        block.hash = block.calculate_hash();
        block
    }

    fn candidate(tip: &Block, file_id: &str, file_hash: &str) -> Self {
        Self {
            index: tip.index + 1,
            timestamp: Utc::now(),
            file_id: file_id.to_string(),
            file_hash: file_hash.to_string(),
            previous_hash: tip.hash.clone(),
            nonce: 0,
            hash: String::new(),
        }
    }

    /// SHA-256 over the sorted-key compact JSON of every field except `hash`.
    pub fn calculate_hash(&self) -> String {
        let fields = BTreeMap::from([
            ("file_hash", serde_json::json!(self.file_hash)),
            ("file_id", serde_json::json!(self.file_id)),
            ("index", serde_json::json!(self.index)),
            ("nonce", serde_json::json!(self.nonce)),
            ("previous_hash", serde_json::json!(self.previous_hash)),
            ("timestamp", serde_json::json!(self.timestamp)),
        ]);
        // Collected from a BTreeMap, so key order is sorted whatever map
        // backs serde_json::Value.
        let canonical: serde_json::Map<String, serde_json::Value> = fields
            .into_iter()
            .map(|(key, value)| (key.to_string(), value))
            .collect();
        crypto::hash(serde_json::Value::Object(canonical).to_string().as_bytes())
    }

    fn mine(&mut self, difficulty: usize) {
        self.nonce = 0;
        self.hash = self.calculate_hash();
        while !self.meets_difficulty(difficulty) {
            self.nonce += 1;
            self.hash = self.calculate_hash();
        }
    }

    pub fn meets_difficulty(&self, difficulty: usize) -> bool {
        self.hash.len() >= difficulty && self.hash.bytes().take(difficulty).all(|b| b == b'0')
    }

    pub fn is_genesis(&self) -> bool {
        self.index == 0
    }
}

impl HistoryEntry {
    fn for_block(block: &Block) -> Self {
        Self {
            timestamp: block.timestamp,
            file_hash: block.file_hash.clone(),
            block_index: block.index,
            block_hash: block.hash.clone(),
        }
    }
}

#[derive(Debug)]
struct LedgerState {
    chain: Vec<Block>,
    file_histories: FileHistories,
}

pub struct Ledger {
    path: PathBuf,
    difficulty: usize,
    inner: Mutex<LedgerState>,
}

impl Ledger {
    pub fn new<P: AsRef<Path>>(path: P) -> Result<Self, LedgerError> {
        Self::open(path, DEFAULT_DIFFICULTY)
    }

    /// Load the ledger at `path`, or create it with a lone genesis block when
    /// the file does not exist yet. A file that exists but does not parse or
    /// does not verify is reported as [`LedgerError::Corrupt`], never reset.
    /// Difficulties above [`MAX_DIFFICULTY`] are rejected.
    pub fn open<P: AsRef<Path>>(path: P, difficulty: usize) -> Result<Self, LedgerError> {
        if difficulty > MAX_DIFFICULTY {
            return Err(LedgerError::DifficultyTooHigh(difficulty));
        }
        let path = path.as_ref().to_path_buf();
        let state = if path.exists() {
            let state = Self::load_state(&path)?;
            debug!(path = %path.display(), blocks = state.chain.len(), "ledger loaded");
            state
        } else {
            if let Some(parent) = path.parent() {
                if !parent.as_os_str().is_empty() {
                    fs::create_dir_all(parent)?;
                }
            }
            let state = LedgerState {
                chain: vec![Block::genesis()],
                file_histories: BTreeMap::new(),
            };
            Self::persist(&path, &state)?;
            info!(path = %path.display(), "ledger created with genesis block");
            state
        };
        Ok(Self {
            path,
            difficulty,
            inner: Mutex::new(state),
        })
    }

    fn load_state(path: &Path) -> Result<LedgerState, LedgerError> {
        let raw = fs::read(path)?;
        let file: LedgerFile = serde_json::from_slice(&raw)
            .map_err(|e| LedgerError::Corrupt(format!("parse {}: {e}", path.display())))?;
        check_chain(&file.chain).map_err(LedgerError::Corrupt)?;
        let rebuilt = index_histories(&file.chain);
        if rebuilt != file.file_histories {
            return Err(LedgerError::Corrupt(
                "file history index disagrees with chain".to_string(),
            ));
        }
        Ok(LedgerState {
            chain: file.chain,
            file_histories: rebuilt,
        })
    }

    fn persist(path: &Path, state: &LedgerState) -> Result<(), LedgerError> {
        let file = LedgerFileRef {
            chain: &state.chain,
            file_histories: &state.file_histories,
        };
        let json = serde_json::to_vec_pretty(&file)?;
        write_atomic(path, &json)?;
        Ok(())
    }

    /// Mine a block recording `file_hash` for `file_id` on top of the current
    /// tip and persist the ledger. On a failed write the block is dropped
    /// again, so memory and disk never diverge.
    pub fn append_block(&self, file_id: &str, file_hash: &str) -> Result<Block, LedgerError> {
        if file_id == GENESIS_FILE_ID {
            return Err(LedgerError::ReservedFileId);
        }
        let mut state = self.inner.lock();
        let tip = state
            .chain
            .last()
            .ok_or_else(|| LedgerError::Corrupt("chain has no genesis block".to_string()))?;
        let mut block = Block::candidate(tip, file_id, file_hash);
        block.mine(self.difficulty);
        debug!(index = block.index, nonce = block.nonce, hash = %block.hash, "block mined");

        state.chain.push(block.clone());
        state
            .file_histories
            .entry(file_id.to_string())
            .or_default()
            .push(HistoryEntry::for_block(&block));

        if let Err(err) = Self::persist(&self.path, &state) {
            state.chain.pop();
            if let Some(history) = state.file_histories.get_mut(file_id) {
                history.pop();
                if history.is_empty() {
                    state.file_histories.remove(file_id);
                }
            }
            return Err(err);
        }
        Ok(block)
    }

    /// Recompute every block hash and back-link. Logs the first failure.
    pub fn verify_chain(&self) -> bool {
        let state = self.inner.lock();
        match check_chain(&state.chain) {
            Ok(()) => true,
            Err(reason) => {
                warn!(%reason, "ledger verification failed");
                false
            }
        }
    }

    /// True only when `current_hash` equals the most recent digest recorded
    /// for `file_id`. Unknown ids are unverified, not valid.
    pub fn verify_file_integrity(&self, file_id: &str, current_hash: &str) -> bool {
        let state = self.inner.lock();
        state
            .file_histories
            .get(file_id)
            .and_then(|history| history.last())
            .map(|latest| latest.file_hash == current_hash)
            .unwrap_or(false)
    }

    pub fn get_file_history(&self, file_id: &str) -> Vec<HistoryEntry> {
        let state = self.inner.lock();
        state
            .file_histories
            .get(file_id)
            .cloned()
            .unwrap_or_default()
    }

    pub fn len(&self) -> usize {
        self.inner.lock().chain.len()
    }

    /// Always false: a ledger holds at least its genesis block.
    pub fn is_empty(&self) -> bool {
        self.inner.lock().chain.is_empty()
    }

    pub fn latest_block(&self) -> Option<Block> {
        self.inner.lock().chain.last().cloned()
    }

    pub fn blocks(&self) -> Vec<Block> {
        self.inner.lock().chain.clone()
    }

    pub fn difficulty(&self) -> usize {
        self.difficulty
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

fn check_chain(chain: &[Block]) -> Result<(), String> {
    let genesis = chain.first().ok_or("chain has no genesis block")?;
    if genesis.index != 0
        || genesis.file_id != GENESIS_FILE_ID
        || genesis.previous_hash != GENESIS_PREVIOUS_HASH
    {
        return Err("genesis block malformed".to_string());
    }
    if genesis.hash != genesis.calculate_hash() {
        return Err("block 0: hash mismatch".to_string());
    }
    for (i, pair) in chain.windows(2).enumerate() {
        let (prev, block) = (&pair[0], &pair[1]);
        let expected = i as u64 + 1;
        if block.index != expected {
            return Err(format!("block {expected}: stored index {}", block.index));
        }
        if block.file_id == GENESIS_FILE_ID {
            return Err(format!("block {expected}: reuses the genesis file id"));
        }
        if block.hash != block.calculate_hash() {
            return Err(format!("block {expected}: hash mismatch"));
        }
        if block.previous_hash != prev.hash {
            return Err(format!("block {expected}: previous hash does not link"));
        }
    }
    Ok(())
}

fn index_histories(chain: &[Block]) -> FileHistories {
    let mut histories = FileHistories::new();
    for block in chain.iter().filter(|b| !b.is_genesis()) {
        histories
            .entry(block.file_id.clone())
            .or_default()
            .push(HistoryEntry::for_block(block));
    }
    histories
}
