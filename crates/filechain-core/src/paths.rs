use crate::error::StoreError;
use crate::settings::{StoreSettings, SETTINGS_FILE};
use directories::ProjectDirs;
use std::path::{Path, PathBuf};

pub const APP_QUALIFIER: &str = "com";
pub const APP_ORG: &str = "filechain";
pub const APP_NAME: &str = "filechain";
pub const DATA_DIR_ENV: &str = "FILECHAIN_DATA_DIR";

/// `FILECHAIN_DATA_DIR` when set, otherwise the platform data directory.
pub fn data_dir() -> Result<PathBuf, StoreError> {
    if let Ok(override_path) = std::env::var(DATA_DIR_ENV) {
        if !override_path.is_empty() {
            return Ok(PathBuf::from(override_path));
        }
    }
    let dirs = ProjectDirs::from(APP_QUALIFIER, APP_ORG, APP_NAME).ok_or_else(|| {
        StoreError::InvalidSettings("cannot determine data directory".to_string())
    })?;
    Ok(dirs.data_dir().to_path_buf())
}

pub fn settings_path(root: &Path) -> PathBuf {
    root.join(SETTINGS_FILE)
}

pub fn ledger_path(root: &Path, settings: &StoreSettings) -> PathBuf {
    root.join(&settings.ledger_file)
}

pub fn index_path(root: &Path, settings: &StoreSettings) -> PathBuf {
    root.join(&settings.index_file)
}

pub fn blob_dir(root: &Path, settings: &StoreSettings) -> PathBuf {
    root.join(&settings.blob_dir)
}
