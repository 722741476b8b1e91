use crate::atomic::write_atomic;
use crate::error::StoreError;
use crate::ledger::DEFAULT_DIFFICULTY;
pub use crate::ledger::MAX_DIFFICULTY;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Component, Path};

pub const SETTINGS_FILE: &str = "config.json";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreSettings {
    /// Leading hex zeros required of every mined block hash.
    pub difficulty: usize,
    pub ledger_file: String,
    pub index_file: String,
    pub blob_dir: String,
}

impl Default for StoreSettings {
    fn default() -> Self {
        Self {
            difficulty: DEFAULT_DIFFICULTY,
            ledger_file: "ledger.json".into(),
            index_file: "file_metadata.json".into(),
            blob_dir: "blobs".into(),
        }
    }
}

impl StoreSettings {
    /// Read settings from `path`, falling back to defaults when the file is
    /// absent. Missing keys take their default value.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, StoreError> {
        let path = path.as_ref();
        if !path.exists() {
            return Ok(Self::default());
        }
        let settings: Self = serde_json::from_slice(&fs::read(path)?)
            .map_err(|e| StoreError::InvalidSettings(format!("{}: {e}", path.display())))?;
        settings.validate()?;
        Ok(settings)
    }

    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<(), StoreError> {
        self.validate()?;
        write_atomic(path.as_ref(), &serde_json::to_vec_pretty(self)?)?;
        Ok(())
    }

    pub fn validate(&self) -> Result<(), StoreError> {
        if self.difficulty > MAX_DIFFICULTY {
            return Err(StoreError::InvalidSettings(format!(
                "difficulty {} exceeds maximum {MAX_DIFFICULTY}",
                self.difficulty
            )));
        }
        for (name, value) in [
            ("ledger_file", &self.ledger_file),
            ("index_file", &self.index_file),
            ("blob_dir", &self.blob_dir),
        ] {
            let mut components = Path::new(value).components();
            let single_normal = matches!(components.next(), Some(Component::Normal(_)))
                && components.next().is_none();
            if !single_normal {
                return Err(StoreError::InvalidSettings(format!(
                    "{name} must be a single path component, got {value:?}"
                )));
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn missing_file_yields_defaults() {
        let dir = tempdir().unwrap();
        let settings = StoreSettings::load(dir.path().join(SETTINGS_FILE)).unwrap();
        assert_eq!(settings, StoreSettings::default());
        assert_eq!(settings.difficulty, 2);
    }

    #[test]
    fn partial_file_keeps_other_defaults() {
        let dir = tempdir().unwrap();
        let path = dir.path().join(SETTINGS_FILE);
        fs::write(&path, br#"{"difficulty": 3}"#).unwrap();
        let settings = StoreSettings::load(&path).unwrap();
        assert_eq!(settings.difficulty, 3);
        assert_eq!(settings.ledger_file, "ledger.json");
    }

    #[test]
    fn save_then_load() {
        let dir = tempdir().unwrap();
        let path = dir.path().join(SETTINGS_FILE);
        let settings = StoreSettings {
            difficulty: 1,
            ..StoreSettings::default()
        };
        settings.save(&path).unwrap();
        assert_eq!(StoreSettings::load(&path).unwrap(), settings);
    }

    #[test]
    fn rejects_unreasonable_values() {
        let dir = tempdir().unwrap();
        let path = dir.path().join(SETTINGS_FILE);
        fs::write(&path, br#"{"difficulty": 40}"#).unwrap();
        assert!(matches!(
            StoreSettings::load(&path),
            Err(StoreError::InvalidSettings(_))
        ));
        fs::write(&path, br#"{"blob_dir": "../escape"}"#).unwrap();
        assert!(matches!(
            StoreSettings::load(&path),
            Err(StoreError::InvalidSettings(_))
        ));
    }

    #[test]
    fn rejects_names_that_leave_the_root() {
        for name in ["..", ".", "/", "/abs", "a/b", ""] {
            let settings = StoreSettings {
                blob_dir: name.to_string(),
                ..StoreSettings::default()
            };
            assert!(
                matches!(settings.validate(), Err(StoreError::InvalidSettings(_))),
                "{name:?} accepted"
            );
        }
        let settings = StoreSettings {
            index_file: "..".to_string(),
            ..StoreSettings::default()
        };
        assert!(settings.validate().is_err());
        assert!(StoreSettings::default().validate().is_ok());
    }
}
