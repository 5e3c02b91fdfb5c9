//! Persisted operator settings: the LLM API key and the technical checks
//! text that gates the clarification phase.

use std::path::{Path, PathBuf};
use std::sync::RwLock;

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::error::{PersistenceError, SettingsError};
use crate::storage::{self, FileStamp};

const HINT_MIN_KEY_LEN: usize = 8;
const MASKED_KEY: &str = "••••";

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Settings {
    #[serde(default)]
    pub api_key: String,
    #[serde(default)]
    pub technical_checks: String,
}

impl Settings {
    /// Masked form of the key for display: last four characters only, and
    /// nothing at all for keys too short to spare them.
    pub fn api_key_hint(&self) -> Option<String> {
        let key = self.api_key.trim();
        if key.is_empty() {
            return None;
        }
        if key.chars().count() <= HINT_MIN_KEY_LEN {
            return Some(MASKED_KEY.to_string());
        }
        let tail: String = key
            .chars()
            .rev()
            .take(4)
            .collect::<Vec<_>>()
            .into_iter()
            .rev()
            .collect();
        Some(format!("…{}", tail))
    }
}

/// Partial update. `None` keeps the stored value.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct SettingsPatch {
    #[serde(default)]
    pub api_key: Option<String>,
    #[serde(default)]
    pub technical_checks: Option<String>,
}

pub struct SettingsStore {
    path: PathBuf,
    // Last read contents, trusted only while the file's stamp is unchanged.
    cache: RwLock<Option<Cached>>,
}

struct Cached {
    stamp: Option<FileStamp>,
    settings: Settings,
}

impl SettingsStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            cache: RwLock::new(None),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Current settings. A missing or corrupt file yields defaults. Writes
    /// made by another process are picked up on the next call.
    pub fn load(&self) -> Settings {
        let stamp = storage::file_stamp(&self.path);
        if let Some(cached) = self.cache.read().unwrap_or_else(|e| e.into_inner()).as_ref() {
            if cached.stamp == stamp {
                return cached.settings.clone();
            }
        }

        let mut cache = self.cache.write().unwrap_or_else(|e| e.into_inner());
        // Stamp before reading: a write racing the read only costs a re-read later.
        let stamp = storage::file_stamp(&self.path);
        let settings = read_settings_file(&self.path);
        *cache = Some(Cached {
            stamp,
            settings: settings.clone(),
        });
        settings
    }

    /// Merge `patch` over the values currently on disk and write the full
    /// object back.
    pub fn save(&self, patch: SettingsPatch) -> Result<Settings, SettingsError> {
        if let Some(key) = patch.api_key.as_deref() {
            validate_api_key(key)?;
        }

        let mut cache = self.cache.write().unwrap_or_else(|e| e.into_inner());
        let mut merged = read_settings_file(&self.path);
        if let Some(key) = patch.api_key {
            merged.api_key = key.trim().to_string();
        }
        if let Some(checks) = patch.technical_checks {
            merged.technical_checks = checks;
        }

        self.persist(&mut cache, merged)
    }

    /// Reset both fields to defaults and persist that.
    pub fn clear(&self) -> Result<Settings, SettingsError> {
        info!(path = %self.path.display(), "Clearing settings");
        let mut cache = self.cache.write().unwrap_or_else(|e| e.into_inner());
        self.persist(&mut cache, Settings::default())
    }

    fn persist(&self, cache: &mut Option<Cached>, settings: Settings) -> Result<Settings, SettingsError> {
        let json = serde_json::to_string_pretty(&settings).map_err(|e| {
            PersistenceError::new(&self.path, std::io::Error::new(std::io::ErrorKind::InvalidData, e))
        })?;

        storage::write_atomic(&self.path, json.as_bytes())?;
        *cache = Some(Cached {
            stamp: storage::file_stamp(&self.path),
            settings: settings.clone(),
        });
        debug!(path = %self.path.display(), "Settings saved");
        Ok(settings)
    }
}

fn validate_api_key(key: &str) -> Result<(), SettingsError> {
    if key.trim().chars().any(char::is_whitespace) {
        return Err(SettingsError::Validation(
            "API key must not contain whitespace".to_string(),
        ));
    }
    Ok(())
}

fn read_settings_file(path: &Path) -> Settings {
    let text = match std::fs::read_to_string(path) {
        Ok(text) => text,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Settings::default(),
        Err(e) => {
            warn!(path = %path.display(), error = %e, "Settings file unreadable, using defaults");
            return Settings::default();
        }
    };
    serde_json::from_str(&text).unwrap_or_else(|e| {
        warn!(path = %path.display(), error = %e, "Settings file corrupt, using defaults");
        Settings::default()
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn store_in(dir: &TempDir) -> SettingsStore {
        SettingsStore::new(dir.path().join("app_settings.json"))
    }

    #[test]
    fn test_load_defaults_when_file_absent() {
        let temp_dir = TempDir::new().unwrap();
        let store = store_in(&temp_dir);
        assert_eq!(store.load(), Settings::default());
    }

    #[test]
    fn test_load_defaults_when_file_corrupt() {
        let temp_dir = TempDir::new().unwrap();
        std::fs::write(temp_dir.path().join("app_settings.json"), "{not json").unwrap();
        let store = store_in(&temp_dir);
        assert_eq!(store.load(), Settings::default());
    }

    #[test]
    fn test_load_tolerates_missing_fields() {
        let temp_dir = TempDir::new().unwrap();
        std::fs::write(
            temp_dir.path().join("app_settings.json"),
            r#"{"technical_checks": "Auth model?"}"#,
        )
        .unwrap();
        let settings = store_in(&temp_dir).load();
        assert_eq!(settings.api_key, "");
        assert_eq!(settings.technical_checks, "Auth model?");
    }

    #[test]
    fn test_save_merges_instead_of_overwriting() {
        let temp_dir = TempDir::new().unwrap();
        let store = store_in(&temp_dir);
        store
            .save(SettingsPatch {
                api_key: Some("sk-old".into()),
                technical_checks: Some("Which payment provider?".into()),
            })
            .unwrap();

        store
            .save(SettingsPatch {
                api_key: Some("X".into()),
                technical_checks: None,
            })
            .unwrap();

        let settings = store.load();
        assert_eq!(settings.api_key, "X");
        assert_eq!(settings.technical_checks, "Which payment provider?");

        // A fresh store reading the same file sees the merged object.
        let reread = store_in(&temp_dir).load();
        assert_eq!(reread, settings);
    }

    #[test]
    fn test_save_rejects_whitespace_key_without_writing() {
        let temp_dir = TempDir::new().unwrap();
        let store = store_in(&temp_dir);
        store
            .save(SettingsPatch {
                api_key: Some("sk-good".into()),
                technical_checks: None,
            })
            .unwrap();

        let err = store
            .save(SettingsPatch {
                api_key: Some("sk bad".into()),
                technical_checks: Some("changed".into()),
            })
            .unwrap_err();
        assert!(matches!(err, SettingsError::Validation(_)));
        assert_eq!(store.load().api_key, "sk-good");
        assert_eq!(store_in(&temp_dir).load().technical_checks, "");
    }

    #[test]
    fn test_clear_persists_defaults() {
        let temp_dir = TempDir::new().unwrap();
        let store = store_in(&temp_dir);
        store
            .save(SettingsPatch {
                api_key: Some("sk-1".into()),
                technical_checks: Some("checks".into()),
            })
            .unwrap();

        store.clear().unwrap();
        assert_eq!(store.load(), Settings::default());
        assert_eq!(store_in(&temp_dir).load(), Settings::default());
    }

    #[test]
    fn test_api_key_hint_masks_key() {
        let settings = Settings {
            api_key: "sk-abcdef123".into(),
            technical_checks: String::new(),
        };
        assert_eq!(settings.api_key_hint().as_deref(), Some("…f123"));
        assert_eq!(Settings::default().api_key_hint(), None);
    }

    #[test]
    fn test_api_key_hint_hides_short_keys() {
        for key in ["X", "abcd", "sk-first"] {
            let settings = Settings {
                api_key: key.into(),
                technical_checks: String::new(),
            };
            assert_eq!(settings.api_key_hint().as_deref(), Some("••••"), "key {:?}", key);
        }
    }

    #[test]
    fn test_save_merges_over_writes_from_another_store() {
        let temp_dir = TempDir::new().unwrap();
        let server = store_in(&temp_dir);
        let cli = store_in(&temp_dir);
        assert_eq!(server.load(), Settings::default());

        cli.save(SettingsPatch {
            api_key: None,
            technical_checks: Some("Payment provider".into()),
        })
        .unwrap();
        assert_eq!(server.load().technical_checks, "Payment provider");

        server
            .save(SettingsPatch {
                api_key: Some("sk-server-key".into()),
                technical_checks: None,
            })
            .unwrap();

        let on_disk = store_in(&temp_dir).load();
        assert_eq!(on_disk.api_key, "sk-server-key");
        assert_eq!(on_disk.technical_checks, "Payment provider");
        assert_eq!(cli.load(), on_disk);
    }
}
