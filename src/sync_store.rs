use crate::errors::{AppError, AppResult};
use crate::policy::{clamp_sync_interval, DEFAULT_SYNC_INTERVAL_SECS};
use chrono::{DateTime, Utc};
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

/// String key/value store kept on the client, persisted as one JSON object.
#[derive(Debug, Default)]
pub struct LocalStore {
    path: Option<PathBuf>,
    entries: Mutex<BTreeMap<String, String>>,
}

impl LocalStore {
    pub fn in_memory() -> Self {
        Self::default()
    }

    pub fn open(path: &Path) -> AppResult<Self> {
        let entries = match fs::read_to_string(path) {
            Ok(raw) => match serde_json::from_str::<BTreeMap<String, String>>(&raw) {
                Ok(entries) => entries,
                Err(error) => {
                    let aside = corrupt_path(path);
                    fs::rename(path, &aside)?;
                    tracing::warn!(
                        path = %path.display(),
                        moved_to = %aside.display(),
                        error = %error,
                        "local store unreadable, starting empty"
                    );
                    BTreeMap::new()
                }
            },
            Err(error) if error.kind() == std::io::ErrorKind::NotFound => BTreeMap::new(),
            Err(error) => return Err(error.into()),
        };

        Ok(Self {
            path: Some(path.to_path_buf()),
            entries: Mutex::new(entries),
        })
    }

    pub fn get(&self, key: &str) -> Option<String> {
        self.entries
            .lock()
            .ok()
            .and_then(|entries| entries.get(key).cloned())
    }

    pub fn set(&self, key: &str, value: impl Into<String>) -> AppResult<()> {
        let mut entries = self
            .entries
            .lock()
            .map_err(|_| AppError::Internal("local store mutex poisoned".to_string()))?;
        entries.insert(key.to_string(), value.into());
        self.persist(&entries)
    }

    pub fn remove(&self, key: &str) -> AppResult<()> {
        let mut entries = self
            .entries
            .lock()
            .map_err(|_| AppError::Internal("local store mutex poisoned".to_string()))?;
        entries.remove(key);
        self.persist(&entries)
    }

    fn persist(&self, entries: &BTreeMap<String, String>) -> AppResult<()> {
        let Some(path) = &self.path else {
            return Ok(());
        };
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(path, serde_json::to_string_pretty(entries)?)?;
        Ok(())
    }
}

fn corrupt_path(path: &Path) -> PathBuf {
    let mut name = path.as_os_str().to_os_string();
    name.push(".corrupt");
    PathBuf::from(name)
}

pub fn sheet_link_key(user_id: &str) -> String {
    format!("sheetLink_{}", user_id)
}

pub fn auto_sync_key(user_id: &str) -> String {
    format!("autoSync_{}", user_id)
}

pub fn sync_interval_key(user_id: &str) -> String {
    format!("syncInterval_{}", user_id)
}

pub fn last_sync_key(user_id: &str) -> String {
    format!("lastSync_{}", user_id)
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyncSettings {
    pub sheet_link: String,
    pub auto_sync: bool,
    pub interval_secs: u64,
    pub last_sync: Option<DateTime<Utc>>,
}

impl Default for SyncSettings {
    fn default() -> Self {
        Self {
            sheet_link: String::new(),
            auto_sync: false,
            interval_secs: DEFAULT_SYNC_INTERVAL_SECS,
            last_sync: None,
        }
    }
}

impl SyncSettings {
    pub fn load(store: &LocalStore, user_id: &str) -> Self {
        let defaults = Self::default();
        Self {
            sheet_link: store.get(&sheet_link_key(user_id)).unwrap_or_default(),
            auto_sync: store
                .get(&auto_sync_key(user_id))
                .map(|raw| raw == "true")
                .unwrap_or(defaults.auto_sync),
            interval_secs: store
                .get(&sync_interval_key(user_id))
                .and_then(|raw| raw.parse::<u64>().ok())
                .map(clamp_sync_interval)
                .unwrap_or(defaults.interval_secs),
            last_sync: store
                .get(&last_sync_key(user_id))
                .and_then(|raw| DateTime::parse_from_rfc3339(&raw).ok())
                .map(|at| at.with_timezone(&Utc)),
        }
    }

    pub fn save(&self, store: &LocalStore, user_id: &str) -> AppResult<()> {
        store.set(&sheet_link_key(user_id), self.sheet_link.clone())?;
        store.set(&auto_sync_key(user_id), self.auto_sync.to_string())?;
        store.set(&sync_interval_key(user_id), self.interval_secs.to_string())?;
        match self.last_sync {
            Some(at) => store.set(&last_sync_key(user_id), at.to_rfc3339()),
            None => store.remove(&last_sync_key(user_id)),
        }
    }

    pub fn should_poll(&self) -> bool {
        self.auto_sync && !self.sheet_link.trim().is_empty()
    }
}
