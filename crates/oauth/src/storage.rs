use std::{
    collections::HashMap,
    path::{Path, PathBuf},
    sync::Arc,
};

use {
    async_trait::async_trait,
    tokio::sync::Mutex,
    tracing::{debug, info, warn},
};

use crate::{Error, Result, types::StoredRecord};

/// File name of the persisted credential table inside the data directory.
pub const TOKEN_FILE_NAME: &str = "pipedream_tokens.json";

/// Key/value persistence for credentials and pending authorizations.
///
/// Implementations must not fail callers: persistence problems are logged
/// and the in-memory view stays authoritative.
#[async_trait]
pub trait CredentialStore: Send + Sync {
    async fn get(&self, key: &str) -> Option<StoredRecord>;
    async fn set(&self, key: &str, record: StoredRecord);
    /// Remove `key`, returning what was stored. Concurrent deletes of the same
    /// key see the record at most once.
    async fn delete(&self, key: &str) -> Option<StoredRecord>;
    /// Overwrite `key` only if something is stored there, checking and
    /// writing under one lock. Returns whether the record was written.
    async fn replace(&self, key: &str, record: StoredRecord) -> bool;
    async fn list(&self) -> Vec<(String, StoredRecord)>;
}

pub type SharedStore = Arc<dyn CredentialStore>;

/// In-memory table mirrored to a JSON file after every mutation.
pub struct FileStore {
    path: PathBuf,
    table: Mutex<HashMap<String, StoredRecord>>,
}

impl FileStore {
    /// Open the table at `path`. A missing or unreadable file starts empty.
    pub fn open(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let table = load_table(&path);
        info!(path = %path.display(), entries = table.len(), "credential store opened");
        Self {
            path,
            table: Mutex::new(table),
        }
    }

    /// Open `pipedream_tokens.json` inside `dir`.
    pub fn in_dir(dir: &Path) -> Self {
        Self::open(dir.join(TOKEN_FILE_NAME))
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Called with the table lock held, so writes land in mutation order.
    async fn persist(&self, table: &HashMap<String, StoredRecord>) {
        let result = match serde_json::to_string_pretty(table) {
            Ok(data) => {
                let path = self.path.clone();
                tokio::task::spawn_blocking(move || write_file(&path, &data))
                    .await
                    .unwrap_or_else(|e| {
                        Err(Error::Persistence {
                            detail: e.to_string(),
                        })
                    })
            },
            Err(e) => Err(Error::Persistence {
                detail: e.to_string(),
            }),
        };
        if let Err(e) = result {
            warn!(
                path = %self.path.display(),
                error = %e,
                "credential file write failed, keeping in-memory state"
            );
        }
    }
}

#[async_trait]
impl CredentialStore for FileStore {
    async fn get(&self, key: &str) -> Option<StoredRecord> {
        self.table.lock().await.get(key).cloned()
    }

    async fn set(&self, key: &str, record: StoredRecord) {
        let mut table = self.table.lock().await;
        table.insert(key.to_string(), record);
        self.persist(&table).await;
    }

    async fn delete(&self, key: &str) -> Option<StoredRecord> {
        let mut table = self.table.lock().await;
        let removed = table.remove(key);
        if removed.is_some() {
            self.persist(&table).await;
        }
        removed
    }

    async fn replace(&self, key: &str, record: StoredRecord) -> bool {
        let mut table = self.table.lock().await;
        let Some(slot) = table.get_mut(key) else {
            return false;
        };
        *slot = record;
        self.persist(&table).await;
        true
    }

    async fn list(&self) -> Vec<(String, StoredRecord)> {
        self.table
            .lock()
            .await
            .iter()
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect()
    }
}

fn load_table(path: &Path) -> HashMap<String, StoredRecord> {
    let data = match std::fs::read_to_string(path) {
        Ok(d) => d,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            debug!(path = %path.display(), "credential file not found, starting empty");
            return HashMap::new();
        },
        Err(e) => {
            warn!(path = %path.display(), error = %e, "credential file read failed, starting empty");
            return HashMap::new();
        },
    };

    let raw: HashMap<String, serde_json::Value> = match serde_json::from_str(&data) {
        Ok(m) => m,
        Err(e) => {
            warn!(path = %path.display(), error = %e, "credential file parse failed, starting empty");
            return HashMap::new();
        },
    };

    raw.into_iter()
        .filter_map(|(key, value)| match serde_json::from_value(value) {
            Ok(record) => Some((key, record)),
            Err(e) => {
                warn!(path = %path.display(), key, error = %e, "skipping unreadable credential entry");
                None
            },
        })
        .collect()
}

fn write_file(path: &Path, data: &str) -> Result<()> {
    let io = |e: std::io::Error| Error::Persistence {
        detail: format!("{}: {e}", path.display()),
    };

    if let Some(parent) = path.parent()
        && !parent.as_os_str().is_empty()
    {
        std::fs::create_dir_all(parent).map_err(io)?;
    }

    let tmp = path.with_extension("json.tmp");
    std::fs::write(&tmp, data).map_err(io)?;

    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        std::fs::set_permissions(&tmp, std::fs::Permissions::from_mode(0o600)).map_err(io)?;
    }

    std::fs::rename(&tmp, path).map_err(io)?;
    Ok(())
}

/// Store with no backing file.
#[derive(Default)]
pub struct MemoryStore {
    table: Mutex<HashMap<String, StoredRecord>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl CredentialStore for MemoryStore {
    async fn get(&self, key: &str) -> Option<StoredRecord> {
        self.table.lock().await.get(key).cloned()
    }

    async fn set(&self, key: &str, record: StoredRecord) {
        self.table.lock().await.insert(key.to_string(), record);
    }

    async fn delete(&self, key: &str) -> Option<StoredRecord> {
        self.table.lock().await.remove(key)
    }

    async fn replace(&self, key: &str, record: StoredRecord) -> bool {
        match self.table.lock().await.get_mut(key) {
            Some(slot) => {
                *slot = record;
                true
            },
            None => false,
        }
    }

    async fn list(&self) -> Vec<(String, StoredRecord)> {
        self.table
            .lock()
            .await
            .iter()
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect()
    }
}
