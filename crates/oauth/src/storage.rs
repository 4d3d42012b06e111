use std::{
    collections::HashMap,
    fs,
    io::{self, Write},
    path::{Path, PathBuf},
    sync::{Arc, Mutex},
};

use serde_json::{Map, Value};

use crate::{
    error::{OAuthError, Result},
    types::OAuthTokens,
};

/// Key-value persistence consumed by the token lifecycle.
pub trait Storage: Send + Sync {
    fn get(&self, key: &str) -> Result<Option<Value>>;
    fn set(&self, key: &str, value: Value) -> Result<()>;
    fn clear(&self) -> Result<()>;
}

/// Ephemeral storage; nothing survives the process.
#[derive(Debug, Default)]
pub struct MemoryStorage {
    data: Mutex<HashMap<String, Value>>,
}

impl MemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, HashMap<String, Value>>> {
        self.data
            .lock()
            .map_err(|_| OAuthError::Storage("memory storage lock poisoned".into()))
    }
}

impl Storage for MemoryStorage {
    fn get(&self, key: &str) -> Result<Option<Value>> {
        Ok(self.lock()?.get(key).cloned())
    }

    fn set(&self, key: &str, value: Value) -> Result<()> {
        self.lock()?.insert(key.to_string(), value);
        Ok(())
    }

    fn clear(&self) -> Result<()> {
        self.lock()?.clear();
        Ok(())
    }
}

/// A single JSON document on disk, one top-level field per key.
///
/// The file is readable by its owner only. A missing or unparseable file
/// reads as empty.
#[derive(Debug)]
pub struct FileStorage {
    path: PathBuf,
    write_lock: Mutex<()>,
}

impl FileStorage {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            write_lock: Mutex::new(()),
        }
    }

    /// `<config dir>/tokenline/tokens.json`.
    pub fn default_path() -> Result<PathBuf> {
        let dirs = directories::BaseDirs::new()
            .ok_or_else(|| OAuthError::Storage("could not determine home directory".into()))?;
        Ok(dirs.config_dir().join("tokenline").join("tokens.json"))
    }

    pub fn at_default_path() -> Result<Self> {
        Ok(Self::new(Self::default_path()?))
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// A missing or unparseable file is an empty document. Any other read
    /// failure is an error: `set` must not replace a file it could not read.
    fn read_document(&self) -> Result<Map<String, Value>> {
        let content = match fs::read_to_string(&self.path) {
            Ok(c) => c,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Map::new()),
            Err(e) => {
                return Err(OAuthError::Storage(format!(
                    "failed to read {}: {e}",
                    self.path.display()
                )));
            },
        };
        match serde_json::from_str::<Value>(&content) {
            Ok(Value::Object(map)) => Ok(map),
            Ok(_) | Err(_) => {
                tracing::warn!(path = %self.path.display(), "ignoring unparseable token file");
                Ok(Map::new())
            },
        }
    }

    fn write_document(&self, document: &Map<String, Value>) -> Result<()> {
        let dir = self
            .path
            .parent()
            .filter(|p| !p.as_os_str().is_empty())
            .unwrap_or_else(|| Path::new("."));
        create_private_dir(dir)?;

        let content = serde_json::to_string_pretty(document)?;
        let tmp = self.path.with_extension("json.tmp");
        {
            let mut file = open_private(&tmp)?;
            file.write_all(content.as_bytes())?;
            file.sync_all()?;
        }
        fs::rename(&tmp, &self.path)?;
        tracing::debug!(path = %self.path.display(), "token file written");
        Ok(())
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, ()>> {
        self.write_lock
            .lock()
            .map_err(|_| OAuthError::Storage("file storage lock poisoned".into()))
    }
}

impl Storage for FileStorage {
    fn get(&self, key: &str) -> Result<Option<Value>> {
        let _guard = self.lock()?;
        match self.read_document() {
            Ok(mut document) => Ok(document.remove(key)),
            Err(e) => {
                tracing::warn!(error = %e, "token file unreadable, treating as empty");
                Ok(None)
            },
        }
    }

    fn set(&self, key: &str, value: Value) -> Result<()> {
        let _guard = self.lock()?;
        let mut document = self.read_document()?;
        document.insert(key.to_string(), value);
        self.write_document(&document)
    }

    fn clear(&self) -> Result<()> {
        let _guard = self.lock()?;
        self.write_document(&Map::new())
    }
}

#[cfg(unix)]
fn create_private_dir(dir: &Path) -> Result<()> {
    use std::os::unix::fs::DirBuilderExt;
    if dir.is_dir() {
        return Ok(());
    }
    fs::DirBuilder::new()
        .recursive(true)
        .mode(0o700)
        .create(dir)?;
    Ok(())
}

#[cfg(not(unix))]
fn create_private_dir(dir: &Path) -> Result<()> {
    fs::create_dir_all(dir)?;
    Ok(())
}

#[cfg(unix)]
fn open_private(path: &Path) -> Result<fs::File> {
    use std::os::unix::fs::{OpenOptionsExt, PermissionsExt};
    let file = fs::OpenOptions::new()
        .write(true)
        .create(true)
        .truncate(true)
        .mode(0o600)
        .open(path)?;
    // `mode` only applies on creation; tighten a leftover temp file too.
    file.set_permissions(fs::Permissions::from_mode(0o600))?;
    Ok(file)
}

#[cfg(not(unix))]
fn open_private(path: &Path) -> Result<fs::File> {
    Ok(fs::OpenOptions::new()
        .write(true)
        .create(true)
        .truncate(true)
        .open(path)?)
}

/// Typed access to the token pair kept under one storage key.
#[derive(Clone)]
pub struct TokenStore {
    storage: Arc<dyn Storage>,
    key: String,
}

impl TokenStore {
    pub const DEFAULT_KEY: &'static str = "tokens";

    pub fn new(storage: Arc<dyn Storage>) -> Self {
        Self {
            storage,
            key: Self::DEFAULT_KEY.to_string(),
        }
    }

    #[must_use]
    pub fn with_key(mut self, key: impl Into<String>) -> Self {
        self.key = key.into();
        self
    }

    pub fn key(&self) -> &str {
        &self.key
    }

    pub fn load(&self) -> Result<Option<OAuthTokens>> {
        match self.storage.get(&self.key)? {
            None | Some(Value::Null) => Ok(None),
            Some(value) => serde_json::from_value(value)
                .map(Some)
                .map_err(|e| OAuthError::Storage(format!("stored tokens are malformed: {e}"))),
        }
    }

    pub fn save(&self, tokens: &OAuthTokens) -> Result<()> {
        self.storage.set(&self.key, serde_json::to_value(tokens)?)
    }

    /// Remove this store's tokens, leaving other keys in place.
    pub fn forget(&self) -> Result<()> {
        self.storage.set(&self.key, Value::Null)
    }

    /// Drop every key in the underlying storage.
    pub fn clear(&self) -> Result<()> {
        self.storage.clear()
    }
}
