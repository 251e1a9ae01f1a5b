//! Object store repository
//!
//! Input files, scored outputs and diagnostics live in an object store keyed
//! by `/`-separated paths, each object carrying a flat string tag set.
//!
//! The filesystem implementation maps keys onto files under a root directory
//! and keeps tags as JSON sidecars under `<root>/.tags/<key>.json`.

use async_trait::async_trait;
use std::collections::HashMap;
use std::ffi::OsStr;
use std::path::{Component, Path, PathBuf};
use thiserror::Error;
use tracing::debug;

const TAGS_DIR: &str = ".tags";

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("object not found: {0}")]
    NotFound(String),

    #[error("invalid object key: {0:?}")]
    InvalidKey(String),

    #[error("I/O error on {key}: {source}")]
    Io {
        key: String,
        #[source]
        source: std::io::Error,
    },

    #[error("unreadable tag set for {key}: {message}")]
    Tags { key: String, message: String },
}

impl StoreError {
    fn io(key: &str, source: std::io::Error) -> Self {
        if source.kind() == std::io::ErrorKind::NotFound {
            StoreError::NotFound(key.to_string())
        } else {
            StoreError::Io {
                key: key.to_string(),
                source,
            }
        }
    }
}

pub type Result<T> = std::result::Result<T, StoreError>;

/// Repository trait for object storage
#[async_trait]
pub trait ObjectStore: Send + Sync {
    /// Reads the full content of an object
    async fn get(&self, key: &str) -> Result<Vec<u8>>;

    /// Creates or replaces an object
    async fn put(&self, key: &str, content: Vec<u8>) -> Result<()>;

    /// Lists object keys starting with `prefix`, sorted
    ///
    /// Only objects are returned, never directory-like placeholders.
    async fn list(&self, prefix: &str) -> Result<Vec<String>>;

    /// Tags of an existing object; empty when it has none
    async fn tags(&self, key: &str) -> Result<HashMap<String, String>>;

    /// Replaces the tag set of an existing object
    async fn put_tags(&self, key: &str, tags: HashMap<String, String>) -> Result<()>;
}

/// Filesystem implementation of ObjectStore
pub struct FsObjectStore {
    root: PathBuf,
}

impl FsObjectStore {
    /// Creates a store rooted at `root`
    ///
    /// # Arguments
    /// * `root` - Directory holding the objects (created on first write)
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    fn object_path(&self, key: &str) -> Result<PathBuf> {
        Ok(self.root.join(validate_key(key)?))
    }

    fn tags_path(&self, key: &str) -> Result<PathBuf> {
        let relative = validate_key(key)?;
        let mut path = self.root.join(TAGS_DIR).join(relative);
        let file_name = format!(
            "{}.json",
            path.file_name()
                .map(|name| name.to_string_lossy().into_owned())
                .unwrap_or_default()
        );
        path.set_file_name(file_name);
        Ok(path)
    }

    async fn ensure_parent(key: &str, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| StoreError::io(key, e))?;
        }
        Ok(())
    }

    async fn require_object(&self, key: &str) -> Result<PathBuf> {
        let path = self.object_path(key)?;
        match tokio::fs::metadata(&path).await {
            Ok(meta) if meta.is_file() => Ok(path),
            Ok(_) => Err(StoreError::NotFound(key.to_string())),
            Err(e) => Err(StoreError::io(key, e)),
        }
    }
}

/// Rejects keys that would escape the store root or name a directory
fn validate_key(key: &str) -> Result<&Path> {
    let path = Path::new(key);
    let valid = !key.is_empty()
        && !key.ends_with('/')
        && path
            .components()
            .all(|component| matches!(component, Component::Normal(_)))
        && path.components().next() != Some(Component::Normal(OsStr::new(TAGS_DIR)));

    if valid {
        Ok(path)
    } else {
        Err(StoreError::InvalidKey(key.to_string()))
    }
}

#[async_trait]
impl ObjectStore for FsObjectStore {
    async fn get(&self, key: &str) -> Result<Vec<u8>> {
        let path = self.require_object(key).await?;
        tokio::fs::read(&path)
            .await
            .map_err(|e| StoreError::io(key, e))
    }

    async fn put(&self, key: &str, content: Vec<u8>) -> Result<()> {
        let path = self.object_path(key)?;
        Self::ensure_parent(key, &path).await?;
        debug!("Writing {} bytes to {}", content.len(), path.display());
        tokio::fs::write(&path, content)
            .await
            .map_err(|e| StoreError::io(key, e))
    }

    async fn list(&self, prefix: &str) -> Result<Vec<String>> {
        let mut keys = Vec::new();
        let mut pending = vec![self.root.clone()];

        while let Some(dir) = pending.pop() {
            let mut entries = match tokio::fs::read_dir(&dir).await {
                Ok(entries) => entries,
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => continue,
                Err(e) => return Err(StoreError::io(prefix, e)),
            };

            while let Some(entry) = entries
                .next_entry()
                .await
                .map_err(|e| StoreError::io(prefix, e))?
            {
                let path = entry.path();
                let file_type = entry
                    .file_type()
                    .await
                    .map_err(|e| StoreError::io(prefix, e))?;

                if file_type.is_dir() {
                    if dir == self.root && entry.file_name() == TAGS_DIR {
                        continue;
                    }
                    pending.push(path);
                } else if file_type.is_file() {
                    let Ok(relative) = path.strip_prefix(&self.root) else {
                        continue;
                    };
                    let key = relative
                        .components()
                        .map(|c| c.as_os_str().to_string_lossy())
                        .collect::<Vec<_>>()
                        .join("/");
                    if key.starts_with(prefix) {
                        keys.push(key);
                    }
                }
            }
        }

        keys.sort();
        Ok(keys)
    }

    async fn tags(&self, key: &str) -> Result<HashMap<String, String>> {
        self.require_object(key).await?;
        let path = self.tags_path(key)?;

        match tokio::fs::read(&path).await {
            Ok(bytes) => serde_json::from_slice(&bytes).map_err(|e| StoreError::Tags {
                key: key.to_string(),
                message: e.to_string(),
            }),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(HashMap::new()),
            Err(e) => Err(StoreError::io(key, e)),
        }
    }

    async fn put_tags(&self, key: &str, tags: HashMap<String, String>) -> Result<()> {
        self.require_object(key).await?;
        let path = self.tags_path(key)?;
        Self::ensure_parent(key, &path).await?;

        let json = serde_json::to_vec_pretty(&tags).map_err(|e| StoreError::Tags {
            key: key.to_string(),
            message: e.to_string(),
        })?;
        tokio::fs::write(&path, json)
            .await
            .map_err(|e| StoreError::io(key, e))
    }
}
