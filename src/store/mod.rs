//! Document store
//!
//! Canonical manifest/collection documents live in an object store addressed
//! by `/`-separated keys. The store exposes S3-style listing: keys share a
//! prefix, a delimiter groups them into simulated directories, and long
//! listings paginate through a continuation cursor. Writes are whole-object
//! replace with last-write-wins semantics; no precondition is checked.
//!
//! Two backends: `FsStore` maps keys onto a directory tree under a
//! configurable root, `MemoryStore` keeps a sorted map for unit tests.

pub mod keys;
pub mod repository;

use async_trait::async_trait;
use bytes::Bytes;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use tokio::fs;
use tokio::sync::RwLock;
use tracing::{debug, info};

use crate::types::{KuraError, Result};

pub use repository::Repository;

/// One page of a listing
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ListPage {
    /// Keys directly under the prefix (no delimiter past the prefix)
    pub keys: Vec<String>,
    /// Distinct sub-prefixes up to and including the next delimiter
    pub common_prefixes: Vec<String>,
    /// Opaque cursor resuming after the last consumed key, present only
    /// when the listing was truncated
    pub next_cursor: Option<String>,
}

/// Object store abstraction over whole-document reads/writes and
/// prefix+delimiter listing.
#[async_trait]
pub trait ObjectStore: Send + Sync {
    /// Whole-object replace. Last write wins; no precondition.
    async fn put(&self, key: &str, data: Bytes) -> Result<()>;

    /// Read an object. Absent keys are `None`, not an error.
    async fn get(&self, key: &str) -> Result<Option<Bytes>>;

    /// Delete an object. Deleting an absent key is a no-op.
    async fn delete(&self, key: &str) -> Result<()>;

    /// List keys under `prefix`, optionally grouped by `delimiter`,
    /// starting strictly after `cursor`, at most `max_keys` entries
    /// (keys plus common prefixes combined).
    async fn list(
        &self,
        prefix: &str,
        delimiter: Option<char>,
        cursor: Option<&str>,
        max_keys: usize,
    ) -> Result<ListPage>;
}

/// Group a sorted, prefix-filtered, cursor-advanced key stream into a page.
fn paginate(
    keys: impl IntoIterator<Item = String>,
    prefix: &str,
    delimiter: Option<char>,
    max_keys: usize,
) -> ListPage {
    let mut page = ListPage::default();
    let mut last_key: Option<String> = None;
    let mut iter = keys.into_iter().peekable();

    let group_of = |key: &str| -> Option<String> {
        let d = delimiter?;
        key[prefix.len()..]
            .find(d)
            .map(|pos| key[..prefix.len() + pos + 1].to_string())
    };

    while let Some(key) = iter.next() {
        match group_of(&key) {
            Some(group) => {
                if page.common_prefixes.last() != Some(&group) {
                    page.common_prefixes.push(group);
                }
            }
            None => page.keys.push(key.clone()),
        }
        last_key = Some(key);

        if page.keys.len() + page.common_prefixes.len() >= max_keys {
            // Finish the current group so the cursor lands on a group
            // boundary and no prefix repeats on the next page
            while let Some(next) = iter.peek() {
                match group_of(next) {
                    Some(ref group) if page.common_prefixes.last() == Some(group) => {
                        last_key = iter.next();
                    }
                    _ => break,
                }
            }
            if iter.peek().is_some() {
                page.next_cursor = last_key;
            }
            break;
        }
    }

    page
}

// ============================================================================
// Filesystem backend
// ============================================================================

/// Filesystem-backed object store rooted at a directory
pub struct FsStore {
    root: PathBuf,
}

impl FsStore {
    /// Create a store at the given directory, creating it if needed
    pub async fn new<P: AsRef<Path>>(root: P) -> Result<Self> {
        let root = root.as_ref().to_path_buf();
        fs::create_dir_all(&root).await?;
        info!(path = %root.display(), "Initialized document store");
        Ok(Self { root })
    }

    /// Store under a throwaway temp directory (for tests)
    pub fn new_temp() -> Self {
        let root = std::env::temp_dir().join(format!("kura-store-{}", uuid::Uuid::new_v4()));
        std::fs::create_dir_all(&root).ok();
        Self { root }
    }

    /// Resolve a key to a path inside the root.
    /// Keys are `/`-separated and must not escape the root.
    fn object_path(&self, key: &str) -> Result<PathBuf> {
        if key.is_empty()
            || key.starts_with('/')
            || key.contains('\\')
            || key.split('/').any(|segment| segment.is_empty() || segment == "." || segment == "..")
        {
            return Err(KuraError::BadRequest(format!("Invalid storage key {:?}", key)));
        }
        Ok(self.root.join(key))
    }

    /// Collect every key in the store, sorted lexicographically
    async fn collect_keys(&self) -> Result<Vec<String>> {
        let mut keys = Vec::new();
        let mut stack = vec![self.root.clone()];

        while let Some(dir) = stack.pop() {
            let mut entries = match fs::read_dir(&dir).await {
                Ok(entries) => entries,
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => continue,
                Err(e) => return Err(e.into()),
            };

            while let Some(entry) = entries.next_entry().await? {
                let path = entry.path();
                if entry.file_type().await?.is_dir() {
                    stack.push(path);
                } else if let Ok(rel) = path.strip_prefix(&self.root) {
                    let key = rel
                        .components()
                        .map(|c| c.as_os_str().to_string_lossy().into_owned())
                        .collect::<Vec<_>>()
                        .join("/");
                    keys.push(key);
                }
            }
        }

        keys.sort();
        Ok(keys)
    }
}

#[async_trait]
impl ObjectStore for FsStore {
    async fn put(&self, key: &str, data: Bytes) -> Result<()> {
        let path = self.object_path(key)?;
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).await?;
        }
        fs::write(&path, &data).await?;
        debug!(key = %key, size = data.len(), "Stored object");
        Ok(())
    }

    async fn get(&self, key: &str) -> Result<Option<Bytes>> {
        let path = self.object_path(key)?;
        match fs::read(&path).await {
            Ok(data) => Ok(Some(Bytes::from(data))),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    async fn delete(&self, key: &str) -> Result<()> {
        let path = self.object_path(key)?;
        match fs::remove_file(&path).await {
            Ok(()) => {
                debug!(key = %key, "Deleted object");
                Ok(())
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    async fn list(
        &self,
        prefix: &str,
        delimiter: Option<char>,
        cursor: Option<&str>,
        max_keys: usize,
    ) -> Result<ListPage> {
        let keys = self.collect_keys().await?;
        let filtered = keys.into_iter().filter(|k| {
            k.starts_with(prefix) && cursor.map_or(true, |c| k.as_str() > c)
        });
        Ok(paginate(filtered, prefix, delimiter, max_keys))
    }
}

// ============================================================================
// In-memory backend
// ============================================================================

/// In-memory object store for unit tests
#[derive(Default)]
pub struct MemoryStore {
    objects: RwLock<BTreeMap<String, Bytes>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl ObjectStore for MemoryStore {
    async fn put(&self, key: &str, data: Bytes) -> Result<()> {
        self.objects.write().await.insert(key.to_string(), data);
        Ok(())
    }

    async fn get(&self, key: &str) -> Result<Option<Bytes>> {
        Ok(self.objects.read().await.get(key).cloned())
    }

    async fn delete(&self, key: &str) -> Result<()> {
        self.objects.write().await.remove(key);
        Ok(())
    }

    async fn list(
        &self,
        prefix: &str,
        delimiter: Option<char>,
        cursor: Option<&str>,
        max_keys: usize,
    ) -> Result<ListPage> {
        let objects = self.objects.read().await;
        let filtered: Vec<String> = objects
            .keys()
            .filter(|k| k.starts_with(prefix) && cursor.map_or(true, |c| k.as_str() > c))
            .cloned()
            .collect();
        Ok(paginate(filtered, prefix, delimiter, max_keys))
    }
}
