use std::{
    collections::BTreeMap,
    path::{Path, PathBuf},
    sync::{
        Mutex,
        atomic::{AtomicBool, Ordering},
    },
};

use crate::foundation::error::{ForgeError, ForgeResult};

const LAYER_PREFIX: &str = "layer_";
const ARTIFACT_PREFIX: &str = "artifact_";

/// Storage key for the trait list of layer `index`.
pub fn layer_key(index: usize) -> String {
    format!("{LAYER_PREFIX}{index}")
}

/// Storage key for the persisted record of artifact `id`.
pub fn artifact_key(id: u64) -> String {
    format!("{ARTIFACT_PREFIX}{id}")
}

pub(crate) fn parse_layer_key(key: &str) -> Option<usize> {
    key.strip_prefix(LAYER_PREFIX)?.parse().ok()
}

pub(crate) fn parse_artifact_key(key: &str) -> Option<u64> {
    key.strip_prefix(ARTIFACT_PREFIX)?.parse().ok()
}

pub(crate) fn layer_prefix() -> &'static str {
    LAYER_PREFIX
}

pub(crate) fn artifact_prefix() -> &'static str {
    ARTIFACT_PREFIX
}

/// Durable key-value store holding trait layers and artifact records.
pub trait KvStore {
    fn get(&self, key: &str) -> ForgeResult<Option<Vec<u8>>>;
    fn put(&self, key: &str, value: &[u8]) -> ForgeResult<()>;
    fn remove(&self, key: &str) -> ForgeResult<()>;
    /// Keys starting with `prefix`, in lexicographic order.
    fn keys_with_prefix(&self, prefix: &str) -> ForgeResult<Vec<String>>;
}

/// One file per key under a root directory.
#[derive(Debug, Clone)]
pub struct FsStore {
    root: PathBuf,
}

impl FsStore {
    pub fn open(root: impl Into<PathBuf>) -> ForgeResult<Self> {
        let root = root.into();
        std::fs::create_dir_all(&root).map_err(|e| {
            ForgeError::storage(format!("create store dir '{}': {e}", root.display()))
        })?;
        Ok(Self { root })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn path_for(&self, key: &str) -> ForgeResult<PathBuf> {
        if key.is_empty()
            || !key
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-')
        {
            return Err(ForgeError::storage(format!("invalid store key '{key}'")));
        }
        Ok(self.root.join(format!("{key}.json")))
    }
}

impl KvStore for FsStore {
    fn get(&self, key: &str) -> ForgeResult<Option<Vec<u8>>> {
        let path = self.path_for(key)?;
        match std::fs::read(&path) {
            Ok(bytes) => Ok(Some(bytes)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(ForgeError::storage(format!(
                "read '{}': {e}",
                path.display()
            ))),
        }
    }

    fn put(&self, key: &str, value: &[u8]) -> ForgeResult<()> {
        let path = self.path_for(key)?;
        let tmp = path.with_extension("json.tmp");
        std::fs::write(&tmp, value)
            .map_err(|e| ForgeError::storage(format!("write '{}': {e}", tmp.display())))?;
        std::fs::rename(&tmp, &path)
            .map_err(|e| ForgeError::storage(format!("rename to '{}': {e}", path.display())))
    }

    fn remove(&self, key: &str) -> ForgeResult<()> {
        let path = self.path_for(key)?;
        match std::fs::remove_file(&path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(ForgeError::storage(format!(
                "remove '{}': {e}",
                path.display()
            ))),
        }
    }

    fn keys_with_prefix(&self, prefix: &str) -> ForgeResult<Vec<String>> {
        let entries = std::fs::read_dir(&self.root).map_err(|e| {
            ForgeError::storage(format!("list store dir '{}': {e}", self.root.display()))
        })?;
        let mut keys = Vec::new();
        for entry in entries {
            let entry = entry.map_err(|e| ForgeError::storage(format!("list store dir: {e}")))?;
            let name = entry.file_name();
            let Some(name) = name.to_str() else {
                continue;
            };
            if let Some(key) = name.strip_suffix(".json")
                && key.starts_with(prefix)
            {
                keys.push(key.to_string());
            }
        }
        keys.sort();
        Ok(keys)
    }
}

/// In-memory store for tests and throwaway collections.
#[derive(Debug, Default)]
pub struct MemoryStore {
    entries: Mutex<BTreeMap<String, Vec<u8>>>,
    fail_writes: AtomicBool,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every subsequent `put` fail with a storage error.
    pub fn fail_writes(&self, fail: bool) {
        self.fail_writes.store(fail, Ordering::Release);
    }

    pub fn len(&self) -> usize {
        self.lock().map(|m| m.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn lock(&self) -> ForgeResult<std::sync::MutexGuard<'_, BTreeMap<String, Vec<u8>>>> {
        self.entries
            .lock()
            .map_err(|_| ForgeError::storage("memory store lock poisoned"))
    }
}

impl KvStore for MemoryStore {
    fn get(&self, key: &str) -> ForgeResult<Option<Vec<u8>>> {
        Ok(self.lock()?.get(key).cloned())
    }

    fn put(&self, key: &str, value: &[u8]) -> ForgeResult<()> {
        if self.fail_writes.load(Ordering::Acquire) {
            return Err(ForgeError::storage(format!("write '{key}' rejected")));
        }
        self.lock()?.insert(key.to_string(), value.to_vec());
        Ok(())
    }

    fn remove(&self, key: &str) -> ForgeResult<()> {
        self.lock()?.remove(key);
        Ok(())
    }

    fn keys_with_prefix(&self, prefix: &str) -> ForgeResult<Vec<String>> {
        Ok(self
            .lock()?
            .keys()
            .filter(|k| k.starts_with(prefix))
            .cloned()
            .collect())
    }
}

impl<S: KvStore + ?Sized> KvStore for &S {
    fn get(&self, key: &str) -> ForgeResult<Option<Vec<u8>>> {
        (**self).get(key)
    }

    fn put(&self, key: &str, value: &[u8]) -> ForgeResult<()> {
        (**self).put(key, value)
    }

    fn remove(&self, key: &str) -> ForgeResult<()> {
        (**self).remove(key)
    }

    fn keys_with_prefix(&self, prefix: &str) -> ForgeResult<Vec<String>> {
        (**self).keys_with_prefix(prefix)
    }
}

impl<S: KvStore + ?Sized> KvStore for std::sync::Arc<S> {
    fn get(&self, key: &str) -> ForgeResult<Option<Vec<u8>>> {
        (**self).get(key)
    }

    fn put(&self, key: &str, value: &[u8]) -> ForgeResult<()> {
        (**self).put(key, value)
    }

    fn remove(&self, key: &str) -> ForgeResult<()> {
        (**self).remove(key)
    }

    fn keys_with_prefix(&self, prefix: &str) -> ForgeResult<Vec<String>> {
        (**self).keys_with_prefix(prefix)
    }
}

/// Serde adapter storing raw bytes as standard base64 text.
pub(crate) mod base64_bytes {
    use base64::Engine as _;
    use serde::{Deserialize, Deserializer, Serializer};

    pub(crate) fn serialize<S: Serializer>(bytes: &[u8], s: S) -> Result<S::Ok, S::Error> {
        s.serialize_str(&base64::engine::general_purpose::STANDARD.encode(bytes))
    }

    pub(crate) fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Vec<u8>, D::Error> {
        let text = String::deserialize(d)?;
        base64::engine::general_purpose::STANDARD
            .decode(text.as_bytes())
            .map_err(serde::de::Error::custom)
    }
}
