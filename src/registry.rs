use serde::{Deserialize, Serialize};

use crate::{
    foundation::error::{ForgeError, ForgeResult},
    store::{self, KvStore},
};

/// A rendered, uniquely identified composition.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Artifact {
    pub id: u64,
    /// Trait names in layer order.
    pub traits: Vec<String>,
    /// PNG bytes.
    #[serde(with = "store::base64_bytes")]
    pub image: Vec<u8>,
}

/// Append-only artifact list with a durable copy of every record.
///
/// Ids start at 1 and grow by one per registration; they are never reused.
///
/// Records are written in id order. A record whose write failed stays pending and is
/// written again before any later one, so the store never holds id `n + 1` without `n`.
#[derive(Debug)]
pub struct ArtifactRegistry<S> {
    store: S,
    artifacts: Vec<Artifact>,
    /// Leading artifacts known to be in the store.
    persisted: usize,
}

impl<S: KvStore> ArtifactRegistry<S> {
    /// An empty registry. Records already in `store` are ignored and will be overwritten.
    pub fn new(store: S) -> Self {
        Self {
            store,
            artifacts: Vec::new(),
            persisted: 0,
        }
    }

    /// Reload every persisted artifact, ordered by id.
    pub fn restore(store: S) -> ForgeResult<Self> {
        let mut ids: Vec<u64> = store
            .keys_with_prefix(store::artifact_prefix())?
            .iter()
            .filter_map(|k| store::parse_artifact_key(k))
            .collect();
        ids.sort_unstable();

        let mut artifacts = Vec::with_capacity(ids.len());
        for (pos, id) in ids.into_iter().enumerate() {
            let expected = pos as u64 + 1;
            if id != expected {
                return Err(ForgeError::storage(format!(
                    "artifact ids are not contiguous: expected {expected}, found {id}"
                )));
            }
            let key = store::artifact_key(id);
            let bytes = store
                .get(&key)?
                .ok_or_else(|| ForgeError::storage(format!("artifact record '{key}' vanished")))?;
            let artifact: Artifact = serde_json::from_slice(&bytes)?;
            if artifact.id != id {
                return Err(ForgeError::storage(format!(
                    "record '{key}' holds artifact {}",
                    artifact.id
                )));
            }
            artifacts.push(artifact);
        }

        tracing::debug!(count = artifacts.len(), "restored artifacts");
        Ok(Self {
            store,
            persisted: artifacts.len(),
            artifacts,
        })
    }

    pub fn next_id(&self) -> u64 {
        self.artifacts.len() as u64 + 1
    }

    /// Append a new artifact and persist it, after any records still pending.
    ///
    /// The in-memory append is kept even when persisting fails; the error is returned so
    /// the caller can stop the batch. The record stays pending until a later `register`
    /// or [`ArtifactRegistry::flush`] writes it.
    pub fn register(&mut self, traits: Vec<String>, image: Vec<u8>) -> ForgeResult<u64> {
        let id = self.next_id();
        self.artifacts.push(Artifact { id, traits, image });
        self.flush()?;
        Ok(id)
    }

    /// Write every pending record in id order, stopping at the first failure.
    pub fn flush(&mut self) -> ForgeResult<()> {
        while let Some(artifact) = self.artifacts.get(self.persisted) {
            let bytes = serde_json::to_vec(artifact)?;
            self.store.put(&store::artifact_key(artifact.id), &bytes)?;
            self.persisted += 1;
        }
        Ok(())
    }

    /// Artifacts held in memory whose record is not yet in the store.
    pub fn pending(&self) -> usize {
        self.artifacts.len() - self.persisted
    }

    pub fn all(&self) -> &[Artifact] {
        &self.artifacts
    }

    pub fn count(&self) -> usize {
        self.artifacts.len()
    }

    pub fn get(&self, id: u64) -> Option<&Artifact> {
        let idx = usize::try_from(id.checked_sub(1)?).ok()?;
        self.artifacts.get(idx)
    }

    /// Read a record straight from the store, bypassing memory.
    pub fn load(&self, id: u64) -> ForgeResult<Option<Artifact>> {
        match self.store.get(&store::artifact_key(id))? {
            Some(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
            None => Ok(None),
        }
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    /// Drop every artifact from memory and from the store.
    pub(crate) fn clear(&mut self) -> ForgeResult<()> {
        for key in self.store.keys_with_prefix(store::artifact_prefix())? {
            self.store.remove(&key)?;
        }
        self.artifacts.clear();
        self.persisted = 0;
        Ok(())
    }
}
