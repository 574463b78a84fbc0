//! Opaque blob sink for human-readable event payloads.
//!
//! Every execution event gets a JSON payload (inputs, outputs, messages)
//! stored outside the graph and referenced from its state node. The file
//! backend keys blobs `<root>/<run_id>/<event_id>.json` so a run stays
//! inspectable offline.

use std::collections::HashMap;
use std::fmt::{self, Display};
use std::path::PathBuf;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use tracing::debug;

use crate::error::KnowledgeError;
use crate::KnowledgeResult;

/// Opaque reference to a stored blob
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct BlobRef(String);

impl BlobRef {
    /// Wrap an already-formed reference string
    pub fn new(location: impl Into<String>) -> Self {
        Self(location.into())
    }

    /// The reference string
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Display for BlobRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Sink for human-readable event payloads
#[async_trait]
pub trait HumanReadableSink: Send + Sync {
    /// Store a payload under `run_id`/`event_id`, returning its reference
    async fn store(
        &self,
        run_id: &str,
        event_id: &str,
        payload: &[u8],
    ) -> KnowledgeResult<BlobRef>;

    /// Load a payload by reference; `None` when the reference is unknown
    async fn load(&self, reference: &BlobRef) -> KnowledgeResult<Option<Vec<u8>>>;

    /// References of every payload stored for a run, in insertion order
    async fn list_run(&self, run_id: &str) -> KnowledgeResult<Vec<BlobRef>>;
}

/// Filesystem-backed sink
pub struct FileBlobSink {
    root: PathBuf,
}

impl FileBlobSink {
    /// Create a sink rooted at `root`; the directory is created lazily
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }
}

#[async_trait]
impl HumanReadableSink for FileBlobSink {
    async fn store(
        &self,
        run_id: &str,
        event_id: &str,
        payload: &[u8],
    ) -> KnowledgeResult<BlobRef> {
        let dir = self.root.join(run_id);
        tokio::fs::create_dir_all(&dir).await?;
        let path = dir.join(format!("{event_id}.json"));
        tokio::fs::write(&path, payload).await?;
        debug!(path = %path.display(), bytes = payload.len(), "stored human-readable payload");
        Ok(BlobRef::new(path.to_string_lossy().into_owned()))
    }

    async fn load(&self, reference: &BlobRef) -> KnowledgeResult<Option<Vec<u8>>> {
        match tokio::fs::read(reference.as_str()).await {
            Ok(bytes) => Ok(Some(bytes)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    async fn list_run(&self, run_id: &str) -> KnowledgeResult<Vec<BlobRef>> {
        let dir = self.root.join(run_id);
        let mut entries = match tokio::fs::read_dir(&dir).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };
        let mut refs = Vec::new();
        while let Some(entry) = entries
            .next_entry()
            .await
            .map_err(KnowledgeError::from)?
        {
            refs.push(BlobRef::new(entry.path().to_string_lossy().into_owned()));
        }
        refs.sort_by(|a, b| a.as_str().cmp(b.as_str()));
        Ok(refs)
    }
}

/// In-memory sink for tests
#[derive(Default)]
pub struct MemoryBlobSink {
    blobs: Mutex<HashMap<String, Vec<u8>>>,
    order: Mutex<Vec<String>>,
}

impl MemoryBlobSink {
    /// Create an empty sink
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl HumanReadableSink for MemoryBlobSink {
    async fn store(
        &self,
        run_id: &str,
        event_id: &str,
        payload: &[u8],
    ) -> KnowledgeResult<BlobRef> {
        let key = format!("mem:{run_id}/{event_id}.json");
        self.blobs.lock().await.insert(key.clone(), payload.to_vec());
        self.order.lock().await.push(key.clone());
        Ok(BlobRef::new(key))
    }

    async fn load(&self, reference: &BlobRef) -> KnowledgeResult<Option<Vec<u8>>> {
        Ok(self.blobs.lock().await.get(reference.as_str()).cloned())
    }

    async fn list_run(&self, run_id: &str) -> KnowledgeResult<Vec<BlobRef>> {
        let prefix = format!("mem:{run_id}/");
        Ok(self
            .order
            .lock()
            .await
            .iter()
            .filter(|key| key.starts_with(&prefix))
            .map(|key| BlobRef::new(key.clone()))
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn file_sink_round_trips_and_keys_by_run_and_event() {
        let dir = tempfile::tempdir().unwrap();
        let sink = FileBlobSink::new(dir.path());

        let reference = sink.store("run-1", "evt-1", b"{\"k\":1}").await.unwrap();
        assert!(reference.as_str().ends_with("run-1/evt-1.json"));

        let bytes = sink.load(&reference).await.unwrap().unwrap();
        assert_eq!(bytes, b"{\"k\":1}");

        sink.store("run-1", "evt-2", b"{}").await.unwrap();
        sink.store("run-2", "evt-1", b"{}").await.unwrap();
        assert_eq!(sink.list_run("run-1").await.unwrap().len(), 2);
        assert_eq!(sink.list_run("run-3").await.unwrap().len(), 0);
    }

    #[tokio::test]
    async fn memory_sink_preserves_insertion_order() {
        let sink = MemoryBlobSink::new();
        sink.store("r", "b", b"1").await.unwrap();
        sink.store("r", "a", b"2").await.unwrap();
        let refs = sink.list_run("r").await.unwrap();
        assert_eq!(refs.len(), 2);
        assert!(refs[0].as_str().ends_with("b.json"));

        let missing = sink.load(&BlobRef::new("mem:r/zzz.json")).await.unwrap();
        assert!(missing.is_none());
    }
}
