use std::collections::BTreeMap;
use std::path::PathBuf;

use async_trait::async_trait;
use log::info;
use tokio::fs;

use crate::error::{Error, Result};

/// Durable key-value log mirroring the interval store. The external store
/// (a versioned repo in the original deployment) is only expected to give
/// atomic whole-document replacement; the allocator replays `read_all` at
/// startup and writes through on every mutation.
#[async_trait]
pub trait OccupiedLog: Send + Sync {
    /// Add or update one entry. Returns only after the write is durable.
    async fn append(&self, key: &str, cidr: &str) -> Result<()>;

    /// Remove the first entry whose value equals `cidr`.
    async fn remove_value(&self, cidr: &str) -> Result<()>;

    /// Full persisted mapping of key to CIDR.
    async fn read_all(&self) -> Result<BTreeMap<String, String>>;
}

/// JSON document on local disk, one object mapping `"<reason>-<timestamp>"`
/// to a CIDR string. Every mutation rewrites the document through a
/// temp-file rename so a crash never leaves a half-written state file.
pub struct JsonFileLog {
    path: PathBuf,
}

impl JsonFileLog {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    async fn load(&self) -> Result<BTreeMap<String, String>> {
        match fs::read_to_string(&self.path).await {
            Ok(contents) => Ok(serde_json::from_str(&contents)?),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(BTreeMap::new()),
            Err(e) => Err(e.into()),
        }
    }

    async fn store(&self, doc: &BTreeMap<String, String>) -> Result<()> {
        let body = serde_json::to_string_pretty(doc)?;
        let tmp = self.path.with_extension("tmp");
        fs::write(&tmp, body.as_bytes()).await?;
        fs::rename(&tmp, &self.path).await?;
        Ok(())
    }
}

#[async_trait]
impl OccupiedLog for JsonFileLog {
    async fn append(&self, key: &str, cidr: &str) -> Result<()> {
        let mut doc = self.load().await?;
        doc.insert(key.to_string(), cidr.to_string());
        self.store(&doc).await?;
        info!("Persisted {} -> {}", key, cidr);
        Ok(())
    }

    async fn remove_value(&self, cidr: &str) -> Result<()> {
        let mut doc = self.load().await?;
        let key = doc
            .iter()
            .find(|(_, v)| v.as_str() == cidr)
            .map(|(k, _)| k.clone())
            .ok_or_else(|| Error::NotFound(cidr.to_string()))?;
        doc.remove(&key);
        self.store(&doc).await?;
        info!("Removed {} ({}) from the state file", cidr, key);
        Ok(())
    }

    async fn read_all(&self) -> Result<BTreeMap<String, String>> {
        self.load().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn missing_file_reads_as_empty() {
        let dir = tempfile::tempdir().unwrap();
        let log = JsonFileLog::new(dir.path().join("occupied-range.json"));
        assert!(log.read_all().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn append_then_read_round_trips() {
        let dir = tempfile::tempdir().unwrap();
        let log = JsonFileLog::new(dir.path().join("occupied-range.json"));

        log.append("build-42-1700000000", "10.0.0.0/24").await.unwrap();
        log.append("build-43-1700000001", "10.0.1.0/24").await.unwrap();

        let doc = log.read_all().await.unwrap();
        assert_eq!(doc.len(), 2);
        assert_eq!(doc["build-42-1700000000"], "10.0.0.0/24");
    }

    #[tokio::test]
    async fn remove_by_value_deletes_the_matching_entry() {
        let dir = tempfile::tempdir().unwrap();
        let log = JsonFileLog::new(dir.path().join("occupied-range.json"));

        log.append("a-1700000000", "10.0.0.0/24").await.unwrap();
        log.append("b-1700000001", "10.0.1.0/24").await.unwrap();

        log.remove_value("10.0.0.0/24").await.unwrap();
        let doc = log.read_all().await.unwrap();
        assert_eq!(doc.len(), 1);
        assert!(doc.contains_key("b-1700000001"));

        let err = log.remove_value("10.0.0.0/24").await.unwrap_err();
        assert!(matches!(err, Error::NotFound(_)));
    }

    #[tokio::test]
    async fn corrupt_document_is_a_persistence_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("occupied-range.json");
        std::fs::write(&path, "not json").unwrap();
        let log = JsonFileLog::new(&path);
        assert!(matches!(
            log.read_all().await,
            Err(Error::Persistence(_))
        ));
    }
}
