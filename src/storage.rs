use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use anyhow::Context as _;
use async_trait::async_trait;
use tokio::fs;

/// Storage key of the OCR credential.
pub const API_KEY: &str = "openrouterApiKey";

#[async_trait]
pub trait KeyValueStore: Send + Sync {
    async fn get(&self, key: &str) -> anyhow::Result<Option<String>>;
    async fn set(&self, key: &str, value: &str) -> anyhow::Result<()>;
}

/// One JSON object on disk, rewritten atomically on every `set`.
#[derive(Debug, Clone)]
pub struct LocalFsStore {
    path: PathBuf,
}

impl LocalFsStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    async fn read_all(&self) -> anyhow::Result<BTreeMap<String, String>> {
        let bytes = match fs::read(&self.path).await {
            Ok(bytes) => bytes,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(BTreeMap::new()),
            Err(err) => {
                return Err(err).with_context(|| format!("read: {}", self.path.display()));
            }
        };
        serde_json::from_slice(&bytes)
            .with_context(|| format!("parse json: {}", self.path.display()))
    }
}

#[async_trait]
impl KeyValueStore for LocalFsStore {
    async fn get(&self, key: &str) -> anyhow::Result<Option<String>> {
        let mut entries = self.read_all().await?;
        Ok(entries.remove(key))
    }

    async fn set(&self, key: &str, value: &str) -> anyhow::Result<()> {
        let mut entries = self.read_all().await?;
        entries.insert(key.to_owned(), value.to_owned());
        write_json_atomic(&self.path, &entries)
            .await
            .with_context(|| format!("write: {}", self.path.display()))
    }
}

/// The stored credential, `None` when it was never saved.
pub async fn load_api_key(store: &dyn KeyValueStore) -> anyhow::Result<Option<String>> {
    let key = store.get(API_KEY).await.context("load api key")?;
    Ok(key.filter(|key| !key.is_empty()))
}

/// Saves the trimmed credential; blank input is rejected.
pub async fn save_api_key(store: &dyn KeyValueStore, input: &str) -> anyhow::Result<String> {
    let key = input.trim();
    if key.is_empty() {
        anyhow::bail!("API Key cannot be empty.");
    }
    store.set(API_KEY, key).await.context("save api key")?;
    Ok(key.to_owned())
}

async fn write_json_atomic<T: serde::Serialize>(path: &Path, value: &T) -> anyhow::Result<()> {
    let parent = path
        .parent()
        .ok_or_else(|| anyhow::anyhow!("path has no parent: {}", path.display()))?;
    fs::create_dir_all(parent)
        .await
        .with_context(|| format!("create parent dir: {}", parent.display()))?;

    let tmp_path = path.with_extension(format!("tmp.{}", uuid::Uuid::new_v4().simple()));
    let data = serde_json::to_vec_pretty(value).context("serialize json")?;
    fs::write(&tmp_path, &data)
        .await
        .with_context(|| format!("write tmp: {}", tmp_path.display()))?;
    fs::rename(&tmp_path, path)
        .await
        .with_context(|| format!("rename tmp to final: {}", path.display()))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn saved_key_survives_reopening_the_store() -> anyhow::Result<()> {
        let temp = tempfile::TempDir::new()?;
        let path = temp.path().join("nested").join("storage.json");

        let store = LocalFsStore::new(&path);
        assert_eq!(load_api_key(&store).await?, None);
        assert_eq!(save_api_key(&store, "  sk-or-v1-abc  ").await?, "sk-or-v1-abc");

        let reopened = LocalFsStore::new(&path);
        assert_eq!(load_api_key(&reopened).await?.as_deref(), Some("sk-or-v1-abc"));

        save_api_key(&reopened, "sk-or-v1-def").await?;
        assert_eq!(load_api_key(&store).await?.as_deref(), Some("sk-or-v1-def"));
        Ok(())
    }

    #[tokio::test]
    async fn blank_key_is_rejected_and_nothing_is_written() -> anyhow::Result<()> {
        let temp = tempfile::TempDir::new()?;
        let store = LocalFsStore::new(temp.path().join("storage.json"));

        let err = save_api_key(&store, "   ").await.unwrap_err();
        assert_eq!(err.to_string(), "API Key cannot be empty.");
        assert!(!store.path().exists());
        Ok(())
    }

    #[tokio::test]
    async fn other_entries_are_preserved() -> anyhow::Result<()> {
        let temp = tempfile::TempDir::new()?;
        let store = LocalFsStore::new(temp.path().join("storage.json"));

        store.set("theme", "dark").await?;
        save_api_key(&store, "k").await?;
        assert_eq!(store.get("theme").await?.as_deref(), Some("dark"));
        Ok(())
    }

    #[tokio::test]
    async fn corrupt_file_is_an_error() -> anyhow::Result<()> {
        let temp = tempfile::TempDir::new()?;
        let path = temp.path().join("storage.json");
        std::fs::write(&path, "not json")?;

        assert!(load_api_key(&LocalFsStore::new(path)).await.is_err());
        Ok(())
    }
}
