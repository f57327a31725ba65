//! Persistent key state
//!
//! The whole manager state is one JSON document with a `<provider>_keys`
//! array and a `<provider>_index` cursor per provider, plus `last_updated`.
//! Writes use atomic temp-file + rename so a crash mid-write never leaves a
//! truncated file. A missing or unreadable file loads as empty state; it is
//! never fatal.

use std::path::{Path, PathBuf};

use provider::BoxFuture;
use serde_json::{Map, Value};
use tracing::{debug, info, warn};

use crate::error::{Error, Result};
use crate::record::CredentialRecord;

/// Persisted state of one provider pool.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PoolState {
    pub provider: String,
    pub records: Vec<CredentialRecord>,
    pub cursor: usize,
}

/// Persisted state of every pool.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct StateSnapshot {
    pub pools: Vec<PoolState>,
    /// Unix milliseconds of the mutation that produced this snapshot
    pub last_updated: u64,
}

impl StateSnapshot {
    pub fn pool(&self, provider: &str) -> Option<&PoolState> {
        self.pools.iter().find(|p| p.provider == provider)
    }

    /// Render the on-disk document.
    pub fn to_json(&self) -> Result<Value> {
        let mut doc = Map::new();
        for pool in &self.pools {
            let records = serde_json::to_value(&pool.records)
                .map_err(|e| Error::Store(format!("serializing {} keys: {e}", pool.provider)))?;
            doc.insert(format!("{}_keys", pool.provider), records);
            doc.insert(format!("{}_index", pool.provider), Value::from(pool.cursor));
        }
        doc.insert("last_updated".into(), Value::from(self.last_updated));
        Ok(Value::Object(doc))
    }

    /// Parse the on-disk document. Missing cursors default to 0.
    pub fn from_json(value: &Value) -> Result<Self> {
        let doc = value
            .as_object()
            .ok_or_else(|| Error::Store("state document is not a JSON object".into()))?;

        let mut pools = Vec::new();
        for (name, entries) in doc {
            let Some(provider) = name.strip_suffix("_keys") else {
                continue;
            };
            let records: Vec<CredentialRecord> = serde_json::from_value(entries.clone())
                .map_err(|e| Error::Store(format!("parsing {name}: {e}")))?;
            let cursor = doc
                .get(&format!("{provider}_index"))
                .and_then(Value::as_u64)
                .unwrap_or(0) as usize;
            pools.push(PoolState {
                provider: provider.to_string(),
                records,
                cursor,
            });
        }

        Ok(Self {
            pools,
            last_updated: doc.get("last_updated").and_then(Value::as_u64).unwrap_or(0),
        })
    }
}

/// Backing store for manager state.
///
/// Uses `Pin<Box<dyn Future>>` return types for dyn-compatibility (`Arc<dyn StateStore>`).
pub trait StateStore: Send + Sync {
    /// Load the last saved state. `None` means start empty.
    fn load(&self) -> BoxFuture<'_, Option<StateSnapshot>>;

    /// Durably replace the saved state.
    fn save<'a>(&'a self, snapshot: &'a StateSnapshot) -> BoxFuture<'a, Result<()>>;
}

/// State store backed by a single JSON file.
#[derive(Debug, Clone)]
pub struct JsonFileStore {
    path: PathBuf,
}

impl JsonFileStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl StateStore for JsonFileStore {
    fn load(&self) -> BoxFuture<'_, Option<StateSnapshot>> {
        Box::pin(async move {
            let contents = match tokio::fs::read_to_string(&self.path).await {
                Ok(c) => c,
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                    info!(path = %self.path.display(), "state file not found, starting with empty state");
                    return None;
                }
                Err(e) => {
                    warn!(path = %self.path.display(), error = %e, "failed to read state file, starting with empty state");
                    return None;
                }
            };

            let parsed = serde_json::from_str::<Value>(&contents)
                .map_err(|e| Error::Store(format!("state file is not JSON: {e}")))
                .and_then(|value| StateSnapshot::from_json(&value));

            match parsed {
                Ok(snapshot) => {
                    info!(
                        path = %self.path.display(),
                        providers = snapshot.pools.len(),
                        "loaded key state"
                    );
                    Some(snapshot)
                }
                Err(e) => {
                    warn!(path = %self.path.display(), error = %e, "corrupt state file, starting with empty state");
                    None
                }
            }
        })
    }

    fn save<'a>(&'a self, snapshot: &'a StateSnapshot) -> BoxFuture<'a, Result<()>> {
        Box::pin(async move {
            let doc = snapshot.to_json()?;
            write_atomic(&self.path, &doc).await
        })
    }
}

/// Write the state document atomically.
///
/// Writes to a temporary file in the same directory, then renames it over
/// the target. Sets file permissions to 0600 (owner read/write only) since
/// the file contains API keys.
async fn write_atomic(path: &Path, doc: &Value) -> Result<()> {
    let json = serde_json::to_string_pretty(doc)
        .map_err(|e| Error::Store(format!("serializing state: {e}")))?;

    let dir = path
        .parent()
        .ok_or_else(|| Error::Store("state path has no parent directory".into()))?;
    let file_name = path
        .file_name()
        .and_then(|n| n.to_str())
        .unwrap_or("key-state.json");
    let tmp_path = dir.join(format!(".{file_name}.tmp.{}", std::process::id()));

    tokio::fs::write(&tmp_path, json.as_bytes())
        .await
        .map_err(|e| Error::Store(format!("writing temp state file: {e}")))?;

    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        let perms = std::fs::Permissions::from_mode(0o600);
        tokio::fs::set_permissions(&tmp_path, perms)
            .await
            .map_err(|e| Error::Store(format!("setting state file permissions: {e}")))?;
    }

    tokio::fs::rename(&tmp_path, path)
        .await
        .map_err(|e| Error::Store(format!("renaming temp state file: {e}")))?;

    debug!(path = %path.display(), "persisted key state");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(key: &str, provider: &str) -> CredentialRecord {
        CredentialRecord {
            key: key.into(),
            provider: provider.into(),
            last_used_at: 1_730_000_000_123,
            unavailable_until: 1_730_003_600_123,
            consecutive_error_count: 2,
            success_count: 17,
            error_count: 5,
        }
    }

    fn snapshot() -> StateSnapshot {
        StateSnapshot {
            pools: vec![
                PoolState {
                    provider: "openrouter".into(),
                    records: vec![record("or-1", "openrouter"), record("or-2", "openrouter")],
                    cursor: 1,
                },
                PoolState {
                    provider: "groq".into(),
                    records: vec![],
                    cursor: 0,
                },
            ],
            last_updated: 1_730_000_000_999,
        }
    }

    #[test]
    fn document_has_per_provider_arrays_and_cursors() {
        let doc = snapshot().to_json().unwrap();
        assert_eq!(doc["openrouter_keys"].as_array().unwrap().len(), 2);
        assert_eq!(doc["openrouter_index"], 1);
        assert_eq!(doc["groq_keys"], serde_json::json!([]));
        assert_eq!(doc["groq_index"], 0);
        assert_eq!(doc["last_updated"], 1_730_000_000_999u64);

        let entry = &doc["openrouter_keys"][0];
        for field in [
            "key",
            "provider",
            "last_used_at",
            "unavailable_until",
            "consecutive_error_count",
            "success_count",
            "error_count",
        ] {
            assert!(entry.get(field).is_some(), "missing field {field}");
        }
    }

    #[test]
    fn missing_index_defaults_to_zero() {
        let doc = serde_json::json!({
            "gemini_keys": [{ "key": "g-1", "provider": "gemini" }]
        });
        let parsed = StateSnapshot::from_json(&doc).unwrap();
        let pool = parsed.pool("gemini").unwrap();
        assert_eq!(pool.cursor, 0);
        assert_eq!(pool.records[0].success_count, 0);
        assert_eq!(pool.records[0].error_count, 0);
        assert_eq!(parsed.last_updated, 0);
    }

    #[tokio::test]
    async fn roundtrip_save_load() {
        let dir = tempfile::tempdir().unwrap();
        let store = JsonFileStore::new(dir.path().join("state.json"));

        store.save(&snapshot()).await.unwrap();
        let loaded = store.load().await.unwrap();

        assert_eq!(loaded.pool("openrouter"), snapshot().pool("openrouter"));
        assert_eq!(loaded.pool("groq"), snapshot().pool("groq"));
        assert_eq!(loaded.last_updated, 1_730_000_000_999);
    }

    #[tokio::test]
    async fn missing_file_loads_as_none() {
        let dir = tempfile::tempdir().unwrap();
        let store = JsonFileStore::new(dir.path().join("absent.json"));
        assert!(store.load().await.is_none());
    }

    #[tokio::test]
    async fn corrupt_file_loads_as_none() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("state.json");
        tokio::fs::write(&path, "{ not json").await.unwrap();
        assert!(JsonFileStore::new(&path).load().await.is_none());

        tokio::fs::write(&path, r#"{"openrouter_keys": "nope"}"#)
            .await
            .unwrap();
        assert!(JsonFileStore::new(&path).load().await.is_none());

        tokio::fs::write(&path, "[1, 2, 3]").await.unwrap();
        assert!(JsonFileStore::new(&path).load().await.is_none());
    }

    #[tokio::test]
    async fn save_leaves_no_temp_file() {
        let dir = tempfile::tempdir().unwrap();
        let store = JsonFileStore::new(dir.path().join("state.json"));
        store.save(&snapshot()).await.unwrap();

        let mut entries = tokio::fs::read_dir(dir.path()).await.unwrap();
        let mut names = Vec::new();
        while let Some(entry) = entries.next_entry().await.unwrap() {
            names.push(entry.file_name().to_string_lossy().to_string());
        }
        assert_eq!(names, vec!["state.json"]);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn file_permissions_are_0600() {
        use std::os::unix::fs::PermissionsExt;

        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("state.json");
        JsonFileStore::new(&path).save(&snapshot()).await.unwrap();

        let metadata = tokio::fs::metadata(&path).await.unwrap();
        let mode = metadata.permissions().mode() & 0o777;
        assert_eq!(mode, 0o600, "state file must be 0600, got {mode:o}");
    }
}
