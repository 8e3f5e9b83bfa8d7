//! Persisted key/value state.
//!
//! Two stores are in play: a synchronized settings store holding the user's
//! configuration, and a local store holding the transient capture, result and
//! session records. Both speak the same [`KeyValueStore`] interface so the
//! pipeline runs identically over [`MemoryStore`] (tests, single process) and
//! [`FileStore`] (CLI, shared between processes).

use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{Duration as ChronoDuration, Utc};
use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::Value;
use thiserror::Error;
use tokio::sync::{Mutex, RwLock};

use crate::config::{JsonObject, VisionKeyConfig, VisionKeyConfigError};
use crate::types::{
    AnalysisResultRecord, CaptureRecord, ExecutionSurface, SessionState, SessionStatus,
};

/// Keys used in the local store.
pub mod keys {
    pub const CAPTURED_IMAGE: &str = "capturedImage";
    pub const CAPTURE_TIMESTAMP: &str = "captureTimestamp";
    pub const ANALYSIS_RESULT: &str = "analysisResult";
    pub const SESSION_STATE: &str = "sessionState";

    /// Everything describing the current capture and its result.
    pub const CAPTURE_KEYS: [&str; 3] = [ANALYSIS_RESULT, CAPTURE_TIMESTAMP, CAPTURED_IMAGE];
}

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("store I/O failed: {0}")]
    Io(#[from] std::io::Error),
    #[error("store contents are not valid JSON: {0}")]
    Serialization(#[from] serde_json::Error),
    #[error("store file {path} does not hold a JSON object")]
    NotAnObject { path: PathBuf },
    #[error(transparent)]
    Settings(#[from] VisionKeyConfigError),
}

/// Minimal asynchronous key/value storage over JSON values.
#[async_trait]
pub trait KeyValueStore: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<Value>, StoreError>;

    async fn get_all(&self) -> Result<JsonObject, StoreError>;

    /// Insert or replace every entry in `entries`.
    async fn set(&self, entries: JsonObject) -> Result<(), StoreError>;

    async fn remove(&self, keys: &[&str]) -> Result<(), StoreError>;

    async fn clear(&self) -> Result<(), StoreError>;
}

#[async_trait]
impl<T: KeyValueStore + ?Sized> KeyValueStore for Arc<T> {
    async fn get(&self, key: &str) -> Result<Option<Value>, StoreError> {
        (**self).get(key).await
    }

    async fn get_all(&self) -> Result<JsonObject, StoreError> {
        (**self).get_all().await
    }

    async fn set(&self, entries: JsonObject) -> Result<(), StoreError> {
        (**self).set(entries).await
    }

    async fn remove(&self, keys: &[&str]) -> Result<(), StoreError> {
        (**self).remove(keys).await
    }

    async fn clear(&self) -> Result<(), StoreError> {
        (**self).clear().await
    }
}

/// In-process store.
#[derive(Debug, Default)]
pub struct MemoryStore {
    entries: RwLock<JsonObject>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl KeyValueStore for MemoryStore {
    async fn get(&self, key: &str) -> Result<Option<Value>, StoreError> {
        Ok(self.entries.read().await.get(key).cloned())
    }

    async fn get_all(&self) -> Result<JsonObject, StoreError> {
        Ok(self.entries.read().await.clone())
    }

    async fn set(&self, entries: JsonObject) -> Result<(), StoreError> {
        self.entries.write().await.extend(entries);
        Ok(())
    }

    async fn remove(&self, keys: &[&str]) -> Result<(), StoreError> {
        let mut guard = self.entries.write().await;
        for key in keys {
            guard.remove(*key);
        }
        Ok(())
    }

    async fn clear(&self) -> Result<(), StoreError> {
        self.entries.write().await.clear();
        Ok(())
    }
}

/// Store persisted as a single JSON object on disk.
///
/// A missing file reads as an empty store. Writes rewrite the whole file;
/// concurrent writers from other processes follow last-write-wins.
#[derive(Debug)]
pub struct FileStore {
    path: PathBuf,
    write_lock: Mutex<()>,
}

impl FileStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            write_lock: Mutex::new(()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    async fn read(&self) -> Result<JsonObject, StoreError> {
        let raw = match tokio::fs::read_to_string(&self.path).await {
            Ok(raw) => raw,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
                return Ok(JsonObject::new());
            }
            Err(err) => return Err(err.into()),
        };
        if raw.trim().is_empty() {
            return Ok(JsonObject::new());
        }
        match serde_json::from_str(&raw)? {
            Value::Object(map) => Ok(map),
            _ => Err(StoreError::NotAnObject {
                path: self.path.clone(),
            }),
        }
    }

    async fn write(&self, entries: &JsonObject) -> Result<(), StoreError> {
        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent).await?;
        }
        let json = serde_json::to_string_pretty(entries)?;
        tokio::fs::write(&self.path, json).await?;
        Ok(())
    }

    async fn update<F>(&self, apply: F) -> Result<(), StoreError>
    where
        F: FnOnce(&mut JsonObject) + Send,
    {
        let _guard = self.write_lock.lock().await;
        let mut entries = self.read().await?;
        apply(&mut entries);
        self.write(&entries).await
    }
}

#[async_trait]
impl KeyValueStore for FileStore {
    async fn get(&self, key: &str) -> Result<Option<Value>, StoreError> {
        Ok(self.read().await?.remove(key))
    }

    async fn get_all(&self) -> Result<JsonObject, StoreError> {
        self.read().await
    }

    async fn set(&self, entries: JsonObject) -> Result<(), StoreError> {
        self.update(move |current| current.extend(entries)).await
    }

    async fn remove(&self, keys: &[&str]) -> Result<(), StoreError> {
        self.update(|current| {
            for key in keys {
                current.remove(*key);
            }
        })
        .await
    }

    async fn clear(&self) -> Result<(), StoreError> {
        let _guard = self.write_lock.lock().await;
        self.write(&JsonObject::new()).await
    }
}

async fn get_typed<T, S>(store: &S, key: &str) -> Result<Option<T>, StoreError>
where
    T: DeserializeOwned,
    S: KeyValueStore + ?Sized,
{
    match store.get(key).await? {
        None | Some(Value::Null) => Ok(None),
        Some(value) => Ok(Some(serde_json::from_value(value)?)),
    }
}

fn entry(key: &str, value: impl Serialize) -> Result<JsonObject, StoreError> {
    let mut map = JsonObject::new();
    map.insert(key.to_string(), serde_json::to_value(value)?);
    Ok(map)
}

/// Typed access to the local capture/result/session records.
#[derive(Debug, Clone)]
pub struct CaptureStore<S> {
    store: S,
}

impl<S: KeyValueStore> CaptureStore<S> {
    pub fn new(store: S) -> Self {
        Self { store }
    }

    pub fn inner(&self) -> &S {
        &self.store
    }

    /// Store a new capture. Any previous capture and result is deleted
    /// before the new image is written.
    pub async fn begin_capture(
        &self,
        captured_image: impl Into<String>,
        capture_timestamp: i64,
    ) -> Result<CaptureRecord, StoreError> {
        self.store.remove(&keys::CAPTURE_KEYS).await?;

        let record = CaptureRecord {
            captured_image: captured_image.into(),
            capture_timestamp,
        };
        let mut entries = entry(keys::CAPTURED_IMAGE, &record.captured_image)?;
        entries.extend(entry(keys::CAPTURE_TIMESTAMP, record.capture_timestamp)?);
        self.store.set(entries).await?;
        Ok(record)
    }

    /// Drop the capture, its timestamp and any result (user retake, or a
    /// capture consumed by a successful auto-answer).
    pub async fn clear_capture(&self) -> Result<(), StoreError> {
        self.store.remove(&keys::CAPTURE_KEYS).await
    }

    /// Drop the displayed result, keeping the capture.
    pub async fn clear_result(&self) -> Result<(), StoreError> {
        self.store.remove(&[keys::ANALYSIS_RESULT]).await
    }

    /// Wipe the whole local store.
    pub async fn clear_history(&self) -> Result<(), StoreError> {
        self.store.clear().await
    }

    /// Whether the capture taken at `capture_timestamp` is still the stored
    /// one, i.e. no newer capture, retake or history clear happened since.
    pub async fn is_current(&self, capture_timestamp: i64) -> Result<bool, StoreError> {
        Ok(self
            .load_capture()
            .await?
            .is_some_and(|capture| capture.capture_timestamp == capture_timestamp))
    }

    pub async fn load_capture(&self) -> Result<Option<CaptureRecord>, StoreError> {
        let image: Option<String> = get_typed(&self.store, keys::CAPTURED_IMAGE).await?;
        let timestamp: Option<i64> = get_typed(&self.store, keys::CAPTURE_TIMESTAMP).await?;
        Ok(image
            .filter(|image| !image.is_empty())
            .map(|captured_image| CaptureRecord {
                captured_image,
                capture_timestamp: timestamp.unwrap_or_default(),
            }))
    }

    pub async fn save_result(&self, record: &AnalysisResultRecord) -> Result<(), StoreError> {
        self.store.set(entry(keys::ANALYSIS_RESULT, record)?).await
    }

    pub async fn load_result(&self) -> Result<Option<AnalysisResultRecord>, StoreError> {
        get_typed(&self.store, keys::ANALYSIS_RESULT).await
    }

    pub async fn load_session_state(&self) -> Result<Option<SessionState>, StoreError> {
        get_typed(&self.store, keys::SESSION_STATE).await
    }

    /// Write a new session state.
    ///
    /// `revision` is one past the stored revision and `updated_at` never
    /// moves backwards, so a reader holding an older copy can tell it is
    /// stale even when two writers race.
    pub async fn record_session(
        &self,
        status: SessionStatus,
        surface: ExecutionSurface,
        capture_timestamp: Option<i64>,
        last_error: Option<String>,
    ) -> Result<SessionState, StoreError> {
        let previous = self.load_session_state().await?;
        let now = Utc::now();

        let state = match previous {
            Some(previous) => {
                let same_run = previous.is_in_flight()
                    && previous.capture_timestamp == capture_timestamp
                    && status != SessionStatus::Analyzing;
                let floor = previous.updated_at + ChronoDuration::milliseconds(1);
                SessionState {
                    status,
                    surface,
                    started_at: if same_run { previous.started_at } else { now },
                    updated_at: now.max(floor),
                    revision: previous.revision.saturating_add(1),
                    capture_timestamp,
                    last_error,
                }
            }
            None => SessionState {
                status,
                surface,
                started_at: now,
                updated_at: now,
                revision: 1,
                capture_timestamp,
                last_error,
            },
        };

        self.store.set(entry(keys::SESSION_STATE, &state)?).await?;
        Ok(state)
    }
}

/// Typed access to the synchronized settings store.
#[derive(Debug, Clone)]
pub struct SettingsStore<S> {
    store: S,
}

impl<S: KeyValueStore> SettingsStore<S> {
    pub fn new(store: S) -> Self {
        Self { store }
    }

    pub async fn load(&self) -> Result<VisionKeyConfig, StoreError> {
        let settings = self.store.get_all().await?;
        Ok(VisionKeyConfig::from_settings(settings)?)
    }

    pub async fn save(&self, config: &VisionKeyConfig) -> Result<(), StoreError> {
        self.store.set(config.to_settings()).await
    }

    /// Restore every setting to its default.
    pub async fn reset(&self) -> Result<VisionKeyConfig, StoreError> {
        self.store.clear().await?;
        let defaults = VisionKeyConfig::default();
        self.save(&defaults).await?;
        Ok(defaults)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use serde_json::json;
    use tempfile::tempdir;

    use crate::types::{AnswerMode, FinalAnswer};

    fn result(text: &str) -> AnalysisResultRecord {
        AnalysisResultRecord {
            full_text: text.into(),
            final_answer: Some(FinalAnswer::new("B")),
            timestamp: 1,
        }
    }

    #[tokio::test]
    async fn new_capture_removes_previous_result() {
        let store = CaptureStore::new(MemoryStore::new());
        store.begin_capture("data:image/png;base64,AAA", 1).await.unwrap();
        store.save_result(&result("first")).await.unwrap();

        store.begin_capture("data:image/png;base64,BBB", 2).await.unwrap();

        assert!(store.load_result().await.unwrap().is_none());
        let capture = store.load_capture().await.unwrap().unwrap();
        assert_eq!(capture.captured_image, "data:image/png;base64,BBB");
        assert_eq!(capture.capture_timestamp, 2);
    }

    #[tokio::test]
    async fn clear_result_keeps_capture() {
        let store = CaptureStore::new(MemoryStore::new());
        store.begin_capture("data:image/png;base64,AAA", 1).await.unwrap();
        store.save_result(&result("x")).await.unwrap();

        store.clear_result().await.unwrap();
        assert!(store.load_result().await.unwrap().is_none());
        assert!(store.load_capture().await.unwrap().is_some());

        store.clear_capture().await.unwrap();
        assert!(store.load_capture().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn clear_history_wipes_session_state() {
        let store = CaptureStore::new(MemoryStore::new());
        store
            .record_session(SessionStatus::Analyzing, ExecutionSurface::Popup, Some(1), None)
            .await
            .unwrap();
        store.clear_history().await.unwrap();
        assert!(store.load_session_state().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn session_revisions_are_monotonic() {
        let store = CaptureStore::new(MemoryStore::new());
        let first = store
            .record_session(SessionStatus::Analyzing, ExecutionSurface::Popup, Some(7), None)
            .await
            .unwrap();
        let second = store
            .record_session(
                SessionStatus::Complete,
                ExecutionSurface::Background,
                Some(7),
                None,
            )
            .await
            .unwrap();

        assert_eq!(first.revision, 1);
        assert!(second.is_newer_than(&first));
        assert!(second.updated_at > first.updated_at);
        assert_eq!(second.started_at, first.started_at);
        assert_eq!(store.load_session_state().await.unwrap(), Some(second));
    }

    #[tokio::test]
    async fn file_store_round_trips_between_instances() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("nested").join("local.json");

        let writer = CaptureStore::new(FileStore::new(&path));
        writer.begin_capture("data:image/png;base64,AAA", 42).await.unwrap();
        writer.save_result(&result("persisted")).await.unwrap();

        let reader = CaptureStore::new(FileStore::new(&path));
        assert_eq!(
            reader.load_result().await.unwrap().map(|r| r.full_text),
            Some("persisted".to_string())
        );
        assert_eq!(
            reader.load_capture().await.unwrap().map(|c| c.capture_timestamp),
            Some(42)
        );
    }

    #[tokio::test]
    async fn file_store_missing_file_is_empty() {
        let dir = tempdir().unwrap();
        let store = FileStore::new(dir.path().join("absent.json"));
        assert!(store.get_all().await.unwrap().is_empty());
        assert!(store.get("capturedImage").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn file_store_rejects_non_object() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("bad.json");
        tokio::fs::write(&path, "[1, 2]").await.unwrap();
        let err = FileStore::new(&path).get_all().await.unwrap_err();
        assert!(matches!(err, StoreError::NotAnObject { .. }));
    }

    #[tokio::test]
    async fn settings_use_synchronized_key_names() {
        let raw = MemoryStore::new();
        let mut seed = JsonObject::new();
        seed.insert("licenseKey".into(), json!("KEY-1"));
        seed.insert("answerMode".into(), json!("tuLuan"));
        seed.insert("autoClickDelay".into(), json!(450));
        raw.set(seed).await.unwrap();

        let settings = SettingsStore::new(raw);
        let config = settings.load().await.unwrap();
        assert_eq!(config.credential(), Some("KEY-1"));
        assert_eq!(config.answer_mode, AnswerMode::Essay);
        assert_eq!(config.auto_click_delay_ms, 450);

        let defaults = settings.reset().await.unwrap();
        assert!(defaults.credential().is_none());
        assert_eq!(settings.load().await.unwrap().auto_click_delay_ms, 300);
    }
}
