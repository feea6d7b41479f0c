//! The event store seam shared by the `SQLite` and `MongoDB` backends.

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, PoisonError};

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use tracing::{info, warn};

use super::{InstallSpan, MongoStore, SessionSummary, Storage, StorageStats};
use crate::config::Config;
use crate::error::{Error, Result};
use crate::event::TelemetryEvent;

/// Persistence for telemetry events and the grouped queries analytics needs.
///
/// Timestamps passed in and returned are UTC. Event IDs are opaque strings.
#[async_trait]
pub trait EventStore: Send + Sync + std::fmt::Debug {
    /// Short description of where events are stored, for logs and CLI output.
    fn describe(&self) -> String;

    /// Store an event and return its assigned ID.
    async fn insert(&self, event: TelemetryEvent) -> Result<String>;

    /// All events of a session, oldest first.
    async fn events_for_session(&self, session_id: &str) -> Result<Vec<TelemetryEvent>>;

    /// Number of distinct sessions.
    async fn session_count(&self) -> Result<i64>;

    /// Sessions with at least one successful install event.
    async fn count_successful_installs(&self) -> Result<i64>;

    /// Distinct sessions per reported OS name.
    async fn installs_by_os(&self) -> Result<BTreeMap<String, i64>>;

    /// Event counts per step, then per status.
    async fn steps_status(&self) -> Result<BTreeMap<String, BTreeMap<String, i64>>>;

    /// Install-step span of every session with install events.
    async fn install_spans(&self) -> Result<Vec<InstallSpan>>;

    /// Latest install-step event of the `limit` most recently active sessions,
    /// newest first.
    async fn recent_install_sessions(&self, limit: usize) -> Result<Vec<TelemetryEvent>>;

    /// Time span and reported OS of a session, `None` if it has no events.
    async fn session_summary(&self, session_id: &str) -> Result<Option<SessionSummary>>;

    /// Install-step events since `cutoff`, optionally only those with `status`.
    async fn count_install_events_since(
        &self,
        cutoff: DateTime<Utc>,
        status: Option<&str>,
    ) -> Result<i64>;

    /// Failure events per step across sessions whose install failed since `cutoff`.
    async fn failure_steps_since(&self, cutoff: DateTime<Utc>) -> Result<BTreeMap<String, i64>>;

    /// Delete events older than `max_age`, returning how many were removed.
    async fn prune_older_than(&self, max_age: Duration) -> Result<usize>;

    /// Delete every event, returning how many were removed.
    async fn clear(&self) -> Result<usize>;

    /// Event totals and time range.
    async fn stats(&self) -> Result<StorageStats>;
}

/// [`EventStore`] over the embedded `SQLite` [`Storage`].
///
/// The single connection sits behind a mutex and every call runs on tokio's
/// blocking pool.
#[derive(Debug, Clone)]
pub struct SqliteStore {
    storage: Arc<Mutex<Storage>>,
}

impl SqliteStore {
    /// Wrap an open storage.
    #[must_use]
    pub fn new(storage: Storage) -> Self {
        Self {
            storage: Arc::new(Mutex::new(storage)),
        }
    }

    /// Run `f` against the storage on the blocking thread pool.
    async fn call<T, F>(&self, f: F) -> Result<T>
    where
        F: FnOnce(&Storage) -> Result<T> + Send + 'static,
        T: Send + 'static,
    {
        let storage = Arc::clone(&self.storage);
        tokio::task::spawn_blocking(move || {
            // A panicked query leaves the connection usable
            let guard = storage.lock().unwrap_or_else(|poisoned| {
                warn!("Recovering storage lock after a panicked query");
                PoisonError::into_inner(poisoned)
            });
            f(&guard)
        })
        .await
        .map_err(|e| Error::internal(format!("storage task failed: {e}")))?
    }
}

#[async_trait]
impl EventStore for SqliteStore {
    fn describe(&self) -> String {
        let storage = self
            .storage
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        format!("sqlite:{}", storage.path().display())
    }

    async fn insert(&self, event: TelemetryEvent) -> Result<String> {
        self.call(move |storage| storage.insert(&event))
            .await
            .map(|id| id.to_string())
    }

    async fn events_for_session(&self, session_id: &str) -> Result<Vec<TelemetryEvent>> {
        let session_id = session_id.to_string();
        self.call(move |storage| storage.events_for_session(&session_id))
            .await
    }

    async fn session_count(&self) -> Result<i64> {
        self.call(Storage::session_count).await
    }

    async fn count_successful_installs(&self) -> Result<i64> {
        self.call(Storage::count_successful_installs).await
    }

    async fn installs_by_os(&self) -> Result<BTreeMap<String, i64>> {
        self.call(Storage::installs_by_os).await
    }

    async fn steps_status(&self) -> Result<BTreeMap<String, BTreeMap<String, i64>>> {
        self.call(Storage::steps_status).await
    }

    async fn install_spans(&self) -> Result<Vec<InstallSpan>> {
        self.call(Storage::install_spans).await
    }

    async fn recent_install_sessions(&self, limit: usize) -> Result<Vec<TelemetryEvent>> {
        self.call(move |storage| storage.recent_install_sessions(limit))
            .await
    }

    async fn session_summary(&self, session_id: &str) -> Result<Option<SessionSummary>> {
        let session_id = session_id.to_string();
        self.call(move |storage| storage.session_summary(&session_id))
            .await
    }

    async fn count_install_events_since(
        &self,
        cutoff: DateTime<Utc>,
        status: Option<&str>,
    ) -> Result<i64> {
        let status = status.map(str::to_string);
        self.call(move |storage| storage.count_install_events_since(cutoff, status.as_deref()))
            .await
    }

    async fn failure_steps_since(&self, cutoff: DateTime<Utc>) -> Result<BTreeMap<String, i64>> {
        self.call(move |storage| storage.failure_steps_since(cutoff))
            .await
    }

    async fn prune_older_than(&self, max_age: Duration) -> Result<usize> {
        self.call(move |storage| storage.prune_older_than(max_age))
            .await
    }

    async fn clear(&self) -> Result<usize> {
        self.call(Storage::clear).await
    }

    async fn stats(&self) -> Result<StorageStats> {
        self.call(Storage::stats).await
    }
}

/// Open the event store selected by the configuration.
///
/// A configured `storage.mongodb_uri` selects `MongoDB`; otherwise events go
/// to the `SQLite` file at [`Config::database_path`].
///
/// # Errors
///
/// Returns an error if the database cannot be reached or opened.
pub async fn open_store(config: &Config) -> Result<Arc<dyn EventStore>> {
    if let Some(uri) = &config.storage.mongodb_uri {
        let store = MongoStore::connect(uri, &config.storage.mongodb_db).await?;
        info!("Using event store {}", store.describe());
        return Ok(Arc::new(store));
    }

    let path = config.database_path();
    let storage = tokio::task::spawn_blocking(move || Storage::open(path))
        .await
        .map_err(|e| Error::internal(format!("storage task failed: {e}")))??;
    let store = SqliteStore::new(storage);
    info!("Using event store {}", store.describe());
    Ok(Arc::new(store))
}
