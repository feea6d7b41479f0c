//! Shared telemetry service.
//!
//! Ties an [`EventStore`] to the analytics settings so HTTP workers, the
//! retention task and the CLI all go through the same operations.

use std::sync::Arc;

use chrono::Utc;
use serde_json::{Map, Value};
use tracing::info;

use crate::analytics::{self, Anomaly, RecentSession, TelemetryStats};
use crate::config::AnalyticsConfig;
use crate::error::{Error, Result};
use crate::event::TelemetryEvent;
use crate::storage::{EventStore, SqliteStore, Storage, StorageStats};

/// Cloneable handle to the telemetry store and analytics settings.
#[derive(Debug, Clone)]
pub struct TelemetryService {
    store: Arc<dyn EventStore>,
    analytics: AnalyticsConfig,
}

impl TelemetryService {
    /// Create a service over an embedded `SQLite` storage.
    #[must_use]
    pub fn new(storage: Storage, analytics: AnalyticsConfig) -> Self {
        Self::with_store(Arc::new(SqliteStore::new(storage)), analytics)
    }

    /// Create a service over any event store.
    #[must_use]
    pub fn with_store(store: Arc<dyn EventStore>, analytics: AnalyticsConfig) -> Self {
        Self { store, analytics }
    }

    /// Description of the backing store.
    #[must_use]
    pub fn describe(&self) -> String {
        self.store.describe()
    }

    /// Normalize and store a raw telemetry payload, returning the new event ID.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidEvent`] for unusable payloads, or a storage error.
    pub async fn record(&self, payload: Map<String, Value>) -> Result<String> {
        let event = TelemetryEvent::from_payload(payload, Utc::now())?;
        info!("Received telemetry: {} - {}", event.step, event.status);
        self.store.insert(event).await
    }

    /// Compute summary statistics.
    ///
    /// # Errors
    ///
    /// Returns an error if a storage query fails.
    pub async fn stats(&self) -> Result<TelemetryStats> {
        analytics::telemetry_stats(self.store.as_ref(), &self.analytics).await
    }

    /// Get the events of a session, oldest first.
    ///
    /// # Errors
    ///
    /// Returns [`Error::SessionNotFound`] if the session has no events.
    pub async fn session_events(&self, session_id: &str) -> Result<Vec<TelemetryEvent>> {
        let events = self.store.events_for_session(session_id).await?;
        if events.is_empty() {
            return Err(Error::session_not_found(session_id));
        }
        Ok(events)
    }

    /// List recent sessions; `None` uses the configured default limit.
    ///
    /// # Errors
    ///
    /// Returns an error if a storage query fails.
    pub async fn recent(&self, limit: Option<usize>) -> Result<Vec<RecentSession>> {
        let limit = limit.unwrap_or(self.analytics.recent_limit);
        analytics::recent_sessions(self.store.as_ref(), limit).await
    }

    /// Run failure-rate anomaly detection over the configured window.
    ///
    /// # Errors
    ///
    /// Returns an error if the window is out of range or a storage query fails.
    pub async fn anomalies(&self) -> Result<Vec<Anomaly>> {
        analytics::detect_failure_anomalies(self.store.as_ref(), &self.analytics, Utc::now())
            .await
    }

    /// Delete events older than `max_age`.
    ///
    /// # Errors
    ///
    /// Returns an error if `max_age` is out of range or the deletion fails.
    pub async fn prune(&self, max_age: chrono::Duration) -> Result<usize> {
        self.store.prune_older_than(max_age).await
    }

    /// Delete every stored event.
    ///
    /// # Errors
    ///
    /// Returns an error if the deletion fails.
    pub async fn clear(&self) -> Result<usize> {
        self.store.clear().await
    }

    /// Get storage statistics.
    ///
    /// # Errors
    ///
    /// Returns an error if a storage query fails.
    pub async fn storage_stats(&self) -> Result<StorageStats> {
        self.store.stats().await
    }
}
