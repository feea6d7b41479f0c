//! Read access to telemetry analytics, local or remote.
//!
//! The dashboard renders from a [`TelemetrySource`]; in deployment that is the
//! API reached over HTTP, while the CLI can also read the database directly.

use async_trait::async_trait;

use crate::analytics::{Anomaly, RecentSession, TelemetryStats};
use crate::client::ApiClient;
use crate::error::Result;
use crate::event::TelemetryEvent;
use crate::service::TelemetryService;

/// Something that can answer analytics queries.
#[async_trait]
pub trait TelemetrySource: Send + Sync {
    /// Short description for log lines and page footers.
    fn describe(&self) -> String;

    /// Summary statistics.
    async fn stats(&self) -> Result<TelemetryStats>;

    /// Up to `limit` most recent sessions.
    async fn recent(&self, limit: usize) -> Result<Vec<RecentSession>>;

    /// Events of a session, oldest first.
    async fn session_events(&self, session_id: &str) -> Result<Vec<TelemetryEvent>>;

    /// Currently detected anomalies.
    async fn anomalies(&self) -> Result<Vec<Anomaly>>;
}

#[async_trait]
impl TelemetrySource for ApiClient {
    fn describe(&self) -> String {
        format!("API at {}", self.base_url())
    }

    async fn stats(&self) -> Result<TelemetryStats> {
        ApiClient::stats(self).await
    }

    async fn recent(&self, limit: usize) -> Result<Vec<RecentSession>> {
        ApiClient::recent(self, Some(limit)).await
    }

    async fn session_events(&self, session_id: &str) -> Result<Vec<TelemetryEvent>> {
        ApiClient::session_events(self, session_id).await
    }

    async fn anomalies(&self) -> Result<Vec<Anomaly>> {
        ApiClient::anomalies(self).await
    }
}

#[async_trait]
impl TelemetrySource for TelemetryService {
    fn describe(&self) -> String {
        format!("local database ({})", TelemetryService::describe(self))
    }

    async fn stats(&self) -> Result<TelemetryStats> {
        TelemetryService::stats(self).await
    }

    async fn recent(&self, limit: usize) -> Result<Vec<RecentSession>> {
        TelemetryService::recent(self, Some(limit)).await
    }

    async fn session_events(&self, session_id: &str) -> Result<Vec<TelemetryEvent>> {
        TelemetryService::session_events(self, session_id).await
    }

    async fn anomalies(&self) -> Result<Vec<Anomaly>> {
        TelemetryService::anomalies(self).await
    }
}
