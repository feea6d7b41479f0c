//! Telemetry analytics.
//!
//! Summary statistics, recent session listings and failure-rate anomaly
//! detection, computed from the queries exposed by an [`EventStore`].

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::config::AnalyticsConfig;
use crate::error::Result;
use crate::event::status;
use crate::storage::{cutoff_before, EventStore};

/// Summary statistics over all stored telemetry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TelemetryStats {
    /// Number of distinct sessions.
    pub total_sessions: i64,
    /// Sessions with a successful install event.
    pub successful_installs: i64,
    /// `successful_installs / total_sessions` as a percentage.
    pub success_rate: f64,
    /// Sessions per reported OS name.
    pub installation_by_os: BTreeMap<String, i64>,
    /// Event counts per step, then per status.
    pub steps_status: BTreeMap<String, BTreeMap<String, i64>>,
    /// Mean install-step span across sessions, in seconds.
    pub avg_install_time: f64,
    /// Successful installs that took longer than the long-running threshold.
    #[serde(default)]
    pub long_running_success: i64,
}

/// The most recent state of one installer session.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RecentSession {
    /// The session.
    pub session_id: String,
    /// Time of the session's latest install-step event.
    pub timestamp: DateTime<Utc>,
    /// Whether that event reports a successful install.
    pub success: bool,
    /// OS description, or `Unknown`.
    pub os: String,
    /// Time between the session's first and last events.
    pub duration_seconds: f64,
}

/// Kinds of anomaly the detector can raise.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AnomalyKind {
    /// Too many installs failed within the detection window.
    HighFailureRate,
}

/// An alert raised by anomaly detection.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Anomaly {
    /// What was detected.
    #[serde(rename = "type")]
    pub kind: AnomalyKind,
    /// Failed install events / install events in the window (0..1).
    pub failure_rate: f64,
    /// Install events in the window.
    pub total_installs: i64,
    /// Step with the most failure events across the failing sessions.
    pub most_common_failure: String,
    /// When the anomaly was detected.
    pub timestamp: DateTime<Utc>,
}

#[allow(clippy::cast_precision_loss)]
fn ratio(numerator: i64, denominator: i64) -> f64 {
    if denominator > 0 {
        numerator as f64 / denominator as f64
    } else {
        0.0
    }
}

/// Compute summary statistics.
///
/// # Errors
///
/// Returns an error if a storage query fails.
pub async fn telemetry_stats(
    store: &dyn EventStore,
    config: &AnalyticsConfig,
) -> Result<TelemetryStats> {
    let total_sessions = store.session_count().await?;
    let successful_installs = store.count_successful_installs().await?;
    let installation_by_os = store.installs_by_os().await?;
    let steps_status = store.steps_status().await?;

    let spans = store.install_spans().await?;
    let avg_install_time = if spans.is_empty() {
        0.0
    } else {
        #[allow(clippy::cast_precision_loss)]
        let count = spans.len() as f64;
        spans.iter().map(|span| span.duration_secs()).sum::<f64>() / count
    };

    #[allow(clippy::cast_precision_loss)]
    let threshold = config.long_running_threshold_secs as f64;
    let long_running = spans
        .iter()
        .filter(|span| span.succeeded && span.duration_secs() > threshold)
        .count();

    Ok(TelemetryStats {
        total_sessions,
        successful_installs,
        success_rate: ratio(successful_installs, total_sessions) * 100.0,
        installation_by_os,
        steps_status,
        avg_install_time,
        long_running_success: i64::try_from(long_running).unwrap_or(i64::MAX),
    })
}

/// List the most recently active installer sessions, newest first.
///
/// # Errors
///
/// Returns an error if a storage query fails.
pub async fn recent_sessions(store: &dyn EventStore, limit: usize) -> Result<Vec<RecentSession>> {
    let latest = store.recent_install_sessions(limit).await?;

    let mut sessions = Vec::with_capacity(latest.len());
    for event in latest {
        let summary = store.session_summary(&event.session_id).await?;
        let (os, duration_seconds) = match summary {
            Some(summary) => (
                summary.os,
                (summary.last - summary.first).num_milliseconds(),
            ),
            None => {
                warn!("Session {} vanished while listing", event.session_id);
                (None, 0)
            }
        };

        #[allow(clippy::cast_precision_loss)]
        let duration_seconds = duration_seconds as f64 / 1000.0;

        sessions.push(RecentSession {
            success: event.is_successful_install(),
            timestamp: event.timestamp,
            os: os.unwrap_or_else(|| "Unknown".to_string()),
            duration_seconds,
            session_id: event.session_id,
        });
    }
    Ok(sessions)
}

/// Detect abnormal install failure rates in the window ending at `now`.
///
/// Raises a [`AnomalyKind::HighFailureRate`] anomaly when the failure rate is
/// strictly above the configured threshold and there were strictly more
/// install events than the configured minimum.
///
/// # Errors
///
/// Returns an error if the window reaches past the earliest representable
/// time, or a storage query fails.
pub async fn detect_failure_anomalies(
    store: &dyn EventStore,
    config: &AnalyticsConfig,
    now: DateTime<Utc>,
) -> Result<Vec<Anomaly>> {
    let window = chrono::Duration::hours(i64::from(config.anomaly_window_hours));
    let cutoff = cutoff_before(now, window)?;

    let total_installs = store.count_install_events_since(cutoff, None).await?;
    let failed_installs = store
        .count_install_events_since(cutoff, Some(status::FAILURE))
        .await?;
    let failure_rate = ratio(failed_installs, total_installs);

    debug!(
        "Anomaly check: {} of {} installs failed since {} ({:.2})",
        failed_installs, total_installs, cutoff, failure_rate
    );

    let min_installs = i64::try_from(config.min_install_count).unwrap_or(i64::MAX);
    if failure_rate <= config.failure_rate_threshold || total_installs <= min_installs {
        return Ok(Vec::new());
    }

    let failure_steps = store.failure_steps_since(cutoff).await?;

    let Some(most_common_failure) = most_common(&failure_steps) else {
        return Ok(Vec::new());
    };

    warn!(
        "High install failure rate: {:.1}% of {} installs, most failures in '{}'",
        failure_rate * 100.0,
        total_installs,
        most_common_failure
    );

    Ok(vec![Anomaly {
        kind: AnomalyKind::HighFailureRate,
        failure_rate,
        total_installs,
        most_common_failure,
        timestamp: now,
    }])
}

/// Key with the highest count; ties go to the alphabetically first key.
fn most_common(counts: &BTreeMap<String, i64>) -> Option<String> {
    counts
        .iter()
        .max_by(|a, b| a.1.cmp(b.1).then_with(|| b.0.cmp(a.0)))
        .map(|(step, _)| step.clone())
}
