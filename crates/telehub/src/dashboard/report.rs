//! Dashboard data model.
//!
//! A [`DashboardReport`] gathers everything one page shows. Fetch failures are
//! recorded as warnings so the page still renders when the API is down.

use chrono::{DateTime, Utc};
use serde_json::Value;
use tracing::warn;

use crate::analytics::{Anomaly, RecentSession, TelemetryStats};
use crate::error::Error;
use crate::event::{status, TelemetryEvent};
use crate::source::TelemetrySource;

/// What to include in a report.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReportOptions {
    /// Number of recent sessions to list.
    pub recent_limit: usize,
    /// Session to show in detail. Defaults to the most recent one.
    pub session: Option<String>,
}

impl Default for ReportOptions {
    fn default() -> Self {
        Self {
            recent_limit: 20,
            session: None,
        }
    }
}

/// Headline numbers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Kpis {
    /// Total installs (sessions).
    pub total_installs: i64,
    /// Successful installs.
    pub successful_installs: i64,
    /// Success rate, e.g. `75.0%`.
    pub success_rate: String,
    /// Average install time, e.g. `42.5 s`.
    pub avg_install_time: String,
}

/// Share of installs reporting one OS.
#[derive(Debug, Clone, PartialEq)]
pub struct OsShare {
    /// OS name.
    pub name: String,
    /// Installs on this OS.
    pub count: i64,
    /// Percentage of all installs with a known OS.
    pub percent: f64,
}

/// Event count for one step and status.
#[derive(Debug, Clone, PartialEq)]
pub struct StepStatus {
    /// Step name.
    pub step: String,
    /// Status name.
    pub status: String,
    /// Number of events.
    pub count: i64,
    /// Percentage of the step's events.
    pub percent: f64,
}

/// Marker color of a timeline entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StatusColor {
    /// Anything that is not a problem.
    Green,
    /// Warnings and partial results.
    Orange,
    /// Failures.
    Red,
}

impl StatusColor {
    /// Color for an event status.
    #[must_use]
    pub fn for_status(event_status: &str) -> Self {
        match event_status {
            status::FAILURE => Self::Red,
            status::WARNING | status::PARTIAL => Self::Orange,
            _ => Self::Green,
        }
    }

    /// CSS color name.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Green => "green",
            Self::Orange => "orange",
            Self::Red => "red",
        }
    }
}

/// One event on a session timeline.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TimelineEntry {
    /// When it happened.
    pub timestamp: DateTime<Utc>,
    /// Step name.
    pub step: String,
    /// Status name.
    pub status: String,
    /// Marker color.
    pub color: StatusColor,
}

/// Detail view of one session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionDetail {
    /// The session.
    pub session_id: String,
    /// Events in chronological order.
    pub timeline: Vec<TimelineEntry>,
    /// Metrics of the last event, as display strings.
    pub final_metrics: Vec<(String, String)>,
}

impl SessionDetail {
    /// Build the detail view from a session's events.
    #[must_use]
    pub fn from_events(session_id: impl Into<String>, mut events: Vec<TelemetryEvent>) -> Self {
        events.sort_by_key(|e| e.timestamp);

        let final_metrics = events
            .last()
            .map(|last| {
                last.metrics
                    .iter()
                    .map(|(key, value)| (key.clone(), display_value(value)))
                    .collect()
            })
            .unwrap_or_default();

        let timeline = events
            .into_iter()
            .map(|e| TimelineEntry {
                color: StatusColor::for_status(&e.status),
                timestamp: e.timestamp,
                step: e.step,
                status: e.status,
            })
            .collect();

        Self {
            session_id: session_id.into(),
            timeline,
            final_metrics,
        }
    }
}

fn display_value(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

#[allow(clippy::cast_precision_loss)]
fn percent(count: i64, total: i64) -> f64 {
    if total > 0 {
        count as f64 / total as f64 * 100.0
    } else {
        0.0
    }
}

/// Everything shown on one dashboard page.
#[derive(Debug, Clone, PartialEq)]
pub struct DashboardReport {
    /// When the report was built.
    pub generated_at: DateTime<Utc>,
    /// Where the data came from.
    pub source: String,
    /// Summary statistics, if they could be fetched.
    pub stats: Option<TelemetryStats>,
    /// Recent sessions, newest first.
    pub recent: Vec<RecentSession>,
    /// Detected anomalies.
    pub anomalies: Vec<Anomaly>,
    /// Detail of the selected session.
    pub session: Option<SessionDetail>,
    /// Problems encountered while fetching data.
    pub warnings: Vec<String>,
}

impl DashboardReport {
    /// Headline numbers, when statistics are available.
    #[must_use]
    pub fn kpis(&self) -> Option<Kpis> {
        self.stats.as_ref().map(|stats| Kpis {
            total_installs: stats.total_sessions,
            successful_installs: stats.successful_installs,
            success_rate: format!("{:.1}%", stats.success_rate),
            avg_install_time: format!("{:.1} s", stats.avg_install_time),
        })
    }

    /// Installs per OS with their share, largest first.
    #[must_use]
    pub fn os_distribution(&self) -> Vec<OsShare> {
        let Some(stats) = &self.stats else {
            return Vec::new();
        };
        let total: i64 = stats.installation_by_os.values().sum();

        let mut shares: Vec<OsShare> = stats
            .installation_by_os
            .iter()
            .map(|(name, &count)| OsShare {
                name: name.clone(),
                count,
                percent: percent(count, total),
            })
            .collect();
        shares.sort_by(|a, b| b.count.cmp(&a.count).then_with(|| a.name.cmp(&b.name)));
        shares
    }

    /// Event counts per step and status, with each status's share of its step.
    #[must_use]
    pub fn step_breakdown(&self) -> Vec<StepStatus> {
        let Some(stats) = &self.stats else {
            return Vec::new();
        };

        stats
            .steps_status
            .iter()
            .flat_map(|(step, statuses)| {
                let total: i64 = statuses.values().sum();
                statuses.iter().map(move |(status, &count)| StepStatus {
                    step: step.clone(),
                    status: status.clone(),
                    count,
                    percent: percent(count, total),
                })
            })
            .collect()
    }
}

/// Fetch everything a dashboard page needs from `source`.
pub async fn build_report(source: &dyn TelemetrySource, options: &ReportOptions) -> DashboardReport {
    let mut warnings = Vec::new();

    let stats = match source.stats().await {
        Ok(stats) => Some(stats),
        Err(e) => {
            warn!("Error fetching telemetry stats: {}", e);
            warnings.push(if e.is_api_unavailable() {
                format!("Could not fetch statistics. Make sure the telemetry API is running. ({e})")
            } else {
                format!("Error fetching telemetry stats: {e}")
            });
            None
        }
    };

    let recent = source
        .recent(options.recent_limit)
        .await
        .unwrap_or_else(|e| {
            warn!("Error fetching recent sessions: {}", e);
            warnings.push(format!("Error fetching recent sessions: {e}"));
            Vec::new()
        });

    let anomalies = source.anomalies().await.unwrap_or_else(|e| {
        warn!("Error fetching anomalies: {}", e);
        warnings.push(format!("Error fetching anomalies: {e}"));
        Vec::new()
    });

    let selected = options
        .session
        .clone()
        .or_else(|| recent.first().map(|s| s.session_id.clone()));

    let session = match selected {
        Some(id) => {
            let fetched = source.session_events(&id).await;
            match fetched {
                Ok(events) => Some(SessionDetail::from_events(id, events)),
                Err(Error::SessionNotFound { .. }) => {
                    warnings.push(format!("Session {id} not found"));
                    None
                }
                Err(e) => {
                    warn!("Error fetching session events: {}", e);
                    warnings.push(format!("Error fetching session events: {e}"));
                    None
                }
            }
        }
        None => None,
    };

    DashboardReport {
        generated_at: Utc::now(),
        source: source.describe(),
        stats,
        recent,
        anomalies,
        session,
        warnings,
    }
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;

    use chrono::TimeZone;
    use serde_json::{json, Map};

    use super::*;
    use crate::client::ApiClient;
    use crate::config::AnalyticsConfig;
    use crate::service::TelemetryService;
    use crate::storage::Storage;

    fn sample_stats() -> TelemetryStats {
        let mut by_os = BTreeMap::new();
        by_os.insert("Ubuntu".to_string(), 3);
        by_os.insert("Windows".to_string(), 1);

        let mut install = BTreeMap::new();
        install.insert("completed".to_string(), 3);
        install.insert("failure".to_string(), 1);
        let mut steps = BTreeMap::new();
        steps.insert("install".to_string(), install);

        TelemetryStats {
            total_sessions: 4,
            successful_installs: 3,
            success_rate: 75.0,
            installation_by_os: by_os,
            steps_status: steps,
            avg_install_time: 42.26,
            long_running_success: 0,
        }
    }

    fn report_with_stats(stats: Option<TelemetryStats>) -> DashboardReport {
        DashboardReport {
            generated_at: Utc::now(),
            source: "test".to_string(),
            stats,
            recent: Vec::new(),
            anomalies: Vec::new(),
            session: None,
            warnings: Vec::new(),
        }
    }

    fn event_at(status: &str, minute: u32, metrics: Map<String, Value>) -> TelemetryEvent {
        let mut event = TelemetryEvent::new("a", "s1", "install", status);
        event.timestamp = Utc.with_ymd_and_hms(2024, 5, 1, 10, minute, 0).unwrap();
        event.metrics = metrics;
        event
    }

    #[test]
    fn test_status_colors() {
        assert_eq!(StatusColor::for_status("failure"), StatusColor::Red);
        assert_eq!(StatusColor::for_status("warning"), StatusColor::Orange);
        assert_eq!(StatusColor::for_status("partial"), StatusColor::Orange);
        assert_eq!(StatusColor::for_status("completed"), StatusColor::Green);
        assert_eq!(StatusColor::for_status("started"), StatusColor::Green);
    }

    #[test]
    fn test_kpis_formatting() {
        let kpis = report_with_stats(Some(sample_stats())).kpis().unwrap();
        assert_eq!(kpis.total_installs, 4);
        assert_eq!(kpis.success_rate, "75.0%");
        assert_eq!(kpis.avg_install_time, "42.3 s");
    }

    #[test]
    fn test_no_stats_no_kpis() {
        let report = report_with_stats(None);
        assert!(report.kpis().is_none());
        assert!(report.os_distribution().is_empty());
        assert!(report.step_breakdown().is_empty());
    }

    #[test]
    fn test_os_distribution_percentages() {
        let shares = report_with_stats(Some(sample_stats())).os_distribution();
        assert_eq!(shares[0].name, "Ubuntu");
        assert!((shares[0].percent - 75.0).abs() < 1e-9);
        assert!((shares[1].percent - 25.0).abs() < 1e-9);
    }

    #[test]
    fn test_step_breakdown_percentages() {
        let rows = report_with_stats(Some(sample_stats())).step_breakdown();
        assert_eq!(rows.len(), 2);
        let failure = rows.iter().find(|r| r.status == "failure").unwrap();
        assert_eq!(failure.count, 1);
        assert!((failure.percent - 25.0).abs() < 1e-9);
    }

    #[test]
    fn test_session_detail_sorted_with_final_metrics() {
        let last_metrics = json!({"success": true, "path": "/opt/app"})
            .as_object()
            .cloned()
            .unwrap();
        let events = vec![
            event_at("completed", 5, last_metrics),
            event_at("started", 1, Map::new()),
        ];

        let detail = SessionDetail::from_events("s1", events);
        assert_eq!(detail.timeline[0].status, "started");
        assert_eq!(detail.timeline[1].color, StatusColor::Green);
        assert!(detail
            .final_metrics
            .contains(&("path".to_string(), "/opt/app".to_string())));
        assert!(detail
            .final_metrics
            .contains(&("success".to_string(), "true".to_string())));
    }

    #[tokio::test]
    async fn test_build_report_from_local_service() {
        let service = TelemetryService::new(
            Storage::open_in_memory().unwrap(),
            AnalyticsConfig::default(),
        );
        for (session, status) in [("s1", "started"), ("s1", "failure"), ("s2", "started")] {
            let payload = json!({
                "anonymousId": "a",
                "sessionId": session,
                "step": "install",
                "status": status,
            });
            service
                .record(payload.as_object().cloned().unwrap())
                .await
                .unwrap();
        }

        let report = build_report(&service, &ReportOptions::default()).await;
        assert!(report.warnings.is_empty());
        assert_eq!(report.stats.as_ref().unwrap().total_sessions, 2);
        assert_eq!(report.recent.len(), 2);
        let detail = report.session.unwrap();
        assert_eq!(detail.session_id, report.recent[0].session_id);
    }

    #[tokio::test]
    async fn test_build_report_unknown_session() {
        let service = TelemetryService::new(
            Storage::open_in_memory().unwrap(),
            AnalyticsConfig::default(),
        );
        let options = ReportOptions {
            recent_limit: 5,
            session: Some("ghost".to_string()),
        };

        let report = build_report(&service, &options).await;
        assert!(report.session.is_none());
        assert_eq!(report.warnings, vec!["Session ghost not found".to_string()]);
    }

    #[tokio::test]
    async fn test_build_report_api_down() {
        let client =
            ApiClient::new("http://127.0.0.1:1", std::time::Duration::from_secs(2)).unwrap();

        let report = build_report(&client, &ReportOptions::default()).await;
        assert!(report.stats.is_none());
        assert!(report.recent.is_empty());
        assert!(report.warnings[0].contains("Make sure the telemetry API is running"));
    }
}
