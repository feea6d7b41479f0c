//! HTTP client for the telemetry API.
//!
//! Used by the dashboard to read analytics and by `send-test` to post a
//! sample event. Transport failures become [`Error::ApiUnavailable`], non-2xx
//! answers become [`Error::ApiStatus`].

use std::time::Duration;

use chrono::{DateTime, Utc};
use reqwest::{RequestBuilder, Url};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tracing::debug;

use crate::analytics::{Anomaly, RecentSession, TelemetryStats};
use crate::error::{Error, Result};
use crate::event::TelemetryEvent;

/// Answer to a successful ingest request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IngestReceipt {
    /// Always `success`.
    pub status: String,
    /// ID assigned to the stored event.
    pub id: String,
}

/// Answer to a session events request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionEvents {
    /// The requested session.
    pub session_id: String,
    /// Its events, oldest first.
    pub events: Vec<TelemetryEvent>,
}

#[derive(Debug, Deserialize)]
struct AnomalyList {
    anomalies: Vec<Anomaly>,
}

#[derive(Debug, Deserialize)]
struct ErrorBody {
    detail: String,
}

/// A completed, successful install event, as posted by `telehub send-test`.
#[must_use]
pub fn sample_event(session_id: &str, timestamp: DateTime<Utc>) -> Value {
    json!({
        "anonymousId": "test123",
        "sessionId": session_id,
        "step": "install",
        "status": "completed",
        "timestamp": timestamp.to_rfc3339(),
        "scriptVersion": "1.0",
        "osVersion": "10",
        "osName": "Windows",
        "cpuArchitecture": "x64",
        "memoryGB": 16,
        "metrics": {
            "success": true,
            "duration_seconds": 120,
        },
    })
}

/// Client for the telemetry API.
#[derive(Debug, Clone)]
pub struct ApiClient {
    client: reqwest::Client,
    base_url: Url,
}

impl ApiClient {
    /// Create a client for the API at `base_url`.
    ///
    /// # Errors
    ///
    /// Returns an error if the URL is invalid or the HTTP client cannot be built.
    pub fn new(base_url: &str, timeout: Duration) -> Result<Self> {
        let parsed = Url::parse(base_url).map_err(|e| Error::ConfigValidation {
            message: format!("invalid API URL {base_url:?}: {e}"),
        })?;
        if parsed.cannot_be_a_base() {
            return Err(Error::ConfigValidation {
                message: format!("invalid API URL {base_url:?}: not a base URL"),
            });
        }

        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| Error::internal(format!("failed to create HTTP client: {e}")))?;

        Ok(Self {
            client,
            base_url: parsed,
        })
    }

    /// The API base URL.
    #[must_use]
    pub fn base_url(&self) -> &str {
        self.base_url.as_str()
    }

    /// Build a URL from path segments; each segment is percent-encoded.
    fn endpoint(&self, segments: &[&str]) -> Url {
        let mut url = self.base_url.clone();
        if let Ok(mut path) = url.path_segments_mut() {
            path.pop_if_empty().extend(segments);
        }
        url
    }

    fn transport_error(url: &Url, err: &reqwest::Error) -> Error {
        let message = if err.is_timeout() {
            "request timed out".to_string()
        } else if err.is_connect() {
            "connection failed".to_string()
        } else {
            err.to_string()
        };
        Error::ApiUnavailable {
            url: url.to_string(),
            message,
        }
    }

    async fn send<T: DeserializeOwned>(&self, request: RequestBuilder, url: &Url) -> Result<T> {
        debug!("Requesting {}", url);
        let response = request
            .send()
            .await
            .map_err(|e| Self::transport_error(url, &e))?;

        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            let body = serde_json::from_str::<ErrorBody>(&text)
                .map(|e| e.detail)
                .unwrap_or(text);
            return Err(Error::ApiStatus {
                url: url.to_string(),
                status: status.as_u16(),
                body,
            });
        }

        response.json().await.map_err(|e| Error::ApiResponse {
            url: url.to_string(),
            message: e.to_string(),
        })
    }

    async fn get<T: DeserializeOwned>(&self, url: Url) -> Result<T> {
        self.send(self.client.get(url.clone()), &url).await
    }

    /// Post a raw telemetry payload.
    ///
    /// # Errors
    ///
    /// Returns an error if the API is unreachable or rejects the payload.
    pub async fn send_event(&self, payload: &Value) -> Result<IngestReceipt> {
        let url = self.endpoint(&["api", "telemetry"]);
        self.send(self.client.post(url.clone()).json(payload), &url)
            .await
    }

    /// Fetch summary statistics.
    ///
    /// # Errors
    ///
    /// Returns an error if the API is unreachable or fails.
    pub async fn stats(&self) -> Result<TelemetryStats> {
        self.get(self.endpoint(&["api", "telemetry", "stats"])).await
    }

    /// Fetch recent sessions; `None` lets the server pick the limit.
    ///
    /// # Errors
    ///
    /// Returns an error if the API is unreachable or fails.
    pub async fn recent(&self, limit: Option<usize>) -> Result<Vec<RecentSession>> {
        let mut url = self.endpoint(&["api", "telemetry", "recent"]);
        if let Some(limit) = limit {
            url.query_pairs_mut()
                .append_pair("limit", &limit.to_string());
        }
        self.get(url).await
    }

    /// Fetch the events of one session.
    ///
    /// # Errors
    ///
    /// Returns [`Error::SessionNotFound`] when the API answers 404.
    pub async fn session_events(&self, session_id: &str) -> Result<Vec<TelemetryEvent>> {
        let url = self.endpoint(&["api", "telemetry", "sessions", session_id, "events"]);
        match self.get::<SessionEvents>(url).await {
            Ok(body) => Ok(body.events),
            Err(Error::ApiStatus { status: 404, .. }) => Err(Error::session_not_found(session_id)),
            Err(e) => Err(e),
        }
    }

    /// Fetch detected anomalies.
    ///
    /// # Errors
    ///
    /// Returns an error if the API is unreachable or fails.
    pub async fn anomalies(&self) -> Result<Vec<Anomaly>> {
        let list: AnomalyList = self
            .get(self.endpoint(&["api", "telemetry", "anomalies"]))
            .await?;
        Ok(list.anomalies)
    }

    /// Check that the API is up.
    ///
    /// # Errors
    ///
    /// Returns an error if the health endpoint cannot be reached or fails.
    pub async fn health(&self) -> Result<()> {
        let _: Value = self.get(self.endpoint(&["health"])).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use chrono::TimeZone;
    use wiremock::matchers::{body_partial_json, method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    use super::*;

    fn client(server: &MockServer) -> ApiClient {
        ApiClient::new(&server.uri(), Duration::from_secs(5)).unwrap()
    }

    #[test]
    fn test_sample_event_is_valid() {
        let timestamp = Utc.with_ymd_and_hms(2024, 5, 1, 10, 0, 0).unwrap();
        let payload = sample_event("smoke-1", timestamp);
        let event = TelemetryEvent::from_payload(
            payload.as_object().cloned().unwrap(),
            Utc::now(),
        )
        .unwrap();

        assert_eq!(event.session_id, "smoke-1");
        assert_eq!(event.timestamp, timestamp);
        assert!(event.is_successful_install());
    }

    #[test]
    fn test_rejects_invalid_url() {
        let err = ApiClient::new("not a url", Duration::from_secs(1)).unwrap_err();
        assert!(matches!(err, Error::ConfigValidation { .. }));
    }

    #[test]
    fn test_endpoint_encodes_segments() {
        let client = ApiClient::new("http://api:9999/", Duration::from_secs(1)).unwrap();
        let url = client.endpoint(&["api", "telemetry", "sessions", "a b/c", "events"]);
        assert_eq!(
            url.as_str(),
            "http://api:9999/api/telemetry/sessions/a%20b%2Fc/events"
        );
    }

    #[test]
    fn test_endpoint_keeps_base_path() {
        let client = ApiClient::new("http://proxy/telemetry", Duration::from_secs(1)).unwrap();
        let url = client.endpoint(&["health"]);
        assert_eq!(url.as_str(), "http://proxy/telemetry/health");
    }

    #[tokio::test]
    async fn test_send_event() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/api/telemetry"))
            .and(body_partial_json(json!({"sessionId": "s1"})))
            .respond_with(
                ResponseTemplate::new(201).set_body_json(json!({"status": "success", "id": "7"})),
            )
            .mount(&server)
            .await;

        let receipt = client(&server)
            .send_event(&json!({"sessionId": "s1", "step": "install"}))
            .await
            .unwrap();
        assert_eq!(receipt.id, "7");
    }

    #[tokio::test]
    async fn test_stats() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/api/telemetry/stats"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "total_sessions": 4,
                "successful_installs": 3,
                "success_rate": 75.0,
                "installation_by_os": {"Ubuntu": 2, "Windows": 2},
                "steps_status": {"install": {"completed": 3, "failure": 1}},
                "avg_install_time": 42.5,
            })))
            .mount(&server)
            .await;

        let stats = client(&server).stats().await.unwrap();
        assert_eq!(stats.total_sessions, 4);
        assert_eq!(stats.installation_by_os["Ubuntu"], 2);
        assert_eq!(stats.long_running_success, 0);
    }

    #[tokio::test]
    async fn test_recent_sends_limit() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/api/telemetry/recent"))
            .and(query_param("limit", "20"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!([{
                "session_id": "s1",
                "timestamp": "2024-05-01T10:00:00Z",
                "success": true,
                "os": "Ubuntu 22.04",
                "duration_seconds": 12.0,
            }])))
            .mount(&server)
            .await;

        let sessions = client(&server).recent(Some(20)).await.unwrap();
        assert_eq!(sessions.len(), 1);
        assert!(sessions[0].success);
    }

    #[tokio::test]
    async fn test_session_events_not_found() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/api/telemetry/sessions/missing/events"))
            .respond_with(
                ResponseTemplate::new(404)
                    .set_body_json(json!({"detail": "Session with ID missing not found"})),
            )
            .mount(&server)
            .await;

        let err = client(&server).session_events("missing").await.unwrap_err();
        assert!(matches!(err, Error::SessionNotFound { .. }));
    }

    #[tokio::test]
    async fn test_anomalies_unwraps_list() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/api/telemetry/anomalies"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"anomalies": [{
                "type": "high_failure_rate",
                "failure_rate": 0.5,
                "total_installs": 10,
                "most_common_failure": "download",
                "timestamp": "2024-05-01T10:00:00Z",
            }]})))
            .mount(&server)
            .await;

        let anomalies = client(&server).anomalies().await.unwrap();
        assert_eq!(anomalies.len(), 1);
        assert_eq!(anomalies[0].most_common_failure, "download");
    }

    #[tokio::test]
    async fn test_server_error_carries_detail() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/api/telemetry/stats"))
            .respond_with(ResponseTemplate::new(500).set_body_json(
                json!({"detail": "Failed to generate telemetry statistics: boom"}),
            ))
            .mount(&server)
            .await;

        match client(&server).stats().await.unwrap_err() {
            Error::ApiStatus { status, body, .. } => {
                assert_eq!(status, 500);
                assert!(body.contains("boom"));
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[tokio::test]
    async fn test_invalid_body() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/api/telemetry/stats"))
            .respond_with(ResponseTemplate::new(200).set_body_string("<html>"))
            .mount(&server)
            .await;

        let err = client(&server).stats().await.unwrap_err();
        assert!(matches!(err, Error::ApiResponse { .. }));
    }

    #[tokio::test]
    async fn test_unreachable_api() {
        let client = ApiClient::new("http://127.0.0.1:1", Duration::from_secs(2)).unwrap();
        let err = client.health().await.unwrap_err();
        assert!(err.is_api_unavailable());
    }
}
