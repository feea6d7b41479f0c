//! Core telemetry event types for telehub.
//!
//! This module defines the event reported by installer scripts, and the
//! normalization applied to raw JSON payloads before they are stored.

use chrono::{DateTime, NaiveDateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::{Error, Result};

/// Name of the step whose events describe the installation itself.
pub const INSTALL_STEP: &str = "install";

/// Well-known event statuses.
pub mod status {
    /// The step finished.
    pub const COMPLETED: &str = "completed";
    /// The step failed.
    pub const FAILURE: &str = "failure";
    /// The step finished with warnings.
    pub const WARNING: &str = "warning";
    /// The step finished partially.
    pub const PARTIAL: &str = "partial";
}

/// Payload keys that map onto dedicated event fields.
const KNOWN_FIELDS: &[&str] = &[
    "anonymousId",
    "sessionId",
    "step",
    "status",
    "timestamp",
    "scriptVersion",
    "osVersion",
    "osName",
    "cpuArchitecture",
    "memoryGB",
];

/// Payload key whose object entries are merged into the event metrics.
const METRICS_FIELD: &str = "metrics";

/// A single telemetry event reported by an installer run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TelemetryEvent {
    /// Identifier assigned by the event store.
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub id: Option<String>,

    /// Anonymous identifier of the installation.
    pub anonymous_id: String,

    /// Identifier of the installer run this event belongs to.
    pub session_id: String,

    /// Installer step, e.g. `download` or `install`.
    pub step: String,

    /// Step status, e.g. `started`, `completed` or `failure`.
    pub status: String,

    /// When the event happened.
    pub timestamp: DateTime<Utc>,

    /// Version of the installer script.
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub script_version: Option<String>,

    /// Operating system version.
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub os_version: Option<String>,

    /// Operating system name.
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub os_name: Option<String>,

    /// CPU architecture, e.g. `x64`.
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub cpu_architecture: Option<String>,

    /// Installed memory in gigabytes.
    #[serde(
        rename = "memoryGB",
        skip_serializing_if = "Option::is_none",
        default
    )]
    pub memory_gb: Option<f64>,

    /// Every other value reported with the event.
    #[serde(default)]
    pub metrics: Map<String, Value>,
}

impl TelemetryEvent {
    /// Create an event with the required fields, timestamped now.
    #[must_use]
    pub fn new(
        anonymous_id: impl Into<String>,
        session_id: impl Into<String>,
        step: impl Into<String>,
        status: impl Into<String>,
    ) -> Self {
        Self {
            id: None,
            anonymous_id: anonymous_id.into(),
            session_id: session_id.into(),
            step: step.into(),
            status: status.into(),
            timestamp: Utc::now(),
            script_version: None,
            os_version: None,
            os_name: None,
            cpu_architecture: None,
            memory_gb: None,
            metrics: Map::new(),
        }
    }

    /// Normalize a raw JSON payload into an event.
    ///
    /// Known keys fill the dedicated fields. A `timestamp` that is missing or
    /// cannot be parsed is replaced with `received_at`. All remaining keys are
    /// kept in `metrics`; a `metrics` object in the payload is merged into it,
    /// its entries winning over top-level keys of the same name.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidEvent`] if a required field is missing or empty,
    /// or a known field has an unusable type.
    pub fn from_payload(payload: Map<String, Value>, received_at: DateTime<Utc>) -> Result<Self> {
        let anonymous_id = required_string(&payload, "anonymousId")?;
        let session_id = required_string(&payload, "sessionId")?;
        let step = required_string(&payload, "step")?;
        let status = required_string(&payload, "status")?;

        let timestamp = payload
            .get("timestamp")
            .and_then(Value::as_str)
            .and_then(parse_timestamp)
            .unwrap_or(received_at);

        let script_version = optional_string(&payload, "scriptVersion")?;
        let os_version = optional_string(&payload, "osVersion")?;
        let os_name = optional_string(&payload, "osName")?;
        let cpu_architecture = optional_string(&payload, "cpuArchitecture")?;
        let memory_gb = optional_number(&payload, "memoryGB")?;

        let mut metrics = Map::new();
        let mut nested = None;
        for (key, value) in payload {
            if KNOWN_FIELDS.contains(&key.as_str()) {
                continue;
            }
            match value {
                Value::Object(map) if key == METRICS_FIELD => nested = Some(map),
                value => {
                    metrics.insert(key, value);
                }
            }
        }
        if let Some(nested) = nested {
            metrics.extend(nested);
        }

        Ok(Self {
            id: None,
            anonymous_id,
            session_id,
            step,
            status,
            timestamp,
            script_version,
            os_version,
            os_name,
            cpu_architecture,
            memory_gb,
            metrics,
        })
    }

    /// Read a boolean metric, treating anything else as absent.
    #[must_use]
    pub fn metric_flag(&self, name: &str) -> Option<bool> {
        self.metrics.get(name).and_then(Value::as_bool)
    }

    /// Whether this event records a completed, successful installation.
    #[must_use]
    pub fn is_successful_install(&self) -> bool {
        self.step == INSTALL_STEP
            && self.status == status::COMPLETED
            && self.metric_flag("success") == Some(true)
    }

    /// Human-readable OS description, e.g. `Windows 10`.
    #[must_use]
    pub fn os_label(&self) -> Option<String> {
        self.os_name.as_ref().map(|name| {
            format!("{name} {}", self.os_version.as_deref().unwrap_or(""))
                .trim()
                .to_string()
        })
    }
}

/// Format a timestamp for storage.
///
/// Always UTC with microsecond precision, so stored values sort
/// lexicographically in chronological order.
#[must_use]
pub fn format_timestamp(timestamp: &DateTime<Utc>) -> String {
    timestamp.to_rfc3339_opts(SecondsFormat::Micros, true)
}

/// Parse an ISO-8601 timestamp.
///
/// Accepts RFC 3339 (including a trailing `Z`) and naive date-times, which are
/// taken to be UTC.
#[must_use]
pub fn parse_timestamp(value: &str) -> Option<DateTime<Utc>> {
    let value = value.trim();
    if let Ok(dt) = DateTime::parse_from_rfc3339(value) {
        return Some(dt.with_timezone(&Utc));
    }
    ["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%d %H:%M:%S%.f"]
        .iter()
        .find_map(|format| NaiveDateTime::parse_from_str(value, format).ok())
        .map(|naive| naive.and_utc())
}

fn required_string(payload: &Map<String, Value>, key: &str) -> Result<String> {
    match payload.get(key) {
        Some(Value::String(s)) if !s.trim().is_empty() => Ok(s.clone()),
        Some(Value::String(_)) => Err(Error::invalid_event(format!("field '{key}' is empty"))),
        None | Some(Value::Null) => Err(Error::invalid_event(format!(
            "missing required field '{key}'"
        ))),
        Some(_) => Err(Error::invalid_event(format!(
            "field '{key}' must be a string"
        ))),
    }
}

fn optional_string(payload: &Map<String, Value>, key: &str) -> Result<Option<String>> {
    match payload.get(key) {
        None | Some(Value::Null) => Ok(None),
        Some(Value::String(s)) => Ok(Some(s.clone())),
        Some(v @ (Value::Number(_) | Value::Bool(_))) => Ok(Some(v.to_string())),
        Some(_) => Err(Error::invalid_event(format!(
            "field '{key}' must be a string"
        ))),
    }
}

fn optional_number(payload: &Map<String, Value>, key: &str) -> Result<Option<f64>> {
    match payload.get(key) {
        None | Some(Value::Null) => Ok(None),
        Some(Value::Number(n)) => Ok(n.as_f64()),
        Some(Value::String(s)) => s
            .trim()
            .parse()
            .map(Some)
            .map_err(|_| Error::invalid_event(format!("field '{key}' must be a number"))),
        Some(_) => Err(Error::invalid_event(format!(
            "field '{key}' must be a number"
        ))),
    }
}
