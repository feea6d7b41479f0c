//! `MongoDB` event store.
//!
//! Events live in one `telemetry_events` collection using the installer's
//! camelCase field names. Grouped statistics run as aggregation pipelines on
//! the server.

use std::collections::BTreeMap;

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use mongodb::bson::{doc, Bson, DateTime as BsonDateTime, Document};
use mongodb::{Client, Collection, Cursor, Database, IndexModel};
use serde_json::{Map, Value};
use tracing::{debug, info, warn};

use super::{cutoff_before, EventStore, InstallSpan, SessionSummary, StorageStats};
use crate::error::Result;
use crate::event::{status, TelemetryEvent, INSTALL_STEP};

/// Collection holding telemetry events.
pub const COLLECTION: &str = "telemetry_events";

/// [`EventStore`] backed by a `MongoDB` database.
#[derive(Debug, Clone)]
pub struct MongoStore {
    database: Database,
    events: Collection<Document>,
}

impl MongoStore {
    /// Connect to `uri`, check the server answers and ensure the indexes exist.
    ///
    /// # Errors
    ///
    /// Returns an error if the URI is invalid or the server cannot be reached.
    pub async fn connect(uri: &str, database: &str) -> Result<Self> {
        let client = Client::with_uri_str(uri).await?;
        let database = client.database(database);
        database.run_command(doc! { "ping": 1 }).await?;

        let events = database.collection::<Document>(COLLECTION);
        for keys in [
            doc! { "sessionId": 1, "timestamp": 1 },
            doc! { "step": 1, "status": 1, "timestamp": 1 },
            doc! { "timestamp": 1 },
            doc! { "osName": 1 },
        ] {
            events
                .create_index(IndexModel::builder().keys(keys).build())
                .await?;
        }

        info!("Connected to MongoDB database {}", database.name());
        Ok(Self { database, events })
    }

    async fn aggregate(&self, pipeline: Vec<Document>) -> Result<Vec<Document>> {
        let cursor = self.events.aggregate(pipeline).await?;
        collect(cursor).await
    }
}

async fn collect(mut cursor: Cursor<Document>) -> Result<Vec<Document>> {
    let mut documents = Vec::new();
    while cursor.advance().await? {
        documents.push(cursor.deserialize_current()?);
    }
    Ok(documents)
}

fn bson_time(timestamp: DateTime<Utc>) -> BsonDateTime {
    BsonDateTime::from_millis(timestamp.timestamp_millis())
}

fn chrono_time(timestamp: BsonDateTime) -> Option<DateTime<Utc>> {
    DateTime::from_timestamp_millis(timestamp.timestamp_millis())
}

/// Integer value of a numeric BSON field; other types count as 0.
#[allow(clippy::cast_possible_truncation)]
fn bson_i64(value: Option<&Bson>) -> i64 {
    match value {
        Some(Bson::Int32(n)) => i64::from(*n),
        Some(Bson::Int64(n)) => *n,
        Some(Bson::Double(n)) => *n as i64,
        _ => 0,
    }
}

fn bson_f64(value: Option<&Bson>) -> Option<f64> {
    match value {
        Some(Bson::Double(n)) => Some(*n),
        Some(Bson::Int32(n)) => Some(f64::from(*n)),
        #[allow(clippy::cast_precision_loss)]
        Some(Bson::Int64(n)) => Some(*n as f64),
        _ => None,
    }
}

fn optional_str(document: &Document, key: &str) -> Option<String> {
    document.get_str(key).ok().map(str::to_string)
}

/// Build the stored document for an event. Absent optional fields are omitted.
pub(crate) fn event_to_document(event: &TelemetryEvent) -> Result<Document> {
    let mut document = doc! {
        "anonymousId": event.anonymous_id.as_str(),
        "sessionId": event.session_id.as_str(),
        "step": event.step.as_str(),
        "status": event.status.as_str(),
        "timestamp": bson_time(event.timestamp),
        "metrics": mongodb::bson::to_document(&event.metrics)?,
    };

    for (key, value) in [
        ("scriptVersion", &event.script_version),
        ("osVersion", &event.os_version),
        ("osName", &event.os_name),
        ("cpuArchitecture", &event.cpu_architecture),
    ] {
        if let Some(value) = value {
            document.insert(key, value.as_str());
        }
    }
    if let Some(memory_gb) = event.memory_gb {
        document.insert("memoryGB", memory_gb);
    }
    Ok(document)
}

/// Read a stored document back into an event.
pub(crate) fn document_to_event(document: &Document) -> TelemetryEvent {
    let id = match document.get("_id") {
        Some(Bson::ObjectId(oid)) => Some(oid.to_hex()),
        Some(other) => Some(other.to_string()),
        None => None,
    };

    let timestamp = document
        .get_datetime("timestamp")
        .ok()
        .and_then(|ts| chrono_time(*ts))
        .unwrap_or_else(|| {
            warn!("Event {:?} has no usable timestamp", id);
            DateTime::<Utc>::UNIX_EPOCH
        });

    let metrics = match document.get_document("metrics") {
        Ok(metrics) => match Bson::Document(metrics.clone()).into_relaxed_extjson() {
            Value::Object(map) => map,
            _ => Map::new(),
        },
        Err(_) => Map::new(),
    };

    TelemetryEvent {
        id,
        anonymous_id: optional_str(document, "anonymousId").unwrap_or_default(),
        session_id: optional_str(document, "sessionId").unwrap_or_default(),
        step: optional_str(document, "step").unwrap_or_default(),
        status: optional_str(document, "status").unwrap_or_default(),
        timestamp,
        script_version: optional_str(document, "scriptVersion"),
        os_version: optional_str(document, "osVersion"),
        os_name: optional_str(document, "osName"),
        cpu_architecture: optional_str(document, "cpuArchitecture"),
        memory_gb: bson_f64(document.get("memoryGB")),
        metrics,
    }
}

fn successful_install_filter() -> Document {
    doc! {
        "step": INSTALL_STEP,
        "status": status::COMPLETED,
        "metrics.success": true,
    }
}

/// Count distinct sessions among the events matching `filter`.
fn distinct_sessions_pipeline(filter: Document) -> Vec<Document> {
    vec![
        doc! { "$match": filter },
        doc! { "$group": { "_id": "$sessionId" } },
        doc! { "$count": "count" },
    ]
}

fn installs_by_os_pipeline() -> Vec<Document> {
    vec![
        doc! { "$match": { "osName": { "$ne": null } } },
        doc! { "$group": { "_id": { "os": "$osName", "session": "$sessionId" } } },
        doc! { "$group": { "_id": "$_id.os", "count": { "$sum": 1 } } },
    ]
}

fn steps_status_pipeline() -> Vec<Document> {
    vec![doc! {
        "$group": {
            "_id": { "step": "$step", "status": "$status" },
            "count": { "$sum": 1 },
        }
    }]
}

fn install_spans_pipeline() -> Vec<Document> {
    vec![
        doc! { "$match": { "step": INSTALL_STEP } },
        doc! {
            "$group": {
                "_id": "$sessionId",
                "first": { "$min": "$timestamp" },
                "last": { "$max": "$timestamp" },
                "succeeded": {
                    "$max": {
                        "$cond": [
                            {
                                "$and": [
                                    { "$eq": ["$status", status::COMPLETED] },
                                    { "$eq": ["$metrics.success", true] },
                                ]
                            },
                            1,
                            0,
                        ]
                    }
                },
            }
        },
    ]
}

fn recent_install_sessions_pipeline(limit: i64) -> Vec<Document> {
    vec![
        doc! { "$match": { "step": INSTALL_STEP } },
        doc! { "$sort": { "timestamp": -1, "_id": -1 } },
        doc! { "$group": { "_id": "$sessionId", "latest": { "$first": "$$ROOT" } } },
        doc! { "$replaceRoot": { "newRoot": "$latest" } },
        doc! { "$sort": { "timestamp": -1, "_id": -1 } },
        doc! { "$limit": limit },
    ]
}

fn time_range_pipeline(filter: Document) -> Vec<Document> {
    vec![
        doc! { "$match": filter },
        doc! {
            "$group": {
                "_id": null,
                "first": { "$min": "$timestamp" },
                "last": { "$max": "$timestamp" },
            }
        },
    ]
}

/// Failure events per step, over sessions with an install failure since `cutoff`.
fn failure_steps_pipeline(cutoff: DateTime<Utc>) -> Vec<Document> {
    vec![
        doc! { "$match": { "status": status::FAILURE } },
        doc! {
            "$group": {
                "_id": "$sessionId",
                "steps": { "$push": "$step" },
                "failedInstall": {
                    "$max": {
                        "$cond": [
                            {
                                "$and": [
                                    { "$eq": ["$step", INSTALL_STEP] },
                                    { "$gte": ["$timestamp", bson_time(cutoff)] },
                                ]
                            },
                            1,
                            0,
                        ]
                    }
                },
            }
        },
        doc! { "$match": { "failedInstall": 1 } },
        doc! { "$unwind": "$steps" },
        doc! { "$group": { "_id": "$steps", "count": { "$sum": 1 } } },
    ]
}

/// Read `{_id: <string>, count: <n>}` rows into a map.
fn counts_by_id(rows: &[Document]) -> BTreeMap<String, i64> {
    rows.iter()
        .filter_map(|row| {
            let key = row.get_str("_id").ok()?;
            Some((key.to_string(), bson_i64(row.get("count"))))
        })
        .collect()
}

/// Read the `first`/`last` dates of a time range row.
fn time_range(row: &Document) -> Option<(DateTime<Utc>, DateTime<Utc>)> {
    let first = chrono_time(*row.get_datetime("first").ok()?)?;
    let last = chrono_time(*row.get_datetime("last").ok()?)?;
    Some((first, last))
}

#[async_trait]
impl EventStore for MongoStore {
    fn describe(&self) -> String {
        format!("mongodb:{}/{COLLECTION}", self.database.name())
    }

    async fn insert(&self, event: TelemetryEvent) -> Result<String> {
        let document = event_to_document(&event)?;
        let inserted = self.events.insert_one(document).await?;
        let id = match inserted.inserted_id {
            Bson::ObjectId(oid) => oid.to_hex(),
            other => other.to_string(),
        };
        debug!(
            "Inserted event {} for session {} ({} - {})",
            id, event.session_id, event.step, event.status
        );
        Ok(id)
    }

    async fn events_for_session(&self, session_id: &str) -> Result<Vec<TelemetryEvent>> {
        let cursor = self
            .events
            .find(doc! { "sessionId": session_id })
            .sort(doc! { "timestamp": 1, "_id": 1 })
            .await?;
        Ok(collect(cursor).await?.iter().map(document_to_event).collect())
    }

    async fn session_count(&self) -> Result<i64> {
        let rows = self.aggregate(distinct_sessions_pipeline(doc! {})).await?;
        Ok(rows.first().map_or(0, |row| bson_i64(row.get("count"))))
    }

    async fn count_successful_installs(&self) -> Result<i64> {
        let rows = self
            .aggregate(distinct_sessions_pipeline(successful_install_filter()))
            .await?;
        Ok(rows.first().map_or(0, |row| bson_i64(row.get("count"))))
    }

    async fn installs_by_os(&self) -> Result<BTreeMap<String, i64>> {
        let rows = self.aggregate(installs_by_os_pipeline()).await?;
        Ok(counts_by_id(&rows))
    }

    async fn steps_status(&self) -> Result<BTreeMap<String, BTreeMap<String, i64>>> {
        let rows = self.aggregate(steps_status_pipeline()).await?;

        let mut result: BTreeMap<String, BTreeMap<String, i64>> = BTreeMap::new();
        for row in &rows {
            let Ok(key) = row.get_document("_id") else {
                continue;
            };
            let (Ok(step), Ok(status)) = (key.get_str("step"), key.get_str("status")) else {
                continue;
            };
            result
                .entry(step.to_string())
                .or_default()
                .insert(status.to_string(), bson_i64(row.get("count")));
        }
        Ok(result)
    }

    async fn install_spans(&self) -> Result<Vec<InstallSpan>> {
        let rows = self.aggregate(install_spans_pipeline()).await?;

        let mut spans = Vec::with_capacity(rows.len());
        for row in &rows {
            let Ok(session_id) = row.get_str("_id") else {
                continue;
            };
            match time_range(row) {
                Some((first, last)) => spans.push(InstallSpan {
                    session_id: session_id.to_string(),
                    first,
                    last,
                    succeeded: bson_i64(row.get("succeeded")) != 0,
                }),
                None => warn!("Skipping session {} with unusable timestamps", session_id),
            }
        }
        Ok(spans)
    }

    async fn recent_install_sessions(&self, limit: usize) -> Result<Vec<TelemetryEvent>> {
        if limit == 0 {
            return Ok(Vec::new());
        }
        let limit = i64::try_from(limit).unwrap_or(i64::MAX);
        let rows = self
            .aggregate(recent_install_sessions_pipeline(limit))
            .await?;
        Ok(rows.iter().map(document_to_event).collect())
    }

    async fn session_summary(&self, session_id: &str) -> Result<Option<SessionSummary>> {
        let rows = self
            .aggregate(time_range_pipeline(doc! { "sessionId": session_id }))
            .await?;
        let Some((first, last)) = rows.first().and_then(time_range) else {
            return Ok(None);
        };

        let os = self
            .events
            .find_one(doc! { "sessionId": session_id, "osName": { "$ne": null } })
            .sort(doc! { "timestamp": 1, "_id": 1 })
            .await?
            .and_then(|document| document_to_event(&document).os_label());

        Ok(Some(SessionSummary { first, last, os }))
    }

    async fn count_install_events_since(
        &self,
        cutoff: DateTime<Utc>,
        status: Option<&str>,
    ) -> Result<i64> {
        let mut filter = doc! {
            "step": INSTALL_STEP,
            "timestamp": { "$gte": bson_time(cutoff) },
        };
        if let Some(status) = status {
            filter.insert("status", status);
        }
        let count = self.events.count_documents(filter).await?;
        Ok(i64::try_from(count).unwrap_or(i64::MAX))
    }

    async fn failure_steps_since(&self, cutoff: DateTime<Utc>) -> Result<BTreeMap<String, i64>> {
        let rows = self.aggregate(failure_steps_pipeline(cutoff)).await?;
        Ok(counts_by_id(&rows))
    }

    async fn prune_older_than(&self, max_age: Duration) -> Result<usize> {
        let cutoff = cutoff_before(Utc::now(), max_age)?;
        let deleted = self
            .events
            .delete_many(doc! { "timestamp": { "$lt": bson_time(cutoff) } })
            .await?
            .deleted_count;
        if deleted > 0 {
            info!("Pruned {} old telemetry events", deleted);
        }
        Ok(usize::try_from(deleted).unwrap_or(usize::MAX))
    }

    async fn clear(&self) -> Result<usize> {
        let deleted = self.events.delete_many(doc! {}).await?.deleted_count;
        info!("Deleted {} telemetry events", deleted);
        Ok(usize::try_from(deleted).unwrap_or(usize::MAX))
    }

    async fn stats(&self) -> Result<StorageStats> {
        let total_events = self.events.count_documents(doc! {}).await?;
        let total_sessions = self.session_count().await?;
        let range = self
            .aggregate(time_range_pipeline(doc! {}))
            .await?
            .first()
            .and_then(time_range);

        let db_stats = self.database.run_command(doc! { "dbStats": 1 }).await?;
        let db_size_bytes = u64::try_from(bson_i64(db_stats.get("dataSize"))).unwrap_or(0);

        Ok(StorageStats {
            total_events: i64::try_from(total_events).unwrap_or(i64::MAX),
            total_sessions,
            oldest_event: range.map(|(first, _)| first),
            newest_event: range.map(|(_, last)| last),
            db_size_bytes,
        })
    }
}
