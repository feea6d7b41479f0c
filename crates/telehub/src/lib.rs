//! `telehub` - Installation telemetry ingest, analytics and dashboard service
//!
//! Installer scripts post progress events to the HTTP API. Events are stored in
//! `MongoDB` (or an embedded `SQLite` file for local use) and summarized into
//! statistics, recent session listings and failure-rate anomalies, which a
//! dashboard renders.

#![warn(missing_docs)]
#![warn(missing_debug_implementations)]
#![deny(unsafe_code)]

pub mod analytics;
pub mod api;
pub mod cli;
pub mod client;
pub mod config;
pub mod dashboard;
pub mod error;
pub mod event;
pub mod logging;
pub mod retention;
pub mod service;
pub mod source;
pub mod storage;

pub use analytics::{Anomaly, RecentSession, TelemetryStats};
pub use client::ApiClient;
pub use config::Config;
pub use error::{Error, Result};
pub use event::TelemetryEvent;
pub use logging::init_logging;
pub use service::TelemetryService;
pub use source::TelemetrySource;
pub use storage::{EventStore, MongoStore, SqliteStore, Storage, StorageStats};
