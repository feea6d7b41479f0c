//! Background pruning of old telemetry events.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;
use tracing::{debug, error, info};

use crate::config::Config;
use crate::error::{Error, Result};
use crate::service::TelemetryService;

/// How long events are kept and how often pruning runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetentionPolicy {
    /// Events older than this are deleted.
    pub max_age: Duration,
    /// Time between prune passes.
    pub interval: Duration,
}

impl RetentionPolicy {
    /// The configured policy, or `None` when retention is unlimited.
    #[must_use]
    pub fn from_config(config: &Config) -> Option<Self> {
        config.max_age().map(|max_age| Self {
            max_age,
            interval: config.prune_interval(),
        })
    }
}

/// Run a single prune pass.
///
/// # Errors
///
/// Returns an error if the deletion fails.
pub async fn prune_once(service: &TelemetryService, policy: RetentionPolicy) -> Result<usize> {
    let max_age = chrono::Duration::from_std(policy.max_age)
        .map_err(|e| Error::internal(format!("retention age out of range: {e}")))?;
    service.prune(max_age).await
}

/// Handle to a running retention task.
#[derive(Debug)]
pub struct RetentionHandle {
    stop_signal: Arc<AtomicBool>,
    task: JoinHandle<()>,
}

impl RetentionHandle {
    /// Stop the task; a pass already in progress is abandoned.
    pub fn stop(&self) {
        self.stop_signal.store(true, Ordering::SeqCst);
        self.task.abort();
    }

    /// Check if the task has been asked to stop.
    #[must_use]
    pub fn is_stopped(&self) -> bool {
        self.stop_signal.load(Ordering::SeqCst)
    }
}

/// Spawn the retention loop. The first pass runs immediately.
#[must_use]
pub fn spawn(service: TelemetryService, policy: RetentionPolicy) -> RetentionHandle {
    let stop_signal = Arc::new(AtomicBool::new(false));
    let stop = Arc::clone(&stop_signal);

    info!(
        "Retention enabled: keeping {} days, pruning every {} hours",
        policy.max_age.as_secs() / 86_400,
        policy.interval.as_secs() / 3_600
    );

    let task = tokio::spawn(async move {
        let mut ticker = tokio::time::interval(policy.interval);
        loop {
            ticker.tick().await;
            if stop.load(Ordering::SeqCst) {
                break;
            }
            match prune_once(&service, policy).await {
                Ok(pruned) => debug!("Retention pass pruned {} events", pruned),
                Err(e) => error!("Retention pass failed: {}", e),
            }
        }
    });

    RetentionHandle { stop_signal, task }
}
