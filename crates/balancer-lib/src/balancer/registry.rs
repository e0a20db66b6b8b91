//! Per-target reconcile status
//!
//! Holds the last outcome of every configured deployment for the HTTP API.

use super::{ApplyMode, ReconcileOutcome};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use tracing::debug;

/// Last known state of one reconcile target
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TargetStatus {
    pub namespace: String,
    pub deployment: String,
    /// "applied", "skipped" or "failed"; `None` before the first iteration
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_outcome: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub service: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub mode: Option<ApplyMode>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub distance: Option<u32>,
    /// Skip reason or error message
    #[serde(skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
    pub pods_dropped: usize,
    pub iterations: u64,
    pub failures: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_run_timestamp: Option<i64>,
}

impl TargetStatus {
    pub fn key(&self) -> String {
        target_key(&self.namespace, &self.deployment)
    }
}

/// `namespace/deployment`
pub fn target_key(namespace: &str, deployment: &str) -> String {
    format!("{}/{}", namespace, deployment)
}

/// Thread-safe registry of target statuses
#[derive(Debug, Default)]
pub struct TargetRegistry {
    targets: DashMap<String, TargetStatus>,
}

impl TargetRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a target with empty status; existing status is kept
    pub fn register(&self, namespace: &str, deployment: &str) {
        self.targets
            .entry(target_key(namespace, deployment))
            .or_insert_with(|| TargetStatus {
                namespace: namespace.to_string(),
                deployment: deployment.to_string(),
                ..Default::default()
            });
    }

    /// Record the outcome of a completed iteration
    pub fn record_outcome(
        &self,
        namespace: &str,
        deployment: &str,
        outcome: &ReconcileOutcome,
        pods_dropped: usize,
    ) {
        self.update(namespace, deployment, |status| {
            status.last_outcome = Some(outcome.label().to_string());
            status.pods_dropped = pods_dropped;
            match outcome {
                ReconcileOutcome::Applied {
                    service,
                    mode,
                    distance,
                    ..
                } => {
                    status.service = Some(service.clone());
                    status.mode = Some(*mode);
                    status.distance = *distance;
                    status.detail = None;
                }
                ReconcileOutcome::Skipped { service, reason } => {
                    if service.is_some() {
                        status.service = service.clone();
                    }
                    status.mode = None;
                    status.distance = None;
                    status.detail = Some(reason.to_string());
                }
            }
        });
    }

    /// Record a failed iteration
    pub fn record_failure(&self, namespace: &str, deployment: &str, error: &str) {
        self.update(namespace, deployment, |status| {
            status.last_outcome = Some("failed".to_string());
            status.failures += 1;
            status.detail = Some(error.to_string());
        });
    }

    fn update(&self, namespace: &str, deployment: &str, f: impl FnOnce(&mut TargetStatus)) {
        let key = target_key(namespace, deployment);
        debug!(target = %key, "Updating target status");

        let mut entry = self.targets.entry(key).or_insert_with(|| TargetStatus {
            namespace: namespace.to_string(),
            deployment: deployment.to_string(),
            ..Default::default()
        });
        entry.iterations += 1;
        entry.last_run_timestamp = Some(chrono::Utc::now().timestamp());
        f(entry.value_mut());
    }

    pub fn get(&self, namespace: &str, deployment: &str) -> Option<TargetStatus> {
        self.targets
            .get(&target_key(namespace, deployment))
            .map(|r| r.clone())
    }

    /// All statuses ordered by key
    pub fn list(&self) -> Vec<TargetStatus> {
        let mut all: Vec<TargetStatus> = self.targets.iter().map(|r| r.value().clone()).collect();
        all.sort_by_key(TargetStatus::key);
        all
    }

    pub fn len(&self) -> usize {
        self.targets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.targets.is_empty()
    }
}
