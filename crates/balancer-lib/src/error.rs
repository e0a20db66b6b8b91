//! Reconcile errors

use thiserror::Error;

/// A collaborator failed during a reconcile iteration.
///
/// Skips (no traffic, no destination, insignificant change) are outcomes,
/// not errors.
#[derive(Debug, Error)]
pub enum ReconcileError {
    #[error("metrics source failed: {0:#}")]
    Metrics(#[source] anyhow::Error),

    #[error("cluster state failed: {0:#}")]
    ClusterState(#[source] anyhow::Error),
}

impl ReconcileError {
    /// Health component the failure is attributed to
    pub fn component(&self) -> &'static str {
        match self {
            ReconcileError::Metrics(_) => crate::health::components::METRICS_SOURCE,
            ReconcileError::ClusterState(_) => crate::health::components::CLUSTER_STATE,
        }
    }
}

pub type ReconcileResult<T> = std::result::Result<T, ReconcileError>;
