//! Library for locality-aware traffic balancing in a service mesh
//!
//! This crate provides the core functionality for:
//! - Scoring node-to-node edges by load, latency and capacity
//! - Enforcing local affinity and rounding to exact percentages
//! - Stepping live routing toward a target with a change gate
//! - Mapping routing to Istio DestinationRules
//! - Kubernetes and Prometheus collaborators
//! - Health checks and observability

pub mod adapters;
pub mod balancer;
pub mod engine;
pub mod error;
pub mod health;
pub mod mapper;
pub mod models;
pub mod observability;

#[cfg(test)]
mod testing;

pub use balancer::{
    ApplyMode, BalancerConfig, OptiBalancer, Planner, ReconcileOutcome, ReconcileRequest,
    SkipReason, TargetRegistry, TargetStatus,
};
pub use engine::{EngineConfig, TrafficEngine};
pub use error::ReconcileError;
pub use health::{
    ComponentHealth, ComponentStatus, HealthRegistry, HealthResponse, ReadinessResponse,
};
pub use models::*;
pub use observability::{BalancerMetrics, StructuredLogger};
