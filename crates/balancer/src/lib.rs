//! OptiBalancer daemon
//!
//! Runs the reconcile loop for the configured deployments and serves
//! health, readiness, metrics and per-target status over HTTP.

pub mod api;
pub mod config;
