//! Tideway: a declarative reconciliation engine for Kubernetes
//!
//! The operator expands Applications, TideJobs, Routings and Namespaces into
//! the lower-level objects that run them and keeps the cluster converged on
//! that desired set.

pub mod config;
pub mod controller;
pub mod crd;
pub mod error;
pub mod generator;

#[cfg(feature = "rest-api")]
pub mod rest_api;

pub use crate::error::{Error, Result};
