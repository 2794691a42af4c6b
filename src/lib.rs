//! StorageCluster Operator - Convergence Engine
//!
//! A Kubernetes operator that converges a composite storage platform
//! (Ceph cluster, NooBaa object gateway, generated configuration and the
//! metrics exporter) toward the state declared by a `StorageCluster`.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────────┐
//! │                          Watch Runtime (kube)                               │
//! │  StorageCluster · CephCluster · NooBaa · PVC · Deployment · Service · ...   │
//! └──────────────────────────────────┬──────────────────────────────────────────┘
//!                                    │ ChangeEvent (bounded channel)
//! ┌──────────────────────────────────┴──────────────────────────────────────────┐
//! │                              Dispatcher                                     │
//! │  ┌─────────────────┐  ┌─────────────────┐  ┌─────────────────────────────┐  │
//! │  │   Watch Table   │  │   Predicates    │  │     Request Mapper          │  │
//! │  │ (kind → entry)  │  │  (significance) │  │ (owner / namespace fan-out) │  │
//! │  └─────────────────┘  └─────────────────┘  └─────────────────────────────┘  │
//! │                periodic resync · overflow resync                            │
//! └──────────────────────────────────┬──────────────────────────────────────────┘
//!                                    │ ConvergenceRequest
//! ┌──────────────────────────────────┴──────────────────────────────────────────┐
//! │              Work Queue (dedup on key, per-key serialization)               │
//! └──────────────────────────────────┬──────────────────────────────────────────┘
//!                                    │ Target
//! ┌──────────────────────────────────┴──────────────────────────────────────────┐
//! │                       Convergence Step (Reconciler)                         │
//! │  validate → detect platform → apply dependents → phase + conditions →       │
//! │  status write-back → transition events → disposition                        │
//! └─────────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Modules
//!
//! - [`controller`]: event routing, scheduling and the convergence step
//! - [`resources`]: dependent-resource templates and Kubernetes adapters
//! - [`crd`]: Custom Resource Definitions
//! - [`domain`]: Core domain types and traits
//! - [`metrics`]: Pipeline self-instrumentation
//! - [`error`]: Error types and handling

pub mod controller;
pub mod crd;
pub mod domain;
pub mod error;
pub mod metrics;
pub mod resources;

// Re-export commonly used types
pub use controller::{
    ChangeEvent, ControllerConfig, ConvergenceOutcome, ConvergenceStep, Disposition, Engine,
    Facts, ImageMap, Predicate, Reconciler, ReconcilerDeps, RequestMapper, ResourceKind,
    WatchTable, WorkQueue,
};

pub use crd::{
    StorageCluster, StorageClusterSpec, StorageClusterStatus, StorageClusterPhase,
    StorageClusterCondition, StorageConsumer, StorageProfile,
};

pub use domain::{
    ConvergenceRequest, Target,
    TargetCache, DependentApplier, StatusSink, EventRecorder, PlatformProbe, VersionProbe,
};

pub use error::{Error, Result, ErrorAction};

pub use metrics::PipelineMetrics;

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Library name
pub const NAME: &str = env!("CARGO_PKG_NAME");
