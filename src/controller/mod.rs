//! StorageCluster Controller
//!
//! The event-filtering and request-routing layer and the convergence
//! engine it feeds:
//!
//! - [`events`] / [`watch`]: what the watch runtime delivers
//! - [`predicates`] / [`registry`]: which changes matter, per kind
//! - [`mapper`]: which StorageClusters a change affects
//! - [`dispatcher`] / [`queue`] / [`engine`]: scheduling and workers
//! - [`bootstrap`]: startup preconditions
//! - [`reconcile`] / [`conditions`] / [`platform`]: the convergence step

pub mod bootstrap;
pub mod conditions;
pub mod dispatcher;
pub mod engine;
pub mod events;
pub mod mapper;
pub mod platform;
pub mod predicates;
pub mod queue;
pub mod reconcile;
pub mod registry;
pub mod retry;
pub mod watch;

#[cfg(test)]
pub(crate) mod testing;

pub use bootstrap::{Facts, FactsRef, ImageMap};
pub use dispatcher::{event_channel, Dispatcher, EventReceiver, EventSender, SendOutcome};
pub use engine::{ControllerConfig, Engine};
pub use events::{ChangeEvent, ResourceKind, WatchedObject};
pub use mapper::RequestMapper;
pub use predicates::{compose, Predicate};
pub use queue::WorkQueue;
pub use reconcile::{ConvergenceOutcome, ConvergenceStep, Disposition, Reconciler, ReconcilerDeps};
pub use registry::{storage_cluster_watches, WatchOptions, WatchRegistration, WatchTable};
pub use retry::RetryConfig;
pub use watch::{pump_events, WatchState};
