//! Domain types and port traits
//!
//! Core types shared by every stage of the pipeline and the trait seams
//! behind which the Kubernetes-facing adapters live.

pub mod ports;
pub mod target;

pub use ports::*;
pub use target::*;
