//! Bootstrap Preconditions
//!
//! Resolves the process-wide [`Facts`] exactly once, before any watch is
//! started. Resolution is all-or-nothing: a missing image reference or a
//! failed version probe aborts startup, so the engine can never run with
//! partial configuration.

use crate::domain::{ServerVersion, VersionProbe};
use crate::error::{Error, Result};
use serde::Serialize;
use std::sync::Arc;
use tracing::{error, info};

pub const CEPH_IMAGE: &str = "CEPH_IMAGE";
pub const NOOBAA_CORE_IMAGE: &str = "NOOBAA_CORE_IMAGE";
pub const NOOBAA_DB_IMAGE: &str = "NOOBAA_DB_IMAGE";
pub const OCS_METRICS_EXPORTER_IMAGE: &str = "OCS_METRICS_EXPORTER_IMAGE";

/// Image references for every managed component
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ImageMap {
    pub ceph: String,
    pub noobaa_core: String,
    pub noobaa_db: String,
    pub metrics_exporter: String,
}

impl ImageMap {
    /// Read every image from `lookup`. Unset and empty values are both
    /// missing; the first missing variable is reported.
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let require = |variable: &str| -> Result<String> {
            match lookup(variable) {
                Some(value) if !value.trim().is_empty() => Ok(value),
                _ => {
                    error!(variable, "Missing image environment variable for initialization");
                    Err(Error::MissingImage {
                        variable: variable.to_string(),
                    })
                }
            }
        };

        Ok(Self {
            ceph: require(CEPH_IMAGE)?,
            noobaa_core: require(NOOBAA_CORE_IMAGE)?,
            noobaa_db: require(NOOBAA_DB_IMAGE)?,
            metrics_exporter: require(OCS_METRICS_EXPORTER_IMAGE)?,
        })
    }
}

/// Immutable configuration shared by every convergence run
#[derive(Debug, Clone, Serialize)]
pub struct Facts {
    pub images: ImageMap,
    pub server_version: ServerVersion,
}

pub type FactsRef = Arc<Facts>;

impl Facts {
    /// Resolve everything or nothing
    pub async fn resolve<F>(
        lookup: F,
        version_probe: &dyn VersionProbe,
    ) -> Result<FactsRef>
    where
        F: Fn(&str) -> Option<String>,
    {
        let images = ImageMap::from_lookup(lookup)?;

        let server_version = version_probe.server_version().await.map_err(|e| {
            error!(error = %e, "Failed to get server version");
            match e {
                Error::VersionProbe(_) => e,
                other => Error::VersionProbe(other.to_string()),
            }
        })?;

        let facts = Facts {
            images,
            server_version,
        };
        info!(
            server_version = %facts.server_version,
            ceph_image = %facts.images.ceph,
            "Bootstrap preconditions resolved"
        );
        Ok(Arc::new(facts))
    }
}
