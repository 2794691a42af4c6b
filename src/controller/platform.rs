//! Platform detection
//!
//! The infrastructure platform is inferred from node `spec.providerID`
//! values. Detection runs once per convergence run; a long-lived process
//! must not assume the answer never changes.

use crate::domain::Platform;
use crate::error::{Error, Result};
use std::collections::BTreeMap;

/// Map one provider ID (`<scheme>://...`) to a platform. Nodes without a
/// recognised scheme are treated as bare metal.
pub fn platform_from_provider_id(provider_id: &str) -> Platform {
    let scheme = provider_id
        .split_once("://")
        .map(|(scheme, _)| scheme)
        .unwrap_or(provider_id)
        .to_ascii_lowercase();

    match scheme.as_str() {
        "aws" => Platform::Aws,
        "azure" => Platform::Azure,
        "gce" => Platform::Gcp,
        "ibm" | "ibmcloud" => Platform::IbmCloud,
        "openstack" => Platform::OpenStack,
        "vsphere" => Platform::VSphere,
        _ => Platform::BareMetal,
    }
}

/// Majority platform over a set of node provider IDs. Ties go to the
/// platform that sorts first, keeping the answer stable across runs.
pub fn detect_platform<'a, I>(provider_ids: I) -> Result<Platform>
where
    I: IntoIterator<Item = Option<&'a str>>,
{
    let mut votes: BTreeMap<Platform, usize> = BTreeMap::new();
    for id in provider_ids {
        let platform = id.map(platform_from_provider_id).unwrap_or(Platform::BareMetal);
        *votes.entry(platform).or_default() += 1;
    }

    votes
        .into_iter()
        .fold(None, |best: Option<(Platform, usize)>, (platform, count)| match best {
            Some((_, best_count)) if best_count >= count => best,
            _ => Some((platform, count)),
        })
        .map(|(platform, _)| platform)
        .ok_or_else(|| Error::PlatformDetection("no nodes found".into()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;

    #[test]
    fn test_provider_id_schemes() {
        assert_eq!(platform_from_provider_id("aws:///us-east-1a/i-0abc"), Platform::Aws);
        assert_eq!(
            platform_from_provider_id("azure:///subscriptions/x/vm-0"),
            Platform::Azure
        );
        assert_eq!(platform_from_provider_id("gce://proj/us-central1-a/n1"), Platform::Gcp);
        assert_eq!(platform_from_provider_id("ibm://acct///id"), Platform::IbmCloud);
        assert_eq!(platform_from_provider_id("openstack:///uuid"), Platform::OpenStack);
        assert_eq!(platform_from_provider_id("vsphere://4230-ab"), Platform::VSphere);
        assert_eq!(platform_from_provider_id("kind://docker/kind/n"), Platform::BareMetal);
        assert_eq!(platform_from_provider_id(""), Platform::BareMetal);
    }

    #[test]
    fn test_majority_wins() {
        let ids = [Some("aws:///a"), Some("aws:///b"), None];
        assert_eq!(detect_platform(ids).unwrap(), Platform::Aws);
    }

    #[test]
    fn test_no_nodes_is_an_error() {
        let ids: Vec<Option<&str>> = vec![];
        assert_matches!(detect_platform(ids), Err(Error::PlatformDetection(_)));
    }
}
