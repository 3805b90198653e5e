use std::sync::{PoisonError, RwLock};

use geos3_protocol::Endpoint;
use tracing::info;

use crate::config::SiteConfig;

/// One site the router may send a request to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Candidate {
    pub name: String,
    pub endpoint: Endpoint,
    pub healthy: bool,
}

/// Source of the ordered candidate list and its health flags.
///
/// The order must be stable across calls: the router hashes into it.
pub trait HealthView: Send + Sync {
    fn candidates(&self) -> Vec<Candidate>;
}

/// Health flags for a fixed, configured list of sites.
#[derive(Debug, Default)]
pub struct SiteHealth {
    sites: RwLock<Vec<Candidate>>,
}

impl SiteHealth {
    pub fn new(sites: impl IntoIterator<Item = (String, Endpoint)>) -> Self {
        let sites = sites
            .into_iter()
            .map(|(name, endpoint)| Candidate {
                name,
                endpoint,
                healthy: true,
            })
            .collect();
        Self {
            sites: RwLock::new(sites),
        }
    }

    pub fn from_config(sites: &[SiteConfig]) -> Self {
        Self::new(sites.iter().map(|s| (s.name.clone(), s.endpoint.clone())))
    }

    /// Marks a site up or down. Returns `false` for an unknown site.
    pub fn set_healthy(&self, name: &str, healthy: bool) -> bool {
        let mut sites = self.sites.write().unwrap_or_else(PoisonError::into_inner);
        let Some(site) = sites.iter_mut().find(|s| s.name == name) else {
            return false;
        };
        if site.healthy != healthy {
            info!(site = %name, healthy, "site health changed");
            site.healthy = healthy;
        }
        true
    }

    pub fn is_healthy(&self, name: &str) -> Option<bool> {
        self.sites
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .find(|s| s.name == name)
            .map(|s| s.healthy)
    }
}

impl HealthView for SiteHealth {
    fn candidates(&self) -> Vec<Candidate> {
        self.sites
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn health() -> SiteHealth {
        SiteHealth::new([
            ("east".to_string(), "http://east:9020".parse().unwrap()),
            ("west".to_string(), "http://west:9020".parse().unwrap()),
        ])
    }

    #[test]
    fn sites_start_healthy_in_order() {
        let names: Vec<_> = health().candidates().into_iter().map(|c| c.name).collect();
        assert_eq!(names, ["east", "west"]);
    }

    #[test]
    fn toggling_health() {
        let health = health();
        assert!(health.set_healthy("west", false));
        assert_eq!(health.is_healthy("west"), Some(false));
        assert!(!health.candidates()[1].healthy);
        assert!(!health.set_healthy("north", false));
        assert_eq!(health.is_healthy("north"), None);
    }
}
