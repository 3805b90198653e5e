//! Geo-pinned endpoint selection.
//!
//! Every object is pinned to one primary site, chosen by hashing its geo
//! id (the key, or the bucket for bucket-level requests) over the full
//! site list. When the primary is unhealthy the router walks the list
//! forward from it, so every client agrees on the fallback too.

use serde::{Deserialize, Serialize};
use sha1::{Digest, Sha1};

use geos3_protocol::Endpoint;

use crate::ClientError;
use crate::health::Candidate;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RoutingMode {
    /// Hash the geo id to a primary site.
    #[default]
    GeoPinned,
    /// Always prefer the first healthy site in configuration order.
    Ordered,
}

/// The site chosen for one attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Route {
    pub site: String,
    pub endpoint: Endpoint,
    pub index: usize,
    pub primary: usize,
}

impl Route {
    pub fn is_fallback(&self) -> bool {
        self.index != self.primary
    }
}

/// Index of the primary site for `geo_id` among `count` sites.
///
/// The first three bytes of the SHA-1 digest, read big-endian, modulo
/// the site count.
pub fn pin_index(geo_id: &str, count: usize) -> usize {
    if count == 0 {
        return 0;
    }
    let digest = Sha1::digest(geo_id.as_bytes());
    let value = u32::from_be_bytes([0, digest[0], digest[1], digest[2]]);
    value as usize % count
}

#[derive(Debug, Clone, Copy, Default)]
pub struct GeoPinningRouter {
    mode: RoutingMode,
}

impl GeoPinningRouter {
    pub fn new(mode: RoutingMode) -> Self {
        Self { mode }
    }

    pub fn mode(&self) -> RoutingMode {
        self.mode
    }

    pub fn primary_index(&self, geo_id: Option<&str>, count: usize) -> usize {
        match (self.mode, geo_id) {
            (RoutingMode::GeoPinned, Some(id)) => pin_index(id, count),
            _ => 0,
        }
    }

    /// Site indices in the order they should be tried.
    pub fn preference_order(&self, geo_id: Option<&str>, count: usize) -> Vec<usize> {
        let primary = self.primary_index(geo_id, count);
        (0..count).map(|offset| (primary + offset) % count).collect()
    }

    /// Picks the first healthy site in preference order.
    pub fn route(
        &self,
        geo_id: Option<&str>,
        candidates: &[Candidate],
    ) -> Result<Route, ClientError> {
        let primary = self.primary_index(geo_id, candidates.len());
        self.preference_order(geo_id, candidates.len())
            .into_iter()
            .find(|&i| candidates[i].healthy)
            .map(|index| Route {
                site: candidates[index].name.clone(),
                endpoint: candidates[index].endpoint.clone(),
                index,
                primary,
            })
            .ok_or(ClientError::NoHealthyEndpoint)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn candidates(n: usize) -> Vec<Candidate> {
        (0..n)
            .map(|i| Candidate {
                name: format!("site{i}"),
                endpoint: format!("http://site{i}:9020").parse().unwrap(),
                healthy: true,
            })
            .collect()
    }

    #[test]
    fn pin_index_known_values() {
        // sha1("abc") starts a9 99 3e; 0xa9993e = 11114814.
        assert_eq!(pin_index("abc", 3), 0);
        assert_eq!(pin_index("abc", 5), 4);
        assert_eq!(pin_index("abc", 1), 0);
        assert_eq!(pin_index("abc", 0), 0);
    }

    #[test]
    fn routing_is_deterministic() {
        let router = GeoPinningRouter::default();
        let sites = candidates(4);
        for key in ["a", "photos/cat.jpg", "x/y/z", ""] {
            let first = router.route(Some(key), &sites).unwrap();
            let second = router.route(Some(key), &sites).unwrap();
            assert_eq!(first, second);
            assert!(!first.is_fallback());
        }
    }

    #[test]
    fn fallback_walks_forward_from_primary() {
        let router = GeoPinningRouter::default();
        let mut sites = candidates(5);
        let primary = pin_index("abc", 5);
        assert_eq!(primary, 4);
        sites[4].healthy = false;
        let route = router.route(Some("abc"), &sites).unwrap();
        assert_eq!(route.index, 0);
        assert_eq!(route.primary, 4);
        assert!(route.is_fallback());

        sites[0].healthy = false;
        assert_eq!(router.route(Some("abc"), &sites).unwrap().site, "site1");
    }

    #[test]
    fn no_healthy_site() {
        let router = GeoPinningRouter::default();
        let mut sites = candidates(2);
        for s in &mut sites {
            s.healthy = false;
        }
        assert!(matches!(
            router.route(Some("k"), &sites),
            Err(ClientError::NoHealthyEndpoint)
        ));
        assert!(matches!(
            router.route(Some("k"), &[]),
            Err(ClientError::NoHealthyEndpoint)
        ));
    }

    #[test]
    fn ordered_mode_prefers_first_site() {
        let router = GeoPinningRouter::new(RoutingMode::Ordered);
        let sites = candidates(3);
        assert_eq!(router.route(Some("abc"), &sites).unwrap().index, 0);
        assert_eq!(router.preference_order(Some("abc"), 3), vec![0, 1, 2]);
    }

    #[test]
    fn bucket_requests_pin_without_key() {
        let router = GeoPinningRouter::default();
        assert_eq!(router.primary_index(None, 3), 0);
        assert_eq!(router.preference_order(Some("abc"), 5), vec![4, 0, 1, 2, 3]);
    }
}
