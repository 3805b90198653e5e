use std::collections::BTreeMap;

use geos3_protocol::constants::{AUTHORIZATION, X_AMZ_CONTENT_SHA256};
use geos3_protocol::encoding::{encode_path, uri_encode};
use geos3_protocol::{Method, Request};

use crate::crypto::sha256_hex;

/// Normalized view of a request used as signing input.
///
/// Built fresh for every signing attempt and never persisted. Header names
/// are lower-cased and values have runs of whitespace collapsed to a
/// single space.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CanonicalRequest {
    pub method: Method,
    /// Unencoded path-style resource, `/bucket/key`.
    pub resource: String,
    /// Decoded query parameters, sorted by name.
    pub query: Vec<(String, Option<String>)>,
    pub headers: BTreeMap<String, String>,
    /// Hex SHA-256 of the body, or a payload sentinel.
    pub payload_hash: String,
}

impl CanonicalRequest {
    pub fn from_request(request: &Request) -> Self {
        let headers = request
            .headers()
            .iter()
            .filter(|(name, _)| name.as_str() != AUTHORIZATION)
            .map(|(name, value)| (name.clone(), collapse_whitespace(value)))
            .collect();

        let payload_hash = request
            .header(X_AMZ_CONTENT_SHA256)
            .map(str::to_string)
            .unwrap_or_else(|| sha256_hex(request.body()));

        Self {
            method: request.method(),
            resource: request.path(),
            query: request
                .query()
                .iter()
                .map(|(k, v)| (k.clone(), v.clone()))
                .collect(),
            headers,
            payload_hash,
        }
    }

    pub fn canonical_uri(&self) -> String {
        encode_path(&self.resource)
    }

    /// Query parameters with names and values encoded, sorted by encoded
    /// name then value. Value-less parameters sign as `name=`.
    pub fn canonical_query(&self) -> String {
        let mut pairs: Vec<(String, String)> = self
            .query
            .iter()
            .map(|(k, v)| (uri_encode(k), uri_encode(v.as_deref().unwrap_or(""))))
            .collect();
        pairs.sort();
        pairs
            .iter()
            .map(|(k, v)| format!("{k}={v}"))
            .collect::<Vec<_>>()
            .join("&")
    }

    /// One `name:value\n` line per header.
    pub fn canonical_headers(&self) -> String {
        self.headers
            .iter()
            .map(|(k, v)| format!("{k}:{v}\n"))
            .collect()
    }

    pub fn signed_headers(&self) -> String {
        self.headers.keys().cloned().collect::<Vec<_>>().join(";")
    }

    /// The V4 canonical request string.
    pub fn to_v4_string(&self) -> String {
        format!(
            "{}\n{}\n{}\n{}\n{}\n{}",
            self.method.as_str(),
            self.canonical_uri(),
            self.canonical_query(),
            self.canonical_headers(),
            self.signed_headers(),
            self.payload_hash
        )
    }

    pub fn v4_hash(&self) -> String {
        sha256_hex(self.to_v4_string().as_bytes())
    }
}

fn collapse_whitespace(value: &str) -> String {
    value.split_whitespace().collect::<Vec<_>>().join(" ")
}
