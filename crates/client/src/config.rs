//! Client configuration.
//!
//! Loaded from a JSON file; every field except `sites` has a default, so
//! a minimal config names its sites and nothing else:
//!
//! ```json
//! { "sites": [{ "name": "east", "endpoint": "https://east.example.com" }] }
//! ```

use std::collections::HashSet;
use std::path::Path;
use std::time::Duration;

use chrono::TimeDelta;
use serde::{Deserialize, Serialize};

use geos3_checksum::ChecksumAlgorithm;
use geos3_protocol::constants::{DEFAULT_REGION, DEFAULT_SERVICE};
use geos3_protocol::{Credential, Endpoint};
use geos3_signer::SignatureVersion;

use crate::ClientError;
use crate::retry::RetryConfig;

pub const ENV_ACCESS_KEY_ID: &str = "GEOS3_ACCESS_KEY_ID";
pub const ENV_SECRET_ACCESS_KEY: &str = "GEOS3_SECRET_ACCESS_KEY";
pub const ENV_SESSION_TOKEN: &str = "GEOS3_SESSION_TOKEN";

const MIB: u64 = 1024 * 1024;

// ---------------------------------------------------------------------------
// Sections
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SiteConfig {
    pub name: String,
    pub endpoint: Endpoint,
}

/// Which integrity checks the checksum stage performs.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ChecksumConfig {
    /// Send `Content-MD5` with every request body.
    pub generate_content_md5: bool,
    /// Compare the returned ETag with the MD5 of what was sent.
    pub verify_write: bool,
    /// Verify whole-object GET bodies against their ETag.
    pub verify_read: bool,
}

impl Default for ChecksumConfig {
    fn default() -> Self {
        Self {
            generate_content_md5: true,
            verify_write: true,
            verify_read: true,
        }
    }
}

/// Multipart transfer tuning.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TransferConfig {
    pub part_size: u64,
    pub min_part_size: u64,
    pub download_part_size: u64,
    pub upload_concurrency: usize,
    pub download_concurrency: usize,
    /// Whole-object digest accumulated across parts; `None` disables it.
    pub whole_object_checksum: Option<ChecksumAlgorithm>,
    /// Re-check parts a resumed session reports as already uploaded.
    pub verify_resumed_parts: bool,
}

impl Default for TransferConfig {
    fn default() -> Self {
        Self {
            part_size: 5 * MIB,
            min_part_size: 5 * MIB,
            download_part_size: 5 * MIB,
            upload_concurrency: 8,
            download_concurrency: 6,
            whole_object_checksum: Some(ChecksumAlgorithm::Crc32),
            verify_resumed_parts: true,
        }
    }
}

// ---------------------------------------------------------------------------
// ClientConfig
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClientConfig {
    /// Sites in a stable order; geo-pinning hashes into this list.
    pub sites: Vec<SiteConfig>,
    pub region: String,
    pub service: String,
    pub signature_version: SignatureVersion,
    /// Sign `UNSIGNED-PAYLOAD` instead of hashing bodies (V4 only).
    pub unsigned_payload: bool,
    pub geo_pinning: bool,
    pub retry: RetryConfig,
    pub checksum: ChecksumConfig,
    pub transfer: TransferConfig,
    pub connect_timeout_ms: u64,
    pub read_timeout_ms: u64,
    /// Known offset of the server clock, added to signing timestamps.
    pub clock_skew_ms: i64,
    /// Probability of injecting a 500 before each request; testing only.
    pub fault_injection_rate: Option<f64>,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            sites: Vec::new(),
            region: DEFAULT_REGION.into(),
            service: DEFAULT_SERVICE.into(),
            signature_version: SignatureVersion::default(),
            unsigned_payload: false,
            geo_pinning: true,
            retry: RetryConfig::default(),
            checksum: ChecksumConfig::default(),
            transfer: TransferConfig::default(),
            connect_timeout_ms: 15_000,
            read_timeout_ms: 60_000,
            clock_skew_ms: 0,
            fault_injection_rate: None,
        }
    }
}

impl ClientConfig {
    /// A default configuration over the given sites.
    pub fn with_sites(sites: impl IntoIterator<Item = (String, Endpoint)>) -> Self {
        Self {
            sites: sites
                .into_iter()
                .map(|(name, endpoint)| SiteConfig { name, endpoint })
                .collect(),
            ..Self::default()
        }
    }

    pub fn from_json(json: &str) -> Result<Self, ClientError> {
        let config: Self = serde_json::from_str(json)
            .map_err(|e| ClientError::Config(format!("invalid config JSON: {e}")))?;
        config.validate()?;
        Ok(config)
    }

    pub fn load(path: &Path) -> Result<Self, ClientError> {
        let json = std::fs::read_to_string(path)
            .map_err(|e| ClientError::Config(format!("reading {}: {e}", path.display())))?;
        Self::from_json(&json)
    }

    pub fn validate(&self) -> Result<(), ClientError> {
        let fail = |msg: String| Err(ClientError::Config(msg));

        if self.sites.is_empty() {
            return fail("at least one site is required".into());
        }
        let mut names = HashSet::new();
        for site in &self.sites {
            if !names.insert(site.name.as_str()) {
                return fail(format!("duplicate site name {:?}", site.name));
            }
        }
        if self.retry.max_attempts == 0 {
            return fail("retry.max_attempts must be at least 1".into());
        }
        if !self.retry.backoff_factor.is_finite() || self.retry.backoff_factor < 1.0 {
            return fail("retry.backoff_factor must be a finite number >= 1".into());
        }
        if !(0.0..=1.0).contains(&self.retry.jitter) {
            return fail("retry.jitter must be within [0, 1]".into());
        }
        let t = &self.transfer;
        if t.min_part_size == 0 || t.part_size < t.min_part_size {
            return fail(format!(
                "transfer.part_size ({}) must be at least min_part_size ({})",
                t.part_size, t.min_part_size
            ));
        }
        if t.download_part_size == 0 {
            return fail("transfer.download_part_size must be positive".into());
        }
        if t.upload_concurrency == 0 || t.download_concurrency == 0 {
            return fail("transfer concurrency must be at least 1".into());
        }
        if let Some(rate) = self.fault_injection_rate
            && !(0.0..=1.0).contains(&rate)
        {
            return fail(format!("fault_injection_rate {rate} outside [0, 1]"));
        }
        Ok(())
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }

    pub fn read_timeout(&self) -> Duration {
        Duration::from_millis(self.read_timeout_ms)
    }

    pub fn clock_skew(&self) -> TimeDelta {
        TimeDelta::milliseconds(self.clock_skew_ms)
    }
}

/// Reads credentials from `GEOS3_ACCESS_KEY_ID`, `GEOS3_SECRET_ACCESS_KEY`
/// and the optional `GEOS3_SESSION_TOKEN`.
pub fn credential_from_env() -> Result<Credential, ClientError> {
    let var = |name: &str| std::env::var(name).ok().filter(|v| !v.is_empty());
    let (Some(access_key), Some(secret)) = (var(ENV_ACCESS_KEY_ID), var(ENV_SECRET_ACCESS_KEY))
    else {
        return Err(ClientError::Config(format!(
            "{ENV_ACCESS_KEY_ID} and {ENV_SECRET_ACCESS_KEY} must be set"
        )));
    };
    let credential = Credential::new(access_key, secret);
    Ok(match var(ENV_SESSION_TOKEN) {
        Some(token) => credential.with_session_token(token),
        None => credential,
    })
}
