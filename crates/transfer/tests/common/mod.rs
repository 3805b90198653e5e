#![allow(dead_code)]

use std::sync::{Arc, Once};
use std::time::Duration;

use tokio::sync::mpsc;
use tracing_subscriber::EnvFilter;

use geos3_client::mock::MockS3;
use geos3_client::{ClientConfig, RetryConfig, S3Client};
use geos3_protocol::{Credential, Endpoint};
use geos3_transfer::TransferEvent;

pub const KIB: u64 = 1024;
pub const MIB: u64 = 1024 * KIB;

/// Deterministic, non-repeating-looking test payload.
pub fn payload(len: u64) -> Vec<u8> {
    (0..len)
        .map(|i| (i.wrapping_mul(2_654_435_761) >> 13) as u8)
        .collect()
}

/// One site, immediate retries, small parts.
pub fn config() -> ClientConfig {
    let endpoint: Endpoint = "http://site0.test:9020".parse().unwrap();
    let mut config = ClientConfig::with_sites([("site0".to_string(), endpoint)]);
    config.retry = RetryConfig::no_delay(4);
    config.unsigned_payload = true;
    config.transfer.part_size = 4 * KIB;
    config.transfer.min_part_size = 4 * KIB;
    config
}

/// Routes `tracing` output through the test harness; `RUST_LOG` selects levels.
pub fn init_logging() {
    static INIT: Once = Once::new();
    INIT.call_once(|| {
        let _ = tracing_subscriber::fmt()
            .with_env_filter(
                EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
            )
            .with_test_writer()
            .try_init();
    });
}

pub fn client(mock: &Arc<MockS3>, config: ClientConfig) -> S3Client {
    init_logging();
    S3Client::builder(config)
        .credential(Credential::new("AKIDEXAMPLE", "secret"))
        .executor(mock.clone())
        .build()
        .unwrap()
}

pub fn drain(events: &mut mpsc::Receiver<TransferEvent>) -> Vec<TransferEvent> {
    let mut out = Vec::new();
    while let Ok(event) = events.try_recv() {
        out.push(event);
    }
    out
}

/// Polls `check` until it holds, failing the test after a few seconds.
pub async fn wait_until(mut check: impl FnMut() -> bool) {
    for _ in 0..500 {
        if check() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("condition not reached");
}
