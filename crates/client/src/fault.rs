use std::sync::atomic::{AtomicU64, Ordering};

use futures_util::future::BoxFuture;
use rand::Rng;
use tracing::warn;

use geos3_protocol::constants::{CONTENT_TYPE, X_AMZ_REQUEST_ID};
use geos3_protocol::{Response, SignedRequest, TransportError};

use crate::executor::Executor;
use crate::xml;

pub const DEFAULT_FAILURE_RATE: f64 = 0.25;
pub const FAULT_INJECTION_CODE: &str = "FaultInjection";

/// Wraps an executor and answers a random share of requests with a
/// `500 FaultInjection` error instead of forwarding them.
#[derive(Debug)]
pub struct FaultInjectingExecutor<E> {
    inner: E,
    failure_rate: f64,
    injected: AtomicU64,
}

impl<E> FaultInjectingExecutor<E> {
    pub fn new(inner: E) -> Self {
        Self::with_rate(inner, DEFAULT_FAILURE_RATE)
    }

    /// `rate` is clamped to `[0, 1]`.
    pub fn with_rate(inner: E, rate: f64) -> Self {
        let failure_rate = if rate.is_nan() { 0.0 } else { rate.clamp(0.0, 1.0) };
        Self {
            inner,
            failure_rate,
            injected: AtomicU64::new(0),
        }
    }

    pub fn failure_rate(&self) -> f64 {
        self.failure_rate
    }

    /// Number of faults injected so far.
    pub fn injected(&self) -> u64 {
        self.injected.load(Ordering::Relaxed)
    }

    pub fn inner(&self) -> &E {
        &self.inner
    }
}

impl<E: Executor> Executor for FaultInjectingExecutor<E> {
    fn execute(&self, request: SignedRequest) -> BoxFuture<'_, Result<Response, TransportError>> {
        if !rand::thread_rng().gen_bool(self.failure_rate) {
            return self.inner.execute(request);
        }
        let count = self.injected.fetch_add(1, Ordering::Relaxed) + 1;
        warn!(
            method = %request.request().method(),
            path = %request.request().path(),
            injected = count,
            "injecting fault"
        );
        let body = xml::error_document(FAULT_INJECTION_CODE, "Injecting fault", None);
        Box::pin(async move {
            Ok(Response::from_bytes(500, body)
                .with_header(CONTENT_TYPE, "application/xml")
                .with_header(X_AMZ_REQUEST_ID, format!("fault-{count}")))
        })
    }
}
