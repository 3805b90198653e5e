//! Geo-pinned S3 client.
//!
//! Requests flow through a [`Pipeline`] of stages (retry, routing,
//! checksum, signing) down to a pluggable [`Executor`]: reqwest for real
//! sites, [`mock::MockS3`] in tests, optionally wrapped in a
//! [`FaultInjectingExecutor`].

mod client;
pub mod config;
mod error;
mod executor;
mod fault;
mod health;
pub mod mock;
pub mod ops;
mod pipeline;
pub mod retry;
mod router;
pub mod stages;
pub mod xml;

pub use client::{S3Client, S3ClientBuilder};
pub use config::{ChecksumConfig, ClientConfig, SiteConfig, TransferConfig, credential_from_env};
pub use error::{ClientError, RemoteError};
pub use executor::{Executor, ReqwestExecutor};
pub use fault::{DEFAULT_FAILURE_RATE, FAULT_INJECTION_CODE, FaultInjectingExecutor};
pub use health::{Candidate, HealthView, SiteHealth};
pub use pipeline::{Directives, Next, Pipeline, PipelineBuilder, Stage, StageFuture};
pub use retry::{AttemptBudget, AttemptClass, RetryConfig, RetryDecision, RetryPolicy};
pub use router::{GeoPinningRouter, Route, RoutingMode, pin_index};
