//! Wire-level types for talking to an S3-compatible store.
//!
//! Requests are immutable values built with `with_*` methods; the pipeline
//! stages in `geos3-client` derive new values instead of mutating shared
//! context. Responses carry their body as a stream so large payloads are
//! never buffered in full.

pub mod constants;
mod credential;
pub mod encoding;
mod endpoint;
mod error;
mod request;
mod response;

pub use credential::Credential;
pub use endpoint::{Endpoint, EndpointParseError, Scheme};
pub use error::TransportError;
pub use request::{Method, Request, SignedRequest};
pub use response::{BodyStream, Response};
