//! Request executors: the pluggable bottom of the pipeline.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use futures_util::future::BoxFuture;
use futures_util::{StreamExt, TryStreamExt};
use tracing::debug;

use geos3_protocol::constants::{CONTENT_LENGTH, HOST};
use geos3_protocol::{Method, Response, SignedRequest, TransportError};

use crate::ClientError;

/// Sends one signed request and returns the raw response.
///
/// Executors never interpret status codes; error mapping happens above
/// them in the pipeline.
pub trait Executor: Send + Sync {
    fn execute(&self, request: SignedRequest) -> BoxFuture<'_, Result<Response, TransportError>>;
}

impl<E: Executor + ?Sized> Executor for Arc<E> {
    fn execute(&self, request: SignedRequest) -> BoxFuture<'_, Result<Response, TransportError>> {
        (**self).execute(request)
    }
}

// ---------------------------------------------------------------------------
// HTTP executor
// ---------------------------------------------------------------------------

/// Executes requests over HTTP(S) with reqwest.
#[derive(Debug, Clone)]
pub struct ReqwestExecutor {
    client: reqwest::Client,
}

impl ReqwestExecutor {
    pub fn new(connect_timeout: Duration, read_timeout: Duration) -> Result<Self, ClientError> {
        let client = reqwest::Client::builder()
            .connect_timeout(connect_timeout)
            .read_timeout(read_timeout)
            .build()
            .map_err(|e| ClientError::Config(format!("building HTTP client: {e}")))?;
        Ok(Self { client })
    }

    pub fn from_client(client: reqwest::Client) -> Self {
        Self { client }
    }
}

fn http_method(method: Method) -> reqwest::Method {
    match method {
        Method::Get => reqwest::Method::GET,
        Method::Head => reqwest::Method::HEAD,
        Method::Put => reqwest::Method::PUT,
        Method::Post => reqwest::Method::POST,
        Method::Delete => reqwest::Method::DELETE,
    }
}

fn map_error(e: reqwest::Error) -> TransportError {
    if e.is_timeout() {
        TransportError::Timeout(e.to_string())
    } else if e.is_connect() {
        TransportError::Connect(e.to_string())
    } else if e.is_body() || e.is_decode() {
        TransportError::Body(e.to_string())
    } else if e.is_request() {
        TransportError::Reset(e.to_string())
    } else {
        TransportError::Other(e.to_string())
    }
}

impl Executor for ReqwestExecutor {
    fn execute(&self, signed: SignedRequest) -> BoxFuture<'_, Result<Response, TransportError>> {
        Box::pin(async move {
            let url = signed.url();
            let request = signed.into_request();
            let mut builder = self.client.request(http_method(request.method()), &url);
            for (name, value) in request.headers() {
                // reqwest derives both from the URL and body.
                if name == HOST || name == CONTENT_LENGTH {
                    continue;
                }
                builder = builder.header(name.as_str(), value.as_str());
            }
            if !request.body().is_empty() {
                builder = builder.body(request.body().clone());
            }

            debug!(method = %request.method(), url = %url, "sending request");
            let response = builder.send().await.map_err(map_error)?;

            let status = response.status().as_u16();
            let mut headers: BTreeMap<String, String> = BTreeMap::new();
            for (name, value) in response.headers() {
                let Ok(value) = value.to_str() else { continue };
                headers
                    .entry(name.as_str().to_string())
                    .and_modify(|existing| {
                        existing.push(',');
                        existing.push_str(value);
                    })
                    .or_insert_with(|| value.to_string());
            }
            let body = response.bytes_stream().map_err(map_error).boxed();
            Ok(Response::new(status, headers, body))
        })
    }
}
