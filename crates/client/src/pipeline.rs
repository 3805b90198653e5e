//! Composable request pipeline.
//!
//! A pipeline is an ordered list of [`Stage`]s over an [`Executor`]. Each
//! stage sees the caller's request immutably plus the [`Directives`]
//! accumulated by the stages before it, and decides whether and how to
//! call the rest of the chain through [`Next`].

use std::collections::BTreeMap;
use std::sync::Arc;

use chrono::Utc;
use futures_util::future::BoxFuture;

use geos3_protocol::{Endpoint, Request, Response, SignedRequest};

use crate::ClientError;
use crate::executor::Executor;
use crate::router::Route;

pub type StageFuture<'a> = BoxFuture<'a, Result<Response, ClientError>>;

/// State accumulated on the way down the chain for one attempt.
#[derive(Debug, Clone, Default)]
pub struct Directives {
    /// 1-based attempt number, set by the retry stage.
    pub attempt: u32,
    pub route: Option<Route>,
    /// Headers to add before signing.
    pub headers: BTreeMap<String, String>,
    pub signed: Option<SignedRequest>,
}

impl Directives {
    pub fn with_header(mut self, name: &str, value: impl Into<String>) -> Self {
        self.headers.insert(name.to_ascii_lowercase(), value.into());
        self
    }

    pub fn endpoint(&self) -> Option<&Endpoint> {
        self.route.as_ref().map(|r| &r.endpoint)
    }

    /// The caller's request with the accumulated headers applied.
    pub fn apply(&self, request: &Request) -> Request {
        self.headers
            .iter()
            .fold(request.clone(), |req, (name, value)| req.with_header(name, value.clone()))
    }
}

pub trait Stage: Send + Sync {
    fn name(&self) -> &'static str;

    /// Whether this stage repeats the downstream chain on failure.
    /// Such stages are left out of single-attempt sends.
    fn retries(&self) -> bool {
        false
    }

    fn handle<'a>(
        &'a self,
        request: &'a Request,
        directives: Directives,
        next: Next<'a>,
    ) -> StageFuture<'a>;
}

/// The remainder of the chain after the current stage.
#[derive(Clone, Copy)]
pub struct Next<'a> {
    stages: &'a [Arc<dyn Stage>],
    executor: &'a dyn Executor,
}

impl<'a> Next<'a> {
    pub fn run(self, request: &'a Request, directives: Directives) -> StageFuture<'a> {
        match self.stages.split_first() {
            Some((stage, rest)) => stage.handle(
                request,
                directives,
                Next {
                    stages: rest,
                    executor: self.executor,
                },
            ),
            None => Box::pin(execute(self.executor, request, directives)),
        }
    }
}

/// Terminal step: sends the signed request (or the bare request when no
/// signing stage ran) and maps error statuses.
async fn execute(
    executor: &dyn Executor,
    request: &Request,
    mut directives: Directives,
) -> Result<Response, ClientError> {
    let signed = match directives.signed.take() {
        Some(signed) => signed,
        None => {
            let endpoint = directives
                .endpoint()
                .cloned()
                .ok_or(ClientError::NoHealthyEndpoint)?;
            SignedRequest::new(
                directives.apply(request),
                endpoint,
                Utc::now(),
                std::time::Duration::ZERO,
            )
        }
    };

    let response = executor.execute(signed).await?;
    if response.is_success() {
        return Ok(response);
    }
    let status = response.status();
    let headers = response.headers().clone();
    let body = response.collect().await.unwrap_or_default();
    Err(ClientError::from_status(status, &headers, &body))
}

// ---------------------------------------------------------------------------
// Pipeline
// ---------------------------------------------------------------------------

pub struct Pipeline {
    stages: Vec<Arc<dyn Stage>>,
    single_attempt: Vec<Arc<dyn Stage>>,
    executor: Arc<dyn Executor>,
}

impl Pipeline {
    pub fn builder(executor: Arc<dyn Executor>) -> PipelineBuilder {
        PipelineBuilder {
            stages: Vec::new(),
            executor,
        }
    }

    /// Sends through every stage, retries included.
    pub async fn send(&self, request: &Request) -> Result<Response, ClientError> {
        self.chain(&self.stages).run(request, Directives::default()).await
    }

    /// Sends exactly once; the caller owns the retry loop.
    pub async fn send_once(&self, request: &Request) -> Result<Response, ClientError> {
        let directives = Directives {
            attempt: 1,
            ..Directives::default()
        };
        self.chain(&self.single_attempt).run(request, directives).await
    }

    pub fn stage_names(&self) -> Vec<&'static str> {
        self.stages.iter().map(|s| s.name()).collect()
    }

    pub fn executor(&self) -> &Arc<dyn Executor> {
        &self.executor
    }

    fn chain<'a>(&'a self, stages: &'a [Arc<dyn Stage>]) -> Next<'a> {
        Next {
            stages,
            executor: self.executor.as_ref(),
        }
    }
}

pub struct PipelineBuilder {
    stages: Vec<Arc<dyn Stage>>,
    executor: Arc<dyn Executor>,
}

impl PipelineBuilder {
    pub fn stage(mut self, stage: impl Stage + 'static) -> Self {
        self.stages.push(Arc::new(stage));
        self
    }

    pub fn shared_stage(mut self, stage: Arc<dyn Stage>) -> Self {
        self.stages.push(stage);
        self
    }

    pub fn build(self) -> Pipeline {
        let single_attempt = self
            .stages
            .iter()
            .filter(|s| !s.retries())
            .cloned()
            .collect();
        Pipeline {
            stages: self.stages,
            single_attempt,
            executor: self.executor,
        }
    }
}
