use std::sync::Arc;

use geos3_protocol::{Credential, Request};
use geos3_signer::{Clock, RequestSigner, sign_request};

use crate::ClientError;
use crate::pipeline::{Directives, Next, Stage, StageFuture};

/// Signs the routed request. Runs last so the signature covers every
/// header the earlier stages added.
pub struct SigningStage {
    signer: Arc<dyn RequestSigner>,
    credential: Arc<Credential>,
    clock: Arc<dyn Clock>,
}

impl SigningStage {
    pub fn new(
        signer: Arc<dyn RequestSigner>,
        credential: Arc<Credential>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            signer,
            credential,
            clock,
        }
    }
}

impl Stage for SigningStage {
    fn name(&self) -> &'static str {
        "signing"
    }

    fn handle<'a>(
        &'a self,
        request: &'a Request,
        directives: Directives,
        next: Next<'a>,
    ) -> StageFuture<'a> {
        Box::pin(async move {
            let endpoint = directives
                .endpoint()
                .cloned()
                .ok_or(ClientError::NoHealthyEndpoint)?;
            let signed = sign_request(
                self.signer.as_ref(),
                &directives.apply(request),
                &endpoint,
                &self.credential,
                self.clock.as_ref(),
            )?;
            next.run(
                request,
                Directives {
                    signed: Some(signed),
                    ..directives
                },
            )
            .await
        })
    }
}
