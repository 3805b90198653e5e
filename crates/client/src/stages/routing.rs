use std::sync::Arc;

use tracing::debug;

use geos3_protocol::Request;

use crate::health::HealthView;
use crate::pipeline::{Directives, Next, Stage, StageFuture};
use crate::router::GeoPinningRouter;

/// Chooses the site for each attempt from the current health snapshot.
pub struct RoutingStage {
    router: GeoPinningRouter,
    health: Arc<dyn HealthView>,
}

impl RoutingStage {
    pub fn new(router: GeoPinningRouter, health: Arc<dyn HealthView>) -> Self {
        Self { router, health }
    }
}

impl Stage for RoutingStage {
    fn name(&self) -> &'static str {
        "routing"
    }

    fn handle<'a>(
        &'a self,
        request: &'a Request,
        directives: Directives,
        next: Next<'a>,
    ) -> StageFuture<'a> {
        Box::pin(async move {
            let candidates = self.health.candidates();
            let route = self.router.route(request.geo_id(), &candidates)?;
            if route.is_fallback() {
                debug!(
                    geo_id = request.geo_id().unwrap_or_default(),
                    primary = %candidates[route.primary].name,
                    site = %route.site,
                    "primary site unavailable, using fallback"
                );
            }
            next.run(
                request,
                Directives {
                    route: Some(route),
                    ..directives
                },
            )
            .await
        })
    }
}
