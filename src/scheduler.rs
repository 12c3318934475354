//! Scheduler: drives the periodic reconcile pass, mirroring the upstream
//! integrator's 3-hour recurring sync timer. Immediate reconciles triggered
//! by the `/sync` endpoint are handled directly by the webhook module; they
//! race against this loop only through `Context::reconcile_lock`, which both
//! paths go through via `reconciler::reconcile`.

use crate::context::Context;
use lazy_static::lazy_static;
use std::sync::Arc;
use tokio::time::{self, Duration};
use tracing::{error, warn};

lazy_static! {
    static ref RECONCILE_INTERVAL: Duration = Duration::from_secs(3 * 60 * 60);
}

pub async fn run(ctx: Arc<Context>) {
    let mut ticker = time::interval(*RECONCILE_INTERVAL);
    // the first tick fires immediately; reconcile once at startup rather
    // than waiting a full interval before the cluster converges.
    loop {
        ticker.tick().await;
        if let Err(e) = crate::reconciler::reconcile(&ctx).await {
            if e.is_fatal() {
                error!(error = %e, "reconcile hit a fatal misconfiguration error, exiting so the orchestrator restarts this process");
                std::process::exit(1);
            }
            warn!(error = %e, "periodic reconcile failed");
        }
    }
}
