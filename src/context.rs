//! Shared state handed to the webhook handlers, the scheduler, and the
//! reconciler: one instance built in `main` and passed around as an `Arc`.

use crate::cli::Config;
use crate::cluster::ClusterGateway;
use crate::custom_objects::ProtectedSet;
use crate::gitlab::GitlabClient;
use crate::graylog::GraylogClient;
use tokio::sync::Mutex;

pub struct Context {
    pub config: Config,
    pub gitlab: GitlabClient,
    pub cluster: Box<dyn ClusterGateway>,
    pub protected: ProtectedSet,
    pub graylog: Option<GraylogClient>,
    /// Serializes reconcile passes against each other. Webhook-driven
    /// single-entity updates intentionally do not take this lock: every
    /// mutation they perform is independently idempotent, so the only thing
    /// worth preventing is two full reconcile passes running concurrently.
    pub reconcile_lock: Mutex<()>,
}

impl Context {
    pub fn new(
        config: Config,
        gitlab: GitlabClient,
        cluster: Box<dyn ClusterGateway>,
        protected: ProtectedSet,
        graylog: Option<GraylogClient>,
    ) -> Self {
        Context {
            config,
            gitlab,
            cluster,
            protected,
            graylog,
            reconcile_lock: Mutex::new(()),
        }
    }
}
