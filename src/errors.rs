use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    #[error("Kube Error: {0}")]
    Kube(#[source] kube::Error),

    #[error("HTTP client error calling {context}: {source}")]
    Http {
        context: String,
        #[source]
        source: reqwest::Error,
    },

    #[error("GitLab rejected the configured private token (401 Unauthorized)")]
    Unauthorized,

    #[error("Name '{0}' could not be encoded into a Kubernetes-legal namespace name")]
    InvalidNamespaceName(String),

    #[error("Name '{0}' could not be encoded into a Kubernetes-legal label value")]
    InvalidLabelValue(String),

    #[error("InternalError: {0}")]
    Internal(String),
}

pub type Result<T, E = Error> = std::result::Result<T, E>;

impl Error {
    /// Misconfiguration errors (§7 taxonomy, class 1): a rejected private
    /// token means every subsequent reconcile pass will fail the same way,
    /// so the process should exit and let the orchestrator restart it with
    /// a chance to pick up corrected configuration, rather than retry
    /// forever on a three-hour loop.
    pub fn is_fatal(&self) -> bool {
        matches!(self, Error::Unauthorized)
    }
}
