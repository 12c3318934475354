use clap::builder::TypedValueParser;
use clap::Parser;
use std::path::PathBuf;
use tracing_subscriber::filter::LevelFilter;

/// Configuration for the controller, loaded from environment variables (with
/// matching CLI flags for local runs), mirroring the upstream GitLab
/// integrator's `os.Getenv`-driven configuration one-for-one.
#[derive(Parser, Debug, Clone)]
#[clap(author, version, about, long_about = None)]
pub struct Config {
    /// Log level
    #[arg(
        long,
        env = "LOG_LEVEL",
        default_value_t = LevelFilter::INFO,
        value_parser = clap::builder::PossibleValuesParser::new(["trace", "debug", "info", "warn", "error"])
            .map(|s| s.parse::<LevelFilter>().unwrap()),
    )]
    pub log_level: LevelFilter,

    /// Hostname of the GitLab instance to synchronize from
    #[arg(long, env = "GITLAB_HOSTNAME")]
    pub gitlab_hostname: String,

    /// GitLab REST API version to target
    #[arg(long, env = "GITLAB_API_VERSION", default_value = "v4")]
    pub gitlab_api_version: String,

    /// Private token used to authenticate against the GitLab API
    #[arg(long, env = "GITLAB_PRIVATE_TOKEN")]
    pub gitlab_private_token: String,

    /// Shared secret the GitLab system hook must present in `X-Gitlab-Token`.
    /// When unset, the token check is skipped entirely and any request
    /// asserting the `System Hook` event header is accepted.
    #[arg(long, env = "GITLAB_WEBHOOK_SECRET")]
    pub gitlab_webhook_secret: Option<String>,

    /// Directory scanned at startup for custom Role/RoleBinding/ClusterRole/
    /// ClusterRoleBinding/ServiceAccount manifests
    #[arg(long, env = "CUSTOM_ROLE_DIR", default_value = "/etc/custom-roles")]
    pub custom_role_dir: PathBuf,

    /// Enables the `POST /sync` endpoint that triggers an immediate reconcile
    #[arg(long, env = "ENABLE_SYNC_ENDPOINT", default_value_t = false)]
    pub enable_sync_endpoint: bool,

    /// Verbose per-event logging for the webhook translator
    #[arg(long, env = "DEBUG_HOOK", default_value_t = false)]
    pub debug_hook: bool,

    /// Verbose per-entity logging for the periodic reconcile
    #[arg(long, env = "DEBUG_SYNC", default_value_t = false)]
    pub debug_sync: bool,

    /// Key used to provision a per-namespace opaque storage secret. Unset
    /// disables the hook.
    #[arg(long, env = "CEPH_USER_KEY")]
    pub ceph_user_key: Option<String>,

    /// Name of an additional ClusterRole to bind a dedicated service account
    /// to in every newly created namespace. Unset disables the hook.
    #[arg(long, env = "POLICY_CLUSTER_ROLE")]
    pub policy_cluster_role: Option<String>,

    /// Name of the service account created for the policy cluster role hook
    #[arg(
        long,
        env = "INTEGRATION_SERVICE_ACCOUNT_NAME",
        default_value = "gitlab-integration"
    )]
    pub integration_service_account_name: String,

    /// Enables the default per-namespace LimitRange hook
    #[arg(long, env = "ENABLE_LIMITRANGES", default_value_t = false)]
    pub enable_limitranges: bool,

    #[arg(long, env = "DEFAULT_CPU_REQ", default_value_t = 20)]
    pub default_cpu_req: i64,

    #[arg(long, env = "DEFAULT_CPU_LIM", default_value_t = 150)]
    pub default_cpu_lim: i64,

    #[arg(long, env = "DEFAULT_MEM_REQ", default_value_t = 25)]
    pub default_mem_req: i64,

    #[arg(long, env = "DEFAULT_MEM_LIM", default_value_t = 120)]
    pub default_mem_lim: i64,

    /// External Kubernetes API URL advertised to GitLab's Kubernetes
    /// integration (`/services/kubernetes`)
    #[arg(long, env = "K8S_API_URL")]
    pub k8s_api_url: Option<String>,

    /// CA certificate (PEM) advertised alongside `k8s_api_url`
    #[arg(long, env = "K8S_CA_PEM")]
    pub k8s_ca_pem: Option<String>,

    /// Environment name registered via `POST /projects/:id/environments`
    #[arg(
        long,
        env = "INTEGRATION_ENVIRONMENT_NAME",
        default_value = "production"
    )]
    pub integration_environment_name: String,

    /// Base URL of an optional log-aggregation service (e.g. Graylog).
    /// Unset disables the whole integration.
    #[arg(long, env = "GRAYLOG_URL")]
    pub graylog_url: Option<String>,

    #[arg(long, env = "GRAYLOG_USERNAME")]
    pub graylog_username: Option<String>,

    #[arg(long, env = "GRAYLOG_PASSWORD")]
    pub graylog_password: Option<String>,

    /// Project/group name that is never reconciled as a namespace
    #[arg(long, env = "RESERVED_NAMESPACE", default_value = "kube-system")]
    pub reserved_namespace: String,

    #[arg(long, env = "PROJECT_MASTER_ROLENAME")]
    pub project_master_rolename: Option<String>,
    #[arg(long, env = "PROJECT_REPORTER_ROLENAME")]
    pub project_reporter_rolename: Option<String>,
    #[arg(long, env = "PROJECT_DEVELOPER_ROLENAME")]
    pub project_developer_rolename: Option<String>,
    #[arg(long, env = "PROJECT_DEFAULT_ROLENAME")]
    pub project_default_rolename: Option<String>,
    #[arg(long, env = "GROUP_MASTER_ROLENAME")]
    pub group_master_rolename: Option<String>,
    #[arg(long, env = "GROUP_REPORTER_ROLENAME")]
    pub group_reporter_rolename: Option<String>,
    #[arg(long, env = "GROUP_DEVELOPER_ROLENAME")]
    pub group_developer_rolename: Option<String>,
    #[arg(long, env = "GROUP_DEFAULT_ROLENAME")]
    pub group_default_rolename: Option<String>,
}

impl Config {
    pub fn graylog_enabled(&self) -> bool {
        self.graylog_url.is_some()
    }

    /// Builds a `Config` with sensible values for unit tests, bypassing
    /// `clap::Parser::parse` (which reads `std::env::args`).
    #[cfg(test)]
    pub fn for_tests() -> Self {
        Config {
            log_level: LevelFilter::INFO,
            gitlab_hostname: "gitlab.example.com".to_string(),
            gitlab_api_version: "v4".to_string(),
            gitlab_private_token: "test-token".to_string(),
            gitlab_webhook_secret: None,
            custom_role_dir: PathBuf::from("/etc/custom-roles"),
            enable_sync_endpoint: false,
            debug_hook: false,
            debug_sync: false,
            ceph_user_key: None,
            policy_cluster_role: None,
            integration_service_account_name: "gitlab-integration".to_string(),
            enable_limitranges: false,
            default_cpu_req: 20,
            default_cpu_lim: 150,
            default_mem_req: 25,
            default_mem_lim: 120,
            k8s_api_url: None,
            k8s_ca_pem: None,
            integration_environment_name: "production".to_string(),
            graylog_url: None,
            graylog_username: None,
            graylog_password: None,
            reserved_namespace: "kube-system".to_string(),
            project_master_rolename: None,
            project_reporter_rolename: None,
            project_developer_rolename: None,
            project_default_rolename: None,
            group_master_rolename: None,
            group_reporter_rolename: None,
            group_developer_rolename: None,
            group_default_rolename: None,
        }
    }
}
