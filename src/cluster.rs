//! Cluster Gateway: thin CRUD/list operations against the Kubernetes API,
//! plus the namespace-creation collision policy from the design (§4.D).
//!
//! The real implementation talks to the cluster through `kube`; the
//! reconciler only ever depends on the [`ClusterGateway`] trait, which is
//! what makes the reconcile algorithm testable without a live cluster.

use crate::codec;
use crate::custom_objects::CustomObject;
use crate::errors::{Error, Result};
use async_trait::async_trait;
use k8s_openapi::api::core::v1::{
    LimitRange, LimitRangeItem, LimitRangeSpec, Secret, ServiceAccount,
};
use k8s_openapi::api::rbac::v1::{ClusterRole, ClusterRoleBinding, Role, RoleBinding, RoleRef, Subject};
use k8s_openapi::apimachinery::pkg::api::resource::Quantity;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use k8s_openapi::ByteString;
use kube::api::{Api, DeleteParams, ListParams, Patch, PatchParams, PostParams};
use kube::{Client, ResourceExt};
use std::collections::{BTreeMap, HashSet};
use tokio::time::{sleep, Duration, Instant};
use tracing::{debug, info, warn};

pub const ORIGIN_LABEL: &str = "gitlab-origin";
pub const IGNORED_LABEL: &str = "gitlab-ignored";

const SERVICE_ACCOUNT_TOKEN_TIMEOUT: Duration = Duration::from_secs(30);
const SERVICE_ACCOUNT_TOKEN_POLL_INTERVAL: Duration = Duration::from_millis(500);

/// A namespace observed in the cluster that carries the origin label,
/// together with whatever the reconciler needs to know about it.
#[derive(Debug, Clone)]
pub struct ObservedNamespace {
    pub name: String,
    pub origin_label: String,
    pub ignored: bool,
}

#[derive(Debug, Clone, Copy)]
pub struct LimitRangeDefaults {
    pub cpu_request: i64,
    pub cpu_limit: i64,
    pub mem_request: i64,
    pub mem_limit: i64,
}

#[async_trait]
pub trait ClusterGateway: Send + Sync {
    /// All namespaces carrying `gitlab-origin`, regardless of the ignored
    /// label (the reconciler itself decides what "owned" means).
    async fn list_namespaces_with_origin_label(&self) -> Result<Vec<ObservedNamespace>>;

    /// Looks up the (at most one, by invariant #1) namespace whose
    /// `gitlab-origin` label decodes to `gitlab_path`.
    async fn find_namespace_by_origin(
        &self,
        gitlab_path: &str,
    ) -> Result<Option<ObservedNamespace>>;

    /// Creates a namespace for `gitlab_path`, applying the collision policy
    /// from §4.D. Returns the actual namespace name (which may differ from
    /// the naive encoding if suffixing or adoption happened).
    async fn create_namespace(&self, gitlab_path: &str) -> Result<String>;

    async fn delete_namespace(&self, namespace: &str) -> Result<()>;

    async fn list_role_binding_names(&self, namespace: &str) -> Result<HashSet<String>>;

    async fn create_role_binding(
        &self,
        namespace: &str,
        binding_name: &str,
        username: &str,
        cluster_role: &str,
    ) -> Result<()>;

    async fn delete_role_binding(&self, namespace: &str, binding_name: &str) -> Result<()>;

    async fn create_storage_secret(&self, namespace: &str, user_key: &str) -> Result<()>;

    async fn create_limit_range(&self, namespace: &str, defaults: LimitRangeDefaults) -> Result<()>;

    /// Creates a service account, binds it to `cluster_role`, and waits
    /// (bounded, §5) for its token secret to become available, returning the
    /// token.
    async fn provision_policy_service_account(
        &self,
        namespace: &str,
        sa_name: &str,
        cluster_role: &str,
    ) -> Result<String>;

    /// Creates `sa_name` in `namespace` if absent (no role binding attached)
    /// and waits for its token secret, returning the token. Used for the
    /// GitLab Kubernetes-service integration, which authenticates with a
    /// bare service account token rather than a bound role.
    async fn service_account_token(&self, namespace: &str, sa_name: &str) -> Result<String>;

    /// Applies an operator-supplied custom manifest (Role/RoleBinding/
    /// ClusterRole/ClusterRoleBinding/ServiceAccount) loaded at startup.
    /// "Already exists" is success, as with every other create here.
    async fn apply_custom_object(&self, object: &CustomObject) -> Result<()>;
}

pub struct KubeGateway {
    client: Client,
}

impl KubeGateway {
    pub fn new(client: Client) -> Self {
        KubeGateway { client }
    }

    fn namespaces_api(&self) -> Api<k8s_openapi::api::core::v1::Namespace> {
        Api::all(self.client.clone())
    }

    fn role_bindings_api(&self, namespace: &str) -> Api<RoleBinding> {
        Api::namespaced(self.client.clone(), namespace)
    }

    fn service_accounts_api(&self, namespace: &str) -> Api<ServiceAccount> {
        Api::namespaced(self.client.clone(), namespace)
    }

    fn secrets_api(&self, namespace: &str) -> Api<Secret> {
        Api::namespaced(self.client.clone(), namespace)
    }

    fn limit_ranges_api(&self, namespace: &str) -> Api<LimitRange> {
        Api::namespaced(self.client.clone(), namespace)
    }

    async fn get_namespace(
        &self,
        name: &str,
    ) -> Result<Option<k8s_openapi::api::core::v1::Namespace>> {
        match self.namespaces_api().get(name).await {
            Ok(ns) => Ok(Some(ns)),
            Err(kube::Error::Api(e)) if e.code == 404 => Ok(None),
            Err(e) => Err(Error::Kube(e)),
        }
    }

    fn to_observed(ns: &k8s_openapi::api::core::v1::Namespace) -> Option<ObservedNamespace> {
        let origin_label = ns.labels().get(ORIGIN_LABEL)?.clone();
        let ignored = ns
            .labels()
            .get(IGNORED_LABEL)
            .map(|v| !v.is_empty())
            .unwrap_or(false);
        Some(ObservedNamespace {
            name: ns.name_any(),
            origin_label,
            ignored,
        })
    }

    async fn try_create_namespace(
        &self,
        name: &str,
        origin_label: &str,
    ) -> std::result::Result<(), kube::Error> {
        let mut labels = BTreeMap::new();
        labels.insert(ORIGIN_LABEL.to_string(), origin_label.to_string());
        let ns = k8s_openapi::api::core::v1::Namespace {
            metadata: ObjectMeta {
                name: Some(name.to_string()),
                labels: Some(labels),
                ..Default::default()
            },
            ..Default::default()
        };
        self.namespaces_api()
            .create(&PostParams::default(), &ns)
            .await
            .map(|_| ())
    }
}

/// Backend seam for the namespace-creation collision policy (§4.D): the
/// three cluster operations the policy needs, kept separate from
/// [`resolve_namespace_creation`] so the decision logic itself — adopt vs.
/// suffix — can be driven by a fake in tests instead of a live cluster.
#[async_trait]
trait NamespaceCreateBackend: Send + Sync {
    /// `Ok(true)` if `name` was created with `origin_label`, `Ok(false)` if a
    /// namespace by that name already exists.
    async fn try_create(&self, name: &str, origin_label: &str) -> Result<bool>;

    /// Whether the already-existing namespace `name` carries the ignored label.
    async fn is_ignored(&self, name: &str) -> Result<bool>;

    /// Stamps `origin_label` onto the already-existing, non-ignored namespace `name`.
    async fn adopt(&self, name: &str, origin_label: &str) -> Result<()>;
}

#[async_trait]
impl NamespaceCreateBackend for KubeGateway {
    async fn try_create(&self, name: &str, origin_label: &str) -> Result<bool> {
        match self.try_create_namespace(name, origin_label).await {
            Ok(()) => Ok(true),
            Err(kube::Error::Api(e)) if e.code == 409 => Ok(false),
            Err(e) => Err(Error::Kube(e)),
        }
    }

    async fn is_ignored(&self, name: &str) -> Result<bool> {
        let existing = self.get_namespace(name).await?.ok_or_else(|| {
            Error::Internal(format!(
                "namespace {name} reported as already existing but could not be fetched"
            ))
        })?;
        Ok(existing
            .labels()
            .get(IGNORED_LABEL)
            .map(|v| !v.is_empty())
            .unwrap_or(false))
    }

    async fn adopt(&self, name: &str, origin_label: &str) -> Result<()> {
        let patch = serde_json::json!({
            "metadata": { "labels": { ORIGIN_LABEL: origin_label } }
        });
        self.namespaces_api()
            .patch(
                name,
                &PatchParams::apply("gitlab-k8s-integrator"),
                &Patch::Merge(patch),
            )
            .await
            .map_err(Error::Kube)?;
        Ok(())
    }
}

/// The collision policy itself (§4.D): try the naive name; if taken by a
/// namespace that isn't marked ignored, adopt it in place; if taken by one
/// that is, keep suffixing (`-1`, `-2`, ...) until a free name is found.
async fn resolve_namespace_creation(
    backend: &impl NamespaceCreateBackend,
    gitlab_path: &str,
) -> Result<String> {
    let base_name = codec::encode_namespace_name(gitlab_path)?;
    let origin_label = codec::encode_label_value(gitlab_path)?;

    if backend.try_create(&base_name, &origin_label).await? {
        info!(namespace = base_name, gitlab_path, "created namespace");
        return Ok(base_name);
    }

    if !backend.is_ignored(&base_name).await? {
        backend.adopt(&base_name, &origin_label).await?;
        info!(
            namespace = base_name,
            gitlab_path, "adopted pre-existing namespace"
        );
        return Ok(base_name);
    }

    let mut suffix = 0;
    loop {
        suffix += 1;
        let candidate = format!("{base_name}-{suffix}");
        if backend.try_create(&candidate, &origin_label).await? {
            info!(
                namespace = candidate,
                gitlab_path, "created suffixed namespace after collision with ignored namespace"
            );
            return Ok(candidate);
        }
    }
}

#[async_trait]
impl ClusterGateway for KubeGateway {
    async fn list_namespaces_with_origin_label(&self) -> Result<Vec<ObservedNamespace>> {
        let lp = ListParams::default().labels(ORIGIN_LABEL);
        let list = self
            .namespaces_api()
            .list(&lp)
            .await
            .map_err(Error::Kube)?;
        Ok(list.items.iter().filter_map(Self::to_observed).collect())
    }

    async fn find_namespace_by_origin(
        &self,
        gitlab_path: &str,
    ) -> Result<Option<ObservedNamespace>> {
        let label_value = codec::encode_label_value(gitlab_path)?;
        let lp = ListParams::default().labels(&format!("{ORIGIN_LABEL}={label_value}"));
        let list = self
            .namespaces_api()
            .list(&lp)
            .await
            .map_err(Error::Kube)?;

        let mut observed: Vec<ObservedNamespace> =
            list.items.iter().filter_map(Self::to_observed).collect();
        if observed.len() > 1 {
            observed.sort_by(|a, b| a.name.cmp(&b.name));
            warn!(
                origin = label_value,
                count = observed.len(),
                "multiple namespaces share the same gitlab-origin label; using the first lexicographically"
            );
        }
        Ok(observed.into_iter().next())
    }

    async fn create_namespace(&self, gitlab_path: &str) -> Result<String> {
        resolve_namespace_creation(self, gitlab_path).await
    }

    async fn delete_namespace(&self, namespace: &str) -> Result<()> {
        match self
            .namespaces_api()
            .delete(namespace, &DeleteParams::default())
            .await
        {
            Ok(_) => Ok(()),
            Err(kube::Error::Api(e)) if e.code == 404 => Ok(()),
            Err(e) => Err(Error::Kube(e)),
        }
    }

    async fn list_role_binding_names(&self, namespace: &str) -> Result<HashSet<String>> {
        let list = self
            .role_bindings_api(namespace)
            .list(&ListParams::default())
            .await
            .map_err(Error::Kube)?;
        Ok(list.items.iter().map(|rb| rb.name_any()).collect())
    }

    async fn create_role_binding(
        &self,
        namespace: &str,
        binding_name: &str,
        username: &str,
        cluster_role: &str,
    ) -> Result<()> {
        let rb = RoleBinding {
            metadata: ObjectMeta {
                name: Some(binding_name.to_string()),
                namespace: Some(namespace.to_string()),
                ..Default::default()
            },
            subjects: Some(vec![Subject {
                kind: "User".to_string(),
                name: username.to_string(),
                api_group: Some("rbac.authorization.k8s.io".to_string()),
                ..Default::default()
            }]),
            role_ref: RoleRef {
                kind: "ClusterRole".to_string(),
                name: cluster_role.to_string(),
                api_group: "rbac.authorization.k8s.io".to_string(),
            },
        };

        match self
            .role_bindings_api(namespace)
            .create(&PostParams::default(), &rb)
            .await
        {
            Ok(_) => {
                debug!(namespace, binding_name, "created role binding");
                Ok(())
            }
            Err(kube::Error::Api(e)) if e.code == 409 => Ok(()),
            Err(e) => Err(Error::Kube(e)),
        }
    }

    async fn delete_role_binding(&self, namespace: &str, binding_name: &str) -> Result<()> {
        match self
            .role_bindings_api(namespace)
            .delete(binding_name, &DeleteParams::default())
            .await
        {
            Ok(_) => Ok(()),
            Err(kube::Error::Api(e)) if e.code == 404 => Ok(()),
            Err(e) => Err(Error::Kube(e)),
        }
    }

    async fn create_storage_secret(&self, namespace: &str, user_key: &str) -> Result<()> {
        let mut data = BTreeMap::new();
        data.insert(
            "key".to_string(),
            ByteString(user_key.as_bytes().to_vec()),
        );
        let secret = Secret {
            metadata: ObjectMeta {
                name: Some("ceph-secret-user".to_string()),
                namespace: Some(namespace.to_string()),
                ..Default::default()
            },
            data: Some(data),
            type_: Some("kubernetes.io/rbd".to_string()),
            ..Default::default()
        };

        match self
            .secrets_api(namespace)
            .create(&PostParams::default(), &secret)
            .await
        {
            Ok(_) => Ok(()),
            Err(kube::Error::Api(e)) if e.code == 409 => Ok(()),
            Err(e) => Err(Error::Kube(e)),
        }
    }

    async fn create_limit_range(&self, namespace: &str, defaults: LimitRangeDefaults) -> Result<()> {
        let mut default_request = BTreeMap::new();
        default_request.insert(
            "cpu".to_string(),
            Quantity(defaults.cpu_request.to_string()),
        );
        default_request.insert(
            "memory".to_string(),
            Quantity(format!("{}Mi", defaults.mem_request)),
        );
        let mut default_limit = BTreeMap::new();
        default_limit.insert("cpu".to_string(), Quantity(defaults.cpu_limit.to_string()));
        default_limit.insert(
            "memory".to_string(),
            Quantity(format!("{}Mi", defaults.mem_limit)),
        );

        let lr = LimitRange {
            metadata: ObjectMeta {
                name: Some("gitlab-default-limits".to_string()),
                namespace: Some(namespace.to_string()),
                ..Default::default()
            },
            spec: Some(LimitRangeSpec {
                limits: vec![LimitRangeItem {
                    type_: "Container".to_string(),
                    default_request: Some(default_request),
                    default: Some(default_limit),
                    ..Default::default()
                }],
            }),
        };

        match self
            .limit_ranges_api(namespace)
            .create(&PostParams::default(), &lr)
            .await
        {
            Ok(_) => Ok(()),
            Err(kube::Error::Api(e)) if e.code == 409 => Ok(()),
            Err(e) => Err(Error::Kube(e)),
        }
    }

    async fn provision_policy_service_account(
        &self,
        namespace: &str,
        sa_name: &str,
        cluster_role: &str,
    ) -> Result<String> {
        let sa = ServiceAccount {
            metadata: ObjectMeta {
                name: Some(sa_name.to_string()),
                namespace: Some(namespace.to_string()),
                ..Default::default()
            },
            ..Default::default()
        };
        let created = match self
            .service_accounts_api(namespace)
            .create(&PostParams::default(), &sa)
            .await
        {
            Ok(created) => created,
            Err(kube::Error::Api(e)) if e.code == 409 => self
                .service_accounts_api(namespace)
                .get(sa_name)
                .await
                .map_err(Error::Kube)?,
            Err(e) => return Err(Error::Kube(e)),
        };

        let binding_name = format!("{sa_name}-{cluster_role}-{namespace}");
        let rb = RoleBinding {
            metadata: ObjectMeta {
                name: Some(binding_name.clone()),
                namespace: Some(namespace.to_string()),
                ..Default::default()
            },
            subjects: Some(vec![Subject {
                kind: "ServiceAccount".to_string(),
                name: sa_name.to_string(),
                namespace: Some(namespace.to_string()),
                ..Default::default()
            }]),
            role_ref: RoleRef {
                kind: "ClusterRole".to_string(),
                name: cluster_role.to_string(),
                api_group: "rbac.authorization.k8s.io".to_string(),
            },
        };
        match self
            .role_bindings_api(namespace)
            .create(&PostParams::default(), &rb)
            .await
        {
            Ok(_) => {}
            Err(kube::Error::Api(e)) if e.code == 409 => {}
            Err(e) => return Err(Error::Kube(e)),
        }

        self.wait_for_service_account_token(namespace, &created)
            .await
    }

    async fn service_account_token(&self, namespace: &str, sa_name: &str) -> Result<String> {
        let sa = ServiceAccount {
            metadata: ObjectMeta {
                name: Some(sa_name.to_string()),
                namespace: Some(namespace.to_string()),
                ..Default::default()
            },
            ..Default::default()
        };
        let created = match self
            .service_accounts_api(namespace)
            .create(&PostParams::default(), &sa)
            .await
        {
            Ok(created) => created,
            Err(kube::Error::Api(e)) if e.code == 409 => self
                .service_accounts_api(namespace)
                .get(sa_name)
                .await
                .map_err(Error::Kube)?,
            Err(e) => return Err(Error::Kube(e)),
        };
        self.wait_for_service_account_token(namespace, &created)
            .await
    }

    async fn apply_custom_object(&self, object: &CustomObject) -> Result<()> {
        let decode_error = |e: serde_json::Error| {
            Error::Internal(format!(
                "decoding custom {} object {}: {e}",
                object.type_meta.kind, object.name
            ))
        };
        let value = serde_json::to_value(&object.raw)
            .map_err(|e| Error::Internal(format!("re-serializing custom object {}: {e}", object.name)))?;

        match object.type_meta.kind.as_str() {
            "Role" => {
                let namespace = self.custom_object_namespace(object)?;
                let role: Role = serde_json::from_value(value).map_err(decode_error)?;
                match Api::<Role>::namespaced(self.client.clone(), namespace)
                    .create(&PostParams::default(), &role)
                    .await
                {
                    Ok(_) => Ok(()),
                    Err(kube::Error::Api(e)) if e.code == 409 => Ok(()),
                    Err(e) => Err(Error::Kube(e)),
                }
            }
            "RoleBinding" => {
                let namespace = self.custom_object_namespace(object)?;
                let rb: RoleBinding = serde_json::from_value(value).map_err(decode_error)?;
                match Api::<RoleBinding>::namespaced(self.client.clone(), namespace)
                    .create(&PostParams::default(), &rb)
                    .await
                {
                    Ok(_) => Ok(()),
                    Err(kube::Error::Api(e)) if e.code == 409 => Ok(()),
                    Err(e) => Err(Error::Kube(e)),
                }
            }
            "ClusterRole" => {
                let cr: ClusterRole = serde_json::from_value(value).map_err(decode_error)?;
                match Api::<ClusterRole>::all(self.client.clone())
                    .create(&PostParams::default(), &cr)
                    .await
                {
                    Ok(_) => Ok(()),
                    Err(kube::Error::Api(e)) if e.code == 409 => Ok(()),
                    Err(e) => Err(Error::Kube(e)),
                }
            }
            "ClusterRoleBinding" => {
                let crb: ClusterRoleBinding = serde_json::from_value(value).map_err(decode_error)?;
                match Api::<ClusterRoleBinding>::all(self.client.clone())
                    .create(&PostParams::default(), &crb)
                    .await
                {
                    Ok(_) => Ok(()),
                    Err(kube::Error::Api(e)) if e.code == 409 => Ok(()),
                    Err(e) => Err(Error::Kube(e)),
                }
            }
            "ServiceAccount" => {
                let namespace = self.custom_object_namespace(object)?;
                let sa: ServiceAccount = serde_json::from_value(value).map_err(decode_error)?;
                match Api::<ServiceAccount>::namespaced(self.client.clone(), namespace)
                    .create(&PostParams::default(), &sa)
                    .await
                {
                    Ok(_) => Ok(()),
                    Err(kube::Error::Api(e)) if e.code == 409 => Ok(()),
                    Err(e) => Err(Error::Kube(e)),
                }
            }
            other => Err(Error::Internal(format!(
                "apply_custom_object called with unrecognized kind {other}"
            ))),
        }
    }
}

impl KubeGateway {
    fn custom_object_namespace<'a>(&self, object: &'a CustomObject) -> Result<&'a str> {
        object.namespace.as_deref().ok_or_else(|| {
            Error::Internal(format!(
                "custom {} object {} has no metadata.namespace",
                object.type_meta.kind, object.name
            ))
        })
    }

    async fn wait_for_service_account_token(
        &self,
        namespace: &str,
        sa: &ServiceAccount,
    ) -> Result<String> {
        let sa_name = sa.name_any();
        let deadline = Instant::now() + SERVICE_ACCOUNT_TOKEN_TIMEOUT;
        loop {
            let current = self
                .service_accounts_api(namespace)
                .get(&sa_name)
                .await
                .map_err(Error::Kube)?;

            if let Some(secret_ref) = current.secrets.as_ref().and_then(|s| s.first()) {
                if let Some(secret_name) = &secret_ref.name {
                    if let Ok(secret) = self.secrets_api(namespace).get(secret_name).await {
                        if let Some(token) = secret.data.as_ref().and_then(|d| d.get("token")) {
                            return Ok(String::from_utf8_lossy(&token.0).to_string());
                        }
                    }
                }
            }

            if Instant::now() >= deadline {
                return Err(Error::Internal(format!(
                    "service account {sa_name} in {namespace} did not receive a token secret within {:?}",
                    SERVICE_ACCOUNT_TOKEN_TIMEOUT
                )));
            }
            sleep(SERVICE_ACCOUNT_TOKEN_POLL_INTERVAL).await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::sync::Mutex;

    /// In-memory stand-in for [`NamespaceCreateBackend`] that can be seeded
    /// with a pre-existing namespace and its ignored flag, so the collision
    /// policy can be driven without a live cluster.
    #[derive(Default)]
    struct FakeBackend {
        namespaces: Mutex<HashMap<String, bool>>,
        adoptions: Mutex<Vec<(String, String)>>,
    }

    impl FakeBackend {
        fn seeded(name: &str, ignored: bool) -> Self {
            let mut namespaces = HashMap::new();
            namespaces.insert(name.to_string(), ignored);
            FakeBackend {
                namespaces: Mutex::new(namespaces),
                adoptions: Mutex::new(Vec::new()),
            }
        }
    }

    #[async_trait]
    impl NamespaceCreateBackend for FakeBackend {
        async fn try_create(&self, name: &str, _origin_label: &str) -> Result<bool> {
            let mut namespaces = self.namespaces.lock().unwrap();
            if namespaces.contains_key(name) {
                Ok(false)
            } else {
                namespaces.insert(name.to_string(), false);
                Ok(true)
            }
        }

        async fn is_ignored(&self, name: &str) -> Result<bool> {
            Ok(*self.namespaces.lock().unwrap().get(name).unwrap_or(&false))
        }

        async fn adopt(&self, name: &str, origin_label: &str) -> Result<()> {
            self.adoptions
                .lock()
                .unwrap()
                .push((name.to_string(), origin_label.to_string()));
            Ok(())
        }
    }

    #[tokio::test]
    async fn no_collision_creates_the_naive_name() {
        let backend = FakeBackend::default();
        let name = resolve_namespace_creation(&backend, "foo").await.unwrap();
        assert_eq!(name, "foo");
        assert!(backend.adoptions.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn collision_with_a_non_ignored_namespace_adopts_it_in_place() {
        let backend = FakeBackend::seeded("foo", false);
        let name = resolve_namespace_creation(&backend, "foo").await.unwrap();
        assert_eq!(name, "foo");
        let adoptions = backend.adoptions.lock().unwrap();
        assert_eq!(adoptions.as_slice(), [("foo".to_string(), "foo".to_string())]);
    }

    #[tokio::test]
    async fn collision_with_an_ignored_namespace_produces_a_suffixed_name() {
        let backend = FakeBackend::seeded("foo", true);
        let name = resolve_namespace_creation(&backend, "foo").await.unwrap();
        assert_eq!(name, "foo-1");
        assert!(backend.adoptions.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn suffix_keeps_climbing_past_an_occupied_first_candidate() {
        let backend = FakeBackend::seeded("foo", true);
        backend
            .namespaces
            .lock()
            .unwrap()
            .insert("foo-1".to_string(), true);
        let name = resolve_namespace_creation(&backend, "foo").await.unwrap();
        assert_eq!(name, "foo-2");
    }
}
