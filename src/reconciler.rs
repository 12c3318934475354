//! Reconciler: the periodic (and webhook-triggered) three-way diff between
//! GitLab's structure (desired), the cluster's namespaces (observed), and
//! operator-supplied manifests (protected).

use crate::codec;
use crate::context::Context;
use crate::errors::Result;
use crate::gitlab::{Group, Member, Project, SourceContent, User};
use crate::roles::{AccessLevel, Scope};
use futures::stream::{self, StreamExt};
use std::borrow::Cow;
use std::collections::HashSet;
use tracing::{debug, info, warn};

/// How many entities (users/projects/groups) Phase 2 converges concurrently.
const FAN_OUT_CONCURRENCY: usize = 8;

struct DesiredEntity<'a> {
    gitlab_path: &'a str,
    scope: Scope,
    members: Cow<'a, [Member]>,
}

/// Every user's own namespace is treated as a group-scoped entity with a
/// single implied `Master` membership for that user, per `GetGroupRoleName`
/// in the upstream implementation.
fn user_as_entity(user: &User) -> DesiredEntity<'_> {
    DesiredEntity {
        gitlab_path: &user.username,
        scope: Scope::Group,
        members: Cow::Owned(vec![Member {
            id: 0,
            username: user.username.clone(),
            access_level: 50,
        }]),
    }
}

fn desired_entities(content: &SourceContent) -> Vec<DesiredEntity<'_>> {
    let mut entities: Vec<DesiredEntity<'_>> = content
        .users
        .iter()
        .map(user_as_entity)
        .collect();
    entities.extend(content.groups.iter().map(|g: &Group| DesiredEntity {
        gitlab_path: &g.full_path,
        scope: Scope::Group,
        members: Cow::Borrowed(&g.members),
    }));
    entities.extend(content.projects.iter().map(|p: &Project| DesiredEntity {
        gitlab_path: &p.path_with_namespace,
        scope: Scope::Project,
        members: Cow::Borrowed(&p.members),
    }));
    entities
}

fn construct_role_binding_name(username: &str, role_name: &str, namespace: &str) -> String {
    format!("{username}-{role_name}-{namespace}")
}

/// Runs one full reconcile pass. Callers (the scheduler, and the `/sync`
/// endpoint) are responsible for serializing calls to this function via
/// `Context::reconcile_lock` so that two passes never race each other;
/// webhook-driven single-entity updates do not go through this lock, since
/// every mutation here is independently idempotent.
pub async fn reconcile(ctx: &Context) -> Result<()> {
    info!("starting reconcile pass");
    let _guard = ctx.reconcile_lock.lock().await;

    let content = ctx.gitlab.get_full_content().await?;
    let entities = desired_entities(&content);

    let desired_paths: HashSet<&str> = entities.iter().map(|e| e.gitlab_path).collect();

    prune_orphaned_namespaces(ctx, &desired_paths).await?;

    stream::iter(entities)
        .for_each_concurrent(FAN_OUT_CONCURRENCY, |entity| async move {
            if let Err(e) = converge_entity(ctx, &entity).await {
                warn!(path = entity.gitlab_path, error = %e, "failed to converge entity");
            }
        })
        .await;

    info!("reconcile pass complete");
    Ok(())
}

async fn prune_orphaned_namespaces(ctx: &Context, desired_paths: &HashSet<&str>) -> Result<()> {
    let observed = ctx.cluster.list_namespaces_with_origin_label().await?;
    for ns in observed {
        if ns.name == ctx.config.reserved_namespace {
            continue;
        }
        let decoded = match codec::decode_label_value(&ns.origin_label) {
            Ok(d) => d,
            Err(e) => {
                warn!(namespace = ns.name, error = %e, "namespace has an unparsable gitlab-origin label, leaving it alone");
                continue;
            }
        };
        if !desired_paths.contains(decoded.as_str()) {
            info!(namespace = ns.name, origin = decoded, "pruning namespace no longer present in gitlab");
            ctx.cluster.delete_namespace(&ns.name).await?;
        }
    }
    Ok(())
}

async fn converge_entity(ctx: &Context, entity: &DesiredEntity<'_>) -> Result<()> {
    let existing = ctx.cluster.find_namespace_by_origin(entity.gitlab_path).await?;
    let namespace = match existing {
        Some(ns) if !ns.ignored => ns.name,
        Some(ns) => {
            debug!(namespace = ns.name, path = entity.gitlab_path, "namespace is marked ignored, skipping convergence");
            return Ok(());
        }
        None => ctx.cluster.create_namespace(entity.gitlab_path).await?,
    };

    converge_role_bindings(ctx, &namespace, entity).await?;

    // run unconditionally, not just for brand-new namespaces: every hook is
    // idempotent, and running it last (after the binding diff) is what lets
    // it restore a policy-SA role binding that the diff above just deleted
    // because it isn't derived from any member.
    crate::hooks::on_namespace_provisioned(ctx, &namespace).await
}

async fn converge_role_bindings(
    ctx: &Context,
    namespace: &str,
    entity: &DesiredEntity<'_>,
) -> Result<()> {
    let mut desired_bindings = HashSet::new();
    let mut desired_info = Vec::new();
    for member in entity.members.iter() {
        let level = AccessLevel::from_numeric(member.access_level);
        let role = crate::roles::role_name(&ctx.config, entity.scope, level);
        let binding_name = construct_role_binding_name(&member.username, &role, namespace);
        desired_bindings.insert(binding_name.clone());
        desired_info.push((binding_name, member.username.clone(), role));
    }

    let observed_bindings = ctx.cluster.list_role_binding_names(namespace).await?;

    for existing in observed_bindings.difference(&desired_bindings) {
        if ctx.protected.contains_role_binding(namespace, existing) {
            continue;
        }
        debug!(namespace, binding = existing.as_str(), "removing stale role binding");
        ctx.cluster.delete_role_binding(namespace, existing).await?;
    }

    for (binding_name, username, role) in desired_info {
        if observed_bindings.contains(&binding_name) {
            continue;
        }
        debug!(namespace, binding = binding_name, username, role, "creating role binding");
        ctx.cluster
            .create_role_binding(namespace, &binding_name, &username, &role)
            .await?;
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cli::Config;
    use crate::cluster::{ClusterGateway, LimitRangeDefaults, ObservedNamespace};
    use crate::context::Context;
    use crate::custom_objects::{CustomObject, ProtectedSet};
    use crate::gitlab::GitlabClient;
    use async_trait::async_trait;
    use std::sync::Mutex as StdMutex;

    #[test]
    fn binding_name_matches_username_role_namespace_convention() {
        assert_eq!(
            construct_role_binding_name("alice", "gitlab-project-developer", "team-x"),
            "alice-gitlab-project-developer-team-x"
        );
    }

    /// An in-memory stand-in for the cluster, keyed by gitlab path rather
    /// than by the (irrelevant, in these tests) encoded namespace name, so
    /// assertions can be phrased directly against the entities under test.
    #[derive(Default)]
    struct FakeCluster {
        namespaces: StdMutex<std::collections::HashMap<String, ObservedNamespace>>,
        bindings: StdMutex<std::collections::HashMap<String, HashSet<String>>>,
    }

    #[async_trait]
    impl ClusterGateway for FakeCluster {
        async fn list_namespaces_with_origin_label(&self) -> Result<Vec<ObservedNamespace>> {
            Ok(self.namespaces.lock().unwrap().values().cloned().collect())
        }

        async fn find_namespace_by_origin(
            &self,
            gitlab_path: &str,
        ) -> Result<Option<ObservedNamespace>> {
            Ok(self.namespaces.lock().unwrap().get(gitlab_path).cloned())
        }

        async fn create_namespace(&self, gitlab_path: &str) -> Result<String> {
            let name = codec::encode_namespace_name(gitlab_path)?;
            self.namespaces.lock().unwrap().insert(
                gitlab_path.to_string(),
                ObservedNamespace {
                    name: name.clone(),
                    origin_label: codec::encode_label_value(gitlab_path)?,
                    ignored: false,
                },
            );
            Ok(name)
        }

        async fn delete_namespace(&self, namespace: &str) -> Result<()> {
            self.namespaces.lock().unwrap().retain(|_, ns| ns.name != namespace);
            self.bindings.lock().unwrap().remove(namespace);
            Ok(())
        }

        async fn list_role_binding_names(&self, namespace: &str) -> Result<HashSet<String>> {
            Ok(self
                .bindings
                .lock()
                .unwrap()
                .get(namespace)
                .cloned()
                .unwrap_or_default())
        }

        async fn create_role_binding(
            &self,
            namespace: &str,
            binding_name: &str,
            _username: &str,
            _cluster_role: &str,
        ) -> Result<()> {
            self.bindings
                .lock()
                .unwrap()
                .entry(namespace.to_string())
                .or_default()
                .insert(binding_name.to_string());
            Ok(())
        }

        async fn delete_role_binding(&self, namespace: &str, binding_name: &str) -> Result<()> {
            if let Some(set) = self.bindings.lock().unwrap().get_mut(namespace) {
                set.remove(binding_name);
            }
            Ok(())
        }

        async fn create_storage_secret(&self, _namespace: &str, _user_key: &str) -> Result<()> {
            Ok(())
        }

        async fn create_limit_range(
            &self,
            _namespace: &str,
            _defaults: LimitRangeDefaults,
        ) -> Result<()> {
            Ok(())
        }

        async fn provision_policy_service_account(
            &self,
            _namespace: &str,
            _sa_name: &str,
            _cluster_role: &str,
        ) -> Result<String> {
            Ok("fake-token".to_string())
        }

        async fn service_account_token(&self, _namespace: &str, _sa_name: &str) -> Result<String> {
            Ok("fake-token".to_string())
        }

        async fn apply_custom_object(&self, _object: &CustomObject) -> Result<()> {
            Ok(())
        }
    }

    fn test_context(cluster: FakeCluster, protected: ProtectedSet) -> Context {
        let gitlab = GitlabClient::new("gitlab.example.com", "v4", "test-token").unwrap();
        Context::new(Config::for_tests(), gitlab, Box::new(cluster), protected, None)
    }

    fn member(username: &str, access_level: i64) -> Member {
        Member {
            id: 0,
            username: username.to_string(),
            access_level,
        }
    }

    /// The literal end-to-end scenario from spec §8.5: a user, a group with
    /// two members, and a project (parented on that group) whose members are
    /// unioned with the parent group's.
    #[tokio::test]
    async fn end_to_end_reconcile_produces_expected_namespaces_and_bindings() {
        let ctx = test_context(FakeCluster::default(), ProtectedSet::default());

        let content = SourceContent {
            users: vec![User {
                username: "alice".to_string(),
            }],
            groups: vec![Group {
                id: 1,
                full_path: "team-x".to_string(),
                members: vec![member("alice", 40), member("bob", 30)],
            }],
            projects: vec![Project {
                id: 1,
                path_with_namespace: "team-x/app".to_string(),
                members: vec![member("alice", 40), member("bob", 30)],
            }],
        };
        let entities = desired_entities(&content);
        for entity in &entities {
            converge_entity(&ctx, entity).await.unwrap();
        }

        for path in ["alice", "team-x", "team-x/app"] {
            assert!(
                ctx.cluster.find_namespace_by_origin(path).await.unwrap().is_some(),
                "expected a namespace for {path}"
            );
        }

        let alice_ns = ctx.cluster.find_namespace_by_origin("alice").await.unwrap().unwrap().name;
        let team_x_ns = ctx.cluster.find_namespace_by_origin("team-x").await.unwrap().unwrap().name;
        let app_ns = ctx.cluster.find_namespace_by_origin("team-x/app").await.unwrap().unwrap().name;

        assert_eq!(
            ctx.cluster.list_role_binding_names(&alice_ns).await.unwrap(),
            HashSet::from(["alice-gitlab-group-master-alice".to_string()])
        );
        assert_eq!(
            ctx.cluster.list_role_binding_names(&team_x_ns).await.unwrap(),
            HashSet::from([
                "alice-gitlab-group-master-team-x".to_string(),
                "bob-gitlab-group-developer-team-x".to_string(),
            ])
        );
        assert_eq!(
            ctx.cluster.list_role_binding_names(&app_ns).await.unwrap(),
            HashSet::from([
                "alice-gitlab-project-master-team-x-app".to_string(),
                "bob-gitlab-project-developer-team-x-app".to_string(),
            ])
        );
    }

    #[tokio::test]
    async fn reconcile_is_a_fixed_point_on_an_unchanged_source() {
        let ctx = test_context(FakeCluster::default(), ProtectedSet::default());
        let content = SourceContent {
            users: vec![],
            groups: vec![Group {
                id: 1,
                full_path: "team-x".to_string(),
                members: vec![member("alice", 40)],
            }],
            projects: vec![],
        };

        let entities = desired_entities(&content);
        for entity in &entities {
            converge_entity(&ctx, entity).await.unwrap();
        }
        let ns = ctx.cluster.find_namespace_by_origin("team-x").await.unwrap().unwrap().name;
        let after_first_pass = ctx.cluster.list_role_binding_names(&ns).await.unwrap();

        let entities = desired_entities(&content);
        for entity in &entities {
            converge_entity(&ctx, entity).await.unwrap();
        }
        let after_second_pass = ctx.cluster.list_role_binding_names(&ns).await.unwrap();

        assert_eq!(after_first_pass, after_second_pass);
    }

    #[tokio::test]
    async fn protected_role_binding_survives_a_member_removal() {
        let content = SourceContent {
            users: vec![],
            groups: vec![Group {
                id: 1,
                full_path: "team-x".to_string(),
                members: vec![member("alice", 40)],
            }],
            projects: vec![],
        };
        let entities = desired_entities(&content);

        let ctx = test_context(FakeCluster::default(), ProtectedSet::default());
        for entity in &entities {
            converge_entity(&ctx, entity).await.unwrap();
        }
        let ns = ctx.cluster.find_namespace_by_origin("team-x").await.unwrap().unwrap().name;

        // an operator-installed binding that is not derived from any member
        ctx.cluster
            .create_role_binding(&ns, "custom-admin-binding", "carol", "admin")
            .await
            .unwrap();

        let mut protected = ProtectedSet::default();
        protected
            .role_bindings
            .insert((ns.clone(), "custom-admin-binding".to_string()));

        // rebuild the context so the new protected set takes effect, keeping
        // the same (already-populated) fake cluster
        let ctx = Context {
            protected,
            ..ctx
        };

        // alice's membership is gone now; converging must delete her
        // binding but must never touch the protected custom one
        let empty_group_content = SourceContent {
            users: vec![],
            groups: vec![Group {
                id: 1,
                full_path: "team-x".to_string(),
                members: vec![],
            }],
            projects: vec![],
        };
        for entity in &desired_entities(&empty_group_content) {
            converge_entity(&ctx, entity).await.unwrap();
        }

        let remaining = ctx.cluster.list_role_binding_names(&ns).await.unwrap();
        assert_eq!(remaining, HashSet::from(["custom-admin-binding".to_string()]));
    }

    #[tokio::test]
    async fn prune_deletes_namespaces_whose_gitlab_entity_is_gone() {
        let ctx = test_context(FakeCluster::default(), ProtectedSet::default());
        ctx.cluster.create_namespace("team-x").await.unwrap();
        ctx.cluster.create_namespace("stale-group").await.unwrap();

        let desired_paths: HashSet<&str> = ["team-x"].into_iter().collect();
        prune_orphaned_namespaces(&ctx, &desired_paths).await.unwrap();

        assert!(ctx.cluster.find_namespace_by_origin("team-x").await.unwrap().is_some());
        assert!(ctx
            .cluster
            .find_namespace_by_origin("stale-group")
            .await
            .unwrap()
            .is_none());
    }

    /// Spec §8 scenario 6: a `project_rename`/`project_transfer` must delete
    /// the namespace for the old path and create a fresh one for the new
    /// path, rather than relabeling the existing namespace in place.
    #[tokio::test]
    async fn project_rename_deletes_old_namespace_and_creates_new_one() {
        let ctx = test_context(FakeCluster::default(), ProtectedSet::default());
        ctx.cluster.create_namespace("old/path").await.unwrap();
        let old_ns = ctx.cluster.find_namespace_by_origin("old/path").await.unwrap().unwrap().name;
        ctx.cluster
            .create_role_binding(&old_ns, "alice-gitlab-project-master-old-path", "alice", "gitlab-project-master")
            .await
            .unwrap();

        crate::hooks::on_project_renamed(&ctx, "old/path", "new/path").await.unwrap();

        assert!(
            ctx.cluster.find_namespace_by_origin("old/path").await.unwrap().is_none(),
            "old namespace must be gone after a rename"
        );
        let new_ns = ctx
            .cluster
            .find_namespace_by_origin("new/path")
            .await
            .unwrap()
            .expect("new namespace must exist after a rename");
        assert_eq!(new_ns.origin_label, codec::encode_label_value("new/path").unwrap());

        // the old namespace's bindings do not carry over to the new one,
        // since it is a fresh namespace rather than a relabeled one
        assert!(ctx.cluster.list_role_binding_names(&new_ns.name).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn prune_never_deletes_the_reserved_namespace() {
        let cluster = FakeCluster::default();
        cluster.namespaces.lock().unwrap().insert(
            "kube-system".to_string(),
            ObservedNamespace {
                name: "kube-system".to_string(),
                origin_label: "kube-system".to_string(),
                ignored: false,
            },
        );
        let ctx = test_context(cluster, ProtectedSet::default());

        prune_orphaned_namespaces(&ctx, &HashSet::new()).await.unwrap();

        assert!(ctx
            .cluster
            .find_namespace_by_origin("kube-system")
            .await
            .unwrap()
            .is_some());
    }
}
