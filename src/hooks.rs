//! Post-create hooks: idempotent per-namespace provisioning, re-run by the
//! reconciler at the end of every converge pass (not only when the
//! namespace is brand new), plus the webhook-only external integration
//! registration.
//!
//! External integration registration (the GitLab Kubernetes service and
//! environment) is deliberately *not* run for namespaces the periodic
//! reconciler adopts on its own — it only fires on the webhook-driven
//! project lifecycle events that name a concrete project, since that is the
//! only place GitLab gives us a project to register against.

use crate::cluster::LimitRangeDefaults;
use crate::context::Context;
use crate::errors::Result;
use crate::roles::Scope;
use tracing::{info, warn};

/// Runs the configured namespace-provisioning hooks (storage secret, policy
/// service account, limit range). Called on every reconcile pass for every
/// converged namespace; every step is idempotent, which is what lets this
/// also restore a policy-SA role binding the reconciler's own role-binding
/// diff just deleted because it isn't derived from any GitLab member.
pub async fn on_namespace_provisioned(ctx: &Context, namespace: &str) -> Result<()> {
    if let Some(user_key) = &ctx.config.ceph_user_key {
        ctx.cluster.create_storage_secret(namespace, user_key).await?;
    }

    if let Some(cluster_role) = &ctx.config.policy_cluster_role {
        ctx.cluster
            .provision_policy_service_account(
                namespace,
                &ctx.config.integration_service_account_name,
                cluster_role,
            )
            .await?;
    }

    if ctx.config.enable_limitranges {
        ctx.cluster
            .create_limit_range(
                namespace,
                LimitRangeDefaults {
                    cpu_request: ctx.config.default_cpu_req,
                    cpu_limit: ctx.config.default_cpu_lim,
                    mem_request: ctx.config.default_mem_req,
                    mem_limit: ctx.config.default_mem_lim,
                },
            )
            .await?;
    }

    if let Some(graylog) = &ctx.graylog {
        graylog.ensure_stream(namespace).await;
    }

    Ok(())
}

/// Handles `project_create`: ensures the namespace exists, runs the
/// provisioning hooks if it is new, and registers the external GitLab
/// integration.
pub async fn on_project_created(ctx: &Context, project_path: &str) -> Result<()> {
    let namespace = ensure_namespace(ctx, project_path).await?;
    register_external_integration(ctx, project_path, &namespace).await;
    Ok(())
}

pub async fn on_group_created(ctx: &Context, group_path: &str) -> Result<()> {
    ensure_namespace(ctx, group_path).await?;
    Ok(())
}

/// Handles `user_create`: a user's personal namespace is treated like a
/// one-member group, with the user bound as its own `Master`.
pub async fn on_user_created(ctx: &Context, username: &str) -> Result<()> {
    ensure_namespace(ctx, username).await?;
    on_membership_granted(
        ctx,
        username,
        username,
        Scope::Group,
        crate::roles::AccessLevel::Master,
    )
    .await
}

async fn ensure_namespace(ctx: &Context, gitlab_path: &str) -> Result<String> {
    if let Some(existing) = ctx.cluster.find_namespace_by_origin(gitlab_path).await? {
        return Ok(existing.name);
    }
    let namespace = ctx.cluster.create_namespace(gitlab_path).await?;
    on_namespace_provisioned(ctx, &namespace).await?;
    Ok(namespace)
}

async fn register_external_integration(ctx: &Context, project_path: &str, namespace: &str) {
    let (Some(api_url), Some(ca_pem)) = (&ctx.config.k8s_api_url, &ctx.config.k8s_ca_pem) else {
        return;
    };

    let token = match ctx
        .cluster
        .service_account_token(namespace, &ctx.config.integration_service_account_name)
        .await
    {
        Ok(token) => token,
        Err(e) => {
            warn!(project_path, error = %e, "failed to provision integration service account token");
            return;
        }
    };

    if let Err(e) = ctx
        .gitlab
        .register_kubernetes_service(project_path, api_url, ca_pem, namespace, &token)
        .await
    {
        warn!(project_path, error = %e, "failed to register kubernetes service integration");
    }

    if let Err(e) = ctx
        .gitlab
        .register_environment(project_path, &ctx.config.integration_environment_name)
        .await
    {
        warn!(project_path, error = %e, "failed to register environment");
    }
}

/// Handles `project_rename`/`project_transfer`: deletes the namespace for
/// the old path, creates a fresh one for the new path, re-runs the
/// namespace-provisioning hooks, and re-registers the external integration
/// (the Kubernetes service integration is keyed by project path, so a
/// rename invalidates the previous registration). This is a hard
/// delete-then-create rather than an in-place relabel: the old namespace's
/// contents (role bindings, secrets, service accounts) do not carry over,
/// matching the upstream webhook handler's `DeleteNamespace` followed by
/// `CreateNamespace`.
pub async fn on_project_renamed(ctx: &Context, old_path: &str, new_path: &str) -> Result<()> {
    if let Some(ns) = ctx.cluster.find_namespace_by_origin(old_path).await? {
        info!(namespace = ns.name, old_path, "deleting namespace for renamed/transferred project");
        ctx.cluster.delete_namespace(&ns.name).await?;
    }
    let namespace = ensure_namespace(ctx, new_path).await?;
    register_external_integration(ctx, new_path, &namespace).await;
    Ok(())
}

/// Handles `project_destroy`/`group_destroy`: deletes the owned namespace,
/// relying on Kubernetes cascade delete to remove its service accounts,
/// secrets and role bindings.
pub async fn on_entity_destroyed(ctx: &Context, gitlab_path: &str) -> Result<()> {
    if let Some(ns) = ctx.cluster.find_namespace_by_origin(gitlab_path).await? {
        info!(namespace = ns.name, gitlab_path, "deleting namespace for destroyed gitlab entity");
        ctx.cluster.delete_namespace(&ns.name).await?;
        if let Some(graylog) = &ctx.graylog {
            graylog.revoke_all_readers(&ns.name).await;
        }
    }
    Ok(())
}

/// Handles `user_add_to_team`/`user_add_to_group`: grants the role binding
/// immediately rather than waiting for the next periodic reconcile.
pub async fn on_membership_granted(
    ctx: &Context,
    gitlab_path: &str,
    username: &str,
    scope: Scope,
    level: crate::roles::AccessLevel,
) -> Result<()> {
    let Some(ns) = ctx.cluster.find_namespace_by_origin(gitlab_path).await? else {
        info!(gitlab_path, "membership granted before namespace exists, deferring to next reconcile");
        return Ok(());
    };
    let role = crate::roles::role_name(&ctx.config, scope, level);
    let binding_name = format!("{username}-{role}-{}", ns.name);
    ctx.cluster
        .create_role_binding(&ns.name, &binding_name, username, &role)
        .await?;

    if let Some(graylog) = &ctx.graylog {
        graylog.grant_reader(&ns.name, username).await;
    }
    Ok(())
}

/// Handles `user_remove_from_team`/`user_remove_from_group`. The event
/// doesn't tell us which access level the user held, so every possible
/// binding name for this scope is deleted; deletion is idempotent so the
/// misses are harmless.
pub async fn on_membership_revoked(
    ctx: &Context,
    gitlab_path: &str,
    username: &str,
    scope: Scope,
) -> Result<()> {
    let Some(ns) = ctx.cluster.find_namespace_by_origin(gitlab_path).await? else {
        return Ok(());
    };

    use crate::roles::AccessLevel::*;
    for level in [Master, Reporter, Developer, Default] {
        let role = crate::roles::role_name(&ctx.config, scope, level);
        let binding_name = format!("{username}-{role}-{}", ns.name);
        ctx.cluster.delete_role_binding(&ns.name, &binding_name).await?;
    }

    if let Some(graylog) = &ctx.graylog {
        graylog.revoke_reader(&ns.name, username).await;
    }
    Ok(())
}
