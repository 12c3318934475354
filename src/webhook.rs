//! Event Translator and HTTP listener: receives GitLab System Hook webhooks,
//! validates them, and turns each `event_name` into a concrete reconcile
//! action dispatched against the shared [`Context`].

use crate::context::Context;
use crate::roles::{AccessLevel, Scope};
use axum::extract::State;
use axum::http::{HeaderMap, StatusCode};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::Deserialize;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// The subset of GitLab System Hook payload fields this controller consumes.
/// Every field is optional in the payload itself; which ones are populated
/// depends on `event_name`.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct GitlabEvent {
    #[serde(default)]
    pub event_name: String,
    /// Group full path, used by `group_create`/`group_destroy`.
    #[serde(default)]
    pub path: Option<String>,
    /// Project full path, used by `project_create`/`project_destroy`/rename.
    #[serde(default)]
    pub path_with_namespace: Option<String>,
    #[serde(default)]
    pub old_path_with_namespace: Option<String>,
    /// Project full path as carried on project-membership events.
    #[serde(default)]
    pub project_path_with_namespace: Option<String>,
    /// Group full path as carried on group-membership events.
    #[serde(default)]
    pub group_path: Option<String>,
    /// Username on `user_create`/`user_destroy`.
    #[serde(default)]
    pub username: Option<String>,
    /// Username on membership add/remove events.
    #[serde(default)]
    pub user_username: Option<String>,
    #[serde(default)]
    pub project_access: Option<String>,
    #[serde(default)]
    pub group_access: Option<String>,
    #[serde(default)]
    pub access_level: Option<i64>,
}

pub fn router(ctx: Arc<Context>) -> Router {
    let mut router = Router::new()
        .route("/healthz", get(healthz))
        .route("/", post(handle_hook))
        .route("/hook", post(handle_hook));

    if ctx.config.enable_sync_endpoint {
        router = router.route("/sync", post(handle_sync));
    }

    router.with_state(ctx)
}

async fn healthz() -> &'static str {
    "ok"
}

async fn handle_sync(State(ctx): State<Arc<Context>>) -> StatusCode {
    info!("sync endpoint triggered, scheduling an immediate reconcile");
    let ctx = ctx.clone();
    tokio::spawn(async move {
        if let Err(e) = crate::reconciler::reconcile(&ctx).await {
            if e.is_fatal() {
                tracing::error!(error = %e, "triggered reconcile hit a fatal misconfiguration error, exiting so the orchestrator restarts this process");
                std::process::exit(1);
            }
            warn!(error = %e, "triggered reconcile failed");
        }
    });
    StatusCode::ACCEPTED
}

async fn handle_hook(
    State(ctx): State<Arc<Context>>,
    headers: HeaderMap,
    Json(event): Json<GitlabEvent>,
) -> StatusCode {
    if let Err(status) = validate_headers(&ctx, &headers) {
        return status;
    }

    if ctx.config.debug_hook {
        debug!(?event, "received gitlab webhook");
    } else {
        info!(event_name = event.event_name, "received gitlab webhook");
    }

    let ctx = ctx.clone();
    tokio::spawn(async move {
        if let Err(e) = dispatch(&ctx, event).await {
            warn!(error = %e, "failed to handle webhook event");
        }
    });

    StatusCode::OK
}

fn validate_headers(ctx: &Context, headers: &HeaderMap) -> Result<(), StatusCode> {
    let event_header = headers
        .get("X-Gitlab-Event")
        .and_then(|v| v.to_str().ok())
        .unwrap_or_default();
    if event_header != "System Hook" {
        warn!(event_header, "rejecting webhook with unexpected X-Gitlab-Event header");
        return Err(StatusCode::BAD_REQUEST);
    }

    if let Some(expected) = &ctx.config.gitlab_webhook_secret {
        let provided = headers
            .get("X-Gitlab-Token")
            .and_then(|v| v.to_str().ok())
            .unwrap_or_default();
        if provided != expected {
            warn!("rejecting webhook with mismatched X-Gitlab-Token");
            return Err(StatusCode::BAD_REQUEST);
        }
    }

    Ok(())
}

async fn dispatch(ctx: &Arc<Context>, event: GitlabEvent) -> crate::errors::Result<()> {
    match event.event_name.as_str() {
        "project_create" => {
            if let Some(path) = event.path_with_namespace {
                crate::hooks::on_project_created(ctx, &path).await?;
            }
        }
        "project_destroy" => {
            if let Some(path) = event.path_with_namespace {
                crate::hooks::on_entity_destroyed(ctx, &path).await?;
            }
        }
        "project_rename" | "project_transfer" => {
            if let (Some(old), Some(new)) =
                (event.old_path_with_namespace, event.path_with_namespace)
            {
                crate::hooks::on_project_renamed(ctx, &old, &new).await?;
            }
        }
        "group_create" => {
            if let Some(path) = event.path {
                crate::hooks::on_group_created(ctx, &path).await?;
            }
        }
        "group_destroy" => {
            if let Some(path) = event.path {
                crate::hooks::on_entity_destroyed(ctx, &path).await?;
            }
        }
        "user_add_to_team" => {
            if let (Some(path), Some(username)) =
                (event.project_path_with_namespace, event.user_username)
            {
                let level = access_level_from_event(&event, Scope::Project);
                crate::hooks::on_membership_granted(ctx, &path, &username, Scope::Project, level)
                    .await?;
            }
        }
        "user_add_to_group" => {
            if let (Some(path), Some(username)) = (event.group_path, event.user_username) {
                let level = access_level_from_event(&event, Scope::Group);
                crate::hooks::on_membership_granted(ctx, &path, &username, Scope::Group, level)
                    .await?;
            }
        }
        "user_remove_from_team" => {
            if let (Some(path), Some(username)) =
                (event.project_path_with_namespace, event.user_username)
            {
                crate::hooks::on_membership_revoked(ctx, &path, &username, Scope::Project).await?;
            }
        }
        "user_remove_from_group" => {
            if let (Some(path), Some(username)) = (event.group_path, event.user_username) {
                crate::hooks::on_membership_revoked(ctx, &path, &username, Scope::Group).await?;
            }
        }
        "user_create" => {
            if let Some(username) = event.username {
                crate::hooks::on_user_created(ctx, &username).await?;
            }
        }
        "user_destroy" => {
            if let Some(username) = event.username {
                crate::hooks::on_entity_destroyed(ctx, &username).await?;
            }
        }
        other => {
            debug!(event_name = other, "unhandled gitlab system hook event, ignoring");
        }
    }
    Ok(())
}

fn access_level_from_event(event: &GitlabEvent, scope: Scope) -> AccessLevel {
    let string_form = match scope {
        Scope::Project => &event.project_access,
        Scope::Group => &event.group_access,
    };
    if let Some(s) = string_form {
        return AccessLevel::from_str_form(s);
    }
    if let Some(numeric) = event.access_level {
        return AccessLevel::from_numeric(numeric);
    }
    AccessLevel::Default
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn string_access_level_takes_precedence_over_numeric() {
        let event = GitlabEvent {
            project_access: Some("Developer".to_string()),
            access_level: Some(50),
            ..Default::default()
        };
        assert_eq!(
            access_level_from_event(&event, Scope::Project),
            AccessLevel::Developer
        );
    }

    #[test]
    fn numeric_access_level_used_when_string_form_absent() {
        let event = GitlabEvent {
            access_level: Some(40),
            ..Default::default()
        };
        assert_eq!(
            access_level_from_event(&event, Scope::Group),
            AccessLevel::Master
        );
    }

    #[test]
    fn defaults_when_neither_form_present() {
        let event = GitlabEvent::default();
        assert_eq!(
            access_level_from_event(&event, Scope::Project),
            AccessLevel::Default
        );
    }
}
