//! Optional log-aggregation side channel: creates a Graylog stream per
//! namespace and grants/revokes a per-namespace reader role as explicit
//! membership events arrive. Entirely best-effort — every method here logs
//! and swallows its own errors rather than propagating them, since losing
//! log access is never worth failing an otherwise-successful reconcile or
//! webhook handler.

use reqwest::StatusCode;
use serde::Deserialize;
use serde_json::json;
use std::time::Duration;
use tokio::sync::Mutex;
use tracing::warn;

const REQUEST_TIMEOUT: Duration = Duration::from_secs(10);
const REQUESTED_BY: &str = "gitlab-k8s-integrator";

pub struct GraylogClient {
    http: reqwest::Client,
    base_url: String,
    username: String,
    password: String,
    session: Mutex<Option<String>>,
}

#[derive(Deserialize)]
struct SessionResponse {
    session_id: String,
}

#[derive(Deserialize)]
struct Stream {
    id: String,
    title: String,
}

#[derive(Deserialize)]
struct StreamsResponse {
    streams: Vec<Stream>,
}

impl GraylogClient {
    pub fn new(base_url: &str, username: &str, password: &str) -> Self {
        GraylogClient {
            http: reqwest::Client::builder()
                .timeout(REQUEST_TIMEOUT)
                .build()
                .expect("reqwest client with only timeout configured never fails to build"),
            base_url: base_url.trim_end_matches('/').to_string(),
            username: username.to_string(),
            password: password.to_string(),
            session: Mutex::new(None),
        }
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    /// Returns a cached session token, logging in once if none is cached
    /// yet (single-flight via the mutex guard held across the login call).
    async fn session_token(&self) -> Result<String, reqwest::Error> {
        let mut guard = self.session.lock().await;
        if let Some(token) = guard.as_ref() {
            return Ok(token.clone());
        }
        let resp = self
            .http
            .post(self.url("/api/system/sessions"))
            .header("X-Requested-By", REQUESTED_BY)
            .json(&json!({
                "username": self.username,
                "password": self.password,
                "host": REQUESTED_BY,
            }))
            .send()
            .await?
            .error_for_status()?
            .json::<SessionResponse>()
            .await?;
        *guard = Some(resp.session_id.clone());
        Ok(resp.session_id)
    }

    async fn invalidate_session(&self) {
        *self.session.lock().await = None;
    }

    async fn find_or_create_stream(&self, namespace: &str) -> Result<String, reqwest::Error> {
        let token = self.session_token().await?;
        let list = self
            .http
            .get(self.url("/api/streams"))
            .basic_auth(&token, Some("session"))
            .header("X-Requested-By", REQUESTED_BY)
            .send()
            .await?
            .error_for_status()?
            .json::<StreamsResponse>()
            .await?;

        if let Some(stream) = list.streams.into_iter().find(|s| s.title == namespace) {
            return Ok(stream.id);
        }

        #[derive(Deserialize)]
        struct CreateStreamResponse {
            stream_id: String,
        }

        let created = self
            .http
            .post(self.url("/api/streams"))
            .basic_auth(&token, Some("session"))
            .header("X-Requested-By", REQUESTED_BY)
            .json(&json!({
                "title": namespace,
                "description": format!("logs for gitlab namespace {namespace}"),
            }))
            .send()
            .await?
            .error_for_status()?
            .json::<CreateStreamResponse>()
            .await?;
        Ok(created.stream_id)
    }

    fn reader_role_name(namespace: &str) -> String {
        format!("{namespace}-reader")
    }

    async fn role_exists(&self, role_name: &str) -> Result<bool, reqwest::Error> {
        let token = self.session_token().await?;
        let resp = self
            .http
            .get(self.url(&format!("/api/roles/{role_name}")))
            .basic_auth(&token, Some("session"))
            .header("X-Requested-By", REQUESTED_BY)
            .send()
            .await?;
        Ok(resp.status() == StatusCode::OK)
    }

    async fn ensure_reader_role(&self, namespace: &str, stream_id: &str) -> Result<(), reqwest::Error> {
        let role_name = Self::reader_role_name(namespace);
        if self.role_exists(&role_name).await? {
            return Ok(());
        }
        let token = self.session_token().await?;
        self.http
            .post(self.url("/api/roles"))
            .basic_auth(&token, Some("session"))
            .header("X-Requested-By", REQUESTED_BY)
            .json(&json!({
                "name": role_name,
                "description": format!("read access to the {namespace} stream"),
                "permissions": [format!("streams:read:{stream_id}")],
                "read_only": false,
            }))
            .send()
            .await?
            .error_for_status()?;
        Ok(())
    }

    /// Creates the per-namespace stream (and its reader role, with no
    /// members yet) if it doesn't already exist. Called from the
    /// namespace-provisioning hook, not inferred from reconcile diffs.
    pub async fn ensure_stream(&self, namespace: &str) {
        let result: Result<(), reqwest::Error> = async {
            let stream_id = self.find_or_create_stream(namespace).await?;
            self.ensure_reader_role(namespace, &stream_id).await?;
            Ok(())
        }
        .await;

        if let Err(e) = result {
            warn!(namespace, error = %e, "failed to ensure graylog stream/role, continuing without it");
            self.invalidate_session().await;
        }
    }

    pub async fn grant_reader(&self, namespace: &str, username: &str) {
        let role_name = Self::reader_role_name(namespace);
        let result: Result<(), reqwest::Error> = async {
            let token = self.session_token().await?;
            self.http
                .put(self.url(&format!("/api/users/{username}/roles/{role_name}")))
                .basic_auth(&token, Some("session"))
                .header("X-Requested-By", REQUESTED_BY)
                .send()
                .await?
                .error_for_status()?;
            Ok(())
        }
        .await;

        if let Err(e) = result {
            warn!(namespace, username, error = %e, "failed to grant graylog reader role");
            self.invalidate_session().await;
        }
    }

    pub async fn revoke_reader(&self, namespace: &str, username: &str) {
        let role_name = Self::reader_role_name(namespace);
        let result: Result<(), reqwest::Error> = async {
            let token = self.session_token().await?;
            self.http
                .delete(self.url(&format!("/api/users/{username}/roles/{role_name}")))
                .basic_auth(&token, Some("session"))
                .header("X-Requested-By", REQUESTED_BY)
                .send()
                .await?
                .error_for_status()?;
            Ok(())
        }
        .await;

        if let Err(e) = result {
            warn!(namespace, username, error = %e, "failed to revoke graylog reader role");
            self.invalidate_session().await;
        }
    }

    /// Deletes the whole reader role for a namespace, called when its
    /// owning GitLab entity is destroyed.
    pub async fn revoke_all_readers(&self, namespace: &str) {
        let role_name = Self::reader_role_name(namespace);
        let result: Result<(), reqwest::Error> = async {
            let token = self.session_token().await?;
            let resp = self
                .http
                .delete(self.url(&format!("/api/roles/{role_name}")))
                .basic_auth(&token, Some("session"))
                .header("X-Requested-By", REQUESTED_BY)
                .send()
                .await?;
            if resp.status() != StatusCode::NOT_FOUND {
                resp.error_for_status()?;
            }
            Ok(())
        }
        .await;

        if let Err(e) = result {
            warn!(namespace, error = %e, "failed to delete graylog reader role");
            self.invalidate_session().await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reader_role_name_is_namespace_suffixed() {
        assert_eq!(GraylogClient::reader_role_name("team-x"), "team-x-reader");
    }
}
