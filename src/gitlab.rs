//! Source Fetcher: a paginated client for the subset of the GitLab REST API
//! (`/api/v4/groups`, `/projects`, `/users`, and their `/members`
//! sub-resources) needed to compute the reconciler's desired set.

use crate::errors::{Error, Result};
use lazy_static::lazy_static;
use regex::Regex;
use reqwest::StatusCode;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use std::collections::HashSet;
use std::time::Duration;
use tracing::{debug, warn};

const REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

lazy_static! {
    static ref NEXT_LINK_RE: Regex =
        Regex::new(r#"<([^>]+)>\s*;\s*rel="next""#).expect("valid regex");
}

#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
pub struct Member {
    pub id: i64,
    pub username: String,
    #[serde(default)]
    pub access_level: i64,
}

#[derive(Debug, Clone, Deserialize)]
struct GitlabNamespace {
    #[serde(default)]
    kind: String,
    #[serde(default)]
    id: i64,
    #[serde(default)]
    full_path: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Group {
    pub id: i64,
    pub full_path: String,
    #[serde(default, skip_deserializing)]
    pub members: Vec<Member>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Project {
    pub id: i64,
    pub path_with_namespace: String,
    #[serde(default)]
    namespace: Option<GitlabNamespace>,
    #[serde(default, skip_deserializing)]
    pub members: Vec<Member>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct User {
    pub username: String,
}

/// The desired set: everything the reconciler needs to know about the
/// GitLab instance's structure, with members already resolved (and, for
/// projects, already unioned with their parent group's members).
#[derive(Debug, Clone, Default)]
pub struct SourceContent {
    pub groups: Vec<Group>,
    pub projects: Vec<Project>,
    pub users: Vec<User>,
}

pub struct GitlabClient {
    http: reqwest::Client,
    base_url: String,
    private_token: String,
}

impl GitlabClient {
    pub fn new(hostname: &str, api_version: &str, private_token: &str) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .map_err(|e| Error::Http {
                context: "building GitLab HTTP client".to_string(),
                source: e,
            })?;
        Ok(GitlabClient {
            http,
            base_url: format!("https://{hostname}/api/{api_version}/"),
            private_token: private_token.to_string(),
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    pub fn private_token(&self) -> &str {
        &self.private_token
    }

    /// Fetches every group, project and user known to this GitLab instance,
    /// resolving each group's and project's members. Projects whose parent
    /// is a group have that group's members unioned in, deduplicated by
    /// member id.
    pub async fn get_full_content(&self) -> Result<SourceContent> {
        let mut groups = self.get_all::<Group>(self.url("groups")).await?;
        for group in &mut groups {
            group.members = self.fetch_members("groups", group.id).await;
        }

        let mut projects = self.get_all::<Project>(self.url("projects")).await?;
        for project in &mut projects {
            project.members = self.fetch_members("projects", project.id).await;
            if let Some(ns) = &project.namespace {
                if ns.kind == "group" {
                    let parent_members = self.fetch_members("groups", ns.id).await;
                    let known: HashSet<i64> = project.members.iter().map(|m| m.id).collect();
                    for member in parent_members {
                        if !known.contains(&member.id) {
                            project.members.push(member);
                        }
                    }
                }
            }
            if project.members.is_empty() {
                warn!(
                    project = project.path_with_namespace,
                    "no members found for project; continuing sync anyway"
                );
            }
        }

        let users = self.get_all::<User>(self.url("users")).await?;

        Ok(SourceContent {
            groups,
            projects,
            users,
        })
    }

    /// Registers (or updates) this project's Kubernetes cluster integration
    /// with a service-account token, mirroring `WriteTokenToGitlab`.
    pub async fn register_kubernetes_service(
        &self,
        project_path: &str,
        api_url: &str,
        ca_pem: &str,
        namespace: &str,
        token: &str,
    ) -> Result<()> {
        let url = self.url(&format!(
            "projects/{}/services/kubernetes",
            urlencode_path(project_path)
        ));
        let resp = self
            .http
            .put(&url)
            .header("PRIVATE-TOKEN", &self.private_token)
            .query(&[
                ("active", "true"),
                ("api_url", api_url),
                ("token", token),
                ("namespace", namespace),
                ("ca_pem", ca_pem),
            ])
            .send()
            .await
            .map_err(|e| Error::Http {
                context: url.clone(),
                source: e,
            })?;
        if !resp.status().is_success() {
            warn!(url, status = %resp.status(), "failed to register kubernetes service integration");
        }
        Ok(())
    }

    /// Registers an environment for a project, mirroring the upstream
    /// integrator's environment-registration call issued alongside the
    /// Kubernetes service integration.
    pub async fn register_environment(&self, project_path: &str, environment_name: &str) -> Result<()> {
        let url = self.url(&format!(
            "projects/{}/environments",
            urlencode_path(project_path)
        ));
        let resp = self
            .http
            .post(&url)
            .header("PRIVATE-TOKEN", &self.private_token)
            .query(&[("name", environment_name)])
            .send()
            .await
            .map_err(|e| Error::Http {
                context: url.clone(),
                source: e,
            })?;
        if !resp.status().is_success() && resp.status() != StatusCode::BAD_REQUEST {
            // 400 is returned when the environment already exists; anything
            // else is logged but kept non-fatal, matching the rest of this
            // best-effort integration surface.
            warn!(url, status = %resp.status(), "failed to register environment");
        }
        Ok(())
    }

    async fn fetch_members(&self, kind: &str, id: i64) -> Vec<Member> {
        let url = self.url(&format!("{kind}/{id}/members"));
        match self.get_page::<Member>(&url).await {
            Ok((members, _)) => {
                if members.is_empty() {
                    warn!(kind, id, "WARNING: no members found; this may be a GitLab bug, continuing sync anyway");
                }
                members
            }
            Err(e) => {
                warn!(kind, id, error = %e, "failed to fetch members, treating as empty");
                Vec::new()
            }
        }
    }

    async fn get_all<T: DeserializeOwned>(&self, start_url: String) -> Result<Vec<T>> {
        let mut all = Vec::new();
        let mut next = Some(start_url);
        while let Some(url) = next {
            let (items, next_url) = self.get_page::<T>(&url).await?;
            all.extend(items);
            next = next_url;
        }
        Ok(all)
    }

    async fn get_page<T: DeserializeOwned>(&self, url: &str) -> Result<(Vec<T>, Option<String>)> {
        debug!(url, "GET GitLab");
        let resp = self
            .http
            .get(url)
            .header("PRIVATE-TOKEN", &self.private_token)
            .send()
            .await
            .map_err(|e| Error::Http {
                context: url.to_string(),
                source: e,
            })?;

        if resp.status() == StatusCode::UNAUTHORIZED {
            return Err(Error::Unauthorized);
        }

        let next = parse_next_link(resp.headers());
        let status = resp.status();
        if !status.is_success() {
            warn!(url, %status, "GitLab request failed, treating as empty page");
            return Ok((Vec::new(), next));
        }

        let items = resp.json::<Vec<T>>().await.map_err(|e| Error::Http {
            context: format!("decoding response from {url}"),
            source: e,
        })?;
        Ok((items, next))
    }
}

fn urlencode_path(path: &str) -> String {
    path.replace('/', "%2F")
}

fn parse_next_link(headers: &reqwest::header::HeaderMap) -> Option<String> {
    let link = headers.get(reqwest::header::LINK)?.to_str().ok()?;
    NEXT_LINK_RE
        .captures(link)
        .map(|c| c[1].to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_next_link_from_header_value() {
        let mut headers = reqwest::header::HeaderMap::new();
        headers.insert(
            reqwest::header::LINK,
            "<https://gitlab.example.com/api/v4/groups?page=2>; rel=\"next\", <https://gitlab.example.com/api/v4/groups?page=1>; rel=\"first\""
                .parse()
                .unwrap(),
        );
        assert_eq!(
            parse_next_link(&headers),
            Some("https://gitlab.example.com/api/v4/groups?page=2".to_string())
        );
    }

    #[test]
    fn no_next_link_when_rel_next_is_absent() {
        let mut headers = reqwest::header::HeaderMap::new();
        headers.insert(
            reqwest::header::LINK,
            "<https://gitlab.example.com/api/v4/groups?page=1>; rel=\"first\""
                .parse()
                .unwrap(),
        );
        assert_eq!(parse_next_link(&headers), None);
    }

    #[test]
    fn no_next_link_when_header_is_missing() {
        let headers = reqwest::header::HeaderMap::new();
        assert_eq!(parse_next_link(&headers), None);
    }
}
