//! GitLab REST API (v4) client.

use async_trait::async_trait;
use reqwest::header::HeaderMap;
use reqwest::Client;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use tracing::debug;

use crate::error::{MigrationError, Result};
use crate::retry::parse_retry_after;
use crate::source::{Page, SourceApi};
use crate::types::{
    NamespaceKind, SourceGroup, SourceNamespace, SourceProject, SourceSshKey, SourceUser,
    Visibility,
};

/// GitLab API response types
#[derive(Debug, Deserialize)]
struct GitLabUser {
    id: u64,
    username: String,
    name: String,
    #[serde(default)]
    email: Option<String>,
    #[serde(default)]
    public_email: Option<String>,
    #[serde(default)]
    state: String,
}

#[derive(Debug, Deserialize)]
struct GitLabGroup {
    id: u64,
    name: String,
    full_path: String,
    description: Option<String>,
    visibility: String,
}

#[derive(Debug, Deserialize)]
struct GitLabNamespace {
    kind: String,
    full_path: String,
}

#[derive(Debug, Deserialize)]
struct GitLabProject {
    id: u64,
    name: String,
    path: String,
    path_with_namespace: String,
    description: Option<String>,
    #[serde(default = "private_visibility")]
    visibility: String,
    namespace: GitLabNamespace,
    http_url_to_repo: String,
    ssh_url_to_repo: String,
    #[serde(default)]
    wiki_enabled: bool,
}

#[derive(Debug, Deserialize)]
struct GitLabKey {
    id: u64,
    title: String,
    key: String,
}

#[derive(Debug, Deserialize)]
struct GitLabMember {
    username: String,
}

#[derive(Debug, Deserialize)]
struct GitLabVersion {
    version: String,
}

fn private_visibility() -> String {
    "private".to_string()
}

impl From<GitLabUser> for SourceUser {
    fn from(user: GitLabUser) -> Self {
        let email = user
            .email
            .filter(|e| !e.is_empty())
            .or(user.public_email.filter(|e| !e.is_empty()));
        Self {
            id: user.id,
            username: user.username,
            name: user.name,
            email,
            state: user.state,
        }
    }
}

impl From<GitLabGroup> for SourceGroup {
    fn from(group: GitLabGroup) -> Self {
        let parent_path = group
            .full_path
            .rsplit_once('/')
            .map(|(parent, _)| parent.to_string());
        Self {
            id: group.id,
            name: group.name,
            description: group.description.filter(|d| !d.is_empty()),
            visibility: Visibility::from_gitlab(&group.visibility),
            parent_path,
            full_path: group.full_path,
            members: Vec::new(),
        }
    }
}

impl From<GitLabProject> for SourceProject {
    fn from(project: GitLabProject) -> Self {
        let kind = match project.namespace.kind.as_str() {
            "group" => NamespaceKind::Group,
            _ => NamespaceKind::User,
        };
        Self {
            id: project.id,
            path_with_namespace: project.path_with_namespace,
            name: project.name,
            path: project.path,
            description: project.description.filter(|d| !d.is_empty()),
            visibility: Visibility::from_gitlab(&project.visibility),
            namespace: SourceNamespace {
                kind,
                full_path: project.namespace.full_path,
            },
            http_url_to_repo: project.http_url_to_repo,
            ssh_url_to_repo: project.ssh_url_to_repo,
            wiki_enabled: project.wiki_enabled,
        }
    }
}

/// Client for a GitLab instance.
#[derive(Debug, Clone)]
pub struct GitLabClient {
    client: Client,
    base_url: String,
    token: String,
}

impl GitLabClient {
    /// Create a new GitLab client.
    ///
    /// # Arguments
    ///
    /// * `base_url` - GitLab instance URL (e.g., "https://gitlab.com")
    /// * `token` - Personal access token with admin read access
    pub fn new(base_url: &str, token: impl Into<String>) -> Result<Self> {
        url::Url::parse(base_url)
            .map_err(|e| MigrationError::InvalidConfig(format!("gitlab url: {e}")))?;

        let client = Client::builder()
            .user_agent("glfj-migrate")
            .timeout(std::time::Duration::from_secs(30))
            .build()
            .map_err(|e| MigrationError::Transport(e.to_string()))?;

        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            token: token.into(),
        })
    }

    async fn get<T: DeserializeOwned>(&self, path: &str) -> Result<(T, HeaderMap)> {
        let url = format!("{}/api/v4{path}", self.base_url);
        debug!(url = %url, "GitLab GET");

        let response = self
            .client
            .get(&url)
            .header("PRIVATE-TOKEN", &self.token)
            .send()
            .await
            .map_err(|e| MigrationError::Transport(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let retry_after = parse_retry_after(response.headers());
            let body = response.text().await.unwrap_or_default();
            return Err(MigrationError::from_status(
                status.as_u16(),
                retry_after,
                format!("GitLab {path}: {body}"),
            ));
        }

        let headers = response.headers().clone();
        let bytes = response
            .bytes()
            .await
            .map_err(|e| MigrationError::Transport(e.to_string()))?;
        Ok((serde_json::from_slice(&bytes)?, headers))
    }

    async fn get_page<T: DeserializeOwned>(
        &self,
        path: &str,
        page: u32,
        per_page: u32,
    ) -> Result<Page<T>> {
        let separator = if path.contains('?') { '&' } else { '?' };
        let paginated_path = format!("{path}{separator}page={page}&per_page={per_page}");
        let (items, headers): (Vec<T>, _) = self.get(&paginated_path).await?;

        // X-Next-Page is empty on the last page. Some proxies strip it, in
        // which case a full page means there may be more.
        let next_page = match headers.get("x-next-page").and_then(|v| v.to_str().ok()) {
            Some(value) => value.trim().parse::<u32>().ok(),
            None if items.len() as u32 >= per_page && !items.is_empty() => Some(page + 1),
            None => None,
        };

        Ok(Page { items, next_page })
    }

    async fn get_all<T: DeserializeOwned>(&self, path: &str) -> Result<Vec<T>> {
        let mut all_items = Vec::new();
        let mut page = 1;

        loop {
            let Page { items, next_page } = self.get_page(path, page, 100).await?;
            all_items.extend(items);
            match next_page {
                Some(next) if next > page => page = next,
                _ => break,
            }
        }

        Ok(all_items)
    }
}

#[async_trait]
impl SourceApi for GitLabClient {
    async fn version(&self) -> Result<String> {
        let (version, _): (GitLabVersion, _) = self.get("/version").await?;
        Ok(version.version)
    }

    async fn list_users(&self, page: u32, per_page: u32) -> Result<Page<SourceUser>> {
        let page: Page<GitLabUser> = self
            .get_page("/users?order_by=id&sort=asc", page, per_page)
            .await?;
        Ok(Page {
            items: page.items.into_iter().map(Into::into).collect(),
            next_page: page.next_page,
        })
    }

    async fn list_groups(&self, page: u32, per_page: u32) -> Result<Page<SourceGroup>> {
        let page: Page<GitLabGroup> = self
            .get_page("/groups?all_available=true&order_by=id&sort=asc", page, per_page)
            .await?;
        Ok(Page {
            items: page.items.into_iter().map(Into::into).collect(),
            next_page: page.next_page,
        })
    }

    async fn list_projects(&self, page: u32, per_page: u32) -> Result<Page<SourceProject>> {
        let page: Page<GitLabProject> = self
            .get_page("/projects?order_by=id&sort=asc", page, per_page)
            .await?;
        Ok(Page {
            items: page.items.into_iter().map(Into::into).collect(),
            next_page: page.next_page,
        })
    }

    async fn list_user_keys(&self, user: &SourceUser) -> Result<Vec<SourceSshKey>> {
        let keys: Vec<GitLabKey> = self.get_all(&format!("/users/{}/keys", user.id)).await?;
        Ok(keys
            .into_iter()
            .map(|k| SourceSshKey {
                id: k.id,
                username: user.username.clone(),
                title: k.title,
                key: k.key,
            })
            .collect())
    }

    async fn list_group_members(&self, group: &SourceGroup) -> Result<Vec<String>> {
        let members: Vec<GitLabMember> = self
            .get_all(&format!("/groups/{}/members", group.id))
            .await?;
        Ok(members.into_iter().map(|m| m.username).collect())
    }
}
