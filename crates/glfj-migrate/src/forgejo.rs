//! Forgejo REST API (v1) client.

use async_trait::async_trait;
use reqwest::{Client, Method, RequestBuilder, Response, StatusCode};
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use tracing::debug;

use crate::error::{MigrationError, Result};
use crate::retry::parse_retry_after;
use crate::target::{
    CreateKeyOption, CreateOrgOption, CreateUserOption, MigrateRepoOption, TargetApi, TargetKey,
    TargetOrg, TargetRepo, TargetTeam, TargetUser,
};

#[derive(Debug, Deserialize)]
struct ServerVersion {
    version: String,
}

/// Items requested per page from list endpoints.
const PAGE_LIMIT: usize = 50;

/// Read a JSON body. A body that does not match the expected shape is not
/// worth retrying, so it maps to [`MigrationError::JsonError`].
async fn decode<T: DeserializeOwned>(response: Response) -> Result<T> {
    let bytes = response
        .bytes()
        .await
        .map_err(|e| MigrationError::Transport(e.to_string()))?;
    Ok(serde_json::from_slice(&bytes)?)
}

/// Client for a Forgejo instance.
#[derive(Debug, Clone)]
pub struct ForgejoClient {
    client: Client,
    base_url: String,
    token: String,
}

impl ForgejoClient {
    /// Create a new Forgejo client.
    pub fn new(base_url: &str, token: impl Into<String>) -> Result<Self> {
        url::Url::parse(base_url)
            .map_err(|e| MigrationError::InvalidConfig(format!("forgejo url: {e}")))?;

        // Repository migrations clone synchronously on the server side.
        let client = Client::builder()
            .user_agent("glfj-migrate")
            .timeout(std::time::Duration::from_secs(600))
            .build()
            .map_err(|e| MigrationError::Transport(e.to_string()))?;

        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            token: token.into(),
        })
    }

    fn request(&self, method: Method, path: &str) -> RequestBuilder {
        let url = format!("{}/api/v1{path}", self.base_url);
        debug!(method = %method, url = %url, "Forgejo request");
        self.client
            .request(method, url)
            .header("Authorization", format!("token {}", self.token))
    }

    async fn send(&self, request: RequestBuilder, path: &str) -> Result<Response> {
        let response = request
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
                format!("Forgejo {path}: {body}"),
            ));
        }

        Ok(response)
    }

    /// Make a GET request.
    async fn get<T: DeserializeOwned>(&self, path: &str) -> Result<T> {
        let response = self.send(self.request(Method::GET, path), path).await?;
        decode(response).await
    }

    /// GET every page of a list endpoint, stopping at the first short page.
    async fn get_all<T: DeserializeOwned>(&self, path: &str) -> Result<Vec<T>> {
        let mut all_items = Vec::new();
        let mut page = 1;

        loop {
            let items: Vec<T> = self
                .get(&format!("{path}?page={page}&limit={PAGE_LIMIT}"))
                .await?;
            let last = items.len() < PAGE_LIMIT;
            all_items.extend(items);
            if last {
                break;
            }
            page += 1;
        }

        Ok(all_items)
    }

    /// GET that maps 404 to `None`.
    async fn lookup<T: DeserializeOwned>(&self, path: &str) -> Result<Option<T>> {
        match self.get(path).await {
            Ok(value) => Ok(Some(value)),
            Err(MigrationError::Api { status, .. }) if status == StatusCode::NOT_FOUND.as_u16() => {
                Ok(None)
            }
            Err(e) => Err(e),
        }
    }

    /// Make a POST request.
    async fn post<T: DeserializeOwned, B: Serialize>(&self, path: &str, body: &B) -> Result<T> {
        let response = self
            .send(self.request(Method::POST, path).json(body), path)
            .await?;
        decode(response).await
    }

    /// Make a PUT request without a body.
    async fn put(&self, path: &str) -> Result<()> {
        self.send(self.request(Method::PUT, path), path).await?;
        Ok(())
    }
}

#[async_trait]
impl TargetApi for ForgejoClient {
    async fn version(&self) -> Result<String> {
        let version: ServerVersion = self.get("/version").await?;
        Ok(version.version)
    }

    async fn get_user(&self, username: &str) -> Result<Option<TargetUser>> {
        self.lookup(&format!("/users/{username}")).await
    }

    async fn create_user(&self, request: &CreateUserOption) -> Result<TargetUser> {
        self.post("/admin/users", request).await
    }

    async fn get_org(&self, name: &str) -> Result<Option<TargetOrg>> {
        self.lookup(&format!("/orgs/{name}")).await
    }

    async fn create_org(&self, request: &CreateOrgOption) -> Result<TargetOrg> {
        self.post("/orgs", request).await
    }

    async fn get_repo(&self, owner: &str, repo: &str) -> Result<Option<TargetRepo>> {
        self.lookup(&format!("/repos/{owner}/{repo}")).await
    }

    async fn migrate_repo(&self, request: &MigrateRepoOption) -> Result<TargetRepo> {
        self.post("/repos/migrate", request).await
    }

    async fn list_user_keys(&self, username: &str) -> Result<Vec<TargetKey>> {
        self.get_all(&format!("/users/{username}/keys")).await
    }

    async fn create_user_key(
        &self,
        username: &str,
        request: &CreateKeyOption,
    ) -> Result<TargetKey> {
        self.post(&format!("/admin/users/{username}/keys"), request)
            .await
    }

    async fn list_org_teams(&self, org: &str) -> Result<Vec<TargetTeam>> {
        self.get_all(&format!("/orgs/{org}/teams")).await
    }

    async fn list_team_members(&self, team_id: u64) -> Result<Vec<String>> {
        let members: Vec<TargetUser> = self.get_all(&format!("/teams/{team_id}/members")).await?;
        Ok(members.into_iter().map(|m| m.login).collect())
    }

    async fn add_team_member(&self, team_id: u64, username: &str) -> Result<()> {
        self.put(&format!("/teams/{team_id}/members/{username}"))
            .await
    }
}
