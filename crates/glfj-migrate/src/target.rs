//! Mutating view of the target platform.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::Result;

/// Request body for `POST /admin/users`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CreateUserOption {
    pub username: String,
    pub email: String,
    pub full_name: String,
    pub password: String,
    pub must_change_password: bool,
    pub send_notify: bool,
    pub source_id: u64,
    pub login_name: String,
}

/// Request body for `POST /orgs`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CreateOrgOption {
    pub username: String,
    pub full_name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    pub visibility: String,
}

/// Request body for `POST /repos/migrate`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MigrateRepoOption {
    pub clone_addr: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub auth_username: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub auth_password: Option<String>,
    pub repo_owner: String,
    pub repo_name: String,
    pub mirror: bool,
    pub private: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    pub service: String,
}

/// Request body for `POST /admin/users/{username}/keys`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CreateKeyOption {
    pub title: String,
    pub key: String,
    pub read_only: bool,
}

/// A Forgejo user.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TargetUser {
    pub id: u64,
    pub login: String,
}

/// A Forgejo organization.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TargetOrg {
    pub id: u64,
    pub name: String,
}

/// A Forgejo repository.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TargetRepo {
    pub id: u64,
    pub full_name: String,
}

/// A Forgejo public key.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TargetKey {
    pub id: u64,
    pub title: String,
    pub key: String,
}

/// A Forgejo organization team.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TargetTeam {
    pub id: u64,
    pub name: String,
}

/// Lookup and create operations against the target platform.
///
/// Lookups return `Ok(None)` when the entity does not exist.
#[async_trait]
pub trait TargetApi: Send + Sync {
    /// Server version string, used for connectivity checks.
    async fn version(&self) -> Result<String>;

    async fn get_user(&self, username: &str) -> Result<Option<TargetUser>>;

    async fn create_user(&self, request: &CreateUserOption) -> Result<TargetUser>;

    async fn get_org(&self, name: &str) -> Result<Option<TargetOrg>>;

    async fn create_org(&self, request: &CreateOrgOption) -> Result<TargetOrg>;

    async fn get_repo(&self, owner: &str, repo: &str) -> Result<Option<TargetRepo>>;

    /// Create a repository by cloning from a remote URL.
    async fn migrate_repo(&self, request: &MigrateRepoOption) -> Result<TargetRepo>;

    async fn list_user_keys(&self, username: &str) -> Result<Vec<TargetKey>>;

    async fn create_user_key(&self, username: &str, request: &CreateKeyOption)
        -> Result<TargetKey>;

    async fn list_org_teams(&self, org: &str) -> Result<Vec<TargetTeam>>;

    /// Logins of the members of a team.
    async fn list_team_members(&self, team_id: u64) -> Result<Vec<String>>;

    async fn add_team_member(&self, team_id: u64, username: &str) -> Result<()>;
}
