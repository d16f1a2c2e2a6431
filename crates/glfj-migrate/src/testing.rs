//! In-memory GitLab and Forgejo doubles for unit tests.

use std::collections::{BTreeMap, HashSet};
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio_util::sync::CancellationToken;

use crate::error::{MigrationError, Result};
use crate::source::{Page, SourceApi};
use crate::target::{
    CreateKeyOption, CreateOrgOption, CreateUserOption, MigrateRepoOption, TargetApi, TargetKey,
    TargetOrg, TargetRepo, TargetTeam, TargetUser,
};
use crate::types::{
    EntityKind, NamespaceKind, SourceEntity, SourceGroup, SourceNamespace, SourceProject,
    SourceSshKey, SourceUser, SourceWiki, Visibility,
};

/// Builder for the content of a fake GitLab instance.
#[derive(Debug, Clone, Default)]
pub struct SourceFixture {
    next_id: u64,
    users: Vec<SourceUser>,
    groups: Vec<SourceGroup>,
    projects: Vec<SourceProject>,
    keys: Vec<SourceSshKey>,
}

impl SourceFixture {
    pub fn new() -> Self {
        Self::default()
    }

    fn id(&mut self) -> u64 {
        self.next_id += 1;
        self.next_id
    }

    pub fn user(mut self, username: &str) -> Self {
        let id = self.id();
        self.users.push(SourceUser {
            id,
            username: username.to_string(),
            name: username.to_uppercase(),
            email: None,
            state: "active".to_string(),
        });
        self
    }

    pub fn group(mut self, full_path: &str, members: &[&str]) -> Self {
        let id = self.id();
        self.groups.push(SourceGroup {
            id,
            full_path: full_path.to_string(),
            name: full_path.rsplit('/').next().unwrap_or(full_path).to_string(),
            description: Some(format!("{full_path} group")),
            visibility: Visibility::Internal,
            parent_path: full_path.rsplit_once('/').map(|(p, _)| p.to_string()),
            members: members.iter().map(|m| m.to_string()).collect(),
        });
        self
    }

    pub fn user_project(self, owner: &str, path: &str, wiki_enabled: bool) -> Self {
        self.project(NamespaceKind::User, owner, path, wiki_enabled)
    }

    pub fn group_project(self, group: &str, path: &str, wiki_enabled: bool) -> Self {
        self.project(NamespaceKind::Group, group, path, wiki_enabled)
    }

    fn project(
        mut self,
        kind: NamespaceKind,
        namespace: &str,
        path: &str,
        wiki_enabled: bool,
    ) -> Self {
        let id = self.id();
        let full = format!("{namespace}/{path}");
        self.projects.push(SourceProject {
            id,
            path_with_namespace: full.clone(),
            name: path.to_string(),
            path: path.to_string(),
            description: None,
            visibility: Visibility::Private,
            namespace: SourceNamespace {
                kind,
                full_path: namespace.to_string(),
            },
            http_url_to_repo: format!("https://gitlab.test/{full}.git"),
            ssh_url_to_repo: format!("git@gitlab.test:{full}.git"),
            wiki_enabled,
        });
        self
    }

    pub fn ssh_key(mut self, username: &str, title: &str) -> Self {
        let id = self.id();
        self.keys.push(SourceSshKey {
            id,
            username: username.to_string(),
            title: title.to_string(),
            key: format!("ssh-ed25519 AAAA{id} {username}@{title}"),
        });
        self
    }

    /// Look up a fixture entity by natural key.
    pub fn entity(&self, kind: EntityKind, key: &str) -> SourceEntity {
        let all: Vec<SourceEntity> = match kind {
            EntityKind::User => self.users.iter().cloned().map(SourceEntity::User).collect(),
            EntityKind::Group => self.groups.iter().cloned().map(SourceEntity::Group).collect(),
            EntityKind::Project => self
                .projects
                .iter()
                .cloned()
                .map(SourceEntity::Project)
                .collect(),
            EntityKind::Wiki => self
                .projects
                .iter()
                .map(|p| SourceEntity::Wiki(SourceWiki::from_project(p)))
                .collect(),
            EntityKind::SshKey => self.keys.iter().cloned().map(SourceEntity::SshKey).collect(),
        };
        all.into_iter()
            .find(|e| e.natural_key() == key)
            .unwrap_or_else(|| panic!("no {kind} '{key}' in fixture"))
    }
}

fn page_of<T: Clone>(items: &[T], page: u32, per_page: u32) -> Page<T> {
    let start = ((page.max(1) - 1) * per_page) as usize;
    let end = (start + per_page as usize).min(items.len());
    let slice = items.get(start..end).unwrap_or_default().to_vec();
    let next_page = (end < items.len()).then_some(page + 1);
    Page {
        items: slice,
        next_page,
    }
}

/// Fake GitLab serving a [`SourceFixture`].
pub struct FakeSource {
    fixture: SourceFixture,
    failing_pages: Mutex<HashSet<(EntityKind, u32)>>,
}

impl FakeSource {
    pub fn new(fixture: SourceFixture) -> Self {
        Self {
            fixture,
            failing_pages: Mutex::new(HashSet::new()),
        }
    }

    /// Make every fetch of `page` of the users, groups or projects listing fail.
    pub fn fail_page(&self, listing: EntityKind, page: u32) {
        self.failing_pages.lock().insert((listing, page));
    }

    fn check(&self, listing: EntityKind, page: u32) -> Result<()> {
        if self.failing_pages.lock().contains(&(listing, page)) {
            return Err(MigrationError::Transport(format!(
                "connection reset reading {listing} page {page}"
            )));
        }
        Ok(())
    }
}

#[async_trait]
impl SourceApi for FakeSource {
    async fn version(&self) -> Result<String> {
        Ok("16.11.0-fake".to_string())
    }

    async fn list_users(&self, page: u32, per_page: u32) -> Result<Page<SourceUser>> {
        self.check(EntityKind::User, page)?;
        Ok(page_of(&self.fixture.users, page, per_page))
    }

    async fn list_groups(&self, page: u32, per_page: u32) -> Result<Page<SourceGroup>> {
        self.check(EntityKind::Group, page)?;
        let mut page = page_of(&self.fixture.groups, page, per_page);
        for group in &mut page.items {
            group.members.clear();
        }
        Ok(page)
    }

    async fn list_projects(&self, page: u32, per_page: u32) -> Result<Page<SourceProject>> {
        self.check(EntityKind::Project, page)?;
        Ok(page_of(&self.fixture.projects, page, per_page))
    }

    async fn list_user_keys(&self, user: &SourceUser) -> Result<Vec<SourceSshKey>> {
        Ok(self
            .fixture
            .keys
            .iter()
            .filter(|k| k.username == user.username)
            .cloned()
            .collect())
    }

    async fn list_group_members(&self, group: &SourceGroup) -> Result<Vec<String>> {
        Ok(self
            .fixture
            .groups
            .iter()
            .find(|g| g.id == group.id)
            .map(|g| g.members.clone())
            .unwrap_or_default())
    }
}

#[derive(Default)]
struct ForgejoState {
    next_id: u64,
    users: BTreeMap<String, (TargetUser, Option<CreateUserOption>)>,
    orgs: BTreeMap<String, (TargetOrg, CreateOrgOption)>,
    repos: BTreeMap<String, (TargetRepo, MigrateRepoOption)>,
    keys: BTreeMap<String, Vec<TargetKey>>,
    teams: BTreeMap<String, Vec<TargetTeam>>,
    team_members: BTreeMap<u64, Vec<String>>,
    creates: Vec<String>,
    rejected: HashSet<String>,
    create_attempts: usize,
    rate_limit: Option<(usize, Duration)>,
    lost_response: Option<usize>,
    cancel_after: Option<(usize, CancellationToken)>,
}

impl ForgejoState {
    fn id(&mut self) -> u64 {
        self.next_id += 1;
        self.next_id
    }

    /// Common bookkeeping before a create call.
    fn begin_create(&mut self, name: &str) -> Result<()> {
        self.create_attempts += 1;
        if let Some((nth, retry_after)) = self.rate_limit {
            if self.create_attempts == nth {
                return Err(MigrationError::RateLimited {
                    retry_after: Some(retry_after),
                });
            }
        }
        if self.rejected.contains(name) {
            return Err(MigrationError::Validation {
                status: 422,
                message: format!("'{name}' rejected"),
            });
        }
        Ok(())
    }

    /// Bookkeeping after the entity was stored.
    fn finish_create(&mut self, call: String) -> Result<()> {
        self.creates.push(call);
        if let Some((after, token)) = &self.cancel_after {
            if self.creates.len() >= *after {
                token.cancel();
            }
        }
        if self.lost_response == Some(self.create_attempts) {
            return Err(MigrationError::Transport("operation timed out".into()));
        }
        Ok(())
    }

    fn owner_exists(&self, owner: &str) -> bool {
        self.users.contains_key(owner) || self.orgs.contains_key(owner)
    }
}

/// Fake Forgejo keeping everything in memory.
#[derive(Default)]
pub struct FakeForgejo {
    state: Mutex<ForgejoState>,
}

impl FakeForgejo {
    pub fn new() -> Self {
        Self::default()
    }

    /// Pre-existing user, not counted as a create.
    pub fn with_user(self, login: &str) -> Self {
        {
            let mut state = self.state.lock();
            let id = state.id();
            state.users.insert(
                login.to_string(),
                (
                    TargetUser {
                        id,
                        login: login.to_string(),
                    },
                    None,
                ),
            );
        }
        self
    }

    /// Reject creates of the entity with this target name.
    pub fn reject(&self, name: &str) {
        self.state.lock().rejected.insert(name.to_string());
    }

    /// Answer the `nth` create attempt (1-based) with HTTP 429.
    pub fn rate_limit_create(&self, nth: usize, retry_after: Duration) {
        self.state.lock().rate_limit = Some((nth, retry_after));
    }

    /// Store the `nth` create (1-based) but answer it with a timeout.
    pub fn lose_create_response(&self, nth: usize) {
        self.state.lock().lost_response = Some(nth);
    }

    /// Cancel `token` once `count` creates succeeded.
    pub fn cancel_after_creates(&self, count: usize, token: CancellationToken) {
        self.state.lock().cancel_after = Some((count, token));
    }

    /// Successful create calls, in order.
    pub fn creates(&self) -> Vec<String> {
        self.state.lock().creates.clone()
    }

    pub fn user_request(&self, login: &str) -> Option<CreateUserOption> {
        self.state.lock().users.get(login).and_then(|(_, r)| r.clone())
    }

    pub fn org_request(&self, name: &str) -> Option<CreateOrgOption> {
        self.state.lock().orgs.get(name).map(|(_, r)| r.clone())
    }

    pub fn repo_request(&self, full_name: &str) -> Option<MigrateRepoOption> {
        self.state.lock().repos.get(full_name).map(|(_, r)| r.clone())
    }

    /// Members of the first team of `org`.
    pub fn team_members(&self, org: &str) -> Vec<String> {
        let state = self.state.lock();
        state
            .teams
            .get(org)
            .and_then(|teams| teams.first())
            .and_then(|team| state.team_members.get(&team.id))
            .cloned()
            .unwrap_or_default()
    }
}

fn not_found(what: &str) -> MigrationError {
    MigrationError::Api {
        status: 404,
        message: format!("{what} does not exist"),
    }
}

#[async_trait]
impl TargetApi for FakeForgejo {
    async fn version(&self) -> Result<String> {
        Ok("9.0.0+gitea-1.22.0".to_string())
    }

    async fn get_user(&self, username: &str) -> Result<Option<TargetUser>> {
        Ok(self.state.lock().users.get(username).map(|(u, _)| u.clone()))
    }

    async fn create_user(&self, request: &CreateUserOption) -> Result<TargetUser> {
        let mut state = self.state.lock();
        state.begin_create(&request.username)?;
        if state.owner_exists(&request.username) {
            return Err(MigrationError::Validation {
                status: 422,
                message: "user already exists".into(),
            });
        }
        let user = TargetUser {
            id: state.id(),
            login: request.username.clone(),
        };
        state
            .users
            .insert(user.login.clone(), (user.clone(), Some(request.clone())));
        state.finish_create(format!("create_user {}", user.login))?;
        Ok(user)
    }

    async fn get_org(&self, name: &str) -> Result<Option<TargetOrg>> {
        Ok(self.state.lock().orgs.get(name).map(|(o, _)| o.clone()))
    }

    async fn create_org(&self, request: &CreateOrgOption) -> Result<TargetOrg> {
        let mut state = self.state.lock();
        state.begin_create(&request.username)?;
        if state.owner_exists(&request.username) {
            return Err(MigrationError::Validation {
                status: 422,
                message: "name already taken".into(),
            });
        }
        let org = TargetOrg {
            id: state.id(),
            name: request.username.clone(),
        };
        let team = TargetTeam {
            id: state.id(),
            name: "Owners".to_string(),
        };
        state.team_members.insert(team.id, Vec::new());
        state.teams.insert(org.name.clone(), vec![team]);
        state
            .orgs
            .insert(org.name.clone(), (org.clone(), request.clone()));
        state.finish_create(format!("create_org {}", org.name))?;
        Ok(org)
    }

    async fn get_repo(&self, owner: &str, repo: &str) -> Result<Option<TargetRepo>> {
        Ok(self
            .state
            .lock()
            .repos
            .get(&format!("{owner}/{repo}"))
            .map(|(r, _)| r.clone()))
    }

    async fn migrate_repo(&self, request: &MigrateRepoOption) -> Result<TargetRepo> {
        let mut state = self.state.lock();
        state.begin_create(&request.repo_name)?;
        if !state.owner_exists(&request.repo_owner) {
            return Err(MigrationError::Validation {
                status: 422,
                message: format!("owner '{}' does not exist", request.repo_owner),
            });
        }
        let repo = TargetRepo {
            id: state.id(),
            full_name: format!("{}/{}", request.repo_owner, request.repo_name),
        };
        state
            .repos
            .insert(repo.full_name.clone(), (repo.clone(), request.clone()));
        state.finish_create(format!("migrate_repo {}", repo.full_name))?;
        Ok(repo)
    }

    async fn list_user_keys(&self, username: &str) -> Result<Vec<TargetKey>> {
        let state = self.state.lock();
        if !state.users.contains_key(username) {
            return Err(not_found("user"));
        }
        Ok(state.keys.get(username).cloned().unwrap_or_default())
    }

    async fn create_user_key(
        &self,
        username: &str,
        request: &CreateKeyOption,
    ) -> Result<TargetKey> {
        let mut state = self.state.lock();
        state.begin_create(&request.title)?;
        if !state.users.contains_key(username) {
            return Err(not_found("user"));
        }
        let key = TargetKey {
            id: state.id(),
            title: request.title.clone(),
            key: request.key.clone(),
        };
        state
            .keys
            .entry(username.to_string())
            .or_default()
            .push(key.clone());
        state.finish_create(format!("create_user_key {username}/{}", key.title))?;
        Ok(key)
    }

    async fn list_org_teams(&self, org: &str) -> Result<Vec<TargetTeam>> {
        self.state
            .lock()
            .teams
            .get(org)
            .cloned()
            .ok_or_else(|| not_found("organization"))
    }

    async fn list_team_members(&self, team_id: u64) -> Result<Vec<String>> {
        self.state
            .lock()
            .team_members
            .get(&team_id)
            .cloned()
            .ok_or_else(|| not_found("team"))
    }

    async fn add_team_member(&self, team_id: u64, username: &str) -> Result<()> {
        let mut state = self.state.lock();
        if !state.users.contains_key(username) {
            return Err(not_found("user"));
        }
        let members = state
            .team_members
            .get_mut(&team_id)
            .ok_or_else(|| not_found("team"))?;
        if !members.iter().any(|m| m == username) {
            members.push(username.to_string());
        }
        Ok(())
    }
}
