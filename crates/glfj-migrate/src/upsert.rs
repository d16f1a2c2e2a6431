//! Idempotent create-or-match of a single entity on the target.
//!
//! Each entity walks the states
//! `Pending -> ResolvingDependencies -> CheckingExistence -> {Creating | AlreadyExists} -> Recorded`,
//! with `Failed` absorbing. Only invariant violations escape as `Err`;
//! everything else ends up in the returned [`MigrationRecord`].

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tracing::{debug, info, warn};

use crate::error::{MigrationError, Result};
use crate::mapper::IdentityMapper;
use crate::naming::{clean_name, org_name, placeholder_email, repo_name, temporary_password};
use crate::retry::RetryPolicy;
use crate::target::{
    CreateKeyOption, CreateOrgOption, CreateUserOption, MigrateRepoOption, TargetApi,
};
use crate::types::{
    EntityKind, MigrationConfig, MigrationOptions, MigrationRecord, Outcome, SourceEntity,
    SourceGroup, SourceProject, SourceSshKey, SourceUser, SourceWiki, TargetId, TargetRef,
};

/// Reason attached to entities of kinds that were only hydrated.
pub const NOT_SELECTED: &str = "not selected";

/// Per-entity processing state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpsertState {
    Pending,
    ResolvingDependencies,
    CheckingExistence,
    Creating,
    AlreadyExists,
    Recorded,
    Failed,
}

/// Settings the upserter needs from the run.
#[derive(Debug, Clone, Default)]
pub struct UpsertOptions {
    /// Skip create calls and hand out planned refs.
    pub dry_run: bool,
    /// Ask Forgejo to e-mail created users.
    pub notify_users: bool,
    /// Retry policy for target calls.
    pub retry: RetryPolicy,
    /// GitLab account Forgejo clones with; SSH clone URLs are used without one.
    pub clone_credentials: Option<(String, String)>,
    /// Target user that adopts projects whose namespace is gone.
    pub orphan_owner: Option<String>,
}

impl UpsertOptions {
    /// Derive upsert settings from the run configuration.
    pub fn from_run(config: &MigrationConfig, options: &MigrationOptions) -> Self {
        Self {
            dry_run: options.dry_run,
            notify_users: options.notify_users,
            retry: options.retry.clone(),
            clone_credentials: config
                .clone_credentials()
                .map(|(user, pass)| (user.to_string(), pass.to_string())),
            orphan_owner: config.orphan_owner().map(str::to_string),
        }
    }
}

/// A translated entity, ready for the target.
#[derive(Debug, Clone)]
enum Action {
    User(CreateUserOption),
    Group {
        request: CreateOrgOption,
        members: Vec<String>,
    },
    Repo {
        request: MigrateRepoOption,
        owner_planned: bool,
    },
    SshKey {
        username: String,
        request: CreateKeyOption,
        owner_planned: bool,
    },
}

impl Action {
    /// Natural key on the target.
    fn target_name(&self) -> String {
        match self {
            Self::User(request) => request.username.clone(),
            Self::Group { request, .. } => request.username.clone(),
            Self::Repo { request, .. } => format!("{}/{}", request.repo_owner, request.repo_name),
            Self::SshKey {
                username, request, ..
            } => format!("{username}/{}", request.title),
        }
    }
}

enum Translation {
    Ready(Action),
    Skip(String),
}

/// Creates or matches entities on the target and records their refs.
pub struct Upserter {
    target: Arc<dyn TargetApi>,
    mapper: Arc<IdentityMapper>,
    options: UpsertOptions,
}

impl Upserter {
    /// Create an upserter writing into `mapper`.
    pub fn new(
        target: Arc<dyn TargetApi>,
        mapper: Arc<IdentityMapper>,
        options: UpsertOptions,
    ) -> Self {
        Self {
            target,
            mapper,
            options,
        }
    }

    /// Create or match `entity` on the target.
    pub async fn upsert(&self, entity: &SourceEntity) -> Result<MigrationRecord> {
        self.upsert_with(entity, Vec::new()).await
    }

    /// Like [`Upserter::upsert`], starting from warnings gathered upstream.
    pub async fn upsert_with(
        &self,
        entity: &SourceEntity,
        mut warnings: Vec<String>,
    ) -> Result<MigrationRecord> {
        let kind = entity.kind();
        let key = entity.natural_key();
        let mut state = UpsertState::Pending;

        self.advance(&mut state, UpsertState::ResolvingDependencies, kind, &key);
        let action = match self.translate(entity, true, &mut warnings) {
            Ok(Translation::Ready(action)) => action,
            Ok(Translation::Skip(reason)) => {
                self.mapper.mark_unavailable(kind, &key, reason.clone());
                return Ok(MigrationRecord::new(kind, key, Outcome::Skipped { reason }, None)
                    .with_warnings(warnings));
            }
            Err(e) => return self.fail(&mut state, kind, key, "resolving dependencies", e, warnings),
        };

        self.advance(&mut state, UpsertState::CheckingExistence, kind, &key);
        let existing = match self.lookup(&action).await {
            Ok(existing) => existing,
            Err(e) => return self.fail(&mut state, kind, key, "existence check", e, warnings),
        };

        let (outcome, target) = match existing {
            Some(target) => {
                self.advance(&mut state, UpsertState::AlreadyExists, kind, &key);
                (Outcome::AlreadyExists, target)
            }
            None => {
                self.advance(&mut state, UpsertState::Creating, kind, &key);
                match self.create(&action).await {
                    Ok(target) => (Outcome::Created, target),
                    Err(e) => return self.fail(&mut state, kind, key, "create", e, warnings),
                }
            }
        };

        self.mapper.record(kind, &key, target.clone())?;
        self.advance(&mut state, UpsertState::Recorded, kind, &key);

        if let Action::Group { members, .. } = &action {
            self.reconcile_members(&target, members, &mut warnings).await;
        }

        match outcome {
            Outcome::Created if self.options.dry_run => {
                info!(kind = %kind, key = %key, target = %target.name, "Would create")
            }
            Outcome::Created => info!(kind = %kind, key = %key, target = %target, "Created"),
            _ => debug!(kind = %kind, key = %key, target = %target, "Already exists"),
        }

        Ok(MigrationRecord::new(kind, key, outcome, Some(target)).with_warnings(warnings))
    }

    /// Resolve the target ref of an entity whose kind was not selected.
    ///
    /// Only existence checks are made. The record is always `Skipped`; it
    /// carries the target ref when the entity already exists on the target.
    pub async fn hydrate(&self, entity: &SourceEntity) -> Result<MigrationRecord> {
        let kind = entity.kind();
        let key = entity.natural_key();
        let mut warnings = Vec::new();

        let action = match self.translate(entity, false, &mut warnings) {
            Ok(Translation::Ready(action)) => action,
            Ok(Translation::Skip(reason)) => {
                self.mapper.mark_unavailable(kind, &key, reason.clone());
                return Ok(self.not_selected(kind, key, None, warnings));
            }
            Err(e) if e.is_fatal() => return Err(e),
            Err(e) => {
                self.mapper.mark_unavailable(kind, &key, e.to_string());
                return Ok(self.not_selected(kind, key, None, warnings));
            }
        };

        match self.lookup(&action).await {
            Ok(Some(target)) => {
                self.mapper.record(kind, &key, target.clone())?;
                Ok(self.not_selected(kind, key, Some(target), warnings))
            }
            Ok(None) => {
                self.mapper
                    .mark_unavailable(kind, &key, "not selected and absent on target");
                Ok(self.not_selected(kind, key, None, warnings))
            }
            Err(e) => {
                warnings.push(format!("existence check failed: {e}"));
                self.mapper.mark_unavailable(kind, &key, e.to_string());
                Ok(self.not_selected(kind, key, None, warnings))
            }
        }
    }

    fn not_selected(
        &self,
        kind: EntityKind,
        key: String,
        target: Option<TargetRef>,
        warnings: Vec<String>,
    ) -> MigrationRecord {
        let outcome = Outcome::Skipped {
            reason: NOT_SELECTED.to_string(),
        };
        MigrationRecord::new(kind, key, outcome, target).with_warnings(warnings)
    }

    fn advance(&self, state: &mut UpsertState, next: UpsertState, kind: EntityKind, key: &str) {
        debug!(kind = %kind, key = %key, from = ?*state, to = ?next, "Upsert state");
        *state = next;
    }

    fn fail(
        &self,
        state: &mut UpsertState,
        kind: EntityKind,
        key: String,
        stage: &str,
        error: MigrationError,
        warnings: Vec<String>,
    ) -> Result<MigrationRecord> {
        if error.is_fatal() {
            return Err(error);
        }

        self.advance(state, UpsertState::Failed, kind, &key);
        let reason = format!("{stage} failed: {error}");
        warn!(kind = %kind, key = %key, reason = %reason, "Entity failed");
        self.mapper.mark_unavailable(kind, &key, reason.clone());
        Ok(MigrationRecord::new(kind, key, Outcome::Failed { reason }, None).with_warnings(warnings))
    }

    /// Turn a source entity into a target request, resolving its dependencies.
    ///
    /// `strict` is false while hydrating: a group then does not need its
    /// parent, since only its own name is looked up.
    fn translate(
        &self,
        entity: &SourceEntity,
        strict: bool,
        warnings: &mut Vec<String>,
    ) -> Result<Translation> {
        let dependent = entity.describe();
        match entity {
            SourceEntity::User(user) => Ok(Translation::Ready(self.translate_user(user))),
            SourceEntity::Group(group) => self.translate_group(group, strict, &dependent),
            SourceEntity::Project(project) => self.translate_project(project, &dependent, warnings),
            SourceEntity::Wiki(wiki) => self.translate_wiki(wiki, &dependent, warnings),
            SourceEntity::SshKey(key) => self.translate_key(key, &dependent, warnings),
        }
    }

    fn translate_user(&self, user: &SourceUser) -> Action {
        Action::User(CreateUserOption {
            username: user.username.clone(),
            login_name: user.username.clone(),
            full_name: user.name.clone(),
            email: user
                .email
                .clone()
                .unwrap_or_else(|| placeholder_email(&user.username)),
            password: temporary_password(),
            must_change_password: true,
            send_notify: self.options.notify_users,
            source_id: 0,
        })
    }

    fn translate_group(
        &self,
        group: &SourceGroup,
        strict: bool,
        dependent: &str,
    ) -> Result<Translation> {
        let full_name = match &group.parent_path {
            Some(parent) if strict => {
                match self.mapper.require_resolved(EntityKind::Group, parent, dependent) {
                    Ok(parent_ref) => format!("{} / {}", parent_ref.name, group.name),
                    Err(e) if e.is_fatal() => return Err(e),
                    Err(e) => return Ok(Translation::Skip(format!("parent group {e}"))),
                }
            }
            Some(parent) => format!("{} / {}", org_name(parent), group.name),
            None => group.name.clone(),
        };

        Ok(Translation::Ready(Action::Group {
            request: CreateOrgOption {
                username: org_name(&group.full_path),
                full_name,
                description: group.description.clone(),
                visibility: group.visibility.org_visibility().to_string(),
            },
            members: group.members.clone(),
        }))
    }

    fn translate_project(
        &self,
        project: &SourceProject,
        dependent: &str,
        warnings: &mut Vec<String>,
    ) -> Result<Translation> {
        let namespace_kind = project.namespace.kind.entity_kind();
        let namespace = &project.namespace.full_path;

        let (owner, owner_planned) =
            match self
                .mapper
                .require_resolved(namespace_kind, namespace, dependent)
            {
                Ok(owner) => (owner.name.clone(), owner.id == TargetId::Planned),
                Err(MigrationError::MissingFromSource { .. }) => {
                    match &self.options.orphan_owner {
                        Some(admin) => {
                            warnings.push(format!(
                                "namespace '{namespace}' not found in source; owned by '{admin}'"
                            ));
                            (admin.clone(), false)
                        }
                        None => {
                            return Ok(Translation::Skip(format!(
                                "namespace '{namespace}' not found in source and no target admin configured"
                            )))
                        }
                    }
                }
                Err(e) if e.is_fatal() => return Err(e),
                Err(e) => return Ok(Translation::Skip(format!("namespace {e}"))),
            };

        let (clone_addr, auth_username, auth_password) = self.clone_source(
            &project.http_url_to_repo,
            &project.ssh_url_to_repo,
        );

        Ok(Translation::Ready(Action::Repo {
            request: MigrateRepoOption {
                clone_addr,
                auth_username,
                auth_password,
                repo_owner: owner,
                repo_name: repo_name(&project.path),
                mirror: false,
                private: project.visibility.is_private(),
                description: project.description.clone(),
                service: "git".to_string(),
            },
            owner_planned,
        }))
    }

    fn translate_wiki(
        &self,
        wiki: &SourceWiki,
        dependent: &str,
        warnings: &mut Vec<String>,
    ) -> Result<Translation> {
        let project = match self
            .mapper
            .require_resolved(EntityKind::Project, &wiki.project_path, dependent)
        {
            Ok(project) => project,
            Err(e) if e.is_fatal() => return Err(e),
            Err(e) => {
                warnings.push(format!("wiki has no target project: {e}"));
                return Ok(Translation::Skip(format!("project {e}")));
            }
        };

        let (owner, repo) = project
            .name
            .split_once('/')
            .unwrap_or((project.name.as_str(), project.name.as_str()));
        let (clone_addr, auth_username, auth_password) =
            self.clone_source(&wiki.http_url, &wiki.ssh_url);

        Ok(Translation::Ready(Action::Repo {
            request: MigrateRepoOption {
                clone_addr,
                auth_username,
                auth_password,
                repo_owner: owner.to_string(),
                repo_name: clean_name(&format!("{repo}-wiki")),
                mirror: true,
                private: wiki.visibility.is_private(),
                description: Some(format!("Wiki of {}", wiki.project_path)),
                service: "git".to_string(),
            },
            owner_planned: project.id == TargetId::Planned,
        }))
    }

    fn translate_key(
        &self,
        key: &SourceSshKey,
        dependent: &str,
        warnings: &mut Vec<String>,
    ) -> Result<Translation> {
        let user = match self
            .mapper
            .require_resolved(EntityKind::User, &key.username, dependent)
        {
            Ok(user) => user,
            Err(e) if e.is_fatal() => return Err(e),
            Err(e) => {
                warnings.push(format!("key owner has no target user: {e}"));
                return Ok(Translation::Skip(format!("owner {e}")));
            }
        };

        Ok(Translation::Ready(Action::SshKey {
            username: user.name.clone(),
            request: CreateKeyOption {
                title: key.title.clone(),
                key: key.key.clone(),
                read_only: true,
            },
            owner_planned: user.id == TargetId::Planned,
        }))
    }

    fn clone_source(
        &self,
        http_url: &str,
        ssh_url: &str,
    ) -> (String, Option<String>, Option<String>) {
        match &self.options.clone_credentials {
            Some((user, pass)) => (
                http_url.to_string(),
                Some(user.clone()),
                Some(pass.clone()),
            ),
            None => (ssh_url.to_string(), None, None),
        }
    }

    /// Existence check by target natural key.
    async fn lookup(&self, action: &Action) -> Result<Option<TargetRef>> {
        let retry = &self.options.retry;
        match action {
            Action::User(request) => {
                let user = retry
                    .execute("get_user", || self.target.get_user(&request.username))
                    .await?;
                Ok(user.map(|u| TargetRef::assigned(u.id, u.login)))
            }
            Action::Group { request, .. } => {
                let org = retry
                    .execute("get_org", || self.target.get_org(&request.username))
                    .await?;
                Ok(org.map(|o| TargetRef::assigned(o.id, o.name)))
            }
            Action::Repo {
                owner_planned: true,
                ..
            }
            | Action::SshKey {
                owner_planned: true,
                ..
            } => Ok(None),
            Action::Repo { request, .. } => {
                let repo = retry
                    .execute("get_repo", || {
                        self.target.get_repo(&request.repo_owner, &request.repo_name)
                    })
                    .await?;
                Ok(repo.map(|r| TargetRef::assigned(r.id, r.full_name)))
            }
            Action::SshKey {
                username, request, ..
            } => {
                let keys = retry
                    .execute("list_user_keys", || self.target.list_user_keys(username))
                    .await?;
                Ok(keys
                    .into_iter()
                    .find(|k| k.title == request.title)
                    .map(|k| TargetRef::assigned(k.id, format!("{username}/{}", k.title))))
            }
        }
    }

    /// Create the entity, retrying transient failures.
    ///
    /// A create that failed in transit may still have been applied by the
    /// target, so every later attempt starts with a fresh existence check.
    async fn create(&self, action: &Action) -> Result<TargetRef> {
        if self.options.dry_run {
            return Ok(TargetRef::planned(action.target_name()));
        }

        let flag = AtomicBool::new(false);
        let in_doubt = &flag;
        let result = self
            .options
            .retry
            .execute("create", move || {
                async move {
                    if in_doubt.load(Ordering::SeqCst) {
                        if let Some(existing) = self.lookup(action).await? {
                            return Ok(existing);
                        }
                    }
                    self.create_once(action).await.map_err(|e| {
                        if e.is_retryable() && !matches!(e, MigrationError::RateLimited { .. }) {
                            in_doubt.store(true, Ordering::SeqCst);
                        }
                        e
                    })
                }
            })
            .await;

        match result {
            Err(e) if flag.load(Ordering::SeqCst) && !e.is_fatal() => {
                match self.lookup(action).await {
                    Ok(Some(existing)) => {
                        warn!(
                            existing = %existing,
                            error = %e,
                            "Create reported an error but the entity exists"
                        );
                        Ok(existing)
                    }
                    _ => Err(e),
                }
            }
            other => other,
        }
    }

    async fn create_once(&self, action: &Action) -> Result<TargetRef> {
        match action {
            Action::User(request) => {
                let user = self.target.create_user(request).await?;
                Ok(TargetRef::assigned(user.id, user.login))
            }
            Action::Group { request, .. } => {
                let org = self.target.create_org(request).await?;
                Ok(TargetRef::assigned(org.id, org.name))
            }
            Action::Repo { request, .. } => {
                let repo = self.target.migrate_repo(request).await?;
                Ok(TargetRef::assigned(repo.id, repo.full_name))
            }
            Action::SshKey {
                username, request, ..
            } => {
                let key = self.target.create_user_key(username, request).await?;
                Ok(TargetRef::assigned(key.id, format!("{username}/{}", key.title)))
            }
        }
    }

    /// Add resolved group members missing from the organization's first team.
    ///
    /// Members are never removed. Problems end up as warnings on the record.
    async fn reconcile_members(
        &self,
        org: &TargetRef,
        members: &[String],
        warnings: &mut Vec<String>,
    ) {
        let mut resolved = Vec::new();
        for member in members {
            match self.mapper.resolve(EntityKind::User, member) {
                Some(user) => resolved.push(user),
                None => warnings.push(format!("member '{member}' has no target user; not added")),
            }
        }

        if resolved.is_empty() || org.id == TargetId::Planned {
            return;
        }

        let retry = &self.options.retry;
        let teams = match retry
            .execute("list_org_teams", || self.target.list_org_teams(&org.name))
            .await
        {
            Ok(teams) => teams,
            Err(e) => {
                warnings.push(format!("listing teams failed: {e}"));
                return;
            }
        };

        let Some(team) = teams.into_iter().next() else {
            warnings.push(format!("organization '{}' has no team; members not added", org.name));
            return;
        };

        let current = match retry
            .execute("list_team_members", || self.target.list_team_members(team.id))
            .await
        {
            Ok(current) => current,
            Err(e) => {
                warnings.push(format!("listing members of team '{}' failed: {e}", team.name));
                return;
            }
        };

        for user in resolved {
            if current.iter().any(|login| *login == user.name) {
                continue;
            }
            if self.options.dry_run {
                debug!(org = %org.name, member = %user.name, "Would add team member");
                continue;
            }
            if let Err(e) = retry
                .execute("add_team_member", || {
                    self.target.add_team_member(team.id, &user.name)
                })
                .await
            {
                warnings.push(format!("adding member '{}' failed: {e}", user.name));
            }
        }
    }
}
