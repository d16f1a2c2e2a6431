//! Common types for migration operations.

use std::collections::BTreeSet;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::retry::RetryPolicy;

/// Default number of items requested per source page.
pub const DEFAULT_PAGE_SIZE: u32 = 100;

/// Credentials bundle for both platforms.
///
/// The core never parses this; it is handed over as-is by the caller.
#[derive(Clone, Default, Serialize, Deserialize)]
pub struct MigrationConfig {
    /// GitLab instance URL.
    pub source_url: String,

    /// GitLab personal access token.
    pub source_token: String,

    /// GitLab user used by Forgejo to clone repositories over HTTP.
    pub source_admin_user: String,

    /// Password for `source_admin_user`.
    pub source_admin_pass: String,

    /// Forgejo instance URL.
    pub target_url: String,

    /// Forgejo API token (admin scope).
    pub target_token: String,

    /// Forgejo admin account; owns projects whose namespace is gone.
    pub target_admin_user: String,

    /// Password for `target_admin_user`.
    pub target_admin_pass: String,
}

impl MigrationConfig {
    /// Create a new configuration from the two endpoints and their tokens.
    pub fn new(
        source_url: impl Into<String>,
        source_token: impl Into<String>,
        target_url: impl Into<String>,
        target_token: impl Into<String>,
    ) -> Self {
        Self {
            source_url: source_url.into(),
            source_token: source_token.into(),
            target_url: target_url.into(),
            target_token: target_token.into(),
            ..Default::default()
        }
    }

    /// Set the GitLab account used for cloning.
    pub fn with_source_admin(mut self, user: impl Into<String>, pass: impl Into<String>) -> Self {
        self.source_admin_user = user.into();
        self.source_admin_pass = pass.into();
        self
    }

    /// Set the Forgejo admin account.
    pub fn with_target_admin(mut self, user: impl Into<String>, pass: impl Into<String>) -> Self {
        self.target_admin_user = user.into();
        self.target_admin_pass = pass.into();
        self
    }

    /// Username/password Forgejo should use when cloning from GitLab.
    ///
    /// `None` means repositories are cloned over SSH instead.
    pub fn clone_credentials(&self) -> Option<(&str, &str)> {
        if self.source_admin_user.is_empty() && self.source_admin_pass.is_empty() {
            None
        } else {
            Some((&self.source_admin_user, &self.source_admin_pass))
        }
    }

    /// Target account that adopts orphaned projects.
    pub fn orphan_owner(&self) -> Option<&str> {
        (!self.target_admin_user.is_empty()).then_some(self.target_admin_user.as_str())
    }
}

impl fmt::Debug for MigrationConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fn redact(secret: &str) -> &'static str {
            if secret.is_empty() {
                ""
            } else {
                "***"
            }
        }

        f.debug_struct("MigrationConfig")
            .field("source_url", &self.source_url)
            .field("source_token", &redact(&self.source_token))
            .field("source_admin_user", &self.source_admin_user)
            .field("source_admin_pass", &redact(&self.source_admin_pass))
            .field("target_url", &self.target_url)
            .field("target_token", &redact(&self.target_token))
            .field("target_admin_user", &self.target_admin_user)
            .field("target_admin_pass", &redact(&self.target_admin_pass))
            .finish()
    }
}

/// Options for controlling what gets migrated.
#[derive(Debug, Clone)]
pub struct MigrationOptions {
    /// Entity kinds selected for this run.
    pub kinds: BTreeSet<EntityKind>,

    /// Run the whole pipeline but skip create calls.
    pub dry_run: bool,

    /// Ask Forgejo to e-mail created users.
    pub notify_users: bool,

    /// Concurrent upserts for independent users (1 = sequential).
    pub workers: usize,

    /// Source page size.
    pub page_size: u32,

    /// Retry policy for page fetches and target calls.
    pub retry: RetryPolicy,
}

impl Default for MigrationOptions {
    fn default() -> Self {
        Self {
            kinds: EntityKind::ALL.into_iter().collect(),
            dry_run: false,
            notify_users: false,
            workers: 1,
            page_size: DEFAULT_PAGE_SIZE,
            retry: RetryPolicy::default(),
        }
    }
}

impl MigrationOptions {
    /// Options with no kind selected.
    pub fn none() -> Self {
        Self {
            kinds: BTreeSet::new(),
            ..Default::default()
        }
    }

    /// Select or deselect a single kind.
    pub fn with_kind(mut self, kind: EntityKind, migrate: bool) -> Self {
        if migrate {
            self.kinds.insert(kind);
        } else {
            self.kinds.remove(&kind);
        }
        self
    }

    /// Replace the selected kinds.
    pub fn with_kinds(mut self, kinds: impl IntoIterator<Item = EntityKind>) -> Self {
        self.kinds = kinds.into_iter().collect();
        self
    }

    /// Enable or disable dry-run mode.
    pub fn with_dry_run(mut self, dry_run: bool) -> Self {
        self.dry_run = dry_run;
        self
    }

    /// Enable or disable user notification e-mails.
    pub fn with_notify(mut self, notify: bool) -> Self {
        self.notify_users = notify;
        self
    }

    /// Set the worker pool size for user upserts.
    pub fn with_workers(mut self, workers: usize) -> Self {
        self.workers = workers.max(1);
        self
    }

    /// Set the source page size.
    pub fn with_page_size(mut self, page_size: u32) -> Self {
        self.page_size = page_size.max(1);
        self
    }

    /// Set the retry policy.
    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    /// Whether `kind` was selected for this run.
    pub fn migrates(&self, kind: EntityKind) -> bool {
        self.kinds.contains(&kind)
    }
}

/// Kinds of entities moved between the platforms, in migration order.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
#[serde(rename_all = "snake_case")]
pub enum EntityKind {
    /// GitLab user, Forgejo user.
    User,
    /// GitLab group, Forgejo organization.
    Group,
    /// GitLab project, Forgejo repository.
    Project,
    /// GitLab project wiki, Forgejo wiki mirror repository.
    Wiki,
    /// SSH public key of a user.
    SshKey,
}

impl EntityKind {
    /// Every kind, in dependency order.
    pub const ALL: [EntityKind; 5] = [
        EntityKind::User,
        EntityKind::Group,
        EntityKind::Project,
        EntityKind::Wiki,
        EntityKind::SshKey,
    ];

    /// Kinds whose target refs this kind needs.
    pub fn depends_on(self) -> &'static [EntityKind] {
        match self {
            Self::User => &[],
            Self::Group => &[EntityKind::User],
            Self::Project => &[EntityKind::User, EntityKind::Group],
            Self::Wiki => &[EntityKind::Project],
            Self::SshKey => &[EntityKind::User],
        }
    }

    /// Stable lowercase name.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::User => "user",
            Self::Group => "group",
            Self::Project => "project",
            Self::Wiki => "wiki",
            Self::SshKey => "ssh_key",
        }
    }
}

impl fmt::Display for EntityKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// GitLab visibility levels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Visibility {
    Public,
    Internal,
    Private,
}

impl Visibility {
    /// Parse a GitLab visibility string; unknown values are treated as private.
    pub fn from_gitlab(value: &str) -> Self {
        match value {
            "public" => Self::Public,
            "internal" => Self::Internal,
            _ => Self::Private,
        }
    }

    /// Forgejo organization visibility.
    pub fn org_visibility(self) -> &'static str {
        match self {
            Self::Public => "public",
            Self::Internal => "limited",
            Self::Private => "private",
        }
    }

    /// Forgejo repositories are either public or private.
    pub fn is_private(self) -> bool {
        !matches!(self, Self::Public)
    }
}

/// A GitLab user.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceUser {
    pub id: u64,
    pub username: String,
    pub name: String,
    pub email: Option<String>,
    pub state: String,
}

/// A GitLab group (possibly nested).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceGroup {
    pub id: u64,
    /// Full path, e.g. `eng/backend`.
    pub full_path: String,
    pub name: String,
    pub description: Option<String>,
    pub visibility: Visibility,
    /// Full path of the parent group, `None` for top-level groups.
    pub parent_path: Option<String>,
    /// Usernames of direct members.
    pub members: Vec<String>,
}

impl SourceGroup {
    /// Nesting depth: `eng` is 1, `eng/backend` is 2.
    pub fn depth(&self) -> usize {
        self.full_path.split('/').count()
    }
}

/// Owner kind of a GitLab namespace.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NamespaceKind {
    User,
    Group,
}

impl NamespaceKind {
    /// Entity kind the namespace resolves through.
    pub fn entity_kind(self) -> EntityKind {
        match self {
            Self::User => EntityKind::User,
            Self::Group => EntityKind::Group,
        }
    }
}

/// Namespace a project lives in.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceNamespace {
    pub kind: NamespaceKind,
    pub full_path: String,
}

/// A GitLab project.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceProject {
    pub id: u64,
    /// e.g. `eng/backend/api`.
    pub path_with_namespace: String,
    pub name: String,
    pub path: String,
    pub description: Option<String>,
    pub visibility: Visibility,
    pub namespace: SourceNamespace,
    pub http_url_to_repo: String,
    pub ssh_url_to_repo: String,
    pub wiki_enabled: bool,
}

/// The wiki repository of a GitLab project.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceWiki {
    pub project_id: u64,
    pub project_path: String,
    pub visibility: Visibility,
    pub http_url: String,
    pub ssh_url: String,
}

impl SourceWiki {
    /// Derive the wiki clone URLs from a project.
    pub fn from_project(project: &SourceProject) -> Self {
        fn wiki_url(repo_url: &str) -> String {
            let base = repo_url.strip_suffix(".git").unwrap_or(repo_url);
            format!("{base}.wiki.git")
        }

        Self {
            project_id: project.id,
            project_path: project.path_with_namespace.clone(),
            visibility: project.visibility,
            http_url: wiki_url(&project.http_url_to_repo),
            ssh_url: wiki_url(&project.ssh_url_to_repo),
        }
    }
}

/// An SSH public key of a GitLab user.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceSshKey {
    pub id: u64,
    pub username: String,
    pub title: String,
    pub key: String,
}

/// An entity read from the source platform.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum SourceEntity {
    User(SourceUser),
    Group(SourceGroup),
    Project(SourceProject),
    Wiki(SourceWiki),
    SshKey(SourceSshKey),
}

impl SourceEntity {
    /// Kind of this entity.
    pub fn kind(&self) -> EntityKind {
        match self {
            Self::User(_) => EntityKind::User,
            Self::Group(_) => EntityKind::Group,
            Self::Project(_) => EntityKind::Project,
            Self::Wiki(_) => EntityKind::Wiki,
            Self::SshKey(_) => EntityKind::SshKey,
        }
    }

    /// Source-native identifier.
    pub fn source_id(&self) -> u64 {
        match self {
            Self::User(u) => u.id,
            Self::Group(g) => g.id,
            Self::Project(p) => p.id,
            Self::Wiki(w) => w.project_id,
            Self::SshKey(k) => k.id,
        }
    }

    /// Natural key used to match the entity on both platforms.
    pub fn natural_key(&self) -> String {
        match self {
            Self::User(u) => u.username.clone(),
            Self::Group(g) => g.full_path.clone(),
            Self::Project(p) => p.path_with_namespace.clone(),
            Self::Wiki(w) => format!("{}.wiki", w.project_path),
            Self::SshKey(k) => format!("{}/{}", k.username, k.title),
        }
    }

    /// Entities that must be resolved before this one can be created.
    pub fn dependencies(&self) -> Vec<Dependency> {
        match self {
            Self::User(_) => Vec::new(),
            Self::Group(g) => g
                .parent_path
                .iter()
                .map(|parent| Dependency::new(EntityKind::Group, parent))
                .collect(),
            Self::Project(p) => vec![Dependency::new(
                p.namespace.kind.entity_kind(),
                &p.namespace.full_path,
            )],
            Self::Wiki(w) => vec![Dependency::new(EntityKind::Project, &w.project_path)],
            Self::SshKey(k) => vec![Dependency::new(EntityKind::User, &k.username)],
        }
    }

    /// Short description for logs and error chains.
    pub fn describe(&self) -> String {
        format!("{} '{}'", self.kind(), self.natural_key())
    }
}

/// A reference from one entity to another it depends on.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Dependency {
    pub kind: EntityKind,
    pub key: String,
}

impl Dependency {
    /// Create a dependency on `kind` identified by `key`.
    pub fn new(kind: EntityKind, key: impl Into<String>) -> Self {
        Self {
            kind,
            key: key.into(),
        }
    }
}

/// Identifier of an entity on the target platform.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TargetId {
    /// Id assigned by Forgejo.
    Assigned(u64),
    /// Dry runs never create anything, so dependents see a placeholder.
    Planned,
}

/// Reference to a migrated entity on the target platform.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TargetRef {
    pub id: TargetId,
    /// Target natural key: login, organization name or `owner/repo`.
    pub name: String,
}

impl TargetRef {
    /// Ref for an entity Forgejo assigned `id` to.
    pub fn assigned(id: u64, name: impl Into<String>) -> Self {
        Self {
            id: TargetId::Assigned(id),
            name: name.into(),
        }
    }

    /// Ref for an entity a dry run would have created.
    pub fn planned(name: impl Into<String>) -> Self {
        Self {
            id: TargetId::Planned,
            name: name.into(),
        }
    }

    /// Numeric id, if one was assigned.
    pub fn numeric_id(&self) -> Option<u64> {
        match self.id {
            TargetId::Assigned(id) => Some(id),
            TargetId::Planned => None,
        }
    }
}

impl fmt::Display for TargetRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.id {
            TargetId::Assigned(id) => write!(f, "{}#{id}", self.name),
            TargetId::Planned => write!(f, "{} (planned)", self.name),
        }
    }
}

/// Outcome of processing a single entity.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum Outcome {
    Created,
    AlreadyExists,
    Skipped { reason: String },
    Failed { reason: String },
}

impl Outcome {
    /// Short label used in summaries.
    pub fn label(&self) -> &'static str {
        match self {
            Self::Created => "created",
            Self::AlreadyExists => "already exists",
            Self::Skipped { .. } => "skipped",
            Self::Failed { .. } => "failed",
        }
    }
}

/// Per-entity result, immutable once produced.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MigrationRecord {
    pub kind: EntityKind,
    pub key: String,
    pub outcome: Outcome,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub target: Option<TargetRef>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub warnings: Vec<String>,
}

impl MigrationRecord {
    /// Build a record with no warnings.
    pub fn new(
        kind: EntityKind,
        key: impl Into<String>,
        outcome: Outcome,
        target: Option<TargetRef>,
    ) -> Self {
        Self {
            kind,
            key: key.into(),
            outcome,
            target,
            warnings: Vec::new(),
        }
    }

    /// Attach warnings collected before the record was finalized.
    pub fn with_warnings(mut self, warnings: impl IntoIterator<Item = String>) -> Self {
        self.warnings.extend(warnings);
        self
    }

    /// Whether the entity ended up failed.
    pub fn is_failed(&self) -> bool {
        matches!(self.outcome, Outcome::Failed { .. })
    }
}
