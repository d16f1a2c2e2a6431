//! Lazy paginated listings of source entities.
//!
//! Every call returns a fresh stream that starts at page 1, so a listing can
//! be restarted by simply asking for it again. A page that still fails after
//! the retry policy is exhausted ends the stream with a
//! [`MigrationError::ReaderFailure`].

use std::collections::VecDeque;
use std::future::Future;
use std::sync::Arc;

use futures::stream::{self, BoxStream, StreamExt};

use crate::error::{MigrationError, Result};
use crate::retry::RetryPolicy;
use crate::source::{Page, SourceApi};
use crate::types::{EntityKind, SourceEntity, SourceProject, SourceUser, SourceWiki};

/// Item of a paged listing, tagged with the page it came from.
type Paged<T> = (u32, T);

struct Cursor<T> {
    next_page: Option<u32>,
    buffer: VecDeque<Paged<T>>,
}

/// Reads entities from the source platform.
#[derive(Clone)]
pub struct EntityReader {
    source: Arc<dyn SourceApi>,
    page_size: u32,
    retry: RetryPolicy,
}

impl EntityReader {
    /// Create a reader over `source`.
    pub fn new(source: Arc<dyn SourceApi>, page_size: u32, retry: RetryPolicy) -> Self {
        Self {
            source,
            page_size: page_size.max(1),
            retry,
        }
    }

    /// Listing for any kind.
    pub fn stream(&self, kind: EntityKind) -> BoxStream<'static, Result<SourceEntity>> {
        match kind {
            EntityKind::User => self.users(),
            EntityKind::Group => self.groups(),
            EntityKind::Project => self.projects(),
            EntityKind::Wiki => self.wikis(),
            EntityKind::SshKey => self.ssh_keys(),
        }
    }

    /// All users.
    pub fn users(&self) -> BoxStream<'static, Result<SourceEntity>> {
        self.user_pages()
            .map(|item| item.map(|(_, user)| SourceEntity::User(user)))
            .boxed()
    }

    /// All groups, with their direct members filled in.
    pub fn groups(&self) -> BoxStream<'static, Result<SourceEntity>> {
        let source = self.source.clone();
        let retry = self.retry.clone();

        self.paginate(EntityKind::Group, {
            let source = source.clone();
            move |page, per_page| {
                let source = source.clone();
                async move { source.list_groups(page, per_page).await }
            }
        })
        .then(move |item| {
            let source = source.clone();
            let retry = retry.clone();
            async move {
                let (page, mut group) = item?;
                let members = retry
                    .execute("list_group_members", || source.list_group_members(&group))
                    .await
                    .map_err(|e| MigrationError::ReaderFailure {
                        kind: EntityKind::Group,
                        page,
                        reason: format!("members of '{}': {e}", group.full_path),
                    })?;
                group.members = members;
                Ok(SourceEntity::Group(group))
            }
        })
        .boxed()
    }

    /// All projects.
    pub fn projects(&self) -> BoxStream<'static, Result<SourceEntity>> {
        self.project_pages(EntityKind::Project)
            .map(|item| item.map(|(_, project)| SourceEntity::Project(project)))
            .boxed()
    }

    /// Wikis of every project that has the wiki feature enabled.
    pub fn wikis(&self) -> BoxStream<'static, Result<SourceEntity>> {
        self.project_pages(EntityKind::Wiki)
            .filter_map(|item| async move {
                match item {
                    Ok((_, project)) if project.wiki_enabled => {
                        Some(Ok(SourceEntity::Wiki(SourceWiki::from_project(&project))))
                    }
                    Ok(_) => None,
                    Err(e) => Some(Err(e)),
                }
            })
            .boxed()
    }

    /// SSH keys of every user, read user by user.
    pub fn ssh_keys(&self) -> BoxStream<'static, Result<SourceEntity>> {
        let source = self.source.clone();
        let retry = self.retry.clone();

        self.paginate(EntityKind::SshKey, {
            let source = source.clone();
            move |page, per_page| {
                let source = source.clone();
                async move { source.list_users(page, per_page).await }
            }
        })
        .then(move |item| {
            let source = source.clone();
            let retry = retry.clone();
            async move {
                let (page, user) = match item {
                    Ok(paged) => paged,
                    Err(e) => return vec![Err(e)],
                };
                match retry
                    .execute("list_user_keys", || source.list_user_keys(&user))
                    .await
                {
                    Ok(keys) => keys.into_iter().map(|k| Ok(SourceEntity::SshKey(k))).collect(),
                    Err(e) => vec![Err(MigrationError::ReaderFailure {
                        kind: EntityKind::SshKey,
                        page,
                        reason: format!("keys of '{}': {e}", user.username),
                    })],
                }
            }
        })
        .flat_map(stream::iter)
        .boxed()
    }

    fn user_pages(&self) -> BoxStream<'static, Result<Paged<SourceUser>>> {
        let source = self.source.clone();
        self.paginate(EntityKind::User, move |page, per_page| {
            let source = source.clone();
            async move { source.list_users(page, per_page).await }
        })
    }

    fn project_pages(&self, kind: EntityKind) -> BoxStream<'static, Result<Paged<SourceProject>>> {
        let source = self.source.clone();
        self.paginate(kind, move |page, per_page| {
            let source = source.clone();
            async move { source.list_projects(page, per_page).await }
        })
    }

    /// Walk pages from 1 until a short page or no next page.
    fn paginate<T, F, Fut>(&self, kind: EntityKind, fetch: F) -> BoxStream<'static, Result<Paged<T>>>
    where
        T: Send + 'static,
        F: Fn(u32, u32) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Page<T>>> + Send + 'static,
    {
        let fetch = Arc::new(fetch);
        let retry = self.retry.clone();
        let page_size = self.page_size;
        let cursor = Cursor {
            next_page: Some(1),
            buffer: VecDeque::new(),
        };

        stream::unfold(cursor, move |mut cursor| {
            let fetch = fetch.clone();
            let retry = retry.clone();
            async move {
                loop {
                    if let Some(item) = cursor.buffer.pop_front() {
                        return Some((Ok(item), cursor));
                    }

                    let page = cursor.next_page?;
                    let operation = format!("list {kind} page {page}");
                    match retry.execute(&operation, || fetch(page, page_size)).await {
                        Ok(Page { items, next_page }) => {
                            let full = items.len() as u32 >= page_size;
                            cursor.next_page = match next_page {
                                Some(next) if full && next > page => Some(next),
                                _ => None,
                            };
                            tracing::debug!(
                                kind = %kind,
                                page = page,
                                items = items.len(),
                                "Fetched page"
                            );
                            cursor.buffer.extend(items.into_iter().map(|item| (page, item)));
                        }
                        Err(e) => {
                            cursor.next_page = None;
                            tracing::warn!(kind = %kind, page = page, error = %e, "Listing failed");
                            let failure = MigrationError::ReaderFailure {
                                kind,
                                page,
                                reason: e.to_string(),
                            };
                            return Some((Err(failure), cursor));
                        }
                    }
                }
            }
        })
        .boxed()
    }
}
