//! Read-only view of the source platform.

use async_trait::async_trait;

use crate::error::Result;
use crate::types::{SourceGroup, SourceProject, SourceSshKey, SourceUser};

/// One page of a listing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Page<T> {
    /// Items on this page, in server order.
    pub items: Vec<T>,
    /// Index of the next page, `None` on the last page.
    pub next_page: Option<u32>,
}

impl<T> Page<T> {
    /// Page that ends the listing.
    pub fn last(items: Vec<T>) -> Self {
        Self {
            items,
            next_page: None,
        }
    }
}

/// Paginated listing operations against the source platform.
///
/// Pages are 1-based. Implementations must return items in a stable order
/// so re-reading a page after a restart yields the same entities.
#[async_trait]
pub trait SourceApi: Send + Sync {
    /// Server version string, used for connectivity checks.
    async fn version(&self) -> Result<String>;

    /// List users.
    async fn list_users(&self, page: u32, per_page: u32) -> Result<Page<SourceUser>>;

    /// List groups. `members` is left empty; see [`SourceApi::list_group_members`].
    async fn list_groups(&self, page: u32, per_page: u32) -> Result<Page<SourceGroup>>;

    /// List projects.
    async fn list_projects(&self, page: u32, per_page: u32) -> Result<Page<SourceProject>>;

    /// List SSH keys of one user.
    async fn list_user_keys(&self, user: &SourceUser) -> Result<Vec<SourceSshKey>>;

    /// Usernames of the direct members of a group.
    async fn list_group_members(&self, group: &SourceGroup) -> Result<Vec<String>>;
}
