//! Durable store for workspaces, tabs, settings and request history.

pub mod file;
pub mod memory;
pub mod model;
pub(crate) mod state;

use async_trait::async_trait;

use crate::Result;
use model::{AppSettings, CreateRequestInput, SavedRequest, Tab, TabState, Workspace};

pub use file::FileStore;
pub use memory::MemoryStore;

/// Name given to the workspace a fresh store starts with.
pub const DEFAULT_WORKSPACE_NAME: &str = "Default Workspace";

/// Everything the session layer needs from persistence.
///
/// Implementations report any backend failure as
/// [`PingitError::StorageUnavailable`](crate::PingitError::StorageUnavailable).
#[async_trait]
pub trait StorageGateway: Send + Sync {
    /// Tabs of a workspace ordered by position.
    async fn get_tabs_by_workspace(&self, workspace_id: &str) -> Result<Vec<Tab>>;

    /// Append a tab after the last position and make it the only active one.
    async fn create_tab(&self, workspace_id: &str, state: Option<TabState>) -> Result<Tab>;

    async fn update_tab(&self, id: &str, state: &TabState, request_id: Option<&str>)
    -> Result<()>;

    async fn set_active_tab(&self, workspace_id: &str, tab_id: &str) -> Result<()>;

    /// Delete a tab. When it was the active one, the remaining tab nearest to
    /// its position becomes active and its id is returned.
    async fn delete_tab(&self, id: &str) -> Result<Option<String>>;

    async fn reorder_tabs(&self, workspace_id: &str, tab_ids: &[String]) -> Result<()>;

    async fn get_all_workspaces(&self) -> Result<Vec<Workspace>>;

    async fn create_workspace(&self, name: &str) -> Result<Workspace>;

    async fn get_all_settings(&self) -> Result<AppSettings>;

    async fn set_setting(&self, key: &str, value: &str) -> Result<()>;

    async fn create_request(&self, input: CreateRequestInput) -> Result<SavedRequest>;

    async fn get_request(&self, id: &str) -> Result<Option<SavedRequest>>;

    /// History of a workspace, newest first.
    async fn get_requests_by_workspace(
        &self,
        workspace_id: &str,
        limit: Option<usize>,
        offset: Option<usize>,
    ) -> Result<Vec<SavedRequest>>;

    /// Case-insensitive substring search over name, URL and bodies, newest first.
    async fn search_requests(
        &self,
        workspace_id: &str,
        query: &str,
        limit: Option<usize>,
    ) -> Result<Vec<SavedRequest>>;

    /// Drop a workspace's history, returning how many records went away.
    async fn clear_workspace_history(&self, workspace_id: &str) -> Result<usize>;
}

pub(crate) const DEFAULT_PAGE_SIZE: usize = 100;
pub(crate) const DEFAULT_SEARCH_LIMIT: usize = 50;

pub(crate) fn now_millis() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

pub(crate) fn new_id() -> String {
    uuid::Uuid::new_v4().to_string()
}

pub(crate) fn matches_query(request: &SavedRequest, needle: &str) -> bool {
    let needle = needle.trim().to_lowercase();
    if needle.is_empty() {
        return true;
    }
    let hit = |text: &str| text.to_lowercase().contains(&needle);
    hit(&request.name)
        || hit(&request.url)
        || request.body_content.as_deref().is_some_and(hit)
        || request.response_body.as_deref().is_some_and(hit)
}

/// Tab that takes over when the active tab at `position` is removed.
pub(crate) fn nearest_tab(tabs: &[Tab], position: i32) -> Option<&Tab> {
    tabs.iter()
        .min_by_key(|t| ((t.position - position).abs(), t.position))
}
