use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Mutex, MutexGuard};

use async_trait::async_trait;

use super::model::{AppSettings, CreateRequestInput, SavedRequest, Tab, TabState, Workspace};
use super::state::StoreState;
use super::{
    DEFAULT_PAGE_SIZE, DEFAULT_SEARCH_LIMIT, StorageGateway, matches_query, new_id, now_millis,
};
use crate::{PingitError, Result};

#[derive(Debug, Default)]
struct Inner {
    state: StoreState,
    // oldest first
    requests: Vec<SavedRequest>,
}

/// Process-local gateway. Nothing survives the process.
///
/// `set_available(false)` makes every call fail with `StorageUnavailable`,
/// which is how the session layer's failure paths are exercised.
#[derive(Debug)]
pub struct MemoryStore {
    inner: Mutex<Inner>,
    available: AtomicBool,
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryStore {
    pub fn new() -> Self {
        let mut inner = Inner::default();
        inner.state.ensure_default_workspace();
        Self {
            inner: Mutex::new(inner),
            available: AtomicBool::new(true),
        }
    }

    pub fn set_available(&self, available: bool) {
        self.available.store(available, Ordering::SeqCst);
    }

    fn lock(&self) -> Result<MutexGuard<'_, Inner>> {
        if !self.available.load(Ordering::SeqCst) {
            return Err(PingitError::StorageUnavailable(
                "memory store is offline".to_string(),
            ));
        }
        Ok(self.inner.lock().unwrap_or_else(|e| e.into_inner()))
    }
}

#[async_trait]
impl StorageGateway for MemoryStore {
    async fn get_tabs_by_workspace(&self, workspace_id: &str) -> Result<Vec<Tab>> {
        Ok(self.lock()?.state.tabs_of(workspace_id))
    }

    async fn create_tab(&self, workspace_id: &str, state: Option<TabState>) -> Result<Tab> {
        Ok(self.lock()?.state.create_tab(workspace_id, state))
    }

    async fn update_tab(
        &self,
        id: &str,
        state: &TabState,
        request_id: Option<&str>,
    ) -> Result<()> {
        self.lock()?.state.update_tab(id, state, request_id)
    }

    async fn set_active_tab(&self, workspace_id: &str, tab_id: &str) -> Result<()> {
        self.lock()?.state.set_active_tab(workspace_id, tab_id);
        Ok(())
    }

    async fn delete_tab(&self, id: &str) -> Result<Option<String>> {
        Ok(self.lock()?.state.delete_tab(id))
    }

    async fn reorder_tabs(&self, workspace_id: &str, tab_ids: &[String]) -> Result<()> {
        self.lock()?.state.reorder_tabs(workspace_id, tab_ids);
        Ok(())
    }

    async fn get_all_workspaces(&self) -> Result<Vec<Workspace>> {
        Ok(self.lock()?.state.workspaces.clone())
    }

    async fn create_workspace(&self, name: &str) -> Result<Workspace> {
        Ok(self.lock()?.state.create_workspace(name))
    }

    async fn get_all_settings(&self) -> Result<AppSettings> {
        Ok(self.lock()?.state.settings())
    }

    async fn set_setting(&self, key: &str, value: &str) -> Result<()> {
        self.lock()?.state.set_setting(key, value);
        Ok(())
    }

    async fn create_request(&self, input: CreateRequestInput) -> Result<SavedRequest> {
        let saved = input.into_saved(new_id(), now_millis());
        self.lock()?.requests.push(saved.clone());
        Ok(saved)
    }

    async fn get_request(&self, id: &str) -> Result<Option<SavedRequest>> {
        Ok(self.lock()?.requests.iter().find(|r| r.id == id).cloned())
    }

    async fn get_requests_by_workspace(
        &self,
        workspace_id: &str,
        limit: Option<usize>,
        offset: Option<usize>,
    ) -> Result<Vec<SavedRequest>> {
        Ok(self
            .lock()?
            .requests
            .iter()
            .rev()
            .filter(|r| r.workspace_id == workspace_id)
            .skip(offset.unwrap_or(0))
            .take(limit.unwrap_or(DEFAULT_PAGE_SIZE))
            .cloned()
            .collect())
    }

    async fn search_requests(
        &self,
        workspace_id: &str,
        query: &str,
        limit: Option<usize>,
    ) -> Result<Vec<SavedRequest>> {
        Ok(self
            .lock()?
            .requests
            .iter()
            .rev()
            .filter(|r| r.workspace_id == workspace_id && matches_query(r, query))
            .take(limit.unwrap_or(DEFAULT_SEARCH_LIMIT))
            .cloned()
            .collect())
    }

    async fn clear_workspace_history(&self, workspace_id: &str) -> Result<usize> {
        let mut inner = self.lock()?;
        let before = inner.requests.len();
        inner.requests.retain(|r| r.workspace_id != workspace_id);
        Ok(before - inner.requests.len())
    }
}
