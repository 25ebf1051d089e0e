//! Bounded in-memory working set of a workspace's tabs.
//!
//! The cache is the only owner of resident tabs and of the transient
//! response/loading maps. Every operation that talks to the gateway reads
//! what it needs under the lock, releases it for the await, and applies the
//! result afterwards, so a failed gateway call leaves nothing half-applied.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex, MutexGuard};

use tokio::sync::broadcast;
use tracing::{debug, info, warn};

use super::events::{EventBus, SessionEvent};
use crate::http::params;
use crate::http::response::ResponseData;
use crate::http::types::{BodyType, Method};
use crate::storage::StorageGateway;
use crate::storage::model::{
    CreateRequestInput, KeyValue, SavedRequest, Tab, TabId, TabState, WorkspaceId,
};
use crate::{PingitError, Result};

/// How many tabs stay resident unless configured otherwise.
pub const DEFAULT_MAX_TABS_IN_MEMORY: usize = 24;

/// Partial edit of a tab draft. `None` fields are left as they are.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TabStateUpdate {
    pub method: Option<Method>,
    pub url: Option<String>,
    pub params: Option<Vec<KeyValue>>,
    pub headers: Option<Vec<KeyValue>>,
    pub body_type: Option<BodyType>,
    pub body_content: Option<String>,
}

impl TabStateUpdate {
    fn apply(self, state: &mut TabState) {
        if let Some(method) = self.method {
            state.method = method;
        }
        if let Some(url) = self.url {
            state.url = url;
        }
        if let Some(params) = self.params {
            state.params = params;
        }
        if let Some(headers) = self.headers {
            state.headers = headers;
        }
        if let Some(body_type) = self.body_type {
            state.body_type = body_type;
        }
        if let Some(body_content) = self.body_content {
            state.body_content = body_content;
        }
    }
}

/// What a send captured from the tab when it started.
#[derive(Debug, Clone)]
pub(crate) struct SendTicket {
    pub workspace_id: WorkspaceId,
    pub state: TabState,
    pub revision: u64,
    pub epoch: u64,
}

#[derive(Debug, Default)]
pub(super) struct CacheState {
    workspace_id: Option<WorkspaceId>,
    tabs: Vec<Tab>,
    active_id: Option<TabId>,
    responses: HashMap<TabId, ResponseData>,
    loading: HashSet<TabId>,
    last_used: HashMap<TabId, u64>,
    // bumped on every draft edit
    revisions: HashMap<TabId, u64>,
    clock: u64,
    // bumped on every load
    epoch: u64,
}

impl CacheState {
    fn index_of(&self, id: &str) -> Option<usize> {
        self.tabs.iter().position(|t| t.id == id)
    }

    pub(super) fn tab(&self, id: &str) -> Option<&Tab> {
        self.tabs.iter().find(|t| t.id == id)
    }

    fn tab_mut(&mut self, id: &str) -> Option<&mut Tab> {
        self.tabs.iter_mut().find(|t| t.id == id)
    }

    fn resident(&self, id: &str) -> Result<&Tab> {
        self.tab(id)
            .ok_or_else(|| PingitError::TabNotFound(id.to_string()))
    }

    pub(super) fn find_by_request(&self, request_id: &str) -> Option<&Tab> {
        self.tabs
            .iter()
            .find(|t| t.request_id.as_deref() == Some(request_id))
    }

    fn touch(&mut self, id: &str) {
        self.clock += 1;
        self.last_used.insert(id.to_string(), self.clock);
    }

    fn revision(&self, id: &str) -> u64 {
        self.revisions.get(id).copied().unwrap_or(0)
    }

    fn bump_revision(&mut self, id: &str) {
        *self.revisions.entry(id.to_string()).or_insert(0) += 1;
    }

    pub(super) fn set_active(&mut self, id: Option<&str>) {
        for tab in &mut self.tabs {
            tab.is_active = Some(tab.id.as_str()) == id;
        }
        self.active_id = id.map(str::to_string);
        if let Some(id) = id {
            self.touch(id);
        }
    }

    /// Drop everything held in memory for a tab that leaves residency.
    fn forget(&mut self, id: &str) {
        self.responses.remove(id);
        self.loading.remove(id);
        self.last_used.remove(id);
    }

    /// Make `tab` resident and active, then evict down to `max`.
    ///
    /// Returns the evicted ids. A tab belonging to another workspace than the
    /// loaded one is not admitted.
    pub(super) fn admit(&mut self, tab: Tab, max: usize) -> Vec<TabId> {
        if self.workspace_id.as_deref() != Some(tab.workspace_id.as_str()) {
            return Vec::new();
        }
        let previous = self.active_id.clone();
        let id = tab.id.clone();
        match self.index_of(&id) {
            Some(index) => self.tabs[index] = tab,
            None => self.tabs.push(tab),
        }
        self.set_active(Some(&id));
        self.evict_over(max, &id, previous.as_deref())
    }

    /// Least recently used inactive tabs go first. The previously active tab
    /// is only taken when nothing else is left; `keep` never is.
    fn evict_over(&mut self, max: usize, keep: &str, previous: Option<&str>) -> Vec<TabId> {
        let mut evicted = Vec::new();
        while self.tabs.len() > max {
            let victim = self
                .tabs
                .iter()
                .enumerate()
                .filter(|(_, t)| t.id != keep && !t.is_active)
                .min_by_key(|(index, t)| {
                    (
                        Some(t.id.as_str()) == previous,
                        self.last_used.get(&t.id).copied().unwrap_or(0),
                        *index,
                    )
                })
                .map(|(index, _)| index);

            let Some(index) = victim else { break };
            let tab = self.tabs.remove(index);
            self.forget(&tab.id);
            evicted.push(tab.id);
        }
        evicted
    }

    fn mark_clean_if_unchanged(&mut self, id: &str, revision: u64) -> bool {
        if self.revision(id) != revision {
            return false;
        }
        match self.tab_mut(id) {
            Some(tab) => {
                tab.state.is_dirty = false;
                true
            }
            None => false,
        }
    }
}

/// Tab Working-Set Cache for one workspace at a time.
pub struct TabCache {
    storage: Arc<dyn StorageGateway>,
    max_tabs: usize,
    state: Mutex<CacheState>,
    events: EventBus,
}

impl TabCache {
    /// `max_tabs` is clamped to at least one.
    pub fn new(storage: Arc<dyn StorageGateway>, max_tabs: usize) -> Self {
        Self {
            storage,
            max_tabs: max_tabs.max(1),
            state: Mutex::new(CacheState::default()),
            events: EventBus::new(),
        }
    }

    pub(super) fn lock(&self) -> MutexGuard<'_, CacheState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub(super) fn gateway(&self) -> &dyn StorageGateway {
        self.storage.as_ref()
    }

    pub(super) fn emit(&self, event: SessionEvent) {
        self.events.emit(event);
    }

    pub fn subscribe(&self) -> broadcast::Receiver<SessionEvent> {
        self.events.subscribe()
    }

    pub fn max_tabs(&self) -> usize {
        self.max_tabs
    }

    /// Fetch a workspace's tabs and make the first `max_tabs` of them
    /// resident. Transient responses and loading flags start empty.
    pub async fn load(&self, workspace_id: &str) -> Result<(Vec<Tab>, Option<TabId>)> {
        let mut tabs = self
            .storage
            .get_tabs_by_workspace(workspace_id)
            .await
            .map_err(PingitError::into_storage)?;

        if tabs.is_empty() {
            debug!("Workspace {} has no tabs, creating one", workspace_id);
            let tab = self
                .storage
                .create_tab(workspace_id, None)
                .await
                .map_err(PingitError::into_storage)?;
            tabs.push(tab);
        }

        let total = tabs.len();
        tabs.truncate(self.max_tabs);
        let active_id = tabs
            .iter()
            .find(|t| t.is_active)
            .or_else(|| tabs.first())
            .map(|t| t.id.clone());

        let loaded = {
            let mut st = self.lock();
            let epoch = st.epoch + 1;
            *st = CacheState {
                workspace_id: Some(workspace_id.to_string()),
                tabs,
                epoch,
                ..CacheState::default()
            };
            st.set_active(active_id.as_deref());
            (st.tabs.clone(), st.active_id.clone())
        };

        info!(
            "Loaded {} of {} tabs for workspace {}",
            loaded.0.len(),
            total,
            workspace_id
        );
        self.emit(SessionEvent::TabsLoaded(workspace_id.to_string()));
        self.emit(SessionEvent::ActiveTabChanged(loaded.1.clone()));
        Ok(loaded)
    }

    /// New default tab, persisted, resident and active.
    pub async fn create_tab(&self, workspace_id: &str) -> Result<Tab> {
        self.ensure_loaded(workspace_id)?;
        let tab = self
            .storage
            .create_tab(workspace_id, None)
            .await
            .map_err(PingitError::into_storage)?;

        debug!("Created tab {} in workspace {}", tab.id, workspace_id);
        self.admit(tab.clone());
        self.emit(SessionEvent::TabCreated(tab.id.clone()));
        Ok(tab)
    }

    /// New tab carrying a clean copy of `source_tab_id`'s draft.
    pub async fn duplicate_tab(&self, workspace_id: &str, source_tab_id: &str) -> Result<Tab> {
        self.ensure_loaded(workspace_id)?;
        let mut state = self.lock().resident(source_tab_id)?.state.clone();
        state.is_dirty = false;

        let tab = self
            .storage
            .create_tab(workspace_id, Some(state))
            .await
            .map_err(PingitError::into_storage)?;

        debug!("Duplicated tab {} into {}", source_tab_id, tab.id);
        self.admit(tab.clone());
        self.emit(SessionEvent::TabCreated(tab.id.clone()));
        Ok(tab)
    }

    /// Close a tab. The last resident tab is reset instead of removed.
    pub async fn close_tab(&self, tab_id: &str) -> Result<()> {
        let (workspace_id, only_tab) = {
            let st = self.lock();
            let tab = st.resident(tab_id)?;
            (tab.workspace_id.clone(), st.tabs.len() <= 1)
        };

        if only_tab {
            return self.reset_tab(tab_id).await;
        }

        let next = self
            .storage
            .delete_tab(tab_id)
            .await
            .map_err(PingitError::into_storage)?;

        let (active, adopt) = {
            let mut st = self.lock();
            if let Some(index) = st.index_of(tab_id) {
                st.tabs.remove(index);
            }
            st.forget(tab_id);

            if st.active_id.as_deref() == Some(tab_id) {
                let resident_next = next.filter(|id| st.index_of(id).is_some());
                let adopt = resident_next.is_none();
                let chosen = resident_next.or_else(|| st.tabs.first().map(|t| t.id.clone()));
                st.set_active(chosen.as_deref());
                (Some(chosen), adopt)
            } else {
                (None, false)
            }
        };

        debug!("Closed tab {}", tab_id);
        self.emit(SessionEvent::TabClosed(tab_id.to_string()));

        if let Some(chosen) = active {
            // the gateway picked a tab that is not resident; store ours instead
            if adopt
                && let Some(id) = &chosen
                && let Err(e) = self.storage.set_active_tab(&workspace_id, id).await
            {
                warn!("Failed to persist active tab {}: {}", id, e);
            }
            self.emit(SessionEvent::ActiveTabChanged(chosen));
        }
        Ok(())
    }

    async fn reset_tab(&self, tab_id: &str) -> Result<()> {
        let reset = TabState::default();
        self.storage
            .update_tab(tab_id, &reset, None)
            .await
            .map_err(PingitError::into_storage)?;

        {
            let mut st = self.lock();
            if let Some(tab) = st.tab_mut(tab_id) {
                tab.state = reset;
                tab.request_id = None;
            }
            st.responses.remove(tab_id);
            st.bump_revision(tab_id);
            st.touch(tab_id);
        }

        debug!("Reset last tab {}", tab_id);
        self.emit(SessionEvent::TabStateChanged(tab_id.to_string()));
        self.emit(SessionEvent::ResponseChanged(tab_id.to_string()));
        Ok(())
    }

    pub async fn set_active_tab(&self, workspace_id: &str, tab_id: &str) -> Result<()> {
        self.ensure_loaded(workspace_id)?;
        self.lock().resident(tab_id)?;

        self.storage
            .set_active_tab(workspace_id, tab_id)
            .await
            .map_err(PingitError::into_storage)?;

        {
            let mut st = self.lock();
            if st.index_of(tab_id).is_some() {
                st.set_active(Some(tab_id));
            }
        }
        self.emit(SessionEvent::ActiveTabChanged(Some(tab_id.to_string())));
        Ok(())
    }

    /// Merge `update` into the draft and mark it dirty. Memory only.
    pub fn update_tab_state(&self, tab_id: &str, update: TabStateUpdate) -> Result<()> {
        self.edit(tab_id, |state| update.apply(state))
    }

    /// Set the URL text and derive params from its query. An unparsable URL
    /// leaves the params alone.
    pub fn update_url(&self, tab_id: &str, url: &str) -> Result<()> {
        self.edit(tab_id, |state| {
            match params::derive_params(url, &state.params) {
                Ok(derived) => state.params = derived,
                Err(e) => debug!("Keeping params of tab {}: {}", tab_id, e),
            }
            state.url = url.to_string();
        })
    }

    /// Set the param rows and rebuild the URL query from the active ones.
    pub fn update_params(&self, tab_id: &str, rows: Vec<KeyValue>) -> Result<()> {
        self.edit(tab_id, |state| {
            match params::url_with_params(&state.url, &rows) {
                Ok(url) => state.url = url,
                Err(e) => debug!("Keeping URL of tab {}: {}", tab_id, e),
            }
            state.params = rows;
        })
    }

    fn edit(&self, tab_id: &str, f: impl FnOnce(&mut TabState)) -> Result<()> {
        {
            let mut st = self.lock();
            let tab = st
                .tab_mut(tab_id)
                .ok_or_else(|| PingitError::TabNotFound(tab_id.to_string()))?;
            f(&mut tab.state);
            tab.state.is_dirty = true;
            st.bump_revision(tab_id);
            st.touch(tab_id);
        }
        self.emit(SessionEvent::TabStateChanged(tab_id.to_string()));
        Ok(())
    }

    /// Write the draft (and its history link) to the gateway as it is.
    pub async fn persist_tab(&self, tab_id: &str) -> Result<()> {
        let (state, request_id) = {
            let st = self.lock();
            let tab = st.resident(tab_id)?;
            (tab.state.clone(), tab.request_id.clone())
        };
        self.storage
            .update_tab(tab_id, &state, request_id.as_deref())
            .await
            .map_err(PingitError::into_storage)
    }

    /// Persist the draft as clean. The in-memory copy is only marked clean if
    /// no edit landed while the write was in flight.
    pub async fn save_tab(&self, tab_id: &str) -> Result<()> {
        let (state, request_id, revision) = {
            let st = self.lock();
            let tab = st.resident(tab_id)?;
            (tab.state.clone(), tab.request_id.clone(), st.revision(tab_id))
        };
        self.write_clean(tab_id, state, request_id, revision).await?;
        Ok(())
    }

    async fn write_clean(
        &self,
        tab_id: &str,
        mut state: TabState,
        request_id: Option<String>,
        revision: u64,
    ) -> Result<bool> {
        state.is_dirty = false;
        self.storage
            .update_tab(tab_id, &state, request_id.as_deref())
            .await
            .map_err(PingitError::into_storage)?;

        let cleaned = self.lock().mark_clean_if_unchanged(tab_id, revision);
        if cleaned {
            self.emit(SessionEvent::TabStateChanged(tab_id.to_string()));
        }
        Ok(cleaned)
    }

    /// Persist a new tab order and apply it to the resident list.
    pub async fn reorder_tabs(&self, tab_ids: &[TabId]) -> Result<()> {
        let workspace_id = self.current_workspace()?;
        self.storage
            .reorder_tabs(&workspace_id, tab_ids)
            .await
            .map_err(PingitError::into_storage)?;

        {
            let mut st = self.lock();
            for (position, id) in tab_ids.iter().enumerate() {
                if let Some(tab) = st.tab_mut(id) {
                    tab.position = position as i32;
                }
            }
            st.tabs.sort_by_key(|t| t.position);
        }
        self.emit(SessionEvent::TabsReordered(workspace_id));
        Ok(())
    }

    /// Install or clear the transient response of a tab. Writes for tabs that
    /// are not resident are kept but never read back.
    pub fn set_response(&self, tab_id: &str, response: Option<ResponseData>) {
        {
            let mut st = self.lock();
            match response {
                Some(response) => {
                    st.responses.insert(tab_id.to_string(), response);
                }
                None => {
                    st.responses.remove(tab_id);
                }
            }
            if st.index_of(tab_id).is_some() {
                st.touch(tab_id);
            }
        }
        self.emit(SessionEvent::ResponseChanged(tab_id.to_string()));
    }

    pub fn set_loading(&self, tab_id: &str, loading: bool) {
        let changed = {
            let mut st = self.lock();
            if loading {
                st.loading.insert(tab_id.to_string())
            } else {
                st.loading.remove(tab_id)
            }
        };
        if changed {
            self.emit(SessionEvent::LoadingChanged(tab_id.to_string(), loading));
        }
    }

    pub fn workspace_id(&self) -> Option<WorkspaceId> {
        self.lock().workspace_id.clone()
    }

    /// Resident tabs in display order.
    pub fn tabs(&self) -> Vec<Tab> {
        self.lock().tabs.clone()
    }

    pub fn tab(&self, tab_id: &str) -> Option<Tab> {
        self.lock().tab(tab_id).cloned()
    }

    pub fn active_tab_id(&self) -> Option<TabId> {
        self.lock().active_id.clone()
    }

    pub fn active_tab(&self) -> Option<Tab> {
        let st = self.lock();
        st.active_id.as_deref().and_then(|id| st.tab(id)).cloned()
    }

    pub fn resident_count(&self) -> usize {
        self.lock().tabs.len()
    }

    pub fn response(&self, tab_id: &str) -> Option<ResponseData> {
        let st = self.lock();
        st.tab(tab_id)?;
        st.responses.get(tab_id).cloned()
    }

    pub fn is_loading(&self, tab_id: &str) -> bool {
        let st = self.lock();
        st.tab(tab_id).is_some() && st.loading.contains(tab_id)
    }

    /// One page of the loaded workspace's history, newest first.
    pub async fn history_page(
        &self,
        limit: Option<usize>,
        offset: Option<usize>,
    ) -> Result<Vec<SavedRequest>> {
        let workspace_id = self.current_workspace()?;
        self.storage
            .get_requests_by_workspace(&workspace_id, limit, offset)
            .await
            .map_err(PingitError::into_storage)
    }

    pub async fn search_history(&self, query: &str, limit: Option<usize>) -> Result<Vec<SavedRequest>> {
        let workspace_id = self.current_workspace()?;
        self.storage
            .search_requests(&workspace_id, query, limit)
            .await
            .map_err(PingitError::into_storage)
    }

    pub async fn saved_request(&self, request_id: &str) -> Result<Option<SavedRequest>> {
        self.storage
            .get_request(request_id)
            .await
            .map_err(PingitError::into_storage)
    }

    /// Remove the loaded workspace's history. Tabs opened from it keep their
    /// drafts; their links simply stop resolving.
    pub async fn clear_history(&self) -> Result<usize> {
        let workspace_id = self.current_workspace()?;
        let removed = self
            .storage
            .clear_workspace_history(&workspace_id)
            .await
            .map_err(PingitError::into_storage)?;
        info!("Cleared {} history records of workspace {}", removed, workspace_id);
        Ok(removed)
    }

    pub(super) fn ensure_loaded(&self, workspace_id: &str) -> Result<()> {
        match self.lock().workspace_id.as_deref() {
            Some(loaded) if loaded == workspace_id => Ok(()),
            _ => Err(PingitError::WorkspaceNotLoaded(workspace_id.to_string())),
        }
    }

    fn current_workspace(&self) -> Result<WorkspaceId> {
        self.workspace_id()
            .ok_or_else(|| PingitError::WorkspaceNotLoaded("none".to_string()))
    }

    /// Admit under the lock, then announce evictions and the new active tab.
    pub(super) fn admit(&self, tab: Tab) {
        let id = tab.id.clone();
        let evicted = self.lock().admit(tab, self.max_tabs);
        for evicted_id in evicted {
            debug!("Evicted tab {} from memory", evicted_id);
            self.emit(SessionEvent::TabEvicted(evicted_id));
        }
        self.emit(SessionEvent::ActiveTabChanged(Some(id)));
    }

    /// Start a send: clear the old response and raise the loading flag.
    /// `None` when the URL is blank.
    pub(crate) fn begin_send(&self, tab_id: &str) -> Result<Option<SendTicket>> {
        let ticket = {
            let mut st = self.lock();
            let tab = st.resident(tab_id)?;
            if tab.state.url.trim().is_empty() {
                return Ok(None);
            }
            let ticket = SendTicket {
                workspace_id: tab.workspace_id.clone(),
                state: tab.state.clone(),
                revision: st.revision(tab_id),
                epoch: st.epoch,
            };
            st.responses.remove(tab_id);
            st.loading.insert(tab_id.to_string());
            ticket
        };
        self.emit(SessionEvent::ResponseChanged(tab_id.to_string()));
        self.emit(SessionEvent::LoadingChanged(tab_id.to_string(), true));
        Ok(Some(ticket))
    }

    /// Land a send's response and drop its loading flag, unless the cache was
    /// reloaded since the send began.
    pub(crate) fn end_send(&self, tab_id: &str, epoch: u64, response: Option<ResponseData>) -> bool {
        let had_response = response.is_some();
        {
            let mut st = self.lock();
            if st.epoch != epoch {
                return false;
            }
            if let Some(response) = response {
                st.responses.insert(tab_id.to_string(), response);
            }
            st.loading.remove(tab_id);
        }
        if had_response {
            self.emit(SessionEvent::ResponseChanged(tab_id.to_string()));
        }
        self.emit(SessionEvent::LoadingChanged(tab_id.to_string(), false));
        true
    }

    pub(crate) async fn record_history(&self, input: CreateRequestInput) -> Result<SavedRequest> {
        self.storage
            .create_request(input)
            .await
            .map_err(PingitError::into_storage)
    }

    /// After a recorded send: persist the tab as clean when it was not edited
    /// since the send began. Returns whether the tab ended up clean.
    pub(crate) async fn settle_send(&self, tab_id: &str, ticket: &SendTicket) -> Result<bool> {
        let current = {
            let st = self.lock();
            if st.epoch != ticket.epoch || st.revision(tab_id) != ticket.revision {
                return Ok(false);
            }
            st.tab(tab_id)
                .map(|t| (t.state.clone(), t.request_id.clone()))
        };
        match current {
            Some((state, request_id)) => {
                self.write_clean(tab_id, state, request_id, ticket.revision)
                    .await
            }
            None => Ok(false),
        }
    }
}
