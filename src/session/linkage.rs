use tracing::debug;

use super::cache::TabCache;
use super::events::SessionEvent;
use crate::http::response::ResponseData;
use crate::storage::model::{SavedRequest, Tab};
use crate::{PingitError, Result};

impl TabCache {
    /// Open a history record, reusing the tab already linked to it.
    ///
    /// An existing tab keeps its draft; it is brought back into residency if
    /// it was evicted and made active. Otherwise a new clean tab is built from
    /// the record and linked to it. `snapshot`, when given, becomes the tab's
    /// transient response either way.
    pub async fn open_from_history(
        &self,
        workspace_id: &str,
        saved: &SavedRequest,
        snapshot: Option<ResponseData>,
    ) -> Result<Tab> {
        self.ensure_loaded(workspace_id)?;

        let resident = self.lock().find_by_request(&saved.id).cloned();
        let existing = match resident {
            Some(tab) => Some(tab),
            None => self
                .gateway()
                .get_tabs_by_workspace(workspace_id)
                .await
                .map_err(PingitError::into_storage)?
                .into_iter()
                .find(|t| t.request_id.as_deref() == Some(saved.id.as_str())),
        };

        let tab = match existing {
            Some(tab) => {
                self.gateway()
                    .set_active_tab(workspace_id, &tab.id)
                    .await
                    .map_err(PingitError::into_storage)?;
                debug!("Reusing tab {} for history record {}", tab.id, saved.id);
                tab
            }
            None => {
                let state = saved.to_tab_state();
                let mut tab = self
                    .gateway()
                    .create_tab(workspace_id, Some(state.clone()))
                    .await
                    .map_err(PingitError::into_storage)?;
                self.gateway()
                    .update_tab(&tab.id, &state, Some(&saved.id))
                    .await
                    .map_err(PingitError::into_storage)?;
                tab.state = state;
                tab.request_id = Some(saved.id.clone());
                debug!("Opened history record {} in new tab {}", saved.id, tab.id);
                tab
            }
        };

        // a tab that is still resident keeps its live draft
        let live = self.lock().tab(&tab.id).cloned();
        let tab = match live {
            Some(live) => {
                self.lock().set_active(Some(&live.id));
                self.emit(SessionEvent::ActiveTabChanged(Some(live.id.clone())));
                live
            }
            None => {
                self.admit(tab.clone());
                tab
            }
        };

        if let Some(snapshot) = snapshot {
            self.set_response(&tab.id, Some(snapshot));
        }
        Ok(self.tab(&tab.id).unwrap_or(tab))
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::http::types::Method;
    use crate::storage::model::{CreateRequestInput, KeyValue};
    use crate::storage::{MemoryStore, StorageGateway};

    async fn saved(store: &MemoryStore, ws: &str, url: &str) -> SavedRequest {
        store
            .create_request(CreateRequestInput {
                workspace_id: ws.to_string(),
                method: Method::Put,
                url: url.to_string(),
                params: None,
                headers: Some(vec![KeyValue::new("X-Id", "7")]),
                body_type: None,
                body_content: None,
                response_status: Some(204),
                response_status_text: Some("No Content".to_string()),
                response_headers: None,
                response_body: Some(String::new()),
                response_time_ms: Some(8),
                response_size_bytes: Some(0),
            })
            .await
            .unwrap()
    }

    async fn setup(max_tabs: usize) -> (Arc<MemoryStore>, TabCache, String) {
        let store = Arc::new(MemoryStore::new());
        let ws = store.get_all_workspaces().await.unwrap()[0].id.clone();
        let cache = TabCache::new(store.clone(), max_tabs);
        cache.load(&ws).await.unwrap();
        (store, cache, ws)
    }

    #[tokio::test]
    async fn test_reopening_twice_keeps_one_tab() {
        let (store, cache, ws) = setup(8).await;
        let record = saved(&store, &ws, "https://x/items/7").await;

        let first = cache
            .open_from_history(&ws, &record, record.response_snapshot())
            .await
            .unwrap();
        let second = cache.open_from_history(&ws, &record, None).await.unwrap();

        assert_eq!(first.id, second.id);
        let linked = cache
            .tabs()
            .into_iter()
            .filter(|t| t.request_id.as_deref() == Some(record.id.as_str()))
            .count();
        assert_eq!(linked, 1);
        assert_eq!(cache.active_tab_id(), Some(first.id.clone()));
        assert_eq!(cache.response(&first.id).unwrap().status, 204);
    }

    #[tokio::test]
    async fn test_new_tab_is_built_from_record() {
        let (store, cache, ws) = setup(8).await;
        let record = saved(&store, &ws, "https://x/items/7").await;

        let tab = cache.open_from_history(&ws, &record, None).await.unwrap();
        assert_eq!(tab.state.method, Method::Put);
        assert_eq!(tab.state.headers, vec![KeyValue::new("X-Id", "7")]);
        assert!(!tab.state.is_dirty);
        assert!(cache.response(&tab.id).is_none());

        let stored = store.get_tabs_by_workspace(&ws).await.unwrap();
        let linked = stored.iter().find(|t| t.id == tab.id).unwrap();
        assert_eq!(linked.request_id.as_deref(), Some(record.id.as_str()));
    }

    #[tokio::test]
    async fn test_reopen_does_not_overwrite_live_draft() {
        let (store, cache, ws) = setup(8).await;
        let record = saved(&store, &ws, "https://x/items/7").await;
        let tab = cache.open_from_history(&ws, &record, None).await.unwrap();
        cache.update_url(&tab.id, "https://x/items/8").unwrap();

        let again = cache
            .open_from_history(&ws, &record, record.response_snapshot())
            .await
            .unwrap();
        assert_eq!(again.state.url, "https://x/items/8");
        assert!(again.state.is_dirty);
        assert!(cache.response(&tab.id).is_some());
    }

    #[tokio::test]
    async fn test_evicted_linked_tab_comes_back() {
        let (store, cache, ws) = setup(2).await;
        let record = saved(&store, &ws, "https://x/items/7").await;
        let linked = cache.open_from_history(&ws, &record, None).await.unwrap();

        cache.create_tab(&ws).await.unwrap();
        cache.create_tab(&ws).await.unwrap();
        assert!(cache.tab(&linked.id).is_none());

        let back = cache.open_from_history(&ws, &record, None).await.unwrap();
        assert_eq!(back.id, linked.id);
        assert_eq!(cache.active_tab_id(), Some(linked.id));
        assert!(cache.resident_count() <= 2);
    }

    fn working_set(cache: &TabCache) -> (Vec<String>, Option<String>) {
        let ids = cache.tabs().into_iter().map(|t| t.id).collect();
        (ids, cache.active_tab_id())
    }

    #[tokio::test]
    async fn test_failed_open_of_new_record_leaves_working_set_unchanged() {
        let (store, cache, ws) = setup(2).await;
        cache.create_tab(&ws).await.unwrap();
        let record = saved(&store, &ws, "https://x/items/7").await;
        let before = working_set(&cache);
        store.set_available(false);

        let err = cache
            .open_from_history(&ws, &record, record.response_snapshot())
            .await
            .unwrap_err();
        assert!(err.is_storage_unavailable());
        assert_eq!(working_set(&cache), before);
        assert!(cache.tabs().iter().all(|t| t.request_id.is_none()));

        store.set_available(true);
        assert_eq!(store.get_tabs_by_workspace(&ws).await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_failed_activation_of_linked_tab_keeps_active_id() {
        let (store, cache, ws) = setup(4).await;
        let record = saved(&store, &ws, "https://x/items/7").await;
        let linked = cache.open_from_history(&ws, &record, None).await.unwrap();
        let other = cache.create_tab(&ws).await.unwrap();
        let before = working_set(&cache);
        assert_eq!(before.1, Some(other.id.clone()));
        store.set_available(false);

        let err = cache.open_from_history(&ws, &record, None).await.unwrap_err();
        assert!(err.is_storage_unavailable());
        assert_eq!(working_set(&cache), before);
        assert!(!cache.tab(&linked.id).unwrap().is_active);
    }

    #[tokio::test]
    async fn test_failed_reopen_of_evicted_tab_keeps_it_out() {
        let (store, cache, ws) = setup(2).await;
        let record = saved(&store, &ws, "https://x/items/7").await;
        let linked = cache.open_from_history(&ws, &record, None).await.unwrap();
        cache.create_tab(&ws).await.unwrap();
        cache.create_tab(&ws).await.unwrap();
        assert!(cache.tab(&linked.id).is_none());
        let before = working_set(&cache);
        store.set_available(false);

        assert!(cache.open_from_history(&ws, &record, None).await.unwrap_err().is_storage_unavailable());
        assert_eq!(working_set(&cache), before);
        assert!(cache.tab(&linked.id).is_none());
    }
}
