//! Send pipeline: builder, transport, history, cache.
//!
//! Each tab has at most one send in flight. A send moves through
//! `Idle -> Sending -> Completed | Cancelled | Failed -> Idle`; the in-flight
//! table below is the `Sending` state.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::cache::{SendTicket, TabCache};
use super::events::SessionEvent;
use crate::http::builder::{DEFAULT_USER_AGENT, build_request, default_headers};
use crate::http::client::Transport;
use crate::http::response::ResponseData;
use crate::storage::model::{CreateRequestInput, KeyValue, SavedRequest, TabId};
use crate::{PingitError, Result};

/// How a call to [`Dispatcher::send`] ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SendOutcome {
    /// The transport answered (any HTTP status) and the exchange was recorded.
    Completed(SavedRequest),
    /// Cancelled before a result was accepted. Nothing was recorded.
    Cancelled,
    /// Transport-level failure, shown inline as a zero-status response.
    Failed(String),
    /// Another send was already in flight on the tab.
    Rejected,
    /// The tab's URL is blank.
    Skipped,
}

struct InFlight {
    generation: u64,
    token: CancellationToken,
    // result accepted, history being written; too late to cancel
    settling: bool,
}

pub struct Dispatcher {
    cache: Arc<TabCache>,
    transport: Arc<dyn Transport>,
    defaults: Vec<KeyValue>,
    in_flight: Mutex<HashMap<TabId, InFlight>>,
    generation: AtomicU64,
}

impl Dispatcher {
    pub fn new(cache: Arc<TabCache>, transport: Arc<dyn Transport>) -> Self {
        Self {
            cache,
            transport,
            defaults: default_headers(DEFAULT_USER_AGENT),
            in_flight: Mutex::new(HashMap::new()),
            generation: AtomicU64::new(0),
        }
    }

    /// Replace the baseline headers merged into every request.
    pub fn with_default_headers(mut self, defaults: Vec<KeyValue>) -> Self {
        self.defaults = defaults;
        self
    }

    pub fn cache(&self) -> &Arc<TabCache> {
        &self.cache
    }

    pub fn is_sending(&self, tab_id: &str) -> bool {
        self.lock().contains_key(tab_id)
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<TabId, InFlight>> {
        self.in_flight.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Send the tab's current draft.
    ///
    /// Returns `Err` only when the tab is not resident or the exchange could
    /// not be recorded in history; transport problems are reported through
    /// [`SendOutcome::Failed`].
    pub async fn send(&self, tab_id: &str) -> Result<SendOutcome> {
        let generation = self.generation.fetch_add(1, Ordering::SeqCst) + 1;
        let token = CancellationToken::new();

        let registered = {
            let mut in_flight = self.lock();
            if in_flight.contains_key(tab_id) {
                false
            } else {
                in_flight.insert(
                    tab_id.to_string(),
                    InFlight {
                        generation,
                        token: token.clone(),
                        settling: false,
                    },
                );
                true
            }
        };
        if !registered {
            debug!("Send already in flight on tab {}, ignoring", tab_id);
            self.cache.emit(SessionEvent::SendRejected(tab_id.to_string()));
            return Ok(SendOutcome::Rejected);
        }
        let _guard = InFlightGuard {
            dispatcher: self,
            tab_id,
            generation,
        };

        let Some(ticket) = self.cache.begin_send(tab_id)? else {
            return Ok(SendOutcome::Skipped);
        };

        let request = build_request(&ticket.state, &self.defaults);
        info!("Sending {} {} from tab {}", request.method, request.url, tab_id);
        let result = self.transport.send(request, token).await;

        if !self.accept(tab_id, generation) {
            debug!("Discarding late result of cancelled send on tab {}", tab_id);
            return Ok(SendOutcome::Cancelled);
        }

        match result {
            Ok(response) => self.complete(tab_id, &ticket, response).await,
            Err(PingitError::Cancelled) => {
                self.cache.end_send(tab_id, ticket.epoch, None);
                info!("Send on tab {} cancelled", tab_id);
                Ok(SendOutcome::Cancelled)
            }
            Err(e) => {
                let message = match e {
                    PingitError::TransportFailure(message) => message,
                    other => other.to_string(),
                };
                warn!("Send on tab {} failed: {}", tab_id, message);
                self.cache
                    .end_send(tab_id, ticket.epoch, Some(ResponseData::error(message.clone())));
                Ok(SendOutcome::Failed(message))
            }
        }
    }

    async fn complete(
        &self,
        tab_id: &str,
        ticket: &SendTicket,
        response: ResponseData,
    ) -> Result<SendOutcome> {
        info!(
            "Tab {} got {} {} in {}ms",
            tab_id, response.status, response.status_text, response.time_ms
        );
        let input = CreateRequestInput::from_send(&ticket.workspace_id, &ticket.state, &response);
        if !self.cache.end_send(tab_id, ticket.epoch, Some(response)) {
            debug!("Tabs reloaded during send on tab {}, response dropped", tab_id);
        }

        let saved = match self.cache.record_history(input).await {
            Ok(saved) => saved,
            Err(e) => {
                warn!("Failed to record history for tab {}: {}", tab_id, e);
                return Err(e);
            }
        };

        if let Err(e) = self.cache.settle_send(tab_id, ticket).await {
            warn!("Failed to persist tab {} after send: {}", tab_id, e);
        }
        Ok(SendOutcome::Completed(saved))
    }

    /// Cancel the tab's in-flight send. Returns whether there was one to
    /// cancel. A new send may start right away; the old attempt's result is
    /// discarded whenever it arrives.
    pub fn cancel(&self, tab_id: &str) -> bool {
        let entry = {
            let mut in_flight = self.lock();
            match in_flight.get(tab_id) {
                Some(entry) if !entry.settling => in_flight.remove(tab_id),
                _ => None,
            }
        };
        match entry {
            Some(entry) => {
                entry.token.cancel();
                self.cache.set_loading(tab_id, false);
                info!("Cancelled send on tab {}", tab_id);
                true
            }
            None => false,
        }
    }

    /// Claim the transport result for `generation`. False when the attempt
    /// was cancelled or superseded meanwhile.
    fn accept(&self, tab_id: &str, generation: u64) -> bool {
        match self.lock().get_mut(tab_id) {
            Some(entry) if entry.generation == generation => {
                entry.settling = true;
                true
            }
            _ => false,
        }
    }

    fn release(&self, tab_id: &str, generation: u64) -> bool {
        let mut in_flight = self.lock();
        match in_flight.get(tab_id) {
            Some(entry) if entry.generation == generation => {
                in_flight.remove(tab_id);
                true
            }
            _ => false,
        }
    }
}

/// Leaves the `Sending` state on every exit path, including a dropped future.
struct InFlightGuard<'a> {
    dispatcher: &'a Dispatcher,
    tab_id: &'a str,
    generation: u64,
}

impl Drop for InFlightGuard<'_> {
    fn drop(&mut self) {
        if self.dispatcher.release(self.tab_id, self.generation) {
            self.dispatcher.cache.set_loading(self.tab_id, false);
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::AtomicUsize;

    use async_trait::async_trait;
    use tokio::sync::Notify;

    use super::*;
    use crate::http::builder::OutboundRequest;
    use crate::storage::{MemoryStore, StorageGateway};

    fn ok_response() -> ResponseData {
        ResponseData {
            status: 200,
            status_text: "OK".to_string(),
            headers: vec![KeyValue::new("content-type", "application/json")],
            body: "{}".to_string(),
            time_ms: 12,
            size_bytes: 2,
        }
    }

    /// Answers once `release` is notified, ignoring cancellation so late
    /// results can be simulated.
    struct GatedTransport {
        calls: AtomicUsize,
        entered: Notify,
        release: Notify,
        seen: Mutex<Vec<OutboundRequest>>,
    }

    impl GatedTransport {
        fn new() -> Self {
            Self {
                calls: AtomicUsize::new(0),
                entered: Notify::new(),
                release: Notify::new(),
                seen: Mutex::new(Vec::new()),
            }
        }
    }

    #[async_trait]
    impl Transport for GatedTransport {
        async fn send(
            &self,
            request: OutboundRequest,
            _cancel: CancellationToken,
        ) -> Result<ResponseData> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.seen.lock().unwrap().push(request);
            self.entered.notify_one();
            self.release.notified().await;
            Ok(ok_response())
        }
    }

    struct FailingTransport;

    #[async_trait]
    impl Transport for FailingTransport {
        async fn send(&self, _: OutboundRequest, _: CancellationToken) -> Result<ResponseData> {
            Err(PingitError::TransportFailure("connection refused".to_string()))
        }
    }

    struct Fixture {
        store: Arc<MemoryStore>,
        cache: Arc<TabCache>,
        workspace_id: String,
        tab_id: String,
    }

    async fn fixture(url: &str) -> Fixture {
        let store = Arc::new(MemoryStore::new());
        let workspace_id = store.get_all_workspaces().await.unwrap()[0].id.clone();
        let cache = Arc::new(TabCache::new(store.clone(), 8));
        cache.load(&workspace_id).await.unwrap();
        let tab_id = cache.active_tab_id().unwrap();
        if !url.is_empty() {
            cache.update_url(&tab_id, url).unwrap();
        }
        Fixture {
            store,
            cache,
            workspace_id,
            tab_id,
        }
    }

    async fn history_len(f: &Fixture) -> usize {
        f.store
            .get_requests_by_workspace(&f.workspace_id, None, None)
            .await
            .unwrap()
            .len()
    }

    #[tokio::test]
    async fn test_completed_send_records_history_and_cleans_tab() {
        let f = fixture("https://x/y?a=1").await;
        let transport = Arc::new(GatedTransport::new());
        transport.release.notify_one();
        let dispatcher = Dispatcher::new(f.cache.clone(), transport.clone());

        let outcome = dispatcher.send(&f.tab_id).await.unwrap();
        let SendOutcome::Completed(saved) = outcome else {
            panic!("expected a completed send, got {:?}", outcome);
        };
        assert_eq!(saved.url, "https://x/y?a=1");
        assert_eq!(saved.response_status, Some(200));
        // defaults go on the wire but not into history
        assert_eq!(saved.headers, None);
        assert!(transport.seen.lock().unwrap()[0].header("user-agent").is_some());

        let tab = f.cache.tab(&f.tab_id).unwrap();
        assert!(!tab.state.is_dirty);
        assert_eq!(f.cache.response(&f.tab_id).unwrap().body, "{}");
        assert!(!f.cache.is_loading(&f.tab_id));
        assert!(!dispatcher.is_sending(&f.tab_id));

        let stored = f.store.get_tabs_by_workspace(&f.workspace_id).await.unwrap();
        assert_eq!(stored[0].state.url, "https://x/y?a=1");
        assert!(!stored[0].state.is_dirty);
    }

    #[tokio::test]
    async fn test_second_send_is_rejected_while_first_in_flight() {
        let f = fixture("https://x/y").await;
        let transport = Arc::new(GatedTransport::new());
        let dispatcher = Arc::new(Dispatcher::new(f.cache.clone(), transport.clone()));
        let mut events = f.cache.subscribe();

        let first = {
            let dispatcher = dispatcher.clone();
            let tab_id = f.tab_id.clone();
            tokio::spawn(async move { dispatcher.send(&tab_id).await })
        };
        transport.entered.notified().await;
        assert!(f.cache.is_loading(&f.tab_id));

        let second = dispatcher.send(&f.tab_id).await.unwrap();
        assert_eq!(second, SendOutcome::Rejected);

        transport.release.notify_one();
        let first = first.await.unwrap().unwrap();
        assert!(matches!(first, SendOutcome::Completed(_)));
        assert_eq!(transport.calls.load(Ordering::SeqCst), 1);

        let mut rejected = 0;
        while let Ok(event) = events.try_recv() {
            if event == SessionEvent::SendRejected(f.tab_id.clone()) {
                rejected += 1;
            }
        }
        assert_eq!(rejected, 1);
    }

    #[tokio::test]
    async fn test_late_success_after_cancel_is_discarded() {
        let f = fixture("https://x/y").await;
        let transport = Arc::new(GatedTransport::new());
        let dispatcher = Arc::new(Dispatcher::new(f.cache.clone(), transport.clone()));

        let send = {
            let dispatcher = dispatcher.clone();
            let tab_id = f.tab_id.clone();
            tokio::spawn(async move { dispatcher.send(&tab_id).await })
        };
        transport.entered.notified().await;

        assert!(dispatcher.cancel(&f.tab_id));
        assert!(!dispatcher.cancel(&f.tab_id));
        assert!(!f.cache.is_loading(&f.tab_id));

        transport.release.notify_one();
        assert_eq!(send.await.unwrap().unwrap(), SendOutcome::Cancelled);
        assert!(f.cache.response(&f.tab_id).is_none());
        assert_eq!(history_len(&f).await, 0);
        assert!(f.cache.tab(&f.tab_id).unwrap().state.is_dirty);
    }

    #[tokio::test]
    async fn test_transport_failure_shows_inline_error() {
        let f = fixture("https://x/y").await;
        let dispatcher = Dispatcher::new(f.cache.clone(), Arc::new(FailingTransport));

        let outcome = dispatcher.send(&f.tab_id).await.unwrap();
        assert_eq!(outcome, SendOutcome::Failed("connection refused".to_string()));

        let response = f.cache.response(&f.tab_id).unwrap();
        assert_eq!(response, ResponseData::error("connection refused"));
        assert_eq!(history_len(&f).await, 0);
        assert!(f.cache.tab(&f.tab_id).unwrap().state.is_dirty);
        assert!(!f.cache.is_loading(&f.tab_id));
    }

    #[tokio::test]
    async fn test_blank_url_is_skipped() {
        let f = fixture("").await;
        let transport = Arc::new(GatedTransport::new());
        let dispatcher = Dispatcher::new(f.cache.clone(), transport.clone());

        assert_eq!(dispatcher.send(&f.tab_id).await.unwrap(), SendOutcome::Skipped);
        assert_eq!(transport.calls.load(Ordering::SeqCst), 0);
        assert!(!dispatcher.is_sending(&f.tab_id));
    }

    #[tokio::test]
    async fn test_edit_during_send_keeps_tab_dirty() {
        let f = fixture("https://x/first").await;
        let transport = Arc::new(GatedTransport::new());
        let dispatcher = Arc::new(Dispatcher::new(f.cache.clone(), transport.clone()));

        let send = {
            let dispatcher = dispatcher.clone();
            let tab_id = f.tab_id.clone();
            tokio::spawn(async move { dispatcher.send(&tab_id).await })
        };
        transport.entered.notified().await;
        f.cache.update_url(&f.tab_id, "https://x/second").unwrap();
        transport.release.notify_one();

        let SendOutcome::Completed(saved) = send.await.unwrap().unwrap() else {
            panic!("expected a completed send");
        };
        // the request that went out is the one recorded
        assert_eq!(saved.url, "https://x/first");
        let tab = f.cache.tab(&f.tab_id).unwrap();
        assert_eq!(tab.state.url, "https://x/second");
        assert!(tab.state.is_dirty);
    }

    #[tokio::test]
    async fn test_reload_during_send_drops_response_but_records() {
        let f = fixture("https://x/y").await;
        let transport = Arc::new(GatedTransport::new());
        let dispatcher = Arc::new(Dispatcher::new(f.cache.clone(), transport.clone()));

        let send = {
            let dispatcher = dispatcher.clone();
            let tab_id = f.tab_id.clone();
            tokio::spawn(async move { dispatcher.send(&tab_id).await })
        };
        transport.entered.notified().await;
        f.cache.load(&f.workspace_id).await.unwrap();
        transport.release.notify_one();

        assert!(matches!(send.await.unwrap().unwrap(), SendOutcome::Completed(_)));
        assert!(f.cache.response(&f.tab_id).is_none());
        assert_eq!(history_len(&f).await, 1);
    }

    #[tokio::test]
    async fn test_history_failure_is_reported_and_keeps_dirty() {
        let f = fixture("https://x/y").await;
        let transport = Arc::new(GatedTransport::new());
        let dispatcher = Arc::new(Dispatcher::new(f.cache.clone(), transport.clone()));

        let send = {
            let dispatcher = dispatcher.clone();
            let tab_id = f.tab_id.clone();
            tokio::spawn(async move { dispatcher.send(&tab_id).await })
        };
        transport.entered.notified().await;
        f.store.set_available(false);
        transport.release.notify_one();

        let err = send.await.unwrap().unwrap_err();
        assert!(err.is_storage_unavailable());
        assert_eq!(f.cache.response(&f.tab_id).unwrap().status, 200);
        assert!(f.cache.tab(&f.tab_id).unwrap().state.is_dirty);
        assert!(!dispatcher.is_sending(&f.tab_id));
    }

    #[tokio::test]
    async fn test_cancel_without_send_is_noop() {
        let f = fixture("https://x/y").await;
        let dispatcher = Dispatcher::new(f.cache.clone(), Arc::new(FailingTransport));
        assert!(!dispatcher.cancel(&f.tab_id));
        assert!(!dispatcher.cancel("unknown"));
    }
}
