use std::sync::Arc;
use std::time::Duration;

use pingit::http::{BodyType, Method, ReqwestTransport};
use pingit::http::builder::encode_form_rows;
use pingit::session::{Dispatcher, SendOutcome, TabCache, TabStateUpdate};
use pingit::storage::model::KeyValue;
use pingit::storage::{FileStore, StorageGateway};
use tempfile::TempDir;
use wiremock::matchers::{body_string, header, method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

struct Session {
    _dir: TempDir,
    cache: Arc<TabCache>,
    dispatcher: Arc<Dispatcher>,
    workspace_id: String,
}

async fn open_session(dir: TempDir) -> Session {
    let store = Arc::new(FileStore::open(dir.path()).unwrap());
    let cache = Arc::new(TabCache::new(store, 8));
    let workspace = cache.resolve_active_workspace().await.unwrap();
    cache.load(&workspace.id).await.unwrap();
    let transport = Arc::new(ReqwestTransport::new(Duration::from_secs(10)).unwrap());
    let dispatcher = Arc::new(Dispatcher::new(cache.clone(), transport));
    Session {
        _dir: dir,
        cache,
        dispatcher,
        workspace_id: workspace.id,
    }
}

#[tokio::test]
async fn test_create_edit_send_records_history() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/y"))
        .and(query_param("a", "1"))
        .and(header("accept", "*/*"))
        .respond_with(ResponseTemplate::new(200).set_body_string("{}"))
        .expect(1)
        .mount(&server)
        .await;

    let s = open_session(TempDir::new().unwrap()).await;
    let tab = s.cache.create_tab(&s.workspace_id).await.unwrap();
    let url = format!("{}/y?a=1", server.uri());
    s.cache
        .update_tab_state(
            &tab.id,
            TabStateUpdate {
                url: Some(url.clone()),
                ..TabStateUpdate::default()
            },
        )
        .unwrap();

    let outcome = s.dispatcher.send(&tab.id).await.unwrap();
    let SendOutcome::Completed(saved) = outcome else {
        panic!("expected a completed send, got {:?}", outcome);
    };

    assert_eq!(saved.url, url);
    assert_eq!(saved.response_status, Some(200));
    assert_eq!(saved.response_body.as_deref(), Some("{}"));
    assert_eq!(saved.name, "GET /y?a=1");
    assert!(!s.cache.tab(&tab.id).unwrap().state.is_dirty);
    assert_eq!(s.cache.response(&tab.id).unwrap().status, 200);

    let history = s.cache.history_page(None, None).await.unwrap();
    assert_eq!(history.len(), 1);
    assert_eq!(history[0].id, saved.id);
}

#[tokio::test]
async fn test_state_and_history_survive_reopen() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/items"))
        .respond_with(ResponseTemplate::new(201).set_body_string("created"))
        .mount(&server)
        .await;

    let dir = TempDir::new().unwrap();
    let root = dir.path().to_path_buf();
    let s = open_session(dir).await;
    let tab_id = s.cache.active_tab_id().unwrap();
    s.cache
        .update_tab_state(
            &tab_id,
            TabStateUpdate {
                method: Some(Method::Post),
                body_type: Some(BodyType::Raw),
                body_content: Some(r#"{"n":1}"#.to_string()),
                ..TabStateUpdate::default()
            },
        )
        .unwrap();
    s.cache
        .update_url(&tab_id, &format!("{}/items", server.uri()))
        .unwrap();
    let SendOutcome::Completed(saved) = s.dispatcher.send(&tab_id).await.unwrap() else {
        panic!("expected a completed send");
    };

    // a second process on the same data directory
    let store = Arc::new(FileStore::open(&root).unwrap());
    let cache = TabCache::new(store.clone(), 8);
    let workspace = cache.resolve_active_workspace().await.unwrap();
    assert_eq!(workspace.id, s.workspace_id);
    let (tabs, active) = cache.load(&workspace.id).await.unwrap();

    assert_eq!(active, Some(tab_id.clone()));
    assert_eq!(tabs[0].state.method, Method::Post);
    assert!(!tabs[0].state.is_dirty);
    // transient responses do not survive
    assert!(cache.response(&tab_id).is_none());

    let record = cache.saved_request(&saved.id).await.unwrap().unwrap();
    assert_eq!(record.response_status, Some(201));
    assert_eq!(record.body_content.as_deref(), Some(r#"{"n":1}"#));

    // reopening the record twice yields a single linked tab, also on disk
    let first = cache
        .open_from_history(&workspace.id, &record, record.response_snapshot())
        .await
        .unwrap();
    let second = cache.open_from_history(&workspace.id, &record, None).await.unwrap();
    assert_eq!(first.id, second.id);
    let linked = store
        .get_tabs_by_workspace(&workspace.id)
        .await
        .unwrap()
        .into_iter()
        .filter(|t| t.request_id.as_deref() == Some(record.id.as_str()))
        .count();
    assert_eq!(linked, 1);
    assert_eq!(cache.response(&first.id).unwrap().body, "created");
}

#[tokio::test]
async fn test_error_status_is_a_completed_send() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(500).set_body_string("boom"))
        .mount(&server)
        .await;

    let s = open_session(TempDir::new().unwrap()).await;
    let tab_id = s.cache.active_tab_id().unwrap();
    s.cache.update_url(&tab_id, &server.uri()).unwrap();

    let outcome = s.dispatcher.send(&tab_id).await.unwrap();
    let SendOutcome::Completed(saved) = outcome else {
        panic!("expected a completed send, got {:?}", outcome);
    };
    assert_eq!(saved.response_status, Some(500));
    assert_eq!(saved.response_status_text.as_deref(), Some("Internal Server Error"));
}

#[tokio::test]
async fn test_urlencoded_form_goes_out_encoded() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/form"))
        .and(header("content-type", "application/x-www-form-urlencoded"))
        .and(body_string("a=1+2&plus=x%2By"))
        .respond_with(ResponseTemplate::new(204))
        .expect(1)
        .mount(&server)
        .await;

    let s = open_session(TempDir::new().unwrap()).await;
    let tab_id = s.cache.active_tab_id().unwrap();
    let rows = vec![
        KeyValue::new("a", "1 2"),
        KeyValue::disabled("b", ""),
        KeyValue::new("plus", "x+y"),
    ];
    s.cache
        .update_tab_state(
            &tab_id,
            TabStateUpdate {
                method: Some(Method::Post),
                url: Some(format!("{}/form", server.uri())),
                body_type: Some(BodyType::UrlEncoded),
                body_content: Some(encode_form_rows(&rows).unwrap()),
                ..TabStateUpdate::default()
            },
        )
        .unwrap();

    let outcome = s.dispatcher.send(&tab_id).await.unwrap();
    assert!(matches!(outcome, SendOutcome::Completed(_)));
}

#[tokio::test]
async fn test_connection_failure_is_shown_inline() {
    let s = open_session(TempDir::new().unwrap()).await;
    let tab_id = s.cache.active_tab_id().unwrap();
    // nothing listens on port 1
    s.cache.update_url(&tab_id, "http://127.0.0.1:1/").unwrap();

    let outcome = s.dispatcher.send(&tab_id).await.unwrap();
    assert!(matches!(outcome, SendOutcome::Failed(_)));

    let response = s.cache.response(&tab_id).unwrap();
    assert_eq!(response.status, 0);
    assert_eq!(response.status_text, "Error");
    assert!(s.cache.history_page(None, None).await.unwrap().is_empty());
    assert!(s.cache.tab(&tab_id).unwrap().state.is_dirty);
}

#[tokio::test]
async fn test_cancel_slow_request() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(200).set_delay(Duration::from_secs(5)))
        .mount(&server)
        .await;

    let s = open_session(TempDir::new().unwrap()).await;
    let tab_id = s.cache.active_tab_id().unwrap();
    s.cache.update_url(&tab_id, &server.uri()).unwrap();

    let send = {
        let dispatcher = s.dispatcher.clone();
        let tab_id = tab_id.clone();
        tokio::spawn(async move { dispatcher.send(&tab_id).await })
    };
    while !s.dispatcher.is_sending(&tab_id) {
        tokio::time::sleep(Duration::from_millis(5)).await;
    }

    assert!(s.dispatcher.cancel(&tab_id));
    let outcome = tokio::time::timeout(Duration::from_secs(2), send)
        .await
        .expect("cancelled send should return promptly")
        .unwrap()
        .unwrap();

    assert_eq!(outcome, SendOutcome::Cancelled);
    assert!(s.cache.response(&tab_id).is_none());
    assert!(!s.cache.is_loading(&tab_id));
    assert!(s.cache.history_page(None, None).await.unwrap().is_empty());
}
