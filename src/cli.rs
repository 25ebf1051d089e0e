use std::cmp::Reverse;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result, anyhow, bail};
use clap::{Args, Parser, Subcommand};
use colored::*;
use inquire::Confirm;
use tracing::debug;

use pingit::config::{AppConfig, ConfigLoader};
use pingit::history::printer::short_id;
use pingit::history::{SelectionStrategy, history_table, select_request, tabs_table, workspaces_table};
use pingit::http::builder::encode_form_rows;
use pingit::http::{BodyType, Method, ReqwestTransport, ResponseData, default_headers};
use pingit::session::{Dispatcher, SendOutcome, TabCache, TabStateUpdate};
use pingit::storage::model::KeyValue;
use pingit::storage::{FileStore, MemoryStore, StorageGateway};
use pingit::utils::formatter::{ResponseFormat, ResponseFormatter};

#[derive(Parser)]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Config file to use instead of searching for pingit.toml
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    /// Keep workspaces, tabs and history in memory for this run only
    #[arg(long, global = true)]
    pub ephemeral: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Send a request from the active tab
    Send(SendArgs),
    /// Show the open tabs of the active workspace
    Tabs,
    /// Browse, reopen and clear request history
    #[command(subcommand)]
    History(HistoryCommand),
    /// List, create and switch workspaces
    #[command(subcommand)]
    Workspace(WorkspaceCommand),
}

#[derive(Args)]
pub struct SendArgs {
    /// Encode `key=value` items as a urlencoded form instead of JSON
    #[arg(short, long)]
    pub form: bool,

    /// Raw request body
    #[arg(short = 'd', long = "data")]
    pub data: Option<String>,

    /// Use a new tab instead of the active one
    #[arg(long)]
    pub new_tab: bool,

    /// Show response headers and the whole body
    #[arg(short, long)]
    pub verbose: bool,

    /// [METHOD] URL [ITEM...] where ITEM is `k==v` (query), `k=v` (field),
    /// `k:=json` (raw JSON field) or `Header:value`
    #[arg(required = true, trailing_var_arg = true, allow_hyphen_values = true)]
    pub items: Vec<String>,
}

#[derive(Subcommand)]
pub enum HistoryCommand {
    /// Newest first
    List {
        #[arg(short, long)]
        limit: Option<usize>,
        #[arg(long, default_value_t = 0)]
        offset: usize,
    },
    /// Case-insensitive search over name, URL and bodies
    Search {
        query: String,
        #[arg(short, long)]
        limit: Option<usize>,
    },
    /// Reopen a request in a tab (interactive pick without an id)
    Open {
        /// Full id or the short id shown by `history list`
        id: Option<String>,
        #[arg(long, conflicts_with = "id")]
        latest: bool,
        /// Send it again right away
        #[arg(long)]
        send: bool,
        #[arg(short, long)]
        verbose: bool,
    },
    /// Delete the active workspace's history
    Clear {
        #[arg(short, long)]
        yes: bool,
    },
}

#[derive(Subcommand)]
pub enum WorkspaceCommand {
    List,
    Create { name: String },
    /// Switch by id, short id or name
    Use { target: String },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ItemKind {
    Query,
    JsonField,
    Field,
    Header,
}

const SEPARATORS: [(&str, ItemKind); 4] = [
    ("==", ItemKind::Query),
    (":=", ItemKind::JsonField),
    ("=", ItemKind::Field),
    (":", ItemKind::Header),
];

/// A request as typed on the command line.
#[derive(Debug, Default, PartialEq)]
struct RequestDraft {
    method: Option<Method>,
    url: String,
    query: Vec<KeyValue>,
    headers: Vec<KeyValue>,
    fields: Vec<(String, serde_json::Value)>,
}

impl RequestDraft {
    /// The tab edit for this draft. Fields make a JSON body, or a urlencoded
    /// form with `form`; `data` wins over both. A body implies POST unless a
    /// method was given.
    fn to_update(&self, form: bool, data: Option<&str>) -> Result<TabStateUpdate> {
        let (body_type, body_content) = match data {
            Some(data) => (BodyType::Raw, data.to_string()),
            None if self.fields.is_empty() => (BodyType::None, String::new()),
            None if form => {
                let rows: Vec<KeyValue> = self
                    .fields
                    .iter()
                    .map(|(k, v)| match v {
                        serde_json::Value::String(s) => KeyValue::new(k.as_str(), s.as_str()),
                        other => KeyValue::new(k.as_str(), other.to_string()),
                    })
                    .collect();
                (BodyType::UrlEncoded, encode_form_rows(&rows)?)
            }
            None => {
                let object: serde_json::Map<String, serde_json::Value> =
                    self.fields.iter().cloned().collect();
                (BodyType::Raw, serde_json::to_string(&object)?)
            }
        };

        let method = match self.method {
            Some(method) => method,
            None if body_type != BodyType::None => Method::Post,
            None => Method::Get,
        };

        Ok(TabStateUpdate {
            method: Some(method),
            headers: Some(self.headers.clone()),
            body_type: Some(body_type),
            body_content: Some(body_content),
            ..TabStateUpdate::default()
        })
    }
}

/// URLs are not items: `http://`, `:/path`, `:port`, `host:port`.
fn is_key_value_param(arg: &str) -> bool {
    if arg.contains("://") || arg.starts_with(":/") {
        return false;
    }
    if let Some(port) = arg.strip_prefix(':')
        && !port.is_empty()
        && port.chars().all(|c| c.is_ascii_digit())
    {
        return false;
    }
    if let Some((host, rest)) = arg.split_once(':') {
        let port = rest.split('/').next().unwrap_or_default();
        if !host.is_empty() && !port.is_empty() && port.chars().all(|c| c.is_ascii_digit()) {
            return false;
        }
    }
    split_item(arg).is_some()
}

/// Earliest separator wins; on a tie the longer one.
fn split_item(arg: &str) -> Option<(ItemKind, &str, &str)> {
    SEPARATORS
        .iter()
        .filter_map(|(sep, kind)| arg.find(sep).map(|pos| (pos, sep.len(), *kind)))
        .min_by_key(|(pos, len, _)| (*pos, Reverse(*len)))
        .map(|(pos, len, kind)| (kind, &arg[..pos], &arg[pos + len..]))
}

/// Expand the localhost shorthands and add a scheme when missing.
fn normalize_url(url: &str) -> String {
    if let Some(rest) = url.strip_prefix(':') {
        return if rest.starts_with('/') {
            format!("http://localhost{}", rest)
        } else {
            format!("http://localhost:{}", rest)
        };
    }
    if url.contains("://") {
        url.to_string()
    } else {
        format!("http://{}", url)
    }
}

fn parse_items(items: &[String]) -> Result<RequestDraft> {
    let mut draft = RequestDraft::default();
    let mut iter = items.iter().peekable();

    if let Some(first) = iter.peek()
        && let Ok(method) = Method::parse(first)
    {
        draft.method = Some(method);
        iter.next();
    }

    match iter.next() {
        Some(url) if !is_key_value_param(url) => draft.url = normalize_url(url),
        _ => bail!("URL is required"),
    }

    for item in iter {
        match split_item(item) {
            Some((ItemKind::Query, k, v)) => draft.query.push(KeyValue::new(k, v)),
            Some((ItemKind::JsonField, k, v)) => {
                let value = serde_json::from_str(v)
                    .unwrap_or_else(|_| serde_json::Value::String(v.to_string()));
                draft.fields.push((k.to_string(), value));
            }
            Some((ItemKind::Field, k, v)) => {
                draft
                    .fields
                    .push((k.to_string(), serde_json::Value::String(v.to_string())));
            }
            Some((ItemKind::Header, k, v)) => draft.headers.push(KeyValue::new(k.trim(), v.trim())),
            None => bail!("Unrecognized item: {}", item),
        }
    }

    Ok(draft)
}

struct App {
    config: AppConfig,
    cache: Arc<TabCache>,
    dispatcher: Arc<Dispatcher>,
    workspace_id: String,
}

impl App {
    async fn open(cli: &Cli) -> Result<Self> {
        let config = ConfigLoader::resolve(cli.config.as_deref())?;
        let storage: Arc<dyn StorageGateway> = if cli.ephemeral {
            Arc::new(MemoryStore::new())
        } else {
            Arc::new(FileStore::open(config.data_dir())?)
        };

        let cache = Arc::new(TabCache::new(storage, config.max_tabs()));
        let workspace = cache.resolve_active_workspace().await?;
        cache.load(&workspace.id).await?;
        debug!("Session open on workspace {}", workspace.name);

        let transport = Arc::new(ReqwestTransport::new(config.request_timeout())?);
        let dispatcher = Arc::new(
            Dispatcher::new(cache.clone(), transport)
                .with_default_headers(default_headers(&config.user_agent)),
        );

        Ok(Self {
            config,
            cache,
            dispatcher,
            workspace_id: workspace.id,
        })
    }

    async fn send(&self, args: SendArgs) -> Result<()> {
        let draft = parse_items(&args.items)?;
        let update = draft.to_update(args.form, args.data.as_deref())?;

        let tab_id = if args.new_tab {
            self.cache.create_tab(&self.workspace_id).await?.id
        } else {
            self.cache
                .active_tab()
                .context("no active tab in this workspace")?
                .id
        };

        self.cache.update_tab_state(&tab_id, update)?;
        self.cache.update_url(&tab_id, &draft.url)?;
        if !draft.query.is_empty() {
            let mut params = self
                .cache
                .tab(&tab_id)
                .map(|t| t.state.params)
                .unwrap_or_default();
            params.extend(draft.query.iter().cloned());
            self.cache.update_params(&tab_id, params)?;
        }

        self.dispatch(&tab_id, args.verbose).await
    }

    /// Send a tab, cancelling it on Ctrl-C.
    async fn dispatch(&self, tab_id: &str, verbose: bool) -> Result<()> {
        let mut task = {
            let dispatcher = self.dispatcher.clone();
            let tab_id = tab_id.to_string();
            tokio::spawn(async move { dispatcher.send(&tab_id).await })
        };

        let outcome = tokio::select! {
            joined = &mut task => joined?,
            _ = tokio::signal::ctrl_c() => {
                if self.dispatcher.cancel(tab_id) {
                    eprintln!("{}", "Cancelling...".yellow());
                }
                task.await?
            }
        }?;

        match outcome {
            SendOutcome::Completed(saved) => {
                let response = self
                    .cache
                    .response(tab_id)
                    .or_else(|| saved.response_snapshot())
                    .unwrap_or_else(|| ResponseData::error("no response"));
                println!("{}", formatter(verbose).format(&response));
                eprintln!("{}", format!("Saved to history as {}", short_id(&saved.id)).dimmed());
                Ok(())
            }
            SendOutcome::Failed(message) => {
                println!("{}", formatter(verbose).format(&ResponseData::error(message.clone())));
                Err(anyhow!("request failed: {}", message))
            }
            SendOutcome::Cancelled => {
                eprintln!("{}", "Request cancelled".yellow());
                Ok(())
            }
            SendOutcome::Rejected => bail!("a request is already in flight on this tab"),
            SendOutcome::Skipped => bail!("URL is required"),
        }
    }

    fn tabs(&self) {
        println!("{}", tabs_table(&self.cache.tabs()));
    }

    async fn history(&self, command: HistoryCommand) -> Result<()> {
        match command {
            HistoryCommand::List { limit, offset } => {
                let limit = limit.unwrap_or(self.config.history_page_size);
                let requests = self.cache.history_page(Some(limit), Some(offset)).await?;
                if requests.is_empty() {
                    println!("No history yet");
                } else {
                    println!("{}", history_table(&requests));
                }
            }
            HistoryCommand::Search { query, limit } => {
                let requests = self.cache.search_history(&query, limit).await?;
                if requests.is_empty() {
                    println!("Nothing matches {:?}", query);
                } else {
                    println!("{}", history_table(&requests));
                }
            }
            HistoryCommand::Open {
                id,
                latest,
                send,
                verbose,
            } => {
                let strategy = match (id, latest) {
                    (Some(id), _) => SelectionStrategy::Id(id),
                    (None, true) => SelectionStrategy::Latest,
                    (None, false) => SelectionStrategy::Interactive,
                };
                let Some(saved) = select_request(&self.cache, strategy).await? else {
                    println!("Nothing selected");
                    return Ok(());
                };

                let snapshot = saved.response_snapshot();
                let tab = self
                    .cache
                    .open_from_history(&self.workspace_id, &saved, snapshot.clone())
                    .await?;
                eprintln!("Opened {} in tab {}", saved.name.bold(), short_id(&tab.id));

                if send {
                    return self.dispatch(&tab.id, verbose).await;
                }
                if let Some(response) = snapshot {
                    println!("{}", formatter(verbose).format(&response));
                }
            }
            HistoryCommand::Clear { yes } => {
                let confirmed = yes
                    || Confirm::new("Delete all history of this workspace?")
                        .with_default(false)
                        .prompt()?;
                if confirmed {
                    let removed = self.cache.clear_history().await?;
                    println!("Removed {} records", removed);
                }
            }
        }
        Ok(())
    }

    async fn workspace(&self, command: WorkspaceCommand) -> Result<()> {
        match command {
            WorkspaceCommand::List => {
                let workspaces = self.cache.workspaces().await?;
                println!("{}", workspaces_table(&workspaces, Some(&self.workspace_id)));
            }
            WorkspaceCommand::Create { name } => {
                let workspace = self.cache.create_workspace(&name).await?;
                println!("Created workspace {} ({})", workspace.name.bold(), short_id(&workspace.id));
            }
            WorkspaceCommand::Use { target } => {
                let workspaces = self.cache.workspaces().await?;
                let workspace = workspaces
                    .iter()
                    .find(|w| w.id == target)
                    .or_else(|| workspaces.iter().find(|w| w.id.starts_with(&target)))
                    .or_else(|| workspaces.iter().find(|w| w.name.eq_ignore_ascii_case(&target)))
                    .with_context(|| format!("no workspace matches {:?}", target))?;
                let (tabs, _) = self.cache.switch_workspace(&workspace.id).await?;
                println!("Switched to {} ({} tabs)", workspace.name.bold(), tabs.len());
            }
        }
        Ok(())
    }
}

fn formatter(verbose: bool) -> ResponseFormatter {
    let format = if verbose {
        ResponseFormat::Verbose
    } else {
        ResponseFormat::Compact
    };
    ResponseFormatter::new(format)
}

pub async fn run(cli: Cli) -> Result<()> {
    let app = App::open(&cli).await?;
    match cli.command {
        Commands::Send(args) => app.send(args).await,
        Commands::Tabs => {
            app.tabs();
            Ok(())
        }
        Commands::History(command) => app.history(command).await,
        Commands::Workspace(command) => app.workspace(command).await,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn args(items: &[&str]) -> Vec<String> {
        items.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_parse_items() {
        let draft = parse_items(&args(&[
            "POST",
            "example.com",
            "id:=1",
            "name=foo",
            "token:123",
            "q==search",
        ]))
        .unwrap();

        assert_eq!(draft.method, Some(Method::Post));
        assert_eq!(draft.url, "http://example.com");
        assert_eq!(draft.query, vec![KeyValue::new("q", "search")]);
        assert_eq!(draft.headers, vec![KeyValue::new("token", "123")]);
        assert_eq!(
            draft.fields,
            vec![
                ("id".to_string(), serde_json::json!(1)),
                ("name".to_string(), serde_json::json!("foo")),
            ]
        );
    }

    #[test]
    fn test_header_value_may_contain_equals() {
        let draft = parse_items(&args(&["example.com", "Authorization:Bearer a=b"])).unwrap();
        assert_eq!(draft.headers, vec![KeyValue::new("Authorization", "Bearer a=b")]);
        assert!(draft.fields.is_empty());
    }

    #[test]
    fn test_url_is_required() {
        assert!(parse_items(&args(&["GET"])).is_err());
        assert!(parse_items(&args(&["name=foo"])).is_err());
    }

    #[test]
    fn test_body_implies_post() {
        let draft = parse_items(&args(&["example.com", "name=foo"])).unwrap();
        let update = draft.to_update(false, None).unwrap();
        assert_eq!(update.method, Some(Method::Post));
        assert_eq!(update.body_type, Some(BodyType::Raw));
        assert_eq!(update.body_content.as_deref(), Some(r#"{"name":"foo"}"#));

        let form = draft.to_update(true, None).unwrap();
        assert_eq!(form.body_type, Some(BodyType::UrlEncoded));

        let bare = parse_items(&args(&["example.com"])).unwrap();
        let update = bare.to_update(false, None).unwrap();
        assert_eq!(update.method, Some(Method::Get));
        assert_eq!(update.body_type, Some(BodyType::None));
    }

    #[test]
    fn test_is_key_value_param() {
        assert!(!is_key_value_param("http://example.com"));
        assert!(!is_key_value_param("https://example.com/api"));
        assert!(!is_key_value_param(":/api/users"));
        assert!(!is_key_value_param(":3000"));
        assert!(!is_key_value_param("localhost:3000"));
        assert!(!is_key_value_param("localhost:3000/api"));
        assert!(!is_key_value_param("192.168.1.1:9000"));

        assert!(is_key_value_param("key=value"));
        assert!(is_key_value_param("q==search"));
        assert!(is_key_value_param("id:=123"));
        assert!(is_key_value_param("Content-Type:application/json"));
    }

    #[test]
    fn test_normalize_url() {
        assert_eq!(normalize_url(":3000/a"), "http://localhost:3000/a");
        assert_eq!(normalize_url(":/api"), "http://localhost/api");
        assert_eq!(normalize_url("example.com"), "http://example.com");
        assert_eq!(normalize_url("https://x.io"), "https://x.io");
    }
}
