use chrono::{Local, TimeZone};
use inquire::Select;

use super::printer::short_id;
use crate::session::TabCache;
use crate::storage::model::SavedRequest;
use crate::{PingitError, Result};

/// How to pick the history record to open.
pub enum SelectionStrategy {
    Interactive,
    /// Full id or the short prefix shown by `history list`.
    Id(String),
    Latest,
}

/// How many recent records the interactive picker offers.
const PICKER_SIZE: usize = 50;

pub async fn select_request(
    cache: &TabCache,
    strategy: SelectionStrategy,
) -> Result<Option<SavedRequest>> {
    match strategy {
        SelectionStrategy::Interactive => {
            let requests = cache.history_page(Some(PICKER_SIZE), None).await?;
            select_interactive(requests)
        }
        SelectionStrategy::Latest => Ok(cache.history_page(Some(1), None).await?.pop()),
        SelectionStrategy::Id(id) => find_by_id(cache, &id).await,
    }
}

async fn find_by_id(cache: &TabCache, id: &str) -> Result<Option<SavedRequest>> {
    if let Some(found) = cache.saved_request(id).await? {
        return Ok(Some(found));
    }
    let mut matches: Vec<SavedRequest> = cache
        .history_page(None, None)
        .await?
        .into_iter()
        .filter(|r| r.id.starts_with(id))
        .collect();
    match matches.len() {
        0 | 1 => Ok(matches.pop()),
        n => Err(PingitError::Other(format!(
            "id prefix {} is ambiguous ({} records)",
            id, n
        ))),
    }
}

fn select_interactive(requests: Vec<SavedRequest>) -> Result<Option<SavedRequest>> {
    if requests.is_empty() {
        return Ok(None);
    }

    #[derive(Clone)]
    struct EntryWrapper {
        index: usize,
        display: String,
    }

    impl std::fmt::Display for EntryWrapper {
        fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
            write!(f, "{}", self.display)
        }
    }

    let options: Vec<EntryWrapper> = requests
        .iter()
        .enumerate()
        .map(|(index, r)| EntryWrapper {
            index,
            display: format_request_for_display(r),
        })
        .collect();

    let picked = Select::new("Open which request?", options)
        .with_page_size(15)
        .with_help_message("Enter to open, type to filter")
        .prompt_skippable()
        .map_err(|e| PingitError::Other(format!("Interaction canceled or failed: {}", e)))?;

    Ok(picked.map(|w| requests[w.index].clone()))
}

fn format_request_for_display(r: &SavedRequest) -> String {
    let time = Local
        .timestamp_millis_opt(r.created_at)
        .single()
        .map(|t| t.format("%Y-%m-%d %H:%M:%S").to_string())
        .unwrap_or_default();
    let status = r
        .response_status
        .map(|s| s.to_string())
        .unwrap_or_else(|| "---".to_string());
    format!("[{}] {} {} ({}) {}", status, r.method, r.url, time, short_id(&r.id))
}
