use std::fs::{self, File, OpenOptions};
use std::io::{BufRead, BufReader, BufWriter, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use fs2::FileExt;
use tracing::{debug, info, warn};

use super::model::{AppSettings, CreateRequestInput, SavedRequest, Tab, TabState, Workspace};
use super::state::StoreState;
use super::{
    DEFAULT_PAGE_SIZE, DEFAULT_SEARCH_LIMIT, StorageGateway, matches_query, new_id, now_millis,
};
use crate::{PingitError, Result};

const STATE_FILE: &str = "state.json";
const LOCK_FILE: &str = "state.lock";
const HISTORY_DIR: &str = "history";
// 20 MB soft limit per workspace history file
const COMPACTION_THRESHOLD_BYTES: u64 = 20 * 1024 * 1024;
// Keep last 10,000 entries
const MAX_ENTRIES: usize = 10_000;

/// Durable gateway rooted at a data directory.
///
/// ```text
/// <root>/state.json               workspaces, tabs, settings
/// <root>/state.lock               guards state.json across processes
/// <root>/history/<workspace>.jsonl  one SavedRequest per line, oldest first
/// ```
#[derive(Debug, Clone)]
pub struct FileStore {
    root: PathBuf,
}

impl FileStore {
    /// Open (or initialize) a store under `root`.
    pub fn open(root: impl Into<PathBuf>) -> Result<Self> {
        let store = Self { root: root.into() };
        fs::create_dir_all(store.root.join(HISTORY_DIR))
            .map_err(|e| PingitError::Io(e).into_storage())?;
        let created = store.with_state(|state| Ok(state.ensure_default_workspace()))?;
        if created {
            info!(root = %store.root.display(), "Initialized new data directory");
        }
        Ok(store)
    }

    fn state_path(&self) -> PathBuf {
        self.root.join(STATE_FILE)
    }

    fn history_path(&self, workspace_id: &str) -> PathBuf {
        let safe: String = workspace_id
            .chars()
            .map(|c| if c.is_ascii_alphanumeric() || c == '-' { c } else { '_' })
            .collect();
        self.root.join(HISTORY_DIR).join(format!("{}.jsonl", safe))
    }

    fn open_lock(&self) -> Result<File> {
        Ok(OpenOptions::new()
            .create(true)
            .truncate(false)
            .write(true)
            .open(self.root.join(LOCK_FILE))?)
    }

    fn load_state(&self) -> Result<StoreState> {
        let path = self.state_path();
        if !path.exists() {
            return Ok(StoreState::default());
        }
        let content = fs::read_to_string(&path)?;
        Ok(serde_json::from_str(&content)?)
    }

    /// Read the state under a shared lock.
    fn read_state<T>(&self, f: impl FnOnce(&StoreState) -> T) -> Result<T> {
        let run = || -> Result<T> {
            let lock = self.open_lock()?;
            lock.lock_shared()?;
            let state = self.load_state()?;
            Ok(f(&state))
        };
        run().map_err(PingitError::into_storage)
    }

    /// Load, mutate and rewrite the state under an exclusive lock. The new
    /// document is written to a sibling file and renamed over the old one.
    fn with_state<T>(&self, f: impl FnOnce(&mut StoreState) -> Result<T>) -> Result<T> {
        let run = || -> Result<T> {
            let lock = self.open_lock()?;
            lock.lock_exclusive()?;

            let mut state = self.load_state()?;
            let value = f(&mut state)?;

            let tmp = self.root.join(format!("{}.tmp", STATE_FILE));
            fs::write(&tmp, serde_json::to_vec_pretty(&state)?)?;
            fs::rename(&tmp, self.state_path())?;
            Ok(value)
        };
        run().map_err(PingitError::into_storage)
    }

    fn append_history(&self, entry: &SavedRequest) -> Result<()> {
        let json = serde_json::to_string(entry)?;
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(self.history_path(&entry.workspace_id))?;

        file.lock_exclusive()?;
        writeln!(file, "{}", json)?;
        Ok(())
    }

    /// All history of a workspace, oldest first, compacting first if needed.
    fn read_history(&self, workspace_id: &str) -> Result<Vec<SavedRequest>> {
        let path = self.history_path(workspace_id);
        if !path.exists() {
            return Ok(Vec::new());
        }
        self.compact_if_needed(&path)?;
        read_entries(&path)
    }

    fn compact_if_needed(&self, path: &Path) -> Result<()> {
        let file = OpenOptions::new().read(true).write(true).open(path)?;
        if file.metadata()?.len() < COMPACTION_THRESHOLD_BYTES {
            return Ok(());
        }

        file.lock_exclusive()?;
        // someone else may have compacted while we waited
        if file.metadata()?.len() < COMPACTION_THRESHOLD_BYTES {
            return Ok(());
        }

        let entries: Vec<SavedRequest> = BufReader::new(&file)
            .lines()
            .map_while(|l| l.ok())
            .filter_map(|l| serde_json::from_str(&l).ok())
            .collect();
        if entries.len() <= MAX_ENTRIES {
            return Ok(());
        }

        let skip = entries.len() - MAX_ENTRIES;
        let mut file = file;
        file.set_len(0)?;
        file.seek(SeekFrom::Start(0))?;
        let mut writer = BufWriter::new(file);
        for entry in entries.iter().skip(skip) {
            writeln!(writer, "{}", serde_json::to_string(entry)?)?;
        }
        writer.flush()?;

        info!(path = %path.display(), dropped = skip, "Compacted request history");
        Ok(())
    }

    fn history_files(&self) -> Result<Vec<PathBuf>> {
        let mut files = Vec::new();
        for entry in fs::read_dir(self.root.join(HISTORY_DIR))? {
            let path = entry?.path();
            if path.extension().and_then(|e| e.to_str()) == Some("jsonl") {
                files.push(path);
            }
        }
        Ok(files)
    }

    fn truncate_history(&self, workspace_id: &str) -> Result<usize> {
        let path = self.history_path(workspace_id);
        if !path.exists() {
            return Ok(0);
        }
        let file = OpenOptions::new().read(true).write(true).open(&path)?;
        file.lock_exclusive()?;
        let count = BufReader::new(&file)
            .lines()
            .map_while(|l| l.ok())
            .filter(|l| serde_json::from_str::<SavedRequest>(l).is_ok())
            .count();
        file.set_len(0)?;
        Ok(count)
    }

    /// Run file work on the blocking pool. Every failure is `StorageUnavailable`.
    async fn blocking<T, F>(&self, f: F) -> Result<T>
    where
        T: Send + 'static,
        F: FnOnce(&FileStore) -> Result<T> + Send + 'static,
    {
        let store = self.clone();
        tokio::task::spawn_blocking(move || f(&store))
            .await
            .map_err(|e| PingitError::StorageUnavailable(format!("storage task failed: {}", e)))?
            .map_err(PingitError::into_storage)
    }
}

fn read_entries(path: &Path) -> Result<Vec<SavedRequest>> {
    let file = File::open(path)?;
    file.lock_shared()?;

    let mut entries = Vec::new();
    for line in BufReader::new(file).lines() {
        let line = line?;
        if line.trim().is_empty() {
            continue;
        }
        match serde_json::from_str::<SavedRequest>(&line) {
            Ok(entry) => entries.push(entry),
            Err(e) => warn!(path = %path.display(), "Skipping unreadable history line: {}", e),
        }
    }
    Ok(entries)
}

#[async_trait]
impl StorageGateway for FileStore {
    async fn get_tabs_by_workspace(&self, workspace_id: &str) -> Result<Vec<Tab>> {
        let workspace_id = workspace_id.to_string();
        self.blocking(move |store| store.read_state(|state| state.tabs_of(&workspace_id)))
            .await
    }

    async fn create_tab(&self, workspace_id: &str, state: Option<TabState>) -> Result<Tab> {
        let workspace_id = workspace_id.to_string();
        self.blocking(move |store| store.with_state(|s| Ok(s.create_tab(&workspace_id, state))))
            .await
    }

    async fn update_tab(
        &self,
        id: &str,
        state: &TabState,
        request_id: Option<&str>,
    ) -> Result<()> {
        let id = id.to_string();
        let state = state.clone();
        let request_id = request_id.map(str::to_string);
        self.blocking(move |store| {
            store.with_state(|s| s.update_tab(&id, &state, request_id.as_deref()))
        })
        .await
    }

    async fn set_active_tab(&self, workspace_id: &str, tab_id: &str) -> Result<()> {
        let workspace_id = workspace_id.to_string();
        let tab_id = tab_id.to_string();
        self.blocking(move |store| {
            store.with_state(|s| {
                s.set_active_tab(&workspace_id, &tab_id);
                Ok(())
            })
        })
        .await
    }

    async fn delete_tab(&self, id: &str) -> Result<Option<String>> {
        let id = id.to_string();
        self.blocking(move |store| store.with_state(|s| Ok(s.delete_tab(&id))))
            .await
    }

    async fn reorder_tabs(&self, workspace_id: &str, tab_ids: &[String]) -> Result<()> {
        let workspace_id = workspace_id.to_string();
        let tab_ids = tab_ids.to_vec();
        self.blocking(move |store| {
            store.with_state(|s| {
                s.reorder_tabs(&workspace_id, &tab_ids);
                Ok(())
            })
        })
        .await
    }

    async fn get_all_workspaces(&self) -> Result<Vec<Workspace>> {
        self.blocking(|store| store.read_state(|state| state.workspaces.clone()))
            .await
    }

    async fn create_workspace(&self, name: &str) -> Result<Workspace> {
        let name = name.to_string();
        self.blocking(move |store| store.with_state(|s| Ok(s.create_workspace(&name))))
            .await
    }

    async fn get_all_settings(&self) -> Result<AppSettings> {
        self.blocking(|store| store.read_state(StoreState::settings))
            .await
    }

    async fn set_setting(&self, key: &str, value: &str) -> Result<()> {
        let key = key.to_string();
        let value = value.to_string();
        self.blocking(move |store| {
            store.with_state(|s| {
                s.set_setting(&key, &value);
                Ok(())
            })
        })
        .await
    }

    async fn create_request(&self, input: CreateRequestInput) -> Result<SavedRequest> {
        let saved = input.into_saved(new_id(), now_millis());
        let entry = saved.clone();
        self.blocking(move |store| store.append_history(&entry))
            .await?;
        debug!(id = %saved.id, name = %saved.name, "Recorded request history");
        Ok(saved)
    }

    async fn get_request(&self, id: &str) -> Result<Option<SavedRequest>> {
        let id = id.to_string();
        self.blocking(move |store| {
            for path in store.history_files()? {
                if let Some(found) = read_entries(&path)?.into_iter().find(|r| r.id == id) {
                    return Ok(Some(found));
                }
            }
            Ok(None)
        })
        .await
    }

    async fn get_requests_by_workspace(
        &self,
        workspace_id: &str,
        limit: Option<usize>,
        offset: Option<usize>,
    ) -> Result<Vec<SavedRequest>> {
        let workspace_id = workspace_id.to_string();
        let entries = self
            .blocking(move |store| store.read_history(&workspace_id))
            .await?;
        Ok(entries
            .into_iter()
            .rev()
            .skip(offset.unwrap_or(0))
            .take(limit.unwrap_or(DEFAULT_PAGE_SIZE))
            .collect())
    }

    async fn search_requests(
        &self,
        workspace_id: &str,
        query: &str,
        limit: Option<usize>,
    ) -> Result<Vec<SavedRequest>> {
        let workspace_id = workspace_id.to_string();
        let entries = self
            .blocking(move |store| store.read_history(&workspace_id))
            .await?;
        Ok(entries
            .into_iter()
            .rev()
            .filter(|r| matches_query(r, query))
            .take(limit.unwrap_or(DEFAULT_SEARCH_LIMIT))
            .collect())
    }

    async fn clear_workspace_history(&self, workspace_id: &str) -> Result<usize> {
        let owned = workspace_id.to_string();
        let count = self
            .blocking(move |store| store.truncate_history(&owned))
            .await?;
        info!(workspace_id, count, "Cleared request history");
        Ok(count)
    }
}
