use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use super::model::{ACTIVE_WORKSPACE_SETTING, AppSettings, Tab, TabState, Workspace};
use super::{DEFAULT_WORKSPACE_NAME, nearest_tab, new_id, now_millis};
use crate::{PingitError, Result};

/// Workspaces, tabs and settings as one document. Both gateways keep this
/// shape; the file store serializes it to `state.json`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub(crate) struct StoreState {
    pub workspaces: Vec<Workspace>,
    pub tabs: Vec<Tab>,
    pub settings: BTreeMap<String, String>,
}

impl StoreState {
    /// A store is never without a workspace; the first one becomes active.
    pub fn ensure_default_workspace(&mut self) -> bool {
        if !self.workspaces.is_empty() {
            return false;
        }
        let workspace = self.create_workspace(DEFAULT_WORKSPACE_NAME);
        self.settings
            .insert(ACTIVE_WORKSPACE_SETTING.to_string(), workspace.id);
        true
    }

    pub fn create_workspace(&mut self, name: &str) -> Workspace {
        let now = now_millis();
        let workspace = Workspace {
            id: new_id(),
            name: name.to_string(),
            created_at: now,
            updated_at: now,
        };
        self.workspaces.push(workspace.clone());
        workspace
    }

    pub fn tabs_of(&self, workspace_id: &str) -> Vec<Tab> {
        let mut tabs: Vec<Tab> = self
            .tabs
            .iter()
            .filter(|t| t.workspace_id == workspace_id)
            .cloned()
            .collect();
        tabs.sort_by_key(|t| t.position);
        tabs
    }

    pub fn create_tab(&mut self, workspace_id: &str, state: Option<TabState>) -> Tab {
        let position = self
            .tabs
            .iter()
            .filter(|t| t.workspace_id == workspace_id)
            .map(|t| t.position)
            .max()
            .unwrap_or(-1)
            + 1;

        for tab in self.tabs.iter_mut().filter(|t| t.workspace_id == workspace_id) {
            tab.is_active = false;
        }

        let tab = Tab {
            id: new_id(),
            workspace_id: workspace_id.to_string(),
            request_id: None,
            state: state.unwrap_or_default(),
            position,
            is_active: true,
        };
        self.tabs.push(tab.clone());
        tab
    }

    pub fn update_tab(&mut self, id: &str, state: &TabState, request_id: Option<&str>) -> Result<()> {
        let tab = self
            .tabs
            .iter_mut()
            .find(|t| t.id == id)
            .ok_or_else(|| PingitError::TabNotFound(id.to_string()))?;
        tab.state = state.clone();
        tab.request_id = request_id.map(str::to_string);
        Ok(())
    }

    pub fn set_active_tab(&mut self, workspace_id: &str, tab_id: &str) {
        for tab in self.tabs.iter_mut().filter(|t| t.workspace_id == workspace_id) {
            tab.is_active = tab.id == tab_id;
        }
    }

    pub fn delete_tab(&mut self, id: &str) -> Option<String> {
        let index = self.tabs.iter().position(|t| t.id == id)?;
        let removed = self.tabs.remove(index);
        if !removed.is_active {
            return None;
        }

        let siblings = self.tabs_of(&removed.workspace_id);
        let next_id = nearest_tab(&siblings, removed.position)?.id.clone();
        if let Some(next) = self.tabs.iter_mut().find(|t| t.id == next_id) {
            next.is_active = true;
        }
        Some(next_id)
    }

    pub fn reorder_tabs(&mut self, workspace_id: &str, tab_ids: &[String]) {
        for (position, tab_id) in tab_ids.iter().enumerate() {
            if let Some(tab) = self
                .tabs
                .iter_mut()
                .find(|t| &t.id == tab_id && t.workspace_id == workspace_id)
            {
                tab.position = position as i32;
            }
        }
    }

    pub fn settings(&self) -> AppSettings {
        let defaults = AppSettings::default();
        AppSettings {
            theme: self.settings.get("theme").cloned().unwrap_or(defaults.theme),
            sidebar_collapsed: self
                .settings
                .get("sidebar_collapsed")
                .map(|v| v == "true")
                .unwrap_or(defaults.sidebar_collapsed),
            active_workspace_id: self.settings.get(ACTIVE_WORKSPACE_SETTING).cloned(),
        }
    }

    pub fn set_setting(&mut self, key: &str, value: &str) {
        self.settings.insert(key.to_string(), value.to_string());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_workspace_becomes_active_setting() {
        let mut state = StoreState::default();
        assert!(state.ensure_default_workspace());
        assert!(!state.ensure_default_workspace());

        let settings = state.settings();
        assert_eq!(state.workspaces.len(), 1);
        assert_eq!(state.workspaces[0].name, DEFAULT_WORKSPACE_NAME);
        assert_eq!(settings.active_workspace_id.as_deref(), Some(state.workspaces[0].id.as_str()));
        assert_eq!(settings.theme, "dark");
    }

    #[test]
    fn test_create_tab_appends_and_activates() {
        let mut state = StoreState::default();
        let a = state.create_tab("ws", None);
        let b = state.create_tab("ws", None);
        let other = state.create_tab("other", None);

        assert_eq!((a.position, b.position, other.position), (0, 1, 0));
        let tabs = state.tabs_of("ws");
        assert!(!tabs[0].is_active);
        assert!(tabs[1].is_active);
        assert!(state.tabs_of("other")[0].is_active);
    }

    #[test]
    fn test_delete_active_tab_activates_nearest() {
        let mut state = StoreState::default();
        let a = state.create_tab("ws", None);
        let b = state.create_tab("ws", None);
        let c = state.create_tab("ws", None);
        state.set_active_tab("ws", &b.id);

        let next = state.delete_tab(&b.id);
        assert_eq!(next.as_deref(), Some(a.id.as_str()));
        assert!(state.tabs_of("ws")[0].is_active);

        // removing an inactive tab hands nothing back
        assert_eq!(state.delete_tab(&c.id), None);
        assert_eq!(state.delete_tab("missing"), None);
    }

    #[test]
    fn test_reorder_tabs() {
        let mut state = StoreState::default();
        let a = state.create_tab("ws", None);
        let b = state.create_tab("ws", None);
        state.reorder_tabs("ws", &[b.id.clone(), a.id.clone()]);
        let ids: Vec<String> = state.tabs_of("ws").into_iter().map(|t| t.id).collect();
        assert_eq!(ids, vec![b.id, a.id]);
    }
}
