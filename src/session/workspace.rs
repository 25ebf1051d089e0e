use tracing::info;

use super::cache::TabCache;
use crate::storage::DEFAULT_WORKSPACE_NAME;
use crate::storage::model::{ACTIVE_WORKSPACE_SETTING, Tab, TabId, Workspace};
use crate::{PingitError, Result};

impl TabCache {
    pub async fn workspaces(&self) -> Result<Vec<Workspace>> {
        self.gateway()
            .get_all_workspaces()
            .await
            .map_err(PingitError::into_storage)
    }

    /// 启动时应打开的 workspace: 优先使用设置中记录且仍存在的那个，
    /// 否则取第一个，都没有时新建默认 workspace。
    /// 结果有变化时写回设置。
    pub async fn resolve_active_workspace(&self) -> Result<Workspace> {
        let settings = self
            .gateway()
            .get_all_settings()
            .await
            .map_err(PingitError::into_storage)?;
        let mut workspaces = self.workspaces().await?;

        let remembered = settings
            .active_workspace_id
            .as_deref()
            .and_then(|id| workspaces.iter().position(|w| w.id == id));

        let workspace = match remembered {
            Some(index) => return Ok(workspaces.swap_remove(index)),
            None if !workspaces.is_empty() => workspaces.swap_remove(0),
            None => self
                .gateway()
                .create_workspace(DEFAULT_WORKSPACE_NAME)
                .await
                .map_err(PingitError::into_storage)?,
        };

        self.gateway()
            .set_setting(ACTIVE_WORKSPACE_SETTING, &workspace.id)
            .await
            .map_err(PingitError::into_storage)?;
        info!("Active workspace is now {} ({})", workspace.name, workspace.id);
        Ok(workspace)
    }

    /// 记录 `workspace_id` 为当前 workspace 并加载其 tabs
    pub async fn switch_workspace(&self, workspace_id: &str) -> Result<(Vec<Tab>, Option<TabId>)> {
        let exists = self.workspaces().await?.iter().any(|w| w.id == workspace_id);
        if !exists {
            return Err(PingitError::WorkspaceNotFound(workspace_id.to_string()));
        }

        self.gateway()
            .set_setting(ACTIVE_WORKSPACE_SETTING, workspace_id)
            .await
            .map_err(PingitError::into_storage)?;
        info!("Switched to workspace {}", workspace_id);
        self.load(workspace_id).await
    }

    pub async fn create_workspace(&self, name: &str) -> Result<Workspace> {
        let name = name.trim();
        if name.is_empty() {
            return Err(PingitError::Other("workspace name must not be empty".to_string()));
        }
        self.gateway()
            .create_workspace(name)
            .await
            .map_err(PingitError::into_storage)
    }
}
