use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::http::builder::DEFAULT_USER_AGENT;
use crate::session::DEFAULT_MAX_TABS_IN_MEMORY;
use crate::{PingitError, Result};

/// 覆盖 `data_dir` 的环境变量
pub const DATA_DIR_ENV: &str = "PINGIT_DATA_DIR";

/// 从 `pingit.toml` 读取的配置，所有字段均可省略
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub data_dir: Option<PathBuf>,
    pub max_tabs_in_memory: usize,
    pub request_timeout_secs: u64,
    pub user_agent: String,
    pub history_page_size: usize,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            data_dir: None,
            max_tabs_in_memory: DEFAULT_MAX_TABS_IN_MEMORY,
            request_timeout_secs: 300,
            user_agent: DEFAULT_USER_AGENT.to_string(),
            history_page_size: 100,
        }
    }
}

impl AppConfig {
    /// 文件存储的数据目录
    pub fn data_dir(&self) -> PathBuf {
        self.data_dir.clone().unwrap_or_else(|| {
            dirs::data_dir()
                .unwrap_or_else(|| PathBuf::from("."))
                .join("pingit")
        })
    }

    pub fn max_tabs(&self) -> usize {
        self.max_tabs_in_memory.max(1)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    /// 应用环境变量中的覆盖项
    pub fn apply_env_overrides(&mut self) {
        self.apply_overrides_from(|key| std::env::var(key).ok());
    }

    fn apply_overrides_from(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        if let Some(dir) = lookup(DATA_DIR_ENV).filter(|v| !v.trim().is_empty()) {
            self.data_dir = Some(PathBuf::from(dir));
        }
    }
}

/// 查找并读取 `pingit.toml`
pub struct ConfigLoader;

impl ConfigLoader {
    const CONFIG_FILE: &'static str = "pingit.toml";

    pub fn load_from_path<P: AsRef<Path>>(path: P) -> Result<AppConfig> {
        let content = fs::read_to_string(path.as_ref())
            .map_err(|e| PingitError::Config(format!("Failed to read config file: {}", e)))?;

        toml::from_str(&content)
            .map_err(|e| PingitError::Config(format!("Failed to parse config file: {}", e)))
    }

    /// 查找顺序: 当前目录及其父目录，然后是 `~/.config/pingit/`
    pub fn find_and_load() -> Option<AppConfig> {
        Self::try_load_from_current_dir().or_else(Self::try_load_from_user_dir)
    }

    /// 显式指定的路径必须能加载；否则自动查找，找不到则使用默认值。
    /// 环境变量覆盖最后应用。
    pub fn resolve(explicit: Option<&Path>) -> Result<AppConfig> {
        let mut config = match explicit {
            Some(path) => Self::load_from_path(path)?,
            None => Self::find_and_load().unwrap_or_default(),
        };
        config.apply_env_overrides();
        Ok(config)
    }

    fn try_load_from_current_dir() -> Option<AppConfig> {
        let mut current = std::env::current_dir().ok()?;

        loop {
            let config_path = current.join(Self::CONFIG_FILE);
            if config_path.exists() {
                debug!("Using config {}", config_path.display());
                return Self::load_from_path(&config_path).ok();
            }

            if !current.pop() {
                break;
            }
        }

        None
    }

    fn try_load_from_user_dir() -> Option<AppConfig> {
        let home = dirs::home_dir()?;
        let config_path = home.join(".config").join("pingit").join(Self::CONFIG_FILE);

        if config_path.exists() {
            Self::load_from_path(&config_path).ok()
        } else {
            None
        }
    }
}
