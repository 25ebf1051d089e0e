use serde::{Deserialize, Serialize};

use crate::http::response::ResponseData;
use crate::http::types::{BodyType, Method};

pub type WorkspaceId = String;
pub type TabId = String;
pub type RequestId = String;

/// 记录启动时打开哪个 workspace 的设置键
pub const ACTIVE_WORKSPACE_SETTING: &str = "active_workspace_id";

/// 参数、header 或表单编辑器中的一行
///
/// 顺序有意义，允许重复键。禁用的行保留在编辑器中，但不会被发送。
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct KeyValue {
    pub key: String,
    pub value: String,
    #[serde(default = "enabled_by_default")]
    pub enabled: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

fn enabled_by_default() -> bool {
    true
}

impl KeyValue {
    pub fn new(key: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            value: value.into(),
            enabled: true,
            description: None,
        }
    }

    pub fn disabled(key: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            enabled: false,
            ..Self::new(key, value)
        }
    }

    /// 该行是否参与最终请求
    pub fn is_active(&self) -> bool {
        self.enabled && !self.key.is_empty()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Workspace {
    pub id: WorkspaceId,
    pub name: String,
    pub created_at: i64,
    pub updated_at: i64,
}

/// tab 背后可编辑的请求草稿
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct TabState {
    pub method: Method,
    pub url: String,
    pub params: Vec<KeyValue>,
    pub headers: Vec<KeyValue>,
    pub body_type: BodyType,
    pub body_content: String,
    pub is_dirty: bool,
}

impl TabState {
    pub fn with_url(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            ..Self::default()
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Tab {
    pub id: TabId,
    pub workspace_id: WorkspaceId,
    /// 指向打开该 tab 的历史记录的弱关联，
    /// 只用于再次打开同一条记录时找到已有的 tab
    pub request_id: Option<RequestId>,
    pub state: TabState,
    pub position: i32,
    pub is_active: bool,
}

/// 一次完成的发送的不可变快照
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SavedRequest {
    pub id: RequestId,
    pub workspace_id: WorkspaceId,
    pub name: String,
    pub method: Method,
    pub url: String,
    pub params: Option<Vec<KeyValue>>,
    pub headers: Option<Vec<KeyValue>>,
    pub body_type: Option<BodyType>,
    pub body_content: Option<String>,
    pub response_status: Option<u16>,
    pub response_status_text: Option<String>,
    pub response_headers: Option<Vec<KeyValue>>,
    pub response_body: Option<String>,
    pub response_time_ms: Option<u64>,
    pub response_size_bytes: Option<u64>,
    pub created_at: i64,
    pub updated_at: i64,
}

impl SavedRequest {
    /// 重新打开历史记录时使用的编辑器草稿
    pub fn to_tab_state(&self) -> TabState {
        TabState {
            method: self.method,
            url: self.url.clone(),
            params: self.params.clone().unwrap_or_default(),
            headers: self.headers.clone().unwrap_or_default(),
            body_type: self.body_type.unwrap_or_default(),
            body_content: self.body_content.clone().unwrap_or_default(),
            is_dirty: false,
        }
    }

    /// 记录中保存的响应 (如果有)
    pub fn response_snapshot(&self) -> Option<ResponseData> {
        let status = self.response_status?;
        Some(ResponseData {
            status,
            status_text: self.response_status_text.clone().unwrap_or_default(),
            headers: self.response_headers.clone().unwrap_or_default(),
            body: self.response_body.clone().unwrap_or_default(),
            time_ms: self.response_time_ms.unwrap_or(0),
            size_bytes: self.response_size_bytes.unwrap_or(0),
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CreateRequestInput {
    pub workspace_id: WorkspaceId,
    pub method: Method,
    pub url: String,
    pub params: Option<Vec<KeyValue>>,
    pub headers: Option<Vec<KeyValue>>,
    pub body_type: Option<BodyType>,
    pub body_content: Option<String>,
    pub response_status: Option<u16>,
    pub response_status_text: Option<String>,
    pub response_headers: Option<Vec<KeyValue>>,
    pub response_body: Option<String>,
    pub response_time_ms: Option<u64>,
    pub response_size_bytes: Option<u64>,
}

impl CreateRequestInput {
    /// 一次完成的发送对应的历史输入: 用户可见的草稿加上响应。
    /// 自动补上的默认 header 不包含在内。
    pub fn from_send(workspace_id: &str, state: &TabState, response: &ResponseData) -> Self {
        let has_body = state.body_type != BodyType::None;
        let headers: Vec<KeyValue> = state
            .headers
            .iter()
            .filter(|h| h.is_active())
            .cloned()
            .collect();

        Self {
            workspace_id: workspace_id.to_string(),
            method: state.method,
            url: state.url.clone(),
            params: (!state.params.is_empty()).then(|| state.params.clone()),
            headers: (!headers.is_empty()).then_some(headers),
            body_type: has_body.then_some(state.body_type),
            body_content: has_body.then(|| state.body_content.clone()),
            response_status: Some(response.status),
            response_status_text: Some(response.status_text.clone()),
            response_headers: Some(response.headers.clone()),
            response_body: Some(response.body.clone()),
            response_time_ms: Some(response.time_ms),
            response_size_bytes: Some(response.size_bytes),
        }
    }

    /// 生成存储层实际保存的记录
    pub fn into_saved(self, id: RequestId, now: i64) -> SavedRequest {
        let name = format!("{} {}", self.method, request_path(&self.url));
        SavedRequest {
            id,
            workspace_id: self.workspace_id,
            name,
            method: self.method,
            url: self.url,
            params: self.params,
            headers: self.headers,
            body_type: self.body_type,
            body_content: self.body_content,
            response_status: self.response_status,
            response_status_text: self.response_status_text,
            response_headers: self.response_headers,
            response_body: self.response_body,
            response_time_ms: self.response_time_ms,
            response_size_bytes: self.response_size_bytes,
            created_at: now,
            updated_at: now,
        }
    }
}

/// 用于历史记录命名的 URL 路径部分: host 之后的全部内容，
/// 没有 `scheme://host/` 前缀时返回整个文本
pub fn request_path(url: &str) -> &str {
    if let Some(idx) = url.find("://") {
        let after_scheme = &url[idx + 3..];
        if let Some(path_idx) = after_scheme.find('/') {
            return &after_scheme[path_idx..];
        }
    }
    url
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AppSettings {
    pub theme: String,
    pub sidebar_collapsed: bool,
    pub active_workspace_id: Option<WorkspaceId>,
}

impl Default for AppSettings {
    fn default() -> Self {
        Self {
            theme: "dark".to_string(),
            sidebar_collapsed: false,
            active_workspace_id: None,
        }
    }
}
