use serde::{Deserialize, Serialize};

use crate::http::types::StatusClass;
use crate::storage::model::KeyValue;

/// tab 上显示的响应，只在本次会话的内存中保存
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResponseData {
    pub status: u16,
    pub status_text: String,
    pub headers: Vec<KeyValue>,
    pub body: String,
    pub time_ms: u64,
    pub size_bytes: u64,
}

impl ResponseData {
    /// 没有拿到 HTTP 响应时用来占位的错误响应
    pub fn error(message: impl Into<String>) -> Self {
        Self {
            status: 0,
            status_text: "Error".to_string(),
            headers: Vec::new(),
            body: message.into(),
            time_ms: 0,
            size_bytes: 0,
        }
    }

    pub fn class(&self) -> StatusClass {
        StatusClass::of(self.status)
    }

    pub fn is_error(&self) -> bool {
        self.status == 0
    }

    pub fn is_success(&self) -> bool {
        self.class() == StatusClass::Success
    }

    /// 第一个名称匹配 `name` 的 header，不区分大小写
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|h| h.key.eq_ignore_ascii_case(name))
            .map(|h| h.value.as_str())
    }
}
