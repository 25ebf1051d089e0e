use serde::{Deserialize, Serialize};
use url::form_urlencoded;

use crate::Result;
use crate::http::types::{BodyType, Method};
use crate::storage::model::{KeyValue, TabState};

pub const DEFAULT_USER_AGENT: &str = "PingIT/1.0";

const CONTENT_TYPE: &str = "Content-Type";

/// 交给 [`Transport`](crate::http::Transport) 的最终请求
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OutboundRequest {
    pub method: Method,
    pub url: String,
    pub headers: Vec<KeyValue>,
    pub body_type: BodyType,
    pub body: Option<String>,
}

impl OutboundRequest {
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|h| h.key.eq_ignore_ascii_case(name))
            .map(|h| h.value.as_str())
    }
}

/// 每个请求默认携带的 header，用户可以覆盖
pub fn default_headers(user_agent: &str) -> Vec<KeyValue> {
    vec![
        KeyValue::new("User-Agent", user_agent),
        KeyValue::new("Accept", "*/*"),
        KeyValue::new("Accept-Encoding", "gzip, deflate, br"),
        KeyValue::new("Connection", "keep-alive"),
    ]
}

/// 将 tab 草稿解析为实际发送的请求
///
/// header 顺序: 先是用户未覆盖的默认 header (固定顺序)，然后是用户启用的 header，
/// 最后在 raw 和 urlencoded body 缺少 `Content-Type` 时自动补上。
/// URL 原样传递，即使无法解析。
pub fn build_request(state: &TabState, defaults: &[KeyValue]) -> OutboundRequest {
    let user_headers: Vec<&KeyValue> = state.headers.iter().filter(|h| h.is_active()).collect();

    let mut headers: Vec<KeyValue> = defaults
        .iter()
        .filter(|d| d.is_active())
        .filter(|d| !user_headers.iter().any(|u| u.key.eq_ignore_ascii_case(&d.key)))
        .cloned()
        .collect();
    headers.extend(user_headers.into_iter().cloned());

    let implied_content_type = match state.body_type {
        BodyType::Raw => Some("application/json"),
        BodyType::UrlEncoded => Some("application/x-www-form-urlencoded"),
        // multipart 的 boundary 由传输层生成
        BodyType::None | BodyType::FormData | BodyType::Binary => None,
    };
    if let Some(content_type) = implied_content_type
        && !headers.iter().any(|h| h.key.eq_ignore_ascii_case(CONTENT_TYPE))
    {
        headers.push(KeyValue::new(CONTENT_TYPE, content_type));
    }

    let body = match state.body_type {
        BodyType::None => None,
        BodyType::FormData | BodyType::UrlEncoded => {
            Some(urlencode_rows(&decode_form_rows(&state.body_content)))
        }
        BodyType::Raw | BodyType::Binary => Some(state.body_content.clone()),
    };

    OutboundRequest {
        method: state.method,
        url: state.url.clone(),
        headers,
        body_type: state.body_type,
        body,
    }
}

/// 将启用的行编码为 `key=value&...`，空格编码为 `+`，字面量 `+` 编码为 `%2B`
pub fn urlencode_rows(rows: &[KeyValue]) -> String {
    let mut serializer = form_urlencoded::Serializer::new(String::new());
    for row in rows.iter().filter(|r| r.is_active()) {
        serializer.append_pair(&row.key, &row.value);
    }
    serializer.finish()
}

/// 解析表单 body 的 `body_content` 中保存的编辑器行
///
/// 行以 JSON 数组保存，这样禁用的行也不会丢失。
/// 也接受纯文本 `k=v&...`，解析出的行都是启用状态。
pub fn decode_form_rows(body_content: &str) -> Vec<KeyValue> {
    let trimmed = body_content.trim();
    if trimmed.is_empty() {
        return Vec::new();
    }
    if trimmed.starts_with('[')
        && let Ok(rows) = serde_json::from_str::<Vec<KeyValue>>(trimmed)
    {
        return rows;
    }
    form_urlencoded::parse(trimmed.as_bytes())
        .map(|(k, v)| KeyValue::new(k, v))
        .collect()
}

pub fn encode_form_rows(rows: &[KeyValue]) -> Result<String> {
    Ok(serde_json::to_string(rows)?)
}
