use std::error::Error as _;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use reqwest::header::{HeaderMap, HeaderName, HeaderValue};
use tokio_util::sync::CancellationToken;
use tracing::debug;
use url::form_urlencoded;

use crate::http::builder::OutboundRequest;
use crate::http::response::ResponseData;
use crate::http::types::{BodyType, Method};
use crate::storage::model::KeyValue;
use crate::{PingitError, Result};

/// 执行一次 HTTP 请求
///
/// HTTP 错误状态码也算成功返回。只有完全拿不到响应时 (DNS、连接、TLS、超时)
/// 才返回 `TransportFailure`；token 被取消时返回 `Cancelled`。
#[async_trait]
pub trait Transport: Send + Sync {
    async fn send(&self, request: OutboundRequest, cancel: CancellationToken)
    -> Result<ResponseData>;
}

#[derive(Clone)]
pub struct ReqwestTransport {
    inner: reqwest::Client,
}

impl ReqwestTransport {
    pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(300);

    pub fn new(timeout: Duration) -> Result<Self> {
        let inner = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self { inner })
    }

    async fn execute(&self, request: OutboundRequest) -> Result<ResponseData> {
        let method = match request.method {
            Method::Get => reqwest::Method::GET,
            Method::Post => reqwest::Method::POST,
            Method::Put => reqwest::Method::PUT,
            Method::Patch => reqwest::Method::PATCH,
            Method::Delete => reqwest::Method::DELETE,
            Method::Head => reqwest::Method::HEAD,
            Method::Options => reqwest::Method::OPTIONS,
        };

        let mut req = self
            .inner
            .request(method, request.url.as_str())
            .headers(header_map(&request.headers));

        if let Some(body) = request.body {
            req = match request.body_type {
                BodyType::None => req,
                BodyType::FormData => {
                    let mut form = reqwest::multipart::Form::new();
                    for (key, value) in form_urlencoded::parse(body.as_bytes()) {
                        form = form.text(key.into_owned(), value.into_owned());
                    }
                    req.multipart(form)
                }
                BodyType::UrlEncoded | BodyType::Raw | BodyType::Binary => req.body(body),
            };
        }

        let start = Instant::now();
        let response = req.send().await.map_err(transport_failure)?;

        let status = response.status();
        let headers: Vec<KeyValue> = response
            .headers()
            .iter()
            .map(|(name, value)| KeyValue::new(name.as_str(), value.to_str().unwrap_or("")))
            .collect();
        let bytes = response.bytes().await.map_err(transport_failure)?;
        let time_ms = start.elapsed().as_millis() as u64;

        Ok(ResponseData {
            status: status.as_u16(),
            status_text: status.canonical_reason().unwrap_or("").to_string(),
            headers,
            body: String::from_utf8_lossy(&bytes).into_owned(),
            time_ms,
            size_bytes: bytes.len() as u64,
        })
    }
}

#[async_trait]
impl Transport for ReqwestTransport {
    async fn send(
        &self,
        request: OutboundRequest,
        cancel: CancellationToken,
    ) -> Result<ResponseData> {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => Err(PingitError::Cancelled),
            result = self.execute(request) => result,
        }
    }
}

fn header_map(headers: &[KeyValue]) -> HeaderMap {
    let mut map = HeaderMap::new();
    for kv in headers.iter().filter(|h| h.is_active()) {
        match (
            HeaderName::from_bytes(kv.key.as_bytes()),
            HeaderValue::from_str(&kv.value),
        ) {
            (Ok(name), Ok(value)) => {
                map.append(name, value);
            }
            _ => debug!(header = %kv.key, "Skipping header that is not valid on the wire"),
        }
    }
    map
}

/// reqwest 顶层错误信息通常不含原因，把整条 source 链拼上
fn transport_failure(err: reqwest::Error) -> PingitError {
    let mut message = err.to_string();
    let mut source = err.source();
    while let Some(cause) = source {
        message.push_str(": ");
        message.push_str(&cause.to_string());
        source = cause.source();
    }
    PingitError::TransportFailure(message)
}
