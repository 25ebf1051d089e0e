//! URL 文本与查询参数行的同步
//!
//! 每次编辑只单向同步: 编辑 URL 时重新推导参数，编辑参数时重新推导 URL。
//! 推导出的结果不会再反向触发同步。

use url::Url;

use crate::storage::model::KeyValue;
use crate::{PingitError, Result};

fn parse(url: &str) -> Result<Url> {
    Url::parse(url.trim()).map_err(|e| PingitError::InvalidUrl(format!("{}: {}", url, e)))
}

/// 将 `url` 的查询参数解析为启用的行，保持顺序并保留重复键
pub fn params_from_url(url: &str) -> Result<Vec<KeyValue>> {
    let parsed = parse(url)?;
    Ok(parsed
        .query_pairs()
        .map(|(k, v)| KeyValue::new(k, v))
        .collect())
}

/// 用户编辑 URL 后的参数行: URL 中的查询参数，后面接上原先禁用的行
/// (禁用的行不会出现在 URL 中，否则会丢失)
pub fn derive_params(url: &str, current: &[KeyValue]) -> Result<Vec<KeyValue>> {
    let mut params = params_from_url(url)?;
    params.extend(current.iter().filter(|p| !p.enabled).cloned());
    Ok(params)
}

/// 用 `params` 中启用的行替换 `url` 的查询部分
pub fn url_with_params(url: &str, params: &[KeyValue]) -> Result<String> {
    let mut parsed = parse(url)?;
    parsed.set_query(None);

    let active: Vec<&KeyValue> = params.iter().filter(|p| p.is_active()).collect();
    if !active.is_empty() {
        let mut pairs = parsed.query_pairs_mut();
        for param in active {
            pairs.append_pair(&param.key, &param.value);
        }
    }
    Ok(parsed.to_string())
}
