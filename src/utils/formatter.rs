use colored::*;

use crate::http::response::ResponseData;
use crate::http::types::StatusClass;

pub enum ResponseFormat {
    Compact,
    Verbose,
}

/// 在终端中渲染 [`ResponseData`]
pub struct ResponseFormatter {
    format: ResponseFormat,
    color: bool,
    show_body: bool,
    show_headers: bool,
    show_timing: bool,
}

impl ResponseFormatter {
    /// 紧凑模式下超过该长度的 body 只显示摘要
    const COMPACT_BODY_LIMIT: usize = 200;

    pub fn new(format: ResponseFormat) -> Self {
        Self {
            format,
            color: true,
            show_body: true,
            show_headers: true,
            show_timing: true,
        }
    }

    pub fn with_color(mut self, color: bool) -> Self {
        self.color = color;
        self
    }

    pub fn with_body(mut self, show_body: bool) -> Self {
        self.show_body = show_body;
        self
    }

    pub fn format(&self, response: &ResponseData) -> String {
        let mut output = vec![self.status_line(response, matches!(self.format, ResponseFormat::Verbose))];

        if self.show_timing && !response.is_error() {
            let timing = format!("Time: {}ms  Size: {}", response.time_ms, format_size(response.size_bytes));
            output.push(self.paint(timing, |s| s.cyan()));
        }

        match self.format {
            ResponseFormat::Compact => self.compact_body(response, &mut output),
            ResponseFormat::Verbose => {
                self.verbose_headers(response, &mut output);
                self.verbose_body(response, &mut output);
            }
        }

        output.join("\n")
    }

    fn status_line(&self, response: &ResponseData, bold: bool) -> String {
        let line = if response.is_error() {
            format!("Error: {}", response.body)
        } else {
            format!("HTTP {} {}", response.status, response.status_text)
        };
        if !self.color {
            return line;
        }
        let colored = match response.class() {
            StatusClass::Success => line.green(),
            StatusClass::Informational | StatusClass::Redirect => line.blue(),
            StatusClass::ClientError => line.yellow(),
            StatusClass::ServerError | StatusClass::Error => line.red(),
        };
        if bold {
            colored.bold().to_string()
        } else {
            colored.to_string()
        }
    }

    fn compact_body(&self, response: &ResponseData, output: &mut Vec<String>) {
        let body = &response.body;
        if !self.show_body || response.is_error() || body.is_empty() {
            return;
        }
        if body.len() < Self::COMPACT_BODY_LIMIT {
            output.push(try_format_json(body).unwrap_or_else(|| body.to_string()));
        } else {
            output.push(format!("Body: {} bytes", body.len()));
        }
    }

    fn verbose_headers(&self, response: &ResponseData, output: &mut Vec<String>) {
        if !self.show_headers || response.headers.is_empty() {
            return;
        }
        output.push(String::new());
        output.push(self.paint("Headers:".to_string(), |s| s.blue().bold()));
        for header in &response.headers {
            output.push(self.paint(format!("   {}: {}", header.key, header.value), |s| s.blue()));
        }
    }

    fn verbose_body(&self, response: &ResponseData, output: &mut Vec<String>) {
        if !self.show_body || response.is_error() || response.body.is_empty() {
            return;
        }
        output.push(String::new());
        output.push(self.paint("Body:".to_string(), |s| s.blue().bold()));
        output.push(try_format_json(&response.body).unwrap_or_else(|| response.body.clone()));
    }

    fn paint(&self, text: String, style: impl Fn(&str) -> ColoredString) -> String {
        if self.color {
            style(&text).to_string()
        } else {
            text
        }
    }
}

/// 尝试将 body 格式化为漂亮的 JSON
/// 如果不是有效的 JSON，返回 `None`
fn try_format_json(body: &str) -> Option<String> {
    let value: serde_json::Value = serde_json::from_str(body).ok()?;
    serde_json::to_string_pretty(&value).ok()
}

pub fn format_size(bytes: u64) -> String {
    match bytes {
        0..1024 => format!("{} B", bytes),
        1024..1_048_576 => format!("{:.1} KB", bytes as f64 / 1024.0),
        _ => format!("{:.1} MB", bytes as f64 / 1_048_576.0),
    }
}
