use chrono::{Local, TimeZone};
use comfy_table::presets::UTF8_FULL;
use comfy_table::{Attribute, Cell, Color, Table};

use crate::http::types::StatusClass;
use crate::storage::model::{SavedRequest, Tab, Workspace};
use crate::utils::formatter::format_size;

/// Length of the id prefix shown in tables; enough to pick a record.
pub const SHORT_ID_LEN: usize = 8;

pub fn short_id(id: &str) -> &str {
    id.get(..SHORT_ID_LEN).unwrap_or(id)
}

fn local_time(millis: i64, pattern: &str) -> String {
    Local
        .timestamp_millis_opt(millis)
        .single()
        .map(|t| t.format(pattern).to_string())
        .unwrap_or_else(|| "-".to_string())
}

fn status_color(status: u16) -> Color {
    match StatusClass::of(status) {
        StatusClass::Success => Color::Green,
        StatusClass::Informational | StatusClass::Redirect => Color::Blue,
        StatusClass::ClientError => Color::Yellow,
        StatusClass::ServerError | StatusClass::Error => Color::Red,
    }
}

pub fn history_table(requests: &[SavedRequest]) -> Table {
    let mut table = Table::new();
    table
        .load_preset(UTF8_FULL)
        .set_header(vec!["ID", "Time", "Method", "URL", "Status", "Duration", "Size"]);

    for request in requests {
        let status = request
            .response_status
            .map(|s| Cell::new(s).fg(status_color(s)))
            .unwrap_or_else(|| Cell::new("-"));

        table.add_row(vec![
            Cell::new(short_id(&request.id)),
            Cell::new(local_time(request.created_at, "%m-%d %H:%M:%S")),
            Cell::new(request.method),
            Cell::new(&request.url).add_attribute(Attribute::Dim),
            status,
            Cell::new(
                request
                    .response_time_ms
                    .map(|ms| format!("{}ms", ms))
                    .unwrap_or_default(),
            ),
            Cell::new(
                request
                    .response_size_bytes
                    .map(format_size)
                    .unwrap_or_default(),
            ),
        ]);
    }

    table
}

pub fn tabs_table(tabs: &[Tab]) -> Table {
    let mut table = Table::new();
    table
        .load_preset(UTF8_FULL)
        .set_header(vec!["", "ID", "Method", "URL", "Linked", "Dirty"]);

    for tab in tabs {
        let url = if tab.state.url.is_empty() {
            Cell::new("New Request").add_attribute(Attribute::Italic)
        } else {
            Cell::new(&tab.state.url)
        };
        table.add_row(vec![
            Cell::new(if tab.is_active { "*" } else { "" }).fg(Color::Green),
            Cell::new(short_id(&tab.id)),
            Cell::new(tab.state.method),
            url,
            Cell::new(tab.request_id.as_deref().map(short_id).unwrap_or("")),
            Cell::new(if tab.state.is_dirty { "yes" } else { "" }),
        ]);
    }

    table
}

pub fn workspaces_table(workspaces: &[Workspace], active_id: Option<&str>) -> Table {
    let mut table = Table::new();
    table
        .load_preset(UTF8_FULL)
        .set_header(vec!["", "ID", "Name", "Created"]);

    for workspace in workspaces {
        let active = Some(workspace.id.as_str()) == active_id;
        table.add_row(vec![
            Cell::new(if active { "*" } else { "" }).fg(Color::Green),
            Cell::new(short_id(&workspace.id)),
            Cell::new(&workspace.name),
            Cell::new(local_time(workspace.created_at, "%Y-%m-%d %H:%M")),
        ]);
    }

    table
}
