//! Terminal views over request history, tabs and workspaces.

pub mod printer;
pub mod selector;

pub use printer::{history_table, tabs_table, workspaces_table};
pub use selector::{SelectionStrategy, select_request};
