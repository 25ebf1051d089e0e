pub mod config;
pub mod error;
pub mod history;
pub mod http;
pub mod logger;
pub mod session;
pub mod storage;
pub mod utils;

// Re-export commonly used types
pub use error::{PingitError, Result};
