pub mod builder;
pub mod client;
pub mod params;
pub mod response;
pub mod types;

// Re-export commonly used types for convenient access
pub use builder::{OutboundRequest, build_request, default_headers};
pub use client::{ReqwestTransport, Transport};
pub use response::ResponseData;
pub use types::{BodyType, Method, StatusClass};
