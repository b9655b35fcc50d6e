//! HTTP API handlers for haven-server

pub mod billing;
pub mod buildinfo;
pub mod health;
pub mod insights;
pub mod sessions;
pub mod sse;
pub mod subscription;
pub mod user;

pub use buildinfo::get_build_info;
pub use health::health_routes;
pub use sse::event_stream;
pub use user::{AuthenticatedUser, USER_ID_HEADER};
