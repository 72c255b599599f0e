//! HTTP API Layer
//!
//! axum router for the build pipeline, comparison service, operation groups
//! and the collaborative WebSocket gateway.

pub mod context;
pub mod error;
pub mod extract;
pub mod forwarder;
pub mod health;
pub mod multipart;
pub mod rate_limiter;
pub mod routes;
pub mod state;

pub use error::ApiError;
pub use health::ReadyGate;
pub use rate_limiter::RateLimiter;
pub use routes::router;
pub use state::{AppState, LogLevelControl, UploadLimits};
