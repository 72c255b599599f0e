//! API Hub Daemon
//!
//! Configuration, logging and node wiring shared by the `apihub` binary and
//! the integration tests.

pub mod config;
pub mod logging;
pub mod node;
pub mod telemetry;

pub use config::AppConfig;
pub use node::Node;
