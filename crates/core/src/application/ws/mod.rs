// WebSocket gateway: key ownership and local sessions

pub mod load_balancer;
pub mod session_manager;

pub use load_balancer::{WsLoadBalancer, WsSettings};
pub use session_manager::{SessionHandle, SessionManager};
