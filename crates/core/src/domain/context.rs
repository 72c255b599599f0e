// Per-request Security Context

use crate::error::{AppError, ErrorCode, Result};

/// Caller identity threaded explicitly through every service call
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SecurityContext {
    pub user_id: Option<String>,
    pub token: Option<String>,
    /// Call-path breadcrumb for diagnostics
    pub breadcrumb: Vec<String>,
}

impl SecurityContext {
    pub fn anonymous() -> Self {
        Self::default()
    }

    pub fn for_user(user_id: impl Into<String>) -> Self {
        Self {
            user_id: Some(user_id.into()),
            ..Self::default()
        }
    }

    /// Context for background loops
    pub fn system() -> Self {
        Self::for_user("system").with_step("system")
    }

    pub fn with_token(mut self, token: Option<String>) -> Self {
        self.token = token.filter(|t| !t.is_empty());
        self
    }

    pub fn with_step(mut self, step: impl Into<String>) -> Self {
        self.breadcrumb.push(step.into());
        self
    }

    pub fn require_user(&self) -> Result<&str> {
        self.user_id
            .as_deref()
            .filter(|u| !u.is_empty())
            .ok_or_else(|| {
                AppError::coded(ErrorCode::UserIdNotFound, "User id is not present in request")
            })
    }

    pub fn trail(&self) -> String {
        self.breadcrumb.join(" > ")
    }
}
