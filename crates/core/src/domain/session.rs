// Collaborative Editing Session Model

use crate::domain::error::{DomainError, Result};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Sharding unit of the WS load balancer: (projectId, branchName, fileId?)
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionKey {
    pub project_id: String,
    pub branch: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file_id: Option<String>,
}

impl SessionKey {
    pub fn new(
        project_id: impl Into<String>,
        branch: impl Into<String>,
        file_id: Option<String>,
    ) -> Result<Self> {
        let key = Self {
            project_id: project_id.into(),
            branch: branch.into(),
            file_id: file_id.filter(|f| !f.is_empty()),
        };
        if key.project_id.is_empty() || key.branch.is_empty() {
            return Err(DomainError::InvalidSessionKey(
                "projectId and branch must not be empty".to_string(),
            ));
        }
        if key.project_id.contains('\n') || key.branch.contains('\n') {
            return Err(DomainError::InvalidSessionKey(key.to_string()));
        }
        Ok(key)
    }

    /// Stable string form used as the directory key
    pub fn directory_key(&self) -> String {
        self.to_string()
    }

    /// Request path on a peer node for this key
    pub fn ws_path(&self) -> String {
        match &self.file_id {
            Some(file) => format!(
                "/ws/v1/projects/{}/branches/{}/files/{}",
                self.project_id, self.branch, file
            ),
            None => format!(
                "/ws/v1/projects/{}/branches/{}",
                self.project_id, self.branch
            ),
        }
    }
}

impl fmt::Display for SessionKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.file_id {
            Some(file) => write!(f, "{}\n{}\n{}", self.project_id, self.branch, file),
            None => write!(f, "{}\n{}", self.project_id, self.branch),
        }
    }
}

/// Session attached to this node's Session Manager
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WsSessionInfo {
    pub session_id: String,
    pub key: SessionKey,
    pub node_addr: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_id: Option<String>,
    pub created_at: i64,
}

/// Client session accepted here but bridged to the owning node
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ForwardedSession {
    pub session_id: String,
    pub key: SessionKey,
    pub remote_addr: String,
    pub created_at: i64,
}

/// Cluster member as seen by the directory
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NodeInfo {
    pub node_addr: String,
    pub started_at: i64,
    pub last_heartbeat: i64,
}

/// Routing decision for a session key
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WsTarget {
    Local,
    Remote(String),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CloseReason {
    pub code: u16,
    pub reason: String,
}

/// Transport-neutral WebSocket frame
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WsFrame {
    Text(String),
    Binary(Vec<u8>),
    Ping(Vec<u8>),
    Pong(Vec<u8>),
    Close(Option<CloseReason>),
}

impl WsFrame {
    /// Payload size in bytes
    pub fn len(&self) -> usize {
        match self {
            WsFrame::Text(s) => s.len(),
            WsFrame::Binary(b) | WsFrame::Ping(b) | WsFrame::Pong(b) => b.len(),
            WsFrame::Close(reason) => reason.as_ref().map(|r| r.reason.len()).unwrap_or(0),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Frames relayed to other sessions of the same key
    pub fn is_data(&self) -> bool {
        matches!(self, WsFrame::Text(_) | WsFrame::Binary(_))
    }

    pub fn close(code: u16, reason: impl Into<String>) -> Self {
        WsFrame::Close(Some(CloseReason {
            code,
            reason: reason.into(),
        }))
    }
}

/// RFC 6455 close codes used by the gateway
pub mod close_code {
    pub const NORMAL: u16 = 1000;
    pub const GOING_AWAY: u16 = 1001;
    pub const TOO_BIG: u16 = 1009;
    pub const INTERNAL: u16 = 1011;
    pub const RESTART: u16 = 1012;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_key_requires_project_and_branch() {
        assert!(SessionKey::new("", "main", None).is_err());
        assert!(SessionKey::new("p", "", None).is_err());
        let key = SessionKey::new("p", "main", Some(String::new())).unwrap();
        assert_eq!(key.file_id, None);
    }

    #[test]
    fn test_file_keys_are_distinct() {
        let branch = SessionKey::new("p", "main", None).unwrap();
        let file = SessionKey::new("p", "main", Some("f1".into())).unwrap();
        assert_ne!(branch.directory_key(), file.directory_key());
        assert_eq!(file.ws_path(), "/ws/v1/projects/p/branches/main/files/f1");
        assert_eq!(branch.ws_path(), "/ws/v1/projects/p/branches/main");
    }

    #[test]
    fn test_frame_len() {
        assert_eq!(WsFrame::Text("abc".into()).len(), 3);
        assert_eq!(WsFrame::Binary(vec![0; 10]).len(), 10);
        assert!(WsFrame::Close(None).is_empty());
        assert!(!WsFrame::Ping(vec![]).is_data());
    }
}
