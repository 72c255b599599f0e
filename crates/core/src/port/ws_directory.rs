// WS Directory Port - cluster-wide session key ownership

use crate::domain::{NodeInfo, SessionKey, WsSessionInfo};
use crate::error::Result;
use async_trait::async_trait;

/// Shared directory backing the WS load balancer.
///
/// A node is alive while its last heartbeat is within the owner TTL; a key
/// whose owner is not alive may be taken over by the next claimant.
#[async_trait]
pub trait WsDirectory: Send + Sync {
    /// Atomically return the live owner of `key`, electing `node_addr` if there is none
    async fn claim_or_get(
        &self,
        key: &SessionKey,
        node_addr: &str,
        now_millis: i64,
        owner_ttl_ms: i64,
    ) -> Result<String>;

    /// Drop ownership of `key` if `node_addr` still holds it
    async fn release(&self, key: &SessionKey, node_addr: &str) -> Result<bool>;

    /// Record liveness of a node (registers it on first call)
    async fn heartbeat(&self, node_addr: &str, now_millis: i64) -> Result<()>;

    /// Nodes whose heartbeat is at or after `alive_since`
    async fn list_nodes(&self, alive_since: i64) -> Result<Vec<NodeInfo>>;

    async fn register_session(&self, session: &WsSessionInfo) -> Result<()>;

    async fn remove_session(&self, session_id: &str) -> Result<()>;

    /// Sessions, optionally filtered to one node
    async fn list_sessions(&self, node_addr: Option<&str>) -> Result<Vec<WsSessionInfo>>;

    /// Remove every session and ownership row of a node (startup cleanup)
    async fn clear_node(&self, node_addr: &str) -> Result<u64>;
}

// ============================================================================
// Mock Implementations for Testing
// ============================================================================

pub mod mocks {
    use super::*;
    use std::collections::HashMap;
    use std::sync::Mutex;

    #[derive(Default)]
    struct State {
        owners: HashMap<String, String>,
        nodes: HashMap<String, NodeInfo>,
        sessions: Vec<WsSessionInfo>,
    }

    /// Single-process directory; several load balancers can share one
    /// instance to simulate a cluster.
    #[derive(Default)]
    pub struct InMemoryWsDirectory {
        state: Mutex<State>,
    }

    impl InMemoryWsDirectory {
        pub fn new() -> Self {
            Self::default()
        }

        pub fn owner_of(&self, key: &SessionKey) -> Option<String> {
            self.state
                .lock()
                .unwrap()
                .owners
                .get(&key.directory_key())
                .cloned()
        }
    }

    #[async_trait]
    impl WsDirectory for InMemoryWsDirectory {
        async fn claim_or_get(
            &self,
            key: &SessionKey,
            node_addr: &str,
            now_millis: i64,
            owner_ttl_ms: i64,
        ) -> Result<String> {
            let mut state = self.state.lock().unwrap();
            let dir_key = key.directory_key();
            if let Some(owner) = state.owners.get(&dir_key) {
                let alive = state
                    .nodes
                    .get(owner)
                    .map_or(false, |n| n.last_heartbeat >= now_millis - owner_ttl_ms);
                if alive {
                    return Ok(owner.clone());
                }
            }
            state.owners.insert(dir_key, node_addr.to_string());
            Ok(node_addr.to_string())
        }

        async fn release(&self, key: &SessionKey, node_addr: &str) -> Result<bool> {
            let mut state = self.state.lock().unwrap();
            let dir_key = key.directory_key();
            if state.owners.get(&dir_key).map(String::as_str) == Some(node_addr) {
                state.owners.remove(&dir_key);
                return Ok(true);
            }
            Ok(false)
        }

        async fn heartbeat(&self, node_addr: &str, now_millis: i64) -> Result<()> {
            let mut state = self.state.lock().unwrap();
            state
                .nodes
                .entry(node_addr.to_string())
                .and_modify(|n| n.last_heartbeat = now_millis)
                .or_insert_with(|| NodeInfo {
                    node_addr: node_addr.to_string(),
                    started_at: now_millis,
                    last_heartbeat: now_millis,
                });
            Ok(())
        }

        async fn list_nodes(&self, alive_since: i64) -> Result<Vec<NodeInfo>> {
            let mut nodes: Vec<_> = self
                .state
                .lock()
                .unwrap()
                .nodes
                .values()
                .filter(|n| n.last_heartbeat >= alive_since)
                .cloned()
                .collect();
            nodes.sort_by(|a, b| a.node_addr.cmp(&b.node_addr));
            Ok(nodes)
        }

        async fn register_session(&self, session: &WsSessionInfo) -> Result<()> {
            self.state.lock().unwrap().sessions.push(session.clone());
            Ok(())
        }

        async fn remove_session(&self, session_id: &str) -> Result<()> {
            self.state
                .lock()
                .unwrap()
                .sessions
                .retain(|s| s.session_id != session_id);
            Ok(())
        }

        async fn list_sessions(&self, node_addr: Option<&str>) -> Result<Vec<WsSessionInfo>> {
            Ok(self
                .state
                .lock()
                .unwrap()
                .sessions
                .iter()
                .filter(|s| node_addr.map_or(true, |n| s.node_addr == n))
                .cloned()
                .collect())
        }

        async fn clear_node(&self, node_addr: &str) -> Result<u64> {
            let mut state = self.state.lock().unwrap();
            let before = state.sessions.len() + state.owners.len();
            state.sessions.retain(|s| s.node_addr != node_addr);
            state.owners.retain(|_, owner| owner != node_addr);
            Ok((before - state.sessions.len() - state.owners.len()) as u64)
        }
    }
}
