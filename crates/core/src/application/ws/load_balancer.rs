// WS Load Balancer
//
// Routes session keys to their owning node through the shared directory.

use crate::application::executor::ShutdownToken;
use crate::domain::{ForwardedSession, NodeInfo, SessionKey, WsSessionInfo, WsTarget};
use crate::error::{AppError, ErrorCode, Result};
use crate::port::{TimeProvider, WsDirectory};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;
use tokio::time::interval;
use tracing::{debug, info, warn};

#[derive(Debug, Clone)]
pub struct WsSettings {
    /// Address peers use to reach this node (`host:port`)
    pub node_addr: String,
    /// A node whose heartbeat is older than this loses its keys
    pub owner_ttl_ms: i64,
    pub heartbeat_interval: Duration,
}

impl Default for WsSettings {
    fn default() -> Self {
        Self {
            node_addr: "127.0.0.1:8080".to_string(),
            owner_ttl_ms: 30_000,
            heartbeat_interval: Duration::from_secs(10),
        }
    }
}

pub struct WsLoadBalancer {
    directory: Arc<dyn WsDirectory>,
    time: Arc<dyn TimeProvider>,
    settings: WsSettings,
    forwarded: RwLock<HashMap<String, ForwardedSession>>,
}

impl WsLoadBalancer {
    pub fn new(
        directory: Arc<dyn WsDirectory>,
        time: Arc<dyn TimeProvider>,
        settings: WsSettings,
    ) -> Self {
        Self {
            directory,
            time,
            settings,
            forwarded: RwLock::new(HashMap::new()),
        }
    }

    /// getBindAddr
    pub fn node_addr(&self) -> &str {
        &self.settings.node_addr
    }

    pub fn directory(&self) -> Arc<dyn WsDirectory> {
        Arc::clone(&self.directory)
    }

    /// Drop state left by a previous run of this node, then announce it
    pub async fn start(&self) -> Result<()> {
        let cleared = self.directory.clear_node(self.node_addr()).await?;
        if cleared > 0 {
            info!(node_addr = %self.node_addr(), cleared, "Stale WS directory rows cleared");
        }
        self.heartbeat().await
    }

    /// Hand every key owned by this node back to the directory
    pub async fn stop(&self) -> Result<u64> {
        self.directory.clear_node(self.node_addr()).await
    }

    pub async fn heartbeat(&self) -> Result<()> {
        self.directory
            .heartbeat(self.node_addr(), self.time.now_millis())
            .await
    }

    /// Heartbeat until shutdown
    pub async fn run_heartbeat(&self, mut shutdown: ShutdownToken) {
        let mut ticker = interval(self.settings.heartbeat_interval);
        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    if let Err(e) = self.heartbeat().await {
                        warn!(node_addr = %self.node_addr(), error = %e, "WS heartbeat failed");
                    }
                }
                _ = shutdown.wait() => break,
            }
        }
        debug!(node_addr = %self.node_addr(), "WS heartbeat stopped");
    }

    /// selectWsServer
    pub async fn select(&self, key: &SessionKey) -> Result<WsTarget> {
        let owner = self
            .directory
            .claim_or_get(
                key,
                self.node_addr(),
                self.time.now_millis(),
                self.settings.owner_ttl_ms,
            )
            .await
            .map_err(|e| {
                AppError::coded(
                    ErrorCode::UnableToSelectWsServer,
                    format!("Unable to select WS server: {}", e),
                )
            })?;
        if owner == self.node_addr() {
            debug!(session_key = %key.directory_key().replace('\n', "/"), "Key owned locally");
            Ok(WsTarget::Local)
        } else {
            debug!(session_key = %key.directory_key().replace('\n', "/"), node_addr = %owner, "Key owned remotely");
            Ok(WsTarget::Remote(owner))
        }
    }

    /// Give up ownership of a key with no local sessions left
    pub async fn release(&self, key: &SessionKey) -> Result<bool> {
        self.directory.release(key, self.node_addr()).await
    }

    /// listSessions
    pub async fn list_sessions(&self) -> Result<Vec<WsSessionInfo>> {
        self.directory.list_sessions(None).await
    }

    /// listNodes: nodes with a live heartbeat
    pub async fn list_nodes(&self) -> Result<Vec<NodeInfo>> {
        let since = self.time.now_millis() - self.settings.owner_ttl_ms;
        self.directory.list_nodes(since).await
    }

    /// listForwardedSessions
    pub async fn list_forwarded(&self) -> Vec<ForwardedSession> {
        let mut sessions: Vec<_> = self.forwarded.read().await.values().cloned().collect();
        sessions.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        sessions
    }

    pub async fn track_forwarded(&self, session: ForwardedSession) {
        self.forwarded
            .write()
            .await
            .insert(session.session_id.clone(), session);
    }

    pub async fn untrack_forwarded(&self, session_id: &str) {
        self.forwarded.write().await.remove(session_id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::port::time_provider::mocks::MockTimeProvider;
    use crate::port::ws_directory::mocks::InMemoryWsDirectory;

    fn node(
        directory: &Arc<InMemoryWsDirectory>,
        time: &Arc<MockTimeProvider>,
        addr: &str,
    ) -> WsLoadBalancer {
        WsLoadBalancer::new(
            directory.clone(),
            time.clone(),
            WsSettings {
                node_addr: addr.to_string(),
                owner_ttl_ms: 1_000,
                heartbeat_interval: Duration::from_millis(100),
            },
        )
    }

    #[tokio::test]
    async fn test_single_owner_per_key() {
        let directory = Arc::new(InMemoryWsDirectory::new());
        let time = Arc::new(MockTimeProvider::new(10_000));
        let a = node(&directory, &time, "a:1");
        let b = node(&directory, &time, "b:1");
        a.start().await.unwrap();
        b.start().await.unwrap();
        let key = SessionKey::new("p", "main", None).unwrap();

        assert_eq!(a.select(&key).await.unwrap(), WsTarget::Local);
        assert_eq!(b.select(&key).await.unwrap(), WsTarget::Remote("a:1".into()));
        assert_eq!(a.select(&key).await.unwrap(), WsTarget::Local);

        // A file key is a different shard
        let file_key = SessionKey::new("p", "main", Some("f".into())).unwrap();
        assert_eq!(b.select(&file_key).await.unwrap(), WsTarget::Local);
    }

    #[tokio::test]
    async fn test_dead_owner_is_replaced() {
        let directory = Arc::new(InMemoryWsDirectory::new());
        let time = Arc::new(MockTimeProvider::new(10_000));
        let a = node(&directory, &time, "a:1");
        let b = node(&directory, &time, "b:1");
        a.start().await.unwrap();
        let key = SessionKey::new("p", "main", None).unwrap();
        assert_eq!(a.select(&key).await.unwrap(), WsTarget::Local);

        time.advance(5_000);
        b.heartbeat().await.unwrap();
        assert_eq!(b.select(&key).await.unwrap(), WsTarget::Local);
        assert_eq!(b.list_nodes().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_forwarded_tracking() {
        let directory = Arc::new(InMemoryWsDirectory::new());
        let time = Arc::new(MockTimeProvider::new(0));
        let a = node(&directory, &time, "a:1");
        let key = SessionKey::new("p", "main", None).unwrap();
        a.track_forwarded(ForwardedSession {
            session_id: "s1".into(),
            key,
            remote_addr: "b:1".into(),
            created_at: 0,
        })
        .await;
        assert_eq!(a.list_forwarded().await.len(), 1);
        a.untrack_forwarded("s1").await;
        assert!(a.list_forwarded().await.is_empty());
    }
}
