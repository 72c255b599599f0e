// SQLite WS Directory
//
// Shared by every gateway node pointing at the same database file.

use crate::error::map_sqlx_error;
use apihub_core::domain::{NodeInfo, SessionKey, WsSessionInfo};
use apihub_core::error::Result;
use apihub_core::port::WsDirectory;
use async_trait::async_trait;
use sqlx::SqlitePool;

pub struct SqliteWsDirectory {
    pool: SqlitePool,
}

impl SqliteWsDirectory {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl WsDirectory for SqliteWsDirectory {
    async fn claim_or_get(
        &self,
        key: &SessionKey,
        node_addr: &str,
        now_millis: i64,
        owner_ttl_ms: i64,
    ) -> Result<String> {
        let dir_key = key.directory_key();
        let mut tx = self.pool.begin().await.map_err(map_sqlx_error)?;

        // Take the key unless its owner is still heartbeating
        sqlx::query(
            r#"
            INSERT INTO ws_owners (session_key, node_addr, claimed_at)
            VALUES (?, ?, ?)
            ON CONFLICT(session_key) DO UPDATE SET
                node_addr = excluded.node_addr,
                claimed_at = excluded.claimed_at
            WHERE NOT EXISTS (
                SELECT 1 FROM ws_nodes n
                WHERE n.node_addr = ws_owners.node_addr AND n.last_heartbeat >= ?
            )
            "#,
        )
        .bind(&dir_key)
        .bind(node_addr)
        .bind(now_millis)
        .bind(now_millis - owner_ttl_ms)
        .execute(&mut *tx)
        .await
        .map_err(map_sqlx_error)?;

        let owner: String = sqlx::query_scalar("SELECT node_addr FROM ws_owners WHERE session_key = ?")
            .bind(&dir_key)
            .fetch_one(&mut *tx)
            .await
            .map_err(map_sqlx_error)?;

        tx.commit().await.map_err(map_sqlx_error)?;
        Ok(owner)
    }

    async fn release(&self, key: &SessionKey, node_addr: &str) -> Result<bool> {
        let result = sqlx::query("DELETE FROM ws_owners WHERE session_key = ? AND node_addr = ?")
            .bind(key.directory_key())
            .bind(node_addr)
            .execute(&self.pool)
            .await
            .map_err(map_sqlx_error)?;
        Ok(result.rows_affected() > 0)
    }

    async fn heartbeat(&self, node_addr: &str, now_millis: i64) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO ws_nodes (node_addr, started_at, last_heartbeat)
            VALUES (?, ?, ?)
            ON CONFLICT(node_addr) DO UPDATE SET last_heartbeat = excluded.last_heartbeat
            "#,
        )
        .bind(node_addr)
        .bind(now_millis)
        .bind(now_millis)
        .execute(&self.pool)
        .await
        .map_err(map_sqlx_error)?;
        Ok(())
    }

    async fn list_nodes(&self, alive_since: i64) -> Result<Vec<NodeInfo>> {
        let rows: Vec<(String, i64, i64)> = sqlx::query_as(
            r#"
            SELECT node_addr, started_at, last_heartbeat FROM ws_nodes
            WHERE last_heartbeat >= ?
            ORDER BY node_addr
            "#,
        )
        .bind(alive_since)
        .fetch_all(&self.pool)
        .await
        .map_err(map_sqlx_error)?;
        Ok(rows
            .into_iter()
            .map(|(node_addr, started_at, last_heartbeat)| NodeInfo {
                node_addr,
                started_at,
                last_heartbeat,
            })
            .collect())
    }

    async fn register_session(&self, session: &WsSessionInfo) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO ws_sessions (
                session_id, project_id, branch, file_id, node_addr, user_id, created_at
            ) VALUES (?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&session.session_id)
        .bind(&session.key.project_id)
        .bind(&session.key.branch)
        .bind(&session.key.file_id)
        .bind(&session.node_addr)
        .bind(&session.user_id)
        .bind(session.created_at)
        .execute(&self.pool)
        .await
        .map_err(map_sqlx_error)?;
        Ok(())
    }

    async fn remove_session(&self, session_id: &str) -> Result<()> {
        sqlx::query("DELETE FROM ws_sessions WHERE session_id = ?")
            .bind(session_id)
            .execute(&self.pool)
            .await
            .map_err(map_sqlx_error)?;
        Ok(())
    }

    async fn list_sessions(&self, node_addr: Option<&str>) -> Result<Vec<WsSessionInfo>> {
        let rows = sqlx::query_as::<_, SessionRow>(
            r#"
            SELECT * FROM ws_sessions
            WHERE ?1 IS NULL OR node_addr = ?1
            ORDER BY created_at, session_id
            "#,
        )
        .bind(node_addr)
        .fetch_all(&self.pool)
        .await
        .map_err(map_sqlx_error)?;
        Ok(rows.into_iter().map(SessionRow::into_info).collect())
    }

    async fn clear_node(&self, node_addr: &str) -> Result<u64> {
        let mut tx = self.pool.begin().await.map_err(map_sqlx_error)?;
        let sessions = sqlx::query("DELETE FROM ws_sessions WHERE node_addr = ?")
            .bind(node_addr)
            .execute(&mut *tx)
            .await
            .map_err(map_sqlx_error)?;
        let owners = sqlx::query("DELETE FROM ws_owners WHERE node_addr = ?")
            .bind(node_addr)
            .execute(&mut *tx)
            .await
            .map_err(map_sqlx_error)?;
        tx.commit().await.map_err(map_sqlx_error)?;
        Ok(sessions.rows_affected() + owners.rows_affected())
    }
}

#[derive(Debug, sqlx::FromRow)]
struct SessionRow {
    session_id: String,
    project_id: String,
    branch: String,
    file_id: Option<String>,
    node_addr: String,
    user_id: Option<String>,
    created_at: i64,
}

impl SessionRow {
    fn into_info(self) -> WsSessionInfo {
        WsSessionInfo {
            session_id: self.session_id,
            key: SessionKey {
                project_id: self.project_id,
                branch: self.branch,
                file_id: self.file_id,
            },
            node_addr: self.node_addr,
            user_id: self.user_id,
            created_at: self.created_at,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::memory_pool;

    fn key(file: Option<&str>) -> SessionKey {
        SessionKey::new("proj", "main", file.map(str::to_string)).unwrap()
    }

    #[tokio::test]
    async fn test_claim_is_sticky_while_owner_alive() {
        let dir = SqliteWsDirectory::new(memory_pool().await);
        dir.heartbeat("a:1", 1_000).await.unwrap();
        dir.heartbeat("b:1", 1_000).await.unwrap();

        assert_eq!(dir.claim_or_get(&key(None), "a:1", 1_000, 500).await.unwrap(), "a:1");
        assert_eq!(dir.claim_or_get(&key(None), "b:1", 1_200, 500).await.unwrap(), "a:1");
        // File keys shard separately
        assert_eq!(
            dir.claim_or_get(&key(Some("f")), "b:1", 1_200, 500).await.unwrap(),
            "b:1"
        );

        // a stops heartbeating
        dir.heartbeat("b:1", 2_000).await.unwrap();
        assert_eq!(dir.claim_or_get(&key(None), "b:1", 2_000, 500).await.unwrap(), "b:1");
        assert_eq!(dir.list_nodes(1_500).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_release_only_by_owner() {
        let dir = SqliteWsDirectory::new(memory_pool().await);
        dir.heartbeat("a:1", 1_000).await.unwrap();
        dir.claim_or_get(&key(None), "a:1", 1_000, 500).await.unwrap();
        assert!(!dir.release(&key(None), "b:1").await.unwrap());
        assert!(dir.release(&key(None), "a:1").await.unwrap());
    }

    #[tokio::test]
    async fn test_sessions_and_clear_node() {
        let dir = SqliteWsDirectory::new(memory_pool().await);
        dir.heartbeat("a:1", 1_000).await.unwrap();
        dir.claim_or_get(&key(None), "a:1", 1_000, 500).await.unwrap();
        for (id, node) in [("s1", "a:1"), ("s2", "b:1")] {
            dir.register_session(&WsSessionInfo {
                session_id: id.into(),
                key: key(Some("f")),
                node_addr: node.into(),
                user_id: Some("alice".into()),
                created_at: 1_000,
            })
            .await
            .unwrap();
        }
        assert_eq!(dir.list_sessions(None).await.unwrap().len(), 2);
        let on_a = dir.list_sessions(Some("a:1")).await.unwrap();
        assert_eq!(on_a.len(), 1);
        assert_eq!(on_a[0].key, key(Some("f")));

        assert_eq!(dir.clear_node("a:1").await.unwrap(), 2);
        assert_eq!(dir.list_sessions(None).await.unwrap().len(), 1);
        dir.remove_session("s2").await.unwrap();
        assert!(dir.list_sessions(None).await.unwrap().is_empty());
    }
}
