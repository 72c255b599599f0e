// Session Manager
//
// Local sessions of keys this node owns. Data frames of one session are
// relayed to every other session on the same key.

use super::load_balancer::WsLoadBalancer;
use crate::domain::session::close_code;
use crate::domain::{SessionKey, WsFrame, WsSessionInfo, WsTarget};
use crate::error::{AppError, ErrorCode, Result};
use crate::port::{IdProvider, TimeProvider};
use futures::{Sink, SinkExt, Stream, StreamExt};
use std::collections::{HashMap, HashSet};
use std::fmt::Display;
use std::sync::{Arc, Mutex};
use tokio::sync::{broadcast, mpsc, Mutex as AsyncMutex};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

const ROOM_CAPACITY: usize = 256;

/// Close reason sent by disconnectAll
pub const RECONNECT_REASON: &str = "server state changed, reconnect";

/// Close reason for a frame above the size limit (the error code name)
pub const SIZE_EXCEEDED_REASON: &str = "branchContentSizeExceeded";

#[derive(Debug, Clone)]
struct Relay {
    from: String,
    frame: WsFrame,
}

struct Room {
    tx: broadcast::Sender<Relay>,
    cancel: CancellationToken,
    sessions: HashSet<String>,
}

impl Room {
    fn new() -> Self {
        let (tx, _) = broadcast::channel(ROOM_CAPACITY);
        Self {
            tx,
            cancel: CancellationToken::new(),
            sessions: HashSet::new(),
        }
    }
}

/// A running session; await `join` to wait for teardown
pub struct SessionHandle {
    pub session_id: String,
    pub join: JoinHandle<()>,
}

pub struct SessionManager {
    balancer: Arc<WsLoadBalancer>,
    time: Arc<dyn TimeProvider>,
    ids: Arc<dyn IdProvider>,
    max_frame_bytes: usize,
    rooms: Mutex<HashMap<SessionKey, Room>>,
    /// Held across claim + join and leave + release so a key never has
    /// local sessions without being owned here
    ownership: AsyncMutex<()>,
}

/// Room state handed to a new session
struct Joined {
    tx: broadcast::Sender<Relay>,
    rx: broadcast::Receiver<Relay>,
    cancel: CancellationToken,
}

impl SessionManager {
    pub fn new(
        balancer: Arc<WsLoadBalancer>,
        time: Arc<dyn TimeProvider>,
        ids: Arc<dyn IdProvider>,
        max_frame_bytes: usize,
    ) -> Self {
        Self {
            balancer,
            time,
            ids,
            max_frame_bytes,
            rooms: Mutex::new(HashMap::new()),
            ownership: AsyncMutex::new(()),
        }
    }

    fn join_room(&self, key: &SessionKey, session_id: &str) -> Option<Joined> {
        let mut rooms = self.rooms.lock().ok()?;
        let room = rooms.entry(key.clone()).or_insert_with(Room::new);
        room.sessions.insert(session_id.to_string());
        Some(Joined {
            tx: room.tx.clone(),
            rx: room.tx.subscribe(),
            cancel: room.cancel.child_token(),
        })
    }

    /// Remove a session; true when it was the last one of its key
    fn leave_room(&self, key: &SessionKey, session_id: &str) -> bool {
        let Ok(mut rooms) = self.rooms.lock() else {
            return false;
        };
        let Some(room) = rooms.get_mut(key) else {
            return false;
        };
        room.sessions.remove(session_id);
        if room.sessions.is_empty() {
            rooms.remove(key);
            return true;
        }
        false
    }

    /// Number of local sessions on `key`
    pub fn session_count(&self, key: &SessionKey) -> usize {
        self.rooms
            .lock()
            .map(|rooms| rooms.get(key).map_or(0, |r| r.sessions.len()))
            .unwrap_or(0)
    }

    /// Attach a client socket to `key` and spawn its pumps.
    ///
    /// Ownership is claimed again here; when another node took the key since
    /// the upgrade was routed, the socket is closed so the client reconnects.
    pub async fn connect<Tx, Rx, E>(
        self: &Arc<Self>,
        key: SessionKey,
        user_id: Option<String>,
        mut sink: Tx,
        stream: Rx,
    ) -> Result<SessionHandle>
    where
        Tx: Sink<WsFrame> + Send + Unpin + 'static,
        Tx::Error: Display,
        Rx: Stream<Item = std::result::Result<WsFrame, E>> + Send + Unpin + 'static,
        E: Display + Send + 'static,
    {
        let guard = self.ownership.lock().await;
        if let WsTarget::Remote(owner) = self.balancer.select(&key).await? {
            drop(guard);
            info!(session_key = %key.ws_path(), owner = %owner, "Key moved before attach, closing");
            let _ = sink
                .send(WsFrame::close(close_code::RESTART, RECONNECT_REASON))
                .await;
            let _ = sink.close().await;
            return Err(AppError::coded(
                ErrorCode::UnableToSelectWsServer,
                format!("Session key is now owned by {}", owner),
            )
            .with_param("node", owner));
        }

        let session_id = self.ids.generate_id();
        let info = WsSessionInfo {
            session_id: session_id.clone(),
            key: key.clone(),
            node_addr: self.balancer.node_addr().to_string(),
            user_id,
            created_at: self.time.now_millis(),
        };
        self.balancer.directory().register_session(&info).await?;
        let joined = self.join_room(&key, &session_id).ok_or_else(|| {
            AppError::Internal("session registry poisoned".into())
        })?;
        drop(guard);
        info!(session_id = %session_id, session_key = %key.ws_path(), "WS session connected");

        let manager = Arc::clone(self);
        let id = session_id.clone();
        let join = tokio::spawn(async move {
            manager.pump(&id, joined, sink, stream).await;
            manager.teardown(&key, &id).await;
        });
        Ok(SessionHandle { session_id, join })
    }

    async fn pump<Tx, Rx, E>(&self, session_id: &str, joined: Joined, mut sink: Tx, mut stream: Rx)
    where
        Tx: Sink<WsFrame> + Send + Unpin + 'static,
        Tx::Error: Display,
        Rx: Stream<Item = std::result::Result<WsFrame, E>> + Send + Unpin + 'static,
        E: Display + Send + 'static,
    {
        let Joined {
            tx,
            mut rx,
            cancel,
        } = joined;
        let session_cancel = cancel.child_token();
        let (control_tx, mut control_rx) = mpsc::channel::<WsFrame>(4);
        let max = self.max_frame_bytes;

        let reader = {
            let cancel = session_cancel.clone();
            let from = session_id.to_string();
            async move {
                loop {
                    let next = tokio::select! {
                        _ = cancel.cancelled() => break,
                        next = stream.next() => next,
                    };
                    match next {
                        Some(Ok(WsFrame::Close(_))) | None => break,
                        Some(Err(e)) => {
                            debug!(session_id = %from, error = %e, "WS read failed");
                            break;
                        }
                        Some(Ok(frame)) if frame.is_data() => {
                            if frame.len() > max {
                                warn!(session_id = %from, size = frame.len(), limit = max, "WS frame too large");
                                let _ = control_tx
                                    .send(WsFrame::close(close_code::TOO_BIG, SIZE_EXCEEDED_REASON))
                                    .await;
                                break;
                            }
                            // No receivers is fine: the sender is alone on the key
                            let _ = tx.send(Relay {
                                from: from.clone(),
                                frame,
                            });
                        }
                        Some(Ok(_)) => {}
                    }
                }
                cancel.cancel();
            }
        };

        let writer = {
            let session_cancel = session_cancel.clone();
            let me = session_id.to_string();
            async move {
                loop {
                    tokio::select! {
                        biased;
                        Some(frame) = control_rx.recv() => {
                            let _ = sink.send(frame).await;
                            break;
                        }
                        _ = cancel.cancelled() => {
                            // disconnectAll
                            let _ = sink
                                .send(WsFrame::close(close_code::RESTART, RECONNECT_REASON))
                                .await;
                            break;
                        }
                        _ = session_cancel.cancelled() => {
                            if let Ok(frame) = control_rx.try_recv() {
                                let _ = sink.send(frame).await;
                            }
                            break;
                        }
                        relay = rx.recv() => match relay {
                            Ok(relay) if relay.from == me => {}
                            Ok(relay) => {
                                if let Err(e) = sink.send(relay.frame).await {
                                    debug!(session_id = %me, error = %e, "WS write failed");
                                    break;
                                }
                            }
                            Err(broadcast::error::RecvError::Lagged(skipped)) => {
                                warn!(session_id = %me, skipped, "WS session lagging, frames dropped");
                            }
                            Err(broadcast::error::RecvError::Closed) => break,
                        },
                    }
                }
                let _ = sink.close().await;
                session_cancel.cancel();
            }
        };

        tokio::join!(reader, writer);
    }

    async fn teardown(&self, key: &SessionKey, session_id: &str) {
        if let Err(e) = self.balancer.directory().remove_session(session_id).await {
            warn!(session_id = %session_id, error = %e, "Removing WS session failed");
        }
        let _guard = self.ownership.lock().await;
        if self.leave_room(key, session_id) {
            match self.balancer.release(key).await {
                Ok(_) => debug!(session_key = %key.ws_path(), "Key ownership released"),
                Err(e) => warn!(session_key = %key.ws_path(), error = %e, "Releasing key failed"),
            }
        }
        info!(session_id = %session_id, session_key = %key.ws_path(), "WS session closed");
    }

    /// Close every local session of `key`; clients are expected to reconnect
    pub fn disconnect_all(&self, key: &SessionKey) -> usize {
        let Ok(mut rooms) = self.rooms.lock() else {
            return 0;
        };
        match rooms.get_mut(key) {
            Some(room) => {
                room.cancel.cancel();
                room.cancel = CancellationToken::new();
                let count = room.sessions.len();
                info!(session_key = %key.ws_path(), sessions = count, "Disconnecting all sessions");
                count
            }
            None => 0,
        }
    }
}
