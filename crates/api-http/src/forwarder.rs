//! WebSocket Forwarder
//!
//! Bridges a client socket accepted on this node to the node that owns the
//! session key. Two unidirectional pumps share one cancellation token; when
//! either side closes, the other is drained and closed.

use apihub_core::domain::{CloseReason, SessionKey, WsFrame};
use apihub_core::error::{AppError, ErrorCode};
use axum::extract::ws::{CloseFrame, Message, WebSocket};
use futures::{future, Sink, SinkExt, Stream, StreamExt};
use percent_encoding::{utf8_percent_encode, AsciiSet, PercentEncode, NON_ALPHANUMERIC};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::http::HeaderValue;
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tokio_tungstenite::tungstenite::protocol::CloseFrame as PeerCloseFrame;
use tokio_tungstenite::tungstenite::Message as PeerMessage;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

/// Marks an upgrade that was already forwarded once
pub const FORWARDED_HEADER: &str = "x-apihub-forwarded";
pub const SEC_WEBSOCKET_KEY: &str = "sec-websocket-key";

pub type PeerSocket = WebSocketStream<MaybeTlsStream<TcpStream>>;

pub fn from_axum(msg: Message) -> WsFrame {
    match msg {
        Message::Text(text) => WsFrame::Text(text),
        Message::Binary(data) => WsFrame::Binary(data),
        Message::Ping(data) => WsFrame::Ping(data),
        Message::Pong(data) => WsFrame::Pong(data),
        Message::Close(frame) => WsFrame::Close(frame.map(|f| CloseReason {
            code: f.code,
            reason: f.reason.into_owned(),
        })),
    }
}

pub fn to_axum(frame: WsFrame) -> Message {
    match frame {
        WsFrame::Text(text) => Message::Text(text),
        WsFrame::Binary(data) => Message::Binary(data),
        WsFrame::Ping(data) => Message::Ping(data),
        WsFrame::Pong(data) => Message::Pong(data),
        WsFrame::Close(reason) => Message::Close(reason.map(|r| CloseFrame {
            code: r.code,
            reason: r.reason.into(),
        })),
    }
}

/// Raw frames have no transport-neutral form and are dropped
pub fn from_peer(msg: PeerMessage) -> Option<WsFrame> {
    Some(match msg {
        PeerMessage::Text(text) => WsFrame::Text(text.as_str().to_string()),
        PeerMessage::Binary(data) => WsFrame::Binary(data.to_vec()),
        PeerMessage::Ping(data) => WsFrame::Ping(data.to_vec()),
        PeerMessage::Pong(data) => WsFrame::Pong(data.to_vec()),
        PeerMessage::Close(frame) => WsFrame::Close(frame.map(|f| CloseReason {
            code: u16::from(f.code),
            reason: f.reason.as_str().to_string(),
        })),
        PeerMessage::Frame(_) => return None,
    })
}

pub fn to_peer(frame: WsFrame) -> PeerMessage {
    match frame {
        WsFrame::Text(text) => PeerMessage::Text(text.into()),
        WsFrame::Binary(data) => PeerMessage::Binary(data.into()),
        WsFrame::Ping(data) => PeerMessage::Ping(data.into()),
        WsFrame::Pong(data) => PeerMessage::Pong(data.into()),
        WsFrame::Close(reason) => PeerMessage::Close(reason.map(|r| PeerCloseFrame {
            code: CloseCode::from(r.code),
            reason: r.reason.into(),
        })),
    }
}

/// Everything outside the RFC 3986 unreserved set
const COMPONENT: &AsciiSet = &NON_ALPHANUMERIC
    .remove(b'-')
    .remove(b'.')
    .remove(b'_')
    .remove(b'~');

fn escape_component(value: &str) -> PercentEncode<'_> {
    utf8_percent_encode(value, COMPONENT)
}

/// `ws://` URL of `key` on `node_addr`, token moved into the query
pub fn peer_url(node_addr: &str, key: &SessionKey, token: Option<&str>) -> String {
    let mut url = format!(
        "ws://{}/ws/v1/projects/{}/branches/{}",
        node_addr,
        escape_component(&key.project_id),
        escape_component(&key.branch)
    );
    if let Some(file) = &key.file_id {
        url.push_str("/files/");
        url.extend(escape_component(file));
    }
    if let Some(token) = token {
        url.push_str("?token=");
        url.extend(escape_component(token));
    }
    url
}

/// Connection parameters for the outbound upgrade
#[derive(Debug, Clone, Default)]
pub struct PeerHandshake {
    pub token: Option<String>,
    /// Client's `Sec-WebSocket-Key`, reused so the peer's accept key matches
    pub client_key: Option<String>,
    pub user_id: Option<String>,
}

fn peer_error(node_addr: &str, reason: impl std::fmt::Display) -> AppError {
    AppError::coded(
        ErrorCode::UnableToSelectWsServer,
        format!("Unable to reach WS owner {}: {}", node_addr, reason),
    )
    .with_param("node", node_addr)
}

/// Open the upgrade to the owning node
pub async fn connect_peer(
    node_addr: &str,
    key: &SessionKey,
    handshake: &PeerHandshake,
) -> Result<PeerSocket, AppError> {
    let url = peer_url(node_addr, key, handshake.token.as_deref());
    let mut request = url
        .into_client_request()
        .map_err(|e| peer_error(node_addr, e))?;
    let headers = request.headers_mut();
    if let Some(client_key) = &handshake.client_key {
        let value = HeaderValue::from_str(client_key).map_err(|e| peer_error(node_addr, e))?;
        headers.insert(SEC_WEBSOCKET_KEY, value);
    }
    if let Some(user) = &handshake.user_id {
        if let Ok(value) = HeaderValue::from_str(user) {
            headers.insert(crate::context::USER_HEADER, value);
        }
    }
    headers.insert(FORWARDED_HEADER, HeaderValue::from_static("1"));

    let (socket, _response) = tokio_tungstenite::connect_async(request)
        .await
        .map_err(|e| peer_error(node_addr, e))?;
    debug!(node_addr = %node_addr, session_key = %key.ws_path(), "Peer upgrade established");
    Ok(socket)
}

/// Copy frames from `from` to `to` until close, error or cancellation.
/// Returns the number of frames forwarded.
pub async fn pump<Rx, Tx, E>(mut from: Rx, mut to: Tx, cancel: CancellationToken) -> usize
where
    Rx: Stream<Item = Result<WsFrame, E>> + Unpin,
    Tx: Sink<WsFrame> + Unpin,
{
    let mut forwarded = 0;
    loop {
        let next = tokio::select! {
            _ = cancel.cancelled() => break,
            next = from.next() => next,
        };
        match next {
            Some(Ok(frame)) => {
                let closing = matches!(frame, WsFrame::Close(_));
                if to.send(frame).await.is_err() {
                    break;
                }
                forwarded += 1;
                if closing {
                    break;
                }
            }
            Some(Err(_)) | None => break,
        }
    }
    cancel.cancel();
    let _ = to.close().await;
    forwarded
}

/// Bridge a local client socket to an upgraded peer socket
pub async fn bridge<S>(client: WebSocket, peer: WebSocketStream<S>) -> (usize, usize)
where
    S: AsyncRead + AsyncWrite + Unpin + Send,
{
    let cancel = CancellationToken::new();
    let (client_tx, client_rx) = client.split();
    let (peer_tx, peer_rx) = peer.split();

    let client_tx = client_tx.with(|f: WsFrame| future::ready(Ok::<_, axum::Error>(to_axum(f))));
    let client_rx = client_rx.map(|r| r.map(from_axum));
    let peer_tx = peer_tx.with(|f: WsFrame| {
        future::ready(Ok::<_, tokio_tungstenite::tungstenite::Error>(to_peer(f)))
    });
    let peer_rx = peer_rx.filter_map(|r| {
        future::ready(match r {
            Ok(msg) => from_peer(msg).map(Ok),
            Err(e) => Some(Err(e)),
        })
    });

    let (upstream, downstream) = tokio::join!(
        pump(client_rx, peer_tx, cancel.clone()),
        pump(peer_rx, client_tx, cancel)
    );
    if upstream == 0 && downstream == 0 {
        warn!("Forwarded session closed without traffic");
    }
    (upstream, downstream)
}

#[cfg(test)]
mod tests {
    use super::*;
    use apihub_core::domain::session::close_code;
    use futures::channel::mpsc;

    #[tokio::test]
    async fn test_pump_preserves_order_and_payload() {
        let (in_tx, in_rx) = mpsc::unbounded::<Result<WsFrame, String>>();
        let (out_tx, out_rx) = mpsc::unbounded::<WsFrame>();
        let frames = vec![
            WsFrame::Ping(b"ping".to_vec()),
            WsFrame::Text("a".into()),
            WsFrame::Binary(vec![0, 1, 2, 255]),
            WsFrame::close(close_code::NORMAL, "bye"),
            WsFrame::Text("after close".into()),
        ];
        for f in &frames {
            in_tx.unbounded_send(Ok(f.clone())).unwrap();
        }

        let cancel = CancellationToken::new();
        let count = pump(in_rx, out_tx, cancel.clone()).await;
        assert_eq!(count, 4);
        assert!(cancel.is_cancelled());

        let received: Vec<WsFrame> = out_rx.collect().await;
        assert_eq!(received, frames[..4].to_vec());
    }

    #[tokio::test]
    async fn test_cancel_stops_idle_pump() {
        let (_in_tx, in_rx) = mpsc::unbounded::<Result<WsFrame, String>>();
        let (out_tx, _out_rx) = mpsc::unbounded::<WsFrame>();
        let cancel = CancellationToken::new();
        let task = tokio::spawn(pump(in_rx, out_tx, cancel.clone()));
        cancel.cancel();
        assert_eq!(task.await.unwrap(), 0);
    }

    #[test]
    fn test_peer_url_moves_token_to_query() {
        let key = SessionKey::new("p1", "feature/x", Some("f 1".into())).unwrap();
        assert_eq!(
            peer_url("10.0.0.2:8080", &key, Some("a+b")),
            "ws://10.0.0.2:8080/ws/v1/projects/p1/branches/feature%2Fx/files/f%201?token=a%2Bb"
        );
        let key = SessionKey::new("p1", "main", None).unwrap();
        assert_eq!(
            peer_url("n:1", &key, None),
            "ws://n:1/ws/v1/projects/p1/branches/main"
        );
    }

    #[test]
    fn test_frame_conversions() {
        let close = WsFrame::close(close_code::TOO_BIG, "branchContentSizeExceeded");
        assert_eq!(from_axum(to_axum(close.clone())), close);
        assert_eq!(from_peer(to_peer(close.clone())), Some(close));
        let bin = WsFrame::Binary(vec![9; 3]);
        assert_eq!(from_peer(to_peer(bin.clone())), Some(bin));
    }
}
