// =============================================================================
// NODE SIMULATOR: session.rs
// One authenticated WebSocket session per simulated node
// =============================================================================
//
//   connect()  HTTP upgrade with Basic auth (account:secret)
//   run()      spawns the periodic ROUTE writer, drives the receive loop,
//              cancels the writer when the loop exits
//
// Both activities write through one FrameWriter behind a mutex, so frames
// never interleave and nothing is written after the close frame.
// =============================================================================

use crate::config::{NodeIdentity, SimulatorConfig};
use crate::constants::{SERVER_CLOSE, SERVER_HI_PREFIX};
use crate::error::{Result, SimError};
use crate::messages::{ControlMessage, Edge, NodeMessage, RouteMessage, WireFormat};
use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpStream;
use tokio::sync::Mutex;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::http::header::AUTHORIZATION;
use tokio_tungstenite::tungstenite::http::HeaderValue;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use tokio_util::sync::CancellationToken;

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionEnd {
    /// Server sent the literal `close`; we closed from our side.
    CloseCommand,
    ClosedByPeer,
    TransportError(String),
}

#[derive(Debug, Clone)]
pub struct SessionReport {
    pub node_id: String,
    pub routes_sent: u64,
    pub hi_replies: u64,
    pub frames_received: u64,
    pub end: SessionEnd,
}

// -----------------------------------------------------------------------------
// Pacing: initial delay, then uniform gaps in [min_gap, max_gap)
// -----------------------------------------------------------------------------

#[derive(Debug, Clone, Copy)]
pub struct Pacing {
    pub initial_delay: Duration,
    pub min_gap: Duration,
    pub max_gap: Duration,
}

impl Pacing {
    pub fn from_config(config: &SimulatorConfig) -> Self {
        Pacing {
            initial_delay: config.initial_delay,
            min_gap: config.min_gap,
            max_gap: config.max_gap,
        }
    }

    pub fn next_gap<R: Rng>(&self, rng: &mut R) -> Duration {
        rng.gen_range(self.min_gap..self.max_gap)
    }
}

// -----------------------------------------------------------------------------
// FrameWriter: the only path to the socket
// -----------------------------------------------------------------------------

pub struct FrameWriter {
    sink: SplitSink<WsStream, Message>,
    closed: bool,
}

impl FrameWriter {
    fn new(sink: SplitSink<WsStream, Message>) -> Self {
        FrameWriter { sink, closed: false }
    }

    pub async fn send_text(&mut self, text: String) -> Result<()> {
        if self.closed {
            return Err(SimError::SessionClosed);
        }
        self.sink.send(Message::Text(text)).await.map_err(SimError::Transport)
    }

    /// Sends the close frame once; later calls are no-ops.
    pub async fn close(&mut self) -> Result<()> {
        if self.closed {
            return Ok(());
        }
        self.closed = true;
        self.sink.close().await.map_err(SimError::Transport)
    }
}

// -----------------------------------------------------------------------------
// Periodic writer
// -----------------------------------------------------------------------------

struct PeriodicWriter {
    node_id: String,
    edges: Vec<Edge>,
    seen: Vec<String>,
    wire_format: WireFormat,
    pacing: Pacing,
    rng: StdRng,
    writer: Arc<Mutex<FrameWriter>>,
    routes_sent: Arc<AtomicU64>,
    cancel: CancellationToken,
}

impl PeriodicWriter {
    async fn run(mut self) {
        tokio::select! {
            _ = self.cancel.cancelled() => return,
            _ = tokio::time::sleep(self.pacing.initial_delay) => {}
        }

        loop {
            if self.cancel.is_cancelled() {
                break;
            }

            let route = RouteMessage::new(&self.node_id, self.edges.clone(), self.seen.clone());
            let frame = match self.wire_format.encode_route(route) {
                Ok(frame) => frame,
                Err(e) => {
                    log::error!("[{}] ❌ Cannot encode ROUTE: {}", self.node_id, e);
                    break;
                }
            };

            if let Err(e) = self.writer.lock().await.send_text(frame).await {
                log::debug!("[{}] Route writer stopped: {}", self.node_id, e);
                break;
            }
            self.routes_sent.fetch_add(1, Ordering::Relaxed);
            log::debug!("[{}] 📤 ROUTE sent", self.node_id);

            let gap = self.pacing.next_gap(&mut self.rng);
            tokio::select! {
                _ = self.cancel.cancelled() => break,
                _ = tokio::time::sleep(gap) => {}
            }
        }
    }
}

// -----------------------------------------------------------------------------
// NodeSession
// -----------------------------------------------------------------------------

pub struct NodeSession {
    identity: NodeIdentity,
    config: Arc<SimulatorConfig>,
    writer: Arc<Mutex<FrameWriter>>,
    source: SplitStream<WsStream>,
    cancel: CancellationToken,
    routes_sent: Arc<AtomicU64>,
    hi_replies: u64,
    frames_received: u64,
}

impl NodeSession {
    pub async fn connect(identity: NodeIdentity, config: Arc<SimulatorConfig>) -> Result<Self> {
        log::info!("[{}] 🔌 Connecting to {}...", identity.node_id, config.url);

        let mut request = config
            .url
            .as_str()
            .into_client_request()
            .map_err(SimError::Handshake)?;
        let headers = request.headers_mut();
        for (name, value) in &config.headers {
            headers.insert(name.clone(), value.clone());
        }
        let auth = HeaderValue::from_str(&identity.basic_auth(&config.secret))
            .map_err(|_| SimError::InvalidHeader(AUTHORIZATION.to_string()))?;
        headers.insert(AUTHORIZATION, auth);

        let (ws, response) = connect_async(request).await.map_err(SimError::Handshake)?;
        log::info!(
            "[{}] ✅ Connected as account {} (HTTP {})",
            identity.node_id,
            identity.account,
            response.status()
        );

        let (sink, source) = ws.split();
        Ok(NodeSession {
            identity,
            config,
            writer: Arc::new(Mutex::new(FrameWriter::new(sink))),
            source,
            cancel: CancellationToken::new(),
            routes_sent: Arc::new(AtomicU64::new(0)),
            hi_replies: 0,
            frames_received: 0,
        })
    }

    pub fn node_id(&self) -> &str {
        &self.identity.node_id
    }

    /// Runs until the receive loop exits. The route writer is cancelled on
    /// the way out and never joined.
    pub async fn run(mut self) -> SessionReport {
        let periodic = PeriodicWriter {
            node_id: self.identity.node_id.clone(),
            edges: self.config.edges.clone(),
            seen: self.config.seen.clone(),
            wire_format: self.config.wire_format,
            pacing: Pacing::from_config(&self.config),
            rng: StdRng::from_entropy(),
            writer: Arc::clone(&self.writer),
            routes_sent: Arc::clone(&self.routes_sent),
            cancel: self.cancel.child_token(),
        };
        tokio::spawn(periodic.run());

        let end = self.receive_loop().await;
        self.cancel.cancel();

        log::info!("[{}] Session ended: {:?}", self.identity.node_id, end);
        SessionReport {
            node_id: self.identity.node_id.clone(),
            routes_sent: self.routes_sent.load(Ordering::Relaxed),
            hi_replies: self.hi_replies,
            frames_received: self.frames_received,
            end,
        }
    }

    async fn receive_loop(&mut self) -> SessionEnd {
        loop {
            match self.source.next().await {
                Some(Ok(Message::Text(text))) => {
                    self.frames_received += 1;
                    if let Some(end) = self.handle_text(&text).await {
                        return end;
                    }
                }
                Some(Ok(Message::Close(frame))) => {
                    log::info!("[{}] Closed by controller: {:?}", self.identity.node_id, frame);
                    self.acknowledge_peer_close().await;
                    return SessionEnd::ClosedByPeer;
                }
                Some(Ok(_)) => {}
                Some(Err(e)) => {
                    log::warn!("[{}] ⚠️ Transport error: {}", self.identity.node_id, e);
                    return SessionEnd::TransportError(e.to_string());
                }
                None => {
                    self.acknowledge_peer_close().await;
                    return SessionEnd::ClosedByPeer;
                }
            }
        }
    }

    /// Flushes the queued close reply and stops further writes.
    async fn acknowledge_peer_close(&mut self) {
        self.cancel.cancel();
        if let Err(e) = self.writer.lock().await.close().await {
            log::debug!("[{}] Close reply not sent: {}", self.identity.node_id, e);
        }
    }

    /// HI and close are checked independently, HI first.
    async fn handle_text(&mut self, text: &str) -> Option<SessionEnd> {
        if text.starts_with(SERVER_HI_PREFIX) {
            log::info!("[{}] 👋 HI from controller", self.identity.node_id);
            if let Err(e) = self.reply_hi().await {
                log::warn!("[{}] ⚠️ HI reply failed: {}", self.identity.node_id, e);
                return Some(SessionEnd::TransportError(e.to_string()));
            }
        }

        if text == SERVER_CLOSE {
            log::info!("[{}] 🛑 close requested", self.identity.node_id);
            self.cancel.cancel();
            if let Err(e) = self.writer.lock().await.close().await {
                log::warn!("[{}] ⚠️ Close failed: {}", self.identity.node_id, e);
            }
            return Some(SessionEnd::CloseCommand);
        } else {
            log::info!("[{}] recv: {}", self.identity.node_id, text);
        }

        None
    }

    async fn reply_hi(&mut self) -> Result<()> {
        let stamp = self.config.timestamp_format.stamp();
        let reply = NodeMessage::Hi(ControlMessage::hi(&self.identity.node_id, stamp)).to_json()?;
        self.writer.lock().await.send_text(reply).await?;
        self.hi_replies += 1;
        Ok(())
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::messages::TimestampFormat;
    use tokio::net::TcpListener;
    use tokio::time::timeout;
    use tokio_tungstenite::accept_hdr_async;
    use tokio_tungstenite::tungstenite::handshake::server::{ErrorResponse, Request, Response};

    pub(crate) type ServerWs = WebSocketStream<TcpStream>;

    pub(crate) const WAIT: Duration = Duration::from_secs(5);

    pub(crate) async fn listen() -> (TcpListener, String) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let url = format!("ws://{}/receptor-controller", listener.local_addr().unwrap());
        (listener, url)
    }

    /// Accepts one upgrade, returning the socket and its Authorization header.
    pub(crate) async fn accept(listener: &TcpListener) -> (ServerWs, Option<String>) {
        let (stream, _) = listener.accept().await.unwrap();
        let mut auth = None;
        let ws = accept_hdr_async(stream, |req: &Request, resp: Response| -> std::result::Result<Response, ErrorResponse> {
            auth = req
                .headers()
                .get(AUTHORIZATION)
                .and_then(|v| v.to_str().ok())
                .map(str::to_string);
            Ok(resp)
        })
        .await
        .unwrap();
        (ws, auth)
    }

    /// Next text frame, or None once the client closed.
    pub(crate) async fn next_text(ws: &mut ServerWs) -> Option<String> {
        while let Some(Ok(msg)) = ws.next().await {
            match msg {
                Message::Text(text) => return Some(text),
                Message::Close(_) => return None,
                _ => {}
            }
        }
        None
    }

    pub(crate) fn is_route(text: &str) -> bool {
        text.starts_with("ROUTE:") || text.contains("\"cmd\":\"ROUTE\"")
    }

    async fn next_non_route(ws: &mut ServerWs) -> Option<String> {
        loop {
            let text = next_text(ws).await?;
            if !is_route(&text) {
                return Some(text);
            }
        }
    }

    pub(crate) fn fast_config(url: String) -> SimulatorConfig {
        SimulatorConfig {
            url,
            initial_delay: Duration::from_millis(20),
            min_gap: Duration::from_millis(10),
            max_gap: Duration::from_millis(30),
            ..SimulatorConfig::default()
        }
    }

    fn start(identity: NodeIdentity, config: SimulatorConfig) -> tokio::task::JoinHandle<SessionReport> {
        tokio::spawn(async move {
            NodeSession::connect(identity, Arc::new(config))
                .await
                .unwrap()
                .run()
                .await
        })
    }

    #[test]
    fn test_gap_stays_in_half_open_range() {
        let pacing = Pacing {
            initial_delay: Duration::from_secs(2),
            min_gap: Duration::from_millis(100),
            max_gap: Duration::from_millis(1000),
        };
        let mut rng = StdRng::seed_from_u64(7);
        for _ in 0..10_000 {
            let gap = pacing.next_gap(&mut rng);
            assert!(gap >= Duration::from_millis(100));
            assert!(gap < Duration::from_millis(1000));
        }
    }

    #[tokio::test]
    async fn test_hi_reply_then_close() {
        let (listener, url) = listen().await;
        let identity = NodeIdentity::from_index(4);
        let client = start(identity.clone(), fast_config(url));

        let (mut ws, auth) = accept(&listener).await;
        assert_eq!(auth.as_deref(), Some(identity.basic_auth("imapassord").as_str()));

        ws.send(Message::Text("HI there".into())).await.unwrap();
        let reply = timeout(WAIT, next_non_route(&mut ws)).await.unwrap().unwrap();
        match NodeMessage::from_json(&reply).unwrap() {
            NodeMessage::Hi(hi) => {
                assert_eq!(hi.id, "node_04");
                assert!(!hi.expire_time.is_empty());
            }
            other => panic!("expected HI, got {:?}", other),
        }

        ws.send(Message::Text("hello".into())).await.unwrap();
        ws.send(Message::Text("close".into())).await.unwrap();

        // Only ROUTE frames may precede the close frame.
        while let Some(text) = timeout(WAIT, next_text(&mut ws)).await.unwrap() {
            assert!(is_route(&text), "unexpected frame {text}");
        }
        let after_close = timeout(WAIT, ws.next()).await.unwrap();
        assert!(after_close.map_or(true, |m| m.is_err()));

        let report = timeout(WAIT, client).await.unwrap().unwrap();
        assert_eq!(report.end, SessionEnd::CloseCommand);
        assert_eq!(report.hi_replies, 1);
        assert_eq!(report.frames_received, 3);
    }

    #[tokio::test]
    async fn test_other_text_keeps_session_open() {
        let (listener, url) = listen().await;
        let client = start(NodeIdentity::from_index(1), fast_config(url));
        let (mut ws, _) = accept(&listener).await;

        ws.send(Message::Text("hello".into())).await.unwrap();
        ws.send(Message::Text("CLOSE".into())).await.unwrap();
        for _ in 0..3 {
            let text = timeout(WAIT, next_text(&mut ws)).await.unwrap().unwrap();
            assert!(is_route(&text));
        }
        assert!(!client.is_finished());

        ws.send(Message::Text("close".into())).await.unwrap();
        let report = timeout(WAIT, client).await.unwrap().unwrap();
        assert_eq!(report.end, SessionEnd::CloseCommand);
        assert_eq!(report.hi_replies, 0);
    }

    #[tokio::test]
    async fn test_routes_carry_node_state() {
        let (listener, url) = listen().await;
        let mut config = fast_config(url);
        config.edges = vec![Edge::new("node-a", "node-b", 1), Edge::new("node_02", "node-a", 5)];
        config.seen = vec!["node-a".into()];
        let client = start(NodeIdentity::from_index(2), config);
        let (mut ws, _) = accept(&listener).await;

        let text = timeout(WAIT, next_text(&mut ws)).await.unwrap().unwrap();
        match NodeMessage::from_json(&text).unwrap() {
            NodeMessage::Route(route) => {
                assert_eq!(route.id, "node_02");
                assert_eq!(route.edges.len(), 2);
                assert_eq!(route.edges[1], Edge::new("node_02", "node-a", 5));
                assert_eq!(route.seen, vec!["node-a".to_string()]);
            }
            other => panic!("expected ROUTE, got {:?}", other),
        }

        ws.send(Message::Text("close".into())).await.unwrap();
        let report = timeout(WAIT, client).await.unwrap().unwrap();
        assert!(report.routes_sent >= 1);
    }

    #[tokio::test]
    async fn test_colon_format_and_placeholder_stamp() {
        let (listener, url) = listen().await;
        let mut config = fast_config(url);
        config.wire_format = WireFormat::Colon;
        config.timestamp_format = TimestampFormat::Placeholder;
        let client = start(NodeIdentity::from_index(9), config);
        let (mut ws, _) = accept(&listener).await;

        let text = timeout(WAIT, next_text(&mut ws)).await.unwrap().unwrap();
        assert_eq!(text, "ROUTE:node_09:timestamp");

        ws.send(Message::Text("HI".into())).await.unwrap();
        let reply = timeout(WAIT, next_non_route(&mut ws)).await.unwrap().unwrap();
        assert_eq!(
            reply,
            r#"{"cmd":"HI","id":"node_09","expire_time":"2006-01-02T15:04:05Z07:00"}"#
        );

        ws.send(Message::Text("close".into())).await.unwrap();
        timeout(WAIT, client).await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn test_no_route_before_initial_delay() {
        let (listener, url) = listen().await;
        let mut config = fast_config(url);
        config.initial_delay = Duration::from_secs(30);
        let client = start(NodeIdentity::from_index(3), config);
        let (mut ws, _) = accept(&listener).await;

        assert!(timeout(Duration::from_millis(300), next_text(&mut ws)).await.is_err());

        ws.send(Message::Text("close".into())).await.unwrap();
        let report = timeout(WAIT, client).await.unwrap().unwrap();
        assert_eq!(report.routes_sent, 0);
    }

    #[tokio::test]
    async fn test_peer_close_ends_session() {
        let (listener, url) = listen().await;
        let client = start(NodeIdentity::from_index(5), fast_config(url));
        let (mut ws, _) = accept(&listener).await;

        ws.close(None).await.unwrap();
        let report = timeout(WAIT, client).await.unwrap().unwrap();
        assert_eq!(report.end, SessionEnd::ClosedByPeer);

        // The client must answer the close handshake rather than reset.
        while let Some(frame) = timeout(WAIT, ws.next()).await.unwrap() {
            match frame {
                Ok(Message::Close(_)) => {}
                Ok(other) => assert!(is_route(other.to_text().unwrap()), "unexpected {other:?}"),
                Err(e) => panic!("close handshake not completed: {e}"),
            }
        }
    }

    #[tokio::test]
    async fn test_dropped_socket_ends_session() {
        let (listener, url) = listen().await;
        let client = start(NodeIdentity::from_index(6), fast_config(url));
        let (ws, _) = accept(&listener).await;

        drop(ws);
        let report = timeout(WAIT, client).await.unwrap().unwrap();
        assert_ne!(report.end, SessionEnd::CloseCommand);
    }

    #[tokio::test]
    async fn test_upgrade_failure() {
        let (listener, url) = listen().await;
        drop(listener);
        let result = NodeSession::connect(NodeIdentity::from_index(0), Arc::new(fast_config(url))).await;
        assert!(matches!(result, Err(SimError::Handshake(_))));
    }
}
