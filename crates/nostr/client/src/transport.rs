//! Single relay WebSocket transport.
//!
//! A [`Transport`] owns at most one socket to one relay. Everything that
//! happens on it (connect, frames, close, failures) is published as a
//! [`TransportEvent`]; reconnect policy belongs to the caller.
//!
//! Events go out two ways. [`Transport::events`] is a bounded broadcast for
//! observers, which may lag and skip. [`Transport::listen`] is an unbounded
//! queue that sees every event in order, for whoever routes the frames.
//!
//! Outbound frames go through an unbounded queue drained by a writer task, so
//! [`Transport::send`] never blocks and may be called from synchronous code.

use crate::config::TransportConfig;
use crate::error::{Result, TransportError};
use futures::stream::{SplitSink, SplitStream};
use futures::{SinkExt, StreamExt};
use parking_lot::Mutex;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;
use tokio::net::TcpStream;
use tokio::sync::{broadcast, mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio::time::timeout;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async};
use tracing::{debug, info, trace, warn};
use url::Url;

/// Normal closure
pub const CLOSE_NORMAL: u16 = 1000;
/// No status code was present in the close frame
pub const CLOSE_NO_STATUS: u16 = 1005;
/// Socket went away without a close frame
pub const CLOSE_ABNORMAL: u16 = 1006;

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Connection state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
}

/// A data frame sent or received on the socket.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WsMessage {
    Text(String),
    Binary(Vec<u8>),
}

impl From<WsMessage> for Message {
    fn from(message: WsMessage) -> Self {
        match message {
            WsMessage::Text(text) => Message::Text(text.into()),
            WsMessage::Binary(data) => Message::Binary(data.into()),
        }
    }
}

/// Lifecycle and data events published by a transport.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportEvent {
    Connected,
    Message(WsMessage),
    Disconnected { code: u16, reason: String },
    Error(String),
}

struct PendingPing {
    payload: Vec<u8>,
    done: oneshot::Sender<()>,
}

/// Mutable link state. `generation` changes every time a socket is opened or
/// torn down, so a receive loop from an older socket cannot touch a newer one.
struct Link {
    state: ConnectionState,
    generation: u64,
    outbound: Option<mpsc::UnboundedSender<Message>>,
    recv_task: Option<JoinHandle<()>>,
    pending_pings: Vec<PendingPing>,
}

struct Shared {
    url: String,
    link: Mutex<Link>,
    events_tx: broadcast::Sender<TransportEvent>,
    listeners: Mutex<Vec<mpsc::UnboundedSender<TransportEvent>>>,
}

impl Shared {
    fn emit(&self, event: TransportEvent) {
        self.listeners
            .lock()
            .retain(|tx| tx.send(event.clone()).is_ok());
        let _ = self.events_tx.send(event);
    }

    /// Tear down the current socket. With `generation` set, only if the link
    /// still belongs to it. Returns whether anything was torn down.
    fn close_link(&self, generation: Option<u64>, close: Option<CloseFrame>) -> bool {
        let mut link = self.link.lock();
        if generation.is_some_and(|g| g != link.generation) {
            return false;
        }

        link.generation += 1;
        if let Some(task) = link.recv_task.take() {
            task.abort();
        }
        if let Some(outbound) = link.outbound.take()
            && let Some(frame) = close
        {
            let _ = outbound.send(Message::Close(Some(frame)));
        }
        link.pending_pings.clear();
        link.state = ConnectionState::Disconnected;
        true
    }

    fn resolve_ping(&self, payload: &[u8]) {
        let mut link = self.link.lock();
        if let Some(pos) = link
            .pending_pings
            .iter()
            .position(|p| p.payload.as_slice() == payload)
        {
            let _ = link.pending_pings.swap_remove(pos).done.send(());
        }
    }
}

/// WebSocket connection to one relay.
pub struct Transport {
    config: TransportConfig,
    shared: Arc<Shared>,
    ping_counter: AtomicU64,
}

impl Transport {
    /// Create a transport (does not connect yet)
    pub fn new(url: &str) -> Result<Self> {
        Self::with_config(url, TransportConfig::default())
    }

    pub fn with_config(url: &str, config: TransportConfig) -> Result<Self> {
        let parsed = Url::parse(url)?;
        if parsed.scheme() != "ws" && parsed.scheme() != "wss" {
            return Err(TransportError::InvalidUrl(format!(
                "URL must use ws:// or wss:// scheme, got: {}",
                parsed.scheme()
            )));
        }

        let (events_tx, _) = broadcast::channel(config.event_capacity.max(1));

        Ok(Self {
            config,
            shared: Arc::new(Shared {
                url: url.to_string(),
                link: Mutex::new(Link {
                    state: ConnectionState::Disconnected,
                    generation: 0,
                    outbound: None,
                    recv_task: None,
                    pending_pings: Vec::new(),
                }),
                events_tx,
                listeners: Mutex::new(Vec::new()),
            }),
            ping_counter: AtomicU64::new(0),
        })
    }

    pub fn url(&self) -> &str {
        &self.shared.url
    }

    pub fn config(&self) -> &TransportConfig {
        &self.config
    }

    /// Subscribe to this transport's events. A receiver that falls more
    /// than `event_capacity` behind skips events.
    pub fn events(&self) -> broadcast::Receiver<TransportEvent> {
        self.shared.events_tx.subscribe()
    }

    /// Receive every event from now on, in order, without loss.
    ///
    /// The queue is unbounded; drop the receiver to stop listening.
    pub fn listen(&self) -> mpsc::UnboundedReceiver<TransportEvent> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.shared.listeners.lock().push(tx);
        rx
    }

    pub fn state(&self) -> ConnectionState {
        self.shared.link.lock().state
    }

    pub fn is_connected(&self) -> bool {
        self.state() == ConnectionState::Connected
    }

    /// Open the socket. Returns immediately if already connected or connecting.
    pub async fn connect(&self) -> Result<()> {
        let generation = {
            let mut link = self.shared.link.lock();
            if link.state != ConnectionState::Disconnected {
                return Ok(());
            }
            link.state = ConnectionState::Connecting;
            link.generation += 1;
            link.generation
        };

        info!("Connecting to relay: {}", self.url());

        let started = Instant::now();
        let ws = match timeout(self.config.connect_timeout, connect_async(self.url())).await {
            Ok(Ok((ws, _))) => ws,
            Ok(Err(e)) => {
                return Err(self.fail_connect(generation, TransportError::Connect(e.to_string())));
            }
            Err(_) => {
                return Err(self.fail_connect(
                    generation,
                    TransportError::Timeout(format!(
                        "connection timeout after {:?}",
                        self.config.connect_timeout
                    )),
                ));
            }
        };

        let (sink, stream) = ws.split();
        let (outbound, outbound_rx) = mpsc::unbounded_channel();

        {
            let mut link = self.shared.link.lock();
            if link.generation != generation {
                debug!(relay = %self.url(), "disconnected during handshake, dropping socket");
                return Err(TransportError::Connect("connection cancelled".to_string()));
            }

            link.state = ConnectionState::Connected;
            link.outbound = Some(outbound);
            // Published before the receive loop starts so Connected is always first.
            self.shared.emit(TransportEvent::Connected);

            tokio::spawn(write_loop(sink, outbound_rx, Arc::clone(&self.shared)));
            link.recv_task = Some(tokio::spawn(read_loop(
                Arc::clone(&self.shared),
                stream,
                generation,
            )));
        }

        info!(
            "Connected to relay: {} (took {:?})",
            self.url(),
            started.elapsed()
        );
        Ok(())
    }

    fn fail_connect(&self, generation: u64, err: TransportError) -> TransportError {
        {
            let mut link = self.shared.link.lock();
            if link.generation == generation {
                link.state = ConnectionState::Disconnected;
            }
        }
        warn!(relay = %self.url(), error = %err, "relay connection failed");
        self.shared.emit(TransportEvent::Error(err.to_string()));
        err
    }

    /// Queue a frame for the writer task.
    ///
    /// When not connected the frame is dropped and an `Error` event is
    /// published.
    pub fn send(&self, message: WsMessage) -> Result<()> {
        let outbound = {
            let link = self.shared.link.lock();
            if link.state == ConnectionState::Connected {
                link.outbound.clone()
            } else {
                None
            }
        };

        let result = match outbound {
            Some(tx) => tx
                .send(message.into())
                .map_err(|_| TransportError::NotConnected),
            None => Err(TransportError::NotConnected),
        };

        if let Err(ref e) = result {
            debug!(relay = %self.url(), error = %e, "dropping outbound frame");
            self.shared.emit(TransportEvent::Error(e.to_string()));
        }
        result
    }

    pub fn send_text(&self, text: &str) -> Result<()> {
        trace!(relay = %self.url(), "sending: {}", text);
        self.send(WsMessage::Text(text.to_string()))
    }

    /// Close the socket and re-arm for a later [`connect`](Self::connect).
    ///
    /// Always publishes `Disconnected { code, reason }`.
    pub fn disconnect(&self, code: u16, reason: &str) {
        info!(relay = %self.url(), code, reason, "disconnecting from relay");
        let frame = CloseFrame {
            code: CloseCode::from(code),
            reason: reason.to_string().into(),
        };
        self.shared.close_link(None, Some(frame));
        self.shared.emit(TransportEvent::Disconnected {
            code,
            reason: reason.to_string(),
        });
    }

    /// Send a ping and wait for the matching pong.
    pub async fn ping(&self) -> Result<()> {
        let payload = self
            .ping_counter
            .fetch_add(1, Ordering::Relaxed)
            .to_be_bytes()
            .to_vec();
        let (done, done_rx) = oneshot::channel();

        {
            let mut link = self.shared.link.lock();
            let outbound = match (&link.outbound, link.state) {
                (Some(tx), ConnectionState::Connected) => tx.clone(),
                _ => return Err(TransportError::NotConnected),
            };
            outbound
                .send(Message::Ping(payload.clone().into()))
                .map_err(|_| TransportError::NotConnected)?;
            link.pending_pings.push(PendingPing {
                payload: payload.clone(),
                done,
            });
        }

        match timeout(self.config.ping_timeout, done_rx).await {
            Ok(Ok(())) => Ok(()),
            // Sender dropped: the link was torn down while waiting.
            Ok(Err(_)) => Err(TransportError::NotConnected),
            Err(_) => {
                self.shared
                    .link
                    .lock()
                    .pending_pings
                    .retain(|p| p.payload != payload);
                Err(TransportError::Timeout(format!(
                    "no pong after {:?}",
                    self.config.ping_timeout
                )))
            }
        }
    }
}

impl Drop for Transport {
    fn drop(&mut self) {
        self.shared.close_link(
            None,
            Some(CloseFrame {
                code: CloseCode::Normal,
                reason: String::new().into(),
            }),
        );
    }
}

async fn write_loop(
    mut sink: SplitSink<WsStream, Message>,
    mut outbound: mpsc::UnboundedReceiver<Message>,
    shared: Arc<Shared>,
) {
    while let Some(message) = outbound.recv().await {
        let closing = matches!(message, Message::Close(_));
        if let Err(e) = sink.send(message).await {
            warn!(relay = %shared.url, error = %e, "failed to write frame");
            shared.emit(TransportEvent::Error(
                TransportError::Send(e.to_string()).to_string(),
            ));
        }
        if closing {
            break;
        }
    }
    let _ = sink.close().await;
}

async fn read_loop(shared: Arc<Shared>, mut stream: SplitStream<WsStream>, generation: u64) {
    while let Some(frame) = stream.next().await {
        match frame {
            Ok(Message::Text(text)) => {
                trace!(relay = %shared.url, "received: {}", text.as_str());
                shared.emit(TransportEvent::Message(WsMessage::Text(
                    text.as_str().to_owned(),
                )));
            }
            Ok(Message::Binary(data)) => {
                shared.emit(TransportEvent::Message(WsMessage::Binary(data.to_vec())));
            }
            Ok(Message::Pong(data)) => shared.resolve_ping(&data),
            Ok(Message::Ping(_)) | Ok(Message::Frame(_)) => {}
            Ok(Message::Close(frame)) => {
                let (code, reason) = frame
                    .map(|f| (u16::from(f.code), f.reason.as_str().to_owned()))
                    .unwrap_or((CLOSE_NO_STATUS, String::new()));
                info!(relay = %shared.url, code, reason = %reason, "relay closed connection");
                if shared.close_link(Some(generation), None) {
                    shared.emit(TransportEvent::Disconnected { code, reason });
                }
                return;
            }
            Err(e) => {
                warn!(relay = %shared.url, error = %e, "WebSocket receive failed");
                if shared.close_link(Some(generation), None) {
                    shared.emit(TransportEvent::Error(
                        TransportError::Receive(e.to_string()).to_string(),
                    ));
                }
                return;
            }
        }
    }

    debug!(relay = %shared.url, "socket stream ended");
    if shared.close_link(Some(generation), None) {
        shared.emit(TransportEvent::Disconnected {
            code: CLOSE_ABNORMAL,
            reason: "connection closed".to_string(),
        });
    }
}
