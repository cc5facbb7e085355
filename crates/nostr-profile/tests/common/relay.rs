//! Minimal in-process relay for driving a real `RelayPool`.

use futures::{SinkExt, StreamExt};
use nostr::Event;
use parking_lot::Mutex;
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::timeout;
use tokio_tungstenite::accept_async;
use tokio_tungstenite::tungstenite::Message;

pub const WAIT: Duration = Duration::from_secs(5);

/// Records every text frame clients send and pushes frames to every
/// connected client.
pub struct MockRelay {
    url: String,
    inbox: mpsc::UnboundedReceiver<String>,
    connections: Arc<Mutex<Vec<mpsc::UnboundedSender<Message>>>>,
    server: JoinHandle<()>,
}

impl MockRelay {
    pub async fn start() -> Self {
        super::init_tracing();
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let (inbox_tx, inbox) = mpsc::unbounded_channel();
        let connections = Arc::new(Mutex::new(Vec::new()));

        let server = {
            let connections = Arc::clone(&connections);
            tokio::spawn(async move {
                while let Ok((stream, _)) = listener.accept().await {
                    let Ok(ws) = accept_async(stream).await else {
                        continue;
                    };
                    let (tx, rx) = mpsc::unbounded_channel();
                    connections.lock().push(tx);
                    tokio::spawn(serve(ws, rx, inbox_tx.clone()));
                }
            })
        };

        Self {
            url: format!("ws://{}", addr),
            inbox,
            connections,
            server,
        }
    }

    pub fn url(&self) -> String {
        self.url.clone()
    }

    /// Skip client frames until one whose first element is `kind`.
    pub async fn next_frame_of(&mut self, kind: &str) -> Value {
        loop {
            let text = timeout(WAIT, self.inbox.recv())
                .await
                .expect("timed out waiting for client frame")
                .expect("relay inbox closed");
            let frame: Value = serde_json::from_str(&text).unwrap();
            if frame[0] == kind {
                return frame;
            }
        }
    }

    /// Skip client frames until `kind` for `subscription_id`.
    pub async fn next_frame_for(&mut self, kind: &str, subscription_id: &str) -> Value {
        loop {
            let frame = self.next_frame_of(kind).await;
            if frame[1] == subscription_id {
                return frame;
            }
        }
    }

    pub fn send_text(&self, text: &str) {
        self.connections
            .lock()
            .retain(|tx| tx.send(Message::Text(text.to_string().into())).is_ok());
    }

    pub fn send_event(&self, subscription_id: &str, event: &Event) {
        self.send_text(&serde_json::json!(["EVENT", subscription_id, event]).to_string());
    }

    pub fn send_eose(&self, subscription_id: &str) {
        self.send_text(&serde_json::json!(["EOSE", subscription_id]).to_string());
    }
}

impl Drop for MockRelay {
    fn drop(&mut self) {
        self.server.abort();
    }
}

async fn serve(
    ws: tokio_tungstenite::WebSocketStream<tokio::net::TcpStream>,
    mut outbound: mpsc::UnboundedReceiver<Message>,
    inbox: mpsc::UnboundedSender<String>,
) {
    let (mut sink, mut stream) = ws.split();
    loop {
        tokio::select! {
            msg = outbound.recv() => {
                let Some(msg) = msg else { break };
                if sink.send(msg).await.is_err() {
                    break;
                }
            }
            frame = stream.next() => match frame {
                Some(Ok(Message::Text(text))) => {
                    let _ = inbox.send(text.as_str().to_owned());
                }
                Some(Ok(Message::Close(_))) | Some(Err(_)) | None => break,
                Some(Ok(_)) => {}
            }
        }
    }
}

/// Poll `check` until it holds, or panic after [`WAIT`].
pub async fn eventually(mut check: impl FnMut() -> bool) {
    timeout(WAIT, async {
        while !check() {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .expect("condition never held");
}
