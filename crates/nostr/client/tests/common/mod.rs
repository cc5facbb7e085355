//! In-process mock relay shared by the integration tests.

#![allow(dead_code)]

use futures::{SinkExt, StreamExt};
use nostr::Event;
use serde_json::Value;
use std::sync::{Arc, Mutex, Once};
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;
use tokio::time::timeout;
use tokio_tungstenite::accept_async;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;

pub const WAIT: Duration = Duration::from_secs(5);

pub fn init_tracing() {
    static INIT: Once = Once::new();
    INIT.call_once(|| {
        let filter = tracing_subscriber::EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn"));
        let _ = tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_test_writer()
            .try_init();
    });
}

/// A relay that records every text frame it receives and lets the test push
/// frames to all connected clients.
pub struct MockRelay {
    url: String,
    inbox: mpsc::UnboundedReceiver<String>,
    connections: Arc<Mutex<Vec<mpsc::UnboundedSender<Message>>>>,
    accepted: Arc<Mutex<usize>>,
    server: JoinHandle<()>,
}

impl MockRelay {
    pub async fn start() -> Self {
        init_tracing();
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let (inbox_tx, inbox) = mpsc::unbounded_channel();
        let connections = Arc::new(Mutex::new(Vec::new()));
        let accepted = Arc::new(Mutex::new(0));

        let server = {
            let connections = Arc::clone(&connections);
            let accepted = Arc::clone(&accepted);
            tokio::spawn(async move {
                while let Ok((stream, _)) = listener.accept().await {
                    let Ok(ws) = accept_async(stream).await else {
                        continue;
                    };
                    let (tx, rx) = mpsc::unbounded_channel();
                    connections.lock().unwrap().push(tx);
                    *accepted.lock().unwrap() += 1;
                    tokio::spawn(serve_connection(ws, rx, inbox_tx.clone()));
                }
            })
        };

        Self {
            url: format!("ws://{}", addr),
            inbox,
            connections,
            accepted,
            server,
        }
    }

    pub fn url(&self) -> String {
        self.url.clone()
    }

    /// Total connections accepted so far.
    pub fn accepted(&self) -> usize {
        *self.accepted.lock().unwrap()
    }

    pub async fn wait_for_connections(&self, n: usize) {
        timeout(WAIT, async {
            while self.accepted() < n {
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        })
        .await
        .expect("relay never saw the expected connections");
    }

    /// Next frame a client sent, parsed as JSON.
    pub async fn next_frame(&mut self) -> Value {
        let text = timeout(WAIT, self.inbox.recv())
            .await
            .expect("timed out waiting for client frame")
            .expect("relay inbox closed");
        serde_json::from_str(&text).unwrap()
    }

    /// Skip frames until one whose first element is `kind`.
    pub async fn next_frame_of(&mut self, kind: &str) -> Value {
        loop {
            let frame = self.next_frame().await;
            if frame[0] == kind {
                return frame;
            }
        }
    }

    pub fn send_text(&self, text: &str) {
        self.connections
            .lock()
            .unwrap()
            .retain(|tx| tx.send(Message::Text(text.to_string().into())).is_ok());
    }

    pub fn send_event(&self, subscription_id: &str, event: &Event) {
        self.send_text(&serde_json::json!(["EVENT", subscription_id, event]).to_string());
    }

    pub fn send_eose(&self, subscription_id: &str) {
        self.send_text(&serde_json::json!(["EOSE", subscription_id]).to_string());
    }

    /// Close every live connection from the relay side.
    pub fn close_all(&self, code: u16, reason: &str) {
        let frame = CloseFrame {
            code: CloseCode::from(code),
            reason: reason.to_string().into(),
        };
        for tx in self.connections.lock().unwrap().drain(..) {
            let _ = tx.send(Message::Close(Some(frame.clone())));
        }
    }
}

impl Drop for MockRelay {
    fn drop(&mut self) {
        self.server.abort();
    }
}

async fn serve_connection(
    ws: tokio_tungstenite::WebSocketStream<tokio::net::TcpStream>,
    mut outbound: mpsc::UnboundedReceiver<Message>,
    inbox: mpsc::UnboundedSender<String>,
) {
    let (mut sink, mut stream) = ws.split();
    loop {
        tokio::select! {
            msg = outbound.recv() => {
                let Some(msg) = msg else { break };
                let closing = matches!(msg, Message::Close(_));
                if sink.send(msg).await.is_err() || closing {
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

pub fn text_note(id: &str, pubkey: &str, created_at: u64) -> Event {
    Event {
        id: id.to_string(),
        pubkey: pubkey.to_string(),
        created_at,
        kind: 1,
        tags: vec![],
        content: format!("note {id}"),
        sig: "sig".to_string(),
    }
}

/// Receive from a broadcast channel until `pred` matches, or panic after [`WAIT`].
pub async fn wait_for<T, F>(rx: &mut broadcast::Receiver<T>, mut pred: F) -> T
where
    T: Clone,
    F: FnMut(&T) -> bool,
{
    timeout(WAIT, async {
        loop {
            match rx.recv().await {
                Ok(item) if pred(&item) => return item,
                Ok(_) | Err(broadcast::error::RecvError::Lagged(_)) => continue,
                Err(broadcast::error::RecvError::Closed) => panic!("channel closed"),
            }
        }
    })
    .await
    .expect("timed out waiting for event")
}
