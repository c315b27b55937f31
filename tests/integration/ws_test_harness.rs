//! Game server test harness
use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{anyhow, Result};
use futures_util::{SinkExt, StreamExt};
use serde_json::json;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{broadcast, mpsc, Mutex};
use tokio::task::JoinHandle;
use tokio_tungstenite::accept_async;
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tokio_tungstenite::tungstenite::protocol::{CloseFrame, Message};
use uuid::Uuid;

use hangman_client::{ClientEvent, ClientEventKind, ClientOptions, WsClient};

/// Instructions broadcast to every open server connection
#[derive(Debug, Clone)]
pub enum ServerCommand {
    /// Send a text frame
    Text(String),
    /// Start the closing handshake
    Close { code: u16, reason: String },
}

struct ServerState {
    send_init: bool,
    frames: Mutex<Vec<String>>,
    identities: Mutex<Vec<String>>,
    connections: AtomicUsize,
}

/// A minimal game server speaking the `[channel, sender, payload]` protocol
pub struct GameServer {
    addr: SocketAddr,
    state: Arc<ServerState>,
    control: broadcast::Sender<ServerCommand>,
    accept_task: JoinHandle<()>,
}

impl GameServer {
    /// Start a server that greets every connection with an `init` frame
    pub async fn start() -> Result<Self> {
        Self::bind(true).await
    }

    /// Start a server that never assigns an identity
    pub async fn start_silent() -> Result<Self> {
        Self::bind(false).await
    }

    async fn bind(send_init: bool) -> Result<Self> {
        let listener = TcpListener::bind("127.0.0.1:0").await?;
        let addr = listener.local_addr()?;
        let state = Arc::new(ServerState {
            send_init,
            frames: Mutex::new(Vec::new()),
            identities: Mutex::new(Vec::new()),
            connections: AtomicUsize::new(0),
        });
        let (control, _) = broadcast::channel(16);

        let accept_state = Arc::clone(&state);
        let accept_control = control.clone();
        let accept_task = tokio::spawn(async move {
            while let Ok((stream, _)) = listener.accept().await {
                let state = Arc::clone(&accept_state);
                let control = accept_control.subscribe();
                tokio::spawn(async move {
                    if let Err(e) = handle_connection(stream, state, control).await {
                        println!("Game server connection error: {}", e);
                    }
                });
            }
        });

        Ok(Self {
            addr,
            state,
            control,
            accept_task,
        })
    }

    pub fn url(&self) -> String {
        format!("ws://{}", self.addr)
    }

    /// Number of connections accepted so far
    pub fn connections(&self) -> usize {
        self.state.connections.load(Ordering::SeqCst)
    }

    /// Identities assigned so far, in order
    pub async fn identities(&self) -> Vec<String> {
        self.state.identities.lock().await.clone()
    }

    /// Text frames received from clients, heartbeats excluded
    pub async fn messages(&self) -> Vec<String> {
        self.state
            .frames
            .lock()
            .await
            .iter()
            .filter(|frame| !frame.is_empty())
            .cloned()
            .collect()
    }

    /// Number of heartbeat frames received
    pub async fn heartbeats(&self) -> usize {
        self.state
            .frames
            .lock()
            .await
            .iter()
            .filter(|frame| frame.is_empty())
            .count()
    }

    /// Send a text frame on every open connection
    pub fn broadcast(&self, text: &str) {
        let _ = self.control.send(ServerCommand::Text(text.to_string()));
    }

    /// Close every open connection
    pub fn close_all(&self, code: u16, reason: &str) {
        let _ = self.control.send(ServerCommand::Close {
            code,
            reason: reason.to_string(),
        });
    }

    /// Wait until at least `count` messages arrived
    pub async fn wait_for_messages(&self, count: usize, timeout_ms: u64) -> Result<Vec<String>> {
        let deadline = tokio::time::Instant::now() + Duration::from_millis(timeout_ms);
        loop {
            let messages = self.messages().await;
            if messages.len() >= count {
                return Ok(messages);
            }
            if tokio::time::Instant::now() >= deadline {
                return Err(anyhow!(
                    "Expected {} messages, got {}: {:?}",
                    count,
                    messages.len(),
                    messages
                ));
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    }

    /// Wait until at least `count` connections were accepted
    pub async fn wait_for_connections(&self, count: usize, timeout_ms: u64) -> Result<()> {
        let deadline = tokio::time::Instant::now() + Duration::from_millis(timeout_ms);
        while self.connections() < count {
            if tokio::time::Instant::now() >= deadline {
                return Err(anyhow!(
                    "Expected {} connections, got {}",
                    count,
                    self.connections()
                ));
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        Ok(())
    }

    /// Stop accepting connections
    pub fn stop(&self) {
        self.accept_task.abort();
    }
}

impl Drop for GameServer {
    fn drop(&mut self) {
        self.accept_task.abort();
    }
}

async fn handle_connection(
    stream: TcpStream,
    state: Arc<ServerState>,
    mut control: broadcast::Receiver<ServerCommand>,
) -> Result<()> {
    let ws_stream = accept_async(stream).await?;
    let (mut write, mut read) = ws_stream.split();
    state.connections.fetch_add(1, Ordering::SeqCst);

    if state.send_init {
        let id = Uuid::new_v4().to_string();
        state.identities.lock().await.push(id.clone());
        write
            .send(Message::Text(json!(["init", id]).to_string().into()))
            .await?;
    }

    loop {
        tokio::select! {
            msg = read.next() => match msg {
                Some(Ok(Message::Text(text))) => {
                    state.frames.lock().await.push(text.as_str().to_string());
                }
                // Keep reading after a close so the reply gets flushed
                Some(Ok(_)) => {}
                Some(Err(_)) | None => break,
            },
            cmd = control.recv() => match cmd {
                Ok(ServerCommand::Text(text)) => write.send(Message::Text(text.into())).await?,
                Ok(ServerCommand::Close { code, reason }) => {
                    let frame = CloseFrame {
                        code: CloseCode::from(code),
                        reason: reason.into(),
                    };
                    write.send(Message::Close(Some(frame))).await?;
                }
                Err(_) => break,
            },
        }
    }

    Ok(())
}

/// Client options with short delays
pub fn fast_options() -> ClientOptions {
    ClientOptions {
        ping_interval_ms: 3000,
        timeout_interval_ms: 2000,
        reconnect_interval_ms: 50,
        max_reconnect_interval_ms: 500,
        reconnect_decay: 1.5,
        max_reconnect_attempts: None,
    }
}

/// Forward every client event into a channel
pub fn record_events(client: &WsClient) -> mpsc::UnboundedReceiver<ClientEvent> {
    let (tx, rx) = mpsc::unbounded_channel();
    for kind in [
        ClientEventKind::Connecting,
        ClientEventKind::Connect,
        ClientEventKind::Message,
        ClientEventKind::Close,
        ClientEventKind::Error,
    ] {
        let tx = tx.clone();
        client.on(kind, move |event| {
            let _ = tx.send(event.clone());
        });
    }
    rx
}

/// Wait for the next event of `kind`
pub async fn next_event(
    events: &mut mpsc::UnboundedReceiver<ClientEvent>,
    kind: ClientEventKind,
    timeout_ms: u64,
) -> Result<ClientEvent> {
    let wait = async {
        while let Some(event) = events.recv().await {
            if event.kind() == kind {
                return Ok(event);
            }
        }
        Err(anyhow!("Event listeners were removed"))
    };
    tokio::time::timeout(Duration::from_millis(timeout_ms), wait)
        .await
        .map_err(|_| anyhow!("Timed out waiting for a {} event", kind))?
}

/// Reserve a local address with nothing listening on it
pub async fn unused_address() -> Result<SocketAddr> {
    let listener = TcpListener::bind("127.0.0.1:0").await?;
    let addr = listener.local_addr()?;
    drop(listener);
    Ok(addr)
}
