//! `tokio-tungstenite` backed transport

use async_trait::async_trait;
use futures_util::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tokio_tungstenite::tungstenite::protocol::{CloseFrame, Message};
use tokio_tungstenite::tungstenite::Error as WsError;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use tracing::{debug, trace};

use super::{CloseInfo, Connector, Transport, TransportEvent};
use crate::error::{self, ClientResult};

/// Close code reported when the peer closed without a status
const NO_STATUS_RECEIVED: u16 = 1005;

/// Opens WebSocket connections with `tokio_tungstenite::connect_async`
#[derive(Debug, Default, Clone)]
pub struct TungsteniteConnector;

impl TungsteniteConnector {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl Connector for TungsteniteConnector {
    async fn connect(&self, url: &str) -> ClientResult<Box<dyn Transport>> {
        let (stream, response) = connect_async(url).await.map_err(error::connect_failed)?;
        debug!(url, status = %response.status(), "WebSocket handshake completed");
        Ok(Box::new(TungsteniteTransport::new(stream)))
    }
}

/// An open WebSocket connection
pub struct TungsteniteTransport {
    stream: WebSocketStream<MaybeTlsStream<TcpStream>>,
    /// Close frame received from the peer, reported once the stream ends
    peer_close: Option<CloseInfo>,
    /// Set once `Closed` has been reported
    finished: Option<CloseInfo>,
}

impl TungsteniteTransport {
    pub fn new(stream: WebSocketStream<MaybeTlsStream<TcpStream>>) -> Self {
        Self {
            stream,
            peer_close: None,
            finished: None,
        }
    }

    fn finish(&mut self, info: CloseInfo) -> TransportEvent {
        self.finished = Some(info.clone());
        TransportEvent::Closed(info)
    }
}

#[async_trait]
impl Transport for TungsteniteTransport {
    async fn send(&mut self, frame: String) -> ClientResult<()> {
        self.stream
            .send(Message::Text(frame.into()))
            .await
            .map_err(error::send_failed)
    }

    async fn next_event(&mut self) -> TransportEvent {
        if let Some(info) = &self.finished {
            return TransportEvent::Closed(info.clone());
        }

        loop {
            match self.stream.next().await {
                Some(Ok(Message::Text(text))) => {
                    return TransportEvent::Frame(text.as_str().as_bytes().to_vec());
                }
                Some(Ok(Message::Binary(data))) => return TransportEvent::Frame(data.to_vec()),
                Some(Ok(Message::Close(frame))) => {
                    let info = match frame {
                        Some(frame) => {
                            CloseInfo::new(u16::from(frame.code), frame.reason.as_str(), true)
                        }
                        None => CloseInfo::new(NO_STATUS_RECEIVED, "", true),
                    };
                    debug!(code = info.code, "Peer sent close frame");
                    // Keep reading so the close reply gets flushed
                    self.peer_close = Some(info);
                }
                Some(Ok(other)) => {
                    trace!(message = ?other, "Ignoring control frame");
                }
                Some(Err(WsError::ConnectionClosed)) | Some(Err(WsError::AlreadyClosed)) | None => {
                    let info = self.peer_close.take().unwrap_or_else(CloseInfo::abnormal);
                    return self.finish(info);
                }
                Some(Err(e)) => {
                    if let Some(info) = self.peer_close.take() {
                        return self.finish(info);
                    }
                    self.finished = Some(CloseInfo::abnormal());
                    return TransportEvent::Error(e.to_string());
                }
            }
        }
    }

    async fn close(&mut self, code: u16, reason: &str) -> ClientResult<()> {
        let frame = CloseFrame {
            code: CloseCode::from(code),
            reason: reason.to_string().into(),
        };
        match self.stream.close(Some(frame)).await {
            Ok(()) | Err(WsError::ConnectionClosed) | Err(WsError::AlreadyClosed) => Ok(()),
            Err(e) => Err(error::send_failed(e)),
        }
    }
}
