use futures::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio_tungstenite::{connect_async, tungstenite, MaybeTlsStream, WebSocketStream};
use tracing::{debug, info};

use crate::error::{VoiceError, VoiceResult};

/// One ordered, bidirectional text connection
///
/// Sends go out in call order; the session relies on that for frame ordering.
#[async_trait::async_trait]
pub trait Transport: Send {
    /// Send one text message
    async fn send_text(&mut self, text: String) -> VoiceResult<()>;

    /// Next inbound text message, or `None` once the peer has closed
    async fn next_message(&mut self) -> Option<VoiceResult<String>>;

    /// Close the connection; closing twice is a no-op
    async fn close(&mut self) -> VoiceResult<()>;
}

/// Opens transports for a signed URL
#[async_trait::async_trait]
pub trait Connector: Send + Sync {
    async fn connect(&self, url: &str) -> VoiceResult<Box<dyn Transport>>;
}

/// WebSocket connector (tokio-tungstenite, rustls)
#[derive(Debug, Clone, Default)]
pub struct WsConnector;

#[async_trait::async_trait]
impl Connector for WsConnector {
    async fn connect(&self, url: &str) -> VoiceResult<Box<dyn Transport>> {
        let (stream, response) = connect_async(url).await.map_err(connect_error)?;
        info!("WebSocket connected (HTTP {})", response.status());
        Ok(Box::new(WsTransport {
            stream,
            closed: false,
        }))
    }
}

fn connect_error(err: tungstenite::Error) -> VoiceError {
    match err {
        tungstenite::Error::Http(resp) => {
            let status = resp.status();
            let body = resp
                .body()
                .as_ref()
                .map(|b| String::from_utf8_lossy(b).into_owned())
                .unwrap_or_default();
            VoiceError::Transport(format!("handshake rejected: HTTP {} {}", status, body.trim()))
        }
        other => VoiceError::Transport(format!("connect failed: {}", other)),
    }
}

/// WebSocket transport
pub struct WsTransport {
    stream: WebSocketStream<MaybeTlsStream<TcpStream>>,
    closed: bool,
}

#[async_trait::async_trait]
impl Transport for WsTransport {
    async fn send_text(&mut self, text: String) -> VoiceResult<()> {
        if self.closed {
            return Err(VoiceError::Transport("connection already closed".to_string()));
        }
        self.stream
            .send(tungstenite::Message::Text(text))
            .await
            .map_err(|e| VoiceError::Transport(format!("send failed: {}", e)))
    }

    async fn next_message(&mut self) -> Option<VoiceResult<String>> {
        if self.closed {
            return None;
        }
        loop {
            match self.stream.next().await? {
                Ok(tungstenite::Message::Text(text)) => return Some(Ok(text)),
                Ok(tungstenite::Message::Binary(bytes)) => {
                    return Some(Ok(String::from_utf8_lossy(&bytes).into_owned()))
                }
                Ok(tungstenite::Message::Close(frame)) => {
                    debug!("Peer closed connection: {:?}", frame);
                    self.closed = true;
                    return None;
                }
                Ok(_) => continue, // ping/pong/raw frames
                Err(e) => {
                    return Some(Err(VoiceError::Transport(format!("receive failed: {}", e))))
                }
            }
        }
    }

    async fn close(&mut self) -> VoiceResult<()> {
        if self.closed {
            return Ok(());
        }
        self.closed = true;
        match self.stream.close(None).await {
            Ok(())
            | Err(tungstenite::Error::ConnectionClosed)
            | Err(tungstenite::Error::AlreadyClosed) => Ok(()),
            Err(e) => Err(VoiceError::Transport(format!("close failed: {}", e))),
        }
    }
}
