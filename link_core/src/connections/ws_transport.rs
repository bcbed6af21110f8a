//! # Websocket Transport
//!
//! Opens the session over `tokio-tungstenite`. The auth token travels both
//! as a bearer header on the upgrade request and inside the `connect` frame
//! that opens every session. Frames are JSON text messages; close frames and
//! read errors end the session with a `disconnect`.

use std::time::Duration;

use async_trait::async_trait;
use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio::time::timeout;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::handshake::client::Request;
use tokio_tungstenite::tungstenite::http::header::AUTHORIZATION;
use tokio_tungstenite::tungstenite::http::HeaderValue;
use tokio_tungstenite::tungstenite::protocol::Message as WsMessage;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};

use crate::connections::messages::{ClientMessage, ServerMessage};
use crate::connections::transport::{Handshake, Transport};
use crate::error::{LinkError, Result};

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Default bound on the TCP + TLS + upgrade exchange.
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// Websocket transport.
#[derive(Debug, Clone)]
pub struct WsTransport {
    connect_timeout: Duration,
}

impl Default for WsTransport {
    fn default() -> Self {
        Self {
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
        }
    }
}

impl WsTransport {
    /// Transport with the default connect timeout.
    pub fn new() -> Self {
        Self::default()
    }

    /// Overrides how long opening the socket may take.
    pub fn with_connect_timeout(mut self, connect_timeout: Duration) -> Self {
        self.connect_timeout = connect_timeout;
        self
    }
}

/// Upgrade request for `handshake` with its bearer header.
fn upgrade_request(handshake: &Handshake) -> Result<Request> {
    let mut request = handshake
        .endpoint
        .as_str()
        .into_client_request()
        .map_err(|e| LinkError::HandshakeFailure(e.to_string()))?;
    let bearer = HeaderValue::from_str(&format!("Bearer {}", handshake.auth_token))
        .map_err(|_| LinkError::configuration("auth_token", "not a valid header value"))?;
    request.headers_mut().insert(AUTHORIZATION, bearer);
    Ok(request)
}

fn encode(message: &ClientMessage) -> Result<WsMessage> {
    let text = serde_json::to_string(message).map_err(|e| LinkError::Transport(e.to_string()))?;
    Ok(WsMessage::Text(text.into()))
}

#[async_trait]
impl Transport for WsTransport {
    async fn connect(
        &self,
        handshake: Handshake,
        outbound: mpsc::UnboundedReceiver<ClientMessage>,
    ) -> Result<mpsc::UnboundedReceiver<ServerMessage>> {
        let request = upgrade_request(&handshake)?;
        tracing::debug!(uri = handshake.endpoint.as_str(), "opening websocket");

        let (ws_stream, _response) = timeout(self.connect_timeout, connect_async(request))
            .await
            .map_err(|_| {
                LinkError::HandshakeFailure(format!(
                    "no websocket upgrade within {}ms",
                    self.connect_timeout.as_millis()
                ))
            })?
            .map_err(|e| LinkError::HandshakeFailure(e.to_string()))?;

        let (mut write, read) = ws_stream.split();
        write
            .send(encode(&handshake.connect_message())?)
            .await
            .map_err(|e| LinkError::HandshakeFailure(e.to_string()))?;

        let (inbound_tx, inbound_rx) = mpsc::unbounded_channel();
        tokio::spawn(pump(write, read, outbound, inbound_tx));
        Ok(inbound_rx)
    }
}

/// Moves frames both ways until either side ends the session.
async fn pump(
    mut write: SplitSink<WsStream, WsMessage>,
    mut read: SplitStream<WsStream>,
    mut outbound: mpsc::UnboundedReceiver<ClientMessage>,
    inbound: mpsc::UnboundedSender<ServerMessage>,
) {
    loop {
        tokio::select! {
            request = outbound.recv() => {
                let Some(request) = request else {
                    // Connection closed locally; dropping `inbound` reports a clean disconnect.
                    tracing::debug!("outbound queue closed, closing websocket");
                    let _ = write.close().await;
                    return;
                };
                let frame = match encode(&request) {
                    Ok(frame) => frame,
                    Err(e) => {
                        tracing::error!(%e, "failed to encode client frame");
                        continue;
                    }
                };
                if let Err(e) = write.send(frame).await {
                    tracing::error!(%e, "websocket write failed");
                    let _ = inbound.send(ServerMessage::Disconnect { reason: Some(e.to_string()) });
                    return;
                }
            }
            _ = inbound.closed() => {
                // The session task is gone, so nobody reads server frames any more.
                tracing::debug!("session ended locally, closing websocket");
                let _ = write.close().await;
                return;
            }
            frame = read.next() => {
                match frame {
                    Some(Ok(WsMessage::Text(text))) => {
                        match serde_json::from_str::<ServerMessage>(text.as_str()) {
                            Ok(message) => {
                                if inbound.send(message).is_err() {
                                    return;
                                }
                            }
                            Err(e) => tracing::warn!(%e, frame = text.as_str(), "unrecognised server frame"),
                        }
                    }
                    Some(Ok(WsMessage::Close(close))) => {
                        let reason = close
                            .map(|c| c.reason.as_str().to_string())
                            .filter(|r| !r.is_empty());
                        tracing::info!(?reason, "websocket closed by server");
                        let _ = inbound.send(ServerMessage::Disconnect { reason });
                        return;
                    }
                    Some(Ok(_)) => {
                        // Ping/pong are answered by tungstenite; binary frames are not used.
                    }
                    Some(Err(e)) => {
                        tracing::error!(%e, "websocket read failed");
                        let _ = inbound.send(ServerMessage::Disconnect { reason: Some(e.to_string()) });
                        return;
                    }
                    None => {
                        let _ = inbound.send(ServerMessage::Disconnect {
                            reason: Some("websocket stream ended".into()),
                        });
                        return;
                    }
                }
            }
        }
    }
}
