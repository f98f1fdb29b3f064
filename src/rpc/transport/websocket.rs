//! WebSocket connector (`ws://` addresses).

use async_trait::async_trait;
use futures::{future, SinkExt, StreamExt};
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::http::HeaderValue;
use tokio_tungstenite::tungstenite::Message;

use super::{Connector, FrameChannel};
use crate::types::{Error, Result};

/// Connects over WebSocket, requesting `protocol` as the sub-protocol.
///
/// Each envelope travels as one text message. Binary messages are accepted
/// when they hold UTF-8; ping/pong and raw frames are skipped.
#[derive(Debug, Clone)]
pub struct WebSocketConnector {
    protocol: String,
}

impl WebSocketConnector {
    pub fn new(protocol: impl Into<String>) -> Self {
        Self {
            protocol: protocol.into(),
        }
    }
}

#[async_trait]
impl Connector for WebSocketConnector {
    async fn connect(&self, address: &str) -> Result<FrameChannel> {
        let mut request = address.into_client_request()?;
        if !self.protocol.is_empty() {
            let protocol = HeaderValue::from_str(&self.protocol).map_err(|e| {
                Error::config(format!("invalid sub-protocol {:?}: {}", self.protocol, e))
            })?;
            request
                .headers_mut()
                .insert("Sec-WebSocket-Protocol", protocol);
        }

        let (socket, response) = tokio_tungstenite::connect_async(request).await?;
        tracing::debug!("WebSocket handshake complete ({})", response.status());

        let (sink, stream) = socket.split();
        let sink = sink
            .sink_map_err(Error::from)
            .with(|frame: String| future::ready(Ok::<_, Error>(Message::text(frame))));
        let stream = stream.filter_map(|message| {
            future::ready(match message {
                Ok(Message::Text(text)) => Some(Ok(text.as_str().to_owned())),
                Ok(Message::Binary(data)) => Some(
                    String::from_utf8(data.to_vec())
                        .map_err(|e| Error::malformed(format!("binary message is not UTF-8: {}", e))),
                ),
                // The stream ends right after the close message.
                Ok(Message::Close(_)) => None,
                Ok(_) => None,
                Err(e) => Some(Err(Error::from(e))),
            })
        });

        Ok(FrameChannel {
            sink: Box::pin(sink),
            stream: Box::pin(stream),
        })
    }
}
