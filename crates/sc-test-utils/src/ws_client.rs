//! WebSocket client for end-to-end tests.

use futures::{SinkExt, StreamExt};
use serde_json::{json, Value};
use std::time::Duration;
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};

/// Upper bound on waiting for a single frame.
pub const RECV_TIMEOUT: Duration = Duration::from_secs(5);

/// How the server ended the socket.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Closed {
    /// Close frame with this code.
    Code(u16),
    /// Stream ended without a close frame.
    Dropped,
}

pub struct TestClient {
    socket: WebSocketStream<MaybeTlsStream<TcpStream>>,
}

impl TestClient {
    pub async fn connect(url: &str) -> Result<Self, anyhow::Error> {
        let (socket, _response) = connect_async(url)
            .await
            .map_err(|e| anyhow::anyhow!("Failed to connect to {}: {}", url, e))?;
        Ok(Self { socket })
    }

    /// Send `{event, data}`.
    pub async fn send_event(&mut self, event: &str, data: Value) -> Result<(), anyhow::Error> {
        let frame = json!({ "event": event, "data": data }).to_string();
        self.socket.send(Message::Text(frame)).await?;
        Ok(())
    }

    pub async fn send_raw(&mut self, text: &str) -> Result<(), anyhow::Error> {
        self.socket.send(Message::Text(text.to_string())).await?;
        Ok(())
    }

    /// Send the handshake frame.
    pub async fn authenticate(&mut self, token: &str) -> Result<(), anyhow::Error> {
        self.send_event("authenticate", json!({ "token": token })).await
    }

    /// Next `{event, data}` frame, skipping control frames.
    pub async fn next_event(&mut self) -> Result<Value, anyhow::Error> {
        loop {
            let message = tokio::time::timeout(RECV_TIMEOUT, self.socket.next())
                .await
                .map_err(|_| anyhow::anyhow!("timed out waiting for frame"))?
                .ok_or_else(|| anyhow::anyhow!("socket closed"))??;
            match message {
                Message::Text(text) => return Ok(serde_json::from_str(&text)?),
                Message::Close(frame) => anyhow::bail!("socket closed: {:?}", frame),
                _ => {}
            }
        }
    }

    /// Skip frames until one tagged `event` arrives.
    pub async fn next_event_named(&mut self, event: &str) -> Result<Value, anyhow::Error> {
        loop {
            let frame = self.next_event().await?;
            if frame["event"] == event {
                return Ok(frame);
            }
        }
    }

    /// Read until the server closes, returning how it closed. Text frames
    /// seen on the way are returned too.
    pub async fn expect_close(&mut self, within: Duration) -> Result<(Closed, Vec<Value>), anyhow::Error> {
        let mut seen = Vec::new();
        let outcome = tokio::time::timeout(within, async {
            while let Some(message) = self.socket.next().await {
                match message {
                    Ok(Message::Text(text)) => seen.push(serde_json::from_str(&text)?),
                    Ok(Message::Close(frame)) => {
                        return Ok(Closed::Code(frame.map_or(1005, |f| u16::from(f.code))));
                    }
                    Ok(_) => {}
                    Err(_) => return Ok(Closed::Dropped),
                }
            }
            Ok::<_, anyhow::Error>(Closed::Dropped)
        })
        .await
        .map_err(|_| anyhow::anyhow!("server did not close within {:?}", within))??;
        Ok((outcome, seen))
    }

    /// Close from the client side.
    pub async fn close(mut self) -> Result<(), anyhow::Error> {
        self.socket.close(None).await?;
        Ok(())
    }
}
