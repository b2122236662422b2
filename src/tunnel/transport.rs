// ABOUTME: Duplex transport abstraction for the tunnel and its WebSocket implementation
// ABOUTME: A link is a pair of channels; reader and writer tasks own the socket halves
//
// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 Pierre Fitness Intelligence

use crate::constants::tunnel::OUTBOUND_CHANNEL_CAPACITY;
use crate::errors::{AppError, AppResult};
use async_trait::async_trait;
use futures_util::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::http::header::AUTHORIZATION;
use tokio_tungstenite::tungstenite::http::HeaderValue;
use tokio_tungstenite::tungstenite::Message;
use tracing::{debug, warn};
use url::Url;

/// Something received from the transport
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportFrame {
    /// Text frame
    Message(String),
    /// Remote or local close
    Closed(String),
    /// Transport failure; no further frames follow
    Error(String),
}

/// An open transport: text frames go out on `outbound`, frames arrive on `inbound`
///
/// Dropping `outbound` closes the transport.
#[derive(Debug)]
pub struct TransportLink {
    /// Frames to send
    pub outbound: mpsc::Sender<String>,
    /// Frames received
    pub inbound: mpsc::Receiver<TransportFrame>,
}

/// Opens links to the control plane
#[async_trait]
pub trait TunnelTransport: Send + Sync {
    /// Open a link presenting the API key in the handshake
    async fn open(&self, url: &Url, api_key: &str) -> AppResult<TransportLink>;
}

/// WebSocket transport over `tokio-tungstenite`
#[derive(Debug, Clone, Copy, Default)]
pub struct WebSocketTransport;

#[async_trait]
impl TunnelTransport for WebSocketTransport {
    async fn open(&self, url: &Url, api_key: &str) -> AppResult<TransportLink> {
        let mut request = url
            .as_str()
            .into_client_request()
            .map_err(|e| AppError::config(format!("Invalid tunnel URL: {e}")))?;
        let bearer = HeaderValue::from_str(&format!("Bearer {api_key}"))
            .map_err(|e| AppError::auth_invalid(format!("API key is not a valid header value: {e}")))?;
        request.headers_mut().insert(AUTHORIZATION, bearer);

        let (socket, _response) = connect_async(request)
            .await
            .map_err(|e| AppError::connection(format!("Tunnel handshake failed: {e}")))?;
        let (mut sink, mut stream) = socket.split();

        let (outbound_tx, mut outbound_rx) = mpsc::channel::<String>(OUTBOUND_CHANNEL_CAPACITY);
        let (inbound_tx, inbound_rx) = mpsc::channel::<TransportFrame>(OUTBOUND_CHANNEL_CAPACITY);

        tokio::spawn(async move {
            while let Some(text) = outbound_rx.recv().await {
                if let Err(e) = sink.send(Message::Text(text)).await {
                    warn!(error = %e, "Tunnel write failed");
                    return;
                }
            }
            let _ = sink.send(Message::Close(None)).await;
            debug!("Tunnel writer stopped");
        });

        tokio::spawn(async move {
            while let Some(frame) = stream.next().await {
                let forwarded = match frame {
                    Ok(Message::Text(text)) => TransportFrame::Message(text),
                    Ok(Message::Close(close)) => {
                        let reason = close.map_or_else(
                            || "closed by server".to_owned(),
                            |c| format!("closed by server: {} {}", c.code, c.reason),
                        );
                        let _ = inbound_tx.send(TransportFrame::Closed(reason)).await;
                        return;
                    }
                    Ok(_) => continue,
                    Err(e) => {
                        let _ = inbound_tx.send(TransportFrame::Error(e.to_string())).await;
                        return;
                    }
                };
                if inbound_tx.send(forwarded).await.is_err() {
                    return;
                }
            }
            let _ = inbound_tx
                .send(TransportFrame::Closed("stream ended".to_owned()))
                .await;
        });

        Ok(TransportLink {
            outbound: outbound_tx,
            inbound: inbound_rx,
        })
    }
}
