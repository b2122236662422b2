// ABOUTME: Tunnel client: key validation, transport handshake, event dispatch and capped reconnection
// ABOUTME: State goes out on a watch channel, status events on broadcast and commands on an mpsc queue
//
// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 Pierre Fitness Intelligence

//! # Tunnel client
//!
//! `disconnected -> connecting -> connected -> authenticated`. A transport
//! loss that the client did not ask for starts exponential backoff
//! reconnection (base delay doubling per attempt). When the attempts run
//! out a terminal [`TunnelEvent::ReconnectFailed`] is published and nothing
//! else happens until [`TunnelClient::connect`] is called again. An
//! `authentication_failed` event from the server ends the session without
//! reconnecting.
//!
//! Commands never travel on the broadcast channel: a slow subscriber may
//! skip status events, but every command is queued for the single consumer
//! returned by [`TunnelClient::take_commands`].

use super::protocol::{
    Command, CommandResponse, HeartbeatPayload, InboundMessage, OutboundMessage,
};
use super::state::{ConnectionState, ConnectionStatus, TunnelEvent};
use super::transport::{TransportFrame, TransportLink, TunnelTransport};
use crate::config::TunnelConfig;
use crate::constants::tunnel::EVENT_CHANNEL_CAPACITY;
use crate::control_plane::ControlPlane;
use crate::crypto::{mask_api_key, validate_api_key_detailed};
use crate::errors::{AppError, AppResult};
use backon::{BackoffBuilder, ExponentialBuilder};
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, mpsc, watch, Mutex, RwLock};
use tokio::time::{sleep, timeout};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use url::Url;

/// How a session's read loop ended
enum SessionEnd {
    /// `disconnect` or a newer `connect`
    Cancelled,
    /// Server rejected the key
    AuthRejected,
    /// Transport lost
    Lost(String),
}

struct Inner {
    url: Url,
    config: TunnelConfig,
    transport: Arc<dyn TunnelTransport>,
    control_plane: Arc<dyn ControlPlane>,
    state: watch::Sender<ConnectionState>,
    events: broadcast::Sender<TunnelEvent>,
    commands: mpsc::UnboundedSender<Command>,
    command_queue: Mutex<Option<mpsc::UnboundedReceiver<Command>>>,
    link: RwLock<Option<mpsc::Sender<String>>>,
    session: Mutex<Option<CancellationToken>>,
}

/// Persistent duplex channel to the control plane
#[derive(Clone)]
pub struct TunnelClient {
    inner: Arc<Inner>,
}

impl fmt::Debug for TunnelClient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TunnelClient")
            .field("url", &self.inner.url.as_str())
            .field("state", &*self.inner.state.borrow())
            .finish_non_exhaustive()
    }
}

/// Delays before each reconnect attempt: base, 2x base, 4x base ...
#[must_use]
pub fn reconnect_delays(config: &TunnelConfig) -> Vec<Duration> {
    let attempts = config.max_reconnect_attempts;
    let ceiling = config
        .reconnect_base_delay
        .saturating_mul(1_u32 << attempts.min(31));
    ExponentialBuilder::default()
        .with_min_delay(config.reconnect_base_delay)
        .with_factor(2.0)
        .with_max_delay(ceiling)
        .with_max_times(attempts)
        .build()
        .collect()
}

impl TunnelClient {
    /// Client for a tunnel endpoint
    #[must_use]
    pub fn new(
        url: Url,
        config: TunnelConfig,
        transport: Arc<dyn TunnelTransport>,
        control_plane: Arc<dyn ControlPlane>,
    ) -> Self {
        let (state, _) = watch::channel(ConnectionState::default());
        let (events, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        let (commands, command_queue) = mpsc::unbounded_channel();
        Self {
            inner: Arc::new(Inner {
                url,
                config,
                transport,
                control_plane,
                state,
                events,
                commands,
                command_queue: Mutex::new(Some(command_queue)),
                link: RwLock::new(None),
                session: Mutex::new(None),
            }),
        }
    }

    /// Receive every event published from now on
    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<TunnelEvent> {
        self.inner.events.subscribe()
    }

    /// Take the inbound command stream
    ///
    /// Commands received before this call are buffered. Only the first
    /// caller gets the stream; later calls return `None`.
    pub async fn take_commands(&self) -> Option<mpsc::UnboundedReceiver<Command>> {
        self.inner.command_queue.lock().await.take()
    }

    /// Observe state changes
    #[must_use]
    pub fn watch_state(&self) -> watch::Receiver<ConnectionState> {
        self.inner.state.subscribe()
    }

    /// Current state snapshot
    #[must_use]
    pub fn state(&self) -> ConnectionState {
        self.inner.state.borrow().clone()
    }

    /// Validate the key, confirm it with the control plane and open the tunnel
    ///
    /// Returns once the transport is open; the tunnel becomes usable when
    /// the server sends `authenticated`.
    ///
    /// # Errors
    ///
    /// Returns an auth error for keys rejected locally or by the control
    /// plane, and a connection error if the transport cannot be opened
    /// within the connect timeout
    pub async fn connect(&self, api_key: &str) -> AppResult<()> {
        let validation = validate_api_key_detailed(api_key);
        if !validation.valid {
            let reason = validation
                .reason
                .unwrap_or_else(|| "Invalid API key".to_owned());
            self.inner.set_failed(ConnectionStatus::Disconnected, &reason);
            return Err(AppError::auth_invalid(reason));
        }

        self.inner.cancel_session().await;
        self.inner.state.send_modify(|s| {
            s.status = ConnectionStatus::Connecting;
            s.last_error = None;
            s.reconnect_attempts = 0;
        });
        info!(api_key = %mask_api_key(api_key), url = %self.inner.url, "Connecting tunnel");

        let remote = match self.inner.control_plane.validate_api_key(api_key).await {
            Ok(remote) => remote,
            Err(e) => {
                self.inner.set_failed(ConnectionStatus::Disconnected, &e.message);
                return Err(e);
            }
        };
        if !remote.valid {
            let reason = remote
                .message
                .unwrap_or_else(|| "API key is not known or not active".to_owned());
            self.inner
                .set_failed(ConnectionStatus::AuthenticationFailed, &reason);
            return Err(AppError::auth_invalid(reason));
        }
        self.inner.state.send_modify(|s| {
            s.tenant_id = remote.tenant_id.clone();
            s.connector_id = remote.connector_id.clone();
        });

        let link = match self.inner.open_link(api_key).await {
            Ok(link) => link,
            Err(e) => {
                self.inner.set_failed(ConnectionStatus::Disconnected, &e.message);
                return Err(e);
            }
        };

        let token = CancellationToken::new();
        *self.inner.session.lock().await = Some(token.clone());
        let inbound = self.inner.install_link(link).await;
        tokio::spawn(Arc::clone(&self.inner).run_session(inbound, api_key.to_owned(), token));
        Ok(())
    }

    /// Close the tunnel, stop any reconnection and reset the state
    pub async fn disconnect(&self) {
        self.inner.cancel_session().await;
        self.inner.state.send_replace(ConnectionState::default());
        self.inner.publish(TunnelEvent::Disconnected {
            reason: "client disconnect".to_owned(),
        });
        info!("Tunnel disconnected by client");
    }

    /// Send a command response
    ///
    /// # Errors
    ///
    /// Returns a delivery error when the transport is not connected
    pub async fn send_command_response(&self, response: &CommandResponse) -> AppResult<()> {
        let frame = OutboundMessage::CommandResponse(response.clone()).to_frame()?;
        self.inner.send_frame(frame).await?;
        debug!(command_id = %response.command_id, "Command response sent");
        Ok(())
    }

    /// Send a heartbeat
    ///
    /// # Errors
    ///
    /// Returns a delivery error when the transport is not connected
    pub async fn send_heartbeat(&self, payload: &HeartbeatPayload) -> AppResult<()> {
        let frame = OutboundMessage::Heartbeat(payload.clone()).to_frame()?;
        self.inner.send_frame(frame).await?;
        self.inner
            .state
            .send_modify(|s| s.last_heartbeat = Some(payload.timestamp));
        Ok(())
    }
}

impl Inner {
    fn publish(&self, event: TunnelEvent) {
        // no subscribers is not an error
        let _ = self.events.send(event);
    }

    fn set_failed(&self, status: ConnectionStatus, reason: &str) {
        self.state.send_modify(|s| {
            s.status = status;
            s.last_error = Some(reason.to_owned());
        });
    }

    async fn cancel_session(&self) {
        if let Some(token) = self.session.lock().await.take() {
            token.cancel();
        }
        self.link.write().await.take();
    }

    async fn open_link(&self, api_key: &str) -> AppResult<TransportLink> {
        let connect_timeout = self.config.connect_timeout;
        timeout(connect_timeout, self.transport.open(&self.url, api_key))
            .await
            .map_err(|_| {
                AppError::connection(format!(
                    "Tunnel connect timed out after {}s",
                    connect_timeout.as_secs()
                ))
            })?
    }

    async fn install_link(&self, link: TransportLink) -> mpsc::Receiver<TransportFrame> {
        *self.link.write().await = Some(link.outbound);
        self.state.send_modify(|s| {
            s.status = ConnectionStatus::Connected;
            s.last_error = None;
        });
        self.publish(TunnelEvent::Connected);
        info!(url = %self.url, "Tunnel transport open");
        link.inbound
    }

    async fn send_frame(&self, frame: String) -> AppResult<()> {
        let sender = self
            .link
            .read()
            .await
            .clone()
            .ok_or_else(|| AppError::delivery("Tunnel is not connected"))?;
        sender
            .send(frame)
            .await
            .map_err(|_| AppError::delivery("Tunnel transport closed while sending"))
    }

    async fn run_session(
        self: Arc<Self>,
        mut inbound: mpsc::Receiver<TransportFrame>,
        api_key: String,
        token: CancellationToken,
    ) {
        loop {
            let end = self.read_loop(&mut inbound, &token).await;
            if token.is_cancelled() {
                return;
            }
            self.link.write().await.take();

            match end {
                SessionEnd::Cancelled => return,
                SessionEnd::AuthRejected => {
                    warn!("Tunnel authentication rejected; not reconnecting");
                    return;
                }
                SessionEnd::Lost(reason) => {
                    warn!(reason = %reason, "Tunnel connection lost");
                    self.set_failed(ConnectionStatus::Disconnected, &reason);
                    self.publish(TunnelEvent::Disconnected { reason });
                }
            }

            match self.reconnect(&api_key, &token).await {
                Some(next) => inbound = next,
                None => return,
            }
        }
    }

    async fn read_loop(
        &self,
        inbound: &mut mpsc::Receiver<TransportFrame>,
        token: &CancellationToken,
    ) -> SessionEnd {
        loop {
            let frame = tokio::select! {
                biased;
                () = token.cancelled() => return SessionEnd::Cancelled,
                frame = inbound.recv() => frame,
            };

            let text = match frame {
                None => return SessionEnd::Lost("transport closed".to_owned()),
                Some(TransportFrame::Closed(reason)) => return SessionEnd::Lost(reason),
                Some(TransportFrame::Error(message)) => {
                    self.publish(TunnelEvent::Error {
                        message: message.clone(),
                    });
                    return SessionEnd::Lost(message);
                }
                Some(TransportFrame::Message(text)) => text,
            };

            match InboundMessage::parse(&text) {
                Ok(InboundMessage::Command(command)) => {
                    debug!(command_id = %command.command_id, operation = ?command.operation, "Command received");
                    if let Err(mpsc::error::SendError(lost)) = self.commands.send(command) {
                        error!(command_id = %lost.command_id, "Command consumer is gone; command dropped");
                    }
                }
                Ok(InboundMessage::Authenticated(info)) => {
                    self.state.send_modify(|s| {
                        s.status = ConnectionStatus::Authenticated;
                        s.reconnect_attempts = 0;
                        s.last_error = None;
                        if info.tenant_id.is_some() {
                            s.tenant_id = info.tenant_id.clone();
                        }
                        if info.connector_id.is_some() {
                            s.connector_id = info.connector_id.clone();
                        }
                    });
                    info!("Tunnel authenticated");
                    self.publish(TunnelEvent::Authenticated);
                }
                Ok(InboundMessage::AuthenticationFailed { message }) => {
                    error!(reason = %message, "Tunnel authentication failed");
                    self.set_failed(ConnectionStatus::AuthenticationFailed, &message);
                    self.publish(TunnelEvent::AuthenticationFailed { message });
                    return SessionEnd::AuthRejected;
                }
                Ok(InboundMessage::HeartbeatAck) => self.publish(TunnelEvent::HeartbeatAck),
                Ok(InboundMessage::Unknown(_)) => {}
                Err(e) => {
                    warn!(error = %e, "Discarding malformed tunnel frame");
                    self.publish(TunnelEvent::Error { message: e.message });
                }
            }
        }
    }

    async fn reconnect(
        &self,
        api_key: &str,
        token: &CancellationToken,
    ) -> Option<mpsc::Receiver<TransportFrame>> {
        let delays = reconnect_delays(&self.config);
        let total = delays.len();

        for (index, delay) in delays.into_iter().enumerate() {
            if token.is_cancelled() {
                return None;
            }
            let attempt = u32::try_from(index + 1).unwrap_or(u32::MAX);
            self.state.send_modify(|s| {
                s.status = ConnectionStatus::Connecting;
                s.reconnect_attempts = attempt;
            });
            info!(attempt, delay_ms = delay.as_millis(), "Scheduling tunnel reconnect");

            tokio::select! {
                biased;
                () = token.cancelled() => return None,
                () = sleep(delay) => {}
            }

            let opened = tokio::select! {
                biased;
                () = token.cancelled() => return None,
                opened = self.open_link(api_key) => opened,
            };

            match opened {
                Ok(link) => {
                    info!(attempt, "Tunnel reconnected");
                    return Some(self.install_link(link).await);
                }
                Err(e) => {
                    warn!(attempt, error = %e, "Tunnel reconnect attempt failed");
                    self.set_failed(ConnectionStatus::Disconnected, &e.message);
                    self.publish(TunnelEvent::Error { message: e.message });
                }
            }
        }

        let attempts = u32::try_from(total).unwrap_or(u32::MAX);
        error!(attempts, "Tunnel reconnection gave up");
        self.set_failed(
            ConnectionStatus::Disconnected,
            &format!("Reconnect failed after {attempts} attempts"),
        );
        self.publish(TunnelEvent::ReconnectFailed { attempts });
        None
    }
}
