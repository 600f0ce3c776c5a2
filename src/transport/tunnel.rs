//! WebSocket tunnel and event loop.
//!
//! The tunnel owns the single network connection. A spawned event loop
//! task handles:
//!
//! - Inbound frames, decoded incrementally and surfaced in arrival order
//! - Outgoing instructions from the session
//! - The 60-second receive timeout (silence is fatal)
//! - Keepalive `nop` instructions every 5 seconds
//! - Capture of the gateway-assigned connection identifier
//!
//! Failures are reported through the event stream, never thrown silently.
//! There is no automatic reconnection: a fatal error ends the session and
//! the host constructs a new one to reconnect.

// ============================================================================
// Imports
// ============================================================================

use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{WebSocketStream, connect_async};
use tracing::{debug, error, trace, warn};
use url::Url;

use crate::error::{Error, Result};
use crate::identifiers::ConnectionId;
use crate::protocol::opcode::{self, InstructionKind};
use crate::protocol::{Instruction, InstructionDecoder};

// ============================================================================
// Constants
// ============================================================================

/// Fatal silence threshold: no inbound data for this long loses the
/// connection.
pub(crate) const RECEIVE_TIMEOUT: Duration = Duration::from_secs(60);

/// Cadence of outgoing keepalive `nop` instructions.
pub(crate) const KEEPALIVE_INTERVAL: Duration = Duration::from_secs(5);

// ============================================================================
// TunnelEvent
// ============================================================================

/// Events surfaced by the tunnel, in arrival order.
#[derive(Debug)]
pub enum TunnelEvent {
    /// The gateway assigned the session's connection identifier.
    ///
    /// Sent exactly once, before any [`TunnelEvent::Instruction`].
    Opened(ConnectionId),
    /// One decoded inbound instruction.
    Instruction(Instruction),
    /// Fatal tunnel error; the loop terminates after this.
    Error(Error),
    /// The tunnel closed (remote close, local close, or stream end).
    Closed,
}

// ============================================================================
// TunnelCommand
// ============================================================================

/// Internal commands for the event loop.
pub(crate) enum TunnelCommand {
    /// Frame and send one instruction.
    Send(Instruction),
    /// Close the connection gracefully.
    Close,
}

impl TunnelCommand {
    /// Returns the carried instruction, if any.
    #[cfg(test)]
    pub(crate) fn into_instruction(self) -> Option<Instruction> {
        match self {
            Self::Send(ins) => Some(ins),
            Self::Close => None,
        }
    }
}

// ============================================================================
// TunnelHandle
// ============================================================================

/// Cheaply cloneable sender half of a tunnel.
///
/// All sub-handlers send through this handle; none hold the connection
/// itself, so nothing outlives the session.
#[derive(Clone)]
pub struct TunnelHandle {
    command_tx: mpsc::UnboundedSender<TunnelCommand>,
}

impl TunnelHandle {
    /// Frames and sends an instruction.
    ///
    /// # Errors
    ///
    /// Returns [`Error::ConnectionClosed`] when the event loop has
    /// terminated. Debounced callers treat that as a harmless no-op.
    pub fn send(&self, instruction: Instruction) -> Result<()> {
        self.command_tx
            .send(TunnelCommand::Send(instruction))
            .map_err(|_| Error::ConnectionClosed)
    }

    /// Requests a graceful close.
    pub fn close(&self) {
        let _ = self.command_tx.send(TunnelCommand::Close);
    }

    /// Returns `true` if the event loop is still running.
    #[inline]
    #[must_use]
    pub fn is_open(&self) -> bool {
        !self.command_tx.is_closed()
    }

    /// Builds a handle whose commands land in a channel instead of a
    /// connection. Test plumbing for the modules that send through the
    /// tunnel.
    #[cfg(test)]
    pub(crate) fn mock() -> (Self, mpsc::UnboundedReceiver<TunnelCommand>) {
        let (command_tx, command_rx) = mpsc::unbounded_channel();
        (Self { command_tx }, command_rx)
    }
}

// ============================================================================
// TransportTunnel
// ============================================================================

/// Factory for tunnel connections.
pub struct TransportTunnel;

impl TransportTunnel {
    /// Connects to the gateway and spawns the event loop.
    ///
    /// Returns the sender handle and the event stream. The first event on
    /// a healthy connection is [`TunnelEvent::Opened`] carrying the
    /// connection identifier.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Connection`] when the WebSocket connection cannot
    /// be established.
    pub async fn open(
        url: &Url,
    ) -> Result<(TunnelHandle, mpsc::UnboundedReceiver<TunnelEvent>)> {
        debug!(%url, "opening tunnel");
        let (ws_stream, _response) = connect_async(url.as_str())
            .await
            .map_err(|e| Error::connection(e.to_string()))?;
        Ok(Self::spawn(ws_stream))
    }

    /// Spawns the event loop over an established WebSocket stream.
    pub(crate) fn spawn<S>(
        ws_stream: WebSocketStream<S>,
    ) -> (TunnelHandle, mpsc::UnboundedReceiver<TunnelEvent>)
    where
        S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
    {
        let (command_tx, command_rx) = mpsc::unbounded_channel();
        let (event_tx, event_rx) = mpsc::unbounded_channel();

        tokio::spawn(run_event_loop(ws_stream, command_rx, event_tx));

        (TunnelHandle { command_tx }, event_rx)
    }
}

// ============================================================================
// Event loop
// ============================================================================

/// Runs until the connection closes or a fatal error occurs.
async fn run_event_loop<S>(
    ws_stream: WebSocketStream<S>,
    mut command_rx: mpsc::UnboundedReceiver<TunnelCommand>,
    event_tx: mpsc::UnboundedSender<TunnelEvent>,
) where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let (mut ws_write, mut ws_read) = ws_stream.split();
    let mut decoder = InstructionDecoder::new();
    let mut connection_id: Option<ConnectionId> = None;

    let silence = tokio::time::sleep(RECEIVE_TIMEOUT);
    tokio::pin!(silence);
    let mut keepalive = tokio::time::interval(KEEPALIVE_INTERVAL);
    keepalive.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            // Fatal silence: the gateway stopped talking entirely.
            () = &mut silence => {
                warn!(timeout_ms = RECEIVE_TIMEOUT.as_millis() as u64, "receive timeout");
                let _ = event_tx.send(TunnelEvent::Error(Error::receive_timeout(
                    RECEIVE_TIMEOUT.as_millis() as u64,
                )));
                break;
            }

            // Inbound frames.
            message = ws_read.next() => {
                silence.as_mut().reset(tokio::time::Instant::now() + RECEIVE_TIMEOUT);
                match message {
                    Some(Ok(Message::Text(text))) => {
                        match decoder.decode(text.as_str()) {
                            Ok(instructions) => {
                                for ins in instructions {
                                    forward_instruction(ins, &mut connection_id, &event_tx);
                                }
                            }
                            Err(e) => {
                                error!(error = %e, "malformed inbound frame");
                                let _ = event_tx.send(TunnelEvent::Error(e));
                                break;
                            }
                        }
                    }
                    Some(Ok(Message::Close(frame))) => {
                        debug!(?frame, "tunnel closed by remote");
                        let _ = event_tx.send(TunnelEvent::Closed);
                        break;
                    }
                    Some(Err(e)) => {
                        error!(error = %e, "tunnel read error");
                        let _ = event_tx.send(TunnelEvent::Error(e.into()));
                        break;
                    }
                    None => {
                        debug!("tunnel stream ended");
                        let _ = event_tx.send(TunnelEvent::Closed);
                        break;
                    }
                    // Binary, Ping, Pong keep the connection alive but
                    // carry no instructions.
                    _ => {}
                }
            }

            // Outgoing instructions from the session.
            command = command_rx.recv() => {
                match command {
                    Some(TunnelCommand::Send(instruction)) => {
                        trace!(opcode = instruction.opcode(), "sending instruction");
                        let frame = instruction.encode();
                        if let Err(e) = ws_write.send(Message::Text(frame.into())).await {
                            error!(error = %e, "tunnel write error");
                            let _ = event_tx.send(TunnelEvent::Error(e.into()));
                            break;
                        }
                    }
                    Some(TunnelCommand::Close) => {
                        debug!("closing tunnel");
                        let _ = ws_write.send(Message::Close(None)).await;
                        let _ = ws_write.close().await;
                        let _ = event_tx.send(TunnelEvent::Closed);
                        break;
                    }
                    None => {
                        debug!("command channel dropped, closing tunnel");
                        let _ = ws_write.close().await;
                        let _ = event_tx.send(TunnelEvent::Closed);
                        break;
                    }
                }
            }

            // Keepalive.
            _ = keepalive.tick() => {
                let nop = Instruction::new(opcode::NOP, Vec::new());
                if let Err(e) = ws_write.send(Message::Text(nop.encode().into())).await {
                    error!(error = %e, "keepalive write error");
                    let _ = event_tx.send(TunnelEvent::Error(e.into()));
                    break;
                }
            }
        }
    }

    debug!("tunnel event loop terminated");
}

/// Routes one decoded instruction, intercepting the first identifier
/// assignment.
fn forward_instruction(
    instruction: Instruction,
    connection_id: &mut Option<ConnectionId>,
    event_tx: &mpsc::UnboundedSender<TunnelEvent>,
) {
    if connection_id.is_none()
        && InstructionKind::classify(instruction.opcode()) == InstructionKind::Ready
    {
        let id = ConnectionId::new(instruction.arg(0));
        debug!(connection_id = %id, "connection identifier assigned");
        *connection_id = Some(id.clone());
        let _ = event_tx.send(TunnelEvent::Opened(id));
        return;
    }
    let _ = event_tx.send(TunnelEvent::Instruction(instruction));
}

// ============================================================================
// Tests
// ============================================================================
