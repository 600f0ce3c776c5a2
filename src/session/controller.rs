//! Session controller: lifecycle, command loop, and host handle.
//!
//! The controller owns the session exclusively: the tunnel, the
//! dispatcher with its sub-handlers, the input translator, and the one
//! observable [`SessionState`]. All protocol handling runs on its single
//! event loop; ordering is guaranteed by construction, not by locking.
//!
//! The host talks to the loop through [`SessionHandle`] commands and
//! observes it through a watch channel plus a [`SessionEvent`] stream.

// ============================================================================
// Imports
// ============================================================================

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, oneshot, watch};
use tracing::{debug, info, trace, warn};

use crate::capability::CapabilitySet;
use crate::error::{Error, Result};
use crate::identifiers::ConnectionId;
use crate::input::{InputTranslator, PointerButton};
use crate::protocol::opcode;
use crate::protocol::status::ErrorRecord;
use crate::protocol::Instruction;
use crate::streams::{
    AudioInputStreamer, ClipboardBridge, DownloadOffer, FOCUS_SYNC_DEBOUNCE, FileSystemBrowser,
    StreamTable, VirtualFileEntry,
};
use crate::transport::{TransportTunnel, TunnelEvent, TunnelHandle};

use super::dispatcher::{DispatchFlow, Dispatcher};
use super::{DisplaySurface, Lifecycle, SessionEvent, SessionOptions, SessionState};

// ============================================================================
// Constants
// ============================================================================

/// Debounce for resize instructions during continuous window drags.
const RESIZE_DEBOUNCE: Duration = Duration::from_millis(500);

/// Cadence of recurring permission-expiry reminders.
const PERMISSION_REMINDER_INTERVAL: Duration = Duration::from_secs(31);

/// Far-future deadline for parked debounce timers.
fn far_future() -> tokio::time::Instant {
    tokio::time::Instant::now() + Duration::from_secs(86_400 * 365)
}

// ============================================================================
// SessionCommand
// ============================================================================

/// Commands from the host handle to the session loop.
pub(crate) enum SessionCommand {
    Resize {
        width: u32,
        height: u32,
    },
    FocusGained,
    Key {
        keysym: u32,
        pressed: bool,
    },
    PointerMove {
        x: f64,
        y: f64,
    },
    PointerButton {
        x: f64,
        y: f64,
        button: PointerButton,
        pressed: bool,
    },
    Touch {
        id: u32,
        x: f64,
        y: f64,
        x_radius: f64,
        y_radius: f64,
        angle: f64,
        force: f64,
    },
    Browse {
        folder: String,
        reply: oneshot::Sender<Result<Vec<VirtualFileEntry>>>,
    },
    Download {
        path: String,
        reply: oneshot::Sender<Result<DownloadOffer>>,
    },
    Upload {
        folder: String,
        filename: String,
        data: Vec<u8>,
        reply: oneshot::Sender<Result<()>>,
    },
    Disconnect,
}

// ============================================================================
// Session
// ============================================================================

/// Factory for remote-display sessions.
///
/// A session is single-use: once it reaches `Disconnected` a new one must
/// be constructed to reconnect.
pub struct Session;

impl Session {
    /// Negotiates capabilities, connects the tunnel, and starts the
    /// session loop.
    ///
    /// Returns the host handle and the session event stream.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Connection`] when the tunnel cannot be
    /// established; nothing is retried automatically.
    pub async fn connect(
        options: SessionOptions,
    ) -> Result<(SessionHandle, mpsc::UnboundedReceiver<SessionEvent>)> {
        // capability negotiation happens before the connect request
        let capabilities = CapabilitySet::negotiate(&*options.media);
        let mut url = options.gateway_url.clone();
        capabilities.apply_to(&mut url, options.width, options.height, options.dpi);

        let (tunnel, tunnel_events) = TransportTunnel::open(&url).await?;
        info!("session tunnel established");
        Ok(Self::attach(options, capabilities, tunnel, tunnel_events))
    }

    /// Starts the session loop over an established tunnel.
    pub(crate) fn attach(
        options: SessionOptions,
        capabilities: CapabilitySet,
        tunnel: TunnelHandle,
        tunnel_events: mpsc::UnboundedReceiver<TunnelEvent>,
    ) -> (SessionHandle, mpsc::UnboundedReceiver<SessionEvent>) {
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let (commands_tx, commands_rx) = mpsc::unbounded_channel();

        let state = SessionState {
            lifecycle: Lifecycle::WaitingForServer,
            capabilities,
            display_width: options.width,
            display_height: options.height,
            viewport_width: options.width,
            viewport_height: options.height,
            scale: 1.0,
            ..SessionState::default()
        };
        let (state_tx, state_rx) = watch::channel(state.clone());

        let dispatcher = Dispatcher::new(
            StreamTable::new(tunnel.clone()),
            ClipboardBridge::new(Arc::clone(&options.clipboard)),
            FileSystemBrowser::new(options.transfer_base.clone()),
            AudioInputStreamer::new(Arc::clone(&options.recorder)),
            Arc::clone(&options.display),
            events_tx.clone(),
        );

        let controller = Controller {
            tunnel,
            dispatcher,
            input: InputTranslator::new(),
            display: Arc::clone(&options.display),
            state,
            state_tx,
            events_tx,
            resize_pending: None,
            clipboard_pending: false,
            closing: false,
        };
        tokio::spawn(controller.run(tunnel_events, commands_rx));

        (
            SessionHandle {
                commands: commands_tx,
                state: state_rx,
            },
            events_rx,
        )
    }
}

// ============================================================================
// SessionHandle
// ============================================================================

/// Host-facing handle to a running session.
///
/// Cheap to clone; all operations go through the session's command
/// channel, so they are harmless no-ops once the session is gone.
#[derive(Clone)]
pub struct SessionHandle {
    commands: mpsc::UnboundedSender<SessionCommand>,
    state: watch::Receiver<SessionState>,
}

impl SessionHandle {
    /// Returns the current state snapshot.
    #[must_use]
    pub fn state(&self) -> SessionState {
        self.state.borrow().clone()
    }

    /// Returns a watch receiver for state-change notifications.
    #[must_use]
    pub fn watch(&self) -> watch::Receiver<SessionState> {
        self.state.clone()
    }

    /// Requests a remote display resize; debounced before hitting the
    /// wire.
    pub fn resize(&self, width: u32, height: u32) {
        self.send(SessionCommand::Resize { width, height });
    }

    /// Notifies the session that the host window regained focus.
    ///
    /// Triggers a debounced local→remote clipboard sync.
    pub fn notify_focus_gained(&self) {
        self.send(SessionCommand::FocusGained);
    }

    /// Sends a keyboard event.
    pub fn key(&self, keysym: u32, pressed: bool) {
        self.send(SessionCommand::Key { keysym, pressed });
    }

    /// Sends a pointer move in viewport coordinates.
    pub fn pointer_move(&self, x: f64, y: f64) {
        self.send(SessionCommand::PointerMove { x, y });
    }

    /// Sends a pointer button press or release.
    pub fn pointer_button(&self, x: f64, y: f64, button: PointerButton, pressed: bool) {
        self.send(SessionCommand::PointerButton {
            x,
            y,
            button,
            pressed,
        });
    }

    /// Sends a touch contact update.
    #[allow(clippy::too_many_arguments)]
    pub fn touch(
        &self,
        id: u32,
        x: f64,
        y: f64,
        x_radius: f64,
        y_radius: f64,
        angle: f64,
        force: f64,
    ) {
        self.send(SessionCommand::Touch {
            id,
            x,
            y,
            x_radius,
            y_radius,
            angle,
            force,
        });
    }

    /// Lists a directory of the attached virtual filesystem.
    ///
    /// # Errors
    ///
    /// [`Error::NotADirectory`] for non-directory paths,
    /// [`Error::InvalidManifest`] for malformed responses,
    /// [`Error::Cancelled`] when the session ends first.
    pub async fn browse(&self, folder: &str) -> Result<Vec<VirtualFileEntry>> {
        let (reply, rx) = oneshot::channel();
        self.send(SessionCommand::Browse {
            folder: folder.to_string(),
            reply,
        });
        rx.await.map_err(|_| Error::Cancelled)?
    }

    /// Negotiates an out-of-band download of a file.
    ///
    /// # Errors
    ///
    /// [`Error::Cancelled`] when the session ends first; scoped errors
    /// for invalid targets.
    pub async fn download(&self, path: &str) -> Result<DownloadOffer> {
        let (reply, rx) = oneshot::channel();
        self.send(SessionCommand::Download {
            path: path.to_string(),
            reply,
        });
        rx.await.map_err(|_| Error::Cancelled)?
    }

    /// Uploads a file into a folder of the attached filesystem.
    ///
    /// # Errors
    ///
    /// [`Error::StreamAborted`] when the gateway refuses the stream,
    /// [`Error::Upload`]/[`Error::Http`] for transfer failures,
    /// [`Error::Cancelled`] when the session ends first.
    pub async fn upload(&self, folder: &str, filename: &str, data: Vec<u8>) -> Result<()> {
        let (reply, rx) = oneshot::channel();
        self.send(SessionCommand::Upload {
            folder: folder.to_string(),
            filename: filename.to_string(),
            data,
            reply,
        });
        rx.await.map_err(|_| Error::Cancelled)?
    }

    /// Requests an orderly disconnect.
    pub fn disconnect(&self) {
        self.send(SessionCommand::Disconnect);
    }

    fn send(&self, command: SessionCommand) {
        // a closed loop makes every command a harmless no-op
        let _ = self.commands.send(command);
    }
}

// ============================================================================
// Controller
// ============================================================================

/// The session's single event-processing loop.
struct Controller {
    tunnel: TunnelHandle,
    dispatcher: Dispatcher,
    input: InputTranslator,
    display: Arc<dyn DisplaySurface>,
    state: SessionState,
    state_tx: watch::Sender<SessionState>,
    events_tx: mpsc::UnboundedSender<SessionEvent>,
    resize_pending: Option<(u32, u32)>,
    clipboard_pending: bool,
    closing: bool,
}

impl Controller {
    /// Runs until the session reaches `Disconnected`.
    async fn run(
        mut self,
        mut tunnel_events: mpsc::UnboundedReceiver<TunnelEvent>,
        mut commands: mpsc::UnboundedReceiver<SessionCommand>,
    ) {
        self.publish();

        let resize_timer = tokio::time::sleep_until(far_future());
        tokio::pin!(resize_timer);
        let clipboard_timer = tokio::time::sleep_until(far_future());
        tokio::pin!(clipboard_timer);
        let mut reminder = tokio::time::interval(PERMISSION_REMINDER_INTERVAL);
        reminder.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        let mut commands_open = true;

        loop {
            tokio::select! {
                event = tunnel_events.recv() => {
                    match event {
                        Some(TunnelEvent::Opened(id)) => self.on_opened(id),
                        Some(TunnelEvent::Instruction(instruction)) => {
                            let warned_before = self.state.permission_warning.is_some();
                            if self.on_instruction(&instruction) {
                                break;
                            }
                            // align the reminder cadence with a fresh warning
                            if !warned_before && self.state.permission_warning.is_some() {
                                reminder.reset();
                            }
                        }
                        Some(TunnelEvent::Error(error)) => {
                            warn!(error = %error, "fatal tunnel error");
                            self.teardown(Some(ErrorRecord::from_error(&error)));
                            break;
                        }
                        Some(TunnelEvent::Closed) | None => {
                            let record = if self.closing {
                                None
                            } else {
                                Some(ErrorRecord::from_error(&Error::ConnectionClosed))
                            };
                            self.teardown(record);
                            break;
                        }
                    }
                }

                command = commands.recv(), if commands_open => {
                    match command {
                        Some(SessionCommand::Resize { width, height }) => {
                            self.on_resize(width, height);
                            resize_timer.as_mut().reset(
                                tokio::time::Instant::now() + RESIZE_DEBOUNCE,
                            );
                        }
                        Some(SessionCommand::FocusGained) => {
                            self.clipboard_pending = true;
                            clipboard_timer.as_mut().reset(
                                tokio::time::Instant::now() + FOCUS_SYNC_DEBOUNCE,
                            );
                        }
                        Some(command) => self.on_command(command),
                        None => {
                            // the host dropped every handle
                            debug!("all session handles dropped");
                            commands_open = false;
                            self.request_disconnect();
                        }
                    }
                }

                () = &mut resize_timer, if self.resize_pending.is_some() => {
                    self.flush_resize();
                }

                () = &mut clipboard_timer, if self.clipboard_pending => {
                    self.clipboard_pending = false;
                    // firing against a closed session is a no-op
                    self.dispatcher.push_clipboard();
                }

                _ = reminder.tick(), if self.state.permission_warning.is_some() => {
                    self.remind_permission();
                }
            }
        }
        debug!("session loop terminated");
    }

    /// Handles the identifier assignment: the session is now connected.
    fn on_opened(&mut self, id: ConnectionId) {
        if self.closing {
            return;
        }
        info!(connection_id = %id, "session connected");
        self.state.connection_id = Some(id.clone());
        self.state.lifecycle = Lifecycle::Connected;
        self.dispatcher.set_connection_id(id);
        // audio negotiation starts as soon as the session is connected
        self.dispatcher.start_audio();
        self.rescale();
        self.publish();
        let _ = self.events_tx.send(SessionEvent::Connected);
    }

    /// Dispatches one instruction; returns `true` when the loop must end.
    fn on_instruction(&mut self, instruction: &Instruction) -> bool {
        let before = (self.state.display_width, self.state.display_height);
        match self.dispatcher.dispatch(instruction, &mut self.state) {
            Ok(DispatchFlow::Continue) => {
                if (self.state.display_width, self.state.display_height) != before {
                    self.rescale();
                }
                self.publish();
                false
            }
            Ok(DispatchFlow::Closed) => {
                debug!("remote side disconnected in an orderly way");
                self.teardown(None);
                true
            }
            Err(error) => {
                warn!(error = %error, "fatal protocol error");
                self.teardown(Some(ErrorRecord::from_error(&error)));
                true
            }
        }
    }

    /// Handles non-debounced host commands.
    fn on_command(&mut self, command: SessionCommand) {
        match command {
            SessionCommand::Key { keysym, pressed } => {
                self.send_input(self.input.key(keysym, pressed));
            }
            SessionCommand::PointerMove { x, y } => {
                let instruction = self.input.pointer_move(x, y);
                self.send_input(instruction);
            }
            SessionCommand::PointerButton {
                x,
                y,
                button,
                pressed,
            } => {
                let instruction = self.input.pointer_button(x, y, button, pressed);
                self.send_input(instruction);
            }
            SessionCommand::Touch {
                id,
                x,
                y,
                x_radius,
                y_radius,
                angle,
                force,
            } => {
                let instruction = self.input.touch(id, x, y, x_radius, y_radius, angle, force);
                self.send_input(instruction);
            }
            SessionCommand::Browse { folder, reply } => {
                if self.state.lifecycle == Lifecycle::Disconnected {
                    let _ = reply.send(Err(Error::Cancelled));
                } else {
                    self.dispatcher.browse(&folder, reply);
                }
            }
            SessionCommand::Download { path, reply } => {
                if self.state.lifecycle == Lifecycle::Disconnected {
                    let _ = reply.send(Err(Error::Cancelled));
                } else {
                    self.dispatcher.download(&path, reply);
                }
            }
            SessionCommand::Upload {
                folder,
                filename,
                data,
                reply,
            } => {
                if self.state.lifecycle == Lifecycle::Disconnected {
                    let _ = reply.send(Err(Error::Cancelled));
                } else {
                    self.dispatcher.upload(&folder, &filename, data, reply);
                }
            }
            SessionCommand::Disconnect => self.request_disconnect(),
            SessionCommand::Resize { .. } | SessionCommand::FocusGained => {
                unreachable!("debounced commands are handled in the loop")
            }
        }
    }

    /// Forwards an input instruction while connected.
    fn send_input(&self, instruction: Instruction) {
        if self.state.lifecycle != Lifecycle::Connected {
            return;
        }
        if self.tunnel.send(instruction).is_err() {
            trace!("input dropped, tunnel closed");
        }
    }

    /// Applies a viewport change and schedules the debounced instruction.
    fn on_resize(&mut self, width: u32, height: u32) {
        self.state.viewport_width = width;
        self.state.viewport_height = height;
        self.rescale();
        self.publish();
        self.resize_pending = Some((width, height));
    }

    /// Sends the debounced resize instruction.
    fn flush_resize(&mut self) {
        let Some((width, height)) = self.resize_pending.take() else {
            return;
        };
        if self.state.lifecycle != Lifecycle::Connected {
            return;
        }
        let size = Instruction::new(
            opcode::SIZE,
            vec![width.to_string(), height.to_string()],
        );
        if self.tunnel.send(size).is_err() {
            trace!("resize dropped, tunnel closed");
        }
    }

    /// Recomputes the display scale and applies it only on change.
    fn rescale(&mut self) {
        let (dw, dh) = (self.state.display_width, self.state.display_height);
        let (vw, vh) = (self.state.viewport_width, self.state.viewport_height);
        if dw == 0 || dh == 0 || vw == 0 || vh == 0 {
            return;
        }
        self.input.set_display_size(dw, dh);
        let scale = (f64::from(vw) / f64::from(dw)).min(f64::from(vh) / f64::from(dh));
        if (scale - self.state.scale).abs() > f64::EPSILON {
            debug!(scale, "display scale changed");
            self.state.scale = scale;
            self.input.set_scale(scale);
            self.display.apply_scale(scale);
        }
    }

    /// Starts an orderly local disconnect.
    fn request_disconnect(&mut self) {
        if matches!(
            self.state.lifecycle,
            Lifecycle::Disconnecting | Lifecycle::Disconnected
        ) {
            return;
        }
        debug!("disconnect requested");
        self.closing = true;
        self.state.lifecycle = Lifecycle::Disconnecting;
        self.publish();
        let _ = self
            .tunnel
            .send(Instruction::new(opcode::DISCONNECT, Vec::new()));
        self.tunnel.close();
    }

    /// Re-emits the pending permission warning.
    fn remind_permission(&self) {
        if let Some(detail) = &self.state.permission_warning {
            let _ = self
                .events_tx
                .send(SessionEvent::PermissionExpiring(detail.clone()));
        }
    }

    /// Terminal transition: cancel everything, release the surface,
    /// notify the host once.
    fn teardown(&mut self, record: Option<ErrorRecord>) {
        if self.state.lifecycle == Lifecycle::Disconnected {
            return;
        }
        info!(?record, "session disconnected");
        self.state.lifecycle = Lifecycle::Disconnected;
        self.dispatcher.cancel_all();
        self.display.release();
        self.tunnel.close();
        self.publish();
        let _ = self.events_tx.send(SessionEvent::Disconnected(record));
    }

    /// Publishes the state snapshot when it changed.
    fn publish(&self) {
        let changed = *self.state_tx.borrow() != self.state;
        if changed {
            let _ = self.state_tx.send(self.state.clone());
        }
    }
}

// ============================================================================
// Tests
// ============================================================================
