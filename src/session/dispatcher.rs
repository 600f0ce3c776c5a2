//! Instruction dispatch.
//!
//! The dispatcher is the protocol state machine's nerve center: every
//! decoded instruction is classified into its [`InstructionKind`] and
//! routed to the one sub-handler that owns it. Dispatch is synchronous
//! and strictly ordered; later instructions may depend on state
//! established by earlier ones, so nothing here awaits.
//!
//! Unknown opcodes are ignored, not fatal: newer gateways keep working
//! against this client.

// ============================================================================
// Imports
// ============================================================================

use std::sync::Arc;

use tokio::sync::{mpsc, oneshot};
use tracing::{trace, warn};

use crate::error::{Error, Result};
use crate::identifiers::{ConnectionId, StreamIndex};
use crate::protocol::opcode::{self, InstructionKind};
use crate::protocol::Instruction;
use crate::streams::{
    AudioInputStreamer, ClipboardBridge, DownloadOffer, FileSystemBrowser, ReadMode, StreamTable,
    VirtualFileEntry,
};

use super::events::GatewayEvent;
use super::{DisplaySurface, Lifecycle, SessionEvent, SessionState};

// ============================================================================
// DispatchFlow
// ============================================================================

/// Outcome of dispatching one instruction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum DispatchFlow {
    /// Keep processing.
    Continue,
    /// The remote side ended the session in an orderly way.
    Closed,
}

// ============================================================================
// Dispatcher
// ============================================================================

/// Routes instructions to their owning sub-handlers.
pub(crate) struct Dispatcher {
    streams: StreamTable,
    clipboard: ClipboardBridge,
    filesystem: FileSystemBrowser,
    audio: AudioInputStreamer,
    display: Arc<dyn DisplaySurface>,
    events: mpsc::UnboundedSender<SessionEvent>,
}

impl Dispatcher {
    /// Creates a dispatcher over the session's sub-handlers.
    pub(crate) fn new(
        streams: StreamTable,
        clipboard: ClipboardBridge,
        filesystem: FileSystemBrowser,
        audio: AudioInputStreamer,
        display: Arc<dyn DisplaySurface>,
        events: mpsc::UnboundedSender<SessionEvent>,
    ) -> Self {
        Self {
            streams,
            clipboard,
            filesystem,
            audio,
            display,
            events,
        }
    }

    /// Records the gateway-assigned connection identifier.
    pub(crate) fn set_connection_id(&mut self, id: ConnectionId) {
        self.filesystem.set_connection_id(id);
    }

    /// Opens the outbound audio stream.
    pub(crate) fn start_audio(&mut self) {
        self.audio.start(&mut self.streams);
    }

    /// Pushes the local clipboard to the remote side.
    pub(crate) fn push_clipboard(&mut self) {
        self.clipboard.push_local(&mut self.streams);
    }

    /// Requests a directory listing.
    pub(crate) fn browse(
        &mut self,
        folder: &str,
        reply: oneshot::Sender<Result<Vec<VirtualFileEntry>>>,
    ) {
        self.filesystem.browse(folder, reply, &mut self.streams);
    }

    /// Requests an out-of-band download.
    pub(crate) fn download(
        &mut self,
        path: &str,
        reply: oneshot::Sender<Result<DownloadOffer>>,
    ) {
        self.filesystem.download(path, reply, &mut self.streams);
    }

    /// Starts an upload into a folder.
    pub(crate) fn upload(
        &mut self,
        folder: &str,
        filename: &str,
        data: Vec<u8>,
        reply: oneshot::Sender<Result<()>>,
    ) {
        self.filesystem
            .upload(folder, filename, data, reply, &mut self.streams);
    }

    /// Cancels every in-flight stream on session teardown.
    ///
    /// Pending reader/writer promises resolve as cancelled rather than
    /// hang.
    pub(crate) fn cancel_all(&mut self) {
        self.audio.stop();
        self.filesystem.cancel_pending();
        self.streams.cancel_all();
    }

    /// Dispatches one instruction in arrival order.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Server`] when the remote side reports a fatal
    /// status; the controller tears the session down with the classified
    /// record.
    pub(crate) fn dispatch(
        &mut self,
        instruction: &Instruction,
        state: &mut SessionState,
    ) -> Result<DispatchFlow> {
        match InstructionKind::classify(instruction.opcode()) {
            InstructionKind::Sync => {
                // display barrier: forward, then echo the timestamp
                self.display.handle_instruction(instruction);
                let echo =
                    Instruction::new(opcode::SYNC, vec![instruction.arg(0).to_string()]);
                if self.streams.send_raw(echo).is_err() {
                    trace!("sync echo dropped, tunnel closed");
                }
            }

            InstructionKind::Nop => {}

            InstructionKind::Ready => {
                // the identifier was frozen at first assignment
                trace!("duplicate identifier assignment ignored");
            }

            InstructionKind::Disconnect => return Ok(DispatchFlow::Closed),

            InstructionKind::Error => {
                let message = instruction.arg(0);
                let code = instruction.arg(1).parse::<u32>().unwrap_or(0);
                return Err(Error::server(code, message));
            }

            InstructionKind::Blob => self.streams.handle_blob(instruction),

            InstructionKind::End => {
                if let Some(index) = StreamIndex::parse(instruction.arg(0))
                    && self.audio.owns(index)
                {
                    let connected = state.lifecycle == Lifecycle::Connected;
                    self.audio
                        .handle_remote_close(index, connected, &mut self.streams);
                } else {
                    self.streams.handle_end(instruction);
                }
            }

            InstructionKind::Ack => {
                let index = StreamIndex::parse(instruction.arg(0));
                let status = instruction.arg(2).parse::<u32>().unwrap_or(0);
                self.streams.handle_ack(instruction);
                // an error status is the remote side closing the stream
                if status != 0
                    && let Some(index) = index
                    && self.audio.owns(index)
                {
                    let connected = state.lifecycle == Lifecycle::Connected;
                    self.audio
                        .handle_remote_close(index, connected, &mut self.streams);
                }
            }

            InstructionKind::Clipboard => {
                self.clipboard
                    .handle_remote_open(instruction, &mut self.streams);
            }

            InstructionKind::File => {
                if let Some(offer) = self
                    .filesystem
                    .handle_file_offer(instruction, &mut self.streams)
                {
                    self.emit(SessionEvent::DownloadReady(offer));
                }
            }

            InstructionKind::Filesystem => {
                self.filesystem.handle_attach(instruction, &mut self.streams);
                self.emit(SessionEvent::FilesystemAttached);
            }

            InstructionKind::Body => self.filesystem.handle_body(instruction, &mut self.streams),

            InstructionKind::Undefine => self.filesystem.handle_undefine(),

            InstructionKind::Audio => {
                // inbound playback stream: keep flow control honest even
                // though playback itself is delegated
                if let Some(index) = StreamIndex::parse(instruction.arg(0)) {
                    let mimetype = instruction.arg(1).to_string();
                    drop(self.streams.open_inbound(index, mimetype, ReadMode::Binary));
                }
                self.display.handle_instruction(instruction);
            }

            InstructionKind::Display => {
                self.display.handle_instruction(instruction);
                // the default layer's size drives scale computation
                if instruction.opcode() == opcode::SIZE && instruction.arg(0) == "0" {
                    if let (Ok(width), Ok(height)) = (
                        instruction.arg(1).parse::<u32>(),
                        instruction.arg(2).parse::<u32>(),
                    ) {
                        state.display_width = width;
                        state.display_height = height;
                    }
                }
            }

            InstructionKind::GatewayEvent => {
                self.dispatch_gateway_event(instruction, state);
            }

            InstructionKind::Unknown => {
                trace!(opcode = instruction.opcode(), "unknown opcode ignored");
            }
        }
        Ok(DispatchFlow::Continue)
    }

    /// Applies one gateway out-of-band event to state and host events.
    fn dispatch_gateway_event(&mut self, instruction: &Instruction, state: &mut SessionState) {
        match GatewayEvent::parse(instruction.arg(0), instruction.arg(1)) {
            GatewayEvent::SessionMeta(meta) => self.emit(SessionEvent::SessionMeta(meta)),
            GatewayEvent::Paused(detail) => {
                state.paused = true;
                self.emit(SessionEvent::Paused(detail));
            }
            GatewayEvent::Resumed(detail) => {
                state.paused = false;
                self.emit(SessionEvent::Resumed(detail));
            }
            GatewayEvent::ParticipantJoined(user) => {
                if !state.participants.iter().any(|p| p.user_id == user.user_id) {
                    state.participants.push(user.clone());
                }
                self.emit(SessionEvent::ParticipantJoined(user));
            }
            GatewayEvent::ParticipantLeft(user) => {
                state.participants.retain(|p| p.user_id != user.user_id);
                self.emit(SessionEvent::ParticipantLeft(user));
            }
            GatewayEvent::Participants(roster) => {
                state.participants = roster;
            }
            GatewayEvent::PermissionExpired(detail) => {
                state.permission_warning = Some(detail.clone());
                self.emit(SessionEvent::PermissionExpiring(detail));
            }
            GatewayEvent::PermissionRestored(_) => {
                state.permission_warning = None;
                self.emit(SessionEvent::PermissionRestored);
            }
            GatewayEvent::Unknown { event, .. } => {
                warn!(%event, "unrecognized gateway event ignored");
            }
        }
    }

    fn emit(&self, event: SessionEvent) {
        let _ = self.events.send(event);
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    use serde_json::json;
    use tokio::sync::mpsc::UnboundedReceiver;

    use crate::protocol::status::DisconnectKind;
    use crate::streams::{NoRecorder, NoopClipboard};
    use crate::transport::tunnel::TunnelCommand;
    use crate::transport::TunnelHandle;
    use crate::session::NullDisplaySurface;

    struct Harness {
        dispatcher: Dispatcher,
        state: SessionState,
        commands: UnboundedReceiver<TunnelCommand>,
        events: UnboundedReceiver<SessionEvent>,
    }

    fn harness() -> Harness {
        let (tunnel, commands) = TunnelHandle::mock();
        let (events_tx, events) = mpsc::unbounded_channel();
        let base = url::Url::parse("https://gateway.example/api").expect("url");
        let dispatcher = Dispatcher::new(
            StreamTable::new(tunnel),
            ClipboardBridge::new(Arc::new(NoopClipboard)),
            FileSystemBrowser::new(base),
            AudioInputStreamer::new(Arc::new(NoRecorder)),
            Arc::new(NullDisplaySurface),
            events_tx,
        );
        let state = SessionState {
            lifecycle: Lifecycle::Connected,
            ..SessionState::default()
        };
        Harness {
            dispatcher,
            state,
            commands,
            events,
        }
    }

    fn sent(commands: &mut UnboundedReceiver<TunnelCommand>) -> Vec<Instruction> {
        let mut out = Vec::new();
        while let Ok(cmd) = commands.try_recv() {
            if let Some(ins) = cmd.into_instruction() {
                out.push(ins);
            }
        }
        out
    }

    #[tokio::test]
    async fn test_sync_is_echoed() {
        let mut h = harness();
        let flow = h
            .dispatcher
            .dispatch(&Instruction::of("sync", &["12345"]), &mut h.state)
            .expect("dispatch");
        assert_eq!(flow, DispatchFlow::Continue);

        let out = sent(&mut h.commands);
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].encode(), "4.sync,5.12345;");
    }

    #[tokio::test]
    async fn test_error_instruction_is_classified_fatal() {
        let mut h = harness();
        let err = h
            .dispatcher
            .dispatch(&Instruction::of("error", &["X", "1005"]), &mut h.state)
            .expect_err("fatal");
        assert_eq!(err.disconnect_kind(), Some(DisconnectKind::TerminatedByAdmin));
    }

    #[tokio::test]
    async fn test_disconnect_is_orderly_close() {
        let mut h = harness();
        let flow = h
            .dispatcher
            .dispatch(&Instruction::of("disconnect", &[]), &mut h.state)
            .expect("dispatch");
        assert_eq!(flow, DispatchFlow::Closed);
    }

    #[tokio::test]
    async fn test_unknown_opcode_is_ignored() {
        let mut h = harness();
        let flow = h
            .dispatcher
            .dispatch(
                &Instruction::of("glyph-cache-v9", &["1", "2"]),
                &mut h.state,
            )
            .expect("dispatch");
        assert_eq!(flow, DispatchFlow::Continue);
        assert!(sent(&mut h.commands).is_empty());
    }

    #[tokio::test]
    async fn test_size_updates_display_dimensions() {
        let mut h = harness();
        h.dispatcher
            .dispatch(&Instruction::of("size", &["0", "1024", "768"]), &mut h.state)
            .expect("dispatch");
        assert_eq!(h.state.display_width, 1024);
        assert_eq!(h.state.display_height, 768);

        // non-default layers leave the session geometry alone
        h.dispatcher
            .dispatch(&Instruction::of("size", &["3", "64", "64"]), &mut h.state)
            .expect("dispatch");
        assert_eq!(h.state.display_width, 1024);
    }

    #[tokio::test]
    async fn test_pause_resume_toggle_state() {
        let mut h = harness();
        h.dispatcher
            .dispatch(
                &Instruction::of("jms_event", &["session_pause", r#"{"user":"root"}"#]),
                &mut h.state,
            )
            .expect("dispatch");
        assert!(h.state.paused);
        assert!(matches!(
            h.events.try_recv().expect("event"),
            SessionEvent::Paused(_)
        ));

        h.dispatcher
            .dispatch(
                &Instruction::of("jms_event", &["session_resume", "{}"]),
                &mut h.state,
            )
            .expect("dispatch");
        assert!(!h.state.paused);
    }

    #[tokio::test]
    async fn test_roster_replaces_participants() {
        let mut h = harness();
        let roster = json!([
            {"user_id": "u1", "user": "alice", "primary": true},
            {"user_id": "u2", "user": "bob"},
        ])
        .to_string();
        h.dispatcher
            .dispatch(
                &Instruction::of("jms_event", &["share_users", &roster]),
                &mut h.state,
            )
            .expect("dispatch");
        assert_eq!(h.state.participants.len(), 2);

        let exit = json!({"user_id": "u2", "user": "bob"}).to_string();
        h.dispatcher
            .dispatch(
                &Instruction::of("jms_event", &["share_exit", &exit]),
                &mut h.state,
            )
            .expect("dispatch");
        assert_eq!(h.state.participants.len(), 1);
        assert_eq!(h.state.participants[0].user, "alice");
    }

    #[tokio::test]
    async fn test_permission_warning_sets_and_clears() {
        let mut h = harness();
        h.dispatcher
            .dispatch(
                &Instruction::of("jms_event", &["perm_expired", r#"{"detail":"soon"}"#]),
                &mut h.state,
            )
            .expect("dispatch");
        assert!(h.state.permission_warning.is_some());
        assert!(matches!(
            h.events.try_recv().expect("event"),
            SessionEvent::PermissionExpiring(_)
        ));

        h.dispatcher
            .dispatch(
                &Instruction::of("jms_event", &["perm_valid", "{}"]),
                &mut h.state,
            )
            .expect("dispatch");
        assert!(h.state.permission_warning.is_none());
        assert!(matches!(
            h.events.try_recv().expect("event"),
            SessionEvent::PermissionRestored
        ));
    }

    #[tokio::test]
    async fn test_filesystem_attach_emits_event_and_requests_root() {
        let mut h = harness();
        h.dispatcher.set_connection_id(ConnectionId::new("c1"));
        h.dispatcher
            .dispatch(
                &Instruction::of("filesystem", &["0", "Shared"]),
                &mut h.state,
            )
            .expect("dispatch");

        assert!(matches!(
            h.events.try_recv().expect("event"),
            SessionEvent::FilesystemAttached
        ));
        let out = sent(&mut h.commands);
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].opcode(), "get");
    }
}
