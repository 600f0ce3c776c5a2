//! Logical stream reader/writer codec and the per-session stream table.
//!
//! A logical stream is a numbered, unidirectional channel multiplexed over
//! the single tunnel. Payload travels as base64 `blob` instructions, each
//! of which the receiver acknowledges for flow control; `end` closes the
//! stream. All stream state is advanced from the one serial instruction
//! feed; completion is delivered through per-stream channels so nothing
//! awaits inside the feed itself.

// ============================================================================
// Imports
// ============================================================================

use base64::Engine as _;
use base64::engine::general_purpose::STANDARD as BASE64;
use rustc_hash::FxHashMap;
use serde_json::Value;
use tokio::sync::{mpsc, oneshot};
use tracing::{trace, warn};

use crate::error::{Error, Result};
use crate::identifiers::StreamIndex;
use crate::protocol::opcode::{ACK, BLOB, END};
use crate::protocol::Instruction;
use crate::transport::TunnelHandle;

// ============================================================================
// Constants
// ============================================================================

/// Bytes per outgoing blob before base64 encoding.
const BLOB_CHUNK_BYTES: usize = 4096;

/// Flow-control status code for a healthy acknowledgement.
const ACK_OK: u32 = 0;

// ============================================================================
// AckStatus
// ============================================================================

/// Status carried by one `ack` instruction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AckStatus {
    /// Numeric status code; zero means ready for more data.
    pub code: u32,
    /// Human-readable message from the remote side.
    pub message: String,
}

impl AckStatus {
    /// Returns `true` when the acknowledgement reports an error.
    ///
    /// Flow-control errors are not transient; writers abort on them.
    #[inline]
    #[must_use]
    pub fn is_error(&self) -> bool {
        self.code != ACK_OK
    }
}

// ============================================================================
// StreamPayload
// ============================================================================

/// Completed payload of one inbound stream.
#[derive(Debug, Clone, PartialEq)]
pub enum StreamPayload {
    /// Accumulated UTF-8 text.
    Text(String),
    /// Accumulated bytes with their declared mimetype.
    Binary {
        /// Declared mimetype of the stream.
        mimetype: String,
        /// Decoded payload bytes.
        data: Vec<u8>,
    },
    /// Parsed JSON value.
    Json(Value),
}

// ============================================================================
// ReadMode
// ============================================================================

/// How an inbound stream accumulates and delivers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReadMode {
    /// Deliver accumulated UTF-8 text on end-of-stream.
    Text,
    /// Deliver accumulated bytes on end-of-stream.
    Binary,
    /// Deliver as soon as the buffer parses as one JSON value.
    Json,
}

// ============================================================================
// InboundStream
// ============================================================================

/// Reader state for one inbound stream.
struct InboundStream {
    mimetype: String,
    mode: ReadMode,
    buf: Vec<u8>,
    done_tx: Option<oneshot::Sender<Result<StreamPayload>>>,
}

impl InboundStream {
    /// Appends one decoded chunk; JSON streams deliver eagerly once the
    /// buffer parses.
    fn push(&mut self, chunk: &[u8]) {
        self.buf.extend_from_slice(chunk);
        if self.mode == ReadMode::Json
            && self.done_tx.is_some()
            && let Ok(value) = serde_json::from_slice::<Value>(&self.buf)
            && let Some(tx) = self.done_tx.take()
        {
            let _ = tx.send(Ok(StreamPayload::Json(value)));
        }
    }

    /// Delivers the final payload on end-of-stream.
    fn finish(mut self) {
        let Some(tx) = self.done_tx.take() else {
            return;
        };
        let outcome = match self.mode {
            ReadMode::Text => Ok(StreamPayload::Text(
                String::from_utf8_lossy(&self.buf).into_owned(),
            )),
            ReadMode::Binary => Ok(StreamPayload::Binary {
                mimetype: self.mimetype,
                data: std::mem::take(&mut self.buf),
            }),
            // end arrived before the buffer ever parsed
            ReadMode::Json => Err(Error::invalid_manifest("stream ended before JSON parsed")),
        };
        let _ = tx.send(outcome);
    }

    /// Resolves the pending promise as cancelled.
    fn cancel(mut self) {
        if let Some(tx) = self.done_tx.take() {
            let _ = tx.send(Err(Error::Cancelled));
        }
    }
}

// ============================================================================
// StreamTable
// ============================================================================

/// Per-session registry of inbound readers and outbound acknowledgement
/// routes.
///
/// Outbound indices are allocated monotonically and never reused within
/// the session's lifetime.
pub struct StreamTable {
    tunnel: TunnelHandle,
    next_outbound: u64,
    inbound: FxHashMap<u64, InboundStream>,
    ack_routes: FxHashMap<u64, mpsc::UnboundedSender<AckStatus>>,
}

impl StreamTable {
    /// Creates an empty table sending through `tunnel`.
    #[must_use]
    pub fn new(tunnel: TunnelHandle) -> Self {
        Self {
            tunnel,
            next_outbound: 0,
            inbound: FxHashMap::default(),
            ack_routes: FxHashMap::default(),
        }
    }

    /// Registers a reader for an inbound stream and returns its
    /// completion channel.
    pub fn open_inbound(
        &mut self,
        index: StreamIndex,
        mimetype: impl Into<String>,
        mode: ReadMode,
    ) -> oneshot::Receiver<Result<StreamPayload>> {
        let (done_tx, done_rx) = oneshot::channel();
        self.inbound.insert(
            index.value(),
            InboundStream {
                mimetype: mimetype.into(),
                mode,
                buf: Vec::new(),
                done_tx: Some(done_tx),
            },
        );
        done_rx
    }

    /// Allocates an outbound stream with an acknowledgement route.
    pub fn open_outbound(&mut self) -> StreamWriter {
        let index = StreamIndex::new(self.next_outbound);
        self.next_outbound += 1;
        let (ack_tx, ack_rx) = mpsc::unbounded_channel();
        self.ack_routes.insert(index.value(), ack_tx);
        StreamWriter {
            index,
            tunnel: self.tunnel.clone(),
            ack_rx,
        }
    }

    /// Handles one `blob` instruction: decode, accumulate, acknowledge.
    pub fn handle_blob(&mut self, instruction: &Instruction) {
        let Some(index) = StreamIndex::parse(instruction.arg(0)) else {
            warn!(arg = instruction.arg(0), "blob with unparsable index");
            return;
        };
        let Some(stream) = self.inbound.get_mut(&index.value()) else {
            trace!(%index, "blob for unknown stream ignored");
            return;
        };
        match BASE64.decode(instruction.arg(1)) {
            Ok(chunk) => stream.push(&chunk),
            Err(e) => {
                warn!(%index, error = %e, "undecodable blob chunk dropped");
            }
        }
        // every chunk is acknowledged, required for flow control
        self.send_ack(index, "OK", ACK_OK);
    }

    /// Handles one `end` instruction: deliver and acknowledge.
    pub fn handle_end(&mut self, instruction: &Instruction) {
        let Some(index) = StreamIndex::parse(instruction.arg(0)) else {
            return;
        };
        if let Some(stream) = self.inbound.remove(&index.value()) {
            stream.finish();
            self.send_ack(index, "OK", ACK_OK);
        } else {
            trace!(%index, "end for unknown stream ignored");
        }
    }

    /// Routes one `ack` instruction to its outbound stream.
    ///
    /// Returns `false` when no route exists (already closed, or never
    /// ours) so the caller can fall through.
    pub fn handle_ack(&mut self, instruction: &Instruction) -> bool {
        let Some(index) = StreamIndex::parse(instruction.arg(0)) else {
            return false;
        };
        let status = AckStatus {
            code: instruction.arg(2).parse().unwrap_or(ACK_OK),
            message: instruction.arg(1).to_string(),
        };
        let closed = status.is_error();
        let mut stale = false;
        let routed = match self.ack_routes.get(&index.value()) {
            Some(route) => {
                let delivered = route.send(status).is_ok();
                stale = !delivered;
                delivered
            }
            None => false,
        };
        // an error status terminates the stream, and a dropped writer no
        // longer needs its route
        if closed || stale {
            self.ack_routes.remove(&index.value());
        }
        routed
    }

    /// Removes the acknowledgement route of a finished writer.
    pub fn release_outbound(&mut self, index: StreamIndex) {
        self.ack_routes.remove(&index.value());
    }

    /// Resolves every pending reader and writer as cancelled.
    ///
    /// Called on session teardown so no promise is left hanging.
    pub fn cancel_all(&mut self) {
        for (_, stream) in self.inbound.drain() {
            stream.cancel();
        }
        // dropping the routes closes every writer's ack channel
        self.ack_routes.clear();
    }

    /// Sends an instruction through the session's tunnel.
    ///
    /// Sub-handlers send through the table rather than holding their own
    /// tunnel reference, so nothing outlives the session.
    ///
    /// # Errors
    ///
    /// Returns [`Error::ConnectionClosed`] when the tunnel is gone.
    pub fn send_raw(&self, instruction: Instruction) -> Result<()> {
        self.tunnel.send(instruction)
    }

    /// Sends an acknowledgement for an inbound stream.
    fn send_ack(&self, index: StreamIndex, message: &str, code: u32) {
        let ack = Instruction::new(
            ACK,
            vec![index.to_string(), message.to_string(), code.to_string()],
        );
        if self.tunnel.send(ack).is_err() {
            trace!(%index, "ack dropped, tunnel closed");
        }
    }
}

// ============================================================================
// StreamWriter
// ============================================================================

/// Writer half of one outbound stream.
///
/// The writer owns a tunnel handle and its acknowledgement channel, so it
/// can run in a spawned task without blocking instruction processing.
pub struct StreamWriter {
    index: StreamIndex,
    tunnel: TunnelHandle,
    ack_rx: mpsc::UnboundedReceiver<AckStatus>,
}

impl StreamWriter {
    /// Returns the stream index.
    #[inline]
    #[must_use]
    pub fn index(&self) -> StreamIndex {
        self.index
    }

    /// Sends the stream-open instruction built by the caller.
    ///
    /// # Errors
    ///
    /// Returns [`Error::ConnectionClosed`] when the tunnel is gone.
    pub fn open(&self, instruction: Instruction) -> Result<()> {
        self.tunnel.send(instruction)
    }

    /// Awaits the next acknowledgement.
    ///
    /// # Errors
    ///
    /// [`Error::Cancelled`] when the session tore down the route;
    /// [`Error::StreamAborted`] when the acknowledgement carries an error
    /// status.
    pub async fn await_ack(&mut self) -> Result<AckStatus> {
        match self.ack_rx.recv().await {
            Some(status) if status.is_error() => {
                Err(Error::stream_aborted(self.index, status.code, status.message))
            }
            Some(status) => Ok(status),
            None => Err(Error::Cancelled),
        }
    }

    /// Writes a string payload: chunked, base64-encoded, ended.
    ///
    /// Acknowledgements are monitored for errors between chunks; an error
    /// status aborts the remaining chunks and surfaces to the caller.
    ///
    /// # Errors
    ///
    /// [`Error::StreamAborted`] on a flow-control error,
    /// [`Error::ConnectionClosed`] when the tunnel is gone.
    pub fn write_text(&mut self, text: &str) -> Result<()> {
        for chunk in text.as_bytes().chunks(BLOB_CHUNK_BYTES) {
            self.check_aborted()?;
            self.send_blob(chunk)?;
        }
        self.finish()
    }

    /// Sends one binary chunk as a blob instruction.
    ///
    /// # Errors
    ///
    /// Returns [`Error::ConnectionClosed`] when the tunnel is gone.
    pub fn send_blob(&self, chunk: &[u8]) -> Result<()> {
        let encoded = BASE64.encode(chunk);
        self.tunnel.send(Instruction::new(
            BLOB,
            vec![self.index.to_string(), encoded],
        ))
    }

    /// Sends the end-of-stream instruction.
    ///
    /// # Errors
    ///
    /// Returns [`Error::ConnectionClosed`] when the tunnel is gone.
    pub fn finish(&self) -> Result<()> {
        self.tunnel
            .send(Instruction::new(END, vec![self.index.to_string()]))
    }

    /// Surfaces a pending flow-control error without blocking.
    fn check_aborted(&mut self) -> Result<()> {
        match self.ack_rx.try_recv() {
            Ok(status) if status.is_error() => {
                Err(Error::stream_aborted(self.index, status.code, status.message))
            }
            _ => Ok(()),
        }
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    use tokio::sync::mpsc::UnboundedReceiver;

    use crate::transport::tunnel::TunnelCommand;

    fn table() -> (StreamTable, UnboundedReceiver<TunnelCommand>) {
        let (tunnel, commands) = TunnelHandle::mock();
        (StreamTable::new(tunnel), commands)
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
    async fn test_text_reader_delivers_on_end() {
        let (mut table, mut commands) = table();
        let rx = table.open_inbound(StreamIndex::new(3), "text/plain", ReadMode::Text);

        let chunk = BASE64.encode("hello ");
        table.handle_blob(&Instruction::of("blob", &["3", &chunk]));
        let chunk = BASE64.encode("world");
        table.handle_blob(&Instruction::of("blob", &["3", &chunk]));
        table.handle_end(&Instruction::of("end", &["3"]));

        match rx.await.expect("delivered").expect("payload") {
            StreamPayload::Text(text) => assert_eq!(text, "hello world"),
            other => panic!("expected text, got {other:?}"),
        }

        // one ack per blob plus one for the end
        let acks = sent(&mut commands);
        assert_eq!(acks.len(), 3);
        assert!(acks.iter().all(|a| a.opcode() == "ack" && a.arg(2) == "0"));
    }

    #[tokio::test]
    async fn test_json_reader_delivers_once_parse_succeeds() {
        let (mut table, _commands) = table();
        let rx = table.open_inbound(StreamIndex::new(5), "application/json", ReadMode::Json);

        let half = BASE64.encode(r#"{"a/b.txt":"text"#);
        table.handle_blob(&Instruction::of("blob", &["5", &half]));
        let rest = BASE64.encode(r#"/plain"}"#);
        table.handle_blob(&Instruction::of("blob", &["5", &rest]));
        table.handle_end(&Instruction::of("end", &["5"]));

        match rx.await.expect("delivered").expect("payload") {
            StreamPayload::Json(value) => {
                assert_eq!(value["a/b.txt"], "text/plain");
            }
            other => panic!("expected json, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_json_reader_rejects_truncated_stream() {
        let (mut table, _commands) = table();
        let rx = table.open_inbound(StreamIndex::new(5), "application/json", ReadMode::Json);

        let half = BASE64.encode(r#"{"a":"#);
        table.handle_blob(&Instruction::of("blob", &["5", &half]));
        table.handle_end(&Instruction::of("end", &["5"]));

        let err = rx.await.expect("delivered").expect_err("should fail");
        assert!(matches!(err, Error::InvalidManifest { .. }));
    }

    #[tokio::test]
    async fn test_binary_reader_keeps_mimetype() {
        let (mut table, _commands) = table();
        let rx = table.open_inbound(StreamIndex::new(8), "image/png", ReadMode::Binary);

        let chunk = BASE64.encode([1u8, 2, 3]);
        table.handle_blob(&Instruction::of("blob", &["8", &chunk]));
        table.handle_end(&Instruction::of("end", &["8"]));

        match rx.await.expect("delivered").expect("payload") {
            StreamPayload::Binary { mimetype, data } => {
                assert_eq!(mimetype, "image/png");
                assert_eq!(data, vec![1, 2, 3]);
            }
            other => panic!("expected binary, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_blob_for_unknown_stream_is_ignored() {
        let (mut table, mut commands) = table();
        table.handle_blob(&Instruction::of("blob", &["99", "aGk="]));
        assert!(sent(&mut commands).is_empty());
    }

    #[tokio::test]
    async fn test_writer_text_chunks_and_ends() {
        let (mut table, mut commands) = table();
        let mut writer = table.open_outbound();
        assert_eq!(writer.index(), StreamIndex::new(0));

        writer.write_text("clipboard contents").expect("write");

        let out = sent(&mut commands);
        assert_eq!(out.len(), 2);
        assert_eq!(out[0].opcode(), "blob");
        assert_eq!(out[0].arg(0), "0");
        assert_eq!(
            BASE64.decode(out[0].arg(1)).expect("b64"),
            b"clipboard contents"
        );
        assert_eq!(out[1].opcode(), "end");
    }

    #[tokio::test]
    async fn test_writer_aborts_on_error_ack() {
        let (mut table, mut commands) = table();
        let mut writer = table.open_outbound();

        assert!(table.handle_ack(&Instruction::of("ack", &["0", "FAIL", "519"])));

        let err = writer.write_text("data").expect_err("aborted");
        match err {
            Error::StreamAborted { status, .. } => assert_eq!(status, 519),
            other => panic!("expected StreamAborted, got {other}"),
        }
        // nothing went on the wire after the abort
        assert!(sent(&mut commands).is_empty());
    }

    #[tokio::test]
    async fn test_await_ack_ok_and_error() {
        let (mut table, _commands) = table();
        let mut writer = table.open_outbound();

        assert!(table.handle_ack(&Instruction::of("ack", &["0", "OK", "0"])));
        let status = writer.await_ack().await.expect("ok ack");
        assert!(!status.is_error());

        assert!(table.handle_ack(&Instruction::of("ack", &["0", "denied", "769"])));
        let err = writer.await_ack().await.expect_err("error ack");
        assert!(matches!(err, Error::StreamAborted { status: 769, .. }));
    }

    #[tokio::test]
    async fn test_indices_allocated_monotonically() {
        let (mut table, _commands) = table();
        let a = table.open_outbound();
        let b = table.open_outbound();
        table.release_outbound(a.index());
        let c = table.open_outbound();
        assert_eq!(a.index().value(), 0);
        assert_eq!(b.index().value(), 1);
        // released indices are never reused
        assert_eq!(c.index().value(), 2);
    }

    #[tokio::test]
    async fn test_cancel_all_resolves_readers_and_writers() {
        let (mut table, _commands) = table();
        let reader = table.open_inbound(StreamIndex::new(1), "text/plain", ReadMode::Text);
        let mut writer = table.open_outbound();

        table.cancel_all();

        let err = reader.await.expect("resolved").expect_err("cancelled");
        assert!(err.is_cancelled());
        let err = writer.await_ack().await.expect_err("cancelled");
        assert!(err.is_cancelled());
    }
}
