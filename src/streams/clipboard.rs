//! Bidirectional clipboard synchronization.
//!
//! Remote→local: a `clipboard` instruction opens an inbound stream whose
//! mimetype decides the reader mode. `text/*` accumulates UTF-8 and lands
//! in the local clipboard on stream end; any other mimetype accumulates
//! bytes and lands as a typed blob.
//!
//! Local→remote: when the host regains focus it asks the bridge to push
//! the local clipboard. The push is debounced by the session controller so
//! rapid focus toggling does not cause a sync storm; non-empty text opens
//! a `text/plain` outbound stream, writes, and ends it.
//!
//! Local clipboard failures degrade to a logged warning. They never end
//! the session.

// ============================================================================
// Imports
// ============================================================================

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tracing::{debug, warn};

use crate::error::Result;
use crate::identifiers::StreamIndex;
use crate::protocol::opcode::CLIPBOARD;
use crate::protocol::Instruction;

use super::codec::{ReadMode, StreamPayload, StreamTable};

// ============================================================================
// Constants
// ============================================================================

/// Mimetype of locally pushed clipboard text.
pub const TEXT_PLAIN: &str = "text/plain";

/// Debounce applied between focus regain and the clipboard push.
pub const FOCUS_SYNC_DEBOUNCE: Duration = Duration::from_millis(300);

// ============================================================================
// ClipboardAccess
// ============================================================================

/// Host access to the local clipboard.
///
/// Implementations may fail freely (platform permission prompts, missing
/// APIs); the bridge logs and moves on.
#[async_trait]
pub trait ClipboardAccess: Send + Sync {
    /// Reads the local clipboard as text.
    async fn read_text(&self) -> Result<String>;

    /// Writes text to the local clipboard.
    async fn write_text(&self, text: String) -> Result<()>;

    /// Writes a typed binary payload to the local clipboard.
    async fn write_blob(&self, mimetype: String, data: Vec<u8>) -> Result<()>;
}

/// Clipboard access that does nothing.
///
/// Hosts without a clipboard (headless, permission denied at startup) use
/// this; every sync degrades to a logged no-op.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopClipboard;

#[async_trait]
impl ClipboardAccess for NoopClipboard {
    async fn read_text(&self) -> Result<String> {
        Ok(String::new())
    }

    async fn write_text(&self, _text: String) -> Result<()> {
        Ok(())
    }

    async fn write_blob(&self, _mimetype: String, _data: Vec<u8>) -> Result<()> {
        Ok(())
    }
}

// ============================================================================
// ClipboardBridge
// ============================================================================

/// Synchronizes the local and remote clipboards over dedicated streams.
pub struct ClipboardBridge {
    access: Arc<dyn ClipboardAccess>,
}

impl ClipboardBridge {
    /// Creates a bridge over the given local clipboard access.
    #[must_use]
    pub fn new(access: Arc<dyn ClipboardAccess>) -> Self {
        Self { access }
    }

    /// Handles a remote `clipboard` stream open.
    ///
    /// Registers a reader whose completed payload is written to the local
    /// clipboard from a spawned task, keeping the instruction feed
    /// non-blocking.
    pub fn handle_remote_open(&self, instruction: &Instruction, table: &mut StreamTable) {
        let Some(index) = StreamIndex::parse(instruction.arg(0)) else {
            warn!(arg = instruction.arg(0), "clipboard open with unparsable index");
            return;
        };
        let mimetype = instruction.arg(1).to_string();
        let mode = if mimetype.starts_with("text/") {
            ReadMode::Text
        } else {
            ReadMode::Binary
        };
        debug!(%index, %mimetype, "remote clipboard stream opened");

        let done_rx = table.open_inbound(index, mimetype, mode);
        let access = Arc::clone(&self.access);
        tokio::spawn(async move {
            let payload = match done_rx.await {
                Ok(Ok(payload)) => payload,
                Ok(Err(e)) if e.is_cancelled() => return,
                Ok(Err(e)) => {
                    warn!(error = %e, "remote clipboard stream failed");
                    return;
                }
                Err(_) => return,
            };
            let outcome = match payload {
                StreamPayload::Text(text) => access.write_text(text).await,
                StreamPayload::Binary { mimetype, data } => {
                    access.write_blob(mimetype, data).await
                }
                StreamPayload::Json(value) => access.write_text(value.to_string()).await,
            };
            if let Err(e) = outcome {
                // local clipboard trouble is a warning, never fatal
                warn!(error = %e, "local clipboard write failed");
            }
        });
    }

    /// Pushes the local clipboard to the remote side.
    ///
    /// Opens an outbound `text/plain` stream, writes the current local
    /// text, and closes it. Empty clipboards are skipped. The caller is
    /// responsible for debouncing with [`FOCUS_SYNC_DEBOUNCE`].
    pub fn push_local(&self, table: &mut StreamTable) {
        let mut writer = table.open_outbound();
        let access = Arc::clone(&self.access);
        tokio::spawn(async move {
            let text = match access.read_text().await {
                Ok(text) => text,
                Err(e) => {
                    warn!(error = %e, "local clipboard read failed");
                    return;
                }
            };
            if text.is_empty() {
                return;
            }
            let open = Instruction::new(
                CLIPBOARD,
                vec![writer.index().to_string(), TEXT_PLAIN.to_string()],
            );
            // a closed tunnel makes the debounced push a harmless no-op
            if writer.open(open).is_err() {
                return;
            }
            if let Err(e) = writer.write_text(&text) {
                warn!(error = %e, "clipboard push aborted");
            }
        });
    }
}

// ============================================================================
// Tests
// ============================================================================
