//! Logical streams multiplexed over the tunnel.
//!
//! Each sub-protocol rides its own numbered streams: clipboard payloads,
//! filesystem manifests and transfer negotiation, and microphone audio.
//! All stream state is advanced from the one serial instruction feed;
//! completion and cancellation are delivered through per-stream channels.
//!
//! | Module | Description |
//! |--------|-------------|
//! | [`codec`] | reader/writer halves and the stream table |
//! | [`clipboard`] | bidirectional clipboard synchronization |
//! | [`filesystem`] | directory browsing and out-of-band transfer |
//! | [`audio`] | continuous microphone forwarding |

// ============================================================================
// Submodules
// ============================================================================

/// Stream reader/writer codec and the per-session stream table.
pub mod codec;

/// Clipboard synchronization over dedicated streams.
pub mod clipboard;

/// Virtual filesystem browsing and HTTP transfer negotiation.
pub mod filesystem;

/// Microphone forwarding with re-arm on remote close.
pub mod audio;

// ============================================================================
// Re-exports
// ============================================================================

pub use audio::{AUDIO_INPUT_MIMETYPE, AudioInputStreamer, AudioRecorderFactory, NoRecorder};
pub use clipboard::{ClipboardAccess, ClipboardBridge, FOCUS_SYNC_DEBOUNCE, NoopClipboard};
pub use codec::{AckStatus, ReadMode, StreamPayload, StreamTable, StreamWriter};
pub use filesystem::{
    DIRECTORY_MIMETYPE, DownloadOffer, EntryKind, FileSystemBrowser, VirtualFileEntry,
};
