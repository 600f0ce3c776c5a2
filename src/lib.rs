//! Remote-display gateway client core.
//!
//! This library drives an interactive remote-display session: it opens
//! one WebSocket tunnel to a remote-access gateway, speaks the framed
//! instruction protocol over it, and fans instructions out to independent
//! logical sub-streams for screen updates, clipboard, a virtual
//! filesystem, and microphone audio.
//!
//! # Architecture
//!
//! - **One tunnel per session**: [`Session`] exclusively owns the
//!   connection; sub-handlers send through it, never around it.
//! - **Serial dispatch**: instructions apply strictly in arrival order on
//!   one event loop; there is no locking because there is no parallel
//!   mutation.
//! - **Delegated presentation**: pixels, the local clipboard, and audio
//!   capture live behind collaborator traits supplied by the host.
//! - **Closed error taxonomy**: every failure classifies into a stable
//!   kind the host can translate and display.
//!
//! # Quick Start
//!
//! ```no_run
//! use remote_display_client::{Session, SessionOptions, Result};
//!
//! #[tokio::main]
//! async fn main() -> Result<()> {
//!     let options = SessionOptions::builder()
//!         .gateway_url("wss://gateway.example/ws/connect?token=...")
//!         .dimensions(1280, 960)
//!         .dpi(96)
//!         .build()?;
//!
//!     let (session, mut events) = Session::connect(options).await?;
//!
//!     // forward local input
//!     session.key(0xFF0D, true);
//!     session.key(0xFF0D, false);
//!
//!     // observe the session until it ends
//!     while let Some(event) = events.recv().await {
//!         println!("{event:?}");
//!     }
//!     Ok(())
//! }
//! ```
//!
//! # Modules
//!
//! | Module | Description |
//! |--------|-------------|
//! | [`capability`] | media capability probing and connect parameters |
//! | [`error`] | error types and [`Result`] alias |
//! | [`identifiers`] | type-safe index and identifier wrappers |
//! | [`input`] | local input translation with scale correction |
//! | [`protocol`] | instruction framing, decoding, status taxonomy |
//! | [`session`] | session controller, dispatcher, gateway events |
//! | [`streams`] | clipboard, filesystem, and audio sub-streams |
//! | [`transport`] | the WebSocket tunnel |

// ============================================================================
// Modules
// ============================================================================

/// Media capability probing and connect parameters.
pub mod capability;

/// Error types and result aliases.
///
/// All fallible operations return [`Result<T>`] which uses [`Error`].
pub mod error;

/// Type-safe identifiers for streams, objects, and connections.
pub mod identifiers;

/// Local input translation.
pub mod input;

/// Wire protocol: framing, decoding, status classification.
pub mod protocol;

/// Session orchestration and host-facing API.
pub mod session;

/// Logical streams multiplexed over the tunnel.
pub mod streams;

/// WebSocket transport layer.
pub mod transport;

// ============================================================================
// Re-exports
// ============================================================================

// Session types
pub use session::{
    DisplaySurface, GatewayEvent, Lifecycle, NullDisplaySurface, Session, SessionEvent,
    SessionHandle, SessionOptions, SessionOptionsBuilder, SessionParticipant, SessionState,
};

// Capability types
pub use capability::{CapabilitySet, DefaultMediaSupport, MediaSupport};

// Error types
pub use error::{Error, Result};

// Identifier types
pub use identifiers::{ConnectionId, ObjectIndex, StreamIndex};

// Input types
pub use input::{InputTranslator, PointerButton};

// Protocol types
pub use protocol::{
    DisconnectKind, ErrorRecord, Instruction, InstructionDecoder, InstructionKind, Locale,
    MessageOrder,
};

// Stream types
pub use streams::{
    AudioRecorderFactory, ClipboardAccess, DownloadOffer, EntryKind, NoRecorder, NoopClipboard,
    VirtualFileEntry,
};
