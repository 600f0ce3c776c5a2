//! Opcode constants and closed instruction classification.
//!
//! Every inbound instruction is classified into an [`InstructionKind`]
//! before dispatch. The classification is a closed enum with an explicit
//! [`InstructionKind::Unknown`] variant: unrecognized opcodes are ignored,
//! not fatal, so newer gateways can speak to older clients.

// ============================================================================
// Streaming opcodes
// ============================================================================

/// Flow-control acknowledgement for a stream chunk.
pub const ACK: &str = "ack";
/// Base64 payload chunk on a stream.
pub const BLOB: &str = "blob";
/// End of a stream.
pub const END: &str = "end";
/// Clipboard stream open.
pub const CLIPBOARD: &str = "clipboard";
/// Inbound file offer on a stream.
pub const FILE: &str = "file";
/// Outbound audio stream open.
pub const AUDIO: &str = "audio";
/// Generic named pipe stream.
pub const PIPE: &str = "pipe";

// ============================================================================
// Filesystem object opcodes
// ============================================================================

/// Filesystem object announcement.
pub const FILESYSTEM: &str = "filesystem";
/// Response stream for an object request.
pub const BODY: &str = "body";
/// Request the contents of an object path.
pub const GET: &str = "get";
/// Open an outbound stream writing to an object path.
pub const PUT: &str = "put";
/// Object removed by the remote side.
pub const UNDEFINE: &str = "undefine";

// ============================================================================
// Control opcodes
// ============================================================================

/// Connection identifier assignment, first instruction after open.
pub const READY: &str = "ready";
/// Display synchronization barrier; the client echoes the timestamp.
pub const SYNC: &str = "sync";
/// Keepalive, carries nothing.
pub const NOP: &str = "nop";
/// Session end, either direction.
pub const DISCONNECT: &str = "disconnect";
/// Fatal status from the remote side: (message, code).
pub const ERROR: &str = "error";

// ============================================================================
// Input opcodes (client → gateway)
// ============================================================================

/// Keyboard event: (keysym, pressed).
pub const KEY: &str = "key";
/// Pointer event: (x, y, button mask).
pub const MOUSE: &str = "mouse";
/// Touch event: (id, x, y, x-radius, y-radius, angle, force).
pub const TOUCH: &str = "touch";
/// Viewport size request: (width, height).
pub const SIZE: &str = "size";

// ============================================================================
// Display opcodes (gateway → client)
// ============================================================================

/// Image draw onto a layer.
pub const IMG: &str = "img";
/// Hardware cursor update.
pub const CURSOR: &str = "cursor";
/// Remote display name.
pub const NAME: &str = "name";

// ============================================================================
// Gateway extension opcode
// ============================================================================

/// Gateway-defined out-of-band event: (event name, JSON payload).
pub const GATEWAY_EVENT: &str = "jms_event";

// ============================================================================
// InstructionKind
// ============================================================================

/// Closed classification of inbound instructions.
///
/// One dispatch target per variant; [`InstructionKind::Display`] covers
/// every drawing opcode delegated wholesale to the display surface.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InstructionKind {
    /// `ready`: connection identifier assignment.
    Ready,
    /// `sync`: display barrier requiring an echoed reply.
    Sync,
    /// `nop`: keepalive, no action.
    Nop,
    /// `disconnect`: orderly session end from the remote side.
    Disconnect,
    /// `error`: fatal classified status.
    Error,
    /// `blob`: stream payload chunk.
    Blob,
    /// `end`: stream completion.
    End,
    /// `ack`: stream flow-control acknowledgement.
    Ack,
    /// `clipboard`: remote clipboard stream open.
    Clipboard,
    /// `file`: inbound file offer.
    File,
    /// `filesystem`: filesystem object announcement.
    Filesystem,
    /// `body`: object request response stream.
    Body,
    /// `undefine`: filesystem object removal.
    Undefine,
    /// `audio`: audio stream open from the remote side.
    Audio,
    /// Drawing and display-state opcodes, forwarded to the surface.
    Display,
    /// Gateway-defined out-of-band event.
    GatewayEvent,
    /// Anything else: ignored for forward compatibility.
    Unknown,
}

impl InstructionKind {
    /// Classifies an opcode.
    #[must_use]
    pub fn classify(opcode: &str) -> Self {
        match opcode {
            READY => Self::Ready,
            SYNC => Self::Sync,
            NOP => Self::Nop,
            DISCONNECT => Self::Disconnect,
            ERROR => Self::Error,
            BLOB => Self::Blob,
            END => Self::End,
            ACK => Self::Ack,
            CLIPBOARD => Self::Clipboard,
            FILE => Self::File,
            FILESYSTEM => Self::Filesystem,
            BODY => Self::Body,
            UNDEFINE => Self::Undefine,
            AUDIO => Self::Audio,
            GATEWAY_EVENT => Self::GatewayEvent,
            SIZE | IMG | CURSOR | NAME => Self::Display,
            _ => Self::Unknown,
        }
    }
}

// ============================================================================
// Tests
// ============================================================================
