//! Wire protocol: instruction framing, decoding, and status classification.
//!
//! # Protocol Overview
//!
//! | Piece | Purpose |
//! |-------|---------|
//! | [`Instruction`] | opcode + ordered string args, the wire unit |
//! | [`InstructionDecoder`] | fragmentation-tolerant inbound decoder |
//! | [`InstructionKind`] | closed classification for dispatch |
//! | [`status`] | status codes and error taxonomy |

// ============================================================================
// Submodules
// ============================================================================

/// Incremental frame decoder.
pub mod decoder;

/// Instruction value type and encoding.
pub mod instruction;

/// Opcode constants and classification.
pub mod opcode;

/// Status codes, disconnect taxonomy, message composition.
pub mod status;

// ============================================================================
// Re-exports
// ============================================================================

pub use decoder::InstructionDecoder;
pub use instruction::Instruction;
pub use opcode::InstructionKind;
pub use status::{DisconnectKind, ErrorRecord, Locale, MessageOrder, compose_message};
