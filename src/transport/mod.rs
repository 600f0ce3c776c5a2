//! Transport layer: the WebSocket tunnel to the gateway.
//!
//! One session owns exactly one tunnel. The tunnel frames outgoing
//! instructions, decodes inbound frames (tolerating arbitrary
//! fragmentation), enforces the receive timeout, and surfaces everything
//! as a typed event stream.

// ============================================================================
// Submodules
// ============================================================================

/// Tunnel connection and event loop.
pub mod tunnel;

// ============================================================================
// Re-exports
// ============================================================================

pub use tunnel::{TransportTunnel, TunnelEvent, TunnelHandle};
