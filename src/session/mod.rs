//! Session orchestration.
//!
//! [`Session`] composes the tunnel, the instruction dispatcher, and the
//! stream sub-handlers into one lifecycle-managed remote-display session.
//! The host observes session state through a watch channel and receives
//! notifications through a typed event stream; pixels, clipboard, and
//! audio hardware stay behind collaborator traits.
//!
//! | Module | Description |
//! |--------|-------------|
//! | [`controller`] | lifecycle state machine and command loop |
//! | [`dispatcher`] | opcode-routed instruction dispatch |
//! | [`events`] | gateway out-of-band event payloads |

// ============================================================================
// Submodules
// ============================================================================

/// Session controller and host-facing handle.
pub mod controller;

/// Instruction dispatch to sub-handlers.
pub mod dispatcher;

/// Gateway out-of-band events.
pub mod events;

// ============================================================================
// Imports
// ============================================================================

use std::sync::Arc;

use serde_json::Value;
use url::Url;

use crate::capability::{CapabilitySet, DefaultMediaSupport, MediaSupport};
use crate::error::{Error, Result};
use crate::identifiers::ConnectionId;
use crate::protocol::status::{ErrorRecord, Locale};
use crate::protocol::Instruction;
use crate::streams::{
    AudioRecorderFactory, ClipboardAccess, DownloadOffer, NoRecorder, NoopClipboard,
};

use events::Participant;

// ============================================================================
// Re-exports
// ============================================================================

pub use controller::{Session, SessionHandle};
pub use events::{GatewayEvent, Participant as SessionParticipant};

// ============================================================================
// DisplaySurface
// ============================================================================

/// Host display surface the decoded graphics are delegated to.
///
/// The core never composites pixels; it forwards drawing instructions and
/// applies scale changes, and the surface renders however it likes.
pub trait DisplaySurface: Send + Sync {
    /// Handles one display instruction (drawing, cursor, size, sync).
    fn handle_instruction(&self, instruction: &Instruction);

    /// Applies a changed display scale.
    ///
    /// Called only when the scale actually changed.
    fn apply_scale(&self, scale: f64);

    /// Releases the surface when the session ends.
    fn release(&self);
}

/// Display surface that discards everything.
#[derive(Debug, Default, Clone, Copy)]
pub struct NullDisplaySurface;

impl DisplaySurface for NullDisplaySurface {
    fn handle_instruction(&self, _instruction: &Instruction) {}

    fn apply_scale(&self, _scale: f64) {}

    fn release(&self) {}
}

// ============================================================================
// Lifecycle
// ============================================================================

/// Session lifecycle states.
///
/// Transitions run strictly forward; `Disconnected` is terminal. A new
/// session must be constructed to reconnect.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Lifecycle {
    /// Constructed, not yet connecting.
    #[default]
    Idle,
    /// Tunnel connection in progress.
    Connecting,
    /// Tunnel open, waiting for the gateway's identifier assignment.
    WaitingForServer,
    /// Fully connected and interactive.
    Connected,
    /// Local disconnect requested, teardown in progress.
    Disconnecting,
    /// Terminal: the session is over.
    Disconnected,
}

// ============================================================================
// SessionState
// ============================================================================

/// Observable session state snapshot.
///
/// Owned by the controller and published through a watch channel whenever
/// it changes; sub-handlers mutate it through a borrowed view during
/// dispatch.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct SessionState {
    /// Current lifecycle state.
    pub lifecycle: Lifecycle,
    /// Gateway-assigned connection identifier, set once.
    pub connection_id: Option<ConnectionId>,
    /// Negotiated capability set.
    pub capabilities: CapabilitySet,
    /// Remote display width in pixels.
    pub display_width: u32,
    /// Remote display height in pixels.
    pub display_height: u32,
    /// Local viewport width in pixels.
    pub viewport_width: u32,
    /// Local viewport height in pixels.
    pub viewport_height: u32,
    /// Current display scale factor.
    pub scale: f64,
    /// Online participants of the shared session.
    pub participants: Vec<Participant>,
    /// `true` while a controlling user has paused the session.
    pub paused: bool,
    /// Pending permission-expiry warning payload, `None` when clear.
    pub permission_warning: Option<Value>,
}

// ============================================================================
// SessionEvent
// ============================================================================

/// Notifications surfaced to the host application.
#[derive(Debug, Clone, PartialEq)]
pub enum SessionEvent {
    /// The session reached `Connected`.
    Connected,
    /// The session ended; a classified record accompanies failures.
    Disconnected(Option<ErrorRecord>),
    /// The remote side attached a virtual filesystem.
    FilesystemAttached,
    /// An out-of-band download is ready to fetch.
    DownloadReady(DownloadOffer),
    /// Session metadata snapshot from the gateway.
    SessionMeta(Value),
    /// The session was paused by a controlling user.
    Paused(Value),
    /// The session was resumed.
    Resumed(Value),
    /// A participant joined the shared session.
    ParticipantJoined(Participant),
    /// A participant left the shared session.
    ParticipantLeft(Participant),
    /// Permission-expiry warning; recurs until cleared.
    PermissionExpiring(Value),
    /// Permission restored.
    PermissionRestored,
}

// ============================================================================
// SessionOptions
// ============================================================================

/// Validated session configuration.
///
/// Built through [`SessionOptions::builder`].
pub struct SessionOptions {
    /// Gateway WebSocket URL, including any auth token parameters.
    pub gateway_url: Url,
    /// Base URL for out-of-band HTTP transfers.
    pub transfer_base: Url,
    /// Requested display width.
    pub width: u32,
    /// Requested display height.
    pub height: u32,
    /// Requested display DPI.
    pub dpi: u32,
    /// Locale used for error-message composition.
    pub locale: Locale,
    /// Platform media-support query.
    pub media: Arc<dyn MediaSupport>,
    /// Display surface collaborator.
    pub display: Arc<dyn DisplaySurface>,
    /// Local clipboard collaborator.
    pub clipboard: Arc<dyn ClipboardAccess>,
    /// Local audio capture collaborator.
    pub recorder: Arc<dyn AudioRecorderFactory>,
}

impl std::fmt::Debug for SessionOptions {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionOptions")
            .field("gateway_url", &self.gateway_url)
            .field("transfer_base", &self.transfer_base)
            .field("width", &self.width)
            .field("height", &self.height)
            .field("dpi", &self.dpi)
            .field("locale", &self.locale)
            .finish_non_exhaustive()
    }
}

impl SessionOptions {
    /// Starts building session options.
    #[must_use]
    pub fn builder() -> SessionOptionsBuilder {
        SessionOptionsBuilder::default()
    }
}

/// Builder for [`SessionOptions`].
#[derive(Default)]
pub struct SessionOptionsBuilder {
    gateway_url: Option<String>,
    transfer_base: Option<String>,
    width: Option<u32>,
    height: Option<u32>,
    dpi: Option<u32>,
    locale: Option<Locale>,
    media: Option<Arc<dyn MediaSupport>>,
    display: Option<Arc<dyn DisplaySurface>>,
    clipboard: Option<Arc<dyn ClipboardAccess>>,
    recorder: Option<Arc<dyn AudioRecorderFactory>>,
}

impl SessionOptionsBuilder {
    /// Sets the gateway WebSocket URL (required, `ws://` or `wss://`).
    #[must_use]
    pub fn gateway_url(mut self, url: impl Into<String>) -> Self {
        self.gateway_url = Some(url.into());
        self
    }

    /// Sets the out-of-band transfer base URL.
    ///
    /// Defaults to the gateway host with an `https` scheme and `/api`
    /// path; hosts with a different API layout set it explicitly.
    #[must_use]
    pub fn transfer_base(mut self, url: impl Into<String>) -> Self {
        self.transfer_base = Some(url.into());
        self
    }

    /// Sets the requested display dimensions.
    #[must_use]
    pub fn dimensions(mut self, width: u32, height: u32) -> Self {
        self.width = Some(width);
        self.height = Some(height);
        self
    }

    /// Sets the requested display DPI.
    #[must_use]
    pub fn dpi(mut self, dpi: u32) -> Self {
        self.dpi = Some(dpi);
        self
    }

    /// Sets the locale for error-message composition.
    #[must_use]
    pub fn locale(mut self, locale: Locale) -> Self {
        self.locale = Some(locale);
        self
    }

    /// Sets the platform media-support query.
    #[must_use]
    pub fn media(mut self, media: Arc<dyn MediaSupport>) -> Self {
        self.media = Some(media);
        self
    }

    /// Sets the display surface collaborator.
    #[must_use]
    pub fn display(mut self, display: Arc<dyn DisplaySurface>) -> Self {
        self.display = Some(display);
        self
    }

    /// Sets the local clipboard collaborator.
    #[must_use]
    pub fn clipboard(mut self, clipboard: Arc<dyn ClipboardAccess>) -> Self {
        self.clipboard = Some(clipboard);
        self
    }

    /// Sets the local audio capture collaborator.
    #[must_use]
    pub fn recorder(mut self, recorder: Arc<dyn AudioRecorderFactory>) -> Self {
        self.recorder = Some(recorder);
        self
    }

    /// Validates and builds the options.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] when the gateway URL is missing or not a
    /// WebSocket URL, when dimensions are zero, or when the transfer base
    /// cannot be derived.
    pub fn build(self) -> Result<SessionOptions> {
        let raw = self
            .gateway_url
            .ok_or_else(|| Error::config("gateway URL is required"))?;
        let gateway_url =
            Url::parse(&raw).map_err(|e| Error::config(format!("gateway URL: {e}")))?;
        if !matches!(gateway_url.scheme(), "ws" | "wss") {
            return Err(Error::config(format!(
                "gateway URL must be ws:// or wss://, got {}",
                gateway_url.scheme()
            )));
        }

        let width = self.width.unwrap_or(1024);
        let height = self.height.unwrap_or(768);
        if width == 0 || height == 0 {
            return Err(Error::config("display dimensions must be non-zero"));
        }

        let transfer_base = match self.transfer_base {
            Some(raw) => {
                Url::parse(&raw).map_err(|e| Error::config(format!("transfer base: {e}")))?
            }
            None => derive_transfer_base(&gateway_url)?,
        };

        Ok(SessionOptions {
            gateway_url,
            transfer_base,
            width,
            height,
            dpi: self.dpi.unwrap_or(96),
            locale: self.locale.unwrap_or_default(),
            media: self.media.unwrap_or_else(|| Arc::new(DefaultMediaSupport)),
            display: self
                .display
                .unwrap_or_else(|| Arc::new(NullDisplaySurface)),
            clipboard: self
                .clipboard
                .unwrap_or_else(|| Arc::new(NoopClipboard)),
            recorder: self.recorder.unwrap_or_else(|| Arc::new(NoRecorder)),
        })
    }
}

/// Derives the HTTP transfer base from the gateway WebSocket URL.
fn derive_transfer_base(gateway_url: &Url) -> Result<Url> {
    let scheme = if gateway_url.scheme() == "wss" {
        "https"
    } else {
        "http"
    };
    let host = gateway_url
        .host_str()
        .ok_or_else(|| Error::config("gateway URL has no host"))?;
    let authority = match gateway_url.port() {
        Some(port) => format!("{host}:{port}"),
        None => host.to_string(),
    };
    Url::parse(&format!("{scheme}://{authority}/api"))
        .map_err(|e| Error::config(format!("derived transfer base: {e}")))
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builder_requires_gateway_url() {
        let err = SessionOptions::builder().build().expect_err("missing url");
        assert!(matches!(err, Error::Config { .. }));
    }

    #[test]
    fn test_builder_rejects_http_scheme() {
        let err = SessionOptions::builder()
            .gateway_url("https://gateway.example/connect")
            .build()
            .expect_err("not a websocket url");
        assert!(matches!(err, Error::Config { .. }));
    }

    #[test]
    fn test_builder_rejects_zero_dimensions() {
        let err = SessionOptions::builder()
            .gateway_url("wss://gateway.example/connect")
            .dimensions(0, 768)
            .build()
            .expect_err("zero width");
        assert!(matches!(err, Error::Config { .. }));
    }

    #[test]
    fn test_transfer_base_derived_from_gateway() {
        let options = SessionOptions::builder()
            .gateway_url("wss://gateway.example:8443/ws/connect?token=t")
            .build()
            .expect("options");
        assert_eq!(
            options.transfer_base.as_str(),
            "https://gateway.example:8443/api"
        );
    }

    #[test]
    fn test_transfer_base_explicit_wins() {
        let options = SessionOptions::builder()
            .gateway_url("ws://gateway.example/ws/connect")
            .transfer_base("http://gateway.example/lion/api")
            .build()
            .expect("options");
        assert_eq!(
            options.transfer_base.as_str(),
            "http://gateway.example/lion/api"
        );
    }

    #[test]
    fn test_lifecycle_default_is_idle() {
        assert_eq!(Lifecycle::default(), Lifecycle::Idle);
        assert_eq!(SessionState::default().lifecycle, Lifecycle::Idle);
    }
}
