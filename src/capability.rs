//! Client capability negotiation.
//!
//! Before connecting, the client probes which media formats it can
//! actually render and advertises only those, so the remote side never
//! sends an encoding the display surface cannot decode.
//!
//! Image support is probed by decoding embedded 1×1 test images; a format
//! counts as supported only when the decode succeeds with the expected
//! dimensions. The probe runs once per process behind an initialization
//! guard. Audio and video types come from a platform query through
//! [`MediaSupport`].

// ============================================================================
// Imports
// ============================================================================

use std::sync::OnceLock;

use base64::Engine as _;
use base64::engine::general_purpose::STANDARD as BASE64;
use tracing::debug;
use url::Url;

// ============================================================================
// Test images
// ============================================================================

/// Test JPEG image, 1×1, encoded as base64.
const TEST_JPEG: &str = "/9j/4AAQSkZJRgABAQEASABIAAD/2wBDAAMCAgMCAgMDAwMEAwMEBQgFBQQEBQoH\
BwYIDAoMDAsKCwsNDhIQDQ4RDgsLEBYQERMUFRUVDA8XGBYUGBIUFRT/2wBDAQME\
BAUEBQkFBQkUDQsNFBQUFBQUFBQUFBQUFBQUFBQUFBQUFBQUFBQUFBQUFBQUFBQU\
FBQUFBQUFBQUFBQUFBT/wAARCAABAAEDAREAAhEBAxEB/8QAFAABAAAAAAAAAAA\
AAAAAAAAACf/EABQQAQAAAAAAAAAAAAAAAAAAAAD/xAAUAQEAAAAAAAAAAAAAAA\
AAAAAA/8QAFBEBAAAAAAAAAAAAAAAAAAAAAP/aAAwDAQACEQMRAD8AVMH/2Q==";

/// Test PNG image, 1×1, encoded as base64.
const TEST_PNG: &str = "iVBORw0KGgoAAAANSUhEUgAAAAEAAAABAQMAAAAl21bKAAAAA1BMVEX///+nxBvI\
AAAACklEQVQI12NgAAAAAgAB4iG8MwAAAABJRU5ErkJggg==";

/// Test WebP image, 1×1, encoded as base64.
const TEST_WEBP: &str = "UklGRhoAAABXRUJQVlA4TA0AAAAvAAAAEAcQERGIiP4HAA==";

/// Probed image formats and their test payloads.
const IMAGE_PROBES: &[(&str, &str)] = &[
    ("image/jpeg", TEST_JPEG),
    ("image/png", TEST_PNG),
    ("image/webp", TEST_WEBP),
];

// ============================================================================
// MediaSupport
// ============================================================================

/// Platform query for audio/video decode support.
///
/// Image support is probed directly; audio and video availability depends
/// on the host's playback stack, so the host injects it here.
pub trait MediaSupport: Send + Sync {
    /// Supported audio mime types, in preference order.
    fn audio_types(&self) -> Vec<String>;

    /// Supported video mime types, in preference order.
    fn video_types(&self) -> Vec<String>;
}

/// Default platform query: raw PCM audio, no video.
#[derive(Debug, Default, Clone, Copy)]
pub struct DefaultMediaSupport;

impl MediaSupport for DefaultMediaSupport {
    fn audio_types(&self) -> Vec<String> {
        vec!["audio/L8".to_string(), "audio/L16".to_string()]
    }

    fn video_types(&self) -> Vec<String> {
        Vec::new()
    }
}

// ============================================================================
// Image probe
// ============================================================================

static SUPPORTED_IMAGES: OnceLock<Vec<String>> = OnceLock::new();

/// Returns the image mime types this process can decode.
///
/// Memoized after the first call.
pub fn supported_images() -> &'static [String] {
    SUPPORTED_IMAGES.get_or_init(|| {
        let mut supported = Vec::new();
        for (mimetype, payload) in IMAGE_PROBES.iter().copied() {
            if probe_image(payload) {
                supported.push(mimetype.to_string());
            } else {
                debug!(mimetype, "image format not supported");
            }
        }
        supported
    })
}

/// Decodes one test payload; supported means a clean 1×1 decode.
fn probe_image(payload: &str) -> bool {
    let Ok(bytes) = BASE64.decode(payload) else {
        return false;
    };
    match image::load_from_memory(&bytes) {
        Ok(img) => img.width() == 1 && img.height() == 1,
        Err(_) => false,
    }
}

// ============================================================================
// CapabilitySet
// ============================================================================

/// Mapping from media category to supported mime types.
///
/// Computed once before connecting; immutable afterward.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct CapabilitySet {
    /// Supported image mime types.
    pub images: Vec<String>,
    /// Supported audio mime types.
    pub audios: Vec<String>,
    /// Supported video mime types.
    pub videos: Vec<String>,
}

impl CapabilitySet {
    /// Runs capability negotiation against the platform query.
    #[must_use]
    pub fn negotiate(media: &dyn MediaSupport) -> Self {
        Self {
            images: supported_images().to_vec(),
            audios: media.audio_types(),
            videos: media.video_types(),
        }
    }

    /// Appends the negotiated capabilities and requested geometry to a
    /// connect URL: one parameter per mime type plus width/height/DPI.
    pub fn apply_to(&self, url: &mut Url, width: u32, height: u32, dpi: u32) {
        let mut pairs = url.query_pairs_mut();
        for mimetype in &self.images {
            pairs.append_pair("GUAC_IMAGE", mimetype);
        }
        for mimetype in &self.audios {
            pairs.append_pair("GUAC_AUDIO", mimetype);
        }
        for mimetype in &self.videos {
            pairs.append_pair("GUAC_VIDEO", mimetype);
        }
        pairs.append_pair("GUAC_WIDTH", &width.to_string());
        pairs.append_pair("GUAC_HEIGHT", &height.to_string());
        pairs.append_pair("GUAC_DPI", &dpi.to_string());
    }
}

// ============================================================================
// Tests
// ============================================================================
