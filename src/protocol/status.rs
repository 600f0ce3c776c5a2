//! Status classification for session-ending errors.
//!
//! The remote display subsystem reports numeric status codes; the session
//! gateway adds its own application codes on top. Both funnel through
//! [`DisconnectKind::classify`] into one closed taxonomy the host can
//! translate and display. When no numeric code matches, a fixed dictionary
//! of known upstream disconnect phrases is pattern-matched against the raw
//! message. Unrecognized input passes through as [`DisconnectKind::Unknown`]
//! carrying the raw text, never silently dropped.

// ============================================================================
// Imports
// ============================================================================

use std::sync::LazyLock;

use regex::Regex;

// ============================================================================
// DisconnectKind
// ============================================================================

/// Closed taxonomy of session-ending error kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DisconnectKind {
    // ------------------------------------------------------------------
    // Remote display subsystem statuses
    // ------------------------------------------------------------------
    /// The requested operation is unsupported.
    Unsupported,
    /// Internal failure in the remote display subsystem.
    ServerError,
    /// The remote display subsystem is too busy.
    ServerBusy,
    /// The upstream desktop server is not responding.
    UpstreamTimeout,
    /// The upstream desktop server reported an error.
    UpstreamError,
    /// The requested resource does not exist.
    ResourceNotFound,
    /// The requested resource is already in use.
    ResourceConflict,
    /// The requested resource is now closed.
    ResourceClosed,
    /// The upstream desktop server does not appear to exist.
    UpstreamNotFound,
    /// The upstream desktop server refuses to service the request.
    UpstreamUnavailable,
    /// The session ended because it conflicted with another session.
    SessionConflict,
    /// The session ended because it appeared to be inactive.
    SessionTimeout,
    /// The session was forcibly terminated.
    SessionClosed,
    /// Bad parameters in the client request.
    ClientBadRequest,
    /// The user is not yet authorized.
    ClientUnauthorized,
    /// The operation is forbidden regardless of authorization.
    ClientForbidden,
    /// The client took too long to respond.
    ClientTimeout,
    /// The client sent too much data.
    ClientOverrun,
    /// The client sent data of an unexpected type.
    ClientBadType,
    /// The client is using too many resources.
    ClientTooMany,

    // ------------------------------------------------------------------
    // Gateway application statuses
    // ------------------------------------------------------------------
    /// The gateway has no record of the requested session.
    NoSession,
    /// Gateway-side user authentication failed.
    AuthFailed,
    /// Bad connect parameters rejected by the gateway.
    BadParams,
    /// The gateway ended the session for inactivity.
    IdleTimeout,
    /// The user's permission for this session expired.
    PermissionExpired,
    /// An administrator terminated the session.
    TerminatedByAdmin,
    /// A gateway upstream API call failed.
    ApiFailed,
    /// The gateway itself failed.
    GatewayFailed,
    /// The gateway's display subsystem connection failed.
    GatewayServerError,

    // ------------------------------------------------------------------
    // Client-side transport statuses
    // ------------------------------------------------------------------
    /// The tunnel could not be established or dropped unexpectedly.
    ConnectionFailed,
    /// The receive timeout fired: the gateway went silent.
    ConnectionTimeout,
    /// A malformed inbound frame broke the protocol.
    ProtocolViolation,

    /// Unrecognized status; the raw text travels alongside.
    Unknown,
}

/// Message-dictionary entry: pattern of a known upstream disconnect phrase.
struct MessagePattern {
    pattern: &'static str,
    kind: DisconnectKind,
}

/// Known literal disconnect reasons emitted by upstream desktop servers.
static MESSAGE_DICTIONARY: &[MessagePattern] = &[
    MessagePattern {
        pattern: r"(?i)disconnected by (the )?administrator",
        kind: DisconnectKind::TerminatedByAdmin,
    },
    MessagePattern {
        pattern: r"(?i)(replaced|logged off) by another (connection|session)",
        kind: DisconnectKind::SessionConflict,
    },
    MessagePattern {
        pattern: r"(?i)idle ?time ?out",
        kind: DisconnectKind::SessionTimeout,
    },
    MessagePattern {
        pattern: r"(?i)(access denied|authentication fail)",
        kind: DisconnectKind::ClientUnauthorized,
    },
    MessagePattern {
        pattern: r"(?i)server (is )?(currently )?unreachable",
        kind: DisconnectKind::UpstreamNotFound,
    },
    MessagePattern {
        pattern: r"(?i)connection refused",
        kind: DisconnectKind::UpstreamUnavailable,
    },
    MessagePattern {
        pattern: r"(?i)forcibly (closed|terminated)",
        kind: DisconnectKind::SessionClosed,
    },
];

static COMPILED_DICTIONARY: LazyLock<Vec<(Regex, DisconnectKind)>> = LazyLock::new(|| {
    MESSAGE_DICTIONARY
        .iter()
        .map(|entry| {
            let re = Regex::new(entry.pattern).expect("static dictionary pattern");
            (re, entry.kind)
        })
        .collect()
});

impl DisconnectKind {
    /// Maps a numeric status code to its kind.
    ///
    /// Returns `None` for unrecognized codes so the message dictionary can
    /// take over.
    #[must_use]
    pub fn from_code(code: u32) -> Option<Self> {
        let kind = match code {
            0x0100 => Self::Unsupported,
            0x0200 => Self::ServerError,
            0x0201 => Self::ServerBusy,
            0x0202 => Self::UpstreamTimeout,
            0x0203 => Self::UpstreamError,
            0x0204 => Self::ResourceNotFound,
            0x0205 => Self::ResourceConflict,
            0x0206 => Self::ResourceClosed,
            0x0207 => Self::UpstreamNotFound,
            0x0208 => Self::UpstreamUnavailable,
            0x0209 => Self::SessionConflict,
            0x020A => Self::SessionTimeout,
            0x020B => Self::SessionClosed,
            0x0300 => Self::ClientBadRequest,
            0x0301 => Self::ClientUnauthorized,
            0x0303 => Self::ClientForbidden,
            0x0308 => Self::ClientTimeout,
            0x030D => Self::ClientOverrun,
            0x030F => Self::ClientBadType,
            0x031D => Self::ClientTooMany,
            1000 => Self::NoSession,
            1001 => Self::AuthFailed,
            1002 => Self::BadParams,
            1003 => Self::IdleTimeout,
            1004 => Self::PermissionExpired,
            1005 => Self::TerminatedByAdmin,
            1006 => Self::ApiFailed,
            1007 => Self::GatewayFailed,
            1008 => Self::GatewayServerError,
            _ => return None,
        };
        Some(kind)
    }

    /// Matches the literal upstream message against the fixed dictionary.
    #[must_use]
    pub fn from_message(message: &str) -> Option<Self> {
        COMPILED_DICTIONARY
            .iter()
            .find(|(re, _)| re.is_match(message))
            .map(|(_, kind)| *kind)
    }

    /// Classifies a status: numeric code first, message dictionary second,
    /// [`DisconnectKind::Unknown`] last.
    #[must_use]
    pub fn classify(code: u32, message: &str) -> Self {
        Self::from_code(code)
            .or_else(|| Self::from_message(message))
            .unwrap_or(Self::Unknown)
    }
}

// ============================================================================
// Locale and message composition
// ============================================================================

/// Display locales the client composes error messages for.
///
/// Translation itself lives with the host; the core only decides the
/// ordering of raw and translated text.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Locale {
    /// English and other Latin-script locales.
    #[default]
    English,
    /// Simplified Chinese.
    SimplifiedChinese,
    /// Traditional Chinese.
    TraditionalChinese,
}

/// Ordering of raw upstream text relative to the translated text.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageOrder {
    /// Raw upstream text first, translation after.
    RawFirst,
    /// Translation first, raw upstream text after.
    TranslatedFirst,
}

impl MessageOrder {
    /// Deterministic ordering policy per locale.
    ///
    /// CJK locales read the translation first with the raw upstream text
    /// appended; other locales lead with the raw text.
    #[must_use]
    pub fn for_locale(locale: Locale) -> Self {
        match locale {
            Locale::English => Self::RawFirst,
            Locale::SimplifiedChinese | Locale::TraditionalChinese => Self::TranslatedFirst,
        }
    }
}

/// Composes the human-presentable message for one error record.
///
/// Both orderings are explicit policy: the host passes the translated text
/// for the classified kind, and the raw upstream text is always retained.
#[must_use]
pub fn compose_message(raw: &str, translated: &str, order: MessageOrder) -> String {
    if raw.is_empty() {
        return translated.to_string();
    }
    if translated.is_empty() {
        return raw.to_string();
    }
    match order {
        MessageOrder::RawFirst => format!("{raw} {translated}"),
        MessageOrder::TranslatedFirst => format!("{translated} {raw}"),
    }
}

// ============================================================================
// ErrorRecord
// ============================================================================

/// One classified transport/protocol error event.
///
/// Produced on every error notification; never persisted beyond the
/// current notification.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ErrorRecord {
    /// Numeric status code from the wire (0 when none was carried).
    pub code: u32,
    /// Raw upstream message.
    pub message: String,
    /// Classified kind.
    pub kind: DisconnectKind,
}

impl ErrorRecord {
    /// Classifies a raw status into a record.
    #[must_use]
    pub fn classify(code: u32, message: impl Into<String>) -> Self {
        let message = message.into();
        let kind = DisconnectKind::classify(code, &message);
        Self {
            code,
            message,
            kind,
        }
    }

    /// Builds the record for a fatal client-side error.
    ///
    /// Server errors keep their wire code; transport failures classify by
    /// failure shape and carry code zero.
    #[must_use]
    pub fn from_error(error: &crate::error::Error) -> Self {
        use crate::error::Error;
        match error {
            Error::Server {
                code,
                message,
                kind,
            } => Self {
                code: *code,
                message: message.clone(),
                kind: *kind,
            },
            Error::ReceiveTimeout { .. } => Self {
                code: 0,
                message: error.to_string(),
                kind: DisconnectKind::ConnectionTimeout,
            },
            Error::Protocol { .. } => Self {
                code: 0,
                message: error.to_string(),
                kind: DisconnectKind::ProtocolViolation,
            },
            Error::Connection { .. } | Error::ConnectionClosed | Error::WebSocket(_) => Self {
                code: 0,
                message: error.to_string(),
                kind: DisconnectKind::ConnectionFailed,
            },
            other => Self {
                code: 0,
                message: other.to_string(),
                kind: DisconnectKind::Unknown,
            },
        }
    }

    /// Composes the presentable message for `locale`.
    ///
    /// `translated` is the host-supplied translation for
    /// [`kind`](Self::kind).
    #[must_use]
    pub fn compose(&self, translated: &str, locale: Locale) -> String {
        compose_message(&self.message, translated, MessageOrder::for_locale(locale))
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display_codes() {
        assert_eq!(
            DisconnectKind::from_code(256),
            Some(DisconnectKind::Unsupported)
        );
        assert_eq!(
            DisconnectKind::from_code(514),
            Some(DisconnectKind::UpstreamTimeout)
        );
        assert_eq!(
            DisconnectKind::from_code(519),
            Some(DisconnectKind::UpstreamNotFound)
        );
        assert_eq!(
            DisconnectKind::from_code(521),
            Some(DisconnectKind::SessionConflict)
        );
        assert_eq!(
            DisconnectKind::from_code(769),
            Some(DisconnectKind::ClientUnauthorized)
        );
    }

    #[test]
    fn test_gateway_codes() {
        assert_eq!(
            DisconnectKind::from_code(1003),
            Some(DisconnectKind::IdleTimeout)
        );
        assert_eq!(
            DisconnectKind::from_code(1004),
            Some(DisconnectKind::PermissionExpired)
        );
        assert_eq!(
            DisconnectKind::from_code(1005),
            Some(DisconnectKind::TerminatedByAdmin)
        );
        assert_eq!(
            DisconnectKind::from_code(1008),
            Some(DisconnectKind::GatewayServerError)
        );
    }

    #[test]
    fn test_unrecognized_code_falls_back_to_dictionary() {
        let kind = DisconnectKind::classify(42, "Session was replaced by another connection");
        assert_eq!(kind, DisconnectKind::SessionConflict);

        let kind = DisconnectKind::classify(42, "Disconnected by the administrator");
        assert_eq!(kind, DisconnectKind::TerminatedByAdmin);
    }

    #[test]
    fn test_unrecognized_everything_is_unknown_with_raw_text() {
        let record = ErrorRecord::classify(42, "qxz-9 fault");
        assert_eq!(record.kind, DisconnectKind::Unknown);
        assert_eq!(record.message, "qxz-9 fault");
    }

    #[test]
    fn test_admin_termination_composition_both_orders() {
        let record = ErrorRecord::classify(1005, "X");
        assert_eq!(record.kind, DisconnectKind::TerminatedByAdmin);

        // raw leads for English, trails for Chinese: explicit policy
        assert_eq!(
            record.compose("Terminated by administrator", Locale::English),
            "X Terminated by administrator"
        );
        assert_eq!(
            record.compose("管理员终止会话", Locale::SimplifiedChinese),
            "管理员终止会话 X"
        );
    }

    #[test]
    fn test_composition_with_empty_parts() {
        assert_eq!(
            compose_message("", "translated", MessageOrder::RawFirst),
            "translated"
        );
        assert_eq!(
            compose_message("raw", "", MessageOrder::TranslatedFirst),
            "raw"
        );
    }

    #[test]
    fn test_from_error_covers_transport_failures() {
        use crate::error::Error;

        let record = ErrorRecord::from_error(&Error::receive_timeout(60_000));
        assert_eq!(record.kind, DisconnectKind::ConnectionTimeout);

        let record = ErrorRecord::from_error(&Error::protocol("bad length"));
        assert_eq!(record.kind, DisconnectKind::ProtocolViolation);

        let record = ErrorRecord::from_error(&Error::connection("refused"));
        assert_eq!(record.kind, DisconnectKind::ConnectionFailed);

        let record = ErrorRecord::from_error(&Error::server(1004, "expired"));
        assert_eq!(record.kind, DisconnectKind::PermissionExpired);
        assert_eq!(record.code, 1004);
    }

    #[test]
    fn test_order_policy_is_deterministic() {
        assert_eq!(
            MessageOrder::for_locale(Locale::English),
            MessageOrder::RawFirst
        );
        assert_eq!(
            MessageOrder::for_locale(Locale::SimplifiedChinese),
            MessageOrder::TranslatedFirst
        );
        assert_eq!(
            MessageOrder::for_locale(Locale::TraditionalChinese),
            MessageOrder::TranslatedFirst
        );
    }
}
