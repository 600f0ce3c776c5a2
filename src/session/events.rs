//! Gateway out-of-band events.
//!
//! The gateway multiplexes application-level notifications over one
//! extension opcode: session metadata, pause/resume, share-participant
//! changes, and permission-expiry warnings. Payloads are JSON; parsing is
//! lenient so an unknown or malformed event degrades to
//! [`GatewayEvent::Unknown`] instead of breaking the session.

// ============================================================================
// Imports
// ============================================================================

use serde::Deserialize;
use serde_json::Value;

// ============================================================================
// Event names
// ============================================================================

/// Session metadata snapshot.
pub const SESSION: &str = "session";
/// Session paused by a controlling user.
pub const SESSION_PAUSE: &str = "session_pause";
/// Session resumed.
pub const SESSION_RESUME: &str = "session_resume";
/// A participant joined the shared session.
pub const SHARE_JOIN: &str = "share_join";
/// A participant left the shared session.
pub const SHARE_EXIT: &str = "share_exit";
/// Full participant roster.
pub const SHARE_USERS: &str = "share_users";
/// The user's permission expired; recurring until cleared.
pub const PERM_EXPIRED: &str = "perm_expired";
/// The user's permission is valid again.
pub const PERM_VALID: &str = "perm_valid";

// ============================================================================
// Participant
// ============================================================================

/// One user attached to the shared session.
#[derive(Debug, Clone, PartialEq, Eq, Default, Deserialize)]
pub struct Participant {
    /// Stable user identifier.
    #[serde(default)]
    pub user_id: String,
    /// Display name.
    #[serde(default)]
    pub user: String,
    /// Join timestamp as reported by the gateway.
    #[serde(default)]
    pub created: String,
    /// Terminal the participant connected through.
    #[serde(default)]
    pub terminal_id: String,
    /// `true` for the session owner.
    #[serde(default)]
    pub primary: bool,
    /// `true` when the participant may send input.
    #[serde(default)]
    pub writable: bool,
}

// ============================================================================
// GatewayEvent
// ============================================================================

/// Parsed gateway notification.
#[derive(Debug, Clone, PartialEq)]
pub enum GatewayEvent {
    /// Session metadata snapshot.
    SessionMeta(Value),
    /// The session was paused; payload describes the acting user.
    Paused(Value),
    /// The session was resumed.
    Resumed(Value),
    /// A participant joined.
    ParticipantJoined(Participant),
    /// A participant left.
    ParticipantLeft(Participant),
    /// Full participant roster replacement.
    Participants(Vec<Participant>),
    /// Permission expired; the warning recurs until cleared.
    PermissionExpired(Value),
    /// Permission restored.
    PermissionRestored(Value),
    /// Unrecognized or malformed event, kept verbatim.
    Unknown {
        /// Event name as received.
        event: String,
        /// Raw payload as received.
        payload: String,
    },
}

impl GatewayEvent {
    /// Parses one gateway event.
    ///
    /// Unknown names and malformed payloads produce
    /// [`GatewayEvent::Unknown`]; the session never fails on a gateway
    /// notification.
    #[must_use]
    pub fn parse(event: &str, payload: &str) -> Self {
        let unknown = || Self::Unknown {
            event: event.to_string(),
            payload: payload.to_string(),
        };
        match event {
            SESSION => json_value(payload).map_or_else(unknown, Self::SessionMeta),
            SESSION_PAUSE => json_value(payload).map_or_else(unknown, Self::Paused),
            SESSION_RESUME => json_value(payload).map_or_else(unknown, Self::Resumed),
            SHARE_JOIN => serde_json::from_str(payload)
                .map_or_else(|_| unknown(), Self::ParticipantJoined),
            SHARE_EXIT => serde_json::from_str(payload)
                .map_or_else(|_| unknown(), Self::ParticipantLeft),
            SHARE_USERS => serde_json::from_str(payload)
                .map_or_else(|_| unknown(), Self::Participants),
            PERM_EXPIRED => json_value(payload).map_or_else(unknown, Self::PermissionExpired),
            PERM_VALID => json_value(payload).map_or_else(unknown, Self::PermissionRestored),
            _ => unknown(),
        }
    }
}

/// Parses a payload as any JSON value, treating empty as null.
fn json_value(payload: &str) -> Option<Value> {
    if payload.is_empty() {
        return Some(Value::Null);
    }
    serde_json::from_str(payload).ok()
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    use serde_json::json;

    #[test]
    fn test_parse_roster() {
        let payload = json!([
            {"user_id": "u1", "user": "alice", "primary": true, "writable": true},
            {"user_id": "u2", "user": "bob", "writable": false},
        ])
        .to_string();

        match GatewayEvent::parse(SHARE_USERS, &payload) {
            GatewayEvent::Participants(users) => {
                assert_eq!(users.len(), 2);
                assert_eq!(users[0].user, "alice");
                assert!(users[0].primary);
                assert!(!users[1].writable);
            }
            other => panic!("expected roster, got {other:?}"),
        }
    }

    #[test]
    fn test_parse_join_with_extra_fields() {
        let payload = json!({"user": "carol", "share_id": "s9"}).to_string();
        match GatewayEvent::parse(SHARE_JOIN, &payload) {
            GatewayEvent::ParticipantJoined(user) => assert_eq!(user.user, "carol"),
            other => panic!("expected join, got {other:?}"),
        }
    }

    #[test]
    fn test_parse_pause_and_permission() {
        assert!(matches!(
            GatewayEvent::parse(SESSION_PAUSE, r#"{"user":"root"}"#),
            GatewayEvent::Paused(_)
        ));
        assert!(matches!(
            GatewayEvent::parse(PERM_EXPIRED, ""),
            GatewayEvent::PermissionExpired(Value::Null)
        ));
        assert!(matches!(
            GatewayEvent::parse(PERM_VALID, "{}"),
            GatewayEvent::PermissionRestored(_)
        ));
    }

    #[test]
    fn test_unknown_event_kept_verbatim() {
        match GatewayEvent::parse("watermark_refresh", "opaque") {
            GatewayEvent::Unknown { event, payload } => {
                assert_eq!(event, "watermark_refresh");
                assert_eq!(payload, "opaque");
            }
            other => panic!("expected unknown, got {other:?}"),
        }
    }

    #[test]
    fn test_malformed_roster_degrades_to_unknown() {
        assert!(matches!(
            GatewayEvent::parse(SHARE_USERS, "not json"),
            GatewayEvent::Unknown { .. }
        ));
    }
}
