use serde::{Deserialize, Serialize};

/// Credential shape advertised in the FramedBackend `Hello` payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuthKind {
    Session,
    OAuth2,
}

/// An opaque bearer credential. `Debug` redacts the value so it never
/// lands in a log line by accident.
#[derive(Clone, Serialize, Deserialize)]
pub struct AuthToken(pub String);

impl std::fmt::Debug for AuthToken {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_tuple("AuthToken").field(&"[REDACTED]").finish()
    }
}

impl AuthToken {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

/// Read-only snapshot of a device's state, produced by the (out of scope)
/// device-property mirror and consumed by the Session controller and both
/// Backend implementations.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeviceState {
    pub device_id: String,
    pub online: bool,
    pub streaming_allowed: bool,
    pub audio_allowed: bool,
    pub endpoint_host: String,
    pub auth_token: AuthToken,
    pub auth_kind: AuthKind,
    pub local_access_preferred: bool,
}

/// Which synthetic filler, if any, the FrameStore should push (spec §4.1
/// step 1): offline and streaming-disallowed get distinct filler videos,
/// so this can't be collapsed to a single bool without losing information.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MediaAvailability {
    /// Real media is expected; no synthetic fill.
    Allowed,
    /// Device is offline: push the offline-video filler.
    Offline,
    /// Device is online but streaming (or audio) is disallowed: push the
    /// "off" video filler.
    StreamingDisallowed,
}

impl DeviceState {
    /// Whether opening a Backend connection is worth attempting at all
    /// (spec §4.5: `online && streaming_allowed`). The Session controller
    /// still closes on `!fully_allowed()`, so this alone does not decide
    /// whether the backend stays open.
    pub fn wants_backend(&self) -> bool {
        self.online && self.streaming_allowed
    }

    /// Whether real media may flow (online, streaming, and audio all
    /// allowed). When false the FrameStore falls back to synthetic filler
    /// and the Session controller closes the backend outright.
    pub fn fully_allowed(&self) -> bool {
        self.online && self.streaming_allowed && self.audio_allowed
    }

    /// Which filler, if any, FrameStore should push for this state (spec
    /// §4.1 step 1). Audio-disallowed folds into `StreamingDisallowed`:
    /// the Session controller closes the backend in that case too, so no
    /// real media will arrive either way and the "off" video is the
    /// correct filler, not the offline one.
    pub fn media_availability(&self) -> MediaAvailability {
        if !self.online {
            MediaAvailability::Offline
        } else if !self.streaming_allowed || !self.audio_allowed {
            MediaAvailability::StreamingDisallowed
        } else {
            MediaAvailability::Allowed
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn state(online: bool, streaming: bool, audio: bool) -> DeviceState {
        DeviceState {
            device_id: "d1".into(),
            online,
            streaming_allowed: streaming,
            audio_allowed: audio,
            endpoint_host: "host1".into(),
            auth_token: AuthToken("secret".into()),
            auth_kind: AuthKind::Session,
            local_access_preferred: false,
        }
    }

    #[test]
    fn auth_token_debug_is_redacted() {
        let token = AuthToken("super-secret".into());
        assert!(!format!("{token:?}").contains("super-secret"));
    }

    #[test]
    fn wants_backend_requires_online_and_streaming() {
        assert!(state(true, true, true).wants_backend());
        assert!(!state(false, true, true).wants_backend());
        assert!(!state(true, false, true).wants_backend());
        // wants_backend() on its own is audio-agnostic; the controller
        // layers fully_allowed() on top to decide whether to actually close.
        assert!(state(true, true, false).wants_backend());
    }

    #[test]
    fn fully_allowed_requires_all_three() {
        assert!(state(true, true, true).fully_allowed());
        assert!(!state(true, true, false).fully_allowed());
    }

    #[test]
    fn media_availability_distinguishes_offline_from_streaming_disallowed() {
        assert_eq!(state(false, true, true).media_availability(), MediaAvailability::Offline);
        assert_eq!(state(false, false, false).media_availability(), MediaAvailability::Offline);
        assert_eq!(state(true, false, true).media_availability(), MediaAvailability::StreamingDisallowed);
        assert_eq!(state(true, true, false).media_availability(), MediaAvailability::StreamingDisallowed);
        assert_eq!(state(true, true, true).media_availability(), MediaAvailability::Allowed);
    }
}
