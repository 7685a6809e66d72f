use serde::{Deserialize, Serialize};

/// Top-level configuration for the camera media core.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CameraCoreConfig {
    #[serde(default)]
    pub trunk: TrunkConfig,
    #[serde(default)]
    pub resources: ResourceConfig,
    #[serde(default)]
    pub framed: FramedBackendConfig,
    #[serde(default)]
    pub webrtc: WebRtcBackendConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrunkConfig {
    /// Maximum packets retained in a FrameStore trunk (spec §3, N_MAX).
    #[serde(default = "default_trunk_max_packets")]
    pub max_packets: usize,
    /// Target interval between synthetic filler pushes while offline or
    /// streaming-disallowed (spec §3: at least one every 3s).
    #[serde(default = "default_synthetic_frame_interval_ms")]
    pub synthetic_frame_interval_ms: u64,
    /// Grace period after a live consumer's talkback source falls silent
    /// before a zero-length terminator chunk is synthesized.
    #[serde(default = "default_talkback_silence_ms")]
    pub talkback_silence_ms: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResourceConfig {
    /// Directory containing the two single-frame H.264 filler payloads
    /// ("offline" and "off").
    #[serde(default = "default_resource_path")]
    pub resource_path: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FramedBackendConfig {
    #[serde(default = "default_framed_port")]
    pub port: u16,
    #[serde(default = "default_ping_interval_ms")]
    pub ping_interval_ms: u64,
    #[serde(default = "default_stall_timeout_ms")]
    pub stall_timeout_ms: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WebRtcBackendConfig {
    #[serde(default = "default_extend_interval_ms")]
    pub extend_interval_ms: u64,
    #[serde(default)]
    pub local_access_preferred: bool,
    #[serde(default = "default_user_agent")]
    pub user_agent: String,
    #[serde(default = "default_pli_interval_ms")]
    pub pli_interval_ms: u64,
}

impl Default for TrunkConfig {
    fn default() -> Self {
        Self {
            max_packets: default_trunk_max_packets(),
            synthetic_frame_interval_ms: default_synthetic_frame_interval_ms(),
            talkback_silence_ms: default_talkback_silence_ms(),
        }
    }
}

impl Default for ResourceConfig {
    fn default() -> Self {
        Self {
            resource_path: default_resource_path(),
        }
    }
}

impl Default for FramedBackendConfig {
    fn default() -> Self {
        Self {
            port: default_framed_port(),
            ping_interval_ms: default_ping_interval_ms(),
            stall_timeout_ms: default_stall_timeout_ms(),
        }
    }
}

impl Default for WebRtcBackendConfig {
    fn default() -> Self {
        Self {
            extend_interval_ms: default_extend_interval_ms(),
            local_access_preferred: false,
            user_agent: default_user_agent(),
            pli_interval_ms: default_pli_interval_ms(),
        }
    }
}

impl CameraCoreConfig {
    /// Validate the configuration, returning every issue found rather than
    /// bailing on the first one. Issues are prefixed `ERROR:` (fatal) or
    /// `WARNING:` (advisory).
    pub fn validate(&self) -> Result<(), Vec<String>> {
        let mut issues = Vec::new();

        if self.trunk.max_packets == 0 {
            issues.push("ERROR: trunk.max_packets must be >= 1.".to_string());
        }
        if self.trunk.synthetic_frame_interval_ms == 0 {
            issues.push(
                "ERROR: trunk.synthetic_frame_interval_ms must be >= 1.".to_string(),
            );
        }
        if self.trunk.synthetic_frame_interval_ms > 10_000 {
            issues.push(format!(
                "WARNING: trunk.synthetic_frame_interval_ms is {}ms, above the 3000ms the \
                 offline-filler invariant assumes — downstream codecs may starve.",
                self.trunk.synthetic_frame_interval_ms
            ));
        }
        if self.resources.resource_path.trim().is_empty() {
            issues.push("ERROR: resources.resource_path must not be empty.".to_string());
        }
        if self.framed.port == 0 {
            issues.push("ERROR: framed.port must be between 1 and 65535, got 0.".to_string());
        }
        if self.framed.stall_timeout_ms <= self.framed.ping_interval_ms {
            issues.push(format!(
                "WARNING: framed.stall_timeout_ms ({}) should exceed ping_interval_ms ({}) \
                 or the stall timer will fire before a ping round-trip completes.",
                self.framed.stall_timeout_ms, self.framed.ping_interval_ms
            ));
        }
        if self.webrtc.extend_interval_ms == 0 {
            issues.push("ERROR: webrtc.extend_interval_ms must be >= 1.".to_string());
        }
        if self.webrtc.user_agent.trim().is_empty() {
            issues.push("WARNING: webrtc.user_agent is empty.".to_string());
        }

        if issues.is_empty() {
            Ok(())
        } else {
            Err(issues)
        }
    }
}

fn default_trunk_max_packets() -> usize {
    1250
}
fn default_synthetic_frame_interval_ms() -> u64 {
    3000
}
fn default_talkback_silence_ms() -> u64 {
    500
}
fn default_resource_path() -> String {
    "resources".to_string()
}
fn default_framed_port() -> u16 {
    1443
}
fn default_ping_interval_ms() -> u64 {
    15_000
}
fn default_stall_timeout_ms() -> u64 {
    8_000
}
fn default_extend_interval_ms() -> u64 {
    120_000
}
fn default_pli_interval_ms() -> u64 {
    2_000
}
fn default_user_agent() -> String {
    "camcore/0.1".to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_from_empty_string() {
        let config: CameraCoreConfig =
            toml::from_str("").expect("empty string should deserialize to default config");
        assert_eq!(config.trunk.max_packets, 1250);
        assert_eq!(config.trunk.synthetic_frame_interval_ms, 3000);
        assert_eq!(config.trunk.talkback_silence_ms, 500);
        assert_eq!(config.resources.resource_path, "resources");
        assert_eq!(config.framed.port, 1443);
        assert_eq!(config.framed.ping_interval_ms, 15_000);
        assert_eq!(config.framed.stall_timeout_ms, 8_000);
        assert_eq!(config.webrtc.extend_interval_ms, 120_000);
        assert!(!config.webrtc.local_access_preferred);
        assert_eq!(config.webrtc.pli_interval_ms, 2_000);
    }

    #[test]
    fn partial_config_only_trunk_section() {
        let toml_str = r#"
[trunk]
max_packets = 500
"#;
        let config: CameraCoreConfig = toml::from_str(toml_str).unwrap();
        assert_eq!(config.trunk.max_packets, 500);
        assert_eq!(config.trunk.synthetic_frame_interval_ms, 3000);
        assert_eq!(config.webrtc.extend_interval_ms, 120_000);
    }

    #[test]
    fn validate_default_config_passes() {
        let config: CameraCoreConfig = toml::from_str("").unwrap();
        assert!(config.validate().is_ok());
    }

    #[test]
    fn validate_zero_max_packets_is_error() {
        let mut config: CameraCoreConfig = toml::from_str("").unwrap();
        config.trunk.max_packets = 0;
        let issues = config.validate().unwrap_err();
        assert!(issues.iter().any(|i| i.starts_with("ERROR:") && i.contains("max_packets")));
    }

    #[test]
    fn validate_stall_not_exceeding_ping_is_warning() {
        let mut config: CameraCoreConfig = toml::from_str("").unwrap();
        config.framed.stall_timeout_ms = config.framed.ping_interval_ms;
        let issues = config.validate().unwrap_err();
        assert!(issues.iter().any(|i| i.starts_with("WARNING:") && i.contains("stall_timeout_ms")));
    }

    #[test]
    fn validate_port_zero_is_error() {
        let mut config: CameraCoreConfig = toml::from_str("").unwrap();
        config.framed.port = 0;
        let issues = config.validate().unwrap_err();
        assert!(issues.iter().any(|i| i.starts_with("ERROR:") && i.contains("port")));
    }

    #[test]
    fn validate_multiple_errors_collected() {
        let mut config: CameraCoreConfig = toml::from_str("").unwrap();
        config.trunk.max_packets = 0;
        config.framed.port = 0;
        config.webrtc.extend_interval_ms = 0;
        let issues = config.validate().unwrap_err();
        assert!(issues.len() >= 3);
    }
}
