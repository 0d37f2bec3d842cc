//! Configuration for the Trickle host service.

use std::path::Path;

use serde::{Deserialize, Serialize};

use trickle_core::delta::EncoderConfig;
use trickle_core::session::SessionConfig;
use trickle_core::session::host::DEFAULT_REPLAY_DEPTH;

/// Top-level configuration loaded from a TOML file.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct HostConfig {
    /// Network settings.
    pub network: NetworkConfig,
    /// Synthetic screen settings.
    pub screen: ScreenConfig,
    /// Delta encoder tuning.
    pub encoder: EncoderSection,
    /// Login settings.
    pub auth: AuthConfig,
    /// Logging settings.
    pub logging: LoggingConfig,
}

/// Network configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct NetworkConfig {
    /// Address to bind.
    pub listen_addr: String,
    /// TCP port for viewer connections.
    pub port: u16,
    /// Concurrent viewer sessions; extra connections are refused.
    pub max_sessions: usize,
}

/// Screen configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ScreenConfig {
    pub width: u32,
    pub height: u32,
    /// Block edge in pixels.
    pub block_size: u32,
}

/// Encoder tuning.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EncoderSection {
    /// Share of copied blocks above which a whole frame is sent.
    pub full_frame_ratio: f64,
    /// Copied blocks per payload tile (0 = one tile).
    pub max_tile_blocks: usize,
    /// Base zstd level for payloads.
    pub zstd_level: i32,
    /// Send the first frame of a session whole.
    pub full_frame_on_first: bool,
}

/// Login settings.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AuthConfig {
    /// Shared secret viewers log in with.
    pub password: String,
}

/// Logging settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Log level: "trace", "debug", "info", "warn", "error".
    pub level: String,
}

// ── Defaults ─────────────────────────────────────────────────────

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            listen_addr: "0.0.0.0".into(),
            port: 7400,
            max_sessions: 4,
        }
    }
}

impl Default for ScreenConfig {
    fn default() -> Self {
        Self {
            width: 1024,
            height: 768,
            block_size: 16,
        }
    }
}

impl Default for EncoderSection {
    fn default() -> Self {
        let defaults = EncoderConfig::default();
        Self {
            full_frame_ratio: defaults.full_frame_ratio,
            max_tile_blocks: defaults.max_tile_blocks,
            zstd_level: defaults.zstd_level,
            full_frame_on_first: defaults.full_frame_on_first,
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".into(),
        }
    }
}

// ── Loading ──────────────────────────────────────────────────────

impl HostConfig {
    /// Load configuration from a TOML file, falling back to defaults.
    pub fn load(path: &Path) -> Self {
        match std::fs::read_to_string(path) {
            Ok(contents) => toml::from_str(&contents).unwrap_or_else(|e| {
                tracing::warn!("invalid config {}: {e}; using defaults", path.display());
                Self::default()
            }),
            Err(_) => {
                tracing::info!("no config at {}; using defaults", path.display());
                Self::default()
            }
        }
    }

    /// Write the default configuration to a file (for bootstrapping).
    pub fn write_default(path: &Path) -> std::io::Result<()> {
        let text = toml::to_string_pretty(&Self::default()).map_err(std::io::Error::other)?;
        std::fs::write(path, text)
    }

    /// `listen_addr:port`.
    pub fn bind_addr(&self) -> String {
        format!("{}:{}", self.network.listen_addr, self.network.port)
    }

    /// Per-connection settings with out-of-range values clamped.
    pub fn to_session_config(&self) -> SessionConfig {
        SessionConfig {
            block_size: self.screen.block_size.clamp(4, 128),
            encoder: EncoderConfig {
                full_frame_ratio: self.encoder.full_frame_ratio.clamp(0.0, 1.0),
                max_tile_blocks: self.encoder.max_tile_blocks,
                zstd_level: self.encoder.zstd_level.clamp(1, 19),
                full_frame_on_first: self.encoder.full_frame_on_first,
            },
            password: self.auth.password.clone(),
            replay_depth: DEFAULT_REPLAY_DEPTH,
        }
    }

    /// Screen size with both edges at least one pixel.
    pub fn screen_size(&self) -> (u32, u32) {
        (self.screen.width.max(1), self.screen.height.max(1))
    }
}

// ── Tests ────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_serializes() {
        let text = toml::to_string_pretty(&HostConfig::default()).unwrap();
        assert!(text.contains("max_sessions"));
        assert!(text.contains("full_frame_ratio"));
        assert!(text.contains("[auth]"));
    }

    #[test]
    fn roundtrip_config() {
        let text = toml::to_string_pretty(&HostConfig::default()).unwrap();
        let parsed: HostConfig = toml::from_str(&text).unwrap();
        assert_eq!(parsed.network.port, 7400);
        assert_eq!(parsed.screen.block_size, 16);
        assert_eq!(parsed.encoder.max_tile_blocks, 1024);
    }

    #[test]
    fn partial_file_keeps_defaults() {
        let parsed: HostConfig = toml::from_str("[auth]\npassword = \"hunter2\"\n").unwrap();
        assert_eq!(parsed.auth.password, "hunter2");
        assert_eq!(parsed.network.max_sessions, 4);
        assert_eq!(parsed.bind_addr(), "0.0.0.0:7400");
    }

    #[test]
    fn to_session_config_clamps() {
        let mut cfg = HostConfig::default();
        cfg.screen.block_size = 1;
        cfg.encoder.zstd_level = 40;
        cfg.encoder.full_frame_ratio = 3.0;
        let session = cfg.to_session_config();
        assert_eq!(session.block_size, 4);
        assert_eq!(session.encoder.zstd_level, 19);
        assert_eq!(session.encoder.full_frame_ratio, 1.0);
    }
}
