//! Gateway configuration: TOML file + CLI overrides.

use husky_core::dispatch::{
    DEFAULT_BATCH, DEFAULT_CAPACITY, DEFAULT_REPORT_INTERVAL, DEFAULT_SLOW_THRESHOLD, DEFAULT_TICK,
};
use husky_core::frame::DEFAULT_MAX_FRAME;
use husky_core::scheme::DEFAULT_COMPRESS_THRESHOLD;
use husky_core::{DispatchConfig, HuskyError, HuskyResult, Scheme};
use serde::Deserialize;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::info;

/// Top-level config file structure.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ConfigFile {
    #[serde(default)]
    pub gateway: GatewaySection,
    #[serde(default)]
    pub dispatch: DispatchSection,
    #[serde(default)]
    pub codec: CodecSection,
}

/// `[gateway]` section of the config TOML.
#[derive(Debug, Clone, Deserialize)]
pub struct GatewaySection {
    #[serde(default = "default_client_addr")]
    pub client_addr: String,
    #[serde(default = "default_server_addr")]
    pub server_addr: String,
    #[serde(default = "default_max_frame")]
    pub max_frame: usize,
    #[serde(default = "default_write_queue")]
    pub write_queue: usize,
}

impl Default for GatewaySection {
    fn default() -> Self {
        Self {
            client_addr: default_client_addr(),
            server_addr: default_server_addr(),
            max_frame: default_max_frame(),
            write_queue: default_write_queue(),
        }
    }
}

/// `[dispatch]` section of the config TOML.
#[derive(Debug, Clone, Deserialize)]
pub struct DispatchSection {
    #[serde(default = "default_capacity")]
    pub capacity: usize,
    #[serde(default = "default_batch")]
    pub batch: usize,
    #[serde(default = "default_tick_ms")]
    pub tick_ms: u64,
    #[serde(default)]
    pub telemetry: bool,
    #[serde(default = "default_report_interval_secs")]
    pub report_interval_secs: u64,
    #[serde(default = "default_slow_threshold_ms")]
    pub slow_threshold_ms: u64,
}

impl Default for DispatchSection {
    fn default() -> Self {
        Self {
            capacity: default_capacity(),
            batch: default_batch(),
            tick_ms: default_tick_ms(),
            telemetry: false,
            report_interval_secs: default_report_interval_secs(),
            slow_threshold_ms: default_slow_threshold_ms(),
        }
    }
}

/// How server-facing traffic is signed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ServerSign {
    #[default]
    Raw,
    Auth,
}

/// `[codec]` section of the config TOML.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct CodecSection {
    /// Overrides the client-facing signing key.
    pub client_key: Option<String>,
    /// Overrides the administrative signing key.
    pub auth_key: Option<String>,
    /// Client-facing compression threshold in bytes; 0 disables.
    pub compress_threshold: Option<usize>,
    #[serde(default)]
    pub server_sign: ServerSign,
}

fn default_client_addr() -> String {
    "0.0.0.0:8201".to_string()
}
fn default_server_addr() -> String {
    "127.0.0.1:8202".to_string()
}
fn default_max_frame() -> usize {
    DEFAULT_MAX_FRAME
}
fn default_write_queue() -> usize {
    1024
}
fn default_capacity() -> usize {
    DEFAULT_CAPACITY
}
fn default_batch() -> usize {
    DEFAULT_BATCH
}
fn default_tick_ms() -> u64 {
    DEFAULT_TICK.as_millis() as u64
}
fn default_report_interval_secs() -> u64 {
    DEFAULT_REPORT_INTERVAL.as_secs()
}
fn default_slow_threshold_ms() -> u64 {
    DEFAULT_SLOW_THRESHOLD.as_millis() as u64
}

/// Resolved gateway configuration (addresses parsed, CLI overrides applied).
#[derive(Debug, Clone)]
pub struct GatewayConfig {
    pub client_addr: SocketAddr,
    pub server_addr: SocketAddr,
    pub max_frame: usize,
    pub write_queue: usize,
    pub dispatch: DispatchConfig,
    /// Scheme of the client-facing listener (compression enabled).
    pub client_scheme: Scheme,
    /// Scheme of the server-facing listener.
    pub server_scheme: Scheme,
}

impl GatewayConfig {
    /// Load config from TOML file, then apply CLI overrides.
    pub fn load(
        config_path: Option<&Path>,
        cli_client_addr: Option<&str>,
        cli_server_addr: Option<&str>,
        cli_telemetry: bool,
    ) -> HuskyResult<Self> {
        let file_config = match config_path {
            Some(path) => {
                let expanded = expand_tilde(path);
                if expanded.exists() {
                    info!(path = %expanded.display(), "loading config file");
                    let content = std::fs::read_to_string(&expanded)?;
                    toml::from_str::<ConfigFile>(&content)
                        .map_err(|e| HuskyError::Config(format!("config parse error: {e}")))?
                } else {
                    info!(path = %expanded.display(), "config file not found, using defaults");
                    ConfigFile::default()
                }
            }
            None => ConfigFile::default(),
        };

        Self::from_file(file_config, cli_client_addr, cli_server_addr, cli_telemetry)
    }

    fn from_file(
        file: ConfigFile,
        cli_client_addr: Option<&str>,
        cli_server_addr: Option<&str>,
        cli_telemetry: bool,
    ) -> HuskyResult<Self> {
        let client_addr = parse_addr(cli_client_addr.unwrap_or(&file.gateway.client_addr))?;
        let server_addr = parse_addr(cli_server_addr.unwrap_or(&file.gateway.server_addr))?;

        let dispatch = DispatchConfig {
            capacity: file.dispatch.capacity,
            batch: file.dispatch.batch,
            tick: Duration::from_millis(file.dispatch.tick_ms),
            telemetry: cli_telemetry || file.dispatch.telemetry,
            report_interval: Duration::from_secs(file.dispatch.report_interval_secs),
            slow_threshold: Duration::from_millis(file.dispatch.slow_threshold_ms),
        };

        let mut client_scheme = Scheme::default().with_compress_threshold(
            file.codec
                .compress_threshold
                .unwrap_or(DEFAULT_COMPRESS_THRESHOLD),
        );
        if let Some(key) = file.codec.client_key {
            client_scheme = client_scheme.with_key(key);
        }

        let server_scheme = match file.codec.server_sign {
            ServerSign::Raw => Scheme::raw(),
            ServerSign::Auth => match file.codec.auth_key {
                Some(key) => Scheme::auth().with_key(key),
                None => Scheme::auth(),
            },
        };

        Ok(Self {
            client_addr,
            server_addr,
            max_frame: file.gateway.max_frame,
            write_queue: file.gateway.write_queue.max(1),
            dispatch,
            client_scheme,
            server_scheme,
        })
    }
}

fn parse_addr(s: &str) -> HuskyResult<SocketAddr> {
    s.parse()
        .map_err(|e| HuskyError::Config(format!("invalid address {s}: {e}")))
}

/// Expand `~` to the user's home directory.
fn expand_tilde(path: &Path) -> PathBuf {
    let s = path.to_string_lossy();
    if let Some(rest) = s.strip_prefix("~/") {
        if let Some(home) = dirs::home_dir() {
            return home.join(rest);
        }
    }
    path.to_path_buf()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn defaults() {
        let cfg = GatewayConfig::load(None, None, None, false).unwrap();
        assert_eq!(cfg.client_addr, "0.0.0.0:8201".parse().unwrap());
        assert_eq!(cfg.server_addr, "127.0.0.1:8202".parse().unwrap());
        assert_eq!(cfg.dispatch.capacity, 16384);
        assert_eq!(cfg.dispatch.batch, 256);
        assert_eq!(cfg.dispatch.tick, Duration::from_millis(40));
        assert!(!cfg.dispatch.telemetry);
        assert_eq!(cfg.client_scheme, Scheme::default());
        assert_eq!(cfg.server_scheme, Scheme::raw());
    }

    #[test]
    fn missing_file_uses_defaults() {
        let cfg = GatewayConfig::load(
            Some(Path::new("/nonexistent/husky/gateway.toml")),
            None,
            None,
            false,
        )
        .unwrap();
        assert_eq!(cfg.max_frame, DEFAULT_MAX_FRAME);
    }

    #[test]
    fn file_and_cli_overrides() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(
            file,
            r#"
[gateway]
client_addr = "0.0.0.0:9001"
server_addr = "127.0.0.1:9002"
max_frame = 4096

[dispatch]
batch = 32
telemetry = false

[codec]
client_key = "secret"
compress_threshold = 0
server_sign = "auth"
"#
        )
        .unwrap();

        let cfg = GatewayConfig::load(Some(file.path()), Some("127.0.0.1:7001"), None, true).unwrap();
        assert_eq!(cfg.client_addr, "127.0.0.1:7001".parse().unwrap());
        assert_eq!(cfg.server_addr, "127.0.0.1:9002".parse().unwrap());
        assert_eq!(cfg.max_frame, 4096);
        assert_eq!(cfg.dispatch.batch, 32);
        assert!(cfg.dispatch.telemetry);
        assert_eq!(
            cfg.client_scheme,
            Scheme::default().with_key("secret").with_compress_threshold(0)
        );
        assert_eq!(cfg.server_scheme, Scheme::auth());
    }

    #[test]
    fn bad_address_is_config_error() {
        let err = GatewayConfig::load(None, Some("not an address"), None, false).unwrap_err();
        assert!(matches!(err, HuskyError::Config(_)));
    }

    #[test]
    fn bad_toml_is_config_error() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, "[gateway\nclient_addr = 1").unwrap();
        let err = GatewayConfig::load(Some(file.path()), None, None, false).unwrap_err();
        assert!(matches!(err, HuskyError::Config(_)));
    }
}
