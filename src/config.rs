use serde::Deserialize;
use std::convert::TryFrom;
use std::time::Duration;

/// Settings for the serving side: pool sizing, socket timeouts and limits.
///
/// Values can be loaded from a `config` file in the working directory and
/// from environment variables with the "NICEHTTP_" prefix, or built in code
/// starting from [`ServerConfig::default`].
#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    /// Maximum number of worker threads. `0` uses one worker per CPU core. Defaults to 10.
    #[serde(default = "default_max_workers")]
    pub max_workers: usize,
    /// Seconds an idle worker waits for new connections before exiting. Defaults to 6 seconds.
    #[serde(default = "default_keep_alive_secs")]
    pub worker_keep_alive_secs: u64,
    /// Interface the demo server binds to. Defaults to "127.0.0.1".
    #[serde(default = "default_host")]
    pub host: String,
    /// Port the demo server binds to. Defaults to 8090.
    #[serde(default = "default_port")]
    pub port: u16,
    /// Size of each read from a client socket. Defaults to 4096 bytes.
    #[serde(default = "default_block_size")]
    pub block_size: usize,
    /// Accept loop poll timeout. When it elapses without activity the server
    /// stops; `0` serves forever. Defaults to 60 seconds.
    #[serde(default = "default_idle_timeout_secs")]
    pub idle_timeout_secs: u64,
    #[serde(default = "default_io_timeout_secs")]
    pub read_timeout_secs: u64,
    #[serde(default = "default_io_timeout_secs")]
    pub write_timeout_secs: u64,
    /// Total time a client gets to deliver its whole request, however the
    /// bytes trickle in. `0` leaves only the per-read timeout. Defaults to 60 seconds.
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,
    /// Largest accepted head (start line and headers). Defaults to 64kb.
    #[serde(default = "default_max_head_bytes")]
    pub max_head_bytes: usize,
    /// Largest accepted declared body. Defaults to 8mb.
    #[serde(default = "default_max_body_bytes")]
    pub max_body_bytes: usize,
    /// Value of the `Server` header added to every response.
    #[serde(default = "default_server_name")]
    pub server_name: String,
    /// Answer malformed requests with `400 Bad Request` instead of routing them.
    #[serde(default)]
    pub strict: bool,
}

/// Configuration for the HTTP client.
#[derive(Debug, Clone, Deserialize)]
pub struct ClientConfig {
    #[serde(default = "default_block_size")]
    pub block_size: usize,
    #[serde(default = "default_io_timeout_secs")]
    pub read_timeout_secs: u64,
    #[serde(default = "default_io_timeout_secs")]
    pub write_timeout_secs: u64,
    #[serde(default = "default_max_head_bytes")]
    pub max_head_bytes: usize,
    #[serde(default = "default_max_body_bytes")]
    pub max_body_bytes: usize,
}

/// Deserializes a loaded [`config::Config`], filling gaps with defaults.
impl TryFrom<config::Config> for ServerConfig {
    type Error = config::ConfigError;

    fn try_from(config: config::Config) -> Result<Self, Self::Error> {
        config.try_deserialize()
    }
}

impl TryFrom<config::Config> for ClientConfig {
    type Error = config::ConfigError;

    fn try_from(config: config::Config) -> Result<Self, Self::Error> {
        config.try_deserialize()
    }
}

/// Loads the layered sources shared by both configurations.
///
/// 1. Load environment variables from a .env file if present
/// 2. Load configuration from a "config" file (if it exists)
/// 3. Override with environment variables prefixed with "NICEHTTP_"
fn load() -> Result<config::Config, config::ConfigError> {
    dotenv::dotenv().ok();

    config::Config::builder()
        .add_source(config::File::with_name("config").required(false))
        .add_source(config::Environment::with_prefix("NICEHTTP"))
        .build()
}

fn secs(value: u64) -> Option<Duration> {
    (value != 0).then(|| Duration::from_secs(value))
}

impl ServerConfig {
    /// Loads server settings from the layered sources.
    ///
    /// # Errors
    /// Fails if a source cannot be read or a value has the wrong type.
    pub fn new() -> Result<Self, config::ConfigError> {
        load()?.try_into()
    }

    /// Pool size handed to the executor; `None` lets it size itself by CPU count.
    pub fn workers(&self) -> Option<usize> {
        (self.max_workers != 0).then_some(self.max_workers)
    }

    /// How long an idle worker lingers before exiting.
    pub fn worker_keep_alive(&self) -> Duration {
        Duration::from_secs(self.worker_keep_alive_secs)
    }

    /// `None` means the accept loop never times out.
    pub fn idle_timeout(&self) -> Option<Duration> {
        secs(self.idle_timeout_secs)
    }

    pub fn read_timeout(&self) -> Option<Duration> {
        secs(self.read_timeout_secs)
    }

    pub fn write_timeout(&self) -> Option<Duration> {
        secs(self.write_timeout_secs)
    }

    /// Budget for reading one request; `None` means unbounded.
    pub fn request_timeout(&self) -> Option<Duration> {
        secs(self.request_timeout_secs)
    }
}

impl ClientConfig {
    /// Loads client settings from the same sources as [`ServerConfig::new`].
    pub fn new() -> Result<Self, config::ConfigError> {
        load()?.try_into()
    }

    pub fn read_timeout(&self) -> Option<Duration> {
        secs(self.read_timeout_secs)
    }

    pub fn write_timeout(&self) -> Option<Duration> {
        secs(self.write_timeout_secs)
    }
}

fn default_max_workers() -> usize {
    10
}

fn default_keep_alive_secs() -> u64 {
    6
}

fn default_host() -> String {
    "127.0.0.1".to_string()
}

fn default_port() -> u16 {
    8090
}

fn default_block_size() -> usize {
    4096
}

fn default_idle_timeout_secs() -> u64 {
    60
}

fn default_io_timeout_secs() -> u64 {
    30
}

fn default_request_timeout_secs() -> u64 {
    60
}

/// Default maximum head size (64kb).
fn default_max_head_bytes() -> usize {
    65_536
}

/// Default maximum body size (8mb).
fn default_max_body_bytes() -> usize {
    8_388_608
}

fn default_server_name() -> String {
    "NiceHTTP".to_string()
}

/// Same values as an empty configuration source.
impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            max_workers: default_max_workers(),
            worker_keep_alive_secs: default_keep_alive_secs(),
            host: default_host(),
            port: default_port(),
            block_size: default_block_size(),
            idle_timeout_secs: default_idle_timeout_secs(),
            read_timeout_secs: default_io_timeout_secs(),
            write_timeout_secs: default_io_timeout_secs(),
            request_timeout_secs: default_request_timeout_secs(),
            max_head_bytes: default_max_head_bytes(),
            max_body_bytes: default_max_body_bytes(),
            server_name: default_server_name(),
            strict: false,
        }
    }
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            block_size: default_block_size(),
            read_timeout_secs: default_io_timeout_secs(),
            write_timeout_secs: default_io_timeout_secs(),
            max_head_bytes: default_max_head_bytes(),
            max_body_bytes: default_max_body_bytes(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::env;

    /// Tests the built-in defaults.
    #[test]
    fn test_default_config() {
        let config = ServerConfig::default();
        assert_eq!(config.max_workers, 10);
        assert_eq!(config.port, 8090);
        assert_eq!(config.host, "127.0.0.1");
        assert_eq!(config.block_size, 4096);
        assert_eq!(config.server_name, "NiceHTTP");
        assert_eq!(config.idle_timeout(), Some(Duration::from_secs(60)));
        assert_eq!(config.request_timeout(), Some(Duration::from_secs(60)));
        assert!(!config.strict);
    }

    /// Tests that zero-valued durations and worker counts mean "unbounded"
    #[test]
    fn test_zero_disables_limits() {
        let config = ServerConfig {
            max_workers: 0,
            idle_timeout_secs: 0,
            read_timeout_secs: 0,
            request_timeout_secs: 0,
            ..ServerConfig::default()
        };
        assert_eq!(config.workers(), None);
        assert_eq!(config.idle_timeout(), None);
        assert_eq!(config.read_timeout(), None);
        assert_eq!(config.request_timeout(), None);
        assert_eq!(config.write_timeout(), Some(Duration::from_secs(30)));
    }

    /// Tests that `NICEHTTP_` variables override the defaults.
    #[test]
    fn test_config_from_env() {
        env::set_var("NICEHTTP_PORT", "9000");
        env::set_var("NICEHTTP_MAX_WORKERS", "4");
        env::set_var("NICEHTTP_STRICT", "true");

        let config = ServerConfig::new().unwrap();
        assert_eq!(config.port, 9000);
        assert_eq!(config.max_workers, 4);
        assert!(config.strict);
        assert_eq!(config.block_size, 4096);

        // leave the environment as found
        env::remove_var("NICEHTTP_PORT");
        env::remove_var("NICEHTTP_MAX_WORKERS");
        env::remove_var("NICEHTTP_STRICT");
    }

    #[test]
    fn test_client_defaults() {
        let config = ClientConfig::default();
        assert_eq!(config.block_size, 4096);
        assert_eq!(config.max_head_bytes, 65_536);
        assert_eq!(config.read_timeout(), Some(Duration::from_secs(30)));
    }
}
