use clap::Parser;
use figment::{
    providers::{Env, Format, Serialized, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};

/// Command-line flags. Only flags actually given (or set via their env
/// var) are serialized, so unset flags never mask file or env values.
#[derive(Parser, Serialize, Debug, Default)]
#[command(name = "agora-server", version, about = "Agora real-time messaging server")]
pub struct Cli {
    /// Port to listen on (default: 8082)
    #[arg(long, env = "AGORA_PORT")]
    #[serde(skip_serializing_if = "Option::is_none")]
    pub port: Option<u16>,

    /// Bind address (default: 0.0.0.0)
    #[arg(long, env = "AGORA_BIND_ADDRESS")]
    #[serde(skip_serializing_if = "Option::is_none")]
    pub bind_address: Option<String>,

    /// Path to TOML config file
    #[arg(long, default_value = "./agora.toml")]
    #[serde(skip)]
    pub config: String,

    /// Enable structured JSON logging (for Docker/production)
    #[arg(long, env = "AGORA_JSON_LOGS")]
    #[serde(skip_serializing_if = "is_false")]
    pub json_logs: bool,

    /// Output a commented TOML config template and exit
    #[arg(long)]
    #[serde(skip_serializing_if = "is_false")]
    pub generate_config: bool,

    /// Data directory for persistent state (default: ./data)
    #[arg(long, env = "AGORA_DATA_DIR")]
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data_dir: Option<String>,
}

fn is_false(flag: &bool) -> bool {
    !*flag
}

/// Resolved server configuration.
#[derive(Serialize, Deserialize, Clone, Debug)]
pub struct Config {
    pub port: u16,
    pub bind_address: String,
    pub json_logs: bool,
    pub generate_config: bool,
    /// Data directory for persistent state (SQLite database)
    pub data_dir: String,

    /// Real-time messaging tuning (loaded from [chat] section in TOML)
    #[serde(default)]
    pub chat: ChatSettings,
}

/// Queue bounds, liveness timing and frame limits for WebSocket connections.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatSettings {
    /// Capacity of each connection's outbound queue (default: 256)
    #[serde(default = "default_outbound_queue_capacity")]
    pub outbound_queue_capacity: usize,

    /// Capacity of the connection registry's request queue (default: 1024)
    #[serde(default = "default_hub_queue_capacity")]
    pub hub_queue_capacity: usize,

    /// Seconds between server pings (default: 54)
    #[serde(default = "default_ping_interval")]
    pub ping_interval_secs: u64,

    /// Read deadline in seconds, refreshed by every inbound frame (default: 60)
    #[serde(default = "default_pong_wait")]
    pub pong_wait_secs: u64,

    /// Write deadline in seconds for a single frame (default: 10)
    #[serde(default = "default_write_wait")]
    pub write_wait_secs: u64,

    /// Maximum inbound message size in bytes (default: 512 KiB)
    #[serde(default = "default_max_message_bytes")]
    pub max_message_bytes: usize,

    /// Seconds between expired-session sweeps (default: 3600)
    #[serde(default = "default_session_cleanup_interval")]
    pub session_cleanup_interval_secs: u64,
}

impl Default for ChatSettings {
    fn default() -> Self {
        Self {
            outbound_queue_capacity: default_outbound_queue_capacity(),
            hub_queue_capacity: default_hub_queue_capacity(),
            ping_interval_secs: default_ping_interval(),
            pong_wait_secs: default_pong_wait(),
            write_wait_secs: default_write_wait(),
            max_message_bytes: default_max_message_bytes(),
            session_cleanup_interval_secs: default_session_cleanup_interval(),
        }
    }
}

fn default_outbound_queue_capacity() -> usize {
    256
}

fn default_hub_queue_capacity() -> usize {
    1024
}

fn default_ping_interval() -> u64 {
    54
}

fn default_pong_wait() -> u64 {
    60
}

fn default_write_wait() -> u64 {
    10
}

fn default_max_message_bytes() -> usize {
    512 * 1024
}

fn default_session_cleanup_interval() -> u64 {
    3600
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error(transparent)]
    Figment(#[from] Box<figment::Error>),
    #[error("invalid [chat] settings: {0}")]
    Invalid(String),
}

impl ChatSettings {
    /// Pings must go out before the peer's read deadline expires, and every
    /// bound must be non-zero.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.outbound_queue_capacity == 0 || self.hub_queue_capacity == 0 {
            return Err(ConfigError::Invalid("queue capacities must be > 0".into()));
        }
        if self.ping_interval_secs == 0 || self.write_wait_secs == 0 {
            return Err(ConfigError::Invalid("intervals must be > 0".into()));
        }
        if self.ping_interval_secs >= self.pong_wait_secs {
            return Err(ConfigError::Invalid(format!(
                "ping_interval_secs ({}) must be less than pong_wait_secs ({})",
                self.ping_interval_secs, self.pong_wait_secs
            )));
        }
        if self.max_message_bytes == 0 {
            return Err(ConfigError::Invalid("max_message_bytes must be > 0".into()));
        }
        Ok(())
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            port: 8082,
            bind_address: "0.0.0.0".to_string(),
            json_logs: false,
            generate_config: false,
            data_dir: "./data".to_string(),
            chat: ChatSettings::default(),
        }
    }
}

impl Config {
    /// Load config with layered precedence:
    /// built-in defaults < TOML file < env vars (AGORA_*) < CLI args
    pub fn load() -> Result<Self, ConfigError> {
        let cli = Cli::parse();
        let config = Self::figment(&cli).extract::<Config>().map_err(Box::new)?;
        config.chat.validate()?;
        Ok(config)
    }

    fn figment(cli: &Cli) -> Figment {
        Figment::new()
            .merge(Serialized::defaults(Config::default()))
            .merge(Toml::file(&cli.config))
            .merge(Env::prefixed("AGORA_").split("__"))
            .merge(Serialized::defaults(cli))
    }
}

/// Generate a commented TOML config template
pub fn generate_config_template() -> String {
    r#"# Agora Messaging Server Configuration
# Place this file at ./agora.toml or specify with --config <path>
# All settings can be overridden via environment variables (AGORA_PORT,
# AGORA_CHAT__PING_INTERVAL_SECS, etc.) or CLI flags (--port, etc.)

# Server port (default: 8082)
# port = 8082

# Bind address (default: 0.0.0.0, all interfaces)
# bind_address = "0.0.0.0"

# Enable structured JSON logging for Docker/production
# json_logs = false

# Data directory for the SQLite database
# data_dir = "./data"

# ---- Real-time messaging ----
# [chat]

# Per-connection outbound queue; a recipient whose queue is full is disconnected
# outbound_queue_capacity = 256

# Connection registry request queue
# hub_queue_capacity = 1024

# Liveness: ping every ping_interval_secs; drop the connection when nothing
# arrives for pong_wait_secs. ping_interval_secs must be < pong_wait_secs.
# ping_interval_secs = 54
# pong_wait_secs = 60

# Maximum time to write a single frame
# write_wait_secs = 10

# Largest accepted inbound message in bytes (512 KiB)
# max_message_bytes = 524288

# Expired session sweep interval
# session_cleanup_interval_secs = 3600
"#
    .to_string()
}
