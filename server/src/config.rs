use clap::Parser;
use figment::{
    providers::{Env, Format, Serialized, Toml},
    Figment, Provider,
};
use serde::{Deserialize, Serialize};

/// Command-line flags. Only flags the user actually passed are serialized,
/// so unset flags never mask the file or environment layers.
#[derive(Parser, Serialize, Clone, Debug, Default)]
#[command(name = "wanderchat-server", version, about = "Wanderchat realtime chat server")]
pub struct Cli {
    /// Port to listen on [default: 4180]
    #[arg(long)]
    #[serde(skip_serializing_if = "Option::is_none")]
    pub port: Option<u16>,

    /// Bind address [default: 0.0.0.0]
    #[arg(long)]
    #[serde(skip_serializing_if = "Option::is_none")]
    pub bind_address: Option<String>,

    /// Path to TOML config file
    #[arg(long, default_value = "./wanderchat.toml")]
    #[serde(skip)]
    pub config: String,

    /// Enable structured JSON logging (for Docker/production)
    #[arg(long)]
    #[serde(skip_serializing_if = "std::ops::Not::not")]
    pub json_logs: bool,

    /// Output a commented TOML config template and exit
    #[arg(long)]
    #[serde(skip_serializing_if = "std::ops::Not::not")]
    pub generate_config: bool,

    /// Data directory for persistent state (DB, JWT key) [default: ./data]
    #[arg(long)]
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data_dir: Option<String>,
}

/// Resolved server configuration.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
pub struct Config {
    pub port: u16,
    pub bind_address: String,
    #[serde(default)]
    pub json_logs: bool,
    #[serde(default)]
    pub generate_config: bool,
    pub data_dir: String,

    /// Chat tuning (loaded from [chat] section in TOML or WANDERCHAT_CHAT__* env)
    #[serde(default)]
    pub chat: ChatConfig,
}

/// Limits and timings of the chat core.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ChatConfig {
    /// Maximum message body length in characters (default: 4000)
    #[serde(default = "default_max_body_chars")]
    pub max_body_chars: usize,

    /// Seconds between server pings on each WebSocket (default: 30)
    #[serde(default = "default_ping_interval")]
    pub ping_interval_secs: u64,

    /// Seconds to wait for a pong before closing the socket (default: 10)
    #[serde(default = "default_pong_timeout")]
    pub pong_timeout_secs: u64,

    /// Length of the body preview in message notifications (default: 80)
    #[serde(default = "default_preview_chars")]
    pub preview_chars: usize,
}

impl Default for ChatConfig {
    fn default() -> Self {
        Self {
            max_body_chars: 4000,
            ping_interval_secs: 30,
            pong_timeout_secs: 10,
            preview_chars: 80,
        }
    }
}

fn default_max_body_chars() -> usize {
    4000
}

fn default_ping_interval() -> u64 {
    30
}

fn default_pong_timeout() -> u64 {
    10
}

fn default_preview_chars() -> usize {
    80
}

impl Default for Config {
    fn default() -> Self {
        Self {
            port: 4180,
            bind_address: "0.0.0.0".to_string(),
            json_logs: false,
            generate_config: false,
            data_dir: "./data".to_string(),
            chat: ChatConfig::default(),
        }
    }
}

impl Config {
    /// Load config with layered precedence:
    /// built-in defaults < TOML file < env vars (WANDERCHAT_*) < CLI args
    pub fn load() -> Result<Self, figment::Error> {
        let cli = Cli::parse();
        Self::layered(Toml::file(&cli.config), &cli).extract()
    }

    fn layered(file: impl Provider, cli: &Cli) -> Figment {
        Figment::new()
            .merge(Serialized::defaults(Config::default()))
            .merge(file)
            .merge(Env::prefixed("WANDERCHAT_").split("__"))
            .merge(Serialized::defaults(cli))
    }
}

/// Generate a commented TOML config template
pub fn generate_config_template() -> String {
    r#"# Wanderchat Server Configuration
# Place this file at ./wanderchat.toml or specify with --config <path>
# All settings can be overridden via environment variables (WANDERCHAT_PORT, etc.)
# or CLI flags (--port, etc.)

# Server port (default: 4180)
# port = 4180

# Bind address (default: 0.0.0.0, all interfaces)
# bind_address = "0.0.0.0"

# Enable structured JSON logging for Docker/production
# json_logs = false

# Data directory for the SQLite database and the JWT signing key.
# The key must be the one the auth service signs access tokens with.
# data_dir = "./data"

# ---- Chat ----
# [chat]

# Maximum message body length in characters
# max_body_chars = 4000

# WebSocket keepalive: ping interval and pong deadline, in seconds
# ping_interval_secs = 30
# pong_timeout_secs = 10

# Characters of the body shown in message notifications
# preview_chars = 80
"#
    .to_string()
}
