//! Configuration system for the `peerchat` client.
//!
//! Supports layered configuration with the following priority (highest first):
//! 1. CLI arguments
//! 2. Environment variables (via clap `env` attribute)
//! 3. TOML config file (`~/.config/peerchat/config.toml`)
//! 4. Compiled defaults
//!
//! Missing config file is not an error (defaults are used). An explicit
//! `--config` path that doesn't exist is an error.

use std::path::PathBuf;

use crate::crypto::CipherMode;

/// Errors that can occur when loading configuration.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// Failed to read the configuration file.
    #[error("failed to read config file {path}: {source}")]
    ReadFile {
        /// Path that was attempted.
        path: PathBuf,
        /// Underlying I/O error.
        source: std::io::Error,
    },

    /// Failed to parse the TOML configuration.
    #[error("failed to parse config file: {0}")]
    ParseToml(#[from] toml::de::Error),

    /// A config value failed validation.
    #[error("invalid config value for {field}: {reason}")]
    InvalidValue {
        /// Name of the offending field.
        field: &'static str,
        /// Why the value was rejected.
        reason: String,
    },
}

// ---------------------------------------------------------------------------
// TOML file structs (all fields Option for partial overrides)
// ---------------------------------------------------------------------------

/// Top-level TOML config file structure.
#[derive(Debug, Default, serde::Deserialize)]
#[serde(default)]
struct ConfigFile {
    account: AccountFileConfig,
    chat: ChatFileConfig,
    storage: StorageFileConfig,
}

/// `[account]` section of the config file.
#[derive(Debug, Default, serde::Deserialize)]
#[serde(default)]
struct AccountFileConfig {
    auth_url: Option<String>,
    username: Option<String>,
    peer_id: Option<String>,
}

/// `[chat]` section of the config file.
#[derive(Debug, Default, serde::Deserialize)]
#[serde(default)]
struct ChatFileConfig {
    cipher: Option<String>,
    event_buffer: Option<usize>,
}

/// `[storage]` section of the config file.
#[derive(Debug, Default, serde::Deserialize)]
#[serde(default)]
struct StorageFileConfig {
    data_dir: Option<String>,
}

// ---------------------------------------------------------------------------
// Resolved configuration (concrete types, all fields populated)
// ---------------------------------------------------------------------------

/// Fully resolved client configuration.
#[derive(Debug, Clone)]
pub struct ClientConfig {
    // -- Account --
    /// Base URL of the account service, if one is used.
    pub auth_url: Option<String>,
    /// Account name on the service.
    pub username: Option<String>,
    /// Local peer identity string.
    pub peer_id: Option<String>,

    // -- Chat --
    /// Initial cipher mode for outgoing payloads.
    pub cipher: CipherMode,
    /// Buffer size for the manager's event channel.
    pub event_buffer: usize,

    // -- Storage --
    /// Directory for persisted chat history, `None` for in-memory only.
    pub data_dir: Option<PathBuf>,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            auth_url: None,
            username: None,
            peer_id: None,
            cipher: CipherMode::Off,
            event_buffer: 64,
            data_dir: dirs::data_dir().map(|d| d.join("peerchat")),
        }
    }
}

impl ClientConfig {
    /// Load configuration by merging CLI args, env vars, and a TOML file.
    ///
    /// CLI args and env vars are parsed via `clap`. If `--config` is given
    /// and the file does not exist, returns an error. If no `--config` is
    /// given, the default path (`~/.config/peerchat/config.toml`) is tried
    /// and silently ignored if missing.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] if the config file cannot be read or parsed,
    /// or a cipher value fails to parse.
    pub fn load(cli: &CliArgs) -> Result<Self, ConfigError> {
        let file = load_config_file(cli.config.as_deref())?;
        Self::resolve(cli, &file)
    }

    /// Resolve a `ClientConfig` from CLI args and a parsed config file.
    ///
    /// Priority: CLI > file > default. This is separated from `load()` to
    /// enable unit testing without CLI parsing.
    fn resolve(cli: &CliArgs, file: &ConfigFile) -> Result<Self, ConfigError> {
        let defaults = Self::default();

        let cipher = match cli
            .cipher
            .clone()
            .or_else(|| file.chat.cipher.clone())
        {
            Some(raw) => raw
                .parse()
                .map_err(|reason| ConfigError::InvalidValue {
                    field: "cipher",
                    reason,
                })?,
            None => defaults.cipher,
        };

        Ok(Self {
            auth_url: cli
                .auth_url
                .clone()
                .or_else(|| file.account.auth_url.clone()),
            username: cli
                .username
                .clone()
                .or_else(|| file.account.username.clone()),
            peer_id: cli.peer_id.clone().or_else(|| file.account.peer_id.clone()),
            cipher,
            event_buffer: file.chat.event_buffer.unwrap_or(defaults.event_buffer),
            data_dir: cli
                .data_dir
                .clone()
                .or_else(|| file.storage.data_dir.clone().map(PathBuf::from))
                .or(defaults.data_dir),
        })
    }
}

/// CLI arguments parsed by clap.
#[derive(clap::Parser, Debug, Default)]
#[command(version, about = "Peer-to-peer encrypted chat client")]
pub struct CliArgs {
    /// Base URL of the account service.
    #[arg(long, env = "PEERCHAT_AUTH_URL")]
    pub auth_url: Option<String>,

    /// Account name on the service.
    #[arg(long, env = "PEERCHAT_USERNAME")]
    pub username: Option<String>,

    /// Your local peer identity string.
    #[arg(long, env = "PEERCHAT_PEER_ID")]
    pub peer_id: Option<String>,

    /// Cipher mode for outgoing payloads (off, aes).
    #[arg(long)]
    pub cipher: Option<String>,

    /// Directory for persisted chat history.
    #[arg(long)]
    pub data_dir: Option<PathBuf>,

    /// Path to config file (default: `~/.config/peerchat/config.toml`).
    #[arg(short, long)]
    pub config: Option<PathBuf>,

    /// Log level filter (trace, debug, info, warn, error).
    #[arg(long, default_value = "info", env = "PEERCHAT_LOG")]
    pub log_level: String,

    /// Path to log file (default: `$TMPDIR/peerchat.log`).
    #[arg(long)]
    pub log_file: Option<PathBuf>,
}

// ---------------------------------------------------------------------------
// Internal helpers
// ---------------------------------------------------------------------------

/// Load and parse a TOML config file.
///
/// If `explicit_path` is `Some`, the file must exist (error if not).
/// If `explicit_path` is `None`, the default path is tried and missing file
/// is treated as empty config.
fn load_config_file(explicit_path: Option<&std::path::Path>) -> Result<ConfigFile, ConfigError> {
    let path = if let Some(p) = explicit_path {
        let contents = std::fs::read_to_string(p).map_err(|e| ConfigError::ReadFile {
            path: p.to_path_buf(),
            source: e,
        })?;
        return Ok(toml::from_str(&contents)?);
    } else {
        let Some(config_dir) = dirs::config_dir() else {
            // No config dir available — use defaults.
            return Ok(ConfigFile::default());
        };
        config_dir.join("peerchat").join("config.toml")
    };

    match std::fs::read_to_string(&path) {
        Ok(contents) => Ok(toml::from_str(&contents)?),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(ConfigFile::default()),
        Err(e) => Err(ConfigError::ReadFile { path, source: e }),
    }
}
