use std::net::{Ipv4Addr, SocketAddr};
use std::path::PathBuf;

use serde::Deserialize;

use common::session::SessionConfig;

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("config i/o error: {0}")]
    Io(#[from] std::io::Error),
    #[error("malformed config file: {0}")]
    Parse(#[from] toml::de::Error),
    #[error("no home directory found; pass --base-dir")]
    NoBaseDir,
    #[error("unknown log level: {0}")]
    LogLevel(String),
}

/// Resolved process configuration
///
/// Everything lives under one base directory: the sender's shared folder,
/// the receiver's downloads folder, and one persistent store per role.
/// Defaults can be overridden by an optional `config.toml` in the base
/// directory, and the command line overrides both.
#[derive(Debug, Clone)]
pub struct Config {
    pub base_dir: PathBuf,
    pub log_level: tracing::Level,
    /// Port for the peer endpoint; an ephemeral port is used when unset
    pub port: Option<u16>,
}

/// Optional on-disk overrides (`<base>/config.toml`)
#[derive(Debug, Default, Deserialize)]
struct ConfigFile {
    log_level: Option<String>,
    port: Option<u16>,
}

impl Config {
    /// Resolve the configuration from flags, the config file, and defaults
    pub fn load(
        base_dir: Option<PathBuf>,
        log_level: Option<String>,
        port: Option<u16>,
    ) -> Result<Self, ConfigError> {
        let base_dir = match base_dir {
            Some(dir) => dir,
            None => dirs::home_dir()
                .ok_or(ConfigError::NoBaseDir)?
                .join(".skiff"),
        };

        let file = Self::read_file(&base_dir)?;

        let log_level = match log_level.or(file.log_level) {
            Some(level) => level
                .parse::<tracing::Level>()
                .map_err(|_| ConfigError::LogLevel(level))?,
            None => tracing::Level::INFO,
        };

        Ok(Self {
            base_dir,
            log_level,
            port: port.or(file.port),
        })
    }

    fn read_file(base_dir: &PathBuf) -> Result<ConfigFile, ConfigError> {
        match std::fs::read_to_string(base_dir.join("config.toml")) {
            Ok(raw) => Ok(toml::from_str(&raw)?),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(ConfigFile::default()),
            Err(e) => Err(e.into()),
        }
    }

    /// The folder whose files a sender shares
    pub fn source_dir(&self) -> PathBuf {
        self.base_dir.join("sender-folder")
    }

    /// The folder a receiver mirrors into
    pub fn downloads_dir(&self) -> PathBuf {
        self.base_dir.join("downloads")
    }

    fn sender_store_dir(&self) -> PathBuf {
        self.base_dir.join("storage")
    }

    fn receiver_store_dir(&self) -> PathBuf {
        self.base_dir.join("storage-receiver")
    }

    /// Create every directory a session might use
    ///
    /// Runs before any session starts, so the session code can treat the
    /// four roots as opaque existing paths.
    pub fn ensure_dirs(&self) -> Result<(), ConfigError> {
        for dir in [
            self.source_dir(),
            self.downloads_dir(),
            self.sender_store_dir(),
            self.receiver_store_dir(),
        ] {
            std::fs::create_dir_all(&dir)?;
        }
        Ok(())
    }

    fn socket_address(&self) -> Option<SocketAddr> {
        self.port
            .map(|port| SocketAddr::new(Ipv4Addr::UNSPECIFIED.into(), port))
    }

    /// Session layout for the sender role
    pub fn send_session(&self) -> SessionConfig {
        SessionConfig {
            store_path: self.sender_store_dir(),
            source_path: self.source_dir(),
            downloads_path: self.downloads_dir(),
            socket_address: self.socket_address(),
            mainline_discovery: true,
        }
    }

    /// Session layout for the receiver role
    ///
    /// Uses a separate store so sending and receiving on one machine never
    /// share state.
    pub fn join_session(&self) -> SessionConfig {
        SessionConfig {
            store_path: self.receiver_store_dir(),
            source_path: self.source_dir(),
            downloads_path: self.downloads_dir(),
            socket_address: self.socket_address(),
            mainline_discovery: true,
        }
    }
}
