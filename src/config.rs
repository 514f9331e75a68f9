//! Server configuration.
//!
//! Values come from a TOML file and may be overridden from the command
//! line. Only the instance name shapes the packet; the rest configures the
//! demo listener.

use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;
use tracing::warn;

use crate::error::{PreLoginError, PreLoginResult};
use crate::header::{DESCRIPTOR_SIZE, HEADER_SIZE};
use crate::option::{DEFAULT_INSTANCE, OptionSet};

pub const DEFAULT_LISTEN_ADDR: &str = "127.0.0.1:1433";
pub const DEFAULT_READ_TIMEOUT_SECS: u64 = 5;

/// Longest instance name whose server packet still fits the u16 length
/// field: header, five descriptors, terminator, and the fixed VERSION,
/// ENCRYPTION, THREADID and MARS values plus the name's trailing NUL.
pub const MAX_INSTANCE_NAME_LEN: usize =
    u16::MAX as usize - (HEADER_SIZE + 5 * DESCRIPTOR_SIZE + 1 + 6 + 1 + 1 + 4 + 1);

/// Environment variable naming a config file.
pub const CONFIG_ENV: &str = "PRELOGIN_CONFIG";

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ServerConfig {
    /// Advertised in the INSTOPT option.
    pub instance_name: String,
    pub listen_addr: String,
    /// How long `serve` waits for a client's PreLogin packet. 0 uses the default.
    pub read_timeout_secs: u64,
    pub debug: bool,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            instance_name: DEFAULT_INSTANCE.to_string(),
            listen_addr: DEFAULT_LISTEN_ADDR.to_string(),
            read_timeout_secs: DEFAULT_READ_TIMEOUT_SECS,
            debug: false,
        }
    }
}

/// Command-line values layered over the file.
#[derive(Debug, Clone, Default)]
pub struct CliOverrides {
    pub config_path: Option<PathBuf>,
    pub instance_name: Option<String>,
    pub listen_addr: Option<String>,
    pub debug: bool,
}

impl ServerConfig {
    /// Parse a TOML document. Unknown keys are rejected.
    pub fn parse(content: &str) -> PreLoginResult<Self> {
        toml::from_str(content)
            .map_err(|e| {
                PreLoginError::Config(format!(
                    "failed parsing config: {}",
                    e.to_string().replace('\n', " ")
                ))
            })
    }

    pub fn from_file(path: &Path) -> PreLoginResult<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            PreLoginError::Config(format!("failed to open {}: {}", path.display(), e))
        })?;
        Self::parse(&content)
    }

    /// `<config dir>/tds-prelogin/config.toml`, if the platform has one.
    pub fn default_path() -> Option<PathBuf> {
        dirs::config_dir().map(|d| d.join("tds-prelogin").join("config.toml"))
    }

    /// Load the file named on the command line, or the default file if it
    /// exists, then apply command-line overrides and validate.
    pub fn from_cli(cli: &CliOverrides) -> PreLoginResult<Self> {
        let path = cli
            .config_path
            .clone()
            .or_else(|| Self::default_path().filter(|p| p.exists()));

        let mut config = match &path {
            Some(p) => Self::from_file(p)?,
            None => Self::default(),
        };
        let source = path
            .as_deref()
            .map(|p| p.display().to_string())
            .unwrap_or_else(|| "defaults".to_string());

        if cli.debug {
            config.debug = true;
        }

        if let Some(name) = &cli.instance_name {
            if config.instance_name != DEFAULT_INSTANCE && config.instance_name != *name {
                warn!("CLI parameters are overriding instance name configured in {}", source);
            }
            config.instance_name = name.clone();
        }

        if let Some(addr) = &cli.listen_addr {
            if config.listen_addr != DEFAULT_LISTEN_ADDR && config.listen_addr != *addr {
                warn!("CLI parameters are overriding listen address configured in {}", source);
            }
            config.listen_addr = addr.clone();
        }

        config.check_and_set_defaults()?;
        Ok(config)
    }

    /// Fill empty fields with defaults and reject values that cannot be
    /// advertised or bound.
    pub fn check_and_set_defaults(&mut self) -> PreLoginResult<()> {
        if self.instance_name.contains('\0') {
            return Err(PreLoginError::Config(
                "instance_name must not contain NUL".to_string(),
            ));
        }
        if self.instance_name.len() > MAX_INSTANCE_NAME_LEN {
            return Err(PreLoginError::Config(format!(
                "instance_name is {} bytes (limit is {})",
                self.instance_name.len(),
                MAX_INSTANCE_NAME_LEN
            )));
        }

        if self.listen_addr.trim().is_empty() {
            self.listen_addr = DEFAULT_LISTEN_ADDR.to_string();
        }
        self.listen_addr
            .parse::<SocketAddr>()
            .map_err(|e| PreLoginError::Config(format!("invalid listen_addr '{}': {}", self.listen_addr, e)))?;

        if self.read_timeout_secs == 0 {
            self.read_timeout_secs = DEFAULT_READ_TIMEOUT_SECS;
        }
        Ok(())
    }

    pub fn read_timeout(&self) -> Duration {
        Duration::from_secs(self.read_timeout_secs)
    }

    /// The option set this server advertises.
    pub fn option_set(&self) -> PreLoginResult<OptionSet> {
        OptionSet::server_defaults(&self.instance_name)
    }
}
