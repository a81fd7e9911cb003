//! Connection parameters.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::errors::{ConfigError, ConfigResult};

/// Host used when none is configured.
pub const DEFAULT_HOST: &str = "localhost";
/// Port used when none is configured.
pub const DEFAULT_PORT: u16 = 50053;

/// How to reach and authenticate with a server.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Config {
	/// Account name. Registered on first login.
	pub username: String,
	/// Account password.
	pub password: String,
	/// Server host, [`DEFAULT_HOST`] if unset.
	pub host: Option<String>,
	/// Server port, [`DEFAULT_PORT`] if unset.
	pub port: Option<u16>,
	/// Whether to use TLS, off if unset.
	pub tls: Option<bool>,
}

#[derive(Deserialize)]
#[serde(deny_unknown_fields)]
struct RawConfig {
	username: String,
	password: String,
	host: Option<String>,
	port: Option<i64>,
	tls: Option<bool>,
}

impl Config {
	/// Credentials with default server settings.
	pub fn new(username: impl Into<String>, password: impl Into<String>) -> Self {
		Self {
			username: username.into(),
			password: password.into(),
			host: None,
			port: None,
			tls: None,
		}
	}

	/// Credentials with explicit server settings.
	///
	/// # Errors
	///
	/// [`ConfigError::InvalidPort`] if `port` does not fit in `0..=65535`.
	pub fn with_server(
		username: impl Into<String>,
		password: impl Into<String>,
		host: impl Into<String>,
		port: i64,
		tls: bool,
	) -> ConfigResult<Self> {
		Ok(Self {
			username: username.into(),
			password: password.into(),
			host: Some(host.into()),
			port: Some(validate_port(port)?),
			tls: Some(tls),
		})
	}

	/// Parses a TOML document.
	///
	/// # Errors
	///
	/// [`ConfigError::Parse`] for malformed TOML, [`ConfigError::InvalidPort`] for bad ports.
	pub fn from_toml_str(input: &str) -> ConfigResult<Self> {
		let raw: RawConfig = toml::from_str(input)?;
		Ok(Self {
			username: raw.username,
			password: raw.password,
			host: raw.host,
			port: raw.port.map(validate_port).transpose()?,
			tls: raw.tls,
		})
	}

	/// Reads and parses a TOML file.
	///
	/// # Errors
	///
	/// [`ConfigError::Io`] if the file cannot be read, otherwise as [`Self::from_toml_str`].
	pub fn load(path: impl AsRef<Path>) -> ConfigResult<Self> {
		let path = path.as_ref();
		let input = std::fs::read_to_string(path).map_err(|error| ConfigError::Io {
			path: path.to_path_buf(),
			error,
		})?;
		Self::from_toml_str(&input)
	}

	/// `$XDG_CONFIG_HOME/tandem/config.toml` or the platform equivalent.
	pub fn default_path() -> Option<PathBuf> {
		dirs::config_dir().map(|dir| dir.join("tandem").join("config.toml"))
	}

	/// Effective host.
	pub fn host(&self) -> &str {
		self.host.as_deref().unwrap_or(DEFAULT_HOST)
	}

	/// Effective port.
	pub fn port(&self) -> u16 {
		self.port.unwrap_or(DEFAULT_PORT)
	}

	/// Effective TLS setting.
	pub fn tls(&self) -> bool {
		self.tls.unwrap_or(false)
	}

	/// `host:port` of the server.
	pub fn endpoint(&self) -> String {
		format!("{}:{}", self.host(), self.port())
	}
}

fn validate_port(port: i64) -> ConfigResult<u16> {
	u16::try_from(port).map_err(|_| ConfigError::InvalidPort(port))
}
