//! Error types, one enum per subsystem.

use std::path::PathBuf;

use tandem_worker::RecvError;

pub use tandem_proto::{ErrorCode, RemoteFailure as RemoteError};

/// Result of an operation that talks to the server.
pub type ConnectionResult<T> = Result<T, ConnectionError>;

/// Result of a controller operation.
pub type ControllerResult<T> = Result<T, ControllerError>;

/// Result of building or loading a [`crate::Config`].
pub type ConfigResult<T> = Result<T, ConfigError>;

/// Failure to establish or use the server connection.
#[derive(Debug, Clone, thiserror::Error)]
pub enum ConnectionError {
	/// Network or protocol level failure, including a dropped connection.
	#[error("transport error: {0}")]
	Transport(String),
	/// The server rejected the request.
	#[error("server rejected request: {0}")]
	Remote(#[from] RemoteError),
}

impl ConnectionError {
	/// Error code of a server rejection.
	pub fn code(&self) -> Option<ErrorCode> {
		match self {
			Self::Remote(e) => Some(e.code),
			Self::Transport(_) => None,
		}
	}
}

impl From<std::io::Error> for ConnectionError {
	fn from(e: std::io::Error) -> Self {
		Self::Transport(e.to_string())
	}
}

/// Failure of a controller operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum ControllerError {
	/// The controller was already stopped when the call was made.
	#[error("controller is stopped")]
	Stopped,
	/// The controller stopped before the call could complete.
	#[error("controller stopped before the operation completed")]
	Unfulfilled,
}

impl From<RecvError> for ControllerError {
	fn from(e: RecvError) -> Self {
		match e {
			RecvError::Closed => Self::Stopped,
			RecvError::Interrupted => Self::Unfulfilled,
		}
	}
}

/// Invalid or unreadable configuration.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
	/// Port outside `0..=65535`.
	#[error("port {0} is outside 0..=65535")]
	InvalidPort(i64),
	/// Malformed TOML.
	#[error("invalid config: {0}")]
	Parse(#[from] toml::de::Error),
	/// Config file could not be read.
	#[error("failed to read {}: {error}", path.display())]
	Io {
		/// File that failed.
		path: PathBuf,
		/// Underlying error.
		#[source]
		error: std::io::Error,
	},
}

/// Any error this crate reports.
#[derive(Debug, thiserror::Error)]
pub enum Error {
	/// See [`ConnectionError`].
	#[error(transparent)]
	Connection(#[from] ConnectionError),
	/// See [`ControllerError`].
	#[error(transparent)]
	Controller(#[from] ControllerError),
	/// See [`ConfigError`].
	#[error(transparent)]
	Config(#[from] ConfigError),
}
