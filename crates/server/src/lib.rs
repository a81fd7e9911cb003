//! In-memory collaboration server for tandem.
//!
//! Holds accounts, workspaces and buffers, sequences every edit and fans changes, cursors and
//! workspace events out to connected clients. State lives in a [`ServerCore`]; [`serve`] exposes
//! it over TCP with the framing of [`tandem_proto::protocol`].
//!
//! ```no_run
//! use tokio::net::TcpListener;
//! use tokio_util::sync::CancellationToken;
//!
//! # async fn demo() -> std::io::Result<()> {
//! let listener = TcpListener::bind("127.0.0.1:50053").await?;
//! tandem_server::serve(listener, tandem_server::ServerCore::new(), CancellationToken::new()).await
//! # }
//! ```

#![warn(missing_docs)]

pub mod core;
pub mod net;
pub mod service;

pub use crate::core::{ServerCore, SessionId, SessionSink};
pub use net::serve;
pub use service::SessionService;
