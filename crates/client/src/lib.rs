//! Client core for tandem real-time collaborative editing.
//!
//! A [`Client`] logs into a server and joins [`Workspace`]s. Each workspace hands out live
//! controllers:
//!
//! * [`BufferController`]: changes to one attached buffer,
//! * [`CursorController`]: other users' cursors,
//! * the workspace itself: membership and file tree [`Event`]s.
//!
//! All three implement [`Controller`], an ordered queue filled by the connection and drained
//! with `recv`, `try_recv`, `poll` or a callback.
//!
//! ```no_run
//! use tandem::{Client, Config, Controller, Publisher, TextChange};
//!
//! # async fn demo() -> Result<(), tandem::Error> {
//! let client = Client::connect(Config::new("alice", "secret")).await?;
//! client.create_workspace("notes").await?;
//! let ws = client.join_workspace("notes").await?;
//! ws.create_buffer("todo.md").await?;
//!
//! let buffer = ws.attach_buffer("todo.md").await?;
//! buffer.send(TextChange::insert(0, "- water plants\n"))?;
//!
//! let update = buffer.recv().await?;
//! buffer.ack(update.version)?;
//! # Ok(())
//! # }
//! ```

#![warn(missing_docs)]

mod buffer;
mod client;
pub mod config;
mod controller;
mod cursor;
pub mod errors;
mod network;
mod workspace;

pub use buffer::BufferController;
pub use client::Client;
pub use config::Config;
pub use controller::{Controller, Publisher};
pub use cursor::CursorController;
pub use errors::{
	ConfigError, ConfigResult, ConnectionError, ConnectionResult, ControllerError, ControllerResult, Error, ErrorCode,
	RemoteError,
};
pub use tandem_proto::{BufferUpdate, Cursor, Event, Selection, TextChange, User, Version, hash};
pub use tandem_worker::Executor;
pub use workspace::{DetachResult, Workspace};
