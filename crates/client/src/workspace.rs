//! Joined workspaces: buffer directory, attachments and workspace events.

use std::collections::{BTreeSet, HashMap};
use std::pin::pin;
use std::sync::{Arc, Weak};
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use arc_swap::ArcSwap;
use parking_lot::Mutex;
use tandem_proto::{Event, Notification, RequestPayload, ResponsePayload, User};
use tokio::sync::{Notify, oneshot};

use crate::buffer::BufferController;
use crate::controller::{Controller, Feed, delegate_controller};
use crate::cursor::CursorController;
use crate::errors::{ConnectionResult, ControllerError, ControllerResult};
use crate::network::{Connection, Inbox, closed, unexpected};

/// Outcome of [`Workspace::detach_buffer`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DetachResult {
	/// The buffer was never attached. Nothing happened.
	NotAttached,
	/// The attachment was live and its controller is now stopped.
	Detaching,
	/// The controller had already been stopped elsewhere, e.g. by a remote deletion.
	AlreadyDetached,
}

/// Handle to a joined workspace.
///
/// Also a [`Controller`] of [`Event`]s: user joins and leaves plus buffer creation and deletion.
/// Buffer content changes never show up here.
///
/// The file tree and user list are caches refreshed by [`Self::fetch_buffers`] and
/// [`Self::fetch_users`]; local creations and deletions update the file tree immediately.
#[derive(Clone)]
pub struct Workspace(Arc<WorkspaceInner>);

struct WorkspaceInner {
	id: String,
	user: User,
	conn: Arc<Connection>,
	cursor: CursorController,
	// Stopped controllers stay until detached so the detach can report it.
	buffers: Mutex<HashMap<String, BufferController>>,
	filetree: ArcSwap<BTreeSet<String>>,
	users: ArcSwap<Vec<User>>,
	events: Feed<Event>,
	activity: Notify,
	closed: AtomicBool,
}

delegate_controller!(Workspace, Event, |this| this.0.events);

impl Workspace {
	/// Creates the handle and starts routing the workspace's notifications to it.
	pub(crate) fn new(id: &str, user: User, conn: Arc<Connection>) -> Self {
		let inner = Arc::new(WorkspaceInner {
			id: id.to_owned(),
			user,
			cursor: CursorController::new(id, Arc::clone(&conn)),
			buffers: Mutex::new(HashMap::new()),
			filetree: ArcSwap::from_pointee(BTreeSet::new()),
			users: ArcSwap::from_pointee(Vec::new()),
			events: Feed::new(conn.executor().clone(), format!("workspace:{id}")),
			activity: Notify::new(),
			closed: AtomicBool::new(false),
			conn,
		});
		let inbox = Arc::downgrade(&inner);
		inner.conn.register(id, inbox);
		Self(inner)
	}

	/// Workspace id.
	pub fn id(&self) -> &str {
		&self.0.id
	}

	/// The user this session is logged in as.
	pub fn user(&self) -> &User {
		&self.0.user
	}

	/// Cursor controller of this workspace.
	pub fn cursor(&self) -> CursorController {
		self.0.cursor.clone()
	}

	/// Live controller of an attached buffer. Never attaches.
	pub fn get_buffer(&self, path: &str) -> Option<BufferController> {
		self.0.buffers.lock().get(path).filter(|b| !b.is_stopped()).cloned()
	}

	/// Paths of every buffer with a live attachment, sorted.
	pub fn active_buffers(&self) -> Vec<String> {
		let mut paths: Vec<_> = self
			.0
			.buffers
			.lock()
			.iter()
			.filter(|(_, b)| !b.is_stopped())
			.map(|(path, _)| path.clone())
			.collect();
		paths.sort();
		paths
	}

	/// Creates an empty buffer.
	///
	/// # Errors
	///
	/// [`crate::ConnectionError::Remote`] if the path is taken or access is denied.
	pub async fn create_buffer(&self, path: &str) -> ConnectionResult<()> {
		self.request_done(RequestPayload::CreateBuffer {
			workspace: self.0.id.clone(),
			path: path.to_owned(),
		})
		.await?;
		self.0.filetree.rcu(|tree| {
			let mut tree = BTreeSet::clone(tree);
			tree.insert(path.to_owned());
			tree
		});
		tracing::debug!(workspace = %self.0.id, path, "buffer created");
		Ok(())
	}

	/// Deletes a buffer. Every attached controller, here and remotely, stops.
	///
	/// # Errors
	///
	/// [`crate::ConnectionError::Remote`] if the buffer does not exist or access is denied.
	pub async fn delete_buffer(&self, path: &str) -> ConnectionResult<()> {
		self.request_done(RequestPayload::DeleteBuffer {
			workspace: self.0.id.clone(),
			path: path.to_owned(),
		})
		.await?;
		self.0.filetree.rcu(|tree| {
			let mut tree = BTreeSet::clone(tree);
			tree.remove(path);
			tree
		});
		if let Some(buffer) = self.0.buffers.lock().get(path) {
			buffer.stop();
		}
		self.0.activity.notify_waiters();
		tracing::debug!(workspace = %self.0.id, path, "buffer deleted");
		Ok(())
	}

	/// Attaches to a buffer, or returns the live controller if already attached.
	///
	/// The returned controller starts from the server content at attach time.
	///
	/// # Errors
	///
	/// [`crate::ConnectionError::Remote`] if the buffer does not exist.
	pub async fn attach_buffer(&self, path: &str) -> ConnectionResult<BufferController> {
		if let Some(buffer) = self.get_buffer(path) {
			return Ok(buffer);
		}

		let (tx, rx) = oneshot::channel();
		let inner = Arc::clone(&self.0);
		let owned = path.to_owned();
		// Install on the delivery path so no change sent right after the attach is missed.
		self.0.conn.submit_inline(
			RequestPayload::AttachBuffer {
				workspace: self.0.id.clone(),
				path: path.to_owned(),
			},
			move |result| {
				let out = result.and_then(|payload| match payload {
					ResponsePayload::Content { content, version } => Ok(inner.install(&owned, &content, version)),
					other => Err(unexpected(other)),
				});
				let _ = tx.send(out);
			},
		);
		rx.await.unwrap_or_else(|_| Err(closed()))
	}

	/// Stops following a buffer.
	pub fn detach_buffer(&self, path: &str) -> DetachResult {
		let Some(buffer) = self.0.buffers.lock().remove(path) else {
			return DetachResult::NotAttached;
		};
		let result = if buffer.stop() {
			DetachResult::Detaching
		} else {
			DetachResult::AlreadyDetached
		};
		// A controller stopped elsewhere was already released on the server.
		if result == DetachResult::Detaching && !self.0.conn.is_closed() {
			self.0.conn.request_detached(
				RequestPayload::DetachBuffer {
					workspace: self.0.id.clone(),
					path: path.to_owned(),
				},
				"detach buffer",
			);
		}
		tracing::debug!(workspace = %self.0.id, path, ?result, "buffer detached");
		result
	}

	/// Cached buffer paths, sorted.
	///
	/// With a filter, `strict` keeps only the exact path while non-strict keeps every path
	/// starting with it.
	pub fn file_tree(&self, filter: Option<&str>, strict: bool) -> Vec<String> {
		let tree = self.0.filetree.load();
		tree.iter()
			.filter(|path| match filter {
				None => true,
				Some(f) if strict => path.as_str() == f,
				Some(f) => path.starts_with(f),
			})
			.cloned()
			.collect()
	}

	/// Cached users joined to the workspace.
	pub fn user_list(&self) -> Vec<User> {
		Vec::clone(&self.0.users.load())
	}

	/// Refreshes the file tree cache.
	///
	/// # Errors
	///
	/// Any [`crate::ConnectionError`] from the request.
	pub async fn fetch_buffers(&self) -> ConnectionResult<()> {
		match self.0.conn.request(RequestPayload::ListBuffers { workspace: self.0.id.clone() }).await? {
			ResponsePayload::Buffers(paths) => {
				self.0.filetree.store(Arc::new(paths.into_iter().collect()));
				Ok(())
			}
			other => Err(unexpected(other)),
		}
	}

	/// Refreshes the user list cache.
	///
	/// # Errors
	///
	/// Any [`crate::ConnectionError`] from the request.
	pub async fn fetch_users(&self) -> ConnectionResult<()> {
		match self.0.conn.request(RequestPayload::ListUsers { workspace: self.0.id.clone() }).await? {
			ResponsePayload::Users(mut users) => {
				users.sort();
				self.0.users.store(Arc::new(users));
				Ok(())
			}
			other => Err(unexpected(other)),
		}
	}

	/// Users attached to a buffer. The caller must be attached to it.
	///
	/// # Errors
	///
	/// [`crate::ConnectionError::Remote`] with [`crate::ErrorCode::NotAttached`] if this session
	/// is not attached.
	pub async fn list_buffer_users(&self, path: &str) -> ConnectionResult<Vec<User>> {
		let payload = RequestPayload::ListBufferUsers {
			workspace: self.0.id.clone(),
			path: path.to_owned(),
		};
		match self.0.conn.request(payload).await? {
			ResponsePayload::Users(users) => Ok(users),
			other => Err(unexpected(other)),
		}
	}

	/// Waits for any live attached buffer to have a pending update and returns its controller
	/// without consuming the update.
	///
	/// Returns `Ok(None)` once `timeout` elapses; without a timeout, waits until something
	/// arrives or the workspace is torn down.
	///
	/// # Errors
	///
	/// [`ControllerError::Stopped`] if the workspace is no longer joined.
	pub async fn select_buffer(&self, timeout: Option<Duration>) -> ControllerResult<Option<BufferController>> {
		let deadline = timeout.map(|t| tokio::time::Instant::now() + t);
		loop {
			let mut notified = pin!(self.0.activity.notified());
			notified.as_mut().enable();

			if self.is_closed() {
				return Err(ControllerError::Stopped);
			}
			let ready = self.0.buffers.lock().values().find(|b| !b.is_stopped() && b.has_pending()).cloned();
			if ready.is_some() {
				return Ok(ready);
			}

			match deadline {
				Some(deadline) => {
					if tokio::time::timeout_at(deadline, notified).await.is_err() {
						return Ok(None);
					}
				}
				None => notified.await,
			}
		}
	}

	/// True once the workspace was left, deleted or lost with the connection.
	pub(crate) fn is_closed(&self) -> bool {
		self.0.closed.load(Ordering::Acquire)
	}

	pub(crate) fn inbox(&self) -> Weak<dyn Inbox> {
		Arc::downgrade(&self.0) as Weak<dyn Inbox>
	}

	/// Stops every controller of this workspace and stops routing its notifications.
	pub(crate) fn shutdown(&self) {
		self.0.conn.unregister(&self.0.id);
		self.0.teardown();
	}

	async fn request_done(&self, payload: RequestPayload) -> ConnectionResult<()> {
		match self.0.conn.request(payload).await? {
			ResponsePayload::Done => Ok(()),
			other => Err(unexpected(other)),
		}
	}
}

impl WorkspaceInner {
	fn install(&self, path: &str, content: &str, version: tandem_proto::Version) -> BufferController {
		let mut buffers = self.buffers.lock();
		if let Some(live) = buffers.get(path).filter(|b| !b.is_stopped()) {
			return live.clone();
		}
		let buffer = BufferController::new(&self.id, path, content, version, Arc::clone(&self.conn));
		buffers.insert(path.to_owned(), buffer.clone());
		drop(buffers);
		self.activity.notify_waiters();
		tracing::debug!(workspace = %self.id, path, "buffer attached");
		buffer
	}

	fn teardown(&self) {
		if self.closed.swap(true, Ordering::AcqRel) {
			return;
		}
		self.events.stop();
		self.cursor.stop();
		for buffer in self.buffers.lock().values() {
			buffer.stop();
		}
		self.activity.notify_waiters();
		tracing::debug!(workspace = %self.id, "workspace torn down");
	}
}

impl Inbox for WorkspaceInner {
	fn deliver(&self, notification: Notification) {
		match notification {
			Notification::Workspace { event, .. } => {
				if !self.events.push(event) {
					tracing::trace!(workspace = %self.id, "dropping event for stopped workspace");
				}
			}
			Notification::Buffer { path, update, .. } => {
				let buffer = self.buffers.lock().get(&path).cloned();
				match buffer {
					Some(buffer) => {
						buffer.deliver(update);
						self.activity.notify_waiters();
					}
					None => tracing::debug!(workspace = %self.id, path, "dropping update for detached buffer"),
				}
			}
			Notification::Cursor { cursor, .. } => self.cursor.deliver(cursor),
			Notification::BufferClosed { path, .. } => {
				if let Some(buffer) = self.buffers.lock().get(&path) {
					buffer.stop();
				}
				self.activity.notify_waiters();
				tracing::info!(workspace = %self.id, path, "buffer deleted remotely");
			}
			Notification::WorkspaceClosed { .. } => {
				tracing::info!(workspace = %self.id, "workspace deleted remotely");
				self.conn.unregister(&self.id);
				self.teardown();
			}
		}
	}

	fn disconnect(&self) {
		self.teardown();
	}
}

impl std::fmt::Debug for Workspace {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		f.debug_struct("Workspace")
			.field("id", &self.0.id)
			.field("user", &self.0.user.name)
			.field("closed", &self.0.closed.load(Ordering::Relaxed))
			.finish()
	}
}

#[cfg(test)]
mod tests {
	use tandem_proto::protocol::read_frame;
	use tandem_proto::{BufferUpdate, ClientFrame, ClientNotification, Selection, TextChange, Version};
	use tandem_worker::Executor;
	use tokio::io::{DuplexStream, ReadHalf};
	use uuid::Uuid;

	use super::*;
	use crate::controller::Publisher;

	fn joined() -> std::io::Result<(Workspace, ReadHalf<DuplexStream>)> {
		let (client, server) = tokio::io::duplex(4096);
		let (client_r, client_w) = tokio::io::split(client);
		let (server_r, _server_w) = tokio::io::split(server);
		let conn = Connection::start(client_r, client_w, Executor::current()?);
		let user = User {
			id: Uuid::nil(),
			name: "alice".into(),
		};
		Ok((Workspace::new("ws", user, conn), server_r))
	}

	async fn next_frame(server: &mut ReadHalf<DuplexStream>) -> std::io::Result<ClientFrame> {
		match read_frame::<_, ClientFrame>(server).await? {
			Some(frame) => Ok(frame),
			None => panic!("client closed the connection"),
		}
	}

	fn close_remotely(ws: &Workspace, path: &str) {
		Inbox::deliver(
			&*ws.0,
			Notification::BufferClosed {
				workspace: "ws".into(),
				path: path.into(),
			},
		);
	}

	#[tokio::test]
	async fn live_detach_releases_the_server_attachment() -> std::io::Result<()> {
		let (ws, mut server) = joined()?;
		ws.0.install("a.txt", "", Version::default());

		assert_eq!(ws.detach_buffer("a.txt"), DetachResult::Detaching);
		match next_frame(&mut server).await? {
			ClientFrame::Request(req) => {
				assert!(matches!(req.payload, RequestPayload::DetachBuffer { ref path, .. } if path == "a.txt"), "{req:?}")
			}
			other => panic!("expected detach request, got {other:?}"),
		}
		Ok(())
	}

	#[tokio::test]
	async fn detaching_a_remotely_closed_buffer_stays_local() -> std::io::Result<()> {
		let (ws, mut server) = joined()?;
		let buffer = ws.0.install("a.txt", "", Version::default());
		close_remotely(&ws, "a.txt");
		assert!(buffer.is_stopped());

		assert_eq!(ws.detach_buffer("a.txt"), DetachResult::AlreadyDetached);
		assert_eq!(ws.detach_buffer("a.txt"), DetachResult::NotAttached);

		// Nothing was queued ahead of this cursor move.
		ws.cursor().send(Selection::caret(0, 0, "b.txt")).expect("send cursor");
		assert!(matches!(
			next_frame(&mut server).await?,
			ClientFrame::Notify(ClientNotification::MoveCursor { .. })
		));
		Ok(())
	}

	#[tokio::test]
	async fn select_skips_stopped_buffers() {
		let (ws, _server) = joined().expect("runtime");
		let closed = ws.0.install("closed.txt", "", Version::default());
		closed.deliver(BufferUpdate {
			hash: None,
			version: Version::from(vec![1]),
			change: TextChange::insert(0, "x"),
		});
		close_remotely(&ws, "closed.txt");
		assert!(closed.has_pending());

		let selected = ws.select_buffer(Some(Duration::from_millis(50))).await.expect("joined");
		assert!(selected.is_none());

		let live = ws.0.install("live.txt", "", Version::default());
		live.deliver(BufferUpdate {
			hash: None,
			version: Version::from(vec![1]),
			change: TextChange::insert(0, "y"),
		});
		let selected = ws.select_buffer(Some(Duration::from_millis(50))).await.expect("joined");
		assert_eq!(selected.map(|b| b.name().to_owned()).as_deref(), Some("live.txt"));
	}
}
