//! Live replica of one buffer.

use std::sync::Arc;

use parking_lot::{Mutex, RwLock};
use ropey::Rope;
use tandem_proto::{BufferUpdate, ClientNotification, RequestPayload, ResponsePayload, TextChange, Version, fingerprint_rope};

use crate::controller::{Feed, Publisher, delegate_controller};
use crate::errors::{ControllerError, ControllerResult};
use crate::network::Connection;

/// Handle to an attached buffer.
///
/// Receives [`BufferUpdate`]s for changes made by others and publishes local [`TextChange`]s.
/// Remote changes are applied to [`Self::content`] as they arrive, before they are queued, so the
/// snapshot always includes everything a consumer can receive. Consumers should [`Self::ack`] each
/// update's version once they have applied it on their side.
///
/// Clones share the same replica.
#[derive(Clone)]
pub struct BufferController(Arc<BufferInner>);

struct BufferInner {
	workspace: String,
	path: String,
	conn: Arc<Connection>,
	content: RwLock<Rope>,
	version: Mutex<Version>,
	feed: Feed<BufferUpdate>,
	/// Local changes sent while a resync is in flight, `None` when no resync is pending.
	/// Locked after `content`.
	resync: Mutex<Option<Vec<TextChange>>>,
}

delegate_controller!(BufferController, BufferUpdate, |this| this.0.feed);

impl BufferController {
	pub(crate) fn new(workspace: &str, path: &str, content: &str, version: Version, conn: Arc<Connection>) -> Self {
		let feed = Feed::new(conn.executor().clone(), format!("buffer:{workspace}/{path}"));
		Self(Arc::new(BufferInner {
			workspace: workspace.to_owned(),
			path: path.to_owned(),
			conn,
			content: RwLock::new(Rope::from_str(content)),
			version: Mutex::new(version),
			feed,
			resync: Mutex::new(None),
		}))
	}

	/// Path of the buffer inside its workspace.
	pub fn name(&self) -> &str {
		&self.0.path
	}

	/// Id of the owning workspace.
	pub fn workspace_id(&self) -> &str {
		&self.0.workspace
	}

	/// Current text of the local replica.
	///
	/// Right after attaching this is the server snapshot taken at attach time.
	pub fn content(&self) -> String {
		self.0.content.read().to_string()
	}

	/// Latest server version this replica has seen.
	pub fn version(&self) -> Version {
		self.0.version.lock().clone()
	}

	/// Tells the server every change up to `version` was applied, letting it prune history.
	///
	/// # Errors
	///
	/// [`ControllerError::Stopped`] if the controller is stopped.
	pub fn ack(&self, version: Version) -> ControllerResult<()> {
		if self.0.feed.is_stopped() {
			return Err(ControllerError::Stopped);
		}
		self.0
			.conn
			.notify(ClientNotification::Ack {
				workspace: self.0.workspace.clone(),
				path: self.0.path.clone(),
				version,
			})
			.map_err(|_| ControllerError::Stopped)
	}

	pub(crate) fn has_pending(&self) -> bool {
		self.0.feed.has_pending()
	}

	/// Applies a remote update and queues it. Runs on the delivery path.
	pub(crate) fn deliver(&self, update: BufferUpdate) {
		if self.0.feed.is_stopped() {
			tracing::trace!(path = %self.0.path, "dropping update for stopped buffer");
			return;
		}
		let local_hash = {
			let mut rope = self.0.content.write();
			update.change.apply_to_rope(&mut rope);
			fingerprint_rope(&rope).1
		};
		{
			let mut version = self.0.version.lock();
			*version = version.join(&update.version);
		}
		if let Some(expected) = update.hash
			&& expected != local_hash
		{
			tracing::warn!(
				workspace = %self.0.workspace,
				path = %self.0.path,
				expected,
				actual = local_hash,
				"buffer desync detected"
			);
			self.resync();
		}
		self.0.feed.push(update);
	}

	/// Replaces the replica with the server's authoritative content.
	///
	/// Local changes sent after the request are not part of the snapshot; they are replayed on top
	/// of it.
	fn resync(&self) {
		// `send` must not run between arming and submitting.
		let _content = self.0.content.write();
		{
			let mut pending = self.0.resync.lock();
			if pending.is_some() {
				return;
			}
			*pending = Some(Vec::new());
		}
		let this = self.clone();
		let payload = RequestPayload::BufferContent {
			workspace: self.0.workspace.clone(),
			path: self.0.path.clone(),
		};
		self.0.conn.submit_inline(payload, move |result| match result {
			Ok(ResponsePayload::Content { content, version }) => this.replace(&content, version),
			Ok(other) => {
				this.0.resync.lock().take();
				tracing::warn!(path = %this.0.path, response = ?other, "unexpected resync response");
			}
			Err(e) => {
				this.0.resync.lock().take();
				tracing::warn!(path = %this.0.path, error = %e, "buffer resync failed");
			}
		});
	}

	fn replace(&self, content: &str, version: Version) {
		let mut rope = self.0.content.write();
		let replayed = self.0.resync.lock().take().unwrap_or_default();
		*rope = Rope::from_str(content);
		for change in &replayed {
			change.apply_to_rope(&mut rope);
		}
		*self.0.version.lock() = version;
		tracing::info!(path = %self.0.path, replayed = replayed.len(), "buffer resynchronized");
	}
}

impl Publisher<TextChange> for BufferController {
	/// Applies `change` locally and forwards it to the server.
	fn send(&self, change: TextChange) -> ControllerResult<()> {
		if self.0.feed.is_stopped() {
			return Err(ControllerError::Stopped);
		}
		// Hold the write lock across the enqueue so local edits reach the wire in apply order.
		let mut rope = self.0.content.write();
		change.apply_to_rope(&mut rope);
		let change = change.with_hash(fingerprint_rope(&rope).1);
		if let Some(pending) = self.0.resync.lock().as_mut() {
			pending.push(change.clone());
		}
		self.0
			.conn
			.notify(ClientNotification::Change {
				workspace: self.0.workspace.clone(),
				path: self.0.path.clone(),
				change,
			})
			.map_err(|_| ControllerError::Stopped)
	}
}

impl std::fmt::Debug for BufferController {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		f.debug_struct("BufferController")
			.field("workspace", &self.0.workspace)
			.field("path", &self.0.path)
			.field("stopped", &self.0.feed.is_stopped())
			.finish()
	}
}

#[cfg(test)]
mod tests {
	use std::time::Duration;

	use tandem_proto::protocol::{read_frame, write_frame};
	use tandem_proto::{ClientFrame, RequestId, Response, ServerFrame, hash};
	use tandem_worker::Executor;
	use tokio::io::{DuplexStream, ReadHalf, WriteHalf};

	use super::*;
	use crate::controller::Controller;

	struct FakeServer {
		reader: ReadHalf<DuplexStream>,
		writer: WriteHalf<DuplexStream>,
	}

	impl FakeServer {
		async fn next(&mut self) -> std::io::Result<ClientFrame> {
			match read_frame::<_, ClientFrame>(&mut self.reader).await? {
				Some(frame) => Ok(frame),
				None => panic!("client closed the connection"),
			}
		}

		async fn content_request(&mut self) -> std::io::Result<RequestId> {
			match self.next().await? {
				ClientFrame::Request(req) => {
					assert!(matches!(req.payload, RequestPayload::BufferContent { .. }), "{req:?}");
					Ok(req.id)
				}
				other => panic!("expected content request, got {other:?}"),
			}
		}

		async fn answer(&mut self, id: RequestId, content: &str, version: Vec<u64>) -> std::io::Result<()> {
			let response = ServerFrame::Response(Response {
				id,
				result: Ok(ResponsePayload::Content {
					content: content.to_owned(),
					version: Version::from(version),
				}),
			});
			write_frame(&mut self.writer, &response).await
		}
	}

	fn attached(content: &str) -> std::io::Result<(BufferController, FakeServer)> {
		let (client, server) = tokio::io::duplex(4096);
		let (client_r, client_w) = tokio::io::split(client);
		let (reader, writer) = tokio::io::split(server);
		let conn = Connection::start(client_r, client_w, Executor::current()?);
		let buffer = BufferController::new("ws", "doc.txt", content, Version::default(), conn);
		Ok((buffer, FakeServer { reader, writer }))
	}

	fn diverged(change: TextChange) -> BufferUpdate {
		BufferUpdate {
			hash: Some(hash("what the server has")),
			version: Version::from(vec![1]),
			change,
		}
	}

	async fn settle(buffer: &BufferController, expected: &str) {
		let waited = tokio::time::timeout(Duration::from_secs(5), async {
			while buffer.content() != expected {
				tokio::time::sleep(Duration::from_millis(5)).await;
			}
		})
		.await;
		assert!(waited.is_ok(), "content stuck at {:?}", buffer.content());
	}

	#[tokio::test]
	async fn matching_hash_needs_no_resync() {
		let (buffer, _server) = attached("abc").expect("runtime");
		let change = TextChange::insert(3, "d");
		buffer.deliver(BufferUpdate {
			hash: Some(hash("abcd")),
			version: Version::from(vec![1]),
			change: change.clone(),
		});

		assert_eq!(buffer.content(), "abcd");
		assert_eq!(buffer.version(), Version::from(vec![1]));
		assert!(buffer.0.resync.lock().is_none());
		assert_eq!(buffer.try_recv().expect("live").map(|u| u.change), Some(change));
	}

	#[tokio::test]
	async fn hash_mismatch_replaces_replica_with_server_content() -> std::io::Result<()> {
		let (buffer, mut server) = attached("abc")?;
		let change = TextChange::insert(0, "x");
		buffer.deliver(diverged(change.clone()));

		assert_eq!(buffer.content(), "xabc");
		let update = buffer.try_recv().expect("live").expect("update stays queued");
		assert_eq!(update.change, change);

		let id = server.content_request().await?;
		server.answer(id, "what the server has", vec![1, 4]).await?;
		settle(&buffer, "what the server has").await;
		assert_eq!(buffer.version(), Version::from(vec![1, 4]));
		assert!(buffer.0.resync.lock().is_none());
		Ok(())
	}

	#[tokio::test]
	async fn local_edits_survive_an_inflight_resync() -> std::io::Result<()> {
		let (buffer, mut server) = attached("abc")?;
		buffer.deliver(diverged(TextChange::insert(0, "x")));
		let id = server.content_request().await?;

		buffer.send(TextChange::insert(1, "L")).expect("send");
		assert_eq!(buffer.content(), "xLabc");
		match server.next().await? {
			ClientFrame::Notify(ClientNotification::Change { change, .. }) => assert_eq!(change.content, "L"),
			other => panic!("expected change, got {other:?}"),
		}

		// The snapshot predates the edit; the server applies "L" after answering.
		server.answer(id, "r", vec![2]).await?;
		settle(&buffer, "rL").await;
		assert!(buffer.0.resync.lock().is_none());
		Ok(())
	}

	#[tokio::test]
	async fn one_resync_at_a_time() -> std::io::Result<()> {
		let (buffer, mut server) = attached("")?;
		buffer.deliver(diverged(TextChange::insert(0, "a")));
		buffer.deliver(diverged(TextChange::insert(0, "b")));
		let id = server.content_request().await?;
		server.answer(id, "ab", vec![2]).await?;
		settle(&buffer, "ab").await;

		// Only one request went out; the next frame is this edit.
		buffer.send(TextChange::insert(2, "c")).expect("send");
		assert!(matches!(server.next().await?, ClientFrame::Notify(ClientNotification::Change { .. })));
		assert_eq!(buffer.content(), "abc");
		Ok(())
	}
}
