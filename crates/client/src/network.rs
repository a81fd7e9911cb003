//! TCP connection to the server and demultiplexing of inbound frames.
//!
//! A connection owns two tasks: the writer drains an outbound queue into the socket, the reader
//! resolves pending requests and routes notifications to the workspace they belong to. The
//! reader is the delivery path of every controller in the session; it never blocks on consumers.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};

use parking_lot::Mutex;
use tandem_proto::protocol::{read_frame, write_frame};
use tandem_proto::{
	ClientFrame, ClientNotification, Notification, Request, RequestId, RequestPayload, ResponsePayload, ServerFrame,
};
use tandem_worker::{Executor, TaskClass};
use tokio::io::{AsyncRead, AsyncWrite, BufReader, BufWriter};
use tokio::net::TcpStream;
use tokio::sync::{mpsc, oneshot};
use tokio_util::sync::CancellationToken;

use crate::errors::{ConnectionError, ConnectionResult};

type Continuation = Box<dyn FnOnce(ConnectionResult<ResponsePayload>) + Send>;

enum Reply {
	Channel(oneshot::Sender<ConnectionResult<ResponsePayload>>),
	/// Runs on the delivery path, ordered with the notifications around it.
	Inline(Continuation),
}

impl Reply {
	fn complete(self, result: ConnectionResult<ResponsePayload>) {
		match self {
			Self::Channel(tx) => {
				let _ = tx.send(result);
			}
			Self::Inline(f) => f(result),
		}
	}
}

/// Receiver of the notifications routed to one workspace.
pub(crate) trait Inbox: Send + Sync {
	/// Handles one notification. Runs on the delivery path and must not block.
	fn deliver(&self, notification: Notification);

	/// The connection is gone; stop everything.
	fn disconnect(&self);
}

#[derive(Default)]
struct Pending {
	waiters: HashMap<RequestId, Reply>,
	closed: bool,
}

/// Shared handle to a live connection.
pub(crate) struct Connection {
	outbound: mpsc::UnboundedSender<ClientFrame>,
	pending: Mutex<Pending>,
	routes: Mutex<HashMap<String, Weak<dyn Inbox>>>,
	next_id: AtomicU64,
	shutdown: CancellationToken,
	executor: Executor,
}

impl Connection {
	/// Dials `endpoint` and starts the reader and writer tasks.
	pub(crate) async fn open(endpoint: &str, executor: Executor) -> ConnectionResult<Arc<Self>> {
		let addr = endpoint.to_owned();
		// Dial on the executor so the socket is registered with the runtime that drives it.
		let stream = executor
			.spawn(TaskClass::Network, async move { TcpStream::connect(addr).await })
			.await
			.map_err(|e| ConnectionError::Transport(e.to_string()))??;
		stream.set_nodelay(true)?;
		tracing::debug!(endpoint, "connected");

		let (reader, writer) = stream.into_split();
		Ok(Self::start(reader, writer, executor))
	}

	/// Wires an already established byte stream.
	pub(crate) fn start<R, W>(reader: R, writer: W, executor: Executor) -> Arc<Self>
	where
		R: AsyncRead + Unpin + Send + 'static,
		W: AsyncWrite + Unpin + Send + 'static,
	{
		let (outbound, rx) = mpsc::unbounded_channel();
		let conn = Arc::new(Self {
			outbound,
			pending: Mutex::new(Pending::default()),
			routes: Mutex::new(HashMap::new()),
			next_id: AtomicU64::new(1),
			shutdown: CancellationToken::new(),
			executor: executor.clone(),
		});

		executor.spawn(TaskClass::Network, write_loop(BufWriter::new(writer), rx, conn.shutdown.clone()));
		executor.spawn(TaskClass::Network, read_loop(BufReader::new(reader), Arc::downgrade(&conn), conn.shutdown.clone()));
		conn
	}

	pub(crate) fn executor(&self) -> &Executor {
		&self.executor
	}

	/// Queues a request and returns the receiver of its response.
	///
	/// Requests are written in submission order, so a sync caller can fire a request and rely on
	/// it reaching the server before anything it submits afterwards.
	pub(crate) fn submit(&self, payload: RequestPayload) -> oneshot::Receiver<ConnectionResult<ResponsePayload>> {
		let (tx, rx) = oneshot::channel();
		self.enqueue(payload, Reply::Channel(tx));
		rx
	}

	/// Queues a request whose response is handled by `then` on the delivery path.
	///
	/// `then` sees the response after every notification the server sent before it and before any
	/// sent after it. It must not block.
	pub(crate) fn submit_inline(&self, payload: RequestPayload, then: impl FnOnce(ConnectionResult<ResponsePayload>) + Send + 'static) {
		self.enqueue(payload, Reply::Inline(Box::new(then)));
	}

	fn enqueue(&self, payload: RequestPayload, reply: Reply) {
		let mut pending = self.pending.lock();
		if pending.closed {
			drop(pending);
			reply.complete(Err(closed()));
			return;
		}
		let id = RequestId(self.next_id.fetch_add(1, Ordering::Relaxed));
		if self.outbound.send(ClientFrame::Request(Request { id, payload })).is_err() {
			drop(pending);
			reply.complete(Err(closed()));
			return;
		}
		pending.waiters.insert(id, reply);
	}

	/// Sends a request and waits for its response.
	pub(crate) async fn request(&self, payload: RequestPayload) -> ConnectionResult<ResponsePayload> {
		self.submit(payload).await.unwrap_or_else(|_| Err(closed()))
	}

	/// Fires a request whose response only matters for logging.
	pub(crate) fn request_detached(&self, payload: RequestPayload, what: &'static str) {
		let rx = self.submit(payload);
		self.executor.spawn(TaskClass::Network, async move {
			match rx.await {
				Ok(Ok(_)) => {}
				Ok(Err(e)) => tracing::warn!(error = %e, what, "background request failed"),
				Err(_) => tracing::debug!(what, "background request abandoned"),
			}
		});
	}

	/// Sends a fire-and-forget message.
	pub(crate) fn notify(&self, message: ClientNotification) -> ConnectionResult<()> {
		if self.pending.lock().closed {
			return Err(closed());
		}
		self.outbound.send(ClientFrame::Notify(message)).map_err(|_| closed())
	}

	/// Routes notifications for `workspace` to `inbox` from now on.
	pub(crate) fn register(&self, workspace: &str, inbox: Weak<dyn Inbox>) {
		self.routes.lock().insert(workspace.to_owned(), inbox);
	}

	/// Stops routing notifications for `workspace`.
	pub(crate) fn unregister(&self, workspace: &str) {
		self.routes.lock().remove(workspace);
	}

	/// Shuts the connection down. Routed workspaces are disconnected by the reader.
	pub(crate) fn close(&self) {
		self.shutdown.cancel();
	}

	pub(crate) fn is_closed(&self) -> bool {
		self.pending.lock().closed
	}

	fn route(&self, notification: Notification) {
		let inbox = self.routes.lock().get(notification.workspace()).and_then(Weak::upgrade);
		match inbox {
			Some(inbox) => inbox.deliver(notification),
			None => tracing::debug!(workspace = notification.workspace(), "dropping notification for unknown workspace"),
		}
	}

	fn resolve(&self, id: RequestId, result: ConnectionResult<ResponsePayload>) {
		let waiter = self.pending.lock().waiters.remove(&id);
		match waiter {
			Some(reply) => reply.complete(result),
			None => tracing::warn!(id = id.0, "response for unknown request"),
		}
	}

	/// Fails every pending request and stops every routed workspace.
	fn teardown(&self, reason: &str) {
		let waiters = {
			let mut pending = self.pending.lock();
			pending.closed = true;
			std::mem::take(&mut pending.waiters)
		};
		let inboxes: Vec<_> = self.routes.lock().drain().filter_map(|(_, inbox)| inbox.upgrade()).collect();
		for inbox in inboxes {
			inbox.disconnect();
		}
		for (_, reply) in waiters {
			reply.complete(Err(ConnectionError::Transport(reason.to_owned())));
		}
		self.shutdown.cancel();
	}
}

impl Drop for Connection {
	fn drop(&mut self) {
		self.shutdown.cancel();
	}
}

pub(crate) fn closed() -> ConnectionError {
	ConnectionError::Transport("connection closed".into())
}

pub(crate) fn unexpected(payload: ResponsePayload) -> ConnectionError {
	ConnectionError::Transport(format!("unexpected response: {payload:?}"))
}

async fn write_loop<W>(mut writer: W, mut rx: mpsc::UnboundedReceiver<ClientFrame>, shutdown: CancellationToken)
where
	W: AsyncWrite + Unpin,
{
	loop {
		tokio::select! {
			_ = shutdown.cancelled() => break,
			frame = rx.recv() => {
				let Some(frame) = frame else { break };
				if let Err(e) = write_frame(&mut writer, &frame).await {
					tracing::warn!(error = %e, "connection write failed");
					shutdown.cancel();
					break;
				}
			}
		}
	}
	tracing::trace!("connection writer finished");
}

async fn read_loop<R>(mut reader: R, conn: Weak<Connection>, shutdown: CancellationToken)
where
	R: AsyncRead + Unpin,
{
	let reason = loop {
		let frame = tokio::select! {
			_ = shutdown.cancelled() => break "connection shut down".to_owned(),
			frame = read_frame::<_, ServerFrame>(&mut reader) => frame,
		};
		let Some(live) = conn.upgrade() else {
			return;
		};
		match frame {
			Ok(Some(ServerFrame::Response(resp))) => live.resolve(resp.id, resp.result.map_err(ConnectionError::Remote)),
			Ok(Some(ServerFrame::Notification(notification))) => live.route(notification),
			Ok(None) => break "server closed the connection".to_owned(),
			Err(e) => {
				tracing::warn!(error = %e, "connection read failed");
				break e.to_string();
			}
		}
	};
	tracing::debug!(reason, "connection lost");
	if let Some(conn) = conn.upgrade() {
		conn.teardown(&reason);
	}
}
