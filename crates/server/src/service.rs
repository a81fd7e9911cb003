//! Per-connection service.

use std::convert::Infallible;
use std::future::{Ready, ready};
use std::sync::Arc;
use std::task::{Context, Poll};

use tandem_proto::ClientFrame;
use tower_service::Service;

use crate::core::{ServerCore, SessionId, SessionSink};

/// Serves the frames of one connection against the shared [`ServerCore`].
///
/// Responses are not returned from [`Service::call`]: the core pushes them into the session sink
/// so they stay ordered with the notifications of the same session.
pub struct SessionService {
	core: Arc<ServerCore>,
	session: SessionId,
}

impl std::fmt::Debug for SessionService {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		f.debug_struct("SessionService").field("session", &self.session).finish()
	}
}

impl SessionService {
	/// Registers a new session whose frames go to `sink`.
	#[must_use]
	pub fn new(core: Arc<ServerCore>, sink: SessionSink) -> Self {
		let session = core.register_session(sink);
		Self { core, session }
	}

	/// Session served by this instance.
	pub fn session(&self) -> SessionId {
		self.session
	}
}

impl Drop for SessionService {
	/// Authoritatively cleans up the session when the connection goes away.
	fn drop(&mut self) {
		self.core.unregister_session(self.session);
	}
}

impl Service<ClientFrame> for SessionService {
	type Response = ();
	type Error = Infallible;
	type Future = Ready<Result<(), Infallible>>;

	fn poll_ready(&mut self, _cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
		Poll::Ready(Ok(()))
	}

	fn call(&mut self, frame: ClientFrame) -> Self::Future {
		match frame {
			ClientFrame::Request(request) => self.core.handle_request(self.session, request),
			ClientFrame::Notify(notification) => self.core.handle_notification(self.session, notification),
		}
		ready(Ok(()))
	}
}
