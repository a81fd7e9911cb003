//! Common test utilities and helpers.

use std::collections::VecDeque;

use tandem_proto::{
	ClientNotification, Notification, RemoteFailure, Request, RequestId, RequestPayload, ResponsePayload, ServerFrame,
	Version,
};
use tokio::sync::mpsc;

use crate::core::{ServerCore, SessionId};

pub const PASSWORD: &str = "pw";

/// A test harness that captures frames sent to a session.
pub struct TestSession {
	pub id: SessionId,
	rx: mpsc::UnboundedReceiver<ServerFrame>,
	stash: VecDeque<Notification>,
	next_request: u64,
}

impl TestSession {
	/// Registers an anonymous session.
	pub fn connect(core: &ServerCore) -> Self {
		let (tx, rx) = mpsc::unbounded_channel();
		Self {
			id: core.register_session(tx),
			rx,
			stash: VecDeque::new(),
			next_request: 0,
		}
	}

	/// Registers a session logged in as `name`.
	pub fn login(core: &ServerCore, name: &str) -> Self {
		let mut session = Self::connect(core);
		let result = session.request(
			core,
			RequestPayload::Login {
				name: name.into(),
				password: PASSWORD.into(),
			},
		);
		assert!(matches!(result, Ok(ResponsePayload::LoggedIn { .. })), "login failed: {result:?}");
		session
	}

	/// Runs a request and returns its result. Notifications received meanwhile are kept.
	pub fn request(&mut self, core: &ServerCore, payload: RequestPayload) -> Result<ResponsePayload, RemoteFailure> {
		self.next_request += 1;
		let id = RequestId(self.next_request);
		core.handle_request(self.id, Request { id, payload });
		while let Ok(frame) = self.rx.try_recv() {
			match frame {
				ServerFrame::Response(response) if response.id == id => return response.result,
				ServerFrame::Response(response) => panic!("stray response: {response:?}"),
				ServerFrame::Notification(notification) => self.stash.push_back(notification),
			}
		}
		panic!("no response to request {id:?}");
	}

	/// Runs a request that must succeed with `Done`.
	pub fn done(&mut self, core: &ServerCore, payload: RequestPayload) {
		let result = self.request(core, payload);
		assert!(matches!(result, Ok(ResponsePayload::Done)), "request failed: {result:?}");
	}

	/// Runs a request that must fail and returns the failure.
	pub fn fail(&mut self, core: &ServerCore, payload: RequestPayload) -> RemoteFailure {
		match self.request(core, payload) {
			Ok(payload) => panic!("request unexpectedly succeeded: {payload:?}"),
			Err(failure) => failure,
		}
	}

	/// Attaches to a buffer and returns its snapshot.
	pub fn attach(&mut self, core: &ServerCore, workspace: &str, path: &str) -> (String, Version) {
		let result = self.request(
			core,
			RequestPayload::AttachBuffer {
				workspace: workspace.into(),
				path: path.into(),
			},
		);
		match result {
			Ok(ResponsePayload::Content { content, version }) => (content, version),
			other => panic!("attach failed: {other:?}"),
		}
	}

	pub fn notify(&self, core: &ServerCore, notification: ClientNotification) {
		core.handle_notification(self.id, notification);
	}

	/// Every notification received so far, oldest first.
	pub fn notifications(&mut self) -> Vec<Notification> {
		while let Ok(frame) = self.rx.try_recv() {
			match frame {
				ServerFrame::Notification(notification) => self.stash.push_back(notification),
				ServerFrame::Response(response) => panic!("stray response: {response:?}"),
			}
		}
		self.stash.drain(..).collect()
	}
}

/// Creates `workspace` owned by `owner`, invites and joins every guest, and clears the
/// notifications this produced.
pub fn shared_workspace(core: &ServerCore, owner: &mut TestSession, guests: &mut [(&str, &mut TestSession)], workspace: &str) {
	owner.done(core, RequestPayload::CreateWorkspace { workspace: workspace.into() });
	owner.done(core, RequestPayload::JoinWorkspace { workspace: workspace.into() });
	for (name, guest) in guests.iter_mut() {
		owner.done(
			core,
			RequestPayload::InviteToWorkspace {
				workspace: workspace.into(),
				user: (*name).into(),
			},
		);
		guest.done(core, RequestPayload::JoinWorkspace { workspace: workspace.into() });
	}
	owner.notifications();
	for (_, guest) in guests.iter_mut() {
		guest.notifications();
	}
}
