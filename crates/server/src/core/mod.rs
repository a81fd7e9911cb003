//! Authoritative collaboration state.
//!
//! # Mental model
//!
//! - Every connection registers a [`SessionId`] with a [`SessionSink`]. A session logs in once and
//!   then joins workspaces and attaches buffers.
//! - The server is the sequencer of every buffer: changes are applied to the authoritative rope in
//!   arrival order, stamped with the buffer's version vector and fanned out to the other attached
//!   sessions. Authors never receive their own changes back.
//! - Each buffer retains the versions it produced until every attached session acknowledged them.
//!
//! # Invariants
//!
//! 1. Responses are pushed into the requester's sink under the state lock, so a response is
//!    ordered with every notification sent to the same session.
//!    - Enforced in: `ServerCore::handle_request`
//!    - Tested by: `core::tests::buffer_sync::attach_snapshot_precedes_later_changes`
//! 2. A buffer's retained history only holds versions some attached session has not acknowledged.
//!    - Enforced in: `BufferEntry::prune`
//!    - Tested by: `core::tests::buffer_sync::history_is_pruned_once_every_attachment_acks`
//! 3. Deleting a buffer notifies every other attached session; deleting a workspace notifies every
//!    other member.
//!    - Enforced in: `State::delete_buffer`, `State::delete_workspace`
//!    - Tested by: `core::tests::buffer_sync::delete_closes_remote_attachments`,
//!      `core::tests::workspaces::delete_closes_workspace_for_members`
//! 4. Session unregister leaves every joined workspace and drops every attachment.
//!    - Enforced in: `ServerCore::unregister_session`
//!    - Tested by: `core::tests::workspaces::unregister_announces_departure`

mod buffer;
mod session;
mod workspace;

#[cfg(test)]
mod tests;

use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet, VecDeque};
use std::sync::Arc;
use std::sync::atomic::AtomicU64;

use parking_lot::Mutex;
use ropey::Rope;
use tandem_proto::{
	ClientNotification, ErrorCode, RemoteFailure, Request, RequestPayload, Response, ResponsePayload, ServerFrame,
	Token, User, Version,
};
use tokio::sync::mpsc;
use uuid::Uuid;

/// Sink for frames sent to a connected session.
pub type SessionSink = mpsc::UnboundedSender<ServerFrame>;

/// Identifier of one connection, unique for the lifetime of a [`ServerCore`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct SessionId(pub u64);

type Outcome = Result<ResponsePayload, RemoteFailure>;

/// Shared state of the server.
#[derive(Debug, Default)]
pub struct ServerCore {
	state: Mutex<State>,
	next_session: AtomicU64,
}

#[derive(Debug, Default)]
struct State {
	/// Accounts keyed by name.
	accounts: HashMap<String, Account>,
	sessions: HashMap<SessionId, SessionEntry>,
	workspaces: BTreeMap<String, WorkspaceEntry>,
}

#[derive(Debug)]
struct Account {
	user: User,
	password: String,
}

#[derive(Debug)]
struct SessionEntry {
	sink: SessionSink,
	login: Option<Login>,
	joined: BTreeSet<String>,
}

#[derive(Debug)]
struct Login {
	user: User,
	token: Token,
}

#[derive(Debug)]
struct WorkspaceEntry {
	owner: Uuid,
	invited: HashSet<Uuid>,
	members: BTreeSet<SessionId>,
	buffers: BTreeMap<String, BufferEntry>,
}

/// Server-authoritative state of one buffer.
#[derive(Debug, Default)]
struct BufferEntry {
	rope: Rope,
	version: Version,
	/// Version vector slot of each authoring user, in order of first edit.
	agents: Vec<Uuid>,
	/// Versions produced by applied changes, oldest first.
	history: VecDeque<Version>,
	/// Attached sessions and the latest version each acknowledged.
	attached: BTreeMap<SessionId, Version>,
}

impl ServerCore {
	/// Creates an empty server.
	#[must_use]
	pub fn new() -> Arc<Self> {
		Arc::new(Self::default())
	}

	/// Executes `request` for `session` and pushes the response into its sink.
	pub fn handle_request(&self, session: SessionId, request: Request) {
		let Request { id, payload } = request;
		let kind = payload.kind();
		let mut state = self.state.lock();
		let result = state.execute(session, payload);
		match &result {
			Ok(_) => tracing::trace!(session = session.0, request = kind, "request served"),
			Err(failure) => tracing::debug!(
				session = session.0,
				request = kind,
				code = ?failure.code,
				error = %failure.message,
				"request rejected"
			),
		}
		state.send(session, ServerFrame::Response(Response { id, result }));
	}

	/// Applies a fire-and-forget message from `session`. Rejections are only logged.
	pub fn handle_notification(&self, session: SessionId, notification: ClientNotification) {
		let kind = notification.kind();
		let mut state = self.state.lock();
		let result = match notification {
			ClientNotification::Change { workspace, path, change } => {
				state.apply_change(session, &workspace, &path, change)
			}
			ClientNotification::Ack { workspace, path, version } => state.ack(session, &workspace, &path, &version),
			ClientNotification::MoveCursor { workspace, sel } => state.move_cursor(session, &workspace, sel),
		};
		if let Err(failure) = result {
			tracing::warn!(
				session = session.0,
				notification = kind,
				code = ?failure.code,
				error = %failure.message,
				"notification rejected"
			);
		}
	}

	/// Number of retained history entries of a buffer.
	pub fn history_len(&self, workspace: &str, path: &str) -> Option<usize> {
		let state = self.state.lock();
		state.workspaces.get(workspace)?.buffers.get(path).map(|b| b.history.len())
	}

	/// Authoritative content of a buffer.
	pub fn buffer_content(&self, workspace: &str, path: &str) -> Option<String> {
		let state = self.state.lock();
		state.workspaces.get(workspace)?.buffers.get(path).map(|b| b.rope.to_string())
	}
}

impl State {
	fn execute(&mut self, session: SessionId, payload: RequestPayload) -> Outcome {
		match payload {
			RequestPayload::Login { name, password } => self.login(session, name, password),
			RequestPayload::Refresh { token } => self.refresh(session, &token),
			RequestPayload::CreateWorkspace { workspace } => self.create_workspace(session, workspace),
			RequestPayload::DeleteWorkspace { workspace } => self.delete_workspace(session, &workspace),
			RequestPayload::InviteToWorkspace { workspace, user } => self.invite(session, &workspace, &user),
			RequestPayload::ListWorkspaces { owned, invited } => self.list_workspaces(session, owned, invited),
			RequestPayload::JoinWorkspace { workspace } => self.join(session, &workspace),
			RequestPayload::LeaveWorkspace { workspace } => self.leave(session, &workspace),
			RequestPayload::ListUsers { workspace } => self.list_users(session, &workspace),
			RequestPayload::ListBuffers { workspace } => self.list_buffers(session, &workspace),
			RequestPayload::CreateBuffer { workspace, path } => self.create_buffer(session, &workspace, path),
			RequestPayload::DeleteBuffer { workspace, path } => self.delete_buffer(session, &workspace, &path),
			RequestPayload::AttachBuffer { workspace, path } => self.attach(session, &workspace, &path),
			RequestPayload::DetachBuffer { workspace, path } => self.detach(session, &workspace, &path),
			RequestPayload::ListBufferUsers { workspace, path } => self.list_buffer_users(session, &workspace, &path),
			RequestPayload::BufferContent { workspace, path } => self.content(session, &workspace, &path),
		}
	}

	fn send(&self, target: SessionId, frame: ServerFrame) {
		send_to(&self.sessions, target, frame);
	}

	/// The logged-in user of `session`.
	fn user_of(&self, session: SessionId) -> Result<User, RemoteFailure> {
		self.sessions
			.get(&session)
			.and_then(|entry| entry.login.as_ref())
			.map(|login| login.user.clone())
			.ok_or_else(|| RemoteFailure::new(ErrorCode::NotAuthenticated, "log in first"))
	}

	/// The workspace, provided `session` joined it.
	fn joined_mut(&mut self, session: SessionId, workspace: &str) -> Result<&mut WorkspaceEntry, RemoteFailure> {
		let entry = self
			.workspaces
			.get_mut(workspace)
			.ok_or_else(|| RemoteFailure::new(ErrorCode::WorkspaceNotFound, format!("no workspace {workspace}")))?;
		if !entry.members.contains(&session) {
			return Err(RemoteFailure::new(ErrorCode::NotJoined, format!("not joined to {workspace}")));
		}
		Ok(entry)
	}

	fn joined(&self, session: SessionId, workspace: &str) -> Result<&WorkspaceEntry, RemoteFailure> {
		let entry = self
			.workspaces
			.get(workspace)
			.ok_or_else(|| RemoteFailure::new(ErrorCode::WorkspaceNotFound, format!("no workspace {workspace}")))?;
		if !entry.members.contains(&session) {
			return Err(RemoteFailure::new(ErrorCode::NotJoined, format!("not joined to {workspace}")));
		}
		Ok(entry)
	}

	/// Distinct users behind `sessions`, sorted by id.
	fn users_of<'a>(&self, sessions: impl IntoIterator<Item = &'a SessionId>) -> Vec<User> {
		let users: BTreeSet<User> = sessions
			.into_iter()
			.filter_map(|id| self.sessions.get(id)?.login.as_ref())
			.map(|login| login.user.clone())
			.collect();
		users.into_iter().collect()
	}
}

fn send_to(sessions: &HashMap<SessionId, SessionEntry>, target: SessionId, frame: ServerFrame) {
	if let Some(entry) = sessions.get(&target)
		&& entry.sink.send(frame).is_err()
	{
		tracing::debug!(session = target.0, "session sink closed, dropping frame");
	}
}

/// Sends `frame` to every session in `targets` except `except`.
fn broadcast<'a>(
	sessions: &HashMap<SessionId, SessionEntry>,
	targets: impl IntoIterator<Item = &'a SessionId>,
	except: SessionId,
	frame: &ServerFrame,
) {
	for &target in targets {
		if target != except {
			send_to(sessions, target, frame.clone());
		}
	}
}

fn invalid(message: impl Into<String>) -> RemoteFailure {
	RemoteFailure::new(ErrorCode::InvalidRequest, message)
}
