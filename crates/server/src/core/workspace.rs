//! Workspace directory, access control and membership.

use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};

use tandem_proto::{ErrorCode, Event, Notification, RemoteFailure, ResponsePayload, ServerFrame};

use super::{Outcome, SessionEntry, SessionId, State, WorkspaceEntry, broadcast, invalid};

impl State {
	pub(super) fn create_workspace(&mut self, session: SessionId, workspace: String) -> Outcome {
		let user = self.user_of(session)?;
		if workspace.is_empty() {
			return Err(invalid("workspace id must not be empty"));
		}
		if self.workspaces.contains_key(&workspace) {
			return Err(RemoteFailure::new(ErrorCode::WorkspaceExists, format!("workspace {workspace} exists")));
		}
		tracing::info!(workspace = %workspace, owner = %user.name, "workspace created");
		self.workspaces.insert(
			workspace,
			WorkspaceEntry {
				owner: user.id,
				invited: HashSet::new(),
				members: BTreeSet::new(),
				buffers: BTreeMap::new(),
			},
		);
		Ok(ResponsePayload::Done)
	}

	pub(super) fn delete_workspace(&mut self, session: SessionId, workspace: &str) -> Outcome {
		let user = self.user_of(session)?;
		let entry = self
			.workspaces
			.get(workspace)
			.ok_or_else(|| RemoteFailure::new(ErrorCode::WorkspaceNotFound, format!("no workspace {workspace}")))?;
		if entry.owner != user.id {
			return Err(RemoteFailure::new(
				ErrorCode::AccessDenied,
				format!("{} does not own {workspace}", user.name),
			));
		}
		let Some(entry) = self.workspaces.remove(workspace) else {
			return Err(RemoteFailure::new(ErrorCode::Internal, "workspace vanished"));
		};

		let closed = ServerFrame::Notification(Notification::WorkspaceClosed {
			workspace: workspace.to_owned(),
		});
		for member in &entry.members {
			if let Some(s) = self.sessions.get_mut(member) {
				s.joined.remove(workspace);
			}
		}
		broadcast(&self.sessions, &entry.members, session, &closed);
		tracing::info!(workspace, members = entry.members.len(), "workspace deleted");
		Ok(ResponsePayload::Done)
	}

	pub(super) fn invite(&mut self, session: SessionId, workspace: &str, name: &str) -> Outcome {
		let user = self.user_of(session)?;
		let invitee = self
			.accounts
			.get(name)
			.map(|account| account.user.id)
			.ok_or_else(|| RemoteFailure::new(ErrorCode::UserNotFound, format!("no user {name}")))?;
		let entry = self
			.workspaces
			.get_mut(workspace)
			.ok_or_else(|| RemoteFailure::new(ErrorCode::WorkspaceNotFound, format!("no workspace {workspace}")))?;
		if entry.owner != user.id {
			return Err(RemoteFailure::new(
				ErrorCode::AccessDenied,
				format!("{} does not own {workspace}", user.name),
			));
		}
		if invitee != entry.owner {
			entry.invited.insert(invitee);
		}
		tracing::info!(workspace, invitee = name, "user invited");
		Ok(ResponsePayload::Done)
	}

	pub(super) fn list_workspaces(&self, session: SessionId, owned: bool, invited: bool) -> Outcome {
		let user = self.user_of(session)?;
		let ids = self
			.workspaces
			.iter()
			.filter(|(_, entry)| (owned && entry.owner == user.id) || (invited && entry.invited.contains(&user.id)))
			.map(|(id, _)| id.clone())
			.collect();
		Ok(ResponsePayload::Workspaces(ids))
	}

	/// Joins `workspace`. Joining twice from the same session is a no-op.
	pub(super) fn join(&mut self, session: SessionId, workspace: &str) -> Outcome {
		let user = self.user_of(session)?;
		let State {
			sessions, workspaces, ..
		} = self;
		let entry = workspaces
			.get_mut(workspace)
			.ok_or_else(|| RemoteFailure::new(ErrorCode::WorkspaceNotFound, format!("no workspace {workspace}")))?;
		if entry.owner != user.id && !entry.invited.contains(&user.id) {
			return Err(RemoteFailure::new(
				ErrorCode::AccessDenied,
				format!("{} is not invited to {workspace}", user.name),
			));
		}
		if entry.members.contains(&session) {
			return Ok(ResponsePayload::Done);
		}

		let was_present = present(sessions, &entry.members, &user.name);
		entry.members.insert(session);
		if let Some(s) = sessions.get_mut(&session) {
			s.joined.insert(workspace.to_owned());
		}
		if !was_present {
			let joined = ServerFrame::Notification(Notification::Workspace {
				workspace: workspace.to_owned(),
				event: Event::UserJoin {
					name: user.name.clone(),
				},
			});
			broadcast(sessions, &entry.members, session, &joined);
		}
		tracing::info!(workspace, user = %user.name, session = session.0, "workspace joined");
		Ok(ResponsePayload::Done)
	}

	pub(super) fn leave(&mut self, session: SessionId, workspace: &str) -> Outcome {
		let user = self.user_of(session)?;
		self.joined(session, workspace)?;
		self.depart(session, workspace, Some(&user.name));
		tracing::info!(workspace, user = %user.name, session = session.0, "workspace left");
		Ok(ResponsePayload::Done)
	}

	/// Removes `session` from `workspace` and every buffer of it.
	///
	/// `UserLeave` is announced once the user has no session left in the workspace.
	pub(super) fn depart(&mut self, session: SessionId, workspace: &str, name: Option<&str>) {
		let State {
			sessions, workspaces, ..
		} = self;
		let Some(entry) = workspaces.get_mut(workspace) else {
			return;
		};
		if !entry.members.remove(&session) {
			return;
		}
		for buffer in entry.buffers.values_mut() {
			if buffer.attached.remove(&session).is_some() {
				buffer.prune();
			}
		}
		if let Some(s) = sessions.get_mut(&session) {
			s.joined.remove(workspace);
		}
		if let Some(name) = name
			&& !present(sessions, &entry.members, name)
		{
			let left = ServerFrame::Notification(Notification::Workspace {
				workspace: workspace.to_owned(),
				event: Event::UserLeave { name: name.to_owned() },
			});
			broadcast(sessions, &entry.members, session, &left);
		}
	}

	pub(super) fn list_users(&self, session: SessionId, workspace: &str) -> Outcome {
		self.user_of(session)?;
		let entry = self.joined(session, workspace)?;
		Ok(ResponsePayload::Users(self.users_of(&entry.members)))
	}

	pub(super) fn list_buffers(&self, session: SessionId, workspace: &str) -> Outcome {
		self.user_of(session)?;
		let entry = self.joined(session, workspace)?;
		Ok(ResponsePayload::Buffers(entry.buffers.keys().cloned().collect()))
	}
}

/// True if a session in `members` is logged in as `name`.
fn present(sessions: &HashMap<SessionId, SessionEntry>, members: &BTreeSet<SessionId>, name: &str) -> bool {
	members
		.iter()
		.filter_map(|id| sessions.get(id)?.login.as_ref())
		.any(|login| login.user.name == name)
}
