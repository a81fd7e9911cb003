//! Buffer lifecycle and edit sequencing.

use tandem_proto::{
	BufferUpdate, Cursor, ErrorCode, Event, Notification, RemoteFailure, ResponsePayload, Selection, ServerFrame,
	TextChange, Version, fingerprint_rope,
};
use uuid::Uuid;

use super::{BufferEntry, Outcome, SessionId, State, broadcast, invalid};

impl BufferEntry {
	/// Version vector slot of `user`, allocating one on first edit.
	fn agent(&mut self, user: Uuid) -> usize {
		match self.agents.iter().position(|id| *id == user) {
			Some(slot) => slot,
			None => {
				self.agents.push(user);
				self.agents.len() - 1
			}
		}
	}

	/// Drops the oldest history entries every attached session acknowledged.
	pub(super) fn prune(&mut self) {
		while let Some(oldest) = self.history.front()
			&& self.attached.values().all(|acked| acked.dominates(oldest))
		{
			self.history.pop_front();
		}
	}

	fn snapshot(&self) -> ResponsePayload {
		ResponsePayload::Content {
			content: self.rope.to_string(),
			version: self.version.clone(),
		}
	}
}

impl State {
	fn buffer_mut(&mut self, session: SessionId, workspace: &str, path: &str) -> Result<&mut BufferEntry, RemoteFailure> {
		self.joined_mut(session, workspace)?
			.buffers
			.get_mut(path)
			.ok_or_else(|| RemoteFailure::new(ErrorCode::BufferNotFound, format!("no buffer {path} in {workspace}")))
	}

	fn attached_buffer(&self, session: SessionId, workspace: &str, path: &str) -> Result<&BufferEntry, RemoteFailure> {
		let buffer = self
			.joined(session, workspace)?
			.buffers
			.get(path)
			.ok_or_else(|| RemoteFailure::new(ErrorCode::BufferNotFound, format!("no buffer {path} in {workspace}")))?;
		if !buffer.attached.contains_key(&session) {
			return Err(RemoteFailure::new(ErrorCode::NotAttached, format!("not attached to {path}")));
		}
		Ok(buffer)
	}

	pub(super) fn create_buffer(&mut self, session: SessionId, workspace: &str, path: String) -> Outcome {
		self.user_of(session)?;
		if path.is_empty() {
			return Err(invalid("buffer path must not be empty"));
		}
		let State {
			sessions, workspaces, ..
		} = self;
		let Some(entry) = workspaces.get_mut(workspace) else {
			return Err(RemoteFailure::new(ErrorCode::WorkspaceNotFound, format!("no workspace {workspace}")));
		};
		if !entry.members.contains(&session) {
			return Err(RemoteFailure::new(ErrorCode::NotJoined, format!("not joined to {workspace}")));
		}
		if entry.buffers.contains_key(&path) {
			return Err(RemoteFailure::new(ErrorCode::BufferExists, format!("buffer {path} exists")));
		}
		entry.buffers.insert(path.clone(), BufferEntry::default());

		tracing::info!(workspace, path = %path, "buffer created");
		let updated = ServerFrame::Notification(Notification::Workspace {
			workspace: workspace.to_owned(),
			event: Event::FileTreeUpdated { path },
		});
		broadcast(sessions, &entry.members, session, &updated);
		Ok(ResponsePayload::Done)
	}

	pub(super) fn delete_buffer(&mut self, session: SessionId, workspace: &str, path: &str) -> Outcome {
		self.user_of(session)?;
		let State {
			sessions, workspaces, ..
		} = self;
		let Some(entry) = workspaces.get_mut(workspace) else {
			return Err(RemoteFailure::new(ErrorCode::WorkspaceNotFound, format!("no workspace {workspace}")));
		};
		if !entry.members.contains(&session) {
			return Err(RemoteFailure::new(ErrorCode::NotJoined, format!("not joined to {workspace}")));
		}
		let Some(buffer) = entry.buffers.remove(path) else {
			return Err(RemoteFailure::new(ErrorCode::BufferNotFound, format!("no buffer {path} in {workspace}")));
		};

		let closed = ServerFrame::Notification(Notification::BufferClosed {
			workspace: workspace.to_owned(),
			path: path.to_owned(),
		});
		broadcast(sessions, buffer.attached.keys(), session, &closed);
		let updated = ServerFrame::Notification(Notification::Workspace {
			workspace: workspace.to_owned(),
			event: Event::FileTreeUpdated { path: path.to_owned() },
		});
		broadcast(sessions, &entry.members, session, &updated);
		tracing::info!(workspace, path, attached = buffer.attached.len(), "buffer deleted");
		Ok(ResponsePayload::Done)
	}

	/// Attaches `session` and returns the current content. The snapshot counts as acknowledged.
	pub(super) fn attach(&mut self, session: SessionId, workspace: &str, path: &str) -> Outcome {
		self.user_of(session)?;
		let buffer = self.buffer_mut(session, workspace, path)?;
		let acked = buffer.version.clone();
		buffer.attached.insert(session, acked);
		tracing::debug!(workspace, path, session = session.0, "buffer attached");
		Ok(buffer.snapshot())
	}

	/// Detaches `session`. Unknown buffers and missing attachments are not errors.
	pub(super) fn detach(&mut self, session: SessionId, workspace: &str, path: &str) -> Outcome {
		self.user_of(session)?;
		if let Some(buffer) = self
			.workspaces
			.get_mut(workspace)
			.and_then(|entry| entry.buffers.get_mut(path))
			&& buffer.attached.remove(&session).is_some()
		{
			buffer.prune();
			tracing::debug!(workspace, path, session = session.0, "buffer detached");
		}
		Ok(ResponsePayload::Done)
	}

	pub(super) fn list_buffer_users(&self, session: SessionId, workspace: &str, path: &str) -> Outcome {
		self.user_of(session)?;
		let buffer = self.attached_buffer(session, workspace, path)?;
		Ok(ResponsePayload::Users(self.users_of(buffer.attached.keys())))
	}

	pub(super) fn content(&self, session: SessionId, workspace: &str, path: &str) -> Outcome {
		self.user_of(session)?;
		Ok(self.attached_buffer(session, workspace, path)?.snapshot())
	}

	/// Sequences a change: applies it, stamps the new version and fans it out.
	pub(super) fn apply_change(
		&mut self,
		session: SessionId,
		workspace: &str,
		path: &str,
		change: TextChange,
	) -> Result<(), RemoteFailure> {
		let user = self.user_of(session)?;
		let State {
			sessions, workspaces, ..
		} = self;
		let buffer = workspaces
			.get_mut(workspace)
			.filter(|entry| entry.members.contains(&session))
			.ok_or_else(|| RemoteFailure::new(ErrorCode::NotJoined, format!("not joined to {workspace}")))?
			.buffers
			.get_mut(path)
			.ok_or_else(|| RemoteFailure::new(ErrorCode::BufferNotFound, format!("no buffer {path} in {workspace}")))?;
		if !buffer.attached.contains_key(&session) {
			return Err(RemoteFailure::new(ErrorCode::NotAttached, format!("not attached to {path}")));
		}

		let agent = buffer.agent(user.id);
		change.apply_to_rope(&mut buffer.rope);
		buffer.version.increment(agent);
		let (_, hash) = fingerprint_rope(&buffer.rope);
		if let Some(claimed) = change.hash
			&& claimed != hash
		{
			tracing::debug!(workspace, path, user = %user.name, claimed, hash, "author replica diverged");
		}
		let version = buffer.version.clone();
		buffer.history.push_back(version.clone());

		// Authors have applied their own change already.
		if let Some(acked) = buffer.attached.get_mut(&session) {
			let mut own = vec![0; agent + 1];
			own[agent] = version.get(agent);
			*acked = acked.join(&Version::from(own));
		}
		buffer.prune();

		tracing::trace!(workspace, path, user = %user.name, version = ?version.as_slice(), "change sequenced");
		let update = ServerFrame::Notification(Notification::Buffer {
			workspace: workspace.to_owned(),
			path: path.to_owned(),
			update: BufferUpdate {
				hash: Some(hash),
				version,
				change: change.with_hash(hash),
			},
		});
		broadcast(sessions, buffer.attached.keys(), session, &update);
		Ok(())
	}

	pub(super) fn ack(&mut self, session: SessionId, workspace: &str, path: &str, version: &Version) -> Result<(), RemoteFailure> {
		self.user_of(session)?;
		let buffer = self.buffer_mut(session, workspace, path)?;
		let Some(acked) = buffer.attached.get_mut(&session) else {
			return Err(RemoteFailure::new(ErrorCode::NotAttached, format!("not attached to {path}")));
		};
		*acked = acked.join(version);
		buffer.prune();
		Ok(())
	}

	pub(super) fn move_cursor(&mut self, session: SessionId, workspace: &str, sel: Selection) -> Result<(), RemoteFailure> {
		let user = self.user_of(session)?;
		let entry = self.joined(session, workspace)?;
		let moved = ServerFrame::Notification(Notification::Cursor {
			workspace: workspace.to_owned(),
			cursor: Cursor { user: user.name, sel },
		});
		broadcast(&self.sessions, &entry.members, session, &moved);
		Ok(())
	}
}
