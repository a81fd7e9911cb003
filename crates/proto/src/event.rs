//! Workspace-wide notifications and users.

use std::cmp::Ordering;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Membership or structure change in a workspace.
///
/// Buffer content changes never show up here, only buffer creation and deletion.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Event {
	/// A user joined the workspace.
	UserJoin {
		/// Name of the user.
		name: String,
	},
	/// A user left the workspace.
	UserLeave {
		/// Name of the user.
		name: String,
	},
	/// A buffer was created or deleted.
	FileTreeUpdated {
		/// Path of the affected buffer.
		path: String,
	},
}

impl Event {
	/// Name of the joining user, for [`Event::UserJoin`].
	pub fn user_joined(&self) -> Option<&str> {
		match self {
			Self::UserJoin { name } => Some(name),
			_ => None,
		}
	}

	/// Name of the leaving user, for [`Event::UserLeave`].
	pub fn user_left(&self) -> Option<&str> {
		match self {
			Self::UserLeave { name } => Some(name),
			_ => None,
		}
	}

	/// Path of the changed buffer, for [`Event::FileTreeUpdated`].
	pub fn changed_buffer(&self) -> Option<&str> {
		match self {
			Self::FileTreeUpdated { path } => Some(path),
			_ => None,
		}
	}
}

/// An account on the server. Identity is the id alone.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct User {
	/// Unique account id.
	pub id: Uuid,
	/// Account name, unique per server.
	pub name: String,
}

impl PartialEq for User {
	fn eq(&self, other: &Self) -> bool {
		self.id == other.id
	}
}

impl Eq for User {}

impl PartialOrd for User {
	fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
		Some(self.cmp(other))
	}
}

impl Ord for User {
	fn cmp(&self, other: &Self) -> Ordering {
		self.id.cmp(&other.id)
	}
}

impl std::hash::Hash for User {
	fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
		self.id.hash(state);
	}
}
