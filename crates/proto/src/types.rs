//! Wire types for the tandem client/server protocol.
//!
//! A connection carries [`ClientFrame`]s upstream and [`ServerFrame`]s downstream. Requests are
//! answered by exactly one response with the same [`RequestId`]; client notifications are never
//! answered; server notifications are pushed whenever another participant does something.

use serde::{Deserialize, Serialize};

use crate::change::{BufferUpdate, TextChange};
use crate::cursor::{Cursor, Selection};
use crate::event::{Event, User};
use crate::version::Version;

/// Unique identifier for requests and responses on one connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct RequestId(pub u64);

/// Session token issued at login and renewed with [`RequestPayload::Refresh`].
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Token(pub String);

/// Classification of frames sent by a client.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum ClientFrame {
	/// A request expecting a [`Response`].
	Request(Request),
	/// A fire-and-forget message.
	Notify(ClientNotification),
}

/// Classification of frames sent by the server.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum ServerFrame {
	/// Answer to a client request.
	Response(Response),
	/// Something happened that the client subscribed to.
	Notification(Notification),
}

/// A request from a client to the server.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Request {
	/// Correlates the response.
	pub id: RequestId,
	/// What to do.
	pub payload: RequestPayload,
}

/// Request payload variants.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum RequestPayload {
	/// Authenticates the connection. Unknown names are registered on first login.
	Login {
		/// Account name.
		name: String,
		/// Account password.
		password: String,
	},
	/// Exchanges the current session token for a fresh one.
	Refresh {
		/// Token currently held by the client.
		token: Token,
	},
	/// Creates a workspace owned by the caller.
	CreateWorkspace {
		/// Workspace id.
		workspace: String,
	},
	/// Deletes a workspace owned by the caller.
	DeleteWorkspace {
		/// Workspace id.
		workspace: String,
	},
	/// Grants another user access to a workspace owned by the caller.
	InviteToWorkspace {
		/// Workspace id.
		workspace: String,
		/// Name of the invited user.
		user: String,
	},
	/// Lists workspaces the caller owns and/or was invited to.
	ListWorkspaces {
		/// Include owned workspaces.
		owned: bool,
		/// Include workspaces the caller was invited to.
		invited: bool,
	},
	/// Joins a workspace and subscribes to its events.
	JoinWorkspace {
		/// Workspace id.
		workspace: String,
	},
	/// Leaves a joined workspace.
	LeaveWorkspace {
		/// Workspace id.
		workspace: String,
	},
	/// Lists users currently joined to a workspace.
	ListUsers {
		/// Workspace id.
		workspace: String,
	},
	/// Lists every buffer path of a workspace.
	ListBuffers {
		/// Workspace id.
		workspace: String,
	},
	/// Creates an empty buffer.
	CreateBuffer {
		/// Workspace id.
		workspace: String,
		/// Buffer path.
		path: String,
	},
	/// Deletes a buffer.
	DeleteBuffer {
		/// Workspace id.
		workspace: String,
		/// Buffer path.
		path: String,
	},
	/// Subscribes to a buffer's changes and returns its current content.
	AttachBuffer {
		/// Workspace id.
		workspace: String,
		/// Buffer path.
		path: String,
	},
	/// Stops receiving a buffer's changes.
	DetachBuffer {
		/// Workspace id.
		workspace: String,
		/// Buffer path.
		path: String,
	},
	/// Lists users attached to a buffer.
	ListBufferUsers {
		/// Workspace id.
		workspace: String,
		/// Buffer path.
		path: String,
	},
	/// Returns the authoritative content of an attached buffer.
	BufferContent {
		/// Workspace id.
		workspace: String,
		/// Buffer path.
		path: String,
	},
}

impl RequestPayload {
	/// Short name of the request for logs. Never includes arguments.
	pub const fn kind(&self) -> &'static str {
		match self {
			Self::Login { .. } => "login",
			Self::Refresh { .. } => "refresh",
			Self::CreateWorkspace { .. } => "create_workspace",
			Self::DeleteWorkspace { .. } => "delete_workspace",
			Self::InviteToWorkspace { .. } => "invite_to_workspace",
			Self::ListWorkspaces { .. } => "list_workspaces",
			Self::JoinWorkspace { .. } => "join_workspace",
			Self::LeaveWorkspace { .. } => "leave_workspace",
			Self::ListUsers { .. } => "list_users",
			Self::ListBuffers { .. } => "list_buffers",
			Self::CreateBuffer { .. } => "create_buffer",
			Self::DeleteBuffer { .. } => "delete_buffer",
			Self::AttachBuffer { .. } => "attach_buffer",
			Self::DetachBuffer { .. } => "detach_buffer",
			Self::ListBufferUsers { .. } => "list_buffer_users",
			Self::BufferContent { .. } => "buffer_content",
		}
	}
}

/// Fire-and-forget messages from a client.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum ClientNotification {
	/// A local edit on an attached buffer.
	Change {
		/// Workspace id.
		workspace: String,
		/// Buffer path.
		path: String,
		/// The edit.
		change: TextChange,
	},
	/// The client applied every change up to `version`.
	Ack {
		/// Workspace id.
		workspace: String,
		/// Buffer path.
		path: String,
		/// Acknowledged version.
		version: Version,
	},
	/// The local cursor moved.
	MoveCursor {
		/// Workspace id.
		workspace: String,
		/// New selection.
		sel: Selection,
	},
}

impl ClientNotification {
	/// Short name of the notification for logs.
	pub const fn kind(&self) -> &'static str {
		match self {
			Self::Change { .. } => "change",
			Self::Ack { .. } => "ack",
			Self::MoveCursor { .. } => "move_cursor",
		}
	}
}

/// A response from the server.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Response {
	/// Request this answers.
	pub id: RequestId,
	/// Outcome.
	pub result: Result<ResponsePayload, RemoteFailure>,
}

/// Successful response payloads.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ResponsePayload {
	/// Request applied, nothing to return.
	Done,
	/// Login accepted.
	LoggedIn {
		/// The authenticated account.
		user: User,
		/// Session token.
		token: Token,
	},
	/// Token renewed.
	Refreshed {
		/// Replacement token.
		token: Token,
	},
	/// Workspace ids.
	Workspaces(Vec<String>),
	/// Users.
	Users(Vec<User>),
	/// Buffer paths.
	Buffers(Vec<String>),
	/// Authoritative buffer content.
	Content {
		/// Full text.
		content: String,
		/// Version of `content`.
		version: Version,
	},
}

/// Error details returned by the server.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, thiserror::Error)]
#[error("{code:?}: {message}")]
pub struct RemoteFailure {
	/// Machine-readable cause.
	pub code: ErrorCode,
	/// Human-readable explanation.
	pub message: String,
}

impl RemoteFailure {
	/// Creates a failure with a message.
	pub fn new(code: ErrorCode, message: impl Into<String>) -> Self {
		Self {
			code,
			message: message.into(),
		}
	}
}

/// Error codes for protocol operations.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ErrorCode {
	/// Unspecified internal server error.
	Internal,
	/// Name/password mismatch.
	AuthFailed,
	/// Request sent before a successful login.
	NotAuthenticated,
	/// Refresh attempted with a stale or foreign token.
	InvalidToken,
	/// Payload contains malformed arguments.
	InvalidRequest,
	/// A workspace with that id already exists.
	WorkspaceExists,
	/// The workspace does not exist.
	WorkspaceNotFound,
	/// The caller may not access or modify the workspace.
	AccessDenied,
	/// The named user does not exist.
	UserNotFound,
	/// A buffer with that path already exists.
	BufferExists,
	/// The buffer does not exist.
	BufferNotFound,
	/// The caller has not joined the workspace.
	NotJoined,
	/// The caller is not attached to the buffer.
	NotAttached,
}

/// Server-initiated messages.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Notification {
	/// Membership or file tree change in a joined workspace.
	Workspace {
		/// Workspace id.
		workspace: String,
		/// What happened.
		event: Event,
	},
	/// A remote change to an attached buffer.
	Buffer {
		/// Workspace id.
		workspace: String,
		/// Buffer path.
		path: String,
		/// The change and the state it produced.
		update: BufferUpdate,
	},
	/// A remote cursor moved.
	Cursor {
		/// Workspace id.
		workspace: String,
		/// The moved cursor.
		cursor: Cursor,
	},
	/// An attached buffer was deleted by someone else.
	BufferClosed {
		/// Workspace id.
		workspace: String,
		/// Buffer path.
		path: String,
	},
	/// A joined workspace was deleted.
	WorkspaceClosed {
		/// Workspace id.
		workspace: String,
	},
}

impl Notification {
	/// Workspace the notification belongs to.
	pub fn workspace(&self) -> &str {
		match self {
			Self::Workspace { workspace, .. }
			| Self::Buffer { workspace, .. }
			| Self::Cursor { workspace, .. }
			| Self::BufferClosed { workspace, .. }
			| Self::WorkspaceClosed { workspace } => workspace,
		}
	}
}
