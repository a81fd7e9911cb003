//! Authenticated session and workspace management.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::Mutex;
use tandem_proto::{RequestPayload, ResponsePayload, Token, User};
use tandem_worker::Executor;

use crate::config::Config;
use crate::errors::{ConnectionError, ConnectionResult};
use crate::network::{Connection, unexpected};
use crate::workspace::Workspace;

/// A logged-in session.
///
/// Cheap to clone; clones share the connection and the set of joined workspaces. Dropping the
/// last clone closes the connection, which stops every controller of the session.
#[derive(Clone)]
pub struct Client(Arc<ClientInner>);

struct ClientInner {
	user: User,
	config: Config,
	conn: Arc<Connection>,
	token: Mutex<Token>,
	workspaces: Mutex<HashMap<String, Workspace>>,
}

impl Drop for ClientInner {
	fn drop(&mut self) {
		self.conn.close();
	}
}

impl Client {
	/// Connects and logs in, running background work on the ambient tokio runtime (or a shared
	/// one when called outside any runtime).
	///
	/// # Errors
	///
	/// [`ConnectionError::Transport`] if the server is unreachable, [`ConnectionError::Remote`]
	/// if the credentials are rejected.
	pub async fn connect(config: Config) -> ConnectionResult<Self> {
		Self::connect_with(config, Executor::current()?).await
	}

	/// Connects and logs in, running background work on `executor`.
	///
	/// # Errors
	///
	/// As [`Self::connect`].
	pub async fn connect_with(config: Config, executor: Executor) -> ConnectionResult<Self> {
		if config.tls() {
			return Err(ConnectionError::Transport(format!(
				"TLS requested for {} but this client only speaks plain TCP",
				config.endpoint()
			)));
		}
		let conn = Connection::open(&config.endpoint(), executor).await?;
		let login = RequestPayload::Login {
			name: config.username.clone(),
			password: config.password.clone(),
		};
		let (user, token) = match conn.request(login).await {
			Ok(ResponsePayload::LoggedIn { user, token }) => (user, token),
			Ok(other) => {
				conn.close();
				return Err(unexpected(other));
			}
			Err(e) => {
				conn.close();
				return Err(e);
			}
		};
		tracing::info!(user = %user.name, endpoint = %config.endpoint(), "logged in");

		Ok(Self(Arc::new(ClientInner {
			user,
			config,
			conn,
			token: Mutex::new(token),
			workspaces: Mutex::new(HashMap::new()),
		})))
	}

	/// The account this session is logged in as.
	pub fn current_user(&self) -> &User {
		&self.0.user
	}

	/// Configuration the session was opened with.
	pub fn config(&self) -> &Config {
		&self.0.config
	}

	/// Renews the session token.
	///
	/// # Errors
	///
	/// [`ConnectionError::Remote`] if the server refuses the current token.
	pub async fn refresh(&self) -> ConnectionResult<()> {
		let token = self.0.token.lock().clone();
		match self.0.conn.request(RequestPayload::Refresh { token }).await? {
			ResponsePayload::Refreshed { token } => {
				*self.0.token.lock() = token;
				tracing::debug!(user = %self.0.user.name, "session token refreshed");
				Ok(())
			}
			other => Err(unexpected(other)),
		}
	}

	/// Creates a workspace owned by this user.
	///
	/// # Errors
	///
	/// [`ConnectionError::Remote`] if the id is taken.
	pub async fn create_workspace(&self, workspace: &str) -> ConnectionResult<()> {
		self.request_done(RequestPayload::CreateWorkspace {
			workspace: workspace.to_owned(),
		})
		.await
	}

	/// Deletes a workspace owned by this user. Every joined session, this one included, is torn
	/// down.
	///
	/// # Errors
	///
	/// [`ConnectionError::Remote`] if it does not exist or is owned by someone else.
	pub async fn delete_workspace(&self, workspace: &str) -> ConnectionResult<()> {
		self.request_done(RequestPayload::DeleteWorkspace {
			workspace: workspace.to_owned(),
		})
		.await?;
		if let Some(ws) = self.0.workspaces.lock().remove(workspace) {
			ws.shutdown();
		}
		Ok(())
	}

	/// Lets `user` join a workspace owned by this user.
	///
	/// # Errors
	///
	/// [`ConnectionError::Remote`] if the user or workspace is unknown, or access is denied.
	pub async fn invite_to_workspace(&self, workspace: &str, user: &str) -> ConnectionResult<()> {
		self.request_done(RequestPayload::InviteToWorkspace {
			workspace: workspace.to_owned(),
			user: user.to_owned(),
		})
		.await
	}

	/// Ids of workspaces this user owns and/or was invited to, sorted.
	///
	/// # Errors
	///
	/// Any [`ConnectionError`] from the request.
	pub async fn list_workspaces(&self, owned: bool, invited: bool) -> ConnectionResult<Vec<String>> {
		match self.0.conn.request(RequestPayload::ListWorkspaces { owned, invited }).await? {
			ResponsePayload::Workspaces(ids) => Ok(ids),
			other => Err(unexpected(other)),
		}
	}

	/// Joins a workspace, or returns it if already joined.
	///
	/// The returned handle has fresh file tree and user caches.
	///
	/// # Errors
	///
	/// [`ConnectionError::Remote`] if the workspace does not exist or access is denied.
	pub async fn join_workspace(&self, workspace: &str) -> ConnectionResult<Workspace> {
		if let Some(ws) = self.get_workspace(workspace) {
			return Ok(ws);
		}

		// Route before joining so no event sent right after the join is lost.
		let ws = Workspace::new(workspace, self.0.user.clone(), Arc::clone(&self.0.conn));
		let joined = async {
			self.request_done(RequestPayload::JoinWorkspace {
				workspace: workspace.to_owned(),
			})
			.await?;
			ws.fetch_buffers().await?;
			ws.fetch_users().await
		};
		if let Err(e) = joined.await {
			ws.shutdown();
			return Err(e);
		}

		let mut workspaces = self.0.workspaces.lock();
		if let Some(existing) = workspaces.get(workspace).filter(|ws| !ws.is_closed()) {
			// Lost a race with a concurrent join of the same workspace.
			ws.shutdown();
			self.0.conn.register(workspace, existing.inbox());
			return Ok(existing.clone());
		}
		workspaces.insert(workspace.to_owned(), ws.clone());
		tracing::info!(workspace, user = %self.0.user.name, "joined workspace");
		Ok(ws)
	}

	/// Leaves a joined workspace. Returns `false` if it was not joined, including when it was
	/// deleted remotely or lost with the connection.
	///
	/// Every controller of the workspace is stopped, even if the server cannot be told.
	pub async fn leave_workspace(&self, workspace: &str) -> bool {
		let Some(ws) = self.0.workspaces.lock().remove(workspace) else {
			return false;
		};
		if ws.is_closed() {
			return false;
		}
		ws.shutdown();
		let payload = RequestPayload::LeaveWorkspace {
			workspace: workspace.to_owned(),
		};
		if let Err(e) = self.0.conn.request(payload).await {
			tracing::warn!(workspace, error = %e, "server did not confirm leaving workspace");
		}
		tracing::info!(workspace, "left workspace");
		true
	}

	/// A joined workspace. Workspaces closed remotely are not returned.
	pub fn get_workspace(&self, workspace: &str) -> Option<Workspace> {
		self.0.workspaces.lock().get(workspace).filter(|ws| !ws.is_closed()).cloned()
	}

	/// Ids of joined workspaces, sorted.
	pub fn active_workspaces(&self) -> Vec<String> {
		let mut ids: Vec<_> = self
			.0
			.workspaces
			.lock()
			.iter()
			.filter(|(_, ws)| !ws.is_closed())
			.map(|(id, _)| id.clone())
			.collect();
		ids.sort();
		ids
	}

	async fn request_done(&self, payload: RequestPayload) -> ConnectionResult<()> {
		match self.0.conn.request(payload).await? {
			ResponsePayload::Done => Ok(()),
			other => Err(unexpected(other)),
		}
	}
}

impl std::fmt::Debug for Client {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		f.debug_struct("Client")
			.field("user", &self.0.user.name)
			.field("endpoint", &self.0.config.endpoint())
			.finish()
	}
}
