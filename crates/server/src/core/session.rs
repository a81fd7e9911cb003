//! Session lifecycle and authentication.

use std::collections::BTreeSet;
use std::sync::atomic::Ordering;

use tandem_proto::{ErrorCode, RemoteFailure, ResponsePayload, Token, User};
use uuid::Uuid;

use super::{Account, Login, Outcome, ServerCore, SessionEntry, SessionId, SessionSink, State, invalid};

impl ServerCore {
	/// Registers a connection with its outbound sink.
	pub fn register_session(&self, sink: SessionSink) -> SessionId {
		let session = SessionId(self.next_session.fetch_add(1, Ordering::Relaxed) + 1);
		self.state.lock().sessions.insert(
			session,
			SessionEntry {
				sink,
				login: None,
				joined: BTreeSet::new(),
			},
		);
		tracing::debug!(session = session.0, "session registered");
		session
	}

	/// Drops a connection: leaves every joined workspace and releases every attachment.
	pub fn unregister_session(&self, session: SessionId) {
		let mut state = self.state.lock();
		let Some(entry) = state.sessions.remove(&session) else {
			return;
		};
		let name = entry.login.map(|login| login.user.name);
		for workspace in entry.joined {
			state.depart(session, &workspace, name.as_deref());
		}
		tracing::debug!(session = session.0, user = name.as_deref(), "session unregistered");
	}
}

impl State {
	/// Authenticates `session`. Unknown names are registered with the given password.
	pub(super) fn login(&mut self, session: SessionId, name: String, password: String) -> Outcome {
		if name.is_empty() {
			return Err(invalid("user name must not be empty"));
		}
		let Some(entry) = self.sessions.get(&session) else {
			return Err(RemoteFailure::new(ErrorCode::Internal, "unknown session"));
		};
		if entry.login.is_some() {
			return Err(invalid("session is already logged in"));
		}

		let user = match self.accounts.get(&name) {
			Some(account) if account.password == password => account.user.clone(),
			Some(_) => return Err(RemoteFailure::new(ErrorCode::AuthFailed, format!("wrong password for {name}"))),
			None => {
				let user = User {
					id: Uuid::new_v4(),
					name: name.clone(),
				};
				tracing::info!(user = %name, id = %user.id, "account registered");
				self.accounts.insert(
					name,
					Account {
						user: user.clone(),
						password,
					},
				);
				user
			}
		};

		let token = fresh_token();
		if let Some(entry) = self.sessions.get_mut(&session) {
			entry.login = Some(Login {
				user: user.clone(),
				token: token.clone(),
			});
		}
		tracing::info!(session = session.0, user = %user.name, "logged in");
		Ok(ResponsePayload::LoggedIn { user, token })
	}

	/// Trades the session's current token for a new one.
	pub(super) fn refresh(&mut self, session: SessionId, token: &Token) -> Outcome {
		let login = self
			.sessions
			.get_mut(&session)
			.and_then(|entry| entry.login.as_mut())
			.ok_or_else(|| RemoteFailure::new(ErrorCode::NotAuthenticated, "log in first"))?;
		if login.token != *token {
			return Err(RemoteFailure::new(ErrorCode::InvalidToken, "token is stale or foreign"));
		}
		login.token = fresh_token();
		Ok(ResponsePayload::Refreshed {
			token: login.token.clone(),
		})
	}
}

fn fresh_token() -> Token {
	Token(Uuid::new_v4().simple().to_string())
}
