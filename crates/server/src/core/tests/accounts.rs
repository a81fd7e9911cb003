use pretty_assertions::assert_eq;
use tandem_proto::{ErrorCode, RequestPayload, ResponsePayload, Token};

use super::helpers::{PASSWORD, TestSession};
use crate::core::ServerCore;

fn login(name: &str, password: &str) -> RequestPayload {
	RequestPayload::Login {
		name: name.into(),
		password: password.into(),
	}
}

#[test]
fn first_login_registers_account() {
	let core = ServerCore::new();
	let mut first = TestSession::connect(&core);
	let Ok(ResponsePayload::LoggedIn { user, .. }) = first.request(&core, login("alice", PASSWORD)) else {
		panic!("login failed");
	};
	assert_eq!(user.name, "alice");

	let mut second = TestSession::connect(&core);
	let Ok(ResponsePayload::LoggedIn { user: again, .. }) = second.request(&core, login("alice", PASSWORD)) else {
		panic!("second login failed");
	};
	assert_eq!(again.id, user.id);
}

#[test]
fn wrong_password_is_rejected() {
	let core = ServerCore::new();
	let _alice = TestSession::login(&core, "alice");

	let mut intruder = TestSession::connect(&core);
	let failure = intruder.fail(&core, login("alice", "guess"));
	assert_eq!(failure.code, ErrorCode::AuthFailed);

	let failure = intruder.fail(&core, RequestPayload::ListWorkspaces { owned: true, invited: true });
	assert_eq!(failure.code, ErrorCode::NotAuthenticated);
}

#[test]
fn requests_need_login() {
	let core = ServerCore::new();
	let mut anon = TestSession::connect(&core);
	let failure = anon.fail(&core, RequestPayload::CreateWorkspace { workspace: "notes".into() });
	assert_eq!(failure.code, ErrorCode::NotAuthenticated);
	let failure = anon.fail(&core, RequestPayload::Refresh { token: Token("x".into()) });
	assert_eq!(failure.code, ErrorCode::NotAuthenticated);
}

#[test]
fn logging_in_twice_is_invalid() {
	let core = ServerCore::new();
	let mut alice = TestSession::login(&core, "alice");
	let failure = alice.fail(&core, login("alice", PASSWORD));
	assert_eq!(failure.code, ErrorCode::InvalidRequest);
}

#[test]
fn empty_names_are_invalid() {
	let core = ServerCore::new();
	let mut anon = TestSession::connect(&core);
	let failure = anon.fail(&core, login("", PASSWORD));
	assert_eq!(failure.code, ErrorCode::InvalidRequest);
}

#[test]
fn refresh_rotates_token() {
	let core = ServerCore::new();
	let mut session = TestSession::connect(&core);
	let Ok(ResponsePayload::LoggedIn { token, .. }) = session.request(&core, login("alice", PASSWORD)) else {
		panic!("login failed");
	};

	let Ok(ResponsePayload::Refreshed { token: fresh }) =
		session.request(&core, RequestPayload::Refresh { token: token.clone() })
	else {
		panic!("refresh failed");
	};
	assert_ne!(fresh, token);

	let failure = session.fail(&core, RequestPayload::Refresh { token });
	assert_eq!(failure.code, ErrorCode::InvalidToken);

	let result = session.request(&core, RequestPayload::Refresh { token: fresh });
	assert!(matches!(result, Ok(ResponsePayload::Refreshed { .. })));
}
