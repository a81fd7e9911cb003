use pretty_assertions::assert_eq;
use tandem_proto::{
	BufferUpdate, ClientNotification, Cursor, ErrorCode, Event, Notification, RequestPayload, ResponsePayload,
	Selection, TextChange, Version, hash,
};

use super::helpers::{TestSession, shared_workspace};
use crate::core::ServerCore;

const WS: &str = "notes";
const PATH: &str = "todo.md";

fn create(path: &str) -> RequestPayload {
	RequestPayload::CreateBuffer {
		workspace: WS.into(),
		path: path.into(),
	}
}

fn change(change: TextChange) -> ClientNotification {
	ClientNotification::Change {
		workspace: WS.into(),
		path: PATH.into(),
		change,
	}
}

fn ack(version: Vec<u64>) -> ClientNotification {
	ClientNotification::Ack {
		workspace: WS.into(),
		path: PATH.into(),
		version: Version::from(version),
	}
}

fn updates(notifications: Vec<Notification>) -> Vec<BufferUpdate> {
	notifications
		.into_iter()
		.map(|n| match n {
			Notification::Buffer { update, .. } => update,
			other => panic!("expected buffer update, got {other:?}"),
		})
		.collect()
}

/// alice and bob joined to `notes`, both attached to an empty `todo.md`.
fn pair(core: &ServerCore) -> (TestSession, TestSession) {
	let mut alice = TestSession::login(core, "alice");
	let mut bob = TestSession::login(core, "bob");
	shared_workspace(core, &mut alice, &mut [("bob", &mut bob)], WS);
	alice.done(core, create(PATH));
	alice.attach(core, WS, PATH);
	bob.attach(core, WS, PATH);
	alice.notifications();
	bob.notifications();
	(alice, bob)
}

#[test]
fn create_announces_file_tree_change() {
	let core = ServerCore::new();
	let mut alice = TestSession::login(&core, "alice");
	let mut bob = TestSession::login(&core, "bob");
	shared_workspace(&core, &mut alice, &mut [("bob", &mut bob)], WS);

	alice.done(&core, create(PATH));
	assert_eq!(alice.fail(&core, create(PATH)).code, ErrorCode::BufferExists);
	assert_eq!(alice.fail(&core, create("")).code, ErrorCode::InvalidRequest);

	assert_eq!(
		bob.notifications(),
		vec![Notification::Workspace {
			workspace: WS.into(),
			event: Event::FileTreeUpdated { path: PATH.into() },
		}]
	);
	let listed = bob.request(&core, RequestPayload::ListBuffers { workspace: WS.into() });
	assert_eq!(listed, Ok(ResponsePayload::Buffers(vec![PATH.to_owned()])));
}

#[test]
fn attach_returns_snapshot() {
	let core = ServerCore::new();
	let mut alice = TestSession::login(&core, "alice");
	shared_workspace(&core, &mut alice, &mut [], WS);
	alice.done(&core, create(PATH));

	let (content, version) = alice.attach(&core, WS, PATH);
	assert_eq!(content, "");
	assert_eq!(version, Version::default());

	let failure = alice.fail(
		&core,
		RequestPayload::AttachBuffer {
			workspace: WS.into(),
			path: "missing.md".into(),
		},
	);
	assert_eq!(failure.code, ErrorCode::BufferNotFound);
}

#[test]
fn changes_are_sequenced_and_fanned_out() {
	let core = ServerCore::new();
	let (mut alice, mut bob) = pair(&core);

	alice.notify(&core, change(TextChange::insert(0, "hello")));

	let received = updates(bob.notifications());
	assert_eq!(received.len(), 1);
	assert_eq!(received[0].version, Version::from(vec![1]));
	assert_eq!(received[0].hash, Some(hash("hello")));
	assert_eq!(received[0].change.content, "hello");
	assert_eq!(core.buffer_content(WS, PATH).as_deref(), Some("hello"));
	assert!(alice.notifications().is_empty());
}

#[test]
fn each_author_gets_a_version_slot() {
	let core = ServerCore::new();
	let (mut alice, mut bob) = pair(&core);

	alice.notify(&core, change(TextChange::insert(0, "a")));
	bob.notify(&core, change(TextChange::insert(1, "b")));

	let to_alice = updates(alice.notifications());
	assert_eq!(to_alice.len(), 1);
	assert_eq!(to_alice[0].version, Version::from(vec![1, 1]));
	assert_eq!(to_alice[0].hash, Some(hash("ab")));

	let to_bob = updates(bob.notifications());
	assert_eq!(to_bob[0].version, Version::from(vec![1]));
}

#[test]
fn attach_snapshot_precedes_later_changes() {
	let core = ServerCore::new();
	let mut alice = TestSession::login(&core, "alice");
	let mut bob = TestSession::login(&core, "bob");
	shared_workspace(&core, &mut alice, &mut [("bob", &mut bob)], WS);
	alice.done(&core, create(PATH));
	alice.attach(&core, WS, PATH);
	alice.notify(&core, change(TextChange::insert(0, "a")));

	let (content, version) = bob.attach(&core, WS, PATH);
	assert_eq!(content, "a");
	assert_eq!(version, Version::from(vec![1]));

	alice.notify(&core, change(TextChange::insert(1, "b")));
	let received = updates(bob.notifications().into_iter().filter(|n| matches!(n, Notification::Buffer { .. })).collect());
	assert_eq!(received.len(), 1);
	assert_eq!(received[0].version, Version::from(vec![2]));
	assert_eq!(received[0].change.apply(&content), "ab");
}

#[test]
fn history_is_pruned_once_every_attachment_acks() {
	let core = ServerCore::new();
	let (alice, bob) = pair(&core);

	alice.notify(&core, change(TextChange::insert(0, "a")));
	alice.notify(&core, change(TextChange::insert(1, "b")));
	assert_eq!(core.history_len(WS, PATH), Some(2));

	bob.notify(&core, ack(vec![1]));
	assert_eq!(core.history_len(WS, PATH), Some(1));

	bob.notify(&core, ack(vec![2]));
	assert_eq!(core.history_len(WS, PATH), Some(0));
}

#[test]
fn sole_author_needs_no_ack() {
	let core = ServerCore::new();
	let mut alice = TestSession::login(&core, "alice");
	shared_workspace(&core, &mut alice, &mut [], WS);
	alice.done(&core, create(PATH));
	alice.attach(&core, WS, PATH);

	alice.notify(&core, change(TextChange::insert(0, "solo")));
	assert_eq!(core.history_len(WS, PATH), Some(0));
}

#[test]
fn detach_releases_history_and_is_idempotent() {
	let core = ServerCore::new();
	let (alice, mut bob) = pair(&core);

	alice.notify(&core, change(TextChange::insert(0, "a")));
	assert_eq!(core.history_len(WS, PATH), Some(1));

	let detach = || RequestPayload::DetachBuffer {
		workspace: WS.into(),
		path: PATH.into(),
	};
	bob.done(&core, detach());
	assert_eq!(core.history_len(WS, PATH), Some(0));
	bob.done(&core, detach());

	bob.notifications();
	alice.notify(&core, change(TextChange::insert(1, "b")));
	assert!(bob.notifications().is_empty());
}

#[test]
fn delete_closes_remote_attachments() {
	let core = ServerCore::new();
	let (mut alice, mut bob) = pair(&core);

	alice.done(
		&core,
		RequestPayload::DeleteBuffer {
			workspace: WS.into(),
			path: PATH.into(),
		},
	);
	assert_eq!(
		bob.notifications(),
		vec![
			Notification::BufferClosed {
				workspace: WS.into(),
				path: PATH.into(),
			},
			Notification::Workspace {
				workspace: WS.into(),
				event: Event::FileTreeUpdated { path: PATH.into() },
			},
		]
	);
	assert!(alice.notifications().is_empty());
	assert_eq!(core.history_len(WS, PATH), None);

	let failure = alice.fail(
		&core,
		RequestPayload::DeleteBuffer {
			workspace: WS.into(),
			path: PATH.into(),
		},
	);
	assert_eq!(failure.code, ErrorCode::BufferNotFound);
}

#[test]
fn buffer_users_require_attachment() {
	let core = ServerCore::new();
	let mut alice = TestSession::login(&core, "alice");
	let mut bob = TestSession::login(&core, "bob");
	shared_workspace(&core, &mut alice, &mut [("bob", &mut bob)], WS);
	alice.done(&core, create(PATH));
	alice.attach(&core, WS, PATH);

	let list = || RequestPayload::ListBufferUsers {
		workspace: WS.into(),
		path: PATH.into(),
	};
	assert_eq!(bob.fail(&core, list()).code, ErrorCode::NotAttached);
	let content = RequestPayload::BufferContent {
		workspace: WS.into(),
		path: PATH.into(),
	};
	assert_eq!(bob.fail(&core, content).code, ErrorCode::NotAttached);

	bob.attach(&core, WS, PATH);
	let Ok(ResponsePayload::Users(users)) = bob.request(&core, list()) else {
		panic!("listing buffer users failed");
	};
	let mut names: Vec<_> = users.into_iter().map(|u| u.name).collect();
	names.sort();
	assert_eq!(names, vec!["alice".to_owned(), "bob".to_owned()]);
}

#[test]
fn changes_from_unattached_sessions_are_dropped() {
	let core = ServerCore::new();
	let mut alice = TestSession::login(&core, "alice");
	let mut bob = TestSession::login(&core, "bob");
	shared_workspace(&core, &mut alice, &mut [("bob", &mut bob)], WS);
	alice.done(&core, create(PATH));
	alice.attach(&core, WS, PATH);
	alice.notifications();

	bob.notify(&core, change(TextChange::insert(0, "sneaky")));
	assert_eq!(core.buffer_content(WS, PATH).as_deref(), Some(""));
	assert!(alice.notifications().is_empty());
}

#[test]
fn cursor_moves_reach_other_members() {
	let core = ServerCore::new();
	let mut alice = TestSession::login(&core, "alice");
	let mut bob = TestSession::login(&core, "bob");
	shared_workspace(&core, &mut alice, &mut [("bob", &mut bob)], WS);

	let sel = Selection::new(1, 2, 1, 5, PATH);
	alice.notify(
		&core,
		ClientNotification::MoveCursor {
			workspace: WS.into(),
			sel: sel.clone(),
		},
	);
	assert_eq!(
		bob.notifications(),
		vec![Notification::Cursor {
			workspace: WS.into(),
			cursor: Cursor {
				user: "alice".into(),
				sel,
			},
		}]
	);
	assert!(alice.notifications().is_empty());
}

#[test]
fn resync_returns_authoritative_content() {
	let core = ServerCore::new();
	let (alice, mut bob) = pair(&core);
	alice.notify(&core, change(TextChange::insert(0, "truth")));

	let result = bob.request(
		&core,
		RequestPayload::BufferContent {
			workspace: WS.into(),
			path: PATH.into(),
		},
	);
	assert_eq!(
		result,
		Ok(ResponsePayload::Content {
			content: "truth".into(),
			version: Version::from(vec![1]),
		})
	);
}
