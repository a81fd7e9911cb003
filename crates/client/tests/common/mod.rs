//! In-process server and helpers shared by the integration tests.

#![allow(dead_code)]

use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use tandem::{Client, Config, Controller, Workspace};
use tandem_server::ServerCore;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;

pub const PASSWORD: &str = "pw";

/// A server listening on an ephemeral localhost port. Stops when dropped.
pub struct TestServer {
	pub addr: SocketAddr,
	pub core: Arc<ServerCore>,
	shutdown: CancellationToken,
}

impl TestServer {
	pub async fn start() -> Self {
		let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind test listener");
		let addr = listener.local_addr().expect("listener address");
		let core = ServerCore::new();
		let shutdown = CancellationToken::new();
		tokio::spawn(tandem_server::serve(listener, Arc::clone(&core), shutdown.clone()));
		Self { addr, core, shutdown }
	}

	pub fn config(&self, user: &str) -> Config {
		self.config_with(user, PASSWORD)
	}

	pub fn config_with(&self, user: &str, password: &str) -> Config {
		Config::with_server(user, password, self.addr.ip().to_string(), i64::from(self.addr.port()), false)
			.expect("valid test config")
	}

	pub async fn client(&self, user: &str) -> Client {
		within(Client::connect(self.config(user))).await.expect("connect")
	}

	/// Stops accepting and closes every open connection.
	pub fn stop(&self) {
		self.shutdown.cancel();
	}
}

impl Drop for TestServer {
	fn drop(&mut self) {
		self.shutdown.cancel();
	}
}

/// Two clients joined to the same workspace, owned by alice.
pub struct Pair {
	pub alice: Client,
	pub bob: Client,
	pub ws_a: Workspace,
	pub ws_b: Workspace,
}

pub async fn shared_workspace(server: &TestServer, id: &str) -> Pair {
	let alice = server.client("alice").await;
	let bob = server.client("bob").await;
	alice.create_workspace(id).await.expect("create workspace");
	alice.invite_to_workspace(id, "bob").await.expect("invite bob");
	let ws_a = alice.join_workspace(id).await.expect("alice joins");
	let ws_b = bob.join_workspace(id).await.expect("bob joins");

	let joined = within(ws_a.recv()).await.expect("join event");
	assert_eq!(joined.user_joined(), Some("bob"));
	Pair { alice, bob, ws_a, ws_b }
}

/// Awaits `fut`, failing the test after five seconds.
pub async fn within<F: Future>(fut: F) -> F::Output {
	tokio::time::timeout(Duration::from_secs(5), fut).await.expect("timed out")
}

/// Polls `cond` until it holds, failing the test after five seconds.
pub async fn wait_until(mut cond: impl FnMut() -> bool) {
	within(async {
		while !cond() {
			tokio::time::sleep(Duration::from_millis(10)).await;
		}
	})
	.await;
}
