use std::future::Future;
use std::io;
use std::sync::OnceLock;

use tokio::runtime::Handle;
use tokio::task::JoinHandle;

use crate::TaskClass;

/// Handle to the runtime that drives background work.
///
/// Clients capture one at construction so their tasks keep running even when the caller later
/// drives them from plain threads.
#[derive(Debug, Clone)]
pub struct Executor {
	handle: Handle,
}

impl Executor {
	/// Wraps an existing runtime handle.
	pub fn from_handle(handle: Handle) -> Self {
		Self { handle }
	}

	/// Uses the ambient runtime if there is one, a lazily built shared runtime otherwise.
	///
	/// # Errors
	///
	/// Returns the I/O error raised while building the shared runtime.
	pub fn current() -> io::Result<Self> {
		if let Ok(handle) = Handle::try_current() {
			return Ok(Self::from_handle(handle));
		}
		global_handle().map(Self::from_handle)
	}

	/// Underlying runtime handle.
	pub fn handle(&self) -> &Handle {
		&self.handle
	}

	/// Spawns an async task with classification metadata.
	pub fn spawn<F>(&self, class: TaskClass, fut: F) -> JoinHandle<F::Output>
	where
		F: Future + Send + 'static,
		F::Output: Send + 'static,
	{
		tracing::trace!(worker_class = class.as_str(), "worker.spawn");
		self.handle.spawn(fut)
	}

	/// Spawns blocking work with classification metadata.
	pub fn spawn_blocking<F, R>(&self, class: TaskClass, f: F) -> JoinHandle<R>
	where
		F: FnOnce() -> R + Send + 'static,
		R: Send + 'static,
	{
		tracing::trace!(worker_class = class.as_str(), "worker.spawn_blocking");
		self.handle.spawn_blocking(f)
	}
}

fn global_handle() -> io::Result<Handle> {
	static GLOBAL_RT: OnceLock<Result<tokio::runtime::Runtime, String>> = OnceLock::new();
	let runtime = GLOBAL_RT.get_or_init(|| {
		tokio::runtime::Builder::new_multi_thread()
			.enable_all()
			.worker_threads(2)
			.thread_name("tandem-worker-global")
			.build()
			.map_err(|e| e.to_string())
	});
	match runtime {
		Ok(rt) => Ok(rt.handle().clone()),
		Err(e) => Err(io::Error::other(format!("failed to build shared runtime: {e}"))),
	}
}
