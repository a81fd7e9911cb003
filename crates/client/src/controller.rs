//! Live update channels shared by buffers, cursors and workspace events.
//!
//! Every controller wraps a [`Feed`]: a FIFO queue filled by the connection's delivery path and
//! drained by any number of consumers, plus at most one callback. Callbacks never run on the
//! delivery path; each delivered item posts a tick to a dispatcher task which runs the callback on
//! the blocking pool, one invocation at a time and in delivery order.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use parking_lot::Mutex;
use tandem_worker::{Executor, Mailbox, MailboxReceiver, MailboxSender, TaskClass};
use tokio::sync::mpsc;

use crate::errors::ControllerResult;

/// Receiving side of a live update channel.
///
/// Items are delivered exactly once, in order, to whichever consumer takes them first. Once a
/// controller is stopped, already queued items stay retrievable and then every receive fails:
/// with [`ControllerError::Stopped`](crate::ControllerError::Stopped) if the call started after the stop, with
/// [`ControllerError::Unfulfilled`](crate::ControllerError::Unfulfilled) if it was already waiting.
#[allow(async_fn_in_trait)]
pub trait Controller<T>: Clone + Send + Sync + 'static {
	/// Takes the oldest queued item, `Ok(None)` if nothing is queued.
	fn try_recv(&self) -> ControllerResult<Option<T>>;

	/// Waits for and takes the oldest item.
	async fn recv(&self) -> ControllerResult<T>;

	/// Waits until an item is queued, without taking it.
	async fn poll(&self) -> ControllerResult<()>;

	/// Blocking [`Self::recv`] for threads outside any async runtime.
	fn recv_blocking(&self) -> ControllerResult<T>;

	/// Blocking [`Self::poll`] for threads outside any async runtime.
	fn poll_blocking(&self) -> ControllerResult<()>;

	/// Runs `cb` once per delivered item, replacing any previous callback.
	///
	/// The callback holds a handle to the controller, so the controller stays alive until the
	/// callback is cleared or the controller is stopped.
	fn callback(&self, cb: impl Fn(Self) + Send + Sync + 'static);

	/// Removes the callback. Invocations already posted still run.
	fn clear_callback(&self);

	/// Stops the controller. Returns `false` if it was already stopped.
	fn stop(&self) -> bool;

	/// True once stopped.
	fn is_stopped(&self) -> bool;
}

/// Sending side of a live update channel.
pub trait Publisher<T> {
	/// Publishes a local value. Never blocks.
	///
	/// # Errors
	///
	/// [`ControllerError::Stopped`](crate::ControllerError::Stopped) if the controller is stopped.
	fn send(&self, item: T) -> ControllerResult<()>;
}

type Tick = mpsc::UnboundedSender<()>;

/// Queue plus callback slot backing a controller.
pub(crate) struct Feed<T> {
	tx: MailboxSender<T>,
	rx: MailboxReceiver<T>,
	ticks: Mutex<Option<Tick>>,
	stopped: AtomicBool,
	executor: Executor,
	label: Arc<str>,
}

impl<T: Send + 'static> Feed<T> {
	pub(crate) fn new(executor: Executor, label: impl Into<Arc<str>>) -> Self {
		let mailbox = Mailbox::new();
		Self {
			tx: mailbox.sender(),
			rx: mailbox.receiver(),
			ticks: Mutex::new(None),
			stopped: AtomicBool::new(false),
			executor,
			label: label.into(),
		}
	}

	/// Enqueues a delivered item. Returns `false` if the feed is stopped.
	pub(crate) fn push(&self, item: T) -> bool {
		// Enqueue and tick under one lock so `set_callback` counts every item exactly once.
		let ticks = self.ticks.lock();
		if self.tx.send(item).is_err() {
			return false;
		}
		if let Some(ticks) = ticks.as_ref() {
			let _ = ticks.send(());
		}
		true
	}

	pub(crate) fn try_recv(&self) -> ControllerResult<Option<T>> {
		Ok(self.rx.try_recv()?)
	}

	pub(crate) async fn recv(&self) -> ControllerResult<T> {
		Ok(self.rx.recv().await?)
	}

	pub(crate) async fn poll(&self) -> ControllerResult<()> {
		Ok(self.rx.poll().await?)
	}

	pub(crate) fn recv_blocking(&self) -> ControllerResult<T> {
		Ok(self.rx.recv_blocking()?)
	}

	pub(crate) fn poll_blocking(&self) -> ControllerResult<()> {
		Ok(self.rx.poll_blocking()?)
	}

	/// True if at least one item is queued.
	pub(crate) fn has_pending(&self) -> bool {
		!self.rx.is_empty()
	}

	pub(crate) fn set_callback<C>(&self, handle: C, cb: impl Fn(C) + Send + Sync + 'static)
	where
		C: Clone + Send + 'static,
	{
		if self.is_stopped() {
			tracing::debug!(controller = %self.label, "callback registered on stopped controller");
			return;
		}
		let (tx, mut rx) = mpsc::unbounded_channel::<()>();
		let mut ticks = self.ticks.lock();
		for _ in 0..self.rx.len() {
			let _ = tx.send(());
		}
		// Replacing the sender ends the previous dispatcher once its backlog is done.
		*ticks = Some(tx);
		drop(ticks);

		let cb = Arc::new(cb);
		let executor = self.executor.clone();
		let label = Arc::clone(&self.label);
		self.executor.spawn(TaskClass::Dispatch, async move {
			while rx.recv().await.is_some() {
				let cb = Arc::clone(&cb);
				let handle = handle.clone();
				if let Err(e) = executor.spawn_blocking(TaskClass::Callback, move || cb(handle)).await {
					tracing::error!(controller = %label, error = %e, "controller callback failed");
				}
			}
			tracing::trace!(controller = %label, "callback dispatcher finished");
		});
	}

	pub(crate) fn clear_callback(&self) {
		self.ticks.lock().take();
	}

	pub(crate) fn stop(&self) -> bool {
		if self.stopped.swap(true, Ordering::AcqRel) {
			return false;
		}
		self.tx.close();
		self.ticks.lock().take();
		tracing::debug!(controller = %self.label, "controller stopped");
		true
	}

	pub(crate) fn is_stopped(&self) -> bool {
		self.stopped.load(Ordering::Acquire)
	}
}

/// Implements [`Controller`] for a handle type by delegating to the [`Feed`] reached through
/// `$feed` (an expression on `self`).
macro_rules! delegate_controller {
	($ty:ty, $item:ty, |$this:ident| $feed:expr) => {
		impl $crate::controller::Controller<$item> for $ty {
			fn try_recv(&self) -> $crate::errors::ControllerResult<Option<$item>> {
				let $this = self;
				$feed.try_recv()
			}

			async fn recv(&self) -> $crate::errors::ControllerResult<$item> {
				let $this = self;
				$feed.recv().await
			}

			async fn poll(&self) -> $crate::errors::ControllerResult<()> {
				let $this = self;
				$feed.poll().await
			}

			fn recv_blocking(&self) -> $crate::errors::ControllerResult<$item> {
				let $this = self;
				$feed.recv_blocking()
			}

			fn poll_blocking(&self) -> $crate::errors::ControllerResult<()> {
				let $this = self;
				$feed.poll_blocking()
			}

			fn callback(&self, cb: impl Fn(Self) + Send + Sync + 'static) {
				let $this = self;
				$feed.set_callback(self.clone(), cb);
			}

			fn clear_callback(&self) {
				let $this = self;
				$feed.clear_callback();
			}

			fn stop(&self) -> bool {
				let $this = self;
				$feed.stop()
			}

			fn is_stopped(&self) -> bool {
				let $this = self;
				$feed.is_stopped()
			}
		}
	};
}

pub(crate) use delegate_controller;
