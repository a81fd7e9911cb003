use std::collections::VecDeque;
use std::pin::pin;
use std::sync::Arc;

use parking_lot::{Condvar, Mutex};
use tokio::sync::Notify;

/// Mailbox send error.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum MailboxSendError {
	/// Mailbox is closed.
	#[error("mailbox closed")]
	Closed,
}

/// Mailbox receive error.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum RecvError {
	/// Mailbox was already closed and drained when the call started.
	#[error("mailbox closed")]
	Closed,
	/// Mailbox was closed while the caller was waiting.
	#[error("mailbox closed while waiting")]
	Interrupted,
}

struct MailboxState<T> {
	queue: VecDeque<T>,
	closed: bool,
}

struct MailboxInner<T> {
	state: Mutex<MailboxState<T>>,
	notify: Notify,
	cond: Condvar,
}

impl<T> MailboxInner<T> {
	fn wake_all(&self) {
		self.notify.notify_waiters();
		self.cond.notify_all();
	}
}

/// Multi-producer mailbox sender.
pub struct MailboxSender<T> {
	inner: Arc<MailboxInner<T>>,
}

/// Mailbox receiver. Clones share the same queue.
pub struct MailboxReceiver<T> {
	inner: Arc<MailboxInner<T>>,
}

/// Unbounded FIFO mailbox that can be drained from async and blocking contexts alike.
///
/// Closing never discards queued items: receivers keep draining them and only then observe the
/// closure.
pub struct Mailbox<T> {
	inner: Arc<MailboxInner<T>>,
}

impl<T> Clone for MailboxSender<T> {
	fn clone(&self) -> Self {
		Self {
			inner: Arc::clone(&self.inner),
		}
	}
}

impl<T> Clone for MailboxReceiver<T> {
	fn clone(&self) -> Self {
		Self {
			inner: Arc::clone(&self.inner),
		}
	}
}

impl<T> Default for Mailbox<T> {
	fn default() -> Self {
		Self::new()
	}
}

impl<T> Mailbox<T> {
	/// Creates an empty open mailbox.
	pub fn new() -> Self {
		Self {
			inner: Arc::new(MailboxInner {
				state: Mutex::new(MailboxState {
					queue: VecDeque::new(),
					closed: false,
				}),
				notify: Notify::new(),
				cond: Condvar::new(),
			}),
		}
	}

	/// Returns a sender handle.
	pub fn sender(&self) -> MailboxSender<T> {
		MailboxSender {
			inner: Arc::clone(&self.inner),
		}
	}

	/// Returns a receiver handle.
	pub fn receiver(&self) -> MailboxReceiver<T> {
		MailboxReceiver {
			inner: Arc::clone(&self.inner),
		}
	}
}

impl<T> MailboxSender<T> {
	/// Enqueues `msg` and wakes every waiter.
	pub fn send(&self, msg: T) -> Result<(), MailboxSendError> {
		let mut state = self.inner.state.lock();
		if state.closed {
			return Err(MailboxSendError::Closed);
		}
		state.queue.push_back(msg);
		drop(state);
		self.inner.wake_all();
		Ok(())
	}

	/// Closes the mailbox. Idempotent.
	pub fn close(&self) {
		close(&self.inner);
	}

	/// Returns true once the mailbox is closed.
	pub fn is_closed(&self) -> bool {
		self.inner.state.lock().closed
	}
}

impl<T> MailboxReceiver<T> {
	/// Pops the head without waiting.
	///
	/// Returns `Ok(None)` when empty but open and `Err(Closed)` once closed and drained.
	pub fn try_recv(&self) -> Result<Option<T>, RecvError> {
		let mut state = self.inner.state.lock();
		match state.queue.pop_front() {
			Some(msg) => Ok(Some(msg)),
			None if state.closed => Err(RecvError::Closed),
			None => Ok(None),
		}
	}

	/// Waits for and pops the head.
	pub async fn recv(&self) -> Result<T, RecvError> {
		let mut waited = false;
		loop {
			// Register before checking so a send between check and await is not lost.
			let mut notified = pin!(self.inner.notify.notified());
			notified.as_mut().enable();

			{
				let mut state = self.inner.state.lock();
				if let Some(msg) = state.queue.pop_front() {
					return Ok(msg);
				}
				if state.closed {
					return Err(closed_error(waited));
				}
			}
			waited = true;
			notified.await;
		}
	}

	/// Waits until the queue is non-empty without popping.
	pub async fn poll(&self) -> Result<(), RecvError> {
		let mut waited = false;
		loop {
			let mut notified = pin!(self.inner.notify.notified());
			notified.as_mut().enable();

			{
				let state = self.inner.state.lock();
				if !state.queue.is_empty() {
					return Ok(());
				}
				if state.closed {
					return Err(closed_error(waited));
				}
			}
			waited = true;
			notified.await;
		}
	}

	/// Blocking flavor of [`Self::recv`]. Must not be called from an async task.
	pub fn recv_blocking(&self) -> Result<T, RecvError> {
		let mut waited = false;
		let mut state = self.inner.state.lock();
		loop {
			if let Some(msg) = state.queue.pop_front() {
				return Ok(msg);
			}
			if state.closed {
				return Err(closed_error(waited));
			}
			waited = true;
			self.inner.cond.wait(&mut state);
		}
	}

	/// Blocking flavor of [`Self::poll`]. Must not be called from an async task.
	pub fn poll_blocking(&self) -> Result<(), RecvError> {
		let mut waited = false;
		let mut state = self.inner.state.lock();
		loop {
			if !state.queue.is_empty() {
				return Ok(());
			}
			if state.closed {
				return Err(closed_error(waited));
			}
			waited = true;
			self.inner.cond.wait(&mut state);
		}
	}

	/// Closes the mailbox. Idempotent.
	pub fn close(&self) {
		close(&self.inner);
	}

	/// Returns true once the mailbox is closed.
	pub fn is_closed(&self) -> bool {
		self.inner.state.lock().closed
	}

	/// Returns current queue length.
	pub fn len(&self) -> usize {
		self.inner.state.lock().queue.len()
	}

	/// Returns true if nothing is queued.
	pub fn is_empty(&self) -> bool {
		self.len() == 0
	}
}

fn close<T>(inner: &MailboxInner<T>) {
	let mut state = inner.state.lock();
	if state.closed {
		return;
	}
	state.closed = true;
	drop(state);
	inner.wake_all();
}

const fn closed_error(waited: bool) -> RecvError {
	if waited { RecvError::Interrupted } else { RecvError::Closed }
}
