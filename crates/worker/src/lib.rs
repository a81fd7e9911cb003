//! Worker runtime primitives shared by tandem clients and servers.
//!
//! * [`Mailbox`]: unbounded FIFO drained from async or blocking code.
//! * [`Executor`]: classified task spawning on a captured runtime.

mod class;
mod executor;
mod mailbox;

pub use class::TaskClass;
pub use executor::Executor;
pub use mailbox::{Mailbox, MailboxReceiver, MailboxSendError, MailboxSender, RecvError};
