//! Remote cursors of a workspace.

use std::sync::Arc;

use tandem_proto::{ClientNotification, Cursor, Selection};

use crate::controller::{Feed, Publisher, delegate_controller};
use crate::errors::{ControllerError, ControllerResult};
use crate::network::Connection;

/// Handle to the cursors of one workspace.
///
/// Receives other users' cursor moves and publishes the local selection. Cursor updates are
/// ephemeral: nothing is acknowledged or replayed.
#[derive(Clone)]
pub struct CursorController(Arc<CursorInner>);

struct CursorInner {
	workspace: String,
	conn: Arc<Connection>,
	feed: Feed<Cursor>,
}

delegate_controller!(CursorController, Cursor, |this| this.0.feed);

impl CursorController {
	pub(crate) fn new(workspace: &str, conn: Arc<Connection>) -> Self {
		let feed = Feed::new(conn.executor().clone(), format!("cursor:{workspace}"));
		Self(Arc::new(CursorInner {
			workspace: workspace.to_owned(),
			conn,
			feed,
		}))
	}

	pub(crate) fn deliver(&self, cursor: Cursor) {
		if !self.0.feed.push(cursor) {
			tracing::trace!(workspace = %self.0.workspace, "dropping cursor for stopped controller");
		}
	}
}

impl Publisher<Selection> for CursorController {
	fn send(&self, sel: Selection) -> ControllerResult<()> {
		if self.0.feed.is_stopped() {
			return Err(ControllerError::Stopped);
		}
		self.0
			.conn
			.notify(ClientNotification::MoveCursor {
				workspace: self.0.workspace.clone(),
				sel,
			})
			.map_err(|_| ControllerError::Stopped)
	}
}

impl std::fmt::Debug for CursorController {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		f.debug_struct("CursorController")
			.field("workspace", &self.0.workspace)
			.field("stopped", &self.0.feed.is_stopped())
			.finish()
	}
}
