//! Cursor and selection positions.

use serde::{Deserialize, Serialize};

/// A selection inside one buffer, in rows and columns.
///
/// A plain caret is a selection whose start and end coincide.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Selection {
	/// Row of the selection start.
	pub start_row: u32,
	/// Column of the selection start.
	pub start_col: u32,
	/// Row of the selection end.
	pub end_row: u32,
	/// Column of the selection end.
	pub end_col: u32,
	/// Path of the buffer the selection lives in.
	pub buffer: String,
}

impl Selection {
	/// Builds a selection from editor coordinates, clamping negative values to zero.
	pub fn new(start_row: i64, start_col: i64, end_row: i64, end_col: i64, buffer: impl Into<String>) -> Self {
		Self {
			start_row: clamp(start_row),
			start_col: clamp(start_col),
			end_row: clamp(end_row),
			end_col: clamp(end_col),
			buffer: buffer.into(),
		}
	}

	/// Zero-width selection at `row`/`col`.
	pub fn caret(row: i64, col: i64, buffer: impl Into<String>) -> Self {
		Self::new(row, col, row, col, buffer)
	}

	/// Start position as `(row, col)`.
	pub const fn start(&self) -> (u32, u32) {
		(self.start_row, self.start_col)
	}

	/// End position as `(row, col)`.
	pub const fn end(&self) -> (u32, u32) {
		(self.end_row, self.end_col)
	}
}

fn clamp(value: i64) -> u32 {
	value.clamp(0, u32::MAX as i64) as u32
}

/// One user's current selection.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Cursor {
	/// Name of the user owning the cursor.
	pub user: String,
	/// Where the cursor is.
	pub sel: Selection,
}
