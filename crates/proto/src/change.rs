//! Text changes and the buffer updates that carry them.

use std::ops::Range;

use ropey::Rope;
use serde::{Deserialize, Serialize};

use crate::version::Version;

/// Replacement of a char range with new content.
///
/// `start..end` addresses characters of the text *before* the change is applied. A change may
/// delete, insert, or do both at once (a replacement):
///
/// * insert `"a"` after the 4th char: `TextChange::new(4, 4, "a")`
/// * delete the 4th char: `TextChange::new(3, 4, "")`
/// * replace chars 3..7 with `"x"`: `TextChange::new(3, 7, "x")`
///
/// Offsets past the end of the text are clamped when applying, so applying never panics.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TextChange {
	/// First replaced char (inclusive).
	pub start: u64,
	/// Last replaced char (exclusive).
	pub end: u64,
	/// Text inserted in place of `start..end`.
	pub content: String,
	/// xxh3 of the full buffer content after applying this change, if known.
	///
	/// Advisory only: receivers compare it against their own content to detect desync.
	pub hash: Option<u64>,
}

impl TextChange {
	/// Creates a change without a content hash.
	pub fn new(start: u64, end: u64, content: impl Into<String>) -> Self {
		Self {
			start,
			end,
			content: content.into(),
			hash: None,
		}
	}

	/// Pure insertion at `at`.
	pub fn insert(at: u64, content: impl Into<String>) -> Self {
		Self::new(at, at, content)
	}

	/// Pure deletion of `span`.
	pub fn delete(span: Range<u64>) -> Self {
		Self::new(span.start, span.end, "")
	}

	/// Attaches the post-change content hash.
	#[must_use]
	pub fn with_hash(mut self, hash: u64) -> Self {
		self.hash = Some(hash);
		self
	}

	/// Smallest single-span change turning `before` into `after`.
	///
	/// Strips the common char prefix and suffix; whatever remains in `before` is the replaced
	/// span, whatever remains in `after` is the new content.
	pub fn from_diff(before: &str, after: &str) -> Self {
		let old: Vec<char> = before.chars().collect();
		let new: Vec<char> = after.chars().collect();

		let prefix = old.iter().zip(new.iter()).take_while(|(a, b)| a == b).count();
		let max_suffix = old.len().min(new.len()) - prefix;
		let suffix = old
			.iter()
			.rev()
			.zip(new.iter().rev())
			.take(max_suffix)
			.take_while(|(a, b)| a == b)
			.count();

		Self::new(prefix as u64, (old.len() - suffix) as u64, new[prefix..new.len() - suffix].iter().collect::<String>())
	}

	/// The replaced char span.
	pub fn span(&self) -> Range<u64> {
		self.start..self.end
	}

	/// True if this change removes existing text.
	pub const fn is_delete(&self) -> bool {
		self.start < self.end
	}

	/// True if this change adds new text.
	pub fn is_insert(&self) -> bool {
		!self.content.is_empty()
	}

	/// True if applying this change leaves any text untouched.
	pub fn is_empty(&self) -> bool {
		!self.is_delete() && !self.is_insert()
	}

	/// Applies the change to `text`, returning the new string.
	///
	/// Computes `text[..min(start, len)] + content + text[min(end, len)..]` over chars. An
	/// inverted span (`end < start`) removes nothing and inserts at `start`.
	pub fn apply(&self, text: &str) -> String {
		let len = text.chars().count() as u64;
		let start = self.start.min(len);
		let pre = char_to_byte(text, start);
		let post = char_to_byte(text, self.end.min(len).max(start));

		let mut out = String::with_capacity(pre + self.content.len() + text.len() - post);
		out.push_str(&text[..pre]);
		out.push_str(&self.content);
		out.push_str(&text[post..]);
		out
	}

	/// Applies the change to a rope in place, with the same clamping as [`Self::apply`].
	pub fn apply_to_rope(&self, rope: &mut Rope) {
		let len = rope.len_chars();
		let pre = self.start.min(len as u64) as usize;
		let post = (self.end.min(len as u64) as usize).max(pre);

		rope.remove(pre..post);
		rope.insert(pre, &self.content);
	}
}

fn char_to_byte(text: &str, char_idx: u64) -> usize {
	text.char_indices().nth(char_idx as usize).map_or(text.len(), |(byte, _)| byte)
}

/// A remote change delivered to a buffer replica.
///
/// Consumers must acknowledge `version` once they have applied `change`, so the server can prune
/// history it retains for this replica.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BufferUpdate {
	/// xxh3 of the server content after the change.
	pub hash: Option<u64>,
	/// Version vector of the server state after the change.
	pub version: Version,
	/// The change itself.
	pub change: TextChange,
}
