//! Shared data model and wire types for tandem collaborative editing.
//!
//! This crate defines the values replicas exchange (text changes, cursors, workspace events) and
//! the frames carried between clients and the server. Frames are postcard-encoded behind a `u32`
//! length prefix, see [`protocol`].

#![warn(missing_docs)]

pub mod change;
pub mod cursor;
pub mod event;
pub mod protocol;
pub mod types;
pub mod version;

pub use change::{BufferUpdate, TextChange};
pub use cursor::{Cursor, Selection};
pub use event::{Event, User};
pub use types::*;
pub use version::Version;

/// xxh3 of a buffer's UTF-8 content.
pub fn hash(text: &str) -> u64 {
	xxhash_rust::xxh3::xxh3_64(text.as_bytes())
}

/// Computes a canonical fingerprint for a rope.
///
/// Returns a tuple of `(length_in_characters, xxh3_64_hash)`. The hash equals [`hash`] of the
/// rope's string form.
pub fn fingerprint_rope(rope: &ropey::Rope) -> (u64, u64) {
	let len = rope.len_chars() as u64;
	let mut hasher = xxhash_rust::xxh3::Xxh3::new();
	for chunk in rope.chunks() {
		hasher.update(chunk.as_bytes());
	}
	(len, hasher.digest())
}
