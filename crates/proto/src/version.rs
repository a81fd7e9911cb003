//! Version vectors stamped on buffer states.

use serde::{Deserialize, Serialize};

/// Version vector of a buffer: one counter per authoring agent.
///
/// Slot `i` counts the changes authored by the `i`-th agent that ever edited the buffer. Missing
/// trailing slots are zero, so vectors of different lengths compare naturally.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Version(pub Vec<u64>);

impl Version {
	/// Counter for `agent`, zero if the slot does not exist yet.
	pub fn get(&self, agent: usize) -> u64 {
		self.0.get(agent).copied().unwrap_or(0)
	}

	/// Bumps the counter of `agent`, growing the vector as needed.
	pub fn increment(&mut self, agent: usize) {
		if self.0.len() <= agent {
			self.0.resize(agent + 1, 0);
		}
		self.0[agent] += 1;
	}

	/// True if every counter of `other` is covered by `self`.
	pub fn dominates(&self, other: &Version) -> bool {
		(0..self.0.len().max(other.0.len())).all(|i| self.get(i) >= other.get(i))
	}

	/// Pointwise maximum of both vectors.
	#[must_use]
	pub fn join(&self, other: &Version) -> Version {
		Version((0..self.0.len().max(other.0.len())).map(|i| self.get(i).max(other.get(i))).collect())
	}

	/// Raw counters.
	pub fn as_slice(&self) -> &[u64] {
		&self.0
	}
}

impl From<Vec<u64>> for Version {
	fn from(value: Vec<u64>) -> Self {
		Self(value)
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn increment_grows_vector() {
		let mut v = Version::default();
		v.increment(2);
		assert_eq!(v.as_slice(), &[0, 0, 1]);
		v.increment(0);
		assert_eq!(v.as_slice(), &[1, 0, 1]);
	}

	#[test]
	fn dominance_ignores_trailing_zeros() {
		let a = Version::from(vec![1, 0]);
		let b = Version::from(vec![1]);
		assert!(a.dominates(&b));
		assert!(b.dominates(&a));
	}

	#[test]
	fn concurrent_versions_do_not_dominate() {
		let a = Version::from(vec![2, 0]);
		let b = Version::from(vec![1, 1]);
		assert!(!a.dominates(&b));
		assert!(!b.dominates(&a));

		let joined = a.join(&b);
		assert_eq!(joined.as_slice(), &[2, 1]);
		assert!(joined.dominates(&a) && joined.dominates(&b));
	}
}
