//! String interning into stable 32-bit identifiers.
//!
//! Every declared entity (component, pass, image) is referred to by a
//! [`Name`] everywhere inside the compiler; `Name` equality is the *only*
//! cross-subsystem identity predicate. No reverse mapping back to the
//! source string is kept — debug names are stored separately as plain
//! `String`s on the declaring entities for diagnostics and the DOT dump.

use std::hash::{Hash, Hasher};

use rustc_hash::{FxBuildHasher, FxHasher};

/// A `hashbrown` map keyed with the same fast non-cryptographic hasher used
/// for [`Name`] itself, matching the teacher's direct use of
/// `hashbrown::HashMap` for its own internal tables.
pub(crate) type FxHashMap<K, V> = hashbrown::HashMap<K, V, FxBuildHasher>;

/// A 32-bit hash of a user-supplied string, stable for the lifetime of a
/// process.
#[derive(Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
pub struct Name(pub u32);

impl Name {
	/// Hash `s` into a `Name`. Not cryptographic; collisions are possible in
	/// principle but avalanche well enough that unrelated strings used
	/// within one engine do not collide in practice.
	pub fn new(s: &str) -> Self {
		let mut hasher = FxHasher::default();
		s.hash(&mut hasher);
		Name(fold(hasher.finish()))
	}

	/// Combine this name with an extra 32-bit value, used by the physical
	/// resource cache to fold `(usage, format, name)` into one invalidation
	/// key.
	pub fn combine(self, extra: u32) -> Self {
		let mut hasher = FxHasher::default();
		self.0.hash(&mut hasher);
		extra.hash(&mut hasher);
		Name(fold(hasher.finish()))
	}
}

fn fold(h: u64) -> u32 { ((h >> 32) as u32) ^ (h as u32) }

impl std::fmt::Debug for Name {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result { write!(f, "Name({:#010x})", self.0) }
}

impl From<&str> for Name {
	fn from(s: &str) -> Self { Name::new(s) }
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn stable_within_a_run() {
		assert_eq!(Name::new("albedo"), Name::new("albedo"));
	}

	#[test]
	fn distinguishes_distinct_strings() {
		assert_ne!(Name::new("albedo"), Name::new("depth"));
	}

	#[test]
	fn combine_is_sensitive_to_the_extra_value() {
		let base = Name::new("gbuffer");
		assert_ne!(base.combine(1), base.combine(2));
	}
}
