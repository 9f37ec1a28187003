use std::fmt;
use std::ops::Deref;

/// A cheaply-cloneable, immutable string used pervasively across the engine for
/// policy names, versions, route keys, and header/metadata keys. Cloning is an
/// atomic refcount bump rather than an allocation, which matters since the same
/// handful of strings (a policy's `(name, version)`, a route key) are copied into
/// every chain entry and every request context.
pub type Strng = arcstr::ArcStr;

/// A case-insensitive wrapper used for header-name-shaped keys. Comparison
/// and hashing normalize to lowercase; display preserves the original casing.
#[derive(Clone)]
pub struct CaseInsensitive(Strng);

impl CaseInsensitive {
	pub fn new(s: impl Into<Strng>) -> Self {
		Self(s.into())
	}

	pub fn as_str(&self) -> &str {
		&self.0
	}
}

impl Deref for CaseInsensitive {
	type Target = str;
	fn deref(&self) -> &str {
		&self.0
	}
}

impl fmt::Debug for CaseInsensitive {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		write!(f, "{:?}", self.0)
	}
}

impl fmt::Display for CaseInsensitive {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		write!(f, "{}", self.0)
	}
}

impl PartialEq for CaseInsensitive {
	fn eq(&self, other: &Self) -> bool {
		self.0.eq_ignore_ascii_case(&other.0)
	}
}
impl Eq for CaseInsensitive {}

impl std::hash::Hash for CaseInsensitive {
	fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
		for b in self.0.bytes() {
			b.to_ascii_lowercase().hash(state);
		}
	}
}

