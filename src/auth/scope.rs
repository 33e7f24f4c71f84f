//! Scope normalization and content-addressed scope keys.

// std
use std::{
	collections::{BTreeMap, btree_map::Entry},
	hash::{Hash, Hasher},
	sync::OnceLock,
};
// crates.io
use serde::{Deserializer, Serializer, ser::SerializeSeq};
use sha2::{Digest, Sha256};
// self
use crate::_prelude::*;

/// Normalized set of OAuth scopes with a lazily cached [`ScopeKey`].
///
/// Entries are trimmed, blank entries are dropped, and entries that differ only by case are
/// collapsed (the first spelling wins so the wire value keeps the caller's casing). The set is
/// ordered case-insensitively, which makes equality, hashing, and the derived key independent of
/// input order and casing.
#[derive(Default)]
pub struct ScopeSet {
	scopes: Arc<[String]>,
	key_cache: OnceLock<ScopeKey>,
}
impl ScopeSet {
	/// Creates a normalized scope set from any iterator.
	///
	/// Entries containing inner whitespace are split, so `"openid profile"` yields two scopes.
	pub fn new<I, S>(scopes: I) -> Self
	where
		I: IntoIterator<Item = S>,
		S: AsRef<str>,
	{
		Self { scopes: normalize(scopes), key_cache: OnceLock::new() }
	}

	/// Number of distinct scopes.
	pub fn len(&self) -> usize {
		self.scopes.len()
	}

	/// Returns true if no scopes are defined.
	pub fn is_empty(&self) -> bool {
		self.scopes.is_empty()
	}

	/// Returns true if the set contains the scope, ignoring case.
	pub fn contains(&self, scope: &str) -> bool {
		self.scopes.iter().any(|candidate| candidate.eq_ignore_ascii_case(scope))
	}

	/// Iterator over normalized scopes in key order.
	pub fn iter(&self) -> impl Iterator<Item = &str> {
		self.scopes.iter().map(|s| s.as_str())
	}

	/// Space-delimited scope string suitable for the `scope` form field.
	pub fn normalized(&self) -> String {
		self.scopes.join(" ")
	}

	/// Stable cache key for this set.
	pub fn key(&self) -> ScopeKey {
		self.key_cache.get_or_init(|| ScopeKey::compute(&self.scopes)).clone()
	}

	/// Returns the underlying slice of scope strings.
	pub fn as_slice(&self) -> &[String] {
		&self.scopes
	}

	fn folded(&self) -> impl Iterator<Item = String> + '_ {
		self.scopes.iter().map(|s| s.to_lowercase())
	}
}
impl Clone for ScopeSet {
	fn clone(&self) -> Self {
		Self { scopes: self.scopes.clone(), key_cache: self.key_cache.clone() }
	}
}
impl PartialEq for ScopeSet {
	fn eq(&self, other: &Self) -> bool {
		self.scopes.len() == other.scopes.len() && self.folded().eq(other.folded())
	}
}
impl Eq for ScopeSet {}
impl Hash for ScopeSet {
	fn hash<H: Hasher>(&self, state: &mut H) {
		self.key().hash(state);
	}
}
impl Debug for ScopeSet {
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		f.debug_tuple("ScopeSet").field(&self.scopes).finish()
	}
}
impl Display for ScopeSet {
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		f.write_str(&self.normalized())
	}
}
impl FromStr for ScopeSet {
	type Err = std::convert::Infallible;

	fn from_str(s: &str) -> Result<Self, Self::Err> {
		Ok(Self::new(s.split_whitespace()))
	}
}
impl<S> FromIterator<S> for ScopeSet
where
	S: AsRef<str>,
{
	fn from_iter<I: IntoIterator<Item = S>>(iter: I) -> Self {
		Self::new(iter)
	}
}
impl Serialize for ScopeSet {
	fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
	where
		S: Serializer,
	{
		let mut seq = serializer.serialize_seq(Some(self.scopes.len()))?;

		for scope in self.scopes.iter() {
			seq.serialize_element(scope)?;
		}

		seq.end()
	}
}
impl<'de> Deserialize<'de> for ScopeSet {
	fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
	where
		D: Deserializer<'de>,
	{
		let values = <Vec<String>>::deserialize(deserializer)?;

		Ok(ScopeSet::new(values))
	}
}

/// Content-addressed key derived from a scope set.
///
/// The empty set maps to [`ScopeKey::DEFAULT`]; any other set maps to the lower-case hex
/// SHA-256 digest of its case-folded, space-joined scopes.
#[derive(Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ScopeKey(String);
impl ScopeKey {
	/// Sentinel key used for the empty scope set.
	pub const DEFAULT: &'static str = "default";

	/// Normalizes an unordered scope list straight into its key.
	pub fn from_scopes<I, S>(scopes: I) -> Self
	where
		I: IntoIterator<Item = S>,
		S: AsRef<str>,
	{
		ScopeSet::new(scopes).key()
	}

	/// Returns the key as a string slice.
	pub fn as_str(&self) -> &str {
		&self.0
	}

	/// Returns true for the empty-set sentinel.
	pub fn is_default(&self) -> bool {
		self.0 == Self::DEFAULT
	}

	fn compute(scopes: &[String]) -> Self {
		if scopes.is_empty() {
			return Self::default();
		}

		let joined = scopes.iter().map(|s| s.to_lowercase()).collect::<Vec<_>>().join(" ");
		let digest = Sha256::digest(joined.as_bytes());

		Self(format!("{digest:x}"))
	}
}
impl Default for ScopeKey {
	fn default() -> Self {
		Self(Self::DEFAULT.to_owned())
	}
}
impl AsRef<str> for ScopeKey {
	fn as_ref(&self) -> &str {
		&self.0
	}
}
impl Debug for ScopeKey {
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		write!(f, "ScopeKey({})", self.0)
	}
}
impl Display for ScopeKey {
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		f.write_str(&self.0)
	}
}

fn normalize<I, S>(scopes: I) -> Arc<[String]>
where
	I: IntoIterator<Item = S>,
	S: AsRef<str>,
{
	let mut folded = BTreeMap::new();

	for entry in scopes {
		for scope in entry.as_ref().split_whitespace() {
			if let Entry::Vacant(slot) = folded.entry(scope.to_lowercase()) {
				slot.insert(scope.to_owned());
			}
		}
	}

	Arc::from(folded.into_values().collect::<Vec<_>>())
}
