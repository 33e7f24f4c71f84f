//! Scope-keyed access token cache with skew-aware, read-triggered eviction.
//!
//! Entries are keyed by `(user, scope key)` under a fixed namespace. A read only returns an entry
//! whose expiry lies beyond `now + skew`; anything staler is removed on the spot. There is no
//! background sweep.

// self
use crate::{
	_prelude::*,
	auth::{ScopeKey, TokenSecret, UserKey},
};

type CacheMap = Arc<RwLock<HashMap<CacheKey, CachedToken>>>;

/// Access token held by [`ScopedTokenCache`].
#[derive(Clone, PartialEq, Eq)]
pub struct CachedToken {
	/// Cached access token.
	pub access_token: TokenSecret,
	/// Instant at which the provider considers the token expired.
	pub expires_at: OffsetDateTime,
}
impl CachedToken {
	/// Creates a new cache entry.
	pub fn new(access_token: TokenSecret, expires_at: OffsetDateTime) -> Self {
		Self { access_token, expires_at }
	}

	/// Returns true while the token remains usable beyond `now + skew`.
	pub fn is_fresh_at(&self, now: OffsetDateTime, skew: Duration) -> bool {
		now.checked_add(skew).is_some_and(|limit| self.expires_at > limit)
	}
}
impl Debug for CachedToken {
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		f.debug_struct("CachedToken")
			.field("access_token", &"<redacted>")
			.field("expires_at", &self.expires_at)
			.finish()
	}
}

/// Composite cache key: namespace, user, and scope key.
///
/// Scope keys never contain `:`, so the rendered form stays unambiguous even when the user key
/// does.
#[derive(Clone, PartialEq, Eq, Hash)]
pub struct CacheKey {
	/// User component.
	pub user: UserKey,
	/// Scope component.
	pub scope: ScopeKey,
}
impl CacheKey {
	/// Namespace prefix shared by every rendered key.
	pub const NAMESPACE: &'static str = "oidc:access_token";

	/// Builds a key for the provided user and scope key.
	pub fn new(user: &UserKey, scope: &ScopeKey) -> Self {
		Self { user: user.clone(), scope: scope.clone() }
	}
}
impl Debug for CacheKey {
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		write!(f, "CacheKey({self})")
	}
}
impl Display for CacheKey {
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		write!(f, "{}:{}:{}", Self::NAMESPACE, self.user, self.scope)
	}
}

/// Thread-safe in-process cache mapping `(user, scope key)` to access tokens.
#[derive(Clone, Debug)]
pub struct ScopedTokenCache {
	map: CacheMap,
	skew: Duration,
}
impl ScopedTokenCache {
	/// Default staleness skew.
	pub const DEFAULT_SKEW: Duration = Duration::minutes(5);

	/// Creates an empty cache with the provided skew (negative values clamp to zero).
	pub fn with_skew(skew: Duration) -> Self {
		Self { map: Default::default(), skew: if skew.is_negative() { Duration::ZERO } else { skew } }
	}

	/// Skew applied on reads.
	pub fn skew(&self) -> Duration {
		self.skew
	}

	/// Returns the entry for `(user, scope)` if it is still fresh.
	pub fn get(&self, user: &UserKey, scope: &ScopeKey) -> Option<CachedToken> {
		self.get_at(user, scope, OffsetDateTime::now_utc())
	}

	/// Same as [`get`](Self::get) with an explicit clock reading.
	pub fn get_at(
		&self,
		user: &UserKey,
		scope: &ScopeKey,
		now: OffsetDateTime,
	) -> Option<CachedToken> {
		let key = CacheKey::new(user, scope);

		if let Some(token) = self.map.read().get(&key) {
			if token.is_fresh_at(now, self.skew) {
				return Some(token.clone());
			}
		} else {
			return None;
		}

		let mut guard = self.map.write();

		// Re-check under the write lock; a concurrent writer may have stored a fresh entry.
		match guard.get(&key) {
			Some(token) if token.is_fresh_at(now, self.skew) => Some(token.clone()),
			Some(_) => {
				guard.remove(&key);

				tracing::debug!(key = %key, "Evicted stale cached access token.");

				None
			},
			None => None,
		}
	}

	/// Stores `token` for `(user, scope)` unless it is already expired.
	pub fn set(&self, user: &UserKey, scope: &ScopeKey, token: CachedToken) {
		self.set_at(user, scope, token, OffsetDateTime::now_utc())
	}

	/// Same as [`set`](Self::set) with an explicit clock reading.
	pub fn set_at(&self, user: &UserKey, scope: &ScopeKey, token: CachedToken, now: OffsetDateTime) {
		let ttl = token.expires_at - now;

		if !ttl.is_positive() {
			tracing::debug!(user = %user, scope = %scope, "Skipped caching an expired access token.");

			return;
		}

		self.map.write().insert(CacheKey::new(user, scope), token);
	}

	/// Drops the entry for `(user, scope)`, if any.
	pub fn remove(&self, user: &UserKey, scope: &ScopeKey) -> Option<CachedToken> {
		self.map.write().remove(&CacheKey::new(user, scope))
	}

	/// Number of stored entries, stale ones included.
	pub fn len(&self) -> usize {
		self.map.read().len()
	}

	/// Returns true if nothing is stored.
	pub fn is_empty(&self) -> bool {
		self.map.read().is_empty()
	}
}
impl Default for ScopedTokenCache {
	fn default() -> Self {
		Self::with_skew(Self::DEFAULT_SKEW)
	}
}
