//! Thread-safe in-memory [`SessionStore`] for tests, demos, and single-process hosts.

// std
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
// self
use crate::{
	_prelude::*,
	auth::{ACCESS_TOKEN, EXPIRES_AT, ID_TOKEN, REFRESH_TOKEN, SessionTokenBundle, UserKey},
	session::{SessionError, SessionFuture, SessionStore},
};

type TokenMap = Arc<RwLock<BTreeMap<String, String>>>;

/// In-memory session that records renew/reject calls.
///
/// Clones share the same state, so a test can keep one handle while the flows use another.
#[derive(Clone, Debug, Default)]
pub struct MemorySession(Arc<MemorySessionState>);
impl MemorySession {
	/// Creates an anonymous session.
	pub fn anonymous() -> Self {
		Self::default()
	}

	/// Creates a session authenticated as `user`, with a writable response.
	pub fn authenticated(user: UserKey) -> Self {
		let state = MemorySessionState {
			user: RwLock::new(Some(user)),
			writable: AtomicBool::new(true),
			..Default::default()
		};

		Self(Arc::new(state))
	}

	/// Seeds the session with a full token bundle.
	pub fn with_bundle(self, bundle: &SessionTokenBundle) -> Result<Self, SessionError> {
		Self::write_bundle(&self.0.tokens, bundle)?;

		Ok(self)
	}

	/// Sets a single named token.
	pub fn insert_token(&self, name: &str, value: impl Into<String>) {
		self.0.tokens.write().insert(name.to_owned(), value.into());
	}

	/// Returns a named token without going through the async contract.
	pub fn token(&self, name: &str) -> Option<String> {
		self.0.tokens.read().get(name).cloned()
	}

	/// Marks the response as started (`false`) or still writable (`true`).
	pub fn set_writable(&self, writable: bool) {
		self.0.writable.store(writable, Ordering::SeqCst);
	}

	/// Number of times [`SessionStore::renew`] ran.
	pub fn renewals(&self) -> usize {
		self.0.renewals.load(Ordering::SeqCst)
	}

	/// Returns true once [`SessionStore::reject`] ran.
	pub fn is_rejected(&self) -> bool {
		self.0.rejected.load(Ordering::SeqCst)
	}

	fn write_bundle(
		tokens: &RwLock<BTreeMap<String, String>>,
		bundle: &SessionTokenBundle,
	) -> Result<(), SessionError> {
		let named = bundle
			.to_named_tokens()
			.map_err(|e| SessionError::Serialization { message: e.to_string() })?;
		let mut guard = tokens.write();

		for name in [ACCESS_TOKEN, REFRESH_TOKEN, EXPIRES_AT, ID_TOKEN] {
			guard.remove(name);
		}
		for (name, value) in named {
			guard.insert(name.to_owned(), value);
		}

		Ok(())
	}
}
impl SessionStore for MemorySession {
	fn user_key(&self) -> Option<UserKey> {
		self.0.user.read().clone()
	}

	fn can_renew(&self) -> bool {
		self.0.writable.load(Ordering::SeqCst)
	}

	fn get_token<'a>(&'a self, name: &'a str) -> SessionFuture<'a, Option<String>> {
		let value = self.token(name);

		Box::pin(async move { Ok(value) })
	}

	fn store_tokens(&self, bundle: SessionTokenBundle) -> SessionFuture<'_, ()> {
		let tokens: TokenMap = self.0.tokens.clone();

		Box::pin(async move { Self::write_bundle(&tokens, &bundle) })
	}

	fn renew(&self) -> SessionFuture<'_, ()> {
		Box::pin(async move {
			if !self.can_renew() {
				return Err(SessionError::ResponseStarted);
			}

			self.0.renewals.fetch_add(1, Ordering::SeqCst);

			Ok(())
		})
	}

	fn reject(&self) -> SessionFuture<'_, ()> {
		Box::pin(async move {
			self.0.rejected.store(true, Ordering::SeqCst);
			*self.0.user.write() = None;

			Ok(())
		})
	}
}

#[derive(Debug, Default)]
struct MemorySessionState {
	user: RwLock<Option<UserKey>>,
	tokens: TokenMap,
	writable: AtomicBool,
	renewals: AtomicUsize,
	rejected: AtomicBool,
}
