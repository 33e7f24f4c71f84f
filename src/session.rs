//! Persisted browser session contract consumed by the session refresh flows.

pub mod memory;

pub use memory::MemorySession;

// self
use crate::{
	_prelude::*,
	auth::{
		ACCESS_TOKEN, EXPIRES_AT, ID_TOKEN, REFRESH_TOKEN, SessionTokenBundle, TokenSecret, UserKey,
		parse_expires_at,
	},
};

/// Boxed future returned by [`SessionStore`] operations.
pub type SessionFuture<'a, T> = Pin<Box<dyn Future<Output = Result<T, SessionError>> + 'a + Send>>;

/// Session handle for the request currently being served.
///
/// Implementations wrap whatever the host framework uses to persist authentication state
/// (encrypted cookie, server-side ticket store, ...). Reads are expected to be cheap; the bundle
/// write in [`store_tokens`](Self::store_tokens) must replace every named token atomically.
pub trait SessionStore
where
	Self: Send + Sync,
{
	/// Key of the authenticated user, or `None` for anonymous callers.
	fn user_key(&self) -> Option<UserKey>;

	/// Returns true when the request carries an authenticated principal.
	fn is_authenticated(&self) -> bool {
		self.user_key().is_some()
	}

	/// Returns true while the response can still carry headers (the cookie can be reissued).
	fn can_renew(&self) -> bool;

	/// Reads a named token from the session.
	fn get_token<'a>(&'a self, name: &'a str) -> SessionFuture<'a, Option<String>>;

	/// Overwrites the session's named tokens with `bundle` as a single unit.
	fn store_tokens(&self, bundle: SessionTokenBundle) -> SessionFuture<'_, ()>;

	/// Re-signs the current principal and flags the session for reissue.
	fn renew(&self) -> SessionFuture<'_, ()>;

	/// Invalidates the current principal so the caller must re-authenticate.
	fn reject(&self) -> SessionFuture<'_, ()>;
}
impl dyn SessionStore + '_ {
	/// Reads the refresh token, treating blank values as absent.
	pub async fn refresh_token(&self) -> Result<Option<TokenSecret>, SessionError> {
		Ok(self.get_token(REFRESH_TOKEN).await?.and_then(TokenSecret::non_blank))
	}

	/// Reads the access token, treating blank values as absent.
	pub async fn access_token(&self) -> Result<Option<TokenSecret>, SessionError> {
		Ok(self.get_token(ACCESS_TOKEN).await?.and_then(TokenSecret::non_blank))
	}

	/// Reads the identity token, treating blank values as absent.
	pub async fn id_token(&self) -> Result<Option<TokenSecret>, SessionError> {
		Ok(self.get_token(ID_TOKEN).await?.and_then(TokenSecret::non_blank))
	}

	/// Reads and parses the access token expiry; unparseable values are treated as absent.
	pub async fn expires_at(&self) -> Result<Option<OffsetDateTime>, SessionError> {
		let raw = self.get_token(EXPIRES_AT).await?;

		Ok(raw.as_deref().and_then(parse_expires_at))
	}
}

/// Error type produced by [`SessionStore`] implementations.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize, ThisError)]
pub enum SessionError {
	/// Session payload could not be encoded or decoded.
	#[error("Session serialization error: {message}.")]
	Serialization {
		/// Human-readable error payload.
		message: String,
	},
	/// Backing store failure (ticket store, cache, ...).
	#[error("Session backend failure: {message}.")]
	Backend {
		/// Human-readable error payload.
		message: String,
	},
	/// Response headers were already sent, so the session cannot be rewritten.
	#[error("Session can no longer be renewed for this response.")]
	ResponseStarted,
}
