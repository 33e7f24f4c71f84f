//! Scoped access tokens for authenticated callers.
//!
//! [`RefreshBroker::access_token`] checks the cache, then enters the coordinator and checks again
//! before calling the token endpoint. Waiters that queued behind a refresh for the same
//! `(user, scope key)` pick up the token it cached instead of sending their own grant.

// self
use crate::{
	_prelude::*,
	auth::{ScopeSet, SessionTokenBundle, TokenSecret, UserKey},
	cache::{CacheKey, CachedToken},
	flows::RefreshBroker,
	http::{TokenHttpClient, TransportErrorMapper},
	oauth::RefreshedTokens,
	obs::{self, FlowKind, FlowOutcome, FlowSpan},
	session::SessionStore,
};

impl<C, M> RefreshBroker<C, M>
where
	C: ?Sized + TokenHttpClient,
	M: ?Sized + TransportErrorMapper<C::TransportError>,
{
	/// Returns an access token for `scopes` on behalf of the session's user.
	///
	/// Yields `None` for anonymous sessions, sessions without a refresh token, unresolvable
	/// configuration, and failed grants. Failures are logged, never returned.
	pub async fn access_token(
		&self,
		session: &dyn SessionStore,
		scopes: &ScopeSet,
	) -> Option<TokenSecret> {
		const KIND: FlowKind = FlowKind::AccessToken;

		let span = FlowSpan::new(KIND, "access_token");

		obs::record_flow_outcome(KIND, FlowOutcome::Attempt);

		let result = span.instrument(self.try_access_token(session, scopes)).await;
		let token = match result {
			Ok(token) => token,
			Err(err) => {
				tracing::warn!(error = %err, "Access token lookup failed.");

				None
			},
		};

		match &token {
			Some(_) => obs::record_flow_outcome(KIND, FlowOutcome::Success),
			None => obs::record_flow_outcome(KIND, FlowOutcome::Failure),
		}

		token
	}

	async fn try_access_token(
		&self,
		session: &dyn SessionStore,
		scopes: &ScopeSet,
	) -> Result<Option<TokenSecret>> {
		let Some(user) = session.user_key() else {
			return Ok(None);
		};
		let scope_key = scopes.key();

		if let Some(cached) = self.cached(&user, scopes) {
			return Ok(Some(cached.access_token));
		}

		if session.refresh_token().await?.is_none() {
			tracing::debug!(user = %user, "No refresh token in session; skipping refresh.");

			return Ok(None);
		}

		let key = CacheKey::new(&user, &scope_key);

		self.coordinator
			.run(&key, async {
				if let Some(cached) = self.cached(&user, scopes) {
					return Ok(Some(cached.access_token));
				}

				// A request that held the permit before us may have rotated the refresh token.
				let Some(refresh_token) = session.refresh_token().await? else {
					return Ok(None);
				};
				let Some(config) = self.resolver.resolve().await else {
					return Ok(None);
				};
				let Some(tokens) = self.grant(&refresh_token, Some(scopes), &config).await else {
					return Ok(None);
				};

				self.cache.set(
					&user,
					&scope_key,
					CachedToken::new(tokens.access_token.clone(), tokens.expires_at),
				);
				self.persist_rotation(session, &refresh_token, &tokens).await;

				Ok(Some(tokens.access_token))
			})
			.await
	}

	fn cached(&self, user: &UserKey, scopes: &ScopeSet) -> Option<CachedToken> {
		let cached = self.cache.get(user, &scopes.key())?;

		self.refresh_metrics.record_cache_hit();
		tracing::debug!(user = %user, scope = %scopes, "Serving access token from cache.");

		Some(cached)
	}

	/// Writes a rotated refresh token back to the session when the response is still writable.
	///
	/// The session keeps its own access token and expiry; only the refresh token changes.
	async fn persist_rotation(
		&self,
		session: &dyn SessionStore,
		previous: &TokenSecret,
		tokens: &RefreshedTokens,
	) {
		let Some(rotated) = tokens.refresh_token.as_ref().filter(|rotated| *rotated != previous)
		else {
			return;
		};

		if !session.can_renew() {
			tracing::warn!("Refresh token rotated after the response started; rotation not persisted.");

			return;
		}

		let result = async {
			let (Some(access_token), Some(expires_at)) =
				(session.access_token().await?, session.expires_at().await?)
			else {
				return Ok(false);
			};
			let id_token = session.id_token().await?;

			session
				.store_tokens(SessionTokenBundle {
					access_token,
					refresh_token: rotated.clone(),
					expires_at,
					id_token,
				})
				.await?;
			session.renew().await?;

			Ok::<_, Error>(true)
		}
		.await;

		match result {
			Ok(true) => tracing::debug!("Persisted rotated refresh token to the session."),
			Ok(false) => tracing::debug!("Session lacks a token bundle; rotation not persisted."),
			Err(err) => tracing::warn!(error = %err, "Rotated refresh token could not be persisted."),
		}
	}
}
