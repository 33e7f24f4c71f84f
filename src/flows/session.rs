//! Cookie-session refresh and the passive principal hook.
//!
//! [`RefreshBroker::try_refresh_and_renew_session`] refreshes a session whose access token is
//! within the configured skew of expiring, rewrites its token bundle, and flags it for reissue.
//! [`PrincipalInterceptor`] runs the same path before a principal is trusted and rejects the
//! principal when the refresh cannot be completed.

// self
use crate::{
	_prelude::*,
	auth::{ScopeKey, SessionTokenBundle, UserKey},
	cache::{CacheKey, CachedToken},
	config::RefreshStrategy,
	flows::RefreshBroker,
	http::{TokenHttpClient, TransportErrorMapper},
	obs::{self, FlowKind, FlowOutcome, FlowSpan},
	session::SessionStore,
};

/// Boxed future returned by [`PrincipalInterceptor::before_trust_principal`].
pub type DecisionFuture<'a> = Pin<Box<dyn Future<Output = Decision> + 'a + Send>>;

/// Verdict of [`PrincipalInterceptor::before_trust_principal`].
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Decision {
	/// Keep trusting the principal.
	Continue,
	/// Principal was invalidated; the caller must re-authenticate.
	Reject,
}

/// Hook invoked by the host before it trusts a session principal.
pub trait PrincipalInterceptor
where
	Self: Send + Sync,
{
	/// Ensures the session's token is not stale, invalidating the principal if it cannot be
	/// refreshed.
	fn before_trust_principal<'a>(&'a self, session: &'a dyn SessionStore) -> DecisionFuture<'a>;
}

/// What a session refresh attempt did.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum SessionRefreshOutcome {
	/// Refresh is disabled in the options.
	Disabled,
	/// Session carries no principal.
	Anonymous,
	/// Response headers were already sent.
	NotRenewable,
	/// Session has no parseable `expires_at`.
	MissingExpiry,
	/// Access token is still outside the skew window.
	NotDue,
	/// Session has no refresh token.
	MissingRefreshToken,
	/// A concurrent request refreshed the session while this one waited.
	AlreadyRefreshed,
	/// This call refreshed and renewed the session.
	Refreshed,
	/// Configuration, grant, or session write failed.
	Failed,
}
impl SessionRefreshOutcome {
	/// Returns true when the session now holds freshly refreshed tokens.
	pub fn occurred(self) -> bool {
		matches!(self, Self::Refreshed | Self::AlreadyRefreshed)
	}
}

impl<C, M> RefreshBroker<C, M>
where
	C: ?Sized + TokenHttpClient,
	M: ?Sized + TransportErrorMapper<C::TransportError>,
{
	/// Refreshes and renews `session` when its access token is due.
	///
	/// Returns true if a refresh occurred, whether performed by this call or by a concurrent
	/// request for the same session.
	pub async fn try_refresh_and_renew_session(&self, session: &dyn SessionStore) -> bool {
		self.refresh_session(session).await.occurred()
	}

	/// Same as [`try_refresh_and_renew_session`](Self::try_refresh_and_renew_session), reporting
	/// the detailed outcome.
	pub async fn refresh_session(&self, session: &dyn SessionStore) -> SessionRefreshOutcome {
		const KIND: FlowKind = FlowKind::SessionRefresh;

		let span = FlowSpan::new(KIND, "refresh_session");

		obs::record_flow_outcome(KIND, FlowOutcome::Attempt);

		let outcome = match span.instrument(self.try_refresh_session(session)).await {
			Ok(outcome) => outcome,
			Err(err) => {
				tracing::warn!(error = %err, "Session refresh failed.");

				SessionRefreshOutcome::Failed
			},
		};

		if outcome == SessionRefreshOutcome::Failed {
			obs::record_flow_outcome(KIND, FlowOutcome::Failure);
		} else {
			obs::record_flow_outcome(KIND, FlowOutcome::Success);
		}

		outcome
	}

	async fn try_refresh_session(&self, session: &dyn SessionStore) -> Result<SessionRefreshOutcome> {
		if !self.options.enable_refresh_tokens {
			return Ok(SessionRefreshOutcome::Disabled);
		}

		let Some(user) = session.user_key() else {
			return Ok(SessionRefreshOutcome::Anonymous);
		};

		if !session.can_renew() {
			return Ok(SessionRefreshOutcome::NotRenewable);
		}

		let Some(expires_at) = session.expires_at().await? else {
			return Ok(SessionRefreshOutcome::MissingExpiry);
		};

		if !self.is_due(expires_at, OffsetDateTime::now_utc()) {
			tracing::debug!(user = %user, %expires_at, "Session token is not due for refresh.");

			return Ok(SessionRefreshOutcome::NotDue);
		}
		if session.refresh_token().await?.is_none() {
			return Ok(SessionRefreshOutcome::MissingRefreshToken);
		}

		let key = CacheKey::new(&user, &ScopeKey::default());

		self.coordinator.run(&key, self.refresh_session_locked(session, &user)).await
	}

	async fn refresh_session_locked(
		&self,
		session: &dyn SessionStore,
		user: &UserKey,
	) -> Result<SessionRefreshOutcome> {
		let now = OffsetDateTime::now_utc();

		// A concurrent request may have renewed the session while this one waited.
		if session.expires_at().await?.is_some_and(|expires_at| !self.is_due(expires_at, now)) {
			tracing::debug!(user = %user, "Session was refreshed by a concurrent request.");

			return Ok(SessionRefreshOutcome::AlreadyRefreshed);
		}

		let Some(refresh_token) = session.refresh_token().await? else {
			return Ok(SessionRefreshOutcome::MissingRefreshToken);
		};
		let Some(config) = self.resolver.resolve().await else {
			return Ok(SessionRefreshOutcome::Failed);
		};
		let Some(tokens) = self.grant(&refresh_token, None, &config).await else {
			return Ok(SessionRefreshOutcome::Failed);
		};
		let id_token = session.id_token().await?;
		let bundle = SessionTokenBundle {
			access_token: tokens.access_token.clone(),
			refresh_token: tokens.refresh_token.clone().unwrap_or(refresh_token),
			expires_at: tokens.expires_at,
			id_token,
		};

		session.store_tokens(bundle).await?;
		session.renew().await?;
		self.cache.set(
			user,
			&ScopeKey::default(),
			CachedToken::new(tokens.access_token, tokens.expires_at),
		);

		tracing::debug!(
			user = %user,
			expires_at = %tokens.expires_at,
			rotated = tokens.refresh_token.is_some(),
			"Session refreshed and flagged for reissue."
		);

		Ok(SessionRefreshOutcome::Refreshed)
	}

	fn is_due(&self, expires_at: OffsetDateTime, now: OffsetDateTime) -> bool {
		now.checked_add(self.options.refresh_skew).is_none_or(|due_from| expires_at <= due_from)
	}

	async fn validate_principal(&self, session: &dyn SessionStore) -> Decision {
		if !self.options.enable_refresh_tokens || !session.is_authenticated() {
			return Decision::Continue;
		}

		let expires_at = match session.expires_at().await {
			Ok(Some(expires_at)) => expires_at,
			Ok(None) => return Decision::Continue,
			Err(err) => {
				tracing::warn!(error = %err, "Session expiry could not be read.");

				return Decision::Continue;
			},
		};

		if !self.is_due(expires_at, OffsetDateTime::now_utc()) {
			return Decision::Continue;
		}

		let outcome = self.refresh_session(session).await;

		if matches!(
			outcome,
			SessionRefreshOutcome::Refreshed
				| SessionRefreshOutcome::AlreadyRefreshed
				| SessionRefreshOutcome::NotDue
				| SessionRefreshOutcome::Anonymous
		) {
			return Decision::Continue;
		}
		if outcome == SessionRefreshOutcome::NotRenewable
			&& expires_at > OffsetDateTime::now_utc()
		{
			tracing::debug!(
				%expires_at,
				"Response already started; trusting the principal until its token expires."
			);

			return Decision::Continue;
		}
		if self.options.strategy == RefreshStrategy::BestEffort
			&& expires_at > OffsetDateTime::now_utc()
		{
			tracing::warn!(
				?outcome,
				%expires_at,
				"Session refresh failed; trusting the principal until its token expires."
			);

			return Decision::Continue;
		}

		tracing::warn!(?outcome, "Session refresh failed; rejecting the principal.");

		if let Err(err) = session.reject().await {
			tracing::warn!(error = %err, "Principal could not be invalidated.");
		}

		Decision::Reject
	}
}
impl<C, M> PrincipalInterceptor for RefreshBroker<C, M>
where
	C: ?Sized + TokenHttpClient,
	M: ?Sized + TransportErrorMapper<C::TransportError>,
{
	fn before_trust_principal<'a>(&'a self, session: &'a dyn SessionStore) -> DecisionFuture<'a> {
		const KIND: FlowKind = FlowKind::PrincipalValidation;

		let span = FlowSpan::new(KIND, "before_trust_principal");

		obs::record_flow_outcome(KIND, FlowOutcome::Attempt);

		Box::pin(async move {
			let decision = span.instrument(self.validate_principal(session)).await;

			match decision {
				Decision::Continue => obs::record_flow_outcome(KIND, FlowOutcome::Success),
				Decision::Reject => obs::record_flow_outcome(KIND, FlowOutcome::Failure),
			}

			decision
		})
	}
}
