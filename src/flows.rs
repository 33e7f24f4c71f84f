//! Refresh orchestration: scoped access tokens, session renewal, and the principal hook.

pub mod accessor;
pub mod session;
pub mod singleflight;

mod metrics;

pub use metrics::RefreshMetrics;
pub use session::*;
pub use singleflight::*;

// self
use crate::{
	_prelude::*,
	auth::{ScopeSet, TokenSecret},
	cache::ScopedTokenCache,
	config::{OidcRegistration, RefreshConfiguration, RefreshConfigurationResolver, RefreshOptions},
	http::{TokenHttpClient, TransportErrorMapper},
	oauth::{RefreshResult, RefreshedTokens, TokenRefreshClient},
};
#[cfg(feature = "reqwest")]
use crate::http::{ReqwestHttpClient, ReqwestTransportErrorMapper};

#[cfg(feature = "reqwest")]
/// Broker specialized for the crate's default reqwest transport stack.
pub type ReqwestRefreshBroker = RefreshBroker<ReqwestHttpClient, ReqwestTransportErrorMapper>;

/// Owns the refresh machinery shared by every request in the process.
///
/// The broker holds the refresh client, the configuration resolver, the scoped token cache, and
/// the single-flight coordinator. It is the only component that calls
/// [`TokenRefreshClient::refresh`], and it only does so while holding a coordinator permit.
pub struct RefreshBroker<C, M>
where
	C: ?Sized + TokenHttpClient,
	M: ?Sized + TransportErrorMapper<C::TransportError>,
{
	/// Refresh grant client.
	pub refresh_client: TokenRefreshClient<C, M>,
	/// Per-attempt configuration resolver.
	pub resolver: RefreshConfigurationResolver,
	/// Scoped access token cache.
	pub cache: Arc<ScopedTokenCache>,
	/// Options the broker was built with.
	pub options: RefreshOptions,
	/// Shared counters for refresh outcomes.
	pub refresh_metrics: Arc<RefreshMetrics>,
	coordinator: Arc<SingleFlight>,
}
impl<C, M> RefreshBroker<C, M>
where
	C: ?Sized + TokenHttpClient,
	M: ?Sized + TransportErrorMapper<C::TransportError>,
{
	/// Creates a broker that reuses the caller-provided transport + mapper pair.
	pub fn with_http_client(
		options: RefreshOptions,
		registration: OidcRegistration,
		http_client: impl Into<Arc<C>>,
		mapper: impl Into<Arc<M>>,
	) -> Self {
		Self {
			refresh_client: TokenRefreshClient::new(http_client, mapper),
			resolver: RefreshConfigurationResolver::new(&options, registration),
			cache: Arc::new(ScopedTokenCache::with_skew(options.cache_skew)),
			coordinator: Arc::new(SingleFlight::new(options.coordinator)),
			refresh_metrics: Default::default(),
			options,
		}
	}

	/// Replaces the token cache, e.g. to share one cache between brokers.
	pub fn with_cache(mut self, cache: Arc<ScopedTokenCache>) -> Self {
		self.cache = cache;

		self
	}

	/// Coordinator guarding network refreshes.
	pub fn coordinator(&self) -> &SingleFlight {
		&self.coordinator
	}

	/// Sends one refresh grant and records its outcome. Callers must hold a coordinator permit.
	async fn grant(
		&self,
		refresh_token: &TokenSecret,
		scopes: Option<&ScopeSet>,
		config: &RefreshConfiguration,
	) -> Option<RefreshedTokens> {
		self.refresh_metrics.record_attempt();

		match self.refresh_client.refresh(refresh_token, scopes, config).await {
			RefreshResult::Refreshed(tokens) => {
				self.refresh_metrics.record_refresh();

				Some(tokens)
			},
			RefreshResult::Failed(_) => {
				self.refresh_metrics.record_failure();

				None
			},
		}
	}
}
#[cfg(feature = "reqwest")]
impl RefreshBroker<ReqwestHttpClient, ReqwestTransportErrorMapper> {
	/// Creates a broker with its own reqwest-backed transport.
	pub fn new(options: RefreshOptions, registration: OidcRegistration) -> Self {
		Self::with_http_client(
			options,
			registration,
			ReqwestHttpClient::default(),
			ReqwestTransportErrorMapper,
		)
	}
}
impl<C, M> Clone for RefreshBroker<C, M>
where
	C: ?Sized + TokenHttpClient,
	M: ?Sized + TransportErrorMapper<C::TransportError>,
{
	fn clone(&self) -> Self {
		Self {
			refresh_client: self.refresh_client.clone(),
			resolver: self.resolver.clone(),
			cache: self.cache.clone(),
			options: self.options.clone(),
			refresh_metrics: self.refresh_metrics.clone(),
			coordinator: self.coordinator.clone(),
		}
	}
}
impl<C, M> Debug for RefreshBroker<C, M>
where
	C: ?Sized + TokenHttpClient,
	M: ?Sized + TransportErrorMapper<C::TransportError>,
{
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		f.debug_struct("RefreshBroker")
			.field("options", &self.options)
			.field("resolver", &self.resolver)
			.field("coordinator", &self.coordinator.mode())
			.finish()
	}
}
