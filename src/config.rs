//! Refresh options and per-attempt configuration resolution.
//!
//! [`RefreshOptions`] is the host-facing configuration surface. [`RefreshConfigurationResolver`]
//! merges its overrides onto the values registered with the host's OIDC handler
//! ([`OidcRegistration`]) and, when no token endpoint override exists, asks the discovery
//! [`MetadataManager`] for one. Resolution runs on every refresh attempt so rotating discovery
//! metadata is always honored.

// self
use crate::{
	_prelude::*,
	auth::TokenSecret,
	discovery::MetadataManager,
	error::ConfigError,
};

/// How the passive principal hook treats a due refresh that fails.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum RefreshStrategy {
	/// Keep trusting the principal until the access token has actually expired.
	BestEffort,
	/// Reject the principal as soon as a due refresh fails.
	#[default]
	Persisted,
}

/// Partitioning of the single-flight coordinator.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum CoordinatorMode {
	/// One process-wide permit serializes every refresh.
	#[default]
	Global,
	/// One permit per `(user, scope)` pair, created on demand and evicted when idle.
	Keyed,
}

/// Options recognized by the refresh flows.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RefreshOptions {
	/// Master switch for session refresh.
	pub enable_refresh_tokens: bool,
	/// Safety margin before `expires_at` at which a session refresh becomes due.
	#[serde(with = "duration_secs")]
	pub refresh_skew: Duration,
	/// Safety margin applied by the scoped token cache.
	#[serde(with = "duration_secs")]
	pub cache_skew: Duration,
	/// Failure handling of the passive principal hook.
	pub strategy: RefreshStrategy,
	/// Coordinator partitioning.
	pub coordinator: CoordinatorMode,
	/// Client identifier override; surrounding whitespace is trimmed at resolution.
	pub client_id: Option<String>,
	/// Client secret override.
	pub client_secret: Option<TokenSecret>,
	/// Token endpoint override; skips discovery when set.
	pub token_endpoint: Option<Url>,
	/// Path served by [`RefreshEndpoint`](crate::endpoint::RefreshEndpoint).
	pub refresh_path: String,
}
impl RefreshOptions {
	/// Default session refresh skew.
	pub const DEFAULT_REFRESH_SKEW: Duration = Duration::minutes(5);
	/// Default inbound refresh path.
	pub const DEFAULT_REFRESH_PATH: &'static str = "/authentication/refresh";

	/// Toggles session refresh.
	pub fn with_refresh_enabled(mut self, enabled: bool) -> Self {
		self.enable_refresh_tokens = enabled;

		self
	}

	/// Overrides the session refresh skew; negative values clamp to zero.
	pub fn with_refresh_skew(mut self, skew: Duration) -> Self {
		self.refresh_skew = clamp(skew);

		self
	}

	/// Overrides the cache skew; negative values clamp to zero.
	pub fn with_cache_skew(mut self, skew: Duration) -> Self {
		self.cache_skew = clamp(skew);

		self
	}

	/// Selects the failure strategy.
	pub fn with_strategy(mut self, strategy: RefreshStrategy) -> Self {
		self.strategy = strategy;

		self
	}

	/// Selects the coordinator partitioning.
	pub fn with_coordinator(mut self, mode: CoordinatorMode) -> Self {
		self.coordinator = mode;

		self
	}

	/// Overrides the client identifier.
	///
	/// Surrounding whitespace is trimmed before the value is sent, and a blank value falls back
	/// to the registered client identifier.
	pub fn with_client_id(mut self, client_id: impl Into<String>) -> Self {
		self.client_id = Some(client_id.into());

		self
	}

	/// Overrides the client secret.
	pub fn with_client_secret(mut self, secret: impl Into<String>) -> Self {
		self.client_secret = Some(TokenSecret::new(secret));

		self
	}

	/// Overrides the token endpoint.
	pub fn with_token_endpoint(mut self, endpoint: Url) -> Self {
		self.token_endpoint = Some(endpoint);

		self
	}

	/// Overrides the inbound refresh path.
	pub fn with_refresh_path(mut self, path: impl Into<String>) -> Self {
		self.refresh_path = path.into();

		self
	}
}
impl Default for RefreshOptions {
	fn default() -> Self {
		Self {
			enable_refresh_tokens: true,
			refresh_skew: Self::DEFAULT_REFRESH_SKEW,
			cache_skew: crate::cache::ScopedTokenCache::DEFAULT_SKEW,
			strategy: RefreshStrategy::default(),
			coordinator: CoordinatorMode::default(),
			client_id: None,
			client_secret: None,
			token_endpoint: None,
			refresh_path: Self::DEFAULT_REFRESH_PATH.into(),
		}
	}
}

/// Effective endpoint and client credentials for one refresh attempt.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RefreshConfiguration {
	/// Token endpoint receiving the refresh grant.
	pub token_endpoint: Url,
	/// OAuth 2.0 client identifier.
	pub client_id: String,
	/// Client secret; omitted from the grant when absent or blank.
	pub client_secret: Option<TokenSecret>,
}

/// Values registered with the host's OIDC handler.
#[derive(Clone, Default)]
pub struct OidcRegistration {
	/// Registered client identifier.
	pub client_id: Option<String>,
	/// Registered client secret.
	pub client_secret: Option<TokenSecret>,
	/// Discovery metadata source.
	pub metadata: Option<Arc<dyn MetadataManager>>,
}
impl OidcRegistration {
	/// Creates a registration for `client_id`, trimmed of surrounding whitespace at resolution.
	pub fn new(client_id: impl Into<String>) -> Self {
		Self { client_id: Some(client_id.into()), ..Default::default() }
	}

	/// Attaches a client secret.
	pub fn with_client_secret(mut self, secret: impl Into<String>) -> Self {
		self.client_secret = Some(TokenSecret::new(secret));

		self
	}

	/// Attaches the discovery metadata manager.
	pub fn with_metadata(mut self, metadata: Arc<dyn MetadataManager>) -> Self {
		self.metadata = Some(metadata);

		self
	}
}
impl Debug for OidcRegistration {
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		f.debug_struct("OidcRegistration")
			.field("client_id", &self.client_id)
			.field("client_secret_set", &self.client_secret.is_some())
			.field("metadata_set", &self.metadata.is_some())
			.finish()
	}
}

/// Merges [`RefreshOptions`] overrides onto an [`OidcRegistration`].
#[derive(Clone, Debug)]
pub struct RefreshConfigurationResolver {
	client_id: Option<String>,
	client_secret: Option<TokenSecret>,
	token_endpoint: Option<Url>,
	registration: OidcRegistration,
}
impl RefreshConfigurationResolver {
	/// Captures the overrides from `options` and the host `registration`.
	pub fn new(options: &RefreshOptions, registration: OidcRegistration) -> Self {
		Self {
			client_id: options.client_id.clone(),
			client_secret: options.client_secret.clone(),
			token_endpoint: options.token_endpoint.clone(),
			registration,
		}
	}

	/// Resolves the configuration, or `None` (logged) when it cannot be determined.
	pub async fn resolve(&self) -> Option<RefreshConfiguration> {
		match self.try_resolve().await {
			Ok(config) => Some(config),
			Err(err) => {
				tracing::warn!(error = %err, "Refresh configuration could not be resolved.");

				None
			},
		}
	}

	/// Resolves the configuration, reporting why it failed.
	pub async fn try_resolve(&self) -> Result<RefreshConfiguration> {
		let client_id = non_blank(self.client_id.as_deref())
			.or_else(|| non_blank(self.registration.client_id.as_deref()))
			.ok_or(ConfigError::MissingClientId)?
			.to_owned();
		let client_secret = non_blank_secret(self.client_secret.as_ref())
			.or_else(|| non_blank_secret(self.registration.client_secret.as_ref()));
		let token_endpoint = match &self.token_endpoint {
			Some(endpoint) => endpoint.clone(),
			None => {
				let metadata =
					self.registration.metadata.as_ref().ok_or(ConfigError::MissingMetadataManager)?;

				metadata.document().await?.token_endpoint.ok_or(ConfigError::MissingTokenEndpoint)?
			},
		};

		Ok(RefreshConfiguration { token_endpoint, client_id, client_secret })
	}
}

fn non_blank(value: Option<&str>) -> Option<&str> {
	value.map(str::trim).filter(|v| !v.is_empty())
}

fn non_blank_secret(value: Option<&TokenSecret>) -> Option<TokenSecret> {
	value.and_then(|secret| TokenSecret::non_blank(secret.expose()))
}

fn clamp(skew: Duration) -> Duration {
	if skew.is_negative() { Duration::ZERO } else { skew }
}

mod duration_secs {
	// crates.io
	use serde::{Deserializer, Serializer};
	// self
	use crate::_prelude::*;

	pub fn serialize<S>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error>
	where
		S: Serializer,
	{
		serializer.serialize_i64(value.whole_seconds())
	}

	pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
	where
		D: Deserializer<'de>,
	{
		let secs = i64::deserialize(deserializer)?;

		if secs < 0 {
			return Err(serde::de::Error::custom("skew must not be negative"));
		}

		Ok(Duration::seconds(secs))
	}
}
