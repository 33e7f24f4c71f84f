//! OIDC discovery metadata retrieval and caching.
//!
//! [`HttpMetadataManager`] fetches `/.well-known/openid-configuration`, keeps the document for a
//! refresh interval, collapses concurrent refetches behind one async lock, and keeps serving the
//! last good document when a refetch fails.

// crates.io
use oauth2::http::{Method, Request, header::ACCEPT};
// self
use crate::{
	_prelude::*,
	error::{ConfigError, ResponseError, TransientError},
	http::{self, TokenHttpClient, TransportErrorMapper},
	obs::{self, FlowKind, FlowOutcome, FlowSpan},
};
#[cfg(feature = "reqwest")]
use crate::http::{ReqwestHttpClient, ReqwestTransportErrorMapper};

/// Boxed future returned by [`MetadataManager::document`].
pub type MetadataFuture<'a, T> = Pin<Box<dyn Future<Output = Result<T>> + 'a + Send>>;

/// Path appended to an authority to locate its discovery document.
pub const WELL_KNOWN_PATH: &str = ".well-known/openid-configuration";

/// Subset of the OIDC discovery document used by the refresh machinery.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DiscoveryDocument {
	/// Issuer identifier.
	#[serde(default)]
	pub issuer: Option<String>,
	/// Authorization endpoint.
	#[serde(default)]
	pub authorization_endpoint: Option<Url>,
	/// Token endpoint used for the refresh grant.
	#[serde(default)]
	pub token_endpoint: Option<Url>,
	/// RP-initiated logout endpoint.
	#[serde(default)]
	pub end_session_endpoint: Option<Url>,
	/// JWKS location.
	#[serde(default)]
	pub jwks_uri: Option<Url>,
}

/// Source of live discovery metadata.
pub trait MetadataManager
where
	Self: Send + Sync,
{
	/// Returns the current discovery document, fetching it if needed.
	fn document(&self) -> MetadataFuture<'_, DiscoveryDocument>;

	/// Forces the next [`document`](Self::document) call to refetch.
	fn request_refresh(&self) {}
}

/// Serves a fixed discovery document.
#[derive(Clone, Debug, Default)]
pub struct StaticMetadata(pub DiscoveryDocument);
impl StaticMetadata {
	/// Builds a document that only advertises a token endpoint.
	pub fn with_token_endpoint(token_endpoint: Url) -> Self {
		Self(DiscoveryDocument { token_endpoint: Some(token_endpoint), ..Default::default() })
	}
}
impl MetadataManager for StaticMetadata {
	fn document(&self) -> MetadataFuture<'_, DiscoveryDocument> {
		let document = self.0.clone();

		Box::pin(async move { Ok(document) })
	}
}

#[derive(Debug)]
struct CachedDocument {
	document: DiscoveryDocument,
	fetched_at: OffsetDateTime,
	// Set by `request_refresh`; the document stays as the fallback for a failed refetch.
	stale: bool,
}

/// Fetches and caches the discovery document over HTTP.
pub struct HttpMetadataManager<C, M>
where
	C: ?Sized + TokenHttpClient,
	M: ?Sized + TransportErrorMapper<C::TransportError>,
{
	http_client: Arc<C>,
	transport_mapper: Arc<M>,
	address: Url,
	refresh_interval: Duration,
	current: RwLock<Option<CachedDocument>>,
	fetch_guard: AsyncMutex<()>,
}
impl<C, M> HttpMetadataManager<C, M>
where
	C: ?Sized + TokenHttpClient,
	M: ?Sized + TransportErrorMapper<C::TransportError>,
{
	/// Default lifetime of a fetched document.
	pub const DEFAULT_REFRESH_INTERVAL: Duration = Duration::hours(12);

	/// Creates a manager that reads the document at `address`.
	pub fn with_http_client(
		address: Url,
		http_client: impl Into<Arc<C>>,
		mapper: impl Into<Arc<M>>,
	) -> Self {
		Self {
			http_client: http_client.into(),
			transport_mapper: mapper.into(),
			address,
			refresh_interval: Self::DEFAULT_REFRESH_INTERVAL,
			current: RwLock::new(None),
			fetch_guard: AsyncMutex::new(()),
		}
	}

	/// Overrides how long a fetched document is trusted.
	pub fn with_refresh_interval(mut self, interval: Duration) -> Self {
		self.refresh_interval = if interval.is_negative() { Duration::ZERO } else { interval };

		self
	}

	/// Address the document is fetched from.
	pub fn address(&self) -> &Url {
		&self.address
	}

	async fn load(&self) -> Result<DiscoveryDocument> {
		const KIND: FlowKind = FlowKind::Discovery;

		if let Some(document) = self.fresh(OffsetDateTime::now_utc()) {
			return Ok(document);
		}

		let _fetching = self.fetch_guard.lock().await;

		if let Some(document) = self.fresh(OffsetDateTime::now_utc()) {
			return Ok(document);
		}

		let span = FlowSpan::new(KIND, "fetch_document");

		obs::record_flow_outcome(KIND, FlowOutcome::Attempt);

		let fetched = span.instrument(self.fetch()).await;

		match &fetched {
			Ok(_) => obs::record_flow_outcome(KIND, FlowOutcome::Success),
			Err(_) => obs::record_flow_outcome(KIND, FlowOutcome::Failure),
		}

		match fetched {
			Ok(document) => {
				*self.current.write() = Some(CachedDocument {
					document: document.clone(),
					fetched_at: OffsetDateTime::now_utc(),
					stale: false,
				});

				Ok(document)
			},
			Err(err) => {
				let stale = self.current.read().as_ref().map(|cached| cached.document.clone());

				match stale {
					Some(document) => {
						tracing::warn!(
							address = %self.address,
							error = %err,
							"Discovery refetch failed; serving the last good document."
						);

						Ok(document)
					},
					None => Err(err),
				}
			},
		}
	}

	fn fresh(&self, now: OffsetDateTime) -> Option<DiscoveryDocument> {
		self.current
			.read()
			.as_ref()
			.filter(|cached| !cached.stale && now - cached.fetched_at < self.refresh_interval)
			.map(|cached| cached.document.clone())
	}

	async fn fetch(&self) -> Result<DiscoveryDocument> {
		let request = Request::builder()
			.method(Method::GET)
			.uri(self.address.as_str())
			.header(ACCEPT, "application/json")
			.body(Vec::new())
			.map_err(ConfigError::from)?;
		let response =
			http::send(self.http_client.as_ref(), self.transport_mapper.as_ref(), request).await?;
		let status = response.status().as_u16();

		if !response.status().is_success() {
			return Err(TransientError::Discovery { address: self.address.to_string(), status }.into());
		}

		let mut de = serde_json::Deserializer::from_slice(response.body());
		let document = serde_path_to_error::deserialize(&mut de)
			.map_err(|source| ResponseError::Parse { source, status: Some(status) })?;

		tracing::debug!(address = %self.address, "Fetched OIDC discovery document.");

		Ok(document)
	}
}
#[cfg(feature = "reqwest")]
impl HttpMetadataManager<ReqwestHttpClient, ReqwestTransportErrorMapper> {
	/// Creates a reqwest-backed manager for `authority`'s well-known document.
	pub fn for_authority(authority: &Url) -> Result<Self> {
		Ok(Self::with_http_client(
			metadata_address(authority)?,
			ReqwestHttpClient::default(),
			ReqwestTransportErrorMapper,
		))
	}
}
impl<C, M> MetadataManager for HttpMetadataManager<C, M>
where
	C: ?Sized + TokenHttpClient,
	M: ?Sized + TransportErrorMapper<C::TransportError>,
{
	fn document(&self) -> MetadataFuture<'_, DiscoveryDocument> {
		Box::pin(self.load())
	}

	fn request_refresh(&self) {
		if let Some(cached) = self.current.write().as_mut() {
			cached.stale = true;
		}
	}
}
impl<C, M> Debug for HttpMetadataManager<C, M>
where
	C: ?Sized + TokenHttpClient,
	M: ?Sized + TransportErrorMapper<C::TransportError>,
{
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		f.debug_struct("HttpMetadataManager")
			.field("address", &self.address)
			.field("refresh_interval", &self.refresh_interval)
			.finish()
	}
}

/// Derives the well-known discovery address for an authority.
pub fn metadata_address(authority: &Url) -> Result<Url> {
	let raw = format!("{}/{WELL_KNOWN_PATH}", authority.as_str().trim_end_matches('/'));

	Url::parse(&raw).map_err(|source| ConfigError::InvalidUrl { value: raw, source }.into())
}

#[cfg(test)]
mod tests {
	// self
	use super::*;

	#[test]
	fn metadata_address_keeps_authority_path() {
		let with_path = Url::parse("https://idp.example.com/realms/studio")
			.expect("Authority fixture should parse.");
		let trailing =
			Url::parse("https://idp.example.com/").expect("Authority fixture should parse.");

		assert_eq!(
			metadata_address(&with_path).expect("Address should derive.").as_str(),
			"https://idp.example.com/realms/studio/.well-known/openid-configuration"
		);
		assert_eq!(
			metadata_address(&trailing).expect("Address should derive.").as_str(),
			"https://idp.example.com/.well-known/openid-configuration"
		);
	}

	#[test]
	fn document_ignores_unknown_fields() {
		let document: DiscoveryDocument = serde_json::from_str(
			r#"{"issuer":"https://idp.example.com","token_endpoint":"https://idp.example.com/token","scopes_supported":["openid"]}"#,
		)
		.expect("Discovery document should parse.");

		assert_eq!(
			document.token_endpoint.as_ref().map(Url::as_str),
			Some("https://idp.example.com/token")
		);
		assert_eq!(document.jwks_uri, None);
	}

	#[tokio::test]
	async fn static_metadata_serves_its_document() {
		let endpoint =
			Url::parse("https://idp.example.com/token").expect("Endpoint fixture should parse.");
		let manager = StaticMetadata::with_token_endpoint(endpoint.clone());
		let document = manager.document().await.expect("Static metadata never fails.");

		assert_eq!(document.token_endpoint, Some(endpoint));
	}
}
