//! Crate-level error types shared by the refresh client, resolver, and session flows.
//!
//! These errors never escape the public entry points of the flows: the accessor, the session
//! refresher, and the principal interceptor fold them into absent/`false`/reject outcomes after
//! logging. They are public so custom transports, mappers, and session stores can produce them.

// self
use crate::_prelude::*;

/// Crate-wide result type alias returning [`Error`] by default.
pub type Result<T, E = Error> = std::result::Result<T, E>;

type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// Canonical error produced by internal refresh steps.
#[derive(Debug, ThisError)]
pub enum Error {
	/// Persisted session failure.
	#[error("{0}")]
	Session(
		#[from]
		#[source]
		crate::session::SessionError,
	),
	/// Local configuration problem.
	#[error(transparent)]
	Config(#[from] ConfigError),
	/// Temporary upstream failure; a later attempt may succeed.
	#[error(transparent)]
	Transient(#[from] TransientError),
	/// Transport failure (DNS, TCP, TLS).
	#[error(transparent)]
	Transport(#[from] TransportError),
	/// Upstream answered with a payload that does not satisfy the protocol.
	#[error(transparent)]
	Response(#[from] ResponseError),

	/// Token endpoint answered the refresh grant with a non-success status.
	#[error("Token endpoint rejected the refresh grant with status {status}.")]
	Rejected {
		/// HTTP status code returned by the token endpoint.
		status: u16,
		/// OAuth `error` code, when the body carried one.
		error: Option<String>,
	},
}
impl Error {
	/// Upstream `Retry-After` hint carried by a transient endpoint failure.
	pub fn retry_after(&self) -> Option<Duration> {
		match self {
			Self::Transient(TransientError::Endpoint { retry_after, .. }) => *retry_after,
			_ => None,
		}
	}
}

/// Configuration and request-construction failures.
#[derive(Debug, ThisError)]
pub enum ConfigError {
	/// HTTP client could not be constructed.
	#[error("HTTP client could not be constructed.")]
	HttpClientBuild {
		/// Underlying transport builder failure.
		#[source]
		source: BoxError,
	},
	/// HTTP request construction failed.
	#[error(transparent)]
	HttpRequest(#[from] oauth2::http::Error),
	/// A configured or discovered URL cannot be parsed.
	#[error("Configured URL is invalid: {value}.")]
	InvalidUrl {
		/// Raw value that failed to parse.
		value: String,
		/// Underlying parsing failure.
		#[source]
		source: url::ParseError,
	},
	/// No client identifier is configured or registered.
	#[error("No client identifier is configured for the refresh grant.")]
	MissingClientId,
	/// Neither an override nor discovery produced a token endpoint.
	#[error("No token endpoint is configured or discoverable.")]
	MissingTokenEndpoint,
	/// Discovery was required but no metadata manager is registered.
	#[error("No OIDC metadata manager is registered for discovery.")]
	MissingMetadataManager,
}
impl ConfigError {
	/// Wraps a transport's builder failure inside [`ConfigError`].
	pub fn http_client_build(src: impl 'static + Send + Sync + std::error::Error) -> Self {
		Self::HttpClientBuild { source: Box::new(src) }
	}
}
#[cfg(feature = "reqwest")]
impl From<ReqwestError> for ConfigError {
	fn from(e: ReqwestError) -> Self {
		Self::http_client_build(e)
	}
}

/// Temporary failure variants (safe to retry later).
#[derive(Debug, ThisError)]
pub enum TransientError {
	/// Upstream endpoint failed in a way that is expected to clear up.
	#[error("Upstream endpoint returned an unexpected response: {message}.")]
	Endpoint {
		/// Summary of the failure.
		message: String,
		/// HTTP status code, when available.
		status: Option<u16>,
		/// Retry-After hint from upstream, if supplied.
		retry_after: Option<Duration>,
	},
	/// Discovery document could not be retrieved.
	#[error("OIDC discovery document could not be retrieved from {address} (status {status}).")]
	Discovery {
		/// Metadata address that was queried.
		address: String,
		/// HTTP status code returned by the metadata endpoint.
		status: u16,
	},
}

/// Protocol violations in upstream payloads.
#[derive(Debug, ThisError)]
pub enum ResponseError {
	/// Response body is not the JSON shape we expect.
	#[error("Upstream endpoint returned malformed JSON.")]
	Parse {
		/// Structured parsing failure.
		#[source]
		source: serde_path_to_error::Error<serde_json::Error>,
		/// HTTP status code, when available.
		status: Option<u16>,
	},
	/// Token response omitted `access_token` or returned a blank value.
	#[error("Token endpoint response is missing access_token.")]
	MissingAccessToken,
	/// Token response omitted `expires_in`.
	#[error("Token endpoint response is missing expires_in.")]
	MissingExpiresIn,
	/// Token response carried a zero or negative `expires_in`.
	#[error("The expires_in value must be positive.")]
	NonPositiveExpiresIn,
	/// Token response carried an `expires_in` outside the representable range.
	#[error("The expires_in value exceeds the supported range.")]
	ExpiresInOutOfRange,
}

/// Transport-level failures (network, IO).
#[derive(Debug, ThisError)]
pub enum TransportError {
	/// Underlying HTTP client reported a network failure.
	#[error("Network error occurred while calling the identity provider.")]
	Network {
		/// Transport-specific network error.
		#[source]
		source: BoxError,
	},
	/// Underlying IO failure surfaced during transport.
	#[error("I/O error occurred while calling the identity provider.")]
	Io(#[from] std::io::Error),
}
impl TransportError {
	/// Wraps a transport-specific network error.
	pub fn network(src: impl 'static + Send + Sync + std::error::Error) -> Self {
		Self::Network { source: Box::new(src) }
	}
}
#[cfg(feature = "reqwest")]
impl From<ReqwestError> for TransportError {
	fn from(e: ReqwestError) -> Self {
		Self::network(e)
	}
}
