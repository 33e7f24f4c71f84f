//! OAuth 2.0 `refresh_token` grant client.
//!
//! [`TokenRefreshClient`] is a pure I/O boundary: it posts one form-encoded refresh grant to the
//! token endpoint and turns whatever comes back into a [`RefreshResult`]. It performs no caching
//! and no locking; the flows in [`crate::flows`] only call it while holding a single-flight
//! permit.

pub use oauth2;

// crates.io
use oauth2::{
	HttpRequest, HttpResponse,
	http::{
		Method, Request,
		header::{ACCEPT, CONTENT_TYPE},
	},
};
use url::form_urlencoded::Serializer as FormSerializer;
// self
use crate::{
	_prelude::*,
	auth::{ScopeSet, TokenSecret},
	config::RefreshConfiguration,
	error::{ConfigError, ResponseError},
	http::{self, TokenHttpClient, TransportErrorMapper},
};
#[cfg(feature = "reqwest")]
use crate::http::{ReqwestHttpClient, ReqwestTransportErrorMapper};

const BODY_PREVIEW_LIMIT: usize = 256;

/// Tokens issued by a successful refresh grant.
#[derive(Clone, PartialEq, Eq)]
pub struct RefreshedTokens {
	/// Newly issued access token.
	pub access_token: TokenSecret,
	/// Rotated refresh token; `None` means the previous one stays valid.
	pub refresh_token: Option<TokenSecret>,
	/// Access token expiry computed as `now + expires_in`.
	pub expires_at: OffsetDateTime,
}
impl Debug for RefreshedTokens {
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		f.debug_struct("RefreshedTokens")
			.field("access_token", &"<redacted>")
			.field("refresh_token", &self.refresh_token.as_ref().map(|_| "<redacted>"))
			.field("expires_at", &self.expires_at)
			.finish()
	}
}

/// Why a refresh attempt produced no tokens.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum RefreshFailure {
	/// Token endpoint answered with a non-success status.
	Rejected {
		/// HTTP status code.
		status: u16,
		/// OAuth `error` code, when the body carried one.
		error: Option<String>,
	},
	/// Request never produced a response (network, TLS, timeout).
	Transport,
	/// Response was missing required fields or was not JSON.
	MalformedResponse,
	/// Request could not be built from the resolved configuration.
	InvalidRequest,
}

/// Outcome of one refresh attempt; failures carry no token fields.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum RefreshResult {
	/// Provider issued new tokens.
	Refreshed(RefreshedTokens),
	/// Attempt failed; details were logged.
	Failed(RefreshFailure),
}
impl RefreshResult {
	/// Returns true for [`RefreshResult::Refreshed`].
	pub fn is_success(&self) -> bool {
		matches!(self, Self::Refreshed(_))
	}

	/// Returns the issued tokens, if any.
	pub fn tokens(&self) -> Option<&RefreshedTokens> {
		match self {
			Self::Refreshed(tokens) => Some(tokens),
			Self::Failed(_) => None,
		}
	}

	/// Consumes the result, returning the issued tokens, if any.
	pub fn into_tokens(self) -> Option<RefreshedTokens> {
		match self {
			Self::Refreshed(tokens) => Some(tokens),
			Self::Failed(_) => None,
		}
	}
}

#[derive(Deserialize)]
struct TokenEndpointResponse {
	#[serde(default)]
	access_token: Option<String>,
	#[serde(default)]
	refresh_token: Option<String>,
	#[serde(default)]
	expires_in: Option<i64>,
}

#[derive(Deserialize)]
struct TokenEndpointError {
	error: String,
}

/// Executes refresh grants against a token endpoint.
pub struct TokenRefreshClient<C, M>
where
	C: ?Sized + TokenHttpClient,
	M: ?Sized + TransportErrorMapper<C::TransportError>,
{
	/// HTTP client used for every grant.
	pub http_client: Arc<C>,
	/// Mapper applied to transport-layer errors.
	pub transport_mapper: Arc<M>,
}
impl<C, M> TokenRefreshClient<C, M>
where
	C: ?Sized + TokenHttpClient,
	M: ?Sized + TransportErrorMapper<C::TransportError>,
{
	/// Creates a client over the provided transport + mapper pair.
	pub fn new(http_client: impl Into<Arc<C>>, mapper: impl Into<Arc<M>>) -> Self {
		Self { http_client: http_client.into(), transport_mapper: mapper.into() }
	}

	/// Exchanges `refresh_token` for new tokens.
	///
	/// `scopes` narrows the grant when present and non-empty. Every failure is logged and folded
	/// into [`RefreshResult::Failed`].
	pub async fn refresh(
		&self,
		refresh_token: &TokenSecret,
		scopes: Option<&ScopeSet>,
		config: &RefreshConfiguration,
	) -> RefreshResult {
		match self.try_refresh(refresh_token, scopes, config).await {
			Ok(tokens) => RefreshResult::Refreshed(tokens),
			Err(err) => {
				let failure = classify_failure(&err);

				tracing::warn!(
					token_endpoint = %config.token_endpoint,
					client_id = %config.client_id,
					error = %err,
					retry_after = ?err.retry_after(),
					"Refresh grant failed."
				);

				RefreshResult::Failed(failure)
			},
		}
	}

	async fn try_refresh(
		&self,
		refresh_token: &TokenSecret,
		scopes: Option<&ScopeSet>,
		config: &RefreshConfiguration,
	) -> Result<RefreshedTokens> {
		let request = build_refresh_request(refresh_token, scopes, config)?;
		let response =
			http::send(self.http_client.as_ref(), self.transport_mapper.as_ref(), request).await?;

		if !response.status().is_success() {
			return Err(rejected(&response));
		}

		parse_refresh_response(&response, OffsetDateTime::now_utc())
	}
}
#[cfg(feature = "reqwest")]
impl Default for TokenRefreshClient<ReqwestHttpClient, ReqwestTransportErrorMapper> {
	fn default() -> Self {
		Self::new(ReqwestHttpClient::default(), ReqwestTransportErrorMapper)
	}
}
impl<C, M> Clone for TokenRefreshClient<C, M>
where
	C: ?Sized + TokenHttpClient,
	M: ?Sized + TransportErrorMapper<C::TransportError>,
{
	fn clone(&self) -> Self {
		Self { http_client: self.http_client.clone(), transport_mapper: self.transport_mapper.clone() }
	}
}
impl<C, M> Debug for TokenRefreshClient<C, M>
where
	C: ?Sized + TokenHttpClient,
	M: ?Sized + TransportErrorMapper<C::TransportError>,
{
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		f.write_str("TokenRefreshClient(..)")
	}
}

/// Builds the form-encoded refresh grant request.
///
/// `client_secret` and `scope` are omitted entirely when blank.
pub fn build_refresh_request(
	refresh_token: &TokenSecret,
	scopes: Option<&ScopeSet>,
	config: &RefreshConfiguration,
) -> Result<HttpRequest> {
	let mut form = FormSerializer::new(String::new());

	form.append_pair("grant_type", "refresh_token");
	form.append_pair("client_id", &config.client_id);
	form.append_pair("refresh_token", refresh_token.expose());

	if let Some(scope) = scopes.filter(|s| !s.is_empty()) {
		form.append_pair("scope", &scope.normalized());
	}
	if let Some(secret) = config.client_secret.as_ref().filter(|s| !s.expose().trim().is_empty()) {
		form.append_pair("client_secret", secret.expose());
	}

	let request = Request::builder()
		.method(Method::POST)
		.uri(config.token_endpoint.as_str())
		.header(CONTENT_TYPE, "application/x-www-form-urlencoded")
		.header(ACCEPT, "application/json")
		.body(form.finish().into_bytes())
		.map_err(ConfigError::from)?;

	Ok(request)
}

/// Parses a successful token endpoint response issued at `now`.
pub fn parse_refresh_response(
	response: &HttpResponse,
	now: OffsetDateTime,
) -> Result<RefreshedTokens> {
	let status = Some(response.status().as_u16());
	let mut de = serde_json::Deserializer::from_slice(response.body());
	let body: TokenEndpointResponse = serde_path_to_error::deserialize(&mut de)
		.map_err(|source| ResponseError::Parse { source, status })?;
	let access_token = body
		.access_token
		.and_then(TokenSecret::non_blank)
		.ok_or(ResponseError::MissingAccessToken)?;
	let expires_in = body.expires_in.ok_or(ResponseError::MissingExpiresIn)?;

	if expires_in <= 0 {
		return Err(ResponseError::NonPositiveExpiresIn.into());
	}

	let expires_at = now
		.checked_add(Duration::seconds(expires_in))
		.ok_or(ResponseError::ExpiresInOutOfRange)?;

	Ok(RefreshedTokens {
		access_token,
		refresh_token: body.refresh_token.and_then(TokenSecret::non_blank),
		expires_at,
	})
}

fn rejected(response: &HttpResponse) -> Error {
	let status = response.status().as_u16();
	let body = String::from_utf8_lossy(response.body());
	let error = serde_json::from_slice::<TokenEndpointError>(response.body()).ok().map(|e| e.error);

	let retry_after = http::parse_retry_after(response.headers());

	tracing::warn!(
		status,
		?retry_after,
		body = %truncate_preview(&body),
		"Token endpoint rejected the refresh grant."
	);

	Error::Rejected { status, error }
}

fn classify_failure(err: &Error) -> RefreshFailure {
	match err {
		Error::Rejected { status, error } =>
			RefreshFailure::Rejected { status: *status, error: error.clone() },
		Error::Response(_) => RefreshFailure::MalformedResponse,
		Error::Config(_) => RefreshFailure::InvalidRequest,
		Error::Transport(_) | Error::Transient(_) | Error::Session(_) => RefreshFailure::Transport,
	}
}

fn truncate_preview(body: &str) -> String {
	if body.chars().count() <= BODY_PREVIEW_LIMIT {
		return body.to_owned();
	}

	let mut buf = body.chars().take(BODY_PREVIEW_LIMIT).collect::<String>();

	buf.push('…');

	buf
}

#[cfg(test)]
mod tests {
	// crates.io
	use oauth2::http::StatusCode;
	use time::macros;
	// self
	use super::*;

	fn config(secret: Option<&str>) -> RefreshConfiguration {
		RefreshConfiguration {
			token_endpoint: Url::parse("https://idp.example.com/oauth2/token")
				.expect("Token endpoint fixture should parse."),
			client_id: "studio".into(),
			client_secret: secret.map(TokenSecret::new),
		}
	}

	fn form(request: &HttpRequest) -> Vec<(String, String)> {
		url::form_urlencoded::parse(request.body()).into_owned().collect()
	}

	fn response(status: u16, body: &str) -> HttpResponse {
		let mut response = HttpResponse::new(body.as_bytes().to_vec());

		*response.status_mut() = StatusCode::from_u16(status).expect("Status should be valid.");

		response
	}

	#[test]
	fn request_carries_grant_fields_and_scope() {
		let scopes = ScopeSet::new(["read", "Write"]);
		let request =
			build_refresh_request(&TokenSecret::new("rt-1"), Some(&scopes), &config(Some("s3")))
				.expect("Request should build.");

		assert_eq!(request.method(), &Method::POST);
		assert_eq!(request.uri(), "https://idp.example.com/oauth2/token");
		assert_eq!(
			request.headers().get(CONTENT_TYPE).and_then(|v| v.to_str().ok()),
			Some("application/x-www-form-urlencoded")
		);
		assert_eq!(
			form(&request),
			vec![
				("grant_type".to_string(), "refresh_token".to_string()),
				("client_id".into(), "studio".into()),
				("refresh_token".into(), "rt-1".into()),
				("scope".into(), "read Write".into()),
				("client_secret".into(), "s3".into()),
			]
		);
	}

	#[test]
	fn blank_secret_and_empty_scope_are_omitted() {
		let empty = ScopeSet::default();

		for secret in [None, Some(""), Some("   ")] {
			let request =
				build_refresh_request(&TokenSecret::new("rt-1"), Some(&empty), &config(secret))
					.expect("Request should build.");
			let names = form(&request).into_iter().map(|(k, _)| k).collect::<Vec<_>>();

			assert_eq!(names, vec!["grant_type", "client_id", "refresh_token"]);
		}
	}

	#[test]
	fn response_parsing_computes_expiry_and_rotation() {
		let now = macros::datetime!(2025-01-01 00:00 UTC);
		let tokens = parse_refresh_response(
			&response(200, r#"{"access_token":"at-1","expires_in":300}"#),
			now,
		)
		.expect("Minimal response should parse.");

		assert_eq!(tokens.access_token.expose(), "at-1");
		assert_eq!(tokens.refresh_token, None);
		assert_eq!(tokens.expires_at, macros::datetime!(2025-01-01 00:05 UTC));

		let rotated = parse_refresh_response(
			&response(
				200,
				r#"{"access_token":"at-2","refresh_token":"rt-2","token_type":"Bearer","expires_in":60}"#,
			),
			now,
		)
		.expect("Rotating response should parse.");

		assert_eq!(rotated.refresh_token.as_ref().map(TokenSecret::expose), Some("rt-2"));
	}

	#[test]
	fn invalid_responses_are_rejected() {
		let now = OffsetDateTime::now_utc();

		for (body, expected) in [
			(r#"{"access_token":"","expires_in":300}"#, "missing access_token"),
			(r#"{"expires_in":300}"#, "missing access_token"),
			(r#"{"access_token":"at","expires_in":0}"#, "must be positive"),
			(r#"{"access_token":"at","expires_in":-5}"#, "must be positive"),
			(r#"{"access_token":"at"}"#, "missing expires_in"),
			(r#"{"access_token":"at","expires_in":"soon"}"#, "malformed JSON"),
			("<html>", "malformed JSON"),
		] {
			let err = parse_refresh_response(&response(200, body), now)
				.expect_err("Invalid response should be rejected.");

			assert!(err.to_string().contains(expected), "{body} produced `{err}`.");
			assert_eq!(classify_failure(&err), RefreshFailure::MalformedResponse);
		}
	}

	#[test]
	fn rejection_extracts_oauth_error() {
		let err = rejected(&response(400, r#"{"error":"invalid_grant"}"#));

		assert_eq!(
			classify_failure(&err),
			RefreshFailure::Rejected { status: 400, error: Some("invalid_grant".into()) }
		);
		assert!(matches!(rejected(&response(502, "bad gateway")), Error::Rejected {
			status: 502,
			error: None
		}));
	}

	#[test]
	fn previews_are_truncated() {
		let long = "x".repeat(BODY_PREVIEW_LIMIT + 10);
		let preview = truncate_preview(&long);

		assert_eq!(preview.chars().count(), BODY_PREVIEW_LIMIT + 1);
		assert!(preview.ends_with('…'));
	}
}
