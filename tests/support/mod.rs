//! Shared fixtures for integration tests.

#![allow(dead_code)]

// std
use std::{
	collections::VecDeque,
	error::Error as StdError,
	fmt::{Display, Formatter, Result as FmtResult},
	future::Future,
	pin::Pin,
	sync::Arc,
};
// crates.io
use parking_lot::Mutex;
use time::{Duration, OffsetDateTime};
use url::Url;
// self
use oidc_session_refresh::{
	auth::{SessionTokenBundle, TokenSecret, UserKey},
	config::{OidcRegistration, RefreshOptions},
	error::{Error, TransportError},
	flows::RefreshBroker,
	http::{ResponseMetadata, ResponseMetadataSlot, TokenHttpClient, TransportErrorMapper},
	oauth::oauth2::{
		AsyncHttpClient, HttpClientError, HttpRequest, HttpResponse, http::StatusCode,
	},
	session::MemorySession,
};

/// Token endpoint used with the fake transport; never dialed.
pub const FAKE_TOKEN_ENDPOINT: &str = "https://idp.example.com/oauth2/token";
pub const CLIENT_ID: &str = "studio";
pub const CLIENT_SECRET: &str = "studio-secret";

pub type FakeBroker = RefreshBroker<FakeTokenEndpoint, FakeMapper>;

#[derive(Debug)]
pub struct FakeTransportError(String);
impl Display for FakeTransportError {
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		write!(f, "Fake transport failure: {}.", self.0)
	}
}
impl StdError for FakeTransportError {}

#[derive(Clone, Debug)]
pub enum Scripted {
	Respond(u16, String),
	ConnectionReset,
	/// Never answers; the caller has to give up on the request.
	Hang,
}

/// Parts of a request captured by [`FakeTokenEndpoint`].
#[derive(Clone, Debug)]
pub struct RecordedRequest {
	pub method: String,
	pub uri: String,
	pub content_type: Option<String>,
	pub body: Vec<u8>,
}
impl RecordedRequest {
	fn capture(request: &HttpRequest) -> Self {
		Self {
			method: request.method().to_string(),
			uri: request.uri().to_string(),
			content_type: request
				.headers()
				.get("content-type")
				.and_then(|value| value.to_str().ok())
				.map(str::to_owned),
			body: request.body().clone(),
		}
	}

	pub fn form(&self) -> Vec<(String, String)> {
		url::form_urlencoded::parse(&self.body).into_owned().collect()
	}
}

#[derive(Default)]
struct FakeState {
	requests: Mutex<Vec<RecordedRequest>>,
	script: Mutex<VecDeque<Scripted>>,
	fallback: Mutex<Option<Scripted>>,
}

/// In-process token endpoint that records every request it receives.
#[derive(Clone, Default)]
pub struct FakeTokenEndpoint {
	state: Arc<FakeState>,
}
impl FakeTokenEndpoint {
	/// Answers every request with `status` + `body`.
	pub fn always(status: u16, body: &str) -> Self {
		let endpoint = Self::default();

		*endpoint.state.fallback.lock() = Some(Scripted::Respond(status, body.to_owned()));

		endpoint
	}

	/// Queues a one-shot answer consumed before the fallback.
	pub fn push(&self, answer: Scripted) {
		self.state.script.lock().push_back(answer);
	}

	pub fn calls(&self) -> usize {
		self.state.requests.lock().len()
	}

	/// Decoded form bodies of every recorded request.
	pub fn forms(&self) -> Vec<Vec<(String, String)>> {
		self.state.requests.lock().iter().map(RecordedRequest::form).collect()
	}

	/// `refresh_token` form field of every recorded request.
	pub fn refresh_tokens_sent(&self) -> Vec<String> {
		self.forms()
			.into_iter()
			.filter_map(|form| {
				form.into_iter().find(|(name, _)| name == "refresh_token").map(|(_, value)| value)
			})
			.collect()
	}

	pub fn requests(&self) -> Vec<RecordedRequest> {
		self.state.requests.lock().clone()
	}
}
impl TokenHttpClient for FakeTokenEndpoint {
	type Handle = FakeHandle;
	type TransportError = FakeTransportError;

	fn with_metadata(&self, slot: ResponseMetadataSlot) -> Self::Handle {
		FakeHandle { state: self.state.clone(), slot }
	}
}

pub struct FakeHandle {
	state: Arc<FakeState>,
	slot: ResponseMetadataSlot,
}
impl<'a> AsyncHttpClient<'a> for FakeHandle {
	type Error = HttpClientError<FakeTransportError>;
	type Future =
		Pin<Box<dyn Future<Output = Result<HttpResponse, Self::Error>> + 'a + Send + Sync>>;

	fn call(&'a self, request: HttpRequest) -> Self::Future {
		self.state.requests.lock().push(RecordedRequest::capture(&request));

		let answer = self
			.state
			.script
			.lock()
			.pop_front()
			.or_else(|| self.state.fallback.lock().clone())
			.unwrap_or(Scripted::Respond(500, String::new()));
		let slot = self.slot.clone();

		Box::pin(async move {
			match answer {
				Scripted::Respond(status, body) => {
					slot.store(ResponseMetadata { status: Some(status), retry_after: None });

					let mut response = HttpResponse::new(body.into_bytes());

					*response.status_mut() =
						StatusCode::from_u16(status).expect("Scripted status should be valid.");

					Ok(response)
				},
				Scripted::ConnectionReset =>
					Err(HttpClientError::Reqwest(Box::new(FakeTransportError("reset".into())))),
				Scripted::Hang => std::future::pending().await,
			}
		})
	}
}

#[derive(Clone, Copy, Debug, Default)]
pub struct FakeMapper;
impl TransportErrorMapper<FakeTransportError> for FakeMapper {
	fn map_transport_error(
		&self,
		_metadata: Option<&ResponseMetadata>,
		error: HttpClientError<FakeTransportError>,
	) -> Error {
		TransportError::Io(std::io::Error::other(error.to_string())).into()
	}
}

pub fn token_json(access_token: &str, refresh_token: Option<&str>, expires_in: i64) -> String {
	match refresh_token {
		Some(refresh) => format!(
			r#"{{"access_token":"{access_token}","refresh_token":"{refresh}","token_type":"Bearer","expires_in":{expires_in}}}"#
		),
		None => format!(r#"{{"access_token":"{access_token}","expires_in":{expires_in}}}"#),
	}
}

pub fn fake_options() -> RefreshOptions {
	RefreshOptions::default()
		.with_client_secret(CLIENT_SECRET)
		.with_token_endpoint(Url::parse(FAKE_TOKEN_ENDPOINT).expect("Fake endpoint should parse."))
}

pub fn fake_broker(options: RefreshOptions, endpoint: &FakeTokenEndpoint) -> FakeBroker {
	RefreshBroker::with_http_client(
		options,
		OidcRegistration::new(CLIENT_ID),
		endpoint.clone(),
		FakeMapper,
	)
}

pub fn user(name: &str) -> UserKey {
	UserKey::new(name).expect("User fixture should be valid.")
}

/// Authenticated, writable session whose access token expires `expires_in` from now.
pub fn session_expiring_in(name: &str, refresh_token: &str, expires_in: Duration) -> MemorySession {
	MemorySession::authenticated(user(name))
		.with_bundle(&SessionTokenBundle {
			access_token: TokenSecret::new(format!("{name}-access")),
			refresh_token: TokenSecret::new(refresh_token),
			expires_at: OffsetDateTime::now_utc() + expires_in,
			id_token: Some(TokenSecret::new(format!("{name}-id"))),
		})
		.expect("Session fixture should seed.")
}

#[cfg(feature = "reqwest")]
pub fn reqwest_broker(
	options: RefreshOptions,
	registration: OidcRegistration,
) -> oidc_session_refresh::flows::ReqwestRefreshBroker {
	RefreshBroker::new(options, registration)
}
