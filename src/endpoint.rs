//! Framework-agnostic handler for the browser-driven refresh endpoint.

// crates.io
use oauth2::http::{Method, StatusCode};
// self
use crate::{
	config::RefreshOptions,
	flows::RefreshBroker,
	http::{TokenHttpClient, TransportErrorMapper},
	session::SessionStore,
};

/// `POST <path>` endpoint that refreshes the caller's session.
///
/// The response has no body. When a refresh happens the session implementation attaches the
/// reissued cookie itself.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RefreshEndpoint {
	path: String,
}
impl RefreshEndpoint {
	/// Serves the endpoint at `path`.
	pub fn new(path: impl Into<String>) -> Self {
		Self { path: path.into() }
	}

	/// Path the endpoint answers on.
	pub fn path(&self) -> &str {
		&self.path
	}

	/// Returns true when `path` addresses this endpoint (a trailing slash is tolerated).
	pub fn matches(&self, path: &str) -> bool {
		let wanted = self.path.trim_end_matches('/');
		let path = path.trim_end_matches('/');

		path == wanted
	}

	/// Handles a request, or returns `None` if `path` belongs to another route.
	///
	/// Non-POST methods yield `405`. Everything else yields `204`, refreshed or not.
	pub async fn handle<C, M>(
		&self,
		broker: &RefreshBroker<C, M>,
		method: &Method,
		path: &str,
		session: &dyn SessionStore,
	) -> Option<StatusCode>
	where
		C: ?Sized + TokenHttpClient,
		M: ?Sized + TransportErrorMapper<C::TransportError>,
	{
		if !self.matches(path) {
			return None;
		}
		if *method != Method::POST {
			return Some(StatusCode::METHOD_NOT_ALLOWED);
		}

		let refreshed = broker.try_refresh_and_renew_session(session).await;

		tracing::debug!(path, refreshed, "Handled session refresh request.");

		Some(StatusCode::NO_CONTENT)
	}
}
impl Default for RefreshEndpoint {
	fn default() -> Self {
		Self::new(RefreshOptions::DEFAULT_REFRESH_PATH)
	}
}
impl From<&RefreshOptions> for RefreshEndpoint {
	fn from(options: &RefreshOptions) -> Self {
		Self::new(options.refresh_path.clone())
	}
}
