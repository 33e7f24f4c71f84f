//! Named session tokens and their wire formats.

// crates.io
use time::format_description::well_known::Rfc3339;
// self
use crate::{_prelude::*, auth::TokenSecret};

/// Session token name holding the access token.
pub const ACCESS_TOKEN: &str = "access_token";
/// Session token name holding the refresh token.
pub const REFRESH_TOKEN: &str = "refresh_token";
/// Session token name holding the access token expiry (RFC 3339, UTC).
pub const EXPIRES_AT: &str = "expires_at";
/// Session token name holding the optional identity token.
pub const ID_TOKEN: &str = "id_token";

/// Named tokens persisted for a browser session and rewritten as one unit on renewal.
#[derive(Clone, PartialEq, Eq)]
pub struct SessionTokenBundle {
	/// Current access token.
	pub access_token: TokenSecret,
	/// Refresh token used for the next grant.
	pub refresh_token: TokenSecret,
	/// Access token expiry.
	pub expires_at: OffsetDateTime,
	/// Identity token issued at sign-in, if kept.
	pub id_token: Option<TokenSecret>,
}
impl SessionTokenBundle {
	/// Flattens the bundle into `(name, value)` pairs for a session store.
	///
	/// Fails only if the expiry cannot be rendered as RFC 3339 (years outside 0..=9999).
	pub fn to_named_tokens(&self) -> Result<Vec<(&'static str, String)>, time::error::Format> {
		let mut tokens = vec![
			(ACCESS_TOKEN, self.access_token.expose().to_owned()),
			(REFRESH_TOKEN, self.refresh_token.expose().to_owned()),
			(EXPIRES_AT, format_expires_at(self.expires_at)?),
		];

		if let Some(id_token) = &self.id_token {
			tokens.push((ID_TOKEN, id_token.expose().to_owned()));
		}

		Ok(tokens)
	}
}
impl Debug for SessionTokenBundle {
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		f.debug_struct("SessionTokenBundle")
			.field("access_token", &"<redacted>")
			.field("refresh_token", &"<redacted>")
			.field("expires_at", &self.expires_at)
			.field("id_token", &self.id_token.as_ref().map(|_| "<redacted>"))
			.finish()
	}
}

/// Parses a persisted `expires_at` value; unparseable input is treated as absent.
pub fn parse_expires_at(raw: &str) -> Option<OffsetDateTime> {
	OffsetDateTime::parse(raw.trim(), &Rfc3339).ok()
}

/// Formats an expiry in UTC with full sub-second precision so it round-trips.
pub fn format_expires_at(instant: OffsetDateTime) -> Result<String, time::error::Format> {
	instant.to_offset(time::UtcOffset::UTC).format(&Rfc3339)
}

#[cfg(test)]
mod tests {
	// crates.io
	use time::macros;
	// self
	use super::*;

	#[test]
	fn expiry_round_trips_in_utc() {
		let instant = macros::datetime!(2025-03-01 10:15:30.1234567 +02:00);
		let raw = format_expires_at(instant).expect("Expiry should format.");

		assert_eq!(raw, "2025-03-01T08:15:30.1234567Z");
		assert_eq!(parse_expires_at(&raw), Some(instant));
	}

	#[test]
	fn foreign_round_trip_formats_parse() {
		let parsed = parse_expires_at("2025-03-01T08:15:30.0000000+00:00")
			.expect("Offset-qualified round-trip timestamps should parse.");

		assert_eq!(parsed, macros::datetime!(2025-03-01 08:15:30 UTC));
		assert_eq!(parse_expires_at("yesterday"), None);
	}

	#[test]
	fn named_tokens_skip_missing_id_token() {
		let bundle = SessionTokenBundle {
			access_token: TokenSecret::new("at-1"),
			refresh_token: TokenSecret::new("rt-1"),
			expires_at: macros::datetime!(2025-01-01 00:05 UTC),
			id_token: None,
		};
		let tokens = bundle.to_named_tokens().expect("Bundle should flatten.");

		assert_eq!(
			tokens,
			vec![
				(ACCESS_TOKEN, "at-1".to_string()),
				(REFRESH_TOKEN, "rt-1".to_string()),
				(EXPIRES_AT, "2025-01-01T00:05:00Z".to_string()),
			]
		);
		assert!(!format!("{bundle:?}").contains("at-1"));
	}
}
