//! Strongly typed user key used to partition cached tokens.

// std
use std::{borrow::Borrow, ops::Deref};
// self
use crate::_prelude::*;

const USER_KEY_MAX_LEN: usize = 256;

/// Error returned when user key validation fails.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, ThisError)]
pub enum UserKeyError {
	/// The key was empty.
	#[error("User key cannot be empty.")]
	Empty,
	/// The key contains whitespace characters.
	#[error("User key contains whitespace.")]
	ContainsWhitespace,
	/// The key exceeded the allowed byte length.
	#[error("User key exceeds {max} bytes.")]
	TooLong {
		/// Maximum permitted length.
		max: usize,
	},
}

/// Stable identifier of an authenticated user (typically the OIDC `sub` claim).
///
/// Keys are validated on construction so they can be embedded in cache keys without escaping.
#[derive(Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct UserKey(String);
impl UserKey {
	/// Creates a new key after validation.
	pub fn new(value: impl AsRef<str>) -> Result<Self, UserKeyError> {
		let view = value.as_ref();

		validate_view(view)?;

		Ok(Self(view.to_owned()))
	}
}
impl Deref for UserKey {
	type Target = str;

	fn deref(&self) -> &Self::Target {
		&self.0
	}
}
impl AsRef<str> for UserKey {
	fn as_ref(&self) -> &str {
		&self.0
	}
}
impl Borrow<str> for UserKey {
	fn borrow(&self) -> &str {
		&self.0
	}
}
impl From<UserKey> for String {
	fn from(value: UserKey) -> Self {
		value.0
	}
}
impl TryFrom<String> for UserKey {
	type Error = UserKeyError;

	fn try_from(value: String) -> Result<Self, Self::Error> {
		validate_view(&value)?;

		Ok(Self(value))
	}
}
impl FromStr for UserKey {
	type Err = UserKeyError;

	fn from_str(s: &str) -> Result<Self, Self::Err> {
		Self::new(s)
	}
}
impl Debug for UserKey {
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		write!(f, "UserKey({})", self.0)
	}
}
impl Display for UserKey {
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		f.write_str(&self.0)
	}
}

fn validate_view(view: &str) -> Result<(), UserKeyError> {
	if view.is_empty() {
		return Err(UserKeyError::Empty);
	}
	if view.chars().any(char::is_whitespace) {
		return Err(UserKeyError::ContainsWhitespace);
	}
	if view.len() > USER_KEY_MAX_LEN {
		return Err(UserKeyError::TooLong { max: USER_KEY_MAX_LEN });
	}

	Ok(())
}

#[cfg(test)]
mod tests {
	// self
	use super::*;

	#[test]
	fn user_keys_validate() {
		assert!(UserKey::new(" user-1").is_err(), "Leading whitespace must be rejected.");
		assert!(UserKey::new("").is_err());
		assert!(UserKey::new(format!("user{}1", '\u{00A0}')).is_err());

		let key = UserKey::new("auth0|user-1").expect("Subject-style keys should be valid.");

		assert_eq!(key.as_ref(), "auth0|user-1");
	}

	#[test]
	fn length_limit_is_enforced() {
		UserKey::new("a".repeat(USER_KEY_MAX_LEN)).expect("Exact length should succeed.");

		assert_eq!(
			UserKey::new("a".repeat(USER_KEY_MAX_LEN + 1)),
			Err(UserKeyError::TooLong { max: USER_KEY_MAX_LEN })
		);
	}

	#[test]
	fn serde_enforces_validation() {
		let key: UserKey =
			serde_json::from_str("\"user-42\"").expect("User key should deserialize.");

		assert_eq!(key.as_ref(), "user-42");
		assert!(serde_json::from_str::<UserKey>("\"with space\"").is_err());
	}

	#[test]
	fn borrow_supports_lookup() {
		let map = HashMap::from([(UserKey::new("user-1").expect("Key should be valid."), 3_u8)]);

		assert_eq!(map.get("user-1"), Some(&3));
	}
}
