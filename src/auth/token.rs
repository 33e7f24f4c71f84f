//! Token value types: redacted secrets and the session token bundle.

pub mod bundle;
pub mod secret;
