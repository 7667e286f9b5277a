//! Token responses.
//!
//! Two services hand out bearer tokens:
//! * the accounts service, for the official Web API (OAuth)
//! * the web player, which derives a token from an authenticated session's
//!   cookies for unpublished endpoints
//!
//! # Example Responses
//!
//! Accounts service:
//! ```json
//! {
//!     "access_token": "BQD...",
//!     "token_type": "Bearer",
//!     "scope": "user-read-playback-state user-modify-playback-state",
//!     "expires_in": 3600,
//!     "refresh_token": "AQA..."
//! }
//! ```
//!
//! Web player:
//! ```json
//! {
//!     "clientId": "d8a5ed958d274c2e8ee717e6a4b0971d",
//!     "accessToken": "BQC...",
//!     "accessTokenExpirationTimestampMs": 1700000000000,
//!     "isAnonymous": false
//! }
//! ```

use std::time::{Duration, SystemTime};

use serde::Deserialize;
use serde_with::{serde_as, DurationSeconds, TimestampMilliSeconds};
use veil::Redact;

/// OAuth token from the accounts service.
///
/// `refresh_token` is only present on the authorization-code grant and,
/// occasionally, when the service rotates it on refresh.
#[serde_as]
#[derive(Clone, Eq, PartialEq, Deserialize, Redact, Hash)]
pub struct OAuthToken {
    #[redact]
    pub access_token: String,

    #[redact]
    #[serde(default)]
    pub refresh_token: Option<String>,

    /// How long the token remains valid from the moment it was issued.
    #[serde_as(as = "DurationSeconds<u64>")]
    pub expires_in: Duration,

    #[serde(default)]
    pub scope: String,

    #[serde(default)]
    pub token_type: String,
}

/// Token derived from an authenticated web session.
#[serde_as]
#[derive(Clone, Eq, PartialEq, Deserialize, Redact, Hash)]
#[serde(rename_all = "camelCase")]
pub struct WebToken {
    #[redact]
    pub access_token: String,

    #[serde_as(as = "TimestampMilliSeconds<i64>")]
    #[serde(rename = "accessTokenExpirationTimestampMs")]
    pub expires_at: SystemTime,

    /// Set when the cookies did not belong to a logged-in session.
    #[serde(default)]
    pub is_anonymous: bool,

    #[serde(default)]
    pub client_id: String,
}

/// Error body of the accounts service.
#[derive(Clone, Debug, Eq, PartialEq, Deserialize, Hash)]
pub struct AccountsError {
    pub error: String,

    #[serde(default)]
    pub error_description: String,
}
