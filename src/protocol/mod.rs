//! Protocol types and structures for Spotify services.
//!
//! This module contains the wire types and parsing logic of the services
//! the engine talks to:
//!
//! # Submodules
//!
//! * [`auth`] - token responses of the accounts service and the web player
//! * [`web_api`] - official Web API resources (devices, playback, catalog)
//! * [`connect_state`] - connect-state clusters and player commands
//! * [`dealer`] - frames on the realtime push connection
//! * [`uri`] - Spotify URIs and the contexts they name
//!
//! # Shared Functionality
//!
//! [`json`] parses a response body and logs it consistently:
//!
//! ```
//! use jukebox::protocol;
//!
//! let devices: protocol::web_api::Devices = protocol::json(&body, "devices")?;
//! ```

pub mod auth;
pub mod connect_state;
pub mod dealer;
pub mod uri;
pub mod web_api;

use std::fmt::Debug;

use serde::Deserialize;

use crate::error::Result;

/// Parses and logs JSON responses from Spotify services.
///
/// # Logging
///
/// * Success: Logs parsed structure at TRACE level
/// * Parse Error: Logs raw JSON at TRACE level if valid JSON
/// * Invalid JSON: Logs error and raw text at ERROR level
///
/// # Errors
///
/// Returns error if the body is not valid JSON or does not match `T`.
pub fn json<T>(body: &str, origin: &str) -> Result<T>
where
    T: for<'de> Deserialize<'de> + Debug,
{
    match serde_json::from_str(body) {
        Ok(result) => {
            trace!("{origin}: {result:#?}");
            Ok(result)
        }
        Err(e) => {
            if let Ok(json) = serde_json::from_str::<serde_json::Value>(body) {
                trace!("{origin}: {json:#?}");
            } else {
                error!("{origin}: failed parsing response ({e:?})");
                trace!("{body}");
            }
            Err(e.into())
        }
    }
}
