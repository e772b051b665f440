//! Wire types and codecs for the services sonotube talks to.
//!
//! # Submodules
//!
//! * [`metube`] - JSON bodies of the download backend's REST API
//! * [`upnp`] - SOAP envelopes and DIDL-Lite listings of Sonos speakers
//!
//! Both are pure data and parsing; the clients that send them live in
//! [`crate::backend`] and [`crate::sonos`].

pub mod metube;
pub mod upnp;

use crate::error::Result;
use serde::Deserialize;
use std::fmt::Debug;

/// Parses and logs a JSON response.
///
/// # Logging
///
/// * Success: logs the parsed structure at TRACE level
/// * Parse error on valid JSON: logs the raw value at TRACE level
/// * Invalid JSON: logs the error at ERROR level and the body at TRACE level
///
/// # Errors
///
/// Returns error if `body` is not valid JSON or does not match `T`.
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
