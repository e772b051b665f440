use std::time::Duration;

use url::Url;

use crate::error::{Error, Result};

/// Appends `segment` as a single, percent-encoded path segment to `base`.
///
/// A trailing slash on `base` does not produce an empty segment, so
/// `http://host/api/` and `http://host/api` join to the same URL.
///
/// # Errors
///
/// Returns `InvalidArgument` if `base` cannot be a base URL.
pub fn join_url(base: &Url, segment: &str) -> Result<Url> {
    let mut url = base.clone();
    url.path_segments_mut()
        .map_err(|()| Error::invalid_argument(format!("{base} cannot be a base url")))?
        .pop_if_empty()
        .push(segment);
    Ok(url)
}

/// Formats a duration as `H:MM:SS`, truncating subseconds.
#[must_use]
pub fn format_hms(duration: Duration) -> String {
    let secs = duration.as_secs();
    format!("{}:{:02}:{:02}", secs / 3600, (secs / 60) % 60, secs % 60)
}

/// Parses `H:MM:SS` with optional fractional seconds.
///
/// Returns `None` for anything else, including the `NOT_IMPLEMENTED`
/// that renderers report for streams without a known length.
#[must_use]
pub fn parse_hms(value: &str) -> Option<Duration> {
    let mut parts = value.trim().split(':');
    let hours = parts.next()?.parse::<u64>().ok()?;
    let minutes = parts.next()?.parse::<u64>().ok()?;
    let seconds = parts.next()?.parse::<f64>().ok()?;
    if parts.next().is_some() || minutes >= 60 || !(0.0..60.0).contains(&seconds) {
        return None;
    }

    Some(Duration::from_secs(hours * 3600 + minutes * 60) + Duration::from_secs_f64(seconds))
}
