//! HTTP client with rate limiting for the backend and the renderer.
//!
//! Wraps `reqwest::Client` to add:
//! * Request rate limiting, so a tight poll loop cannot flood a small
//!   self-hosted backend or a speaker's embedded web server
//! * Consistent timeouts and `User-Agent`
//! * Error status handling
//!
//! # Example
//!
//! ```rust
//! use sonotube::http::Client;
//!
//! let client = Client::new(&config)?;
//! let request = client.get(url);
//! let body = client.text(request).await?;
//! ```

use std::{future::Future, num::NonZeroU32, time::Duration};

use futures_util::{FutureExt, TryFutureExt};
use governor::{DefaultDirectRateLimiter, Quota};
use reqwest::{
    self,
    header::{HeaderName, HeaderValue, CONTENT_TYPE},
    Body, Method, Url,
};

use crate::{config::Config, error::Result};

/// HTTP client with built-in rate limiting.
pub struct Client {
    /// Direct access to the underlying client without rate limiting.
    pub unlimited: reqwest::Client,

    rate_limiter: DefaultDirectRateLimiter,
}

impl Client {
    /// Rolling window for the rate limit.
    const RATE_LIMIT_INTERVAL: Duration = Duration::from_secs(1);

    /// Maximum calls per interval. Comfortably above the four history
    /// polls per second a waiting resolver makes.
    const RATE_LIMIT_CALLS_PER_INTERVAL: u8 = 20;

    /// Duration to keep idle connections alive.
    const KEEPALIVE_TIMEOUT: Duration = Duration::from_secs(60);

    /// Upper bound for a whole request, including the response body.
    ///
    /// Speakers answer SOAP calls within milliseconds and the backend's
    /// history listing is small, so anything slower is a stuck peer.
    const REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

    const CONNECT_TIMEOUT: Duration = Duration::from_secs(5);

    /// Creates a new client.
    ///
    /// # Errors
    ///
    /// Returns error if the HTTP client cannot be built.
    ///
    /// # Panics
    ///
    /// Panics if rate limit parameters are zero.
    pub fn new(config: &Config) -> Result<Self> {
        let http_client = reqwest::Client::builder()
            .tcp_keepalive(Self::KEEPALIVE_TIMEOUT)
            .connect_timeout(Self::CONNECT_TIMEOUT)
            .timeout(Self::REQUEST_TIMEOUT)
            .user_agent(&config.user_agent);

        let replenish_interval =
            Self::RATE_LIMIT_INTERVAL / u32::from(Self::RATE_LIMIT_CALLS_PER_INTERVAL);
        let quota = Quota::with_period(replenish_interval)
            .expect("quota time interval is zero")
            .allow_burst(
                NonZeroU32::new(Self::RATE_LIMIT_CALLS_PER_INTERVAL.into())
                    .expect("calls per interval is zero"),
            );

        Ok(Self {
            unlimited: http_client.build()?,
            rate_limiter: governor::RateLimiter::direct(quota),
        })
    }

    /// Builds a request with specified method, URL and optional body.
    pub fn request<U, T>(&self, method: Method, url: U, body: Option<T>) -> reqwest::Request
    where
        U: Into<Url>,
        T: Into<Body>,
    {
        let mut request = reqwest::Request::new(method, url.into());
        *request.body_mut() = body.map(Into::into);
        request
    }

    /// Builds a GET request without a body.
    pub fn get<U>(&self, url: U) -> reqwest::Request
    where
        U: Into<Url>,
    {
        self.request(Method::GET, url, None::<Body>)
    }

    /// Builds a POST request with a JSON body.
    ///
    /// # Errors
    ///
    /// Returns error if `body` cannot be serialized.
    pub fn post_json<U, T>(&self, url: U, body: &T) -> Result<reqwest::Request>
    where
        U: Into<Url>,
        T: serde::Serialize + ?Sized,
    {
        let body = serde_json::to_string(body)?;
        let mut request = self.request(Method::POST, url, Some(body));
        request
            .headers_mut()
            .insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        Ok(request)
    }

    /// Builds a POST request with an XML body and extra headers.
    pub fn post_xml<U>(
        &self,
        url: U,
        body: String,
        headers: impl IntoIterator<Item = (HeaderName, HeaderValue)>,
    ) -> reqwest::Request
    where
        U: Into<Url>,
    {
        let mut request = self.request(Method::POST, url, Some(body));
        let request_headers = request.headers_mut();
        request_headers.insert(
            CONTENT_TYPE,
            HeaderValue::from_static("text/xml; charset=\"utf-8\""),
        );
        request_headers.extend(headers);
        request
    }

    /// Executes a request with rate limiting.
    ///
    /// # Errors
    ///
    /// Returns error if the request fails on the network level.
    pub fn execute(
        &self,
        request: reqwest::Request,
    ) -> impl Future<Output = Result<reqwest::Response>> + '_ {
        let throttle = self.rate_limiter.until_ready();
        throttle.then(|()| self.unlimited.execute(request).map_err(Into::into))
    }

    /// Executes a request and returns the body of a successful response.
    ///
    /// # Errors
    ///
    /// Returns error if the request fails or the response status is not a
    /// success. For error statuses the body is logged at debug level, as
    /// it often holds the only useful description (SOAP faults).
    pub async fn text(&self, request: reqwest::Request) -> Result<String> {
        let url = request.url().clone();
        let response = self.execute(request).await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            debug!("{url} answered {status}: {body}");
            return Err(crate::error::Error::failed_precondition(format!(
                "{url} answered {status}"
            )));
        }

        response.text().await.map_err(Into::into)
    }
}
