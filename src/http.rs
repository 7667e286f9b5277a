//! HTTP client with rate limiting for Spotify endpoints.
//!
//! This module provides a wrapper around `reqwest::Client` that adds:
//! * Request rate limiting to stay well within Spotify's rolling quota
//! * Bearer and cookie authentication helpers
//! * Consistent timeouts and headers
//! * Status classification into typed errors
//!
//! # Rate Limiting
//!
//! Spotify enforces its quota over a rolling 30 second window. The client
//! allows bursts up to the per-window maximum and delays requests beyond it.
//!
//! # Example
//!
//! ```rust
//! use jukebox::http::Client;
//!
//! let client = Client::new(&config)?;
//! let mut request = client.get(url, "");
//! Client::bearer(&mut request, &token)?;
//! let body = client.text(request, "devices").await?;
//! ```

use std::{future::Future, num::NonZeroU32, time::Duration};

use base64::{engine::general_purpose::STANDARD as BASE64, Engine as _};
use futures_util::{FutureExt, TryFutureExt};
use governor::{DefaultDirectRateLimiter, Quota};
use reqwest::{
    self,
    header::{HeaderValue, ACCEPT_LANGUAGE, AUTHORIZATION, CONTENT_TYPE, COOKIE},
    Body, Method, Url,
};

use crate::{
    config::Config,
    error::{Error, Result},
};

/// HTTP client with built-in rate limiting.
pub struct Client {
    /// Direct access to the underlying client without rate limiting.
    ///
    /// Used for the local WebDriver endpoint, which has no quota.
    pub unlimited: reqwest::Client,

    rate_limiter: DefaultDirectRateLimiter,
}

impl Client {
    /// Rolling window over which the quota is enforced.
    const RATE_LIMIT_INTERVAL: Duration = Duration::from_secs(30);

    /// Maximum calls per window. Conservative, as the actual quota is not
    /// published and is shared with the browser session.
    const RATE_LIMIT_CALLS_PER_INTERVAL: u8 = 150;

    /// Duration to keep idle connections alive.
    const KEEPALIVE_TIMEOUT: Duration = Duration::from_secs(60);

    /// Ceiling for a complete request.
    const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

    /// JSON content type for request bodies.
    pub const JSON_CONTENT: HeaderValue = HeaderValue::from_static("application/json");

    /// Form content type for the accounts service.
    pub const FORM_CONTENT: HeaderValue =
        HeaderValue::from_static("application/x-www-form-urlencoded");

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
        // Not having `Accept-Language` set is non-fatal.
        let mut headers = reqwest::header::HeaderMap::new();
        if let Ok(lang) = HeaderValue::from_str(&config.app_lang) {
            headers.insert(ACCEPT_LANGUAGE, lang);
        }

        let http_client = reqwest::Client::builder()
            .tcp_keepalive(Self::KEEPALIVE_TIMEOUT)
            .timeout(Self::REQUEST_TIMEOUT)
            .default_headers(headers)
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

    /// Builds a request with specified method, URL and body.
    pub fn request<U, T>(&self, method: Method, url: U, body: T) -> reqwest::Request
    where
        U: Into<Url>,
        T: Into<Body>,
    {
        let mut request = reqwest::Request::new(method, url.into());
        let body_mut = request.body_mut();
        *body_mut = Some(body.into());

        request
    }

    /// Builds a GET request.
    pub fn get<U, T>(&self, url: U, body: T) -> reqwest::Request
    where
        U: Into<Url>,
        T: Into<Body>,
    {
        self.request(Method::GET, url, body)
    }

    /// Builds a POST request.
    pub fn post<U, T>(&self, url: U, body: T) -> reqwest::Request
    where
        U: Into<Url>,
        T: Into<Body>,
    {
        self.request(Method::POST, url, body)
    }

    /// Builds a PUT request.
    pub fn put<U, T>(&self, url: U, body: T) -> reqwest::Request
    where
        U: Into<Url>,
        T: Into<Body>,
    {
        self.request(Method::PUT, url, body)
    }

    /// Sets `Authorization: Bearer <token>` on a request.
    ///
    /// # Errors
    ///
    /// Returns error if the token contains characters not allowed in a
    /// header value.
    pub fn bearer(request: &mut reqwest::Request, token: &str) -> Result<()> {
        let mut value = HeaderValue::from_str(&format!("Bearer {token}"))?;
        value.set_sensitive(true);
        request.headers_mut().try_insert(AUTHORIZATION, value)?;
        Ok(())
    }

    /// Sets `Authorization: Basic <credentials>` on a request.
    ///
    /// # Errors
    ///
    /// Returns error if the header map is full.
    pub fn basic(request: &mut reqwest::Request, username: &str, password: &str) -> Result<()> {
        let encoded = BASE64.encode(format!("{username}:{password}"));
        let mut value = HeaderValue::from_str(&format!("Basic {encoded}"))?;
        value.set_sensitive(true);
        request.headers_mut().try_insert(AUTHORIZATION, value)?;
        Ok(())
    }

    /// Sets a `Cookie` header on a request.
    ///
    /// # Errors
    ///
    /// Returns error if the cookies contain characters not allowed in a
    /// header value.
    pub fn cookies(request: &mut reqwest::Request, cookies: &str) -> Result<()> {
        let mut value = HeaderValue::from_str(cookies)?;
        value.set_sensitive(true);
        request.headers_mut().try_insert(COOKIE, value)?;
        Ok(())
    }

    /// Sets the `Content-Type` header on a request.
    ///
    /// # Errors
    ///
    /// Returns error if the header map is full.
    pub fn content_type(request: &mut reqwest::Request, content_type: HeaderValue) -> Result<()> {
        request
            .headers_mut()
            .try_insert(CONTENT_TYPE, content_type)?;
        Ok(())
    }

    /// Executes a request with rate limiting.
    ///
    /// # Errors
    ///
    /// Returns error if the request cannot be sent or no response arrives.
    pub fn execute(
        &self,
        request: reqwest::Request,
    ) -> impl Future<Output = Result<reqwest::Response>> + '_ {
        // No need to await with jitter because the level of concurrency is low.
        let throttle = self.rate_limiter.until_ready();
        throttle.then(|()| self.unlimited.execute(request).map_err(Into::into))
    }

    /// Executes a request and returns the body of a successful response.
    ///
    /// Non-success statuses are classified with [`Error::from_status`], with
    /// the response body as details.
    ///
    /// # Errors
    ///
    /// Returns error if the request fails or the status is not a success.
    pub async fn text(&self, request: reqwest::Request, origin: &str) -> Result<String> {
        let method = request.method().clone();
        let response = self.execute(request).await?;
        let status = response.status();
        let body = response.text().await?;

        if status.is_success() {
            trace!("{method} {origin}: {status}");
            Ok(body)
        } else {
            debug!("{method} {origin}: {status}");
            Err(Error::from_status(
                status,
                format!("{origin} returned {status}: {}", body.trim()),
            ))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bearer_header_is_sensitive() {
        let config: Config = r#"
            client_id = "id"
            client_secret = "secret"
            redirect_uri = "https://example.com/spotify"
            preferred_device_id = "kitchen"
        "#
        .parse()
        .unwrap();
        let client = Client::new(&config).unwrap();

        let url = Url::parse("https://api.spotify.com/v1/me/player").unwrap();
        let mut request = client.get(url, "");
        Client::bearer(&mut request, "abc").unwrap();

        let header = request.headers().get(AUTHORIZATION).unwrap();
        assert_eq!(header.to_str().unwrap(), "Bearer abc");
        assert!(header.is_sensitive());
        assert_eq!(request.method(), Method::GET);
    }

    #[test]
    fn basic_header_encodes_credentials() {
        let url = Url::parse("https://accounts.spotify.com/api/token").unwrap();
        let mut request = reqwest::Request::new(Method::POST, url);
        Client::basic(&mut request, "id", "secret").unwrap();

        let header = request.headers().get(AUTHORIZATION).unwrap();
        assert_eq!(header.to_str().unwrap(), "Basic aWQ6c2VjcmV0");
    }
}
