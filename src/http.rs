//! Rate-limited HTTP access to the remote control web API.
//!
//! Calls share one [`governor`] quota of 20 requests per 5 seconds with
//! bursts up to the full quota. Requests beyond it wait rather than fail.
//! At the default poll interval the engine spends one call per second, so
//! commands keep plenty of headroom.
//!
//! # Example
//!
//! ```ignore
//! let client = Client::new(&config)?;
//! let request = client.request(Method::PUT, url, &credential, None)?;
//! let response = Client::check(client.execute(request).await?).await?;
//! ```

use std::{future::Future, num::NonZeroU32, time::Duration};

use futures_util::{FutureExt, TryFutureExt};
use governor::{DefaultDirectRateLimiter, Quota};
use reqwest::{
    header::{HeaderValue, ACCEPT_LANGUAGE},
    Method, Url,
};
use serde::Serialize;

use crate::{
    config::Config,
    credential::Credential,
    error::{Error, Result},
};

pub struct Client {
    /// Bypasses the rate limiter.
    pub unlimited: reqwest::Client,

    rate_limiter: DefaultDirectRateLimiter,
}

impl Client {
    /// Rolling window for the rate limit.
    const RATE_LIMIT_INTERVAL: Duration = Duration::from_secs(5);

    /// Maximum allowed API calls per interval.
    const RATE_LIMIT_CALLS_PER_INTERVAL: u8 = 20;

    /// Polling reuses connections every second.
    const KEEPALIVE_TIMEOUT: Duration = Duration::from_secs(60);

    const READ_TIMEOUT: Duration = Duration::from_secs(2);

    /// # Errors
    ///
    /// Fails when the configured user agent is not a valid header value or
    /// the TLS backend cannot be initialized.
    pub fn new(config: &Config) -> Result<Self> {
        let mut headers = reqwest::header::HeaderMap::new();
        if let Ok(lang) = HeaderValue::from_str(&config.app_lang) {
            headers.insert(ACCEPT_LANGUAGE, lang);
        }

        let http_client = reqwest::Client::builder()
            .tcp_keepalive(Self::KEEPALIVE_TIMEOUT)
            .read_timeout(Self::READ_TIMEOUT)
            .default_headers(headers)
            .user_agent(config.user_agent()?);

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

    /// Builds an authenticated request with an optional JSON body.
    ///
    /// # Errors
    ///
    /// Returns `Internal` if the request cannot be built, for example when
    /// the body fails to serialize.
    pub fn request<T>(
        &self,
        method: Method,
        url: Url,
        credential: &Credential,
        body: Option<&T>,
    ) -> Result<reqwest::Request>
    where
        T: Serialize + ?Sized,
    {
        let mut builder = self
            .unlimited
            .request(method, url)
            .bearer_auth(credential.as_str());

        builder = match body {
            Some(body) => builder.json(body),
            // Some endpoints insist on a length even without a body.
            None => builder.header(reqwest::header::CONTENT_LENGTH, 0),
        };

        builder.build().map_err(Into::into)
    }

    /// Waits for the rate limiter, then sends the request.
    pub fn execute(
        &self,
        request: reqwest::Request,
    ) -> impl Future<Output = Result<reqwest::Response>> + '_ {
        let throttle = self.rate_limiter.until_ready();
        throttle.then(|()| self.unlimited.execute(request).map_err(Into::into))
    }

    /// Passes successful responses through and turns error statuses into
    /// errors, carrying the API's error message when it sent one.
    ///
    /// # Errors
    ///
    /// Returns an error classified by [`Error::from_status`].
    pub async fn check(response: reqwest::Response) -> Result<reqwest::Response> {
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }

        let url = response.url().path().to_owned();
        let body = response.text().await.unwrap_or_default();
        let detail = serde_json::from_str::<serde_json::Value>(&body)
            .ok()
            .and_then(|value| {
                value["error"]["message"]
                    .as_str()
                    .map(ToOwned::to_owned)
            })
            .unwrap_or(body);

        Err(Error::from_status(
            status,
            format!("{url} returned {status}: {detail}"),
        ))
    }
}
