//! Remote control of playback through the web API.
//!
//! Selecting what to play is not something the playback client exposes
//! locally, so `play` goes through the remote control endpoint of the web
//! API, addressed to the session's device.

use std::sync::Arc;

use reqwest::Method;
use serde::Serialize;
use url::Url;

use crate::{credential::Credential, error::Result, http};

/// The remote control capability consumed by the engine.
#[allow(async_fn_in_trait)]
pub trait RemoteControl {
    /// Starts playback of `uris`, in order, on the device `device_id`.
    async fn play(&self, credential: &Credential, device_id: &str, uris: &[String]) -> Result<()>;
}

#[derive(Serialize)]
struct PlayBody<'a> {
    uris: &'a [String],
}

/// [`RemoteControl`] over the web API.
#[derive(Clone)]
pub struct WebApi {
    http: Arc<http::Client>,
    api_url: Url,
}

impl WebApi {
    /// Creates a remote control client against `api_url`, which must end
    /// with a slash.
    #[must_use]
    pub fn new(http: Arc<http::Client>, api_url: Url) -> Self {
        Self { http, api_url }
    }
}

fn play_url(api_url: &Url, device_id: &str) -> Result<Url> {
    let mut url = api_url.join("me/player/play")?;
    url.query_pairs_mut().append_pair("device_id", device_id);
    Ok(url)
}

impl RemoteControl for WebApi {
    async fn play(&self, credential: &Credential, device_id: &str, uris: &[String]) -> Result<()> {
        let url = play_url(&self.api_url, device_id)?;
        debug!("requesting playback of {} item(s) on {device_id}", uris.len());

        let request = self
            .http
            .request(Method::PUT, url, credential, Some(&PlayBody { uris }))?;
        http::Client::check(self.http.execute(request).await?).await?;
        Ok(())
    }
}
