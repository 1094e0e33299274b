//! Engine configuration.
//!
//! All settings have defaults, so a configuration file is optional. When
//! given, it is TOML with durations in milliseconds:
//!
//! ```toml
//! throttle_window = 500
//! poll_interval = 1000
//! position_jump = 5000
//! initial_volume = 0.5
//! device_name = "living room"
//! api_url = "https://api.spotify.com/v1/"
//! ```

use std::{fs, path::Path, time::Duration};

use serde::Deserialize;
use serde_with::{serde_as, DurationMilliSeconds};
use url::Url;

use crate::{
    error::{Error, Result},
    state::Volume,
};

#[serde_as]
#[derive(Clone, Debug, PartialEq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Config {
    #[serde(skip)]
    pub app_name: String,
    #[serde(skip)]
    pub app_version: String,
    #[serde(skip)]
    pub app_lang: String,

    /// Window within which notifications are coalesced into one emission.
    #[serde_as(as = "DurationMilliSeconds<u64>")]
    pub throttle_window: Duration,

    /// Interval between samples taken to detect external control.
    #[serde_as(as = "DurationMilliSeconds<u64>")]
    pub poll_interval: Duration,

    /// Position change between two samples beyond which playback must have
    /// been moved by someone else.
    #[serde_as(as = "DurationMilliSeconds<u64>")]
    pub position_jump: Duration,

    /// Volume until the host sets one.
    pub initial_volume: Volume,

    /// Name of the device to control.
    pub device_name: String,

    /// Base URL of the remote control web API. Must end with a slash.
    pub api_url: Url,
}

impl Config {
    /// Configuration files are small; anything larger is refused unread.
    const MAX_FILE_SIZE: u64 = 64 * 1024;

    /// Loads a configuration file, falling back to defaults for anything
    /// that it does not set.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read, is too large or is not
    /// valid TOML for this configuration.
    pub fn from_file<P>(path: P) -> Result<Self>
    where
        P: AsRef<Path>,
    {
        let path = path.as_ref();
        let file_size = fs::metadata(path)?.len();
        if file_size > Self::MAX_FILE_SIZE {
            return Err(Error::out_of_range(format!(
                "{} is too large ({file_size} bytes)",
                path.display()
            )));
        }

        let contents = fs::read_to_string(path)?;
        contents.parse()
    }

    /// Builds the `User-Agent` string, served like a desktop client.
    ///
    /// # Errors
    ///
    /// Returns `InvalidArgument` if the application or OS name, version or
    /// language contain characters that would break the header format.
    pub fn user_agent(&self) -> Result<String> {
        let app_name = &self.app_name;
        let app_version = &self.app_version;
        let app_lang = &self.app_lang;

        // Additional `User-Agent` string checks on top of `reqwest::HeaderValue`.
        let illegal_chars = |chr| chr == '/' || chr == ';';
        if app_name.is_empty()
            || app_name.contains(illegal_chars)
            || app_version.is_empty()
            || app_version.contains(illegal_chars)
            || app_lang.chars().count() != 2
            || app_lang.contains(illegal_chars)
        {
            return Err(Error::invalid_argument(format!(
                "application name, version and/or language invalid (\"{app_name}\"; \"{app_version}\"; \"{app_lang}\")"
            )));
        }

        let os_name = match std::env::consts::OS {
            "macos" => "osx",
            other => other,
        };
        let os_version = sysinfo::System::os_version().unwrap_or_else(|| String::from("0"));
        if os_name.is_empty()
            || os_name.contains(illegal_chars)
            || os_version.is_empty()
            || os_version.contains(illegal_chars)
        {
            return Err(Error::invalid_argument(format!(
                "os name and/or version invalid (\"{os_name}\"; \"{os_version}\")"
            )));
        }

        Ok(format!(
            "{app_name}/{app_version} (Rust; {os_name}/{os_version}; Desktop; {app_lang})"
        ))
    }
}

impl std::str::FromStr for Config {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        let config: Self = toml::from_str(s)?;
        if config.poll_interval.is_zero() || config.throttle_window.is_zero() {
            return Err(Error::invalid_argument(
                "poll interval and throttle window must be non-zero",
            ));
        }

        if !config.api_url.path().ends_with('/') {
            return Err(Error::invalid_argument(format!(
                "api url must end with a slash: {}",
                config.api_url
            )));
        }

        Ok(config)
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            app_name: env!("CARGO_PKG_NAME").to_owned(),
            app_version: env!("CARGO_PKG_VERSION").to_owned(),
            app_lang: "en".to_owned(),

            throttle_window: Duration::from_millis(500),
            poll_interval: Duration::from_millis(1000),
            position_jump: Duration::from_millis(5000),

            initial_volume: Volume::from_ratio(0.5),

            device_name: env!("CARGO_PKG_NAME").to_owned(),

            api_url: Url::parse("https://api.spotify.com/v1/").expect("default api url is invalid"),
        }
    }
}
