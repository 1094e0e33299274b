//! Access credential supplied by the host.
//!
//! The credential is an opaque bearer token. It is kept out of logs: its
//! `Debug` output is redacted and it has no `Display` implementation.
//!
//! For the command line, it can be stored in a secrets file:
//!
//! ```toml
//! token = "BQD...xyz"
//! ```

use std::{fs, path::Path, str::FromStr};

use serde::Deserialize;
use veil::Redact;

use crate::error::{Error, Result};

#[derive(Clone, PartialEq, Eq, Redact)]
#[redact(all)]
pub struct Credential(String);

impl Credential {
    /// Secrets files are tiny; refuse to read anything larger.
    const MAX_FILE_SIZE: u64 = 4096;

    /// Loads the credential from a secrets file.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read, is too large, is not
    /// valid TOML, or contains no valid `token`.
    pub fn from_file<P>(path: P) -> Result<Self>
    where
        P: AsRef<Path>,
    {
        #[derive(Deserialize)]
        struct Secrets {
            token: Option<String>,
        }

        // Prevent out-of-memory condition: secrets file should be small.
        let path = path.as_ref();
        let file_size = fs::metadata(path)?.len();
        if file_size > Self::MAX_FILE_SIZE {
            return Err(Error::out_of_range(format!(
                "{} is too large ({file_size} bytes)",
                path.display()
            )));
        }

        let contents = fs::read_to_string(path)?;
        let secrets: Secrets = toml::from_str(&contents)?;
        match secrets.token {
            Some(token) => token.parse(),
            None => Err(Error::not_found(format!(
                "{} does not contain a token",
                path.display()
            ))),
        }
    }

    /// The token, for use in an `Authorization` header.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl FromStr for Credential {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        let token = s.trim();
        if token.is_empty() {
            return Err(Error::invalid_argument("credential is empty"));
        }

        if token.chars().any(|chr| chr.is_whitespace() || chr.is_control()) {
            return Err(Error::invalid_argument(
                "credential contains whitespace or control characters",
            ));
        }

        Ok(Self(token.to_owned()))
    }
}
