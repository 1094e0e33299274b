//! Commands from the host and the replies to them.
//!
//! Commands arrive as a name plus optional JSON arguments:
//!
//! ```json
//! {"name": "play", "args": {"uris": ["spotify:track:4uLU6hMCjMI75M1A2tKUQC"]}}
//! {"name": "seek", "args": {"positionMs": 30000}}
//! {"name": "pause"}
//! ```
//!
//! Every command yields a [`Reply`]; failures never cross the boundary in
//! any other way.

use std::{fmt, sync::LazyLock};

use regex_lite::Regex;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{Error, Result};

#[derive(Clone, Debug, PartialEq, Deserialize)]
#[serde(tag = "name", content = "args", rename_all = "camelCase")]
pub enum Command {
    Connect,
    Play {
        uris: Vec<String>,
    },
    Pause,
    Resume,
    #[serde(rename_all = "camelCase")]
    Seek {
        position_ms: u64,
    },
    SetVolume {
        volume: f64,
    },
    GetState,
}

impl Command {
    /// Parses a command from its name and arguments.
    ///
    /// # Errors
    ///
    /// Returns `InvalidArgument` for unknown names and malformed arguments.
    pub fn parse(name: &str, args: Option<Value>) -> Result<Self> {
        let mut object = serde_json::Map::new();
        object.insert("name".to_owned(), Value::String(name.to_owned()));
        if let Some(args) = args.filter(|args| !args.is_null()) {
            object.insert("args".to_owned(), args);
        }

        serde_json::from_value(Value::Object(object))
            .map_err(|e| Error::invalid_argument(format!("command {name}: {e}")))
    }
}

impl fmt::Display for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Connect => write!(f, "connect"),
            Self::Play { uris } => write!(f, "play {} item(s)", uris.len()),
            Self::Pause => write!(f, "pause"),
            Self::Resume => write!(f, "resume"),
            Self::Seek { position_ms } => write!(f, "seek to {position_ms} ms"),
            Self::SetVolume { volume } => write!(f, "set volume to {volume}"),
            Self::GetState => write!(f, "get state"),
        }
    }
}

static PLAYABLE_URI: LazyLock<std::result::Result<Regex, regex_lite::Error>> =
    LazyLock::new(|| Regex::new(r"^spotify:(track|episode):[0-9A-Za-z]{22}$"));

/// Checks that `uris` is a non-empty list of playable item URIs.
///
/// # Errors
///
/// Returns `InvalidArgument` naming the first offending URI.
pub fn validate_uris(uris: &[String]) -> Result<()> {
    if uris.is_empty() {
        return Err(Error::invalid_argument("no tracks to play"));
    }

    let pattern = PLAYABLE_URI
        .as_ref()
        .map_err(|e| Error::internal(e.to_string()))?;
    match uris.iter().find(|uri| !pattern.is_match(uri)) {
        Some(uri) => Err(Error::invalid_argument(format!("invalid track uri: {uri}"))),
        None => Ok(()),
    }
}

/// Result of a command as seen by the host.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct Reply {
    pub success: bool,

    /// Error name, one of the categories of [`Error::category`].
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,

    /// Human-readable error details.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,

    /// Command output. Present but `null` when a command has output but
    /// nothing to report.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

impl Reply {
    #[must_use]
    pub fn ok() -> Self {
        Self {
            success: true,
            error: None,
            message: None,
            data: None,
        }
    }

    #[must_use]
    pub fn with_data(data: Value) -> Self {
        Self {
            data: Some(data),
            ..Self::ok()
        }
    }

    #[must_use]
    pub fn failure(error: &Error) -> Self {
        Self {
            success: false,
            error: Some(error.category().to_owned()),
            message: Some(error.to_string()),
            data: None,
        }
    }
}

impl From<Result<Option<Value>>> for Reply {
    fn from(result: Result<Option<Value>>) -> Self {
        match result {
            Ok(Some(data)) => Self::with_data(data),
            Ok(None) => Self::ok(),
            Err(e) => Self::failure(&e),
        }
    }
}
