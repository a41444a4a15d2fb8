use crate::{consts, limits::InstrumentLimits};
use serde::Deserialize;
use snafu::{ResultExt, Snafu};
use std::{path::Path, time::Duration};

/// Everything a [`Session`](crate::session::Session) needs besides the link.
///
/// Deserializes from JSON; every field is optional:
///
/// ```json
/// {
///     "timeout_ms": 2000,
///     "upload_folder": "D:/waveforms/",
///     "limits": { "max_waveform_len": 1000000 }
/// }
/// ```
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    /// Acknowledgement timeout for every query, and the connect timeout.
    #[serde(rename = "timeout_ms", with = "millis")]
    pub timeout: Duration,
    #[serde(rename = "min_pause_ms", with = "millis")]
    pub min_pause: Duration,
    pub upload_folder: String,
    pub limits: InstrumentLimits,
    /// Ask the instrument for its waveform memory size when opening.
    pub query_limits: bool,
    /// Drain the error queue after every setting and fail on the first entry.
    pub check_errors: bool,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            timeout: consts::DEFAULT_TIMEOUT,
            min_pause: consts::MIN_COMMAND_PAUSE,
            upload_folder: consts::DEFAULT_UPLOAD_FOLDER.to_owned(),
            limits: InstrumentLimits::default(),
            query_limits: true,
            check_errors: true,
        }
    }
}

#[derive(Debug, Snafu)]
pub enum ConfigError {
    #[snafu(display("could not read {}", path.display()))]
    Read {
        path: std::path::PathBuf,
        source: std::io::Error,
    },
    #[snafu(display("invalid session config"))]
    Json { source: serde_json::Error },
}

impl SessionConfig {
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn from_json(s: &str) -> Result<Self, ConfigError> {
        serde_json::from_str(s).context(JsonSnafu)
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).context(ReadSnafu { path })?;
        Self::from_json(&text)
    }
}

mod millis {
    use serde::{Deserialize, Deserializer};
    use std::time::Duration;

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        u64::deserialize(d).map(Duration::from_millis)
    }
}
