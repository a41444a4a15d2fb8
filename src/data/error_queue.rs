use snafu::Snafu;
use std::{fmt, str::FromStr};

/// One entry popped from the instrument's error queue with `SYSTem:ERRor?`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ErrorQueueEntry {
    /// The queue was empty (`0,"No error"`).
    NoError,
    Error { code: i32, message: String },
}

impl ErrorQueueEntry {
    pub fn is_error(&self) -> bool {
        matches!(self, ErrorQueueEntry::Error { .. })
    }
}

#[derive(Debug, Snafu)]
#[snafu(display("malformed error queue entry {text:?}"))]
pub struct ParseErrorQueueEntryError {
    text: String,
}

impl FromStr for ErrorQueueEntry {
    type Err = ParseErrorQueueEntryError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        let (code, message) = s.split_once(',').unwrap_or((s, ""));

        let Ok(code) = code.trim().parse::<i32>() else {
            return ParseErrorQueueEntrySnafu { text: s }.fail();
        };

        if code == 0 {
            return Ok(ErrorQueueEntry::NoError);
        }

        let message = message.trim().trim_matches('"').to_owned();
        Ok(ErrorQueueEntry::Error { code, message })
    }
}

impl fmt::Display for ErrorQueueEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ErrorQueueEntry::NoError => f.write_str("0,\"No error\""),
            ErrorQueueEntry::Error { code, message } => write!(f, "{code},\"{message}\""),
        }
    }
}
