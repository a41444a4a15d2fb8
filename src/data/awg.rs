use snafu::{OptionExt, ResultExt, Snafu};
use std::{fmt, num::ParseIntError, str::FromStr};
use strum::{Display, EnumCount, EnumIter, EnumString};

/// Sequencer run mode, `AWGControl:RMODe`.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, EnumString, EnumIter, EnumCount, Display)]
#[strum(ascii_case_insensitive)]
pub enum RunMode {
    /// Each entry loops its repetition count, the whole sequence repeats forever.
    #[default]
    #[strum(to_string = "CONT", serialize = "CONTINUOUS")]
    Continuous,
    /// Waits for a trigger, then plays the sequence `burst count` times.
    #[strum(to_string = "BURS", serialize = "BURST")]
    Burst,
    /// Waits for a trigger, then behaves like [`RunMode::Continuous`].
    #[strum(to_string = "TCON", serialize = "TCONTINUOUS")]
    TriggeredContinuous,
    /// Waits for a trigger before every sequence entry.
    #[strum(to_string = "STEP", serialize = "STEPPED")]
    Stepped,
    /// Sequence execution driven by jump/goto entries.
    #[strum(to_string = "ADVA", serialize = "ADVANCED")]
    Advanced,
}

/// Sequencer state, `AWGControl:RSTATe?`.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Display)]
pub enum RunState {
    #[default]
    Stopped,
    WaitingForTrigger,
    Running,
}

impl RunState {
    pub fn code(self) -> u8 {
        match self {
            RunState::Stopped => 0,
            RunState::WaitingForTrigger => 1,
            RunState::Running => 2,
        }
    }
}

#[derive(Debug, Snafu)]
pub enum ParseRunStateError {
    #[snafu(display("run state is not a number: {text:?}"))]
    NotANumber {
        text: String,
        source: ParseIntError,
    },
    #[snafu(display("unknown run state code {code}"))]
    UnknownCode { code: u8 },
}

impl FromStr for RunState {
    type Err = ParseRunStateError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let code = s
            .trim()
            .parse::<u8>()
            .context(NotANumberSnafu { text: s })?;

        match code {
            0 => Ok(RunState::Stopped),
            1 => Ok(RunState::WaitingForTrigger),
            2 => Ok(RunState::Running),
            code => UnknownCodeSnafu { code }.fail(),
        }
    }
}

/// How voltage ranges are entered on the front panel, `DISPlay:UNIT:VOLT`.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, EnumString, Display)]
pub enum VoltageUnit {
    /// Amplitude and offset.
    #[default]
    #[strum(serialize = "AMPL")]
    AmplitudeOffset,
    /// High and low level.
    #[strum(serialize = "HIGH")]
    HighLow,
}

/// Repetitions of a sequence element, `SEQuence:ELEM1:LOOP:COUNt`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoopCount {
    Finite(u32),
    Infinite,
}

impl Default for LoopCount {
    fn default() -> Self {
        LoopCount::Finite(1)
    }
}

impl fmt::Display for LoopCount {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LoopCount::Finite(n) => n.fmt(f),
            LoopCount::Infinite => f.write_str("INFinite"),
        }
    }
}

impl FromStr for LoopCount {
    type Err = ParseIntError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        if s.eq_ignore_ascii_case("INF") || s.eq_ignore_ascii_case("INFINITE") {
            return Ok(LoopCount::Infinite);
        }
        s.parse().map(LoopCount::Finite)
    }
}

/// Parsed `*IDN?` answer: `<manufacturer>,<model>,<serial>,<firmware>`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Identity {
    pub manufacturer: String,
    pub model: String,
    pub serial: String,
    pub firmware: String,
}

#[derive(Debug, Snafu)]
#[snafu(display("malformed identification string {text:?}"))]
pub struct ParseIdentityError {
    text: String,
}

impl FromStr for Identity {
    type Err = ParseIdentityError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut fields = s.trim().splitn(4, ',').map(str::trim);
        let mut next = || {
            fields
                .next()
                .filter(|f| !f.is_empty())
                .map(str::to_owned)
                .context(ParseIdentitySnafu { text: s })
        };

        Ok(Identity {
            manufacturer: next()?,
            model: next()?,
            serial: next()?,
            firmware: next()?,
        })
    }
}

impl fmt::Display for Identity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{},{},{},{}",
            self.manufacturer, self.model, self.serial, self.firmware
        )
    }
}
