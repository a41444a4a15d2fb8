use super::units::{Frequency, SamplingRate, Voltage};
use std::fmt;
use strum::{Display, EnumString};

/// 1-based output channel index as printed on the front panel.
///
/// A `ChannelId` says nothing about whether the connected instrument actually
/// has that many outputs; the session checks that against its limits.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ChannelId(pub u8);

impl ChannelId {
    pub const CH1: ChannelId = ChannelId(1);
    pub const CH2: ChannelId = ChannelId(2);

    /// Zero-based slot, `None` for the invalid channel 0.
    pub fn index(self) -> Option<usize> {
        (self.0 as usize).checked_sub(1)
    }

    /// Name the session gives uploaded waveforms when the caller doesn't pick one.
    pub fn default_waveform_name(self) -> String {
        format!("temp{}", self.0)
    }
}

impl fmt::Display for ChannelId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

impl From<u8> for ChannelId {
    fn from(n: u8) -> Self {
        ChannelId(n)
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Display, EnumString)]
#[strum(serialize_all = "UPPERCASE")]
pub enum OutputState {
    On,
    #[default]
    Off,
}

impl OutputState {
    /// Parses both the keyword and the numeric (`0`/`1`) answer form.
    pub fn from_response(s: &str) -> Option<Self> {
        match s.trim() {
            "1" => Some(OutputState::On),
            "0" => Some(OutputState::Off),
            other => other.to_ascii_uppercase().parse().ok(),
        }
    }
}

impl From<OutputState> for bool {
    fn from(s: OutputState) -> Self {
        s == OutputState::On
    }
}

impl From<bool> for OutputState {
    fn from(b: bool) -> Self {
        if b {
            OutputState::On
        } else {
            OutputState::Off
        }
    }
}

/// Load impedance the instrument assumes when it reports output voltages.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Display, EnumString)]
pub enum OutputLoad {
    #[default]
    #[strum(to_string = "50Ohm", serialize = "50OHM", serialize = "50")]
    FiftyOhm,
    #[strum(serialize = "LOW")]
    Low,
}

/// Parameters applied by `Session::configure_channel`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ChannelConfig {
    /// Peak-to-peak amplitude.
    pub amplitude: Voltage,
    pub offset: Voltage,
    /// Repetition frequency of the channel's waveform, if it should be forced.
    pub frequency: Option<Frequency>,
    /// Sampling clock. The T3AWG3252 shares one clock between both channels.
    pub sample_rate: SamplingRate,
}

impl ChannelConfig {
    pub fn high(&self) -> Voltage {
        Voltage(self.offset.0 + self.amplitude.0 / 2.0)
    }

    pub fn low(&self) -> Voltage {
        Voltage(self.offset.0 - self.amplitude.0 / 2.0)
    }
}

impl Default for ChannelConfig {
    fn default() -> Self {
        Self {
            amplitude: Voltage(2.0),
            offset: Voltage(0.0),
            frequency: None,
            sample_rate: SamplingRate(1e9),
        }
    }
}

/// What the session last told the instrument about one channel.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ChannelState {
    pub config: Option<ChannelConfig>,
    pub output: OutputState,
    pub load: Option<OutputLoad>,
    pub waveform: Option<String>,
    pub waveform_len: Option<usize>,
}

/// Channel parameters as read back from the instrument.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ChannelReadback {
    pub amplitude: Voltage,
    pub offset: Voltage,
    pub sample_rate: SamplingRate,
    pub output: OutputState,
}
