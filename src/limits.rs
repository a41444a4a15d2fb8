//! Instrument bounds and the checks the session runs before sending anything.

use crate::{
    consts,
    data::{
        channel::{ChannelConfig, ChannelId},
        units::{Frequency, SamplingRate, Voltage},
        waveform,
    },
};
use serde::Deserialize;
use snafu::{ensure, Snafu};

#[derive(Debug, Clone, Copy, PartialEq, Deserialize)]
#[serde(default, rename_all = "snake_case")]
pub struct InstrumentLimits {
    pub channels: u8,
    pub voltage_min: Voltage,
    pub voltage_max: Voltage,
    pub min_amplitude: Voltage,
    pub sample_rate_min: SamplingRate,
    pub sample_rate_max: SamplingRate,
    pub max_waveform_len: usize,
}

impl Default for InstrumentLimits {
    fn default() -> Self {
        Self {
            channels: consts::CHANNEL_COUNT,
            voltage_min: Voltage(consts::VOLTAGE_MIN),
            voltage_max: Voltage(consts::VOLTAGE_MAX),
            min_amplitude: Voltage(consts::MIN_AMPLITUDE),
            sample_rate_min: SamplingRate(consts::SAMPLE_RATE_MIN),
            sample_rate_max: SamplingRate(consts::SAMPLE_RATE_MAX),
            max_waveform_len: consts::DEFAULT_MAX_WAVEFORM_LEN,
        }
    }
}

#[derive(Debug, Snafu, PartialEq)]
pub enum ValidationError {
    #[snafu(display("channel {channel} out of range 1..={channels}"))]
    ChannelOutOfRange { channel: ChannelId, channels: u8 },
    #[snafu(display("{what} {value} outside {min}..={max}"))]
    VoltageOutOfRange {
        what: &'static str,
        value: Voltage,
        min: Voltage,
        max: Voltage,
    },
    #[snafu(display("high level {high} must exceed low level {low} by at least {min}"))]
    WindowTooNarrow {
        high: Voltage,
        low: Voltage,
        min: Voltage,
    },
    #[snafu(display("sample rate {rate} outside {min}..={max}"))]
    SampleRateOutOfRange {
        rate: SamplingRate,
        min: SamplingRate,
        max: SamplingRate,
    },
    #[snafu(display("frequency {frequency} must be positive and finite"))]
    InvalidFrequency { frequency: Frequency },
    #[snafu(display("waveform is empty"))]
    EmptyWaveform,
    #[snafu(display("sample {index} = {value} is not within [-1, 1]"))]
    SampleOutOfRange { index: usize, value: f64 },
    #[snafu(display("invalid waveform name {name:?}"))]
    InvalidName { name: String },
}

#[derive(Debug, Snafu, PartialEq, Eq)]
#[snafu(display("waveform of {samples} samples exceeds the instrument memory of {max} samples"))]
pub struct CapacityError {
    pub samples: usize,
    pub max: usize,
}

impl InstrumentLimits {
    pub fn check_channel(&self, channel: ChannelId) -> Result<(), ValidationError> {
        ensure!(
            (1..=self.channels).contains(&channel.0),
            ChannelOutOfRangeSnafu {
                channel,
                channels: self.channels
            }
        );
        Ok(())
    }

    pub fn check_level(&self, what: &'static str, value: Voltage) -> Result<(), ValidationError> {
        ensure!(
            value.0.is_finite() && value >= self.voltage_min && value <= self.voltage_max,
            VoltageOutOfRangeSnafu {
                what,
                value,
                min: self.voltage_min,
                max: self.voltage_max
            }
        );
        Ok(())
    }

    /// High/low pair as used by `SEQuence:ELEM1:VOLTage:HIGH<n>`/`LOW<n>`.
    pub fn check_window(&self, high: Voltage, low: Voltage) -> Result<(), ValidationError> {
        self.check_level("high level", high)?;
        self.check_level("low level", low)?;
        // tolerate float noise from amplitude/offset arithmetic
        ensure!(
            high.0 - low.0 >= self.min_amplitude.0 - 1e-12,
            WindowTooNarrowSnafu {
                high,
                low,
                min: self.min_amplitude
            }
        );
        Ok(())
    }

    pub fn check_sample_rate(&self, rate: SamplingRate) -> Result<(), ValidationError> {
        ensure!(
            rate.0.is_finite() && rate >= self.sample_rate_min && rate <= self.sample_rate_max,
            SampleRateOutOfRangeSnafu {
                rate,
                min: self.sample_rate_min,
                max: self.sample_rate_max
            }
        );
        Ok(())
    }

    pub fn check_channel_config(
        &self,
        channel: ChannelId,
        config: &ChannelConfig,
    ) -> Result<(), ValidationError> {
        self.check_channel(channel)?;
        ensure!(
            config.amplitude.0.is_finite() && config.offset.0.is_finite(),
            VoltageOutOfRangeSnafu {
                what: "amplitude/offset",
                value: if config.amplitude.0.is_finite() {
                    config.offset
                } else {
                    config.amplitude
                },
                min: self.voltage_min,
                max: self.voltage_max
            }
        );
        self.check_window(config.high(), config.low())?;
        self.check_sample_rate(config.sample_rate)?;
        if let Some(frequency) = config.frequency {
            ensure!(
                frequency.0.is_finite() && frequency.0 > 0.0,
                InvalidFrequencySnafu { frequency }
            );
        }
        Ok(())
    }

    /// Sample count only; nothing about the values.
    pub fn check_capacity(&self, samples: usize) -> Result<(), CapacityError> {
        ensure!(
            samples <= self.max_waveform_len,
            CapacitySnafu {
                samples,
                max: self.max_waveform_len
            }
        );
        Ok(())
    }

    pub fn check_samples(&self, name: &str, samples: &[f64]) -> Result<(), ValidationError> {
        ensure!(
            waveform::is_valid_name(name),
            InvalidNameSnafu { name }
        );
        ensure!(!samples.is_empty(), EmptyWaveformSnafu);
        if let Some((index, value)) = waveform::first_out_of_range(samples) {
            return SampleOutOfRangeSnafu { index, value }.fail();
        }
        Ok(())
    }
}
