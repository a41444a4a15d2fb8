//! T3AWG3252 figures the session falls back to when the instrument doesn't
//! advertise its own.

use std::time::Duration;

/// Raw SCPI socket port.
pub const DEFAULT_PORT: u16 = 5025;

pub const CHANNEL_COUNT: u8 = 2;
/// Upper bound on channels any supported model has, sizes the per-channel cache.
pub const MAX_CHANNELS: usize = 4;

/// High and low level must both stay within this window (V).
pub const VOLTAGE_MIN: f64 = -3.0;
pub const VOLTAGE_MAX: f64 = 3.0;
/// High must exceed low by at least this much (V).
pub const MIN_AMPLITUDE: f64 = 1e-3;

pub const SAMPLE_RATE_MIN: f64 = 1e3;
pub const SAMPLE_RATE_MAX: f64 = 1.2e9;

/// Samples per waveform, used until `SEQuence:ELEM1:LENGth? MAX` is answered.
pub const DEFAULT_MAX_WAVEFORM_LEN: usize = 16_000_000;

/// Where waveform text files are staged on the instrument's mass storage.
pub const DEFAULT_UPLOAD_FOLDER: &str = "C:/Users/awg3000/Pictures/Saved Pictures/";

pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(5);
/// The firmware drops commands that arrive back to back.
pub const MIN_COMMAND_PAUSE: Duration = Duration::from_millis(10);
