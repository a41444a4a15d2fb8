use crate::scaled_number::{ScaledNumber, ScaledNumberExt};
use serde_with::DeserializeFromStr;
use std::{fmt::Display, str::FromStr};

macro_rules! decl_unit {
    ($name:ident, $suffixes:expr, $unit:literal, $what:literal) => {
        #[derive(Debug, Clone, Copy, Default, PartialEq, PartialOrd, DeserializeFromStr)]
        pub struct $name(pub f64);

        impl FromStr for $name {
            type Err = &'static str;

            /// Accepts the unit suffix with an optional SI prefix (`1.2GSa/s`,
            /// `250 mV`) as well as a bare number in base units.
            fn from_str(s: &str) -> Result<Self, Self::Err> {
                let s = s.trim();
                let s = $suffixes
                    .iter()
                    .find_map(|suffix: &&str| s.strip_suffix(*suffix))
                    .unwrap_or(s);

                f64::parse_scaled(s)
                    .map(Self)
                    .ok_or(concat!("invalid ", $what))
            }
        }

        impl Display for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                ScaledNumber::from(self.0).fmt(f)?;
                f.write_str($unit)
            }
        }
    };
}

decl_unit!(Voltage, ["V", "v"], "V", "voltage");
decl_unit!(Frequency, ["Hz", "hz"], "Hz", "frequency");
decl_unit!(SamplingRate, ["Sa/s", "S/s"], "Sa/s", "sampling rate");

impl Voltage {
    pub const MILLIVOLT: Voltage = Voltage(1e-3);
}

impl SamplingRate {
    /// Playback frequency of a waveform of `len` samples looped at this rate.
    pub fn repetition_frequency(self, len: usize) -> Option<Frequency> {
        (len > 0).then(|| Frequency(self.0 / len as f64))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_units_with_and_without_suffix() {
        assert_eq!("2V".parse::<Voltage>(), Ok(Voltage(2.0)));
        assert_eq!("-1.5".parse::<Voltage>(), Ok(Voltage(-1.5)));
        assert_eq!("100 Hz".parse::<Frequency>(), Ok(Frequency(100.0)));
        assert_eq!("1GSa/s".parse::<SamplingRate>(), Ok(SamplingRate(1e9)));
        assert!("fast".parse::<SamplingRate>().is_err());
    }

    #[test]
    fn displays_scaled() {
        assert_eq!(Voltage(0.5).to_string(), "500.0mV");
        assert_eq!(SamplingRate(1.2e9).to_string(), "1.200GSa/s");
    }

    #[test]
    fn repetition_frequency_of_waveform() {
        assert_eq!(
            SamplingRate(1e6).repetition_frequency(1000),
            Some(Frequency(1000.0))
        );
        assert_eq!(SamplingRate(1e6).repetition_frequency(0), None);
    }
}
