//! SI-prefixed number parsing and formatting (`1.2G`, `250m`, `10µ`).

use derive_more::From;
use std::{
    fmt::{Display, Write},
    str::FromStr,
};
use strum::FromRepr;

/// A plain number that is displayed with an SI prefix, e.g. `1.200G`.
///
/// Precision defaults to three significant decimals and can be overridden with
/// the usual `{:.N}` formatting. Alternate formatting (`{:#}`) prints `u`
/// instead of `µ` for micro.
#[derive(Debug, Clone, Copy, From, PartialEq)]
pub struct ScaledNumber(pub f64);

impl Display for ScaledNumber {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let (unscaled, scale) = self.0.unscale();
        let decimals = f.precision().unwrap_or(3);

        // keep the total digit count roughly constant: 1.234, 12.34, 123.4
        let prec = if unscaled == 0.0 {
            decimals
        } else {
            decimals.saturating_sub(unscaled.abs().log10().floor().max(0.0) as usize)
        };

        if f.sign_plus() {
            write!(f, "{unscaled:+.prec$}")?;
        } else {
            write!(f, "{unscaled:.prec$}")?;
        }

        scale.fmt(f)
    }
}

impl FromStr for ScaledNumber {
    type Err = &'static str;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        f64::parse_scaled(s)
            .map(ScaledNumber)
            .ok_or("invalid scaled number")
    }
}

pub trait ScaledNumberExt: Sized {
    fn from_scale(unscaled: f64, scale: SiScale) -> Self;
    fn unscale(self) -> (f64, SiScale);
    fn parse_scaled(s: &str) -> Option<Self>;
}

impl ScaledNumberExt for f64 {
    fn from_scale(unscaled: f64, scale: SiScale) -> Self {
        scale.apply_to(unscaled)
    }

    fn unscale(self) -> (f64, SiScale) {
        if self == 0.0 || !self.is_finite() {
            return (self, SiScale::None);
        }

        let exp = ((self.abs().log10() / 3.0).floor() * 3.0) as i32;
        let exp = exp.clamp(SiScale::Pico as i32, SiScale::Giga as i32);

        match SiScale::from_repr(exp as i8) {
            Some(scale) => (self * 10.0f64.powi(-exp), scale),
            None => (self, SiScale::None),
        }
    }

    fn parse_scaled(s: &str) -> Option<Self> {
        let s = s.trim();
        let last = s.chars().next_back()?;

        if last.is_ascii_digit() || last == '.' {
            return s.parse().ok();
        }

        let scale = SiScale::try_from(last).ok()?;
        let number = s[..s.len() - last.len_utf8()].trim_end();

        Some(scale.apply_to(number.parse().ok()?))
    }
}

#[derive(Debug, Default, FromRepr, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
#[repr(i8)]
pub enum SiScale {
    Pico = -12,
    Nano = -9,
    Micro = -6,
    Milli = -3,
    #[default]
    None = 0,
    Kilo = 3,
    Mega = 6,
    Giga = 9,
}

impl SiScale {
    pub fn apply_to(self, unscaled: f64) -> f64 {
        unscaled * 10.0f64.powi(self as i8 as i32)
    }
}

impl TryFrom<char> for SiScale {
    type Error = ();

    fn try_from(c: char) -> Result<Self, Self::Error> {
        match c {
            'p' => Ok(SiScale::Pico),
            'n' => Ok(SiScale::Nano),
            'u' | 'µ' => Ok(SiScale::Micro),
            'm' => Ok(SiScale::Milli),
            'k' | 'K' => Ok(SiScale::Kilo),
            'M' => Ok(SiScale::Mega),
            'G' => Ok(SiScale::Giga),
            _ => Err(()),
        }
    }
}

impl Display for SiScale {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let c = match self {
            SiScale::Pico => 'p',
            SiScale::Nano => 'n',
            SiScale::Micro if f.alternate() => 'u',
            SiScale::Micro => 'µ',
            SiScale::Milli => 'm',
            SiScale::None => return Ok(()),
            SiScale::Kilo => 'k',
            SiScale::Mega => 'M',
            SiScale::Giga => 'G',
        };

        f.write_char(c)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn approx(s: &str, expected: f64) {
        let parsed = f64::parse_scaled(s).unwrap();
        assert!(
            (parsed - expected).abs() <= expected.abs() * 1e-12,
            "{s} parsed as {parsed}, expected {expected}"
        );
    }

    #[test]
    fn parses_prefixed_values() {
        approx("1.2G", 1.2e9);
        approx("250 m", 0.25);
        approx("10µ", 10e-6);
        approx("-3", -3.0);
        assert_eq!(f64::parse_scaled("3x"), None);
        assert_eq!(f64::parse_scaled(""), None);
    }

    #[test]
    fn formats_with_prefix() {
        assert_eq!(ScaledNumber(1.2e9).to_string(), "1.200G");
        assert_eq!(ScaledNumber(0.0125).to_string(), "12.50m");
        assert_eq!(format!("{:#}", ScaledNumber(5e-6)), "5.000u");
        assert_eq!(ScaledNumber(0.0).to_string(), "0.000");
        assert_eq!(format!("{:+}", ScaledNumber(-2.0)), "-2.000");
    }
}
