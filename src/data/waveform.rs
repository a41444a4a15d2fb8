use std::fmt::Write;

/// Named sample sequence, normalized to `[-1.0, 1.0]`.
///
/// Uploading a waveform replaces the instrument's copy of the same name
/// wholesale; there are no partial edits.
#[derive(Debug, Clone, PartialEq)]
pub struct Waveform {
    pub name: String,
    pub samples: Vec<f64>,
}

impl Waveform {
    pub fn new(name: impl Into<String>, samples: impl Into<Vec<f64>>) -> Self {
        Self {
            name: name.into(),
            samples: samples.into(),
        }
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    /// Index and value of the first sample that is not finite or outside
    /// `[-1.0, 1.0]`.
    pub fn first_out_of_range(&self) -> Option<(usize, f64)> {
        first_out_of_range(&self.samples)
    }

    /// Text file contents the instrument imports: one sample per line,
    /// `\r\n` separated, no trailing separator.
    pub fn text_payload(&self) -> String {
        text_payload(&self.samples)
    }
}

pub(crate) fn first_out_of_range(samples: &[f64]) -> Option<(usize, f64)> {
    samples
        .iter()
        .copied()
        .enumerate()
        .find(|(_, s)| !s.is_finite() || s.abs() > 1.0)
}

pub(crate) fn text_payload(samples: &[f64]) -> String {
    let mut out = String::with_capacity(samples.len() * 8);
    for (i, sample) in samples.iter().enumerate() {
        if i > 0 {
            out.push_str("\r\n");
        }
        // writing into a String can't fail
        let _ = write!(out, "{sample}");
    }
    out
}

/// Names end up inside quoted SCPI strings and file paths on the instrument.
pub fn is_valid_name(name: &str) -> bool {
    !name.is_empty()
        && name.len() <= 64
        && name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-')
}
