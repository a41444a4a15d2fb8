//! SCPI rendering of everything the session sends.
//!
//! Headers are written in the mixed-case form of the T3AWG3000 programming
//! manual; the instrument accepts either the short (upper-case) or the full
//! keyword.

use crate::data::{
    awg::{LoopCount, RunMode, VoltageUnit},
    channel::{ChannelId, OutputLoad, OutputState},
    units::{Frequency, SamplingRate, Voltage},
};
use std::fmt::{self, Display};

#[derive(Debug, Clone, PartialEq)]
pub enum AwgCommand<'a> {
    Run,
    Stop,
    Trigger,
    SetRunMode(RunMode),
    SetSampleRate(SamplingRate),
    SetVoltageUnit(VoltageUnit),
    SetOutput(ChannelId, OutputState),
    SetOutputLoad(ChannelId, OutputLoad),
    SetAmplitude(ChannelId, Voltage),
    SetOffset(ChannelId, Voltage),
    SetVoltageHigh(ChannelId, Voltage),
    SetVoltageLow(ChannelId, Voltage),
    SetFrequency(ChannelId, Frequency),
    SetLength(usize),
    SetLoopCount(LoopCount),
    SelectWaveform(ChannelId, &'a str),
    /// Target file of the next `MMEMory:DOWNload:DATA` block.
    DownloadFileName { folder: &'a str, name: &'a str },
    DeleteWaveform(&'a str),
    ImportWaveform { folder: &'a str, name: &'a str },
}

impl Display for AwgCommand<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AwgCommand::Run => f.write_str("AWGControl:RUN"),
            AwgCommand::Stop => f.write_str("AWGControl:STOP"),
            AwgCommand::Trigger => f.write_str("*TRG"),
            AwgCommand::SetRunMode(mode) => write!(f, "AWGControl:RMODe {mode}"),
            AwgCommand::SetSampleRate(rate) => write!(f, "AWGControl:SRATe {}", rate.0),
            AwgCommand::SetVoltageUnit(unit) => write!(f, "DISPlay:UNIT:VOLT {unit}"),
            AwgCommand::SetOutput(ch, state) => write!(f, "OUTPut{ch}:STATe {state}"),
            AwgCommand::SetOutputLoad(ch, load) => {
                write!(f, "OUTPut{ch}:SERIESIMPedance {load}")
            }
            AwgCommand::SetAmplitude(ch, v) => write!(f, "SEQuence:ELEM1:AMPlitude{ch} {}", v.0),
            AwgCommand::SetOffset(ch, v) => write!(f, "SEQuence:ELEM1:OFFset{ch} {}", v.0),
            AwgCommand::SetVoltageHigh(ch, v) => {
                write!(f, "SEQuence:ELEM1:VOLTage:HIGH{ch} {}", v.0)
            }
            AwgCommand::SetVoltageLow(ch, v) => {
                write!(f, "SEQuence:ELEM1:VOLTage:LOW{ch} {}", v.0)
            }
            AwgCommand::SetFrequency(ch, freq) => write!(f, "SOURce{ch}:FREQuency {}", freq.0),
            AwgCommand::SetLength(len) => write!(f, "SEQuence:ELEM1:LENGth {len}"),
            AwgCommand::SetLoopCount(count) => write!(f, "SEQuence:ELEM1:LOOP:COUNt {count}"),
            AwgCommand::SelectWaveform(ch, name) => {
                write!(f, "SEQuence:ELEM1:WAVeform{ch} \"{name}\"")
            }
            AwgCommand::DownloadFileName { folder, name } => write!(
                f,
                "MMEMory:DOWNload:FNAMe \"{}/{name}.txt\"",
                folder.trim_end_matches('/')
            ),
            AwgCommand::DeleteWaveform(name) => write!(f, "WLISt:WAVeform:DELete \"{name}\""),
            AwgCommand::ImportWaveform { folder, name } => write!(
                f,
                "WLISt:WAVeform:IMPort \"{name}\",\"{}/{name}.txt\",ANAlog",
                folder.trim_end_matches('/')
            ),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AwgQuery {
    Identify,
    OperationComplete,
    RunState,
    RunMode,
    SampleRate,
    Output(ChannelId),
    Amplitude(ChannelId),
    Offset(ChannelId),
    Length,
    /// Largest element length the sequencer accepts.
    MaxLength,
    NextError,
}

impl Display for AwgQuery {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AwgQuery::Identify => f.write_str("*IDN?"),
            AwgQuery::OperationComplete => f.write_str("*OPC?"),
            AwgQuery::RunState => f.write_str("AWGControl:RSTATe?"),
            AwgQuery::RunMode => f.write_str("AWGControl:RMODe?"),
            AwgQuery::SampleRate => f.write_str("AWGControl:SRATe?"),
            AwgQuery::Output(ch) => write!(f, "OUTPut{ch}:STATe?"),
            AwgQuery::Amplitude(ch) => write!(f, "SEQuence:ELEM1:AMPlitude{ch}?"),
            AwgQuery::Offset(ch) => write!(f, "SEQuence:ELEM1:OFFset{ch}?"),
            AwgQuery::Length => f.write_str("SEQuence:ELEM1:LENGth?"),
            AwgQuery::MaxLength => f.write_str("SEQuence:ELEM1:LENGth? MAXimum"),
            AwgQuery::NextError => f.write_str("SYSTem:ERRor?"),
        }
    }
}

/// `MMEMory:DOWNload:DATA` followed by an IEEE 488.2 definite-length block.
///
/// Returns `None` if the payload length needs more than 9 digits.
pub fn download_data(payload: &[u8]) -> Option<Vec<u8>> {
    let header = definite_length_header(payload.len())?;
    let mut out = Vec::with_capacity(22 + header.len() + payload.len());
    out.extend_from_slice(b"MMEMory:DOWNload:DATA ");
    out.extend_from_slice(header.as_bytes());
    out.extend_from_slice(payload);
    Some(out)
}

/// `#<digit count><length>`, e.g. `#3128` for 128 bytes.
pub fn definite_length_header(len: usize) -> Option<String> {
    let digits = len.to_string();
    (digits.len() <= 9).then(|| format!("#{}{digits}", digits.len()))
}
