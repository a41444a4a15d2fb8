//! In-process model of a T3AWG3252 speaking the same SCPI byte protocol.
//!
//! Only the subset of the command tree the session uses is modelled. Unknown
//! headers land in the error queue as `-113,"Undefined header"`, like on the
//! real instrument.

use crate::{
    consts,
    data::{
        awg::{LoopCount, RunMode, RunState, VoltageUnit},
        channel::OutputLoad,
    },
};
use log::debug;
use std::{
    collections::{HashMap, VecDeque},
    sync::{Arc, Mutex, MutexGuard, PoisonError},
};
use tokio::io::{
    duplex, AsyncBufReadExt, AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, BufReader,
    DuplexStream,
};

const UNDEFINED_HEADER: (i32, &str) = (-113, "Undefined header");
const DATA_TYPE_ERROR: (i32, &str) = (-104, "Data type error");
const SETTINGS_CONFLICT: (i32, &str) = (-221, "Settings conflict");
const DATA_OUT_OF_RANGE: (i32, &str) = (-222, "Data out of range");
const ILLEGAL_PARAMETER: (i32, &str) = (-224, "Illegal parameter value");
const FILE_NOT_FOUND: (i32, &str) = (-256, "File name not found");
const QUEUE_OVERFLOW: (i32, &str) = (-350, "Queue overflow");

const ERROR_QUEUE_LEN: usize = 16;

#[derive(Debug, Clone, PartialEq)]
pub struct SimChannel {
    pub output: bool,
    pub load: OutputLoad,
    pub high: f64,
    pub low: f64,
    pub frequency: Option<f64>,
    pub waveform: Option<String>,
}

impl SimChannel {
    pub fn amplitude(&self) -> f64 {
        self.high - self.low
    }

    pub fn offset(&self) -> f64 {
        (self.high + self.low) / 2.0
    }

    fn set_amplitude(&mut self, amplitude: f64) {
        let offset = self.offset();
        self.high = offset + amplitude / 2.0;
        self.low = offset - amplitude / 2.0;
    }

    fn set_offset(&mut self, offset: f64) {
        let amplitude = self.amplitude();
        self.high = offset + amplitude / 2.0;
        self.low = offset - amplitude / 2.0;
    }
}

impl Default for SimChannel {
    fn default() -> Self {
        Self {
            output: false,
            load: OutputLoad::FiftyOhm,
            high: 1.0,
            low: -1.0,
            frequency: None,
            waveform: None,
        }
    }
}

/// Everything the simulated instrument remembers.
#[derive(Debug, Clone, PartialEq)]
pub struct SimState {
    pub identity: String,
    pub run_state: RunState,
    pub run_mode: RunMode,
    pub sample_rate: f64,
    pub voltage_unit: VoltageUnit,
    pub channels: Vec<SimChannel>,
    pub length: usize,
    pub max_length: usize,
    pub loop_count: LoopCount,
    /// Mass storage, path → samples.
    pub files: HashMap<String, Vec<f64>>,
    /// Waveform list, name → samples.
    pub waveforms: HashMap<String, Vec<f64>>,
    pub pending_file: Option<String>,
    pub errors: VecDeque<(i32, String)>,
    /// Every header received, in order.
    pub received: Vec<String>,
    /// Payload bytes received in `MMEMory:DOWNload:DATA` blocks.
    pub block_bytes: usize,
}

impl Default for SimState {
    fn default() -> Self {
        Self {
            identity: "Teledyne LeCroy,T3AWG3252,T3AWG-SIM-0001,1.0.0".to_owned(),
            run_state: RunState::Stopped,
            run_mode: RunMode::Continuous,
            sample_rate: 1e9,
            voltage_unit: VoltageUnit::AmplitudeOffset,
            channels: vec![SimChannel::default(); consts::CHANNEL_COUNT as usize],
            length: 2048,
            max_length: consts::DEFAULT_MAX_WAVEFORM_LEN,
            loop_count: LoopCount::Finite(1),
            files: HashMap::new(),
            waveforms: [
                "Sine", "Ramp", "Square", "Sync", "DC", "Gaussian", "Lorentz", "Haversine",
                "Exp_Rise", "Exp_Decay",
            ]
            .into_iter()
            .map(|name| (name.to_owned(), Vec::new()))
            .collect(),
            pending_file: None,
            errors: VecDeque::new(),
            received: Vec::new(),
            block_bytes: 0,
        }
    }
}

impl SimState {
    fn push_error(&mut self, (code, message): (i32, &str)) {
        if self.errors.len() + 1 >= ERROR_QUEUE_LEN {
            if self.errors.len() < ERROR_QUEUE_LEN {
                self.errors
                    .push_back((QUEUE_OVERFLOW.0, QUEUE_OVERFLOW.1.to_owned()));
            }
            return;
        }
        self.errors.push_back((code, message.to_owned()));
    }

    fn channel_index(&self, suffix: u32) -> Option<usize> {
        (suffix as usize)
            .checked_sub(1)
            .filter(|&i| i < self.channels.len())
    }

    fn channel(&self, suffix: u32) -> Option<&SimChannel> {
        self.channels.get(self.channel_index(suffix)?)
    }

    /// Applies `f` to the addressed channel, or queues an error if the
    /// suffix names a channel this model doesn't have.
    fn with_channel(&mut self, suffix: u32, f: impl FnOnce(&mut SimChannel)) {
        match self.channel_index(suffix) {
            Some(index) => f(&mut self.channels[index]),
            None => self.push_error(UNDEFINED_HEADER),
        }
    }
}

/// Cheaply cloneable handle; all clones share one instrument state.
#[derive(Debug, Clone, Default)]
pub struct SimulatedAwg {
    state: Arc<Mutex<SimState>>,
}

impl SimulatedAwg {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_state(state: SimState) -> Self {
        Self {
            state: Arc::new(Mutex::new(state)),
        }
    }

    pub fn snapshot(&self) -> SimState {
        self.lock().clone()
    }

    /// Queue an error as if the instrument had detected a fault on its own.
    pub fn inject_error(&self, code: i32, message: &str) {
        self.lock().push_error((code, message));
    }

    fn lock(&self) -> MutexGuard<'_, SimState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Spawns the instrument on the current tokio runtime and hands back the
    /// client end of an in-memory link.
    pub fn spawn_duplex(&self) -> DuplexStream {
        let (client, server) = duplex(64 * 1024);
        let sim = self.clone();
        tokio::spawn(async move {
            if let Err(e) = sim.serve(server).await {
                debug!("simulated instrument stopped: {e}");
            }
        });
        client
    }

    /// Answers commands until the peer closes the link.
    pub async fn serve<S: AsyncRead + AsyncWrite + Unpin>(&self, stream: S) -> std::io::Result<()> {
        let mut stream = BufReader::new(stream);
        let mut buf = Vec::with_capacity(1024);

        loop {
            buf.clear();
            if stream.read_until(b'\n', &mut buf).await? == 0 {
                return Ok(());
            }

            if let Some(block) = block_header(&buf) {
                let total = block.payload_start + block.len;
                if buf.len() < total {
                    let have = buf.len();
                    buf.resize(total, 0);
                    stream.read_exact(&mut buf[have..]).await?;
                }
                // the message terminator after the block
                if buf.len() <= total {
                    let mut rest = Vec::new();
                    stream.read_until(b'\n', &mut rest).await?;
                }
                let payload = &buf[block.payload_start..total];
                self.lock().download_block(payload);
                continue;
            }

            let line = String::from_utf8_lossy(&buf);
            let line = line.trim();
            if line.is_empty() {
                continue;
            }

            // several commands may share one line
            for message in line.split(';') {
                let answer = self.lock().execute(message.trim());
                if let Some(answer) = answer {
                    stream.write_all(answer.as_bytes()).await?;
                    stream.write_all(b"\n").await?;
                    stream.flush().await?;
                }
            }
        }
    }
}

struct BlockHeader {
    payload_start: usize,
    len: usize,
}

/// Finds `MMEMory:DOWNload:DATA #<d><len>` at the start of a message.
fn block_header(buf: &[u8]) -> Option<BlockHeader> {
    let head = &buf[..buf.len().min(64)];
    let hash = head.iter().position(|&b| b == b'#')?;
    let header = std::str::from_utf8(&head[..hash]).ok()?;
    let (header, _) = header.trim().split_once(' ').unwrap_or((header.trim(), ""));
    if !Header::parse(header).matches(&["MMEMory", "DOWNload", "DATA"]) {
        return None;
    }

    let digits = (*head.get(hash + 1)? as char).to_digit(10)? as usize;
    if digits == 0 {
        return None;
    }
    let len_start = hash + 2;
    let len = std::str::from_utf8(buf.get(len_start..len_start + digits)?)
        .ok()?
        .parse()
        .ok()?;

    Some(BlockHeader {
        payload_start: len_start + digits,
        len,
    })
}

/// A received command header split into keyword nodes and numeric suffixes.
struct Header<'a> {
    nodes: Vec<(&'a str, Option<u32>)>,
    query: bool,
}

impl<'a> Header<'a> {
    fn parse(header: &'a str) -> Self {
        let (header, query) = match header.strip_suffix('?') {
            Some(h) => (h, true),
            None => (header, false),
        };

        let nodes = header
            .trim_start_matches(':')
            .split(':')
            .map(|node| {
                let split = node
                    .find(|c: char| c.is_ascii_digit())
                    .unwrap_or(node.len());
                let (keyword, suffix) = node.split_at(split);
                (keyword, suffix.parse().ok())
            })
            .collect();

        Header { nodes, query }
    }

    /// `pattern` nodes are in manual notation: the upper-case part is the
    /// short form, the whole word the long form.
    fn matches(&self, pattern: &[&str]) -> bool {
        self.nodes.len() == pattern.len()
            && self
                .nodes
                .iter()
                .zip(pattern)
                .all(|((keyword, _), pattern)| keyword_matches(keyword, pattern))
    }

    fn suffix(&self, node: usize) -> u32 {
        self.nodes
            .get(node)
            .and_then(|(_, suffix)| *suffix)
            .unwrap_or(1)
    }
}

fn keyword_matches(keyword: &str, pattern: &str) -> bool {
    let short: String = pattern.chars().filter(|c| !c.is_ascii_lowercase()).collect();
    keyword.eq_ignore_ascii_case(&short) || keyword.eq_ignore_ascii_case(pattern)
}

/// Splits `"a","b",ANA` into `[a, b, ANA]`, honouring quotes.
fn split_args(args: &str) -> Vec<String> {
    let mut out = Vec::new();
    let mut current = String::new();
    let mut quoted = false;

    for c in args.chars() {
        match c {
            '"' => quoted = !quoted,
            ',' if !quoted => out.push(std::mem::take(&mut current).trim().to_owned()),
            c => current.push(c),
        }
    }
    if !current.trim().is_empty() || !out.is_empty() {
        out.push(current.trim().to_owned());
    }
    out
}

fn parse_number(arg: Option<&String>) -> Option<f64> {
    arg?.parse::<f64>().ok().filter(|v| v.is_finite())
}

impl SimState {
    fn download_block(&mut self, payload: &[u8]) {
        self.received.push("MMEMory:DOWNload:DATA".to_owned());
        self.block_bytes += payload.len();

        let Some(path) = self.pending_file.take() else {
            self.push_error(SETTINGS_CONFLICT);
            return;
        };

        let samples: Result<Vec<f64>, _> = String::from_utf8_lossy(payload)
            .split("\r\n")
            .filter(|l| !l.trim().is_empty())
            .map(|l| l.trim().parse::<f64>())
            .collect();

        match samples {
            Ok(samples) => {
                self.files.insert(path, samples);
            }
            Err(_) => self.push_error(DATA_TYPE_ERROR),
        }
    }

    /// Runs one message, returning the answer line for queries.
    fn execute(&mut self, message: &str) -> Option<String> {
        let (header_text, args) = message
            .split_once(char::is_whitespace)
            .map(|(h, a)| (h, a.trim()))
            .unwrap_or((message, ""));
        self.received.push(header_text.to_owned());

        let header = Header::parse(header_text);
        let args = split_args(args);
        let first = args.first();

        macro_rules! is {
            ($($node:literal),+) => {
                header.matches(&[$($node),+])
            };
        }

        if header.query {
            return self.query(&header, first);
        }

        if is!("*RST") {
            *self = SimState {
                identity: std::mem::take(&mut self.identity),
                max_length: self.max_length,
                channels: vec![SimChannel::default(); self.channels.len()],
                received: std::mem::take(&mut self.received),
                ..SimState::default()
            };
        } else if is!("*CLS") {
            self.errors.clear();
        } else if is!("*TRG") {
            if self.run_state == RunState::WaitingForTrigger {
                self.run_state = RunState::Running;
            }
        } else if is!("AWGControl", "RUN") {
            self.run_state = match self.run_mode {
                RunMode::Continuous => RunState::Running,
                _ => RunState::WaitingForTrigger,
            };
        } else if is!("AWGControl", "STOP") {
            self.run_state = RunState::Stopped;
        } else if is!("AWGControl", "RMODe") {
            match first.and_then(|m| m.parse().ok()) {
                Some(mode) => self.run_mode = mode,
                None => self.push_error(ILLEGAL_PARAMETER),
            }
        } else if is!("AWGControl", "SRATe") {
            match parse_number(first) {
                Some(rate) if (consts::SAMPLE_RATE_MIN..=consts::SAMPLE_RATE_MAX).contains(&rate) => {
                    self.sample_rate = rate
                }
                Some(_) => self.push_error(DATA_OUT_OF_RANGE),
                None => self.push_error(DATA_TYPE_ERROR),
            }
        } else if is!("DISPlay", "UNIT", "VOLT") {
            match first.and_then(|u| u.parse().ok()) {
                Some(unit) => self.voltage_unit = unit,
                None => self.push_error(ILLEGAL_PARAMETER),
            }
        } else if is!("OUTPut", "STATe") {
            let state = match first.map(|s| s.to_ascii_uppercase()).as_deref() {
                Some("ON" | "1") => Some(true),
                Some("OFF" | "0") => Some(false),
                _ => None,
            };
            match state {
                Some(state) => self.with_channel(header.suffix(0), |ch| ch.output = state),
                None => self.push_error(ILLEGAL_PARAMETER),
            }
        } else if is!("OUTPut", "SERIESIMPedance") {
            match first.and_then(|l| l.parse::<OutputLoad>().ok()) {
                Some(load) => self.with_channel(header.suffix(0), |ch| ch.load = load),
                None => self.push_error(ILLEGAL_PARAMETER),
            }
        } else if is!("SOURce", "FREQuency") {
            match parse_number(first) {
                Some(f) if f > 0.0 => {
                    self.with_channel(header.suffix(0), |ch| ch.frequency = Some(f))
                }
                Some(_) => self.push_error(DATA_OUT_OF_RANGE),
                None => self.push_error(DATA_TYPE_ERROR),
            }
        } else if is!("SEQuence", "ELEM", "AMPlitude")
            || is!("SEQuence", "ELEM", "OFFset")
            || is!("SEQuence", "ELEM", "VOLTage", "HIGH")
            || is!("SEQuence", "ELEM", "VOLTage", "LOW")
        {
            self.set_level(&header, parse_number(first));
        } else if is!("SEQuence", "ELEM", "LENGth") {
            match first.and_then(|l| l.parse::<usize>().ok()) {
                Some(len) if len > 0 && len <= self.max_length => self.length = len,
                Some(_) => self.push_error(DATA_OUT_OF_RANGE),
                None => self.push_error(DATA_TYPE_ERROR),
            }
        } else if is!("SEQuence", "ELEM", "LOOP", "COUNt") {
            match first.and_then(|c| c.parse().ok()) {
                Some(count) => self.loop_count = count,
                None => self.push_error(DATA_TYPE_ERROR),
            }
        } else if is!("SEQuence", "ELEM", "WAVeform") {
            match first.cloned() {
                Some(name) if self.waveforms.contains_key(&name) => {
                    self.with_channel(header.suffix(2), |ch| ch.waveform = Some(name))
                }
                _ => self.push_error(ILLEGAL_PARAMETER),
            }
        } else if is!("MMEMory", "DOWNload", "FNAMe") {
            match first {
                Some(path) if !path.is_empty() => self.pending_file = Some(path.clone()),
                _ => self.push_error(ILLEGAL_PARAMETER),
            }
        } else if is!("WLISt", "WAVeform", "DELete") {
            if let Some(name) = first {
                self.waveforms.remove(name);
            }
        } else if is!("WLISt", "WAVeform", "IMPort") {
            match (args.first(), args.get(1)) {
                (Some(name), Some(path)) => match self.files.get(path) {
                    Some(samples) => {
                        let samples = samples.clone();
                        self.waveforms.insert(name.clone(), samples);
                    }
                    None => self.push_error(FILE_NOT_FOUND),
                },
                _ => self.push_error(ILLEGAL_PARAMETER),
            }
        } else {
            self.push_error(UNDEFINED_HEADER);
        }

        None
    }

    fn set_level(&mut self, header: &Header<'_>, value: Option<f64>) {
        let Some(value) = value else {
            self.push_error(DATA_TYPE_ERROR);
            return;
        };
        let last = header.nodes.len() - 1;
        let Some(keyword) = header.nodes.get(last).map(|(k, _)| *k) else {
            return;
        };
        let Some(index) = self.channel_index(header.suffix(last)) else {
            self.push_error(UNDEFINED_HEADER);
            return;
        };

        let mut updated = self.channels[index].clone();
        if keyword_matches(keyword, "AMPlitude") {
            updated.set_amplitude(value);
        } else if keyword_matches(keyword, "OFFset") {
            updated.set_offset(value);
        } else if keyword_matches(keyword, "HIGH") {
            updated.high = value;
        } else {
            updated.low = value;
        }

        let in_window = |v: f64| (consts::VOLTAGE_MIN..=consts::VOLTAGE_MAX).contains(&v);
        if in_window(updated.high) && in_window(updated.low) && updated.high >= updated.low {
            self.channels[index] = updated;
        } else {
            self.push_error(DATA_OUT_OF_RANGE);
        }
    }

    fn query(&mut self, header: &Header<'_>, first: Option<&String>) -> Option<String> {
        let is = |pattern: &[&str]| header.matches(pattern);

        let answer = if is(&["*IDN"]) {
            self.identity.clone()
        } else if is(&["*OPC"]) {
            "1".to_owned()
        } else if is(&["SYSTem", "ERRor"]) {
            match self.errors.pop_front() {
                Some((code, message)) => format!("{code},\"{message}\""),
                None => "0,\"No error\"".to_owned(),
            }
        } else if is(&["AWGControl", "RSTATe"]) {
            self.run_state.code().to_string()
        } else if is(&["AWGControl", "RMODe"]) {
            self.run_mode.to_string()
        } else if is(&["AWGControl", "SRATe"]) {
            self.sample_rate.to_string()
        } else if is(&["OUTPut", "STATe"]) {
            match self.channel(header.suffix(0)) {
                Some(ch) => (if ch.output { "1" } else { "0" }).to_owned(),
                None => return self.undefined(),
            }
        } else if is(&["OUTPut", "SERIESIMPedance"]) {
            match self.channel(header.suffix(0)) {
                Some(ch) => ch.load.to_string(),
                None => return self.undefined(),
            }
        } else if is(&["SEQuence", "ELEM", "AMPlitude"]) {
            match self.channel(header.suffix(2)) {
                Some(ch) => ch.amplitude().to_string(),
                None => return self.undefined(),
            }
        } else if is(&["SEQuence", "ELEM", "OFFset"]) {
            match self.channel(header.suffix(2)) {
                Some(ch) => ch.offset().to_string(),
                None => return self.undefined(),
            }
        } else if is(&["SEQuence", "ELEM", "LENGth"]) {
            let max = first.is_some_and(|a| keyword_matches(a, "MAXimum"));
            let len = if max { self.max_length } else { self.length };
            len.to_string()
        } else if is(&["SEQuence", "ELEM", "LOOP", "COUNt"]) {
            self.loop_count.to_string()
        } else if is(&["SEQuence", "ELEM", "WAVeform"]) {
            match self.channel(header.suffix(2)) {
                Some(ch) => format!("\"{}\"", ch.waveform.as_deref().unwrap_or("")),
                None => return self.undefined(),
            }
        } else {
            return self.undefined();
        };

        Some(answer)
    }

    /// Real firmware stays silent on a bad query, so the client times out.
    fn undefined(&mut self) -> Option<String> {
        self.push_error(UNDEFINED_HEADER);
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn header_matching() {
        let h = Header::parse("SEQ:ELEM1:VOLT:HIGH2");
        assert!(h.matches(&["SEQuence", "ELEM", "VOLTage", "HIGH"]));
        assert_eq!(h.suffix(3), 2);
        assert!(!h.query);

        let h = Header::parse(":output1:state?");
        assert!(h.matches(&["OUTPut", "STATe"]));
        assert!(h.query);

        let h = Header::parse("OUTP:STATEX");
        assert!(!h.matches(&["OUTPut", "STATe"]));
    }

    #[test]
    fn argument_splitting() {
        assert_eq!(
            split_args("\"temp1\",\"C:/a/temp1.txt\",ANAlog"),
            ["temp1", "C:/a/temp1.txt", "ANAlog"]
        );
        assert_eq!(split_args("\"a,b\""), ["a,b"]);
        assert!(split_args("").is_empty());
    }

    #[test]
    fn finds_block_header() {
        let block = block_header(b"MMEMory:DOWNload:DATA #15hello\n").unwrap();
        assert_eq!(block.payload_start, 25);
        assert_eq!(block.len, 5);
        assert!(block_header(b"SEQ:ELEM1:WAV1 \"#1\"\n").is_none());
    }

    #[test]
    fn executes_commands() {
        let mut state = SimState::default();
        assert_eq!(state.execute("SEQ:ELEM1:AMP1 2"), None);
        assert_eq!(state.execute("SEQ:ELEM1:OFF1 0.5"), None);
        assert_eq!(state.execute("SEQ:ELEM1:VOLT:HIGH1?"), None);
        // HIGH query isn't modelled
        assert_eq!(state.errors.len(), 1);
        assert_eq!(state.channels[0].high, 1.5);
        assert_eq!(state.execute("SEQ:ELEM1:AMPlitude1?").as_deref(), Some("2"));

        state.execute("SEQ:ELEM1:VOLT:HIGH1 5");
        assert_eq!(state.errors.back().map(|e| e.0), Some(-222));

        assert_eq!(
            state.execute("SYST:ERR?").as_deref(),
            Some("-113,\"Undefined header\"")
        );
        assert_eq!(
            state.execute("SYST:ERR?").as_deref(),
            Some("-222,\"Data out of range\"")
        );
        assert_eq!(state.execute("SYST:ERR?").as_deref(), Some("0,\"No error\""));
    }

    #[test]
    fn run_states() {
        let mut state = SimState::default();
        state.execute("AWGC:RMOD TCON");
        state.execute("AWGC:RUN");
        assert_eq!(state.run_state, RunState::WaitingForTrigger);
        state.execute("*TRG");
        assert_eq!(state.run_state, RunState::Running);
        state.execute("AWGC:STOP");
        assert_eq!(state.execute("AWGC:RSTAT?").as_deref(), Some("0"));
    }

    #[test]
    fn error_queue_overflows() {
        let mut state = SimState::default();
        for _ in 0..40 {
            state.execute("BOGUS");
        }
        assert_eq!(state.errors.len(), ERROR_QUEUE_LEN);
        assert_eq!(state.errors.back().map(|e| e.0), Some(QUEUE_OVERFLOW.0));
    }
}
