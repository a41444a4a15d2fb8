use crate::{
    address::{AddressError, ResourceAddress},
    command::{download_data, AwgCommand, AwgQuery},
    config::SessionConfig,
    consts::MAX_CHANNELS,
    data::{
        awg::{Identity, LoopCount, ParseIdentityError, RunMode, RunState, VoltageUnit},
        channel::{ChannelConfig, ChannelId, ChannelReadback, ChannelState, OutputLoad, OutputState},
        error_queue::ErrorQueueEntry,
        units::{SamplingRate, Voltage},
        waveform::Waveform,
    },
    device::{connect, render, ConnectError, Io, IoError},
    limits::{CapacityError, InstrumentLimits, ValidationError},
};
use arrayvec::ArrayVec;
use log::{debug, info, warn};
use snafu::{ensure, OptionExt, ResultExt, Snafu};
use std::{fmt, str::FromStr, time::Duration};
use tokio::{
    io::{AsyncRead, AsyncWrite},
    net::TcpStream,
};

/// Upper bound on `SYSTem:ERRor?` reads when draining the queue.
const MAX_DRAINED_ERRORS: usize = 32;

/// Extra last line of `upload_signal` files. The instrument's text import
/// wants a line after the final sample; the element length leaves it out.
const SIGNAL_TRAILER: &str = "100";

#[derive(Debug, Snafu)]
pub enum ConnectionError {
    #[snafu(context(false))]
    Address { source: AddressError },
    #[snafu(context(false))]
    Connect { source: ConnectError },
    #[snafu(display("instrument did not identify itself"))]
    Identify { source: IoError },
    #[snafu(display("instrument sent an unexpected identification"))]
    Identity { source: ParseIdentityError },
    #[snafu(display("could not read the instrument's waveform memory size"))]
    Limits { source: SessionError },
}

/// Fault the instrument reported through its error queue.
#[derive(Debug, Clone, PartialEq, Eq, Snafu)]
#[snafu(display("instrument error {code}: {message}"))]
pub struct InstrumentError {
    pub code: i32,
    pub message: String,
}

#[derive(Debug, Snafu)]
pub enum SessionError {
    #[snafu(display("session is not open"))]
    NotOpen,
    #[snafu(context(false))]
    Validation { source: ValidationError },
    #[snafu(context(false))]
    Capacity { source: CapacityError },
    #[snafu(context(false))]
    Instrument { source: InstrumentError },
    #[snafu(context(false))]
    Io { source: IoError },
    #[snafu(display("unexpected answer {text:?} to {query}"))]
    Response { query: String, text: String },
}

/// An open link to one AWG.
///
/// Every operation takes `&mut self` and runs to completion (or timeout)
/// before returning, so one session is only ever driven by one caller.
pub struct Session<S = TcpStream> {
    io: Option<Io<S>>,
    config: SessionConfig,
    identity: Identity,
    channels: ArrayVec<ChannelState, MAX_CHANNELS>,
}

impl<S> fmt::Debug for Session<S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Session")
            .field("open", &self.io.is_some())
            .field("identity", &self.identity)
            .field("limits", &self.config.limits)
            .finish_non_exhaustive()
    }
}

impl Session<TcpStream> {
    /// Connects to `address` and identifies the instrument, giving up after
    /// `timeout`.
    pub async fn open(address: &str, timeout: Duration) -> Result<Self, ConnectionError> {
        let address: ResourceAddress = address.parse()?;
        Self::open_with_config(&address, SessionConfig::default().with_timeout(timeout)).await
    }

    pub async fn open_with_config(
        address: &ResourceAddress,
        config: SessionConfig,
    ) -> Result<Self, ConnectionError> {
        let stream = connect(address, config.timeout).await?;
        Self::from_stream(stream, config).await
    }
}

impl<S: AsyncRead + AsyncWrite + Unpin> Session<S> {
    /// Runs the opening handshake over an already connected stream.
    pub async fn from_stream(
        stream: S,
        mut config: SessionConfig,
    ) -> Result<Self, ConnectionError> {
        let mut io = Io::new(stream, config.timeout, config.min_pause);

        let idn = io
            .cmd_output(AwgQuery::Identify.to_string().as_bytes())
            .await
            .context(IdentifySnafu)?;
        let identity: Identity = idn.parse().context(IdentitySnafu)?;
        if !identity.model.contains("AWG") {
            warn!("{} doesn't look like a T3AWG, continuing anyway", identity.model);
        }

        let channel_count = usize::from(config.limits.channels);
        if channel_count > MAX_CHANNELS {
            warn!("{channel_count} channels configured, only {MAX_CHANNELS} are supported");
            config.limits.channels = MAX_CHANNELS as u8;
        }
        let channels = (0..config.limits.channels)
            .map(|_| ChannelState::default())
            .collect();

        let mut session = Self {
            io: Some(io),
            config,
            identity,
            channels,
        };

        if session.config.query_limits {
            let max: usize = session
                .query(AwgQuery::MaxLength)
                .await
                .context(LimitsSnafu)?;
            session.config.limits.max_waveform_len = max;
        }

        info!(
            "opened {} (max waveform length {})",
            session.identity, session.config.limits.max_waveform_len
        );

        Ok(session)
    }

    pub fn is_open(&self) -> bool {
        self.io.is_some()
    }

    pub fn identity(&self) -> &Identity {
        &self.identity
    }

    pub fn limits(&self) -> &InstrumentLimits {
        &self.config.limits
    }

    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    /// What this session last set on `channel`; `None` for channels the
    /// instrument doesn't have.
    pub fn channel(&self, channel: ChannelId) -> Option<&ChannelState> {
        self.channels.get(channel.index()?)
    }

    /// Releases the connection. Closing a closed session does nothing.
    pub async fn close(&mut self) -> Result<(), SessionError> {
        let Some(mut io) = self.io.take() else {
            return Ok(());
        };
        self.channels.iter_mut().for_each(|c| *c = ChannelState::default());

        info!("closing {}", self.identity);
        io.shutdown().await?;
        Ok(())
    }

    pub async fn identify(&mut self) -> Result<Identity, SessionError> {
        let identity: Identity = self.query(AwgQuery::Identify).await?;
        self.identity = identity.clone();
        Ok(identity)
    }

    /// Sets amplitude, offset, sample rate and (optionally) frequency of one
    /// channel. Nothing is sent unless every value is within limits.
    pub async fn configure_channel(
        &mut self,
        channel: ChannelId,
        config: ChannelConfig,
    ) -> Result<(), SessionError> {
        self.io()?;
        self.config.limits.check_channel_config(channel, &config)?;

        debug!(
            "CH{channel}: {} pp, {} offset, {}",
            config.amplitude, config.offset, config.sample_rate
        );

        self.send(AwgCommand::SetSampleRate(config.sample_rate)).await?;
        // collapse first so no intermediate high/low leaves the window
        let min_amplitude = self.config.limits.min_amplitude;
        self.send(AwgCommand::SetAmplitude(channel, min_amplitude))
            .await?;
        self.send(AwgCommand::SetOffset(channel, config.offset))
            .await?;
        self.send(AwgCommand::SetAmplitude(channel, config.amplitude))
            .await?;
        if let Some(frequency) = config.frequency {
            self.send(AwgCommand::SetFrequency(channel, frequency))
                .await?;
        }
        self.acknowledge().await?;

        self.channel_mut(channel)?.config = Some(config);
        Ok(())
    }

    /// Uploads `samples` to `channel` under the channel's default waveform
    /// name (`temp<n>`).
    pub async fn upload_waveform(
        &mut self,
        channel: ChannelId,
        samples: &[f64],
    ) -> Result<(), SessionError> {
        let name = channel.default_waveform_name();
        self.check_upload(channel, &name, samples)?;
        self.upload(channel, &name, samples, None).await
    }

    pub async fn upload_named_waveform(
        &mut self,
        channel: ChannelId,
        waveform: &Waveform,
    ) -> Result<(), SessionError> {
        self.check_upload(channel, &waveform.name, &waveform.samples)?;
        self.upload(channel, &waveform.name, &waveform.samples, None)
            .await
    }

    /// Everything `upload` needs to hold before the first byte goes out.
    fn check_upload(
        &mut self,
        channel: ChannelId,
        name: &str,
        samples: &[f64],
    ) -> Result<(), SessionError> {
        self.io()?;
        let limits = &self.config.limits;
        limits.check_channel(channel)?;
        limits.check_capacity(samples.len())?;
        limits.check_samples(name, samples)?;
        Ok(())
    }

    /// Stops the sequencer, writes `samples` (plus `trailer`, if any) to a
    /// file, imports it as `name` and plays it on `channel`. Callers run
    /// `check_upload` first.
    async fn upload(
        &mut self,
        channel: ChannelId,
        name: &str,
        samples: &[f64],
        trailer: Option<&str>,
    ) -> Result<(), SessionError> {
        let mut payload = crate::data::waveform::text_payload(samples);
        if let Some(trailer) = trailer {
            payload.push_str("\r\n");
            payload.push_str(trailer);
        }
        let block = download_data(payload.as_bytes()).ok_or(CapacityError {
            samples: samples.len(),
            max: self.config.limits.max_waveform_len,
        })?;

        debug!(
            "CH{channel}: uploading {} samples as {name:?} ({} bytes)",
            samples.len(),
            payload.len()
        );

        self.stop().await?;

        let folder = self.config.upload_folder.clone();
        self.send(AwgCommand::DownloadFileName {
            folder: &folder,
            name,
        })
        .await?;
        self.io()?.cmd(&block).await?;
        self.sync().await?;

        self.send(AwgCommand::DeleteWaveform(name)).await?;
        self.send(AwgCommand::ImportWaveform {
            folder: &folder,
            name,
        })
        .await?;
        self.sync().await?;

        self.send(AwgCommand::SelectWaveform(channel, name)).await?;
        self.send(AwgCommand::SetLength(samples.len())).await?;
        self.acknowledge().await?;

        let state = self.channel_mut(channel)?;
        state.waveform = Some(name.to_owned());
        state.waveform_len = Some(samples.len());
        Ok(())
    }

    pub async fn enable_output(
        &mut self,
        channel: ChannelId,
        enabled: bool,
    ) -> Result<(), SessionError> {
        self.io()?;
        self.config.limits.check_channel(channel)?;

        let state = OutputState::from(enabled);
        self.send(AwgCommand::SetOutput(channel, state)).await?;
        self.acknowledge().await?;

        self.channel_mut(channel)?.output = state;
        Ok(())
    }

    /// Pops one entry off the instrument's error queue.
    pub async fn query_error(&mut self) -> Result<ErrorQueueEntry, SessionError> {
        self.query(AwgQuery::NextError).await
    }

    /// Drains the error queue, failing with the oldest entry if there was any.
    pub async fn check_errors(&mut self) -> Result<(), SessionError> {
        let mut first = None;

        for _ in 0..MAX_DRAINED_ERRORS {
            match self.query_error().await? {
                ErrorQueueEntry::NoError => break,
                ErrorQueueEntry::Error { code, message } => {
                    warn!("instrument error {code}: {message}");
                    first.get_or_insert(InstrumentError { code, message });
                }
            }
        }

        match first {
            Some(error) => Err(error.into()),
            None => Ok(()),
        }
    }

    /// Reads back what the instrument currently uses for `channel`.
    pub async fn query_channel(
        &mut self,
        channel: ChannelId,
    ) -> Result<ChannelReadback, SessionError> {
        self.io()?;
        self.config.limits.check_channel(channel)?;

        let amplitude = Voltage(self.query(AwgQuery::Amplitude(channel)).await?);
        let offset = Voltage(self.query(AwgQuery::Offset(channel)).await?);
        let sample_rate = self.sample_rate().await?;
        let output = self.query_text(AwgQuery::Output(channel)).await?;
        let output = OutputState::from_response(&output).context(ResponseSnafu {
            query: AwgQuery::Output(channel).to_string(),
            text: output.as_str(),
        })?;

        Ok(ChannelReadback {
            amplitude,
            offset,
            sample_rate,
            output,
        })
    }

    pub async fn run(&mut self) -> Result<(), SessionError> {
        self.send(AwgCommand::Run).await?;
        self.sync().await
    }

    pub async fn stop(&mut self) -> Result<(), SessionError> {
        self.send(AwgCommand::Stop).await?;
        self.sync().await
    }

    pub async fn trigger(&mut self) -> Result<(), SessionError> {
        self.send(AwgCommand::Trigger).await?;
        self.sync().await
    }

    pub async fn run_state(&mut self) -> Result<RunState, SessionError> {
        self.query(AwgQuery::RunState).await
    }

    pub async fn run_mode(&mut self) -> Result<RunMode, SessionError> {
        self.query(AwgQuery::RunMode).await
    }

    pub async fn set_run_mode(&mut self, mode: RunMode) -> Result<(), SessionError> {
        self.send(AwgCommand::SetRunMode(mode)).await?;
        self.acknowledge().await
    }

    pub async fn sample_rate(&mut self) -> Result<SamplingRate, SessionError> {
        self.query(AwgQuery::SampleRate).await.map(SamplingRate)
    }

    /// The sampling clock is shared by all channels.
    pub async fn set_sample_rate(&mut self, rate: SamplingRate) -> Result<(), SessionError> {
        self.io()?;
        self.config.limits.check_sample_rate(rate)?;
        self.send(AwgCommand::SetSampleRate(rate)).await?;
        self.acknowledge().await
    }

    pub async fn set_voltage_unit(&mut self, unit: VoltageUnit) -> Result<(), SessionError> {
        self.send(AwgCommand::SetVoltageUnit(unit)).await?;
        self.acknowledge().await
    }

    pub async fn set_output_load(
        &mut self,
        channel: ChannelId,
        load: OutputLoad,
    ) -> Result<(), SessionError> {
        self.io()?;
        self.config.limits.check_channel(channel)?;
        self.send(AwgCommand::SetOutputLoad(channel, load)).await?;
        self.acknowledge().await?;

        self.channel_mut(channel)?.load = Some(load);
        Ok(())
    }

    /// Sets the high and low output level of `channel`.
    pub async fn set_voltage_window(
        &mut self,
        channel: ChannelId,
        high: Voltage,
        low: Voltage,
    ) -> Result<(), SessionError> {
        self.io()?;
        let limits = &self.config.limits;
        limits.check_channel(channel)?;
        limits.check_window(high, low)?;

        // widen first so the low level can't end up above the old high level
        let top = limits.voltage_max;
        self.send(AwgCommand::SetVoltageHigh(channel, top)).await?;
        self.send(AwgCommand::SetVoltageLow(channel, low)).await?;
        self.send(AwgCommand::SetVoltageHigh(channel, high)).await?;
        self.acknowledge().await?;

        let state = self.channel_mut(channel)?;
        if let Some(config) = &mut state.config {
            config.amplitude = Voltage(high.0 - low.0);
            config.offset = Voltage((high.0 + low.0) / 2.0);
        }
        Ok(())
    }

    pub async fn set_loop_count(&mut self, count: LoopCount) -> Result<(), SessionError> {
        self.send(AwgCommand::SetLoopCount(count)).await?;
        self.acknowledge().await
    }

    /// Assigns a waveform from the instrument's waveform list to `channel`.
    pub async fn select_waveform(
        &mut self,
        channel: ChannelId,
        name: &str,
    ) -> Result<(), SessionError> {
        self.io()?;
        self.config.limits.check_channel(channel)?;
        self.send(AwgCommand::SelectWaveform(channel, name)).await?;
        self.acknowledge().await?;

        self.channel_mut(channel)?.waveform = Some(name.to_owned());
        Ok(())
    }

    /// Full "play this on channel N" sequence.
    ///
    /// Stops the sequencer, uploads `samples` as `name`, outputs them between
    /// 0 V and `high`, and optionally starts the sequencer again. If
    /// `sample_rate` is `None` the current clock is kept. Nothing is sent
    /// unless all arguments are within limits.
    pub async fn upload_signal(
        &mut self,
        channel: ChannelId,
        name: &str,
        samples: &[f64],
        high: Voltage,
        sample_rate: Option<SamplingRate>,
        run: bool,
    ) -> Result<(), SessionError> {
        self.io()?;
        let limits = &self.config.limits;
        limits.check_channel(channel)?;
        limits.check_window(high, Voltage(0.0))?;
        if let Some(rate) = sample_rate {
            limits.check_sample_rate(rate)?;
        }
        self.check_upload(channel, name, samples)?;

        self.set_voltage_unit(VoltageUnit::HighLow).await?;
        self.upload(channel, name, samples, Some(SIGNAL_TRAILER))
            .await?;

        if let Some(rate) = sample_rate {
            self.set_sample_rate(rate).await?;
        }

        self.enable_output(channel, false).await?;
        self.set_output_load(channel, OutputLoad::FiftyOhm).await?;
        self.set_voltage_window(channel, high, Voltage(0.0)).await?;
        self.enable_output(channel, true).await?;

        if run {
            self.run().await?;
        }
        Ok(())
    }

    /// Sends one line verbatim, for interactive use.
    pub async fn send_raw(&mut self, line: &str) -> Result<(), SessionError> {
        self.io()?.cmd(line.as_bytes()).await?;
        Ok(())
    }

    /// Sends one line verbatim and returns the answer line.
    pub async fn query_raw(&mut self, line: &str) -> Result<String, SessionError> {
        Ok(self.io()?.cmd_output(line.as_bytes()).await?)
    }

    pub fn set_timeout(&mut self, timeout: Duration) {
        self.config.timeout = timeout;
        if let Some(io) = &mut self.io {
            io.set_timeout(timeout);
        }
    }

    fn io(&mut self) -> Result<&mut Io<S>, SessionError> {
        self.io.as_mut().context(NotOpenSnafu)
    }

    fn channel_mut(&mut self, channel: ChannelId) -> Result<&mut ChannelState, SessionError> {
        let channels = self.config.limits.channels;
        let state = channel.index().and_then(|i| self.channels.get_mut(i));
        state.ok_or_else(|| ValidationError::ChannelOutOfRange { channel, channels }.into())
    }

    async fn send(&mut self, command: AwgCommand<'_>) -> Result<(), SessionError> {
        self.io()?
            .cmd_with_writer(|w| render(w, &command))
            .await?;
        Ok(())
    }

    async fn query_text(&mut self, query: AwgQuery) -> Result<String, SessionError> {
        let line = query.to_string();
        Ok(self.io()?.cmd_output(line.as_bytes()).await?)
    }

    async fn query<T: FromStr>(&mut self, query: AwgQuery) -> Result<T, SessionError> {
        let text = self.query_text(query).await?;
        text.trim().parse().ok().context(ResponseSnafu {
            query: query.to_string(),
            text,
        })
    }

    /// Blocks until the instrument has worked through everything sent so far.
    async fn sync(&mut self) -> Result<(), SessionError> {
        let text = self.query_text(AwgQuery::OperationComplete).await?;
        ensure!(
            text.trim() == "1",
            ResponseSnafu {
                query: AwgQuery::OperationComplete.to_string(),
                text,
            }
        );
        Ok(())
    }

    /// `*OPC?`, then surfaces whatever landed in the error queue meanwhile.
    async fn acknowledge(&mut self) -> Result<(), SessionError> {
        self.sync().await?;
        if self.config.check_errors {
            self.check_errors().await?;
        }
        Ok(())
    }
}

impl<S> Drop for Session<S> {
    fn drop(&mut self) {
        if self.io.is_some() {
            debug!("dropping open session to {}, connection closes", self.identity);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sim::SimulatedAwg;

    fn test_config() -> SessionConfig {
        SessionConfig {
            timeout: Duration::from_millis(200),
            min_pause: Duration::ZERO,
            ..Default::default()
        }
    }

    async fn open_sim() -> (SimulatedAwg, Session<tokio::io::DuplexStream>) {
        let sim = SimulatedAwg::new();
        let session = Session::from_stream(sim.spawn_duplex(), test_config())
            .await
            .unwrap();
        (sim, session)
    }

    #[tokio::test]
    async fn opens_and_identifies() {
        let (sim, session) = open_sim().await;
        assert!(session.is_open());
        assert_eq!(session.identity().model, "T3AWG3252");
        assert_eq!(
            session.limits().max_waveform_len,
            sim.snapshot().max_length
        );
    }

    #[tokio::test]
    async fn configures_channel() {
        let (sim, mut session) = open_sim().await;
        let config = ChannelConfig {
            amplitude: Voltage(1.0),
            offset: Voltage(0.25),
            frequency: None,
            sample_rate: SamplingRate(500e6),
        };
        session.configure_channel(ChannelId::CH2, config).await.unwrap();

        let state = sim.snapshot();
        assert!((state.channels[1].amplitude() - 1.0).abs() < 1e-9);
        assert!((state.channels[1].offset() - 0.25).abs() < 1e-9);
        assert_eq!(state.sample_rate, 500e6);
        assert_eq!(
            session.channel(ChannelId::CH2).and_then(|c| c.config),
            Some(config)
        );
    }

    #[tokio::test]
    async fn moves_offset_across_the_window() {
        let (sim, mut session) = open_sim().await;
        let up = ChannelConfig {
            amplitude: Voltage(0.5),
            offset: Voltage(2.5),
            ..Default::default()
        };
        let down = ChannelConfig {
            amplitude: Voltage(4.0),
            offset: Voltage(-0.5),
            ..Default::default()
        };
        session.configure_channel(ChannelId::CH1, up).await.unwrap();
        session.configure_channel(ChannelId::CH1, down).await.unwrap();

        let ch = &sim.snapshot().channels[0];
        assert!((ch.high - 1.5).abs() < 1e-9);
        assert!((ch.low + 2.5).abs() < 1e-9);
    }

    #[tokio::test]
    async fn rejects_before_sending() {
        let (sim, mut session) = open_sim().await;
        let sent = sim.snapshot().received.len();

        let err = session
            .configure_channel(ChannelId(3), ChannelConfig::default())
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            SessionError::Validation {
                source: ValidationError::ChannelOutOfRange { .. }
            }
        ));

        let err = session
            .upload_waveform(ChannelId::CH1, &[0.0, 1.5])
            .await
            .unwrap_err();
        assert!(matches!(err, SessionError::Validation { .. }));

        assert_eq!(sim.snapshot().received.len(), sent);
    }

    #[tokio::test]
    async fn uploads_and_selects_waveform() {
        let (sim, mut session) = open_sim().await;
        let samples = [0.0, 0.5, 1.0, 0.5, 0.0, -0.5, -1.0, -0.5];
        session
            .upload_waveform(ChannelId::CH1, &samples)
            .await
            .unwrap();

        let state = sim.snapshot();
        assert_eq!(state.waveforms["temp1"], samples);
        assert_eq!(state.channels[0].waveform.as_deref(), Some("temp1"));
        assert_eq!(state.length, samples.len());
        assert!(state.errors.is_empty());

        let cached = session.channel(ChannelId::CH1).unwrap();
        assert_eq!(cached.waveform.as_deref(), Some("temp1"));
        assert_eq!(cached.waveform_len, Some(samples.len()));
    }

    #[tokio::test]
    async fn capacity_is_checked_before_transfer() {
        let sim = SimulatedAwg::new();
        let config = SessionConfig {
            query_limits: false,
            limits: InstrumentLimits {
                max_waveform_len: 4,
                ..Default::default()
            },
            ..test_config()
        };
        let mut session = Session::from_stream(sim.spawn_duplex(), config)
            .await
            .unwrap();

        let err = session
            .upload_waveform(ChannelId::CH1, &[0.0; 5])
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            SessionError::Capacity {
                source: CapacityError { samples: 5, max: 4 }
            }
        ));
        assert_eq!(sim.snapshot().block_bytes, 0);
    }

    #[tokio::test]
    async fn output_and_readback() {
        let (_sim, mut session) = open_sim().await;
        session.enable_output(ChannelId::CH1, true).await.unwrap();

        let readback = session.query_channel(ChannelId::CH1).await.unwrap();
        assert_eq!(readback.output, OutputState::On);
        assert_eq!(readback.sample_rate, SamplingRate(1e9));

        session.enable_output(ChannelId::CH1, false).await.unwrap();
        let readback = session.query_channel(ChannelId::CH1).await.unwrap();
        assert_eq!(readback.output, OutputState::Off);
    }

    #[tokio::test]
    async fn error_queue() {
        let (sim, mut session) = open_sim().await;
        assert_eq!(
            session.query_error().await.unwrap(),
            ErrorQueueEntry::NoError
        );

        sim.inject_error(-222, "Data out of range");
        sim.inject_error(-221, "Settings conflict");
        let err = session.check_errors().await.unwrap_err();
        assert!(matches!(
            err,
            SessionError::Instrument {
                source: InstrumentError { code: -222, .. }
            }
        ));
        // drained
        assert_eq!(
            session.query_error().await.unwrap(),
            ErrorQueueEntry::NoError
        );
    }

    #[tokio::test]
    async fn unknown_command_surfaces_as_instrument_error() {
        let (_sim, mut session) = open_sim().await;
        session.send_raw("FOO:BAR 1").await.unwrap();

        let err = session.check_errors().await.unwrap_err();
        assert!(matches!(
            err,
            SessionError::Instrument {
                source: InstrumentError { code: -113, .. }
            }
        ));
    }

    #[tokio::test]
    async fn sequencer_control() {
        let (_sim, mut session) = open_sim().await;
        assert_eq!(session.run_state().await.unwrap(), RunState::Stopped);

        session.set_run_mode(RunMode::TriggeredContinuous).await.unwrap();
        assert_eq!(session.run_mode().await.unwrap(), RunMode::TriggeredContinuous);

        session.run().await.unwrap();
        assert_eq!(
            session.run_state().await.unwrap(),
            RunState::WaitingForTrigger
        );
        session.trigger().await.unwrap();
        assert_eq!(session.run_state().await.unwrap(), RunState::Running);

        session.stop().await.unwrap();
        assert_eq!(session.run_state().await.unwrap(), RunState::Stopped);
    }

    #[tokio::test]
    async fn upload_signal_sequence() {
        let (sim, mut session) = open_sim().await;
        session
            .upload_signal(
                ChannelId::CH2,
                "pulse",
                &[0.0, 1.0, 1.0, 0.0],
                Voltage(2.0),
                Some(SamplingRate(100e6)),
                true,
            )
            .await
            .unwrap();

        let state = sim.snapshot();
        let ch = &state.channels[1];
        assert!(ch.output);
        assert_eq!(ch.load, OutputLoad::FiftyOhm);
        assert_eq!((ch.high, ch.low), (2.0, 0.0));
        assert_eq!(ch.waveform.as_deref(), Some("pulse"));
        assert_eq!(state.waveforms["pulse"], [0.0, 1.0, 1.0, 0.0, 100.0]);
        assert_eq!(state.length, 4);
        assert_eq!(state.voltage_unit, VoltageUnit::HighLow);
        assert_eq!(state.sample_rate, 100e6);
        assert_eq!(state.run_state, RunState::Running);
    }

    #[tokio::test]
    async fn upload_signal_checks_before_sending() {
        let sim = SimulatedAwg::new();
        let config = SessionConfig {
            query_limits: false,
            limits: InstrumentLimits {
                max_waveform_len: 4,
                ..Default::default()
            },
            ..test_config()
        };
        let mut session = Session::from_stream(sim.spawn_duplex(), config)
            .await
            .unwrap();
        let sent = sim.snapshot().received;

        let err = session
            .upload_signal(ChannelId::CH1, "w", &[0.0; 5], Voltage(1.0), None, false)
            .await
            .unwrap_err();
        assert!(matches!(err, SessionError::Capacity { .. }));

        let err = session
            .upload_signal(ChannelId::CH1, "w", &[0.0, 2.0], Voltage(1.0), None, false)
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            SessionError::Validation {
                source: ValidationError::SampleOutOfRange { index: 1, .. }
            }
        ));

        let err = session
            .upload_signal(ChannelId::CH1, "bad name", &[0.0], Voltage(1.0), None, false)
            .await
            .unwrap_err();
        assert!(matches!(err, SessionError::Validation { .. }));

        let state = sim.snapshot();
        assert_eq!(state.received, sent);
        assert_eq!(state.run_state, RunState::Stopped);
    }

    #[tokio::test]
    async fn channel_count_is_capped() {
        let sim = SimulatedAwg::new();
        let config = SessionConfig {
            limits: InstrumentLimits {
                channels: 5,
                ..Default::default()
            },
            ..test_config()
        };
        let mut session = Session::from_stream(sim.spawn_duplex(), config)
            .await
            .unwrap();
        assert_eq!(usize::from(session.limits().channels), MAX_CHANNELS);

        let sent = sim.snapshot().received.len();
        let err = session
            .configure_channel(ChannelId(5), ChannelConfig::default())
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            SessionError::Validation {
                source: ValidationError::ChannelOutOfRange { channels: 4, .. }
            }
        ));
        assert_eq!(sim.snapshot().received.len(), sent);
    }

    #[tokio::test]
    async fn voltage_window_keeps_cache_honest() {
        let (_sim, mut session) = open_sim().await;

        session
            .set_voltage_window(ChannelId::CH1, Voltage(1.0), Voltage(-1.0))
            .await
            .unwrap();
        assert_eq!(session.channel(ChannelId::CH1).unwrap().config, None);

        let config = ChannelConfig {
            sample_rate: SamplingRate(200e6),
            ..Default::default()
        };
        session.configure_channel(ChannelId::CH1, config).await.unwrap();
        session
            .set_voltage_window(ChannelId::CH1, Voltage(2.0), Voltage(0.0))
            .await
            .unwrap();

        let cached = session.channel(ChannelId::CH1).unwrap().config.unwrap();
        assert_eq!(cached.amplitude, Voltage(2.0));
        assert_eq!(cached.offset, Voltage(1.0));
        assert_eq!(cached.sample_rate, SamplingRate(200e6));
    }

    #[tokio::test]
    async fn close_is_idempotent() {
        let (_sim, mut session) = open_sim().await;
        session.close().await.unwrap();
        session.close().await.unwrap();
        assert!(!session.is_open());

        assert!(matches!(
            session.enable_output(ChannelId::CH1, true).await,
            Err(SessionError::NotOpen)
        ));
        assert!(matches!(
            session.query_error().await,
            Err(SessionError::NotOpen)
        ));
    }
}
