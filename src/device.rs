use crate::address::ResourceAddress;
use log::{debug, trace};
use snafu::{ensure, Location, ResultExt, Snafu};
use std::{io::Write, str::Utf8Error, time::Duration};
use tokio::{
    io::{AsyncBufReadExt, AsyncRead, AsyncWrite, AsyncWriteExt, BufReader},
    net::TcpStream,
    time::{timeout, Instant},
};

#[derive(Debug, Snafu)]
pub enum ConnectError {
    #[snafu(display("could not connect to {address}"))]
    Connect {
        address: ResourceAddress,
        source: std::io::Error,
    },
    #[snafu(display("connecting to {address} timed out after {after:?}"))]
    ConnectTimeout {
        address: ResourceAddress,
        after: Duration,
    },
}

pub async fn connect(address: &ResourceAddress, after: Duration) -> Result<TcpStream, ConnectError> {
    debug!("connecting to {address}");

    let stream = timeout(after, TcpStream::connect((address.host.as_str(), address.port)))
        .await
        .map_err(|_| ConnectTimeoutSnafu { address: address.clone(), after }.build())?
        .context(ConnectSnafu { address: address.clone() })?;

    // commands are tiny and latency bound
    stream
        .set_nodelay(true)
        .context(ConnectSnafu { address: address.clone() })?;

    Ok(stream)
}

/// How long to wait for a late answer before the next command after a
/// timed-out read.
const LATE_ANSWER_GRACE: Duration = Duration::from_millis(20);

#[derive(Debug, Snafu)]
pub enum IoError {
    #[snafu(display("link I/O failed"))]
    Link {
        #[snafu(implicit)]
        location: Location,
        source: std::io::Error,
    },
    #[snafu(display("no answer to {command:?} within {after:?}"))]
    Timeout { command: String, after: Duration },
    #[snafu(display("instrument closed the connection"))]
    Closed,
    #[snafu(display("answer is not UTF-8"))]
    Utf8 { source: Utf8Error },
}

impl From<std::io::Error> for IoError {
    #[track_caller]
    fn from(source: std::io::Error) -> Self {
        IoError::Link {
            location: Location::default(),
            source,
        }
    }
}

/// Line-oriented command/answer link to the instrument.
///
/// Every command gets a `\n` terminator appended, so callers pass it bare.
/// Consecutive writes are spaced by at least `min_pause`, and every write and
/// read is bounded by `timeout`.
///
/// After a read times out the answer may still arrive. Whatever is pending
/// by the next command (within a short grace period) is discarded then; an
/// answer later than that still desynchronizes the link.
pub struct Io<S> {
    stream: BufReader<S>,
    last_write: Instant,
    min_pause: Duration,
    timeout: Duration,
    line: Vec<u8>,
    /// A read timed out and its answer may still be in flight.
    stale: bool,
}

impl<S: AsyncRead + AsyncWrite + Unpin> Io<S> {
    pub fn new(stream: S, timeout: Duration, min_pause: Duration) -> Self {
        Self {
            stream: BufReader::new(stream),
            last_write: Instant::now()
                .checked_sub(min_pause)
                .unwrap_or_else(Instant::now),
            min_pause,
            timeout,
            line: Vec::with_capacity(256),
            stale: false,
        }
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    pub fn set_timeout(&mut self, timeout: Duration) {
        self.timeout = timeout;
    }

    pub async fn cmd(&mut self, command: &[u8]) -> Result<(), IoError> {
        if let Some(wait) = self.min_pause.checked_sub(self.last_write.elapsed()) {
            tokio::time::sleep(wait).await;
        }

        self.cmd_nowait(command).await
    }

    pub async fn cmd_nowait(&mut self, command: &[u8]) -> Result<(), IoError> {
        if self.stale {
            self.discard_late_answers().await;
        }

        log_command(command);

        let after = self.timeout;
        let stream = &mut self.stream;
        let write = async {
            stream.write_all(command).await?;
            stream.write_all(b"\n").await?;
            stream.flush().await
        };

        timeout(after, write)
            .await
            .map_err(|_| timeout_error(command, after))??;

        self.last_write = Instant::now();

        Ok(())
    }

    pub async fn cmd_with_writer(
        &mut self,
        f: impl FnOnce(&mut Vec<u8>) -> Result<(), std::io::Error>,
    ) -> Result<(), IoError> {
        let mut buf = Vec::with_capacity(64);
        f(&mut buf)?;
        self.cmd(&buf).await
    }

    /// Reads one answer line, without the terminator.
    pub async fn read_line(&mut self) -> Result<String, IoError> {
        self.line.clear();

        let after = self.timeout;
        let read = match timeout(after, self.stream.read_until(b'\n', &mut self.line)).await {
            Ok(read) => read?,
            Err(_) => {
                self.stale = true;
                return TimeoutSnafu { command: "<read>", after }.fail();
            }
        };
        ensure!(read > 0, ClosedSnafu);

        let line = std::str::from_utf8(&self.line).context(Utf8Snafu)?;
        let line = line.trim_end_matches(['\r', '\n']);
        trace!("< {line}");

        Ok(line.to_owned())
    }

    pub async fn cmd_output(&mut self, command: &[u8]) -> Result<String, IoError> {
        self.cmd(command).await?;
        self.read_line().await.map_err(|e| match e {
            IoError::Timeout { after, .. } => IoError::Timeout {
                command: String::from_utf8_lossy(command).into_owned(),
                after,
            },
            e => e,
        })
    }

    async fn discard_late_answers(&mut self) {
        self.stale = false;

        let mut late = Vec::new();
        loop {
            late.clear();
            match timeout(LATE_ANSWER_GRACE, self.stream.read_until(b'\n', &mut late)).await {
                Ok(Ok(n)) if n > 0 => {
                    debug!("dropping late answer {:?}", String::from_utf8_lossy(&late).trim_end())
                }
                _ => break,
            }
        }
    }

    pub async fn shutdown(&mut self) -> Result<(), IoError> {
        self.stream.shutdown().await?;
        Ok(())
    }
}

fn timeout_error(command: &[u8], after: Duration) -> IoError {
    TimeoutSnafu {
        command: String::from_utf8_lossy(&command[..command.len().min(64)]),
        after,
    }
    .build()
}

fn log_command(command: &[u8]) {
    // waveform blocks can be megabytes, only log their head
    const MAX_LOGGED: usize = 96;

    if log::log_enabled!(log::Level::Debug) {
        let shown = &command[..command.len().min(MAX_LOGGED)];
        let text = String::from_utf8_lossy(shown);
        let text = text.trim_end();
        if command.len() > MAX_LOGGED {
            debug!("> {text}... ({} bytes)", command.len());
        } else {
            debug!("> {text}");
        }
    }
}

/// Lets `write!` target the command buffer directly.
pub(crate) fn render(buf: &mut Vec<u8>, command: impl std::fmt::Display) -> std::io::Result<()> {
    write!(buf, "{command}")
}
