use crate::consts::DEFAULT_PORT;
use snafu::{ensure, OptionExt, ResultExt, Snafu};
use std::{fmt, num::ParseIntError, str::FromStr};

/// Where to find the instrument.
///
/// Accepts the VISA socket and instrument forms and a plain `host[:port]`:
///
/// - `TCPIP0::192.168.1.20::5025::SOCKET`
/// - `TCPIP::awg.lab::INSTR` (the instrument's raw SCPI port is used)
/// - `192.168.1.20` / `awg.lab:5025`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResourceAddress {
    pub host: String,
    pub port: u16,
}

#[derive(Debug, Snafu, PartialEq, Eq)]
pub enum AddressError {
    #[snafu(display("empty resource address"))]
    Empty,
    #[snafu(display("unsupported resource interface in {address:?}, only TCPIP is supported"))]
    UnsupportedInterface { address: String },
    #[snafu(display("unsupported resource class {class:?}"))]
    UnsupportedClass { class: String },
    #[snafu(display("missing host in {address:?}"))]
    MissingHost { address: String },
    #[snafu(display("invalid port in {address:?}"))]
    InvalidPort {
        address: String,
        source: ParseIntError,
    },
}

impl ResourceAddress {
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
        }
    }

    fn parse_visa(address: &str) -> Result<Self, AddressError> {
        let mut parts = address.split("::");
        let interface = parts.next().unwrap_or_default();

        let board = interface
            .get(..5)
            .filter(|p| p.eq_ignore_ascii_case("TCPIP"))
            .map(|_| &interface[5..])
            .context(UnsupportedInterfaceSnafu { address })?;
        ensure!(
            board.chars().all(|c| c.is_ascii_digit()),
            UnsupportedInterfaceSnafu { address }
        );

        let host = parts
            .next()
            .filter(|h| !h.is_empty())
            .context(MissingHostSnafu { address })?;

        let rest: Vec<&str> = parts.collect();
        let port = match rest.as_slice() {
            [] => DEFAULT_PORT,
            [class] if class.eq_ignore_ascii_case("INSTR") => DEFAULT_PORT,
            [port, class] if class.eq_ignore_ascii_case("SOCKET") => {
                port.parse().context(InvalidPortSnafu { address })?
            }
            // `inst0`-style device names of VXI-11 resources
            [_device, class] if class.eq_ignore_ascii_case("INSTR") => DEFAULT_PORT,
            [.., class] => return UnsupportedClassSnafu { class: *class }.fail(),
        };

        Ok(Self::new(host, port))
    }

    fn parse_host_port(address: &str) -> Result<Self, AddressError> {
        match address.rsplit_once(':') {
            // bare IPv6 literals are not supported without brackets
            Some((host, port)) if !host.contains(':') => {
                ensure!(!host.is_empty(), MissingHostSnafu { address });
                let port = port.parse().context(InvalidPortSnafu { address })?;
                Ok(Self::new(host, port))
            }
            _ => Ok(Self::new(address, DEFAULT_PORT)),
        }
    }
}

impl FromStr for ResourceAddress {
    type Err = AddressError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        ensure!(!s.is_empty(), EmptySnafu);

        if s.contains("::") {
            Self::parse_visa(s)
        } else {
            Self::parse_host_port(s)
        }
    }
}

impl fmt::Display for ResourceAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "TCPIP0::{}::{}::SOCKET", self.host, self.port)
    }
}
