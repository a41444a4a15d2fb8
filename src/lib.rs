//! Remote control of Teledyne T3AWG3252 arbitrary waveform generators over
//! their raw SCPI socket.
//!
//! ```no_run
//! # async fn demo() -> Result<(), Box<dyn std::error::Error>> {
//! use std::time::Duration;
//! use t3awg::{ChannelConfig, ChannelId, Session};
//!
//! let mut awg = Session::open("TCPIP0::192.168.1.20::5025::SOCKET", Duration::from_secs(5)).await?;
//! awg.configure_channel(ChannelId::CH1, ChannelConfig::default()).await?;
//! awg.upload_waveform(ChannelId::CH1, &[0.0, 0.5, 1.0, 0.5, 0.0, -0.5, -1.0, -0.5]).await?;
//! awg.enable_output(ChannelId::CH1, true).await?;
//! awg.close().await?;
//! # Ok(())
//! # }
//! ```

pub mod address;
pub mod command;
pub mod config;
pub mod consts;
pub mod data;
pub mod device;
pub mod limits;
pub mod scaled_number;
pub mod session;
pub mod sim;

pub use address::ResourceAddress;
pub use config::SessionConfig;
pub use data::{
    awg::{Identity, LoopCount, RunMode, RunState, VoltageUnit},
    channel::{ChannelConfig, ChannelId, ChannelReadback, OutputLoad, OutputState},
    error_queue::ErrorQueueEntry,
    units::{Frequency, SamplingRate, Voltage},
    waveform::Waveform,
};
pub use limits::{CapacityError, InstrumentLimits, ValidationError};
pub use session::{ConnectionError, InstrumentError, Session, SessionError};
