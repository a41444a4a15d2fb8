pub mod awg;
pub mod channel;
pub mod error_queue;
pub mod units;
pub mod waveform;
