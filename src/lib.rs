pub mod config;
pub mod error;
pub mod infra;
pub mod probe;
pub mod shared;

pub use config::Config;
pub use error::{ErrorKind, ProbeError};
pub use probe::Prober;
pub use shared::{TimingRecord, TraceEvent, TraceHook};
