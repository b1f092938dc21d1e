//! Shared types used by the prober and the entry point.

pub mod timing;

pub use timing::{format_duration, Edge, Phase, TimingRecord, TraceEvent, TraceHook};
