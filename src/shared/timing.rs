//! Timing capture for a single HTTP request.
//!
//! The transport publishes [`TraceEvent`]s as the request moves through DNS,
//! connect, TLS and response phases. A [`TimingRecord`] subscribes to them and
//! stamps the instant of each event; durations are derived afterwards.

use std::fmt;
use std::time::{Duration, Instant};

/// A request phase that has a start and an end.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Dns,
    TlsHandshake,
    Connect,
}

/// Which side of a phase an event marks.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Edge {
    Start,
    End,
}

/// Lifecycle events fired while a request executes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TraceEvent {
    Phase(Phase, Edge),
    FirstByte,
    RequestStart,
    RequestEnd,
}

/// Observer for request lifecycle events.
///
/// The transport calls `on_event` at each boundary. Handlers are side-effect
/// only and cannot fail.
pub trait TraceHook {
    fn on_event(&mut self, event: TraceEvent);
}

impl<F> TraceHook for F
where
    F: FnMut(TraceEvent),
{
    fn on_event(&mut self, event: TraceEvent) {
        self(event)
    }
}

/// Instants captured for each phase of one request.
///
/// Fields stay `None` until the matching event fires. A phase that never
/// happened (no TLS on plain HTTP, no DNS for an IP literal) keeps both edges
/// unset and its duration reports as `None`.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct TimingRecord {
    pub dns_start: Option<Instant>,
    pub dns_end: Option<Instant>,
    pub tls_start: Option<Instant>,
    pub tls_end: Option<Instant>,
    pub connect_start: Option<Instant>,
    pub connect_end: Option<Instant>,
    pub first_byte: Option<Instant>,
    pub request_start: Option<Instant>,
    pub request_end: Option<Instant>,
}

impl TimingRecord {
    /// Creates an empty record with every instant unset.
    pub fn new() -> Self {
        Self::default()
    }

    /// Stamps the current instant into the field for `event`.
    pub fn record_event(&mut self, event: TraceEvent) {
        self.record_event_at(event, Instant::now());
    }

    /// Stamps `at` into the field for `event`.
    pub fn record_event_at(&mut self, event: TraceEvent, at: Instant) {
        let slot = match event {
            TraceEvent::Phase(Phase::Dns, Edge::Start) => &mut self.dns_start,
            TraceEvent::Phase(Phase::Dns, Edge::End) => &mut self.dns_end,
            TraceEvent::Phase(Phase::TlsHandshake, Edge::Start) => &mut self.tls_start,
            TraceEvent::Phase(Phase::TlsHandshake, Edge::End) => &mut self.tls_end,
            TraceEvent::Phase(Phase::Connect, Edge::Start) => &mut self.connect_start,
            TraceEvent::Phase(Phase::Connect, Edge::End) => &mut self.connect_end,
            TraceEvent::FirstByte => &mut self.first_byte,
            TraceEvent::RequestStart => &mut self.request_start,
            TraceEvent::RequestEnd => &mut self.request_end,
        };
        *slot = Some(at);
    }

    pub fn dns_duration(&self) -> Option<Duration> {
        span(self.dns_start, self.dns_end)
    }

    pub fn tls_handshake_duration(&self) -> Option<Duration> {
        span(self.tls_start, self.tls_end)
    }

    pub fn connect_duration(&self) -> Option<Duration> {
        span(self.connect_start, self.connect_end)
    }

    /// Time from handing the request to the transport until the response
    /// head arrives.
    pub fn time_to_first_byte(&self) -> Option<Duration> {
        span(self.request_start, self.first_byte)
    }

    /// Time from handing the request to the transport until the body has
    /// been read to the end.
    pub fn total_duration(&self) -> Option<Duration> {
        span(self.request_start, self.request_end)
    }
}

impl TraceHook for TimingRecord {
    fn on_event(&mut self, event: TraceEvent) {
        self.record_event(event);
    }
}

fn span(start: Option<Instant>, end: Option<Instant>) -> Option<Duration> {
    Some(end?.saturating_duration_since(start?))
}

/// Formats a phase duration as milliseconds, or `N/A` if it did not happen.
pub fn format_duration(duration: Option<Duration>) -> String {
    match duration {
        Some(d) => {
            let micros = d.as_micros();
            format!("{}.{:03}ms", micros / 1000, micros % 1000)
        }
        None => "N/A".to_string(),
    }
}

impl fmt::Display for TimingRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "DNS time: {}", format_duration(self.dns_duration()))?;
        writeln!(f, "TLS time: {}", format_duration(self.tls_handshake_duration()))?;
        writeln!(f, "Connection time: {}", format_duration(self.connect_duration()))?;
        writeln!(f, "TTFB: {}", format_duration(self.time_to_first_byte()))?;
        writeln!(f, "Total time: {}", format_duration(self.total_duration()))
    }
}
