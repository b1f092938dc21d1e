//! Infrastructure layer providing abstractions for external dependencies.
//!
//! This module contains traits and implementations for:
//! - DNS resolution
//! - TLS connections

pub mod dns;
pub mod tls;

pub use dns::{DnsResolver, HickoryDnsResolver};
pub use tls::{create_tls_config, RustlsTlsProvider, TlsProvider};
