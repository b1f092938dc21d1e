//! DNS resolution infrastructure.
//!
//! The prober resolves through the [`DnsResolver`] trait so tests can supply
//! fixed answers instead of querying real name servers.

use crate::error::ProbeError;
use hickory_resolver::{config::*, TokioAsyncResolver};
use std::net::IpAddr;

/// Trait for DNS resolution.
///
/// The prober owns one resolver instance and calls it once per probe,
/// bracketed by the DNS start and end events. Implementations return every
/// address they find; the prober dials them in order until one connects.
#[allow(async_fn_in_trait)]
pub trait DnsResolver: Send + Sync {
    /// Resolves a hostname to its addresses, in preference order.
    ///
    /// # Arguments
    ///
    /// * `host` - The hostname to resolve, without brackets or port
    ///
    /// # Returns
    ///
    /// The resolved addresses, or `ProbeError::Dns` when the lookup fails.
    async fn resolve(&self, host: &str) -> Result<Vec<IpAddr>, ProbeError>;
}

/// DNS resolver implementation using hickory-resolver.
pub struct HickoryDnsResolver {
    resolver: TokioAsyncResolver,
}

impl HickoryDnsResolver {
    /// Creates a resolver from the system configuration, falling back to
    /// hickory's default upstreams when it cannot be read.
    pub fn new() -> Self {
        let resolver = TokioAsyncResolver::tokio_from_system_conf().unwrap_or_else(|e| {
            tracing::debug!("System resolver config unavailable ({}), using defaults", e);
            TokioAsyncResolver::tokio(ResolverConfig::default(), ResolverOpts::default())
        });
        Self { resolver }
    }
}

impl Default for HickoryDnsResolver {
    fn default() -> Self {
        Self::new()
    }
}

impl DnsResolver for HickoryDnsResolver {
    async fn resolve(&self, host: &str) -> Result<Vec<IpAddr>, ProbeError> {
        let response = self
            .resolver
            .lookup_ip(host)
            .await
            .map_err(|e| ProbeError::Dns(e.to_string()))?;

        let ips: Vec<IpAddr> = response.iter().collect();
        if ips.is_empty() {
            return Err(ProbeError::Dns(format!("no addresses found for {}", host)));
        }
        Ok(ips)
    }
}

/// Returns the address if `host` is an IP literal, which needs no lookup.
///
/// Accepts bracketed IPv6 as it appears in URL authorities.
pub fn ip_literal(host: &str) -> Option<IpAddr> {
    host.trim_start_matches('[')
        .trim_end_matches(']')
        .parse()
        .ok()
}
