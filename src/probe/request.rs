//! Target parsing and outbound request construction.

use crate::error::ProbeError;
use http_body_util::Empty;
use hyper::{
    body::Bytes,
    header::{ACCEPT, HOST, USER_AGENT},
    Method, Request,
};
use url::{Host, Url};

const USER_AGENT_VALUE: &str = concat!("pingometer/", env!("CARGO_PKG_VERSION"));

/// A parsed probe target.
#[derive(Debug, Clone)]
pub struct RequestTarget {
    pub url: Url,
    /// Host without IPv6 brackets, as used for DNS and SNI.
    pub host: String,
    pub port: u16,
    pub is_https: bool,
}

impl RequestTarget {
    /// Validates and parses `raw`. Fails without touching the network.
    pub fn parse(raw: &str) -> Result<Self, ProbeError> {
        // url::Url silently drops tabs and newlines, so check the raw input.
        if raw.chars().any(char::is_control) {
            return Err(ProbeError::InvalidUrl(
                "invalid control character in URL".to_string(),
            ));
        }

        let url = Url::parse(raw).map_err(|e| ProbeError::InvalidUrl(e.to_string()))?;

        let is_https = match url.scheme() {
            "https" => true,
            "http" => false,
            other => {
                return Err(ProbeError::InvalidUrl(format!(
                    "unsupported scheme: {}",
                    other
                )))
            }
        };

        let host = match url.host() {
            Some(Host::Domain(d)) => d.to_string(),
            Some(Host::Ipv4(ip)) => ip.to_string(),
            Some(Host::Ipv6(ip)) => ip.to_string(),
            None => return Err(ProbeError::InvalidUrl("URL has no host".to_string())),
        };

        let port = url
            .port_or_known_default()
            .unwrap_or(if is_https { 443 } else { 80 });

        Ok(Self {
            url,
            host,
            port,
            is_https,
        })
    }

    /// `Host` header value; carries the port only when it is not the
    /// scheme's default.
    pub fn authority(&self) -> String {
        let host = self.url.host_str().unwrap_or(&self.host);
        match self.url.port() {
            Some(port) => format!("{}:{}", host, port),
            None => host.to_string(),
        }
    }

    pub fn path_and_query(&self) -> String {
        match self.url.query() {
            Some(query) => format!("{}?{}", self.url.path(), query),
            None => self.url.path().to_string(),
        }
    }

    /// Builds the GET request in origin form for an HTTP/1.1 connection.
    pub fn build_request(&self) -> Result<Request<Empty<Bytes>>, ProbeError> {
        let request = Request::builder()
            .method(Method::GET)
            .uri(self.path_and_query())
            .header(HOST, self.authority())
            .header(USER_AGENT, USER_AGENT_VALUE)
            .header(ACCEPT, "*/*")
            .body(Empty::new())?;
        Ok(request)
    }
}
