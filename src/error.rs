use thiserror::Error;

/// Whether a probe failed before or after touching the network.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// The request could not be built; no network activity occurred.
    Construction,
    /// DNS, connect, TLS or the HTTP exchange failed.
    Transport,
}

#[derive(Error, Debug)]
pub enum ProbeError {
    #[error("Invalid URL: {0}")]
    InvalidUrl(String),

    #[error("Failed to build request: {0}")]
    RequestBuild(#[from] hyper::http::Error),

    #[error("DNS lookup failed: {0}")]
    Dns(String),

    #[error("TCP connection failed: {0}")]
    Connect(#[source] std::io::Error),

    #[error("TLS handshake failed: {0}")]
    Tls(String),

    #[error("HTTP error: {0}")]
    Http(#[from] hyper::Error),

    #[error("Timeout: {0} timed out")]
    Timeout(&'static str),
}

impl ProbeError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            ProbeError::InvalidUrl(_) | ProbeError::RequestBuild(_) => ErrorKind::Construction,
            _ => ErrorKind::Transport,
        }
    }

    pub fn is_construction(&self) -> bool {
        self.kind() == ErrorKind::Construction
    }

    pub fn is_transport(&self) -> bool {
        self.kind() == ErrorKind::Transport
    }

    /// Stable machine-readable code for the failure.
    pub fn code(&self) -> &'static str {
        match self {
            ProbeError::InvalidUrl(_) => "INVALID_URL",
            ProbeError::RequestBuild(_) => "REQUEST_BUILD_ERROR",
            ProbeError::Dns(_) => "DNS_ERROR",
            ProbeError::Connect(_) => "CONNECTION_FAILED",
            ProbeError::Tls(_) => "TLS_ERROR",
            ProbeError::Http(_) => "HTTP_ERROR",
            ProbeError::Timeout(_) => "TIMEOUT",
        }
    }
}
