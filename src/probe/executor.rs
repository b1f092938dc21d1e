//! Instrumented request execution.
//!
//! Drives one GET request through DNS, TCP connect, optional TLS and an
//! HTTP/1.1 exchange, firing a [`TraceEvent`] at each phase boundary.

use super::request::RequestTarget;
use crate::config::Config;
use crate::error::ProbeError;
use crate::infra::dns::{ip_literal, DnsResolver, HickoryDnsResolver};
use crate::infra::tls::{connect_tls, RustlsTlsProvider, TlsProvider};
use crate::shared::{Edge, Phase, TimingRecord, TraceEvent, TraceHook};
use http_body_util::{BodyExt, Empty};
use hyper::{body::Bytes, Request};
use hyper_util::rt::TokioIo;
use std::{
    future::Future,
    net::{IpAddr, SocketAddr},
    time::Duration,
};
use tokio::{net::TcpStream, time::timeout};

/// Runs `fut` under `limit`, reporting `what` if it does not finish in time.
async fn within<F, T>(limit: Duration, what: &'static str, fut: F) -> Result<T, ProbeError>
where
    F: Future<Output = Result<T, ProbeError>>,
{
    match timeout(limit, fut).await {
        Ok(result) => result,
        Err(_) => Err(ProbeError::Timeout(what)),
    }
}

/// Dials each address in turn and returns the first connection that
/// succeeds, or the last error once every address has failed.
async fn connect_any(ips: &[IpAddr], port: u16) -> Result<TcpStream, ProbeError> {
    let mut last_err = None;
    for ip in ips {
        let addr = SocketAddr::new(*ip, port);
        tracing::debug!(%addr, "Connecting");
        match TcpStream::connect(addr).await {
            Ok(stream) => return Ok(stream),
            Err(e) => {
                tracing::debug!(%addr, "Connect failed: {}", e);
                last_err = Some(e);
            }
        }
    }
    Err(ProbeError::Connect(last_err.unwrap_or_else(|| {
        std::io::Error::new(std::io::ErrorKind::AddrNotAvailable, "no addresses to dial")
    })))
}

/// An HTTP client instance that measures a single request per call.
///
/// Holds its own resolver and TLS configuration; nothing is shared through
/// process-wide state and no connection is reused between probes.
pub struct Prober<R = HickoryDnsResolver, T = RustlsTlsProvider> {
    resolver: R,
    tls: T,
    timeout: Duration,
}

impl Prober {
    /// Creates a prober with the system resolver and Mozilla roots.
    pub fn new(config: &Config) -> Result<Self, ProbeError> {
        Ok(Self {
            resolver: HickoryDnsResolver::new(),
            tls: RustlsTlsProvider::new()?,
            timeout: config.timeout,
        })
    }
}

impl<R: DnsResolver, T: TlsProvider> Prober<R, T> {
    /// Replaces the DNS resolver.
    pub fn with_resolver<R2: DnsResolver>(self, resolver: R2) -> Prober<R2, T> {
        Prober {
            resolver,
            tls: self.tls,
            timeout: self.timeout,
        }
    }

    /// Replaces the TLS provider, e.g. to trust a private root.
    pub fn with_tls<T2: TlsProvider>(self, tls: T2) -> Prober<R, T2> {
        Prober {
            resolver: self.resolver,
            tls,
            timeout: self.timeout,
        }
    }

    /// Sets the timeout applied to each network phase.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Issues one GET to `url` and returns its timing breakdown.
    ///
    /// Construction errors are returned before any network activity. On a
    /// transport error no record is returned.
    pub async fn probe(&self, url: &str) -> Result<TimingRecord, ProbeError> {
        let target = RequestTarget::parse(url)?;
        let request = target.build_request()?;

        tracing::debug!(url = %target.url, "Probing");

        let mut record = TimingRecord::new();
        self.execute(&target, request, &mut record).await?;
        Ok(record)
    }

    /// Executes `request` against `target`, reporting lifecycle events to
    /// `hook`.
    ///
    /// `RequestStart` fires before DNS and `RequestEnd` after the body has
    /// been read to the end. DNS events are skipped for IP literals, TLS
    /// events for plain HTTP.
    pub async fn execute<H: TraceHook>(
        &self,
        target: &RequestTarget,
        request: Request<Empty<Bytes>>,
        hook: &mut H,
    ) -> Result<(), ProbeError> {
        hook.on_event(TraceEvent::RequestStart);

        // DNS Resolution
        let ips = match ip_literal(&target.host) {
            Some(ip) => vec![ip],
            None => {
                hook.on_event(TraceEvent::Phase(Phase::Dns, Edge::Start));
                let ips = within(
                    self.timeout,
                    "DNS lookup",
                    self.resolver.resolve(&target.host),
                )
                .await?;
                hook.on_event(TraceEvent::Phase(Phase::Dns, Edge::End));
                ips
            }
        };
        if ips.is_empty() {
            return Err(ProbeError::Dns(format!(
                "no addresses found for {}",
                target.host
            )));
        }

        // TCP Connection
        hook.on_event(TraceEvent::Phase(Phase::Connect, Edge::Start));
        let tcp_stream = within(
            self.timeout,
            "TCP connection",
            connect_any(&ips, target.port),
        )
        .await?;
        hook.on_event(TraceEvent::Phase(Phase::Connect, Edge::End));

        if target.is_https {
            hook.on_event(TraceEvent::Phase(Phase::TlsHandshake, Edge::Start));
            let tls_stream = within(
                self.timeout,
                "TLS handshake",
                connect_tls(&self.tls, tcp_stream, &target.host),
            )
            .await?;
            hook.on_event(TraceEvent::Phase(Phase::TlsHandshake, Edge::End));

            self.exchange(TokioIo::new(tls_stream), request, hook).await
        } else {
            self.exchange(TokioIo::new(tcp_stream), request, hook).await
        }
    }

    /// Sends the request over an established connection and reads the full
    /// response.
    async fn exchange<I, H>(
        &self,
        io: I,
        request: Request<Empty<Bytes>>,
        hook: &mut H,
    ) -> Result<(), ProbeError>
    where
        I: hyper::rt::Read + hyper::rt::Write + Unpin + Send + 'static,
        H: TraceHook,
    {
        let (mut sender, conn) = hyper::client::conn::http1::handshake(io).await?;

        tokio::spawn(async move {
            if let Err(e) = conn.await {
                tracing::debug!("Connection error: {}", e);
            }
        });

        let response = within(self.timeout, "Response", async {
            sender.ready().await.map_err(ProbeError::from)?;
            sender.send_request(request).await.map_err(ProbeError::from)
        })
        .await?;
        hook.on_event(TraceEvent::FirstByte);

        let status = response.status();
        let body = within(self.timeout, "Body read", async {
            let collected = response.into_body().collect().await?;
            Ok::<_, ProbeError>(collected.to_bytes())
        })
        .await?;
        hook.on_event(TraceEvent::RequestEnd);

        tracing::debug!(status = status.as_u16(), bytes = body.len(), "Response received");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rustls_pki_types::{PrivateKeyDer, PrivatePkcs8KeyDer};
    use std::sync::Arc;
    use tokio::{
        io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt},
        net::TcpListener,
        sync::oneshot,
    };
    use tokio_rustls::TlsAcceptor;

    struct StaticResolver(Vec<IpAddr>);

    impl DnsResolver for StaticResolver {
        async fn resolve(&self, _host: &str) -> Result<Vec<IpAddr>, ProbeError> {
            Ok(self.0.clone())
        }
    }

    fn loopback() -> IpAddr {
        IpAddr::from([127, 0, 0, 1])
    }

    /// Nothing listens on [::1] for the IPv4-only test servers, so dialing
    /// it is refused, or rejected outright where IPv6 is disabled.
    fn dead_loopback() -> IpAddr {
        IpAddr::from(std::net::Ipv6Addr::LOCALHOST)
    }

    fn prober() -> Prober {
        Prober::new(&Config::default())
            .unwrap()
            .with_timeout(Duration::from_secs(5))
    }

    /// Reads one request head from `socket` and answers it after `delay`.
    async fn respond<S>(mut socket: S, delay: Duration, head: oneshot::Sender<String>)
    where
        S: AsyncRead + AsyncWrite + Unpin,
    {
        let mut buf = vec![0u8; 8192];
        let mut read = 0;
        loop {
            let n = socket.read(&mut buf[read..]).await.unwrap();
            if n == 0 {
                return;
            }
            read += n;
            if buf[..read].windows(4).any(|w| w == b"\r\n\r\n") {
                break;
            }
        }
        let _ = head.send(String::from_utf8_lossy(&buf[..read]).into_owned());

        tokio::time::sleep(delay).await;
        socket
            .write_all(b"HTTP/1.1 200 OK\r\nContent-Length: 5\r\nConnection: close\r\n\r\n")
            .await
            .unwrap();
        tokio::time::sleep(delay).await;
        socket.write_all(b"hello").await.unwrap();
        let _ = socket.shutdown().await;
    }

    /// Serves one HTTP/1.1 response after `delay`, handing back the raw
    /// request head it received.
    async fn serve_once(delay: Duration) -> (SocketAddr, oneshot::Receiver<String>) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let (tx, rx) = oneshot::channel();

        tokio::spawn(async move {
            let (socket, _) = listener.accept().await.unwrap();
            respond(socket, delay, tx).await;
        });

        (addr, rx)
    }

    /// Client TLS settings that trust a single self-signed certificate.
    struct PinnedRoot(Arc<rustls::ClientConfig>);

    impl TlsProvider for PinnedRoot {
        fn client_config(&self) -> Arc<rustls::ClientConfig> {
            self.0.clone()
        }
    }

    fn ring() -> Arc<rustls::crypto::CryptoProvider> {
        Arc::new(rustls::crypto::ring::default_provider())
    }

    /// Serves one response over TLS with a fresh certificate for
    /// `localhost`, returning the port and a provider that trusts it.
    async fn serve_tls_once(delay: Duration) -> (u16, PinnedRoot) {
        let rcgen::CertifiedKey { cert, key_pair } =
            rcgen::generate_simple_self_signed(vec!["localhost".to_string()]).unwrap();
        let cert_der = cert.der().clone();
        let key_der = PrivateKeyDer::Pkcs8(PrivatePkcs8KeyDer::from(key_pair.serialize_der()));

        let server_config = rustls::ServerConfig::builder_with_provider(ring())
            .with_safe_default_protocol_versions()
            .unwrap()
            .with_no_client_auth()
            .with_single_cert(vec![cert_der.clone()], key_der)
            .unwrap();
        let acceptor = TlsAcceptor::from(Arc::new(server_config));

        let mut roots = rustls::RootCertStore::empty();
        roots.add(cert_der).unwrap();
        let client_config = rustls::ClientConfig::builder_with_provider(ring())
            .with_safe_default_protocol_versions()
            .unwrap()
            .with_root_certificates(roots)
            .with_no_client_auth();

        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();

        tokio::spawn(async move {
            let (socket, _) = listener.accept().await.unwrap();
            let tls = acceptor.accept(socket).await.unwrap();
            let (tx, _rx) = oneshot::channel();
            respond(tls, delay, tx).await;
        });

        (port, PinnedRoot(Arc::new(client_config)))
    }

    #[tokio::test]
    async fn test_plain_http_ip_literal() {
        let (addr, head) = serve_once(Duration::from_millis(20)).await;
        let url = format!("http://{}/health?probe=1", addr);

        let record = prober().probe(&url).await.unwrap();

        assert!(record.dns_duration().is_none());
        assert!(record.tls_handshake_duration().is_none());
        assert!(record.connect_duration().is_some());

        let ttfb = record.time_to_first_byte().unwrap();
        let total = record.total_duration().unwrap();
        assert!(ttfb >= Duration::from_millis(20));
        assert!(total >= ttfb);
        assert!(total >= record.connect_duration().unwrap());

        let head = head.await.unwrap();
        assert!(head.starts_with("GET /health?probe=1 HTTP/1.1\r\n"));
        assert!(head.to_lowercase().contains(&format!("host: {}", addr)));
    }

    #[tokio::test]
    async fn test_resolved_host_records_dns() {
        let (addr, _head) = serve_once(Duration::ZERO).await;
        let url = format!("http://probe.test:{}/", addr.port());

        let record = prober()
            .with_resolver(StaticResolver(vec![loopback()]))
            .probe(&url)
            .await
            .unwrap();

        let dns = record.dns_duration().unwrap();
        assert!(dns <= record.total_duration().unwrap());
        assert!(record.tls_handshake_duration().is_none());
    }

    #[tokio::test]
    async fn test_hook_event_order() {
        let (addr, _head) = serve_once(Duration::ZERO).await;
        let target = RequestTarget::parse(&format!("http://probe.test:{}/", addr.port())).unwrap();
        let request = target.build_request().unwrap();

        let mut events = Vec::new();
        let mut hook = |event: TraceEvent| events.push(event);
        prober()
            .with_resolver(StaticResolver(vec![loopback()]))
            .execute(&target, request, &mut hook)
            .await
            .unwrap();

        assert_eq!(
            events,
            vec![
                TraceEvent::RequestStart,
                TraceEvent::Phase(Phase::Dns, Edge::Start),
                TraceEvent::Phase(Phase::Dns, Edge::End),
                TraceEvent::Phase(Phase::Connect, Edge::Start),
                TraceEvent::Phase(Phase::Connect, Edge::End),
                TraceEvent::FirstByte,
                TraceEvent::RequestEnd,
            ]
        );
    }

    #[tokio::test]
    async fn test_falls_through_to_next_address() {
        let (addr, _head) = serve_once(Duration::ZERO).await;
        let url = format!("http://probe.test:{}/", addr.port());

        let record = prober()
            .with_resolver(StaticResolver(vec![dead_loopback(), loopback()]))
            .probe(&url)
            .await
            .unwrap();

        assert!(record.connect_duration().is_some());
        assert!(record.total_duration().unwrap() >= record.time_to_first_byte().unwrap());
    }

    #[tokio::test]
    async fn test_all_addresses_refused() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        drop(listener);

        let err = prober()
            .with_resolver(StaticResolver(vec![dead_loopback(), loopback()]))
            .probe(&format!("http://probe.test:{}/", port))
            .await
            .unwrap_err();
        assert_eq!(err.code(), "CONNECTION_FAILED");
    }

    #[tokio::test]
    async fn test_https_records_tls_handshake() {
        let (port, tls) = serve_tls_once(Duration::from_millis(10)).await;
        let target = RequestTarget::parse(&format!("https://localhost:{}/", port)).unwrap();
        let request = target.build_request().unwrap();

        let mut events = Vec::new();
        let mut record = TimingRecord::new();
        let mut hook = |event: TraceEvent| {
            events.push(event);
            record.record_event(event);
        };
        prober()
            .with_resolver(StaticResolver(vec![loopback()]))
            .with_tls(tls)
            .execute(&target, request, &mut hook)
            .await
            .unwrap();

        assert!(record.tls_handshake_duration().is_some());
        assert!(record.dns_duration().is_some());
        assert!(record.total_duration().unwrap() >= record.time_to_first_byte().unwrap());
        assert_eq!(
            events,
            vec![
                TraceEvent::RequestStart,
                TraceEvent::Phase(Phase::Dns, Edge::Start),
                TraceEvent::Phase(Phase::Dns, Edge::End),
                TraceEvent::Phase(Phase::Connect, Edge::Start),
                TraceEvent::Phase(Phase::Connect, Edge::End),
                TraceEvent::Phase(Phase::TlsHandshake, Edge::Start),
                TraceEvent::Phase(Phase::TlsHandshake, Edge::End),
                TraceEvent::FirstByte,
                TraceEvent::RequestEnd,
            ]
        );
    }

    #[tokio::test]
    async fn test_https_probe_returns_record() {
        let (port, tls) = serve_tls_once(Duration::ZERO).await;

        let record = prober()
            .with_resolver(StaticResolver(vec![loopback()]))
            .with_tls(tls)
            .probe(&format!("https://localhost:{}/", port))
            .await
            .unwrap();

        let tls = record.tls_handshake_duration().unwrap();
        assert!(tls <= record.total_duration().unwrap());
        assert!(record.tls_start >= record.connect_end);
    }

    #[tokio::test]
    async fn test_construction_error_has_no_record() {
        let err = prober().probe("http://exa\u{1}mple.com/").await.unwrap_err();
        assert!(err.is_construction());
    }

    #[tokio::test]
    async fn test_empty_resolution_is_dns_error() {
        let err = prober()
            .with_resolver(StaticResolver(Vec::new()))
            .probe("http://probe.test/")
            .await
            .unwrap_err();
        assert_eq!(err.code(), "DNS_ERROR");
        assert!(err.is_transport());
    }

    #[tokio::test]
    async fn test_connection_refused() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let err = prober().probe(&format!("http://{}/", addr)).await.unwrap_err();
        assert!(err.is_transport());
        assert_eq!(err.code(), "CONNECTION_FAILED");
    }

    #[tokio::test]
    async fn test_unreachable_address_times_out() {
        // TEST-NET-1 is never routed; depending on the host this either
        // times out or fails immediately as unreachable.
        let err = prober()
            .with_timeout(Duration::from_millis(200))
            .probe("http://192.0.2.1:81/")
            .await
            .unwrap_err();
        assert!(err.is_transport());
        assert!(matches!(err.code(), "TIMEOUT" | "CONNECTION_FAILED"));
    }

    #[tokio::test]
    async fn test_tls_failure_against_plain_server() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            if let Ok((mut socket, _)) = listener.accept().await {
                let _ = socket
                    .write_all(b"HTTP/1.1 400 Bad Request\r\nContent-Length: 0\r\n\r\n")
                    .await;
            }
        });

        let err = prober().probe(&format!("https://{}/", addr)).await.unwrap_err();
        assert!(err.is_transport());
        assert_eq!(err.code(), "TLS_ERROR");
    }

    #[tokio::test]
    #[ignore = "requires network access"]
    async fn test_live_https_target() {
        let record = prober().probe(crate::config::TARGET_URL).await.unwrap();

        let dns = record.dns_duration().unwrap();
        let tls = record.tls_handshake_duration().unwrap();
        let connect = record.connect_duration().unwrap();
        let ttfb = record.time_to_first_byte().unwrap();
        let total = record.total_duration().unwrap();

        for phase in [dns, tls, connect, ttfb] {
            assert!(phase <= total);
        }
    }
}
