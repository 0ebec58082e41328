use std::error::Error as StdError;
use std::io;
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::time::Instant;

use async_trait::async_trait;
use reqwest::{Method, StatusCode};
use tokio::time::timeout;
use url::Url;

use super::types::{ProbeFailure, ProbeOutcome, ProbeRequest};
use crate::database::models::{TargetKind, normalize_address};

/// Reachability test for one endpoint. Failures are reported in the outcome,
/// never as an error.
#[async_trait]
pub trait Probe: Send + Sync {
    async fn probe(&self, request: &ProbeRequest) -> ProbeOutcome;
}

/// Checker trait for the individual protocols; the caller owns the timeout.
#[async_trait]
pub trait Checker: Send + Sync {
    async fn check(&self, request: &ProbeRequest) -> Result<(), ProbeFailure>;
}

/// HTTP/HTTPS checker
pub struct HttpChecker {
    client: reqwest::Client,
}

impl HttpChecker {
    pub fn new(user_agent: &str, force_ipv4: bool) -> Result<Self, reqwest::Error> {
        let mut builder = reqwest::Client::builder().user_agent(user_agent);
        if force_ipv4 {
            builder = builder.local_address(IpAddr::V4(Ipv4Addr::UNSPECIFIED));
        }

        Ok(Self { client: builder.build()? })
    }

    async fn send(&self, method: Method, url: &Url) -> Result<StatusCode, reqwest::Error> {
        let response = self
            .client
            .request(method, url.clone())
            .header(reqwest::header::ACCEPT, "*/*")
            .send()
            .await?;
        Ok(response.status())
    }
}

/// Parse an HTTP target, assuming `http://` when the address has no scheme.
pub fn http_url(address: &str) -> Result<Url, ProbeFailure> {
    let normalized = normalize_address(TargetKind::Http, address);
    Url::parse(&normalized).map_err(|e| ProbeFailure::Unknown(format!("invalid URL {normalized:?}: {e}")))
}

fn io_error_kind(err: &(dyn StdError + 'static)) -> Option<io::ErrorKind> {
    let mut source = Some(err);
    while let Some(current) = source {
        if let Some(io_err) = current.downcast_ref::<io::Error>() {
            return Some(io_err.kind());
        }
        source = current.source();
    }
    None
}

fn error_chain(err: &(dyn StdError + 'static)) -> String {
    let mut parts = vec![err.to_string()];
    let mut source = err.source();
    while let Some(current) = source {
        parts.push(current.to_string());
        source = current.source();
    }
    parts.join(": ")
}

fn looks_like_tls(detail: &str) -> bool {
    let lower = detail.to_ascii_lowercase();
    ["certificate", "tls", "ssl", "handshake"].iter().any(|needle| lower.contains(needle))
}

/// Map a transport error onto the probe failure taxonomy.
pub fn classify_reqwest_error(err: &reqwest::Error) -> ProbeFailure {
    if err.is_timeout() {
        return ProbeFailure::Timeout;
    }
    if io_error_kind(err) == Some(io::ErrorKind::ConnectionRefused) {
        return ProbeFailure::ConnectionRefused;
    }

    let detail = error_chain(err);
    if looks_like_tls(&detail) {
        ProbeFailure::Tls(detail)
    } else if err.is_connect() || err.is_request() || err.is_redirect() {
        ProbeFailure::Network(detail)
    } else {
        ProbeFailure::Unknown(detail)
    }
}

#[async_trait]
impl Checker for HttpChecker {
    async fn check(&self, request: &ProbeRequest) -> Result<(), ProbeFailure> {
        let url = http_url(&request.address)?;

        // Lightweight HEAD first; anything but 2xx falls back to a full GET.
        let status = match self.send(Method::HEAD, &url).await {
            Ok(status) if status.is_success() => status,
            _ => self
                .send(Method::GET, &url)
                .await
                .map_err(|e| classify_reqwest_error(&e))?,
        };

        if status.as_u16() < 400 {
            Ok(())
        } else {
            Err(ProbeFailure::HttpStatus(status.as_u16()))
        }
    }
}

/// TCP port checker
pub struct TcpChecker {
    force_ipv4: bool,
}

impl TcpChecker {
    pub fn new(force_ipv4: bool) -> Self {
        Self { force_ipv4 }
    }

    async fn resolve(&self, host: &str, port: u16) -> Result<Vec<SocketAddr>, ProbeFailure> {
        let addrs: Vec<SocketAddr> = tokio::net::lookup_host((host, port))
            .await
            .map_err(|e| ProbeFailure::Network(format!("cannot resolve {host}: {e}")))?
            .filter(|addr| !self.force_ipv4 || addr.is_ipv4())
            .collect();

        if addrs.is_empty() {
            return Err(ProbeFailure::Network(format!("no usable address for {host}")));
        }
        Ok(addrs)
    }
}

fn classify_io_error(err: &io::Error) -> ProbeFailure {
    match err.kind() {
        io::ErrorKind::ConnectionRefused => ProbeFailure::ConnectionRefused,
        io::ErrorKind::TimedOut => ProbeFailure::Timeout,
        _ => ProbeFailure::Network(err.to_string()),
    }
}

#[async_trait]
impl Checker for TcpChecker {
    async fn check(&self, request: &ProbeRequest) -> Result<(), ProbeFailure> {
        let port = match request.port {
            Some(port) if port > 0 => port,
            _ => return Err(ProbeFailure::Unknown("tcp probe requires a port".into())),
        };

        let mut last_error = ProbeFailure::Unknown("no connection attempted".into());
        for addr in self.resolve(request.address.trim(), port).await? {
            match tokio::net::TcpStream::connect(addr).await {
                // The stream is dropped here, closing the socket.
                Ok(_stream) => return Ok(()),
                Err(e) => last_error = classify_io_error(&e),
            }
        }
        Err(last_error)
    }
}

/// Kind-dispatching probe that bounds every attempt by the request timeout
pub struct NetworkProbe {
    http: HttpChecker,
    tcp: TcpChecker,
}

impl NetworkProbe {
    pub fn new(user_agent: &str, force_ipv4: bool) -> Result<Self, reqwest::Error> {
        Ok(Self {
            http: HttpChecker::new(user_agent, force_ipv4)?,
            tcp: TcpChecker::new(force_ipv4),
        })
    }

    fn checker(&self, kind: TargetKind) -> &dyn Checker {
        match kind {
            TargetKind::Http => &self.http,
            TargetKind::Tcp => &self.tcp,
        }
    }
}

#[async_trait]
impl Probe for NetworkProbe {
    async fn probe(&self, request: &ProbeRequest) -> ProbeOutcome {
        let start = Instant::now();

        // Dropping the timed-out future cancels the attempt and closes its socket.
        let result = timeout(request.timeout, self.checker(request.kind).check(request)).await;
        let latency = start.elapsed().as_millis() as u64;

        match result {
            Ok(Ok(())) => ProbeOutcome::success(latency),
            Ok(Err(failure)) => ProbeOutcome::failure(failure, latency),
            Err(_) => ProbeOutcome::timeout(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{closed_port, spawn_http_server, spawn_silent_server};
    use std::time::Duration;

    fn probe() -> NetworkProbe {
        NetworkProbe::new("ipwatch-test", false).unwrap()
    }

    #[tokio::test]
    async fn http_200_is_up() {
        let addr = spawn_http_server(|_, _| (200, None)).await;
        let outcome = probe()
            .probe(&ProbeRequest::http(format!("http://{addr}/"), Duration::from_secs(5)))
            .await;
        assert!(outcome.ok, "{outcome:?}");
        assert!(outcome.latency_ms.is_some());
        assert_eq!(outcome.error(), None);
    }

    #[tokio::test]
    async fn redirects_are_up() {
        for status in [301, 302] {
            let addr = spawn_http_server(move |_, path| match path {
                "/ok" => (200, None),
                _ => (status, Some("/ok".to_string())),
            })
            .await;
            let outcome = probe()
                .probe(&ProbeRequest::http(format!("http://{addr}/"), Duration::from_secs(5)))
                .await;
            assert!(outcome.ok, "status {status}: {outcome:?}");
        }
    }

    #[tokio::test]
    async fn server_error_reports_status() {
        let addr = spawn_http_server(|_, _| (500, None)).await;
        let outcome = probe()
            .probe(&ProbeRequest::http(format!("http://{addr}/"), Duration::from_secs(5)))
            .await;
        assert!(!outcome.ok);
        assert_eq!(outcome.error().as_deref(), Some("HTTP 500"));
    }

    #[tokio::test]
    async fn rejected_head_falls_back_to_get() {
        let addr = spawn_http_server(|method, _| match method {
            "HEAD" => (405, None),
            _ => (200, None),
        })
        .await;
        // Address without a scheme is probed over plain http.
        let outcome = probe()
            .probe(&ProbeRequest::http(addr.to_string(), Duration::from_secs(5)))
            .await;
        assert!(outcome.ok, "{outcome:?}");
    }

    #[tokio::test]
    async fn unresponsive_http_times_out() {
        let addr = spawn_silent_server().await;
        let outcome = probe()
            .probe(&ProbeRequest::http(format!("http://{addr}/"), Duration::from_millis(200)))
            .await;
        assert_eq!(outcome.failure, Some(ProbeFailure::Timeout));
        assert_eq!(outcome.latency_ms, None);
    }

    #[tokio::test]
    async fn tcp_open_port_is_up() {
        let addr = spawn_silent_server().await;
        let outcome = probe()
            .probe(&ProbeRequest::tcp("127.0.0.1", addr.port(), Duration::from_secs(2)))
            .await;
        assert!(outcome.ok, "{outcome:?}");
    }

    #[tokio::test]
    async fn tcp_closed_port_is_refused() {
        let port = closed_port().await;
        let outcome = probe()
            .probe(&ProbeRequest::tcp("127.0.0.1", port, Duration::from_secs(2)))
            .await;
        assert_eq!(outcome.failure, Some(ProbeFailure::ConnectionRefused));
        assert_eq!(outcome.error().as_deref(), Some("connection refused"));
    }

    #[tokio::test]
    async fn http_closed_port_is_refused() {
        let port = closed_port().await;
        let outcome = probe()
            .probe(&ProbeRequest::http(format!("http://127.0.0.1:{port}/"), Duration::from_secs(2)))
            .await;
        assert_eq!(outcome.failure, Some(ProbeFailure::ConnectionRefused));
    }

    #[test]
    fn urls_default_to_http() {
        assert_eq!(http_url("example.com/health").unwrap().as_str(), "http://example.com/health");
        assert_eq!(http_url("https://example.com").unwrap().scheme(), "https");
    }
}
