//! Test doubles shared by the unit tests.

use std::collections::{HashMap, HashSet, VecDeque};
use std::future::Future;
use std::net::SocketAddr;
use std::pin::Pin;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use tempfile::TempDir;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::Semaphore;

use crate::clock::Clock;
use crate::database::{DatabaseImpl, initialize_database};
use crate::monitoring::checker::Probe;
use crate::monitoring::types::{ProbeOutcome, ProbeRequest};
use crate::notifications::{ChannelError, ChatTransport, EmailTransport, PUSH_CHUNK_SIZE, PushMessage, PushTransport};
use crate::pool::open_local;

/// 2026-01-01T00:00:00Z
const BASE_EPOCH: i64 = 1_767_225_600;

/// Fixed instant `secs` seconds after the start of 2026 (UTC).
pub fn at(secs: i64) -> DateTime<Utc> {
    DateTime::from_timestamp(BASE_EPOCH + secs, 0).unwrap()
}

/// Migrated libsql database in a temp dir, removed on drop
pub struct TestDatabase {
    _dir: TempDir,
    pub db: Arc<DatabaseImpl>,
}

pub async fn temp_database() -> TestDatabase {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("ipwatch-test.db");
    let pool = open_local(path.to_str().unwrap(), 4).await.unwrap();
    initialize_database(&pool).await.unwrap();
    TestDatabase {
        _dir: dir,
        db: Arc::new(DatabaseImpl::new_from_pool(pool)),
    }
}

/// Clock whose `sleep` advances virtual time instead of waiting
pub struct ManualClock {
    now: Mutex<DateTime<Utc>>,
    gate: Mutex<Option<Arc<Semaphore>>>,
}

impl ManualClock {
    pub fn new(start: DateTime<Utc>) -> Self {
        Self {
            now: Mutex::new(start),
            gate: Mutex::new(None),
        }
    }

    pub fn advance(&self, by: Duration) {
        *self.now.lock().unwrap() += by;
    }

    /// Park every later `sleep` until [`ManualClock::release_sleeps`].
    pub fn hold_sleeps(&self) {
        *self.gate.lock().unwrap() = Some(Arc::new(Semaphore::new(0)));
    }

    pub fn release_sleeps(&self) {
        if let Some(gate) = self.gate.lock().unwrap().take() {
            gate.add_permits(1);
        }
    }
}

#[async_trait]
impl Clock for ManualClock {
    fn now(&self) -> DateTime<Utc> {
        *self.now.lock().unwrap()
    }

    async fn sleep(&self, duration: std::time::Duration) {
        let gate = self.gate.lock().unwrap().clone();
        if let Some(gate) = gate {
            let _ = gate.acquire().await;
        }
        self.advance(Duration::from_std(duration).unwrap());
        tokio::task::yield_now().await;
    }
}

type ProbeHook = Arc<dyn Fn(&ProbeRequest) -> Pin<Box<dyn Future<Output = ()> + Send>> + Send + Sync>;

/// Probe that replays queued outcomes, then repeats a default one
pub struct ScriptedProbe {
    queue: Mutex<VecDeque<ProbeOutcome>>,
    default: Mutex<ProbeOutcome>,
    by_address: Mutex<HashMap<String, ProbeOutcome>>,
    requests: Mutex<Vec<ProbeRequest>>,
    hook: Mutex<Option<ProbeHook>>,
}

impl ScriptedProbe {
    pub fn always(outcome: ProbeOutcome) -> Self {
        Self::sequence(vec![outcome])
    }

    /// Outcomes in order; the last one repeats once the list is exhausted.
    pub fn sequence(outcomes: Vec<ProbeOutcome>) -> Self {
        let default = outcomes.last().cloned().unwrap_or_else(ProbeOutcome::timeout);
        Self {
            queue: Mutex::new(outcomes.into()),
            default: Mutex::new(default),
            by_address: Mutex::new(HashMap::new()),
            requests: Mutex::new(Vec::new()),
            hook: Mutex::new(None),
        }
    }

    pub fn set_default(&self, outcome: ProbeOutcome) {
        self.queue.lock().unwrap().clear();
        *self.default.lock().unwrap() = outcome;
    }

    /// Always answer requests for `address` with `outcome`.
    pub fn answer_for(&self, address: &str, outcome: ProbeOutcome) {
        self.by_address.lock().unwrap().insert(address.to_string(), outcome);
    }

    pub fn calls_for(&self, address: &str) -> usize {
        self.requests.lock().unwrap().iter().filter(|r| r.address == address).count()
    }

    /// Run `hook` at the start of every probe call.
    pub fn on_call<F>(&self, hook: F)
    where
        F: Fn(&ProbeRequest) -> Pin<Box<dyn Future<Output = ()> + Send>> + Send + Sync + 'static,
    {
        *self.hook.lock().unwrap() = Some(Arc::new(hook));
    }

    pub fn calls(&self) -> usize {
        self.requests.lock().unwrap().len()
    }

    pub fn requests(&self) -> Vec<ProbeRequest> {
        self.requests.lock().unwrap().clone()
    }
}

#[async_trait]
impl Probe for ScriptedProbe {
    async fn probe(&self, request: &ProbeRequest) -> ProbeOutcome {
        self.requests.lock().unwrap().push(request.clone());
        let hook = self.hook.lock().unwrap().clone();
        if let Some(hook) = hook {
            (*hook)(request).await;
        }

        let fixed = self.by_address.lock().unwrap().get(&request.address).cloned();
        if let Some(outcome) = fixed {
            return outcome;
        }

        let next = self.queue.lock().unwrap().pop_front();
        next.unwrap_or_else(|| self.default.lock().unwrap().clone())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SentEmail {
    pub to: Vec<String>,
    pub subject: String,
    pub html: String,
}

#[derive(Default)]
pub struct RecordingEmail {
    sent: Mutex<Vec<SentEmail>>,
    fail: bool,
}

impl RecordingEmail {
    pub fn failing() -> Self {
        Self {
            fail: true,
            ..Self::default()
        }
    }

    pub fn sent(&self) -> Vec<SentEmail> {
        self.sent.lock().unwrap().clone()
    }
}

#[async_trait]
impl EmailTransport for RecordingEmail {
    async fn send(&self, to: &[String], subject: &str, html: &str) -> Result<(), ChannelError> {
        if self.fail {
            return Err(ChannelError::Transport("smtp unavailable".into()));
        }
        self.sent.lock().unwrap().push(SentEmail {
            to: to.to_vec(),
            subject: subject.to_string(),
            html: html.to_string(),
        });
        Ok(())
    }
}

pub struct RecordingPush {
    chunks: Mutex<Vec<Vec<PushMessage>>>,
    attempted: AtomicUsize,
    chunk_size: usize,
    failing: HashSet<usize>,
}

impl Default for RecordingPush {
    fn default() -> Self {
        Self {
            chunks: Mutex::new(Vec::new()),
            attempted: AtomicUsize::new(0),
            chunk_size: PUSH_CHUNK_SIZE,
            failing: HashSet::new(),
        }
    }
}

impl RecordingPush {
    pub fn with_chunk_size(size: usize) -> Self {
        Self {
            chunk_size: size,
            ..Self::default()
        }
    }

    /// Reject the chunk sent at position `index` (0-based).
    pub fn failing_chunk(mut self, index: usize) -> Self {
        self.failing.insert(index);
        self
    }

    /// Chunks that were accepted
    pub fn chunks(&self) -> Vec<Vec<PushMessage>> {
        self.chunks.lock().unwrap().clone()
    }

    pub fn attempted(&self) -> usize {
        self.attempted.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl PushTransport for RecordingPush {
    fn chunk(&self, messages: Vec<PushMessage>) -> Vec<Vec<PushMessage>> {
        crate::notifications::push::chunk_messages(messages, self.chunk_size)
    }

    async fn send(&self, chunk: &[PushMessage]) -> Result<(), ChannelError> {
        let index = self.attempted.fetch_add(1, Ordering::SeqCst);
        if self.failing.contains(&index) {
            return Err(ChannelError::Rejected("DeviceNotRegistered".into()));
        }
        self.chunks.lock().unwrap().push(chunk.to_vec());
        Ok(())
    }
}

pub struct RecordingChat {
    sent: Mutex<Vec<(String, String)>>,
    fail: bool,
    configured: bool,
}

impl Default for RecordingChat {
    fn default() -> Self {
        Self {
            sent: Mutex::new(Vec::new()),
            fail: false,
            configured: true,
        }
    }
}

impl RecordingChat {
    pub fn failing() -> Self {
        Self {
            fail: true,
            ..Self::default()
        }
    }

    pub fn unconfigured() -> Self {
        Self {
            configured: false,
            ..Self::default()
        }
    }

    pub fn sent(&self) -> Vec<(String, String)> {
        self.sent.lock().unwrap().clone()
    }
}

#[async_trait]
impl ChatTransport for RecordingChat {
    fn is_configured(&self) -> bool {
        self.configured
    }

    async fn send(&self, chat_id: &str, text: &str) -> Result<(), ChannelError> {
        if self.fail {
            return Err(ChannelError::Rejected("chat not found".into()));
        }
        self.sent.lock().unwrap().push((chat_id.to_string(), text.to_string()));
        Ok(())
    }
}

fn reason(status: u16) -> &'static str {
    match status {
        200 => "OK",
        301 => "Moved Permanently",
        302 => "Found",
        400 => "Bad Request",
        404 => "Not Found",
        405 => "Method Not Allowed",
        500 => "Internal Server Error",
        _ => "Status",
    }
}

struct ParsedRequest {
    method: String,
    path: String,
}

/// Read one request head and its body (by Content-Length).
async fn read_request(stream: &mut TcpStream) -> Option<ParsedRequest> {
    let mut buf = Vec::new();
    let mut chunk = [0u8; 4096];
    let head_end = loop {
        let n = stream.read(&mut chunk).await.ok()?;
        if n == 0 {
            return None;
        }
        buf.extend_from_slice(&chunk[..n]);
        if let Some(pos) = buf.windows(4).position(|w| w == b"\r\n\r\n") {
            break pos + 4;
        }
    };

    let head = String::from_utf8_lossy(&buf[..head_end]).to_string();
    let mut lines = head.lines();
    let mut request_line = lines.next()?.split_whitespace();
    let method = request_line.next()?.to_string();
    let path = request_line.next()?.to_string();

    let content_length = lines
        .filter_map(|line| line.split_once(':'))
        .find(|(name, _)| name.trim().eq_ignore_ascii_case("content-length"))
        .and_then(|(_, value)| value.trim().parse::<usize>().ok())
        .unwrap_or(0);

    let mut body_read = buf.len() - head_end;
    while body_read < content_length {
        let n = stream.read(&mut chunk).await.ok()?;
        if n == 0 {
            break;
        }
        body_read += n;
    }

    Some(ParsedRequest { method, path })
}

async fn serve<F>(handler: F) -> SocketAddr
where
    F: Fn(&str, &str) -> (u16, Option<String>, String) + Send + Sync + 'static,
{
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let handler = Arc::new(handler);

    tokio::spawn(async move {
        while let Ok((mut stream, _)) = listener.accept().await {
            let handler = Arc::clone(&handler);
            tokio::spawn(async move {
                let Some(request) = read_request(&mut stream).await else {
                    return;
                };
                let (status, location, body) = handler(&request.method, &request.path);

                let mut response = format!(
                    "HTTP/1.1 {status} {}\r\nContent-Type: application/json\r\nContent-Length: {}\r\nConnection: close\r\n",
                    reason(status),
                    body.len()
                );
                if let Some(location) = location {
                    response.push_str(&format!("Location: {location}\r\n"));
                }
                response.push_str("\r\n");
                if request.method != "HEAD" {
                    response.push_str(&body);
                }

                let _ = stream.write_all(response.as_bytes()).await;
                let _ = stream.shutdown().await;
            });
        }
    });

    addr
}

/// Local HTTP server answering every request with `handler(method, path)`
/// as `(status, optional Location header)`.
pub async fn spawn_http_server<F>(handler: F) -> SocketAddr
where
    F: Fn(&str, &str) -> (u16, Option<String>) + Send + Sync + 'static,
{
    serve(move |method, path| {
        let (status, location) = handler(method, path);
        (status, location, String::new())
    })
    .await
}

/// Local HTTP server answering every request with a fixed status and JSON body.
pub async fn spawn_json_server(status: u16, body: &'static str) -> SocketAddr {
    serve(move |_, _| (status, None, body.to_string())).await
}

/// Accepts connections and never answers.
pub async fn spawn_silent_server() -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    tokio::spawn(async move {
        while let Ok((mut stream, _)) = listener.accept().await {
            tokio::spawn(async move {
                let mut sink = [0u8; 1024];
                while matches!(stream.read(&mut sink).await, Ok(n) if n > 0) {}
            });
        }
    });

    addr
}

/// A local port with nothing listening on it.
pub async fn closed_port() -> u16 {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();
    drop(listener);
    port
}
