use std::convert::Infallible;
use std::net::SocketAddr;
use std::pin::Pin;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::task::{Context as TaskContext, Poll};
use std::time::Duration;

use anyhow::Context;
use bytes::Bytes;
use http_body_util::{Empty, Full};
use hyper::body::{Body, Frame, Incoming};
use hyper::header::{CONNECTION, UPGRADE};
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper::{Request, Response, StatusCode};
use hyper_util::rt::TokioIo;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpListener;
use tokio::sync::mpsc;
use tokio::task::{JoinHandle, JoinSet};
use tracing::debug;

use devproxy::errors::RefreshError;
use devproxy::exec::{BoxFuture, ProcessRunner};

/// What the fake does on the next build/start.
#[derive(Debug, Clone, Default)]
struct Behaviour {
    build_delay: Duration,
    build_error: Option<String>,
    start_error: Option<String>,
    /// Start "succeeds" but never listens.
    never_listen: bool,
    /// Start "succeeds" but the backend dies at once with this stderr.
    exit_on_start: Option<String>,
}

struct Backend {
    task: JoinHandle<()>,
    exit_text: Option<String>,
}

#[derive(Default)]
struct Shared {
    behaviour: Mutex<Behaviour>,
    backend: Mutex<Option<Backend>>,
    builds: AtomicUsize,
    starts: AtomicUsize,
    stops: AtomicUsize,
}

/// Pause between the two chunks the fake backend sends for `/stream`.
pub const STREAM_GAP: Duration = Duration::from_secs(2);

/// A fake runner that:
/// - counts builds, starts and stops
/// - on start, serves HTTP on `127.0.0.1:<port>` answering
///   `generation <n> <path>`, and echoes raw bytes after a WebSocket upgrade
/// - answers `/stream` with `data: 1`, then `data: 2` after [`STREAM_GAP`]
/// - can be told to fail builds, fail starts, never listen, or die early.
pub struct FakeRunner {
    port: u16,
    shared: Arc<Shared>,
}

/// Control and inspection side of a [`FakeRunner`] that stays with the test
/// after the runner moved into a coordinator.
#[derive(Clone)]
pub struct FakeRunnerHandle {
    shared: Arc<Shared>,
}

impl FakeRunner {
    pub fn new(port: u16) -> (Self, FakeRunnerHandle) {
        let shared = Arc::new(Shared::default());
        (
            Self {
                port,
                shared: Arc::clone(&shared),
            },
            FakeRunnerHandle { shared },
        )
    }

    fn stop_backend(&self) -> Option<Backend> {
        self.shared.backend.lock().unwrap().take()
    }
}

impl FakeRunnerHandle {
    pub fn builds(&self) -> usize {
        self.shared.builds.load(Ordering::SeqCst)
    }

    pub fn starts(&self) -> usize {
        self.shared.starts.load(Ordering::SeqCst)
    }

    pub fn stops(&self) -> usize {
        self.shared.stops.load(Ordering::SeqCst)
    }

    pub fn set_build_delay(&self, delay: Duration) {
        self.shared.behaviour.lock().unwrap().build_delay = delay;
    }

    pub fn set_build_error(&self, text: Option<&str>) {
        self.shared.behaviour.lock().unwrap().build_error = text.map(str::to_string);
    }

    pub fn set_start_error(&self, text: Option<&str>) {
        self.shared.behaviour.lock().unwrap().start_error = text.map(str::to_string);
    }

    pub fn set_never_listen(&self, on: bool) {
        self.shared.behaviour.lock().unwrap().never_listen = on;
    }

    pub fn set_exit_on_start(&self, stderr: Option<&str>) {
        self.shared.behaviour.lock().unwrap().exit_on_start = stderr.map(str::to_string);
    }

    pub fn is_running(&self) -> bool {
        self.shared
            .backend
            .lock()
            .unwrap()
            .as_ref()
            .is_some_and(|b| !b.task.is_finished())
    }

    /// Kill the backend behind the coordinator's back, as if it crashed.
    pub async fn crash(&self) {
        let backend = self.shared.backend.lock().unwrap().take();
        if let Some(backend) = backend {
            backend.task.abort();
            let _ = backend.task.await;
        }
    }
}

impl ProcessRunner for FakeRunner {
    fn build(&mut self) -> BoxFuture<'_, Result<(), RefreshError>> {
        Box::pin(async move {
            self.shared.builds.fetch_add(1, Ordering::SeqCst);
            let behaviour = self.shared.behaviour.lock().unwrap().clone();

            if !behaviour.build_delay.is_zero() {
                tokio::time::sleep(behaviour.build_delay).await;
            }
            match behaviour.build_error {
                Some(text) => Err(RefreshError::Build(text)),
                None => Ok(()),
            }
        })
    }

    fn start(&mut self) -> BoxFuture<'_, Result<(), RefreshError>> {
        Box::pin(async move {
            if let Some(old) = self.stop_backend() {
                old.task.abort();
                let _ = old.task.await;
            }

            let generation = self.shared.starts.fetch_add(1, Ordering::SeqCst) + 1;
            let behaviour = self.shared.behaviour.lock().unwrap().clone();

            if let Some(text) = behaviour.start_error {
                return Err(RefreshError::Start(text));
            }

            let backend = if let Some(stderr) = behaviour.exit_on_start {
                Backend {
                    task: tokio::spawn(async {}),
                    exit_text: Some(stderr),
                }
            } else if behaviour.never_listen {
                Backend {
                    task: tokio::spawn(std::future::pending::<()>()),
                    exit_text: None,
                }
            } else {
                let listener = bind_backend(self.port)
                    .await
                    .map_err(|e| RefreshError::Start(format!("{e:#}")))?;
                Backend {
                    task: tokio::spawn(serve(listener, generation)),
                    exit_text: None,
                }
            };

            debug!(generation, port = self.port, "fake backend started");
            *self.shared.backend.lock().unwrap() = Some(backend);
            Ok(())
        })
    }

    fn stop(&mut self) -> BoxFuture<'_, bool> {
        Box::pin(async move {
            match self.stop_backend() {
                Some(backend) => {
                    self.shared.stops.fetch_add(1, Ordering::SeqCst);
                    debug!(port = self.port, "fake backend stopped");
                    backend.task.abort();
                    let _ = backend.task.await;
                    true
                }
                None => false,
            }
        })
    }

    fn is_running(&mut self) -> bool {
        let mut slot = self.shared.backend.lock().unwrap();
        if slot.as_ref().is_some_and(|b| b.task.is_finished()) {
            slot.take();
        }
        slot.is_some()
    }

    fn exited(&mut self) -> BoxFuture<'_, String> {
        Box::pin(async move {
            loop {
                // None: nothing running. Some(None): still up. Some(Some(text)): exited.
                let state = self.shared.backend.lock().unwrap().as_ref().map(|b| {
                    b.task.is_finished().then(|| {
                        b.exit_text
                            .clone()
                            .unwrap_or_else(|| "fake backend exited".to_string())
                    })
                });
                match state {
                    None => return std::future::pending::<String>().await,
                    Some(Some(text)) => return text,
                    Some(None) => {}
                }
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
    }
}

async fn bind_backend(port: u16) -> anyhow::Result<TcpListener> {
    let addr = SocketAddr::from(([127, 0, 0, 1], port));
    TcpListener::bind(addr)
        .await
        .with_context(|| format!("fake backend bind {addr}"))
}

/// Accept loop of the fake backend. Connections live in a `JoinSet` so that
/// aborting this task also closes every open keep-alive connection.
async fn serve(listener: TcpListener, generation: usize) {
    let mut connections = JoinSet::new();
    loop {
        let Ok((stream, _)) = listener.accept().await else {
            continue;
        };
        connections.spawn(async move {
            let service = service_fn(move |req| handle(req, generation));
            let _ = http1::Builder::new()
                .serve_connection(TokioIo::new(stream), service)
                .with_upgrades()
                .await;
        });
    }
}

async fn handle(
    mut req: Request<Incoming>,
    generation: usize,
) -> Result<Response<http_body_util::combinators::BoxBody<Bytes, Infallible>>, Infallible> {
    use http_body_util::BodyExt;

    let wants_ws = req
        .headers()
        .get(UPGRADE)
        .and_then(|v| v.to_str().ok())
        .is_some_and(|v| v.eq_ignore_ascii_case("websocket"));

    if wants_ws {
        let upgrade = hyper::upgrade::on(&mut req);
        tokio::spawn(async move {
            if let Ok(upgraded) = upgrade.await {
                let mut io = TokioIo::new(upgraded);
                let mut buf = [0u8; 1024];
                loop {
                    match io.read(&mut buf).await {
                        Ok(0) | Err(_) => break,
                        Ok(n) => {
                            if io.write_all(&buf[..n]).await.is_err() {
                                break;
                            }
                        }
                    }
                }
            }
        });

        let resp = Response::builder()
            .status(StatusCode::SWITCHING_PROTOCOLS)
            .header(CONNECTION, "upgrade")
            .header(UPGRADE, "websocket")
            .header("x-fake-generation", generation.to_string())
            .body(Empty::new().boxed())
            .unwrap();
        return Ok(resp);
    }

    if req.uri().path() == "/stream" {
        let (tx, rx) = mpsc::channel(2);
        tokio::spawn(async move {
            let _ = tx.send(Bytes::from_static(b"data: 1\n\n")).await;
            tokio::time::sleep(STREAM_GAP).await;
            let _ = tx.send(Bytes::from_static(b"data: 2\n\n")).await;
        });
        let resp = Response::builder()
            .status(StatusCode::OK)
            .header("content-type", "text/event-stream")
            .body(ChunkBody(rx).boxed())
            .unwrap();
        return Ok(resp);
    }

    let forwarded_for = req
        .headers()
        .get("x-forwarded-for")
        .and_then(|v| v.to_str().ok())
        .unwrap_or("")
        .to_string();

    let body = format!("generation {generation} {}", req.uri().path());
    let resp = Response::builder()
        .status(StatusCode::OK)
        .header("x-fake-generation", generation.to_string())
        .header("x-seen-forwarded-for", forwarded_for)
        .body(Full::new(Bytes::from(body)).boxed())
        .unwrap();
    Ok(resp)
}

/// Response body fed chunk by chunk from a channel.
struct ChunkBody(mpsc::Receiver<Bytes>);

impl Body for ChunkBody {
    type Data = Bytes;
    type Error = Infallible;

    fn poll_frame(
        mut self: Pin<&mut Self>,
        cx: &mut TaskContext<'_>,
    ) -> Poll<Option<Result<Frame<Bytes>, Infallible>>> {
        self.0.poll_recv(cx).map(|chunk| chunk.map(|b| Ok(Frame::data(b))))
    }
}
