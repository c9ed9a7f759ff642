// tests/common/mod.rs

#![allow(dead_code)]

use std::net::SocketAddr;
use std::path::Path;
use std::sync::Arc;

use bytes::Bytes;
use http_body_util::{BodyExt, Empty};
use hyper::{HeaderMap, StatusCode};
use hyper_util::client::legacy::Client;
use hyper_util::rt::TokioExecutor;
use tempfile::TempDir;
use tokio::net::TcpListener;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;

use devproxy::config::Settings;
use devproxy::coordinator::ReloadCoordinator;
use devproxy::fingerprint::TreeFingerprinter;
use devproxy::fs::RealFileSystem;
use devproxy::gateway::Gateway;
use devproxy::proxy::Forwarder;

pub use devproxy_test_utils::{
    free_port, init_tracing, with_timeout, write_source, FakeRunner, FakeRunnerHandle,
    SettingsBuilder, STREAM_GAP,
};

pub type TestResult = Result<(), Box<dyn std::error::Error>>;

/// A project directory with one Go source file in it.
pub fn project() -> TempDir {
    let dir = tempfile::tempdir().expect("tempdir");
    write_source(dir.path(), "main.go", "package main\n\nfunc main() {}\n");
    dir
}

/// Settings for `root` with the backend on a fresh loopback port.
pub fn settings_for(root: &Path) -> SettingsBuilder {
    let port = free_port();
    SettingsBuilder::new(root)
        .with_port(port)
        .with_upstream(&format!("http://127.0.0.1:{port}"))
}

pub fn fingerprinter(settings: &Settings) -> TreeFingerprinter {
    TreeFingerprinter::new(
        Arc::new(RealFileSystem),
        settings.root.clone(),
        settings.tree_rules(),
    )
}

/// Coordinator over a [`FakeRunner`] bound to the settings' port.
pub fn fake_coordinator(settings: &Settings) -> (ReloadCoordinator<FakeRunner>, FakeRunnerHandle) {
    let (runner, handle) = FakeRunner::new(settings.port);
    let coordinator = ReloadCoordinator::new(fingerprinter(settings), runner, settings.probe());
    (coordinator, handle)
}

/// A gateway serving on an ephemeral port.
pub struct RunningGateway {
    pub addr: SocketAddr,
    pub coordinator: ReloadCoordinator<FakeRunner>,
    stop: Option<oneshot::Sender<()>>,
    task: JoinHandle<std::io::Result<()>>,
}

impl RunningGateway {
    pub async fn start(settings: &Settings) -> (Self, FakeRunnerHandle) {
        let (coordinator, handle) = fake_coordinator(settings);
        let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind gateway");
        let addr = listener.local_addr().expect("gateway addr");

        let (stop, stopped) = oneshot::channel::<()>();
        let gateway = Gateway::new(coordinator.clone(), Forwarder::new(settings.upstream.clone()));
        let task = tokio::spawn(gateway.serve(listener, async {
            let _ = stopped.await;
        }));

        (
            Self {
                addr,
                coordinator,
                stop: Some(stop),
                task,
            },
            handle,
        )
    }

    pub async fn shutdown(mut self) {
        if let Some(stop) = self.stop.take() {
            let _ = stop.send(());
        }
        let _ = (&mut self.task).await;
        self.coordinator.shutdown().await;
    }
}

/// GET `path` from `addr`; returns status, headers and body text.
pub async fn get(addr: SocketAddr, path: &str) -> (StatusCode, HeaderMap, String) {
    let client = Client::builder(TokioExecutor::new()).build_http::<Empty<Bytes>>();
    let uri = format!("http://{addr}{path}").parse().expect("uri");
    let resp = client.get(uri).await.expect("request");
    let status = resp.status();
    let headers = resp.headers().clone();
    let body = resp.into_body().collect().await.expect("body").to_bytes();
    (status, headers, String::from_utf8_lossy(&body).into_owned())
}
