// src/gateway.rs

//! HTTP entry point.
//!
//! Every request first brings the backend up to date through the
//! coordinator. If that fails, the client gets `400` with the diagnostic
//! text (typically compiler output) and nothing is forwarded. Otherwise the
//! request goes to the [`Forwarder`].

use std::convert::Infallible;
use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use hyper::body::Incoming;
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper::{Request, Response, StatusCode};
use hyper_util::rt::TokioIo;
use tokio::net::TcpListener;
use tracing::{debug, info, warn};

use crate::coordinator::ReloadCoordinator;
use crate::exec::ProcessRunner;
use crate::proxy::{text_response, Forwarder, ProxyBody};

/// Pause after a failed `accept`, e.g. when out of file descriptors.
const ACCEPT_BACKOFF: Duration = Duration::from_millis(50);

pub struct Gateway<R> {
    coordinator: ReloadCoordinator<R>,
    forwarder: Forwarder,
}

impl<R: ProcessRunner + 'static> Gateway<R> {
    pub fn new(coordinator: ReloadCoordinator<R>, forwarder: Forwarder) -> Self {
        Self {
            coordinator,
            forwarder,
        }
    }

    /// Handle a single request: refresh, then forward or report.
    pub async fn handle(&self, req: Request<Incoming>, peer: Option<SocketAddr>) -> Response<ProxyBody> {
        match self.coordinator.ensure_fresh().await {
            Ok(outcome) => {
                if outcome.started_backend() {
                    info!(%outcome, method = %req.method(), uri = %req.uri(), "backend restarted for request");
                } else {
                    debug!(method = %req.method(), uri = %req.uri(), "backend fresh");
                }
                self.forwarder.dispatch(req, peer).await
            }
            Err(e) => {
                warn!(kind = e.kind(), method = %req.method(), uri = %req.uri(), "reload failed; not forwarding");
                text_response(StatusCode::BAD_REQUEST, e.to_string())
            }
        }
    }

    /// Accept connections until `shutdown` resolves. Each connection is
    /// served on its own task.
    pub async fn serve(self, listener: TcpListener, shutdown: impl Future<Output = ()>) -> std::io::Result<()> {
        let local = listener.local_addr()?;
        info!(listen = %local, "gateway accepting connections");

        let gateway = Arc::new(self);
        tokio::pin!(shutdown);

        loop {
            let (stream, peer) = tokio::select! {
                _ = &mut shutdown => {
                    info!("gateway shutting down");
                    return Ok(());
                }
                accepted = listener.accept() => match accepted {
                    Ok(pair) => pair,
                    Err(e) => {
                        warn!(error = %e, "accept failed");
                        tokio::time::sleep(ACCEPT_BACKOFF).await;
                        continue;
                    }
                },
            };

            let gateway = Arc::clone(&gateway);
            tokio::spawn(async move {
                let service = service_fn(move |req| {
                    let gateway = Arc::clone(&gateway);
                    async move { Ok::<_, Infallible>(gateway.handle(req, Some(peer)).await) }
                });

                if let Err(e) = http1::Builder::new()
                    .serve_connection(TokioIo::new(stream), service)
                    .with_upgrades()
                    .await
                {
                    debug!(%peer, error = %e, "connection closed with error");
                }
            });
        }
    }
}
