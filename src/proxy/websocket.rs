// src/proxy/websocket.rs

//! WebSocket tunnelling.
//!
//! The handshake is replayed against the upstream on a fresh connection. If
//! the upstream switches protocols, its `101` goes back to the client and
//! the two upgraded connections are copied into each other until either
//! side closes. Frames are not parsed.

use std::net::SocketAddr;

use bytes::Bytes;
use http_body_util::{BodyExt, Empty};
use hyper::body::Incoming;
use hyper::client::conn::http1;
use hyper::{Request, Response, StatusCode, Uri};
use hyper_util::rt::TokioIo;
use tokio::net::TcpStream;
use tracing::{debug, warn};

use super::headers::{append_forwarded_for, set_host};
use super::{empty_body, text_response, ProxyBody, Upstream};

pub struct WebSocketForwarder {
    upstream: Upstream,
}

impl WebSocketForwarder {
    pub fn new(upstream: Upstream) -> Self {
        Self { upstream }
    }

    pub async fn forward(&self, mut req: Request<Incoming>, peer: Option<SocketAddr>) -> Response<ProxyBody> {
        let client_upgrade = hyper::upgrade::on(&mut req);
        let (mut parts, _body) = req.into_parts();

        let path = match self.upstream.path_and_query(&parts.uri) {
            Ok(pq) => pq,
            Err(e) => return text_response(StatusCode::BAD_REQUEST, format!("invalid request URI: {e}")),
        };
        parts.uri = Uri::from(path);
        set_host(&mut parts.headers, self.upstream.authority());
        if let Some(peer) = peer {
            append_forwarded_for(&mut parts.headers, peer.ip());
        }

        let target = self.upstream.connect_target();
        let stream = match TcpStream::connect(&target).await {
            Ok(s) => s,
            Err(e) => {
                warn!(%target, error = %e, "websocket upstream connect failed");
                return text_response(StatusCode::BAD_GATEWAY, format!("connecting to {target}: {e}"));
            }
        };

        let (mut sender, conn) = match http1::handshake::<_, Empty<Bytes>>(TokioIo::new(stream)).await {
            Ok(pair) => pair,
            Err(e) => {
                warn!(%target, error = %e, "websocket upstream handshake failed");
                return text_response(StatusCode::BAD_GATEWAY, format!("upstream handshake failed: {e}"));
            }
        };
        tokio::spawn(async move {
            if let Err(e) = conn.with_upgrades().await {
                debug!(error = %e, "websocket upstream connection ended");
            }
        });

        let mut resp = match sender.send_request(Request::from_parts(parts, Empty::new())).await {
            Ok(resp) => resp,
            Err(e) => {
                warn!(%target, error = %e, "websocket upstream request failed");
                return text_response(StatusCode::BAD_GATEWAY, format!("upstream request failed: {e}"));
            }
        };

        if resp.status() != StatusCode::SWITCHING_PROTOCOLS {
            debug!(status = %resp.status(), "upstream declined websocket upgrade");
            return resp.map(|b| b.boxed());
        }

        let upstream_upgrade = hyper::upgrade::on(&mut resp);
        tokio::spawn(async move {
            match tokio::try_join!(client_upgrade, upstream_upgrade) {
                Ok((client, upstream)) => {
                    let mut client = TokioIo::new(client);
                    let mut upstream = TokioIo::new(upstream);
                    match tokio::io::copy_bidirectional(&mut client, &mut upstream).await {
                        Ok((to_upstream, to_client)) => {
                            debug!(to_upstream, to_client, "websocket tunnel closed")
                        }
                        Err(e) => debug!(error = %e, "websocket tunnel ended with error"),
                    }
                }
                Err(e) => warn!(error = %e, "websocket upgrade failed"),
            }
        });

        let (parts, _) = resp.into_parts();
        Response::from_parts(parts, empty_body())
    }
}
