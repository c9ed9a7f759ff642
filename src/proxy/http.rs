// src/proxy/http.rs

//! Plain HTTP reverse proxying.

use std::net::SocketAddr;

use http_body_util::BodyExt;
use hyper::body::Incoming;
use hyper::{Request, Response, StatusCode, Version};
use hyper_util::client::legacy::connect::HttpConnector;
use hyper_util::client::legacy::Client;
use hyper_util::rt::TokioExecutor;
use tracing::{trace, warn};

use super::headers::{append_forwarded_for, remove_hop_by_hop, set_host};
use super::{text_response, ProxyBody, Upstream};

/// Forwards requests over a pooled HTTP/1.1 client.
///
/// Response bodies are not buffered: each frame is handed to the client
/// connection as soon as it arrives from upstream, so streaming responses
/// such as server-sent events stay live.
pub struct HttpForwarder {
    client: Client<HttpConnector, Incoming>,
    upstream: Upstream,
}

impl HttpForwarder {
    pub fn new(upstream: Upstream) -> Self {
        let client = Client::builder(TokioExecutor::new()).build_http();
        Self { client, upstream }
    }

    pub async fn forward(&self, req: Request<Incoming>, peer: Option<SocketAddr>) -> Response<ProxyBody> {
        let (mut parts, body) = req.into_parts();

        parts.uri = match self.upstream.uri_for(&parts.uri) {
            Ok(uri) => uri,
            Err(e) => return text_response(StatusCode::BAD_REQUEST, format!("invalid request URI: {e}")),
        };
        parts.version = Version::HTTP_11;
        remove_hop_by_hop(&mut parts.headers);
        set_host(&mut parts.headers, self.upstream.authority());
        if let Some(peer) = peer {
            append_forwarded_for(&mut parts.headers, peer.ip());
        }

        trace!(uri = %parts.uri, "sending upstream request");

        match self.client.request(Request::from_parts(parts, body)).await {
            Ok(resp) => {
                let (mut parts, body) = resp.into_parts();
                remove_hop_by_hop(&mut parts.headers);
                Response::from_parts(parts, body.boxed())
            }
            Err(e) => {
                warn!(upstream = %self.upstream, error = %e, "upstream request failed");
                text_response(StatusCode::BAD_GATEWAY, format!("upstream request failed: {e}"))
            }
        }
    }
}
