// src/proxy/mod.rs

//! Forwarding of inbound requests to the backend.
//!
//! Each request goes through exactly one of two strategies:
//! - [`ProxyStrategy::Http`]: plain reverse proxying ([`http`]).
//! - [`ProxyStrategy::WebSocket`]: the upgrade handshake is forwarded and the
//!   two upgraded connections are spliced together ([`websocket`]).
//!
//! The strategy is picked from the request headers alone.

pub mod headers;
pub mod http;
pub mod websocket;

use std::fmt;
use std::net::SocketAddr;

use bytes::Bytes;
use http_body_util::{combinators::BoxBody, BodyExt, Empty, Full};
use hyper::body::Incoming;
use hyper::header::{self, HeaderMap, HeaderValue};
use hyper::http::uri::{Authority, PathAndQuery, Scheme};
use hyper::{Request, Response, StatusCode, Uri};
use tracing::debug;

pub use self::http::HttpForwarder;
pub use self::websocket::WebSocketForwarder;

/// Body type of every response the proxy produces.
pub type ProxyBody = BoxBody<Bytes, hyper::Error>;

/// The two ways a request can be forwarded.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProxyStrategy {
    Http,
    WebSocket,
}

impl ProxyStrategy {
    /// Pick the strategy for a request with these headers.
    pub fn select(headers: &HeaderMap) -> Self {
        if headers::is_websocket_upgrade(headers) {
            ProxyStrategy::WebSocket
        } else {
            ProxyStrategy::Http
        }
    }
}

impl fmt::Display for ProxyStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ProxyStrategy::Http => f.write_str("http"),
            ProxyStrategy::WebSocket => f.write_str("websocket"),
        }
    }
}

/// The single upstream every request is sent to, e.g.
/// `http://localhost:3000` or `http://127.0.0.1:3000/app`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Upstream {
    authority: Authority,
    /// Path prefix without trailing slash; empty for `/`.
    base_path: String,
}

impl Upstream {
    pub fn parse(url: &str) -> Result<Self, String> {
        let uri: Uri = url
            .parse()
            .map_err(|e| format!("invalid upstream URL '{url}': {e}"))?;

        match uri.scheme() {
            Some(s) if *s == Scheme::HTTP => {}
            Some(s) => {
                return Err(format!(
                    "upstream URL '{url}' uses unsupported scheme '{s}' (only http is supported)"
                ));
            }
            None => return Err(format!("upstream URL '{url}' must start with http://")),
        }

        let authority = uri
            .authority()
            .cloned()
            .ok_or_else(|| format!("upstream URL '{url}' has no host"))?;

        Ok(Self {
            authority,
            base_path: uri.path().trim_end_matches('/').to_string(),
        })
    }

    pub fn authority(&self) -> &Authority {
        &self.authority
    }

    /// `host:port` suitable for `TcpStream::connect`.
    pub fn connect_target(&self) -> String {
        let port = self.authority.port_u16().unwrap_or(80);
        format!("{}:{}", self.authority.host(), port)
    }

    /// Path and query to request upstream for an inbound `uri`.
    pub fn path_and_query(&self, uri: &Uri) -> Result<PathAndQuery, hyper::http::Error> {
        let pq = uri.path_and_query().map(|pq| pq.as_str()).unwrap_or("/");
        let joined = if pq.starts_with('/') {
            format!("{}{}", self.base_path, pq)
        } else {
            format!("{}/{}", self.base_path, pq)
        };
        Ok(PathAndQuery::try_from(joined)?)
    }

    /// Absolute upstream URI for an inbound `uri`.
    pub fn uri_for(&self, uri: &Uri) -> Result<Uri, hyper::http::Error> {
        Uri::builder()
            .scheme(Scheme::HTTP)
            .authority(self.authority.clone())
            .path_and_query(self.path_and_query(uri)?)
            .build()
    }
}

impl fmt::Display for Upstream {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "http://{}{}", self.authority, self.base_path)
    }
}

/// Dispatches requests to the HTTP or WebSocket strategy.
pub struct Forwarder {
    http: HttpForwarder,
    websocket: WebSocketForwarder,
}

impl Forwarder {
    pub fn new(upstream: Upstream) -> Self {
        Self {
            http: HttpForwarder::new(upstream.clone()),
            websocket: WebSocketForwarder::new(upstream),
        }
    }

    /// Forward one request. Upstream failures become `502` responses.
    pub async fn dispatch(&self, req: Request<Incoming>, peer: Option<SocketAddr>) -> Response<ProxyBody> {
        let strategy = ProxyStrategy::select(req.headers());
        debug!(%strategy, method = %req.method(), uri = %req.uri(), "forwarding request");

        match strategy {
            ProxyStrategy::Http => self.http.forward(req, peer).await,
            ProxyStrategy::WebSocket => self.websocket.forward(req, peer).await,
        }
    }
}

pub fn empty_body() -> ProxyBody {
    Empty::<Bytes>::new().map_err(|never| match never {}).boxed()
}

pub fn full_body(bytes: impl Into<Bytes>) -> ProxyBody {
    Full::new(bytes.into()).map_err(|never| match never {}).boxed()
}

/// Plain-text response carrying `message` as its body.
pub fn text_response(status: StatusCode, message: impl Into<String>) -> Response<ProxyBody> {
    let mut resp = Response::new(full_body(message.into()));
    *resp.status_mut() = status;
    resp.headers_mut().insert(
        header::CONTENT_TYPE,
        HeaderValue::from_static("text/plain; charset=utf-8"),
    );
    resp
}
