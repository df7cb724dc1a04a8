//! Single-origin forwarding.
//!
//! [`Forwarder`] plays the part of the director plus the forwarding
//! primitive: it rewrites the inbound request head onto its upstream,
//! sends it over a pooled HTTP client and relays the upstream response.

use std::{
    convert::Infallible,
    net::{Ipv4Addr, SocketAddr},
    pin::Pin,
    sync::Arc,
};

use http::{Request, Response, StatusCode, Version, request::Parts};
use http_body_util::{BodyExt as _, Empty, combinators::BoxBody};
use hyper::{
    body::{Bytes, Incoming},
    service::Service as HyperService,
};
use hyper_rustls::{HttpsConnector, HttpsConnectorBuilder};
use hyper_util::{
    client::legacy::{Client, connect::HttpConnector},
    rt::TokioExecutor,
};
use tracing::{debug, error};

use crate::{
    headers::{append_forwarded_for, clear_host, strip_hop_by_hop},
    upstream::Upstream,
};

/// Body type relayed back to clients.
pub type ProxyBody = BoxBody<Bytes, hyper::Error>;

type UpstreamClient = Client<HttpsConnector<HttpConnector>, Incoming>;

/// Forwards every request to one fixed upstream origin.
///
/// Cloning is cheap; clones share the upstream and the connection pool.
#[derive(Debug, Clone)]
pub struct Forwarder {
    upstream: Arc<Upstream>,
    client: UpstreamClient,
    /// Peer address of the connection this forwarder serves
    pub from: SocketAddr,
}

impl Forwarder {
    /// Creates a forwarder with its own client, speaking TLS to `https`
    /// upstreams and plain HTTP to `http` ones.
    pub fn new(upstream: Upstream) -> Self {
        let connector = HttpsConnectorBuilder::new()
            .with_webpki_roots()
            .https_or_http()
            .enable_http1()
            .build();
        let client = Client::builder(TokioExecutor::new()).build(connector);

        debug!("Creating forwarder for upstream {}", upstream);

        Self {
            upstream: Arc::new(upstream),
            client,
            from: SocketAddr::from((Ipv4Addr::UNSPECIFIED, 0)),
        }
    }

    pub fn upstream(&self) -> &Upstream {
        &self.upstream
    }

    /// Returns a clone bound to the connection from `from`.
    pub fn for_peer(&self, from: SocketAddr) -> Self {
        let mut forwarder = self.clone();
        forwarder.from = from;
        forwarder
    }

    /// Rewrites an inbound request head so it targets the upstream.
    ///
    /// The client-facing `Host` is dropped; the outbound client fills it in
    /// from the upstream authority.
    pub fn direct(&self, parts: &mut Parts) -> Result<(), http::Error> {
        parts.uri = self.upstream.target_uri(&parts.uri)?;
        parts.version = Version::HTTP_11;

        clear_host(&mut parts.headers);
        strip_hop_by_hop(&mut parts.headers);
        append_forwarded_for(&mut parts.headers, self.from.ip());
        Ok(())
    }
}

fn empty_response(status: StatusCode) -> Response<ProxyBody> {
    let mut response = Response::new(
        Empty::<Bytes>::new()
            .map_err(|never| match never {})
            .boxed(),
    );
    *response.status_mut() = status;
    response
}

impl HyperService<Request<Incoming>> for Forwarder {
    type Response = Response<ProxyBody>;

    type Error = Infallible;

    type Future = Pin<Box<dyn Future<Output = Result<Self::Response, Self::Error>> + Send>>;

    /// Forwards the request, answering `502 Bad Gateway` when the upstream
    /// cannot be reached.
    fn call(&self, req: Request<Incoming>) -> Self::Future {
        let (mut header, body) = req.into_parts();

        if let Err(e) = self.direct(&mut header) {
            error!("Failed to rewrite request for {}: {}", self.upstream, e);
            return Box::pin(async { Ok(empty_response(StatusCode::INTERNAL_SERVER_ERROR)) });
        }

        let request = Request::from_parts(header, body);
        let client = self.client.clone();
        let upstream = self.upstream.clone();

        Box::pin(async move {
            debug!("Sending {} {} upstream", request.method(), request.uri());

            let (mut header, body) = match client.request(request).await {
                Ok(response) => response.into_parts(),
                Err(e) => {
                    error!("Failed to forward request to {}: {:?}", upstream, e);
                    return Ok(empty_response(StatusCode::BAD_GATEWAY));
                }
            };

            strip_hop_by_hop(&mut header.headers);
            Ok(Response::from_parts(header, body.boxed()))
        })
    }
}
