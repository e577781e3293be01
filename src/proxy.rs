//! Forwarding to the collector and to the application.

use std::time::{Duration, Instant};

use axum::{
    body::Body,
    extract::Request,
    http::{HeaderMap, HeaderName, HeaderValue, Uri, header},
    response::Response,
};
use tracing::{debug, warn};

use crate::error::GateError;
use crate::metrics::UPSTREAM_LATENCY;

/// Header carrying the resolved subject to the application.
pub const SUBJECT_HEADER: &str = "x-authenticated-subject";

const HOP_BY_HOP: [HeaderName; 8] = [
    header::CONNECTION,
    header::HOST,
    header::PROXY_AUTHENTICATE,
    header::PROXY_AUTHORIZATION,
    header::TE,
    header::TRAILER,
    header::TRANSFER_ENCODING,
    header::UPGRADE,
];

/// Which credentials survive the hop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Audience {
    /// Our own application: cookies and authorization pass through.
    Application,
    /// Third-party collector: credentials are stripped.
    ThirdParty,
}

#[derive(Debug, Clone)]
pub struct Forwarder {
    client: reqwest::Client,
    timeout: Duration,
    max_body_bytes: usize,
}

impl Forwarder {
    pub fn new(client: reqwest::Client, timeout: Duration, max_body_bytes: usize) -> Self {
        Self { client, timeout, max_body_bytes }
    }

    /// Sends `req` to `url` and relays the upstream answer.
    pub async fn forward(
        &self,
        req: Request,
        url: &str,
        audience: Audience,
    ) -> Result<Response, GateError> {
        let (parts, body) = req.into_parts();
        let body = axum::body::to_bytes(body, self.max_body_bytes)
            .await
            .map_err(|_| GateError::RequestBodyTooLarge { limit: self.max_body_bytes })?;

        let mut headers = parts.headers;
        strip_hop_by_hop(&mut headers);
        headers.remove(header::CONTENT_LENGTH);
        if audience == Audience::ThirdParty {
            headers.remove(header::COOKIE);
            headers.remove(header::AUTHORIZATION);
            headers.remove(SUBJECT_HEADER);
        }

        let start = Instant::now();
        let result = self
            .client
            .request(parts.method, url)
            .headers(headers)
            .body(body)
            .timeout(self.timeout)
            .send()
            .await;

        let upstream = match result {
            Ok(res) => res,
            Err(e) => {
                warn!(url, error = %e, "upstream request failed");
                return Err(GateError::Upstream(e.to_string()));
            }
        };

        let status = upstream.status();
        let mut response_headers = upstream.headers().clone();
        strip_hop_by_hop(&mut response_headers);
        // The body is re-framed by us.
        response_headers.remove(header::CONTENT_LENGTH);

        let bytes = upstream.bytes().await.map_err(|e| {
            warn!(url, error = %e, "reading upstream body failed");
            GateError::Upstream(e.to_string())
        })?;

        UPSTREAM_LATENCY.observe(start.elapsed().as_secs_f64());
        debug!(url, status = status.as_u16(), "upstream responded");

        let mut response = Response::new(Body::from(bytes));
        *response.status_mut() = status;
        *response.headers_mut() = response_headers;
        Ok(response)
    }
}

/// Replaces any client-supplied subject header with the resolved one.
pub fn set_subject_header(headers: &mut HeaderMap, subject: Option<&str>) {
    headers.remove(SUBJECT_HEADER);
    if let Some(value) = subject.and_then(|s| HeaderValue::from_str(s).ok()) {
        headers.insert(SUBJECT_HEADER, value);
    }
}

/// Path and query as the upstream client will send them.
///
/// `reqwest` resolves `.` and `..` segments, percent-encoded ones included,
/// when it parses the target URL. Route checks have to run against that
/// resolved form, so the request URI is rewritten with it first.
pub fn canonical_uri(uri: &Uri) -> Result<Uri, GateError> {
    let mut url = reqwest::Url::parse("http://gate.invalid/").map_err(|_| GateError::MalformedPath)?;
    url.set_path(uri.path());
    url.set_query(uri.query());

    let path_and_query = match url.query() {
        Some(query) => format!("{}?{query}", url.path()),
        None => url.path().to_string(),
    };
    path_and_query.parse().map_err(|_| GateError::MalformedPath)
}

fn strip_hop_by_hop(headers: &mut HeaderMap) {
    // Headers named in Connection are hop-by-hop as well.
    let named: Vec<HeaderName> = headers
        .get_all(header::CONNECTION)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .flat_map(|v| v.split(','))
        .filter_map(|name| HeaderName::from_bytes(name.trim().as_bytes()).ok())
        .collect();
    for name in named.iter().chain(HOP_BY_HOP.iter()) {
        headers.remove(name);
    }
    headers.remove("keep-alive");
}
