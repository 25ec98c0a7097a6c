//! Forwarder (§4.3): parses the versioned route, resolves the target
//! service through the mirror, mints an S2S token, forwards the request
//! with shaped headers, and normalizes the upstream response (or error)
//! into the gateway's uniform envelope. The pipeline's edge timeout
//! guardrail wraps this handler in a single `tokio::time::timeout`, which
//! is what gives "never write twice": a fired timeout drops this future
//! before it can produce a second response.

pub mod headers;

use std::sync::Arc;
use std::time::Duration;

use axum::body::Body;
use axum::extract::{Request, State};
use axum::http::{HeaderValue, StatusCode, header};
use axum::response::{IntoResponse, Response};
use serde_json::Value;

use crate::error::{GatewayError, Problem};
use crate::guardrails::ClientIdentity;
use crate::mirror::ConfigMirror;
use crate::route_policy;
use crate::s2s::{MintOpts, S2SMinter};

/// Cap on the buffered request body. No fixed number is mandated; this
/// keeps a single slow client from exhausting memory ahead of the upstream
/// connection being made.
const MAX_BODY_BYTES: usize = 16 * 1024 * 1024;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsedRoute {
	pub slug: String,
	pub version: u32,
	pub rest_path: String,
}

/// Parse `/api/<slug>.V<digit>/<rest...>`. Bare numeric version labels
/// (no `V`/`v` prefix) are rejected per §4.3 step 1.
pub fn parse_route(path: &str) -> Result<ParsedRoute, GatewayError> {
	let malformed = || GatewayError::MalformedRoute(path.to_string());
	let trimmed = path.strip_prefix("/api/").ok_or_else(malformed)?;
	let (service_part, rest) = trimmed.split_once('/').unwrap_or((trimmed, ""));
	let (slug, version_label) = service_part.split_once('.').ok_or_else(malformed)?;
	let version = normalize_version(version_label).ok_or_else(malformed)?;
	Ok(ParsedRoute {
		slug: slug.to_lowercase(),
		version,
		rest_path: rest.to_string(),
	})
}

fn normalize_version(label: &str) -> Option<u32> {
	let mut chars = label.chars();
	let first = chars.next()?;
	if first != 'V' && first != 'v' {
		return None;
	}
	let digits: String = chars.collect();
	if digits.is_empty() || !digits.bytes().all(|b| b.is_ascii_digit()) {
		return None;
	}
	digits.parse().ok()
}

pub struct Forwarder {
	client: reqwest::Client,
	minter: S2SMinter,
	mirror: Arc<ConfigMirror>,
	default_downstream_timeout_ms: u64,
}

impl Forwarder {
	pub fn new(client: reqwest::Client, minter: S2SMinter, mirror: Arc<ConfigMirror>, default_downstream_timeout_ms: u64) -> Self {
		Forwarder {
			client,
			minter,
			mirror,
			default_downstream_timeout_ms,
		}
	}

	pub async fn forward(&self, req: Request) -> Result<Response, GatewayError> {
		let identity = req.extensions().get::<ClientIdentity>().cloned();
		let request_id = crate::telemetry::request_id_of(&req);
		let client_ip = crate::telemetry::client_ip_of(&req);
		let method = req.method().clone();
		let path = req.uri().path().to_string();
		let query = req.uri().query().map(str::to_string);
		let in_headers = req.headers().clone();

		let body_bytes = axum::body::to_bytes(req.into_body(), MAX_BODY_BYTES)
			.await
			.map_err(|e| GatewayError::Internal(e.into()))?;

		let route = parse_route(&path)?;
		let service = self
			.mirror
			.lookup(&route.slug)
			.filter(|s| s.enabled && s.allow_proxy && s.version == route.version)
			.ok_or_else(|| GatewayError::UnknownOrDisabledService(route.slug.clone()))?;

		route_policy::enforce(&service, &method, &route.rest_path, identity.as_ref())?;

		let target = headers::build_target_url(&service, &route.rest_path, query.as_deref());
		let version_label = format!("V{}", route.version);
		let minted = self
			.minter
			.mint(MintOpts::default_for(self.minter.self_slug()))
			.map_err(|e| GatewayError::Internal(e.into()))?;
		let out_headers = headers::build_outbound(&in_headers, &client_ip, &request_id, &version_label, &minted);

		let timeout_ms = service.overrides.timeout_ms.unwrap_or(self.default_downstream_timeout_ms);

		let sent = self
			.client
			.request(method, target)
			.headers(out_headers)
			.timeout(Duration::from_millis(timeout_ms))
			.body(body_bytes)
			.send()
			.await;

		let upstream = match sent {
			Ok(resp) => resp,
			Err(e) if e.is_timeout() => return Err(GatewayError::UpstreamTimeout),
			Err(e) if e.is_connect() => return Err(GatewayError::UpstreamConnect(e.to_string())),
			Err(e) => return Err(GatewayError::UpstreamOther(e.to_string())),
		};

		if upstream.status().is_success() {
			Ok(normalize_success(upstream).await)
		} else {
			Ok(normalize_upstream_error(upstream, &request_id).await)
		}
	}
}

pub async fn handle(State(fwd): State<Arc<Forwarder>>, req: Request) -> Response {
	let request_id = crate::telemetry::request_id_of(&req);
	match fwd.forward(req).await {
		Ok(resp) => resp,
		Err(err) => err.respond(&request_id),
	}
}

/// 2xx path: mirror upstream headers (minus hop-by-hop), pass bytes
/// through when they are already JSON, otherwise wrap a bare string body
/// as `{value: <string>}`.
async fn normalize_success(upstream: reqwest::Response) -> Response {
	let status = StatusCode::from_u16(upstream.status().as_u16()).unwrap_or(StatusCode::OK);
	let upstream_headers = upstream.headers().clone();
	let bytes = upstream.bytes().await.unwrap_or_default();
	let mut out_headers = headers::strip_hop_by_hop_response(&upstream_headers);

	let body = if serde_json::from_slice::<Value>(&bytes).is_ok() {
		Body::from(bytes)
	} else if let Ok(s) = std::str::from_utf8(&bytes) {
		let wrapped = serde_json::json!({ "value": s });
		out_headers.insert(header::CONTENT_TYPE, HeaderValue::from_static("application/json"));
		Body::from(serde_json::to_vec(&wrapped).unwrap_or_default())
	} else {
		Body::from(bytes)
	};

	let mut builder = Response::builder().status(status);
	for (name, value) in out_headers.iter() {
		builder = builder.header(name, value);
	}
	builder.body(body).unwrap_or_else(|_| StatusCode::INTERNAL_SERVER_ERROR.into_response())
}

/// 4xx/5xx path: normalize to problem+json, preserving the upstream status.
/// A JSON object body with `detail`/`message` is used verbatim; otherwise
/// non-JSON text becomes the detail.
async fn normalize_upstream_error(upstream: reqwest::Response, request_id: &str) -> Response {
	let status = StatusCode::from_u16(upstream.status().as_u16()).unwrap_or(StatusCode::BAD_GATEWAY);
	let title = status.canonical_reason().unwrap_or("Upstream Error");
	let bytes = upstream.bytes().await.unwrap_or_default();

	let detail = match serde_json::from_slice::<Value>(&bytes) {
		Ok(Value::Object(map)) => map
			.get("detail")
			.or_else(|| map.get("message"))
			.and_then(Value::as_str)
			.map(str::to_string)
			.unwrap_or_else(|| title.to_string()),
		_ => {
			let text = String::from_utf8_lossy(&bytes).trim().to_string();
			if text.is_empty() { title.to_string() } else { text }
		},
	};

	let problem = Problem::new(status, title, detail, request_id.to_string());
	(status, axum::Json(problem)).into_response()
}
