//! Hop-by-hop stripping and outbound/inbound header shaping (§4.3 steps 3-4,
//! 6). RFC 7230 hop-by-hop names plus `host` and the client `authorization`
//! are never forwarded; `Authorization` on the outbound request is always
//! the freshly minted S2S bearer.

use axum::http::{HeaderMap, HeaderName, HeaderValue, header};

use crate::mirror::ServiceConfig;

const HOP_BY_HOP: &[&str] = &[
	"connection",
	"keep-alive",
	"proxy-authenticate",
	"proxy-authorization",
	"te",
	"trailer",
	"transfer-encoding",
	"upgrade",
	"host",
];

/// `baseUrl + outboundApiPrefix + "/" + restPath`, safe-joined so a
/// trailing slash on one side and a leading slash on the other never
/// produce `//`.
pub fn build_target_url(service: &ServiceConfig, rest_path: &str, query: Option<&str>) -> String {
	let mut url = format!("{}{}", service.base_url, service.outbound_api_prefix);
	let rest = rest_path.trim_start_matches('/');
	if !rest.is_empty() {
		url.push('/');
		url.push_str(rest);
	}
	if let Some(q) = query.filter(|q| !q.is_empty()) {
		url.push('?');
		url.push_str(q);
	}
	url
}

fn strip_hop_by_hop(headers: &HeaderMap) -> HeaderMap {
	let mut out = HeaderMap::new();
	for (name, value) in headers.iter() {
		if HOP_BY_HOP.contains(&name.as_str()) {
			continue;
		}
		out.append(name.clone(), value.clone());
	}
	out
}

/// Response-side header shaping: strip hop-by-hop only, upstream headers
/// are otherwise mirrored verbatim.
pub fn strip_hop_by_hop_response(headers: &HeaderMap) -> HeaderMap {
	strip_hop_by_hop(headers)
}

/// Request-side header shaping: strip hop-by-hop and the client token,
/// append `x-forwarded-for`, set `x-forwarded-host`/`x-forwarded-proto`,
/// `x-request-id`, `x-nv-api-version`, a default `content-type`, and
/// overwrite `Authorization` with the minted S2S bearer.
pub fn build_outbound(original: &HeaderMap, client_ip: &str, request_id: &str, version_label: &str, minted_s2s: &str) -> HeaderMap {
	let mut out = strip_hop_by_hop(original);
	out.remove(header::AUTHORIZATION);

	let xff = HeaderName::from_static("x-forwarded-for");
	let appended = match original.get(&xff).and_then(|v| v.to_str().ok()) {
		Some(existing) if !existing.is_empty() => format!("{existing}, {client_ip}"),
		_ => client_ip.to_string(),
	};
	if let Ok(v) = HeaderValue::from_str(&appended) {
		out.insert(xff, v);
	}

	if let Some(host) = original.get(header::HOST).cloned() {
		out.insert(HeaderName::from_static("x-forwarded-host"), host);
	}

	let proto = original
		.get(HeaderName::from_static("x-forwarded-proto"))
		.and_then(|v| v.to_str().ok())
		.unwrap_or("http")
		.to_string();
	if let Ok(v) = HeaderValue::from_str(&proto) {
		out.insert(HeaderName::from_static("x-forwarded-proto"), v);
	}

	if let Ok(v) = HeaderValue::from_str(request_id) {
		out.insert(HeaderName::from_static("x-request-id"), v);
	}
	if let Ok(v) = HeaderValue::from_str(version_label) {
		out.insert(HeaderName::from_static("x-nv-api-version"), v);
	}

	if !out.contains_key(header::CONTENT_TYPE) {
		out.insert(header::CONTENT_TYPE, HeaderValue::from_static("application/json; charset=utf-8"));
	}

	out.insert(
		header::AUTHORIZATION,
		HeaderValue::from_str(&format!("Bearer {minted_s2s}")).expect("minted token is header-safe ascii"),
	);

	out
}

#[cfg(test)]
#[path = "headers_test.rs"]
mod headers_test;
