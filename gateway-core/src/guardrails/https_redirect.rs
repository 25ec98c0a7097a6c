//! HTTPS enforcement: permanent-redirect any non-HTTPS request, honoring
//! `x-forwarded-proto` (the gateway itself terminates plaintext HTTP behind
//! a load balancer that sets this header; TLS termination is out of scope).

use axum::extract::Request;
use axum::http::{StatusCode, Uri, header};
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};

pub fn is_https(req: &Request) -> bool {
	req
		.headers()
		.get(header::HeaderName::from_static("x-forwarded-proto"))
		.and_then(|v| v.to_str().ok())
		.map(|v| v.eq_ignore_ascii_case("https"))
		.unwrap_or(false)
}

pub async fn enforce(enabled: bool, req: Request, next: Next) -> Response {
	if !enabled || is_https(&req) {
		return next.run(req).await;
	}

	let host = req
		.headers()
		.get(header::HOST)
		.and_then(|v| v.to_str().ok())
		.unwrap_or("");
	let path_and_query = req
		.uri()
		.path_and_query()
		.map(|pq| pq.as_str())
		.unwrap_or("/");
	let location = format!("https://{host}{path_and_query}");

	let Ok(uri) = location.parse::<Uri>() else {
		return (StatusCode::BAD_REQUEST, "invalid host header").into_response();
	};

	(
		StatusCode::PERMANENT_REDIRECT,
		[(header::LOCATION, uri.to_string())],
	)
		.into_response()
}

#[cfg(test)]
#[path = "https_redirect_test.rs"]
mod https_redirect_test;
