//! RFC 7807 problem+json envelope and the gateway's top-level error enum.
//!
//! Every guardrail and the forwarder terminate locally and produce a
//! [`GatewayError`]; nothing here relies on panics or thrown exceptions to
//! shape the response, matching the "no exception-style control flow"
//! design note.

use axum::Json;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde::Serialize;

/// RFC 7807 problem detail, serialized verbatim on every 4xx/5xx tail.
#[derive(Debug, Clone, Serialize)]
pub struct Problem {
	#[serde(rename = "type")]
	pub type_: &'static str,
	pub title: &'static str,
	pub status: u16,
	pub detail: String,
	pub instance: String,
}

impl Problem {
	pub fn new(status: StatusCode, title: &'static str, detail: impl Into<String>, instance: impl Into<String>) -> Self {
		Problem {
			type_: "about:blank",
			title,
			status: status.as_u16(),
			detail: detail.into(),
			instance: instance.into(),
		}
	}
}

/// Top-level error taxonomy for the request path. Each variant knows its own
/// status code and problem title; nothing downstream re-derives either.
#[derive(Debug, thiserror::Error)]
pub enum GatewayError {
	#[error("malformed route: {0}")]
	MalformedRoute(String),
	#[error("service '{0}' unavailable (unknown or disabled)")]
	UnknownOrDisabledService(String),
	#[error("missing or invalid client token")]
	Unauthenticated,
	#[error("forbidden by route policy")]
	Forbidden,
	#[error("auth is misconfigured")]
	AuthMisconfigured,
	#[error("rate limit exceeded, retry after {retry_after_secs}s")]
	RateLimited { retry_after_secs: u64 },
	#[error("gateway timeout after {0}ms")]
	EdgeTimeout(u64),
	#[error("circuit open for segment '{0}'")]
	CircuitOpen(String),
	#[error("upstream connect error: {0}")]
	UpstreamConnect(String),
	#[error("upstream timed out")]
	UpstreamTimeout,
	#[error("upstream error: {0}")]
	UpstreamOther(String),
	#[error("internal error")]
	Internal(#[from] anyhow::Error),
}

impl GatewayError {
	pub fn status(&self) -> StatusCode {
		use GatewayError::*;
		match self {
			MalformedRoute(_) | UnknownOrDisabledService(_) => StatusCode::NOT_FOUND,
			Unauthenticated => StatusCode::UNAUTHORIZED,
			Forbidden => StatusCode::FORBIDDEN,
			AuthMisconfigured => StatusCode::SERVICE_UNAVAILABLE,
			RateLimited { .. } => StatusCode::TOO_MANY_REQUESTS,
			EdgeTimeout(_) => StatusCode::GATEWAY_TIMEOUT,
			CircuitOpen(_) => StatusCode::SERVICE_UNAVAILABLE,
			UpstreamConnect(_) => StatusCode::BAD_GATEWAY,
			UpstreamTimeout => StatusCode::GATEWAY_TIMEOUT,
			UpstreamOther(_) => StatusCode::BAD_GATEWAY,
			Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
		}
	}

	fn title(&self) -> &'static str {
		match self.status() {
			StatusCode::NOT_FOUND => "Not Found",
			StatusCode::UNAUTHORIZED => "Unauthorized",
			StatusCode::FORBIDDEN => "Forbidden",
			StatusCode::SERVICE_UNAVAILABLE => "Service Unavailable",
			StatusCode::TOO_MANY_REQUESTS => "Too Many Requests",
			StatusCode::GATEWAY_TIMEOUT => "Gateway Timeout",
			StatusCode::BAD_GATEWAY => "Bad Gateway",
			_ => "Internal Server Error",
		}
	}

	/// Detail text surfaced to the client. Internal errors never leak; the
	/// real cause is logged by the caller before this is constructed.
	fn detail(&self) -> String {
		match self {
			GatewayError::Internal(_) => "an unexpected error occurred".to_string(),
			other => other.to_string(),
		}
	}

	pub fn into_problem(self, request_id: &str) -> Problem {
		let status = self.status();
		let title = self.title();
		let detail = self.detail();
		Problem::new(status, title, detail, request_id.to_string())
	}

	pub fn respond(self, request_id: &str) -> Response {
		let status = self.status();
		if let GatewayError::Internal(ref e) = self {
			tracing::error!(error = %e, request_id, "internal error");
		}
		let problem = self.into_problem(request_id);
		(status, Json(problem)).into_response()
	}
}

impl IntoResponse for GatewayError {
	/// Used by handlers that have no request-id in scope (e.g. `/jwks`).
	/// Request-path handlers should call [`GatewayError::respond`]
	/// directly so `instance` carries the real request id.
	fn into_response(self) -> Response {
		self.respond("unknown")
	}
}
