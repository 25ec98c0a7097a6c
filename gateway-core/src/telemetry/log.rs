//! Structured access logging and first-5xx correlation (§2, §7). Plain
//! `tracing` events emitted through whatever subscriber the binary crate
//! installs — no OpenTelemetry export pipeline.

use std::time::Instant;

use axum::extract::Request;
use axum::middleware::Next;
use axum::response::Response;

use super::{client_ip_of, request_id_of};

/// One structured `tracing::info!` per completed request.
pub async fn access_log(req: Request, next: Next) -> Response {
	let method = req.method().clone();
	let path = req.uri().path().to_string();
	let request_id = request_id_of(&req);
	let client_ip = client_ip_of(&req);
	let start = Instant::now();

	let resp = next.run(req).await;

	tracing::info!(
		target: "access",
		request_id,
		client_ip,
		method = %method,
		path,
		status = resp.status().as_u16(),
		elapsed_ms = start.elapsed().as_millis() as u64,
		"request completed"
	);
	resp
}

/// Runs early in the chain (§2 control flow: "trace-first-5xx"). Logs a
/// correlation event when the response this request eventually produces
/// carries a >=500 status, for post-mortem tracing back to the originating
/// request id (§7).
pub async fn trace_first_5xx(req: Request, next: Next) -> Response {
	let request_id = request_id_of(&req);
	let method = req.method().clone();
	let path = req.uri().path().to_string();

	let resp = next.run(req).await;

	if resp.status().as_u16() >= 500 {
		tracing::warn!(
			target: "trace5xx",
			request_id,
			method = %method,
			path,
			status = resp.status().as_u16(),
			"5xx response on request path"
		);
	}
	resp
}

#[cfg(test)]
#[path = "log_test.rs"]
mod log_test;
