//! Edge SLO timer (§4.4): a single request-scoped timeout. On fire, if the
//! response has not yet been sent, reply 504 and emit a SECURITY event. The
//! forwarder owns its own, strictly shorter downstream timeout — this timer
//! never cancels the upstream call itself.

use std::time::Duration;

use axum::extract::Request;
use axum::http::StatusCode;
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};

use crate::error::Problem;
use crate::security_log::{self, SecurityEvent};

pub async fn enforce(gateway_ms: u64, req: Request, next: Next) -> Response {
	let request_id = crate::telemetry::request_id_of(&req);
	let ip = crate::telemetry::client_ip_of(&req);
	let method = req.method().to_string();
	let path = req.uri().path().to_string();

	match tokio::time::timeout(Duration::from_millis(gateway_ms), next.run(req)).await {
		Ok(resp) => resp,
		Err(_) => {
			security_log::emit(SecurityEvent::TimeoutGatewaySloExceeded, &request_id, &ip, &method, &path);
			let problem = Problem::new(
				StatusCode::GATEWAY_TIMEOUT,
				"Gateway Timeout",
				format!("gateway SLO of {gateway_ms}ms exceeded"),
				request_id,
			);
			(StatusCode::GATEWAY_TIMEOUT, axum::Json(problem)).into_response()
		},
	}
}

#[cfg(test)]
#[path = "timeout_test.rs"]
mod timeout_test;
