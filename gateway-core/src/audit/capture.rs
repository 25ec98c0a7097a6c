//! Request-path glue that turns one forwarded request into a begin/end
//! [`AuditEvent`] pair (§4.7 `auditCapture`, post-authGate, pre-`/api`).

use std::sync::Arc;

use axum::extract::{Request, State};
use axum::middleware::Next;
use axum::response::Response;

use super::event::{AuditEvent, Phase};
use super::wal::AuditWal;

pub async fn capture(State(wal): State<Arc<AuditWal>>, req: Request, next: Next) -> Response {
	let request_id = crate::telemetry::request_id_of(&req);
	let client_ip = crate::telemetry::client_ip_of(&req);
	let method = req.method().to_string();
	let url = req.uri().to_string();
	let service = crate::forwarder::parse_route(req.uri().path())
		.map(|r| r.slug)
		.unwrap_or_else(|_| "unknown".to_string());
	let safe_headers = Some(AuditEvent::safe_headers_from(req.headers()));

	wal
		.enqueue(AuditEvent {
			request_id: request_id.clone(),
			phase: Phase::Begin,
			service: service.clone(),
			time: now_ms(),
			method: method.clone(),
			url: url.clone(),
			status: None,
			ip: Some(client_ip.clone()),
			safe_headers: safe_headers.clone(),
		})
		.await;

	let resp = next.run(req).await;

	wal
		.enqueue(AuditEvent {
			request_id,
			phase: Phase::End,
			service,
			time: now_ms(),
			method,
			url,
			status: Some(resp.status().as_u16()),
			ip: Some(client_ip),
			safe_headers,
		})
		.await;

	resp
}

fn now_ms() -> i64 {
	chrono::Utc::now().timestamp_millis()
}

#[cfg(test)]
#[path = "capture_test.rs"]
mod capture_test;
