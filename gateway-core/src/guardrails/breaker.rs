//! Circuit breaker, keyed by the target service slug so a sick upstream
//! segment trips its own breaker instead of taking every backend down with
//! it (§4.4). CLOSED -> OPEN on `consecutiveFailures >= failureThreshold`;
//! OPEN -> HALF_OPEN after `halfOpenAfterMs`; HALF_OPEN -> CLOSED on first
//! success or back to OPEN on first failure. Failure is defined as
//! upstream status >= 500.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use axum::extract::{Request, State as ExtractState};
use axum::http::StatusCode;
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};

use crate::error::Problem;
use crate::security_log::{self, SecurityEvent};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum State {
	Closed,
	Open,
	HalfOpen,
}

#[derive(Clone, Copy, Debug)]
struct Segment {
	consecutive_failures: u32,
	opened_at_ms: Option<i64>,
	half_open: bool,
}

impl Default for Segment {
	fn default() -> Self {
		Segment {
			consecutive_failures: 0,
			opened_at_ms: None,
			half_open: false,
		}
	}
}

pub struct CircuitBreaker {
	failure_threshold: u32,
	half_open_after_ms: u64,
	segments: Mutex<HashMap<String, Segment>>,
}

impl CircuitBreaker {
	pub fn new(failure_threshold: u32, half_open_after_ms: u64) -> Self {
		CircuitBreaker {
			failure_threshold,
			half_open_after_ms,
			segments: Mutex::new(HashMap::new()),
		}
	}

	/// The service slug a request targets, e.g. `acts` for
	/// `/api/acts.V1/acts/42`. Paths without an `/api/` prefix fall back to
	/// their own leading segment so the breaker still keys consistently in
	/// front of any router.
	pub fn route_key(path: &str) -> String {
		let trimmed = path.strip_prefix("/api/").unwrap_or_else(|| path.trim_start_matches('/'));
		let service_part = trimmed.split('/').next().unwrap_or("");
		let slug = service_part.split('.').next().unwrap_or(service_part);
		slug.to_lowercase()
	}

	/// Must be called before issuing the upstream call. Returns the state
	/// the request should be treated as: `Open` means fast-fail 503,
	/// `HalfOpen` means let exactly this request through as the probe.
	pub fn admit(&self, segment: &str, now_ms: i64) -> State {
		let mut segments = self.segments.lock().expect("breaker mutex poisoned");
		let entry = segments.entry(segment.to_string()).or_default();

		if let Some(opened_at) = entry.opened_at_ms {
			if entry.half_open {
				// A probe is already in flight; reject concurrent admits
				// rather than letting a herd through on HALF_OPEN.
				return State::Open;
			}
			if now_ms - opened_at >= self.half_open_after_ms as i64 {
				entry.half_open = true;
				return State::HalfOpen;
			}
			return State::Open;
		}
		State::Closed
	}

	pub fn on_success(&self, segment: &str) {
		let mut segments = self.segments.lock().expect("breaker mutex poisoned");
		segments.insert(segment.to_string(), Segment::default());
	}

	pub fn on_failure(&self, segment: &str, now_ms: i64) {
		let mut segments = self.segments.lock().expect("breaker mutex poisoned");
		let entry = segments.entry(segment.to_string()).or_default();

		if entry.half_open {
			// HALF_OPEN -> OPEN on first failure.
			entry.consecutive_failures = self.failure_threshold;
			entry.opened_at_ms = Some(now_ms);
			entry.half_open = false;
			return;
		}

		entry.consecutive_failures += 1;
		if entry.consecutive_failures >= self.failure_threshold && entry.opened_at_ms.is_none() {
			entry.opened_at_ms = Some(now_ms);
		}
	}
}

/// Wraps everything downstream (authGate, auditCapture, `/api`); fast-fails
/// OPEN segments with a 503 before the request ever reaches the forwarder,
/// and records the outcome of whatever response does come back.
pub async fn enforce(ExtractState(breaker): ExtractState<Arc<CircuitBreaker>>, req: Request, next: Next) -> Response {
	let request_id = crate::telemetry::request_id_of(&req);
	let ip = crate::telemetry::client_ip_of(&req);
	let method = req.method().to_string();
	let path = req.uri().path().to_string();
	let segment = CircuitBreaker::route_key(&path);
	let now = now_ms();

	if breaker.admit(&segment, now) == State::Open {
		security_log::emit(SecurityEvent::CircuitOpen, &request_id, &ip, &method, &path);
		let problem = Problem::new(
			StatusCode::SERVICE_UNAVAILABLE,
			"Service Unavailable",
			format!("circuit open for '{segment}'"),
			request_id,
		);
		return (StatusCode::SERVICE_UNAVAILABLE, axum::Json(problem)).into_response();
	}

	let resp = next.run(req).await;
	if resp.status().as_u16() >= 500 {
		breaker.on_failure(&segment, now);
	} else {
		breaker.on_success(&segment);
	}
	resp
}

fn now_ms() -> i64 {
	chrono::Utc::now().timestamp_millis()
}

#[cfg(test)]
#[path = "breaker_test.rs"]
mod breaker_test;
