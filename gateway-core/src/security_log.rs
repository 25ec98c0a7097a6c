//! Structured SECURITY event emission for guardrail denials. Distinct from
//! the audit WAL (§4.5): these are operational/triage signals, not
//! billing-grade records, and are never persisted or shipped to the sink.

use serde::Serialize;

#[derive(Debug, Clone, Copy, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SecurityEvent {
	RateLimitGlobalBackstopExceeded,
	RateLimitSensitivePathExceeded,
	TimeoutGatewaySloExceeded,
	CircuitOpen,
}

impl SecurityEvent {
	pub fn code(self) -> &'static str {
		match self {
			SecurityEvent::RateLimitGlobalBackstopExceeded => "rate_limit/global_backstop_exceeded",
			SecurityEvent::RateLimitSensitivePathExceeded => "rate_limit/sensitive_path_exceeded",
			SecurityEvent::TimeoutGatewaySloExceeded => "timeout/gateway_slo_exceeded",
			SecurityEvent::CircuitOpen => "circuit_open",
		}
	}
}

pub fn emit(event: SecurityEvent, request_id: &str, ip: &str, method: &str, path: &str) {
	tracing::warn!(
		target: "security",
		event = event.code(),
		request_id,
		ip,
		method,
		path,
		"guardrail denial"
	);
}
