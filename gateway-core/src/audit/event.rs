//! Audit event data model (§3 `AuditEvent`).

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Phase {
	Begin,
	End,
}

/// Append-only record of one request lifecycle edge. `status` is only ever
/// set on `end` events; `safe_headers` has `authorization` stripped before
/// construction, never after.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditEvent {
	pub request_id: String,
	pub phase: Phase,
	pub service: String,
	pub time: i64,
	pub method: String,
	pub url: String,
	#[serde(skip_serializing_if = "Option::is_none")]
	pub status: Option<u16>,
	#[serde(skip_serializing_if = "Option::is_none")]
	pub ip: Option<String>,
	#[serde(skip_serializing_if = "Option::is_none")]
	pub safe_headers: Option<BTreeMap<String, String>>,
}

impl AuditEvent {
	/// Copies header values verbatim except `authorization`, per the §3
	/// persistence invariant.
	pub fn safe_headers_from(headers: &axum::http::HeaderMap) -> BTreeMap<String, String> {
		headers
			.iter()
			.filter(|(name, _)| *name != axum::http::header::AUTHORIZATION)
			.filter_map(|(name, value)| value.to_str().ok().map(|v| (name.as_str().to_string(), v.to_string())))
			.collect()
	}

	pub fn to_ndjson_line(&self) -> serde_json::Result<String> {
		serde_json::to_string(self)
	}
}

#[cfg(test)]
#[path = "event_test.rs"]
mod event_test;
