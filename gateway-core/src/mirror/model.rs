//! Data model for the service registry replica (§3 `ServiceConfig`,
//! `MirrorSnapshot`, `RouteRule`).

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub enum UserAssertion {
	Required,
	Optional,
	Forbidden,
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct RouteRule {
	pub method: String,
	pub path: String,
	#[serde(default)]
	pub public: bool,
	pub user_assertion: UserAssertion,
	#[serde(default)]
	pub op_id: Option<String>,
}

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RoutePolicy {
	#[serde(default)]
	pub rules: Vec<RouteRule>,
}

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BreakerOverrides {
	pub failure_threshold: Option<u32>,
	pub half_open_after_ms: Option<u64>,
	pub min_rtt_ms: Option<u64>,
}

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Overrides {
	pub timeout_ms: Option<u64>,
	#[serde(default)]
	pub breaker: Option<BreakerOverrides>,
	/// External path prefix -> internal path prefix rewrite. Shape is not
	/// pinned down by spec.md; see SPEC_FULL.md §3 SUPPLEMENT.
	#[serde(default)]
	pub route_aliases: Option<HashMap<String, String>>,
}

fn default_true() -> bool {
	true
}

fn default_api_prefix() -> String {
	"/api".to_string()
}

fn default_health_path() -> String {
	"/health".to_string()
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServiceConfig {
	pub slug: String,
	pub version: u32,
	pub enabled: bool,
	pub allow_proxy: bool,
	pub base_url: String,
	#[serde(default = "default_api_prefix")]
	pub outbound_api_prefix: String,
	#[serde(default = "default_health_path")]
	pub health_path: String,
	#[serde(default = "default_true")]
	pub expose_health: bool,
	#[serde(default)]
	pub policy: RoutePolicy,
	#[serde(default)]
	pub overrides: Overrides,
}

impl ServiceConfig {
	/// Normalize the slug to lowercase and strip a trailing slash from
	/// `base_url`, matching the §3 invariants.
	pub fn normalize(mut self) -> Self {
		self.slug = self.slug.to_lowercase();
		while self.base_url.ends_with('/') {
			self.base_url.pop();
		}
		self
	}

	pub fn forwardable(&self) -> bool {
		self.enabled && self.allow_proxy
	}

	/// Match the first rule applicable to `(method, path)`. Ordering: exact
	/// segments outrank `:param`, both outrank a trailing `*`; ties break on
	/// higher exact-match count, then first-match.
	pub fn match_rule(&self, method: &str, path: &str) -> Option<&RouteRule> {
		let req_segments: Vec<&str> = path.split('/').filter(|s| !s.is_empty()).collect();

		let mut best: Option<((u8, u32), usize, &RouteRule)> = None;
		for (idx, rule) in self.policy.rules.iter().enumerate() {
			if !rule.method.eq_ignore_ascii_case(method) && rule.method != "*" {
				continue;
			}
			if let Some(score) = score_match(&rule.path, &req_segments) {
				let better = match &best {
					None => true,
					Some((best_score, best_idx, _)) => {
						score > *best_score || (score == *best_score && idx < *best_idx)
					},
				};
				if better {
					best = Some((score, idx, rule));
				}
			}
		}
		best.map(|(_, _, r)| r)
	}
}

/// Rank tuple: `(non_wildcard, exact_match_count)`. Non-wildcard matches
/// (whether via exact segments or `:param`) always outrank a trailing `*`
/// match; within the same tier, higher exact-match count wins. Returns
/// `None` if the rule path does not match the request path at all.
fn score_match(rule_path: &str, req_segments: &[&str]) -> Option<(u8, u32)> {
	let rule_segments: Vec<&str> = rule_path.split('/').filter(|s| !s.is_empty()).collect();

	let mut exact = 0u32;
	let mut ri = 0usize;
	for (i, seg) in rule_segments.iter().enumerate() {
		if *seg == "*" {
			// trailing wildcard matches everything remaining, including zero segments
			return Some((0, exact));
		}
		let Some(req_seg) = req_segments.get(i) else {
			return None;
		};
		if seg.starts_with(':') {
			// param segment matches any single segment, no exact credit
		} else if seg == req_seg {
			exact += 1;
		} else {
			return None;
		}
		ri = i + 1;
	}
	if ri == req_segments.len() {
		Some((1, exact))
	} else {
		None
	}
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct MirrorSnapshot {
	pub version: String,
	pub updated_at: i64,
	pub services: HashMap<String, ServiceConfig>,
	pub etag: String,
}

impl MirrorSnapshot {
	pub fn lookup(&self, slug: &str) -> Option<&ServiceConfig> {
		self.services.get(&slug.to_lowercase())
	}
}

#[derive(Clone, Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RegistryResponse {
	pub version: String,
	pub updated_at: i64,
	pub services: HashMap<String, ServiceConfig>,
}

impl RegistryResponse {
	pub fn into_snapshot(self, etag: String) -> MirrorSnapshot {
		let services = self
			.services
			.into_iter()
			.map(|(k, v)| (k.to_lowercase(), v.normalize()))
			.collect();
		MirrorSnapshot {
			version: self.version,
			updated_at: self.updated_at,
			services,
			etag,
		}
	}
}

#[cfg(test)]
#[path = "model_test.rs"]
mod model_test;
