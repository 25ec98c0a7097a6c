//! Prometheus counters for guardrail denials, WAL flush outcomes, and
//! breaker transitions (§2 ambient metrics), registered as labeled
//! `Family<_, Counter>` instances against one shared registry.

use prometheus_client::encoding::EncodeLabelSet;
use prometheus_client::metrics::counter::Counter;
use prometheus_client::metrics::family::Family;
use prometheus_client::registry::Registry;

#[derive(Clone, Hash, Debug, PartialEq, Eq, EncodeLabelSet)]
pub struct GuardrailLabels {
	pub guardrail: String,
	pub event: String,
}

#[derive(Clone, Hash, Debug, PartialEq, Eq, EncodeLabelSet)]
pub struct BreakerLabels {
	pub segment: String,
	pub transition: String,
}

#[derive(Clone, Hash, Debug, PartialEq, Eq, EncodeLabelSet)]
pub struct WalFlushLabels {
	pub outcome: String,
}

#[derive(Debug)]
pub struct Metrics {
	pub guardrail_denials: Family<GuardrailLabels, Counter>,
	pub breaker_transitions: Family<BreakerLabels, Counter>,
	pub wal_flushes: Family<WalFlushLabels, Counter>,
}

impl Metrics {
	pub fn new(registry: &mut Registry) -> Self {
		let guardrail_denials = Family::default();
		registry.register(
			"guardrail_denials",
			"Requests denied by a request-path guardrail",
			guardrail_denials.clone(),
		);

		let breaker_transitions = Family::default();
		registry.register(
			"circuit_breaker_transitions",
			"Circuit breaker state transitions per path segment",
			breaker_transitions.clone(),
		);

		let wal_flushes = Family::default();
		registry.register("audit_wal_flushes", "Audit WAL flush attempts by outcome", wal_flushes.clone());

		Metrics {
			guardrail_denials,
			breaker_transitions,
			wal_flushes,
		}
	}
}

#[cfg(test)]
#[path = "metrics_test.rs"]
mod metrics_test;
