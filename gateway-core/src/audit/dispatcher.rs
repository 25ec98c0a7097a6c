//! Delivers audit batches to the configured sink over S2S-authenticated
//! HTTP, and classifies the result for the WAL's retry loop (§4.5
//! "Dispatcher").

use rand::Rng;

use crate::config::SinkConfig;
use crate::s2s::{MintOpts, S2SMinter};

use super::event::AuditEvent;

pub enum DispatchOutcome {
	Ok,
	NonRetriable(String),
	Retriable(String),
}

pub struct Dispatcher {
	http: reqwest::Client,
	minter: S2SMinter,
	sink_url: String,
	timeout: std::time::Duration,
	max_retry_ms: u64,
}

impl Dispatcher {
	pub fn new(http: reqwest::Client, minter: S2SMinter, sink: &SinkConfig, max_retry_ms: u64) -> Self {
		Dispatcher {
			http,
			minter,
			sink_url: sink.url.clone(),
			timeout: std::time::Duration::from_millis(sink.timeout_ms),
			max_retry_ms,
		}
	}

	/// Empty batches short-circuit to a no-op success without a network call.
	/// Status semantics: 2xx=ok, 4xx=non-retriable (drop), everything else
	/// (3xx, 5xx, network error)=retriable.
	pub async fn send(&self, batch: &[AuditEvent]) -> DispatchOutcome {
		if batch.is_empty() {
			return DispatchOutcome::Ok;
		}

		let token = match self.minter.mint(MintOpts::default_for(self.minter.self_slug())) {
			Ok(t) => t,
			Err(e) => return DispatchOutcome::Retriable(e.to_string()),
		};

		let result = self
			.http
			.put(&self.sink_url)
			.bearer_auth(token)
			.timeout(self.timeout)
			.json(batch)
			.send()
			.await;

		match result {
			Ok(resp) if resp.status().is_success() => DispatchOutcome::Ok,
			Ok(resp) if resp.status().is_client_error() => {
				DispatchOutcome::NonRetriable(format!("sink rejected batch with {}", resp.status()))
			},
			Ok(resp) => DispatchOutcome::Retriable(format!("sink returned {}", resp.status())),
			Err(e) => DispatchOutcome::Retriable(e.to_string()),
		}
	}

	pub fn next_backoff_ms(&self, attempt: u32) -> u64 {
		next_backoff_ms(attempt, self.max_retry_ms)
	}
}

/// Exponential backoff, base 100ms, capped at `max_retry_ms`, with
/// multiplicative jitter in `[0.25, 0.75)`.
pub fn next_backoff_ms(attempt: u32, max_retry_ms: u64) -> u64 {
	let base = 100u64.saturating_mul(1u64 << attempt.min(20));
	let capped = base.min(max_retry_ms);
	let jitter = rand::rng().random_range(0.25..0.75);
	(capped as f64 * jitter) as u64
}

#[cfg(test)]
#[path = "dispatcher_test.rs"]
mod dispatcher_test;
