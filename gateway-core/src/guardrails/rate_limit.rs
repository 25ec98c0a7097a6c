//! Global fixed-window rate limiter, keyed by `(ip, method, path)` (§4.4).
//! Fails open on any internal error, per spec.

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Duration;

#[derive(Clone, Copy, Debug)]
struct Bucket {
	count: u64,
	reset_at_ms: i64,
}

pub struct GlobalRateLimit {
	points: u64,
	window_ms: u64,
	buckets: Mutex<HashMap<String, Bucket>>,
}

pub struct Decision {
	pub allowed: bool,
	pub retry_after_secs: u64,
}

impl GlobalRateLimit {
	pub fn new(points: u64, window_ms: u64) -> Self {
		GlobalRateLimit {
			points,
			window_ms,
			buckets: Mutex::new(HashMap::new()),
		}
	}

	/// `now_ms` is injected so tests can drive fixed-window boundaries
	/// deterministically instead of depending on wall-clock timing.
	pub fn check(&self, ip: &str, method: &str, path: &str, now_ms: i64) -> Decision {
		let key = format!("{ip}|{method}|{path}");
		let mut buckets = match self.buckets.lock() {
			Ok(g) => g,
			Err(_) => {
				// Fail-open: a poisoned mutex must never block traffic.
				return Decision {
					allowed: true,
					retry_after_secs: 0,
				};
			},
		};

		let bucket = buckets.entry(key).or_insert(Bucket {
			count: 0,
			reset_at_ms: now_ms + self.window_ms as i64,
		});

		if now_ms >= bucket.reset_at_ms {
			bucket.count = 0;
			bucket.reset_at_ms = now_ms + self.window_ms as i64;
		}

		if bucket.count < self.points {
			bucket.count += 1;
			Decision {
				allowed: true,
				retry_after_secs: 0,
			}
		} else {
			let remaining_ms = (bucket.reset_at_ms - now_ms).max(0) as u64;
			let retry_after_secs = Duration::from_millis(remaining_ms).as_secs().max(1);
			Decision {
				allowed: false,
				retry_after_secs,
			}
		}
	}
}

#[cfg(test)]
#[path = "rate_limit_test.rs"]
mod rate_limit_test;
