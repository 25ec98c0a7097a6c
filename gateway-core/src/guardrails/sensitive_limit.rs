//! Sensitive-path rate limiter, scoped by a configured set of path
//! prefixes and keyed by IP only (§4.4). Backed by a Redis-like external
//! counter store so the limit is shared across gateway replicas; fails
//! open on any store error.

use deadpool_redis::{Config, Pool, Runtime};
use redis::Script;

/// Atomic INCR-then-EXPIRE: only sets the TTL on the first hit in a window,
/// so the window does not slide forward on every request.
const INCR_WITH_EXPIRE: &str = r#"
local count = redis.call('INCR', KEYS[1])
if count == 1 then
  redis.call('PEXPIRE', KEYS[1], ARGV[1])
end
return count
"#;

pub struct SensitiveLimiter {
	pool: Pool,
	prefixes: Vec<String>,
	window_ms: u64,
	max: u64,
}

pub struct Decision {
	pub in_scope: bool,
	pub allowed: bool,
	pub retry_after_secs: u64,
}

impl SensitiveLimiter {
	pub fn new(redis_url: &str, prefixes: Vec<String>, window_ms: u64, max: u64) -> anyhow::Result<Self> {
		let cfg = Config::from_url(redis_url);
		let pool = cfg.create_pool(Some(Runtime::Tokio1))?;
		Ok(SensitiveLimiter {
			pool,
			prefixes,
			window_ms,
			max,
		})
	}

	pub fn in_scope(&self, path: &str) -> bool {
		self.prefixes.iter().any(|p| path.starts_with(p.as_str()))
	}

	/// Fails open (returns `allowed: true`) on any pool/store error, per
	/// spec §4.4 "Uses an external counter store ... on store failure,
	/// fail-open."
	pub async fn check(&self, ip: &str, path: &str) -> Decision {
		if !self.in_scope(path) {
			return Decision {
				in_scope: false,
				allowed: true,
				retry_after_secs: 0,
			};
		}

		match self.check_internal(ip).await {
			Ok(count) => {
				let allowed = count <= self.max;
				Decision {
					in_scope: true,
					allowed,
					retry_after_secs: if allowed {
						0
					} else {
						self.window_ms.div_ceil(1000).max(1)
					},
				}
			},
			Err(e) => {
				tracing::warn!(error = %e, "sensitive limiter store failure, failing open");
				Decision {
					in_scope: true,
					allowed: true,
					retry_after_secs: 0,
				}
			},
		}
	}

	async fn check_internal(&self, ip: &str) -> anyhow::Result<u64> {
		let mut conn = self.pool.get().await?;
		let key = format!("sensitive_limit:{ip}");
		let count: u64 = Script::new(INCR_WITH_EXPIRE)
			.key(&key)
			.arg(self.window_ms)
			.invoke_async(&mut conn)
			.await?;
		Ok(count)
	}
}

#[cfg(test)]
#[path = "sensitive_limit_test.rs"]
mod sensitive_limit_test;
