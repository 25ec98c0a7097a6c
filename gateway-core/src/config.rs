//! Boot-time configuration, assembled from the environment and validated
//! fail-fast via small `parse`/`parse_default` helpers. No YAML or
//! control-plane config source: this gateway is configured purely from
//! the environment.

use std::env;
use std::str::FromStr;
use std::time::Duration;

use anyhow::Context;

#[derive(Clone, Debug)]
pub struct AppConfig {
	pub service_name: String,
	pub bind_addr: std::net::SocketAddr,
	pub env: String,

	pub registry: RegistryConfig,
	pub s2s: S2SConfig,
	pub guardrails: GuardrailsConfig,
	pub client_auth: ClientAuthConfig,
	pub sensitive_limiter: SensitiveLimiterConfig,
	pub wal: WalConfig,
	pub sink: SinkConfig,
	pub health: HealthConfig,
}

#[derive(Clone, Debug)]
pub struct RegistryConfig {
	pub base_url: String,
	pub internal_path: String,
	pub poll_interval: Duration,
	pub pubsub_channel: Option<String>,
	/// Redis connection string for `pubsub_channel`. Both must be set for
	/// the mirror to subscribe; either alone leaves it on poll-only.
	pub pubsub_redis_url: Option<String>,
	pub lkg_path: std::path::PathBuf,
}

#[derive(Clone, Debug)]
pub struct S2SConfig {
	pub secret: secrecy::SecretString,
	pub issuer: String,
	pub audience: String,
	pub default_ttl_secs: u64,
	pub max_ttl_secs: u64,
}

#[derive(Clone, Debug)]
pub struct GuardrailsConfig {
	pub https_enforce: bool,
	pub rate_limit_window_ms: u64,
	pub rate_limit_points: u64,
	pub timeout_gateway_ms: u64,
	pub downstream_timeout_ms: u64,
	pub breaker_failure_threshold: u32,
	pub breaker_halfopen_after_ms: u64,
	pub breaker_min_rtt_ms: u64,
}

#[derive(Clone, Debug)]
pub struct ClientAuthConfig {
	pub jwks_url: String,
	pub issuers: Vec<String>,
	pub audience: String,
	pub clock_skew_secs: u64,
	pub bypass: bool,
	pub read_only: bool,
	pub public_prefixes: Vec<String>,
	pub protected_get_prefixes: Vec<String>,
}

#[derive(Clone, Debug)]
pub struct SensitiveLimiterConfig {
	pub prefixes: Vec<String>,
	pub window_ms: u64,
	pub max: u64,
	pub redis_url: String,
}

#[derive(Clone, Debug)]
pub struct WalConfig {
	pub dir: std::path::PathBuf,
	pub file_max_mb: u64,
	pub retention_days: u64,
	pub ring_max_events: usize,
	pub batch_size: usize,
	pub flush_ms: u64,
	pub max_retry_ms: u64,
}

#[derive(Clone, Debug)]
pub struct SinkConfig {
	pub url: String,
	pub timeout_ms: u64,
}

#[derive(Clone, Debug)]
pub struct HealthConfig {
	/// Slugs `/readyz` fans out to; empty means readiness tracks only the
	/// config mirror itself.
	pub required_slugs: Vec<String>,
	pub probe_timeout_ms: u64,
}

impl AppConfig {
	/// Assemble configuration purely from the process environment, failing
	/// fast (returning `Err`) on any missing required value or malformed
	/// duration/number, per spec §6 "Required configuration (fail-fast at
	/// boot)".
	pub fn from_env() -> anyhow::Result<Self> {
		let bind_addr = parse_default("HTTP_BIND", "0.0.0.0:8080".to_string())?
			.parse()
			.context("HTTP_BIND must be a socket address")?;

		Ok(AppConfig {
			service_name: parse_default("SERVICE_NAME", "edge-gateway".to_string())?,
			bind_addr,
			env: parse_default("APP_ENV", "production".to_string())?,
			registry: RegistryConfig {
				base_url: required("REGISTRY_BASE_URL")?,
				internal_path: parse_default("REGISTRY_INTERNAL_PATH", "/internal/services".to_string())?,
				poll_interval: Duration::from_millis(cmp_floor(
					parse_default("REGISTRY_POLL_MS", 30_000)?,
					10_000,
				)),
				pubsub_channel: parse::<String>("REGISTRY_PUBSUB_CHANNEL")?,
				pubsub_redis_url: parse::<String>("REGISTRY_PUBSUB_REDIS_URL")?,
				lkg_path: parse_default("REGISTRY_LKG_PATH", "./data/registry.lkg.json".to_string())?.into(),
			},
			s2s: S2SConfig {
				secret: secrecy::SecretString::new(required("S2S_SECRET")?.into()),
				issuer: required("S2S_ISSUER")?,
				audience: required("S2S_AUDIENCE")?,
				default_ttl_secs: parse_default("S2S_TTL_SECS", 300)?,
				max_ttl_secs: parse_default("S2S_MAX_TTL_SECS", 900)?,
			},
			guardrails: GuardrailsConfig {
				https_enforce: parse_default("HTTPS_ENFORCE", true)?,
				rate_limit_window_ms: required_min("RATE_LIMIT_WINDOW_MS", 250)?,
				rate_limit_points: required_min("RATE_LIMIT_POINTS", 1)?,
				timeout_gateway_ms: required("TIMEOUT_GATEWAY_MS")?,
				downstream_timeout_ms: parse_default("DOWNSTREAM_TIMEOUT_MS", 0)?,
				breaker_failure_threshold: required("BREAKER_FAILURE_THRESHOLD")?,
				breaker_halfopen_after_ms: required("BREAKER_HALFOPEN_AFTER_MS")?,
				breaker_min_rtt_ms: required("BREAKER_MIN_RTT_MS")?,
			},
			client_auth: ClientAuthConfig {
				jwks_url: required("JWKS_URL")?,
				issuers: split_csv(&required("JWT_ISSUERS")?),
				audience: required("JWT_AUDIENCE")?,
				clock_skew_secs: parse_default("JWT_CLOCK_SKEW_SECS", 60)?,
				bypass: parse_default("AUTH_BYPASS", false)?,
				read_only: parse_default("READ_ONLY_MODE", false)?,
				public_prefixes: split_csv(&parse_default("AUTH_PUBLIC_PREFIXES", String::new())?),
				protected_get_prefixes: split_csv(&parse_default(
					"AUTH_PROTECTED_GET_PREFIXES",
					String::new(),
				)?),
			},
			sensitive_limiter: SensitiveLimiterConfig {
				prefixes: split_csv(&parse_default("SENSITIVE_PATH_PREFIXES", String::new())?),
				window_ms: required_min("SENSITIVE_LIMIT_WINDOW_MS", 250)?,
				max: required_min("SENSITIVE_LIMIT_MAX", 1)?,
				redis_url: required("SENSITIVE_LIMIT_REDIS_URL")?,
			},
			wal: WalConfig {
				dir: required("AUDIT_WAL_DIR")?.into(),
				file_max_mb: parse_default("AUDIT_FILE_MAX_MB", 64)?,
				retention_days: parse_default("AUDIT_RETENTION_DAYS", 30)?,
				ring_max_events: parse_default("AUDIT_RING_MAX_EVENTS", 50_000)?,
				batch_size: parse_default("AUDIT_BATCH_SIZE", 200)?,
				flush_ms: parse_default("AUDIT_FLUSH_MS", 1_000)?,
				max_retry_ms: parse_default("AUDIT_MAX_RETRY_MS", 30_000)?,
			},
			sink: SinkConfig {
				url: required("AUDIT_SINK_URL")?,
				timeout_ms: parse_default("AUDIT_SINK_TIMEOUT_MS", 5_000)?,
			},
			health: HealthConfig {
				required_slugs: split_csv(&parse_default("READYZ_REQUIRED_SLUGS", String::new())?),
				probe_timeout_ms: parse_default("READYZ_PROBE_TIMEOUT_MS", 3_000)?,
			},
		})
	}
}

fn split_csv(s: &str) -> Vec<String> {
	s.split(',')
		.map(str::trim)
		.filter(|s| !s.is_empty())
		.map(str::to_string)
		.collect()
}

fn cmp_floor(v: u64, floor: u64) -> u64 {
	std::cmp::max(v, floor)
}

fn parse<T: FromStr>(env: &str) -> anyhow::Result<Option<T>>
where
	<T as FromStr>::Err: std::fmt::Display,
{
	match env::var(env) {
		Ok(val) => val
			.parse()
			.map(Some)
			.map_err(|e| anyhow::anyhow!("invalid env var {env}={val} ({e})")),
		Err(_) => Ok(None),
	}
}

fn parse_default<T: FromStr>(env: &str, default: T) -> anyhow::Result<T>
where
	<T as FromStr>::Err: std::fmt::Display,
{
	parse(env).map(|v| v.unwrap_or(default))
}

fn required<T: FromStr>(env: &str) -> anyhow::Result<T>
where
	<T as FromStr>::Err: std::fmt::Display,
{
	parse(env)?.with_context(|| format!("{env} is required"))
}

fn required_min(env: &str, floor: u64) -> anyhow::Result<u64> {
	let v: u64 = required(env)?;
	anyhow::ensure!(v >= floor, "{env}={v} must be >= {floor}");
	Ok(v)
}

#[cfg(test)]
#[path = "config_test.rs"]
mod config_test;
