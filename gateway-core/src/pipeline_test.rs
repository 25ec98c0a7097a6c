use std::time::Duration;

use axum::body::Body;
use axum::http::{Request as HttpRequest, StatusCode};
use tower::ServiceExt;

use super::*;
use crate::config::{
	ClientAuthConfig, GuardrailsConfig, HealthConfig, RegistryConfig, S2SConfig, SensitiveLimiterConfig, SinkConfig, WalConfig,
};
use crate::mirror::ConfigMirror;
use crate::s2s::S2SMinter;
use crate::telemetry::metrics::Metrics;

fn app_config() -> AppConfig {
	AppConfig {
		service_name: "edge-gateway".to_string(),
		bind_addr: "0.0.0.0:8080".parse().unwrap(),
		env: "test".to_string(),
		registry: RegistryConfig {
			base_url: "http://registry.invalid".to_string(),
			internal_path: "/internal/services".to_string(),
			poll_interval: Duration::from_secs(30),
			pubsub_channel: None,
			pubsub_redis_url: None,
			lkg_path: "./data/registry.lkg.json".into(),
		},
		s2s: S2SConfig {
			secret: secrecy::SecretString::new("test-secret".into()),
			issuer: "edge-gateway".to_string(),
			audience: "internal-services".to_string(),
			default_ttl_secs: 300,
			max_ttl_secs: 900,
		},
		guardrails: GuardrailsConfig {
			https_enforce: false,
			rate_limit_window_ms: 60_000,
			rate_limit_points: 1,
			timeout_gateway_ms: 5_000,
			downstream_timeout_ms: 2_000,
			breaker_failure_threshold: 3,
			breaker_halfopen_after_ms: 10_000,
			breaker_min_rtt_ms: 0,
		},
		client_auth: ClientAuthConfig {
			jwks_url: "https://auth.example.test/jwks.json".to_string(),
			issuers: vec![],
			audience: "edge-gateway".to_string(),
			clock_skew_secs: 60,
			bypass: true,
			read_only: false,
			public_prefixes: vec![],
			protected_get_prefixes: vec![],
		},
		sensitive_limiter: SensitiveLimiterConfig {
			prefixes: vec![],
			window_ms: 1_000,
			max: 5,
			redis_url: "redis://127.0.0.1:6399".to_string(),
		},
		wal: WalConfig {
			dir: std::env::temp_dir().join("pipeline-test-wal"),
			file_max_mb: 64,
			retention_days: 30,
			ring_max_events: 100,
			batch_size: 100,
			flush_ms: 3_600_000,
			max_retry_ms: 30_000,
		},
		sink: SinkConfig {
			url: "http://unused.invalid/audit".to_string(),
			timeout_ms: 1_000,
		},
		health: HealthConfig {
			required_slugs: vec![],
			probe_timeout_ms: 500,
		},
	}
}

async fn test_app() -> Router {
	let dir = tempfile::tempdir().unwrap();
	let cfg = {
		let mut c = app_config();
		c.wal.dir = dir.path().to_path_buf();
		c
	};
	std::mem::forget(dir); // kept alive for the duration of the test process

	let minter = S2SMinter::new(&cfg.s2s, &cfg.service_name);
	let http = reqwest::Client::new();
	let mirror = ConfigMirror::new(cfg.registry.clone(), http.clone(), minter.clone());
	let forwarder = Arc::new(Forwarder::new(http.clone(), minter.clone(), mirror.clone(), cfg.guardrails.downstream_timeout_ms));
	let health = HealthState {
		service_name: cfg.service_name.clone(),
		env: cfg.env.clone(),
		version: "test",
		mirror: mirror.clone(),
		http: http.clone(),
		required_slugs: vec![],
		probe_timeout: Duration::from_millis(500),
	};
	let auth_gate = Arc::new(AuthGate::new(&cfg.client_auth));
	let breaker = Arc::new(CircuitBreaker::new(cfg.guardrails.breaker_failure_threshold, cfg.guardrails.breaker_halfopen_after_ms));
	let rate_limit = Arc::new(GlobalRateLimit::new(cfg.guardrails.rate_limit_points, cfg.guardrails.rate_limit_window_ms));
	let sensitive_limit = Arc::new(SensitiveLimiter::new(&cfg.sensitive_limiter.redis_url, cfg.sensitive_limiter.prefixes.clone(), cfg.sensitive_limiter.window_ms, cfg.sensitive_limiter.max).unwrap());

	let dispatcher = audit::Dispatcher::new(http.clone(), minter.clone(), &cfg.sink, cfg.wal.max_retry_ms);
	let mut registry = prometheus_client::registry::Registry::default();
	let metrics = Arc::new(Metrics::new(&mut registry));
	let wal = AuditWal::new(&cfg.wal, dispatcher, metrics);

	build(PipelineState {
		config: cfg,
		auth_gate,
		breaker,
		rate_limit,
		sensitive_limit,
		forwarder,
		health,
		audit: wal,
	})
}

#[tokio::test]
async fn root_reports_up() {
	let app = test_app().await;
	let req = HttpRequest::builder().uri("/").body(Body::empty()).unwrap();
	let resp = app.oneshot(req).await.unwrap();
	assert_eq!(resp.status(), StatusCode::OK);
	let body = axum::body::to_bytes(resp.into_body(), usize::MAX).await.unwrap();
	assert_eq!(&body[..], b"gateway is up");
}

#[tokio::test]
async fn healthz_reports_ok() {
	let app = test_app().await;
	let req = HttpRequest::builder().uri("/healthz").body(Body::empty()).unwrap();
	let resp = app.oneshot(req).await.unwrap();
	assert_eq!(resp.status(), StatusCode::OK);
}

#[tokio::test]
async fn jwks_is_misconfigured_before_any_fetch() {
	let app = test_app().await;
	let req = HttpRequest::builder().uri("/jwks").body(Body::empty()).unwrap();
	let resp = app.oneshot(req).await.unwrap();
	assert_eq!(resp.status(), StatusCode::SERVICE_UNAVAILABLE);
}

#[tokio::test]
async fn unmatched_path_returns_a_problem_json_tail() {
	let app = test_app().await;
	let req = HttpRequest::builder().uri("/nowhere").body(Body::empty()).unwrap();
	let resp = app.oneshot(req).await.unwrap();
	assert_eq!(resp.status(), StatusCode::NOT_FOUND);
	let body = axum::body::to_bytes(resp.into_body(), usize::MAX).await.unwrap();
	let json: serde_json::Value = serde_json::from_slice(&body).unwrap();
	assert_eq!(json["type"], "about:blank");
}

#[tokio::test]
async fn unresolved_api_route_reaches_the_forwarder_and_404s() {
	let app = test_app().await;
	let req = HttpRequest::builder().uri("/api/acts.V1/acts/1").body(Body::empty()).unwrap();
	let resp = app.oneshot(req).await.unwrap();
	// Bypass auth lets the request through every guardrail; the mirror has
	// no services loaded, so the forwarder reports unknown-or-disabled.
	assert_eq!(resp.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn second_request_in_the_window_is_rate_limited() {
	let app = test_app().await;

	let first = HttpRequest::builder().uri("/api/acts.V1/acts/1").body(Body::empty()).unwrap();
	let resp1 = app.clone().oneshot(first).await.unwrap();
	assert_eq!(resp1.status(), StatusCode::NOT_FOUND);

	let second = HttpRequest::builder().uri("/api/acts.V1/acts/1").body(Body::empty()).unwrap();
	let resp2 = app.oneshot(second).await.unwrap();
	assert_eq!(resp2.status(), StatusCode::TOO_MANY_REQUESTS);
	assert!(resp2.headers().get("retry-after").is_some());
}
