//! Pipeline assembly (§4.7): mounts the external route surface and the
//! ordered guardrail chain onto a single `axum::Router`. Each guardrail is
//! a `tower::Layer` (via `axum::middleware::from_fn`/`from_fn_with_state`)
//! stacked onto the subtree it applies to, rather than one monolithic
//! handler.
//!
//! `/health*`, `/jwks`, and the per-slug health proxy sit outside the
//! guarded chain entirely: they get the early, request-wide layers
//! (https-only, CORS, request-id, access log, trace-first-5xx) but never
//! rate limiting, the breaker, auth, or audit. Only `/api/*` carries the
//! full chain, matching "health endpoints bypass policy" (§4.4) and the
//! normative order in §4.7.

use std::sync::Arc;

use axum::extract::{Request, State};
use axum::http::{HeaderName, Method, StatusCode, header};
use axum::middleware::{self, Next};
use axum::response::{IntoResponse, Response};
use axum::routing::{any, get};
use axum::{Json, Router};
use tower_http::cors::{AllowOrigin, CorsLayer};

use crate::audit::{self, AuditWal};
use crate::config::AppConfig;
use crate::error::Problem;
use crate::forwarder::Forwarder;
use crate::guardrails::{self, AuthGate, CircuitBreaker, GlobalRateLimit, SensitiveLimiter};
use crate::health::{self, HealthState};
use crate::security_log::{self, SecurityEvent};
use crate::telemetry::{self, log as access};

/// Everything the pipeline needs to wire up a request's handler state.
/// Assembled once at boot by [`crate::runtime::Runtime`].
#[derive(Clone)]
pub struct PipelineState {
	pub config: AppConfig,
	pub auth_gate: Arc<AuthGate>,
	pub breaker: Arc<CircuitBreaker>,
	pub rate_limit: Arc<GlobalRateLimit>,
	pub sensitive_limit: Arc<SensitiveLimiter>,
	pub forwarder: Arc<Forwarder>,
	pub health: HealthState,
	pub audit: Arc<AuditWal>,
}

pub fn build(state: PipelineState) -> Router {
	let root = Router::new().route("/", get(root_ok));

	let health_router = Router::new()
		.route("/health", get(health::liveness))
		.route("/healthz", get(health::liveness))
		.route("/readyz", get(health::readiness))
		.route("/{slug}/health/{kind}", get(health::proxy))
		.with_state(state.health.clone());

	let jwks_router = Router::new()
		.route("/.well-known/jwks.json", get(guardrails::auth_gate::serve_jwks))
		.route("/jwks", get(guardrails::auth_gate::serve_jwks))
		.with_state(state.auth_gate.clone());

	let gateway_ms = state.config.guardrails.timeout_gateway_ms;
	let rate_limit = state.rate_limit.clone();
	let sensitive_limit = state.sensitive_limit.clone();

	let api_router = Router::new()
		.route("/api/{*rest}", any(crate::forwarder::handle))
		.with_state(state.forwarder.clone())
		.layer(middleware::from_fn_with_state(state.audit.clone(), audit::capture))
		.layer(middleware::from_fn_with_state(state.auth_gate.clone(), guardrails::auth_gate::middleware))
		.layer(middleware::from_fn_with_state(state.breaker.clone(), guardrails::breaker::enforce))
		.layer(middleware::from_fn(move |req: Request, next: Next| {
			let gateway_ms = gateway_ms;
			async move { guardrails::timeout::enforce(gateway_ms, req, next).await }
		}))
		.layer(middleware::from_fn_with_state(sensitive_limit, sensitive_limit_guard))
		.layer(middleware::from_fn_with_state(rate_limit, rate_limit_guard));

	let https_enforce = state.config.guardrails.https_enforce;
	let app = Router::new()
		.merge(root)
		.merge(health_router)
		.merge(jwks_router)
		.merge(api_router)
		.fallback(not_found)
		.layer(cors_layer())
		.layer(middleware::from_fn(access::trace_first_5xx))
		.layer(middleware::from_fn(access::access_log))
		.layer(middleware::from_fn(telemetry::assign_request_id))
		.layer(middleware::from_fn(move |req: Request, next: Next| {
			let enabled = https_enforce;
			async move { guardrails::https_redirect::enforce(enabled, req, next).await }
		}));

	app
}

async fn root_ok() -> &'static str {
	"gateway is up"
}

async fn not_found(req: Request) -> Response {
	let request_id = telemetry::request_id_of(&req);
	let problem = Problem::new(
		StatusCode::NOT_FOUND,
		"Not Found",
		format!("no route for {} {}", req.method(), req.uri().path()),
		request_id,
	);
	(StatusCode::NOT_FOUND, Json(problem)).into_response()
}

fn cors_layer() -> CorsLayer {
	CorsLayer::new()
		.allow_origin(AllowOrigin::any())
		.allow_methods([
			Method::GET,
			Method::POST,
			Method::PUT,
			Method::PATCH,
			Method::DELETE,
			Method::OPTIONS,
			Method::HEAD,
		])
		.allow_headers([
			header::AUTHORIZATION,
			header::CONTENT_TYPE,
			HeaderName::from_static("x-request-id"),
			HeaderName::from_static("x-nv-api-version"),
			HeaderName::from_static("x-nv-user-assertion"),
		])
}

async fn rate_limit_guard(State(limiter): State<Arc<GlobalRateLimit>>, req: Request, next: Next) -> Response {
	let request_id = telemetry::request_id_of(&req);
	let ip = telemetry::client_ip_of(&req);
	let method = req.method().to_string();
	let path = req.uri().path().to_string();

	let decision = limiter.check(&ip, &method, &path, now_ms());
	if !decision.allowed {
		security_log::emit(SecurityEvent::RateLimitGlobalBackstopExceeded, &request_id, &ip, &method, &path);
		return rate_limited_response(decision.retry_after_secs, &request_id);
	}
	next.run(req).await
}

async fn sensitive_limit_guard(State(limiter): State<Arc<SensitiveLimiter>>, req: Request, next: Next) -> Response {
	let request_id = telemetry::request_id_of(&req);
	let ip = telemetry::client_ip_of(&req);
	let method = req.method().to_string();
	let path = req.uri().path().to_string();

	let decision = limiter.check(&ip, &path).await;
	if decision.in_scope && !decision.allowed {
		security_log::emit(SecurityEvent::RateLimitSensitivePathExceeded, &request_id, &ip, &method, &path);
		return rate_limited_response(decision.retry_after_secs, &request_id);
	}
	next.run(req).await
}

fn rate_limited_response(retry_after_secs: u64, request_id: &str) -> Response {
	let problem = Problem::new(
		StatusCode::TOO_MANY_REQUESTS,
		"Too Many Requests",
		format!("rate limit exceeded, retry after {retry_after_secs}s"),
		request_id.to_string(),
	);
	(
		StatusCode::TOO_MANY_REQUESTS,
		[(header::RETRY_AFTER, retry_after_secs.to_string())],
		Json(problem),
	)
		.into_response()
}

fn now_ms() -> i64 {
	chrono::Utc::now().timestamp_millis()
}

#[cfg(test)]
#[path = "pipeline_test.rs"]
mod pipeline_test;
