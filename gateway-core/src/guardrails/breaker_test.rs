use axum::Router;
use axum::body::Body;
use axum::http::{Request as HttpRequest, StatusCode};
use axum::routing::get;
use tower::ServiceExt;

use super::*;

fn app(breaker: Arc<CircuitBreaker>, status: StatusCode) -> Router {
	Router::new()
		.route("/act/widgets", get(move || async move { status }))
		.route("/{*rest}", get(move || async move { status }))
		.layer(axum::middleware::from_fn_with_state(breaker, enforce))
}

#[tokio::test]
async fn open_circuit_fast_fails_before_reaching_the_handler() {
	// The middleware stamps failures with the real wall clock, so trip the
	// breaker through one request rather than seeding `opened_at` by hand —
	// a fake old timestamp would look stale to `enforce`'s own `now_ms()`
	// and immediately read back as HALF_OPEN instead of OPEN.
	let breaker = Arc::new(CircuitBreaker::new(1, 100_000));
	let trip = HttpRequest::builder().uri("/act/widgets").body(Body::empty()).unwrap();
	let _ = app(breaker.clone(), StatusCode::INTERNAL_SERVER_ERROR).oneshot(trip).await.unwrap();

	let req = HttpRequest::builder().uri("/act/widgets").body(Body::empty()).unwrap();
	let resp = app(breaker, StatusCode::OK).oneshot(req).await.unwrap();
	assert_eq!(resp.status(), StatusCode::SERVICE_UNAVAILABLE);
}

#[tokio::test]
async fn closed_circuit_passes_through_and_records_a_5xx_as_a_failure() {
	let breaker = Arc::new(CircuitBreaker::new(1, 100_000));
	let req = HttpRequest::builder().uri("/act/widgets").body(Body::empty()).unwrap();
	let resp = app(breaker.clone(), StatusCode::INTERNAL_SERVER_ERROR)
		.oneshot(req)
		.await
		.unwrap();
	assert_eq!(resp.status(), StatusCode::INTERNAL_SERVER_ERROR);
	assert_eq!(breaker.admit("act", 0), State::Open);
}

#[tokio::test]
async fn closed_circuit_passes_through_and_records_success() {
	let breaker = Arc::new(CircuitBreaker::new(1, 100_000));
	breaker.on_failure("act", 0);
	let req = HttpRequest::builder().uri("/act/widgets").body(Body::empty()).unwrap();
	let resp = app(breaker.clone(), StatusCode::OK).oneshot(req).await.unwrap();
	assert_eq!(resp.status(), StatusCode::OK);
	// A success before the breaker had actually tripped resets its counters.
	assert_eq!(breaker.admit("act", 0), State::Closed);
}

#[test]
fn route_key_extracts_the_service_slug() {
	assert_eq!(CircuitBreaker::route_key("/api/act.V1/acts/42"), "act");
	assert_eq!(CircuitBreaker::route_key("/api/Act.V2/acts"), "act");
	assert_eq!(CircuitBreaker::route_key("//act"), "act");
	assert_eq!(CircuitBreaker::route_key(""), "");
}

#[tokio::test]
async fn different_service_slugs_trip_independent_breakers() {
	let breaker = Arc::new(CircuitBreaker::new(1, 100_000));
	let trip = HttpRequest::builder().uri("/api/acts.V1/acts/1").body(Body::empty()).unwrap();
	let _ = app(breaker.clone(), StatusCode::INTERNAL_SERVER_ERROR).oneshot(trip).await.unwrap();

	let same_service = HttpRequest::builder().uri("/api/acts.V1/acts/2").body(Body::empty()).unwrap();
	let resp = app(breaker.clone(), StatusCode::OK).oneshot(same_service).await.unwrap();
	assert_eq!(resp.status(), StatusCode::SERVICE_UNAVAILABLE);

	let other_service = HttpRequest::builder().uri("/api/catalog.V1/items").body(Body::empty()).unwrap();
	let resp = app(breaker, StatusCode::OK).oneshot(other_service).await.unwrap();
	assert_eq!(resp.status(), StatusCode::OK);
}

#[test]
fn trips_after_threshold_consecutive_failures() {
	let cb = CircuitBreaker::new(3, 100);
	assert_eq!(cb.admit("act", 0), State::Closed);
	cb.on_failure("act", 0);
	assert_eq!(cb.admit("act", 1), State::Closed);
	cb.on_failure("act", 1);
	assert_eq!(cb.admit("act", 2), State::Closed);
	cb.on_failure("act", 2);
	// Fourth request after 3 consecutive failures: fast-fail.
	assert_eq!(cb.admit("act", 3), State::Open);
}

#[test]
fn transitions_to_half_open_after_the_window_and_closes_on_success() {
	let cb = CircuitBreaker::new(3, 100);
	for _ in 0..3 {
		cb.on_failure("act", 0);
	}
	assert_eq!(cb.admit("act", 50), State::Open);
	assert_eq!(cb.admit("act", 100), State::HalfOpen);
	cb.on_success("act");
	assert_eq!(cb.admit("act", 101), State::Closed);
}

#[test]
fn half_open_failure_reopens_the_breaker() {
	let cb = CircuitBreaker::new(3, 100);
	for _ in 0..3 {
		cb.on_failure("act", 0);
	}
	assert_eq!(cb.admit("act", 100), State::HalfOpen);
	cb.on_failure("act", 100);
	assert_eq!(cb.admit("act", 150), State::Open);
	assert_eq!(cb.admit("act", 200), State::HalfOpen);
}

#[test]
fn concurrent_probes_are_rejected_while_one_is_in_flight() {
	let cb = CircuitBreaker::new(1, 100);
	cb.on_failure("act", 0);
	assert_eq!(cb.admit("act", 100), State::HalfOpen);
	// A second, concurrent request arriving before the probe resolves.
	assert_eq!(cb.admit("act", 100), State::Open);
}

#[test]
fn segments_are_independent() {
	let cb = CircuitBreaker::new(1, 100);
	cb.on_failure("act", 0);
	assert_eq!(cb.admit("act", 0), State::Open);
	assert_eq!(cb.admit("other", 0), State::Closed);
}
