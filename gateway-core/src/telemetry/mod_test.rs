use axum::Router;
use axum::body::Body;
use axum::http::{Request as HttpRequest, StatusCode};
use axum::routing::get;
use tower::ServiceExt;

use super::*;

fn app() -> Router {
	Router::new()
		.route("/", get(|| async { "ok" }))
		.layer(axum::middleware::from_fn(assign_request_id))
}

#[tokio::test]
async fn assigns_a_request_id_when_the_client_sends_none() {
	let req = HttpRequest::builder().uri("/").body(Body::empty()).unwrap();
	let resp = app().oneshot(req).await.unwrap();
	assert_eq!(resp.status(), StatusCode::OK);
	assert!(resp.headers().get("x-request-id").is_some());
}

#[tokio::test]
async fn echoes_back_a_client_supplied_request_id() {
	let req = HttpRequest::builder()
		.uri("/")
		.header("x-request-id", "client-chosen-id")
		.body(Body::empty())
		.unwrap();
	let resp = app().oneshot(req).await.unwrap();
	assert_eq!(resp.headers().get("x-request-id").unwrap(), "client-chosen-id");
}

#[test]
fn request_id_of_falls_back_when_unassigned() {
	let req: axum::extract::Request = HttpRequest::builder().uri("/").body(Body::empty()).unwrap();
	assert!(!request_id_of(&req).is_empty());
}

#[test]
fn client_ip_of_reads_the_forwarded_for_first_hop() {
	let req: axum::extract::Request = HttpRequest::builder()
		.uri("/")
		.header("x-forwarded-for", "5.6.7.8, 9.9.9.9")
		.body(Body::empty())
		.unwrap();
	assert_eq!(client_ip_of(&req), "5.6.7.8");
}

#[test]
fn client_ip_of_defaults_to_unknown() {
	let req: axum::extract::Request = HttpRequest::builder().uri("/").body(Body::empty()).unwrap();
	assert_eq!(client_ip_of(&req), "unknown");
}
