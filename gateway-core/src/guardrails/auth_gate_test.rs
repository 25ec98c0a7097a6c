use std::sync::Arc;

use axum::body::Body;
use axum::http::Request as HttpRequest;

use super::*;
use crate::config::ClientAuthConfig;

fn base_config() -> ClientAuthConfig {
	ClientAuthConfig {
		jwks_url: "https://auth.example.test/jwks.json".to_string(),
		issuers: vec!["https://auth.example.test/".to_string()],
		audience: "edge-gateway".to_string(),
		clock_skew_secs: 60,
		bypass: false,
		read_only: false,
		public_prefixes: vec![],
		protected_get_prefixes: vec![],
	}
}

fn req(method: &str, path: &str) -> Request {
	HttpRequest::builder().method(method).uri(path).body(Body::empty()).unwrap()
}

#[test]
fn default_get_route_is_public_without_a_protected_get_prefix() {
	let gate = AuthGate::new(&base_config());
	let mut r = req("GET", "/api/acts.V1/acts/42");
	assert!(gate.check(&mut r).is_ok());
	assert!(r.extensions().get::<ClientIdentity>().is_none());
}

#[test]
fn default_mutating_route_without_jwks_loaded_is_misconfigured() {
	let gate = AuthGate::new(&base_config());
	let mut r = req("POST", "/api/acts.V1/acts");
	assert!(matches!(gate.check(&mut r), Err(GatewayError::AuthMisconfigured)));
}

#[test]
fn protected_get_prefix_without_jwks_loaded_is_misconfigured() {
	let mut cfg = base_config();
	cfg.protected_get_prefixes = vec!["/api/acts.V1".to_string()];
	let gate = AuthGate::new(&cfg);
	let mut r = req("GET", "/api/acts.V1/acts/42");
	assert!(matches!(gate.check(&mut r), Err(GatewayError::AuthMisconfigured)));
}

#[test]
fn public_prefix_without_protected_get_allows_unauthenticated_get() {
	let mut cfg = base_config();
	cfg.public_prefixes = vec!["/health".to_string()];
	let gate = AuthGate::new(&cfg);
	let mut r = req("GET", "/health");
	assert!(gate.check(&mut r).is_ok());
	assert!(r.extensions().get::<ClientIdentity>().is_none());
}

#[test]
fn protected_get_prefix_overrides_public_and_requires_auth() {
	let mut cfg = base_config();
	cfg.public_prefixes = vec!["/api/catalog.V1".to_string()];
	cfg.protected_get_prefixes = vec!["/api/catalog.V1/private".to_string()];
	let gate = AuthGate::new(&cfg);

	let mut open = req("GET", "/api/catalog.V1/items");
	assert!(gate.check(&mut open).is_ok());

	let mut gated = req("GET", "/api/catalog.V1/private/42");
	// No JWKS loaded, so this fails closed rather than being let through.
	assert!(matches!(gate.check(&mut gated), Err(GatewayError::AuthMisconfigured)));
}

#[test]
fn bypass_mode_attaches_synthetic_identity() {
	let mut cfg = base_config();
	cfg.bypass = true;
	let gate = AuthGate::new(&cfg);
	let mut r = req("POST", "/api/acts.V1/acts");
	assert!(gate.check(&mut r).is_ok());
	let identity = r.extensions().get::<ClientIdentity>().expect("identity attached");
	assert_eq!(identity.sub, "bypass");
	assert!(identity.bypassed);
}

#[test]
fn read_only_blocks_mutating_methods_outside_public_prefixes() {
	let mut cfg = base_config();
	cfg.read_only = true;
	cfg.bypass = true; // isolate the read-only check from auth verification
	let gate = AuthGate::new(&cfg);

	let mut mutate = req("POST", "/api/acts.V1/acts");
	assert!(matches!(gate.check(&mut mutate), Err(GatewayError::Forbidden)));

	let mut read = req("GET", "/api/acts.V1/acts/42");
	assert!(gate.check(&mut read).is_ok());
}

#[test]
fn missing_bearer_token_is_unauthenticated_once_keys_are_loaded() {
	let gate = AuthGate::new(&base_config());
	gate.keys.store(Some(Arc::new(HashMap::new())));
	let mut r = req("POST", "/api/acts.V1/acts");
	assert!(matches!(gate.check(&mut r), Err(GatewayError::Unauthenticated)));
}

#[tokio::test]
async fn serve_jwks_is_misconfigured_before_any_fetch() {
	let gate = Arc::new(AuthGate::new(&base_config()));
	let resp = serve_jwks(axum::extract::State(gate)).await;
	assert_eq!(resp.status(), axum::http::StatusCode::SERVICE_UNAVAILABLE);
}

#[tokio::test]
async fn serve_jwks_re_serves_the_last_fetched_document() {
	let gate = Arc::new(AuthGate::new(&base_config()));
	let doc = serde_json::json!({"keys": [{"kid": "k1", "kty": "RSA"}]});
	gate.raw.store(Some(Arc::new(doc.clone())));

	let resp = serve_jwks(axum::extract::State(gate)).await;
	assert_eq!(resp.status(), axum::http::StatusCode::OK);
	let body = axum::body::to_bytes(resp.into_body(), usize::MAX).await.unwrap();
	let got: Value = serde_json::from_slice(&body).unwrap();
	assert_eq!(got, doc);
}
