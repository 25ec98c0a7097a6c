use wiremock::matchers::{header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use super::*;
use crate::config::S2SConfig;

fn minter() -> S2SMinter {
	let cfg = S2SConfig {
		secret: secrecy::SecretString::new("test-secret".into()),
		issuer: "edge-gateway".to_string(),
		audience: "internal-services".to_string(),
		default_ttl_secs: 300,
		max_ttl_secs: 900,
	};
	S2SMinter::new(&cfg, "edge-gateway")
}

fn registry_cfg(base_url: String, lkg_path: std::path::PathBuf) -> RegistryConfig {
	RegistryConfig {
		base_url,
		internal_path: "/internal/services".to_string(),
		poll_interval: Duration::from_secs(3600),
		pubsub_channel: None,
		pubsub_redis_url: None,
		lkg_path,
	}
}

fn registry_body() -> serde_json::Value {
	serde_json::json!({
		"version": "v1",
		"updatedAt": 1000,
		"services": {
			"act": {
				"slug": "act",
				"version": 1,
				"enabled": true,
				"allowProxy": true,
				"baseUrl": "http://act:4002",
			}
		}
	})
}

#[tokio::test]
async fn refresh_populates_snapshot_from_2xx() {
	let server = MockServer::start().await;
	Mock::given(method("GET"))
		.and(path("/internal/services"))
		.respond_with(
			ResponseTemplate::new(200)
				.insert_header("etag", "\"v:v1\"")
				.set_body_json(registry_body()),
		)
		.mount(&server)
		.await;

	let dir = tempfile::tempdir().unwrap();
	let cfg = registry_cfg(server.uri(), dir.path().join("lkg.json"));
	let mirror = ConfigMirror::new(cfg, reqwest::Client::new(), minter());

	mirror.refresh_once().await.expect("refresh should succeed");
	let snap = mirror.snapshot().expect("snapshot should be populated");
	assert_eq!(snap.version, "v1");
	assert!(mirror.lookup("act").is_some());
	assert!(mirror.lookup("ACT").is_some(), "lookup should lowercase");
}

#[tokio::test]
async fn not_modified_keeps_existing_snapshot() {
	let server = MockServer::start().await;
	Mock::given(method("GET"))
		.and(path("/internal/services"))
		.respond_with(
			ResponseTemplate::new(200)
				.insert_header("etag", "\"v:v1\"")
				.set_body_json(registry_body()),
		)
		.up_to_n_times(1)
		.mount(&server)
		.await;
	Mock::given(method("GET"))
		.and(path("/internal/services"))
		.and(header("if-none-match", "\"v:v1\""))
		.respond_with(ResponseTemplate::new(304))
		.mount(&server)
		.await;

	let dir = tempfile::tempdir().unwrap();
	let cfg = registry_cfg(server.uri(), dir.path().join("lkg.json"));
	let mirror = ConfigMirror::new(cfg, reqwest::Client::new(), minter());

	mirror.refresh_once().await.unwrap();
	let first = mirror.snapshot().unwrap();
	mirror.refresh_once().await.unwrap();
	let second = mirror.snapshot().unwrap();
	assert_eq!(first.updated_at, second.updated_at);
}

#[tokio::test]
async fn failed_refresh_falls_back_to_lkg_without_blocking_start() {
	let server = MockServer::start().await;
	Mock::given(method("GET"))
		.and(path("/internal/services"))
		.respond_with(ResponseTemplate::new(500))
		.mount(&server)
		.await;

	let dir = tempfile::tempdir().unwrap();
	let lkg_path = dir.path().join("lkg.json");
	let snap = MirrorSnapshot {
		version: "lkg-v1".to_string(),
		updated_at: 42,
		services: std::collections::HashMap::new(),
		etag: "\"v:lkg-v1\"".to_string(),
	};
	lkg::store(&lkg_path, &snap).await;

	let cfg = registry_cfg(server.uri(), lkg_path);
	let mirror = ConfigMirror::new(cfg, reqwest::Client::new(), minter());
	let shutdown = tokio_util::sync::CancellationToken::new();
	mirror.start(shutdown.clone()).await;

	let readiness = mirror.readiness();
	assert!(readiness.ok);
	assert_eq!(readiness.source, ReadinessSource::Lkg);
	assert_eq!(readiness.version.as_deref(), Some("lkg-v1"));
	shutdown.cancel();
}

#[test]
fn readiness_reports_empty_when_no_snapshot() {
	let dir_path = std::path::PathBuf::from("/nonexistent/lkg.json");
	let cfg = registry_cfg("http://unused.invalid".to_string(), dir_path);
	let mirror = ConfigMirror::new(cfg, reqwest::Client::new(), minter());
	let readiness = mirror.readiness();
	assert!(!readiness.ok);
	assert_eq!(readiness.source, ReadinessSource::Empty);
}

#[tokio::test]
async fn start_with_an_unreachable_pubsub_redis_does_not_block_boot() {
	let server = MockServer::start().await;
	Mock::given(method("GET"))
		.and(path("/internal/services"))
		.respond_with(ResponseTemplate::new(500))
		.mount(&server)
		.await;

	let dir = tempfile::tempdir().unwrap();
	let mut cfg = registry_cfg(server.uri(), dir.path().join("lkg.json"));
	cfg.pubsub_channel = Some("registry-invalidate".to_string());
	cfg.pubsub_redis_url = Some("redis://127.0.0.1:6399".to_string()); // deliberately unreachable

	let mirror = ConfigMirror::new(cfg, reqwest::Client::new(), minter());
	let shutdown = tokio_util::sync::CancellationToken::new();

	// start() must return promptly even though the pubsub thread is stuck
	// dialing an unreachable Redis; the poll loop still keeps the mirror
	// alive in the meantime.
	tokio::time::timeout(Duration::from_secs(5), mirror.start(shutdown.clone()))
		.await
		.expect("start should not block on a dead pubsub connection");

	shutdown.cancel();
}
