//! Health and readiness surface (§4.6): unversioned liveness/readiness and
//! the per-service health proxy that bypasses `/api` entirely.

use std::sync::Arc;
use std::time::Duration;

use axum::Json;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde::Serialize;

use crate::error::GatewayError;
use crate::mirror::ConfigMirror;

#[derive(Clone)]
pub struct HealthState {
	pub service_name: String,
	pub env: String,
	pub version: &'static str,
	pub mirror: Arc<ConfigMirror>,
	pub http: reqwest::Client,
	/// Slugs that must answer `/health/ready` for `/readyz` to report ok.
	/// Empty means readiness tracks only the config mirror itself.
	pub required_slugs: Vec<String>,
	pub probe_timeout: Duration,
}

#[derive(Serialize)]
struct LivenessBody {
	ok: bool,
	service: String,
	env: String,
	version: &'static str,
}

pub async fn liveness(State(state): State<HealthState>) -> Json<LivenessBody> {
	Json(LivenessBody {
		ok: true,
		service: state.service_name.clone(),
		env: state.env.clone(),
		version: state.version,
	})
}

#[derive(Serialize)]
struct ReadinessBody {
	ok: bool,
	mirror_ready: bool,
	upstreams: Vec<UpstreamReadiness>,
}

#[derive(Serialize)]
struct UpstreamReadiness {
	slug: String,
	ok: bool,
}

/// Fans out to each required slug's `/health/ready` with a short per-probe
/// timeout; ok iff the mirror itself is ready and every probe succeeds.
pub async fn readiness(State(state): State<HealthState>) -> Response {
	let mirror_ready = state.mirror.readiness().ok;

	let mut upstreams = Vec::with_capacity(state.required_slugs.len());
	for slug in &state.required_slugs {
		let ok = probe_ready(&state, slug).await;
		upstreams.push(UpstreamReadiness { slug: slug.clone(), ok });
	}

	let ok = mirror_ready && upstreams.iter().all(|u| u.ok);
	let status = if ok { StatusCode::OK } else { StatusCode::SERVICE_UNAVAILABLE };
	(status, Json(ReadinessBody { ok, mirror_ready, upstreams })).into_response()
}

async fn probe_ready(state: &HealthState, slug: &str) -> bool {
	let Some(service) = state.mirror.lookup(slug) else {
		return false;
	};
	let url = format!("{}{}/ready", service.base_url, service.health_path);
	match tokio::time::timeout(state.probe_timeout, state.http.get(&url).send()).await {
		Ok(Ok(resp)) => resp.status().is_success(),
		_ => false,
	}
}

/// `GET /:slug/health/:kind` — proxies to the resolved service's own
/// health endpoint, bypassing `/api` and the outbound API prefix
/// entirely. Requires neither auth nor audit.
pub async fn proxy(State(state): State<HealthState>, Path((slug, kind)): Path<(String, String)>) -> Response {
	if kind != "live" && kind != "ready" {
		return GatewayError::MalformedRoute(format!("/{slug}/health/{kind}")).into_response();
	}
	let Some(service) = state.mirror.lookup(&slug) else {
		return GatewayError::UnknownOrDisabledService(slug).into_response();
	};
	if !service.expose_health {
		return GatewayError::UnknownOrDisabledService(slug).into_response();
	}

	let url = format!("{}{}/{}", service.base_url, service.health_path, kind);
	match tokio::time::timeout(state.probe_timeout, state.http.get(&url).send()).await {
		Ok(Ok(resp)) => {
			let status = StatusCode::from_u16(resp.status().as_u16()).unwrap_or(StatusCode::BAD_GATEWAY);
			let body = resp.bytes().await.unwrap_or_default();
			(status, body).into_response()
		},
		Ok(Err(e)) => GatewayError::UpstreamConnect(e.to_string()).into_response(),
		Err(_) => GatewayError::UpstreamTimeout.into_response(),
	}
}

#[cfg(test)]
#[path = "health_test.rs"]
mod health_test;
