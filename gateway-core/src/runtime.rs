//! Runtime: the process-wide object graph, assembled once at boot and
//! injected into every handler (§9 design note — no global mutable
//! singletons). Construct everything synchronously, `start()` the
//! background tasks against one shared `CancellationToken`, then hand a
//! finished `axum::Router` to the caller.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;

use crate::audit::{AuditWal, Dispatcher};
use crate::config::AppConfig;
use crate::forwarder::Forwarder;
use crate::guardrails::{AuthGate, CircuitBreaker, GlobalRateLimit, SensitiveLimiter};
use crate::health::HealthState;
use crate::mirror::ConfigMirror;
use crate::pipeline::{self, PipelineState};
use crate::s2s::S2SMinter;
use crate::telemetry::metrics::Metrics;

const JWKS_REFRESH_INTERVAL: Duration = Duration::from_secs(300);

/// Owns every long-lived component and the background tasks that keep them
/// fresh. Dropping a `Runtime` does not stop those tasks; call
/// [`Runtime::serve`] and let it run to completion, or cancel
/// [`Runtime::shutdown_handle`] yourself for a custom host.
pub struct Runtime {
	config: AppConfig,
	app: axum::Router,
	mirror: Arc<ConfigMirror>,
	wal: Arc<AuditWal>,
	shutdown: CancellationToken,
}

impl Runtime {
	/// Construct the full object graph and start its background tasks.
	/// Does not bind a listener; call [`Runtime::serve`] for that.
	pub async fn boot(config: AppConfig) -> anyhow::Result<Self> {
		let shutdown = CancellationToken::new();
		let http = reqwest::Client::builder().build()?;
		let minter = S2SMinter::new(&config.s2s, config.service_name.clone());

		let mirror = ConfigMirror::new(config.registry.clone(), http.clone(), minter.clone());
		mirror.start(shutdown.clone()).await;

		let auth_gate = Arc::new(AuthGate::new(&config.client_auth));
		if let Err(e) = auth_gate.refresh_jwks().await {
			tracing::warn!(error = %e, "initial JWKS fetch failed, auth gate will fail closed until the next refresh");
		}
		spawn_jwks_refresh(auth_gate.clone(), shutdown.clone());

		let forwarder = Arc::new(Forwarder::new(
			http.clone(),
			minter.clone(),
			mirror.clone(),
			config.guardrails.downstream_timeout_ms,
		));

		let health = HealthState {
			service_name: config.service_name.clone(),
			env: config.env.clone(),
			version: env!("CARGO_PKG_VERSION"),
			mirror: mirror.clone(),
			http: http.clone(),
			required_slugs: config.health.required_slugs.clone(),
			probe_timeout: Duration::from_millis(config.health.probe_timeout_ms),
		};

		let breaker = Arc::new(CircuitBreaker::new(
			config.guardrails.breaker_failure_threshold,
			config.guardrails.breaker_halfopen_after_ms,
		));
		let rate_limit = Arc::new(GlobalRateLimit::new(
			config.guardrails.rate_limit_points,
			config.guardrails.rate_limit_window_ms,
		));
		let sensitive_limit = Arc::new(SensitiveLimiter::new(
			&config.sensitive_limiter.redis_url,
			config.sensitive_limiter.prefixes.clone(),
			config.sensitive_limiter.window_ms,
			config.sensitive_limiter.max,
		)?);

		let mut registry = prometheus_client::registry::Registry::default();
		let metrics = Arc::new(Metrics::new(&mut registry));

		let dispatcher = Dispatcher::new(http.clone(), minter.clone(), &config.sink, config.wal.max_retry_ms);
		let wal = AuditWal::new(&config.wal, dispatcher, metrics);
		wal.start(shutdown.clone()).await;

		let app = pipeline::build(PipelineState {
			config: config.clone(),
			auth_gate,
			breaker,
			rate_limit,
			sensitive_limit,
			forwarder,
			health,
			audit: wal.clone(),
		});

		Ok(Runtime {
			config,
			app,
			mirror,
			wal,
			shutdown,
		})
	}

	/// Cancel every background task started by [`Runtime::boot`]. Exposed so
	/// a custom host (e.g. a test harness) can stop them without going
	/// through [`Runtime::serve`]'s signal handling.
	pub fn shutdown_handle(&self) -> CancellationToken {
		self.shutdown.clone()
	}

	pub fn config(&self) -> &AppConfig {
		&self.config
	}

	/// The assembled router, exposed for tests that want to drive it
	/// directly via `tower::ServiceExt::oneshot` instead of binding a port.
	pub fn router(&self) -> axum::Router {
		self.app.clone()
	}

	/// Bind and serve until a Unix signal (SIGINT/SIGTERM) arrives, then
	/// cancel every background task and return.
	pub async fn serve(self) -> anyhow::Result<()> {
		let listener = TcpListener::bind(self.config.bind_addr).await?;
		tracing::info!(addr = %self.config.bind_addr, "gateway listening");

		let app = self
			.app
			.clone()
			.into_make_service_with_connect_info::<SocketAddr>();

		axum::serve(listener, app)
			.with_graceful_shutdown(wait_for_shutdown_signal())
			.await?;

		self.shutdown.cancel();
		tracing::info!("background tasks cancelled, audit WAL draining on next flush tick");
		let _ = self.wal.snapshot().await;
		let _ = self.mirror.readiness();
		Ok(())
	}
}

fn spawn_jwks_refresh(gate: Arc<AuthGate>, shutdown: CancellationToken) {
	tokio::spawn(async move {
		let mut ticker = tokio::time::interval(JWKS_REFRESH_INTERVAL);
		ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
		loop {
			tokio::select! {
				_ = shutdown.cancelled() => return,
				_ = ticker.tick() => {
					if let Err(e) = gate.refresh_jwks().await {
						tracing::warn!(error = %e, "JWKS refresh failed, keeping the previously cached key set");
					}
				}
			}
		}
	});
}

async fn wait_for_shutdown_signal() {
	let ctrl_c = async {
		let _ = tokio::signal::ctrl_c().await;
	};

	#[cfg(unix)]
	let terminate = async {
		let mut sigterm = tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
			.expect("failed to install SIGTERM handler");
		sigterm.recv().await;
	};

	#[cfg(not(unix))]
	let terminate = std::future::pending::<()>();

	tokio::select! {
		_ = ctrl_c => {},
		_ = terminate => {},
	}
}

#[cfg(test)]
#[path = "runtime_test.rs"]
mod runtime_test;
