//! ConfigMirror: the read-mostly, eventually-consistent local replica of the
//! fleet's service registry (§4.1).

pub mod lkg;
pub mod model;

use std::sync::Arc;
use std::time::Duration;

use arc_swap::ArcSwapOption;
use serde::Serialize;

pub use model::{MirrorSnapshot, RegistryResponse, RouteRule, ServiceConfig, UserAssertion};

use crate::config::RegistryConfig;
use crate::s2s::S2SMinter;

#[derive(Clone, Copy, Debug, Serialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum ReadinessSource {
	Cache,
	Lkg,
	Empty,
}

#[derive(Debug, Serialize)]
pub struct Readiness {
	pub ok: bool,
	pub source: ReadinessSource,
	pub version: Option<String>,
	pub age_ms: Option<i64>,
	pub services: Vec<String>,
}

/// Shared, process-wide replica of the service registry. Readers call
/// [`ConfigMirror::snapshot`]/[`ConfigMirror::lookup`]; the refresher task
/// is the sole writer and publishes via an atomic pointer swap so readers
/// never observe a torn snapshot (§5).
pub struct ConfigMirror {
	cfg: RegistryConfig,
	client: reqwest::Client,
	minter: S2SMinter,
	snapshot: ArcSwapOption<MirrorSnapshot>,
	source: std::sync::atomic::AtomicU8,
}

const SRC_EMPTY: u8 = 0;
const SRC_LKG: u8 = 1;
const SRC_CACHE: u8 = 2;

impl ConfigMirror {
	pub fn new(cfg: RegistryConfig, client: reqwest::Client, minter: S2SMinter) -> Arc<Self> {
		Arc::new(ConfigMirror {
			cfg,
			client,
			minter,
			snapshot: ArcSwapOption::empty(),
			source: std::sync::atomic::AtomicU8::new(SRC_EMPTY),
		})
	}

	pub fn snapshot(&self) -> Option<Arc<MirrorSnapshot>> {
		self.snapshot.load_full()
	}

	pub fn lookup(&self, slug: &str) -> Option<ServiceConfig> {
		self.snapshot()?.lookup(slug).cloned()
	}

	pub fn readiness(&self) -> Readiness {
		use std::sync::atomic::Ordering;
		let source = match self.source.load(Ordering::Relaxed) {
			SRC_CACHE => ReadinessSource::Cache,
			SRC_LKG => ReadinessSource::Lkg,
			_ => ReadinessSource::Empty,
		};
		match self.snapshot() {
			Some(snap) => Readiness {
				ok: true,
				source,
				version: Some(snap.version.clone()),
				age_ms: Some(now_ms() - snap.updated_at),
				services: snap.services.keys().cloned().collect(),
			},
			None => Readiness {
				ok: false,
				source: ReadinessSource::Empty,
				version: None,
				age_ms: None,
				services: vec![],
			},
		}
	}

	/// Boot sequence per §4.1: try the network, fall back to LKG, else stay
	/// empty without blocking startup. Spawns the polling safety net and, if
	/// configured, a pubsub subscription that triggers extra refreshes.
	pub async fn start(self: &Arc<Self>, shutdown: tokio_util::sync::CancellationToken) {
		if let Err(e) = self.refresh_once().await {
			tracing::warn!(error = %e, "initial registry refresh failed, falling back to LKG");
			if let Some(snap) = lkg::load(&self.cfg.lkg_path).await {
				self.publish(snap, SRC_LKG);
			}
		}

		let this = self.clone();
		let poll_shutdown = shutdown.clone();
		tokio::spawn(async move {
			this.poll_loop(poll_shutdown).await;
		});

		if let (Some(channel), Some(redis_url)) = (self.cfg.pubsub_channel.clone(), self.cfg.pubsub_redis_url.clone()) {
			let this = self.clone();
			let pubsub_shutdown = shutdown.clone();
			tokio::spawn(async move {
				this.pubsub_loop(channel, redis_url, pubsub_shutdown).await;
			});
		}
	}

	async fn poll_loop(self: Arc<Self>, shutdown: tokio_util::sync::CancellationToken) {
		let mut ticker = tokio::time::interval(self.cfg.poll_interval);
		ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
		loop {
			tokio::select! {
				_ = shutdown.cancelled() => return,
				_ = ticker.tick() => {
					if let Err(e) = self.refresh_once().await {
						tracing::warn!(error = %e, "registry poll refresh failed, keeping current snapshot");
					}
				}
			}
		}
	}

	/// Idempotent: pubsub hints and the poll ticker both funnel into this.
	pub async fn refresh_once(&self) -> anyhow::Result<()> {
		let url = format!("{}{}", self.cfg.base_url, self.cfg.internal_path);
		let token = self
			.minter
			.mint(crate::s2s::MintOpts::default_for(self.minter.self_slug()))?;

		let mut req = self.client.get(&url).bearer_auth(token);
		if let Some(etag) = self.snapshot().map(|s| s.etag.clone()) {
			req = req.header(reqwest::header::IF_NONE_MATCH, etag);
		}

		let resp = req.send().await?;
		if resp.status() == reqwest::StatusCode::NOT_MODIFIED {
			tracing::debug!("registry returned 304, snapshot unchanged");
			return Ok(());
		}
		if !resp.status().is_success() {
			anyhow::bail!("registry refresh returned status {}", resp.status());
		}

		let etag = resp
			.headers()
			.get(reqwest::header::ETAG)
			.and_then(|v| v.to_str().ok())
			.map(str::to_string)
			.unwrap_or_else(|| format!("\"v:{}\"", now_ms()));

		let body: RegistryResponse = resp.json().await?;
		let snapshot = body.into_snapshot(etag);
		lkg::store(&self.cfg.lkg_path, &snapshot).await;
		self.publish(snapshot, SRC_CACHE);
		Ok(())
	}

	fn publish(&self, snapshot: MirrorSnapshot, source: u8) {
		self.source.store(source, std::sync::atomic::Ordering::Relaxed);
		self.snapshot.store(Some(Arc::new(snapshot)));
	}

	/// Subscribes to the registry's invalidation channel and triggers an
	/// extra [`ConfigMirror::refresh_once`] on every message, so a config
	/// push lands well inside the poll interval instead of waiting for the
	/// next tick. Reconnects with a fixed backoff if the connection drops;
	/// the poll loop keeps the mirror fresh in the meantime either way.
	async fn pubsub_loop(self: Arc<Self>, channel: String, redis_url: String, shutdown: tokio_util::sync::CancellationToken) {
		loop {
			let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel::<()>();
			let listen_channel = channel.clone();
			let listen_url = redis_url.clone();
			let listener = tokio::task::spawn_blocking(move || -> anyhow::Result<()> {
				let client = redis::Client::open(listen_url.as_str())?;
				let mut conn = client.get_connection()?;
				let mut pubsub = conn.as_pubsub();
				pubsub.subscribe(&listen_channel)?;
				loop {
					pubsub.get_message()?;
					if tx.send(()).is_err() {
						return Ok(());
					}
				}
			});

			loop {
				tokio::select! {
					_ = shutdown.cancelled() => {
						listener.abort();
						return;
					}
					hint = rx.recv() => {
						match hint {
							Some(()) => {
								if let Err(e) = self.refresh_once().await {
									tracing::warn!(error = %e, "pubsub-triggered registry refresh failed");
								}
							}
							None => break,
						}
					}
				}
			}

			if shutdown.is_cancelled() {
				return;
			}
			tracing::warn!(channel = %channel, "registry pubsub connection lost, reconnecting in 5s");
			tokio::time::sleep(Duration::from_secs(5)).await;
		}
	}
}

fn now_ms() -> i64 {
	chrono::Utc::now().timestamp_millis()
}

#[cfg(test)]
#[path = "mod_test.rs"]
mod mod_test;
