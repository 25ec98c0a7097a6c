//! Durable audit journal: NDJSON-per-day files, a bounded in-memory ring for
//! the flusher's working set, and a persisted dispatch cursor (§4.5).

use std::collections::VecDeque;
use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;

use chrono::{NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use tokio::fs::OpenOptions;
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;

use crate::config::WalConfig;
use crate::telemetry::metrics::{Metrics, WalFlushLabels};

use super::dispatcher::{DispatchOutcome, Dispatcher};
use super::event::AuditEvent;
use super::ring::Ring;

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq, Default)]
struct Cursor {
	file: String,
	byte_offset: u64,
}

#[derive(Clone, Debug)]
struct FilePos {
	file: String,
	end_offset: u64,
}

/// Mirrors pushes/removals onto the ring so every in-memory event carries
/// the on-disk position its cursor should advance to once dispatched.
struct WalState {
	ring: Ring,
	offsets: VecDeque<FilePos>,
}

impl WalState {
	fn push(&mut self, event: AuditEvent, pos: FilePos) {
		if self.ring.push(event) {
			self.offsets.pop_front();
		}
		self.offsets.push_back(pos);
	}

	fn peek_batch(&self, n: usize) -> (Vec<AuditEvent>, Option<FilePos>) {
		let events = self.ring.peek_batch(n);
		let pos = match events.len() {
			0 => None,
			len => self.offsets.get(len - 1).cloned(),
		};
		(events, pos)
	}

	fn remove_front(&mut self, n: usize) {
		self.ring.remove_front(n);
		let n = n.min(self.offsets.len());
		self.offsets.drain(..n);
	}
}

struct WriterState {
	file: Option<tokio::fs::File>,
	name: Option<String>,
	size: u64,
	day: Option<NaiveDate>,
}

#[derive(Debug, PartialEq, Eq)]
pub enum FlushOutcome {
	Empty,
	AlreadyFlushing,
	Sent(usize),
	Dropped(usize),
	Retrying { backoff_ms: u64 },
}

#[derive(Serialize)]
pub struct WalSnapshot {
	pub dir: String,
	pub current_file: Option<String>,
	pub ring_size: usize,
	pub flush_ms: u64,
	pub batch_size: usize,
	pub cursor_file: String,
	pub cursor_byte_offset: u64,
	pub sending: bool,
	pub attempt: u32,
}

/// Reliable, batched, at-least-once audit pipeline (§4.5). `enqueue` never
/// blocks on the sink; `flush_once` is single-flight and classifies
/// dispatch failures into retriable vs. poison.
pub struct AuditWal {
	dir: PathBuf,
	file_max_bytes: u64,
	retention_days: i64,
	batch_size: usize,
	flush_ms: u64,
	dispatcher: Dispatcher,
	metrics: Arc<Metrics>,
	state: Mutex<WalState>,
	writer: Mutex<WriterState>,
	cursor: Mutex<Cursor>,
	flushing: Mutex<()>,
	attempt: AtomicU32,
}

impl AuditWal {
	pub fn new(cfg: &WalConfig, dispatcher: Dispatcher, metrics: Arc<Metrics>) -> Arc<Self> {
		Arc::new(AuditWal {
			dir: cfg.dir.clone(),
			file_max_bytes: cfg.file_max_mb.saturating_mul(1024 * 1024),
			retention_days: cfg.retention_days as i64,
			batch_size: cfg.batch_size,
			flush_ms: cfg.flush_ms,
			dispatcher,
			metrics,
			state: Mutex::new(WalState {
				ring: Ring::new(cfg.ring_max_events),
				offsets: VecDeque::new(),
			}),
			writer: Mutex::new(WriterState {
				file: None,
				name: None,
				size: 0,
				day: None,
			}),
			cursor: Mutex::new(Cursor::default()),
			flushing: Mutex::new(()),
			attempt: AtomicU32::new(0),
		})
	}

	fn cursor_path(&self) -> PathBuf {
		self.dir.join("audit.offset")
	}

	/// Boot sequence: create the WAL directory, load the persisted cursor,
	/// replay anything left un-dispatched from a prior crash, then start the
	/// periodic flusher.
	pub async fn start(self: &Arc<Self>, shutdown: CancellationToken) {
		if let Err(e) = tokio::fs::create_dir_all(&self.dir).await {
			tracing::warn!(error = %e, "failed to create audit WAL directory");
		}
		self.load_cursor().await;
		self.clone().replay_from_cursor().await;

		let this = self.clone();
		tokio::spawn(async move { this.flush_loop(shutdown).await });
	}

	async fn load_cursor(&self) {
		if let Ok(bytes) = tokio::fs::read(self.cursor_path()).await {
			match serde_json::from_slice::<Cursor>(&bytes) {
				Ok(c) => *self.cursor.lock().await = c,
				Err(e) => tracing::warn!(error = %e, "malformed audit cursor file, starting from empty"),
			}
		}
	}

	async fn persist_cursor(&self, cursor: &Cursor) {
		let Ok(bytes) = serde_json::to_vec(cursor) else {
			return;
		};
		let tmp = self.dir.join("audit.offset.tmp");
		if let Err(e) = tokio::fs::write(&tmp, &bytes).await {
			tracing::warn!(error = %e, "failed to write audit cursor temp file");
			return;
		}
		if let Err(e) = tokio::fs::rename(&tmp, self.cursor_path()).await {
			tracing::warn!(error = %e, "failed to publish audit cursor file");
		}
	}

	/// Re-reads NDJSON lines forward from the persisted cursor in
	/// `batch_size` chunks and re-dispatches them, advancing the cursor the
	/// same way a live flush would (§4.5 "On boot, replay from cursor"). A
	/// retriable dispatch failure schedules a backoff-delayed re-entry of
	/// this same function rather than giving up: the ring is empty right
	/// after a crash, so the periodic flusher has nothing to retry with
	/// unless this loop keeps driving the backlog itself.
	async fn replay_from_cursor(self: Arc<Self>) {
		let cursor = self.cursor.lock().await.clone();
		if cursor.file.is_empty() {
			return;
		}
		let path = self.dir.join(&cursor.file);
		let Ok(bytes) = tokio::fs::read(&path).await else {
			return;
		};
		if (bytes.len() as u64) <= cursor.byte_offset {
			return;
		}

		let mut offset = cursor.byte_offset;
		let mut remaining = &bytes[cursor.byte_offset as usize..];
		loop {
			let mut batch = Vec::new();
			let mut batch_end = offset;
			while batch.len() < self.batch_size {
				let Some(nl) = remaining.iter().position(|&b| b == b'\n') else {
					break;
				};
				if let Ok(event) = serde_json::from_slice::<AuditEvent>(&remaining[..nl]) {
					batch.push(event);
				}
				batch_end += (nl + 1) as u64;
				remaining = &remaining[nl + 1..];
			}
			if batch.is_empty() {
				return;
			}
			match self.dispatcher.send(&batch).await {
				DispatchOutcome::Ok | DispatchOutcome::NonRetriable(_) => {
					offset = batch_end;
					let cursor = Cursor {
						file: cursor.file.clone(),
						byte_offset: offset,
					};
					self.persist_cursor(&cursor).await;
					*self.cursor.lock().await = cursor;
					self.attempt.store(0, Ordering::Relaxed);
				},
				DispatchOutcome::Retriable(reason) => {
					let attempt = self.attempt.fetch_add(1, Ordering::Relaxed);
					let backoff = self.dispatcher.next_backoff_ms(attempt);
					tracing::warn!(reason = %reason, backoff_ms = backoff, "audit replay batch failed, retrying");
					let this = self.clone();
					tokio::spawn(async move {
						tokio::time::sleep(Duration::from_millis(backoff)).await;
						this.replay_from_cursor().await;
					});
					return;
				},
			}
		}
	}

	async fn flush_loop(self: Arc<Self>, shutdown: CancellationToken) {
		let mut ticker = tokio::time::interval(Duration::from_millis(self.flush_ms.max(1)));
		ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
		loop {
			tokio::select! {
				_ = shutdown.cancelled() => return,
				_ = ticker.tick() => {
					self.flush_once("ticker").await;
				}
			}
		}
	}

	/// Appends one NDJSON line to the current file and pushes the event into
	/// the ring, triggering an async flush once the ring reaches
	/// `batch_size`. Never blocks on the sink and never surfaces an error to
	/// the request path; a write failure is logged and the event still
	/// lives in the ring for a best-effort dispatch.
	pub async fn enqueue(self: &Arc<Self>, event: AuditEvent) {
		let Ok(line) = event.to_ndjson_line() else {
			tracing::warn!("failed to serialize audit event, dropping");
			return;
		};

		let pos = match self.append_line(&line).await {
			Ok(pos) => pos,
			Err(e) => {
				tracing::warn!(error = %e, "audit WAL append failed, event kept in ring only");
				FilePos {
					file: String::new(),
					end_offset: 0,
				}
			},
		};

		let (len, dropped) = {
			let mut state = self.state.lock().await;
			let before = state.ring.dropped();
			state.push(event, pos);
			(state.ring.len(), state.ring.dropped() > before)
		};
		if dropped {
			tracing::warn!("audit ring buffer full, dropped oldest in-memory event");
		}
		if len >= self.batch_size {
			let this = self.clone();
			tokio::spawn(async move {
				this.flush_once("ring_full").await;
			});
		}
	}

	async fn append_line(&self, line: &str) -> std::io::Result<FilePos> {
		let mut writer = self.writer.lock().await;
		let today = Utc::now().date_naive();
		let needs_rotation = writer.day != Some(today) || writer.size >= self.file_max_bytes || writer.file.is_none();
		if needs_rotation {
			if let Some(file) = writer.file.as_mut() {
				let _ = file.sync_all().await;
			}
			let name = format!("audit-{}.ndjson", today.format("%Y%m%d"));
			let path = self.dir.join(&name);
			let file = OpenOptions::new().create(true).append(true).open(&path).await?;
			let size = file.metadata().await.map(|m| m.len()).unwrap_or(0);
			writer.file = Some(file);
			writer.name = Some(name);
			writer.size = size;
			writer.day = Some(today);
			self.prune_old_files().await;
		}

		let mut bytes = line.as_bytes().to_vec();
		bytes.push(b'\n');
		let file = writer.file.as_mut().expect("rotation guarantees a file");
		file.write_all(&bytes).await?;
		writer.size += bytes.len() as u64;

		Ok(FilePos {
			file: writer.name.clone().unwrap_or_default(),
			end_offset: writer.size,
		})
	}

	/// Deletes files whose embedded date is older than `retention_days`.
	/// Run at rotation boundaries rather than on its own timer.
	async fn prune_old_files(&self) {
		let Ok(mut entries) = tokio::fs::read_dir(&self.dir).await else {
			return;
		};
		let cutoff = Utc::now().date_naive() - chrono::Duration::days(self.retention_days);
		while let Ok(Some(entry)) = entries.next_entry().await {
			let name = entry.file_name();
			let Some(name) = name.to_str() else { continue };
			let Some(date_str) = name.strip_prefix("audit-").and_then(|s| s.strip_suffix(".ndjson")) else {
				continue;
			};
			let Ok(date) = NaiveDate::parse_from_str(date_str, "%Y%m%d") else {
				continue;
			};
			if date < cutoff {
				let _ = tokio::fs::remove_file(entry.path()).await;
			}
		}
	}

	/// At most one concurrent flush (enforced by `flushing`). Takes up to
	/// `batch_size` events from the ring head without removing them; on a
	/// successful or non-retriable send they're dropped and the cursor
	/// advances, on a retriable failure the ring is left untouched and a
	/// backoff-delayed retry of this same window is scheduled.
	pub async fn flush_once(self: &Arc<Self>, reason: &str) -> FlushOutcome {
		let Ok(_guard) = self.flushing.try_lock() else {
			return FlushOutcome::AlreadyFlushing;
		};

		let (batch, pos) = {
			let state = self.state.lock().await;
			state.peek_batch(self.batch_size)
		};
		if batch.is_empty() {
			return FlushOutcome::Empty;
		}

		tracing::debug!(reason, batch_len = batch.len(), "flushing audit batch");
		match self.dispatcher.send(&batch).await {
			DispatchOutcome::Ok => {
				let n = batch.len();
				{
					let mut state = self.state.lock().await;
					state.remove_front(n);
				}
				self.advance_cursor(pos).await;
				self.attempt.store(0, Ordering::Relaxed);
				self.record("ok");
				FlushOutcome::Sent(n)
			},
			DispatchOutcome::NonRetriable(why) => {
				let n = batch.len();
				{
					let mut state = self.state.lock().await;
					state.remove_front(n);
				}
				self.advance_cursor(pos).await;
				self.attempt.store(0, Ordering::Relaxed);
				tracing::warn!(reason = %why, dropped = n, "audit batch rejected by sink, advancing past it");
				self.record("dropped");
				FlushOutcome::Dropped(n)
			},
			DispatchOutcome::Retriable(why) => {
				let attempt = self.attempt.fetch_add(1, Ordering::Relaxed);
				let backoff = self.dispatcher.next_backoff_ms(attempt);
				tracing::warn!(reason = %why, backoff_ms = backoff, "audit dispatch failed, will retry");
				self.record("retry");
				let this = self.clone();
				tokio::spawn(async move {
					tokio::time::sleep(Duration::from_millis(backoff)).await;
					this.flush_once("retry").await;
				});
				FlushOutcome::Retrying { backoff_ms: backoff }
			},
		}
	}

	async fn advance_cursor(&self, pos: Option<FilePos>) {
		let Some(pos) = pos else {
			return;
		};
		if pos.file.is_empty() {
			return;
		}
		let cursor = Cursor {
			file: pos.file,
			byte_offset: pos.end_offset,
		};
		self.persist_cursor(&cursor).await;
		*self.cursor.lock().await = cursor;
	}

	fn record(&self, outcome: &str) {
		self.metrics
			.wal_flushes
			.get_or_create(&WalFlushLabels {
				outcome: outcome.to_string(),
			})
			.inc();
	}

	pub async fn snapshot(&self) -> WalSnapshot {
		let state = self.state.lock().await;
		let writer = self.writer.lock().await;
		let cursor = self.cursor.lock().await.clone();
		WalSnapshot {
			dir: self.dir.display().to_string(),
			current_file: writer.name.clone(),
			ring_size: state.ring.len(),
			flush_ms: self.flush_ms,
			batch_size: self.batch_size,
			cursor_file: cursor.file,
			cursor_byte_offset: cursor.byte_offset,
			sending: self.flushing.try_lock().is_err(),
			attempt: self.attempt.load(Ordering::Relaxed),
		}
	}
}

#[cfg(test)]
#[path = "wal_test.rs"]
mod wal_test;
