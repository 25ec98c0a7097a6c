//! Bounded in-memory ring buffer with drop-oldest overflow (§4.5 WAL state,
//! §8 "WAL resilience"). On-disk NDJSON is the durable copy; this ring is
//! only the flusher's working set.

use std::collections::VecDeque;

use super::event::AuditEvent;

pub struct Ring {
	cap: usize,
	buf: VecDeque<AuditEvent>,
	dropped: u64,
}

impl Ring {
	pub fn new(cap: usize) -> Self {
		Ring {
			cap,
			buf: VecDeque::new(),
			dropped: 0,
		}
	}

	/// Pushes an event, dropping the oldest entry if already at capacity.
	/// Returns `true` if an entry was dropped.
	pub fn push(&mut self, event: AuditEvent) -> bool {
		let dropped = self.buf.len() >= self.cap;
		if dropped {
			self.buf.pop_front();
			self.dropped += 1;
		}
		self.buf.push_back(event);
		dropped
	}

	/// Copies up to `n` events from the head without removing them, so a
	/// retriable dispatch failure leaves the ring untouched.
	pub fn peek_batch(&self, n: usize) -> Vec<AuditEvent> {
		self.buf.iter().take(n).cloned().collect()
	}

	pub fn remove_front(&mut self, n: usize) {
		let n = n.min(self.buf.len());
		self.buf.drain(..n);
	}

	pub fn len(&self) -> usize {
		self.buf.len()
	}

	pub fn is_empty(&self) -> bool {
		self.buf.is_empty()
	}

	pub fn dropped(&self) -> u64 {
		self.dropped
	}
}

#[cfg(test)]
#[path = "ring_test.rs"]
mod ring_test;
