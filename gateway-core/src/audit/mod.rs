//! AuditWAL: durable, batched, at-least-once audit pipeline (§4.5).

pub mod capture;
pub mod dispatcher;
pub mod event;
pub mod ring;
pub mod wal;

pub use capture::capture;
pub use dispatcher::{DispatchOutcome, Dispatcher};
pub use event::{AuditEvent, Phase};
pub use wal::{AuditWal, FlushOutcome, WalSnapshot};
