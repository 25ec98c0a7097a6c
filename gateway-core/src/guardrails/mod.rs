//! The ordered chain of request-path guardrails (§4.4). Each guardrail is an
//! `axum::middleware::from_fn_with_state` stage; none of them throw — a
//! denial is always a typed [`crate::GatewayError`] turned into a response
//! immediately, matching the "no exception-style control flow" design note.

pub mod auth_gate;
pub mod breaker;
pub mod https_redirect;
pub mod rate_limit;
pub mod sensitive_limit;
pub mod timeout;

pub use auth_gate::{AuthGate, ClientIdentity};
pub use breaker::CircuitBreaker;
pub use rate_limit::GlobalRateLimit;
pub use sensitive_limit::SensitiveLimiter;
