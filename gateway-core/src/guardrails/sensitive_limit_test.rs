use super::*;

fn limiter() -> SensitiveLimiter {
	SensitiveLimiter::new(
		"redis://127.0.0.1:6399", // deliberately unreachable in unit tests
		vec!["/api/payments".to_string(), "/api/admin".to_string()],
		1000,
		5,
	)
	.unwrap()
}

#[test]
fn in_scope_matches_configured_prefixes_only() {
	let l = limiter();
	assert!(l.in_scope("/api/payments/charge"));
	assert!(l.in_scope("/api/admin/users"));
	assert!(!l.in_scope("/api/acts/42"));
}

#[tokio::test]
async fn out_of_scope_path_is_allowed_without_touching_the_store() {
	let l = limiter();
	let d = l.check("1.2.3.4", "/api/acts/42").await;
	assert!(!d.in_scope);
	assert!(d.allowed);
}

#[tokio::test]
async fn store_failure_fails_open() {
	let l = limiter();
	// The pool points at an unreachable address, so the INCR call errors
	// and the limiter must fail open rather than deny traffic.
	let d = l.check("1.2.3.4", "/api/payments/charge").await;
	assert!(d.in_scope);
	assert!(d.allowed);
}
