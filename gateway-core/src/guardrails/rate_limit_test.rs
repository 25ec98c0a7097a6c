use super::*;

#[test]
fn allows_up_to_points_then_denies_within_window() {
	let rl = GlobalRateLimit::new(3, 1000);
	let t0 = 0;
	for _ in 0..3 {
		let d = rl.check("1.2.3.4", "GET", "/x", t0);
		assert!(d.allowed);
	}
	let d = rl.check("1.2.3.4", "GET", "/x", t0 + 10);
	assert!(!d.allowed);
	assert!(d.retry_after_secs >= 1);
}

#[test]
fn resets_after_window_elapses() {
	let rl = GlobalRateLimit::new(1, 1000);
	assert!(rl.check("1.2.3.4", "GET", "/x", 0).allowed);
	assert!(!rl.check("1.2.3.4", "GET", "/x", 500).allowed);
	assert!(rl.check("1.2.3.4", "GET", "/x", 1001).allowed);
}

#[test]
fn buckets_are_independent_per_ip_method_path() {
	let rl = GlobalRateLimit::new(1, 1000);
	assert!(rl.check("1.2.3.4", "GET", "/x", 0).allowed);
	assert!(rl.check("5.6.7.8", "GET", "/x", 0).allowed);
	assert!(rl.check("1.2.3.4", "POST", "/x", 0).allowed);
	assert!(rl.check("1.2.3.4", "GET", "/y", 0).allowed);
}
