//! Per-(slug,version,method,path) `userAssertion` enforcement (§4.4, run
//! post-auth, pre-forward). Reuses [`ServiceConfig::match_rule`] for the
//! same segment-priority matching the mirror already implements; this
//! module only interprets the matched rule's assertion.

use axum::http::Method;

use crate::error::GatewayError;
use crate::guardrails::ClientIdentity;
use crate::mirror::{ServiceConfig, UserAssertion};

/// `rest_path` is the path below the `/api/:slug.V<d>` prefix, i.e. what
/// [`ServiceConfig::match_rule`] is defined against. Absence of a matching
/// rule defaults to `required` (fail closed).
pub fn enforce(service: &ServiceConfig, method: &Method, rest_path: &str, identity: Option<&ClientIdentity>) -> Result<(), GatewayError> {
	let assertion = service
		.match_rule(method.as_str(), rest_path)
		.map(|r| r.user_assertion.clone())
		.unwrap_or(UserAssertion::Required);

	match assertion {
		UserAssertion::Required => {
			if identity.is_some() {
				Ok(())
			} else {
				Err(GatewayError::Unauthenticated)
			}
		},
		UserAssertion::Optional => Ok(()),
		UserAssertion::Forbidden => {
			if identity.is_some() {
				Err(GatewayError::Forbidden)
			} else {
				Ok(())
			}
		},
	}
}

#[cfg(test)]
#[path = "route_policy_test.rs"]
mod route_policy_test;
