//! Client auth gate (§4.4): verifies inbound bearer tokens against a remote
//! JWKS, classifies routes as public or protected, and enforces read-only
//! mode. Route classification, bypass mode and read-only enforcement sit
//! on top of the kid-keyed JWKS lookup and decode path, since authenticating
//! a token is only half the job here: the gate must also decide when the
//! absence of one is allowed.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use arc_swap::ArcSwapOption;
use axum::Json;
use axum::extract::{Request, State};
use axum::http::Method;
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};
use jsonwebtoken::jwk::{AlgorithmParameters, JwkSet};
use jsonwebtoken::{Algorithm, DecodingKey, Validation, decode, decode_header};
use serde_json::{Map, Value};

use crate::config::ClientAuthConfig;
use crate::error::GatewayError;

#[derive(Clone)]
struct Jwk {
	decoding: DecodingKey,
	validation: Validation,
}

/// The verified caller identity, attached to request extensions by
/// [`AuthGate::check`] and read back by route policy and the audit writer.
#[derive(Clone, Debug)]
pub struct ClientIdentity {
	pub sub: String,
	pub claims: Map<String, Value>,
	pub bypassed: bool,
}

pub struct AuthGate {
	http: reqwest::Client,
	jwks_url: String,
	issuers: Vec<String>,
	audience: String,
	clock_skew_secs: u64,
	bypass: bool,
	read_only: bool,
	public_prefixes: Vec<String>,
	protected_get_prefixes: Vec<String>,
	keys: ArcSwapOption<HashMap<String, Jwk>>,
	/// The last successfully fetched JWKS, re-served verbatim at `/jwks` so
	/// internal verifiers don't each hit the upstream IdP independently.
	raw: ArcSwapOption<Value>,
}

impl AuthGate {
	pub fn new(cfg: &ClientAuthConfig) -> Self {
		AuthGate {
			http: reqwest::Client::new(),
			jwks_url: cfg.jwks_url.clone(),
			issuers: cfg.issuers.clone(),
			audience: cfg.audience.clone(),
			clock_skew_secs: cfg.clock_skew_secs,
			bypass: cfg.bypass,
			read_only: cfg.read_only,
			public_prefixes: cfg.public_prefixes.clone(),
			protected_get_prefixes: cfg.protected_get_prefixes.clone(),
			keys: ArcSwapOption::empty(),
			raw: ArcSwapOption::empty(),
		}
	}

	/// Fetch and parse the JWKS. Call at boot and on a refresh interval;
	/// `check` fails closed with [`GatewayError::AuthMisconfigured`] until
	/// the first successful fetch populates `keys`.
	pub async fn refresh_jwks(&self) -> anyhow::Result<()> {
		let raw: Value = self
			.http
			.get(&self.jwks_url)
			.timeout(Duration::from_secs(10))
			.send()
			.await?
			.error_for_status()?
			.json()
			.await?;
		let set: JwkSet = serde_json::from_value(raw.clone())?;

		let mut keys = HashMap::new();
		for jwk in set.keys {
			let Some(kid) = jwk.common.key_id.clone() else {
				continue;
			};
			let (decoding, alg) = match &jwk.algorithm {
				AlgorithmParameters::RSA(rsa) => (DecodingKey::from_rsa_components(&rsa.n, &rsa.e)?, Algorithm::RS256),
				AlgorithmParameters::EllipticCurve(ec) => {
					(DecodingKey::from_ec_components(&ec.x, &ec.y)?, Algorithm::ES256)
				},
				other => {
					tracing::warn!(?other, kid, "unsupported jwk algorithm, key ignored");
					continue;
				},
			};
			let mut validation = Validation::new(alg);
			validation.set_audience(&[self.audience.clone()]);
			if !self.issuers.is_empty() {
				validation.set_issuer(&self.issuers);
			}
			validation.leeway = self.clock_skew_secs;
			keys.insert(kid, Jwk { decoding, validation });
		}
		self.keys.store(Some(Arc::new(keys)));
		self.raw.store(Some(Arc::new(raw)));
		Ok(())
	}

	fn is_public(&self, path: &str) -> bool {
		self.public_prefixes.iter().any(|p| path.starts_with(p.as_str()))
	}

	fn is_protected_get(&self, path: &str) -> bool {
		self.protected_get_prefixes.iter().any(|p| path.starts_with(p.as_str()))
	}

	/// GETs are public unless explicitly protected; every other method
	/// requires a verified client token unless the path matches a public
	/// prefix.
	fn requires_auth(&self, method: &Method, path: &str) -> bool {
		if *method == Method::GET {
			return self.is_protected_get(path);
		}
		!self.is_public(path)
	}

	fn is_mutating(method: &Method) -> bool {
		!(*method == Method::GET || *method == Method::HEAD || *method == Method::OPTIONS)
	}

	fn validate(&self, keys: &HashMap<String, Jwk>, token: &str) -> Result<ClientIdentity, GatewayError> {
		let header = decode_header(token).map_err(|_| GatewayError::Unauthenticated)?;
		let kid = header.kid.ok_or(GatewayError::Unauthenticated)?;
		let key = keys.get(&kid).ok_or(GatewayError::Unauthenticated)?;
		let data =
			decode::<Map<String, Value>>(token, &key.decoding, &key.validation).map_err(|_| GatewayError::Unauthenticated)?;
		let sub = match data.claims.get("sub") {
			Some(Value::String(s)) => s.clone(),
			_ => return Err(GatewayError::Unauthenticated),
		};
		Ok(ClientIdentity {
			sub,
			claims: data.claims,
			bypassed: false,
		})
	}

	/// Run the gate for one request: enforce read-only mode, resolve bypass
	/// or route classification, verify the token if one is required, and
	/// attach the resulting [`ClientIdentity`] to the request extensions.
	pub fn check(&self, req: &mut Request) -> Result<(), GatewayError> {
		let method = req.method().clone();
		let path = req.uri().path().to_string();

		if self.read_only && Self::is_mutating(&method) && !self.is_public(&path) {
			return Err(GatewayError::Forbidden);
		}

		if self.bypass {
			req.extensions_mut().insert(ClientIdentity {
				sub: "bypass".to_string(),
				claims: Map::new(),
				bypassed: true,
			});
			return Ok(());
		}

		if !self.requires_auth(&method, &path) {
			return Ok(());
		}

		let keys = self.keys.load();
		let Some(keys) = keys.as_ref() else {
			return Err(GatewayError::AuthMisconfigured);
		};

		let token = req
			.headers()
			.get(axum::http::header::AUTHORIZATION)
			.and_then(|v| v.to_str().ok())
			.and_then(|v| v.strip_prefix("Bearer "))
			.ok_or(GatewayError::Unauthenticated)?;

		let identity = self.validate(keys, token)?;
		req.extensions_mut().insert(identity);
		Ok(())
	}
}

pub async fn middleware(State(gate): State<Arc<AuthGate>>, mut req: Request, next: Next) -> Response {
	let request_id = crate::telemetry::request_id_of(&req);
	match gate.check(&mut req) {
		Ok(()) => next.run(req).await,
		Err(err) => err.respond(&request_id),
	}
}

/// `GET /.well-known/jwks.json` and `GET /jwks` (§6): re-serves the last
/// JWKS this gate fetched, so other internal verifiers can share the
/// gateway's cache instead of each polling the IdP. 503 until the first
/// successful fetch, matching "configuration errors return 503, never 500".
pub async fn serve_jwks(State(gate): State<Arc<AuthGate>>) -> Response {
	match gate.raw.load_full() {
		Some(raw) => Json((*raw).clone()).into_response(),
		None => GatewayError::AuthMisconfigured.into_response(),
	}
}

#[cfg(test)]
#[path = "auth_gate_test.rs"]
mod auth_gate_test;
