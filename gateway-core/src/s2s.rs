//! S2STokenMinter: short-TTL bearer tokens for outbound internal calls
//! (§4.2). Symmetric HS256, verified by every internal service including
//! (in this gateway) the WAL dispatcher and the registry refresher.

use std::collections::HashSet;
use std::time::{SystemTime, UNIX_EPOCH};

use jsonwebtoken::{Algorithm, DecodingKey, EncodingKey, Header, Validation, decode, encode};
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};

use crate::config::S2SConfig;

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct S2SClaims {
	pub sub: String,
	pub iss: String,
	pub aud: String,
	pub iat: i64,
	pub exp: i64,
	pub jti: String,
	pub svc: String,
}

#[derive(Debug, thiserror::Error)]
pub enum S2SError {
	#[error("requested ttl {0}s exceeds max ttl {1}s")]
	TtlTooLarge(u64, u64),
	#[error("token encode failed: {0}")]
	Encode(jsonwebtoken::errors::Error),
	#[error("token invalid or expired: {0}")]
	Invalid(jsonwebtoken::errors::Error),
	#[error("issuer '{0}' is not in the allowlist")]
	UnknownIssuer(String),
	#[error("caller service '{0}' is not in the allowlist")]
	UnknownCaller(String),
}

pub struct MintOpts {
	pub ttl_secs: u64,
	pub caller_slug: String,
}

impl MintOpts {
	pub fn default_for(caller_slug: impl Into<String>) -> MintOpts {
		MintOpts {
			ttl_secs: 0, // resolved to the minter's configured default in `mint`
			caller_slug: caller_slug.into(),
		}
	}
}

#[derive(Clone)]
pub struct S2SMinter {
	encoding_key: std::sync::Arc<EncodingKey>,
	decoding_key: std::sync::Arc<DecodingKey>,
	issuer: String,
	audience: String,
	default_ttl_secs: u64,
	max_ttl_secs: u64,
	self_slug: String,
}

impl S2SMinter {
	pub fn new(cfg: &S2SConfig, self_slug: impl Into<String>) -> Self {
		let secret = secret_bytes(&cfg.secret);
		S2SMinter {
			encoding_key: std::sync::Arc::new(EncodingKey::from_secret(&secret)),
			decoding_key: std::sync::Arc::new(DecodingKey::from_secret(&secret)),
			issuer: cfg.issuer.clone(),
			audience: cfg.audience.clone(),
			default_ttl_secs: cfg.default_ttl_secs,
			max_ttl_secs: cfg.max_ttl_secs,
			self_slug: self_slug.into(),
		}
	}

	pub fn self_slug(&self) -> &str {
		&self.self_slug
	}

	/// Mint a bearer token. `ttl_secs == 0` means "use the configured
	/// default"; any explicit value above `max_ttl_secs` is rejected.
	pub fn mint(&self, opts: MintOpts) -> Result<String, S2SError> {
		let ttl = if opts.ttl_secs == 0 {
			self.default_ttl_secs
		} else {
			opts.ttl_secs
		};
		if ttl > self.max_ttl_secs {
			return Err(S2SError::TtlTooLarge(ttl, self.max_ttl_secs));
		}
		let now = now_secs();
		let claims = S2SClaims {
			sub: "s2s".to_string(),
			iss: self.issuer.clone(),
			aud: self.audience.clone(),
			iat: now,
			exp: now + ttl as i64,
			jti: uuid::Uuid::new_v4().to_string(),
			svc: opts.caller_slug,
		};
		encode(&Header::new(Algorithm::HS256), &claims, &self.encoding_key).map_err(S2SError::Encode)
	}

	/// Verify a token minted by (any instance sharing this secret with) this
	/// minter. Issuer and `svc` are checked against the provided allowlists;
	/// audience must match exactly; `exp` is enforced by `jsonwebtoken`.
	pub fn verify(
		&self,
		token: &str,
		allowed_issuers: &HashSet<String>,
		allowed_callers: &HashSet<String>,
	) -> Result<S2SClaims, S2SError> {
		let mut validation = Validation::new(Algorithm::HS256);
		validation.set_audience(&[self.audience.clone()]);
		let data = decode::<S2SClaims>(token, &self.decoding_key, &validation).map_err(S2SError::Invalid)?;
		let claims = data.claims;
		if !allowed_issuers.is_empty() && !allowed_issuers.contains(&claims.iss) {
			return Err(S2SError::UnknownIssuer(claims.iss));
		}
		if !allowed_callers.is_empty() && !allowed_callers.contains(&claims.svc) {
			return Err(S2SError::UnknownCaller(claims.svc));
		}
		Ok(claims)
	}
}

fn secret_bytes(secret: &SecretString) -> Vec<u8> {
	secret.expose_secret().as_bytes().to_vec()
}

fn now_secs() -> i64 {
	SystemTime::now()
		.duration_since(UNIX_EPOCH)
		.unwrap_or_default()
		.as_secs() as i64
}

#[cfg(test)]
#[path = "s2s_test.rs"]
mod s2s_test;
