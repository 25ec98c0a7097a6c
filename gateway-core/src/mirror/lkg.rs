//! Last-known-good on-disk fallback for the service registry mirror.

use std::path::Path;

use serde::{Deserialize, Serialize};

use super::model::MirrorSnapshot;

#[derive(Serialize, Deserialize)]
struct LkgFile {
	v: u32,
	snapshot: MirrorSnapshot,
}

pub async fn load(path: &Path) -> Option<MirrorSnapshot> {
	let bytes = tokio::fs::read(path).await.ok()?;
	match serde_json::from_slice::<LkgFile>(&bytes) {
		Ok(f) if f.v == 1 => Some(f.snapshot),
		Ok(f) => {
			tracing::warn!(version = f.v, "unsupported LKG file version, ignoring");
			None
		},
		Err(e) => {
			tracing::warn!(error = %e, "malformed LKG file, ignoring");
			None
		},
	}
}

/// Best-effort write: failures are logged, never propagated, since losing
/// the LKG file does not affect the live snapshot already in memory.
pub async fn store(path: &Path, snapshot: &MirrorSnapshot) {
	let file = LkgFile {
		v: 1,
		snapshot: snapshot.clone(),
	};
	let Ok(bytes) = serde_json::to_vec(&file) else {
		tracing::warn!("failed to serialize snapshot for LKG write");
		return;
	};
	if let Some(parent) = path.parent() {
		if let Err(e) = tokio::fs::create_dir_all(parent).await {
			tracing::warn!(error = %e, "failed to create LKG directory");
			return;
		}
	}
	let tmp = path.with_extension("tmp");
	if let Err(e) = tokio::fs::write(&tmp, &bytes).await {
		tracing::warn!(error = %e, "failed to write LKG temp file");
		return;
	}
	if let Err(e) = tokio::fs::rename(&tmp, path).await {
		tracing::warn!(error = %e, "failed to publish LKG file");
	}
}

#[cfg(test)]
#[path = "lkg_test.rs"]
mod lkg_test;
