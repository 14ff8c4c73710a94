//! Stable cache keys derived from request params.

use serde::Serialize;
use sha2::{Digest, Sha256};

/// Hash `params` into a key of the form `<namespace>:<sha256 hex>`.
///
/// Params are serialized as JSON first, so two values that serialize
/// identically share a key.
pub fn hashed_key<P: Serialize + ?Sized>(
    namespace: &str,
    params: &P,
) -> Result<String, serde_json::Error> {
    let encoded = serde_json::to_vec(params)?;
    let mut hasher = Sha256::new();
    hasher.update(namespace.as_bytes());
    hasher.update([0u8]);
    hasher.update(&encoded);
    Ok(format!("{namespace}:{}", hex::encode(hasher.finalize())))
}
