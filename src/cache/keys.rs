//! Cache key definitions.
//!
//! A cached response is addressed by the normalized request that produced
//! it: the actor role plus the filter/sort parameters, hashed order-stably.

use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};

/// Who is asking. Privileged callers bypass the shared response cache so
/// partial or internal views never land in a shared payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ActorRole {
    Public,
    Privileged,
}

impl ActorRole {
    pub fn as_str(self) -> &'static str {
        match self {
            ActorRole::Public => "public",
            ActorRole::Privileged => "privileged",
        }
    }
}

/// Identifies one cacheable response.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct RequestKey {
    pub role: ActorRole,
    pub path: String,
    pub params_hash: u64,
}

impl RequestKey {
    pub fn new(role: ActorRole, path: impl Into<String>, params: &[(String, String)]) -> Self {
        Self {
            role,
            path: path.into(),
            params_hash: hash_params(params),
        }
    }
}

/// Compute a hash for any hashable value.
pub fn hash_value<T: Hash>(value: &T) -> u64 {
    let mut hasher = DefaultHasher::new();
    value.hash(&mut hasher);
    hasher.finish()
}

/// Hash filter/sort parameters order-stably: pairs are sorted before
/// hashing so `?a=1&b=2` and `?b=2&a=1` address the same entry.
pub fn hash_params(params: &[(String, String)]) -> u64 {
    let mut sorted: Vec<&(String, String)> = params.iter().collect();
    sorted.sort();
    let mut hasher = DefaultHasher::new();
    for (name, value) in sorted {
        name.hash(&mut hasher);
        value.hash(&mut hasher);
    }
    hasher.finish()
}

/// The externally visible fingerprint of a request, used as the key under
/// the reserved `hashes` ledger dimension and as the asset-name
/// discriminator for CDN-level caches.
pub fn request_fingerprint(key: &RequestKey) -> String {
    let mut hasher = DefaultHasher::new();
    key.role.as_str().hash(&mut hasher);
    key.path.hash(&mut hasher);
    key.params_hash.hash(&mut hasher);
    format!("{:016x}", hasher.finish())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn params(pairs: &[(&str, &str)]) -> Vec<(String, String)> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn parameter_order_does_not_matter() {
        let a = hash_params(&params(&[("sort", "price"), ("tag", "sale")]));
        let b = hash_params(&params(&[("tag", "sale"), ("sort", "price")]));
        assert_eq!(a, b);
    }

    #[test]
    fn different_parameters_produce_different_hashes() {
        let a = hash_params(&params(&[("tag", "sale")]));
        let b = hash_params(&params(&[("tag", "new")]));
        assert_ne!(a, b);
    }

    #[test]
    fn role_participates_in_the_fingerprint() {
        let public = RequestKey::new(ActorRole::Public, "/api/v1/fingerprints", &[]);
        let privileged = RequestKey::new(ActorRole::Privileged, "/api/v1/fingerprints", &[]);
        assert_ne!(request_fingerprint(&public), request_fingerprint(&privileged));
    }

    #[test]
    fn fingerprint_is_stable() {
        let key = RequestKey::new(
            ActorRole::Public,
            "/api/v1/fingerprints",
            &params(&[("tag", "sale")]),
        );
        assert_eq!(request_fingerprint(&key), request_fingerprint(&key.clone()));
    }
}
