//! Computed targeted and persistent identifiers.

use base64::{engine::general_purpose::STANDARD as BASE64, Engine};
use sha1::{Digest, Sha1};

/// Deterministic identifier hashing.
///
/// Same inputs must always give the same identifiers; the simulator caches
/// the persistent ID on that assumption.
pub trait IdentifierHasher: Send + Sync {
    /// Targeted ID for a user at an SP, scoped to the IdP.
    fn targeted_id(&self, user_id: &str, sp_id: &str, idp_scope: &str, salt: &[u8]) -> String;

    /// Persistent ID (SAML 2 persistent NameID, string form) for a user at an SP.
    fn persistent_id(&self, user_id: &str, sp_id: &str, idp_id: &str, salt: &[u8]) -> String;
}

/// Shibboleth-style computed IDs: base64(SHA-1(sp ! user ! salt)).
#[derive(Debug, Clone, Copy, Default)]
pub struct ComputedIdHasher;

impl ComputedIdHasher {
    fn opaque(user_id: &str, sp_id: &str, salt: &[u8]) -> String {
        let mut hasher = Sha1::new();
        hasher.update(sp_id.as_bytes());
        hasher.update(b"!");
        hasher.update(user_id.as_bytes());
        hasher.update(b"!");
        hasher.update(salt);
        BASE64.encode(hasher.finalize())
    }
}

impl IdentifierHasher for ComputedIdHasher {
    fn targeted_id(&self, user_id: &str, sp_id: &str, idp_scope: &str, salt: &[u8]) -> String {
        format!("{}@{}", Self::opaque(user_id, sp_id, salt), idp_scope)
    }

    fn persistent_id(&self, user_id: &str, sp_id: &str, idp_id: &str, salt: &[u8]) -> String {
        format!("{}!{}!{}", idp_id, sp_id, Self::opaque(user_id, sp_id, salt))
    }
}

/// Salt for an organisation: SHA-1 digest of its name.
pub fn organisation_salt(organisation: &str) -> [u8; 20] {
    let digest = Sha1::digest(organisation.as_bytes());
    let mut salt = [0u8; 20];
    salt.copy_from_slice(&digest);
    salt
}
