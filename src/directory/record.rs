//! Identity records loaded from the user fixtures.

use std::collections::BTreeMap;
use std::sync::OnceLock;

/// Length of the per-organisation salt (SHA-1 digest).
pub const SALT_LEN: usize = 20;

/// A test user as the simulated IdP knows it.
///
/// Everything except the persistent ID cache is fixed at load time. The
/// cache is write-once: the first computed value wins and every later
/// request for the same user sees it.
#[derive(Debug)]
pub struct IdentityRecord {
    /// Canonical user ID (integer fixture IDs are stringified).
    pub id: String,

    /// Fixture label the record was loaded under.
    pub label: String,

    /// Organisation name, also the chooser grouping.
    pub organisation: String,

    /// Entity ID of the IdP this user authenticates at.
    pub idp_id: String,

    /// Scope of the IdP (used for scoped identifiers).
    pub idp_scope: String,

    /// Free-form attributes, header name -> value.
    pub attributes: BTreeMap<String, String>,

    salt: [u8; SALT_LEN],

    persistent_id: OnceLock<String>,
}

impl IdentityRecord {
    pub fn new(
        id: String,
        label: String,
        organisation: String,
        idp_id: String,
        idp_scope: String,
        attributes: BTreeMap<String, String>,
        salt: [u8; SALT_LEN],
    ) -> Self {
        Self {
            id,
            label,
            organisation,
            idp_id,
            idp_scope,
            attributes,
            salt,
            persistent_id: OnceLock::new(),
        }
    }

    /// Per-organisation salt.
    pub fn salt(&self) -> &[u8] {
        &self.salt
    }

    /// Cached persistent ID, if one has been computed.
    pub fn cached_persistent_id(&self) -> Option<&str> {
        self.persistent_id.get().map(|s| s.as_str())
    }

    /// Store a persistent ID unless one is already cached.
    ///
    /// Returns the value that is cached after the call, which is the
    /// earlier value when another request got there first.
    pub fn cache_persistent_id(&self, value: String) -> &str {
        self.persistent_id.get_or_init(|| value)
    }

    /// Display name for the chooser page.
    pub fn display_name(&self) -> &str {
        ["displayName", "display_name", "cn", "name"]
            .iter()
            .find_map(|key| self.attributes.get(*key))
            .map(|s| s.as_str())
            .unwrap_or(&self.label)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    fn record() -> IdentityRecord {
        let mut attributes = BTreeMap::new();
        attributes.insert("displayName".to_string(), "Ada Lovelace".to_string());
        IdentityRecord::new(
            "42".to_string(),
            "ada".to_string(),
            "Analytical University".to_string(),
            "https://idp.analytical.ac.uk/shibboleth".to_string(),
            "analytical.ac.uk".to_string(),
            attributes,
            [7u8; SALT_LEN],
        )
    }

    #[test]
    fn test_persistent_id_is_write_once() {
        let record = record();
        assert!(record.cached_persistent_id().is_none());

        assert_eq!(record.cache_persistent_id("first".to_string()), "first");
        assert_eq!(record.cache_persistent_id("second".to_string()), "first");
        assert_eq!(record.cached_persistent_id(), Some("first"));
    }

    #[test]
    fn test_concurrent_writers_converge() {
        let record = Arc::new(record());

        let handles: Vec<_> = (0..8)
            .map(|i| {
                let record = Arc::clone(&record);
                std::thread::spawn(move || record.cache_persistent_id(format!("value-{}", i)).to_string())
            })
            .collect();

        let seen: Vec<String> = handles.into_iter().map(|h| h.join().unwrap()).collect();
        let cached = record.cached_persistent_id().unwrap().to_string();
        assert!(seen.iter().all(|v| *v == cached));
    }

    #[test]
    fn test_display_name_falls_back_to_label() {
        let record = record();
        assert_eq!(record.display_name(), "Ada Lovelace");

        let bare = IdentityRecord::new(
            "7".to_string(),
            "bare".to_string(),
            "Org".to_string(),
            String::new(),
            String::new(),
            BTreeMap::new(),
            [0u8; SALT_LEN],
        );
        assert_eq!(bare.display_name(), "bare");
    }
}
