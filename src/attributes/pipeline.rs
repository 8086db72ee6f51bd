//! Attribute pipeline: identity record -> SP attribute values.

use std::sync::Arc;
use tracing::debug;

use super::filter::{Attributes, RecordFilter};
use crate::directory::{ComputedIdHasher, IdentifierHasher, IdentityRecord};

/// Filter output key that overrides the computed targeted ID.
pub const TARGETED_ID_KEY: &str = "targeted_id";

/// Filter output key that overrides the computed persistent ID.
pub const PERSISTENT_ID_KEY: &str = "persistent_id";

/// Attributes ready for injection, with both identifiers resolved.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PreparedAttributes {
    pub attributes: Attributes,
    pub targeted_id: String,
    pub persistent_id: String,
}

/// Maps identity records to the values a real SP would release.
pub struct AttributePipeline {
    sp_entity_id: String,
    filter: Arc<dyn RecordFilter>,
    hasher: Arc<dyn IdentifierHasher>,
}

impl AttributePipeline {
    pub fn new(
        sp_entity_id: String,
        filter: Arc<dyn RecordFilter>,
        hasher: Arc<dyn IdentifierHasher>,
    ) -> Self {
        Self {
            sp_entity_id,
            filter,
            hasher,
        }
    }

    /// Pipeline with the identity filter and computed identifiers.
    #[cfg(test)]
    pub fn with_defaults(sp_entity_id: String) -> Self {
        Self::new(
            sp_entity_id,
            Arc::new(super::filter::IdentityFilter),
            Arc::new(ComputedIdHasher),
        )
    }

    pub fn sp_entity_id(&self) -> &str {
        &self.sp_entity_id
    }

    /// Build the attribute values for a user.
    ///
    /// The filter only ever sees a copy of the record's attributes. The
    /// persistent ID is cached on the shared record the first time it is
    /// resolved and reused afterwards.
    pub fn build_headers(&self, record: &IdentityRecord) -> PreparedAttributes {
        let mut filtered = self.filter.apply(record.attributes.clone());

        let targeted_id = filtered.remove(TARGETED_ID_KEY).unwrap_or_else(|| {
            self.hasher.targeted_id(
                &record.id,
                &self.sp_entity_id,
                &record.idp_scope,
                record.salt(),
            )
        });

        let persistent_id = match filtered.remove(PERSISTENT_ID_KEY) {
            Some(supplied) => record.cache_persistent_id(supplied).to_string(),
            None => match record.cached_persistent_id() {
                Some(cached) => cached.to_string(),
                None => {
                    debug!(user_id = %record.id, "Computing persistent ID");
                    let computed = self.hasher.persistent_id(
                        &record.id,
                        &self.sp_entity_id,
                        &record.idp_id,
                        record.salt(),
                    );
                    record.cache_persistent_id(computed).to_string()
                }
            },
        };

        PreparedAttributes {
            attributes: filtered,
            targeted_id,
            persistent_id,
        }
    }
}
