//! Record filters.
//!
//! A filter is the single customization point of the attribute pipeline. It
//! receives a copy of a user's attributes and returns the attributes the
//! simulated SP should expose.

use std::collections::BTreeMap;
use std::sync::Arc;

use crate::error::SimulatorError;

/// User attributes, name -> value.
pub type Attributes = BTreeMap<String, String>;

/// Strategy applied to a user's attributes before they become headers.
pub trait RecordFilter: Send + Sync {
    fn apply(&self, attributes: Attributes) -> Attributes;
}

/// Leaves attributes untouched.
#[derive(Debug, Clone, Copy, Default)]
pub struct IdentityFilter;

impl RecordFilter for IdentityFilter {
    fn apply(&self, attributes: Attributes) -> Attributes {
        attributes
    }
}

/// Drops fixture bookkeeping keys (`_*` and `shibsim_*`).
#[derive(Debug, Clone, Copy, Default)]
pub struct StripInternalFilter;

impl RecordFilter for StripInternalFilter {
    fn apply(&self, mut attributes: Attributes) -> Attributes {
        attributes.retain(|key, _| !key.starts_with('_') && !key.starts_with("shibsim_"));
        attributes
    }
}

/// Lowercases attribute names, as some SP attribute maps expect.
#[derive(Debug, Clone, Copy, Default)]
pub struct LowercaseKeysFilter;

impl RecordFilter for LowercaseKeysFilter {
    fn apply(&self, attributes: Attributes) -> Attributes {
        attributes
            .into_iter()
            .map(|(key, value)| (key.to_lowercase(), value))
            .collect()
    }
}

impl<F> RecordFilter for F
where
    F: Fn(Attributes) -> Attributes + Send + Sync,
{
    fn apply(&self, attributes: Attributes) -> Attributes {
        self(attributes)
    }
}

/// Resolve a configured filter name.
pub fn filter_by_name(name: &str) -> Result<Arc<dyn RecordFilter>, SimulatorError> {
    match name.trim().to_lowercase().as_str() {
        "" | "identity" | "none" => Ok(Arc::new(IdentityFilter)),
        "strip-internal" => Ok(Arc::new(StripInternalFilter)),
        "lowercase-keys" => Ok(Arc::new(LowercaseKeysFilter)),
        other => Err(SimulatorError::Configuration(format!(
            "Unknown record filter: {}",
            other
        ))),
    }
}
