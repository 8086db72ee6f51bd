//! User directory built from YAML fixtures.
//!
//! The fixture file is a mapping of label -> record. Each record needs an
//! `id` and an `organisation`; `idp_id` and `idp_scope` are optional and
//! every other key becomes an attribute. Sequences are joined with `;`, the
//! way a Shibboleth SP presents multi-valued attributes.

use anyhow::{Context, Result};
use once_cell::sync::OnceCell;
use serde_yaml::{Mapping, Value};
use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info, warn};

use super::identifiers::organisation_salt;
use super::record::IdentityRecord;
use crate::error::SimulatorError;

/// Multi-valued attribute delimiter.
const VALUE_DELIMITER: &str = ";";

/// Keys consumed by the loader rather than copied into attributes.
const RESERVED_KEYS: [&str; 4] = ["id", "organisation", "idp_id", "idp_scope"];

/// IdP values for records that do not carry their own.
#[derive(Debug, Clone)]
pub struct RecordDefaults {
    pub idp_id: String,
    pub idp_scope: String,
}

/// Users indexed by ID and grouped by organisation.
#[derive(Debug, Default)]
pub struct Directory {
    users: HashMap<String, Arc<IdentityRecord>>,
    organisations: BTreeMap<String, Vec<Arc<IdentityRecord>>>,
}

impl Directory {
    /// Build a directory from fixture YAML.
    pub fn from_yaml_str(content: &str, defaults: &RecordDefaults) -> Result<Self> {
        let fixtures: Mapping =
            serde_yaml::from_str(content).context("Failed to parse user fixtures")?;

        let mut directory = Directory::default();
        let mut salts: HashMap<String, [u8; 20]> = HashMap::new();

        for (label, value) in fixtures {
            let Some(label) = scalar_to_string(&label).map(|l| l.trim().to_string()) else {
                warn!("Skipping fixture entry with a non-scalar label");
                continue;
            };
            let Value::Mapping(fields) = value else {
                warn!(label = %label, "Skipping fixture entry that is not a mapping");
                continue;
            };

            let mut scalars: BTreeMap<String, String> = BTreeMap::new();
            for (key, value) in fields {
                let Some(key) = key.as_str().map(str::to_string) else {
                    continue;
                };
                match scalar_to_string(&value) {
                    Some(text) => {
                        scalars.insert(key, text);
                    }
                    None => {
                        debug!(label = %label, key = %key, "Ignoring non-scalar attribute");
                    }
                }
            }

            let id = scalars
                .get("id")
                .map(|s| s.trim().to_string())
                .filter(|s| !s.is_empty())
                .ok_or_else(|| {
                    SimulatorError::Initialization(format!("User fixture '{}' has no id", label))
                })?;

            let organisation = scalars
                .get("organisation")
                .map(|s| s.trim().to_string())
                .filter(|s| !s.is_empty())
                .ok_or_else(|| {
                    SimulatorError::Initialization(format!(
                        "User fixture '{}' has no organisation",
                        label
                    ))
                })?;

            let idp_id = scalars
                .get("idp_id")
                .cloned()
                .unwrap_or_else(|| defaults.idp_id.clone());
            let idp_scope = scalars
                .get("idp_scope")
                .cloned()
                .unwrap_or_else(|| defaults.idp_scope.clone());

            let salt = *salts
                .entry(organisation.clone())
                .or_insert_with(|| organisation_salt(&organisation));

            let attributes = scalars
                .into_iter()
                .filter(|(key, _)| !RESERVED_KEYS.contains(&key.as_str()))
                .collect();

            let record = Arc::new(IdentityRecord::new(
                id.clone(),
                label,
                organisation.clone(),
                idp_id,
                idp_scope,
                attributes,
                salt,
            ));

            if let Some(previous) = directory.users.insert(id.clone(), Arc::clone(&record)) {
                warn!(
                    user_id = %id,
                    previous_label = %previous.label,
                    label = %record.label,
                    "Duplicate user ID in fixtures, later record wins"
                );
                if let Some(bucket) = directory.organisations.get_mut(&previous.organisation) {
                    bucket.retain(|r| !Arc::ptr_eq(r, &previous));
                    if bucket.is_empty() {
                        directory.organisations.remove(&previous.organisation);
                    }
                }
            }

            directory
                .organisations
                .entry(organisation)
                .or_default()
                .push(record);
        }

        directory.check_state()?;
        Ok(directory)
    }

    /// Load a directory from a fixture file.
    pub fn load(path: &Path, defaults: &RecordDefaults) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read user fixtures: {:?}", path))?;
        Self::from_yaml_str(&content, defaults)
    }

    /// Look up a user by ID.
    pub fn get(&self, user_id: &str) -> Option<&Arc<IdentityRecord>> {
        self.users.get(user_id)
    }

    /// Organisations (name-sorted) with their users in fixture order.
    pub fn organisations(&self) -> impl Iterator<Item = (&str, &[Arc<IdentityRecord>])> {
        self.organisations
            .iter()
            .map(|(name, users)| (name.as_str(), users.as_slice()))
    }

    pub fn user_count(&self) -> usize {
        self.users.len()
    }

    pub fn organisation_count(&self) -> usize {
        self.organisations.len()
    }

    fn check_state(&self) -> Result<(), SimulatorError> {
        if self.users.is_empty() {
            return Err(SimulatorError::Initialization("No user data!".to_string()));
        }
        if self.organisations.is_empty() {
            return Err(SimulatorError::Initialization(
                "No organisation labels!".to_string(),
            ));
        }
        Ok(())
    }
}

fn scalar_to_string(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        Value::Bool(b) => Some(b.to_string()),
        Value::Sequence(items) => {
            let parts: Vec<String> = items.iter().filter_map(scalar_to_string).collect();
            Some(parts.join(VALUE_DELIMITER))
        }
        Value::Tagged(tagged) => scalar_to_string(&tagged.value),
        Value::Null | Value::Mapping(_) => None,
    }
}

/// Process-wide, load-once access to the directory.
pub struct DirectoryLoader {
    path: PathBuf,
    defaults: RecordDefaults,
    cell: OnceCell<Arc<Directory>>,
}

impl DirectoryLoader {
    pub fn new(path: PathBuf, defaults: RecordDefaults) -> Self {
        Self {
            path,
            defaults,
            cell: OnceCell::new(),
        }
    }

    /// Get the directory, loading it on first use.
    ///
    /// Concurrent first callers block on a single load. A failed load is
    /// not cached, so the next call retries.
    pub fn get(&self) -> Result<Arc<Directory>> {
        self.cell
            .get_or_try_init(|| {
                let directory = Directory::load(&self.path, &self.defaults)?;
                info!(
                    path = ?self.path,
                    users = directory.user_count(),
                    organisations = directory.organisation_count(),
                    "User directory loaded"
                );
                Ok(Arc::new(directory))
            })
            .map(Arc::clone)
    }
}
