//! User directory: fixture identities, organisation index and computed IDs.

pub mod identifiers;
pub mod loader;
pub mod record;

pub use identifiers::{ComputedIdHasher, IdentifierHasher};
pub use loader::{Directory, DirectoryLoader, RecordDefaults};
pub use record::IdentityRecord;
