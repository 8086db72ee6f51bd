//! Simulator session model.
//!
//! One browser session per cookie, holding two typed partitions: what the
//! simulated IdP knows and what the simulated SP knows. Sessions are
//! persisted in redb with an in-memory cache and background cleanup.

pub mod cleanup;
pub mod store;
pub mod types;

pub use cleanup::{spawn_cleanup_task, DEFAULT_CLEANUP_INTERVAL_SECS};
pub use store::SessionStore;
pub use types::{BrowserSessionId, SimSession, SpSession};
