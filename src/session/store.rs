//! Session store backed by redb embedded database.
//!
//! Browser sessions survive agent restarts, so a developer stays "logged
//! in" to the simulated IdP across rebuilds. Hot sessions are served from
//! an in-memory cache.

use anyhow::{Context, Result};
use redb::{Database, ReadableTable, ReadableTableMetadata, TableDefinition};
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::RwLock;
use tracing::{debug, warn};

use super::types::{BrowserSessionId, SimSession};

/// redb table for sessions (key: session_id hex, value: MessagePack bytes).
const SESSIONS_TABLE: TableDefinition<&str, &[u8]> = TableDefinition::new("shibsim_sessions");

/// Session store with in-memory cache and persistent storage.
pub struct SessionStore {
    db: Database,

    cache: RwLock<HashMap<BrowserSessionId, SimSession>>,

    /// Session TTL in seconds.
    ttl_secs: u64,

    /// Maximum number of sessions to keep in cache.
    max_cache_size: usize,
}

impl SessionStore {
    /// Open or create a session store at the given path.
    pub fn open(path: PathBuf, ttl_secs: u64) -> Result<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create directory: {:?}", parent))?;
        }

        let db = Database::create(&path)
            .with_context(|| format!("Failed to open session database: {:?}", path))?;

        let write_txn = db.begin_write()?;
        {
            let _ = write_txn.open_table(SESSIONS_TABLE)?;
        }
        write_txn.commit()?;

        let cache = Self::load_active_sessions(&db)?;
        debug!(sessions = cache.len(), "Loaded active sessions into cache");

        Ok(Self {
            db,
            cache: RwLock::new(cache),
            ttl_secs,
            max_cache_size: 10000,
        })
    }

    /// Load the session named by the cookie, or start a new one.
    ///
    /// Returns the session and whether it was newly created (the caller
    /// then has to send the cookie).
    pub fn load_or_create(&self, id: Option<BrowserSessionId>) -> Result<(SimSession, bool)> {
        if let Some(id) = id {
            if let Some(session) = self.get(id)? {
                return Ok((session, false));
            }
        }
        Ok((SimSession::new(self.ttl_secs), true))
    }

    /// Get session by ID, updating last_accessed time.
    pub fn get(&self, id: BrowserSessionId) -> Result<Option<SimSession>> {
        if let Ok(mut cache) = self.cache.write() {
            if let Some(session) = cache.get_mut(&id) {
                if session.is_expired() {
                    cache.remove(&id);
                    return Ok(None);
                }
                session.touch();
                return Ok(Some(session.clone()));
            }
        }

        let read_txn = self.db.begin_read()?;
        let table = read_txn.open_table(SESSIONS_TABLE)?;

        let key = id.to_hex();
        match table.get(key.as_str())? {
            Some(value) => {
                let mut session: SimSession = rmp_serde::from_slice(value.value())
                    .context("Failed to deserialize session")?;

                if session.is_expired() {
                    return Ok(None);
                }

                session.touch();

                if let Ok(mut cache) = self.cache.write() {
                    if cache.len() >= self.max_cache_size {
                        self.evict_cache_lru(&mut cache);
                    }
                    cache.insert(id, session.clone());
                }

                Ok(Some(session))
            }
            None => Ok(None),
        }
    }

    /// Store a session (both partitions in one write transaction).
    pub fn save(&self, session: &SimSession) -> Result<()> {
        self.persist(session)?;

        if let Ok(mut cache) = self.cache.write() {
            if !cache.contains_key(&session.id) && cache.len() >= self.max_cache_size {
                self.evict_cache_lru(&mut cache);
            }
            cache.insert(session.id, session.clone());
        }

        Ok(())
    }

    /// Delete a session by ID.
    pub fn delete(&self, id: BrowserSessionId) -> Result<bool> {
        if let Ok(mut cache) = self.cache.write() {
            cache.remove(&id);
        }

        let write_txn = self.db.begin_write()?;
        let removed = {
            let mut table = write_txn.open_table(SESSIONS_TABLE)?;
            let key = id.to_hex();
            let result = table.remove(key.as_str())?;
            result.is_some()
        };
        write_txn.commit()?;

        Ok(removed)
    }

    /// Evict all expired sessions.
    /// Returns the number of sessions evicted from the database.
    pub fn evict_expired(&self) -> Result<usize> {
        if let Ok(mut cache) = self.cache.write() {
            cache.retain(|_, session| !session.is_expired());
        }

        let expired: Vec<String> = {
            let read_txn = self.db.begin_read()?;
            let table = read_txn.open_table(SESSIONS_TABLE)?;

            let mut ids = Vec::new();
            for entry in table.iter()? {
                let (key, value) = entry?;
                match rmp_serde::from_slice::<SimSession>(value.value()) {
                    Ok(session) if session.is_expired() => {
                        ids.push(key.value().to_string());
                    }
                    Err(e) => {
                        warn!(key = key.value(), error = %e, "Failed to deserialize session, marking for deletion");
                        ids.push(key.value().to_string());
                    }
                    _ => {}
                }
            }
            ids
        };

        if expired.is_empty() {
            return Ok(0);
        }

        let write_txn = self.db.begin_write()?;
        let mut evicted = 0;
        {
            let mut table = write_txn.open_table(SESSIONS_TABLE)?;
            for id in &expired {
                if table.remove(id.as_str())?.is_some() {
                    evicted += 1;
                }
            }
        }
        write_txn.commit()?;

        Ok(evicted)
    }

    /// Get session count.
    pub fn session_count(&self) -> Result<usize> {
        let read_txn = self.db.begin_read()?;
        let table = read_txn.open_table(SESSIONS_TABLE)?;
        Ok(table.len()? as usize)
    }

    fn persist(&self, session: &SimSession) -> Result<()> {
        let data = rmp_serde::to_vec(session).context("Failed to serialize session")?;
        let write_txn = self.db.begin_write()?;
        {
            let mut table = write_txn.open_table(SESSIONS_TABLE)?;
            table.insert(session.id.to_hex().as_str(), data.as_slice())?;
        }
        write_txn.commit()?;
        Ok(())
    }

    fn load_active_sessions(db: &Database) -> Result<HashMap<BrowserSessionId, SimSession>> {
        let mut sessions = HashMap::new();
        let read_txn = db.begin_read()?;
        let table = read_txn.open_table(SESSIONS_TABLE)?;

        for entry in table.iter()? {
            let (_, value) = entry?;
            match rmp_serde::from_slice::<SimSession>(value.value()) {
                Ok(session) if !session.is_expired() => {
                    sessions.insert(session.id, session);
                }
                _ => {}
            }
        }

        Ok(sessions)
    }

    /// Evict the least recently accessed session from the cache.
    fn evict_cache_lru(&self, cache: &mut HashMap<BrowserSessionId, SimSession>) {
        if let Some(oldest_id) = cache
            .iter()
            .min_by_key(|(_, s)| s.last_accessed)
            .map(|(id, _)| *id)
        {
            cache.remove(&oldest_id);
        }
    }
}
