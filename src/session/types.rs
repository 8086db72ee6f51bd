//! Browser session with the simulated IdP and SP partitions.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use crate::headers::assertion::{xs_datetime, xs_id};

/// Browser session identifier (16-byte random value, hex-encoded in the cookie).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct BrowserSessionId([u8; 16]);

impl BrowserSessionId {
    /// Generate a new random session ID.
    pub fn new() -> Self {
        Self(rand::random())
    }

    /// Convert to hex string for storage/cookies.
    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }

    /// Parse from hex string.
    pub fn from_hex(s: &str) -> Option<Self> {
        let bytes = hex::decode(s).ok()?;
        if bytes.len() != 16 {
            return None;
        }
        let mut arr = [0u8; 16];
        arr.copy_from_slice(&bytes);
        Some(Self(arr))
    }
}

impl Default for BrowserSessionId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for BrowserSessionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.to_hex())
    }
}

/// What the simulated IdP remembers: who authenticated.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct IdpSession {
    pub user_id: Option<String>,
}

/// What the simulated SP remembers.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SpSession {
    /// User the SP has accepted from the IdP.
    pub user_id: Option<String>,

    /// Value of `Shib-Session-ID`.
    pub session_id: Option<String>,

    /// Value of `Shib-Authentication-Instant`.
    pub login_time: Option<String>,
}

impl SpSession {
    /// Start a new SP session: fresh session ID and login time.
    pub fn begin(&mut self, now: DateTime<Utc>) {
        self.session_id = Some(xs_id());
        self.login_time = Some(xs_datetime(now));
    }
}

/// A browser's simulator state.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SimSession {
    pub id: BrowserSessionId,

    pub created_at: DateTime<Utc>,

    pub expires_at: DateTime<Utc>,

    /// Last access time (updated on each request).
    pub last_accessed: DateTime<Utc>,

    idp: IdpSession,

    sp: SpSession,
}

/// Expiry instant, saturating at the latest representable time.
fn expiry(now: DateTime<Utc>, ttl_secs: u64) -> DateTime<Utc> {
    i64::try_from(ttl_secs)
        .ok()
        .and_then(Duration::try_seconds)
        .and_then(|ttl| now.checked_add_signed(ttl))
        .unwrap_or(DateTime::<Utc>::MAX_UTC)
}

impl SimSession {
    /// Create an empty session.
    pub fn new(ttl_secs: u64) -> Self {
        let now = Utc::now();
        Self {
            id: BrowserSessionId::new(),
            created_at: now,
            expires_at: expiry(now, ttl_secs),
            last_accessed: now,
            idp: IdpSession::default(),
            sp: SpSession::default(),
        }
    }

    /// Check if the session is expired.
    pub fn is_expired(&self) -> bool {
        Utc::now() > self.expires_at
    }

    /// Update last accessed time.
    pub fn touch(&mut self) {
        self.last_accessed = Utc::now();
    }

    /// IdP partition (an empty partition when nobody authenticated).
    pub fn idp_session(&mut self) -> &mut IdpSession {
        &mut self.idp
    }

    /// SP partition (an empty partition when the SP has no session).
    pub fn sp_session(&mut self) -> &mut SpSession {
        &mut self.sp
    }

    pub fn idp(&self) -> &IdpSession {
        &self.idp
    }

    pub fn sp(&self) -> &SpSession {
        &self.sp
    }

    /// Clear both partitions.
    pub fn reset(&mut self) {
        self.idp = IdpSession::default();
        self.sp = SpSession::default();
    }

    /// Has the simulated IdP authenticated someone?
    pub fn has_idp_session(&self) -> bool {
        self.idp.user_id.as_deref().is_some_and(|id| !id.is_empty())
    }

    /// Has the SP accepted the same user the IdP authenticated?
    ///
    /// User IDs compare as raw strings.
    pub fn has_consistent_sp_session(&self) -> bool {
        match (self.idp.user_id.as_deref(), self.sp.user_id.as_deref()) {
            (Some(idp_user), Some(sp_user)) => !idp_user.is_empty() && idp_user == sp_user,
            _ => false,
        }
    }

    /// Is anything stored in either partition?
    pub fn is_empty(&self) -> bool {
        self.idp == IdpSession::default() && self.sp == SpSession::default()
    }
}
