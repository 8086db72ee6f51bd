//! Simulator configuration.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

use crate::error::SimulatorError;
use crate::session::DEFAULT_CLEANUP_INTERVAL_SECS;

/// Longest accepted browser session TTL (ten years).
pub const MAX_SESSION_TTL_SECS: u64 = 10 * 365 * 24 * 60 * 60;

/// Configuration for the simulated IdP and SP.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SimulatorConfig {
    /// Allow the chooser IdP to reuse an existing IdP session (single sign-on).
    #[serde(default = "default_true")]
    pub sso_enabled: bool,

    /// Entity ID of the simulated SP.
    #[serde(default = "default_sp_entity_id")]
    pub sp_entity_id: String,

    /// IdP entity ID used for records that do not name one.
    #[serde(default = "default_idp_id")]
    pub default_idp_id: String,

    /// IdP scope used for records that do not name one.
    #[serde(default = "default_idp_scope")]
    pub default_idp_scope: String,

    /// Base URL of the mock assertion references.
    #[serde(default = "default_assertion_base")]
    pub assertion_base: String,

    /// YAML fixture file with the test users.
    #[serde(default = "default_users_file")]
    pub users_file: PathBuf,

    /// Name of the record filter applied to user attributes.
    #[serde(default = "default_record_filter")]
    pub record_filter: String,

    /// Verbose simulator logging (also enables error detail on fatal pages).
    #[serde(default)]
    pub debug: bool,

    /// Path of the simulated IdP login handler.
    #[serde(default = "default_idp_login_path")]
    pub idp_login_path: String,

    /// Path of the simulated IdP logout handler.
    #[serde(default = "default_idp_logout_path")]
    pub idp_logout_path: String,

    /// Path of the WAYF discovery stub.
    #[serde(default = "default_wayf_path")]
    pub wayf_path: String,

    /// Path prefixes behind the simulated SP (if empty, protects all).
    #[serde(default)]
    pub protected_paths: Vec<String>,

    /// Path prefixes never handled by the simulated SP.
    #[serde(default)]
    pub excluded_paths: Vec<String>,

    /// Browser session TTL in seconds.
    #[serde(default = "default_session_ttl")]
    pub session_ttl_secs: u64,

    /// Cookie name for the browser session ID.
    #[serde(default = "default_cookie_name")]
    pub session_cookie_name: String,

    /// Cookie domain (optional, defaults to request host).
    #[serde(default)]
    pub cookie_domain: Option<String>,

    /// Cookie path.
    #[serde(default = "default_cookie_path")]
    pub cookie_path: String,

    /// Secure flag on the session cookie. Off by default, this is a development tool.
    #[serde(default)]
    pub cookie_secure: bool,

    /// HttpOnly flag on the session cookie.
    #[serde(default = "default_true")]
    pub cookie_http_only: bool,

    /// SameSite attribute of the session cookie.
    #[serde(default = "default_same_site")]
    pub cookie_same_site: String,

    /// Session store path (redb database file).
    #[serde(default = "default_session_store_path")]
    pub session_store_path: PathBuf,

    /// Cleanup interval in seconds.
    #[serde(default = "default_cleanup_interval")]
    pub cleanup_interval_secs: u64,

    /// Base URL of the wrapped application.
    #[serde(default = "default_upstream_url")]
    pub upstream_url: String,

    /// Timeout for forwarded requests in seconds.
    #[serde(default = "default_upstream_timeout")]
    pub upstream_timeout_secs: u64,

    /// Largest request body buffered before routing; larger bodies get 413.
    #[serde(default = "default_max_body_bytes")]
    pub max_body_bytes: usize,
}

fn default_true() -> bool {
    true
}

fn default_sp_entity_id() -> String {
    "https://sp.example.ac.uk/shibboleth".to_string()
}

fn default_idp_id() -> String {
    "https://idp.example.ac.uk/shibboleth".to_string()
}

fn default_idp_scope() -> String {
    "example.ac.uk".to_string()
}

fn default_assertion_base() -> String {
    "https://localhost/Shibboleth.sso/GetAssertion".to_string()
}

fn default_users_file() -> PathBuf {
    PathBuf::from("data/users.yml")
}

fn default_record_filter() -> String {
    "identity".to_string()
}

fn default_idp_login_path() -> String {
    "/shibsim_idp/login".to_string()
}

fn default_idp_logout_path() -> String {
    "/shibsim_idp/logout".to_string()
}

fn default_wayf_path() -> String {
    "/shibsim_wayf".to_string()
}

fn default_session_ttl() -> u64 {
    8 * 60 * 60 // 8 hours
}

fn default_cookie_name() -> String {
    "shibsim_session".to_string()
}

fn default_cookie_path() -> String {
    "/".to_string()
}

fn default_same_site() -> String {
    "Lax".to_string()
}

fn default_session_store_path() -> PathBuf {
    PathBuf::from("/var/lib/shibsim/sessions.redb")
}

fn default_cleanup_interval() -> u64 {
    DEFAULT_CLEANUP_INTERVAL_SECS
}

fn default_upstream_url() -> String {
    "http://127.0.0.1:3000".to_string()
}

fn default_upstream_timeout() -> u64 {
    30
}

fn default_max_body_bytes() -> usize {
    10 * 1024 * 1024
}

impl Default for SimulatorConfig {
    fn default() -> Self {
        Self {
            sso_enabled: true,
            sp_entity_id: default_sp_entity_id(),
            default_idp_id: default_idp_id(),
            default_idp_scope: default_idp_scope(),
            assertion_base: default_assertion_base(),
            users_file: default_users_file(),
            record_filter: default_record_filter(),
            debug: false,
            idp_login_path: default_idp_login_path(),
            idp_logout_path: default_idp_logout_path(),
            wayf_path: default_wayf_path(),
            protected_paths: Vec::new(),
            excluded_paths: Vec::new(),
            session_ttl_secs: default_session_ttl(),
            session_cookie_name: default_cookie_name(),
            cookie_domain: None,
            cookie_path: default_cookie_path(),
            cookie_secure: false,
            cookie_http_only: true,
            cookie_same_site: default_same_site(),
            session_store_path: default_session_store_path(),
            cleanup_interval_secs: default_cleanup_interval(),
            upstream_url: default_upstream_url(),
            upstream_timeout_secs: default_upstream_timeout(),
            max_body_bytes: default_max_body_bytes(),
        }
    }
}

impl SimulatorConfig {
    /// Validate the configuration.
    pub fn validate(&self) -> Result<(), SimulatorError> {
        if self.sp_entity_id.is_empty() {
            return Err(SimulatorError::Configuration(
                "sp_entity_id is required".to_string(),
            ));
        }

        for (name, path) in [
            ("idp_login_path", &self.idp_login_path),
            ("idp_logout_path", &self.idp_logout_path),
            ("wayf_path", &self.wayf_path),
        ] {
            if !path.starts_with('/') {
                return Err(SimulatorError::Configuration(format!(
                    "{} must start with '/': {}",
                    name, path
                )));
            }
        }

        if self.idp_login_path == self.idp_logout_path {
            return Err(SimulatorError::Configuration(
                "idp_login_path and idp_logout_path must differ".to_string(),
            ));
        }

        if self.session_ttl_secs == 0 {
            return Err(SimulatorError::Configuration(
                "session_ttl_secs must be greater than zero".to_string(),
            ));
        }

        if self.session_ttl_secs > MAX_SESSION_TTL_SECS {
            return Err(SimulatorError::Configuration(format!(
                "session_ttl_secs must not exceed {}",
                MAX_SESSION_TTL_SECS
            )));
        }

        Ok(())
    }

    /// Check if a path is behind the simulated SP.
    pub fn should_protect_path(&self, path: &str) -> bool {
        for excluded in &self.excluded_paths {
            if path.starts_with(excluded) {
                return false;
            }
        }

        if self.protected_paths.is_empty() {
            return true;
        }

        self.protected_paths
            .iter()
            .any(|protected| path.starts_with(protected))
    }

    /// Build the session cookie value.
    pub fn build_cookie(&self, session_id: &str) -> String {
        let mut cookie = format!("{}={}", self.session_cookie_name, session_id);

        if let Some(ref domain) = self.cookie_domain {
            cookie.push_str(&format!("; Domain={}", domain));
        }

        cookie.push_str(&format!("; Path={}", self.cookie_path));

        if self.cookie_secure {
            cookie.push_str("; Secure");
        }

        if self.cookie_http_only {
            cookie.push_str("; HttpOnly");
        }

        cookie.push_str(&format!("; SameSite={}", self.cookie_same_site));
        cookie.push_str(&format!("; Max-Age={}", self.session_ttl_secs));

        cookie
    }

    /// Parse the browser session ID from a cookie header.
    pub fn parse_session_cookie(&self, cookie_header: &str) -> Option<String> {
        let prefix = format!("{}=", self.session_cookie_name);
        cookie_header
            .split(';')
            .map(str::trim)
            .find_map(|part| part.strip_prefix(&prefix))
            .map(str::to_string)
    }
}

/// JSON configuration file overlay, merged over CLI-derived settings.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(rename_all = "kebab-case")]
pub struct SimulatorConfigJson {
    pub sso_enabled: Option<bool>,
    pub sp_entity_id: Option<String>,
    pub default_idp_id: Option<String>,
    pub default_idp_scope: Option<String>,
    pub assertion_base: Option<String>,
    pub users_file: Option<PathBuf>,
    pub record_filter: Option<String>,
    pub debug: Option<bool>,
    pub idp_login_path: Option<String>,
    pub idp_logout_path: Option<String>,
    pub wayf_path: Option<String>,
    #[serde(default)]
    pub protected_paths: Vec<String>,
    #[serde(default)]
    pub excluded_paths: Vec<String>,
    pub session_ttl_secs: Option<u64>,
    pub session_cookie_name: Option<String>,
    pub cookie_domain: Option<String>,
    pub cookie_path: Option<String>,
    pub cookie_secure: Option<bool>,
    pub cookie_http_only: Option<bool>,
    pub cookie_same_site: Option<String>,
    pub session_store_path: Option<PathBuf>,
    pub cleanup_interval_secs: Option<u64>,
    pub upstream_url: Option<String>,
    pub upstream_timeout_secs: Option<u64>,
    pub max_body_bytes: Option<usize>,
}

impl SimulatorConfigJson {
    /// Merge JSON config into existing config.
    pub fn apply_to(&self, config: &mut SimulatorConfig) {
        if let Some(enabled) = self.sso_enabled {
            config.sso_enabled = enabled;
        }
        if let Some(ref id) = self.sp_entity_id {
            config.sp_entity_id = id.clone();
        }
        if let Some(ref id) = self.default_idp_id {
            config.default_idp_id = id.clone();
        }
        if let Some(ref scope) = self.default_idp_scope {
            config.default_idp_scope = scope.clone();
        }
        if let Some(ref base) = self.assertion_base {
            config.assertion_base = base.clone();
        }
        if let Some(ref file) = self.users_file {
            config.users_file = file.clone();
        }
        if let Some(ref filter) = self.record_filter {
            config.record_filter = filter.clone();
        }
        if let Some(debug) = self.debug {
            config.debug = debug;
        }
        if let Some(ref path) = self.idp_login_path {
            config.idp_login_path = path.clone();
        }
        if let Some(ref path) = self.idp_logout_path {
            config.idp_logout_path = path.clone();
        }
        if let Some(ref path) = self.wayf_path {
            config.wayf_path = path.clone();
        }
        if !self.protected_paths.is_empty() {
            config.protected_paths = self.protected_paths.clone();
        }
        if !self.excluded_paths.is_empty() {
            config.excluded_paths = self.excluded_paths.clone();
        }
        if let Some(ttl) = self.session_ttl_secs {
            config.session_ttl_secs = ttl;
        }
        if let Some(ref name) = self.session_cookie_name {
            config.session_cookie_name = name.clone();
        }
        if let Some(ref domain) = self.cookie_domain {
            config.cookie_domain = Some(domain.clone());
        }
        if let Some(ref path) = self.cookie_path {
            config.cookie_path = path.clone();
        }
        if let Some(secure) = self.cookie_secure {
            config.cookie_secure = secure;
        }
        if let Some(http_only) = self.cookie_http_only {
            config.cookie_http_only = http_only;
        }
        if let Some(ref same_site) = self.cookie_same_site {
            config.cookie_same_site = same_site.clone();
        }
        if let Some(ref path) = self.session_store_path {
            config.session_store_path = path.clone();
        }
        if let Some(interval) = self.cleanup_interval_secs {
            config.cleanup_interval_secs = interval;
        }
        if let Some(ref url) = self.upstream_url {
            config.upstream_url = url.clone();
        }
        if let Some(timeout) = self.upstream_timeout_secs {
            config.upstream_timeout_secs = timeout;
        }
        if let Some(limit) = self.max_body_bytes {
            config.max_body_bytes = limit;
        }
    }
}
