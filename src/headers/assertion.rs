//! Mock assertion references.
//!
//! A real Shibboleth SP can expose the raw assertion through numbered
//! `Shib-Assertion-NN` URLs. The simulator only produces plausible
//! references; nothing is served behind them.

use chrono::{DateTime, SecondsFormat, Utc};

/// Number of assertion reference headers produced per request.
pub const ASSERTION_COUNT: usize = 2;

/// A generated xs:ID (leading underscore, 32 hex chars).
pub fn xs_id() -> String {
    format!("_{}", hex::encode(rand::random::<[u8; 16]>()))
}

/// Authentication instant in xs:dateTime form, UTC with a `Z` suffix.
pub fn xs_datetime(at: DateTime<Utc>) -> String {
    at.to_rfc3339_opts(SecondsFormat::Secs, true)
}

/// Header name of the n-th assertion reference (1-based).
pub fn assertion_header_name(part: usize) -> String {
    format!("Shib-Assertion-{:02}", part)
}

/// Synthesize the assertion reference headers for one request.
///
/// Every call draws fresh IDs, so callers compute this once per request
/// and derive the count from the returned list.
pub fn synthesize_assertions(assertion_base: &str, session_id: &str) -> Vec<(String, String)> {
    (1..=ASSERTION_COUNT)
        .map(|part| {
            let value = format!(
                "{}?key={}&ID={}",
                assertion_base,
                urlencoding::encode(session_id),
                xs_id()
            );
            (assertion_header_name(part), value)
        })
        .collect()
}
