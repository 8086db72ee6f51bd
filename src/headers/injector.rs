//! SP-style header injection.

use tracing::{debug, warn};

use super::assertion::synthesize_assertions;
use super::set::HeaderSet;
use crate::attributes::PreparedAttributes;
use crate::error::SimulatorError;
use crate::session::SpSession;

pub const APPLICATION_ID_HEADER: &str = "Shib-Application-ID";
pub const SESSION_ID_HEADER: &str = "Shib-Session-ID";
pub const IDENTITY_PROVIDER_HEADER: &str = "Shib-Identity-Provider";
pub const AUTHENTICATION_INSTANT_HEADER: &str = "Shib-Authentication-Instant";
pub const AUTHENTICATION_METHOD_HEADER: &str = "Shib-Authentication-Method";
pub const AUTHN_CONTEXT_CLASS_HEADER: &str = "Shib-AuthnContext-Class";
pub const ASSERTION_COUNT_HEADER: &str = "Shib-Assertion-Count";
pub const TARGETED_ID_HEADER: &str = "targeted-id";
pub const PERSISTENT_ID_HEADER: &str = "persistent-id";
pub const REMOTE_USER_HEADER: &str = "REMOTE_USER";

/// Authentication method reported for every simulated login.
pub const UNSPECIFIED_AUTHN_METHOD: &str = "urn:oasis:names:tc:SAML:1.0:am:unspecified";

const APPLICATION_ID: &str = "default";

/// Prefix shared by every `Shib-*` header (including numbered assertions).
pub const SHIB_HEADER_PREFIX: &str = "shib-";

/// Is this a header only the simulated SP may set?
///
/// Names are compared case-insensitively with `_` and `-` treated alike,
/// since CGI-style applications map both to the same variable.
pub fn is_protocol_header(name: &str) -> bool {
    let normalized = name.to_ascii_lowercase().replace('_', "-");
    normalized.starts_with(SHIB_HEADER_PREFIX)
        || normalized == TARGETED_ID_HEADER
        || normalized == PERSISTENT_ID_HEADER
        || normalized == "remote-user"
}

/// Write the released attributes plus the two identifier headers.
///
/// Attributes named like a protocol header are dropped.
pub fn inject_attribute_headers(headers: &mut HeaderSet, prepared: &PreparedAttributes) {
    for (name, value) in &prepared.attributes {
        if is_protocol_header(name) {
            warn!(attribute = %name, "Dropping attribute that shadows an SP header");
            continue;
        }
        headers.insert(name.as_str(), value.as_str());
    }
    headers.insert(TARGETED_ID_HEADER, prepared.targeted_id.as_str());
    headers.insert(PERSISTENT_ID_HEADER, prepared.persistent_id.as_str());
}

/// Write the protocol headers describing the SP session.
///
/// Assertion references are synthesized once here and the count header is
/// taken from that same list.
pub fn inject_session_headers(
    headers: &mut HeaderSet,
    sp: &SpSession,
    sp_entity_id: &str,
    assertion_base: &str,
    persistent_id: &str,
) -> Result<(), SimulatorError> {
    let user_id = sp.user_id.as_deref().unwrap_or_default();
    let session_id = sp
        .session_id
        .as_deref()
        .ok_or_else(|| SimulatorError::MissingIdentityRecord(user_id.to_string()))?;
    let login_time = sp.login_time.as_deref().unwrap_or_default();

    headers.insert(APPLICATION_ID_HEADER, APPLICATION_ID);
    headers.insert(SESSION_ID_HEADER, session_id);
    headers.insert(IDENTITY_PROVIDER_HEADER, sp_entity_id);
    headers.insert(AUTHENTICATION_INSTANT_HEADER, login_time);
    headers.insert(AUTHENTICATION_METHOD_HEADER, UNSPECIFIED_AUTHN_METHOD);
    headers.insert(AUTHN_CONTEXT_CLASS_HEADER, UNSPECIFIED_AUTHN_METHOD);

    let assertions = synthesize_assertions(assertion_base, session_id);
    let count = assertions.len();
    headers.extend(assertions);
    headers.insert(ASSERTION_COUNT_HEADER, format!("{:02}", count));

    headers.insert(REMOTE_USER_HEADER, persistent_id);

    debug!(
        user_id = user_id,
        session_id = session_id,
        assertions = count,
        "Injected SP session headers"
    );

    Ok(())
}
