//! Header injector and mock assertion synthesizer.
//!
//! Builds the header set a Shibboleth SP would hand to the application.

pub mod assertion;
pub mod injector;
pub mod set;

pub use injector::{inject_attribute_headers, inject_session_headers, is_protocol_header};
pub use set::HeaderSet;
