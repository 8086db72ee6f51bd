//! Simulator error kind.
//!
//! `SimulatorError` is the only error the router intercepts. Anything else
//! travels as a plain `anyhow::Error` and reaches the server untouched.

use thiserror::Error;

/// Errors raised by the simulator itself.
#[derive(Debug, Error)]
pub enum SimulatorError {
    /// Login requested for an id that is not in the user directory.
    #[error("User with ID '{0}' could not be found!")]
    UnknownUser(String),

    /// Header injection was attempted without a resolvable identity record.
    #[error("Missing user details when trying to add SP headers (user id: {0})")]
    MissingIdentityRecord(String),

    /// The user directory could not be built.
    #[error("Simulator initialization failed: {0}")]
    Initialization(String),

    /// Invalid simulator configuration.
    #[error("Invalid simulator configuration: {0}")]
    Configuration(String),
}

impl SimulatorError {
    /// HTTP status used when this error is shown to the browser.
    pub fn status(&self) -> u16 {
        match self {
            Self::UnknownUser(_) => 401,
            Self::MissingIdentityRecord(_) | Self::Initialization(_) | Self::Configuration(_) => 500,
        }
    }
}
