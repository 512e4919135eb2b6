//! Error taxonomy shared by credential resolution and session start.

use thiserror::Error;

/// Errors produced by the puppet core.
///
/// Each variant maps to one failure class of the association flow or of
/// session start-up:
///
/// - [`PuppetError::InvalidIdentifier`] - the user identifier is not `localpart:domain`
/// - [`PuppetError::Discovery`] - no homeserver could be found for a domain
/// - [`PuppetError::Login`] - the homeserver rejected the credentials
/// - [`PuppetError::Connection`] - the session could not be established
/// - [`PuppetError::Sync`] - synchronization stopped before the initial sync completed
/// - [`PuppetError::Prompt`] - operator input could not be read
/// - [`PuppetError::Config`] - a config or registration file could not be loaded or saved
#[derive(Debug, Error)]
pub enum PuppetError {
    /// The identifier does not match `localpart:domain`.
    #[error("invalid matrix identifier `{0}`")]
    InvalidIdentifier(String),

    /// Homeserver lookup failed or returned a non-success state.
    #[error("homeserver discovery failed: {0}")]
    Discovery(String),

    /// The homeserver rejected the login.
    #[error("login rejected: {0}")]
    Login(String),

    /// The transport or the session could not be established.
    #[error("connection failed: {0}")]
    Connection(String),

    /// The sync loop ended before reaching the ready state.
    #[error("sync did not become ready: {0}")]
    Sync(String),

    /// Reading operator input failed.
    #[error("failed to read input: {0}")]
    Prompt(#[from] std::io::Error),

    /// Loading or saving configuration failed.
    #[error("configuration error: {0}")]
    Config(String),
}
