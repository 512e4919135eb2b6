//! Credential resolution for the puppeted account.
//!
//! This module turns a partially filled [`Config`] into a complete
//! [`Credentials`] triple. Values already present in the configuration are
//! used as-is; missing values are asked to the operator, discovered from the
//! homeserver's well-known document or obtained through a password login.
//!
//! # Modules
//!
//! - `prompt` - Operator prompts (visible and masked input)
//! - `resolver` - The staged resolution pipeline

mod prompt;
mod resolver;

pub use crate::credentials::prompt::{Prompter, TerminalPrompter};
#[cfg(test)]
pub use crate::credentials::prompt::MockPrompter;
pub use crate::credentials::resolver::{CredentialResolver, Resolution, ResolveOptions};

use crate::{config::Config, error::PuppetError};

/// Fully resolved credentials of the puppeted account.
///
/// All three values are non-empty and `user_id` parses with [`parse_mxid`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Credentials {
    /// Base URL of the homeserver client-server API
    pub homeserver_url: String,
    /// Matrix user identifier of the puppet
    pub user_id: String,
    /// Access token of the puppet session
    pub access_token: String,
}

impl Credentials {
    /// Builds credentials from a configuration that already holds all three values.
    ///
    /// Returns `None` when any value is missing or empty, in which case the
    /// association flow has to run first.
    pub fn from_config(config: &Config) -> Option<Credentials> {
        let credentials = Credentials {
            homeserver_url: non_empty(&config.bridge.homeserver_url)?,
            user_id: non_empty(&config.puppet.id)?,
            access_token: non_empty(&config.puppet.token)?,
        };
        Some(credentials)
    }

    /// Returns the configuration sections holding these credentials.
    pub fn to_config(&self) -> Config {
        let mut config = Config::default();
        config.puppet.id = Some(self.user_id.clone());
        config.puppet.token = Some(self.access_token.clone());
        config.bridge.homeserver_url = Some(self.homeserver_url.clone());
        config
    }
}

/// Clones an optional string, treating an empty string as absent.
pub(crate) fn non_empty(value: &Option<String>) -> Option<String> {
    value.as_ref().filter(|v| !v.is_empty()).cloned()
}

/// A Matrix identifier split into its two parts.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Mxid {
    /// Part before the first colon, without the leading sigil
    pub localpart: String,
    /// Part after the first colon, port included
    pub domain: String,
}

/// Splits a `localpart:domain` identifier.
///
/// A leading `@` is accepted and stripped. The first colon separates the two
/// parts, so a domain carrying a port (`example.org:8448`) is kept whole.
///
/// # Errors
///
/// Returns [`PuppetError::InvalidIdentifier`] when there is no colon or when
/// either part is empty.
///
/// # Examples
///
/// ```
/// use matrix_puppet::credentials::parse_mxid;
///
/// let mxid = parse_mxid("@alice:example.org:8448").unwrap();
/// assert_eq!(mxid.localpart, "alice");
/// assert_eq!(mxid.domain, "example.org:8448");
/// ```
pub fn parse_mxid(identifier: &str) -> Result<Mxid, PuppetError> {
    let without_sigil = identifier.strip_prefix('@').unwrap_or(identifier);

    match without_sigil.split_once(':') {
        Some((localpart, domain)) if !localpart.is_empty() && !domain.is_empty() => Ok(Mxid {
            localpart: localpart.to_owned(),
            domain: domain.to_owned(),
        }),
        _ => Err(PuppetError::InvalidIdentifier(identifier.to_owned())),
    }
}
