//! Response structures for the homeserver endpoints called over plain HTTP.
//!
//! This module contains structures for deserializing JSON responses from the
//! well-known discovery document and the `whoami` endpoint.

use serde::Deserialize;
use std::fmt;

/// Client discovery document from `/.well-known/matrix/client`.
#[derive(Deserialize, Debug)]
pub struct WellKnownResponse {
    /// Homeserver advertised for the domain.
    #[serde(rename = "m.homeserver")]
    pub homeserver: HomeserverInfo,
}

/// The `m.homeserver` object of a discovery document.
#[derive(Deserialize, Debug)]
pub struct HomeserverInfo {
    /// Base URL of the client-server API.
    pub base_url: String,
}

impl fmt::Display for WellKnownResponse {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "base_url={}", self.homeserver.base_url)
    }
}

/// Response from `/_matrix/client/v3/account/whoami`.
///
/// Tells which user and device an access token belongs to.
#[derive(Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct WhoAmIResponse {
    /// Owner of the access token.
    pub user_id: String,
    /// Device bound to the access token, absent for appservice users.
    pub device_id: Option<String>,
}

impl fmt::Display for WhoAmIResponse {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(
            f,
            "user_id={}, device_id={}",
            self.user_id,
            self.device_id.as_deref().unwrap_or("-")
        )
    }
}
