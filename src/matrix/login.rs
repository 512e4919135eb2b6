//! Password login against a homeserver.
//!
//! The [`Authenticator`] trait is the seam between the credential resolver and
//! the Matrix SDK. [`MatrixAuthenticator`] performs a password login with a
//! throwaway in-memory client and only keeps what the resolver needs: the
//! confirmed user id, the access token and any homeserver redirect advertised
//! in the login response.

use log::{debug, info};
use matrix_sdk::Client;
use mockall::automock;

use crate::{error::PuppetError, matrix::requester::normalize_base_url};

/// Parameters of a password login.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoginRequest {
    /// Client-server API base URL
    pub homeserver_url: String,
    /// Full user id or bare localpart
    pub user: String,
    /// Account password
    pub password: String,
    /// Display name given to the new device
    pub device_display_name: Option<String>,
}

/// Result of a successful login.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoginOutcome {
    /// User id confirmed by the homeserver
    pub user_id: String,
    /// Access token of the new session
    pub access_token: String,
    /// Device created for the new session
    pub device_id: String,
    /// Homeserver base URL advertised in the login response, if any
    pub homeserver_url: Option<String>,
}

/// Exchanges a password for an access token.
#[automock]
pub trait Authenticator {
    /// Logs in with `request`.
    ///
    /// # Arguments
    ///
    /// * `request` - Homeserver, user, password and device display name
    async fn login(&self, request: &LoginRequest) -> Result<LoginOutcome, PuppetError>;
}

/// [`Authenticator`] backed by the Matrix SDK.
#[derive(Default)]
pub struct MatrixAuthenticator;

impl MatrixAuthenticator {
    /// Creates a new authenticator.
    pub fn new() -> Self {
        MatrixAuthenticator
    }
}

impl Authenticator for MatrixAuthenticator {
    /// Logs in with `m.login.password`.
    ///
    /// # Errors
    ///
    /// Returns [`PuppetError::Connection`] if no client can be built for the
    /// homeserver URL and [`PuppetError::Login`] if the homeserver rejects the
    /// login.
    async fn login(&self, request: &LoginRequest) -> Result<LoginOutcome, PuppetError> {
        info!("logging in as {} on {}", request.user, request.homeserver_url);

        let client = Client::builder()
            .homeserver_url(&request.homeserver_url)
            .build()
            .await
            .map_err(|e| PuppetError::Connection(e.to_string()))?;

        let mut login = client
            .matrix_auth()
            .login_username(&request.user, &request.password);
        if let Some(device_display_name) = &request.device_display_name {
            login = login.initial_device_display_name(device_display_name);
        }

        let response = login
            .send()
            .await
            .map_err(|e| PuppetError::Login(e.to_string()))?;

        let homeserver_url = response
            .well_known
            .map(|well_known| normalize_base_url(&well_known.homeserver.base_url).to_owned());
        debug!(
            "logged in as {} with device {}, advertised homeserver {:?}",
            response.user_id, response.device_id, homeserver_url
        );

        Ok(LoginOutcome {
            user_id: response.user_id.to_string(),
            access_token: response.access_token,
            device_id: response.device_id.to_string(),
            homeserver_url,
        })
    }
}
