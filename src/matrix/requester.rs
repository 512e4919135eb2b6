//! HTTP client for the unauthenticated and token-probe homeserver endpoints.
//!
//! This module provides the [`HomeserverRequester`] struct, used for homeserver
//! auto-discovery (`/.well-known/matrix/client`) and for checking an access
//! token before a session is restored (`whoami`).

use log::{debug, info};
use mockall::automock;
use reqwest::{Client, Url};

use crate::{
    error::PuppetError,
    matrix::response_structs::{WellKnownResponse, WhoAmIResponse},
};

/// Finds the homeserver serving a domain.
#[automock]
pub trait Discovery {
    /// Returns the client-server API base URL advertised by `domain`.
    async fn discover(&self, domain: &str) -> Result<String, PuppetError>;
}

/// HTTP client for homeserver discovery and token checks.
///
/// # Examples
///
/// ```no_run
/// use matrix_puppet::matrix::{Discovery, HomeserverRequester};
///
/// # async fn example() -> Result<(), matrix_puppet::PuppetError> {
/// let requester = HomeserverRequester::new();
/// let homeserver_url = requester.discover("matrix.org").await?;
/// println!("homeserver: {homeserver_url}");
/// # Ok(())
/// # }
/// ```
#[derive(Clone)]
pub struct HomeserverRequester {
    /// Scheme used to reach well-known documents
    scheme: String,
    /// HTTP client
    client: Client,
}

impl HomeserverRequester {
    /// Create a new [HomeserverRequester] fetching well-known documents over HTTPS.
    pub fn new() -> Self {
        HomeserverRequester::with_scheme("https")
    }

    /// Create a new [HomeserverRequester] fetching well-known documents with `scheme`.
    ///
    /// Plain `http` is only meant for local test servers.
    pub fn with_scheme(scheme: &str) -> Self {
        HomeserverRequester {
            scheme: scheme.to_owned(),
            client: Client::new(),
        }
    }

    /// Request `/_matrix/client/v3/account/whoami` with the given access token.
    ///
    /// This api call returns the owner of the token:
    /// ```json
    /// { "user_id": "@alice:example.org", "device_id": "ABCDEFGH" }
    /// ```
    ///
    /// # Errors
    ///
    /// Returns [`PuppetError::Connection`] if the homeserver cannot be reached
    /// or rejects the token.
    pub async fn whoami(
        &self,
        homeserver_url: &str,
        access_token: &str,
    ) -> Result<WhoAmIResponse, PuppetError> {
        let url = format!(
            "{}/_matrix/client/v3/account/whoami",
            normalize_base_url(homeserver_url)
        );
        info!("check access token against {}", homeserver_url);
        debug!("request {}", &url);

        let response = self
            .client
            .get(&url)
            .bearer_auth(access_token)
            .send()
            .await
            .and_then(|r| r.error_for_status())
            .map_err(|e| PuppetError::Connection(e.to_string()))?;

        let whoami: WhoAmIResponse = response
            .json()
            .await
            .map_err(|e| PuppetError::Connection(e.to_string()))?;

        debug!("response from {} -> {}", &url, &whoami);

        Ok(whoami)
    }

    /// Checks that `base_url` answers `/_matrix/client/versions`.
    async fn check_versions(&self, base_url: &str) -> Result<(), PuppetError> {
        let url = format!("{}/_matrix/client/versions", base_url);
        debug!("request {}", &url);

        self.client
            .get(&url)
            .send()
            .await
            .and_then(|r| r.error_for_status())
            .map_err(|e| {
                PuppetError::Discovery(format!("{} is not a homeserver: {}", base_url, e))
            })?;

        Ok(())
    }
}

impl Default for HomeserverRequester {
    fn default() -> Self {
        Self::new()
    }
}

impl Discovery for HomeserverRequester {
    /// Request `/.well-known/matrix/client` on `domain`.
    ///
    /// This api call returns a json object advertising the homeserver:
    /// ```json
    /// { "m.homeserver": { "base_url": "https://matrix-client.example.org" } }
    /// ```
    /// The advertised base URL is validated by requesting its
    /// `/_matrix/client/versions` endpoint before being returned.
    async fn discover(&self, domain: &str) -> Result<String, PuppetError> {
        let url = format!("{}://{}/.well-known/matrix/client", self.scheme, domain);
        info!("discover homeserver of {}", domain);
        debug!("request {}", &url);

        let response = self
            .client
            .get(&url)
            .send()
            .await
            .map_err(|e| PuppetError::Discovery(e.to_string()))?;

        if !response.status().is_success() {
            return Err(PuppetError::Discovery(format!(
                "{} answered {}",
                url,
                response.status()
            )));
        }

        let well_known: WellKnownResponse = response
            .json()
            .await
            .map_err(|e| PuppetError::Discovery(format!("invalid discovery document: {}", e)))?;

        debug!("response from {} -> {}", &url, &well_known);

        let base_url = normalize_base_url(&well_known.homeserver.base_url);
        if !is_absolute_url(base_url) {
            return Err(PuppetError::Discovery(format!(
                "invalid base_url `{}`",
                base_url
            )));
        }

        self.check_versions(base_url).await?;

        info!("discovered homeserver {} for {}", base_url, domain);
        Ok(base_url.to_owned())
    }
}

/// Strips trailing slashes from a homeserver base URL.
pub fn normalize_base_url(url: &str) -> &str {
    url.trim_end_matches('/')
}

/// Whether `value` is an absolute `http` or `https` URL with a host.
pub fn is_absolute_url(value: &str) -> bool {
    Url::parse(value)
        .is_ok_and(|url| matches!(url.scheme(), "http" | "https") && url.has_host())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_discover() {
        let mut server = mockito::Server::new_async().await;
        let base_url = server.url();
        let body = format!(r#"{{"m.homeserver": {{"base_url": "{}/"}}}}"#, base_url);

        server
            .mock("GET", "/.well-known/matrix/client")
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(body)
            .create_async()
            .await;
        let versions = server
            .mock("GET", "/_matrix/client/versions")
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(r#"{"versions": ["v1.11"]}"#)
            .create_async()
            .await;

        let requester = HomeserverRequester::with_scheme("http");
        let homeserver_url = requester.discover(&server.host_with_port()).await.unwrap();

        // Trailing slash is removed
        assert_eq!(homeserver_url, base_url);
        versions.assert_async().await;
    }

    #[tokio::test]
    async fn test_discover_not_found() {
        let mut server = mockito::Server::new_async().await;

        server
            .mock("GET", "/.well-known/matrix/client")
            .with_status(404)
            .create_async()
            .await;

        let requester = HomeserverRequester::with_scheme("http");
        let result = requester.discover(&server.host_with_port()).await;

        assert!(matches!(result, Err(PuppetError::Discovery(_))));
    }

    #[tokio::test]
    async fn test_discover_invalid_document() {
        let mut server = mockito::Server::new_async().await;

        server
            .mock("GET", "/.well-known/matrix/client")
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(r#"{"m.identity_server": {}}"#)
            .create_async()
            .await;

        let requester = HomeserverRequester::with_scheme("http");
        let result = requester.discover(&server.host_with_port()).await;

        assert!(matches!(result, Err(PuppetError::Discovery(_))));
    }

    #[tokio::test]
    async fn test_discover_relative_base_url() {
        let mut server = mockito::Server::new_async().await;

        server
            .mock("GET", "/.well-known/matrix/client")
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(r#"{"m.homeserver": {"base_url": "matrix.example.org"}}"#)
            .create_async()
            .await;

        let requester = HomeserverRequester::with_scheme("http");
        let result = requester.discover(&server.host_with_port()).await;

        assert!(matches!(result, Err(PuppetError::Discovery(_))));
    }

    #[tokio::test]
    async fn test_discover_base_url_not_a_homeserver() {
        let mut server = mockito::Server::new_async().await;
        let body = format!(r#"{{"m.homeserver": {{"base_url": "{}"}}}}"#, server.url());

        server
            .mock("GET", "/.well-known/matrix/client")
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(body)
            .create_async()
            .await;
        server
            .mock("GET", "/_matrix/client/versions")
            .with_status(404)
            .create_async()
            .await;

        let requester = HomeserverRequester::with_scheme("http");
        let result = requester.discover(&server.host_with_port()).await;

        assert!(matches!(result, Err(PuppetError::Discovery(_))));
    }

    #[tokio::test]
    async fn test_whoami() {
        let mut server = mockito::Server::new_async().await;

        server
            .mock("GET", "/_matrix/client/v3/account/whoami")
            .match_header("authorization", "Bearer tok")
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(r#"{"user_id": "@a:b.com", "device_id": "DEVICE"}"#)
            .create_async()
            .await;

        let requester = HomeserverRequester::new();
        let whoami = requester.whoami(&server.url(), "tok").await.unwrap();

        assert_eq!(whoami.user_id, "@a:b.com");
        assert_eq!(whoami.device_id.as_deref(), Some("DEVICE"));
    }

    #[tokio::test]
    async fn test_whoami_rejected_token() {
        let mut server = mockito::Server::new_async().await;

        server
            .mock("GET", "/_matrix/client/v3/account/whoami")
            .with_status(401)
            .with_header("content-type", "application/json")
            .with_body(r#"{"errcode": "M_UNKNOWN_TOKEN", "error": "Invalid access token"}"#)
            .create_async()
            .await;

        let requester = HomeserverRequester::new();
        let result = requester.whoami(&server.url(), "bad").await;

        assert!(matches!(result, Err(PuppetError::Connection(_))));
    }

    #[test]
    fn test_is_absolute_url() {
        assert!(is_absolute_url("https://matrix.example.org"));
        assert!(is_absolute_url("http://localhost:8008"));
        assert!(!is_absolute_url("matrix.example.org"));
        assert!(!is_absolute_url("localhost:8008"));
        assert!(!is_absolute_url("ftp://example.org"));
        assert!(!is_absolute_url(""));
    }

    #[test]
    fn test_normalize_base_url() {
        assert_eq!(normalize_base_url("https://b.com/"), "https://b.com");
        assert_eq!(normalize_base_url("https://b.com//"), "https://b.com");
        assert_eq!(normalize_base_url("https://b.com"), "https://b.com");
    }
}
