//! Puppet session lifecycle.
//!
//! This module provides [`PuppetSession`], the live connection of the
//! puppeted account. Starting a session:
//! 1. Checks the access token with `whoami`, learning the device id
//! 2. Builds a Matrix SDK client bound to the homeserver
//! 3. Restores the session from the access token
//! 4. Installs the [`EventRouter`] handlers
//! 5. Spawns the sync loop and waits for the initial sync
//!
//! The bridging application never observes an event before the initial room
//! and membership snapshot is available, because [`PuppetSession::start`]
//! only returns once the first sync response has been processed.

use std::{path::PathBuf, sync::Arc};

use log::{debug, info, warn};
use matrix_sdk::{
    Client, SessionMeta, SessionTokens,
    authentication::matrix::MatrixSession,
    ruma::{OwnedDeviceId, OwnedUserId},
};
use tokio::sync::watch;

use crate::{
    bridge::{EventRouter, RoomRegistry, ThirdPartyApp},
    credentials::Credentials,
    error::PuppetError,
    matrix::{
        requester::HomeserverRequester,
        sync::{SyncGate, SyncState, spawn_sync_loop},
    },
};

/// Options of [`PuppetSession::start`].
#[derive(Debug, Clone, Default)]
pub struct SessionOptions {
    /// Directory of the SQLite state store. State is kept in memory when `None`.
    pub store_path: Option<PathBuf>,
}

/// Live session of the puppeted account.
///
/// Holds the room registry and the event router installed on the Matrix SDK
/// client. The client itself lives in the background sync task, which runs
/// for as long as the process does.
///
/// # Fields
///
/// * `user_id` - The puppet, as confirmed by the homeserver
/// * `router` - Router installed on the client
/// * `registry` - Rooms seen by the router
/// * `sync_state` - Follows the background sync
pub struct PuppetSession {
    /// User id confirmed by the homeserver
    user_id: OwnedUserId,
    /// Router installed on the client
    router: EventRouter,
    /// Rooms seen by the router
    registry: RoomRegistry,
    /// Sync state followed by [`PuppetSession::sync_state`]
    sync_state: watch::Receiver<SyncState>,
}

impl PuppetSession {
    /// Opens the puppet session and waits for the initial sync.
    ///
    /// This never times out. Callers needing a bound wrap the call with
    /// [`tokio::time::timeout`].
    ///
    /// # Errors
    ///
    /// Returns an error if:
    /// - The token is rejected or the homeserver unreachable ([`PuppetError::Connection`])
    /// - The user id is malformed ([`PuppetError::InvalidIdentifier`])
    /// - The sync loop stops before the initial sync completes ([`PuppetError::Sync`])
    ///
    /// # Examples
    ///
    /// ```no_run
    /// use matrix_puppet::{Credentials, PuppetSession, SessionOptions};
    ///
    /// # async fn example() -> Result<(), matrix_puppet::PuppetError> {
    /// let credentials = Credentials {
    ///     homeserver_url: "https://matrix.example.org".to_string(),
    ///     user_id: "@alice:example.org".to_string(),
    ///     access_token: "token".to_string(),
    /// };
    /// let session = PuppetSession::start(&credentials, SessionOptions::default()).await?;
    /// println!("members: {:?}", session.get_members("!room:example.org").await);
    /// # Ok(())
    /// # }
    /// ```
    pub async fn start(
        credentials: &Credentials,
        options: SessionOptions,
    ) -> Result<PuppetSession, PuppetError> {
        info!(
            "starting puppet session for {} on {}",
            credentials.user_id, credentials.homeserver_url
        );

        let (user_id, device_id) = probe_token(&HomeserverRequester::new(), credentials).await?;

        let client = build_client(&credentials.homeserver_url, &options).await?;
        client
            .restore_session(MatrixSession {
                meta: SessionMeta {
                    user_id: user_id.clone(),
                    device_id,
                },
                tokens: SessionTokens {
                    access_token: credentials.access_token.clone(),
                    refresh_token: None,
                },
            })
            .await
            .map_err(|e| PuppetError::Connection(e.to_string()))?;
        debug!("matrix session restored");

        let registry = RoomRegistry::new();
        let router = EventRouter::new(user_id.clone(), registry.clone());
        router.install(&client);

        let gate = SyncGate::new();
        let sync_state = gate.subscribe();
        spawn_sync_loop(client, gate.clone());

        gate.wait_until_ready().await?;
        info!("puppet session ready for {}", user_id);

        Ok(PuppetSession {
            user_id,
            router,
            registry,
            sync_state,
        })
    }

    /// Attaches the bridging application, arming receipt forwarding.
    ///
    /// Only a weak reference is kept; dropping the application disarms the router.
    pub async fn set_app(&self, app: &Arc<dyn ThirdPartyApp>) {
        self.router.set_app(app).await;
    }

    /// Binds a Matrix room to a conversation of the third-party network.
    pub async fn bind_third_party_room(&self, room_id: &str, third_party_room_id: &str) {
        self.registry
            .bind_third_party_room(room_id, third_party_room_id)
            .await;
    }

    /// Returns the members of a room, empty for unknown rooms.
    pub async fn get_members(&self, room_id: &str) -> Vec<String> {
        self.registry.get_members(room_id).await
    }

    /// Returns the user id of the puppet.
    pub fn user_id(&self) -> &str {
        self.user_id.as_str()
    }

    /// Returns a receiver following the sync state.
    pub fn sync_state(&self) -> watch::Receiver<SyncState> {
        self.sync_state.clone()
    }
}

/// Checks the access token and returns the user and device it belongs to.
///
/// The homeserver-confirmed user id wins over the configured one.
async fn probe_token(
    requester: &HomeserverRequester,
    credentials: &Credentials,
) -> Result<(OwnedUserId, OwnedDeviceId), PuppetError> {
    let whoami = requester
        .whoami(&credentials.homeserver_url, &credentials.access_token)
        .await?;

    if whoami.user_id != credentials.user_id {
        warn!(
            "access token belongs to {}, not {}",
            whoami.user_id, credentials.user_id
        );
    }

    let user_id = OwnedUserId::try_from(whoami.user_id.as_str())
        .map_err(|_| PuppetError::InvalidIdentifier(whoami.user_id.clone()))?;
    let Some(device_id) = whoami.device_id else {
        return Err(PuppetError::Connection(format!(
            "no device bound to the access token of {}",
            user_id
        )));
    };

    Ok((user_id, device_id.into()))
}

/// Builds a client for `homeserver_url`, optionally backed by a SQLite store.
async fn build_client(
    homeserver_url: &str,
    options: &SessionOptions,
) -> Result<Client, PuppetError> {
    let mut builder = Client::builder().homeserver_url(homeserver_url);
    if let Some(store_path) = &options.store_path {
        debug!("sqlite store at {}", store_path.display());
        builder = builder.sqlite_store(store_path, None);
    }

    let client = builder
        .build()
        .await
        .map_err(|e| PuppetError::Connection(e.to_string()))?;
    debug!("matrix client created");

    Ok(client)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bridge::MockThirdPartyApp;
    use futures::FutureExt;
    use serde_json::json;
    use std::time::Duration;
    use tokio::time::timeout;

    /// Sync response with two joined members and a read receipt of the puppet.
    fn sync_body() -> String {
        let member = |user_id: &str, event_id: &str| {
            json!({
                "type": "m.room.member",
                "state_key": user_id,
                "sender": user_id,
                "event_id": event_id,
                "origin_server_ts": 1,
                "content": { "membership": "join" }
            })
        };

        json!({
            "next_batch": "s1",
            "rooms": {
                "join": {
                    "!r:b.com": {
                        "state": {
                            "events": [member("@x:b.com", "$m1:b.com"), member("@a:b.com", "$m2:b.com")]
                        },
                        "timeline": { "events": [], "limited": false },
                        "ephemeral": {
                            "events": [{
                                "type": "m.receipt",
                                "content": { "$ev:b.com": { "m.read": { "@a:b.com": { "ts": 1 } } } }
                            }]
                        }
                    }
                }
            }
        })
        .to_string()
    }

    async fn homeserver() -> mockito::ServerGuard {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("GET", "/_matrix/client/v3/account/whoami")
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(r#"{"user_id": "@a:b.com", "device_id": "DEVICE"}"#)
            .create_async()
            .await;
        server
            .mock("GET", "/_matrix/client/versions")
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(r#"{"versions": ["v1.11"]}"#)
            .create_async()
            .await;
        server
            .mock("GET", "/_matrix/client/v3/sync")
            .match_query(mockito::Matcher::Any)
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(sync_body())
            .create_async()
            .await;
        server
    }

    fn credentials(homeserver_url: String) -> Credentials {
        Credentials {
            homeserver_url,
            user_id: "@a:b.com".to_owned(),
            access_token: "tok".to_owned(),
        }
    }

    #[tokio::test]
    async fn test_probe_token() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("GET", "/_matrix/client/v3/account/whoami")
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(r#"{"user_id": "@a:b.com", "device_id": "DEVICE"}"#)
            .create_async()
            .await;

        let (user_id, device_id) =
            probe_token(&HomeserverRequester::new(), &credentials(server.url()))
                .await
                .unwrap();

        assert_eq!(user_id.as_str(), "@a:b.com");
        assert_eq!(device_id.as_str(), "DEVICE");
    }

    #[tokio::test]
    async fn test_probe_token_prefers_server_user_id() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("GET", "/_matrix/client/v3/account/whoami")
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(r#"{"user_id": "@real:b.com", "device_id": "DEVICE"}"#)
            .create_async()
            .await;

        let (user_id, _) = probe_token(&HomeserverRequester::new(), &credentials(server.url()))
            .await
            .unwrap();

        assert_eq!(user_id.as_str(), "@real:b.com");
    }

    #[tokio::test]
    async fn test_probe_token_without_device() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("GET", "/_matrix/client/v3/account/whoami")
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(r#"{"user_id": "@a:b.com"}"#)
            .create_async()
            .await;

        let result = probe_token(&HomeserverRequester::new(), &credentials(server.url())).await;

        assert!(matches!(result, Err(PuppetError::Connection(_))));
    }

    #[tokio::test]
    async fn test_start_with_rejected_token() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("GET", "/_matrix/client/v3/account/whoami")
            .with_status(401)
            .with_header("content-type", "application/json")
            .with_body(r#"{"errcode": "M_UNKNOWN_TOKEN", "error": "Invalid access token"}"#)
            .create_async()
            .await;

        let result =
            PuppetSession::start(&credentials(server.url()), SessionOptions::default()).await;

        assert!(matches!(result, Err(PuppetError::Connection(_))));
    }

    #[tokio::test]
    async fn test_start_waits_for_initial_sync() {
        let server = homeserver().await;

        let session = timeout(
            Duration::from_secs(10),
            PuppetSession::start(&credentials(server.url()), SessionOptions::default()),
        )
        .await
        .unwrap()
        .unwrap();

        // Members are known as soon as start returns
        assert_eq!(session.user_id(), "@a:b.com");
        assert_eq!(*session.sync_state().borrow(), SyncState::Ready);
        assert_eq!(
            session.get_members("!r:b.com").await,
            vec!["@a:b.com", "@x:b.com"]
        );
        assert!(session.get_members("!unknown:b.com").await.is_empty());
    }

    #[tokio::test]
    async fn test_receipts_forwarded_once_app_is_set() {
        let server = homeserver().await;
        let session = timeout(
            Duration::from_secs(10),
            PuppetSession::start(&credentials(server.url()), SessionOptions::default()),
        )
        .await
        .unwrap()
        .unwrap();

        let (sender, mut receiver) = tokio::sync::mpsc::unbounded_channel();
        let mut app = MockThirdPartyApp::new();
        app.expect_send_read_receipt_as_puppet_to_third_party_room_with_id()
            .with(mockall::predicate::eq("chat-1"))
            .returning(move |third_party_room_id| {
                let _ = sender.send(third_party_room_id.to_owned());
                futures::future::ready(()).boxed()
            });
        let app: Arc<dyn ThirdPartyApp> = Arc::new(app);

        session.bind_third_party_room("!r:b.com", "chat-1").await;
        session.set_app(&app).await;

        // The next sync response carries the puppet's receipt again
        let forwarded = timeout(Duration::from_secs(10), receiver.recv())
            .await
            .unwrap();
        assert_eq!(forwarded.as_deref(), Some("chat-1"));
    }
}
