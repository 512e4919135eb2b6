//! Matrix puppet - a single puppeted Matrix session for a bridge process.
//!
//! This crate manages the Matrix account puppeted by a bridge: it resolves
//! the account credentials, opens a session, waits for the initial sync and
//! routes membership and read-receipt events to the bridging application.
//!
//! # Overview
//!
//! A bridge goes through two flows:
//!
//! 1. **Association** (once): missing credentials are completed by prompting
//!    the operator, discovering the homeserver from the user id and logging in
//!    with a password. The result is written back to the config file.
//! 2. **Startup** (every run): persisted credentials open a [`PuppetSession`]
//!    which returns once the initial sync is processed.
//!
//! # Configuration
//!
//! ```json
//! {
//!   "puppet": { "id": "@alice:example.org", "token": "syt_..." },
//!   "bridge": { "homeserverUrl": "https://matrix.example.org" }
//! }
//! ```
//!
//! # Architecture
//!
//! - [`association`] - The association flow, persisting or printing new credentials
//! - [`bridge`] - Room registry and event routing towards the bridging application
//! - [`config`] - Config file, config store and appservice registration
//! - [`credentials`] - Credentials, identifier parsing and the staged resolver
//! - [`error`] - The [`PuppetError`] taxonomy
//! - [`matrix`] - Discovery, login, session and sync
//!
//! # Examples
//!
//! ```no_run
//! use matrix_puppet::{Credentials, PuppetSession, SessionOptions};
//!
//! # async fn example() -> Result<(), matrix_puppet::PuppetError> {
//! let credentials = Credentials {
//!     homeserver_url: "https://matrix.example.org".to_string(),
//!     user_id: "@alice:example.org".to_string(),
//!     access_token: "syt_...".to_string(),
//! };
//!
//! let session = PuppetSession::start(&credentials, SessionOptions::default()).await?;
//! session.bind_third_party_room("!room:example.org", "chat-42").await;
//! # Ok(())
//! # }
//! ```

#![recursion_limit = "256"]

pub mod association;
pub mod bridge;
pub mod config;
pub mod credentials;
pub mod error;
pub mod matrix;

pub use crate::bridge::ThirdPartyApp;
pub use crate::credentials::Credentials;
pub use crate::error::PuppetError;
pub use crate::matrix::{PuppetSession, SessionOptions};
