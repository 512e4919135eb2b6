//! Matrix protocol integration for the puppet.
//!
//! This module covers everything that talks to the homeserver:
//! - Homeserver discovery and token probing over plain HTTP
//! - Password login through the Matrix SDK
//! - The live puppet session and its background sync
//!
//! # Architecture
//!
//! The module is structured around [`PuppetSession`] which coordinates:
//! - **Requester**: well-known discovery, `/versions` validation and `whoami`
//! - **Login**: password login behind the [`Authenticator`] seam
//! - **Sync**: the background sync loop and the [`SyncGate`] readiness signal
//!
//! # Examples
//!
//! ```no_run
//! use matrix_puppet::matrix::{Discovery, HomeserverRequester};
//!
//! # async fn example() -> Result<(), matrix_puppet::PuppetError> {
//! let requester = HomeserverRequester::new();
//! let homeserver_url = requester.discover("example.org").await?;
//! println!("homeserver: {}", homeserver_url);
//! # Ok(())
//! # }
//! ```

pub mod login;
pub mod requester;
pub mod response_structs;
pub mod session;
pub mod sync;

pub use crate::matrix::login::{Authenticator, LoginOutcome, LoginRequest, MatrixAuthenticator};
pub use crate::matrix::requester::{Discovery, HomeserverRequester};
pub use crate::matrix::session::{PuppetSession, SessionOptions};
pub use crate::matrix::sync::{SyncGate, SyncState};

#[cfg(test)]
pub use crate::matrix::login::MockAuthenticator;
#[cfg(test)]
pub use crate::matrix::requester::MockDiscovery;
