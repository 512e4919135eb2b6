//! Bridge-facing side of the puppet session.
//!
//! This module connects the live Matrix session to the bridging application:
//!
//! - [`RoomRegistry`] keeps room members and the bindings between Matrix rooms
//!   and third-party conversations
//! - [`EventRouter`] turns Matrix events into registry updates and, once an
//!   application is attached, into calls on [`ThirdPartyApp`]
//!
//! # Flow
//!
//! ```text
//! m.room.member ──▶ EventRouter ──▶ RoomRegistry (members overwritten)
//! m.receipt     ──▶ EventRouter ──▶ RoomRegistry (binding lookup)
//!                                       │
//!                                       ▼
//!                          ThirdPartyApp::send_read_receipt_…
//! ```

mod registry;
mod router;

pub use crate::bridge::registry::RoomRegistry;
pub use crate::bridge::router::{EventRouter, RoutedEvent};

use futures::future::BoxFuture;
use mockall::automock;

/// The bridging application, as seen by the puppet core.
///
/// The router only holds a weak reference to it and never awaits the returned
/// future: it is spawned and left to run.
#[automock]
pub trait ThirdPartyApp: Send + Sync {
    /// Mirrors a read receipt of the puppet to a third-party conversation.
    fn send_read_receipt_as_puppet_to_third_party_room_with_id(
        &self,
        third_party_room_id: &str,
    ) -> BoxFuture<'static, ()>;
}
