//! Routing of Matrix events to the registry and the bridging application.
//!
//! This module provides the [`EventRouter`]. Installed on a Matrix SDK client,
//! it converts room member state events and receipt events into
//! [`RoutedEvent`]s and dispatches each kind to its handler:
//!
//! | Event | Handler effect |
//! |-------|----------------|
//! | [`RoutedEvent::Membership`] | overwrite the room's member list |
//! | [`RoutedEvent::Receipt`] | forward the puppet's own read receipt to the bound third-party conversation |
//!
//! # Arming
//!
//! The router starts unarmed. [`EventRouter::set_app`] arms it with a weak
//! reference to the application; a later call re-arms it with another one.
//! While unarmed, or once the application has been dropped, the registry is
//! still updated but nothing is forwarded.

use std::sync::{Arc, Weak};

use log::{debug, info, trace, warn};
use matrix_sdk::{
    Client, Room, RoomMemberships,
    ruma::{
        OwnedUserId, UserId,
        events::{
            SyncEphemeralRoomEvent,
            receipt::{ReceiptEventContent, ReceiptType},
            room::member::SyncRoomMemberEvent,
        },
    },
};
use tokio::sync::RwLock;

use crate::bridge::{RoomRegistry, ThirdPartyApp};

/// Event forwarded by the Matrix SDK handlers to the router.
#[derive(Debug, Clone)]
pub enum RoutedEvent {
    /// Full member list of a room after a membership state change
    Membership {
        /// Matrix room id
        room_id: String,
        /// Every current member of the room
        members: Vec<String>,
    },
    /// Receipts received in a room
    Receipt {
        /// Matrix room id
        room_id: String,
        /// Event id -> receipt type -> user id -> receipt
        content: ReceiptEventContent,
    },
}

/// Whether an application is attached.
enum AppSlot {
    /// No application attached yet
    Unarmed,
    /// Weak reference to the attached application
    Armed(Weak<dyn ThirdPartyApp>),
}

/// Dispatches Matrix events to the [`RoomRegistry`] and the [`ThirdPartyApp`].
///
/// Cloning is cheap; clones share the registry and the application slot.
///
/// # Fields
///
/// * `own_user_id` - The puppet, the only user whose receipts are forwarded
/// * `registry` - Member lists and third-party bindings
/// * `app` - The attached application, if any
#[derive(Clone)]
pub struct EventRouter {
    /// User id of the puppet, whose read receipts are mirrored
    own_user_id: OwnedUserId,
    /// Registry updated by the handlers
    registry: RoomRegistry,
    /// Attached application
    app: Arc<RwLock<AppSlot>>,
}

impl EventRouter {
    /// Creates an unarmed router for the puppet `own_user_id`.
    ///
    /// # Arguments
    ///
    /// * `own_user_id` - User id of the puppet, as confirmed by the homeserver
    /// * `registry` - Registry updated by membership events and consulted on receipts
    pub fn new(own_user_id: OwnedUserId, registry: RoomRegistry) -> Self {
        EventRouter {
            own_user_id,
            registry,
            app: Arc::new(RwLock::new(AppSlot::Unarmed)),
        }
    }

    /// Attaches `app`, replacing any previously attached application.
    pub async fn set_app(&self, app: &Arc<dyn ThirdPartyApp>) {
        *self.app.write().await = AppSlot::Armed(Arc::downgrade(app));
        info!("bridging application attached");
    }

    /// Whether an application is attached and still alive.
    pub async fn is_armed(&self) -> bool {
        self.app().await.is_some()
    }

    /// Registers the Matrix SDK event handlers feeding this router.
    ///
    /// # Arguments
    ///
    /// * `client` - The client whose sync responses feed the router
    pub fn install(&self, client: &Client) {
        client.add_event_handler({
            let router = self.clone();
            move |_event: SyncRoomMemberEvent, room: Room| {
                let router = router.clone();
                async move { router.on_room_member_event(room).await }
            }
        });

        client.add_event_handler({
            let router = self.clone();
            move |event: SyncEphemeralRoomEvent<ReceiptEventContent>, room: Room| {
                let router = router.clone();
                async move {
                    router
                        .dispatch(RoutedEvent::Receipt {
                            room_id: room.room_id().to_string(),
                            content: event.content,
                        })
                        .await
                }
            }
        });

        debug!("event handlers installed");
    }

    /// Handles one event.
    pub async fn dispatch(&self, event: RoutedEvent) {
        match event {
            RoutedEvent::Membership { room_id, members } => {
                self.on_membership(&room_id, members).await
            }
            RoutedEvent::Receipt { room_id, content } => {
                self.on_receipt(&room_id, &content).await;
            }
        }
    }

    /// Reads the current member list of `room` from the SDK state store.
    ///
    /// The store yields members in no stable order, so ids are sorted.
    async fn on_room_member_event(&self, room: Room) {
        let members = match room
            .members_no_sync(RoomMemberships::JOIN | RoomMemberships::INVITE)
            .await
        {
            Ok(members) => members,
            Err(e) => {
                warn!("failed to read members of {}: {:?}", room.room_id(), e);
                return;
            }
        };

        let mut member_ids: Vec<String> = members
            .iter()
            .map(|member| member.user_id().to_string())
            .collect();
        member_ids.sort();

        self.dispatch(RoutedEvent::Membership {
            room_id: room.room_id().to_string(),
            members: member_ids,
        })
        .await
    }

    async fn on_membership(&self, room_id: &str, members: Vec<String>) {
        debug!("membership of {} updated: {} members", room_id, members.len());
        self.registry.replace_members(room_id, members).await;
    }

    /// Forwards the puppet's read receipt; returns whether a call was made.
    ///
    /// At most one call is made per receipt event.
    async fn on_receipt(&self, room_id: &str, content: &ReceiptEventContent) -> bool {
        let Some(third_party_room_id) = self.registry.third_party_room_id(room_id).await else {
            trace!("ignore receipt in unbound room {}", room_id);
            return false;
        };

        if !is_read_by(content, &self.own_user_id) {
            return false;
        }

        let Some(app) = self.app().await else {
            debug!(
                "no application attached, read receipt in {} not forwarded",
                room_id
            );
            return false;
        };

        debug!(
            "forward read receipt of {} to third-party room {}",
            room_id, third_party_room_id
        );
        tokio::spawn(
            app.send_read_receipt_as_puppet_to_third_party_room_with_id(&third_party_room_id),
        );
        true
    }

    /// Returns the attached application if it is still alive.
    async fn app(&self) -> Option<Arc<dyn ThirdPartyApp>> {
        match &*self.app.read().await {
            AppSlot::Armed(app) => app.upgrade(),
            AppSlot::Unarmed => None,
        }
    }
}

/// Whether `user_id` acknowledged any event of `content` with `m.read`.
fn is_read_by(content: &ReceiptEventContent, user_id: &UserId) -> bool {
    content.0.values().any(|receipts| {
        receipts
            .get(&ReceiptType::Read)
            .is_some_and(|users| users.contains_key(user_id))
    })
}
