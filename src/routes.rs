//! Built-in endpoints served by the `ws-dispatch` binary
//!
//! - `/echo` sends every text and binary message back to its sender
//! - `/rooms/{room}?name=...` relays text messages to everyone in the room

use std::collections::HashMap;
use std::sync::Arc;

use dashmap::DashMap;
use thiserror::Error;
use tracing::{debug, info};

use crate::session::{ConnectionId, WsConnection};
use crate::ws::{WsContext, WsExceptionMapper, WsHandler, WsPathMatcher};

/// Close status for requests that break endpoint rules
pub const POLICY_VIOLATION: u16 = 1008;

/// A room was joined without the `name` query parameter
#[derive(Debug, Error)]
#[error("A name query parameter is required to join room {room}")]
pub struct MissingName {
    pub room: String,
}

/// Members of every open room
#[derive(Debug, Default)]
pub struct RoomHub {
    rooms: DashMap<String, HashMap<ConnectionId, WsConnection>>,
}

impl RoomHub {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn join(&self, room: &str, connection: &WsConnection) {
        self.rooms
            .entry(room.to_string())
            .or_default()
            .insert(connection.id(), connection.clone());
    }

    /// Leave a room, dropping the room once it is empty
    ///
    /// Returns whether the connection was a member.
    pub fn leave(&self, room: &str, connection: &WsConnection) -> bool {
        let removed = match self.rooms.get_mut(room) {
            Some(mut members) => members.remove(&connection.id()).is_some(),
            None => false,
        };
        self.rooms.remove_if(room, |_, members| members.is_empty());
        removed
    }

    pub fn contains(&self, room: &str, connection: &WsConnection) -> bool {
        self.rooms
            .get(room)
            .is_some_and(|members| members.contains_key(&connection.id()))
    }

    /// Send text to every member; returns how many members accepted it
    pub fn broadcast(&self, room: &str, text: &str) -> usize {
        let Some(members) = self.rooms.get(room) else {
            return 0;
        };
        members
            .values()
            .filter(|member| member.send(text).is_ok())
            .count()
    }

    pub fn member_count(&self, room: &str) -> usize {
        self.rooms.get(room).map_or(0, |members| members.len())
    }

    pub fn room_count(&self) -> usize {
        self.rooms.len()
    }
}

fn room_of(ctx: &impl WsContext) -> String {
    ctx.path_param("room").unwrap_or_default().to_string()
}

fn name_of(ctx: &impl WsContext) -> String {
    ctx.query_param("name").unwrap_or_default().to_string()
}

fn echo_handler() -> WsHandler {
    WsHandler::new()
        .on_message(|ctx| {
            ctx.send(ctx.message().to_string())?;
            Ok(())
        })
        .on_binary_message(|ctx| {
            ctx.send_binary(ctx.payload().to_vec())?;
            Ok(())
        })
}

/// Rejects room connections that do not say who they are
fn require_name() -> WsHandler {
    WsHandler::new().on_connect(|ctx| {
        if ctx.query_param("name").is_some_and(|name| !name.is_empty()) {
            return Ok(());
        }
        Err(MissingName {
            room: room_of(ctx),
        }
        .into())
    })
}

fn room_handler(hub: Arc<RoomHub>) -> WsHandler {
    let joining = Arc::clone(&hub);
    let relaying = Arc::clone(&hub);
    let leaving = hub;

    WsHandler::new()
        .on_connect(move |ctx| {
            let (room, name) = (room_of(ctx), name_of(ctx));
            joining.join(&room, ctx.connection());
            info!(%room, %name, members = joining.member_count(&room), "Joined room");
            joining.broadcast(&room, &format!("{} joined", name));
            Ok(())
        })
        .on_message(move |ctx| {
            let room = room_of(ctx);
            if !relaying.contains(&room, ctx.connection()) {
                debug!(
                    %room,
                    connection = %ctx.connection().id(),
                    "Dropped message from non-member"
                );
                return Ok(());
            }
            let line = format!("{}: {}", name_of(ctx), ctx.message());
            let delivered = relaying.broadcast(&room, &line);
            debug!(%room, delivered, "Relayed room message");
            Ok(())
        })
        .on_close(move |ctx| {
            let (room, name) = (room_of(ctx), name_of(ctx));
            if leaving.leave(&room, ctx.connection()) {
                leaving.broadcast(&room, &format!("{} left", name));
            }
            Ok(())
        })
}

/// Register the built-in endpoints
pub fn build_matcher(hub: Arc<RoomHub>) -> WsPathMatcher {
    WsPathMatcher::new()
        .ws_before("/rooms/{room}", require_name())
        .ws("/echo", echo_handler())
        .ws("/rooms/{room}", room_handler(hub))
}

/// Exception mapper for the built-in endpoints
pub fn exception_mapper() -> WsExceptionMapper {
    WsExceptionMapper::new().on::<MissingName, _>(|err, ctx| {
        let _ = ctx.connection().close(POLICY_VIOLATION, err.to_string());
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::sync::mpsc;
    use tokio_tungstenite::tungstenite::Message;

    use crate::ws::{path_params, HandlerType, WsHandlerController};

    fn setup() -> (WsHandlerController, Arc<RoomHub>) {
        let hub = Arc::new(RoomHub::new());
        let controller = WsHandlerController::new(
            Arc::new(build_matcher(Arc::clone(&hub))),
            Arc::new(exception_mapper()),
        );
        (controller, hub)
    }

    /// Build a connection the way the transport does after upgrade
    fn connect(
        controller: &WsHandlerController,
        uri: &str,
    ) -> (WsConnection, mpsc::UnboundedReceiver<Message>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let path = uri.split('?').next().unwrap_or(uri);
        let params = path_params("/rooms/{room}", path).unwrap_or_default();
        let conn = WsConnection::new(uri, tx).with_path_params(params);
        controller.on_connect(&conn).unwrap();
        (conn, rx)
    }

    fn drain(rx: &mut mpsc::UnboundedReceiver<Message>) -> Vec<Message> {
        let mut messages = Vec::new();
        while let Ok(message) = rx.try_recv() {
            messages.push(message);
        }
        messages
    }

    #[test]
    fn test_builtin_routes_registered() {
        let matcher = build_matcher(Arc::new(RoomHub::new()));
        assert_eq!(matcher.entry_count(HandlerType::Endpoint), 2);
        assert_eq!(matcher.entry_count(HandlerType::Before), 1);
        assert_eq!(matcher.entry_count(HandlerType::After), 0);
        assert_eq!(exception_mapper().callback_count(), 1);
    }

    #[test]
    fn test_echo_text_and_binary() {
        let (controller, _hub) = setup();
        let (conn, mut rx) = connect(&controller, "/echo");

        controller.on_message(&conn, "hello".to_string()).unwrap();
        controller
            .on_binary_message(&conn, vec![9, 1, 2, 3, 9], 1, 3)
            .unwrap();

        assert_eq!(
            drain(&mut rx),
            vec![Message::Text("hello".to_string()), Message::Binary(vec![1, 2, 3])]
        );
    }

    #[test]
    fn test_room_relay() {
        let (controller, hub) = setup();
        let (alice, mut alice_rx) = connect(&controller, "/rooms/5?name=alice");
        let (bob, mut bob_rx) = connect(&controller, "/rooms/5?name=bob");
        assert_eq!(hub.member_count("5"), 2);
        drain(&mut alice_rx);
        drain(&mut bob_rx);

        controller.on_message(&alice, "hi".to_string()).unwrap();
        assert_eq!(drain(&mut bob_rx), vec![Message::Text("alice: hi".to_string())]);
        assert_eq!(drain(&mut alice_rx), vec![Message::Text("alice: hi".to_string())]);

        controller.on_close(&bob, 1000, None).unwrap();
        assert_eq!(hub.member_count("5"), 1);
        assert_eq!(drain(&mut alice_rx), vec![Message::Text("bob left".to_string())]);

        controller.on_close(&alice, 1000, None).unwrap();
        assert_eq!(hub.room_count(), 0);
        assert!(controller.sessions().is_empty());
    }

    #[test]
    fn test_room_without_name_is_closed() {
        let (controller, hub) = setup();
        let (_conn, mut rx) = connect(&controller, "/rooms/7");

        match drain(&mut rx).as_slice() {
            [Message::Close(Some(frame))] => {
                assert_eq!(u16::from(frame.code), POLICY_VIOLATION);
                assert_eq!(frame.reason, "A name query parameter is required to join room 7");
            }
            other => panic!("Expected a single close frame, got {:?}", other),
        }
        assert_eq!(hub.member_count("7"), 0);
    }

    #[test]
    fn test_rejected_client_cannot_post_to_room() {
        let (controller, hub) = setup();
        let (_alice, mut alice_rx) = connect(&controller, "/rooms/7?name=alice");
        let (anon, mut anon_rx) = connect(&controller, "/rooms/7");
        drain(&mut alice_rx);
        drain(&mut anon_rx);
        assert!(!hub.contains("7", &anon));

        controller.on_message(&anon, "spam".to_string()).unwrap();
        controller.on_close(&anon, POLICY_VIOLATION, None).unwrap();

        assert!(drain(&mut alice_rx).is_empty());
        assert_eq!(hub.member_count("7"), 1);
    }

    #[test]
    fn test_leave_reports_membership() {
        let hub = RoomHub::new();
        let (tx, _rx) = mpsc::unbounded_channel();
        let conn = WsConnection::new("/rooms/lobby", tx);

        assert!(!hub.leave("lobby", &conn));
        hub.join("lobby", &conn);
        assert!(hub.contains("lobby", &conn));
        assert!(hub.leave("lobby", &conn));
        assert!(!hub.contains("lobby", &conn));
        assert_eq!(hub.room_count(), 0);
    }

    #[test]
    fn test_broadcast_skips_closed_members() {
        let hub = RoomHub::new();
        let (open_tx, _open_rx) = mpsc::unbounded_channel();
        let (closed_tx, closed_rx) = mpsc::unbounded_channel();
        drop(closed_rx);

        hub.join("lobby", &WsConnection::new("/rooms/lobby", open_tx));
        hub.join("lobby", &WsConnection::new("/rooms/lobby", closed_tx));

        assert_eq!(hub.broadcast("lobby", "hello"), 1);
        assert_eq!(hub.broadcast("nowhere", "hello"), 0);
    }
}
