use super::*;
use serde_json::json;
use shared::domain::{ChatId, MessageId};
use uuid::Uuid;

const ME: u128 = 1;
const OTHER: u128 = 2;

fn current_user() -> UserId {
    UserId(Uuid::from_u128(ME))
}

fn dispatcher() -> Dispatcher {
    Dispatcher::new(current_user())
}

fn frame(event: &str, data: serde_json::Value) -> StreamFrame {
    StreamFrame {
        event: event.to_string(),
        data: data.to_string(),
    }
}

fn message_json(author: u128) -> serde_json::Value {
    json!({
        "id": Uuid::from_u128(100).to_string(),
        "user_id": Uuid::from_u128(author).to_string(),
        "chat_id": Uuid::from_u128(10).to_string(),
        "message_type": "text",
        "content": "hello",
        "created_at": "2025-01-10T12:00:00Z",
        "updated_at": "2025-01-10T12:00:00Z",
        "is_deleted": false,
        "reactions": [],
    })
}

#[test]
fn new_message_from_self_is_suppressed() {
    let routed = dispatcher()
        .route(&frame("new_message", message_json(ME)))
        .unwrap();
    assert_eq!(routed, None);
}

#[test]
fn new_message_from_another_user_is_routed() {
    let routed = dispatcher()
        .route(&frame("new_message", message_json(OTHER)))
        .unwrap();
    match routed {
        Some(Routed::Message {
            action: MessageAction::New,
            message,
        }) => assert_eq!(message.content.as_deref(), Some("hello")),
        other => panic!("unexpected routing: {other:?}"),
    }
}

#[test]
fn update_and_typing_from_self_are_suppressed() {
    let d = dispatcher();
    assert_eq!(d.route(&frame("update_message", message_json(ME))).unwrap(), None);

    let typing = json!({
        "user_id": Uuid::from_u128(ME).to_string(),
        "username": "me",
        "is_typing": true,
    });
    assert_eq!(d.route(&frame("user_typing", typing)).unwrap(), None);
}

#[test]
fn forward_message_has_no_self_filter() {
    let routed = dispatcher()
        .route(&frame("forward_message", message_json(ME)))
        .unwrap();
    assert!(matches!(
        routed,
        Some(Routed::Message {
            action: MessageAction::Forward,
            ..
        })
    ));
}

#[test]
fn delete_and_recover_are_routed() {
    let d = dispatcher();
    let deleted = d
        .route(&frame(
            "delete_message",
            json!({ "id": Uuid::from_u128(100).to_string() }),
        ))
        .unwrap();
    assert_eq!(
        deleted,
        Some(Routed::MessageDeleted(MessageDeleted {
            id: MessageId(Uuid::from_u128(100)),
        }))
    );

    let recovered = d.route(&frame("recover_message", message_json(ME))).unwrap();
    assert!(matches!(
        recovered,
        Some(Routed::Message {
            action: MessageAction::Recover,
            ..
        })
    ));
}

#[test]
fn read_status_and_reactions_are_author_agnostic() {
    let d = dispatcher();
    let status = json!({
        "id": Uuid::from_u128(300).to_string(),
        "chat_id": Uuid::from_u128(10).to_string(),
        "user_id": Uuid::from_u128(ME).to_string(),
        "last_read_message_id": Uuid::from_u128(100).to_string(),
        "count_unread_msg": 0,
    });
    assert!(matches!(
        d.route(&frame("update_read_status", status)).unwrap(),
        Some(Routed::ReadStatus(s)) if s.user_id == current_user()
    ));

    let reaction = json!({
        "id": Uuid::from_u128(400).to_string(),
        "reaction_type": "like",
        "user_id": Uuid::from_u128(ME).to_string(),
        "message_id": Uuid::from_u128(100).to_string(),
        "updated_at": "2025-01-10T12:00:00Z",
    });
    assert!(matches!(
        d.route(&frame("new_reaction", reaction.clone())).unwrap(),
        Some(Routed::Reaction {
            action: ReactionAction::New,
            ..
        })
    ));
    assert!(matches!(
        d.route(&frame("delete_reaction", reaction)).unwrap(),
        Some(Routed::Reaction {
            action: ReactionAction::Delete,
            ..
        })
    ));
}

#[test]
fn group_patches_are_tagged_by_field() {
    let d = dispatcher();
    assert_eq!(
        d.route(&frame("update_group_name", json!({ "group_name": "team" })))
            .unwrap(),
        Some(Routed::GroupName(GroupNameUpdate {
            group_name: "team".to_string(),
        }))
    );
    assert_eq!(
        d.route(&frame(
            "update_image_group",
            json!({ "image_url": "https://files/img.png" }),
        ))
        .unwrap(),
        Some(Routed::GroupImage(GroupImageUpdate {
            image_url: "https://files/img.png".to_string(),
        }))
    );
}

#[test]
fn summarization_events_are_routed() {
    let summary = json!({
        "chat_id": Uuid::from_u128(10).to_string(),
        "status": "in_progress",
        "progress": 0.5,
        "result": {},
        "created_at": "2025-01-10T12:00:00Z",
        "finished_at": null,
    });
    assert!(matches!(
        dispatcher()
            .route(&frame("progress_summarization", summary))
            .unwrap(),
        Some(Routed::Summarization(SummarizationUpdate::Progress(_)))
    ));
}

#[test]
fn malformed_payload_of_known_kind_is_an_error() {
    let result = dispatcher().route(&frame("new_message", json!({ "id": 42 })));
    assert!(result.is_err());
}

#[test]
fn unknown_kind_is_dropped_silently() {
    let routed = dispatcher()
        .route(&frame("heartbeat", json!({})))
        .unwrap();
    assert_eq!(routed, None);
}

#[test]
fn identifiers_parse_from_the_uuid_wire_format() {
    let routed = dispatcher()
        .route(&frame("new_message", message_json(OTHER)))
        .unwrap()
        .unwrap();
    if let Routed::Message { message, .. } = routed {
        assert_eq!(message.chat_id, ChatId(Uuid::from_u128(10)));
    } else {
        panic!("expected a message routing");
    }
}
