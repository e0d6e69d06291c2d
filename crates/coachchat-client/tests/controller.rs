//! End-to-end behaviour of the chat controller against the in-process hub.

use std::sync::Arc;
use std::time::Duration;

use chrono::{TimeZone, Utc};

use coachchat_client::{ChatConfig, ChatController, ChatEvent, SendStage};
use coachchat_net::{FeedChannel, MemoryHub, SubscriptionState};
use coachchat_shared::backend::StaticAuth;
use coachchat_shared::constants::FALLBACK_DISPLAY_NAME;
use coachchat_shared::error::{ChatError, ValidationError};
use coachchat_shared::protocol::{FeedEvent, FeedEventKind, MessageRow};
use coachchat_shared::retry::RetryPolicy;
use coachchat_shared::types::{LocalUser, Message, MessageId, MessageKind, Topic, UserId};

const ME: &str = "athlete-1";

fn build(hub: &MemoryHub, auth: StaticAuth, config: ChatConfig) -> ChatController {
    let shared = Arc::new(hub.clone());
    let feed = FeedChannel::new(shared.clone(), shared.clone()).with_retry_policy(
        RetryPolicy::new(Duration::from_millis(10), Duration::from_millis(50), 3),
    );
    ChatController::new(&config, shared, Arc::new(auth), feed).with_load_retry(RetryPolicy::new(
        Duration::from_millis(5),
        Duration::from_millis(20),
        3,
    ))
}

fn signed_in() -> StaticAuth {
    StaticAuth::signed_in(LocalUser::new(ME, "Ana"))
}

async fn wait_until<F: Fn() -> bool>(condition: F) {
    for _ in 0..400 {
        if condition() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    panic!("condition not reached in time");
}

async fn started(hub: &MemoryHub, config: ChatConfig) -> ChatController {
    hub.add_profile(ME, "Ana", None);
    hub.add_profile("coach-1", "Coach Kim", Some("https://cdn.example/kim.png"));
    let chat = build(hub, signed_in(), config);
    chat.start().await.unwrap().unwrap();
    wait_until(|| {
        chat.subscription_state(Topic::Messages) == Some(SubscriptionState::Active)
            && chat.subscription_state(Topic::Typing) == Some(SubscriptionState::Active)
    })
    .await;
    chat
}

fn contents(chat: &ChatController) -> Vec<String> {
    chat.current_messages()
        .into_iter()
        .map(|m| m.content)
        .collect()
}

fn bare_row(message: &Message) -> FeedEvent {
    let row = MessageRow {
        id: message.id.confirmed().unwrap(),
        sender_id: message.sender_id.to_string(),
        content: message.content.clone(),
        kind: message.kind,
        created_at: message.created_at,
        is_read: false,
        profiles: None,
    };
    FeedEvent::new(Topic::Messages, FeedEventKind::Insert, &row).unwrap()
}

#[tokio::test]
async fn test_same_row_twice_is_one_entry() {
    let hub = MemoryHub::new();
    let seeded = hub.seed_message("coach-1", "Welcome!");
    let chat = started(&hub, ChatConfig::default()).await;
    assert_eq!(contents(&chat), vec!["Welcome!"]);

    hub.push_raw(bare_row(&seeded));
    hub.push_raw(bare_row(&seeded));
    assert_eq!(chat.load().await.unwrap().unwrap(), 0);

    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(contents(&chat), vec!["Welcome!"]);
}

#[tokio::test]
async fn test_out_of_order_arrivals_are_sorted() {
    let hub = MemoryHub::new();
    let chat = started(&hub, ChatConfig::default()).await;

    let later = Message {
        id: MessageId::Confirmed(200),
        sender_id: UserId::new("coach-1"),
        content: "second".into(),
        kind: MessageKind::Text,
        created_at: Utc.timestamp_opt(1_700_000_020, 0).unwrap(),
        sender_display_name: String::new(),
        sender_avatar_url: None,
        is_read: false,
    };
    let earlier = Message {
        id: MessageId::Confirmed(201),
        content: "first".into(),
        created_at: Utc.timestamp_opt(1_700_000_010, 0).unwrap(),
        ..later.clone()
    };

    hub.push_raw(bare_row(&later));
    hub.push_raw(bare_row(&earlier));
    wait_until(|| chat.current_messages().len() == 2).await;
    assert_eq!(contents(&chat), vec!["first", "second"]);
}

#[tokio::test]
async fn test_failed_send_rolls_back() {
    let hub = MemoryHub::new();
    let chat = started(&hub, ChatConfig::default()).await;
    hub.fail_next_inserts(1);

    let pending = chat.send("hi").unwrap();
    assert!(pending.placeholder().is_pending());
    assert_eq!(contents(&chat), vec!["hi"]);

    let err = pending.outcome().await.unwrap_err();
    assert!(matches!(err, ChatError::Network(_)));
    assert!(chat.current_messages().is_empty());
    assert_eq!(chat.last_error(), Some(err));

    chat.clear_error();
    assert_eq!(chat.last_error(), None);
}

#[tokio::test]
async fn test_ack_then_echo_yields_one_entry() {
    let hub = MemoryHub::new();
    let chat = started(&hub, ChatConfig::default()).await;
    hub.hold_echoes(true);

    let pending = chat.send("hi").unwrap();
    let placeholder = pending.placeholder();
    let row = pending.outcome().await.unwrap();
    assert_ne!(row.id, placeholder);

    hub.release_echoes();
    tokio::time::sleep(Duration::from_millis(50)).await;

    let messages = chat.current_messages();
    assert_eq!(messages.len(), 1);
    assert_eq!(messages[0].id, row.id);
    assert_eq!(messages[0].sender_display_name, "Ana");
}

#[tokio::test]
async fn test_echo_then_ack_yields_one_entry() {
    let hub = MemoryHub::new();
    let chat = started(&hub, ChatConfig::default()).await;
    hub.set_ack_delay(Some(Duration::from_millis(150)));

    let pending = chat.send("hi").unwrap();
    wait_until(|| {
        let messages = chat.current_messages();
        messages.len() == 1 && !messages[0].is_pending()
    })
    .await;
    assert_eq!(pending.stage(), SendStage::OptimisticallyInserted);

    let row = pending.outcome().await.unwrap();
    let messages = chat.current_messages();
    assert_eq!(messages.len(), 1);
    assert_eq!(messages[0], row);
}

#[tokio::test]
async fn test_invalid_input_touches_nothing() {
    let hub = MemoryHub::new();
    let chat = started(&hub, ChatConfig::default()).await;
    let too_long = "x".repeat(1001);

    for input in ["", "   ", too_long.as_str()] {
        let err = chat.send(input).unwrap_err();
        assert!(matches!(err, ChatError::Validation(_)), "{input:?}");
    }
    assert_eq!(
        chat.last_error(),
        Some(ChatError::Validation(ValidationError::TooLong {
            len: 1001,
            max: 1000
        }))
    );
    assert!(chat.current_messages().is_empty());
    assert_eq!(hub.calls().insert_message, 0);
}

#[tokio::test]
async fn test_signed_out_send_is_auth_error() {
    let hub = MemoryHub::new();
    let auth = StaticAuth::default();
    let chat = build(&hub, auth.clone(), ChatConfig::default());

    assert!(matches!(chat.send("hi"), Err(ChatError::Auth(_))));
    assert!(matches!(chat.set_typing(true), Err(ChatError::Auth(_))));
    assert_eq!(hub.calls().insert_message, 0);

    auth.set_user(Some(LocalUser::new(ME, "Ana")));
    assert!(chat.send("hi").unwrap().outcome().await.is_ok());
}

#[tokio::test]
async fn test_unauthorized_load_is_not_retried() {
    let hub = MemoryHub::new();
    hub.set_unauthorized(true);
    let chat = build(&hub, signed_in(), ChatConfig::default());
    let mut changes = chat.subscribe_changes();

    let err = chat.load().await.unwrap().unwrap_err();
    assert!(matches!(err, ChatError::Auth(_)));
    assert_eq!(hub.calls().fetch_messages, 1);
    assert_eq!(changes.recv().await.unwrap(), ChatEvent::Error(err));
}

#[tokio::test]
async fn test_transient_load_failures_are_retried() {
    let hub = MemoryHub::new();
    hub.seed_message("coach-1", "Rest day");
    hub.fail_next_loads(2);
    let chat = build(&hub, signed_in(), ChatConfig::default());

    assert_eq!(chat.load().await.unwrap().unwrap(), 1);
    assert_eq!(hub.calls().fetch_messages, 3);
    assert_eq!(chat.last_error(), None);
}

#[tokio::test]
async fn test_remote_typing_expires_without_false() {
    let hub = MemoryHub::new();
    let config = ChatConfig {
        typing_freshness: Duration::from_millis(200),
        ..ChatConfig::default()
    };
    let chat = started(&hub, config).await;

    hub.push_typing("coach-1", true);
    wait_until(|| chat.current_typing().is_some()).await;
    assert_eq!(chat.current_typing().unwrap().display_name, "Coach Kim");
    assert_eq!(chat.typing_users().len(), 1);

    tokio::time::sleep(Duration::from_millis(250)).await;
    assert_eq!(chat.current_typing(), None);
}

#[tokio::test]
async fn test_own_typing_echo_is_ignored() {
    let hub = MemoryHub::new();
    let chat = started(&hub, ChatConfig::default()).await;

    chat.set_typing(true).unwrap();
    wait_until(|| hub.calls().typing_upserts == vec![(UserId::new(ME), true)]).await;
    tokio::time::sleep(Duration::from_millis(30)).await;
    assert_eq!(chat.current_typing(), None);

    chat.send("done").unwrap();
    wait_until(|| hub.calls().typing_upserts.last() == Some(&(UserId::new(ME), false))).await;
}

#[tokio::test]
async fn test_rapid_typing_is_debounced() {
    let hub = MemoryHub::new();
    let chat = started(&hub, ChatConfig::default()).await;

    for _ in 0..10 {
        chat.set_typing(true).unwrap();
    }
    tokio::time::sleep(Duration::from_millis(250)).await;
    let upserts = hub.calls().typing_upserts;
    assert!(
        (1..=2).contains(&upserts.len()),
        "expected at most two updates, got {upserts:?}"
    );
}

#[tokio::test]
async fn test_callbacks_after_teardown_are_inert() {
    let hub = MemoryHub::new();
    let chat = started(&hub, ChatConfig::default()).await;
    hub.set_ack_delay(Some(Duration::from_millis(50)));
    hub.hold_echoes(true);

    let pending = chat.send("in flight").unwrap();
    chat.teardown();
    let before = chat.current_messages();

    hub.release_echoes();
    hub.push_remote_message("coach-1", "after teardown");
    hub.push_typing("coach-1", true);
    assert!(pending.outcome().await.is_ok());
    tokio::time::sleep(Duration::from_millis(50)).await;

    assert_eq!(chat.current_messages(), before);
    assert_eq!(chat.current_typing(), None);
    assert!(chat.is_torn_down());
    chat.teardown();
}

#[tokio::test]
async fn test_resubscribes_after_disconnect() {
    let hub = MemoryHub::new();
    let chat = started(&hub, ChatConfig::default()).await;

    hub.disconnect(Topic::Messages);
    wait_until(|| hub.calls().message_opens == 2 && hub.subscriber_count(Topic::Messages) == 1)
        .await;

    hub.push_remote_message("coach-1", "back online");
    wait_until(|| contents(&chat) == vec!["back online"]).await;
}

#[tokio::test]
async fn test_failed_subscription_is_retried_on_next_interaction() {
    let hub = MemoryHub::new();
    hub.fail_next_opens(100);
    let chat = started_without_waiting(&hub).await;

    wait_until(|| {
        chat.subscription_state(Topic::Messages) == Some(SubscriptionState::Closed)
            && chat.subscription_state(Topic::Typing) == Some(SubscriptionState::Closed)
    })
    .await;
    assert!(matches!(chat.last_error(), Some(ChatError::Subscription(_))));

    hub.fail_next_opens(0);
    chat.load().await.unwrap().unwrap();
    wait_until(|| {
        chat.subscription_state(Topic::Messages) == Some(SubscriptionState::Active)
            && chat.last_error().is_none()
    })
    .await;
}

async fn started_without_waiting(hub: &MemoryHub) -> ChatController {
    let chat = build(hub, signed_in(), ChatConfig::default());
    chat.start().await.unwrap().unwrap();
    chat
}

#[tokio::test]
async fn test_missing_profile_uses_fallback_label() {
    let hub = MemoryHub::new();
    let chat = started(&hub, ChatConfig::default()).await;
    hub.drop_profile_joins(true);

    hub.push_remote_message("coach-1", "who am I");
    wait_until(|| chat.current_messages().len() == 1).await;
    assert_eq!(
        chat.current_messages()[0].sender_display_name,
        FALLBACK_DISPLAY_NAME
    );
}

#[tokio::test]
async fn test_media_messages_keep_their_kind() {
    let hub = MemoryHub::new();
    let chat = started(&hub, ChatConfig::default()).await;

    let row = chat
        .send_with_kind("https://cdn.example/form-check.mp4", MessageKind::File)
        .unwrap()
        .outcome()
        .await
        .unwrap();
    assert_eq!(row.kind, MessageKind::File);
    assert_eq!(chat.current_messages()[0].kind, MessageKind::File);
}

#[tokio::test]
async fn test_remote_insert_announces_change() {
    let hub = MemoryHub::new();
    let chat = started(&hub, ChatConfig::default()).await;
    let mut changes = chat.subscribe_changes();

    hub.push_remote_message("coach-1", "Great session");
    let event = tokio::time::timeout(Duration::from_secs(1), changes.recv())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(event, ChatEvent::MessagesChanged);
    assert_eq!(chat.current_messages()[0].sender_display_name, "Coach Kim");
}
