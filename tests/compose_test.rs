use std::sync::Arc;
use std::sync::atomic::Ordering;
use std::time::Duration;

use dmcore::protocol::OutboundEvent;
use dmcore::types::ConversationId;
use sharemyshows_dm::client::Client;
use sharemyshows_dm::config::ClientConfig;
use sharemyshows_dm::error::ClientError;
use sharemyshows_dm::test_utils::{
    ApiCall, EventRecorder, Gate, RecordingSender, ScriptedApi, conversation, message,
};
use sharemyshows_dm::types::events::Event;

const C1: ConversationId = ConversationId(1);
const C2: ConversationId = ConversationId(2);

async fn selected(api: ScriptedApi) -> (Arc<Client>, Arc<ScriptedApi>, Arc<RecordingSender>) {
    let _ = env_logger::builder().is_test(true).try_init();
    let api = Arc::new(api);
    let sender = Arc::new(RecordingSender::new());
    let client = Client::new(ClientConfig::default(), api.clone(), sender.clone());
    client.refresh_conversations().await.unwrap();
    client.select(C1).await.unwrap();
    sender.take();
    (client, api, sender)
}

fn base_api() -> ScriptedApi {
    ScriptedApi::new()
        .with_conversations(vec![conversation(1, 0, 20), conversation(2, 0, 10)])
        .with_history(1, vec![message(1, 1, false)])
}

fn typing(conversation_id: ConversationId, is_typing: bool) -> OutboundEvent {
    OutboundEvent::Typing {
        conversation_id,
        is_typing,
    }
}

#[tokio::test(start_paused = true)]
async fn test_typing_signals_are_throttled() {
    let (client, _api, sender) = selected(base_api()).await;

    client.set_draft("h").await;
    tokio::time::sleep(Duration::from_millis(500)).await;
    client.set_draft("he").await;
    tokio::time::sleep(Duration::from_millis(1_400)).await;
    client.set_draft("hel").await;
    assert_eq!(sender.take(), vec![typing(C1, true)]);

    tokio::time::sleep(Duration::from_millis(100)).await;
    client.set_draft("hell").await;
    assert_eq!(sender.take(), vec![typing(C1, true)]);
    assert_eq!(client.draft().await, "hell");
}

#[tokio::test(start_paused = true)]
async fn test_blur_stops_typing_once_and_resets_throttle() {
    let (client, _api, sender) = setup_typing().await;

    client.blur_draft().await;
    client.blur_draft().await;
    assert_eq!(sender.take(), vec![typing(C1, false)]);

    // Right after a stop, the next keystroke signals again.
    client.set_draft("again").await;
    assert_eq!(sender.take(), vec![typing(C1, true)]);
}

async fn setup_typing() -> (Arc<Client>, Arc<ScriptedApi>, Arc<RecordingSender>) {
    let (client, api, sender) = selected(base_api()).await;
    client.set_draft("typing").await;
    assert_eq!(sender.take(), vec![typing(C1, true)]);
    (client, api, sender)
}

#[tokio::test(start_paused = true)]
async fn test_switching_away_stops_typing() {
    let (client, _api, sender) = setup_typing().await;

    client.select(C2).await.unwrap();
    assert_eq!(sender.take(), vec![typing(C1, false)]);

    // The draft survives the switch; nothing was typed in C2 yet.
    assert_eq!(client.draft().await, "typing");
}

#[tokio::test(start_paused = true)]
async fn test_clearing_the_draft_stops_typing() {
    let (client, _api, sender) = setup_typing().await;
    client.set_draft("").await;
    assert_eq!(sender.take(), vec![typing(C1, false)]);
}

#[tokio::test(start_paused = true)]
async fn test_send_trims_clears_and_relays() {
    let (client, api, sender) = setup_typing().await;
    client.set_draft("  see you at the show  ").await;

    let sent = client.send_draft().await.unwrap().unwrap();
    assert_eq!(sent.body, "see you at the show");
    assert_eq!(client.draft().await, "");
    assert!(client.timeline().await.iter().any(|m| m.id == sent.id));
    assert_eq!(
        client.conversation(C1).await.unwrap().last_message.unwrap().id,
        sent.id
    );

    assert_eq!(
        sender.take(),
        vec![
            typing(C1, false),
            OutboundEvent::NotifyDm {
                conversation_id: C1,
                message: sent.clone(),
            },
        ]
    );
    assert_eq!(
        api.calls().last(),
        Some(&ApiCall::SendMessage {
            conversation_id: C1,
            body: "see you at the show".into(),
        })
    );
}

#[tokio::test(start_paused = true)]
async fn test_blank_draft_is_not_sent() {
    let (client, api, _sender) = selected(base_api()).await;
    client.set_draft("   ").await;
    assert!(client.send_draft().await.unwrap().is_none());
    assert_eq!(api.count(|c| matches!(c, ApiCall::SendMessage { .. })), 0);
}

#[tokio::test(start_paused = true)]
async fn test_send_without_selection_fails() {
    let _ = env_logger::builder().is_test(true).try_init();
    let api = Arc::new(base_api());
    let sender = Arc::new(RecordingSender::new());
    let client = Client::new(ClientConfig::default(), api.clone(), sender.clone());

    client.set_draft("hello").await;
    assert!(sender.events().is_empty());
    assert!(matches!(
        client.send_draft().await,
        Err(ClientError::NoActiveConversation)
    ));
    assert_eq!(client.draft().await, "hello");
}

#[tokio::test(start_paused = true)]
async fn test_failed_send_restores_draft_and_notifies() {
    let (client, api, sender) = selected(base_api()).await;
    let recorder = Arc::new(EventRecorder::new());
    client.event_bus.add_handler(recorder.clone());
    api.fail_send.store(true, Ordering::SeqCst);

    client.set_draft("hello").await;
    assert!(client.send_draft().await.is_err());

    assert_eq!(client.draft().await, "hello");
    assert_eq!(client.timeline().await.len(), 1);
    assert_eq!(
        sender.count(|e| matches!(e, OutboundEvent::NotifyDm { .. })),
        0
    );
    let failures: Vec<Event> = recorder
        .events()
        .into_iter()
        .filter(|e| matches!(e, Event::SendFailed(_)))
        .collect();
    assert_eq!(failures.len(), 1);
    let Event::SendFailed(failed) = &failures[0] else {
        unreachable!();
    };
    assert_eq!(failed.body, "hello");
    assert_eq!(failed.conversation_id, C1);
    assert!(failed.draft_restored);
}

#[tokio::test(start_paused = true)]
async fn test_failed_send_keeps_newer_draft() {
    let (client, api, _sender) = selected(base_api()).await;
    let recorder = Arc::new(EventRecorder::new());
    client.event_bus.add_handler(recorder.clone());
    api.fail_send.store(true, Ordering::SeqCst);
    api.hold(Gate::Send);

    client.set_draft("first").await;
    let sending = tokio::spawn({
        let client = client.clone();
        async move { client.send_draft().await }
    });
    tokio::time::sleep(Duration::from_millis(10)).await;
    client.set_draft("second").await;

    api.release(Gate::Send);
    assert!(sending.await.unwrap().is_err());
    assert_eq!(client.draft().await, "second");
    assert_eq!(
        recorder.count(|e| matches!(
            e,
            Event::SendFailed(f) if f.body == "first" && !f.draft_restored
        )),
        1
    );
}
