use std::sync::Arc;
use std::time::Duration;

use dmcore::protocol::OutboundEvent;
use dmcore::session::SessionState;
use dmcore::types::{ConversationId, MessageId};
use sharemyshows_dm::client::{Client, SelectOutcome};
use sharemyshows_dm::config::ClientConfig;
use sharemyshows_dm::test_utils::{
    ApiCall, EventRecorder, Gate, RecordingSender, ScriptedApi, conversation, message,
};
use sharemyshows_dm::types::events::Event;

const C1: ConversationId = ConversationId(1);
const C2: ConversationId = ConversationId(2);

fn setup(api: ScriptedApi) -> (Arc<Client>, Arc<ScriptedApi>, Arc<RecordingSender>) {
    let _ = env_logger::builder().is_test(true).try_init();
    let api = Arc::new(api);
    let sender = Arc::new(RecordingSender::new());
    let client = Client::new(ClientConfig::default(), api.clone(), sender.clone());
    (client, api, sender)
}

fn two_conversations() -> ScriptedApi {
    ScriptedApi::new()
        .with_conversations(vec![conversation(1, 3, 20), conversation(2, 0, 10)])
        .with_history(1, (1..=5).map(|id| message(id, 1, id % 2 == 0)).collect())
        .with_history(2, (6..=8).map(|id| message(id, 2, false)).collect())
}

fn ids(messages: &[dmcore::types::Message]) -> Vec<i64> {
    messages.iter().map(|m| m.id.get()).collect()
}

#[tokio::test(start_paused = true)]
async fn test_select_clears_unread_immediately_and_marks_read_once() {
    let (client, api, sender) = setup(two_conversations());
    client.refresh_conversations().await.unwrap();
    assert_eq!(client.unread_total().await, 3);

    api.hold(Gate::Fetch(C1));
    let selecting = tokio::spawn({
        let client = client.clone();
        async move { client.select(C1).await }
    });
    tokio::time::sleep(Duration::from_millis(10)).await;

    // Optimistic: zero before the first page lands.
    assert_eq!(client.conversation(C1).await.unwrap().unread_count, 0);
    assert_eq!(client.session_state().await, SessionState::Loading(C1));

    api.release(Gate::Fetch(C1));
    assert_eq!(selecting.await.unwrap().unwrap(), SelectOutcome::Active);
    assert_eq!(client.session_state().await, SessionState::Active(C1));
    assert_eq!(ids(&client.timeline().await), vec![1, 2, 3, 4, 5]);

    assert_eq!(api.count(|c| matches!(c, ApiCall::MarkRead(_))), 1);
    assert_eq!(
        sender.count(|e| matches!(e, OutboundEvent::Read { conversation_id } if *conversation_id == C1)),
        1
    );
}

#[tokio::test(start_paused = true)]
async fn test_slow_mark_read_does_not_hold_activation() {
    let (client, api, sender) = setup(two_conversations());
    client.refresh_conversations().await.unwrap();

    api.hold(Gate::MarkRead);
    let selecting = tokio::spawn({
        let client = client.clone();
        async move { client.select(C1).await }
    });
    tokio::time::sleep(Duration::from_secs(30)).await;

    assert_eq!(client.session_state().await, SessionState::Active(C1));
    assert_eq!(ids(&client.timeline().await), vec![1, 2, 3, 4, 5]);
    assert_eq!(sender.count(|e| matches!(e, OutboundEvent::Read { .. })), 0);

    api.release(Gate::MarkRead);
    assert_eq!(selecting.await.unwrap().unwrap(), SelectOutcome::Active);
    assert_eq!(sender.count(|e| matches!(e, OutboundEvent::Read { .. })), 1);
}

#[tokio::test(start_paused = true)]
async fn test_select_without_unread_skips_mark_read() {
    let (client, api, sender) = setup(two_conversations());
    client.refresh_conversations().await.unwrap();

    client.select(C2).await.unwrap();
    assert_eq!(api.count(|c| matches!(c, ApiCall::MarkRead(_))), 0);
    assert_eq!(sender.count(|e| matches!(e, OutboundEvent::Read { .. })), 0);
}

#[tokio::test(start_paused = true)]
async fn test_failed_mark_read_restores_unread() {
    let (client, api, sender) = setup(two_conversations());
    client.refresh_conversations().await.unwrap();
    api.fail_mark_read.store(true, std::sync::atomic::Ordering::SeqCst);

    assert_eq!(client.select(C1).await.unwrap(), SelectOutcome::Active);
    assert_eq!(client.conversation(C1).await.unwrap().unread_count, 3);
    assert_eq!(sender.count(|e| matches!(e, OutboundEvent::Read { .. })), 0);

    // The restored count is not cleared by a later refresh either.
    client.refresh_conversations().await.unwrap();
    assert_eq!(client.conversation(C1).await.unwrap().unread_count, 3);
}

#[tokio::test(start_paused = true)]
async fn test_stale_first_page_is_discarded_after_switch() {
    let (client, api, _sender) = setup(two_conversations());
    client.refresh_conversations().await.unwrap();
    let recorder = Arc::new(EventRecorder::new());
    client.event_bus.add_handler(recorder.clone());

    api.hold(Gate::Fetch(C1));
    let first = tokio::spawn({
        let client = client.clone();
        async move { client.select(C1).await }
    });
    tokio::time::sleep(Duration::from_millis(10)).await;

    assert_eq!(client.select(C2).await.unwrap(), SelectOutcome::Active);
    api.release(Gate::Fetch(C1));
    assert_eq!(first.await.unwrap().unwrap(), SelectOutcome::Superseded);

    assert_eq!(client.session_state().await, SessionState::Active(C2));
    let timeline = client.timeline().await;
    assert_eq!(ids(&timeline), vec![6, 7, 8]);
    assert!(timeline.iter().all(|m| m.conversation_id == C2));
    assert_eq!(
        recorder.count(|e| matches!(e, Event::ConversationActive { conversation_id } if *conversation_id == C1)),
        0
    );
}

#[tokio::test(start_paused = true)]
async fn test_failed_first_page_leaves_session_loading() {
    let (client, api, _sender) = setup(two_conversations());
    client.refresh_conversations().await.unwrap();
    api.fail_fetch.store(true, std::sync::atomic::Ordering::SeqCst);

    let err = client.select(C2).await.unwrap_err();
    assert!(err.to_string().contains("503"));
    assert_eq!(client.session_state().await, SessionState::Loading(C2));
    assert!(client.timeline().await.is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_load_older_until_history_is_complete() {
    let (client, api, _sender) = setup(
        ScriptedApi::new()
            .with_conversations(vec![conversation(1, 0, 1)])
            .with_history(1, (1..=120).map(|id| message(id, 1, id % 3 == 0)).collect()),
    );
    client.refresh_conversations().await.unwrap();
    client.select(C1).await.unwrap();

    let cursor = client.cursor().await.unwrap();
    assert_eq!(cursor.before, Some(MessageId(71)));
    assert!(cursor.has_more);

    assert_eq!(client.load_older().await.unwrap(), 50);
    assert_eq!(client.load_older().await.unwrap(), 20);
    assert!(!client.cursor().await.unwrap().has_more);
    assert_eq!(client.load_older().await.unwrap(), 0);

    let timeline = client.timeline().await;
    assert_eq!(ids(&timeline), (1..=120).collect::<Vec<_>>());

    let befores: Vec<Option<MessageId>> = api
        .calls()
        .into_iter()
        .filter_map(|c| match c {
            ApiCall::FetchMessages { before, limit, .. } => {
                assert_eq!(limit, 50);
                Some(before)
            }
            _ => None,
        })
        .collect();
    assert_eq!(befores, vec![None, Some(MessageId(71)), Some(MessageId(21))]);
}

#[tokio::test(start_paused = true)]
async fn test_second_load_older_waits_for_the_first() {
    let (client, api, _sender) = setup(
        ScriptedApi::new()
            .with_conversations(vec![conversation(1, 0, 1)])
            .with_history(1, (1..=80).map(|id| message(id, 1, false)).collect()),
    );
    client.refresh_conversations().await.unwrap();
    client.select(C1).await.unwrap();

    api.hold(Gate::Fetch(C1));
    let first = tokio::spawn({
        let client = client.clone();
        async move { client.load_older().await }
    });
    tokio::time::sleep(Duration::from_millis(10)).await;

    assert_eq!(client.load_older().await.unwrap(), 0);
    api.release(Gate::Fetch(C1));
    assert_eq!(first.await.unwrap().unwrap(), 30);
    assert_eq!(
        api.count(|c| matches!(c, ApiCall::FetchMessages { before: Some(_), .. })),
        1
    );
}

#[tokio::test(start_paused = true)]
async fn test_load_older_dropped_after_switch() {
    let (client, api, _sender) = setup(
        ScriptedApi::new()
            .with_conversations(vec![conversation(1, 0, 2), conversation(2, 0, 1)])
            .with_history(1, (1..=80).map(|id| message(id, 1, false)).collect())
            .with_history(2, vec![message(200, 2, false)]),
    );
    client.refresh_conversations().await.unwrap();
    client.select(C1).await.unwrap();

    api.hold(Gate::Fetch(C1));
    let older = tokio::spawn({
        let client = client.clone();
        async move { client.load_older().await }
    });
    tokio::time::sleep(Duration::from_millis(10)).await;

    client.select(C2).await.unwrap();
    api.release(Gate::Fetch(C1));
    assert_eq!(older.await.unwrap().unwrap(), 0);
    assert_eq!(ids(&client.timeline().await), vec![200]);
}

#[tokio::test(start_paused = true)]
async fn test_close_discards_timeline_and_late_pages() {
    let (client, api, _sender) = setup(two_conversations());
    client.refresh_conversations().await.unwrap();

    api.hold(Gate::Fetch(C2));
    let selecting = tokio::spawn({
        let client = client.clone();
        async move { client.select(C2).await }
    });
    tokio::time::sleep(Duration::from_millis(10)).await;

    client.close().await;
    api.release(Gate::Fetch(C2));
    assert_eq!(selecting.await.unwrap().unwrap(), SelectOutcome::Superseded);
    assert_eq!(client.session_state().await, SessionState::NoneSelected);
    assert!(client.timeline().await.is_empty());
    assert!(client.cursor().await.is_none());
}

#[tokio::test(start_paused = true)]
async fn test_open_conversation_with_new_friend() {
    let (client, api, _sender) = setup(two_conversations());
    client.refresh_conversations().await.unwrap();
    assert_eq!(client.conversations().await.len(), 2);

    let outcome = client
        .open_conversation_with(dmcore::types::UserId(107))
        .await
        .unwrap();
    assert_eq!(outcome, SelectOutcome::Active);
    assert_eq!(client.conversations().await.len(), 3);
    assert_eq!(
        client.session_state().await,
        SessionState::Active(ConversationId(7))
    );
    assert_eq!(api.count(|c| matches!(c, ApiCall::OpenConversation(_))), 1);

    // Opening again reuses the conversation.
    client
        .open_conversation_with(dmcore::types::UserId(107))
        .await
        .unwrap();
    assert_eq!(client.conversations().await.len(), 3);
}

#[tokio::test(start_paused = true)]
async fn test_directory_is_ordered_by_recent_activity() {
    let (client, _api, _sender) = setup(ScriptedApi::new().with_conversations(vec![
        conversation(1, 0, 10),
        conversation(2, 0, 30),
        conversation(3, 0, 20),
    ]));
    client.refresh_conversations().await.unwrap();

    let order: Vec<i64> = client
        .conversations()
        .await
        .iter()
        .map(|c| c.id.get())
        .collect();
    assert_eq!(order, vec![2, 3, 1]);
}
