use std::sync::Arc;
use std::time::Duration;

use mail_gateway::cache::ListingCache;
use mail_gateway::dispatch::Dispatcher;
use mail_gateway::error::GatewayError;
use mail_gateway::gmail::MailAction;
use mail_gateway::llm::ChatMessage;
use mail_gateway::rate::{DailyQuota, FixedWindowLimiter, MemoryUsageStore, UsageStore};
use mail_gateway::session::{SessionState, TokenRefresher};
use mail_gateway::test_support::{
    CannedCompletion, CountingProvider, Scripted, ScriptedMailApi, page, seeded_store,
};

fn build_dispatcher(
    mail: Arc<ScriptedMailApi>,
    provider: Arc<CountingProvider>,
    chat: Arc<CannedCompletion>,
    expiry_offset_secs: i64,
    daily_chat_limit: u32,
) -> (Dispatcher<Arc<dyn UsageStore>>, Arc<SessionState>) {
    let store = seeded_store("user@example.com", expiry_offset_secs);
    let refresher = TokenRefresher::new(
        store.clone(),
        provider,
        30,
        Duration::from_millis(500),
    );
    let state = Arc::new(SessionState {
        store,
        refresher,
        cache: ListingCache::new(),
    });

    let usage: Arc<dyn UsageStore> = Arc::new(MemoryUsageStore::new());
    let dispatcher = Dispatcher::new(
        Arc::clone(&state),
        mail,
        chat,
        Arc::new(FixedWindowLimiter::new()),
        Arc::new(DailyQuota::new(usage)),
        daily_chat_limit,
    );

    (dispatcher, state)
}

#[tokio::test]
async fn second_identical_listing_is_served_from_cache() {
    let mail = ScriptedMailApi::new(vec![Scripted::Page(page(&["m1", "m2"]))]);
    let (dispatcher, _) = build_dispatcher(
        Arc::clone(&mail),
        CountingProvider::succeeding(),
        CannedCompletion::new("unused"),
        3600,
        20,
    );

    let first = dispatcher.list_messages("inbox", None, None).await.unwrap();
    let second = dispatcher.list_messages("inbox", None, None).await.unwrap();

    assert_eq!(first.messages.len(), 2);
    assert_eq!(second.messages.len(), 2);
    assert_eq!(mail.call_count(), 1);
}

#[tokio::test]
async fn a_single_401_refreshes_and_retries_once() {
    let mail = ScriptedMailApi::new(vec![
        Scripted::Unauthorized,
        Scripted::Page(page(&["m1"])),
    ]);
    let provider = CountingProvider::succeeding();
    let (dispatcher, state) = build_dispatcher(
        Arc::clone(&mail),
        Arc::clone(&provider),
        CannedCompletion::new("unused"),
        3600,
        20,
    );

    let result = dispatcher.list_messages("inbox", None, None).await.unwrap();

    assert_eq!(result.messages.len(), 1);
    assert_eq!(mail.call_count(), 2);
    assert_eq!(provider.call_count(), 1);

    // The retried call ran with the refreshed token, now persisted.
    let session = state.store.get().unwrap().expect("session present");
    assert_eq!(session.access_token, "refreshed-0");
}

#[tokio::test]
async fn a_second_401_is_terminal() {
    let mail = ScriptedMailApi::new(vec![Scripted::Unauthorized, Scripted::Unauthorized]);
    let provider = CountingProvider::succeeding();
    let (dispatcher, _) = build_dispatcher(
        Arc::clone(&mail),
        Arc::clone(&provider),
        CannedCompletion::new("unused"),
        3600,
        20,
    );

    let err = dispatcher
        .list_messages("inbox", None, None)
        .await
        .unwrap_err();

    assert!(matches!(err, GatewayError::AuthExpired));
    // Exactly one retry: two upstream attempts, one refresh.
    assert_eq!(mail.call_count(), 2);
    assert_eq!(provider.call_count(), 1);
}

#[tokio::test]
async fn non_auth_upstream_errors_surface_without_retry() {
    let mail = ScriptedMailApi::new(vec![Scripted::Error(503, "backend unavailable".into())]);
    let (dispatcher, _) = build_dispatcher(
        Arc::clone(&mail),
        CountingProvider::succeeding(),
        CannedCompletion::new("unused"),
        3600,
        20,
    );

    let err = dispatcher
        .list_messages("inbox", None, None)
        .await
        .unwrap_err();

    match err {
        GatewayError::Upstream { status, message } => {
            assert_eq!(status, 503);
            assert_eq!(message, "backend unavailable");
        }
        other => panic!("expected Upstream, got {:?}", other),
    }
    assert_eq!(mail.call_count(), 1);
}

#[tokio::test]
async fn a_mutation_forces_the_next_listing_to_refetch() {
    let mail = ScriptedMailApi::new(vec![
        Scripted::Page(page(&["m1", "m2"])),
        Scripted::Ok,
        Scripted::Page(page(&["m2"])),
    ]);
    let (dispatcher, _) = build_dispatcher(
        Arc::clone(&mail),
        CountingProvider::succeeding(),
        CannedCompletion::new("unused"),
        3600,
        20,
    );

    dispatcher.list_messages("inbox", None, None).await.unwrap();
    dispatcher
        .mutate_message("m1", MailAction::Trash)
        .await
        .unwrap();

    let after = dispatcher.list_messages("inbox", None, None).await.unwrap();
    assert_eq!(after.messages.len(), 1);
    assert_eq!(mail.call_count(), 3);
}

#[tokio::test]
async fn overlapping_identical_listings_both_complete_and_last_store_wins() {
    // The barrier holds both fetches until both have missed the cache, so
    // the two requests genuinely overlap.
    let mail = ScriptedMailApi::with_barrier(
        vec![
            Scripted::Page(page(&["a1"])),
            Scripted::Page(page(&["b1", "b2"])),
        ],
        2,
    );
    let (dispatcher, state) = build_dispatcher(
        Arc::clone(&mail),
        CountingProvider::succeeding(),
        CannedCompletion::new("unused"),
        3600,
        20,
    );
    let dispatcher = Arc::new(dispatcher);

    let first = {
        let d = Arc::clone(&dispatcher);
        tokio::spawn(async move { d.list_messages("inbox", None, None).await })
    };
    let second = {
        let d = Arc::clone(&dispatcher);
        tokio::spawn(async move { d.list_messages("inbox", None, None).await })
    };

    let first = first.await.unwrap().unwrap();
    let second = second.await.unwrap().unwrap();

    assert_eq!(mail.call_count(), 2);
    // Each caller got a valid, uncorrupted page.
    for result in [&first, &second] {
        assert!(!result.messages.is_empty());
        assert!(result.messages.iter().all(|m| !m.id.is_empty()));
    }

    // The cache holds exactly the page of whichever store ran last.
    let cached = state
        .cache
        .lookup(&mail_gateway::cache::ListingKey::new("inbox", None, None))
        .expect("entry cached");
    let matches_first = cached.messages == first.messages;
    let matches_second = cached.messages == second.messages;
    assert!(matches_first || matches_second);
}

#[tokio::test]
async fn chat_is_bounded_by_the_daily_quota() {
    let chat = CannedCompletion::new("sure thing");
    let (dispatcher, _) = build_dispatcher(
        ScriptedMailApi::new(vec![]),
        CountingProvider::succeeding(),
        Arc::clone(&chat),
        3600,
        2,
    );

    let prompt = [ChatMessage::user("summarize my inbox")];

    assert_eq!(
        dispatcher.chat_completion(&prompt).await.unwrap(),
        "sure thing"
    );
    dispatcher.chat_completion(&prompt).await.unwrap();

    let err = dispatcher.chat_completion(&prompt).await.unwrap_err();
    assert!(matches!(err, GatewayError::RateLimited { .. }));
    assert_eq!(chat.call_count(), 2);
    assert_eq!(dispatcher.chat_remaining().await.unwrap(), 0);
}
