//! End-to-end reader tests over a simulated ledger, mirror set and
//! key-server committee.

use std::time::Duration;

use quire::access::{
    AuthorizationRequest, EncryptedObject, ObjectRef,
};
use quire::ReaderError;
use quire_testkit::{
    named_id, CountingWallet, KeyServerMode, MirrorOutcome, Scenario, PERIOD_MS, START_MS,
};

const CHAPTER_SEVEN: &[u8] = b"Chapter seven: the quorum convenes.";

fn init_tracing() {
    let _ = tracing_subscriber::fmt().with_test_writer().try_init();
}

/// col-1 owned by `creator`, with inst-3 (published) holding file-7 and file-8.
fn creator_scenario(modes: &[KeyServerMode], creator: &CountingWallet) -> Scenario {
    let mut scenario = Scenario::new(modes, 3);
    scenario
        .add_column("col-1", &creator.address())
        .add_installment(
            "col-1",
            "inst-3",
            3,
            true,
            &[("file-7", CHAPTER_SEVEN), ("file-8", b"Chapter eight.")],
        );
    scenario
}

#[tokio::test]
async fn test_creator_reads_own_file() {
    init_tracing();
    let creator = CountingWallet::named("creator");
    let scenario = creator_scenario(&[KeyServerMode::Honest; 5], &creator);
    scenario.commit().await;

    let reader = scenario.reader(creator.clone());
    let text = reader
        .request_file(&creator.address(), &named_id("file-7"))
        .await
        .unwrap();

    assert_eq!(&text[..], CHAPTER_SEVEN);
    assert_eq!(creator.prompts(), 1);
    assert_eq!(reader.cached_count(), 1);
}

#[tokio::test]
async fn test_no_capability_fails_before_network() {
    let creator = CountingWallet::named("creator");
    let stranger = CountingWallet::named("stranger");
    let scenario = creator_scenario(&[KeyServerMode::Honest; 5], &creator);
    scenario.commit().await;

    let reader = scenario.reader(stranger.clone());
    let err = reader
        .request_file(&stranger.address(), &named_id("file-7"))
        .await
        .unwrap_err();

    assert!(matches!(err, ReaderError::Unauthorized(_)), "{err:?}");
    assert!(err.user_message().contains("Subscribe"));
    assert_eq!(scenario.mirror_attempts(), 0);
    assert_eq!(scenario.network.total_calls(), 0);
    assert_eq!(stranger.prompts(), 0);
}

#[tokio::test]
async fn test_cache_is_scoped_to_account() {
    let creator = CountingWallet::named("creator");
    let stranger = CountingWallet::named("stranger");
    let scenario = creator_scenario(&[KeyServerMode::Honest; 5], &creator);
    scenario.commit().await;

    let reader = scenario.reader(creator.clone());
    reader
        .request_file(&creator.address(), &named_id("file-7"))
        .await
        .unwrap();

    let err = reader
        .request_file(&stranger.address(), &named_id("file-7"))
        .await
        .unwrap_err();
    assert!(matches!(err, ReaderError::Unauthorized(_)));
}

#[tokio::test]
async fn test_subscriber_reuses_credential_until_expiry() {
    let creator = CountingWallet::named("creator");
    let reader_wallet = CountingWallet::named("subscriber");
    let mut scenario = creator_scenario(&[KeyServerMode::Honest; 5], &creator);
    scenario
        .add_installment("col-1", "inst-4", 4, true, &[("file-9", b"Chapter nine.")])
        .subscribe(&reader_wallet.address(), "col-1", "sub-1", START_MS);
    scenario.commit().await;

    let account = reader_wallet.address();
    let reader = scenario.reader(reader_wallet.clone());

    let seven = reader.request_file(&account, &named_id("file-7")).await.unwrap();
    let eight = reader.request_file(&account, &named_id("file-8")).await.unwrap();
    assert_eq!(&seven[..], CHAPTER_SEVEN);
    assert_eq!(&eight[..], b"Chapter eight.");
    assert_eq!(reader_wallet.prompts(), 1);

    // Ten minutes is the credential lifetime; expiry is inclusive.
    scenario.clock.advance(10 * 60 * 1000);
    let nine = reader.request_file(&account, &named_id("file-9")).await.unwrap();
    assert_eq!(&nine[..], b"Chapter nine.");
    assert_eq!(reader_wallet.prompts(), 2);
}

#[tokio::test]
async fn test_subscription_expires_exactly_at_boundary() {
    let creator = CountingWallet::named("creator");
    let lapsed = CountingWallet::named("lapsed");
    let current = CountingWallet::named("current");
    let mut scenario = creator_scenario(&[KeyServerMode::Honest; 5], &creator);
    scenario
        .subscribe(&lapsed.address(), "col-1", "sub-lapsed", START_MS - PERIOD_MS)
        .subscribe(&current.address(), "col-1", "sub-current", START_MS - PERIOD_MS + 1);
    scenario.commit().await;

    let err = scenario
        .reader(lapsed.clone())
        .request_file(&lapsed.address(), &named_id("file-7"))
        .await
        .unwrap_err();
    assert!(matches!(err, ReaderError::Unauthorized(_)));
    assert_eq!(scenario.mirror_attempts(), 0);
    assert_eq!(scenario.network.total_calls(), 0);

    let text = scenario
        .reader(current.clone())
        .request_file(&current.address(), &named_id("file-7"))
        .await
        .unwrap();
    assert_eq!(&text[..], CHAPTER_SEVEN);
}

#[tokio::test]
async fn test_two_of_five_servers_suffice() {
    use KeyServerMode::*;
    let creator = CountingWallet::named("creator");
    let scenario = creator_scenario(&[Down, Honest, Down, Honest, Down], &creator);
    scenario.commit().await;

    let text = scenario
        .reader(creator.clone())
        .request_file(&creator.address(), &named_id("file-7"))
        .await
        .unwrap();
    assert_eq!(&text[..], CHAPTER_SEVEN);
}

#[tokio::test]
async fn test_one_of_five_is_retryable_quorum_error() {
    use KeyServerMode::*;
    let creator = CountingWallet::named("creator");
    let scenario = creator_scenario(&[Down, Down, Honest, Down, Down], &creator);
    scenario.commit().await;

    let reader = scenario.reader(creator.clone());
    let err = reader
        .request_file(&creator.address(), &named_id("file-7"))
        .await
        .unwrap_err();

    assert!(matches!(err, ReaderError::Quorum(_)), "{err:?}");
    assert!(err.is_retryable());
    assert!(err.user_message().contains("try again"));
    assert_eq!(reader.cached_count(), 0);

    // The committee recovers; the same request now succeeds.
    scenario.network.servers()[0].set_mode(Honest);
    let text = reader
        .request_file(&creator.address(), &named_id("file-7"))
        .await
        .unwrap();
    assert_eq!(&text[..], CHAPTER_SEVEN);
}

#[tokio::test]
async fn test_denials_past_tolerance_are_unauthorized() {
    use KeyServerMode::*;
    let creator = CountingWallet::named("creator");
    let scenario = creator_scenario(&[Deny, Deny, Deny, Deny, Honest], &creator);
    scenario.commit().await;

    let err = scenario
        .reader(creator.clone())
        .request_file(&creator.address(), &named_id("file-7"))
        .await
        .unwrap_err();
    assert!(matches!(err, ReaderError::Unauthorized(_)), "{err:?}");
    assert!(!err.is_retryable());
}

#[tokio::test(start_paused = true)]
async fn test_mirror_failover_tries_each_mirror_once() {
    let creator = CountingWallet::named("creator");
    let scenario = creator_scenario(&[KeyServerMode::Honest; 5], &creator);
    scenario.commit().await;
    scenario.mirrors[0].set_default(MirrorOutcome::Fail(503));
    scenario.mirrors[1].set_default(MirrorOutcome::Hang);

    let text = scenario
        .reader(creator.clone())
        .request_file(&creator.address(), &named_id("file-7"))
        .await
        .unwrap();

    assert_eq!(&text[..], CHAPTER_SEVEN);
    for mirror in &scenario.mirrors {
        assert_eq!(mirror.attempts(), 1);
    }
}

#[tokio::test]
async fn test_exhausted_mirrors_is_not_found() {
    let creator = CountingWallet::named("creator");
    let scenario = creator_scenario(&[KeyServerMode::Honest; 5], &creator);
    scenario.commit().await;
    for mirror in &scenario.mirrors {
        mirror.set_default(MirrorOutcome::Fail(404));
    }

    let err = scenario
        .reader(creator.clone())
        .request_file(&creator.address(), &named_id("file-7"))
        .await
        .unwrap_err();

    match err {
        ReaderError::NotFound { id, detail } => {
            assert_eq!(id, named_id("file-7"));
            assert!(detail.contains("3 mirror attempts"), "{detail}");
        }
        other => panic!("unexpected {other:?}"),
    }
    assert_eq!(scenario.mirror_attempts(), 3);
    assert_eq!(scenario.network.total_calls(), 0);
}

#[tokio::test]
async fn test_repeated_request_is_served_from_cache() {
    let creator = CountingWallet::named("creator");
    let scenario = creator_scenario(&[KeyServerMode::Honest; 5], &creator);
    scenario.commit().await;

    let reader = scenario.reader(creator.clone());
    let first = reader
        .request_file(&creator.address(), &named_id("file-7"))
        .await
        .unwrap();
    let mirror_calls = scenario.mirror_attempts();
    let key_calls = scenario.network.total_calls();

    let second = reader
        .request_file(&creator.address(), &named_id("file-7"))
        .await
        .unwrap();
    assert_eq!(first, second);
    assert_eq!(scenario.mirror_attempts(), mirror_calls);
    assert_eq!(scenario.network.total_calls(), key_calls);

    // Clearing content keeps the credential: same bytes, no new prompt.
    reader.clear_content();
    let third = reader
        .request_file(&creator.address(), &named_id("file-7"))
        .await
        .unwrap();
    assert_eq!(first, third);
    assert_eq!(creator.prompts(), 1);
}

#[tokio::test]
async fn test_invalidate_drops_content_and_credential() {
    let creator = CountingWallet::named("creator");
    let scenario = creator_scenario(&[KeyServerMode::Honest; 5], &creator);
    scenario.commit().await;

    let reader = scenario.reader(creator.clone());
    reader
        .request_file(&creator.address(), &named_id("file-7"))
        .await
        .unwrap();
    assert_eq!(reader.cached_count(), 1);

    reader.invalidate().await;
    assert_eq!(reader.cached_count(), 0);
    assert!(reader.cached(&creator.address(), &named_id("file-7")).is_none());

    reader
        .request_file(&creator.address(), &named_id("file-7"))
        .await
        .unwrap();
    assert_eq!(creator.prompts(), 2);
}

#[tokio::test]
async fn test_declined_signature_stops_before_network() {
    let creator = CountingWallet::named("creator");
    let scenario = creator_scenario(&[KeyServerMode::Honest; 5], &creator);
    scenario.commit().await;
    creator.set_declining(true);

    let err = scenario
        .reader(creator.clone())
        .request_file(&creator.address(), &named_id("file-7"))
        .await
        .unwrap_err();

    assert!(matches!(err, ReaderError::SignatureDeclined));
    assert_eq!(scenario.mirror_attempts(), 0);
    assert_eq!(scenario.network.total_calls(), 0);
}

#[tokio::test]
async fn test_swapped_blob_is_format_error() {
    let creator = CountingWallet::named("creator");
    let mut scenario = creator_scenario(&[KeyServerMode::Honest; 5], &creator);
    let other = scenario.blob("file-8").unwrap();
    scenario.replace_blob("file-7", other);
    scenario.commit().await;

    let err = scenario
        .reader(creator.clone())
        .request_file(&creator.address(), &named_id("file-7"))
        .await
        .unwrap_err();

    assert!(matches!(err, ReaderError::Format(_)), "{err:?}");
    assert_eq!(scenario.network.total_calls(), 0);
}

#[tokio::test]
async fn test_swapped_installment_fails_verification() {
    let creator = CountingWallet::named("creator");
    let subscriber = CountingWallet::named("subscriber");
    let mut scenario = creator_scenario(&[KeyServerMode::Honest; 5], &creator);
    scenario
        .add_column("col-2", &creator.address())
        .add_installment("col-2", "inst-9", 1, true, &[("file-90", b"elsewhere")])
        .subscribe(&subscriber.address(), "col-1", "sub-1", START_MS);
    scenario.commit().await;

    // A subscription to col-1 presented with an installment of col-2.
    let request = AuthorizationRequest::Subscriber {
        subscription_id: named_id("sub-1"),
        column_id: named_id("col-1"),
        payment_policy_id: named_id("col-1/policy"),
        installment_id: named_id("inst-9"),
    };
    let header = EncryptedObject::parse_header(&scenario.blob("file-7").unwrap()).unwrap();
    let credential = scenario
        .credentials(subscriber.clone())
        .get_or_create(&subscriber.address())
        .await
        .unwrap();

    let err = scenario
        .key_client()
        .fetch_keys(&[ObjectRef::from(&header)], &request, &credential)
        .await
        .unwrap_err();
    assert!(matches!(err, quire::access::AccessError::Unauthorized(_)), "{err:?}");
}

#[tokio::test]
async fn test_unpublished_installment_gates_subscribers_only() {
    let creator = CountingWallet::named("creator");
    let subscriber = CountingWallet::named("subscriber");
    let mut scenario = creator_scenario(&[KeyServerMode::Honest; 5], &creator);
    scenario
        .set_published("inst-3", false)
        .subscribe(&subscriber.address(), "col-1", "sub-1", START_MS);
    scenario.commit().await;

    let err = scenario
        .reader(subscriber.clone())
        .request_file(&subscriber.address(), &named_id("file-7"))
        .await
        .unwrap_err();
    assert!(matches!(err, ReaderError::Unauthorized(_)), "{err:?}");

    let text = scenario
        .reader(creator.clone())
        .request_file(&creator.address(), &named_id("file-7"))
        .await
        .unwrap();
    assert_eq!(&text[..], CHAPTER_SEVEN);
}

#[tokio::test]
async fn test_unpublished_column_denies_subscribers() {
    let creator = CountingWallet::named("creator");
    let subscriber = CountingWallet::named("subscriber");
    let mut scenario = creator_scenario(&[KeyServerMode::Honest; 5], &creator);
    scenario
        .set_column_status("col-1", "unpublished")
        .subscribe(&subscriber.address(), "col-1", "sub-1", START_MS);
    scenario.commit().await;

    let err = scenario
        .reader(subscriber.clone())
        .request_file(&subscriber.address(), &named_id("file-7"))
        .await
        .unwrap_err();
    assert!(matches!(err, ReaderError::Unauthorized(_)), "{err:?}");
}

#[tokio::test]
async fn test_missing_blob_and_unknown_file_are_not_found() {
    let creator = CountingWallet::named("creator");
    let mut scenario = creator_scenario(&[KeyServerMode::Honest; 5], &creator);
    scenario.add_file_without_blob("inst-3", "file-draft");
    scenario.commit().await;

    let reader = scenario.reader(creator.clone());
    let draft = reader
        .request_file(&creator.address(), &named_id("file-draft"))
        .await
        .unwrap_err();
    assert!(matches!(draft, ReaderError::NotFound { .. }), "{draft:?}");

    let unknown = reader
        .request_file(&creator.address(), &named_id("file-404"))
        .await
        .unwrap_err();
    assert!(matches!(unknown, ReaderError::NotFound { .. }), "{unknown:?}");

    assert_eq!(scenario.mirror_attempts(), 0);
}

#[tokio::test]
async fn test_zero_file_id_is_validation_error() {
    let creator = CountingWallet::named("creator");
    let scenario = creator_scenario(&[KeyServerMode::Honest; 5], &creator);

    let err = scenario
        .reader(creator.clone())
        .request_file(&creator.address(), &quire::core::ObjectId::ZERO)
        .await
        .unwrap_err();
    assert!(matches!(err, ReaderError::Validation(_)));
    assert_eq!(scenario.graph.query_count(), 0);
}

#[tokio::test(start_paused = true)]
async fn test_abort_leaves_no_cache_entry() {
    let creator = CountingWallet::named("creator");
    let scenario = creator_scenario(&[KeyServerMode::Honest; 5], &creator);
    scenario.commit().await;
    for mirror in &scenario.mirrors {
        mirror.set_default(MirrorOutcome::Hang);
    }

    let reader = scenario.reader(creator.clone());
    let account = creator.address();
    let file = named_id("file-7");

    let (request, abort) = reader.request_file_abortable(&account, &file);
    let (outcome, ()) = tokio::join!(request, async {
        tokio::time::sleep(Duration::from_secs(1)).await;
        abort.abort();
    });

    assert!(matches!(outcome, Err(ReaderError::Cancelled)), "{outcome:?}");
    assert_eq!(reader.cached_count(), 0);

    for mirror in &scenario.mirrors {
        mirror.set_default(MirrorOutcome::Serve);
    }
    let text = reader.request_file(&account, &file).await.unwrap();
    assert_eq!(&text[..], CHAPTER_SEVEN);
}

#[tokio::test]
async fn test_subscriber_installment_uses_one_key_request() {
    let creator = CountingWallet::named("creator");
    let subscriber = CountingWallet::named("subscriber");
    let mut scenario = creator_scenario(&[KeyServerMode::Honest; 5], &creator);
    scenario
        .add_file_without_blob("inst-3", "file-draft")
        .subscribe(&subscriber.address(), "col-1", "sub-1", START_MS);
    scenario.commit().await;

    let reader = scenario.reader(subscriber.clone());
    let results = reader
        .request_installment(&subscriber.address(), &named_id("inst-3"))
        .await
        .unwrap();

    let ids: Vec<_> = results.iter().map(|(id, _)| *id).collect();
    assert_eq!(
        ids,
        vec![named_id("file-7"), named_id("file-8"), named_id("file-draft")]
    );
    assert_eq!(&results[0].1.as_ref().unwrap()[..], CHAPTER_SEVEN);
    assert_eq!(&results[1].1.as_ref().unwrap()[..], b"Chapter eight.");
    assert!(matches!(results[2].1, Err(ReaderError::NotFound { .. })));

    for server in scenario.network.servers() {
        assert!(server.calls() <= 1, "one batch covers the installment");
    }
    assert_eq!(reader.cached_count(), 2);
}

#[tokio::test]
async fn test_creator_installment_authorizes_per_file() {
    let creator = CountingWallet::named("creator");
    let scenario = creator_scenario(&[KeyServerMode::Honest; 5], &creator);
    scenario.commit().await;

    let results = scenario
        .reader(creator.clone())
        .request_installment(&creator.address(), &named_id("inst-3"))
        .await
        .unwrap();

    assert_eq!(results.len(), 2);
    assert!(results.iter().all(|(_, outcome)| outcome.is_ok()));
    assert_eq!(creator.prompts(), 1);
    assert_eq!(scenario.network.peak_in_flight(), 1, "key requests overlapped");
}

#[tokio::test(start_paused = true)]
async fn test_creator_installment_stops_at_first_quorum_failure() {
    let creator = CountingWallet::named("creator");
    let mut scenario = Scenario::new(&[KeyServerMode::Hang; 3], 1);
    scenario.add_column("col-1", &creator.address()).add_installment(
        "col-1",
        "inst-1",
        1,
        true,
        &[
            ("file-a", b"A".as_slice()),
            ("file-b", b"B".as_slice()),
            ("file-c", b"C".as_slice()),
        ],
    );
    scenario.commit().await;

    let reader = scenario.reader(creator.clone());
    let started = tokio::time::Instant::now();
    let err = reader
        .request_installment(&creator.address(), &named_id("inst-1"))
        .await
        .unwrap_err();

    assert!(matches!(err, ReaderError::Quorum(_)), "{err:?}");
    assert!(err.is_retryable());
    for server in scenario.network.servers() {
        assert_eq!(server.calls(), 1, "later files must not be requested");
    }
    assert_eq!(scenario.network.peak_in_flight(), 1);
    // One request timeout, not one per file.
    let elapsed = started.elapsed();
    assert!(elapsed >= Duration::from_secs(10) && elapsed < Duration::from_secs(20), "{elapsed:?}");
    assert_eq!(reader.cached_count(), 0);
}

#[tokio::test]
async fn test_creator_installment_denial_is_outer_error() {
    let creator = CountingWallet::named("creator");
    let scenario = creator_scenario(&[KeyServerMode::Deny; 5], &creator);
    scenario.commit().await;

    let err = scenario
        .reader(creator.clone())
        .request_installment(&creator.address(), &named_id("inst-3"))
        .await
        .unwrap_err();

    assert!(matches!(err, ReaderError::Unauthorized(_)), "{err:?}");
    assert!(!err.is_retryable());
}

#[tokio::test]
async fn test_installment_quorum_failure_is_outer_error() {
    use KeyServerMode::*;
    let creator = CountingWallet::named("creator");
    let subscriber = CountingWallet::named("subscriber");
    let mut scenario = creator_scenario(&[Down, Down, Down, Down, Honest], &creator);
    scenario.subscribe(&subscriber.address(), "col-1", "sub-1", START_MS);
    scenario.commit().await;

    let err = scenario
        .reader(subscriber.clone())
        .request_installment(&subscriber.address(), &named_id("inst-3"))
        .await
        .unwrap_err();
    assert!(matches!(err, ReaderError::Quorum(_)), "{err:?}");
}
