//! Concurrency and lifecycle behavior of the gateway core.

mod common;

use std::sync::Arc;
use std::time::Duration;

use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use futures::future::join_all;
use signal_rest::account::AccountStatus;
use signal_rest::backend::{BackendErrorKind, RegisterOptions, api_group_id};
use signal_rest::error::GatewayError;
use signal_rest::gateway::{Gateway, GroupAction};
use signal_rest::send::OutgoingMessage;
use signal_rest_types::{SendMessageV1, SendMessageV2};

use common::{ACCOUNT, Dirs, OTHER_ACCOUNT, StubBackend};

fn message_to(sender: &str, recipient: &str) -> OutgoingMessage {
    OutgoingMessage::from_v2(SendMessageV2 {
        number: sender.to_string(),
        numbers: vec![recipient.to_string()],
        message: "hello".to_string(),
        ..Default::default()
    })
    .unwrap()
}

fn with_attachment(mut msg: OutgoingMessage) -> OutgoingMessage {
    let encoded = format!("data:text/plain;filename=note.txt;base64,{}", STANDARD.encode(b"payload"));
    msg.attachments
        .push(signal_rest::send::decode_upload(&encoded).unwrap());
    msg
}

#[tokio::test]
async fn writes_to_one_account_never_overlap() {
    let backend = Arc::new(StubBackend::with_delay(Duration::from_millis(30)));
    let dirs = Dirs::new();
    let gateway = Arc::new(dirs.gateway(backend.clone()));

    let sends = (0..5).map(|_| {
        let gateway = Arc::clone(&gateway);
        async move { gateway.send(message_to(ACCOUNT, OTHER_ACCOUNT)).await }
    });
    for result in join_all(sends).await {
        result.unwrap();
    }

    assert_eq!(backend.calls_to("send").len(), 5);
    assert_eq!(backend.peak_in_flight(), 1);
    assert!(backend.violations().is_empty(), "{:?}", backend.violations());
}

#[tokio::test]
async fn different_accounts_run_in_parallel() {
    let backend = Arc::new(StubBackend::with_delay(Duration::from_millis(200)));
    let dirs = Dirs::new();
    let gateway = dirs.gateway(backend.clone());

    let (a, b) = tokio::join!(
        gateway.send(message_to(ACCOUNT, "+15559990000")),
        gateway.send(message_to(OTHER_ACCOUNT, "+15559990000")),
    );
    a.unwrap();
    b.unwrap();

    assert_eq!(backend.peak_in_flight(), 2);
    assert!(backend.violations().is_empty());
}

#[tokio::test]
async fn reads_share_the_account_lock() {
    let backend = Arc::new(StubBackend::with_delay(Duration::from_millis(200)));
    let dirs = Dirs::new();
    let gateway = dirs.gateway(backend.clone());

    let (a, b, c) = tokio::join!(
        gateway.receive(ACCOUNT, None),
        gateway.list_groups(ACCOUNT),
        gateway.list_identities(ACCOUNT),
    );
    a.unwrap();
    b.unwrap();
    c.unwrap();

    assert_eq!(backend.peak_in_flight(), 3);
    assert!(backend.violations().is_empty());
}

#[tokio::test]
async fn writes_exclude_reads() {
    let backend = Arc::new(StubBackend::with_delay(Duration::from_millis(30)));
    let dirs = Dirs::new();
    let gateway = dirs.gateway(backend.clone());

    let (r1, w1, r2, w2) = tokio::join!(
        gateway.receive(ACCOUNT, None),
        gateway.send(message_to(ACCOUNT, OTHER_ACCOUNT)),
        gateway.list_groups(ACCOUNT),
        gateway.create_group(ACCOUNT, "Family", vec![OTHER_ACCOUNT.to_string()]),
    );
    r1.unwrap();
    w1.unwrap();
    r2.unwrap();
    w2.unwrap();

    assert_eq!(backend.calls().len(), 4);
    assert!(backend.violations().is_empty(), "{:?}", backend.violations());
}

#[tokio::test]
async fn receive_uses_configured_or_requested_timeout() {
    let backend = Arc::new(StubBackend::new());
    let dirs = Dirs::new();
    let gateway = dirs
        .gateway(backend.clone())
        .with_receive_timeout(Duration::from_secs(3));

    gateway.receive(ACCOUNT, None).await.unwrap();
    gateway
        .receive(ACCOUNT, Some(Duration::from_secs(10)))
        .await
        .unwrap();

    let details: Vec<String> = backend
        .calls_to("receive")
        .into_iter()
        .map(|c| c.detail)
        .collect();
    assert_eq!(details, vec!["3", "10"]);
}

#[tokio::test]
async fn staged_attachments_exist_during_send_and_are_released_after() {
    let backend = Arc::new(StubBackend::new());
    let dirs = Dirs::new();
    let gateway = dirs.gateway(backend.clone());

    let response = gateway
        .send(with_attachment(message_to(ACCOUNT, OTHER_ACCOUNT)))
        .await
        .unwrap();
    assert_eq!(response.results.len(), 1);

    let seen = backend.attachments();
    assert_eq!(seen.len(), 1);
    assert!(seen[0].1, "attachment missing during send");
    assert!(seen[0].0.starts_with(dirs.attachments.path()));
    assert!(
        seen[0].0.extension().is_some_and(|ext| ext == "txt"),
        "{:?}",
        seen[0].0
    );
    assert!(Dirs::leftovers(&dirs.attachments).is_empty());
}

#[tokio::test]
async fn staged_attachments_are_released_after_failure() {
    let backend = Arc::new(StubBackend::new());
    backend.fail("send:numbers", BackendErrorKind::RateLimited);
    let dirs = Dirs::new();
    let gateway = dirs.gateway(backend.clone());

    let err = gateway
        .send(with_attachment(message_to(ACCOUNT, OTHER_ACCOUNT)))
        .await
        .unwrap_err();
    match err {
        GatewayError::Backend(e) => assert_eq!(e.kind, BackendErrorKind::RateLimited),
        other => panic!("unexpected error: {other:?}"),
    }
    assert!(Dirs::leftovers(&dirs.attachments).is_empty());
}

#[tokio::test]
async fn staging_is_empty_after_a_batch_of_mixed_sends() {
    let backend = Arc::new(StubBackend::with_delay(Duration::from_millis(5)));
    backend.fail("send:bad=", BackendErrorKind::UnknownGroup);
    let dirs = Dirs::new();
    let gateway = Arc::new(dirs.gateway(backend.clone()));
    assert!(Dirs::leftovers(&dirs.attachments).is_empty());

    let good = api_group_id("good=");
    let bad = api_group_id("bad=");
    let shapes: [(Vec<&str>, Vec<&str>); 4] = [
        (vec![OTHER_ACCOUNT], vec![]),
        (vec![], vec![bad.as_str()]),
        (vec![OTHER_ACCOUNT], vec![bad.as_str()]),
        (vec![], vec![good.as_str(), bad.as_str()]),
    ];
    let messages: Vec<OutgoingMessage> = [ACCOUNT, OTHER_ACCOUNT]
        .iter()
        .flat_map(|sender| {
            shapes.iter().map(move |(numbers, groups)| {
                let message = OutgoingMessage::from_v2(SendMessageV2 {
                    number: sender.to_string(),
                    numbers: numbers.iter().map(|n| n.to_string()).collect(),
                    groups: groups.iter().map(|g| g.to_string()).collect(),
                    message: "batch".to_string(),
                    ..Default::default()
                })
                .unwrap();
                with_attachment(with_attachment(message))
            })
        })
        .collect();

    let sends = messages.into_iter().map(|message| {
        let gateway = Arc::clone(&gateway);
        async move { gateway.send(message).await }
    });
    let results = join_all(sends).await;

    let failed = results.iter().filter(|r| r.is_err()).count();
    let partial = results
        .iter()
        .filter_map(|r| r.as_ref().ok())
        .filter(|r| r.results.iter().any(|t| t.error.is_some()))
        .count();
    assert_eq!(failed, 2);
    assert_eq!(partial, 4);

    let seen = backend.attachments();
    assert!(!seen.is_empty());
    assert!(seen.iter().all(|(_, existed)| *existed));
    assert!(backend.violations().is_empty(), "{:?}", backend.violations());
    assert!(Dirs::leftovers(&dirs.attachments).is_empty());
}

#[tokio::test]
async fn avatar_is_staged_and_released() {
    let backend = Arc::new(StubBackend::new());
    let dirs = Dirs::new();
    let gateway = dirs.gateway(backend.clone());

    let avatar = STANDARD.encode(b"png-bytes");
    gateway
        .update_profile(ACCOUNT, "Alice", Some(&avatar))
        .await
        .unwrap();

    let seen = backend.attachments();
    assert_eq!(seen.len(), 1);
    assert!(seen[0].1);
    assert!(seen[0].0.starts_with(dirs.avatars.path()));
    assert!(Dirs::leftovers(&dirs.avatars).is_empty());
}

#[tokio::test]
async fn invalid_avatar_is_rejected_before_backend() {
    let backend = Arc::new(StubBackend::new());
    let dirs = Dirs::new();
    let gateway = dirs.gateway(backend.clone());

    let err = gateway
        .update_profile(ACCOUNT, "Alice", Some("%%%"))
        .await
        .unwrap_err();
    assert!(matches!(err, GatewayError::BadRequest(_)));
    assert!(backend.calls().is_empty());
}

#[tokio::test]
async fn partial_send_failure_reports_per_target_results() {
    let backend = Arc::new(StubBackend::new());
    backend.fail("send:bad=", BackendErrorKind::UnknownGroup);
    let dirs = Dirs::new();
    let gateway = dirs.gateway(backend.clone());

    let good = api_group_id("good=");
    let bad = api_group_id("bad=");
    let message = OutgoingMessage::from_v2(SendMessageV2 {
        number: ACCOUNT.to_string(),
        numbers: vec![OTHER_ACCOUNT.to_string()],
        groups: vec![good.clone(), bad.clone()],
        message: "hi".to_string(),
        ..Default::default()
    })
    .unwrap();

    let response = gateway.send(message).await.unwrap();
    assert_eq!(response.results.len(), 3);
    assert_eq!(response.timestamp.as_deref(), Some("1700000000000"));

    let failed: Vec<_> = response
        .results
        .iter()
        .filter(|r| r.error.is_some())
        .map(|r| r.recipient.as_str())
        .collect();
    assert_eq!(failed, vec![bad.as_str()]);
    assert_eq!(backend.calls_to("send").len(), 3);
}

#[tokio::test]
async fn v1_group_send_targets_the_group() {
    let backend = Arc::new(StubBackend::new());
    let dirs = Dirs::new();
    let gateway = dirs.gateway(backend.clone());

    let message = OutgoingMessage::from_v1(SendMessageV1 {
        number: ACCOUNT.to_string(),
        recipients: vec!["abc=".to_string()],
        message: "hi".to_string(),
        is_group: true,
        ..Default::default()
    })
    .unwrap();
    let response = gateway.send(message).await.unwrap();
    assert_eq!(response.results[0].recipient, api_group_id("abc="));
}

#[tokio::test]
async fn empty_v2_send_fails_before_any_lock() {
    let backend = Arc::new(StubBackend::new());
    let dirs = Dirs::new();
    let gateway = dirs.gateway(backend.clone());

    let err = OutgoingMessage::from_v2(SendMessageV2 {
        number: ACCOUNT.to_string(),
        ..Default::default()
    })
    .unwrap_err();
    assert!(matches!(err, GatewayError::BadRequest(_)));

    // A group id the backend could never resolve is also caught up front.
    let err = gateway
        .send(OutgoingMessage::from_v2(SendMessageV2 {
            number: ACCOUNT.to_string(),
            groups: vec!["not-a-group".to_string()],
            ..Default::default()
        })
        .unwrap())
        .await
        .unwrap_err();
    assert!(matches!(err, GatewayError::BadRequest(_)));

    assert!(gateway.locks().is_empty());
    assert!(backend.calls().is_empty());
}

#[tokio::test]
async fn verify_without_registration_conflicts() {
    let backend = Arc::new(StubBackend::new());
    let dirs = Dirs::new();
    let gateway = dirs.gateway(backend.clone());

    let err = gateway.verify(ACCOUNT, "123-456", None).await.unwrap_err();
    assert!(matches!(err, GatewayError::Conflict(_)));
    assert!(backend.calls().is_empty());
}

#[tokio::test]
async fn verify_queued_behind_register_sees_the_registration() {
    let backend = Arc::new(StubBackend::new());
    backend.close_gate();
    let dirs = Dirs::new();
    let gateway = Arc::new(dirs.gateway(backend.clone()));

    let register = tokio::spawn({
        let gateway = Arc::clone(&gateway);
        async move { gateway.register(ACCOUNT, RegisterOptions::default()).await }
    });
    while backend.in_flight() == 0 {
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    let verify = tokio::spawn({
        let gateway = Arc::clone(&gateway);
        async move { gateway.verify(ACCOUNT, "123-456", None).await }
    });
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert!(!verify.is_finished());

    backend.open_gate();
    register.await.unwrap().unwrap();
    verify.await.unwrap().unwrap();
    assert_eq!(backend.calls_to("verify").len(), 1);
    assert_eq!(
        gateway.accounts().current_status(ACCOUNT).await,
        AccountStatus::Registered
    );
}

#[tokio::test]
async fn registration_lifecycle_is_recorded() {
    let backend = Arc::new(StubBackend::new());
    let dirs = Dirs::new();
    let gateway = dirs.gateway(backend.clone());

    gateway
        .register(ACCOUNT, RegisterOptions::default())
        .await
        .unwrap();
    assert_eq!(
        gateway.accounts().current_status(ACCOUNT).await,
        AccountStatus::RegistrationPending
    );

    gateway.verify(ACCOUNT, "123-456", None).await.unwrap();
    assert_eq!(
        gateway.accounts().current_status(ACCOUNT).await,
        AccountStatus::Registered
    );
    assert_eq!(backend.calls_to("verify")[0].detail, "123-456");
}

#[tokio::test]
async fn failed_register_leaves_status_untouched() {
    let backend = Arc::new(StubBackend::new());
    backend.fail("register", BackendErrorKind::CaptchaRequired);
    let dirs = Dirs::new();
    let gateway = dirs.gateway(backend.clone());

    let err = gateway
        .register(ACCOUNT, RegisterOptions::default())
        .await
        .unwrap_err();
    assert_eq!(err.kind(), "backend_error");
    assert_eq!(
        gateway.accounts().current_status(ACCOUNT).await,
        AccountStatus::Unregistered
    );
}

#[tokio::test]
async fn busy_when_lock_cannot_be_acquired_in_time() {
    let backend = Arc::new(StubBackend::new());
    backend.close_gate();
    let dirs = Dirs::new();
    let gateway = Arc::new(
        dirs.gateway(backend.clone())
            .with_acquire_timeout(Some(Duration::from_millis(50))),
    );

    let holder = {
        let gateway = Arc::clone(&gateway);
        tokio::spawn(async move { gateway.send(message_to(ACCOUNT, OTHER_ACCOUNT)).await })
    };
    while backend.in_flight() == 0 {
        tokio::time::sleep(Duration::from_millis(5)).await;
    }

    let err = gateway
        .send(with_attachment(message_to(ACCOUNT, OTHER_ACCOUNT)))
        .await
        .unwrap_err();
    assert!(matches!(err, GatewayError::Busy(_)));
    // The rejected request's upload was staged and must be gone again.
    assert!(Dirs::leftovers(&dirs.attachments).is_empty());

    // Other accounts are unaffected.
    backend.open_gate();
    gateway.receive(OTHER_ACCOUNT, None).await.unwrap();
    holder.await.unwrap().unwrap();
    assert_eq!(backend.calls_to("send").len(), 1);
}

#[tokio::test]
async fn timed_out_operation_keeps_the_account_locked() {
    let backend = Arc::new(StubBackend::with_delay(Duration::from_millis(300)));
    let dirs = Dirs::new();
    let gateway = dirs
        .gateway(backend.clone())
        .with_operation_timeout(Some(Duration::from_millis(50)));

    let err = gateway
        .send(message_to(ACCOUNT, OTHER_ACCOUNT))
        .await
        .unwrap_err();
    assert!(matches!(err, GatewayError::Timeout(_)));

    // The first send is still running; this one must queue behind it.
    let gateway = gateway.with_operation_timeout(None);
    gateway.send(message_to(ACCOUNT, OTHER_ACCOUNT)).await.unwrap();

    assert_eq!(backend.calls_to("send").len(), 2);
    assert!(backend.violations().is_empty(), "{:?}", backend.violations());
}

#[tokio::test]
async fn abandoned_request_does_not_release_the_lock_early() {
    let backend = Arc::new(StubBackend::with_delay(Duration::from_millis(200)));
    let dirs = Dirs::new();
    let gateway = Arc::new(dirs.gateway(backend.clone()));

    let abandoned = {
        let gateway = Arc::clone(&gateway);
        tokio::spawn(async move {
            gateway
                .send(with_attachment(message_to(ACCOUNT, OTHER_ACCOUNT)))
                .await
        })
    };
    while backend.in_flight() == 0 {
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    abandoned.abort();

    gateway.send(message_to(ACCOUNT, OTHER_ACCOUNT)).await.unwrap();

    assert_eq!(backend.calls_to("send").len(), 2);
    assert!(backend.violations().is_empty(), "{:?}", backend.violations());
    assert!(Dirs::leftovers(&dirs.attachments).is_empty());
}

#[tokio::test]
async fn group_lookup_and_actions() {
    let backend = Arc::new(StubBackend::new());
    backend.add_group("abc=", "Family");
    let dirs = Dirs::new();
    let gateway = dirs.gateway(backend.clone());

    let id = api_group_id("abc=");
    let group = gateway.get_group(ACCOUNT, &id).await.unwrap();
    assert_eq!(group.name, "Family");

    let err = gateway
        .get_group(ACCOUNT, &api_group_id("missing="))
        .await
        .unwrap_err();
    assert!(matches!(err, GatewayError::NotFound(_)));

    let err = gateway.get_group(ACCOUNT, "abc=").await.unwrap_err();
    assert!(matches!(err, GatewayError::BadRequest(_)));

    gateway
        .group_action(ACCOUNT, &id, GroupAction::Block)
        .await
        .unwrap();
    gateway
        .group_action(ACCOUNT, &id, GroupAction::Delete)
        .await
        .unwrap();
    assert_eq!(backend.calls_to("block_group")[0].detail, "abc=");
    assert!(gateway.list_groups(ACCOUNT).await.unwrap().is_empty());
}

#[tokio::test]
async fn created_group_id_uses_api_form() {
    let backend = Arc::new(StubBackend::new());
    let dirs = Dirs::new();
    let gateway = dirs.gateway(backend.clone());

    let created = gateway
        .create_group(ACCOUNT, "Book club", vec![OTHER_ACCOUNT.to_string()])
        .await
        .unwrap();
    assert_eq!(created.id, api_group_id("id-0"));

    let err = gateway.create_group(ACCOUNT, "  ", vec![]).await.unwrap_err();
    assert!(matches!(err, GatewayError::BadRequest(_)));
}

#[tokio::test]
async fn trust_without_safety_number_trusts_all_keys() {
    let backend = Arc::new(StubBackend::new());
    let dirs = Dirs::new();
    let gateway = dirs.gateway(backend.clone());

    gateway
        .trust_identity(ACCOUNT, OTHER_ACCOUNT, Some(String::new()))
        .await
        .unwrap();
    gateway
        .trust_identity(ACCOUNT, OTHER_ACCOUNT, Some("12345".to_string()))
        .await
        .unwrap();

    let details: Vec<String> = backend
        .calls_to("trust_identity")
        .into_iter()
        .map(|c| c.detail)
        .collect();
    assert_eq!(
        details,
        vec![format!("{OTHER_ACCOUNT}:all"), format!("{OTHER_ACCOUNT}:12345")]
    );
}

#[tokio::test]
async fn link_records_linked_account() {
    let backend = Arc::new(StubBackend::new());
    let dirs = Dirs::new();
    let gateway: Gateway = dirs.gateway(backend.clone());

    let uri = gateway.link("my-laptop").await.unwrap();
    assert_eq!(uri, common::LINK_URI);

    let mut status = AccountStatus::Unregistered;
    for _ in 0..50 {
        status = gateway.accounts().current_status(common::LINKED_NUMBER).await;
        if status == AccountStatus::Linked {
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    assert_eq!(status, AccountStatus::Linked);

    let err = gateway.link(" ").await.unwrap_err();
    assert!(matches!(err, GatewayError::BadRequest(_)));
}
