//! Accounts and frozen keys across nodes.

use std::sync::Arc;

use serde_json::json;
use tessera::core::frozen_key;
use tessera::identity::Identity;
use tessera::net::{compare_stores, ConnectionId, MessageBody, WireMessage};
use tessera::store::Store;
use tessera::{NodeError, Notification, Side, VerifyResult};
use tessera_testkit::{init_tracing, TestMesh};
use tokio::sync::broadcast;

fn drain(rx: &mut broadcast::Receiver<Notification>) -> Vec<Notification> {
    let mut out = Vec::new();
    while let Ok(notification) = rx.try_recv() {
        out.push(notification);
    }
    out
}

/// Two nodes claim `==alice` at different times before either hears of the
/// other. `first` claims 1s earlier.
async fn race_for_alice(first: usize) -> anyhow::Result<()> {
    let second = 1 - first;
    let mut mesh = TestMesh::new(2);
    mesh.connect_all();
    mesh.pump().await;

    let mut first_rx = mesh.node(first).notifications();
    let mut second_rx = mesh.node(second).notifications();

    let winner = mesh.node(first).sign_up("alice", "first-pw").await?;
    mesh.clock.advance(1_000);
    let loser = mesh.node(second).sign_up("alice", "second-pw").await?;
    mesh.pump().await;

    // The earlier claim is final on both replicas.
    for node in mesh.nodes() {
        let stored = node.store().get(&frozen_key("alice")).await?;
        assert_eq!(stored.map(|r| r.address), Some(winner.address));
    }
    let converged = compare_stores(mesh.node(0).store(), mesh.node(1).store(), "==").await?;
    assert!(converged.is_converged());

    // The first writer refused the later claim outright.
    assert!(drain(&mut first_rx).iter().any(|n| matches!(
        n,
        Notification::Rejected {
            result: VerifyResult::CantOverwrite,
            ..
        }
    )));

    // The later writer replaced its own claim and was told so.
    let events = drain(&mut second_rx);
    let report = events
        .iter()
        .find_map(|n| match n {
            Notification::ConflictResolved(report) => Some(report.clone()),
            _ => None,
        })
        .expect("conflict reported");
    assert_eq!(report.winner, Side::Remote);
    assert_eq!(report.winning_address(), winner.address);
    assert_eq!(report.losing_address(), loser.address);
    assert!(events.contains(&Notification::ClaimSuperseded {
        key: frozen_key("alice"),
        winner: winner.address,
    }));

    // Only the winner's password opens the surviving account.
    let late = Arc::clone(mesh.node(second));
    late.sign_out()?;
    assert!(matches!(
        late.sign_in("alice", "second-pw").await,
        Err(NodeError::WrongPassword)
    ));
    let session = late.sign_in("alice", "first-pw").await?;
    assert_eq!(session.address, winner.address);
    Ok(())
}

#[tokio::test]
async fn test_first_claim_wins_from_node_zero() -> anyhow::Result<()> {
    init_tracing();
    race_for_alice(0).await
}

#[tokio::test]
async fn test_first_claim_wins_from_node_one() -> anyhow::Result<()> {
    init_tracing();
    race_for_alice(1).await
}

/// Two isolated nodes claim `==erin` 1s apart; a third node hears the two
/// claims in the given order.
async fn claims_reach_third_node(delivered_first: usize) -> anyhow::Result<()> {
    let mut mesh = TestMesh::new(3);
    let early = mesh.node(0).sign_up("erin", "early").await?;
    mesh.clock.advance(1_000);
    let late = mesh.node(1).sign_up("erin", "late").await?;
    assert_ne!(early.address, late.address);

    let key = frozen_key("erin");
    let order = [delivered_first, 1 - delivered_first];
    for (n, &from) in order.iter().enumerate() {
        let claim = mesh.node(from).store().get(&key).await?.expect("claim stored");
        let frame = WireMessage::new(MessageBody::Put { record: claim }).encode()?;
        mesh.node(2).on_client_message(&frame, ConnectionId(900 + n as u64)).await?;
    }
    let stored = mesh.node(2).store().get(&key).await?;
    assert_eq!(stored.map(|r| r.address), Some(early.address));

    // Once the late writer asks around, every replica agrees.
    mesh.connect_all();
    mesh.pump().await;
    let late_node = Arc::clone(mesh.node(1));
    let (answer, _) = tokio::join!(late_node.get_fresh(&key), mesh.pump());
    assert!(answer?.is_some());
    mesh.pump().await;
    for node in mesh.nodes() {
        let stored = node.store().get(&key).await?;
        assert_eq!(stored.map(|r| r.address), Some(early.address));
    }
    for i in 1..3 {
        let result = compare_stores(mesh.node(0).store(), mesh.node(i).store(), "==").await?;
        assert!(result.is_converged(), "node-{i}: {result:?}");
    }
    Ok(())
}

#[tokio::test]
async fn test_third_node_keeps_early_claim_heard_first() -> anyhow::Result<()> {
    init_tracing();
    claims_reach_third_node(0).await
}

#[tokio::test]
async fn test_third_node_keeps_early_claim_heard_last() -> anyhow::Result<()> {
    init_tracing();
    claims_reach_third_node(1).await
}

#[tokio::test]
async fn test_sign_up_refuses_known_claim() -> anyhow::Result<()> {
    init_tracing();
    let mut mesh = TestMesh::new(2);
    mesh.connect_all();
    mesh.pump().await;

    let owner = mesh.node(0).sign_up("bob", "pw").await?;
    mesh.pump().await;

    match mesh.node(1).sign_up("bob", "other").await {
        Err(NodeError::UserExists { address, .. }) => assert_eq!(address, owner.address),
        other => panic!("expected UserExists, got {other:?}"),
    }
    Ok(())
}

#[tokio::test]
async fn test_sign_in_fetches_account_from_peer() -> anyhow::Result<()> {
    init_tracing();
    let mut mesh = TestMesh::new(2);
    let account = mesh.node(0).sign_up("carol", "s3cret").await?;

    // node-1 never saw the claim being written.
    mesh.connect_all();
    mesh.pump().await;
    assert!(mesh.node(1).store().get(&frozen_key("carol")).await?.is_none());

    let device = Arc::clone(mesh.node(1));
    let (session, _) = tokio::join!(device.sign_in("carol", "s3cret"), mesh.pump());
    let session = session?;
    assert_eq!(session.address, account.address);
    assert_eq!(device.identity().address()?, account.address);
    assert_eq!(device.session(), Some(session));
    Ok(())
}

#[tokio::test]
async fn test_unknown_user_after_timeout() -> anyhow::Result<()> {
    init_tracing();
    let mut mesh = TestMesh::new(2);
    mesh.connect_all();
    mesh.pump().await;

    let device = Arc::clone(mesh.node(1));
    let (outcome, _) = tokio::join!(device.sign_in("nobody", "pw"), mesh.pump());
    assert!(matches!(outcome, Err(NodeError::UserNotFound(name)) if name == "nobody"));
    Ok(())
}

#[tokio::test]
async fn test_same_account_on_two_devices_never_conflicts() -> anyhow::Result<()> {
    init_tracing();
    let mut mesh = TestMesh::new(2);
    mesh.connect_all();
    mesh.pump().await;

    mesh.node(0).sign_up("dave", "pw").await?;
    mesh.pump().await;
    mesh.node(1).sign_in("dave", "pw").await?;

    let mut rx0 = mesh.node(0).notifications();
    let mut rx1 = mesh.node(1).notifications();

    // Both devices write the same frozen key under the same address.
    mesh.node(0).put(&frozen_key("dave-status"), json!("phone")).await?;
    mesh.clock.advance(1_000);
    mesh.node(1).put(&frozen_key("dave-status"), json!("laptop")).await?;
    mesh.pump().await;

    for rx in [&mut rx0, &mut rx1] {
        let events = drain(rx);
        assert!(!events.iter().any(|n| matches!(
            n,
            Notification::ConflictResolved(_) | Notification::ClaimSuperseded { .. } | Notification::Rejected { .. }
        )));
    }

    // The owner's newer copy replaces the older one everywhere.
    for node in mesh.nodes() {
        let stored = node.store().get(&frozen_key("dave-status")).await?;
        assert_eq!(stored.map(|r| r.value), Some(json!("laptop")));
    }
    Ok(())
}
