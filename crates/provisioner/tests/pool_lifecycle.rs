//! End-to-end pool lifecycle against a mock ledger

use std::sync::Arc;
use std::time::Duration;

use pool_provisioner::testing::MockConnection;
use pool_provisioner::{compute_costs, PoolService, ProvisionError, ServiceSettings, Status};
use solana_sdk::{pubkey::Pubkey, signature::Keypair, signer::Signer};

fn service(
    connection: &Arc<MockConnection>,
    parallelization: u64,
) -> Arc<PoolService<MockConnection>> {
    let payer = Keypair::new();
    connection.set_balance(&payer.pubkey(), 1_000_000_000_000);
    Arc::new(
        PoolService::new(Arc::clone(connection), parallelization, ServiceSettings::default())
            .with_program_id(Pubkey::new_unique())
            .with_payer(Arc::new(payer)),
    )
}

#[tokio::test]
async fn test_four_lanes_fit_one_batch() {
    let connection = Arc::new(MockConnection::new());
    let service = service(&connection, 4);
    service.refresh_costs().await.unwrap();

    let pool = service.create().await.unwrap().unwrap();
    assert_eq!(pool.program_accounts.len(), 4);
    assert_eq!(pool.account_capacity, 256);

    let sent = connection.sent_transactions();
    assert_eq!(sent.len(), 1);
    assert_eq!(sent[0].message.instructions.len(), 8);
}

#[tokio::test]
async fn test_twelve_lanes_split_into_three_batches() {
    let connection = Arc::new(MockConnection::new());
    let service = service(&connection, 12);
    service.refresh_costs().await.unwrap();

    let pool = service.create().await.unwrap().unwrap();
    assert_eq!(pool.fee_payer_keypairs.len(), 12);

    let lanes: Vec<usize> = connection
        .sent_transactions()
        .iter()
        .map(|tx| tx.message.instructions.len() / 2)
        .collect();
    assert_eq!(lanes, vec![5, 5, 2]);
}

#[tokio::test(start_paused = true)]
async fn test_concurrent_create_is_ignored() {
    let connection = Arc::new(MockConnection::new().with_send_delay(Duration::from_millis(250)));
    let service = service(&connection, 4);
    service.refresh_costs().await.unwrap();

    let (first, second) = tokio::join!(service.create(), service.create());

    assert!(first.unwrap().is_some());
    assert!(second.unwrap().is_none());
    assert_eq!(connection.sent_transactions().len(), 1);
    assert_eq!(service.status(), Status::Active);
}

#[tokio::test(start_paused = true)]
async fn test_close_while_creating_is_ignored() {
    let connection = Arc::new(MockConnection::new().with_send_delay(Duration::from_millis(250)));
    let service = service(&connection, 4);
    service.refresh_costs().await.unwrap();

    let (created, closed) = tokio::join!(service.create(), service.close());

    assert!(created.unwrap().is_some());
    assert!(!closed.unwrap());
    assert_eq!(service.status(), Status::Active);
}

#[tokio::test]
async fn test_submission_gives_up_after_three_attempts() {
    let connection = Arc::new(MockConnection::new());
    let service = service(&connection, 12);
    service.refresh_costs().await.unwrap();
    connection.fail_all_sends();

    let err = service.create().await.unwrap_err();
    assert!(matches!(err, ProvisionError::CouldNotConfirm { attempts: 3, .. }));
    assert_eq!(connection.send_attempts(), 3);
    assert_eq!(service.status(), Status::Inactive);
    assert!(service.pool().is_none());

    // The gate is free again
    connection.fail_next_sends(0);
    assert!(service.create().await.unwrap().is_some());
}

#[tokio::test(start_paused = true)]
async fn test_estimate_survives_network_failures() {
    let connection = Arc::new(MockConnection::new());
    connection.fail_next_queries(4);
    let service = service(&connection, 4);

    service.refresh_costs().await.unwrap();

    assert_eq!(service.status(), Status::Inactive);
    let expected = compute_costs(&MockConnection::new(), 4).await.unwrap();
    assert_eq!(service.costs(), Some(expected));
}

#[tokio::test(start_paused = true)]
async fn test_superseded_estimate_is_dropped() {
    let connection = Arc::new(MockConnection::new().with_query_delay(Duration::from_secs(1)));
    let service = service(&connection, 4);

    let first = service.refresh_costs();
    tokio::time::sleep(Duration::from_millis(500)).await;
    let second = service.set_parallelization(8).unwrap();

    first.await.unwrap();
    assert!(service.costs().is_none());
    assert_eq!(service.status(), Status::Initializing);

    second.await.unwrap();
    let expected = compute_costs(&MockConnection::new(), 8).await.unwrap();
    assert_eq!(service.costs(), Some(expected));
    assert_eq!(service.state().estimate().unwrap().parallelization, 8);
    assert_eq!(service.status(), Status::Inactive);
}

#[tokio::test]
async fn test_recalculation_releases_active_pool() {
    let connection = Arc::new(MockConnection::new());
    let service = service(&connection, 4);
    service.refresh_costs().await.unwrap();
    service.create().await.unwrap().unwrap();
    assert_eq!(service.status(), Status::Active);

    let refresh = service.set_parallelization(6).unwrap();
    assert_eq!(service.status(), Status::Inactive);
    assert!(service.pool().is_none());

    refresh.await.unwrap();
    let pool = service.create().await.unwrap().unwrap();
    assert_eq!(pool.program_accounts.len(), 6);
}

#[tokio::test]
async fn test_close_returns_to_inactive() {
    let connection = Arc::new(MockConnection::new());
    let service = service(&connection, 7);
    service.refresh_costs().await.unwrap();

    let pool = service.create().await.unwrap().unwrap();
    let costs = service.costs().unwrap();
    for fee_payer in &pool.fee_payer_keypairs {
        connection.set_balance(&fee_payer.pubkey(), costs.fee_account_cost);
    }

    assert!(service.close().await.unwrap());
    assert_eq!(service.status(), Status::Inactive);

    let sent = connection.sent_transactions();
    let close_tx = sent.last().unwrap();
    assert_eq!(close_tx.message.instructions.len(), 7);
    assert_eq!(close_tx.signatures.len(), 8);
}
