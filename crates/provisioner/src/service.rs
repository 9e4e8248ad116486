//! Pool service: the single owner of pool status, costs and configuration.
//!
//! Callers share one `Arc<PoolService>`; cost estimation runs as a background
//! task against it while create and close are awaited directly.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use solana_sdk::{pubkey::Pubkey, signature::Keypair, signer::Signer};
use tokio::task::JoinHandle;

use crate::batch::BatchSubmitter;
use crate::config::ProvisionerConfig;
use crate::connection::LedgerConnection;
use crate::costs::{self, AccountCosts};
use crate::error::{ProvisionError, ProvisionResult};
use crate::provisioner::{AccountProvisioner, PoolConfig};
use crate::state::{CostEstimate, PoolState, Status};

/// Tunables taken from [`ProvisionerConfig`]
#[derive(Debug, Clone, Copy)]
pub struct ServiceSettings {
    pub estimate_retry_interval: Duration,
    pub max_submit_attempts: u32,
    pub max_batch_size: usize,
}

impl Default for ServiceSettings {
    fn default() -> Self {
        Self::from(&ProvisionerConfig::default())
    }
}

impl From<&ProvisionerConfig> for ServiceSettings {
    fn from(config: &ProvisionerConfig) -> Self {
        Self {
            estimate_retry_interval: config.retry.estimate_retry_interval(),
            max_submit_attempts: config.retry.max_submit_attempts,
            max_batch_size: config.max_batch_size,
        }
    }
}

pub struct PoolService<C: ?Sized> {
    connection: Arc<C>,
    program_id: Option<Pubkey>,
    payer: Option<Arc<Keypair>>,
    parallelization: AtomicU64,
    settings: ServiceSettings,
    provisioner: AccountProvisioner,
    state: PoolState,
}

impl<C> PoolService<C>
where
    C: LedgerConnection + ?Sized + 'static,
{
    pub fn new(connection: Arc<C>, parallelization: u64, settings: ServiceSettings) -> Self {
        let provisioner = AccountProvisioner::new(
            BatchSubmitter::new(settings.max_submit_attempts),
            settings.max_batch_size,
        );

        Self {
            connection,
            program_id: None,
            payer: None,
            parallelization: AtomicU64::new(parallelization),
            settings,
            provisioner,
            state: PoolState::new(),
        }
    }

    pub fn with_program_id(mut self, program_id: Pubkey) -> Self {
        self.program_id = Some(program_id);
        self
    }

    pub fn with_payer(mut self, payer: Arc<Keypair>) -> Self {
        self.payer = Some(payer);
        self
    }

    pub fn status(&self) -> Status {
        self.state.status()
    }

    /// Costs of the current pool size, once estimated
    pub fn costs(&self) -> Option<AccountCosts> {
        self.state.estimate().map(|estimate| estimate.costs)
    }

    /// The active pool, if any
    pub fn pool(&self) -> Option<Arc<PoolConfig>> {
        self.state.pool()
    }

    pub fn parallelization(&self) -> u64 {
        self.parallelization.load(Ordering::SeqCst)
    }

    pub fn state(&self) -> &PoolState {
        &self.state
    }

    /// Start a cost estimate for the current pool size in the background.
    ///
    /// Any estimate already running is superseded and its result dropped.
    /// A stale active pool is released unless an operation holds the gate.
    pub fn refresh_costs(self: &Arc<Self>) -> JoinHandle<()> {
        let generation = self.state.next_generation();
        let parallelization = self.parallelization();
        if self.state.status() == Status::Active && self.state.deactivate() {
            log::info!("Released active pool for cost generation {}", generation);
        }

        let service = Arc::clone(self);
        tokio::spawn(async move {
            let estimate = costs::estimate_until_success(
                service.connection.as_ref(),
                parallelization,
                service.settings.estimate_retry_interval,
                service.state.generation(),
                generation,
            )
            .await;

            if let Some(costs) = estimate {
                let recorded = service.state.record_estimate(
                    generation,
                    CostEstimate { parallelization, costs },
                );
                if recorded {
                    log::info!(
                        "Pool of {} lanes costs {} lamports ({} per program account, {} per fee payer)",
                        parallelization,
                        costs.total,
                        costs.program_account_cost,
                        costs.fee_account_cost
                    );
                }
            }
        })
    }

    /// Change the pool size and re-estimate its cost
    pub fn set_parallelization(
        self: &Arc<Self>,
        parallelization: u64,
    ) -> ProvisionResult<JoinHandle<()>> {
        if parallelization == 0 {
            return Err(ProvisionError::invalid_parameter("parallelization", 0, "greater than 0"));
        }
        self.parallelization.store(parallelization, Ordering::SeqCst);
        Ok(self.refresh_costs())
    }

    /// Provision a new pool.
    ///
    /// Returns `Ok(None)` without doing anything when another create or close
    /// is in flight. On failure the status returns to `Inactive`.
    pub async fn create(&self) -> ProvisionResult<Option<Arc<PoolConfig>>> {
        let program_id = self.program_id.ok_or(ProvisionError::MissingPrecondition("program id"))?;
        let payer = self
            .payer
            .clone()
            .ok_or(ProvisionError::MissingPrecondition("payer keypair"))?;
        let estimate = self
            .state
            .estimate()
            .ok_or(ProvisionError::MissingPrecondition("account costs"))?;

        let Some(_gate) = self.state.gate().try_acquire() else {
            log::warn!("Pool operation already in progress, ignoring create");
            return Ok(None);
        };
        self.state.transition(Status::Inactive, Status::Creating)?;

        match self.provision(&program_id, &payer, &estimate).await {
            Ok(pool) => {
                let pool = Arc::new(pool);
                self.state.activate(Arc::clone(&pool));
                log::info!("Pool of {} lanes active", pool.parallelization());
                Ok(Some(pool))
            }
            Err(e) => {
                log::error!("Failed to create pool: {}", e);
                self.state.reset();
                Err(e)
            }
        }
    }

    async fn provision(
        &self,
        program_id: &Pubkey,
        payer: &Keypair,
        estimate: &CostEstimate,
    ) -> ProvisionResult<PoolConfig> {
        let available = self.connection.get_balance(&payer.pubkey()).await?;
        if available < estimate.costs.total {
            return Err(ProvisionError::InsufficientBalance {
                required: estimate.costs.total,
                available,
            });
        }

        self.provisioner
            .create(
                self.connection.as_ref(),
                program_id,
                payer,
                &estimate.costs,
                estimate.parallelization,
            )
            .await
    }

    /// Tear down the active pool, returning fee payer balances to the payer.
    ///
    /// Returns `Ok(false)` without doing anything when another create or close
    /// is in flight.
    pub async fn close(&self) -> ProvisionResult<bool> {
        let payer = self
            .payer
            .clone()
            .ok_or(ProvisionError::MissingPrecondition("payer keypair"))?;

        let Some(_gate) = self.state.gate().try_acquire() else {
            log::warn!("Pool operation already in progress, ignoring close");
            return Ok(false);
        };
        self.state.transition(Status::Active, Status::Closing)?;

        let result = match self.state.pool() {
            Some(pool) => {
                self.provisioner
                    .close(
                        self.connection.as_ref(),
                        &payer,
                        &pool.fee_payer_keypairs,
                        pool.parallelization() as u64,
                    )
                    .await
            }
            None => Err(ProvisionError::MissingPrecondition("active pool")),
        };

        self.state.reset();
        match result {
            Ok(_) => Ok(true),
            Err(e) => {
                log::error!("Failed to close pool: {}", e);
                Err(e)
            }
        }
    }

    /// Drop the active pool reference unless an operation is in flight
    pub fn deactivate(&self) {
        if !self.state.deactivate() {
            log::debug!("Pool operation in progress, not deactivating");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::MockConnection;

    fn service(
        connection: Arc<MockConnection>,
        payer: &Arc<Keypair>,
    ) -> Arc<PoolService<MockConnection>> {
        connection.set_balance(&payer.pubkey(), 1_000_000_000_000);
        Arc::new(
            PoolService::new(connection, 4, ServiceSettings::default())
                .with_program_id(Pubkey::new_unique())
                .with_payer(Arc::clone(payer)),
        )
    }

    #[tokio::test]
    async fn test_refresh_reaches_inactive() {
        let payer = Arc::new(Keypair::new());
        let service = service(Arc::new(MockConnection::new()), &payer);
        assert_eq!(service.status(), Status::Initializing);
        assert!(service.costs().is_none());

        service.refresh_costs().await.unwrap();
        assert_eq!(service.status(), Status::Inactive);
        let costs = service.costs().unwrap();
        assert_eq!(costs.total, 4 * costs.per_lane());
    }

    #[tokio::test]
    async fn test_create_requires_costs() {
        let payer = Arc::new(Keypair::new());
        let service = service(Arc::new(MockConnection::new()), &payer);

        let err = service.create().await.unwrap_err();
        assert!(matches!(err, ProvisionError::MissingPrecondition("account costs")));
        assert_eq!(service.status(), Status::Initializing);
    }

    #[tokio::test]
    async fn test_create_requires_program_id_and_payer() {
        let connection = Arc::new(MockConnection::new());
        let service = Arc::new(PoolService::new(connection, 4, ServiceSettings::default()));
        service.refresh_costs().await.unwrap();

        let err = service.create().await.unwrap_err();
        assert!(matches!(err, ProvisionError::MissingPrecondition("program id")));
        assert!(!service.state().gate().is_held());
    }

    #[tokio::test]
    async fn test_create_checks_payer_balance() {
        let connection = Arc::new(MockConnection::new());
        let payer = Arc::new(Keypair::new());
        let service = service(Arc::clone(&connection), &payer);
        service.refresh_costs().await.unwrap();
        connection.set_balance(&payer.pubkey(), 1);

        let err = service.create().await.unwrap_err();
        assert!(matches!(err, ProvisionError::InsufficientBalance { available: 1, .. }));
        assert_eq!(service.status(), Status::Inactive);
        assert_eq!(connection.send_attempts(), 0);
    }

    #[tokio::test]
    async fn test_create_and_close() {
        let connection = Arc::new(MockConnection::new());
        let payer = Arc::new(Keypair::new());
        let service = service(Arc::clone(&connection), &payer);
        service.refresh_costs().await.unwrap();

        let pool = service.create().await.unwrap().unwrap();
        assert_eq!(service.status(), Status::Active);
        assert_eq!(pool.parallelization(), 4);
        assert_eq!(pool.account_capacity, 256);
        assert!(!service.state().gate().is_held());

        assert!(service.close().await.unwrap());
        assert_eq!(service.status(), Status::Inactive);
        assert!(service.pool().is_none());
        assert_eq!(connection.sent_transactions().len(), 2);
    }

    #[tokio::test]
    async fn test_close_requires_active_pool() {
        let payer = Arc::new(Keypair::new());
        let service = service(Arc::new(MockConnection::new()), &payer);
        service.refresh_costs().await.unwrap();

        let err = service.close().await.unwrap_err();
        assert!(matches!(
            err,
            ProvisionError::InvalidStatus {
                expected: Status::Active,
                actual: Status::Inactive
            }
        ));
        assert!(!service.state().gate().is_held());
    }

    #[tokio::test]
    async fn test_failed_create_resets_to_inactive() {
        let connection = Arc::new(MockConnection::new());
        let payer = Arc::new(Keypair::new());
        let service = service(Arc::clone(&connection), &payer);
        service.refresh_costs().await.unwrap();
        connection.fail_all_sends();

        assert!(service.create().await.is_err());
        assert_eq!(service.status(), Status::Inactive);
        assert!(service.pool().is_none());
        assert!(!service.state().gate().is_held());
    }

    #[tokio::test]
    async fn test_failed_close_resets_to_inactive() {
        let connection = Arc::new(MockConnection::new());
        let payer = Arc::new(Keypair::new());
        let service = service(Arc::clone(&connection), &payer);
        service.refresh_costs().await.unwrap();
        service.create().await.unwrap().unwrap();
        connection.fail_next_sends(1);

        assert!(service.close().await.is_err());
        assert_eq!(service.status(), Status::Inactive);
        assert!(service.pool().is_none());
        assert!(!service.state().gate().is_held());
        // Close is a single attempt
        assert_eq!(connection.send_attempts(), 2);
    }

    #[tokio::test]
    async fn test_close_balance_read_failure_sends_nothing() {
        let connection = Arc::new(MockConnection::new());
        let payer = Arc::new(Keypair::new());
        let service = service(Arc::clone(&connection), &payer);
        service.refresh_costs().await.unwrap();
        service.create().await.unwrap().unwrap();
        let attempts = connection.send_attempts();
        connection.fail_next_queries(1);

        let err = service.close().await.unwrap_err();
        assert!(matches!(err, ProvisionError::Rpc(_)));
        assert_eq!(connection.send_attempts(), attempts);
        assert_eq!(service.status(), Status::Inactive);
        assert!(service.pool().is_none());
        assert!(!service.state().gate().is_held());
    }

    #[tokio::test]
    async fn test_set_parallelization_rejects_zero() {
        let payer = Arc::new(Keypair::new());
        let service = service(Arc::new(MockConnection::new()), &payer);
        assert!(service.set_parallelization(0).is_err());
        assert_eq!(service.parallelization(), 4);
    }
}
