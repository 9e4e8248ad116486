pub mod batch;
pub mod config;
pub mod connection;
pub mod costs;
pub mod error;
pub mod provisioner;
pub mod service;
pub mod state;
pub mod testing;

pub use batch::BatchSubmitter;
pub use config::{ProvisionerConfig, RetryConfig};
pub use connection::{LedgerConnection, RpcConnection};
pub use costs::{compute_costs, storage_units, tx_per_account, AccountCosts};
pub use error::{ProvisionError, ProvisionResult};
pub use provisioner::{plan_batches, AccountProvisioner, PoolConfig, PoolSummary};
pub use service::{PoolService, ServiceSettings};
pub use state::{ExclusiveGate, PoolState, Status};
