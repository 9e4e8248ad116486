//! Lamport cost estimation for one account pool.
//!
//! A pool of `P` lanes shares a fixed storage budget of [`STORAGE_BUDGET`]
//! bits. Each lane gets a program account sized to its share of that budget
//! and a fee payer funded for one signature per storage bit, plus the rent
//! exempt minimum of an empty account.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::connection::LedgerConnection;
use crate::error::{ProvisionError, ProvisionResult};

/// Total storage, in bits, divided across all lanes of a pool
pub const STORAGE_BUDGET: u64 = 1000;

const BITS_PER_BYTE: u64 = 8;

/// Lamport costs of one pool
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccountCosts {
    /// Lamports transferred to each fee payer
    pub fee_account_cost: u64,
    /// Lamports funding each program account
    pub program_account_cost: u64,
    /// Cost of the whole pool
    pub total: u64,
}

impl AccountCosts {
    /// Cost of a single program/fee-payer pair
    pub fn per_lane(&self) -> u64 {
        self.program_account_cost.saturating_add(self.fee_account_cost)
    }
}

/// Bytes of program-account storage per lane: `ceil(1000 / P / 8)`
pub fn storage_units(parallelization: u64) -> ProvisionResult<u64> {
    if parallelization == 0 {
        return Err(ProvisionError::invalid_parameter(
            "parallelization",
            parallelization,
            "at least 1",
        ));
    }
    Ok(STORAGE_BUDGET.div_ceil(parallelization.saturating_mul(BITS_PER_BYTE)))
}

/// Transactions one fee payer can sign for: one per storage bit
pub fn tx_per_account(parallelization: u64) -> ProvisionResult<u64> {
    Ok(BITS_PER_BYTE * storage_units(parallelization)?)
}

/// Query the ledger and compute the cost of a pool of `parallelization` lanes
pub async fn compute_costs<C>(connection: &C, parallelization: u64) -> ProvisionResult<AccountCosts>
where
    C: LedgerConnection + ?Sized,
{
    let storage = storage_units(parallelization)?;
    let tx_count = tx_per_account(parallelization)?;

    let program_account_cost = connection
        .get_minimum_balance_for_rent_exemption(storage as usize)
        .await?;
    let lamports_per_signature = connection.get_lamports_per_signature().await?;
    let empty_account_rent = connection.get_minimum_balance_for_rent_exemption(0).await?;

    let fee_account_cost = tx_count
        .checked_mul(lamports_per_signature)
        .and_then(|fees| fees.checked_add(empty_account_rent))
        .ok_or(ProvisionError::Overflow("fee account cost"))?;

    let total = program_account_cost
        .checked_add(fee_account_cost)
        .and_then(|lane| lane.checked_mul(parallelization))
        .ok_or(ProvisionError::Overflow("pool cost"))?;

    Ok(AccountCosts {
        fee_account_cost,
        program_account_cost,
        total,
    })
}

/// Recompute costs until the ledger answers.
///
/// Every failure is logged and retried after `retry_interval`, with no
/// deadline. Returns `None` once `generation` has moved past `started_at`,
/// either between attempts or after the final successful query, so a
/// superseded request never hands back its result.
pub async fn estimate_until_success<C>(
    connection: &C,
    parallelization: u64,
    retry_interval: Duration,
    generation: &AtomicU64,
    started_at: u64,
) -> Option<AccountCosts>
where
    C: LedgerConnection + ?Sized,
{
    let mut attempt = 0u64;
    loop {
        if generation.load(Ordering::SeqCst) != started_at {
            log::debug!("Cost estimate for generation {} superseded", started_at);
            return None;
        }

        attempt += 1;
        match compute_costs(connection, parallelization).await {
            Ok(costs) => {
                if generation.load(Ordering::SeqCst) != started_at {
                    log::debug!("Dropping stale cost estimate for generation {}", started_at);
                    return None;
                }
                return Some(costs);
            }
            Err(e) => {
                log::warn!(
                    "Failed to estimate pool cost (attempt {}), retrying in {:?}: {}",
                    attempt,
                    retry_interval,
                    e
                );
                tokio::time::sleep(retry_interval).await;
            }
        }
    }
}
