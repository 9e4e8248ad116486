//! Testing utilities for the pool provisioner
//!
//! [`MockConnection`] stands in for a cluster: rent and fees follow fixed
//! formulas, balances are set by hand, and queries or submissions can be made
//! to fail on demand.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use solana_sdk::{
    commitment_config::CommitmentLevel,
    hash::Hash,
    pubkey::Pubkey,
    signature::Signature,
    transaction::Transaction,
};

use crate::connection::LedgerConnection;
use crate::error::{ProvisionError, ProvisionResult};

type RentFn = Box<dyn Fn(usize) -> u64 + Send + Sync>;

/// In-memory [`LedgerConnection`] with scripted failures
pub struct MockConnection {
    rent: RentFn,
    lamports_per_signature: u64,
    balances: Mutex<HashMap<Pubkey, u64>>,
    query_failures: AtomicU32,
    send_failures: AtomicU32,
    /// Successful sends allowed before every send fails
    sends_before_failure: Mutex<Option<u32>>,
    send_delay: Duration,
    query_delay: Duration,
    send_attempts: AtomicU32,
    sent: Mutex<Vec<Transaction>>,
    last_preflight: Mutex<Option<CommitmentLevel>>,
}

impl Default for MockConnection {
    fn default() -> Self {
        Self::new()
    }
}

impl MockConnection {
    pub const LAMPORTS_PER_SIGNATURE: u64 = 5000;

    /// Rent exempt minimum on mainnet: two years of 3480 lamports per byte-year,
    /// counting 128 bytes of account metadata
    pub fn rent_for(data_len: usize) -> u64 {
        (128 + data_len as u64) * 3480 * 2
    }

    pub fn new() -> Self {
        Self {
            rent: Box::new(Self::rent_for),
            lamports_per_signature: Self::LAMPORTS_PER_SIGNATURE,
            balances: Mutex::new(HashMap::new()),
            query_failures: AtomicU32::new(0),
            send_failures: AtomicU32::new(0),
            sends_before_failure: Mutex::new(None),
            send_delay: Duration::ZERO,
            query_delay: Duration::ZERO,
            send_attempts: AtomicU32::new(0),
            sent: Mutex::new(Vec::new()),
            last_preflight: Mutex::new(None),
        }
    }

    pub fn with_rent(mut self, rent: impl Fn(usize) -> u64 + Send + Sync + 'static) -> Self {
        self.rent = Box::new(rent);
        self
    }

    pub fn with_lamports_per_signature(mut self, lamports: u64) -> Self {
        self.lamports_per_signature = lamports;
        self
    }

    /// Delay every submission, to keep an operation in flight
    pub fn with_send_delay(mut self, delay: Duration) -> Self {
        self.send_delay = delay;
        self
    }

    /// Delay every rent and fee query, to keep an estimate in flight
    pub fn with_query_delay(mut self, delay: Duration) -> Self {
        self.query_delay = delay;
        self
    }

    pub fn set_balance(&self, pubkey: &Pubkey, lamports: u64) {
        self.balances.lock().unwrap().insert(*pubkey, lamports);
    }

    /// Fail the next `count` rent or fee queries
    pub fn fail_next_queries(&self, count: u32) {
        self.query_failures.store(count, Ordering::SeqCst);
    }

    /// Fail the next `count` submissions
    pub fn fail_next_sends(&self, count: u32) {
        self.send_failures.store(count, Ordering::SeqCst);
    }

    pub fn fail_all_sends(&self) {
        self.fail_next_sends(u32::MAX);
    }

    /// Let `count` submissions through, then fail all others
    pub fn fail_sends_after(&self, count: u32) {
        *self.sends_before_failure.lock().unwrap() = Some(count);
    }

    /// Number of submissions attempted, successful or not
    pub fn send_attempts(&self) -> u32 {
        self.send_attempts.load(Ordering::SeqCst)
    }

    /// Transactions that were accepted
    pub fn sent_transactions(&self) -> Vec<Transaction> {
        self.sent.lock().unwrap().clone()
    }

    pub fn last_preflight(&self) -> Option<CommitmentLevel> {
        *self.last_preflight.lock().unwrap()
    }

    async fn query(&self) -> ProvisionResult<()> {
        if !self.query_delay.is_zero() {
            tokio::time::sleep(self.query_delay).await;
        }
        if take_failure(&self.query_failures) {
            return Err(ProvisionError::rpc("connection reset"));
        }
        Ok(())
    }
}

fn take_failure(counter: &AtomicU32) -> bool {
    counter
        .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| match n {
            0 => None,
            u32::MAX => Some(u32::MAX),
            n => Some(n - 1),
        })
        .is_ok()
}

#[async_trait]
impl LedgerConnection for MockConnection {
    async fn get_balance(&self, pubkey: &Pubkey) -> ProvisionResult<u64> {
        self.query().await?;
        Ok(self.balances.lock().unwrap().get(pubkey).copied().unwrap_or(0))
    }

    async fn get_minimum_balance_for_rent_exemption(&self, data_len: usize) -> ProvisionResult<u64> {
        self.query().await?;
        Ok((self.rent)(data_len))
    }

    async fn get_lamports_per_signature(&self) -> ProvisionResult<u64> {
        self.query().await?;
        Ok(self.lamports_per_signature)
    }

    async fn get_latest_blockhash(&self) -> ProvisionResult<Hash> {
        Ok(Hash::new_unique())
    }

    async fn send_and_confirm_transaction(
        &self,
        transaction: &Transaction,
        preflight_commitment: CommitmentLevel,
    ) -> ProvisionResult<Signature> {
        self.send_attempts.fetch_add(1, Ordering::SeqCst);
        *self.last_preflight.lock().unwrap() = Some(preflight_commitment);
        if !self.send_delay.is_zero() {
            tokio::time::sleep(self.send_delay).await;
        }

        if take_failure(&self.send_failures) {
            return Err(ProvisionError::rpc("blockhash not found"));
        }
        if let Some(remaining) = self.sends_before_failure.lock().unwrap().as_mut() {
            if *remaining == 0 {
                return Err(ProvisionError::rpc("node is behind"));
            }
            *remaining -= 1;
        }
        if !transaction.is_signed() {
            return Err(ProvisionError::Signing("transaction is missing signatures".to_string()));
        }

        self.sent.lock().unwrap().push(transaction.clone());
        Ok(transaction.signatures[0])
    }
}
