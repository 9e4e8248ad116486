//! Building and tearing down a full account pool

use std::ops::Range;

use serde::Serialize;
use solana_sdk::{
    pubkey::Pubkey,
    signature::{Keypair, Signature},
    signer::Signer,
    system_instruction,
    transaction::Transaction,
};

use crate::batch::BatchSubmitter;
use crate::connection::LedgerConnection;
use crate::costs::{self, AccountCosts};
use crate::error::{ProvisionError, ProvisionResult};

/// Most lanes whose create/transfer pair fits in one transaction
pub const MAX_BATCH_SIZE: usize = 5;

/// A provisioned pool: one program account and one fee payer per lane
#[derive(Debug, Default)]
pub struct PoolConfig {
    pub program_accounts: Vec<Pubkey>,
    pub fee_payer_keypairs: Vec<Keypair>,
    /// Transactions each fee payer can sign before its balance runs out
    pub account_capacity: u64,
}

impl PoolConfig {
    pub fn parallelization(&self) -> usize {
        self.program_accounts.len()
    }

    pub fn summary(&self) -> PoolSummary {
        PoolSummary {
            program_accounts: self.program_accounts.iter().map(ToString::to_string).collect(),
            fee_payers: self
                .fee_payer_keypairs
                .iter()
                .map(|keypair| keypair.pubkey().to_string())
                .collect(),
            account_capacity: self.account_capacity,
        }
    }
}

/// Public view of a pool for display
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PoolSummary {
    pub program_accounts: Vec<String>,
    pub fee_payers: Vec<String>,
    pub account_capacity: u64,
}

/// Split `count` lanes into contiguous batches of at most `max_batch_size`
pub fn plan_batches(count: usize, max_batch_size: usize) -> Vec<Range<usize>> {
    let size = max_batch_size.max(1);
    (0..count)
        .step_by(size)
        .map(|start| start..(start + size).min(count))
        .collect()
}

/// Creates pools batch by batch and closes them in one transaction
#[derive(Debug, Clone, Copy)]
pub struct AccountProvisioner {
    submitter: BatchSubmitter,
    max_batch_size: usize,
}

impl Default for AccountProvisioner {
    fn default() -> Self {
        Self::new(BatchSubmitter::default(), MAX_BATCH_SIZE)
    }
}

impl AccountProvisioner {
    pub fn new(submitter: BatchSubmitter, max_batch_size: usize) -> Self {
        Self {
            submitter,
            max_batch_size: max_batch_size.clamp(1, MAX_BATCH_SIZE),
        }
    }

    /// Create `parallelization` program accounts and fee payers.
    ///
    /// Batches run strictly in order since they all share `payer` as signer.
    /// The first batch that cannot be confirmed fails the whole pool; lanes
    /// created by earlier batches stay on the ledger.
    pub async fn create<C>(
        &self,
        connection: &C,
        program_id: &Pubkey,
        payer: &Keypair,
        costs: &AccountCosts,
        parallelization: u64,
    ) -> ProvisionResult<PoolConfig>
    where
        C: LedgerConnection + ?Sized,
    {
        let storage_units = costs::storage_units(parallelization)?;
        let account_capacity = costs::tx_per_account(parallelization)?;
        let lanes = usize::try_from(parallelization)
            .map_err(|_| ProvisionError::invalid_parameter("parallelization", parallelization, "fits in usize"))?;

        let program_keypairs: Vec<Keypair> = (0..lanes).map(|_| Keypair::new()).collect();
        let fee_payer_keypairs: Vec<Keypair> = (0..lanes).map(|_| Keypair::new()).collect();
        let fee_payers: Vec<Pubkey> = fee_payer_keypairs.iter().map(Signer::pubkey).collect();

        let batches = plan_batches(lanes, self.max_batch_size);
        log::info!(
            "Creating {} lanes in {} batches ({} bytes per program account)",
            lanes,
            batches.len(),
            storage_units
        );

        for (index, batch) in batches.iter().enumerate() {
            let signature = self
                .submitter
                .submit_batch(
                    connection,
                    payer,
                    &fee_payers[batch.clone()],
                    &program_keypairs[batch.clone()],
                    costs,
                    storage_units,
                    program_id,
                )
                .await?;
            log::info!("Batch {}/{} confirmed: {}", index + 1, batches.len(), signature);
        }

        Ok(PoolConfig {
            program_accounts: program_keypairs.iter().map(Signer::pubkey).collect(),
            fee_payer_keypairs,
            account_capacity,
        })
    }

    /// Return every fee payer's full balance to `payer` in one transaction.
    ///
    /// Not retried: any failure is returned as is.
    pub async fn close<C>(
        &self,
        connection: &C,
        payer: &Keypair,
        fee_payers: &[Keypair],
        parallelization: u64,
    ) -> ProvisionResult<Signature>
    where
        C: LedgerConnection + ?Sized,
    {
        if fee_payers.len() as u64 != parallelization {
            return Err(ProvisionError::invalid_parameter(
                "fee_payers",
                fee_payers.len(),
                format!("{} fee payers", parallelization),
            ));
        }

        let mut instructions = Vec::with_capacity(fee_payers.len());
        let mut reclaimed = 0u64;
        for fee_payer in fee_payers {
            let balance = connection.get_balance(&fee_payer.pubkey()).await?;
            reclaimed = reclaimed.saturating_add(balance);
            instructions.push(system_instruction::transfer(
                &fee_payer.pubkey(),
                &payer.pubkey(),
                balance,
            ));
        }

        let mut signers: Vec<&Keypair> = Vec::with_capacity(fee_payers.len() + 1);
        signers.push(payer);
        signers.extend(fee_payers.iter());

        let recent_blockhash = connection.get_latest_blockhash().await?;
        let mut transaction = Transaction::new_with_payer(&instructions, Some(&payer.pubkey()));
        transaction.try_sign(signers.as_slice(), recent_blockhash)?;

        let signature = connection
            .send_and_confirm_transaction(&transaction, self.submitter.preflight_commitment())
            .await?;
        log::info!(
            "Closed {} fee payers, reclaimed {} lamports: {}",
            fee_payers.len(),
            reclaimed,
            signature
        );

        Ok(signature)
    }
}
