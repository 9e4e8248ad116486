//! Single-transaction account creation with bounded retry

use solana_sdk::{
    commitment_config::CommitmentLevel,
    instruction::Instruction,
    pubkey::Pubkey,
    signature::{Keypair, Signature},
    signer::Signer,
    system_instruction,
    transaction::Transaction,
};

use crate::connection::LedgerConnection;
use crate::costs::AccountCosts;
use crate::error::{ProvisionError, ProvisionResult};

/// Default number of submission attempts per batch
pub const DEFAULT_SUBMIT_ATTEMPTS: u32 = 3;

/// Submits one batch of program accounts and fee-payer fundings
#[derive(Debug, Clone, Copy)]
pub struct BatchSubmitter {
    max_attempts: u32,
    preflight_commitment: CommitmentLevel,
}

impl Default for BatchSubmitter {
    fn default() -> Self {
        Self::new(DEFAULT_SUBMIT_ATTEMPTS)
    }
}

impl BatchSubmitter {
    pub fn new(max_attempts: u32) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            preflight_commitment: CommitmentLevel::Confirmed,
        }
    }

    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    pub fn preflight_commitment(&self) -> CommitmentLevel {
        self.preflight_commitment
    }

    /// Create `new_program_accounts` owned by `program_id` and fund `new_fee_payers`.
    ///
    /// Attempts are retried immediately up to the attempt budget; running out
    /// returns [`ProvisionError::CouldNotConfirm`]. Mismatched slices fail at
    /// once without touching the ledger.
    #[allow(clippy::too_many_arguments)]
    pub async fn submit_batch<C>(
        &self,
        connection: &C,
        payer: &Keypair,
        new_fee_payers: &[Pubkey],
        new_program_accounts: &[Keypair],
        costs: &AccountCosts,
        storage_units: u64,
        program_id: &Pubkey,
    ) -> ProvisionResult<Signature>
    where
        C: LedgerConnection + ?Sized,
    {
        let instructions = build_batch_instructions(
            &payer.pubkey(),
            new_fee_payers,
            new_program_accounts,
            costs,
            storage_units,
            program_id,
        )?;

        let mut signers: Vec<&Keypair> = Vec::with_capacity(new_program_accounts.len() + 1);
        signers.push(payer);
        signers.extend(new_program_accounts.iter());

        let mut remaining = self.max_attempts;
        loop {
            remaining -= 1;
            match self.try_submit(connection, payer, &instructions, &signers).await {
                Ok(signature) => {
                    log::debug!(
                        "Created {} program accounts in tx {}",
                        new_program_accounts.len(),
                        signature
                    );
                    return Ok(signature);
                }
                Err(e) if remaining > 0 => {
                    log::warn!(
                        "Failed to create accounts, {} attempts remaining: {}",
                        remaining,
                        e
                    );
                }
                Err(e) => {
                    log::error!("Failed to create accounts, giving up: {}", e);
                    return Err(ProvisionError::CouldNotConfirm {
                        attempts: self.max_attempts,
                        last_error: e.to_string(),
                    });
                }
            }
        }
    }

    async fn try_submit<C>(
        &self,
        connection: &C,
        payer: &Keypair,
        instructions: &[Instruction],
        signers: &[&Keypair],
    ) -> ProvisionResult<Signature>
    where
        C: LedgerConnection + ?Sized,
    {
        let recent_blockhash = connection.get_latest_blockhash().await?;
        let mut transaction = Transaction::new_with_payer(instructions, Some(&payer.pubkey()));
        transaction.try_sign(signers, recent_blockhash)?;

        connection
            .send_and_confirm_transaction(&transaction, self.preflight_commitment)
            .await
    }
}

/// One `create_account` and one `transfer` per lane, in lane order
pub fn build_batch_instructions(
    payer: &Pubkey,
    new_fee_payers: &[Pubkey],
    new_program_accounts: &[Keypair],
    costs: &AccountCosts,
    storage_units: u64,
    program_id: &Pubkey,
) -> ProvisionResult<Vec<Instruction>> {
    if new_fee_payers.len() != new_program_accounts.len() {
        return Err(ProvisionError::BatchMismatch {
            fee_payers: new_fee_payers.len(),
            program_accounts: new_program_accounts.len(),
        });
    }

    let mut instructions = Vec::with_capacity(2 * new_fee_payers.len());
    for (fee_payer, program_account) in new_fee_payers.iter().zip(new_program_accounts) {
        instructions.push(system_instruction::create_account(
            payer,
            &program_account.pubkey(),
            costs.program_account_cost,
            storage_units,
            program_id,
        ));
        instructions.push(system_instruction::transfer(
            payer,
            fee_payer,
            costs.fee_account_cost,
        ));
    }

    Ok(instructions)
}
