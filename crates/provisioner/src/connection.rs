//! Ledger connection capability consumed by the provisioner.
//!
//! The provisioner only needs a handful of RPC queries plus transaction
//! submission, so it talks to the cluster through [`LedgerConnection`]
//! rather than a concrete client. [`RpcConnection`] is the production
//! implementation on top of the nonblocking `solana-client` RPC client.

use std::sync::Arc;

use async_trait::async_trait;
use solana_client::nonblocking::rpc_client::RpcClient;
use solana_client::rpc_config::RpcSendTransactionConfig;
use solana_sdk::{
    commitment_config::{CommitmentConfig, CommitmentLevel},
    hash::Hash,
    message::Message,
    pubkey::Pubkey,
    signature::Signature,
    transaction::Transaction,
};

use crate::error::ProvisionResult;

#[async_trait]
pub trait LedgerConnection: Send + Sync {
    /// Current balance of an account in lamports
    async fn get_balance(&self, pubkey: &Pubkey) -> ProvisionResult<u64>;

    /// Lamports an account of `data_len` bytes must hold to be rent exempt
    async fn get_minimum_balance_for_rent_exemption(&self, data_len: usize) -> ProvisionResult<u64>;

    /// Fee charged per transaction signature under the current fee schedule
    async fn get_lamports_per_signature(&self) -> ProvisionResult<u64>;

    async fn get_latest_blockhash(&self) -> ProvisionResult<Hash>;

    /// Submit a signed transaction and wait for confirmation
    async fn send_and_confirm_transaction(
        &self,
        transaction: &Transaction,
        preflight_commitment: CommitmentLevel,
    ) -> ProvisionResult<Signature>;
}

/// [`LedgerConnection`] backed by a Solana JSON-RPC endpoint
pub struct RpcConnection {
    rpc: Arc<RpcClient>,
}

impl RpcConnection {
    pub fn new(rpc: Arc<RpcClient>) -> Self {
        Self { rpc }
    }

    /// Connect to `url` with confirmed commitment
    pub fn from_url(url: impl Into<String>) -> Self {
        Self::new(Arc::new(RpcClient::new_with_commitment(
            url.into(),
            CommitmentConfig::confirmed(),
        )))
    }
}

#[async_trait]
impl LedgerConnection for RpcConnection {
    async fn get_balance(&self, pubkey: &Pubkey) -> ProvisionResult<u64> {
        Ok(self.rpc.get_balance(pubkey).await?)
    }

    async fn get_minimum_balance_for_rent_exemption(&self, data_len: usize) -> ProvisionResult<u64> {
        Ok(self.rpc.get_minimum_balance_for_rent_exemption(data_len).await?)
    }

    async fn get_lamports_per_signature(&self) -> ProvisionResult<u64> {
        // An empty message with a single signer costs exactly one signature
        let blockhash = self.rpc.get_latest_blockhash().await?;
        let message = Message::new_with_blockhash(&[], Some(&Pubkey::new_unique()), &blockhash);
        Ok(self.rpc.get_fee_for_message(&message).await?)
    }

    async fn get_latest_blockhash(&self) -> ProvisionResult<Hash> {
        Ok(self.rpc.get_latest_blockhash().await?)
    }

    async fn send_and_confirm_transaction(
        &self,
        transaction: &Transaction,
        preflight_commitment: CommitmentLevel,
    ) -> ProvisionResult<Signature> {
        let config = RpcSendTransactionConfig {
            preflight_commitment: Some(preflight_commitment),
            ..RpcSendTransactionConfig::default()
        };

        let signature = self
            .rpc
            .send_and_confirm_transaction_with_spinner_and_config(
                transaction,
                CommitmentConfig { commitment: preflight_commitment },
                config,
            )
            .await?;

        Ok(signature)
    }
}
