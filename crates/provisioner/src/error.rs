//! Error types for the pool provisioner

use solana_client::client_error::ClientError;
use solana_sdk::signer::SignerError;
use thiserror::Error;

use crate::state::Status;

#[derive(Error, Debug)]
pub enum ProvisionError {
    #[error("RPC error: {0}")]
    Rpc(String),

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("Invalid parameter {name}: got {value}, expected {expected}")]
    InvalidParameter {
        name: &'static str,
        value: String,
        expected: String,
    },

    #[error("Missing precondition: {0}")]
    MissingPrecondition(&'static str),

    #[error("Batch length mismatch: {fee_payers} fee payers, {program_accounts} program accounts")]
    BatchMismatch {
        fee_payers: usize,
        program_accounts: usize,
    },

    #[error("Could not confirm transaction after {attempts} attempts: {last_error}")]
    CouldNotConfirm { attempts: u32, last_error: String },

    #[error("Invalid pool status: expected {expected}, found {actual}")]
    InvalidStatus { expected: Status, actual: Status },

    #[error("Signing error: {0}")]
    Signing(String),

    #[error("Insufficient balance: required {required} lamports, available {available}")]
    InsufficientBalance { required: u64, available: u64 },

    #[error("Arithmetic overflow computing {0}")]
    Overflow(&'static str),

    #[error("IO error: {0}")]
    Io(String),

    #[error("Serialization error: {0}")]
    Serialization(String),
}

impl ProvisionError {
    pub fn invalid_parameter(name: &'static str, value: impl ToString, expected: impl Into<String>) -> Self {
        ProvisionError::InvalidParameter {
            name,
            value: value.to_string(),
            expected: expected.into(),
        }
    }

    pub fn rpc(err: impl ToString) -> Self {
        ProvisionError::Rpc(err.to_string())
    }
}

impl From<ClientError> for ProvisionError {
    fn from(err: ClientError) -> Self {
        ProvisionError::Rpc(err.to_string())
    }
}

impl From<SignerError> for ProvisionError {
    fn from(err: SignerError) -> Self {
        ProvisionError::Signing(err.to_string())
    }
}

impl From<std::io::Error> for ProvisionError {
    fn from(err: std::io::Error) -> Self {
        ProvisionError::Io(err.to_string())
    }
}

impl From<serde_json::Error> for ProvisionError {
    fn from(err: serde_json::Error) -> Self {
        ProvisionError::Serialization(err.to_string())
    }
}

pub type ProvisionResult<T> = Result<T, ProvisionError>;
