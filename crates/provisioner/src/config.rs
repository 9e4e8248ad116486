use std::fs;
use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use solana_sdk::pubkey::Pubkey;

use crate::batch::DEFAULT_SUBMIT_ATTEMPTS;
use crate::error::{ProvisionError, ProvisionResult};
use crate::provisioner::MAX_BATCH_SIZE;

const DEFAULT_PROGRAM_ID: &str = "BrEAK7zGZ6dM71zUDACDqJnekihmwF15noTddWTsknjC";

/// Provisioner configuration loaded from TOML file
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ProvisionerConfig {
    /// RPC endpoint of the cluster
    pub rpc_url: String,

    /// Program that owns the created program accounts
    #[serde(with = "pubkey_serde")]
    pub program_id: Pubkey,

    /// Number of program/fee-payer lanes in the pool
    pub parallelization: u64,

    /// Lanes per account creation transaction
    pub max_batch_size: usize,

    /// Funding keypair file
    #[serde(default)]
    pub payer_keypair: Option<String>,

    /// Retry configuration
    pub retry: RetryConfig,
}

/// Retry configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct RetryConfig {
    /// Attempts per account creation batch before the pool fails
    pub max_submit_attempts: u32,

    /// Delay between failed cost estimates in milliseconds
    pub estimate_retry_interval_ms: u64,
}

impl ProvisionerConfig {
    /// Load configuration from TOML file
    pub fn load(path: &str) -> ProvisionResult<Self> {
        let content = fs::read_to_string(path)
            .map_err(|e| ProvisionError::InvalidConfig(format!("Failed to read config file {}: {}", path, e)))?;

        let config: ProvisionerConfig = toml::from_str(&content)
            .map_err(|e| ProvisionError::InvalidConfig(format!("Failed to parse config file {}: {}", path, e)))?;

        config.validate()?;

        Ok(config)
    }

    /// Save configuration to TOML file
    pub fn save(&self, path: &str) -> ProvisionResult<()> {
        let content = toml::to_string_pretty(self)
            .map_err(|e| ProvisionError::Serialization(format!("Failed to serialize config: {}", e)))?;
        fs::write(path, content)?;
        Ok(())
    }

    /// Validate configuration
    pub fn validate(&self) -> ProvisionResult<()> {
        if self.rpc_url.is_empty() {
            return Err(ProvisionError::invalid_parameter("rpc_url", "empty", "non-empty URL"));
        }

        if self.parallelization == 0 {
            return Err(ProvisionError::invalid_parameter("parallelization", 0, "greater than 0"));
        }

        if self.max_batch_size == 0 || self.max_batch_size > MAX_BATCH_SIZE {
            return Err(ProvisionError::invalid_parameter(
                "max_batch_size",
                self.max_batch_size,
                format!("between 1 and {}", MAX_BATCH_SIZE),
            ));
        }

        self.retry.validate()?;

        Ok(())
    }
}

impl RetryConfig {
    /// Validate retry configuration
    fn validate(&self) -> ProvisionResult<()> {
        if self.max_submit_attempts == 0 {
            return Err(ProvisionError::invalid_parameter("max_submit_attempts", 0, "greater than 0"));
        }

        if self.estimate_retry_interval_ms == 0 {
            return Err(ProvisionError::invalid_parameter("estimate_retry_interval_ms", 0, "greater than 0"));
        }

        Ok(())
    }

    pub fn estimate_retry_interval(&self) -> Duration {
        Duration::from_millis(self.estimate_retry_interval_ms)
    }
}

impl Default for ProvisionerConfig {
    fn default() -> Self {
        Self {
            rpc_url: "http://127.0.0.1:8899".to_string(),
            program_id: default_program_id(),
            parallelization: 4,
            max_batch_size: MAX_BATCH_SIZE,
            payer_keypair: None,
            retry: RetryConfig::default(),
        }
    }
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_submit_attempts: DEFAULT_SUBMIT_ATTEMPTS,
            estimate_retry_interval_ms: 2000,
        }
    }
}

fn default_program_id() -> Pubkey {
    Pubkey::from_str(DEFAULT_PROGRAM_ID).unwrap_or_default()
}

/// Create example configuration file
pub fn create_example_config(path: &str) -> ProvisionResult<()> {
    let example_config = ProvisionerConfig {
        rpc_url: "https://api.devnet.solana.com".to_string(),
        parallelization: 12,
        payer_keypair: Some("~/.config/solana/id.json".to_string()),
        ..ProvisionerConfig::default()
    };

    example_config.save(path)
}

// Custom serde module for Pubkey
mod pubkey_serde {
    use super::*;
    use serde::{Deserializer, Serializer};

    pub fn serialize<S>(pubkey: &Pubkey, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(&pubkey.to_string())
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Pubkey, D::Error>
    where
        D: Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        Pubkey::from_str(&s).map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_validation() {
        let mut config = ProvisionerConfig::default();
        assert!(config.validate().is_ok());

        config.parallelization = 0;
        assert!(config.validate().is_err());

        config.parallelization = 4;
        config.max_batch_size = MAX_BATCH_SIZE + 1;
        assert!(config.validate().is_err());

        config.max_batch_size = 2;
        config.retry.max_submit_attempts = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_default_program_id_parses() {
        assert_ne!(default_program_id(), Pubkey::default());
    }

    #[test]
    fn test_parse_toml() {
        let content = r#"
            rpc_url = "http://localhost:8899"
            program_id = "11111111111111111111111111111111"
            parallelization = 8
            max_batch_size = 5

            [retry]
            max_submit_attempts = 3
            estimate_retry_interval_ms = 2000
        "#;

        let config: ProvisionerConfig = toml::from_str(content).unwrap();
        assert!(config.validate().is_ok());
        assert_eq!(config.program_id, Pubkey::default());
        assert_eq!(config.parallelization, 8);
        assert!(config.payer_keypair.is_none());
        assert_eq!(config.retry.estimate_retry_interval(), Duration::from_secs(2));
    }

    #[test]
    fn test_save_and_load() {
        let path = std::env::temp_dir().join(format!("pool-provisioner-{}.toml", std::process::id()));
        let path = path.to_str().unwrap();

        create_example_config(path).unwrap();
        let loaded = ProvisionerConfig::load(path).unwrap();
        assert_eq!(loaded.parallelization, 12);
        assert_eq!(loaded.program_id, default_program_id());

        std::fs::remove_file(path).unwrap();
    }
}
