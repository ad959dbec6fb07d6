use serde::{Deserialize, Serialize};
use thiserror::Error;

use super::crypto::Address;
use super::transaction::Sender;

/// Default mining difficulty (leading zero hex digits)
pub const DEFAULT_DIFFICULTY: usize = 2;

/// Default reward credited to the miner of each block
pub const DEFAULT_MINING_REWARD: f64 = 100.0;

/// Address the demo faucet sends from
pub const DEFAULT_FAUCET_ADDRESS: &str = "meowcoin-faucet";

/// A SHA-256 hex digest has 64 characters
const MAX_DIFFICULTY: usize = 64;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Difficulty {0} exceeds the {MAX_DIFFICULTY} hex digits of a block hash")]
    DifficultyTooHigh(usize),

    #[error("Mining reward must be a finite, non-negative number, got {0}")]
    InvalidReward(f64),

    #[error("Faucet address must not be empty")]
    EmptyFaucetAddress,
}

/// Senders that may move value without a signature
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SystemIdentities {
    pub faucet: Address,
    pub system_operator: Option<Address>,
}

impl Default for SystemIdentities {
    fn default() -> Self {
        SystemIdentities {
            faucet: Address::from(DEFAULT_FAUCET_ADDRESS),
            system_operator: None,
        }
    }
}

impl SystemIdentities {
    /// Maps a raw sender string from the outside world onto a `Sender`.
    /// `None` is the mint sentinel.
    pub fn classify(&self, raw: Option<&str>) -> Sender {
        match raw {
            None => Sender::Mint,
            Some(s) if s == self.faucet.as_str() => Sender::Faucet(self.faucet.clone()),
            Some(s) if self.system_operator.as_ref().is_some_and(|op| op.as_str() == s) => {
                Sender::SystemOperator(Address::from(s))
            }
            Some(s) => Sender::User(Address::from(s)),
        }
    }

    /// Whether a privileged sender is one this ledger was configured with.
    /// User and mint senders are not privileged and always pass.
    pub fn recognizes(&self, sender: &Sender) -> bool {
        match sender {
            Sender::User(_) | Sender::Mint => true,
            Sender::Faucet(address) => *address == self.faucet,
            Sender::SystemOperator(address) => self.system_operator.as_ref() == Some(address),
        }
    }
}

/// Tunables of a ledger instance
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LedgerConfig {
    pub difficulty: usize,
    pub mining_reward: f64,
    pub identities: SystemIdentities,
    /// Also require every historical block hash to meet `difficulty`
    /// during validation. Off by default.
    pub verify_proof_of_work: bool,
}

impl Default for LedgerConfig {
    fn default() -> Self {
        LedgerConfig {
            difficulty: DEFAULT_DIFFICULTY,
            mining_reward: DEFAULT_MINING_REWARD,
            identities: SystemIdentities::default(),
            verify_proof_of_work: false,
        }
    }
}

impl LedgerConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.difficulty > MAX_DIFFICULTY {
            return Err(ConfigError::DifficultyTooHigh(self.difficulty));
        }
        if !self.mining_reward.is_finite() || self.mining_reward < 0.0 {
            return Err(ConfigError::InvalidReward(self.mining_reward));
        }
        if self.identities.faucet.is_empty() {
            return Err(ConfigError::EmptyFaucetAddress);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = LedgerConfig::default();
        assert_eq!(config.difficulty, 2);
        assert_eq!(config.mining_reward, 100.0);
        assert_eq!(config.identities.faucet.as_str(), "meowcoin-faucet");
        assert!(!config.verify_proof_of_work);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_classify() {
        let identities = SystemIdentities {
            faucet: Address::from("meowcoin-faucet"),
            system_operator: Some(Address::from("04system")),
        };

        assert_eq!(identities.classify(None), Sender::Mint);
        assert_eq!(
            identities.classify(Some("meowcoin-faucet")),
            Sender::Faucet(Address::from("meowcoin-faucet"))
        );
        assert_eq!(
            identities.classify(Some("04system")),
            Sender::SystemOperator(Address::from("04system"))
        );
        assert_eq!(
            identities.classify(Some("04alice")),
            Sender::User(Address::from("04alice"))
        );
    }

    #[test]
    fn test_recognizes_only_configured_privileged_senders() {
        let identities = SystemIdentities::default();

        assert!(identities.recognizes(&Sender::Faucet(Address::from("meowcoin-faucet"))));
        assert!(!identities.recognizes(&Sender::Faucet(Address::from("other-faucet"))));
        assert!(!identities.recognizes(&Sender::SystemOperator(Address::from("04system"))));
        assert!(identities.recognizes(&Sender::User(Address::from("04alice"))));
    }

    #[test]
    fn test_validate_rejects_bad_values() {
        let mut config = LedgerConfig::default();
        config.difficulty = 65;
        assert!(matches!(config.validate(), Err(ConfigError::DifficultyTooHigh(65))));

        let mut config = LedgerConfig::default();
        config.mining_reward = -1.0;
        assert!(matches!(config.validate(), Err(ConfigError::InvalidReward(_))));
    }
}
