use std::path::PathBuf;

use clap::Parser;

use crate::blockchain::config::{
    DEFAULT_DIFFICULTY, DEFAULT_FAUCET_ADDRESS, DEFAULT_MINING_REWARD,
};
use crate::blockchain::{Address, LedgerConfig, SystemIdentities};

/// Command line / environment settings of the ledger service
#[derive(Parser, Debug, Clone)]
#[command(name = "meowcoin-ledger")]
#[command(about = "Single-node proof-of-work ledger for the donation demo")]
pub struct ServerConfig {
    /// Interface to bind
    #[arg(long, env = "HOST", default_value = "127.0.0.1")]
    pub host: String,

    /// Port to listen on
    #[arg(long, env = "PORT", default_value_t = 3001)]
    pub port: u16,

    /// Directory of the sled store
    #[arg(long, env = "DATA_DIR", default_value = "data/ledger")]
    pub data_dir: PathBuf,

    /// Keep everything in memory and skip the store
    #[arg(long, env = "IN_MEMORY")]
    pub in_memory: bool,

    /// Leading zero hex digits required of a block hash
    #[arg(long, env = "DIFFICULTY", default_value_t = DEFAULT_DIFFICULTY)]
    pub difficulty: usize,

    /// Reward minted for the miner of each block
    #[arg(long, env = "MINING_REWARD", default_value_t = DEFAULT_MINING_REWARD)]
    pub mining_reward: f64,

    /// Address the faucet sends from
    #[arg(long, env = "FAUCET_ADDRESS", default_value = DEFAULT_FAUCET_ADDRESS)]
    pub faucet_address: String,

    /// Public key of the operator account allowed to send unsigned
    #[arg(long, env = "SYSTEM_USER_PUBLIC_KEY")]
    pub system_public_key: Option<String>,

    /// Who receives the reward when a mine request names nobody
    #[arg(long, env = "DEFAULT_REWARD_ADDRESS", default_value = "admin")]
    pub default_reward_address: String,

    /// Re-check every block's proof of work during validation
    #[arg(long, env = "VERIFY_PROOF_OF_WORK")]
    pub verify_proof_of_work: bool,
}

impl ServerConfig {
    pub fn ledger_config(&self) -> LedgerConfig {
        LedgerConfig {
            difficulty: self.difficulty,
            mining_reward: self.mining_reward,
            identities: SystemIdentities {
                faucet: Address::from(self.faucet_address.as_str()),
                system_operator: self
                    .system_public_key
                    .as_deref()
                    .filter(|key| !key.is_empty())
                    .map(Address::from),
            },
            verify_proof_of_work: self.verify_proof_of_work,
        }
    }
}
