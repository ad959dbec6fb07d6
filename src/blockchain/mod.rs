// Blockchain module
//
// This module contains the ledger core:
// - Transaction structure and sender kinds
// - Block structure and canonical hashing
// - Ledger (chain + pending pool)
// - Cryptography utilities (secp256k1 wallets)
// - Proof of work helpers
// - Ledger configuration
// - Persistence projection used by the service

pub mod block;
pub mod chain;
pub mod config;
pub mod crypto;
pub mod pow;
pub mod storage;
pub mod transaction;

// Re-export main components for easier access
pub use block::Block;
pub use chain::{ChainViolation, Ledger, LedgerError};
pub use config::{LedgerConfig, SystemIdentities};
pub use crypto::{Address, DigitalSignature, Wallet};
pub use pow::CancelToken;
pub use storage::LedgerStore;
pub use transaction::{Sender, Transaction, TransactionError};
