use log::{debug, info};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use utoipa::ToSchema;

use super::pow::{meets_difficulty, CancelToken, MiningError, CANCEL_CHECK_INTERVAL};
use super::transaction::Transaction;

/// Version tag of the transaction-list encoding fed into block hashes
pub const CANONICAL_ENCODING_VERSION: &str = "v1";

/// Fixed creation time of the genesis block
pub const GENESIS_TIMESTAMP: &str = "2025-01-01T00:00:00.000Z";

/// `previous_hash` of the genesis block
pub const GENESIS_PREVIOUS_HASH: &str = "0";

/// Represents a block in the ledger
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct Block {
    /// ISO-8601 time the block was assembled
    #[schema(example = "2025-01-01T12:00:00.000Z")]
    pub timestamp: String,

    /// Transactions in hashing order
    pub transactions: Vec<Transaction>,

    /// Hash of the previous block, `"0"` for genesis
    pub previous_hash: String,

    /// Proof of work counter
    pub nonce: u64,

    /// Hash over all of the above
    pub hash: String,
}

/// Encodes a transaction list in the versioned canonical form:
/// `v1|<count>|` followed by each transaction's length-prefixed fields.
pub fn canonical_transactions(transactions: &[Transaction]) -> String {
    let mut out = format!("{}|{}|", CANONICAL_ENCODING_VERSION, transactions.len());
    for tx in transactions {
        tx.write_canonical(&mut out);
    }
    out
}

impl Block {
    /// Creates a block with nonce 0 and its initial, not yet mined, hash
    pub fn new(
        timestamp: impl Into<String>,
        transactions: Vec<Transaction>,
        previous_hash: impl Into<String>,
    ) -> Self {
        let mut block = Block {
            timestamp: timestamp.into(),
            transactions,
            previous_hash: previous_hash.into(),
            nonce: 0,
            hash: String::new(),
        };
        block.hash = block.calculate_hash();
        block
    }

    /// The fixed first block every ledger starts from
    pub fn genesis() -> Self {
        Block::new(GENESIS_TIMESTAMP, Vec::new(), GENESIS_PREVIOUS_HASH)
    }

    /// SHA-256 over timestamp, previous hash, canonical transactions and nonce
    pub fn calculate_hash(&self) -> String {
        let mut hasher = Sha256::new();
        hasher.update(self.timestamp.as_bytes());
        hasher.update(self.previous_hash.as_bytes());
        hasher.update(canonical_transactions(&self.transactions).as_bytes());
        hasher.update(self.nonce.to_string().as_bytes());
        hex::encode(hasher.finalize())
    }

    /// Searches nonces until the hash starts with `difficulty` zero digits.
    /// Blocks the calling thread for as long as that takes.
    pub fn mine(&mut self, difficulty: usize) {
        while !meets_difficulty(&self.hash, difficulty) {
            self.nonce += 1;
            self.hash = self.calculate_hash();
        }

        info!("Block mined: {} (nonce {})", self.hash, self.nonce);
    }

    /// Same search as [`Block::mine`], giving up once `cancel` fires.
    /// The token is polled every [`CANCEL_CHECK_INTERVAL`] nonces, so an
    /// uncancelled run finds exactly the nonce `mine` would.
    pub fn mine_with_cancel(
        &mut self,
        difficulty: usize,
        cancel: &CancelToken,
    ) -> Result<(), MiningError> {
        let mut attempts: u64 = 0;

        while !meets_difficulty(&self.hash, difficulty) {
            if attempts % CANCEL_CHECK_INTERVAL == 0 && cancel.is_cancelled() {
                debug!("Mining cancelled at nonce {}", self.nonce);
                return Err(MiningError::Cancelled { attempts });
            }
            self.nonce += 1;
            self.hash = self.calculate_hash();
            attempts += 1;
        }

        info!("Block mined: {} (nonce {})", self.hash, self.nonce);
        Ok(())
    }

    /// True iff every transaction is valid; stops at the first failure
    pub fn has_valid_transactions(&self) -> bool {
        self.transactions
            .iter()
            .all(|tx| matches!(tx.is_valid(), Ok(true)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::blockchain::crypto::Wallet;
    use crate::blockchain::transaction::Sender;

    fn sample_transactions() -> Vec<Transaction> {
        vec![
            Transaction::with_timestamp(Sender::Mint, "recipient1", 10.0, GENESIS_TIMESTAMP),
            Transaction::with_timestamp(Sender::Mint, "recipient2", 20.0, GENESIS_TIMESTAMP),
        ]
    }

    #[test]
    fn test_new_block() {
        let block = Block::new("2025-02-01T00:00:00.000Z", sample_transactions(), "previous_hash");

        assert_eq!(block.nonce, 0);
        assert_eq!(block.previous_hash, "previous_hash");
        assert_eq!(block.hash, block.calculate_hash());
        assert_eq!(block.hash.len(), 64);
    }

    #[test]
    fn test_genesis_is_deterministic() {
        let a = Block::genesis();
        let b = Block::genesis();
        assert_eq!(a, b);
        assert_eq!(a.previous_hash, "0");
        assert!(a.transactions.is_empty());
    }

    #[test]
    fn test_hash_depends_on_transaction_order() {
        let txs = sample_transactions();
        let mut reversed = txs.clone();
        reversed.reverse();

        let a = Block::new(GENESIS_TIMESTAMP, txs, "0");
        let b = Block::new(GENESIS_TIMESTAMP, reversed, "0");
        assert_ne!(a.hash, b.hash);
    }

    #[test]
    fn test_hash_changes_with_nonce() {
        let mut block = Block::new(GENESIS_TIMESTAMP, sample_transactions(), "0");
        let before = block.calculate_hash();
        block.nonce += 1;
        assert_ne!(before, block.calculate_hash());
    }

    #[test]
    fn test_mine_meets_difficulty() {
        let mut block = Block::new(GENESIS_TIMESTAMP, sample_transactions(), "0");
        block.mine(3);

        assert!(block.hash.starts_with("000"));
        assert_eq!(block.hash, block.calculate_hash());
    }

    #[test]
    fn test_mine_with_cancel_finds_same_nonce() {
        let mut plain = Block::new(GENESIS_TIMESTAMP, sample_transactions(), "0");
        let mut cancellable = plain.clone();

        plain.mine(2);
        cancellable.mine_with_cancel(2, &CancelToken::new()).unwrap();

        assert_eq!(plain.nonce, cancellable.nonce);
        assert_eq!(plain.hash, cancellable.hash);
    }

    #[test]
    fn test_mine_with_cancel_stops() {
        let mut block = Block::new(GENESIS_TIMESTAMP, sample_transactions(), "0");
        let token = CancelToken::new();
        token.cancel();

        // 64 zero digits is unreachable; only the token can end this loop
        let result = block.mine_with_cancel(64, &token);
        assert_eq!(result, Err(MiningError::Cancelled { attempts: 0 }));
    }

    #[test]
    fn test_has_valid_transactions() {
        let wallet = Wallet::new();
        let mut signed = Transaction::new(Sender::User(wallet.address().clone()), "04bob", 3.0);
        signed.sign(&wallet).unwrap();
        let unsigned = Transaction::new(Sender::User(wallet.address().clone()), "04bob", 4.0);

        let good = Block::new(GENESIS_TIMESTAMP, vec![signed.clone()], "0");
        assert!(good.has_valid_transactions());

        let bad = Block::new(GENESIS_TIMESTAMP, vec![signed, unsigned], "0");
        assert!(!bad.has_valid_transactions());
    }

    #[test]
    fn test_canonical_transactions_is_versioned() {
        assert_eq!(canonical_transactions(&[]), "v1|0|");
        assert!(canonical_transactions(&sample_transactions()).starts_with("v1|2|4:null"));
    }
}
