use std::sync::{Mutex, MutexGuard, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

use log::{info, warn};
use thiserror::Error;

use super::block::Block;
use super::config::{ConfigError, LedgerConfig};
use super::crypto::Address;
use super::pow::{meets_difficulty, CancelToken, MiningError};
use super::transaction::{now_timestamp, Transaction, TransactionError};

/// Errors that can occur during ledger operations
#[derive(Debug, Error)]
pub enum LedgerError {
    #[error("Cannot add invalid transaction to chain: {0}")]
    Transaction(#[from] TransactionError),

    #[error("{0}")]
    MiningCancelled(#[from] MiningError),

    #[error("Invalid chain: {0}")]
    InvalidChain(#[from] ChainViolation),

    #[error("Invalid configuration: {0}")]
    Config(#[from] ConfigError),
}

/// The first check that failed while walking the chain
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ChainViolation {
    #[error("Genesis block does not match")]
    GenesisMismatch,

    #[error("Invalid transactions in block {index}")]
    InvalidTransactions { index: usize },

    #[error("Invalid hash at block {index}")]
    HashMismatch { index: usize },

    #[error("Invalid previous hash at block {index}")]
    BrokenLink { index: usize },

    #[error("Hash of block {index} does not meet the difficulty")]
    InsufficientWork { index: usize },
}

/// The chain of mined blocks plus the pool of transactions waiting for one.
///
/// All mutations go through the pending-pool lock, which is held across
/// block assembly, mining and the append. The chain itself sits behind a
/// reader/writer lock so balance and validity queries can run side by side
/// and only ever see whole blocks.
#[derive(Debug)]
pub struct Ledger {
    chain: RwLock<Vec<Block>>,
    pending_transactions: Mutex<Vec<Transaction>>,
    config: LedgerConfig,
}

impl Default for Ledger {
    fn default() -> Self {
        Self::new()
    }
}

impl Ledger {
    /// Creates a ledger with default settings and the genesis block
    pub fn new() -> Self {
        Self::build(LedgerConfig::default(), vec![Block::genesis()])
    }

    /// Creates a ledger with the given settings and the genesis block
    pub fn with_config(config: LedgerConfig) -> Result<Self, LedgerError> {
        config.validate()?;
        Ok(Self::build(config, vec![Block::genesis()]))
    }

    /// Rebuilds a ledger from previously exported blocks.
    ///
    /// The blocks must start with the fixed genesis block and pass
    /// [`Ledger::validate_chain`]. The pending pool starts out empty.
    pub fn from_blocks(config: LedgerConfig, blocks: Vec<Block>) -> Result<Self, LedgerError> {
        config.validate()?;

        if blocks.is_empty() {
            return Ok(Self::build(config, vec![Block::genesis()]));
        }
        if blocks[0] != Block::genesis() {
            return Err(ChainViolation::GenesisMismatch.into());
        }

        let ledger = Self::build(config, blocks);
        ledger.validate_chain()?;
        info!("Restored ledger with {} blocks", ledger.len());
        Ok(ledger)
    }

    /// Rebuilds a ledger from exported blocks plus the pool that was pending
    /// when they were exported.
    ///
    /// Pool entries are checked again: a mint entry is kept as the reward
    /// still owed to the last miner, anything else must pass the same checks
    /// as [`Ledger::add_transaction`]. Entries that fail are dropped.
    pub fn restore(
        config: LedgerConfig,
        blocks: Vec<Block>,
        pending: Vec<Transaction>,
    ) -> Result<Self, LedgerError> {
        let ledger = Self::from_blocks(config, blocks)?;

        let mut kept = Vec::with_capacity(pending.len());
        for transaction in pending {
            let check = if transaction.is_coinbase() {
                if transaction.recipient.is_empty() {
                    Err(TransactionError::MalformedTransaction.into())
                } else {
                    Ok(())
                }
            } else {
                ledger.check_transaction(&transaction)
            };

            match check {
                Ok(()) => kept.push(transaction),
                Err(err) => warn!(
                    "Dropped pending transaction {} on restore: {}",
                    transaction.fingerprint(),
                    err
                ),
            }
        }

        info!("Restored {} pending transactions", kept.len());
        *ledger.lock_pending() = kept;
        Ok(ledger)
    }

    fn build(config: LedgerConfig, chain: Vec<Block>) -> Self {
        Ledger {
            chain: RwLock::new(chain),
            pending_transactions: Mutex::new(Vec::new()),
            config,
        }
    }

    fn read_chain(&self) -> RwLockReadGuard<'_, Vec<Block>> {
        self.chain.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write_chain(&self) -> RwLockWriteGuard<'_, Vec<Block>> {
        self.chain.write().unwrap_or_else(PoisonError::into_inner)
    }

    fn lock_pending(&self) -> MutexGuard<'_, Vec<Transaction>> {
        self.pending_transactions
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    pub fn config(&self) -> &LedgerConfig {
        &self.config
    }

    pub fn difficulty(&self) -> usize {
        self.config.difficulty
    }

    pub fn mining_reward(&self) -> f64 {
        self.config.mining_reward
    }

    /// Number of blocks, genesis included
    pub fn len(&self) -> usize {
        self.read_chain().len()
    }

    /// Never true: a ledger always holds its genesis block
    pub fn is_empty(&self) -> bool {
        self.read_chain().is_empty()
    }

    /// Gets the last block in the chain
    pub fn get_latest_block(&self) -> Block {
        let chain = self.read_chain();
        match chain.last() {
            Some(block) => block.clone(),
            None => Block::genesis(),
        }
    }

    /// Gets the block at `index`
    pub fn block(&self, index: usize) -> Option<Block> {
        self.read_chain().get(index).cloned()
    }

    /// Chain index of the block with `hash`, searching back from the tip
    pub fn index_of(&self, hash: &str) -> Option<usize> {
        self.read_chain().iter().rposition(|block| block.hash == hash)
    }

    /// Snapshot of the whole chain for export
    pub fn chain(&self) -> Vec<Block> {
        self.read_chain().clone()
    }

    /// Snapshot of the transactions waiting for the next block
    pub fn pending_transactions(&self) -> Vec<Transaction> {
        self.lock_pending().clone()
    }

    /// Chain and pool taken together, so the pool is always the one that
    /// follows the returned chain
    pub fn snapshot(&self) -> (Vec<Block>, Vec<Transaction>) {
        let pending = self.lock_pending();
        (self.chain(), pending.clone())
    }

    /// Validates a transaction and queues it for the next block.
    ///
    /// Returns the index of the block it is expected to land in. Nothing is
    /// queued when validation fails. The sender's balance is not checked.
    pub fn add_transaction(&self, transaction: Transaction) -> Result<u64, LedgerError> {
        self.check_transaction(&transaction)?;

        let mut pending = self.lock_pending();
        pending.push(transaction);

        Ok(self.len() as u64)
    }

    /// Queues `transaction` and mines the pool in one step.
    ///
    /// The pool lock is held from the push to the append, so the returned
    /// block always contains `transaction`. Returns the block's chain index
    /// alongside the block.
    pub fn add_and_mine(
        &self,
        transaction: Transaction,
        reward_address: impl Into<Address>,
    ) -> Result<(u64, Block), LedgerError> {
        self.check_transaction(&transaction)?;

        let mut pending = self.lock_pending();
        pending.push(transaction);
        let mut block = self.assemble_block(&pending);

        block.mine(self.config.difficulty);

        let (index, block) = self.append_block(block, &mut pending, reward_address.into());
        Ok((index as u64, block))
    }

    fn check_transaction(&self, transaction: &Transaction) -> Result<(), LedgerError> {
        let sender_missing = transaction
            .sender
            .address()
            .map_or(true, Address::is_empty);
        if sender_missing || transaction.recipient.is_empty() {
            warn!("Rejected transaction without sender or recipient");
            return Err(TransactionError::MalformedTransaction.into());
        }

        if !self.config.identities.recognizes(&transaction.sender) {
            warn!("Rejected unsigned transaction from unknown system sender");
            return Err(TransactionError::InvalidSignature.into());
        }

        if !transaction.is_valid()? {
            warn!("Rejected transaction {} with bad signature", transaction.fingerprint());
            return Err(TransactionError::InvalidSignature.into());
        }

        Ok(())
    }

    /// Mines every pending transaction into a new block and appends it.
    ///
    /// The pool is then replaced by a single reward transaction for
    /// `reward_address`; that reward lands in the block mined after this one.
    pub fn mine_pending_transactions(&self, reward_address: impl Into<Address>) -> Block {
        let mut pending = self.lock_pending();
        let mut block = self.assemble_block(&pending);

        block.mine(self.config.difficulty);

        self.append_block(block, &mut pending, reward_address.into()).1
    }

    /// Like [`Ledger::mine_pending_transactions`], but gives up when `cancel`
    /// fires. A cancelled run leaves both the pool and the chain untouched.
    pub fn mine_pending_transactions_with_cancel(
        &self,
        reward_address: impl Into<Address>,
        cancel: &CancelToken,
    ) -> Result<Block, LedgerError> {
        let mut pending = self.lock_pending();
        let mut block = self.assemble_block(&pending);

        if let Err(err) = block.mine_with_cancel(self.config.difficulty, cancel) {
            warn!("{}; {} transactions stay pending", err, pending.len());
            return Err(err.into());
        }

        Ok(self.append_block(block, &mut pending, reward_address.into()).1)
    }

    fn assemble_block(&self, pending: &[Transaction]) -> Block {
        let previous_hash = self.get_latest_block().hash;
        Block::new(now_timestamp(), pending.to_vec(), previous_hash)
    }

    fn append_block(
        &self,
        block: Block,
        pending: &mut Vec<Transaction>,
        reward_address: Address,
    ) -> (usize, Block) {
        let index = {
            let mut chain = self.write_chain();
            chain.push(block.clone());
            chain.len() - 1
        };

        *pending = vec![Transaction::new_coinbase(
            reward_address,
            self.config.mining_reward,
        )];

        info!(
            "Block {} successfully mined with {} transactions",
            index,
            block.transactions.len()
        );
        (index, block)
    }

    /// Received minus sent over every transaction on the chain.
    /// Pending transactions do not count.
    pub fn get_balance(&self, address: &str) -> f64 {
        let chain = self.read_chain();
        let mut balance = 0.0;

        for block in chain.iter() {
            for tx in &block.transactions {
                if tx.sender.address().is_some_and(|sender| sender.as_str() == address) {
                    balance -= tx.amount;
                }
                if tx.recipient.as_str() == address {
                    balance += tx.amount;
                }
            }
        }

        balance
    }

    /// Walks the chain from block 1 and reports the first failed check:
    /// transaction validity, then the stored hash, then the link to the
    /// previous block. The proof-of-work threshold is only re-checked when
    /// `verify_proof_of_work` is enabled.
    pub fn validate_chain(&self) -> Result<(), ChainViolation> {
        let chain = self.read_chain();

        for (index, pair) in chain.windows(2).enumerate() {
            let (previous, current) = (&pair[0], &pair[1]);
            let index = index + 1;

            let violation = if !current.has_valid_transactions() {
                Some(ChainViolation::InvalidTransactions { index })
            } else if current.hash != current.calculate_hash() {
                Some(ChainViolation::HashMismatch { index })
            } else if current.previous_hash != previous.hash {
                Some(ChainViolation::BrokenLink { index })
            } else if self.config.verify_proof_of_work
                && !meets_difficulty(&current.hash, self.config.difficulty)
            {
                Some(ChainViolation::InsufficientWork { index })
            } else {
                None
            };

            if let Some(violation) = violation {
                warn!("{}", violation);
                return Err(violation);
            }
        }

        Ok(())
    }

    /// Validates the blockchain
    pub fn is_chain_valid(&self) -> bool {
        self.validate_chain().is_ok()
    }
}
