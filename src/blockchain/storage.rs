use std::path::Path;

use log::{debug, warn};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use sled::{Batch, Db, IVec, Tree};
use thiserror::Error;
use utoipa::ToSchema;

use super::block::Block;
use super::transaction::Transaction;

/// Errors that can occur during storage operations
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("Database error: {0}")]
    DatabaseError(#[from] sled::Error),

    #[error("Serialization error: {0}")]
    SerializationError(String),

    #[error("Deserialization error: {0}")]
    DeserializationError(String),

    #[error("Item not found: {0}")]
    NotFound(String),
}

/// A mined block together with its position in the chain
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct StoredBlock {
    pub index: u64,
    pub block: Block,
}

/// A submitted transaction, indexed by its fingerprint
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct StoredTransaction {
    pub id: String,
    /// Block that sealed it; `None` while pending
    pub block_index: Option<u64>,
    pub transaction: Transaction,
}

/// Read-only projection of the ledger onto disk.
///
/// The service writes here after the ledger has accepted a transaction or
/// appended a block; nothing in this store ever feeds back into the chain
/// except a full, validated restore on startup.
pub struct LedgerStore {
    db: Db,

    /// Blocks keyed by big-endian index
    blocks: Tree,

    /// Transactions keyed by fingerprint
    transactions: Tree,

    /// Snapshot of the pending pool keyed by big-endian position
    pending: Tree,
}

impl std::fmt::Debug for LedgerStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LedgerStore")
            .field("blocks", &self.blocks.len())
            .field("transactions", &self.transactions.len())
            .field("pending", &self.pending.len())
            .finish()
    }
}

fn encode<T: Serialize>(value: &T) -> Result<Vec<u8>, StorageError> {
    bincode::serialize(value).map_err(|e| StorageError::SerializationError(e.to_string()))
}

fn decode<T: DeserializeOwned>(bytes: &[u8]) -> Result<T, StorageError> {
    bincode::deserialize(bytes).map_err(|e| StorageError::DeserializationError(e.to_string()))
}

impl LedgerStore {
    /// Opens (or creates) the store at `path`
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self, StorageError> {
        let db = sled::open(path)?;

        let blocks = db.open_tree("blocks")?;
        let transactions = db.open_tree("transactions")?;
        let pending = db.open_tree("pending")?;

        Ok(Self {
            db,
            blocks,
            transactions,
            pending,
        })
    }

    /// Records a transaction. Passing `None` marks it as pending; a pending
    /// record never replaces an existing one, so it cannot clobber the block
    /// index written by a concurrent `record_block`.
    pub fn record_transaction(
        &self,
        transaction: &Transaction,
        block_index: Option<u64>,
    ) -> Result<StoredTransaction, StorageError> {
        let stored = StoredTransaction {
            id: transaction.fingerprint(),
            block_index,
            transaction: transaction.clone(),
        };
        let key = stored.id.as_bytes();
        let value = encode(&stored)?;

        if block_index.is_some() {
            self.transactions.insert(key, value)?;
        } else if self
            .transactions
            .compare_and_swap(key, None as Option<&[u8]>, Some(value))?
            .is_err()
        {
            debug!("Transaction {} already recorded", stored.id);
        }

        Ok(stored)
    }

    /// Records a mined block and stamps each of its transactions with `index`
    pub fn record_block(&self, index: u64, block: &Block) -> Result<(), StorageError> {
        let stored = StoredBlock {
            index,
            block: block.clone(),
        };
        self.blocks.insert(index.to_be_bytes(), encode(&stored)?)?;

        for transaction in &block.transactions {
            self.record_transaction(transaction, Some(index))?;
        }

        debug!("Stored block {} ({} transactions)", index, block.transactions.len());
        Ok(())
    }

    /// Gets a block by its chain index
    pub fn get_block(&self, index: u64) -> Result<StoredBlock, StorageError> {
        match self.blocks.get(index.to_be_bytes())? {
            Some(value) => decode(&value),
            None => Err(StorageError::NotFound(format!("Block {} not found", index))),
        }
    }

    /// Gets all stored blocks, newest first
    pub fn get_blocks(&self) -> Result<Vec<StoredBlock>, StorageError> {
        let mut blocks = self.load_blocks()?;
        blocks.reverse();
        Ok(blocks)
    }

    /// Gets the stored chain in index order, ready for `Ledger::restore`.
    ///
    /// Only the unbroken run of indexes from 0 is returned; anything after a
    /// missing or unreadable block is left out.
    pub fn load_chain(&self) -> Result<Vec<Block>, StorageError> {
        let mut chain = Vec::new();

        for stored in self.load_blocks()? {
            if stored.index != chain.len() as u64 {
                warn!(
                    "Block {} is missing; ignoring stored blocks from {}",
                    chain.len(),
                    stored.index
                );
                break;
            }
            chain.push(stored.block);
        }

        Ok(chain)
    }

    /// Number of blocks stored without a gap, counting from index 0
    pub fn stored_height(&self) -> Result<u64, StorageError> {
        let mut height = 0u64;

        for key in self.blocks.iter().keys() {
            let index = match <[u8; 8]>::try_from(key?.as_ref()) {
                Ok(bytes) => u64::from_be_bytes(bytes),
                Err(_) => break,
            };
            if index != height {
                break;
            }
            height += 1;
        }

        Ok(height)
    }

    /// Records every block of `chain` past the stored height and drops stored
    /// blocks beyond its tip.
    ///
    /// A block whose earlier write failed is picked up again here, so the
    /// stored chain catches up with the ledger on the next successful sync.
    /// Returns the number of blocks written.
    pub fn sync_chain(&self, chain: &[Block]) -> Result<usize, StorageError> {
        let stale: Vec<IVec> = self
            .blocks
            .range((chain.len() as u64).to_be_bytes()..)
            .keys()
            .collect::<Result<_, _>>()?;
        if !stale.is_empty() {
            warn!("Dropping {} stored blocks past height {}", stale.len(), chain.len());
        }
        for key in stale {
            self.blocks.remove(key)?;
        }

        let height = self.stored_height()?;
        let mut written = 0;

        for (index, block) in chain.iter().enumerate().skip(height as usize) {
            self.record_block(index as u64, block)?;
            written += 1;
        }

        if written > 1 {
            warn!("Stored {} blocks that were missing from the store", written - 1);
        }
        Ok(written)
    }

    /// Replaces the stored pending pool with `pending` in one batch
    pub fn record_pending(&self, pending: &[Transaction]) -> Result<(), StorageError> {
        let mut batch = Batch::default();

        for key in self.pending.iter().keys() {
            batch.remove(key?);
        }
        for (position, transaction) in pending.iter().enumerate() {
            batch.insert((position as u64).to_be_bytes().to_vec(), encode(transaction)?);
        }

        self.pending.apply_batch(batch)?;
        debug!("Stored {} pending transactions", pending.len());
        Ok(())
    }

    /// Gets the stored pending pool in submission order
    pub fn load_pending(&self) -> Result<Vec<Transaction>, StorageError> {
        let mut pending = Vec::new();

        for result in self.pending.iter() {
            let (_, value) = result?;
            match decode::<Transaction>(&value) {
                Ok(transaction) => pending.push(transaction),
                Err(e) => warn!("Skipping unreadable pending transaction: {}", e),
            }
        }

        Ok(pending)
    }

    /// Index order comes from the big-endian keys
    fn load_blocks(&self) -> Result<Vec<StoredBlock>, StorageError> {
        let mut blocks = Vec::new();
        let mut deserialization_errors = Vec::new();

        for result in self.blocks.iter() {
            let (key, value) = result?;
            match decode::<StoredBlock>(&value) {
                Ok(block) => blocks.push(block),
                Err(e) => deserialization_errors.push(format!("{:?}: {}", key.as_ref(), e)),
            }
        }

        if !deserialization_errors.is_empty() {
            if blocks.is_empty() {
                return Err(StorageError::DeserializationError(format!(
                    "Failed to deserialize any blocks: {}",
                    deserialization_errors.join(", ")
                )));
            }
            warn!(
                "Some blocks could not be deserialized: {}",
                deserialization_errors.join(", ")
            );
        }

        Ok(blocks)
    }

    /// Gets a transaction by its fingerprint
    pub fn get_transaction(&self, id: &str) -> Result<StoredTransaction, StorageError> {
        match self.transactions.get(id.as_bytes())? {
            Some(value) => decode(&value),
            None => Err(StorageError::NotFound(format!(
                "Transaction with ID {} not found",
                id
            ))),
        }
    }

    /// Flushes all pending writes to disk
    pub fn flush(&self) -> Result<(), StorageError> {
        self.db.flush()?;
        Ok(())
    }
}
