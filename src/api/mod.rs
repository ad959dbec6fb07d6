// API module
//
// This module contains the HTTP service wrapped around the ledger

pub mod handlers;
pub mod routes;

use std::sync::{Mutex, PoisonError};

use actix_web::http::StatusCode;
use actix_web::{HttpResponse, ResponseError};
use log::{error, info};
use thiserror::Error;

use crate::blockchain::storage::StorageError;
use crate::blockchain::{Address, Block, Ledger, LedgerError, LedgerStore, Transaction};

// Re-export main components for easier access
pub use routes::configure_routes;

/// Shared state of the HTTP service
#[derive(Debug)]
pub struct AppState {
    pub ledger: Ledger,

    /// Persistence projection; `None` runs purely in memory
    pub store: Option<LedgerStore>,

    /// Reward address for mine requests that do not name one
    pub default_reward_address: Address,

    persist_lock: Mutex<()>,
}

/// Errors surfaced by the HTTP handlers
#[derive(Debug, Error)]
pub enum ApiError {
    #[error("{0}")]
    Ledger(#[from] LedgerError),

    #[error("{0}")]
    BadRequest(String),

    #[error("{0}")]
    NotFound(String),

    #[error("Storage error: {0}")]
    Storage(StorageError),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl From<StorageError> for ApiError {
    fn from(err: StorageError) -> Self {
        match err {
            StorageError::NotFound(what) => ApiError::NotFound(what),
            other => ApiError::Storage(other),
        }
    }
}

impl ResponseError for ApiError {
    fn status_code(&self) -> StatusCode {
        match self {
            ApiError::Ledger(_) | ApiError::BadRequest(_) => StatusCode::BAD_REQUEST,
            ApiError::NotFound(_) => StatusCode::NOT_FOUND,
            ApiError::Storage(_) | ApiError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    fn error_response(&self) -> HttpResponse {
        HttpResponse::build(self.status_code()).json(serde_json::json!({
            "error": self.to_string()
        }))
    }
}

impl AppState {
    pub fn new(ledger: Ledger, store: Option<LedgerStore>, default_reward_address: Address) -> Self {
        AppState {
            ledger,
            store,
            default_reward_address,
            persist_lock: Mutex::new(()),
        }
    }

    /// Accepts a transaction and mines it into a new block in one step.
    /// Blocks the calling thread; run it through `web::block`.
    pub fn submit_and_mine(
        &self,
        transaction: Transaction,
        reward_address: Address,
    ) -> Result<(String, u64, Block), ApiError> {
        let id = transaction.fingerprint();
        let (index, block) = self.ledger.add_and_mine(transaction, reward_address)?;
        info!("Accepted transaction {} into block {}", id, index);

        self.persist()?;
        Ok((id, index, block))
    }

    /// Mines the pool and records the resulting block.
    /// Blocks the calling thread; run it through `web::block`.
    pub fn mine(&self, reward_address: Address) -> Result<(u64, Block), ApiError> {
        let block = self.ledger.mine_pending_transactions(reward_address);
        let index = self
            .ledger
            .index_of(&block.hash)
            .ok_or_else(|| ApiError::Internal("mined block missing from chain".to_string()))?
            as u64;

        self.persist()?;
        Ok((index, block))
    }

    /// Brings the store up to date with the ledger: every block it is
    /// missing, then the pending pool. A no-op without a store.
    ///
    /// A failed write leaves the ledger ahead of the store; the next
    /// successful call writes the blocks it missed.
    pub fn persist(&self) -> Result<(), ApiError> {
        let store = match &self.store {
            Some(store) => store,
            None => return Ok(()),
        };

        // snapshots are written in the order they are taken
        let _guard = self
            .persist_lock
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        let (chain, pending) = self.ledger.snapshot();

        let result = store
            .sync_chain(&chain)
            .and_then(|_| {
                pending
                    .iter()
                    .try_for_each(|tx| store.record_transaction(tx, None).map(|_| ()))
            })
            .and_then(|_| store.record_pending(&pending))
            .and_then(|_| store.flush());

        if let Err(err) = result {
            error!("Failed to persist ledger at height {}: {}", chain.len(), err);
            return Err(err.into());
        }
        Ok(())
    }
}
