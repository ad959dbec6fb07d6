use actix_web::{web, HttpResponse};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use super::{ApiError, AppState};
use crate::blockchain::storage::{StoredBlock, StoredTransaction};
use crate::blockchain::transaction::{is_portable_amount, now_timestamp};
use crate::blockchain::{Address, Block, DigitalSignature, Sender, Transaction, Wallet};

/// Data structure for the service state
pub type AppData = web::Data<AppState>;

/// Response for the chain endpoint
#[derive(Serialize, Deserialize, ToSchema)]
pub struct ChainResponse {
    /// The length of the chain
    pub length: usize,

    /// The blocks in the chain
    pub chain: Vec<Block>,

    /// Whether the chain is valid
    pub is_valid: bool,
}

/// A transaction signed by the client
#[derive(Serialize, Deserialize, ToSchema)]
pub struct TransactionRequest {
    /// The sender's public key (hex)
    pub sender: String,

    /// The recipient's public key (hex)
    pub recipient: String,

    /// The amount to transfer
    pub amount: f64,

    /// The timestamp that was signed; defaults to now
    pub timestamp: Option<String>,

    /// DER signature over the fingerprint (hex)
    pub signature: String,
}

/// A transfer the server signs on the client's behalf (demo only)
#[derive(Serialize, Deserialize, ToSchema)]
pub struct SignTransactionRequest {
    /// The recipient's public key (hex)
    pub recipient: String,

    /// The amount to transfer
    pub amount: f64,

    /// The sender's private key (hex)
    pub private_key: String,
}

/// Response for the submission endpoints
#[derive(Serialize, Deserialize, ToSchema)]
pub struct SubmitResponse {
    /// Fingerprint of the accepted transaction
    pub transaction_id: String,

    /// Index of the block that sealed it
    pub block_index: u64,

    /// The block that sealed it
    pub block: Block,
}

/// Request for the mine endpoint
#[derive(Serialize, Deserialize, ToSchema)]
pub struct MineRequest {
    /// The miner's address; the service default when omitted
    pub miner_address: Option<String>,
}

/// Response for the mine endpoint
#[derive(Serialize, Deserialize, ToSchema)]
pub struct MineResponse {
    /// The message
    pub message: String,

    /// Index of the newly mined block
    pub block_index: u64,

    /// The newly mined block
    pub block: Block,
}

/// Request for the faucet endpoint
#[derive(Serialize, Deserialize, ToSchema)]
pub struct FaucetRequest {
    /// The address to fund
    pub recipient: String,

    /// The amount to fund
    pub amount: f64,
}

/// Response for the validate endpoint
#[derive(Serialize, Deserialize, ToSchema)]
pub struct ValidationResponse {
    pub is_valid: bool,

    /// First failed check, if any
    pub violation: Option<String>,
}

/// Response for the balance endpoint
#[derive(Serialize, Deserialize, ToSchema)]
pub struct BalanceResponse {
    pub address: String,
    pub balance: f64,
}

/// Response for the create wallet endpoint
#[derive(Serialize, Deserialize, ToSchema)]
pub struct WalletResponse {
    /// The wallet's address (uncompressed public key, hex)
    pub address: String,

    /// The wallet's private key (hex encoded)
    pub private_key: String,
}

/// Runs ledger work that may wait on the pool lock off the async workers
async fn run_blocking<F, T>(work: F) -> Result<T, ApiError>
where
    F: FnOnce() -> Result<T, ApiError> + Send + 'static,
    T: Send + 'static,
{
    web::block(work)
        .await
        .map_err(|e| ApiError::Internal(e.to_string()))?
}

fn check_amount(amount: f64) -> Result<(), ApiError> {
    if is_portable_amount(amount) {
        Ok(())
    } else {
        Err(ApiError::BadRequest(format!(
            "Unsupported amount {}; use a value between 0.000001 and 1e21",
            amount
        )))
    }
}

/// Submits and immediately mines, rewarding `reward_address`
async fn submit_and_mine(
    state: &AppData,
    transaction: Transaction,
    reward_address: Address,
) -> Result<SubmitResponse, ApiError> {
    let state = state.clone();
    let (transaction_id, block_index, block) =
        run_blocking(move || state.submit_and_mine(transaction, reward_address)).await?;

    Ok(SubmitResponse {
        transaction_id,
        block_index,
        block,
    })
}

/// Get the in-memory chain
///
/// Returns the entire chain and its validity status
#[utoipa::path(
    get,
    path = "/api/chain",
    responses(
        (status = 200, description = "Chain retrieved successfully", body = ChainResponse)
    )
)]
pub async fn get_chain(state: AppData) -> HttpResponse {
    let chain = state.ledger.chain();
    let is_valid = state.ledger.is_chain_valid();

    HttpResponse::Ok().json(ChainResponse {
        length: chain.len(),
        chain,
        is_valid,
    })
}

/// Get all pending transactions
#[utoipa::path(
    get,
    path = "/api/transactions/pending",
    responses(
        (status = 200, description = "Pending transactions retrieved successfully", body = Vec<Transaction>),
        (status = 500, description = "Internal server error")
    )
)]
pub async fn get_pending_transactions(state: AppData) -> Result<HttpResponse, ApiError> {
    let pending = run_blocking(move || Ok(state.ledger.pending_transactions())).await?;
    Ok(HttpResponse::Ok().json(pending))
}

/// Submit a signed transaction
///
/// The transaction is validated, queued and mined right away with the
/// reward going to the sender.
#[utoipa::path(
    post,
    path = "/api/transactions/new",
    request_body = TransactionRequest,
    responses(
        (status = 201, description = "Transaction mined", body = SubmitResponse),
        (status = 400, description = "Invalid transaction"),
        (status = 500, description = "Internal server error")
    )
)]
pub async fn new_transaction(
    state: AppData,
    request: web::Json<TransactionRequest>,
) -> Result<HttpResponse, ApiError> {
    let request = request.into_inner();
    check_amount(request.amount)?;
    let sender = state
        .ledger
        .config()
        .identities
        .classify(Some(&request.sender));

    let mut transaction = Transaction::with_timestamp(
        sender,
        request.recipient,
        request.amount,
        request.timestamp.unwrap_or_else(now_timestamp),
    );
    transaction
        .attach_signature(DigitalSignature(request.signature))
        .map_err(crate::blockchain::LedgerError::from)?;

    let response = submit_and_mine(&state, transaction, Address::from(request.sender)).await?;
    Ok(HttpResponse::Created().json(response))
}

/// Sign with a private key and submit
///
/// Demo helper for clients without a local wallet.
#[utoipa::path(
    post,
    path = "/api/transactions/sign",
    request_body = SignTransactionRequest,
    responses(
        (status = 201, description = "Transaction mined", body = SubmitResponse),
        (status = 400, description = "Invalid key or transaction"),
        (status = 500, description = "Internal server error")
    )
)]
pub async fn sign_transaction(
    state: AppData,
    request: web::Json<SignTransactionRequest>,
) -> Result<HttpResponse, ApiError> {
    let request = request.into_inner();
    check_amount(request.amount)?;

    let private_key = hex::decode(&request.private_key)
        .map_err(|_| ApiError::BadRequest("Invalid private key format. Must be a hex string.".to_string()))?;
    let wallet = Wallet::from_secret_key(&private_key)
        .map_err(|e| ApiError::BadRequest(format!("Invalid private key: {}", e)))?;

    let mut transaction = Transaction::new(
        Sender::User(wallet.address().clone()),
        request.recipient,
        request.amount,
    );
    transaction
        .sign(&wallet)
        .map_err(crate::blockchain::LedgerError::from)?;

    let response = submit_and_mine(&state, transaction, wallet.address().clone()).await?;
    Ok(HttpResponse::Created().json(response))
}

/// Mine a new block
///
/// Seals every pending transaction into a new block
#[utoipa::path(
    post,
    path = "/api/mine",
    request_body = MineRequest,
    responses(
        (status = 200, description = "Block mined successfully", body = MineResponse),
        (status = 500, description = "Internal server error")
    )
)]
pub async fn mine_block(
    state: AppData,
    request: web::Json<MineRequest>,
) -> Result<HttpResponse, ApiError> {
    let reward_address = request
        .into_inner()
        .miner_address
        .filter(|address| !address.is_empty())
        .map(Address::from)
        .unwrap_or_else(|| state.default_reward_address.clone());

    let miner = state.clone();
    let (block_index, block) = run_blocking(move || miner.mine(reward_address)).await?;

    Ok(HttpResponse::Ok().json(MineResponse {
        message: "Block successfully mined".to_string(),
        block_index,
        block,
    }))
}

/// Claim coins from the faucet
///
/// Sends from the operator account when one is configured, otherwise from
/// the faucet address. No signature is involved.
#[utoipa::path(
    post,
    path = "/api/faucet",
    request_body = FaucetRequest,
    responses(
        (status = 201, description = "Faucet transfer mined", body = SubmitResponse),
        (status = 400, description = "Invalid request"),
        (status = 500, description = "Internal server error")
    )
)]
pub async fn faucet(
    state: AppData,
    request: web::Json<FaucetRequest>,
) -> Result<HttpResponse, ApiError> {
    let request = request.into_inner();
    if request.amount <= 0.0 {
        return Err(ApiError::BadRequest(format!(
            "Invalid faucet amount: {}",
            request.amount
        )));
    }
    check_amount(request.amount)?;

    let identities = &state.ledger.config().identities;
    let sender = match &identities.system_operator {
        Some(operator) => Sender::SystemOperator(operator.clone()),
        None => Sender::Faucet(identities.faucet.clone()),
    };

    let transaction = Transaction::new(sender, request.recipient, request.amount);
    let response =
        submit_and_mine(&state, transaction, state.default_reward_address.clone()).await?;
    Ok(HttpResponse::Created().json(response))
}

/// List mined blocks, newest first
#[utoipa::path(
    get,
    path = "/api/blockchain/blocks",
    responses(
        (status = 200, description = "Blocks retrieved successfully", body = Vec<StoredBlock>),
        (status = 500, description = "Internal server error")
    )
)]
pub async fn get_blocks(state: AppData) -> Result<HttpResponse, ApiError> {
    let blocks = match &state.store {
        Some(store) => store.get_blocks()?,
        None => state
            .ledger
            .chain()
            .into_iter()
            .enumerate()
            .rev()
            .map(|(index, block)| StoredBlock {
                index: index as u64,
                block,
            })
            .collect(),
    };

    Ok(HttpResponse::Ok().json(blocks))
}

/// Get a block by index
#[utoipa::path(
    get,
    path = "/api/blockchain/blocks/{index}",
    responses(
        (status = 200, description = "Block found", body = StoredBlock),
        (status = 404, description = "Block not found")
    )
)]
pub async fn get_block(state: AppData, index: web::Path<u64>) -> Result<HttpResponse, ApiError> {
    let index = index.into_inner();
    let block = match &state.store {
        Some(store) => store.get_block(index)?,
        None => state
            .ledger
            .block(index as usize)
            .map(|block| StoredBlock { index, block })
            .ok_or_else(|| ApiError::NotFound(format!("Block {} not found", index)))?,
    };

    Ok(HttpResponse::Ok().json(block))
}

/// Get a transaction by fingerprint
#[utoipa::path(
    get,
    path = "/api/blockchain/transactions/{id}",
    responses(
        (status = 200, description = "Transaction found", body = StoredTransaction),
        (status = 404, description = "Transaction not found")
    )
)]
pub async fn get_transaction(
    state: AppData,
    id: web::Path<String>,
) -> Result<HttpResponse, ApiError> {
    let id = id.into_inner();
    if let Some(store) = &state.store {
        return Ok(HttpResponse::Ok().json(store.get_transaction(&id)?));
    }

    let found = run_blocking(move || Ok(find_in_ledger(&state, &id).map(|found| (id, found)))).await?;

    match found {
        Some((id, (block_index, transaction))) => Ok(HttpResponse::Ok().json(StoredTransaction {
            id,
            block_index,
            transaction,
        })),
        None => Err(ApiError::NotFound("Transaction not found".to_string())),
    }
}

/// Searches the chain, then the pool, for a transaction with fingerprint `id`
fn find_in_ledger(state: &AppState, id: &str) -> Option<(Option<u64>, Transaction)> {
    let mined = state.ledger.chain().into_iter().enumerate().find_map(|(index, block)| {
        block
            .transactions
            .into_iter()
            .find(|tx| tx.fingerprint() == id)
            .map(|tx| (Some(index as u64), tx))
    });

    mined.or_else(|| {
        state
            .ledger
            .pending_transactions()
            .into_iter()
            .find(|tx| tx.fingerprint() == id)
            .map(|tx| (None, tx))
    })
}

/// Check if the chain is valid
#[utoipa::path(
    get,
    path = "/api/validate",
    responses(
        (status = 200, description = "Chain validation status", body = ValidationResponse)
    )
)]
pub async fn validate_chain(state: AppData) -> HttpResponse {
    let violation = state.ledger.validate_chain().err();

    HttpResponse::Ok().json(ValidationResponse {
        is_valid: violation.is_none(),
        violation: violation.map(|v| v.to_string()),
    })
}

/// Get the balance of an address
#[utoipa::path(
    get,
    path = "/api/balance/{address}",
    responses(
        (status = 200, description = "Balance computed from the chain", body = BalanceResponse)
    )
)]
pub async fn get_balance(state: AppData, address: web::Path<String>) -> HttpResponse {
    let address = address.into_inner();
    let balance = state.ledger.get_balance(&address);

    HttpResponse::Ok().json(BalanceResponse { address, balance })
}

/// Create a new wallet
///
/// Creates a new wallet with a random keypair.
/// The private key must be stored by the caller.
#[utoipa::path(
    post,
    path = "/api/wallet/new",
    responses(
        (status = 201, description = "Wallet created successfully", body = WalletResponse)
    )
)]
pub async fn create_wallet() -> HttpResponse {
    let wallet = Wallet::new();

    HttpResponse::Created().json(WalletResponse {
        address: wallet.address().to_string(),
        private_key: hex::encode(wallet.export_secret_key()),
    })
}
