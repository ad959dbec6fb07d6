use actix_cors::Cors;
use actix_web::{middleware, web, App, HttpServer};
use anyhow::Context;
use clap::Parser;
use log::{info, warn};
use utoipa::OpenApi;
use utoipa_swagger_ui::SwaggerUi;

use meowcoin_ledger::api::{self, handlers, AppState};
use meowcoin_ledger::blockchain::{self, storage, Address, Ledger, LedgerStore};
use meowcoin_ledger::config::ServerConfig;

/// Builds the ledger, restoring it from the store when one is configured
fn initialize_state(config: &ServerConfig) -> anyhow::Result<AppState> {
    let ledger_config = config.ledger_config();
    let reward_address = Address::from(config.default_reward_address.as_str());

    if config.in_memory {
        warn!("Running in memory; mined blocks will not survive a restart");
        let ledger = Ledger::with_config(ledger_config)?;
        return Ok(AppState::new(ledger, None, reward_address));
    }

    std::fs::create_dir_all(&config.data_dir)
        .with_context(|| format!("creating {}", config.data_dir.display()))?;
    let store = LedgerStore::open(&config.data_dir)
        .with_context(|| format!("opening store at {}", config.data_dir.display()))?;

    let blocks = store.load_chain()?;
    let pending = store.load_pending()?;
    let ledger = Ledger::restore(ledger_config, blocks, pending)
        .context("stored chain failed validation")?;
    info!(
        "Loaded {} blocks and {} pending transactions from {}",
        ledger.len(),
        ledger.pending_transactions().len(),
        config.data_dir.display()
    );

    let state = AppState::new(ledger, Some(store), reward_address);
    state.persist()?;
    Ok(state)
}

#[derive(OpenApi)]
#[openapi(
    paths(
        handlers::get_chain,
        handlers::validate_chain,
        handlers::get_balance,
        handlers::get_pending_transactions,
        handlers::new_transaction,
        handlers::sign_transaction,
        handlers::mine_block,
        handlers::faucet,
        handlers::get_blocks,
        handlers::get_block,
        handlers::get_transaction,
        handlers::create_wallet
    ),
    components(
        schemas(
            blockchain::Block,
            blockchain::Transaction,
            blockchain::Address,
            blockchain::DigitalSignature,
            storage::StoredBlock,
            storage::StoredTransaction,
            handlers::ChainResponse,
            handlers::TransactionRequest,
            handlers::SignTransactionRequest,
            handlers::SubmitResponse,
            handlers::MineRequest,
            handlers::MineResponse,
            handlers::FaucetRequest,
            handlers::ValidationResponse,
            handlers::BalanceResponse,
            handlers::WalletResponse
        )
    ),
    tags(
        (name = "ledger", description = "Donation ledger API endpoints")
    ),
    info(
        title = "MeowCoin Ledger API",
        version = "0.1.0",
        description = "Single-node proof-of-work ledger",
        license(
            name = "MIT",
            url = "https://opensource.org/licenses/MIT"
        )
    )
)]
struct ApiDoc;

#[actix_web::main]
async fn main() -> anyhow::Result<()> {
    env_logger::init_from_env(env_logger::Env::new().default_filter_or("info"));

    let config = ServerConfig::parse();
    let state = web::Data::new(initialize_state(&config)?);

    info!(
        "Ledger ready: difficulty {}, reward {}",
        state.ledger.difficulty(),
        state.ledger.mining_reward()
    );
    info!("Starting HTTP server at http://{}:{}", config.host, config.port);

    HttpServer::new(move || {
        let cors = Cors::default()
            .allow_any_origin()
            .allow_any_method()
            .allow_any_header()
            .max_age(3600);

        let openapi = ApiDoc::openapi();

        App::new()
            .wrap(middleware::Logger::default())
            .wrap(cors)
            .app_data(state.clone())
            .configure(api::configure_routes)
            .service(
                SwaggerUi::new("/swagger-ui/{_:.*}")
                    .url("/api-docs/openapi.json", openapi.clone())
            )
    })
    .bind((config.host.as_str(), config.port))?
    .run()
    .await?;

    Ok(())
}
