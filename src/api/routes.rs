use actix_web::web;

use super::handlers;

/// Configures the API routes
///
/// # Arguments
///
/// * `cfg` - The service configuration
pub fn configure_routes(cfg: &mut web::ServiceConfig) {
    cfg.service(
        web::scope("/api")
            .route("/chain", web::get().to(handlers::get_chain))
            .route("/validate", web::get().to(handlers::validate_chain))
            .route("/balance/{address}", web::get().to(handlers::get_balance))
            .route("/transactions/pending", web::get().to(handlers::get_pending_transactions))
            .route("/transactions/new", web::post().to(handlers::new_transaction))
            .route("/transactions/sign", web::post().to(handlers::sign_transaction))
            .route("/mine", web::post().to(handlers::mine_block))
            .route("/faucet", web::post().to(handlers::faucet))
            .route("/blockchain/blocks", web::get().to(handlers::get_blocks))
            .route("/blockchain/blocks/{index}", web::get().to(handlers::get_block))
            .route("/blockchain/transactions/{id}", web::get().to(handlers::get_transaction))
            .route("/wallet/new", web::post().to(handlers::create_wallet)),
    );
}
