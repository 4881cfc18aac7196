use std::sync::Arc;

use ironkey::{
    auth::PasswordHasher,
    config::Config,
    logger,
    model::{AppState, SqliteUserStore},
    routes,
};
use log::info;

#[tokio::main]
async fn main() {
    let config = Config::load().expect("loads configuration");

    logger::init(config.log.level).expect("installs logger");

    let hasher = PasswordHasher::new(&config.hashing).expect("valid password hashing parameters");

    // Can't serve anything without the database
    let store = SqliteUserStore::open(&config.database, hasher).expect("connects to database");

    let state = Arc::new(AppState::new(Arc::new(store)));
    let cors = routes::cors_layer(&config.cors).expect("valid CORS origin");
    let app = routes::router(state, cors);

    info!("Starting ironkey server at {}", config.server.address);

    axum::Server::bind(&config.server.address)
        .serve(app.into_make_service())
        .await
        .unwrap();
}
