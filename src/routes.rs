use std::sync::Arc;

use axum::{
    http::{header, HeaderValue, Method},
    routing::get,
    Router,
};
use log::error;
use tower_http::cors::CorsLayer;

use crate::{
    config::CorsSettings,
    model::{AppState, StoreError, UserStore},
};

pub use error::ApiError;

pub mod error;
pub mod users;

pub fn router(state: Arc<AppState>, cors: CorsLayer) -> Router {
    Router::new()
        .route(
            "/user",
            get(users::get_user)
                .post(users::add_user)
                .patch(users::update_user)
                .delete(users::delete_user),
        )
        .route("/users", get(users::get_users))
        .route("/search", get(users::search))
        .layer(cors)
        .with_state(state)
}

/// Allow the configured origin to call every method the API uses.
/// Preflight (`OPTIONS`) requests are answered with an empty 200.
pub fn cors_layer(settings: &CorsSettings) -> Result<CorsLayer, header::InvalidHeaderValue> {
    let origin = HeaderValue::from_str(&settings.allowed_origin)?;

    Ok(CorsLayer::new()
        .allow_origin(origin)
        .allow_methods([Method::GET, Method::POST, Method::PATCH, Method::DELETE])
        .allow_headers([header::CONTENT_TYPE]))
}

/// Run a store call on the blocking thread pool.
async fn with_store<T, F>(state: &AppState, call: F) -> Result<T, ApiError>
where
    T: Send + 'static,
    F: FnOnce(&dyn UserStore) -> Result<T, StoreError> + Send + 'static,
{
    let store = Arc::clone(&state.store);

    match tokio::task::spawn_blocking(move || call(store.as_ref())).await {
        Ok(result) => Ok(result?),
        Err(err) => {
            error!("User store task failed: {}", err);
            Err(ApiError::OperationFailed)
        }
    }
}
