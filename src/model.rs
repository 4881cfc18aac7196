pub mod database;
pub mod user;

use std::sync::Arc;

pub use database::{SqliteUserStore, StoreError, UserStore};
pub use user::{AddUserRequest, GetUsersResult, RedactedUser, UpdateUserRequest, User};

/// State shared by every request handler.
pub struct AppState {
    pub store: Arc<dyn UserStore>,
}

impl AppState {
    pub fn new(store: Arc<dyn UserStore>) -> AppState {
        AppState { store }
    }
}
