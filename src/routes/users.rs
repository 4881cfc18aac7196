use std::sync::Arc;

use axum::{
    extract::{
        rejection::{JsonRejection, QueryRejection},
        Json, Query, State,
    },
    http::StatusCode,
    response::{IntoResponse, Response},
};
use axum_macros::debug_handler;
use log::debug;
use validator::Validate;

use super::{error::ApiError, with_store};
use crate::model::{AddUserRequest, AppState, RedactedUser, UpdateUserRequest};

/// Largest offset `GET /users` accepts.
pub const MAX_OFFSET: u16 = 1000;

/// Query for endpoints that address a single user by email or id.
/// Empty values count as absent.
#[derive(Debug, Default, serde::Deserialize, Validate)]
pub struct UserLookup {
    #[validate(email, length(max = 50))]
    pub email: Option<String>,
    #[validate(length(max = 50))]
    pub id: Option<String>,
}

impl UserLookup {
    /// Validate the lookup and split it into `(email, id)`.
    /// At least one of the two is guaranteed to be present.
    fn into_keys(self) -> Result<(Option<String>, Option<String>), ApiError> {
        let lookup = UserLookup {
            email: self.email.filter(|email| !email.is_empty()),
            id: self.id.filter(|id| !id.is_empty()),
        };
        lookup.validate()?;

        if lookup.email.is_none() && lookup.id.is_none() {
            debug!("Missing `email` and `id` params in request");
            return Err(ApiError::Validation(
                "one of `email` or `id` is required".to_string(),
            ));
        }

        Ok((lookup.email, lookup.id))
    }
}

#[derive(Debug, serde::Deserialize)]
pub struct PageQuery {
    pub offset: Option<u16>,
}

#[derive(Debug, serde::Deserialize)]
pub struct SearchQuery {
    #[serde(default)]
    pub value: String,
}

#[debug_handler]
pub async fn add_user(
    State(state): State<Arc<AppState>>,
    body: Result<Json<AddUserRequest>, JsonRejection>,
) -> Result<Json<RedactedUser>, ApiError> {
    let Json(request) = body?;
    request.validate()?;

    debug!("Got add user request for {}", request.email);

    let user = with_store(&state, move |store| store.add_user(request.into())).await?;

    Ok(Json(user))
}

#[debug_handler]
pub async fn get_user(
    State(state): State<Arc<AppState>>,
    query: Result<Query<UserLookup>, QueryRejection>,
) -> Result<Json<RedactedUser>, ApiError> {
    let Query(lookup) = query?;
    let (email, id) = lookup.into_keys()?;

    let user = with_store(&state, move |store| {
        store.get_user(email.as_deref(), id.as_deref())
    })
    .await?;

    match user {
        Some(user) => Ok(Json(user.into())),
        None => {
            debug!("User not found");
            Err(ApiError::NotFound)
        }
    }
}

/// Responds with an empty object rather than an empty page.
#[debug_handler]
pub async fn get_users(
    State(state): State<Arc<AppState>>,
    query: Result<Query<PageQuery>, QueryRejection>,
) -> Result<Response, ApiError> {
    let Query(page) = query?;

    let Some(offset) = page.offset else {
        return Err(ApiError::Validation("`offset` is required".to_string()));
    };
    if offset > MAX_OFFSET {
        return Err(ApiError::Validation(format!(
            "`offset` must be at most {}",
            MAX_OFFSET
        )));
    }

    let result = with_store(&state, move |store| store.get_users(offset)).await?;

    if result.users.is_empty() {
        return Ok(Json(serde_json::json!({})).into_response());
    }

    Ok(Json(result).into_response())
}

#[debug_handler]
pub async fn update_user(
    State(state): State<Arc<AppState>>,
    body: Result<Json<UpdateUserRequest>, JsonRejection>,
) -> Result<StatusCode, ApiError> {
    let Json(request) = body?;
    request.validate()?;

    let id = request.id.clone();
    let updated = with_store(&state, move |store| store.update_user(&request)).await?;

    if updated {
        Ok(StatusCode::OK)
    } else {
        debug!("Update of user {} changed nothing", id);
        Err(ApiError::OperationFailed)
    }
}

#[debug_handler]
pub async fn delete_user(
    State(state): State<Arc<AppState>>,
    query: Result<Query<UserLookup>, QueryRejection>,
) -> Result<StatusCode, ApiError> {
    let Query(lookup) = query?;
    let (email, id) = lookup.into_keys()?;

    let deleted = with_store(&state, move |store| {
        store.delete_user(email.as_deref(), id.as_deref())
    })
    .await?;

    if deleted {
        debug!("Successfully deleted user");
        Ok(StatusCode::OK)
    } else {
        Err(ApiError::OperationFailed)
    }
}

#[debug_handler]
pub async fn search(
    State(state): State<Arc<AppState>>,
    query: Result<Query<SearchQuery>, QueryRejection>,
) -> Result<Json<Vec<RedactedUser>>, ApiError> {
    let Query(query) = query?;

    let users = with_store(&state, move |store| store.search(&query.value)).await?;

    Ok(Json(users))
}
