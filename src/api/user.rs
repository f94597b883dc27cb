use axum::extract::State;
use axum::routing::post;
use axum::{Json, Router};
use serde::Deserialize;
use serde_json::{Value, json};

use crate::api::user_uid;
use crate::app_state::AppState;
use crate::error::ServerError;
use crate::store;

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/signup", post(signup))
        .route("/signin", post(signin))
        .route("/info", post(user_info))
        .route("/signout", post(signout))
        .route("/delete", post(delete_user))
}

#[derive(Deserialize)]
struct SignUpRequest {
    email: String,
    password: String,
    name: String,
    #[serde(default)]
    signup_key: String,
}

#[derive(Deserialize)]
struct SigninRequest {
    email: String,
    password: String,
}

#[derive(Deserialize)]
struct TokenRequest {
    token: String,
}

async fn signup(
    State(state): State<AppState>,
    Json(req): Json<SignUpRequest>,
) -> Result<Json<Value>, ServerError> {
    if !state.config.signup_key.is_empty() && req.signup_key != state.config.signup_key {
        return Err(ServerError::InvalidInput("Invalid signup key".into()));
    }

    state
        .store
        .create_user(&req.email, &req.password, &req.name)
        .await?;
    tracing::info!("created new user: {}-{}", req.email, req.name);

    Ok(Json(json!({ "email": req.email, "name": req.name })))
}

async fn signin(
    State(state): State<AppState>,
    Json(req): Json<SigninRequest>,
) -> Result<Json<Value>, ServerError> {
    let user = state.store.verify_user(&req.email, &req.password).await?;
    let token = state.tokens.issue(&user.email)?;
    tracing::info!("user {} signed in", user.email);

    Ok(Json(json!({
        "email": user.email,
        "license": user.license,
        "name": user.name,
        "token": token,
    })))
}

async fn user_info(
    State(state): State<AppState>,
    Json(req): Json<TokenRequest>,
) -> Result<Json<Value>, ServerError> {
    let email = state.tokens.email(&req.token)?;
    let user = state.store.user_info(&email).await?;

    Ok(Json(json!({
        "uid": user_uid(&email),
        "email": user.email,
        "name": user.name,
        "payment": "",
        "license": user.license,
        "credit": 0,
        "mfa": false,
        "discount": {
            "status": "approved",
            "expiry_ts": store::now_millis() + 365 * 24 * 3_600_000,
            "type": "education",
        },
    })))
}

async fn signout() -> Json<Value> {
    Json(json!({}))
}

async fn delete_user(
    State(state): State<AppState>,
    Json(req): Json<TokenRequest>,
) -> Result<Json<Value>, ServerError> {
    let email = state.tokens.email(&req.token)?;
    state.store.delete_user(&email).await?;
    Ok(Json(json!({})))
}
