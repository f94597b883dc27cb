use axum::extract::State;
use axum::routing::post;
use axum::{Json, Router};
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};

use crate::api::user_uid;
use crate::app_state::AppState;
use crate::crypto;
use crate::error::ServerError;
use crate::store::Vault;

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/create", post(create_vault))
        .route("/list", post(list_vaults))
        .route("/access", post(access_vault))
        .route("/delete", post(delete_vault))
}

#[derive(Deserialize)]
struct CreateVaultRequest {
    token: String,
    name: String,
    #[serde(default)]
    salt: String,
    #[serde(default)]
    keyhash: String,
}

#[derive(Deserialize)]
struct ListVaultRequest {
    token: String,
}

#[derive(Deserialize)]
struct AccessVaultRequest {
    token: String,
    vault_uid: String,
    keyhash: String,
}

#[derive(Deserialize)]
struct DeleteVaultRequest {
    token: String,
    vault_uid: String,
}

/// The vault view clients receive; the keyhash is only exposed to the owner
/// at creation time.
#[derive(Serialize)]
struct VaultInfo {
    id: String,
    created: i64,
    host: String,
    name: String,
    password: String,
    salt: String,
    size: i64,
    keyhash: Option<String>,
    version: i64,
}

impl VaultInfo {
    fn from_vault(vault: &Vault, with_keyhash: bool) -> Self {
        VaultInfo {
            id: vault.id.clone(),
            created: vault.created,
            host: vault.host.clone(),
            name: vault.name.clone(),
            password: vault.password.clone(),
            salt: vault.salt.clone(),
            size: vault.size,
            keyhash: with_keyhash.then(|| vault.keyhash.clone()),
            version: vault.version,
        }
    }
}

async fn create_vault(
    State(state): State<AppState>,
    Json(req): Json<CreateVaultRequest>,
) -> Result<Json<VaultInfo>, ServerError> {
    let email = state.tokens.email(&req.token)?;

    // Without a client-supplied salt the server fabricates the credentials;
    // with one, the client must also bring the derived keyhash.
    let (password, salt, keyhash) = if req.salt.is_empty() {
        let password = crypto::generate_password(20, 5, 5, false, true)?;
        let salt = crypto::generate_password(20, 5, 5, false, true)?;
        (password, salt, String::new())
    } else {
        if req.keyhash.is_empty() {
            return Err(ServerError::InvalidInput(
                "keyhash must be provided if salt is provided".into(),
            ));
        }
        (String::new(), req.salt, req.keyhash)
    };

    let vault = state
        .store
        .create_vault(
            &req.name,
            &email,
            &password,
            &salt,
            &keyhash,
            &state.config.host,
            state.config.max_storage_bytes,
        )
        .await?;
    tracing::info!("created new vault: {}-{}", vault.id, vault.name);

    Ok(Json(VaultInfo::from_vault(&vault, true)))
}

async fn list_vaults(
    State(state): State<AppState>,
    Json(req): Json<ListVaultRequest>,
) -> Result<Json<Value>, ServerError> {
    let email = state.tokens.email(&req.token)?;

    let vaults: Vec<VaultInfo> = state
        .store
        .get_vaults(&email)
        .await?
        .iter()
        .map(|v| VaultInfo::from_vault(v, false))
        .collect();
    let shared: Vec<VaultInfo> = state
        .store
        .get_shared_vaults(&email)
        .await?
        .iter()
        .map(|v| VaultInfo::from_vault(v, false))
        .collect();

    Ok(Json(json!({ "vaults": vaults, "shared": shared })))
}

async fn access_vault(
    State(state): State<AppState>,
    Json(req): Json<AccessVaultRequest>,
) -> Result<Json<Value>, ServerError> {
    let email = state.tokens.email(&req.token)?;

    if !state.store.has_access(&req.vault_uid, &email).await? {
        return Err(ServerError::Unauthorized(
            "You do not have access to this vault".into(),
        ));
    }

    state.store.get_vault(&req.vault_uid, &req.keyhash).await?;
    let user = state.store.user_info(&email).await?;

    Ok(Json(json!({
        "allowed": true,
        "email": email,
        "name": user.name,
        "useruid": user_uid(&email),
    })))
}

async fn delete_vault(
    State(state): State<AppState>,
    Json(req): Json<DeleteVaultRequest>,
) -> Result<Json<Value>, ServerError> {
    let email = state.tokens.email(&req.token)?;
    state.store.delete_vault(&req.vault_uid, &email).await?;
    tracing::info!("deleted vault: {}", req.vault_uid);

    Ok(Json(json!({ "status": "ok" })))
}
