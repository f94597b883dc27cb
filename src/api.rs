mod publish;
mod user;
mod vault;

use axum::{Json, Router, routing::post};
use serde_json::{Value, json};
use sha2::{Digest, Sha256};

use crate::app_state::AppState;
use crate::store;

pub fn get_api_router() -> Router<AppState> {
    Router::new()
        .nest("/user", user::router())
        .nest("/vault", vault::router())
        .merge(publish::router())
        .route("/subscription/list", post(list_subscriptions))
}

/// Subscription stub: a self-hosted server always reports an active
/// ten-year sync plan.
async fn list_subscriptions() -> Json<Value> {
    let expiry = store::now_millis() + 10 * 365 * 24 * 3_600_000;
    Json(json!({
        "business": null,
        "publish": null,
        "sync": { "earlybird": false, "expiry_ts": expiry, "renew": "" },
    }))
}

/// Stable opaque user handle derived from the email; clients only compare it.
pub(crate) fn user_uid(email: &str) -> String {
    hex::encode(Sha256::digest(email.as_bytes()))[..32].to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn user_uid_is_stable_and_opaque() {
        assert_eq!(user_uid("a@x"), user_uid("a@x"));
        assert_ne!(user_uid("a@x"), user_uid("b@x"));
        assert_eq!(user_uid("a@x").len(), 32);
        assert!(user_uid("a@x").chars().all(|c| c.is_ascii_hexdigit()));
    }
}
