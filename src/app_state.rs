use std::sync::Arc;

use crate::auth::TokenKeys;
use crate::config::Config;
use crate::error::ServerError;
use crate::hub::Hub;
use crate::store::Store;

#[derive(Clone)]
pub struct AppState {
    pub store: Store,
    pub hub: Arc<Hub>,
    pub tokens: Arc<TokenKeys>,
    pub config: Arc<Config>,
}

impl AppState {
    pub async fn new(config: Config, secret: &[u8]) -> Result<Self, ServerError> {
        let store = Store::open(&config.db_path()).await?;

        Ok(AppState {
            store,
            hub: Arc::new(Hub::new()),
            tokens: Arc::new(TokenKeys::from_secret(secret)),
            config: Arc::new(config),
        })
    }
}
