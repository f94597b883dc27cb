use uuid::Uuid;

use crate::crypto;
use crate::error::ServerError;
use crate::store::{Share, Store, Vault, now_millis};

impl Store {
    /// Creates a vault for `owner`. One of `password` or `keyhash` must be
    /// non-empty; a missing keyhash is derived from the password and salt.
    pub async fn create_vault(
        &self,
        name: &str,
        owner: &str,
        password: &str,
        salt: &str,
        keyhash: &str,
        host: &str,
        size_quota: i64,
    ) -> Result<Vault, ServerError> {
        if keyhash.is_empty() && password.is_empty() {
            return Err(ServerError::InvalidInput(
                "password and keyhash cannot both be empty".into(),
            ));
        }

        let keyhash = if keyhash.is_empty() {
            crypto::make_keyhash(password, salt)?
        } else {
            keyhash.to_string()
        };

        let vault = Vault {
            id: Uuid::new_v4().to_string(),
            user_email: owner.to_string(),
            created: now_millis(),
            host: host.to_string(),
            name: name.to_string(),
            password: password.to_string(),
            salt: salt.to_string(),
            size: size_quota,
            version: 0,
            keyhash,
        };

        sqlx::query(
            "INSERT INTO vaults (id, user_email, created, host, name, password, salt, size, version, keyhash) \
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(&vault.id)
        .bind(&vault.user_email)
        .bind(vault.created)
        .bind(&vault.host)
        .bind(&vault.name)
        .bind(&vault.password)
        .bind(&vault.salt)
        .bind(vault.size)
        .bind(vault.version)
        .bind(&vault.keyhash)
        .execute(self.pool())
        .await?;

        Ok(vault)
    }

    /// Fetches a vault, gated by its keyhash (constant-time compare).
    pub async fn get_vault(&self, id: &str, keyhash: &str) -> Result<Vault, ServerError> {
        let vault = sqlx::query_as::<_, Vault>("SELECT * FROM vaults WHERE id = ?")
            .bind(id)
            .fetch_optional(self.pool())
            .await?
            .ok_or_else(|| ServerError::NotFound("Vault not found".into()))?;

        if !crypto::keyhash_matches(&vault.keyhash, keyhash) {
            return Err(ServerError::Forbidden("keyhash does not match".into()));
        }

        Ok(vault)
    }

    /// Unconditional version write; the session engine guarantees monotonic
    /// usage.
    pub async fn set_vault_version(&self, id: &str, version: i64) -> Result<(), ServerError> {
        sqlx::query("UPDATE vaults SET version = ? WHERE id = ?")
            .bind(version)
            .bind(id)
            .execute(self.pool())
            .await?;
        Ok(())
    }

    /// True when `email` owns the vault or holds a share on it.
    pub async fn has_access(&self, vault_id: &str, email: &str) -> Result<bool, ServerError> {
        let allowed: bool = sqlx::query_scalar(
            "SELECT EXISTS(SELECT 1 FROM vaults WHERE id = ? AND user_email = ?) \
             OR EXISTS(SELECT 1 FROM shares WHERE vault_id = ? AND email = ?)",
        )
        .bind(vault_id)
        .bind(email)
        .bind(vault_id)
        .bind(email)
        .fetch_one(self.pool())
        .await?;
        Ok(allowed)
    }

    /// Deletes only when `owner` matches; a non-owner delete is a no-op.
    pub async fn delete_vault(&self, id: &str, owner: &str) -> Result<(), ServerError> {
        sqlx::query("DELETE FROM vaults WHERE id = ? AND user_email = ?")
            .bind(id)
            .bind(owner)
            .execute(self.pool())
            .await?;
        Ok(())
    }

    pub async fn get_vaults(&self, owner: &str) -> Result<Vec<Vault>, ServerError> {
        Ok(
            sqlx::query_as::<_, Vault>("SELECT * FROM vaults WHERE user_email = ?")
                .bind(owner)
                .fetch_all(self.pool())
                .await?,
        )
    }

    /// Vaults shared with `email` by other owners.
    pub async fn get_shared_vaults(&self, email: &str) -> Result<Vec<Vault>, ServerError> {
        Ok(sqlx::query_as::<_, Vault>(
            "SELECT v.* FROM vaults v JOIN shares s ON v.id = s.vault_id WHERE s.email = ?",
        )
        .bind(email)
        .fetch_all(self.pool())
        .await?)
    }

    pub async fn share_invite(
        &self,
        email: &str,
        name: &str,
        vault_id: &str,
    ) -> Result<Share, ServerError> {
        let share = Share {
            uid: Uuid::new_v4().to_string(),
            email: email.to_string(),
            name: name.to_string(),
            vault_id: vault_id.to_string(),
            accepted: true,
        };

        sqlx::query("INSERT INTO shares (uid, email, name, vault_id, accepted) VALUES (?, ?, ?, ?, 1)")
            .bind(&share.uid)
            .bind(&share.email)
            .bind(&share.name)
            .bind(&share.vault_id)
            .execute(self.pool())
            .await?;

        Ok(share)
    }

    /// Revokes by share uid when given, otherwise by (vault, grantee).
    pub async fn share_revoke(
        &self,
        share_uid: &str,
        vault_id: &str,
        email: &str,
    ) -> Result<(), ServerError> {
        if share_uid.is_empty() {
            sqlx::query("DELETE FROM shares WHERE vault_id = ? AND email = ?")
                .bind(vault_id)
                .bind(email)
                .execute(self.pool())
                .await?;
        } else {
            sqlx::query("DELETE FROM shares WHERE uid = ?")
                .bind(share_uid)
                .execute(self.pool())
                .await?;
        }
        Ok(())
    }

    pub async fn get_vault_shares(&self, vault_id: &str) -> Result<Vec<Share>, ServerError> {
        Ok(
            sqlx::query_as::<_, Share>("SELECT * FROM shares WHERE vault_id = ?")
                .bind(vault_id)
                .fetch_all(self.pool())
                .await?,
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn vault_fixture(store: &Store) -> Vault {
        store
            .create_vault("V", "owner@x", "pw", "salt", "", "localhost:3000", 1024)
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn create_derives_keyhash_when_absent() {
        let store = Store::open_in_memory().await;
        let vault = vault_fixture(&store).await;

        assert_eq!(vault.version, 0);
        assert_eq!(vault.size, 1024);
        assert_eq!(vault.user_email, "owner@x");
        assert_eq!(vault.host, "localhost:3000");
        assert!(vault.created > 0);
        assert_eq!(vault.keyhash, crypto::make_keyhash("pw", "salt").unwrap());
    }

    #[tokio::test]
    async fn create_rejects_empty_credentials() {
        let store = Store::open_in_memory().await;
        let err = store
            .create_vault("V", "owner@x", "", "salt", "", "h", 1024)
            .await
            .unwrap_err();
        assert!(matches!(err, ServerError::InvalidInput(_)));
    }

    #[tokio::test]
    async fn get_vault_gates_on_keyhash() {
        let store = Store::open_in_memory().await;
        let vault = vault_fixture(&store).await;

        let fetched = store.get_vault(&vault.id, &vault.keyhash).await.unwrap();
        assert_eq!(fetched.id, vault.id);

        assert!(matches!(
            store.get_vault(&vault.id, "bad").await,
            Err(ServerError::Forbidden(_))
        ));
        assert!(matches!(
            store.get_vault("missing", &vault.keyhash).await,
            Err(ServerError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn version_counter_round_trip() {
        let store = Store::open_in_memory().await;
        let vault = vault_fixture(&store).await;

        store.set_vault_version(&vault.id, 7).await.unwrap();
        let fetched = store.get_vault(&vault.id, &vault.keyhash).await.unwrap();
        assert_eq!(fetched.version, 7);
    }

    #[tokio::test]
    async fn access_via_ownership_and_share() {
        let store = Store::open_in_memory().await;
        let vault = vault_fixture(&store).await;

        assert!(store.has_access(&vault.id, "owner@x").await.unwrap());
        assert!(!store.has_access(&vault.id, "guest@x").await.unwrap());

        let share = store
            .share_invite("guest@x", "guest vault", &vault.id)
            .await
            .unwrap();
        assert!(store.has_access(&vault.id, "guest@x").await.unwrap());

        let shared = store.get_shared_vaults("guest@x").await.unwrap();
        assert_eq!(shared.len(), 1);
        assert_eq!(shared[0].id, vault.id);

        store.share_revoke(&share.uid, "", "").await.unwrap();
        assert!(!store.has_access(&vault.id, "guest@x").await.unwrap());
    }

    #[tokio::test]
    async fn share_revoke_by_vault_and_email() {
        let store = Store::open_in_memory().await;
        let vault = vault_fixture(&store).await;
        store
            .share_invite("guest@x", "guest vault", &vault.id)
            .await
            .unwrap();

        store.share_revoke("", &vault.id, "guest@x").await.unwrap();
        assert!(store.get_vault_shares(&vault.id).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn delete_is_owner_scoped() {
        let store = Store::open_in_memory().await;
        let vault = vault_fixture(&store).await;

        store.delete_vault(&vault.id, "intruder@x").await.unwrap();
        assert!(store.get_vault(&vault.id, &vault.keyhash).await.is_ok());

        store.delete_vault(&vault.id, "owner@x").await.unwrap();
        assert!(matches!(
            store.get_vault(&vault.id, &vault.keyhash).await,
            Err(ServerError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn vault_listing_is_owner_scoped() {
        let store = Store::open_in_memory().await;
        vault_fixture(&store).await;
        store
            .create_vault("W", "other@x", "pw", "salt", "", "h", 1024)
            .await
            .unwrap();

        let owned = store.get_vaults("owner@x").await.unwrap();
        assert_eq!(owned.len(), 1);
        assert_eq!(owned[0].name, "V");
    }
}
