use crate::error::ServerError;
use crate::store::{Store, User};

impl Store {
    /// Registers a new user with a bcrypt-hashed password.
    pub async fn create_user(
        &self,
        email: &str,
        password: &str,
        name: &str,
    ) -> Result<(), ServerError> {
        let hash = bcrypt::hash(password, bcrypt::DEFAULT_COST)
            .map_err(|e| ServerError::Internal(format!("password hashing: {e}")))?;

        sqlx::query("INSERT INTO users (email, password, name, license) VALUES (?, ?, ?, '')")
            .bind(email)
            .bind(hash)
            .bind(name)
            .execute(self.pool())
            .await
            .map_err(|e| match &e {
                sqlx::Error::Database(db) if db.is_unique_violation() => {
                    ServerError::Conflict("user already exists".into())
                }
                _ => e.into(),
            })?;

        Ok(())
    }

    /// Verifies credentials. Unknown email and wrong password surface the
    /// same opaque error so signin cannot be used to enumerate users.
    pub async fn verify_user(&self, email: &str, password: &str) -> Result<User, ServerError> {
        let user = sqlx::query_as::<_, User>("SELECT * FROM users WHERE email = ?")
            .bind(email)
            .fetch_optional(self.pool())
            .await?
            .ok_or(ServerError::InvalidCredentials)?;

        let ok = bcrypt::verify(password, &user.password)
            .map_err(|_| ServerError::InvalidCredentials)?;
        if !ok {
            return Err(ServerError::InvalidCredentials);
        }

        Ok(user)
    }

    pub async fn user_info(&self, email: &str) -> Result<User, ServerError> {
        sqlx::query_as::<_, User>("SELECT * FROM users WHERE email = ?")
            .bind(email)
            .fetch_optional(self.pool())
            .await?
            .ok_or_else(|| ServerError::NotFound("User not found".into()))
    }

    pub async fn delete_user(&self, email: &str) -> Result<(), ServerError> {
        sqlx::query("DELETE FROM users WHERE email = ?")
            .bind(email)
            .execute(self.pool())
            .await?;
        Ok(())
    }
}
