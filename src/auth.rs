use std::fs;
use std::path::Path;

use jsonwebtoken::{Algorithm, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};

use crate::error::ServerError;

const SECRET_LEN: usize = 64;

#[derive(Debug, Serialize, Deserialize)]
struct Claims {
    email: String,
}

/// Process-wide token signer/verifier, seeded from the boot secret.
pub struct TokenKeys {
    encoding: EncodingKey,
    decoding: DecodingKey,
    validation: Validation,
}

impl TokenKeys {
    pub fn from_secret(secret: &[u8]) -> Self {
        // Tokens carry only the email claim, so expiry checking is disabled
        // and no spec claims are required.
        let mut validation = Validation::new(Algorithm::HS256);
        validation.validate_exp = false;
        validation.required_spec_claims.clear();

        Self {
            encoding: EncodingKey::from_secret(secret),
            decoding: DecodingKey::from_secret(secret),
            validation,
        }
    }

    /// Mints a bearer token for a signed-in user.
    pub fn issue(&self, email: &str) -> Result<String, ServerError> {
        let claims = Claims {
            email: email.to_string(),
        };
        jsonwebtoken::encode(&Header::default(), &claims, &self.encoding)
            .map_err(|e| ServerError::Internal(format!("token encoding: {e}")))
    }

    /// Validates a token and returns the email claim.
    pub fn email(&self, token: &str) -> Result<String, ServerError> {
        jsonwebtoken::decode::<Claims>(token, &self.decoding, &self.validation)
            .map(|data| data.claims.email)
            .map_err(|_| ServerError::Unauthorized("Invalid token".into()))
    }
}

/// Loads the signing secret, generating 64 random bytes on first boot.
///
/// The file is a postcard-encoded byte vector: a varint length prefix
/// followed by the raw bytes.
pub fn load_or_generate_secret(path: &Path) -> Result<Vec<u8>, ServerError> {
    if path.exists() {
        let raw = fs::read(path)?;
        let secret: Vec<u8> = postcard::from_bytes(&raw)
            .map_err(|e| ServerError::Internal(format!("secret file corrupt: {e}")))?;
        if secret.len() != SECRET_LEN {
            return Err(ServerError::Internal(format!(
                "secret file holds {} bytes, expected {SECRET_LEN}",
                secret.len()
            )));
        }
        return Ok(secret);
    }

    let secret: Vec<u8> = rand::random::<[u8; SECRET_LEN]>().to_vec();
    let encoded = postcard::to_stdvec(&secret)
        .map_err(|e| ServerError::Internal(format!("secret encoding: {e}")))?;
    fs::write(path, encoded)?;
    Ok(secret)
}
