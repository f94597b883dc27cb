use rand::Rng;
use rand::seq::SliceRandom;
use sha2::{Digest, Sha256};
use subtle::ConstantTimeEq;

use crate::error::ServerError;

// Matches the client's key derivation: scrypt N=32, r=8, p=1, 32-byte output.
const SCRYPT_LOG_N: u8 = 5;
const SCRYPT_R: u32 = 8;
const SCRYPT_P: u32 = 1;
const KEY_LEN: usize = 32;

/// Derives the vault keyhash: hex(SHA-256(scrypt(password, salt))).
///
/// The result is the opaque 64-hex-char handle a client presents to unlock a
/// vault; the server compares it, never inverts it.
pub fn make_keyhash(password: &str, salt: &str) -> Result<String, ServerError> {
    let params = scrypt::Params::new(SCRYPT_LOG_N, SCRYPT_R, SCRYPT_P, KEY_LEN)
        .map_err(|e| ServerError::Internal(format!("scrypt params: {e}")))?;

    let mut key = [0u8; KEY_LEN];
    scrypt::scrypt(password.as_bytes(), salt.as_bytes(), &params, &mut key)
        .map_err(|e| ServerError::Internal(format!("scrypt: {e}")))?;

    Ok(hex::encode(Sha256::digest(key)))
}

/// Constant-time keyhash comparison.
pub fn keyhash_matches(stored: &str, supplied: &str) -> bool {
    stored.as_bytes().ct_eq(supplied.as_bytes()).into()
}

/// Generates a random credential string with the requested composition.
///
/// Used when a vault is created without a client-supplied salt: the server
/// fabricates a password and salt pair the client never needs to see again.
pub fn generate_password(
    length: usize,
    num_digits: usize,
    num_symbols: usize,
    no_upper: bool,
    allow_repeat: bool,
) -> Result<String, ServerError> {
    const LOWER: &str = "abcdefghijklmnopqrstuvwxyz";
    const UPPER: &str = "ABCDEFGHIJKLMNOPQRSTUVWXYZ";
    const DIGITS: &str = "0123456789";
    const SYMBOLS: &str = "!\"#$%&'()*+,-./:;<=>?@[\\]^_`{|}~";

    let num_letters = length
        .checked_sub(num_digits)
        .and_then(|n| n.checked_sub(num_symbols))
        .ok_or_else(|| {
            ServerError::InvalidInput("password length is smaller than its parts".into())
        })?;

    let letters: Vec<char> = if no_upper {
        LOWER.chars().collect()
    } else {
        LOWER.chars().chain(UPPER.chars()).collect()
    };
    let digits: Vec<char> = DIGITS.chars().collect();
    let symbols: Vec<char> = SYMBOLS.chars().collect();

    if !allow_repeat
        && (num_letters > letters.len() || num_digits > digits.len() || num_symbols > symbols.len())
    {
        return Err(ServerError::InvalidInput(
            "not enough distinct characters for the requested password".into(),
        ));
    }

    let mut rng = rand::rng();
    let mut out: Vec<char> = Vec::with_capacity(length);

    for (pool, count) in [
        (&letters, num_letters),
        (&digits, num_digits),
        (&symbols, num_symbols),
    ] {
        for _ in 0..count {
            loop {
                let c = pool[rng.random_range(0..pool.len())];
                if allow_repeat || !out.contains(&c) {
                    out.push(c);
                    break;
                }
            }
        }
    }

    out.shuffle(&mut rng);
    Ok(out.into_iter().collect())
}
