//! Password generation and strength scoring.
//!
//! - [`generate_password`]: uniform draw from [`PASSWORD_CHARSET`] via `OsRng`
//! - [`password_strength`]: 0..=4 heuristic score shown next to password fields

use rand::Rng;

use crate::error::CryptoError;

/// Default generated password length.
pub const DEFAULT_PASSWORD_LENGTH: usize = 16;

/// Maximum generated password length.
pub const MAX_PASSWORD_LENGTH: usize = 128;

/// Highest score returned by [`password_strength`].
pub const MAX_STRENGTH: u8 = 4;

/// Characters a generated password is drawn from.
pub const PASSWORD_CHARSET: &[u8] =
    b"abcdefghijklmnopqrstuvwxyzABCDEFGHIJKLMNOPQRSTUVWXYZ0123456789!@#$%^&*()_+-=[]{}|;:,.<>?";

/// Generate a random password of `length` characters.
///
/// `gen_range` rejection-samples, so every charset position is equally likely.
///
/// # Errors
///
/// Returns [`CryptoError::PasswordGeneration`] if `length` is zero or above
/// [`MAX_PASSWORD_LENGTH`].
pub fn generate_password(length: usize) -> Result<String, CryptoError> {
    if length == 0 || length > MAX_PASSWORD_LENGTH {
        return Err(CryptoError::PasswordGeneration(format!(
            "length must be between 1 and {MAX_PASSWORD_LENGTH}, got {length}"
        )));
    }

    let mut rng = rand::rngs::OsRng;
    let password = (0..length)
        .map(|_| {
            let idx = rng.gen_range(0..PASSWORD_CHARSET.len());
            char::from(PASSWORD_CHARSET[idx])
        })
        .collect();
    Ok(password)
}

/// Score a password from 0 to [`MAX_STRENGTH`].
///
/// One point each for: more than 8 characters, more than 12 characters,
/// an uppercase letter, a digit, a non-alphanumeric character.
#[must_use]
pub fn password_strength(password: &str) -> u8 {
    if password.is_empty() {
        return 0;
    }

    let len = password.chars().count();
    let checks = [
        len > 8,
        len > 12,
        password.chars().any(|c| c.is_ascii_uppercase()),
        password.chars().any(|c| c.is_ascii_digit()),
        password.chars().any(|c| !c.is_ascii_alphanumeric()),
    ];

    let score = checks.iter().filter(|passed| **passed).count();
    u8::try_from(score).map_or(MAX_STRENGTH, |s| s.min(MAX_STRENGTH))
}
