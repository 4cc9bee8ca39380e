use argon2::{
    password_hash::{self, PasswordHash, PasswordHasher, PasswordVerifier, SaltString},
    Argon2,
};
use lazy_static::lazy_static;
use rand::rngs::OsRng;
use tracing::error;

lazy_static! {
    /// Checked against when the email is unknown, so that login costs one
    /// hash either way.
    static ref TIMING_HASH: Option<String> = hash_password("smartpay-timing-equalizer").ok();
}

fn argon_error(context: &'static str) -> impl Fn(password_hash::Error) -> anyhow::Error {
    move |e| {
        error!(error = %e, "argon2 {context} error");
        anyhow::anyhow!("argon2 {context}: {e}")
    }
}

pub fn hash_password(plain: &str) -> anyhow::Result<String> {
    let salt = SaltString::generate(&mut OsRng);
    let hash = Argon2::default()
        .hash_password(plain.as_bytes(), &salt)
        .map_err(argon_error("hash"))?;
    Ok(hash.to_string())
}

/// `Ok(false)` on mismatch; an unreadable stored hash is an error.
pub fn verify_password(plain: &str, hash: &str) -> anyhow::Result<bool> {
    let parsed = PasswordHash::new(hash).map_err(argon_error("parse hash"))?;
    match Argon2::default().verify_password(plain.as_bytes(), &parsed) {
        Ok(()) => Ok(true),
        Err(password_hash::Error::Password) => Ok(false),
        Err(e) => Err(argon_error("verify")(e)),
    }
}

/// Spends the same work as a real verification and discards the result.
pub fn burn_verify(plain: &str) {
    if let Some(hash) = TIMING_HASH.as_deref() {
        let _ = verify_password(plain, hash);
    }
}
