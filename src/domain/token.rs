use rand::distributions::Alphanumeric;
use rand::{Rng, rngs::OsRng};

/// Length of every issued access and refresh token.
pub const TOKEN_LENGTH: usize = 48;

/// Produces opaque session token values.
pub trait TokenGenerator: Send + Sync + std::fmt::Debug {
    fn generate(&self) -> String;
}

/// Draws tokens uniformly from `[A-Za-z0-9]` using the operating system CSPRNG.
#[derive(Clone, Copy, Debug, Default)]
pub struct SecureTokenGenerator;

impl TokenGenerator for SecureTokenGenerator {
    fn generate(&self) -> String {
        OsRng.sample_iter(&Alphanumeric).take(TOKEN_LENGTH).map(char::from).collect()
    }
}
