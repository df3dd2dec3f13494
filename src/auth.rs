use async_trait::async_trait;
use base64::{engine::general_purpose::URL_SAFE_NO_PAD as BASE64, Engine as _};
use rand::{rngs::OsRng, RngCore};
use sha2::{Digest, Sha256};

use crate::models::UserId;

/// Resolves the identity behind a request credential. Everything downstream
/// trusts the returned id.
#[async_trait]
pub trait Authenticator: Send + Sync {
    async fn resolve(&self, token: &str) -> Option<UserId>;
}

/// Tokens of the form `<userId>.<signature>`, signed with a shared secret.
pub struct TokenAuthenticator {
    secret: Vec<u8>,
}

impl TokenAuthenticator {
    pub fn new(secret: impl Into<Vec<u8>>) -> Self {
        Self {
            secret: secret.into(),
        }
    }

    pub fn random() -> Self {
        let mut secret = [0u8; 32];
        OsRng.fill_bytes(&mut secret);
        Self::new(secret.to_vec())
    }

    pub fn issue(&self, user: &UserId) -> String {
        format!("{}.{}", user, self.sign(user.as_str()))
    }

    fn sign(&self, user: &str) -> String {
        let mut hasher = Sha256::new();
        hasher.update(&self.secret);
        hasher.update(b":");
        hasher.update(user.as_bytes());
        BASE64.encode(hasher.finalize())
    }

    fn verify(&self, token: &str) -> Option<UserId> {
        let (user, signature) = token.trim().rsplit_once('.')?;
        if user.is_empty() {
            return None;
        }
        let expected = self.sign(user);
        constant_time_eq(expected.as_bytes(), signature.as_bytes()).then(|| UserId::from(user))
    }
}

#[async_trait]
impl Authenticator for TokenAuthenticator {
    async fn resolve(&self, token: &str) -> Option<UserId> {
        self.verify(token)
    }
}

fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    a.len() == b.len() && a.iter().zip(b).fold(0u8, |acc, (x, y)| acc | (x ^ y)) == 0
}
