use std::sync::atomic::{AtomicI64, Ordering};

use async_trait::async_trait;
use dashmap::DashMap;

use crate::model::UserId;

#[derive(Debug)]
pub enum AuthError {
    InvalidCredentials,
    Hash(String),
}

impl std::fmt::Display for AuthError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AuthError::InvalidCredentials => write!(f, "Invalid login credentials"),
            AuthError::Hash(e) => write!(f, "password check failed: {e}"),
        }
    }
}

impl std::error::Error for AuthError {}

impl From<bcrypt::BcryptError> for AuthError {
    fn from(e: bcrypt::BcryptError) -> Self {
        AuthError::Hash(e.to_string())
    }
}

/// Staff sign-in. Resolves credentials to a user id.
#[async_trait]
pub trait Authenticator: Send + Sync {
    async fn authenticate(&self, email: &str, password: &str) -> Result<UserId, AuthError>;
}

pub fn hash_password(password: &str, cost: u32) -> Result<String, AuthError> {
    Ok(bcrypt::hash(password, cost)?)
}

#[derive(Debug, Clone)]
struct StaffAccount {
    id: UserId,
    password_hash: String,
}

/// Staff accounts keyed by lowercased email, with bcrypt password hashes.
#[derive(Debug, Default)]
pub struct StaffDirectory {
    accounts: DashMap<String, StaffAccount>,
    last_id: AtomicI64,
}

impl StaffDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register an account from an existing bcrypt hash.
    pub fn add(&self, email: &str, password_hash: String) -> UserId {
        let id = self.last_id.fetch_add(1, Ordering::SeqCst) + 1;
        self.accounts.insert(
            email.trim().to_lowercase(),
            StaffAccount { id, password_hash },
        );
        id
    }

    pub fn len(&self) -> usize {
        self.accounts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.accounts.is_empty()
    }
}

#[async_trait]
impl Authenticator for StaffDirectory {
    async fn authenticate(&self, email: &str, password: &str) -> Result<UserId, AuthError> {
        let account = self
            .accounts
            .get(&email.trim().to_lowercase())
            .map(|a| a.value().clone())
            .ok_or(AuthError::InvalidCredentials)?;

        // CPU-bound; run on the blocking pool.
        let password = password.to_string();
        let hash = account.password_hash;
        let matches = tokio::task::spawn_blocking(move || bcrypt::verify(password, &hash))
            .await
            .map_err(|e| AuthError::Hash(e.to_string()))??;

        if matches {
            Ok(account.id)
        } else {
            Err(AuthError::InvalidCredentials)
        }
    }
}
