//! Authentication gate
//!
//! Provides:
//! - The `TokenValidator` capability consumed by connection handlers
//! - An in-memory `AuthStore` of hashed access tokens
//! - Token registration, generation, and validation
//! - Constant-time token comparison

#![forbid(unsafe_code)]

use secrecy::SecretString;
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::sync::RwLock;
use subtle::ConstantTimeEq;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Prefix carried by every token minted by [`AuthStore::generate_token`]
pub const TOKEN_PREFIX: &str = "wdk_";

// ============================================================================
// Error Types
// ============================================================================

/// Authentication errors
#[derive(Debug, thiserror::Error)]
pub enum AuthError {
    /// No credentials provided
    #[error("Authentication required")]
    MissingCredentials,

    /// Invalid token
    #[error("Invalid credentials")]
    InvalidCredentials,

    /// Internal error
    #[error("Auth internal error: {0}")]
    Internal(String),
}

/// Auth result type
pub type Result<T> = std::result::Result<T, AuthError>;

// ============================================================================
// Token validation capability
// ============================================================================

/// "Is this opaque token currently valid?"
///
/// This is the only capability the terminal core needs from authentication.
/// It is checked once per connection, before the connection is admitted.
pub trait TokenValidator: Send + Sync {
    /// Returns `true` when `token` is currently accepted.
    fn is_valid(&self, token: &str) -> bool;
}

// ============================================================================
// Auth Method / Context
// ============================================================================

/// How a request presented its token
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthMethod {
    /// A registered access token
    Token,
    /// Authentication is disabled; every caller is anonymous
    Anonymous,
}

/// Authenticated context attached to each request
#[derive(Debug, Clone)]
pub struct AuthContext {
    /// Label of the token that authenticated the request
    pub label: String,
    /// How the caller authenticated
    pub method: AuthMethod,
}

impl AuthContext {
    /// Context used when authentication is disabled
    #[must_use]
    pub fn anonymous() -> Self {
        Self {
            label: "anonymous".to_string(),
            method: AuthMethod::Anonymous,
        }
    }
}

// ============================================================================
// Stored Token
// ============================================================================

/// Internal representation of a stored token
#[derive(Debug, Clone)]
struct StoredToken {
    /// SHA-256 hash of the token (we never store the raw token)
    token_hash: [u8; 32],
    /// Human-readable label
    label: String,
}

// ============================================================================
// Auth Store
// ============================================================================

/// Token storage and validation
pub struct AuthStore {
    /// token_hash_hex → StoredToken
    tokens: RwLock<HashMap<String, StoredToken>>,
    /// Whether auth is enabled
    enabled: bool,
}

impl AuthStore {
    /// Create a new auth store
    pub fn new(enabled: bool) -> Self {
        Self {
            tokens: RwLock::new(HashMap::new()),
            enabled,
        }
    }

    /// Check if authentication is enabled
    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    /// Hash a token using SHA-256
    fn hash_token(token: &str) -> [u8; 32] {
        let mut hasher = Sha256::new();
        hasher.update(token.as_bytes());
        let result = hasher.finalize();
        let mut hash = [0u8; 32];
        hash.copy_from_slice(&result);
        hash
    }

    /// Convert hash to hex string for map lookup
    fn hash_to_hex(hash: &[u8; 32]) -> String {
        hash.iter().map(|b| format!("{:02x}", b)).collect()
    }

    /// Register an externally supplied token (e.g. from configuration).
    ///
    /// Returns the hex token hash.
    pub fn register_token(&self, token: &str, label: &str) -> Result<String> {
        if token.trim().is_empty() {
            return Err(AuthError::MissingCredentials);
        }

        let token_hash = Self::hash_token(token);
        let token_hash_hex = Self::hash_to_hex(&token_hash);

        let mut tokens = self
            .tokens
            .write()
            .map_err(|e| AuthError::Internal(format!("Lock poisoned: {}", e)))?;
        tokens.insert(
            token_hash_hex.clone(),
            StoredToken {
                token_hash,
                label: label.to_string(),
            },
        );

        debug!(label = %label, "Access token registered");
        Ok(token_hash_hex)
    }

    /// Generate a new random token.
    ///
    /// Returns the raw token (only shown once) and the token hash for reference.
    pub fn generate_token(&self, label: &str) -> Result<(SecretString, String)> {
        let raw_token = format!("{}{}", TOKEN_PREFIX, Uuid::new_v4().as_simple());
        let token_hash_hex = self.register_token(&raw_token, label)?;

        info!(
            label = %label,
            token_prefix = %&raw_token[..10],
            "Access token generated"
        );

        Ok((SecretString::from(raw_token), token_hash_hex))
    }

    /// Validate a token and return the auth context
    pub fn validate_token(&self, token: &str) -> Result<AuthContext> {
        if !self.enabled {
            return Ok(AuthContext::anonymous());
        }

        if token.is_empty() {
            return Err(AuthError::MissingCredentials);
        }

        let token_hash = Self::hash_token(token);
        let token_hash_hex = Self::hash_to_hex(&token_hash);

        let tokens = self
            .tokens
            .read()
            .map_err(|e| AuthError::Internal(format!("Lock poisoned: {}", e)))?;

        match tokens.get(&token_hash_hex) {
            Some(stored) => {
                let hashes_match: bool = stored.token_hash.ct_eq(&token_hash).into();
                if !hashes_match {
                    return Err(AuthError::InvalidCredentials);
                }

                debug!(label = %stored.label, "Token validated");
                Ok(AuthContext {
                    label: stored.label.clone(),
                    method: AuthMethod::Token,
                })
            }
            None => {
                warn!("Invalid token attempt");
                Err(AuthError::InvalidCredentials)
            }
        }
    }

    /// Number of registered tokens
    pub fn token_count(&self) -> usize {
        self.tokens.read().map(|tokens| tokens.len()).unwrap_or(0)
    }
}

impl TokenValidator for AuthStore {
    fn is_valid(&self, token: &str) -> bool {
        self.validate_token(token).is_ok()
    }
}

// ============================================================================
// Tests
// ============================================================================
