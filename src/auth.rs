//! Request authentication for the settings API.

use axum::http::{header, HeaderMap};
use std::collections::HashMap;

use crate::config::AuthConfig;
use crate::identity::Identity;

/// Resolves the identity behind an HTTP request.
pub trait Authenticator: Send + Sync {
    fn authenticate(&self, headers: &HeaderMap) -> Option<Identity>;
}

/// Static bearer-token table.
#[derive(Debug, Clone, Default)]
pub struct TokenAuthenticator {
    tokens: HashMap<String, Identity>,
}

impl TokenAuthenticator {
    pub fn new(tokens: HashMap<String, Identity>) -> Self {
        Self { tokens }
    }

    pub fn with_token(mut self, token: impl Into<String>, identity: Identity) -> Self {
        self.tokens.insert(token.into(), identity);
        self
    }

    pub fn len(&self) -> usize {
        self.tokens.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tokens.is_empty()
    }
}

impl From<AuthConfig> for TokenAuthenticator {
    fn from(config: AuthConfig) -> Self {
        Self::new(config.tokens)
    }
}

impl Authenticator for TokenAuthenticator {
    fn authenticate(&self, headers: &HeaderMap) -> Option<Identity> {
        let token = bearer_token(headers)?;
        self.tokens.get(token).cloned()
    }
}

fn bearer_token(headers: &HeaderMap) -> Option<&str> {
    let value = headers.get(header::AUTHORIZATION)?.to_str().ok()?;
    let token = value
        .strip_prefix("Bearer ")
        .or_else(|| value.strip_prefix("bearer "))?
        .trim();
    if token.is_empty() {
        None
    } else {
        Some(token)
    }
}
