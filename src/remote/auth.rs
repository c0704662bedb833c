//! Credentials for the Doctype API.
//!
//! The engine treats authentication as an opaque provider. It only needs to
//! know whether the provider finished initializing, whether the session is
//! authenticated, and the token pair to send.

use std::sync::{RwLock, PoisonError};

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AuthState {
    pub api_key: String,
    pub api_secret: String,
    pub is_authenticated: bool,
    pub is_initialized: bool,
}

impl AuthState {
    pub fn authenticated(api_key: impl Into<String>, api_secret: impl Into<String>) -> Self {
        Self {
            api_key: api_key.into(),
            api_secret: api_secret.into(),
            is_authenticated: true,
            is_initialized: true,
        }
    }

    /// Resolver calls are only allowed once this holds.
    pub fn is_ready(&self) -> bool {
        self.is_initialized && self.is_authenticated
    }

    /// `Authorization` header value for token auth.
    pub fn authorization(&self) -> String {
        format!("token {}:{}", self.api_key, self.api_secret)
    }
}

pub trait AuthProvider: Send + Sync {
    fn state(&self) -> AuthState;
}

/// Provider holding a fixed, replaceable state.
#[derive(Debug, Default)]
pub struct StaticAuth {
    state: RwLock<AuthState>,
}

impl StaticAuth {
    pub fn new(state: AuthState) -> Self {
        Self {
            state: RwLock::new(state),
        }
    }

    pub fn replace(&self, state: AuthState) {
        *self.state.write().unwrap_or_else(PoisonError::into_inner) = state;
    }
}

impl AuthProvider for StaticAuth {
    fn state(&self) -> AuthState {
        self.state
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}
