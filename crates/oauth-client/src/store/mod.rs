//! Token persistence
//!
//! `TokenStore` is a flat key-value contract over the fields of a token
//! record. Each accessor touches exactly one field; combining fields is the
//! job of `TokenLifecycle` and `AuthClient`. Unset fields read as `None`.
//!
//! Two backends are provided:
//! - `SessionStore`: fields live in a host-owned `SessionHandle`
//! - `FileStore`: one small file per field in a working directory

pub mod file;
pub mod session;

use std::fmt;
use std::str::FromStr;

pub use file::FileStore;
pub use session::{SessionHandle, SessionStore};

use crate::error::{Error, Result};

/// Named fields persisted by every backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Field {
    Code,
    State,
    Scope,
    TokenType,
    AccessToken,
    RefreshToken,
    ExpiresAt,
}

impl Field {
    pub const ALL: [Field; 7] = [
        Field::Code,
        Field::State,
        Field::Scope,
        Field::TokenType,
        Field::AccessToken,
        Field::RefreshToken,
        Field::ExpiresAt,
    ];

    /// Storage key (session key / file name).
    pub fn key(self) -> &'static str {
        match self {
            Field::Code => "code",
            Field::State => "state",
            Field::Scope => "scope",
            Field::TokenType => "token_type",
            Field::AccessToken => "access_token",
            Field::RefreshToken => "refresh_token",
            Field::ExpiresAt => "expires_at",
        }
    }
}

/// Key-value persistence for token fields.
///
/// Backends implement `get`, `set` and `is_authorized`; the named accessors
/// are provided on top of them.
pub trait TokenStore: Send + Sync {
    fn get(&self, field: Field) -> Option<String>;

    fn set(&self, field: Field, value: &str) -> Result<()>;

    /// Write several fields as one unit, in order.
    ///
    /// Backends whose writes can fail override this so that a failed batch
    /// leaves every field at its previous value.
    fn set_all(&self, values: &[(Field, &str)]) -> Result<()> {
        for (field, value) in values {
            self.set(*field, value)?;
        }
        Ok(())
    }

    /// True once an authorization code has been recorded in this scope.
    fn is_authorized(&self) -> bool;

    fn code(&self) -> Option<String> {
        self.get(Field::Code)
    }

    fn set_code(&self, value: &str) -> Result<()> {
        self.set(Field::Code, value)
    }

    fn state(&self) -> Option<String> {
        self.get(Field::State)
    }

    fn set_state(&self, value: &str) -> Result<()> {
        self.set(Field::State, value)
    }

    fn scope(&self) -> Option<String> {
        self.get(Field::Scope)
    }

    fn set_scope(&self, value: &str) -> Result<()> {
        self.set(Field::Scope, value)
    }

    fn token_type(&self) -> Option<String> {
        self.get(Field::TokenType)
    }

    fn set_token_type(&self, value: &str) -> Result<()> {
        self.set(Field::TokenType, value)
    }

    fn access_token(&self) -> Option<String> {
        self.get(Field::AccessToken)
    }

    fn set_access_token(&self, value: &str) -> Result<()> {
        self.set(Field::AccessToken, value)
    }

    fn refresh_token(&self) -> Option<String> {
        self.get(Field::RefreshToken)
    }

    fn set_refresh_token(&self, value: &str) -> Result<()> {
        self.set(Field::RefreshToken, value)
    }

    /// Absolute expiry in unix seconds. Unparseable values read as `None`.
    fn expires_at(&self) -> Option<i64> {
        self.get(Field::ExpiresAt)
            .and_then(|raw| raw.trim().parse().ok())
    }

    fn set_expires_at(&self, value: i64) -> Result<()> {
        self.set(Field::ExpiresAt, &value.to_string())
    }
}

/// Storage backend chosen by configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StorageSelector {
    Session,
    FlatFile,
}

impl StorageSelector {
    pub fn as_str(self) -> &'static str {
        match self {
            StorageSelector::Session => "session",
            StorageSelector::FlatFile => "flat-file",
        }
    }
}

impl FromStr for StorageSelector {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "session" => Ok(StorageSelector::Session),
            "flat-file" => Ok(StorageSelector::FlatFile),
            _ => Err(Error::UnsupportedStorage(s.to_string())),
        }
    }
}

impl fmt::Display for StorageSelector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
