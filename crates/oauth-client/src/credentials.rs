//! Client credentials supplied at construction

use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use common::Secret;

use crate::error::{Error, Result};

/// Registered client identity. Immutable once built; every field non-empty.
#[derive(Debug, Clone)]
pub struct Credentials {
    client_id: String,
    client_secret: Secret<String>,
    redirect_url: String,
    scope: String,
}

impl Credentials {
    /// Validate and build credentials.
    ///
    /// Fields are checked in declaration order so the error names the first
    /// empty one.
    pub fn new(
        client_id: impl Into<String>,
        client_secret: impl Into<Secret<String>>,
        redirect_url: impl Into<String>,
        scope: impl Into<String>,
    ) -> Result<Self> {
        let client_id = client_id.into();
        let client_secret = client_secret.into();
        let redirect_url = redirect_url.into();
        let scope = scope.into();

        if client_id.trim().is_empty() {
            return Err(Error::MissingCredential("client_id"));
        }
        if client_secret.is_blank() {
            return Err(Error::MissingCredential("client_secret"));
        }
        if redirect_url.trim().is_empty() {
            return Err(Error::MissingCredential("redirect_url"));
        }
        if scope.trim().is_empty() {
            return Err(Error::MissingCredential("scope"));
        }

        Ok(Self {
            client_id,
            client_secret,
            redirect_url,
            scope,
        })
    }

    pub fn client_id(&self) -> &str {
        &self.client_id
    }

    pub fn redirect_url(&self) -> &str {
        &self.redirect_url
    }

    pub fn scope(&self) -> &str {
        &self.scope
    }

    /// `Authorization` header value for the token endpoint.
    pub fn basic_auth(&self) -> String {
        let raw = format!("{}:{}", self.client_id, self.client_secret.expose());
        format!("Basic {}", STANDARD.encode(raw))
    }
}
