//! Token exchange, refresh and staleness
//!
//! Handles the two token endpoint interactions:
//! 1. Authorization code exchange (first callback after the user approves)
//! 2. Token refresh (whenever the stored token is inside the staleness margin)
//!
//! Both POST a form to the token endpoint with Basic client authentication.
//! A response carrying `error` is returned as `GrantOutcome::Rejected` and
//! nothing is written; a good response overwrites every token field at once.

use std::fmt;
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, info, warn};

use crate::constants::{DEFAULT_TOKEN_TYPE, STALENESS_MARGIN_SECS};
use crate::credentials::Credentials;
use crate::error::Result;
use crate::store::{Field, TokenStore};
use crate::transport::{HttpRequest, Transport};

/// Snapshot of every persisted token field.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TokenRecord {
    pub code: Option<String>,
    pub access_token: Option<String>,
    pub token_type: Option<String>,
    pub refresh_token: Option<String>,
    /// Absolute expiry, unix seconds
    pub expires_at: Option<i64>,
    pub scope: Option<String>,
}

impl TokenRecord {
    /// Read every field from the store.
    pub fn load(store: &dyn TokenStore) -> Self {
        Self {
            code: store.code(),
            access_token: store.access_token(),
            token_type: store.token_type(),
            refresh_token: store.refresh_token(),
            expires_at: store.expires_at(),
            scope: store.scope(),
        }
    }
}

/// Token endpoint success body.
///
/// `expires_in` is a delta in seconds; it is converted to an absolute
/// `expires_at` when stored.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct TokenResponse {
    pub access_token: String,
    #[serde(default)]
    pub token_type: Option<String>,
    #[serde(default)]
    pub refresh_token: Option<String>,
    pub expires_in: u64,
    #[serde(default)]
    pub scope: Option<String>,
}

/// Why the token endpoint did not produce tokens.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GrantError {
    /// OAuth error code (`invalid_grant`, ...) or a local reason such as
    /// `request_failed` / `invalid_response`
    pub error: String,
    pub description: Option<String>,
    /// Decoded response body, `Null` when there was none
    pub body: Value,
}

impl GrantError {
    fn local(error: &str, description: String) -> Self {
        Self {
            error: error.to_string(),
            description: Some(description),
            body: Value::Null,
        }
    }
}

impl fmt::Display for GrantError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.description {
            Some(description) => write!(f, "{}: {description}", self.error),
            None => f.write_str(&self.error),
        }
    }
}

/// Result of an exchange or refresh call.
#[derive(Debug, Clone, PartialEq)]
pub enum GrantOutcome {
    /// Tokens were stored; the record is what is now persisted
    Granted(TokenRecord),
    /// The endpoint refused or failed; the store is unchanged
    Rejected(GrantError),
}

impl GrantOutcome {
    pub fn is_granted(&self) -> bool {
        matches!(self, GrantOutcome::Granted(_))
    }

    pub fn record(&self) -> Option<&TokenRecord> {
        match self {
            GrantOutcome::Granted(record) => Some(record),
            GrantOutcome::Rejected(_) => None,
        }
    }

    pub fn error(&self) -> Option<&GrantError> {
        match self {
            GrantOutcome::Granted(_) => None,
            GrantOutcome::Rejected(error) => Some(error),
        }
    }
}

/// Token state machine on top of a `TokenStore`.
pub struct TokenLifecycle {
    store: Arc<dyn TokenStore>,
    transport: Arc<dyn Transport>,
    credentials: Credentials,
    token_url: String,
}

impl TokenLifecycle {
    pub fn new(
        store: Arc<dyn TokenStore>,
        transport: Arc<dyn Transport>,
        credentials: Credentials,
        token_url: impl Into<String>,
    ) -> Self {
        Self {
            store,
            transport,
            credentials,
            token_url: token_url.into(),
        }
    }

    pub fn token_url(&self) -> &str {
        &self.token_url
    }

    /// True when fewer than `STALENESS_MARGIN_SECS` remain before expiry.
    /// A missing expiry is stale.
    pub fn is_stale(&self) -> bool {
        self.is_stale_at(unix_now())
    }

    pub fn is_stale_at(&self, now: i64) -> bool {
        let expires_at = self.store.expires_at().unwrap_or(0);
        expires_at.saturating_sub(now) < STALENESS_MARGIN_SECS
    }

    /// Exchange an authorization code for tokens.
    ///
    /// The code itself is persisted only together with a successful grant,
    /// so a rejected exchange leaves the store unauthorized.
    pub fn exchange_code(&self, code: &str) -> Result<GrantOutcome> {
        let request = self
            .token_request("authorization_code")
            .form_field("code", code)
            .form_field("redirect_uri", self.credentials.redirect_url());

        match self.request_grant(&request) {
            Ok(response) => {
                let record = self.store_tokens(Some(code), response, None)?;
                info!(
                    access_token = %common::mask_token(record.access_token.as_deref().unwrap_or("")),
                    expires_at = record.expires_at,
                    "authorization code exchanged"
                );
                Ok(GrantOutcome::Granted(record))
            }
            Err(error) => {
                warn!(error = %error, "authorization code exchange rejected");
                Ok(GrantOutcome::Rejected(error))
            }
        }
    }

    /// Obtain a new access token with the stored refresh token.
    ///
    /// The refresh token is read from the store immediately before the call.
    pub fn refresh(&self) -> Result<GrantOutcome> {
        let refresh_token = self.store.refresh_token().unwrap_or_default();
        let request = self
            .token_request("refresh_token")
            .form_field("refresh_token", refresh_token.as_str());

        match self.request_grant(&request) {
            Ok(response) => {
                let record = self.store_tokens(None, response, Some(&refresh_token))?;
                info!(expires_at = record.expires_at, "access token refreshed");
                Ok(GrantOutcome::Granted(record))
            }
            Err(error) => {
                warn!(
                    error = %error,
                    refresh_token = %common::mask_token(&refresh_token),
                    "token refresh rejected"
                );
                Ok(GrantOutcome::Rejected(error))
            }
        }
    }

    /// `Authorization` header value for data requests: `"<type> <token>"`.
    pub fn auth_header(&self) -> String {
        format!(
            "{} {}",
            self.store.token_type().unwrap_or_default(),
            self.store.access_token().unwrap_or_default()
        )
    }

    /// Fresh token endpoint request with client auth and no-cache headers.
    fn token_request(&self, grant_type: &str) -> HttpRequest {
        HttpRequest::post(self.token_url.as_str())
            .header("Authorization", self.credentials.basic_auth())
            .header("Cache-Control", "no-cache")
            .header("Pragma", "no-cache")
            .form_field("grant_type", grant_type)
    }

    fn request_grant(&self, request: &HttpRequest) -> std::result::Result<TokenResponse, GrantError> {
        let response = self
            .transport
            .send(request)
            .map_err(|e| GrantError::local("request_failed", e.to_string()))?;

        let body: Value = serde_json::from_str(&response.body).map_err(|e| {
            GrantError::local(
                "invalid_response",
                format!("token endpoint returned {} with non-JSON body: {e}", response.status),
            )
        })?;

        if let Some(error) = body.get("error") {
            return Err(GrantError {
                error: error_message(error),
                description: body
                    .get("error_description")
                    .and_then(Value::as_str)
                    .map(str::to_string),
                body,
            });
        }

        debug!(status = response.status, "token endpoint responded");
        serde_json::from_value::<TokenResponse>(body.clone()).map_err(|e| GrantError {
            error: "invalid_response".to_string(),
            description: Some(format!(
                "token endpoint returned {} without a usable token: {e}",
                response.status
            )),
            body,
        })
    }

    /// Overwrite every token field from a successful response.
    ///
    /// All values are computed first and written as one batch, so a failed
    /// write leaves the previous record in place. The code, when present,
    /// is last in the batch so `is_authorized` only flips once tokens are
    /// in place.
    fn store_tokens(
        &self,
        code: Option<&str>,
        response: TokenResponse,
        previous_refresh: Option<&str>,
    ) -> Result<TokenRecord> {
        let expires_in = i64::try_from(response.expires_in).unwrap_or(i64::MAX);
        let record = TokenRecord {
            code: code.map(str::to_string).or_else(|| self.store.code()),
            token_type: Some(
                response
                    .token_type
                    .unwrap_or_else(|| DEFAULT_TOKEN_TYPE.to_string()),
            ),
            refresh_token: response
                .refresh_token
                .or_else(|| previous_refresh.map(str::to_string)),
            expires_at: Some(unix_now().saturating_add(expires_in)),
            scope: Some(
                response
                    .scope
                    .unwrap_or_else(|| self.credentials.scope().to_string()),
            ),
            access_token: Some(response.access_token),
        };

        let expires_at = record.expires_at.unwrap_or_default().to_string();
        let mut values = vec![
            (Field::AccessToken, record.access_token.as_deref().unwrap_or_default()),
            (Field::TokenType, record.token_type.as_deref().unwrap_or_default()),
            (Field::RefreshToken, record.refresh_token.as_deref().unwrap_or_default()),
            (Field::ExpiresAt, expires_at.as_str()),
            (Field::Scope, record.scope.as_deref().unwrap_or_default()),
        ];
        if let Some(code) = code {
            values.push((Field::Code, code));
        }
        self.store.set_all(&values)?;

        Ok(record)
    }
}

/// Human-readable message from an `error` field: a string as-is, an object's
/// `message`, or the JSON text of anything else.
pub(crate) fn error_message(error: &Value) -> String {
    match error {
        Value::String(message) => message.clone(),
        Value::Object(map) => map
            .get("message")
            .and_then(Value::as_str)
            .map(str::to_string)
            .unwrap_or_else(|| error.to_string()),
        other => other.to_string(),
    }
}

pub(crate) fn unix_now() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs() as i64
}
