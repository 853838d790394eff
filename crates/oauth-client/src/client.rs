//! Authorization flow orchestration
//!
//! An `AuthClient` is built once per incoming host request. Construction
//! decides which of three states the user is in and does the work that
//! state implies:
//!
//! - `Authorized`: the store already holds a code; nothing to do
//! - `CallbackPending`: the request carries the `state` we stored; the
//!   accompanying code is exchanged for tokens
//! - `NeedsAuthorization`: a fresh `state` is stored and the host should
//!   redirect the user to `auth_link()`
//!
//! Afterwards `fetch_data` proxies authenticated GETs, refreshing first
//! when the token is stale.

use std::path::PathBuf;
use std::sync::Arc;

use serde_json::{Value, json};
use tracing::{debug, info, warn};

use crate::authorize::{build_authorization_url, generate_state, state_matches};
use crate::constants::{DEFAULT_STORAGE_DIR, TOKEN_PATH};
use crate::credentials::Credentials;
use crate::error::{Error, Result};
use crate::store::{FileStore, SessionHandle, SessionStore, StorageSelector, TokenStore};
use crate::token::{GrantOutcome, TokenLifecycle, TokenRecord, error_message};
use crate::transport::{HttpRequest, Transport};

/// Base URLs of the third-party API.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Endpoints {
    /// Base for `/authorize/` and, by default, `/token/`
    pub auth_base: String,
    /// Base that data paths are appended to
    pub api_base: String,
    /// Explicit token endpoint, overriding `<auth_base>/token/`
    pub token_url: Option<String>,
}

impl Endpoints {
    pub fn new(auth_base: impl Into<String>, api_base: impl Into<String>) -> Self {
        Self {
            auth_base: auth_base.into(),
            api_base: api_base.into(),
            token_url: None,
        }
    }

    pub fn with_token_url(mut self, token_url: impl Into<String>) -> Self {
        self.token_url = Some(token_url.into());
        self
    }

    pub fn token_url(&self) -> String {
        match &self.token_url {
            Some(url) => url.clone(),
            None => format!("{}/{TOKEN_PATH}", self.auth_base.trim_end_matches('/')),
        }
    }

    pub fn data_url(&self, path: &str) -> String {
        format!(
            "{}/{}",
            self.api_base.trim_end_matches('/'),
            path.trim_start_matches('/')
        )
    }

    fn validate(&self) -> Result<()> {
        let token_url = self.token_url();
        for (name, url) in [
            ("auth_base", self.auth_base.as_str()),
            ("api_base", self.api_base.as_str()),
            ("token_url", token_url.as_str()),
        ] {
            if !url.starts_with("http://") && !url.starts_with("https://") {
                return Err(Error::InvalidEndpoint(format!(
                    "{name} must start with http:// or https://, got: {url:?}"
                )));
            }
        }
        Ok(())
    }
}

/// Query parameters of the redirect callback, as seen by the host.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CallbackParams {
    pub state: Option<String>,
    pub code: Option<String>,
}

impl CallbackParams {
    pub fn new(state: impl Into<String>, code: impl Into<String>) -> Self {
        Self {
            state: Some(state.into()),
            code: Some(code.into()),
        }
    }

    fn pair(&self) -> Option<(&str, &str)> {
        match (self.state.as_deref(), self.code.as_deref()) {
            (Some(state), Some(code)) if !state.is_empty() && !code.is_empty() => {
                Some((state, code))
            }
            _ => None,
        }
    }
}

/// State decided at construction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthStatus {
    Authorized,
    CallbackPending,
    NeedsAuthorization,
}

/// Builder for `AuthClient`. Every missing piece is a configuration error
/// at `build`.
#[derive(Default)]
pub struct AuthClientBuilder {
    client_id: Option<String>,
    client_secret: Option<String>,
    redirect_url: Option<String>,
    scope: Option<String>,
    endpoints: Option<Endpoints>,
    storage: Option<String>,
    session: Option<SessionHandle>,
    storage_dir: Option<PathBuf>,
    transport: Option<Arc<dyn Transport>>,
    callback: CallbackParams,
    reuse_pending_state: bool,
}

impl AuthClientBuilder {
    pub fn client_id(mut self, value: impl Into<String>) -> Self {
        self.client_id = Some(value.into());
        self
    }

    pub fn client_secret(mut self, value: impl Into<String>) -> Self {
        self.client_secret = Some(value.into());
        self
    }

    pub fn redirect_url(mut self, value: impl Into<String>) -> Self {
        self.redirect_url = Some(value.into());
        self
    }

    pub fn scope(mut self, value: impl Into<String>) -> Self {
        self.scope = Some(value.into());
        self
    }

    pub fn endpoints(mut self, endpoints: Endpoints) -> Self {
        self.endpoints = Some(endpoints);
        self
    }

    /// Storage selector: `"session"` or `"flat-file"`.
    pub fn storage(mut self, selector: impl Into<String>) -> Self {
        self.storage = Some(selector.into());
        self
    }

    /// Session used when the selector is `session`.
    pub fn session(mut self, session: SessionHandle) -> Self {
        self.session = Some(session);
        self
    }

    /// Working directory used when the selector is `flat-file`.
    pub fn storage_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.storage_dir = Some(dir.into());
        self
    }

    pub fn transport(mut self, transport: Arc<dyn Transport>) -> Self {
        self.transport = Some(transport);
        self
    }

    /// Callback parameters from the current request, if any.
    pub fn callback(mut self, callback: CallbackParams) -> Self {
        self.callback = callback;
        self
    }

    /// Reuse a `state` already waiting in the store instead of drawing a new
    /// one. The auth link of an earlier instance then stays valid; a store
    /// with no pending state still gets a fresh one.
    pub fn reuse_pending_state(mut self) -> Self {
        self.reuse_pending_state = true;
        self
    }

    /// Validate configuration, open the store and run the authorization
    /// state machine.
    ///
    /// Configuration is checked before any store is opened or request sent.
    /// `Err` after that point only comes from local storage writes.
    pub fn build(self) -> Result<AuthClient> {
        let credentials = Credentials::new(
            self.client_id.unwrap_or_default(),
            self.client_secret.unwrap_or_default(),
            self.redirect_url.unwrap_or_default(),
            self.scope.unwrap_or_default(),
        )?;
        let endpoints = self
            .endpoints
            .ok_or_else(|| Error::InvalidEndpoint("no endpoints configured".into()))?;
        endpoints.validate()?;
        let selector: StorageSelector = self.storage.as_deref().unwrap_or_default().parse()?;
        let transport = self.transport.ok_or(Error::MissingTransport)?;

        let store: Arc<dyn TokenStore> = match selector {
            StorageSelector::Session => {
                let session = self.session.ok_or(Error::MissingSession)?;
                Arc::new(SessionStore::new(session))
            }
            StorageSelector::FlatFile => Arc::new(FileStore::new(
                self.storage_dir
                    .unwrap_or_else(|| PathBuf::from(DEFAULT_STORAGE_DIR)),
            )),
        };

        let state = match store.state() {
            Some(pending) if self.reuse_pending_state && !pending.is_empty() => pending,
            _ => generate_state(),
        };
        let auth_link = build_authorization_url(&endpoints.auth_base, &credentials, &state)?;
        let lifecycle = TokenLifecycle::new(
            store.clone(),
            transport.clone(),
            credentials,
            endpoints.token_url(),
        );

        debug!(storage = %selector, "auth client configured");

        let mut client = AuthClient {
            endpoints,
            selector,
            store,
            transport,
            lifecycle,
            state,
            auth_link,
            status: AuthStatus::NeedsAuthorization,
            callback_outcome: None,
        };
        client.start(&self.callback)?;
        Ok(client)
    }
}

/// Per-request entry point for authorization and data access.
pub struct AuthClient {
    endpoints: Endpoints,
    selector: StorageSelector,
    store: Arc<dyn TokenStore>,
    transport: Arc<dyn Transport>,
    lifecycle: TokenLifecycle,
    state: String,
    auth_link: String,
    status: AuthStatus,
    callback_outcome: Option<GrantOutcome>,
}

impl AuthClient {
    pub fn builder() -> AuthClientBuilder {
        AuthClientBuilder::default()
    }

    fn start(&mut self, callback: &CallbackParams) -> Result<()> {
        if self.store.is_authorized() {
            self.status = AuthStatus::Authorized;
            debug!("already authorized");
            return Ok(());
        }

        if let Some((state, code)) = callback.pair() {
            if state_matches(self.store.state().as_deref(), state) {
                self.status = AuthStatus::CallbackPending;
                let outcome = self.lifecycle.exchange_code(code)?;
                if outcome.is_granted() {
                    // The stored state is single-use
                    self.store.set_state("")?;
                    info!("authorization callback completed");
                }
                self.callback_outcome = Some(outcome);
                return Ok(());
            }
            warn!("callback state does not match stored state, restarting authorization");
        }

        self.status = AuthStatus::NeedsAuthorization;
        if self.store.state().as_deref() != Some(self.state.as_str()) {
            self.store.set_state(&self.state)?;
            debug!("authorization required, state stored");
        }
        Ok(())
    }

    /// State decided at construction.
    pub fn status(&self) -> AuthStatus {
        self.status
    }

    /// Grant outcome of the callback exchange, when this instance ran one.
    pub fn callback_outcome(&self) -> Option<&GrantOutcome> {
        self.callback_outcome.as_ref()
    }

    /// Authorization URL for this instance. Stable across calls.
    pub fn auth_link(&self) -> &str {
        &self.auth_link
    }

    /// The `state` value embedded in `auth_link`.
    pub fn state(&self) -> &str {
        &self.state
    }

    pub fn is_authorized(&self) -> bool {
        self.store.is_authorized()
    }

    pub fn storage(&self) -> StorageSelector {
        self.selector
    }

    pub fn lifecycle(&self) -> &TokenLifecycle {
        &self.lifecycle
    }

    pub fn token_record(&self) -> TokenRecord {
        TokenRecord::load(self.store.as_ref())
    }

    /// Authenticated GET of `<api base>/<path>`.
    ///
    /// Never fails: transport problems, undecodable bodies and responses
    /// with an `error` field all come back as `{"error": <message>}`. Any
    /// other decoded payload is returned unchanged.
    pub fn fetch_data(&self, path: &str) -> Value {
        if !self.store.is_authorized() {
            return error_payload("not authorized");
        }

        if self.lifecycle.is_stale() {
            match self.lifecycle.refresh() {
                Ok(GrantOutcome::Granted(_)) => debug!("refreshed stale token before data request"),
                Ok(GrantOutcome::Rejected(e)) => {
                    warn!(error = %e, "refresh rejected, using current access token")
                }
                Err(e) => warn!(error = %e, "failed to persist refreshed token"),
            }
        }

        let url = self.endpoints.data_url(path);
        let request =
            HttpRequest::get(url.as_str()).header("Authorization", self.lifecycle.auth_header());

        let response = match self.transport.send(&request) {
            Ok(response) => response,
            Err(e) => {
                warn!(url = %url, error = %e, "data request failed");
                return error_payload(e.to_string());
            }
        };

        let payload: Value = match serde_json::from_str(&response.body) {
            Ok(payload) => payload,
            Err(e) => {
                warn!(url = %url, status = response.status, "data endpoint returned non-JSON body");
                return error_payload(format!(
                    "data endpoint returned {} with non-JSON body: {e}",
                    response.status
                ));
            }
        };

        if let Some(error) = payload.get("error") {
            let message = error_message(error);
            debug!(url = %url, error = %message, "data endpoint reported an error");
            return error_payload(message);
        }

        payload
    }
}

fn error_payload(message: impl Into<String>) -> Value {
    json!({ "error": message.into() })
}
