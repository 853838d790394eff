//! OAuth2 authorization-code client
//!
//! Negotiates user authorization with a single third-party API, exchanges
//! the returned code for tokens, keeps those tokens fresh and proxies
//! authenticated data requests. The library is synchronous; hosts running
//! an async runtime call it from a blocking thread.
//!
//! Request flow:
//! 1. Host builds an `AuthClient` per request with `AuthClient::builder()`
//! 2. Unauthorized users are redirected to `AuthClient::auth_link()`
//! 3. The redirect callback's `state`/`code` are passed back in via
//!    `CallbackParams`; a matching `state` triggers `TokenLifecycle::exchange_code`
//! 4. `AuthClient::fetch_data()` refreshes a stale token, then GETs the data
//!
//! Tokens live behind the `TokenStore` trait, backed either by a host
//! session (`SessionStore`) or one file per field (`FileStore`).

pub mod authorize;
pub mod client;
pub mod constants;
pub mod credentials;
pub mod error;
pub mod store;
pub mod token;
pub mod transport;

#[cfg(test)]
mod test_support;

pub use client::{AuthClient, AuthClientBuilder, AuthStatus, CallbackParams, Endpoints};
pub use constants::*;
pub use credentials::Credentials;
pub use error::{Error, Result};
pub use store::{Field, FileStore, SessionHandle, SessionStore, StorageSelector, TokenStore};
pub use token::{GrantError, GrantOutcome, TokenLifecycle, TokenRecord, TokenResponse};
pub use transport::{HttpRequest, HttpResponse, Method, ReqwestTransport, Transport};
