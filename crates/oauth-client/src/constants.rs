//! Fixed protocol values for the authorization-code client
//!
//! Endpoint bases are configuration, not constants; only the paths and
//! timing values that every deployment shares live here.

use std::time::Duration;

/// Refresh once fewer than this many seconds remain before `expires_at`.
pub const STALENESS_MARGIN_SECS: i64 = 7200;

/// Timeout applied to every token and data request.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(5);

/// Path appended to the auth base for the browser authorization redirect.
pub const AUTHORIZE_PATH: &str = "authorize/";

/// Path appended to the auth base for the token endpoint when no explicit
/// token URL is configured.
pub const TOKEN_PATH: &str = "token/";

/// Token type assumed when the token endpoint omits `token_type`.
pub const DEFAULT_TOKEN_TYPE: &str = "Bearer";

/// Number of random bytes behind each authorization `state` value.
pub const STATE_BYTES: usize = 32;

/// Working directory for the flat-file store when none is configured.
pub const DEFAULT_STORAGE_DIR: &str = "oauth-tokens";
