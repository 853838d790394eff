//! Authorization link and anti-forgery `state` handling
//!
//! Each client instance draws a fresh random `state`. It is embedded in the
//! authorization link and persisted in the token store; the redirect callback
//! is only accepted when the `state` it carries equals the stored value.

use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use rand::RngExt;

use crate::constants::{AUTHORIZE_PATH, STATE_BYTES};
use crate::credentials::Credentials;
use crate::error::{Error, Result};

/// Generate a random `state` value, URL-safe base64 without padding.
pub fn generate_state() -> String {
    let mut bytes = [0u8; STATE_BYTES];
    rand::rng().fill(&mut bytes);
    URL_SAFE_NO_PAD.encode(bytes)
}

/// Build the browser authorization URL.
///
/// Parameter order is `scope`, `state`, `redirect_uri`, `response_type`,
/// `client_id`; values are form-urlencoded.
pub fn build_authorization_url(
    auth_base: &str,
    credentials: &Credentials,
    state: &str,
) -> Result<String> {
    let endpoint = format!("{}/{AUTHORIZE_PATH}", auth_base.trim_end_matches('/'));
    let url = reqwest::Url::parse_with_params(
        &endpoint,
        &[
            ("scope", credentials.scope()),
            ("state", state),
            ("redirect_uri", credentials.redirect_url()),
            ("response_type", "code"),
            ("client_id", credentials.client_id()),
        ],
    )
    .map_err(|e| Error::InvalidEndpoint(format!("auth base {auth_base:?}: {e}")))?;
    Ok(url.into())
}

/// Compare the callback `state` against the stored one.
///
/// An absent or empty stored value never matches.
pub fn state_matches(stored: Option<&str>, received: &str) -> bool {
    match stored {
        Some(stored) if !stored.is_empty() => {
            stored.len() == received.len()
                && stored
                    .bytes()
                    .zip(received.bytes())
                    .fold(0u8, |acc, (a, b)| acc | (a ^ b))
                    == 0
        }
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn creds() -> Credentials {
        Credentials::new("id1", "secret1", "http://cb", "read write").unwrap()
    }

    #[test]
    fn state_is_url_safe_base64() {
        let state = generate_state();
        // 32 bytes -> 43 base64url chars without padding
        assert_eq!(state.len(), 43);
        assert!(
            state
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_'),
            "state must be URL-safe: {state}"
        );
    }

    #[test]
    fn states_are_unique() {
        assert_ne!(generate_state(), generate_state());
    }

    #[test]
    fn url_contains_required_params_in_order() {
        let url = build_authorization_url("https://auth.example.com", &creds(), "st4te").unwrap();

        assert!(url.starts_with("https://auth.example.com/authorize/?"), "got: {url}");
        let query = url.split_once('?').unwrap().1;
        let keys: Vec<&str> = query
            .split('&')
            .map(|pair| pair.split_once('=').unwrap().0)
            .collect();
        assert_eq!(
            keys,
            ["scope", "state", "redirect_uri", "response_type", "client_id"]
        );
        assert!(query.contains("scope=read+write"));
        assert!(query.contains("state=st4te"));
        assert!(query.contains("redirect_uri=http%3A%2F%2Fcb"));
        assert!(query.contains("response_type=code"));
        assert!(query.contains("client_id=id1"));
    }

    #[test]
    fn trailing_slash_on_base_is_ignored() {
        let a = build_authorization_url("https://auth.example.com/", &creds(), "s").unwrap();
        let b = build_authorization_url("https://auth.example.com", &creds(), "s").unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn relative_base_is_rejected() {
        let result = build_authorization_url("auth.example.com", &creds(), "s");
        assert!(matches!(result, Err(Error::InvalidEndpoint(_))));
    }

    #[test]
    fn state_matching() {
        assert!(state_matches(Some("abc"), "abc"));
        assert!(!state_matches(Some("abc"), "abd"));
        assert!(!state_matches(Some("abc"), "abcd"));
        assert!(!state_matches(Some(""), ""));
        assert!(!state_matches(None, "abc"));
    }
}
