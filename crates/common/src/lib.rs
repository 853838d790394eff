//! Shared types for the OAuth client workspace
//!
//! Holds the pieces both the client library and the host service need:
//! secret redaction, token masking for logs, and the configuration error type.

mod error;
mod mask;
mod secret;

pub use error::{Error, Result};
pub use mask::mask_token;
pub use secret::Secret;
