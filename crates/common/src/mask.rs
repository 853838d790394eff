//! Token masking for log output

const PREFIX_LEN: usize = 6;
const SUFFIX_LEN: usize = 4;

/// Shorten a token to `prefix...suffix` so it can appear in logs.
///
/// Values too short to keep both ends are replaced with asterisks (at most 8).
pub fn mask_token(token: &str) -> String {
    let trimmed = token.trim();
    if trimmed.is_empty() {
        return String::new();
    }

    let chars: Vec<char> = trimmed.chars().collect();
    if chars.len() <= PREFIX_LEN + SUFFIX_LEN {
        return "*".repeat(chars.len().min(8));
    }

    let prefix: String = chars[..PREFIX_LEN].iter().collect();
    let suffix: String = chars[chars.len() - SUFFIX_LEN..].iter().collect();
    format!("{prefix}...{suffix}")
}
