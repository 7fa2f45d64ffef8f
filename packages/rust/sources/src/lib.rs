//! Source adapters: the stages that know how each provider is searched,
//! fetched, and parsed. The pipeline engine supplies concurrency, pacing,
//! and retries; the adapters here only describe requests and consume
//! responses.

pub mod gist;
pub mod github;

pub use gist::GistStage;
pub use github::{GithubFetchStage, GithubSearchStage, LANGS};

/// Accept header sent on every GitHub request.
pub(crate) const GITHUB_ACCEPT: &str = "application/vnd.github.v3+json";

/// Rotate over the configured token list. `None` when no tokens are set,
/// in which case requests go out unauthenticated.
pub(crate) fn auth_token(tokens: &[String], i: usize) -> Option<&str> {
    if tokens.is_empty() {
        return None;
    }
    Some(tokens[i % tokens.len()].as_str())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn token_rotation_wraps() {
        let tokens = vec!["a".to_string(), "b".to_string()];
        assert_eq!(auth_token(&tokens, 0), Some("a"));
        assert_eq!(auth_token(&tokens, 1), Some("b"));
        assert_eq!(auth_token(&tokens, 2), Some("a"));
        assert_eq!(auth_token(&[], 0), None);
    }
}
