//! Upstream session continuity.
//!
//! The upstream issues an `Mcp-Session-Id` header on first contact. The first
//! non-empty value observed is adopted and then echoed on every later request
//! for the lifetime of the process; any different value sent afterwards is
//! ignored.
//!
//! The field is owned by the forwarder and mutated from a strictly sequential
//! loop. If requests are ever forwarded concurrently this needs to become a
//! compare-and-set (e.g. `OnceLock<String>`).

/// Header carrying the session token in both directions.
pub const SESSION_HEADER: &str = "Mcp-Session-Id";

/// Adopt-once session token.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SessionState {
    token: Option<String>,
}

impl SessionState {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// The adopted token, if any.
    #[must_use]
    pub fn token(&self) -> Option<&str> {
        self.token.as_deref()
    }

    #[must_use]
    pub fn is_established(&self) -> bool {
        self.token.is_some()
    }

    /// Offer a token observed on a response.
    ///
    /// Returns `true` only when `candidate` became the session token. Empty
    /// candidates are never adopted, and once a token is held every later
    /// candidate is rejected, even if it differs.
    pub fn adopt(&mut self, candidate: &str) -> bool {
        if self.token.is_some() || candidate.is_empty() {
            return false;
        }
        self.token = Some(candidate.to_string());
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_starts_empty() {
        let session = SessionState::new();
        assert!(!session.is_established());
        assert_eq!(session.token(), None);
    }

    #[test]
    fn test_first_token_wins() {
        let mut session = SessionState::new();
        assert!(session.adopt("S1"));
        assert!(!session.adopt("S2"));
        assert!(!session.adopt("S1"));
        assert_eq!(session.token(), Some("S1"));
    }

    #[test]
    fn test_empty_candidate_ignored() {
        let mut session = SessionState::new();
        assert!(!session.adopt(""));
        assert!(!session.is_established());
        assert!(session.adopt("abc"));
        assert_eq!(session.token(), Some("abc"));
    }
}
