//! Error classification for provider failures
//!
//! Maps a `ProviderError` to the cooldown bucket it belongs in. HTTP status
//! wins when the adapter reports one; otherwise the error text is matched
//! against known rate-limit and auth signatures. Anything unrecognised is
//! Transient, so classification always succeeds.

use provider::{ErrorClassification, ProviderError};

/// Rate-limit / quota signatures. Checked before auth signatures.
const RATE_LIMIT_PATTERNS: &[&str] = &[
    "rate limit",
    "rate_limit",
    "429",
    "quota",
    "too many requests",
    "insufficient_quota",
];

/// Invalid, revoked or unauthorised key signatures.
const AUTH_PATTERNS: &[&str] = &[
    "401",
    "unauthorized",
    "invalid api key",
    "invalid_api_key",
    "api key not valid",
];

/// Classify a provider error into a cooldown bucket.
pub fn classify(error: &ProviderError) -> ErrorClassification {
    match error {
        ProviderError::Upstream { status, body } => match *status {
            429 => ErrorClassification::RateLimited,
            401 | 403 => ErrorClassification::Unauthorized,
            _ => classify_message(body),
        },
        other => classify_message(&other.to_string()),
    }
}

/// Classify free-form error text by signature.
pub fn classify_message(message: &str) -> ErrorClassification {
    let lower = message.to_lowercase();
    if RATE_LIMIT_PATTERNS.iter().any(|p| lower.contains(p)) {
        ErrorClassification::RateLimited
    } else if AUTH_PATTERNS.iter().any(|p| lower.contains(p)) {
        ErrorClassification::Unauthorized
    } else {
        ErrorClassification::Transient
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn upstream(status: u16, body: &str) -> ProviderError {
        ProviderError::Upstream {
            status,
            body: body.into(),
        }
    }

    #[test]
    fn status_429_is_rate_limited() {
        assert_eq!(
            classify(&upstream(429, "slow down")),
            ErrorClassification::RateLimited
        );
    }

    #[test]
    fn status_401_and_403_are_unauthorized() {
        assert_eq!(
            classify(&upstream(401, "")),
            ErrorClassification::Unauthorized
        );
        assert_eq!(
            classify(&upstream(403, "forbidden")),
            ErrorClassification::Unauthorized
        );
    }

    #[test]
    fn other_status_falls_back_to_body() {
        let body = r#"{"error":{"code":"insufficient_quota","message":"You exceeded your current quota"}}"#;
        assert_eq!(
            classify(&upstream(400, body)),
            ErrorClassification::RateLimited
        );
        assert_eq!(
            classify(&upstream(400, r#"{"error":"API key not valid. Please pass a valid API key."}"#)),
            ErrorClassification::Unauthorized
        );
        assert_eq!(
            classify(&upstream(503, "service unavailable")),
            ErrorClassification::Transient
        );
    }

    #[test]
    fn message_signatures() {
        assert_eq!(
            classify_message("Rate limit exceeded"),
            ErrorClassification::RateLimited
        );
        assert_eq!(
            classify_message("HTTP 429"),
            ErrorClassification::RateLimited
        );
        assert_eq!(
            classify_message("Too Many Requests"),
            ErrorClassification::RateLimited
        );
        assert_eq!(
            classify_message("got 401 from upstream"),
            ErrorClassification::Unauthorized
        );
        assert_eq!(
            classify_message("Unauthorized"),
            ErrorClassification::Unauthorized
        );
        assert_eq!(
            classify_message("Invalid API key provided"),
            ErrorClassification::Unauthorized
        );
    }

    #[test]
    fn rate_limit_wins_over_auth() {
        assert_eq!(
            classify_message("unauthorized: quota exhausted"),
            ErrorClassification::RateLimited
        );
    }

    #[test]
    fn unknown_errors_are_transient() {
        assert_eq!(
            classify(&ProviderError::Transport("connection reset".into())),
            ErrorClassification::Transient
        );
        assert_eq!(classify_message(""), ErrorClassification::Transient);
    }

    #[test]
    fn transport_text_is_still_matched() {
        assert_eq!(
            classify(&ProviderError::Transport("server said: too many requests".into())),
            ErrorClassification::RateLimited
        );
    }
}
