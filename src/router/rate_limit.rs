//! Rate Limit Detection
//!
//! Heuristics that decide whether an upstream failure means "this key is rate limited".
//! Message sniffing is fragile; keep every such check in this module so it can be replaced
//! by structured status codes wherever the caller has them.

/// Substrings (lowercase) that mark an error message as a rate-limit signal
const RATE_LIMIT_MARKERS: [&str; 3] = ["rate", "429", "quota"];

/// Check whether an error message looks like a rate-limit or quota failure.
///
/// Matching is case-insensitive and substring based, so it also fires on words such as
/// "generate" or "separate". Callers must keep URLs out of the messages they report.
pub fn looks_like_rate_limit_error(message: &str) -> bool {
    let lower = message.to_lowercase();
    RATE_LIMIT_MARKERS.iter().any(|marker| lower.contains(marker))
}

/// Detect if an HTTP response indicates a rate limit error
pub fn is_rate_limit_response(status: u16, body: &str) -> bool {
    // HTTP 429 Too Many Requests
    if status == 429 {
        return true;
    }

    // Gemini reports some quota exhaustion as 400/403 with a RESOURCE_EXHAUSTED body
    if !(400..600).contains(&status) {
        return false;
    }
    let lower_body = body.to_lowercase();
    lower_body.contains("rate limit")
        || lower_body.contains("rate_limit")
        || lower_body.contains("too many requests")
        || lower_body.contains("quota")
        || lower_body.contains("resource_exhausted")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_looks_like_rate_limit_error() {
        assert!(looks_like_rate_limit_error("429 Too Many Requests"));
        assert!(looks_like_rate_limit_error("Rate limit exceeded"));
        assert!(looks_like_rate_limit_error("QUOTA exhausted for project"));
        assert!(!looks_like_rate_limit_error("connection reset by peer"));
        assert!(!looks_like_rate_limit_error("invalid argument"));
    }

    #[test]
    fn test_is_rate_limit_response() {
        assert!(is_rate_limit_response(429, ""));
        assert!(is_rate_limit_response(400, "Quota exceeded for metric"));
        assert!(is_rate_limit_response(403, "RESOURCE_EXHAUSTED"));
        assert!(is_rate_limit_response(503, "Too Many Requests"));
        assert!(!is_rate_limit_response(200, "quota"));
        assert!(!is_rate_limit_response(500, "internal error"));
        assert!(!is_rate_limit_response(401, "API key not valid"));
    }
}
