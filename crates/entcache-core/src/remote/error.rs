use reqwest::StatusCode;
use thiserror::Error;

/// Response bodies longer than this are cut before they reach an error.
const BODY_LIMIT: usize = 500;

/// Failure of a single call to the remote service.
#[derive(Error, Debug)]
pub enum RemoteError {
    #[error("Access denied: {0}")]
    AccessDenied(String),

    #[error("Unauthorized, the bearer token is missing or expired")]
    Unauthorized,

    #[error("Not found on remote service: {0}")]
    NotFound(String),

    #[error("Still rate limited after retrying")]
    RateLimited,

    #[error("Remote service error: {0}")]
    ServerError(String),

    #[error("Could not reach the remote service")]
    NetworkError(#[from] reqwest::Error),

    #[error("Unexpected response: {0}")]
    InvalidResponse(String),

    #[error("Rejected by remote service: {0}")]
    Rejected(String),
}

impl RemoteError {
    /// Map a non-success status to an error carrying the (possibly cut) body.
    pub fn from_status(status: StatusCode, body: &str) -> Self {
        let body = clip(body);
        match status {
            StatusCode::UNAUTHORIZED => RemoteError::Unauthorized,
            StatusCode::FORBIDDEN => RemoteError::AccessDenied(body),
            StatusCode::NOT_FOUND => RemoteError::NotFound(body),
            StatusCode::TOO_MANY_REQUESTS => RemoteError::RateLimited,
            s if s.is_server_error() => RemoteError::ServerError(body),
            s => RemoteError::InvalidResponse(format!("Status {}: {}", s, body)),
        }
    }
}

fn clip(body: &str) -> String {
    if body.len() <= BODY_LIMIT {
        return body.to_string();
    }
    let end = (0..=BODY_LIMIT)
        .rev()
        .find(|&i| body.is_char_boundary(i))
        .unwrap_or(0);
    format!("{}... (truncated, {} total bytes)", &body[..end], body.len())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_status_mapping() {
        assert!(matches!(
            RemoteError::from_status(StatusCode::UNAUTHORIZED, ""),
            RemoteError::Unauthorized
        ));
        assert!(matches!(
            RemoteError::from_status(StatusCode::NOT_FOUND, "gone"),
            RemoteError::NotFound(body) if body == "gone"
        ));
        assert!(matches!(
            RemoteError::from_status(StatusCode::BAD_GATEWAY, ""),
            RemoteError::ServerError(_)
        ));
        assert!(matches!(
            RemoteError::from_status(StatusCode::CONFLICT, "dup"),
            RemoteError::InvalidResponse(msg) if msg.contains("409")
        ));
    }

    #[test]
    fn test_long_bodies_are_truncated() {
        let body = "é".repeat(400);
        let err = RemoteError::from_status(StatusCode::FORBIDDEN, &body);
        let RemoteError::AccessDenied(msg) = err else {
            panic!("expected AccessDenied");
        };
        assert!(msg.contains("(truncated, 800 total bytes)"));
    }
}
