//! Error types for chat-sync

use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("API error ({status}): {}", message.as_deref().unwrap_or("no message"))]
    Api { status: u16, message: Option<String> },

    #[error("Invalid input: {0}")]
    Validation(String),

    #[error("A message is already being sent")]
    SendInFlight,

    #[error("Session closed")]
    SessionClosed,

    #[error("Config error: {0}")]
    Config(String),
}

impl Error {
    /// Message suitable for the user: the server's own text when it sent one,
    /// otherwise `fallback`.
    pub fn user_message(&self, fallback: &str) -> String {
        match self {
            Error::Api {
                message: Some(message),
                ..
            } if !message.trim().is_empty() => message.clone(),
            Error::Validation(reason) => reason.clone(),
            _ => fallback.to_string(),
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = Error::Api {
            status: 404,
            message: Some("chat not found".to_string()),
        };
        assert!(err.to_string().contains("404"));
        assert!(err.to_string().contains("chat not found"));
    }

    #[test]
    fn test_error_from_io() {
        let io_err = std::io::Error::new(std::io::ErrorKind::NotFound, "file not found");
        let err: Error = io_err.into();
        assert!(matches!(err, Error::Io(_)));
    }

    #[test]
    fn test_user_message_prefers_server_text() {
        let err = Error::Api {
            status: 400,
            message: Some("Message too long".to_string()),
        };
        assert_eq!(err.user_message("fallback"), "Message too long");
    }

    #[test]
    fn test_user_message_fallback() {
        let blank = Error::Api {
            status: 500,
            message: Some("  ".to_string()),
        };
        assert_eq!(blank.user_message("fallback"), "fallback");

        let missing = Error::Api {
            status: 500,
            message: None,
        };
        assert_eq!(missing.user_message("fallback"), "fallback");
        assert_eq!(Error::SendInFlight.user_message("fallback"), "fallback");
    }
}
