//! Error types for the srtcast control protocol.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Protocol-level errors that can occur while handling an inbound message.
#[derive(Error, Debug)]
pub enum ProtocolError {
    /// The message was not a valid JSON request envelope.
    #[error("Invalid message: {0}")]
    InvalidMessage(#[from] serde_json::Error),

    /// The `action` field named an operation the server does not know.
    #[error("Unknown action: {0}")]
    UnknownAction(String),
}

/// Structured error code surfaced in the `error` field of a [`Response`].
///
/// The set is closed: clients match on these strings, so new failure modes
/// must map onto an existing code or extend this enum.
///
/// [`Response`]: crate::Response
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCode {
    /// The message could not be parsed as a request envelope.
    InvalidMessage,
    /// The `action` field is not a known operation.
    UnknownAction,
    /// The referenced channel does not exist.
    ChannelNotFound,
    /// The referenced media file does not exist.
    FileNotFound,
    /// A required `filePath` field was missing.
    MissingFilePath,
    /// Starting playback failed.
    PlayError,
    /// Stopping playback failed.
    StopError,
    /// Listing media files failed.
    ListError,
    /// A channel could not be created.
    ChannelCreateError,
}

impl ErrorCode {
    /// Wire representation of the code.
    pub fn as_str(self) -> &'static str {
        match self {
            ErrorCode::InvalidMessage => "invalid_message",
            ErrorCode::UnknownAction => "unknown_action",
            ErrorCode::ChannelNotFound => "channel_not_found",
            ErrorCode::FileNotFound => "file_not_found",
            ErrorCode::MissingFilePath => "missing_file_path",
            ErrorCode::PlayError => "play_error",
            ErrorCode::StopError => "stop_error",
            ErrorCode::ListError => "list_error",
            ErrorCode::ChannelCreateError => "channel_create_error",
        }
    }
}

impl std::fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_code_wire_format() {
        let json = serde_json::to_string(&ErrorCode::ChannelNotFound).unwrap();
        assert_eq!(json, "\"channel_not_found\"");

        let code: ErrorCode = serde_json::from_str("\"file_not_found\"").unwrap();
        assert_eq!(code, ErrorCode::FileNotFound);
    }

    #[test]
    fn test_as_str_matches_serde() {
        for code in [
            ErrorCode::InvalidMessage,
            ErrorCode::UnknownAction,
            ErrorCode::ChannelNotFound,
            ErrorCode::FileNotFound,
            ErrorCode::MissingFilePath,
            ErrorCode::PlayError,
            ErrorCode::StopError,
            ErrorCode::ListError,
            ErrorCode::ChannelCreateError,
        ] {
            let json = serde_json::to_string(&code).unwrap();
            assert_eq!(json, format!("\"{}\"", code.as_str()));
        }
    }
}
