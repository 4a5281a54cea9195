//! Message envelope definitions for the srtcast control protocol.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::ErrorCode;

/// Action names understood by the server, plus the action names the server
/// uses when responding or pushing events.
pub mod actions {
    // Client -> server requests.
    pub const PLAY_VIDEO: &str = "play_video";
    pub const PLAY: &str = "play";
    pub const STOP: &str = "stop";
    pub const STATUS: &str = "status";
    pub const LIST_CHANNELS: &str = "list_channels";
    pub const LIST_FILES: &str = "list_files";

    // Server -> client response actions.
    pub const PLAY_STARTED: &str = "play_started";
    pub const PLAY_STOPPED: &str = "play_stopped";
    pub const CHANNEL_STATUS: &str = "channel_status";
    pub const ALL_CHANNELS_STATUS: &str = "all_channels_status";
    pub const CHANNELS_LIST: &str = "channels_list";
    pub const FILES_LIST: &str = "files_list";

    // Server-initiated events.
    pub const CONNECTED: &str = "connected";
    pub const WARNING: &str = "warning";
}

/// A client request envelope.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Request {
    /// Operation selector.
    pub action: String,
    /// Client id, if the client wants to identify itself explicitly.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub client_id: Option<String>,
    /// Target channel id, where the operation takes one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub channel_id: Option<String>,
    /// Media file path for play operations.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file_path: Option<String>,
    /// Optional per-request encoding parameter overrides.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parameters: Option<serde_json::Map<String, Value>>,
}

/// A server response or server-initiated event envelope.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Response {
    /// Whether the operation succeeded.
    pub success: bool,
    /// Action name this response answers, or the event name for pushes.
    pub action: String,
    /// Optional human-readable message.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    /// Operation result payload.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
    /// Structured error code on failure.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<ErrorCode>,
}

impl Response {
    /// Build a success response carrying a data payload.
    pub fn ok(action: impl Into<String>, data: Value) -> Self {
        Self {
            success: true,
            action: action.into(),
            message: None,
            data: Some(data),
            error: None,
        }
    }

    /// Build a success response with a message and no payload.
    pub fn ok_message(action: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            success: true,
            action: action.into(),
            message: Some(message.into()),
            data: None,
            error: None,
        }
    }

    /// Build an error response.
    pub fn error(
        action: impl Into<String>,
        code: ErrorCode,
        message: impl Into<String>,
    ) -> Self {
        Self {
            success: false,
            action: action.into(),
            message: Some(message.into()),
            data: None,
            error: Some(code),
        }
    }

    /// Serialize to the wire format. Falls back to a minimal envelope if the
    /// payload itself cannot be serialized.
    pub fn to_json(&self) -> String {
        serde_json::to_string(self).unwrap_or_else(|_| {
            "{\"success\":false,\"action\":\"internal\",\"error\":\"invalid_message\"}".to_string()
        })
    }
}

/// Payload of the `connected` event sent once per connection.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConnectedInfo {
    /// Server-assigned client id.
    pub client_id: String,
    /// Display name taken from the connection query, or a generated default.
    pub name: String,
}

/// Payload of the `channel_status` broadcast sent on every state change.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChannelStatusUpdate {
    /// Channel id.
    pub channel_id: String,
    /// New lifecycle status (wire form, e.g. `"active"`).
    pub status: String,
    /// File currently bound to the channel, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub current_file: Option<String>,
    /// SRT port the channel is bound to.
    pub srt_port: u16,
}

/// Payload of the `warning` event emitted when the supervisor substitutes
/// the software encoder for an unusable hardware one.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EncoderFallbackNotice {
    /// Channel the substitution applies to.
    pub channel_id: String,
    /// Encoder the client or configuration asked for.
    pub requested: String,
    /// Encoder actually used.
    pub substituted: String,
    /// Why the requested encoder was rejected.
    pub reason: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_request_roundtrip() {
        let raw = r#"{"action":"play_video","filePath":"/videos/intro.mp4","parameters":{"videoEncoder":"h264_nvenc"}}"#;
        let req: Request = serde_json::from_str(raw).unwrap();
        assert_eq!(req.action, "play_video");
        assert_eq!(req.file_path.as_deref(), Some("/videos/intro.mp4"));
        let params = req.parameters.unwrap();
        assert_eq!(
            params.get("videoEncoder").and_then(|v| v.as_str()),
            Some("h264_nvenc")
        );
    }

    #[test]
    fn test_request_minimal() {
        let req: Request = serde_json::from_str(r#"{"action":"list_channels"}"#).unwrap();
        assert_eq!(req.action, "list_channels");
        assert!(req.channel_id.is_none());
        assert!(req.file_path.is_none());
    }

    #[test]
    fn test_response_error_envelope() {
        let resp = Response::error(actions::PLAY_VIDEO, ErrorCode::FileNotFound, "missing");
        let json: Value = serde_json::from_str(&resp.to_json()).unwrap();
        assert_eq!(json["success"], false);
        assert_eq!(json["error"], "file_not_found");
        assert_eq!(json["message"], "missing");
        assert!(json.get("data").is_none());
    }

    #[test]
    fn test_response_ok_omits_error() {
        let resp = Response::ok(
            actions::PLAY_STARTED,
            serde_json::json!({"channelId": "c1", "srtPort": 9000}),
        );
        let json: Value = serde_json::from_str(&resp.to_json()).unwrap();
        assert_eq!(json["success"], true);
        assert_eq!(json["data"]["srtPort"], 9000);
        assert!(json.get("error").is_none());
    }

    #[test]
    fn test_status_update_wire_fields() {
        let update = ChannelStatusUpdate {
            channel_id: "c1".to_string(),
            status: "active".to_string(),
            current_file: Some("/videos/a.mp4".to_string()),
            srt_port: 9001,
        };
        let json = serde_json::to_value(&update).unwrap();
        assert_eq!(json["channelId"], "c1");
        assert_eq!(json["srtPort"], 9001);
        assert_eq!(json["currentFile"], "/videos/a.mp4");
    }
}
