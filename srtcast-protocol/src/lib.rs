//! Control protocol definitions for the srtcast channel server.
//!
//! This crate defines the JSON message envelopes exchanged between the
//! srtcast server and compositing clients over a persistent WebSocket
//! connection.
//!
//! # Envelope Format
//!
//! Requests carry an `action` field that selects the operation:
//!
//! ```json
//! { "action": "play_video", "filePath": "/videos/intro.mp4" }
//! ```
//!
//! Responses echo an action name and carry either a `data` object or a
//! structured `error` code:
//!
//! ```json
//! { "success": true, "action": "play_started", "data": { "srtPort": 9000 } }
//! ```
//!
//! The server also pushes unsolicited events through the same `Response`
//! envelope: `connected` on connect, `channel_status` on every channel
//! state change, and `warning` when an encoder fallback occurs.
//!
//! # Example
//!
//! ```rust
//! use srtcast_protocol::{ErrorCode, Request, Response, actions};
//!
//! let raw = r#"{"action":"stop","channelId":"abc"}"#;
//! let req: Request = serde_json::from_str(raw).unwrap();
//! assert_eq!(req.action, "stop");
//!
//! let resp = Response::error(req.action.clone(), ErrorCode::ChannelNotFound, "no such channel");
//! assert!(!resp.success);
//!
//! let ok = Response::ok(actions::PLAY_STOPPED, serde_json::json!({"channelId": "abc"}));
//! assert!(ok.success);
//! ```

pub mod error;
pub mod types;

pub use error::{ErrorCode, ProtocolError};
pub use types::{
    actions, ChannelStatusUpdate, ConnectedInfo, EncoderFallbackNotice, Request, Response,
};
