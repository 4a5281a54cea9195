//! Mapping of inbound protocol messages to engine operations.

use log::debug;

use srtcast_protocol::{actions, ErrorCode, ProtocolError, Request, Response};

use crate::engine::Engine;

/// Action name used when a message is too malformed to echo one back.
const ERROR_ACTION: &str = "error";

/// Parse one text frame and run the operation it names. Always produces a
/// response envelope; protocol violations become structured error responses
/// instead of closing the connection.
pub async fn dispatch(engine: &Engine, client_name: &str, text: &str) -> Response {
    let request: Request = match serde_json::from_str(text) {
        Ok(request) => request,
        Err(e) => {
            debug!("Rejected malformed message from {}: {}", client_name, e);
            return Response::error(
                ERROR_ACTION,
                ErrorCode::InvalidMessage,
                ProtocolError::InvalidMessage(e).to_string(),
            );
        }
    };

    match request.action.as_str() {
        actions::PLAY_VIDEO => engine.play_video(client_name, &request).await,
        actions::PLAY => engine.play(&request).await,
        actions::STOP => engine.stop(&request).await,
        actions::STATUS => engine.status(&request).await,
        actions::LIST_CHANNELS => engine.list_channels().await,
        actions::LIST_FILES => engine.list_files(&request).await,
        other => Response::error(
            other,
            ErrorCode::UnknownAction,
            ProtocolError::UnknownAction(other.to_string()).to_string(),
        ),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    use tokio::sync::mpsc;

    use crate::config::Settings;
    use crate::registry::ChannelRegistry;
    use crate::supervisor::TranscodeSupervisor;
    use crate::web::state::ClientRegistry;

    fn test_engine(
        videos_dir: &std::path::Path,
    ) -> (Engine, mpsc::UnboundedReceiver<crate::supervisor::SupervisorEvent>) {
        let mut settings = Settings::default();
        settings.server.videos_dir = videos_dir.to_path_buf();
        settings.server.ffmpeg_path = "sleep".to_string();
        settings.server.hardware_fallback = false;
        let (tx, rx) = mpsc::unbounded_channel();
        let engine = Engine::new(
            settings,
            Arc::new(ChannelRegistry::new()),
            Arc::new(TranscodeSupervisor::new("sleep".to_string(), false, tx)),
            Arc::new(ClientRegistry::new()),
        );
        (engine, rx)
    }

    #[tokio::test]
    async fn test_malformed_json_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let (engine, _rx) = test_engine(dir.path());

        let resp = dispatch(&engine, "alice", "{not json").await;
        assert!(!resp.success);
        assert_eq!(resp.error, Some(ErrorCode::InvalidMessage));
    }

    #[tokio::test]
    async fn test_unknown_action_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let (engine, _rx) = test_engine(dir.path());

        let resp = dispatch(&engine, "alice", r#"{"action":"reboot_server"}"#).await;
        assert!(!resp.success);
        assert_eq!(resp.error, Some(ErrorCode::UnknownAction));
        assert_eq!(resp.action, "reboot_server");
    }

    #[tokio::test]
    async fn test_list_channels_dispatches() {
        let dir = tempfile::tempdir().unwrap();
        let (engine, _rx) = test_engine(dir.path());

        let resp = dispatch(&engine, "alice", r#"{"action":"list_channels"}"#).await;
        assert!(resp.success);
        assert_eq!(resp.action, actions::CHANNELS_LIST);
        assert_eq!(resp.data.unwrap()["count"], 0);
    }

    #[tokio::test]
    async fn test_play_video_missing_path_maps_error() {
        let dir = tempfile::tempdir().unwrap();
        let (engine, _rx) = test_engine(dir.path());

        let resp = dispatch(&engine, "alice", r#"{"action":"play_video"}"#).await;
        assert!(!resp.success);
        assert_eq!(resp.error, Some(ErrorCode::MissingFilePath));
    }
}
