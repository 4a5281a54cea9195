//! Control engine: the glue between the protocol surface, the channel
//! registry, and the transcode supervisor.
//!
//! Every protocol operation is a method returning a ready-to-send
//! [`Response`]. The engine also runs two background loops: the supervisor
//! event loop that folds process lifecycle events into registry state, and a
//! reconciliation watchdog that corrects channels whose session silently
//! disappeared.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use log::{debug, error, info, warn};
use serde_json::json;
use tokio::sync::mpsc;

use srtcast_protocol::{actions, ChannelStatusUpdate, EncoderFallbackNotice, ErrorCode, Request, Response};

use crate::config::Settings;
use crate::media;
use crate::registry::{Channel, ChannelRegistry, ChannelStatus, RegistryError};
use crate::supervisor::classify::is_transport_disconnect;
use crate::supervisor::command::StreamSpec;
use crate::supervisor::profile::EncodingProfile;
use crate::supervisor::{DiagnosticSeverity, SessionInfo, SupervisorError, SupervisorEvent, TranscodeSupervisor};
use crate::web::state::ClientRegistry;

/// Fixed backoff before restarting a crashed transcoder.
const RESTART_DELAY: Duration = Duration::from_secs(10);

/// Interval of the registry/supervisor reconciliation sweep.
const WATCHDOG_INTERVAL: Duration = Duration::from_secs(5);

/// Orchestrates channels, transcode sessions, and client notifications.
pub struct Engine {
    settings: Settings,
    registry: Arc<ChannelRegistry>,
    supervisor: Arc<TranscodeSupervisor>,
    clients: Arc<ClientRegistry>,
    server_ip: String,
}

impl Engine {
    pub fn new(
        settings: Settings,
        registry: Arc<ChannelRegistry>,
        supervisor: Arc<TranscodeSupervisor>,
        clients: Arc<ClientRegistry>,
    ) -> Self {
        let server_ip = detect_server_ip();
        info!("Advertising SRT URLs with server address {}", server_ip);
        Self {
            settings,
            registry,
            supervisor,
            clients,
            server_ip,
        }
    }

    pub fn registry(&self) -> &Arc<ChannelRegistry> {
        &self.registry
    }

    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    /// The SRT URL clients should tune to for a given port.
    pub fn srt_url(&self, port: u16) -> String {
        format!("srt://{}:{}", self.server_ip, port)
    }

    /// `play_video`: start playback of a file. An explicit `channelId`
    /// targets that channel; without one the caller's own channel is used,
    /// created on first use. An already-running session on the channel is
    /// replaced by the new file.
    pub async fn play_video(&self, client_name: &str, request: &Request) -> Response {
        let Some(file_path) = request.file_path.as_deref().filter(|p| !p.is_empty()) else {
            return Response::error(
                actions::PLAY_VIDEO,
                ErrorCode::MissingFilePath,
                "filePath is required",
            );
        };

        let input = media::resolve_media_path(&self.settings.server.videos_dir, file_path);
        if !input.exists() {
            return Response::error(
                actions::PLAY_VIDEO,
                ErrorCode::FileNotFound,
                format!("file not found: {file_path}"),
            );
        }

        let channel = match request.channel_id.as_deref().filter(|c| !c.is_empty()) {
            Some(channel_id) => match self.registry.get(channel_id).await {
                Ok(channel) => channel,
                Err(e) => {
                    return Response::error(
                        actions::PLAY_VIDEO,
                        ErrorCode::ChannelNotFound,
                        e.to_string(),
                    )
                }
            },
            None => match self.channel_for_client(client_name).await {
                Ok(channel) => channel,
                Err(e) => {
                    return Response::error(
                        actions::PLAY_VIDEO,
                        ErrorCode::ChannelCreateError,
                        e.to_string(),
                    )
                }
            },
        };

        match self
            .start_session(&channel, input, request.parameters.as_ref())
            .await
        {
            Ok(info) => Response::ok(
                actions::PLAY_STARTED,
                json!({
                    "channelId": channel.id,
                    "label": channel.label,
                    "streamName": channel.srt_stream_name,
                    "srtPort": channel.srt_port,
                    "srtUrl": self.srt_url(channel.srt_port),
                    "filePath": file_path,
                    "pid": info.pid,
                }),
            ),
            Err(e) => Response::error(actions::PLAY_VIDEO, ErrorCode::PlayError, e.to_string()),
        }
    }

    /// `play`: start playback on an existing channel. The file comes from
    /// the request, falling back to the channel's current or configured path.
    pub async fn play(&self, request: &Request) -> Response {
        let Some(channel_id) = request.channel_id.as_deref().filter(|c| !c.is_empty()) else {
            return Response::error(
                actions::PLAY,
                ErrorCode::InvalidMessage,
                "channelId is required",
            );
        };
        let channel = match self.registry.get(channel_id).await {
            Ok(channel) => channel,
            Err(e) => return Response::error(actions::PLAY, ErrorCode::ChannelNotFound, e.to_string()),
        };

        let file_path = request
            .file_path
            .clone()
            .filter(|p| !p.is_empty())
            .or_else(|| Some(channel.current_file.clone()).filter(|p| !p.is_empty()))
            .or_else(|| Some(channel.video_path.clone()).filter(|p| !p.is_empty()));
        let Some(file_path) = file_path else {
            return Response::error(
                actions::PLAY,
                ErrorCode::MissingFilePath,
                "no file for channel; supply filePath",
            );
        };

        let input = media::resolve_media_path(&self.settings.server.videos_dir, &file_path);
        if !input.exists() {
            return Response::error(
                actions::PLAY,
                ErrorCode::FileNotFound,
                format!("file not found: {file_path}"),
            );
        }

        match self
            .start_session(&channel, input, request.parameters.as_ref())
            .await
        {
            Ok(_) => Response::ok(
                actions::PLAY_STARTED,
                json!({
                    "channelId": channel.id,
                    "streamName": channel.srt_stream_name,
                    "srtPort": channel.srt_port,
                    "srtUrl": self.srt_url(channel.srt_port),
                    "filePath": file_path,
                }),
            ),
            Err(e) => Response::error(actions::PLAY, ErrorCode::PlayError, e.to_string()),
        }
    }

    /// `stop`: stop playback on a channel. Stopping a channel that does not
    /// exist, or has no running session, succeeds as a no-op.
    pub async fn stop(&self, request: &Request) -> Response {
        let Some(channel_id) = request.channel_id.as_deref().filter(|c| !c.is_empty()) else {
            return Response::ok_message(actions::PLAY_STOPPED, "nothing to stop");
        };
        self.stop_channel(channel_id).await
    }

    /// Stop a channel's session by id. Unknown ids are a successful no-op.
    pub async fn stop_channel(&self, channel_id: &str) -> Response {
        let known = self.registry.get(channel_id).await.is_ok();
        if known {
            let _ = self
                .registry
                .set_status(channel_id, ChannelStatus::Stopping)
                .await;
            self.broadcast_channel_status(channel_id).await;
        }

        self.supervisor.stop(channel_id).await;

        if known {
            let _ = self
                .registry
                .set_status(channel_id, ChannelStatus::Inactive)
                .await;
            self.broadcast_channel_status(channel_id).await;
        } else {
            debug!("Stop requested for unknown channel {}; ignoring", channel_id);
        }

        Response::ok(actions::PLAY_STOPPED, json!({ "channelId": channel_id }))
    }

    /// `status`: one channel's status, or all channels when no id is given.
    pub async fn status(&self, request: &Request) -> Response {
        match request.channel_id.as_deref().filter(|c| !c.is_empty()) {
            Some(channel_id) => match self.registry.get(channel_id).await {
                Ok(channel) => {
                    let uptime = self
                        .supervisor
                        .get_info(channel_id)
                        .await
                        .map(|info| info.uptime_secs)
                        .unwrap_or(0);
                    Response::ok(
                        actions::CHANNEL_STATUS,
                        json!({ "channel": channel, "uptimeSecs": uptime }),
                    )
                }
                Err(e) => Response::error(
                    actions::CHANNEL_STATUS,
                    ErrorCode::ChannelNotFound,
                    e.to_string(),
                ),
            },
            None => {
                let channels = self.registry.list().await;
                let active = channels
                    .iter()
                    .filter(|ch| ch.status == ChannelStatus::Active)
                    .count();
                Response::ok(
                    actions::ALL_CHANNELS_STATUS,
                    json!({
                        "channels": channels,
                        "count": channels.len(),
                        "activeCount": active,
                    }),
                )
            }
        }
    }

    /// `list_channels`: snapshot of every channel.
    pub async fn list_channels(&self) -> Response {
        let channels = self.registry.list().await;
        Response::ok(
            actions::CHANNELS_LIST,
            json!({ "channels": channels, "count": channels.len() }),
        )
    }

    /// `list_files`: playable files for a channel. With a `channelId` the
    /// listing covers the directory of the channel's configured path; a
    /// channel without one, or a request without a `channelId`, falls back
    /// to the server's videos directory.
    pub async fn list_files(&self, request: &Request) -> Response {
        let dir = match request.channel_id.as_deref().filter(|c| !c.is_empty()) {
            Some(channel_id) => match self.registry.get(channel_id).await {
                Ok(channel) => self.channel_media_dir(&channel),
                Err(e) => {
                    return Response::error(
                        actions::LIST_FILES,
                        ErrorCode::ChannelNotFound,
                        e.to_string(),
                    )
                }
            },
            None => self.settings.server.videos_dir.clone(),
        };

        let listing_dir = dir.clone();
        let files = tokio::task::spawn_blocking(move || media::list_video_files(&listing_dir)).await;
        match files {
            Ok(files) => Response::ok(
                actions::FILES_LIST,
                json!({
                    "files": files,
                    "count": files.len(),
                    "directory": dir,
                }),
            ),
            Err(e) => Response::error(actions::LIST_FILES, ErrorCode::ListError, e.to_string()),
        }
    }

    /// Directory a channel's files live in: the parent of its configured
    /// path, or the server's videos directory when none is set.
    fn channel_media_dir(&self, channel: &Channel) -> PathBuf {
        if channel.video_path.is_empty() {
            return self.settings.server.videos_dir.clone();
        }
        std::path::Path::new(&channel.video_path)
            .parent()
            .filter(|p| !p.as_os_str().is_empty())
            .map(std::path::Path::to_path_buf)
            .unwrap_or_else(|| self.settings.server.videos_dir.clone())
    }

    /// Create a channel. Used by the REST surface.
    pub async fn add_channel(
        &self,
        label: &str,
        video_path: &str,
        stream_name: Option<&str>,
    ) -> Result<Channel, RegistryError> {
        self.registry.add(label, video_path, stream_name).await
    }

    /// Update a channel's metadata. Empty strings keep the current value.
    pub async fn update_channel(
        &self,
        id: &str,
        label: &str,
        video_path: &str,
        stream_name: &str,
    ) -> Result<Channel, RegistryError> {
        let channel = self.registry.update(id, label, video_path, stream_name).await?;
        self.broadcast_channel_status(id).await;
        Ok(channel)
    }

    /// Remove a channel, force-stopping any live session first.
    pub async fn remove_channel(&self, id: &str) -> Result<(), RegistryError> {
        self.supervisor.stop(id).await;
        self.registry.remove(id).await
    }

    /// Start playback on a channel using its configured or last-played file.
    pub async fn start_channel(&self, channel_id: &str) -> Response {
        let request = Request {
            action: actions::PLAY.to_string(),
            channel_id: Some(channel_id.to_string()),
            ..Request::default()
        };
        self.play(&request).await
    }

    /// Resolve the caller's channel, creating it on first use. The channel
    /// label is the client's display name; the stream name takes the
    /// configured prefix.
    async fn channel_for_client(&self, client_name: &str) -> Result<Channel, RegistryError> {
        if let Some(channel) = self.registry.find_by_label(client_name).await {
            return Ok(channel);
        }
        let stream_name = format!("{}{}", self.settings.server.stream_prefix, client_name);
        self.registry
            .add(client_name, "", Some(&stream_name))
            .await
    }

    /// Replace whatever runs on the channel with a session for `input`.
    async fn start_session(
        &self,
        channel: &Channel,
        input: PathBuf,
        parameters: Option<&serde_json::Map<String, serde_json::Value>>,
    ) -> Result<SessionInfo, SupervisorError> {
        // Idempotent when no session exists; otherwise waits for teardown
        // and the port-release grace before relaunching on the same port.
        self.supervisor.stop(&channel.id).await;

        let _ = self
            .registry
            .set_status(&channel.id, ChannelStatus::Starting)
            .await;
        self.broadcast_channel_status(&channel.id).await;

        let mut profile = EncodingProfile::from_settings(&self.settings);
        if let Some(params) = parameters {
            profile.apply_overrides(params);
        }

        let spec = StreamSpec {
            channel_id: channel.id.clone(),
            input_path: input.clone(),
            stream_name: channel.srt_stream_name.clone(),
            port: channel.srt_port,
            bind_host: self.settings.server.bind_host.clone(),
            resolution: Some(channel.resolution.clone()),
            frame_rate: Some(channel.frame_rate),
            profile,
        };

        match self.supervisor.start(spec).await {
            Ok(info) => {
                let _ = self
                    .registry
                    .set_current_file(&channel.id, &input.to_string_lossy())
                    .await;
                Ok(info)
            }
            Err(e) => {
                let _ = self
                    .registry
                    .set_status(&channel.id, ChannelStatus::Inactive)
                    .await;
                self.broadcast_channel_status(&channel.id).await;
                Err(e)
            }
        }
    }

    /// Consume supervisor events until the channel closes.
    pub async fn run_event_loop(
        self: Arc<Self>,
        mut events: mpsc::UnboundedReceiver<SupervisorEvent>,
    ) {
        while let Some(event) = events.recv().await {
            Arc::clone(&self).handle_event(event).await;
        }
        info!("Supervisor event stream closed; event loop exiting");
    }

    /// Fold one supervisor event into registry state and client
    /// notifications.
    async fn handle_event(self: Arc<Self>, event: SupervisorEvent) {
        match event {
            SupervisorEvent::Started { channel_id, pid, port } => {
                info!(
                    "Channel {} transcoder running (pid {:?}, port {})",
                    channel_id, pid, port
                );
                let _ = self.registry.set_status(&channel_id, ChannelStatus::Active).await;
                self.broadcast_channel_status(&channel_id).await;
            }
            SupervisorEvent::StreamActive { channel_id } => {
                info!("Channel {} has a connected consumer", channel_id);
            }
            SupervisorEvent::Progress { channel_id, snapshot } => {
                let uptime = self
                    .supervisor
                    .get_info(&channel_id)
                    .await
                    .map(|info| info.uptime_secs)
                    .unwrap_or(0);
                if let Ok(channel) = self.registry.get(&channel_id).await {
                    let mut stats = channel.stats;
                    stats.frames_processed = snapshot.frame;
                    stats.bytes_sent = snapshot.size_kb * 1024;
                    stats.uptime_secs = uptime;
                    let _ = self.registry.update_stats(&channel_id, stats).await;
                }
                debug!(
                    "Channel {} progress: frame {} at {} fps, {}",
                    channel_id, snapshot.frame, snapshot.fps, snapshot.bitrate
                );
            }
            SupervisorEvent::Stopped { channel_id } => {
                info!("Channel {} transcoder finished", channel_id);
                let _ = self.registry.set_status(&channel_id, ChannelStatus::Inactive).await;
                self.broadcast_channel_status(&channel_id).await;
            }
            SupervisorEvent::Failed { channel_id, message } => {
                if is_transport_disconnect(&message) {
                    // The consumer went away; the channel is simply idle.
                    info!(
                        "Channel {} output disconnected ({}); back to inactive",
                        channel_id, message
                    );
                    let _ = self.registry.set_status(&channel_id, ChannelStatus::Inactive).await;
                    self.broadcast_channel_status(&channel_id).await;
                } else {
                    error!("Channel {} transcoder failed: {}", channel_id, message);
                    let _ = self.registry.record_error(&channel_id, &message).await;
                    self.broadcast_channel_status(&channel_id).await;
                    if self.settings.server.auto_restart {
                        self.schedule_restart(channel_id);
                    }
                }
            }
            SupervisorEvent::Diagnostic { channel_id, severity, line } => match severity {
                DiagnosticSeverity::Error => {
                    warn!("Channel {} transcoder reported: {}", channel_id, line)
                }
                DiagnosticSeverity::Warning => {
                    debug!("Channel {} transcoder warning: {}", channel_id, line)
                }
            },
            SupervisorEvent::EncoderFallback {
                channel_id,
                requested,
                substituted,
                reason,
            } => {
                warn!(
                    "Channel {}: encoder {} unusable, using {} ({})",
                    channel_id, requested, substituted, reason
                );
                let notice = EncoderFallbackNotice {
                    channel_id,
                    requested,
                    substituted,
                    reason,
                };
                if let Ok(data) = serde_json::to_value(&notice) {
                    let event = Response::ok(actions::WARNING, data);
                    self.clients.broadcast(&event.to_json()).await;
                }
            }
        }
    }

    /// Queue a restart attempt after the fixed backoff. The attempt is
    /// abandoned if the channel recovered, disappeared, or has no playable
    /// file by the time the backoff expires.
    fn schedule_restart(self: &Arc<Self>, channel_id: String) {
        info!(
            "Scheduling restart of channel {} in {:?}",
            channel_id, RESTART_DELAY
        );
        let engine = Arc::clone(self);
        tokio::spawn(async move {
            tokio::time::sleep(RESTART_DELAY).await;
            engine.try_restart(&channel_id).await;
        });
    }

    async fn try_restart(&self, channel_id: &str) {
        let channel = match self.registry.get(channel_id).await {
            Ok(channel) => channel,
            Err(_) => return,
        };
        if channel.status != ChannelStatus::Error {
            debug!(
                "Channel {} is {} now; skipping restart",
                channel_id,
                channel.status.as_str()
            );
            return;
        }

        let path = if !channel.current_file.is_empty() {
            channel.current_file.clone()
        } else if !channel.video_path.is_empty() {
            channel.video_path.clone()
        } else {
            debug!("Channel {} has no file to restart with", channel_id);
            return;
        };
        let input = media::resolve_media_path(&self.settings.server.videos_dir, &path);
        if !input.exists() {
            warn!(
                "Not restarting channel {}: {} no longer exists",
                channel_id, path
            );
            return;
        }

        info!("Restarting channel {} with {}", channel_id, path);
        match self.start_session(&channel, input, None).await {
            Ok(_) => {
                let _ = self.registry.record_restart(channel_id).await;
            }
            Err(e) => warn!("Restart of channel {} failed: {}", channel_id, e),
        }
    }

    /// Periodically reconcile registry state against live sessions.
    pub async fn run_watchdog(self: Arc<Self>) {
        let mut interval = tokio::time::interval(WATCHDOG_INTERVAL);
        loop {
            interval.tick().await;
            self.reconcile_once().await;
        }
    }

    /// One reconciliation sweep: any channel marked active without a live
    /// session is forced back to inactive and the correction is broadcast.
    pub async fn reconcile_once(&self) {
        for channel in self.registry.list_active().await {
            if !self.supervisor.is_running(&channel.id).await {
                warn!(
                    "Channel {} marked active but has no session; correcting",
                    channel.id
                );
                let _ = self
                    .registry
                    .set_status(&channel.id, ChannelStatus::Inactive)
                    .await;
                self.broadcast_channel_status(&channel.id).await;
            }
        }
    }

    /// Broadcast the channel's current status to every connected client.
    pub async fn broadcast_channel_status(&self, channel_id: &str) {
        let Ok(channel) = self.registry.get(channel_id).await else {
            return;
        };
        let update = ChannelStatusUpdate {
            channel_id: channel.id.clone(),
            status: channel.status.as_str().to_string(),
            current_file: Some(channel.current_file.clone()).filter(|f| !f.is_empty()),
            srt_port: channel.srt_port,
        };
        if let Ok(data) = serde_json::to_value(&update) {
            let event = Response::ok(actions::CHANNEL_STATUS, data);
            self.clients.broadcast(&event.to_json()).await;
        }
    }
}

/// Address to advertise in SRT URLs: the source address the host would use
/// for outbound traffic, falling back to `localhost`. No packets are sent.
fn detect_server_ip() -> String {
    std::net::UdpSocket::bind(("0.0.0.0", 0))
        .and_then(|socket| {
            socket.connect(("8.8.8.8", 80))?;
            socket.local_addr()
        })
        .map(|addr| addr.ip().to_string())
        .unwrap_or_else(|_| "localhost".to_string())
}
