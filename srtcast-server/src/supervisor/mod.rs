//! Transcode process supervisor.
//!
//! One external ffmpeg process per active channel. The supervisor owns the
//! session table, launches and tears down processes, and converts their
//! lifecycle and diagnostic output into typed [`SupervisorEvent`]s. Failures
//! never cross the monitor-task boundary as panics or errors; everything the
//! registry needs to know arrives as an event.
//!
//! Per session there are two tasks: a monitor that waits on the process and
//! emits exactly one terminal event, and a classifier that reads stderr
//! line-by-line without ever blocking the monitor's wait.

pub mod classify;
pub mod command;
pub mod probe;
pub mod profile;

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use log::{debug, error, info, warn};
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::{Child, ChildStderr, Command};
use tokio::sync::{mpsc, Mutex};
use tokio_util::sync::CancellationToken;

use classify::{classify_line, LineCategory, ProgressSnapshot};
use command::{build_ffmpeg_args, StreamSpec};
use profile::VideoEncoder;

/// Grace period after a deliberate kill before escalating to SIGKILL again.
const STOP_GRACE: Duration = Duration::from_millis(500);

/// How long `stop` waits for the monitor task to reap the session.
const REAP_TIMEOUT: Duration = Duration::from_secs(1);

/// Grace period after process death for the OS to release the SRT listener
/// port before it may be bound again.
const PORT_RELEASE_GRACE: Duration = Duration::from_millis(500);

/// Minimum spacing between emitted progress events per session.
const PROGRESS_EVENT_INTERVAL: Duration = Duration::from_secs(30);

/// Severity attached to a mid-run diagnostic event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DiagnosticSeverity {
    Warning,
    Error,
}

/// Lifecycle and health events emitted by the supervisor.
#[derive(Debug, Clone)]
pub enum SupervisorEvent {
    /// A transcode process was launched.
    Started {
        channel_id: String,
        pid: Option<u32>,
        port: u16,
    },
    /// The process exited cleanly without a deliberate stop.
    Stopped { channel_id: String },
    /// The process exited abnormally without a deliberate stop. The message
    /// is the last captured diagnostic line or the exit status.
    Failed { channel_id: String, message: String },
    /// Periodic throughput marker, rate-limited per session.
    Progress {
        channel_id: String,
        snapshot: ProgressSnapshot,
    },
    /// A downstream consumer connected to the SRT listener.
    StreamActive { channel_id: String },
    /// A mid-run error/warning line from the process. Surfaced for logging;
    /// not a state change.
    Diagnostic {
        channel_id: String,
        severity: DiagnosticSeverity,
        line: String,
    },
    /// The requested hardware encoder failed its probe and the software
    /// encoder was substituted.
    EncoderFallback {
        channel_id: String,
        requested: String,
        substituted: String,
        reason: String,
    },
}

/// Error type for supervisor operations.
#[derive(Debug, thiserror::Error)]
pub enum SupervisorError {
    /// A live session already exists for the channel.
    #[error("a transcode session is already running for channel {0}")]
    SessionExists(String),

    /// The input file does not exist.
    #[error("input file not found: {0}")]
    InputNotFound(PathBuf),

    /// Spawning the transcode process failed.
    #[error("failed to launch transcoder: {0}")]
    SpawnFailed(#[from] std::io::Error),
}

/// Externally visible snapshot of a live session.
#[derive(Debug, Clone)]
pub struct SessionInfo {
    pub channel_id: String,
    pub pid: Option<u32>,
    pub input_path: PathBuf,
    pub port: u16,
    pub stream_name: String,
    pub started_at: DateTime<Utc>,
    pub uptime_secs: u64,
}

/// The live binding between a channel and its external process. Exists only
/// while the process is launching or running; the monitor task deletes it
/// the moment the process is confirmed dead.
struct Session {
    spec: StreamSpec,
    pid: Option<u32>,
    started_at: Instant,
    started_at_utc: DateTime<Utc>,
    /// Set under the session lock by a deliberate stop; suppresses the
    /// terminal event the monitor would otherwise emit.
    intentionally_stopped: bool,
    /// Last error/warning line captured from stderr.
    last_diag_line: Option<String>,
    cancel: CancellationToken,
}

type SessionTable = Arc<Mutex<HashMap<String, Session>>>;

/// Supervisor for all transcode processes.
pub struct TranscodeSupervisor {
    ffmpeg_path: String,
    hardware_fallback: bool,
    sessions: SessionTable,
    events: mpsc::UnboundedSender<SupervisorEvent>,
}

impl TranscodeSupervisor {
    /// Create a supervisor. Events flow to the given sender for the lifetime
    /// of the supervisor.
    pub fn new(
        ffmpeg_path: String,
        hardware_fallback: bool,
        events: mpsc::UnboundedSender<SupervisorEvent>,
    ) -> Self {
        Self {
            ffmpeg_path,
            hardware_fallback,
            sessions: Arc::new(Mutex::new(HashMap::new())),
            events,
        }
    }

    /// Launch a transcode session for a channel.
    ///
    /// Rejects the request if a session already exists for the channel or
    /// the input file is missing. When a hardware encoder is requested and
    /// fallback is enabled, the encoder is dry-run first; on failure the
    /// software encoder is substituted and an [`SupervisorEvent::EncoderFallback`]
    /// is emitted.
    pub async fn start(&self, mut spec: StreamSpec) -> Result<SessionInfo, SupervisorError> {
        if !spec.input_path.exists() {
            return Err(SupervisorError::InputNotFound(spec.input_path.clone()));
        }

        if spec.profile.encoder.is_hardware() && self.hardware_fallback {
            let requested = spec.profile.encoder;
            if !probe::probe_encoder(&self.ffmpeg_path, &spec.input_path, requested).await {
                let reason = format!(
                    "single-frame probe with {} failed or timed out",
                    requested.ffmpeg_name()
                );
                warn!(
                    "Channel {}: {}; falling back to {}",
                    spec.channel_id,
                    reason,
                    VideoEncoder::Software.ffmpeg_name()
                );
                let _ = self.events.send(SupervisorEvent::EncoderFallback {
                    channel_id: spec.channel_id.clone(),
                    requested: requested.ffmpeg_name().to_string(),
                    substituted: VideoEncoder::Software.ffmpeg_name().to_string(),
                    reason,
                });
                spec.profile.encoder = VideoEncoder::Software;
            }
        }

        let args = build_ffmpeg_args(&spec);
        debug!("Launching transcoder: {} {}", self.ffmpeg_path, args.join(" "));

        let mut command = Command::new(&self.ffmpeg_path);
        command.args(&args);
        self.spawn_session(spec, command).await
    }

    /// Insert the session and spawn its monitor and classifier tasks. The
    /// existence check, insertion, and spawn happen under one lock so two
    /// concurrent starts cannot both launch a process for the same channel.
    async fn spawn_session(
        &self,
        spec: StreamSpec,
        mut command: Command,
    ) -> Result<SessionInfo, SupervisorError> {
        let channel_id = spec.channel_id.clone();
        let mut sessions = self.sessions.lock().await;
        if sessions.contains_key(&channel_id) {
            return Err(SupervisorError::SessionExists(channel_id));
        }

        command
            .stdin(std::process::Stdio::null())
            .stdout(std::process::Stdio::null())
            .stderr(std::process::Stdio::piped())
            .kill_on_drop(true);

        let mut child = command.spawn()?;
        let pid = child.id();
        let stderr = child.stderr.take();
        let cancel = CancellationToken::new();
        let started_at_utc = Utc::now();

        let session = Session {
            spec: spec.clone(),
            pid,
            started_at: Instant::now(),
            started_at_utc,
            intentionally_stopped: false,
            last_diag_line: None,
            cancel: cancel.clone(),
        };
        sessions.insert(channel_id.clone(), session);
        drop(sessions);

        if let Some(stderr) = stderr {
            tokio::spawn(classify_stderr(
                Arc::clone(&self.sessions),
                self.events.clone(),
                channel_id.clone(),
                stderr,
            ));
        }
        tokio::spawn(monitor_process(
            Arc::clone(&self.sessions),
            self.events.clone(),
            channel_id.clone(),
            child,
            cancel,
        ));

        info!(
            "Transcode session started for channel {} (pid {:?}, port {})",
            channel_id, pid, spec.port
        );
        let _ = self.events.send(SupervisorEvent::Started {
            channel_id: channel_id.clone(),
            pid,
            port: spec.port,
        });

        Ok(SessionInfo {
            channel_id,
            pid,
            input_path: spec.input_path,
            port: spec.port,
            stream_name: spec.stream_name,
            started_at: started_at_utc,
            uptime_secs: 0,
        })
    }

    /// Stop a session. Idempotent: stopping a channel with no session is a
    /// no-op. Marks the stop as intentional under the session lock, cancels
    /// the process, waits (bounded) for the monitor to reap the session,
    /// then waits a short grace period for the OS to release the port.
    pub async fn stop(&self, channel_id: &str) {
        let cancel = {
            let mut sessions = self.sessions.lock().await;
            match sessions.get_mut(channel_id) {
                Some(session) => {
                    session.intentionally_stopped = true;
                    session.cancel.clone()
                }
                None => return,
            }
        };

        info!("Stopping transcode session for channel {}", channel_id);
        cancel.cancel();

        let deadline = Instant::now() + REAP_TIMEOUT;
        while self.is_running(channel_id).await {
            if Instant::now() >= deadline {
                warn!(
                    "Session for channel {} not reaped within {:?}",
                    channel_id, REAP_TIMEOUT
                );
                break;
            }
            tokio::time::sleep(Duration::from_millis(50)).await;
        }

        tokio::time::sleep(PORT_RELEASE_GRACE).await;
    }

    /// Stop every session. Used for bulk shutdown.
    pub async fn stop_all(&self) {
        let ids: Vec<String> = self.sessions.lock().await.keys().cloned().collect();
        for id in ids {
            self.stop(&id).await;
        }
    }

    /// Whether a live session exists for the channel.
    pub async fn is_running(&self, channel_id: &str) -> bool {
        self.sessions.lock().await.contains_key(channel_id)
    }

    /// Snapshot of one session.
    pub async fn get_info(&self, channel_id: &str) -> Option<SessionInfo> {
        self.sessions.lock().await.get(channel_id).map(session_info)
    }

    /// Snapshot of all sessions.
    pub async fn list_info(&self) -> Vec<SessionInfo> {
        self.sessions.lock().await.values().map(session_info).collect()
    }
}

fn session_info(session: &Session) -> SessionInfo {
    SessionInfo {
        channel_id: session.spec.channel_id.clone(),
        pid: session.pid,
        input_path: session.spec.input_path.clone(),
        port: session.spec.port,
        stream_name: session.spec.stream_name.clone(),
        started_at: session.started_at_utc,
        uptime_secs: session.started_at.elapsed().as_secs(),
    }
}

/// Wait for the process to exit, or kill it on cancellation. Emits exactly
/// one terminal event unless the stop was deliberate, then deletes the
/// session entry. The intentional-stop flag is read under the same lock that
/// deletes the session, so a deliberate stop can never be misreported as a
/// crash no matter how the exit and the stop interleave.
async fn monitor_process(
    sessions: SessionTable,
    events: mpsc::UnboundedSender<SupervisorEvent>,
    channel_id: String,
    mut child: Child,
    cancel: CancellationToken,
) {
    let status = tokio::select! {
        status = child.wait() => status,
        _ = cancel.cancelled() => {
            let _ = child.start_kill();
            match tokio::time::timeout(STOP_GRACE, child.wait()).await {
                Ok(status) => status,
                Err(_) => {
                    let _ = child.kill().await;
                    child.wait().await
                }
            }
        }
    };

    let (intentional, last_line) = {
        let mut sessions = sessions.lock().await;
        match sessions.remove(&channel_id) {
            Some(session) => (session.intentionally_stopped, session.last_diag_line),
            // Session already gone; treat as deliberate.
            None => (true, None),
        }
    };

    if intentional {
        debug!("Transcoder for channel {} stopped deliberately", channel_id);
        return;
    }

    match status {
        Ok(status) if status.success() => {
            info!("Transcoder for channel {} exited cleanly", channel_id);
            let _ = events.send(SupervisorEvent::Stopped { channel_id });
        }
        Ok(status) => {
            let message =
                last_line.unwrap_or_else(|| format!("transcoder exited with {status}"));
            warn!("Transcoder for channel {} failed: {}", channel_id, message);
            let _ = events.send(SupervisorEvent::Failed {
                channel_id,
                message,
            });
        }
        Err(e) => {
            error!("Waiting on transcoder for channel {} failed: {}", channel_id, e);
            let _ = events.send(SupervisorEvent::Failed {
                channel_id,
                message: format!("failed to wait on transcoder: {e}"),
            });
        }
    }
}

/// Read the process's stderr line-by-line and turn recognized lines into
/// events. Runs independently of the monitor's wait on the process; when the
/// process dies the stream ends and the task exits.
async fn classify_stderr(
    sessions: SessionTable,
    events: mpsc::UnboundedSender<SupervisorEvent>,
    channel_id: String,
    stderr: ChildStderr,
) {
    let mut lines = BufReader::new(stderr).lines();
    // First progress marker goes out immediately, then rate-limited.
    let mut last_progress: Option<Instant> = None;

    while let Ok(Some(line)) = lines.next_line().await {
        debug!("[ffmpeg {}] {}", channel_id, line);

        match classify_line(&line) {
            LineCategory::ViewerConnected => {
                info!("Channel {}: consumer connected to SRT output", channel_id);
                let _ = events.send(SupervisorEvent::StreamActive {
                    channel_id: channel_id.clone(),
                });
            }
            LineCategory::Progress(snapshot) => {
                let due = last_progress
                    .map(|t| t.elapsed() >= PROGRESS_EVENT_INTERVAL)
                    .unwrap_or(true);
                if due {
                    last_progress = Some(Instant::now());
                    let _ = events.send(SupervisorEvent::Progress {
                        channel_id: channel_id.clone(),
                        snapshot,
                    });
                }
            }
            LineCategory::Error => {
                if let Some(session) = sessions.lock().await.get_mut(&channel_id) {
                    session.last_diag_line = Some(line.clone());
                }
                let _ = events.send(SupervisorEvent::Diagnostic {
                    channel_id: channel_id.clone(),
                    severity: DiagnosticSeverity::Error,
                    line,
                });
            }
            LineCategory::Warning => {
                let _ = events.send(SupervisorEvent::Diagnostic {
                    channel_id: channel_id.clone(),
                    severity: DiagnosticSeverity::Warning,
                    line,
                });
            }
            LineCategory::Noise => {}
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Settings;
    use profile::EncodingProfile;

    fn test_spec(channel_id: &str, input: &std::path::Path) -> StreamSpec {
        StreamSpec {
            channel_id: channel_id.to_string(),
            input_path: input.to_path_buf(),
            stream_name: "SRT_SERVER_test".to_string(),
            port: 9000,
            bind_host: "0.0.0.0".to_string(),
            resolution: None,
            frame_rate: None,
            profile: EncodingProfile::from_settings(&Settings::default()),
        }
    }

    fn supervisor() -> (TranscodeSupervisor, mpsc::UnboundedReceiver<SupervisorEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (
            TranscodeSupervisor::new("/nonexistent/ffmpeg".to_string(), false, tx),
            rx,
        )
    }

    async fn next_event(
        rx: &mut mpsc::UnboundedReceiver<SupervisorEvent>,
    ) -> Option<SupervisorEvent> {
        tokio::time::timeout(Duration::from_secs(5), rx.recv())
            .await
            .ok()
            .flatten()
    }

    #[tokio::test]
    async fn test_start_rejects_missing_input() {
        let (supervisor, _rx) = supervisor();
        let spec = test_spec("c1", std::path::Path::new("/does/not/exist.mp4"));
        let err = supervisor.start(spec).await.unwrap_err();
        assert!(matches!(err, SupervisorError::InputNotFound(_)));
        assert!(!supervisor.is_running("c1").await);
    }

    #[tokio::test]
    async fn test_start_spawn_failure_leaves_no_session() {
        let (supervisor, _rx) = supervisor();
        let input = tempfile::NamedTempFile::new().unwrap();
        let spec = test_spec("c1", input.path());
        let err = supervisor.start(spec).await.unwrap_err();
        assert!(matches!(err, SupervisorError::SpawnFailed(_)));
        assert!(!supervisor.is_running("c1").await);
    }

    #[tokio::test]
    async fn test_stop_unknown_session_is_noop() {
        let (supervisor, _rx) = supervisor();
        // Must return promptly without error.
        supervisor.stop("no-such-channel").await;
        assert!(!supervisor.is_running("no-such-channel").await);
    }

    #[tokio::test]
    async fn test_clean_exit_emits_stopped() {
        let (supervisor, mut rx) = supervisor();
        let input = tempfile::NamedTempFile::new().unwrap();
        let spec = test_spec("c1", input.path());

        let mut command = Command::new("true");
        command.arg("ignored");
        supervisor.spawn_session(spec, command).await.unwrap();

        assert!(matches!(
            next_event(&mut rx).await,
            Some(SupervisorEvent::Started { .. })
        ));
        assert!(matches!(
            next_event(&mut rx).await,
            Some(SupervisorEvent::Stopped { .. })
        ));
        assert!(!supervisor.is_running("c1").await);
    }

    #[tokio::test]
    async fn test_abnormal_exit_emits_failed() {
        let (supervisor, mut rx) = supervisor();
        let input = tempfile::NamedTempFile::new().unwrap();
        let spec = test_spec("c1", input.path());

        let mut command = Command::new("sh");
        command.arg("-c").arg("exit 3");
        supervisor.spawn_session(spec, command).await.unwrap();

        assert!(matches!(
            next_event(&mut rx).await,
            Some(SupervisorEvent::Started { .. })
        ));
        match next_event(&mut rx).await {
            Some(SupervisorEvent::Failed { channel_id, .. }) => assert_eq!(channel_id, "c1"),
            other => panic!("expected Failed, got {other:?}"),
        }
        assert!(!supervisor.is_running("c1").await);
    }

    #[tokio::test]
    async fn test_start_then_immediate_stop_suppresses_terminal_event() {
        let (supervisor, mut rx) = supervisor();
        let input = tempfile::NamedTempFile::new().unwrap();
        let spec = test_spec("c1", input.path());

        let mut command = Command::new("sleep");
        command.arg("30");
        supervisor.spawn_session(spec, command).await.unwrap();
        assert!(supervisor.is_running("c1").await);

        supervisor.stop("c1").await;
        assert!(!supervisor.is_running("c1").await);

        // Started only; the kill must not surface as Stopped or Failed.
        assert!(matches!(
            next_event(&mut rx).await,
            Some(SupervisorEvent::Started { .. })
        ));
        tokio::time::sleep(Duration::from_millis(200)).await;
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_second_start_rejected_while_running() {
        let (supervisor, _rx) = supervisor();
        let input = tempfile::NamedTempFile::new().unwrap();

        let mut command = Command::new("sleep");
        command.arg("30");
        supervisor
            .spawn_session(test_spec("c1", input.path()), command)
            .await
            .unwrap();

        let mut command = Command::new("sleep");
        command.arg("30");
        let err = supervisor
            .spawn_session(test_spec("c1", input.path()), command)
            .await
            .unwrap_err();
        assert!(matches!(err, SupervisorError::SessionExists(_)));

        supervisor.stop("c1").await;
    }

    #[tokio::test]
    async fn test_stop_all_reaps_every_session() {
        let (supervisor, _rx) = supervisor();
        let input = tempfile::NamedTempFile::new().unwrap();

        for id in ["a", "b"] {
            let mut command = Command::new("sleep");
            command.arg("30");
            supervisor
                .spawn_session(test_spec(id, input.path()), command)
                .await
                .unwrap();
        }
        assert_eq!(supervisor.list_info().await.len(), 2);

        supervisor.stop_all().await;
        assert!(supervisor.list_info().await.is_empty());
    }

    #[tokio::test]
    async fn test_session_info_snapshot() {
        let (supervisor, _rx) = supervisor();
        let input = tempfile::NamedTempFile::new().unwrap();

        let mut command = Command::new("sleep");
        command.arg("30");
        supervisor
            .spawn_session(test_spec("c1", input.path()), command)
            .await
            .unwrap();

        let info = supervisor.get_info("c1").await.unwrap();
        assert_eq!(info.channel_id, "c1");
        assert_eq!(info.port, 9000);
        assert!(info.pid.is_some());

        supervisor.stop("c1").await;
        assert!(supervisor.get_info("c1").await.is_none());
    }
}
