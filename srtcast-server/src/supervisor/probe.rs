//! Pre-flight probes against the ffmpeg binary.

use std::path::Path;
use std::time::Duration;

use log::{debug, warn};
use tokio::process::Command;

use crate::supervisor::profile::VideoEncoder;

/// Upper bound on a single-frame encoder dry run.
const PROBE_TIMEOUT: Duration = Duration::from_secs(10);

/// Check that ffmpeg is runnable and report its version line.
pub async fn check_ffmpeg(ffmpeg_path: &str) -> Option<String> {
    let output = Command::new(ffmpeg_path)
        .arg("-version")
        .output()
        .await
        .ok()?;
    if !output.status.success() {
        warn!(
            "ffmpeg at '{}' exited with {} during version check",
            ffmpeg_path, output.status
        );
        return None;
    }
    let stdout = String::from_utf8_lossy(&output.stdout);
    stdout
        .lines()
        .next()
        .and_then(|line| line.strip_prefix("ffmpeg version "))
        .map(|rest| rest.split_whitespace().next().unwrap_or(rest).to_string())
        .or_else(|| Some("unknown".to_string()))
}

/// Dry-run the candidate encoder by encoding a single frame of the real
/// input. A bounded success/failure answer decides whether the hardware path
/// is usable; results are not cached across calls.
pub async fn probe_encoder(ffmpeg_path: &str, input: &Path, encoder: VideoEncoder) -> bool {
    let mut cmd = Command::new(ffmpeg_path);
    cmd.arg("-hide_banner")
        .arg("-v")
        .arg("error")
        .arg("-i")
        .arg(input)
        .arg("-frames:v")
        .arg("1")
        .arg("-c:v")
        .arg(encoder.ffmpeg_name())
        .arg("-f")
        .arg("null")
        .arg("-")
        .stdin(std::process::Stdio::null())
        .stdout(std::process::Stdio::null())
        .stderr(std::process::Stdio::null());

    match tokio::time::timeout(PROBE_TIMEOUT, cmd.output()).await {
        Ok(Ok(output)) => {
            debug!(
                "Encoder probe {} on {:?}: {}",
                encoder.ffmpeg_name(),
                input,
                output.status
            );
            output.status.success()
        }
        Ok(Err(e)) => {
            warn!("Encoder probe failed to run ffmpeg: {}", e);
            false
        }
        Err(_) => {
            warn!(
                "Encoder probe for {} timed out after {:?}",
                encoder.ffmpeg_name(),
                PROBE_TIMEOUT
            );
            false
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_check_ffmpeg_missing_binary() {
        let version = check_ffmpeg("/nonexistent/ffmpeg-binary").await;
        assert!(version.is_none());
    }

    #[tokio::test]
    async fn test_probe_missing_binary_is_false() {
        let ok = probe_encoder(
            "/nonexistent/ffmpeg-binary",
            Path::new("/tmp/nothing.mp4"),
            VideoEncoder::Nvenc,
        )
        .await;
        assert!(!ok);
    }
}
