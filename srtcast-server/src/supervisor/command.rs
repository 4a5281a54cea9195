//! Construction of the ffmpeg invocation for one transcode session.
//!
//! Kept free of process plumbing so the argument layout can be unit tested.

use std::path::PathBuf;

use crate::supervisor::profile::{EncodingProfile, RateControl, VideoEncoder};

/// SRT payload size for MPEG-TS: 7 TS packets of 188 bytes.
pub const SRT_PKT_SIZE: u32 = 1316;

/// Everything needed to launch one transcode session.
#[derive(Debug, Clone)]
pub struct StreamSpec {
    /// Channel the session belongs to.
    pub channel_id: String,
    /// Media file to stream.
    pub input_path: PathBuf,
    /// Stream name, used for logging and client-facing metadata.
    pub stream_name: String,
    /// SRT listener port.
    pub port: u16,
    /// Host to bind the SRT listener on.
    pub bind_host: String,
    /// Optional output resolution, `WIDTHxHEIGHT`.
    pub resolution: Option<String>,
    /// Optional output frame rate.
    pub frame_rate: Option<u32>,
    /// Encoder and transport tuning.
    pub profile: EncodingProfile,
}

impl StreamSpec {
    /// The SRT output URL ffmpeg listens on. Latency is configured in
    /// milliseconds but the URL parameter takes microseconds; the overhead
    /// bandwidth is a percentage and the peer idle timeout stays in
    /// milliseconds.
    pub fn output_url(&self) -> String {
        format!(
            "srt://{}:{}?mode=listener&latency={}&pkt_size={}&oheadbw={}&peeridletimeo={}",
            self.bind_host,
            self.port,
            u64::from(self.profile.srt_latency_ms) * 1000,
            SRT_PKT_SIZE,
            self.profile.srt_overhead_bw,
            self.profile.srt_peer_idle_ms,
        )
    }
}

/// Build the full ffmpeg argument list for a session.
pub fn build_ffmpeg_args(spec: &StreamSpec) -> Vec<String> {
    let profile = &spec.profile;
    let mut args: Vec<String> = vec![
        "-hide_banner".into(),
        "-loglevel".into(),
        "info".into(),
        "-stats".into(),
    ];

    if profile.loop_input {
        args.push("-stream_loop".into());
        args.push("-1".into());
    }

    // Read at native speed; the output is a live feed.
    args.push("-re".into());
    args.push("-i".into());
    args.push(spec.input_path.to_string_lossy().into_owned());

    args.push("-c:v".into());
    args.push(profile.encoder.ffmpeg_name().into());

    if profile.encoder == VideoEncoder::Software {
        args.push("-preset".into());
        args.push(profile.preset.clone());
        args.push("-tune".into());
        args.push(profile.tune.clone());
        args.push("-profile:v".into());
        args.push(profile.h264_profile.clone());
    }

    args.push("-g".into());
    args.push(profile.gop_size.to_string());
    args.push("-bf".into());
    args.push(profile.b_frames.to_string());

    match profile.rate_control {
        RateControl::Cbr => {
            args.push("-b:v".into());
            args.push(profile.video_bitrate.clone());
            args.push("-minrate".into());
            args.push(profile.video_bitrate.clone());
            args.push("-maxrate".into());
            args.push(profile.video_bitrate.clone());
        }
        RateControl::Vbr => {
            if profile.encoder == VideoEncoder::Software {
                args.push("-crf".into());
                args.push(profile.crf.to_string());
            } else {
                args.push("-b:v".into());
                args.push(profile.video_bitrate.clone());
            }
            args.push("-maxrate".into());
            args.push(profile.max_bitrate.clone());
        }
    }
    args.push("-bufsize".into());
    args.push(profile.buffer_size.clone());

    if let Some(resolution) = &spec.resolution {
        args.push("-s".into());
        args.push(resolution.clone());
    }
    if let Some(fps) = spec.frame_rate {
        args.push("-r".into());
        args.push(fps.to_string());
    }

    args.push("-pix_fmt".into());
    args.push("yuv420p".into());

    args.push("-c:a".into());
    args.push("aac".into());
    args.push("-ar".into());
    args.push("48000".into());
    args.push("-ac".into());
    args.push("2".into());
    args.push("-b:a".into());
    args.push(profile.audio_bitrate.clone());

    args.push("-f".into());
    args.push("mpegts".into());
    args.push(spec.output_url());

    args
}
