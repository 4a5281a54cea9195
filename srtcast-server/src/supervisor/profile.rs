//! Encoding profile: the per-session encoder and transport tuning values.

use serde_json::Value;

use crate::config::Settings;

/// Video encoder selection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VideoEncoder {
    /// libx264 software encoding.
    Software,
    /// NVIDIA NVENC.
    Nvenc,
    /// Intel Quick Sync.
    Qsv,
    /// VA-API.
    Vaapi,
    /// AMD AMF.
    Amf,
}

impl VideoEncoder {
    /// The ffmpeg `-c:v` name for this encoder.
    pub fn ffmpeg_name(self) -> &'static str {
        match self {
            VideoEncoder::Software => "libx264",
            VideoEncoder::Nvenc => "h264_nvenc",
            VideoEncoder::Qsv => "h264_qsv",
            VideoEncoder::Vaapi => "h264_vaapi",
            VideoEncoder::Amf => "h264_amf",
        }
    }

    /// Whether this encoder requires hardware support.
    pub fn is_hardware(self) -> bool {
        !matches!(self, VideoEncoder::Software)
    }

    /// Parse either the ffmpeg encoder name or a short alias.
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "libx264" | "software" => Some(VideoEncoder::Software),
            "h264_nvenc" | "nvenc" => Some(VideoEncoder::Nvenc),
            "h264_qsv" | "qsv" => Some(VideoEncoder::Qsv),
            "h264_vaapi" | "vaapi" => Some(VideoEncoder::Vaapi),
            "h264_amf" | "amf" => Some(VideoEncoder::Amf),
            _ => None,
        }
    }
}

/// Rate-control mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RateControl {
    /// Constant bitrate: min/max pinned to the target.
    Cbr,
    /// Variable bitrate with a CRF quality target and a bitrate ceiling.
    Vbr,
}

/// Value object carrying the encoder and output-transport tuning applied to
/// one transcode session. Built from the configured defaults, then overridden
/// by per-request parameters; never persisted.
#[derive(Debug, Clone)]
pub struct EncodingProfile {
    pub encoder: VideoEncoder,
    pub preset: String,
    pub tune: String,
    pub h264_profile: String,
    /// Keyframe interval in frames.
    pub gop_size: u32,
    pub b_frames: u32,
    pub rate_control: RateControl,
    pub video_bitrate: String,
    pub max_bitrate: String,
    pub buffer_size: String,
    pub crf: u32,
    pub audio_bitrate: String,
    /// SRT latency in milliseconds.
    pub srt_latency_ms: u32,
    /// SRT overhead bandwidth percentage.
    pub srt_overhead_bw: u32,
    /// SRT peer idle timeout in milliseconds.
    pub srt_peer_idle_ms: u32,
    /// Loop the input indefinitely.
    pub loop_input: bool,
}

impl EncodingProfile {
    /// Build a profile from the server defaults.
    pub fn from_settings(settings: &Settings) -> Self {
        let enc = &settings.encoding;
        Self {
            encoder: VideoEncoder::parse(&enc.video_encoder).unwrap_or(VideoEncoder::Software),
            preset: enc.preset.clone(),
            tune: enc.tune.clone(),
            h264_profile: enc.h264_profile.clone(),
            gop_size: enc.gop_size,
            b_frames: enc.b_frames,
            rate_control: if enc.bitrate_mode.eq_ignore_ascii_case("vbr") {
                RateControl::Vbr
            } else {
                RateControl::Cbr
            },
            video_bitrate: enc.video_bitrate.clone(),
            max_bitrate: enc.max_bitrate.clone(),
            buffer_size: enc.buffer_size.clone(),
            crf: enc.crf,
            audio_bitrate: enc.audio_bitrate.clone(),
            srt_latency_ms: settings.srt.latency_ms,
            srt_overhead_bw: settings.srt.overhead_bw,
            srt_peer_idle_ms: settings.srt.peer_idle_ms,
            loop_input: true,
        }
    }

    /// Apply per-request overrides from the request `parameters` object.
    /// Unknown keys and wrongly-typed values are ignored.
    pub fn apply_overrides(&mut self, params: &serde_json::Map<String, Value>) {
        if let Some(enc) = params.get("videoEncoder").and_then(Value::as_str) {
            if let Some(encoder) = VideoEncoder::parse(enc) {
                self.encoder = encoder;
            }
        }
        if let Some(v) = params.get("videoBitrate").and_then(Value::as_str) {
            self.video_bitrate = v.to_string();
        }
        if let Some(v) = params.get("audioBitrate").and_then(Value::as_str) {
            self.audio_bitrate = v.to_string();
        }
        if let Some(v) = params.get("preset").and_then(Value::as_str) {
            self.preset = v.to_string();
        }
        if let Some(v) = params.get("gopSize").and_then(Value::as_u64) {
            self.gop_size = v as u32;
        }
        if let Some(v) = params.get("bitrateMode").and_then(Value::as_str) {
            self.rate_control = if v.eq_ignore_ascii_case("vbr") {
                RateControl::Vbr
            } else {
                RateControl::Cbr
            };
        }
        if let Some(v) = params.get("srtLatency").and_then(Value::as_u64) {
            self.srt_latency_ms = v as u32;
        }
        if let Some(v) = params.get("loop").and_then(Value::as_bool) {
            self.loop_input = v;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Settings;

    #[test]
    fn test_encoder_parse_aliases() {
        assert_eq!(VideoEncoder::parse("libx264"), Some(VideoEncoder::Software));
        assert_eq!(VideoEncoder::parse("nvenc"), Some(VideoEncoder::Nvenc));
        assert_eq!(VideoEncoder::parse("h264_qsv"), Some(VideoEncoder::Qsv));
        assert_eq!(VideoEncoder::parse("bogus"), None);
        assert!(VideoEncoder::Nvenc.is_hardware());
        assert!(!VideoEncoder::Software.is_hardware());
    }

    #[test]
    fn test_profile_defaults_from_settings() {
        let settings = Settings::default();
        let profile = EncodingProfile::from_settings(&settings);
        assert_eq!(profile.encoder, VideoEncoder::Software);
        assert_eq!(profile.rate_control, RateControl::Cbr);
        assert!(profile.loop_input);
    }

    #[test]
    fn test_overrides_applied_and_unknown_ignored() {
        let settings = Settings::default();
        let mut profile = EncodingProfile::from_settings(&settings);

        let params = serde_json::json!({
            "videoEncoder": "h264_nvenc",
            "videoBitrate": "8M",
            "gopSize": 25,
            "bitrateMode": "vbr",
            "loop": false,
            "unknownKey": 42,
            "preset": 7,
        });
        profile.apply_overrides(params.as_object().unwrap());

        assert_eq!(profile.encoder, VideoEncoder::Nvenc);
        assert_eq!(profile.video_bitrate, "8M");
        assert_eq!(profile.gop_size, 25);
        assert_eq!(profile.rate_control, RateControl::Vbr);
        assert!(!profile.loop_input);
        // Wrongly-typed preset override is ignored.
        assert_eq!(profile.preset, settings.encoding.preset);
    }
}
