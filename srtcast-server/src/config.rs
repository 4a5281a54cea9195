//! Server configuration.
//!
//! Two layers: [`ConfigFile`] mirrors the optional TOML file on disk, and
//! [`Settings`] is the fully resolved configuration the rest of the server
//! reads. File values override the built-in defaults; command-line flags
//! override both (merged in `main`).

use std::net::SocketAddr;
use std::path::{Path, PathBuf};

use serde::Deserialize;

/// Error loading or parsing the configuration file.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read config file: {0}")]
    Io(#[from] std::io::Error),

    #[error("failed to parse config file: {0}")]
    Parse(#[from] toml::de::Error),
}

/// Configuration file format. Every field is optional; absent values fall
/// back to the defaults in [`Settings`].
#[derive(Debug, Deserialize, Default)]
pub struct ConfigFile {
    #[serde(default)]
    pub server: ServerSection,
    #[serde(default)]
    pub encoding: EncodingSection,
    #[serde(default)]
    pub srt: SrtSection,
    #[serde(default)]
    pub logging: LoggingSection,
}

#[derive(Debug, Deserialize, Default)]
pub struct ServerSection {
    pub listen: Option<String>,
    pub videos_dir: Option<String>,
    pub ffmpeg_path: Option<String>,
    pub bind_host: Option<String>,
    pub stream_prefix: Option<String>,
    pub auto_restart: Option<bool>,
    pub hardware_fallback: Option<bool>,
}

#[derive(Debug, Deserialize, Default)]
pub struct EncodingSection {
    pub video_encoder: Option<String>,
    pub preset: Option<String>,
    pub tune: Option<String>,
    pub h264_profile: Option<String>,
    pub gop_size: Option<u32>,
    pub b_frames: Option<u32>,
    pub bitrate_mode: Option<String>,
    pub video_bitrate: Option<String>,
    pub max_bitrate: Option<String>,
    pub buffer_size: Option<String>,
    pub crf: Option<u32>,
    pub audio_bitrate: Option<String>,
}

#[derive(Debug, Deserialize, Default)]
pub struct SrtSection {
    pub latency_ms: Option<u32>,
    pub overhead_bw: Option<u32>,
    pub peer_idle_ms: Option<u32>,
}

#[derive(Debug, Deserialize, Default)]
pub struct LoggingSection {
    pub log_dir: Option<String>,
    pub retention_days: Option<u64>,
    pub level: Option<String>,
}

/// Load and parse a configuration file.
pub fn load_config(path: &Path) -> Result<ConfigFile, ConfigError> {
    let contents = std::fs::read_to_string(path)?;
    let config: ConfigFile = toml::from_str(&contents)?;
    Ok(config)
}

/// Fully resolved server settings.
#[derive(Debug, Clone)]
pub struct Settings {
    pub server: ServerSettings,
    pub encoding: EncodingSettings,
    pub srt: SrtSettings,
}

#[derive(Debug, Clone)]
pub struct ServerSettings {
    /// WebSocket/HTTP listen address.
    pub listen: SocketAddr,
    /// Directory scanned for playable media files.
    pub videos_dir: PathBuf,
    /// Path or name of the ffmpeg binary.
    pub ffmpeg_path: String,
    /// Host the SRT listeners bind on.
    pub bind_host: String,
    /// Prefix for auto-generated stream names.
    pub stream_prefix: String,
    /// Restart crashed transcoders automatically.
    pub auto_restart: bool,
    /// Probe hardware encoders and fall back to software on failure.
    pub hardware_fallback: bool,
}

#[derive(Debug, Clone)]
pub struct EncodingSettings {
    pub video_encoder: String,
    pub preset: String,
    pub tune: String,
    pub h264_profile: String,
    pub gop_size: u32,
    pub b_frames: u32,
    pub bitrate_mode: String,
    pub video_bitrate: String,
    pub max_bitrate: String,
    pub buffer_size: String,
    pub crf: u32,
    pub audio_bitrate: String,
}

#[derive(Debug, Clone)]
pub struct SrtSettings {
    pub latency_ms: u32,
    pub overhead_bw: u32,
    pub peer_idle_ms: u32,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            server: ServerSettings {
                listen: SocketAddr::from(([0, 0, 0, 0], 8765)),
                videos_dir: PathBuf::from("videos"),
                ffmpeg_path: "ffmpeg".to_string(),
                bind_host: "0.0.0.0".to_string(),
                stream_prefix: "SRT_SERVER_".to_string(),
                auto_restart: true,
                hardware_fallback: true,
            },
            encoding: EncodingSettings {
                video_encoder: "libx264".to_string(),
                preset: "veryfast".to_string(),
                tune: "zerolatency".to_string(),
                h264_profile: "high".to_string(),
                gop_size: 60,
                b_frames: 2,
                bitrate_mode: "cbr".to_string(),
                video_bitrate: "5M".to_string(),
                max_bitrate: "5M".to_string(),
                buffer_size: "10M".to_string(),
                crf: 23,
                audio_bitrate: "192k".to_string(),
            },
            srt: SrtSettings {
                latency_ms: 500,
                overhead_bw: 25,
                peer_idle_ms: 5000,
            },
        }
    }
}

impl Settings {
    /// Overlay file values on the defaults. Invalid listen addresses are
    /// reported by the caller; everything else is taken as-is.
    pub fn apply_file(&mut self, file: &ConfigFile) -> Result<(), std::net::AddrParseError> {
        if let Some(listen) = &file.server.listen {
            self.server.listen = listen.parse()?;
        }
        if let Some(dir) = &file.server.videos_dir {
            self.server.videos_dir = PathBuf::from(dir);
        }
        if let Some(path) = &file.server.ffmpeg_path {
            self.server.ffmpeg_path = path.clone();
        }
        if let Some(host) = &file.server.bind_host {
            self.server.bind_host = host.clone();
        }
        if let Some(prefix) = &file.server.stream_prefix {
            self.server.stream_prefix = prefix.clone();
        }
        if let Some(v) = file.server.auto_restart {
            self.server.auto_restart = v;
        }
        if let Some(v) = file.server.hardware_fallback {
            self.server.hardware_fallback = v;
        }

        let enc = &mut self.encoding;
        let section = &file.encoding;
        if let Some(v) = &section.video_encoder {
            enc.video_encoder = v.clone();
        }
        if let Some(v) = &section.preset {
            enc.preset = v.clone();
        }
        if let Some(v) = &section.tune {
            enc.tune = v.clone();
        }
        if let Some(v) = &section.h264_profile {
            enc.h264_profile = v.clone();
        }
        if let Some(v) = section.gop_size {
            enc.gop_size = v;
        }
        if let Some(v) = section.b_frames {
            enc.b_frames = v;
        }
        if let Some(v) = &section.bitrate_mode {
            enc.bitrate_mode = v.clone();
        }
        if let Some(v) = &section.video_bitrate {
            enc.video_bitrate = v.clone();
        }
        if let Some(v) = &section.max_bitrate {
            enc.max_bitrate = v.clone();
        }
        if let Some(v) = &section.buffer_size {
            enc.buffer_size = v.clone();
        }
        if let Some(v) = section.crf {
            enc.crf = v;
        }
        if let Some(v) = &section.audio_bitrate {
            enc.audio_bitrate = v.clone();
        }

        if let Some(v) = file.srt.latency_ms {
            self.srt.latency_ms = v;
        }
        if let Some(v) = file.srt.overhead_bw {
            self.srt.overhead_bw = v;
        }
        if let Some(v) = file.srt.peer_idle_ms {
            self.srt.peer_idle_ms = v;
        }
        Ok(())
    }
}
