//! Classification of ffmpeg diagnostic output.
//!
//! ffmpeg reports everything through unstructured stderr text. This module
//! isolates the matching rules behind a single classification function with
//! a closed set of categories, so the rules can be unit tested independently
//! of process plumbing and replaced wholesale if the engine ever exposes a
//! structured health channel.

/// Category of a single diagnostic line.
#[derive(Debug, Clone, PartialEq)]
pub enum LineCategory {
    /// A downstream consumer connected to the SRT listener; the feed is
    /// actually being watched.
    ViewerConnected,
    /// Periodic frame/throughput marker from `-stats`.
    Progress(ProgressSnapshot),
    /// An error marker.
    Error,
    /// A warning marker.
    Warning,
    /// Anything else.
    Noise,
}

/// Parsed fields of an ffmpeg `-stats` progress line.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ProgressSnapshot {
    /// Frames processed so far.
    pub frame: u64,
    /// Current encode rate.
    pub fps: f64,
    /// Output bitrate as reported, e.g. `1341.3kbits/s`.
    pub bitrate: String,
    /// Output size in kilobytes.
    pub size_kb: u64,
    /// Output timestamp, e.g. `00:00:49.16`.
    pub out_time: String,
    /// Encode speed relative to realtime, e.g. `1.0x`.
    pub speed: String,
}

/// Classify one stderr line.
pub fn classify_line(line: &str) -> LineCategory {
    if is_viewer_connected(line) {
        return LineCategory::ViewerConnected;
    }
    if let Some(snapshot) = parse_progress(line) {
        return LineCategory::Progress(snapshot);
    }

    let lower = line.to_ascii_lowercase();
    if lower.contains("error") || lower.contains("invalid") || lower.contains("failed") {
        return LineCategory::Error;
    }
    if lower.contains("warning") || lower.contains("deprecated") {
        return LineCategory::Warning;
    }
    LineCategory::Noise
}

/// Whether a terminal failure message is a benign consumer disconnect rather
/// than an encoder fault. SRT tears the mux down with an I/O error when the
/// caller goes away; the channel should return to inactive, not error.
pub fn is_transport_disconnect(message: &str) -> bool {
    message.contains("I/O error")
        || message.contains("0xfffffffb")
        || message.contains("muxing a packet")
        || message.contains("Connection was broken")
}

/// Evidence that a consumer connected to the SRT listener. In listener mode
/// ffmpeg blocks on the output open until a caller arrives, so the output
/// header marks first contact; libsrt accept lines cover reconnects.
fn is_viewer_connected(line: &str) -> bool {
    (line.contains("Output #0") && line.contains("srt://"))
        || line.contains("Accepted SRT source connection")
        || line.contains("accepted connection")
}

/// Parse an ffmpeg `-stats` line of the form
/// `frame= 1234 fps= 25 q=28.0 size= 2048kB time=00:00:49.16 bitrate=1341.3kbits/s speed=1.0x`.
/// Returns `None` for lines without a frame counter.
pub fn parse_progress(line: &str) -> Option<ProgressSnapshot> {
    let frame = field(line, "frame=")?.parse().ok()?;
    let mut snapshot = ProgressSnapshot {
        frame,
        ..ProgressSnapshot::default()
    };

    if let Some(fps) = field(line, "fps=") {
        snapshot.fps = fps.parse().unwrap_or(0.0);
    }
    if let Some(bitrate) = field(line, "bitrate=") {
        snapshot.bitrate = bitrate.to_string();
    }
    if let Some(size) = field(line, "size=") {
        snapshot.size_kb = size.trim_end_matches(|c: char| c.is_alphabetic()).parse().unwrap_or(0);
    }
    if let Some(time) = field(line, "time=") {
        snapshot.out_time = time.to_string();
    }
    if let Some(speed) = field(line, "speed=") {
        snapshot.speed = speed.to_string();
    }
    Some(snapshot)
}

/// Extract the whitespace-delimited value following `key=`. ffmpeg pads some
/// values with spaces after the equals sign.
fn field<'a>(line: &'a str, key: &str) -> Option<&'a str> {
    let start = line.find(key)? + key.len();
    let rest = line[start..].trim_start();
    let end = rest.find(char::is_whitespace).unwrap_or(rest.len());
    let value = &rest[..end];
    if value.is_empty() {
        None
    } else {
        Some(value)
    }
}
