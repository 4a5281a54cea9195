//! Channel registry: the set of output channels and their state machine.
//!
//! The registry is the single owner of all [`Channel`] entities. Every
//! mutation goes through a method that takes the write lock, so stream-name
//! uniqueness and port uniqueness are enforced atomically with respect to
//! concurrent creators. Callers never see the underlying map.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use log::{debug, info};
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;
use uuid::Uuid;

/// First SRT port handed out; channels bind upward from here.
pub const BASE_SRT_PORT: u16 = 9000;

/// Error type for registry operations.
#[derive(Debug, thiserror::Error)]
pub enum RegistryError {
    /// No channel with the given id exists.
    #[error("channel not found: {0}")]
    NotFound(String),

    /// The requested stream name is already taken by another channel.
    #[error("stream name already in use: {0}")]
    DuplicateStreamName(String),

    /// A channel label must be non-empty.
    #[error("channel label must not be empty")]
    EmptyLabel,
}

/// Lifecycle state of a channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChannelStatus {
    Inactive,
    Starting,
    Active,
    Stopping,
    Error,
}

impl ChannelStatus {
    /// Wire representation, matching the serde rename.
    pub fn as_str(self) -> &'static str {
        match self {
            ChannelStatus::Inactive => "inactive",
            ChannelStatus::Starting => "starting",
            ChannelStatus::Active => "active",
            ChannelStatus::Stopping => "stopping",
            ChannelStatus::Error => "error",
        }
    }
}

/// Runtime statistics for a channel.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChannelStats {
    /// Frames processed by the current or last transcode session.
    pub frames_processed: u64,
    /// Bytes written to the output transport.
    pub bytes_sent: u64,
    /// Uptime of the current session in seconds.
    pub uptime_secs: u64,
    /// Most recent error message.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_error: Option<String>,
    /// Number of fatal failures recorded on this channel.
    pub error_count: u32,
    /// Number of automatic restarts performed after failures.
    pub restart_count: u32,
}

/// A logical output slot mapping one media source to one SRT endpoint.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Channel {
    /// Opaque unique id.
    pub id: String,
    /// Human label.
    pub label: String,
    /// Configured source path, if any. Clients usually supply files per
    /// request instead.
    #[serde(default)]
    pub video_path: String,
    /// Stream name, unique across the registry.
    pub srt_stream_name: String,
    /// SRT port, unique across the registry for the channel's lifetime.
    pub srt_port: u16,
    /// Output resolution such as `1920x1080`.
    pub resolution: String,
    /// Output frame rate.
    pub frame_rate: u32,
    /// Lifecycle state.
    pub status: ChannelStatus,
    /// File currently bound to the channel, set dynamically by play requests.
    #[serde(default)]
    pub current_file: String,
    /// Creation timestamp.
    pub created_at: DateTime<Utc>,
    /// Last-update timestamp.
    pub updated_at: DateTime<Utc>,
    /// Most recent error message, if the channel is in `Error`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
    /// Runtime statistics.
    pub stats: ChannelStats,
}

/// Owner of the channel map. All operations are atomic with respect to the
/// internal lock; reads take the shared lock, mutations the exclusive one.
#[derive(Debug, Default)]
pub struct ChannelRegistry {
    channels: RwLock<HashMap<String, Channel>>,
}

impl ChannelRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self {
            channels: RwLock::new(HashMap::new()),
        }
    }

    /// Add a new channel. The stream name defaults to `STREAM_<label>` when
    /// not given. Fails if the label is empty or the stream name is taken.
    /// The SRT port is assigned under the same lock: one above the current
    /// maximum, floored at [`BASE_SRT_PORT`].
    pub async fn add(
        &self,
        label: &str,
        video_path: &str,
        stream_name: Option<&str>,
    ) -> Result<Channel, RegistryError> {
        if label.is_empty() {
            return Err(RegistryError::EmptyLabel);
        }

        let stream_name = match stream_name {
            Some(name) if !name.is_empty() => name.to_string(),
            _ => format!("STREAM_{label}"),
        };

        let mut channels = self.channels.write().await;

        if channels.values().any(|ch| ch.srt_stream_name == stream_name) {
            return Err(RegistryError::DuplicateStreamName(stream_name));
        }

        let srt_port = next_srt_port(&channels);
        let now = Utc::now();
        let channel = Channel {
            id: Uuid::new_v4().to_string(),
            label: label.to_string(),
            video_path: video_path.to_string(),
            srt_stream_name: stream_name,
            srt_port,
            resolution: "1920x1080".to_string(),
            frame_rate: 30,
            status: ChannelStatus::Inactive,
            current_file: String::new(),
            created_at: now,
            updated_at: now,
            error_message: None,
            stats: ChannelStats::default(),
        };

        info!(
            "Channel added: {} ({}) on SRT port {}",
            channel.label, channel.id, channel.srt_port
        );
        channels.insert(channel.id.clone(), channel.clone());
        Ok(channel)
    }

    /// Remove a channel by id. The caller is responsible for stopping any
    /// live transcode session first.
    pub async fn remove(&self, id: &str) -> Result<(), RegistryError> {
        let mut channels = self.channels.write().await;
        match channels.remove(id) {
            Some(ch) => {
                info!("Channel removed: {} ({})", ch.label, ch.id);
                Ok(())
            }
            None => Err(RegistryError::NotFound(id.to_string())),
        }
    }

    /// Get a channel snapshot by id.
    pub async fn get(&self, id: &str) -> Result<Channel, RegistryError> {
        self.channels
            .read()
            .await
            .get(id)
            .cloned()
            .ok_or_else(|| RegistryError::NotFound(id.to_string()))
    }

    /// Get a channel snapshot by stream name.
    pub async fn get_by_stream_name(&self, name: &str) -> Result<Channel, RegistryError> {
        self.channels
            .read()
            .await
            .values()
            .find(|ch| ch.srt_stream_name == name)
            .cloned()
            .ok_or_else(|| RegistryError::NotFound(name.to_string()))
    }

    /// Find a channel snapshot by label.
    pub async fn find_by_label(&self, label: &str) -> Option<Channel> {
        self.channels
            .read()
            .await
            .values()
            .find(|ch| ch.label == label)
            .cloned()
    }

    /// Snapshot of all channels.
    pub async fn list(&self) -> Vec<Channel> {
        self.channels.read().await.values().cloned().collect()
    }

    /// Snapshot of channels currently in `Active`.
    pub async fn list_active(&self) -> Vec<Channel> {
        self.channels
            .read()
            .await
            .values()
            .filter(|ch| ch.status == ChannelStatus::Active)
            .cloned()
            .collect()
    }

    /// Total channel count.
    pub async fn count(&self) -> usize {
        self.channels.read().await.len()
    }

    /// Count of channels currently in `Active`.
    pub async fn active_count(&self) -> usize {
        self.channels
            .read()
            .await
            .values()
            .filter(|ch| ch.status == ChannelStatus::Active)
            .count()
    }

    /// Update label, configured path, and/or stream name. Empty strings mean
    /// "keep the current value". Stream-name uniqueness is re-checked under
    /// the write lock.
    pub async fn update(
        &self,
        id: &str,
        label: &str,
        video_path: &str,
        stream_name: &str,
    ) -> Result<Channel, RegistryError> {
        let mut channels = self.channels.write().await;

        if !stream_name.is_empty() {
            let taken = channels
                .values()
                .any(|ch| ch.id != id && ch.srt_stream_name == stream_name);
            if taken {
                return Err(RegistryError::DuplicateStreamName(stream_name.to_string()));
            }
        }

        let channel = channels
            .get_mut(id)
            .ok_or_else(|| RegistryError::NotFound(id.to_string()))?;

        if !label.is_empty() {
            channel.label = label.to_string();
        }
        if !video_path.is_empty() {
            channel.video_path = video_path.to_string();
        }
        if !stream_name.is_empty() {
            channel.srt_stream_name = stream_name.to_string();
        }
        channel.updated_at = Utc::now();

        Ok(channel.clone())
    }

    /// Set the lifecycle status of a channel.
    pub async fn set_status(&self, id: &str, status: ChannelStatus) -> Result<(), RegistryError> {
        let mut channels = self.channels.write().await;
        let channel = channels
            .get_mut(id)
            .ok_or_else(|| RegistryError::NotFound(id.to_string()))?;
        debug!(
            "Channel {} status: {} -> {}",
            id,
            channel.status.as_str(),
            status.as_str()
        );
        channel.status = status;
        channel.updated_at = Utc::now();
        Ok(())
    }

    /// Set the file currently bound to a channel.
    pub async fn set_current_file(&self, id: &str, path: &str) -> Result<(), RegistryError> {
        let mut channels = self.channels.write().await;
        let channel = channels
            .get_mut(id)
            .ok_or_else(|| RegistryError::NotFound(id.to_string()))?;
        channel.current_file = path.to_string();
        channel.updated_at = Utc::now();
        Ok(())
    }

    /// Set the output resolution and frame rate of a channel.
    pub async fn set_video_settings(
        &self,
        id: &str,
        resolution: &str,
        frame_rate: u32,
    ) -> Result<(), RegistryError> {
        let mut channels = self.channels.write().await;
        let channel = channels
            .get_mut(id)
            .ok_or_else(|| RegistryError::NotFound(id.to_string()))?;
        channel.resolution = resolution.to_string();
        channel.frame_rate = frame_rate;
        channel.updated_at = Utc::now();
        Ok(())
    }

    /// Record a fatal failure: transitions the channel to `Error`, retains
    /// the message, and increments the error counter.
    pub async fn record_error(&self, id: &str, message: &str) -> Result<(), RegistryError> {
        let mut channels = self.channels.write().await;
        let channel = channels
            .get_mut(id)
            .ok_or_else(|| RegistryError::NotFound(id.to_string()))?;
        channel.status = ChannelStatus::Error;
        channel.error_message = Some(message.to_string());
        channel.stats.last_error = Some(message.to_string());
        channel.stats.error_count += 1;
        channel.updated_at = Utc::now();
        Ok(())
    }

    /// Record an automatic restart of a channel's transcoder.
    pub async fn record_restart(&self, id: &str) -> Result<(), RegistryError> {
        let mut channels = self.channels.write().await;
        let channel = channels
            .get_mut(id)
            .ok_or_else(|| RegistryError::NotFound(id.to_string()))?;
        channel.stats.restart_count += 1;
        channel.updated_at = Utc::now();
        Ok(())
    }

    /// Replace the runtime statistics of a channel.
    pub async fn update_stats(&self, id: &str, stats: ChannelStats) -> Result<(), RegistryError> {
        let mut channels = self.channels.write().await;
        let channel = channels
            .get_mut(id)
            .ok_or_else(|| RegistryError::NotFound(id.to_string()))?;
        channel.stats = stats;
        Ok(())
    }
}

/// Next free SRT port: one above the current maximum, floored at the base
/// and capped at the top of the u16 range. Monotonic-max on purpose; gaps
/// left by removed channels are not reclaimed.
fn next_srt_port(channels: &HashMap<String, Channel>) -> u16 {
    channels
        .values()
        .map(|ch| ch.srt_port.saturating_add(1))
        .max()
        .unwrap_or(BASE_SRT_PORT)
        .max(BASE_SRT_PORT)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_first_channel_gets_base_port() {
        let registry = ChannelRegistry::new();
        let ch = registry.add("Main", "", None).await.unwrap();
        assert_eq!(ch.srt_port, BASE_SRT_PORT);
        assert_eq!(ch.status, ChannelStatus::Inactive);
        assert_eq!(ch.srt_stream_name, "STREAM_Main");
    }

    #[tokio::test]
    async fn test_ports_are_distinct_and_monotonic() {
        let registry = ChannelRegistry::new();
        let mut last = None;
        for i in 0..5 {
            let ch = registry
                .add(&format!("ch{i}"), "", None)
                .await
                .unwrap();
            if let Some(prev) = last {
                assert!(ch.srt_port > prev);
            }
            last = Some(ch.srt_port);
        }

        let ports: Vec<u16> = registry.list().await.iter().map(|c| c.srt_port).collect();
        let mut dedup = ports.clone();
        dedup.sort_unstable();
        dedup.dedup();
        assert_eq!(dedup.len(), ports.len());
    }

    #[tokio::test]
    async fn test_removed_port_is_not_reclaimed_below_max() {
        let registry = ChannelRegistry::new();
        let a = registry.add("a", "", None).await.unwrap();
        let b = registry.add("b", "", None).await.unwrap();
        registry.remove(&a.id).await.unwrap();

        // Monotonic-max: the next port goes above b, not back into a's gap.
        let c = registry.add("c", "", None).await.unwrap();
        assert_eq!(c.srt_port, b.srt_port + 1);
    }

    #[tokio::test]
    async fn test_duplicate_stream_name_rejected() {
        let registry = ChannelRegistry::new();
        registry.add("a", "", Some("SHOW")).await.unwrap();
        let err = registry.add("b", "", Some("SHOW")).await.unwrap_err();
        assert!(matches!(err, RegistryError::DuplicateStreamName(_)));

        // Registry unchanged: exactly one channel carries that name.
        let matching = registry
            .list()
            .await
            .iter()
            .filter(|ch| ch.srt_stream_name == "SHOW")
            .count();
        assert_eq!(matching, 1);
        assert_eq!(registry.count().await, 1);
    }

    #[tokio::test]
    async fn test_update_rejects_taken_stream_name() {
        let registry = ChannelRegistry::new();
        registry.add("a", "", Some("ONE")).await.unwrap();
        let b = registry.add("b", "", Some("TWO")).await.unwrap();

        let err = registry.update(&b.id, "", "", "ONE").await.unwrap_err();
        assert!(matches!(err, RegistryError::DuplicateStreamName(_)));

        // Unchanged on failure.
        let b_now = registry.get(&b.id).await.unwrap();
        assert_eq!(b_now.srt_stream_name, "TWO");
    }

    #[tokio::test]
    async fn test_update_keeps_empty_fields() {
        let registry = ChannelRegistry::new();
        let ch = registry.add("a", "/videos", Some("ONE")).await.unwrap();
        let updated = registry.update(&ch.id, "renamed", "", "").await.unwrap();
        assert_eq!(updated.label, "renamed");
        assert_eq!(updated.video_path, "/videos");
        assert_eq!(updated.srt_stream_name, "ONE");
    }

    #[tokio::test]
    async fn test_record_error_increments_counter() {
        let registry = ChannelRegistry::new();
        let ch = registry.add("a", "", None).await.unwrap();

        registry.record_error(&ch.id, "encoder crashed").await.unwrap();
        registry.record_error(&ch.id, "encoder crashed again").await.unwrap();

        let ch = registry.get(&ch.id).await.unwrap();
        assert_eq!(ch.status, ChannelStatus::Error);
        assert_eq!(ch.stats.error_count, 2);
        assert_eq!(ch.error_message.as_deref(), Some("encoder crashed again"));
    }

    #[tokio::test]
    async fn test_list_active_filters_by_status() {
        let registry = ChannelRegistry::new();
        let a = registry.add("a", "", None).await.unwrap();
        registry.add("b", "", None).await.unwrap();
        registry.set_status(&a.id, ChannelStatus::Active).await.unwrap();

        let active = registry.list_active().await;
        assert_eq!(active.len(), 1);
        assert_eq!(active[0].id, a.id);
        assert_eq!(registry.active_count().await, 1);
        assert_eq!(registry.count().await, 2);
    }

    #[tokio::test]
    async fn test_get_by_stream_name() {
        let registry = ChannelRegistry::new();
        let ch = registry.add("a", "", Some("FEED_A")).await.unwrap();
        let found = registry.get_by_stream_name("FEED_A").await.unwrap();
        assert_eq!(found.id, ch.id);
        assert!(registry.get_by_stream_name("FEED_B").await.is_err());
    }

    #[tokio::test]
    async fn test_empty_label_rejected() {
        let registry = ChannelRegistry::new();
        assert!(matches!(
            registry.add("", "", None).await.unwrap_err(),
            RegistryError::EmptyLabel
        ));
    }

    #[tokio::test]
    async fn test_record_restart_increments_counter() {
        let registry = ChannelRegistry::new();
        let ch = registry.add("a", "", None).await.unwrap();

        registry.record_restart(&ch.id).await.unwrap();
        registry.record_restart(&ch.id).await.unwrap();

        let ch = registry.get(&ch.id).await.unwrap();
        assert_eq!(ch.stats.restart_count, 2);
        assert!(matches!(
            registry.record_restart("nope").await.unwrap_err(),
            RegistryError::NotFound(_)
        ));
    }

    #[test]
    fn test_port_allocation_saturates_at_max() {
        let now = Utc::now();
        let ch = Channel {
            id: "top".to_string(),
            label: "top".to_string(),
            video_path: String::new(),
            srt_stream_name: "STREAM_top".to_string(),
            srt_port: u16::MAX,
            resolution: "1920x1080".to_string(),
            frame_rate: 30,
            status: ChannelStatus::Inactive,
            current_file: String::new(),
            created_at: now,
            updated_at: now,
            error_message: None,
            stats: ChannelStats::default(),
        };
        let mut channels = HashMap::new();
        channels.insert(ch.id.clone(), ch);

        assert_eq!(next_srt_port(&channels), u16::MAX);
    }

    #[test]
    fn test_status_wire_format() {
        assert_eq!(
            serde_json::to_string(&ChannelStatus::Active).unwrap(),
            "\"active\""
        );
        assert_eq!(ChannelStatus::Error.as_str(), "error");
    }
}
