use std::path::PathBuf;
use std::time::Duration;

use serde::Deserialize;

use overlink_core::error::{OverlinkError, Result};

use crate::transport::{ReconnectPolicy, RegistryOptions};

fn invalid(msg: &str) -> OverlinkError {
    OverlinkError::Config(msg.to_string())
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct BusConfig {
    pub version: u32,

    #[serde(default)]
    pub stream: StreamSection,

    #[serde(default)]
    pub registry: RegistrySection,

    #[serde(default)]
    pub overlay: OverlaySection,
}

impl BusConfig {
    pub fn validate(&self) -> Result<()> {
        if self.version != 1 {
            return Err(OverlinkError::Config(format!(
                "unsupported config version {}",
                self.version
            )));
        }
        self.stream.validate()?;
        self.registry.validate()?;
        self.overlay.validate()?;

        if self.registry.enabled && self.registry.socket_path == self.stream.socket_path {
            return Err(invalid(
                "registry.socket_path must differ from stream.socket_path",
            ));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StreamRole {
    Server,
    Client,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct StreamSection {
    #[serde(default = "default_stream_socket")]
    pub socket_path: PathBuf,

    #[serde(default = "default_role")]
    pub role: StreamRole,

    #[serde(default = "default_initial_backoff_ms")]
    pub initial_backoff_ms: u64,

    #[serde(default = "default_max_backoff_ms")]
    pub max_backoff_ms: u64,

    /// 0 = retry forever without reporting a failed round.
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
}

impl Default for StreamSection {
    fn default() -> Self {
        Self {
            socket_path: default_stream_socket(),
            role: default_role(),
            initial_backoff_ms: default_initial_backoff_ms(),
            max_backoff_ms: default_max_backoff_ms(),
            max_attempts: default_max_attempts(),
        }
    }
}

impl StreamSection {
    pub fn validate(&self) -> Result<()> {
        if self.socket_path.as_os_str().is_empty() {
            return Err(invalid("stream.socket_path must not be empty"));
        }
        if !(10..=60000).contains(&self.initial_backoff_ms) {
            return Err(invalid(
                "stream.initial_backoff_ms must be between 10 and 60000",
            ));
        }
        if !(10..=60000).contains(&self.max_backoff_ms) {
            return Err(invalid("stream.max_backoff_ms must be between 10 and 60000"));
        }
        if self.max_backoff_ms < self.initial_backoff_ms {
            return Err(invalid(
                "stream.max_backoff_ms must not be less than initial_backoff_ms",
            ));
        }
        if self.max_attempts > 1000 {
            return Err(invalid("stream.max_attempts must be at most 1000"));
        }
        Ok(())
    }

    pub fn reconnect_policy(&self) -> ReconnectPolicy {
        ReconnectPolicy {
            initial_backoff: Duration::from_millis(self.initial_backoff_ms),
            max_backoff: Duration::from_millis(self.max_backoff_ms),
            max_attempts: self.max_attempts,
        }
    }
}

fn default_stream_socket() -> PathBuf {
    PathBuf::from("/tmp/overlink.sock")
}
fn default_role() -> StreamRole {
    StreamRole::Server
}
fn default_initial_backoff_ms() -> u64 {
    200
}
// Matches the host's fixed 2 s reconnect interval.
fn default_max_backoff_ms() -> u64 {
    2000
}
fn default_max_attempts() -> u32 {
    5
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RegistrySection {
    #[serde(default = "default_true")]
    pub enabled: bool,

    #[serde(default = "default_registry_socket")]
    pub socket_path: PathBuf,

    #[serde(default = "default_true")]
    pub relay_inbound: bool,

    #[serde(default = "default_queue_depth")]
    pub queue_depth: usize,
}

impl Default for RegistrySection {
    fn default() -> Self {
        Self {
            enabled: default_true(),
            socket_path: default_registry_socket(),
            relay_inbound: default_true(),
            queue_depth: default_queue_depth(),
        }
    }
}

impl RegistrySection {
    pub fn validate(&self) -> Result<()> {
        if self.enabled && self.socket_path.as_os_str().is_empty() {
            return Err(invalid("registry.socket_path must not be empty"));
        }
        if !(1..=65536).contains(&self.queue_depth) {
            return Err(invalid("registry.queue_depth must be between 1 and 65536"));
        }
        Ok(())
    }

    pub fn options(&self) -> RegistryOptions {
        RegistryOptions {
            socket_path: Some(self.socket_path.clone()),
            relay_inbound: self.relay_inbound,
            queue_depth: self.queue_depth,
        }
    }
}

fn default_true() -> bool {
    true
}
fn default_registry_socket() -> PathBuf {
    PathBuf::from("/tmp/overlink-registry.sock")
}
fn default_queue_depth() -> usize {
    256
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct OverlaySection {
    #[serde(default = "default_pose_interval_ms")]
    pub pose_interval_ms: u64,

    #[serde(default = "default_stale_after_ms")]
    pub stale_after_ms: u64,
}

impl Default for OverlaySection {
    fn default() -> Self {
        Self {
            pose_interval_ms: default_pose_interval_ms(),
            stale_after_ms: default_stale_after_ms(),
        }
    }
}

impl OverlaySection {
    pub fn validate(&self) -> Result<()> {
        if !(10..=1000).contains(&self.pose_interval_ms) {
            return Err(invalid("overlay.pose_interval_ms must be between 10 and 1000"));
        }
        if self.stale_after_ms <= self.pose_interval_ms {
            return Err(invalid(
                "overlay.stale_after_ms must be greater than pose_interval_ms",
            ));
        }
        if self.stale_after_ms > 60000 {
            return Err(invalid("overlay.stale_after_ms must be at most 60000"));
        }
        Ok(())
    }

    pub fn pose_interval(&self) -> Duration {
        Duration::from_millis(self.pose_interval_ms)
    }

    pub fn stale_after(&self) -> Duration {
        Duration::from_millis(self.stale_after_ms)
    }
}

// 10 frames per second.
fn default_pose_interval_ms() -> u64 {
    100
}
fn default_stale_after_ms() -> u64 {
    1000
}
