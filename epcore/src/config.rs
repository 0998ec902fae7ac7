//! The options tree.
//!
//! Configuration is a JSON document whose shape mirrors the option paths the
//! tooling documents (`/EpcTools/EnablePublicObjects`,
//! `/EpcTools/SynchronizationObjects/NumberSemaphores`,
//! `/EpcTools/PublicQueue[i]/QueueID`, ...). Everything is optional;
//! defaults match the member crates.

use epcore_sync::{PublicQueueDef, SyncObjectsConfig};
use epcore_timerpool::{Rounding, TimerPoolConfig};
use serde::{Deserialize, Serialize};

use crate::Result;

/// Root of the options tree.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(rename = "EpcTools", default)]
    pub epc_tools: EpcTools,
}

impl Config {
    /// Loads the options tree from a JSON file.
    pub fn load(path: &str) -> Result<Self> {
        let body = std::fs::read(path)?;
        Ok(serde_json::from_slice(&body)?)
    }

    /// Parses the options tree from a JSON string.
    pub fn parse(body: &str) -> Result<Self> {
        Ok(serde_json::from_str(body)?)
    }
}

/// The `/EpcTools` subtree.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct EpcTools {
    #[serde(rename = "EnablePublicObjects", default)]
    pub enable_public_objects: bool,

    #[serde(rename = "SynchronizationObjects", default)]
    pub synchronization_objects: SynchronizationObjects,

    #[serde(rename = "PublicQueue", default)]
    pub public_queue: Vec<PublicQueue>,

    #[serde(rename = "Logger", default, skip_serializing_if = "Option::is_none")]
    pub logger: Option<Logger>,

    #[serde(rename = "TimerPool", default, skip_serializing_if = "Option::is_none")]
    pub timer_pool: Option<TimerPool>,

    #[serde(rename = "Dns", default, skip_serializing_if = "Option::is_none")]
    pub dns: Option<Dns>,
}

impl EpcTools {
    pub(crate) fn timer_pool_config(&self) -> TimerPoolConfig {
        self.timer_pool
            .as_ref()
            .map_or_else(TimerPoolConfig::default, TimerPool::to_pool_config)
    }
}

/// `/EpcTools/SynchronizationObjects`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SynchronizationObjects {
    #[serde(rename = "NumberSemaphores", default = "default_object_count")]
    pub number_semaphores: usize,

    #[serde(rename = "NumberMutexes", default = "default_object_count")]
    pub number_mutexes: usize,
}

fn default_object_count() -> usize {
    64
}

impl Default for SynchronizationObjects {
    fn default() -> Self {
        Self {
            number_semaphores: default_object_count(),
            number_mutexes: default_object_count(),
        }
    }
}

impl SynchronizationObjects {
    pub(crate) fn to_pool_config(&self) -> SyncObjectsConfig {
        SyncObjectsConfig {
            number_semaphores: self.number_semaphores,
            number_mutexes: self.number_mutexes,
        }
    }
}

/// One `/EpcTools/PublicQueue[i]` entry.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PublicQueue {
    #[serde(rename = "QueueID")]
    pub queue_id: i32,

    #[serde(rename = "MessageSize", default = "default_message_size")]
    pub message_size: i32,

    #[serde(rename = "QueueSize", default = "default_queue_size")]
    pub queue_size: i32,

    #[serde(rename = "AllowMultipleReaders", default)]
    pub allow_multiple_readers: bool,

    #[serde(rename = "AllowMultipleWriters", default)]
    pub allow_multiple_writers: bool,
}

fn default_message_size() -> i32 {
    std::mem::size_of::<epcore_queue::EventMessage>() as i32
}

fn default_queue_size() -> i32 {
    16384
}

impl PublicQueue {
    pub(crate) fn to_def(&self) -> PublicQueueDef {
        PublicQueueDef {
            queue_id: self.queue_id,
            msg_size: self.message_size,
            msg_cnt: self.queue_size,
            multiple_readers: self.allow_multiple_readers,
            multiple_writers: self.allow_multiple_writers,
        }
    }
}

/// `/EpcTools/Logger`; consumed by [`crate::logging::init`].
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Logger {
    /// `error`, `warn`, `info`, `debug` or `trace`.
    #[serde(rename = "LogLevel", default, skip_serializing_if = "Option::is_none")]
    pub log_level: Option<String>,
}

/// `/EpcTools/TimerPool`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TimerPool {
    #[serde(rename = "ResolutionMilliseconds", default = "default_resolution")]
    pub resolution_ms: i64,

    /// `up` or `down`.
    #[serde(rename = "Rounding", default = "default_rounding")]
    pub rounding: String,
}

fn default_resolution() -> i64 {
    5
}

fn default_rounding() -> String {
    "down".into()
}

impl TimerPool {
    fn to_pool_config(&self) -> TimerPoolConfig {
        TimerPoolConfig {
            resolution_ms: self.resolution_ms,
            rounding: if self.rounding.eq_ignore_ascii_case("up") {
                Rounding::Up
            } else {
                Rounding::Down
            },
            ..TimerPoolConfig::default()
        }
    }
}

/// `/EpcTools/Dns` — cache refresh knobs and query persistence.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Dns {
    #[serde(rename = "Concurrent", default, skip_serializing_if = "Option::is_none")]
    pub concurrent: Option<u32>,

    #[serde(rename = "Percent", default, skip_serializing_if = "Option::is_none")]
    pub percent: Option<u32>,

    #[serde(rename = "Interval", default, skip_serializing_if = "Option::is_none")]
    pub interval_ms: Option<i64>,

    #[serde(rename = "QuerySaveFilename", default, skip_serializing_if = "Option::is_none")]
    pub query_save_filename: Option<String>,

    #[serde(rename = "QuerySaveFrequency", default, skip_serializing_if = "Option::is_none")]
    pub query_save_frequency_ms: Option<i64>,
}

impl Dns {
    pub(crate) fn apply(&self) {
        if let Some(concurrent) = self.concurrent {
            epcore_dns::Cache::set_refresh_concurrent(concurrent);
        }
        if let Some(percent) = self.percent {
            epcore_dns::Cache::set_refresh_percent(percent);
        }
        if let Some(interval_ms) = self.interval_ms {
            epcore_dns::Cache::set_refresh_interval_ms(interval_ms);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = Config::parse("{}").unwrap();
        assert!(!config.epc_tools.enable_public_objects);
        assert_eq!(config.epc_tools.synchronization_objects.number_semaphores, 64);
        assert!(config.epc_tools.public_queue.is_empty());
    }

    #[test]
    fn test_full_tree() {
        let config = Config::parse(
            r#"{
              "EpcTools": {
                "EnablePublicObjects": true,
                "SynchronizationObjects": {
                  "NumberSemaphores": 128,
                  "NumberMutexes": 96
                },
                "PublicQueue": [
                  {
                    "QueueID": 1,
                    "QueueSize": 1000,
                    "AllowMultipleReaders": true,
                    "AllowMultipleWriters": true
                  }
                ],
                "Logger": { "LogLevel": "debug" },
                "TimerPool": { "ResolutionMilliseconds": 10, "Rounding": "up" },
                "Dns": { "Concurrent": 5, "Percent": 70, "Interval": 30000 }
              }
            }"#,
        )
        .unwrap();

        assert!(config.epc_tools.enable_public_objects);
        assert_eq!(config.epc_tools.synchronization_objects.number_mutexes, 96);
        assert_eq!(config.epc_tools.public_queue.len(), 1);
        assert_eq!(config.epc_tools.public_queue[0].queue_id, 1);
        assert_eq!(config.epc_tools.public_queue[0].queue_size, 1000);
        assert!(config.epc_tools.public_queue[0].allow_multiple_readers);

        let pool = config.epc_tools.timer_pool_config();
        assert_eq!(pool.resolution_ms, 10);
        assert_eq!(pool.rounding, epcore_timerpool::Rounding::Up);

        let dns = config.epc_tools.dns.unwrap();
        assert_eq!(dns.concurrent, Some(5));
        assert_eq!(dns.percent, Some(70));
    }
}
