//! Background cache refresher.
//!
//! A private event thread owned by each cache. A periodic timer drives a
//! scan that re-queries entries nearing their TTL (or already past it); a
//! second timer, armed when persistence is configured, saves the query list
//! so a restart can warm the cache. Refresh submissions are bounded by the
//! cache's concurrency semaphore; each completion releases one slot.

use std::io::Write;
use std::path::PathBuf;
use std::sync::{Arc, Weak};

use epcore_queue::{EventMessage, MSG_USER};
use epcore_thread::{
    EventThreadHandle, EventTimer, MessageMap, MessageMapChain, ThreadEventHandler,
};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

use crate::cache::CacheInner;
use crate::error::{DnsError, Result};
use crate::record::{QueryKey, RecordType};

/// Ask the refresher to persist the query list now.
pub(crate) const CR_SAVE_QUERIES: u32 = MSG_USER + 1;
/// Ask the refresher to re-query every cached key.
pub(crate) const CR_FORCE_REFRESH: u32 = MSG_USER + 2;
/// Save configuration changed; (re)arm the save timer.
pub(crate) const CR_INIT_SAVE: u32 = MSG_USER + 3;

/// State shared between the cache handle and the refresher thread.
#[derive(Debug, Default)]
pub(crate) struct RefresherShared {
    save: Mutex<Option<(PathBuf, i64)>>,
}

impl RefresherShared {
    pub(crate) fn set_save_config(&self, path: &str, frequency_ms: i64) {
        *self.save.lock() = Some((PathBuf::from(path), frequency_ms));
    }

    fn save_config(&self) -> Option<(PathBuf, i64)> {
        self.save.lock().clone()
    }
}

#[derive(Serialize, Deserialize)]
struct SavedQuery {
    #[serde(rename = "type")]
    rtype: u16,
    domain: String,
}

pub(crate) struct RefresherHandler {
    cache: Weak<CacheInner>,
    percent: u32,
    interval_ms: i64,
    shared: Arc<RefresherShared>,
    refresh_timer: EventTimer,
    save_timer: EventTimer,
    running: bool,
    thread: Option<EventThreadHandle>,
}

impl RefresherHandler {
    pub(crate) fn new(
        cache: Weak<CacheInner>,
        percent: u32,
        interval_ms: i64,
        shared: Arc<RefresherShared>,
    ) -> Self {
        Self {
            cache,
            percent,
            interval_ms,
            shared,
            refresh_timer: EventTimer::new(),
            save_timer: EventTimer::new(),
            running: false,
            thread: None,
        }
    }

    fn arm_save_timer(&mut self, thread: &EventThreadHandle) {
        let Some((path, frequency_ms)) = self.shared.save_config() else {
            return;
        };
        if path.as_os_str().is_empty() || frequency_ms <= 0 {
            return;
        }
        if self.save_timer.is_initialized() {
            self.save_timer.stop();
        }
        self.save_timer.set_interval_ms(frequency_ms);
        self.save_timer.set_one_shot(false);
        if !self.save_timer.is_initialized() {
            if let Err(e) = thread.init_timer(&mut self.save_timer) {
                tracing::error!(error = %e, "unable to bind the query save timer");
                return;
            }
        }
        if let Err(e) = self.save_timer.start() {
            tracing::error!(error = %e, "unable to start the query save timer");
        }
    }

    /// Re-queries cache entries: everything when `force`, otherwise the
    /// entries past the refresh percentage or already expired.
    fn refresh(&mut self, force: bool) {
        if self.running {
            return;
        }
        let Some(cache) = self.cache.upgrade() else {
            return;
        };

        let keys = if force {
            cache.all_keys()
        } else {
            cache.expiring_keys(self.percent)
        };
        if keys.is_empty() {
            return;
        }

        self.running = true;
        tracing::debug!(count = keys.len(), force, "refreshing dns cache entries");
        for key in keys {
            if let Err(e) = cache.submit_bounded(key, true) {
                tracing::warn!(error = %e, "cache refresh submission failed");
            }
        }
        self.running = false;
    }

    fn save(&self) {
        let Some(cache) = self.cache.upgrade() else {
            return;
        };
        let Some((path, _)) = self.shared.save_config() else {
            return;
        };
        if cache.reset_new_query_count() == 0 {
            return;
        }

        let saved: Vec<SavedQuery> = cache
            .all_keys()
            .into_iter()
            .map(|k| SavedQuery {
                rtype: k.rtype().code(),
                domain: k.domain().to_owned(),
            })
            .collect();

        if let Err(e) = write_atomically(&path, &saved) {
            tracing::error!(error = %e, path = %path.display(), "saving dns queries failed");
        } else {
            tracing::debug!(count = saved.len(), path = %path.display(), "dns queries saved");
        }
    }
}

fn write_atomically(path: &std::path::Path, saved: &[SavedQuery]) -> std::io::Result<()> {
    let tmp = path.with_extension("tmp");
    {
        let mut file = std::fs::File::create(&tmp)?;
        let body = serde_json::to_vec(saved)?;
        file.write_all(&body)?;
        file.sync_all()?;
    }
    std::fs::rename(&tmp, path)
}

/// Replays a persisted query file: one bounded async query per entry.
pub(crate) fn load_queries(cache: &Arc<CacheInner>, path: &str) -> Result<()> {
    let body = std::fs::read(path).map_err(|e| DnsError::QueryFile {
        path: path.to_owned(),
        reason: e.to_string(),
    })?;
    let saved: Vec<SavedQuery> =
        serde_json::from_slice(&body).map_err(|e| DnsError::QueryFile {
            path: path.to_owned(),
            reason: e.to_string(),
        })?;

    for entry in saved {
        let key = QueryKey::new(RecordType::from_code(entry.rtype), &entry.domain);
        cache.submit_bounded(key, false)?;
    }
    Ok(())
}

impl ThreadEventHandler for RefresherHandler {
    fn message_map() -> MessageMapChain<Self, EventMessage> {
        MessageMapChain::new().with(
            MessageMap::new()
                .on(CR_SAVE_QUERIES, |h: &mut Self, _m| h.save())
                .on(CR_FORCE_REFRESH, |h: &mut Self, _m| h.refresh(true))
                .on(CR_INIT_SAVE, |h: &mut Self, _m| {
                    if let Some(thread) = h.thread.clone() {
                        h.arm_save_timer(&thread);
                    }
                }),
        )
    }

    fn on_init(&mut self, thread: &EventThreadHandle) {
        self.thread = Some(thread.clone());
        self.refresh_timer.set_interval_ms(self.interval_ms);
        self.refresh_timer.set_one_shot(false);
        if let Err(e) = thread
            .init_timer(&mut self.refresh_timer)
            .and_then(|()| self.refresh_timer.start())
        {
            tracing::error!(error = %e, "unable to start the cache refresh timer");
        }
        self.arm_save_timer(thread);
    }

    fn on_quit(&mut self) {
        self.refresh_timer.stop();
        self.save_timer.stop();
    }

    fn on_timer(&mut self, timer_id: u64) {
        if timer_id == self.refresh_timer.id() {
            self.refresh(false);
        } else if timer_id == self.save_timer.id() {
            self.save();
        }
    }
}
