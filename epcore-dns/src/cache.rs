//! The DNS cache: TTL-aware map of completed queries, one instance per
//! named-server id.

use std::collections::HashMap;
use std::sync::atomic::{AtomicI64, AtomicU32, Ordering};
use std::sync::{Arc, OnceLock, Weak};

use epcore_sync::Semaphore;
use epcore_thread::{install_timer_signal_handler, PrivateEventThread};
use parking_lot::{Mutex, RwLock};

use crate::error::{DnsError, Result};
use crate::query::Query;
use crate::record::{QueryKey, RecordType};
use crate::refresher::{RefresherHandler, RefresherShared};
use crate::resolver::{Completion, QueryProcessor, Waiter};

/// The default named-server id.
pub const NS_DEFAULT: i32 = 0;

static REFRESH_CONCURRENT: AtomicU32 = AtomicU32::new(10);
static REFRESH_PERCENT: AtomicU32 = AtomicU32::new(80);
static REFRESH_INTERVAL_MS: AtomicI64 = AtomicI64::new(60_000);

pub(crate) struct CacheInner {
    nsid: i32,
    map: RwLock<HashMap<QueryKey, Arc<Query>>>,
    qp: OnceLock<Arc<QueryProcessor>>,
    refresher: Mutex<Option<PrivateEventThread<RefresherHandler>>>,
    pub(crate) refresher_shared: Arc<RefresherShared>,
    pub(crate) refresh_sem: Arc<Semaphore>,
    new_query_count: AtomicI64,
}

impl CacheInner {
    pub(crate) fn qp(&self) -> &Arc<QueryProcessor> {
        self.qp.get().expect("processor set during construction")
    }

    pub(crate) fn lookup(&self, key: &QueryKey) -> Option<Arc<Query>> {
        self.map.read().get(key).cloned()
    }

    /// Inserts an error-free completed query, replacing any previous entry
    /// under the same key. Runs on the resolver worker thread.
    pub(crate) fn update(&self, query: &Arc<Query>) {
        if query.error() {
            return;
        }
        let mut map = self.map.write();
        if map.insert(query.key().clone(), Arc::clone(query)).is_none() {
            self.new_query_count.fetch_add(1, Ordering::SeqCst);
        }
    }

    /// Keys whose TTL consumption has reached `percent`, plus keys already
    /// expired.
    pub(crate) fn expiring_keys(&self, percent: u32) -> Vec<QueryKey> {
        self.map
            .read()
            .iter()
            .filter(|(_, q)| q.is_expired() || q.percent_consumed() >= percent)
            .map(|(k, _)| k.clone())
            .collect()
    }

    pub(crate) fn all_keys(&self) -> Vec<QueryKey> {
        self.map.read().keys().cloned().collect()
    }

    /// Resets the count of keys added since the last save, returning the
    /// previous value.
    pub(crate) fn reset_new_query_count(&self) -> i64 {
        self.new_query_count.swap(0, Ordering::SeqCst)
    }

    /// Bounded async refresh submission used by the refresher and the query
    /// file loader: waits on the concurrency semaphore, releases it when the
    /// query completes.
    pub(crate) fn submit_bounded(&self, key: QueryKey, ignore_cache: bool) -> Result<()> {
        if !ignore_cache {
            if let Some(q) = self.lookup(&key) {
                if !q.is_expired() {
                    return Ok(());
                }
            }
        }
        self.refresh_sem.decrement(true)?;
        let sem = Arc::clone(&self.refresh_sem);
        let completion = Completion::Callback(Box::new(move |_q, _hit| {
            let _ = sem.increment();
        }));
        if let Err(e) = self.qp().submit(key, completion) {
            let _ = self.refresh_sem.increment();
            return Err(e);
        }
        Ok(())
    }
}

/// Handle to a cache instance. Cheap to clone; all clones share the same
/// underlying cache.
#[derive(Clone)]
pub struct Cache {
    inner: Arc<CacheInner>,
}

static INSTANCES: Mutex<Option<HashMap<i32, Cache>>> = Mutex::new(None);

impl Cache {
    /// Maximum in-flight background refresh queries for caches created after
    /// this call.
    pub fn set_refresh_concurrent(concurrent: u32) {
        REFRESH_CONCURRENT.store(concurrent.max(1), Ordering::SeqCst);
    }

    pub fn refresh_concurrent() -> u32 {
        REFRESH_CONCURRENT.load(Ordering::SeqCst)
    }

    /// TTL-consumption percentage at which the refresher re-queries an
    /// entry.
    pub fn set_refresh_percent(percent: u32) {
        REFRESH_PERCENT.store(percent.min(100), Ordering::SeqCst);
    }

    pub fn refresh_percent() -> u32 {
        REFRESH_PERCENT.load(Ordering::SeqCst)
    }

    /// Interval between refresher scans.
    pub fn set_refresh_interval_ms(interval_ms: i64) {
        REFRESH_INTERVAL_MS.store(interval_ms.max(1), Ordering::SeqCst);
    }

    pub fn refresh_interval_ms() -> i64 {
        REFRESH_INTERVAL_MS.load(Ordering::SeqCst)
    }

    /// Retrieves (creating on first use) the cache for `nsid`.
    pub fn instance(nsid: i32) -> Result<Self> {
        let mut instances = INSTANCES.lock();
        let map = instances.get_or_insert_with(HashMap::new);
        if let Some(cache) = map.get(&nsid) {
            return Ok(cache.clone());
        }
        let cache = Self::create(nsid)?;
        map.insert(nsid, cache.clone());
        Ok(cache)
    }

    /// The default instance.
    pub fn default_instance() -> Result<Self> {
        Self::instance(NS_DEFAULT)
    }

    /// Shuts down every cache instance: refresher threads first, then the
    /// resolver workers.
    pub fn shutdown_all() {
        let instances = INSTANCES.lock().take();
        if let Some(map) = instances {
            for (_, cache) in map {
                cache.shutdown();
            }
        }
    }

    fn create(nsid: i32) -> Result<Self> {
        install_timer_signal_handler()?;

        let refresher_shared = Arc::new(RefresherShared::default());
        let inner = Arc::new(CacheInner {
            nsid,
            map: RwLock::new(HashMap::new()),
            qp: OnceLock::new(),
            refresher: Mutex::new(None),
            refresher_shared,
            refresh_sem: Arc::new(Semaphore::new(i64::from(Self::refresh_concurrent()))?),
            new_query_count: AtomicI64::new(0),
        });

        let weak: Weak<CacheInner> = Arc::downgrade(&inner);
        let qp = QueryProcessor::new(Box::new(move |query| {
            if let Some(cache) = weak.upgrade() {
                cache.update(query);
            }
        }))?;
        inner
            .qp
            .set(qp)
            .unwrap_or_else(|_| unreachable!("processor set once"));

        let handler = RefresherHandler::new(
            Arc::downgrade(&inner),
            Self::refresh_percent(),
            Self::refresh_interval_ms(),
            Arc::clone(&inner.refresher_shared),
        );
        let refresher = PrivateEventThread::init(handler, 1024, false)?;
        *inner.refresher.lock() = Some(refresher);

        tracing::debug!(nsid, "dns cache created");
        Ok(Self { inner })
    }

    /// The named-server id this cache serves.
    pub fn named_server_id(&self) -> i32 {
        self.inner.nsid
    }

    /// Registers a named server; call [`Cache::apply_named_servers`] to make
    /// the set effective.
    pub fn add_named_server(&self, address: &str, udp_port: u16, tcp_port: u16) -> Result<()> {
        self.inner.qp().add_named_server(address, udp_port, tcp_port)
    }

    pub fn remove_named_server(&self, address: &str) -> Result<()> {
        self.inner.qp().remove_named_server(address)
    }

    pub fn apply_named_servers(&self) -> Result<()> {
        self.inner.qp().apply_named_servers()
    }

    /// Synchronous query. Returns the query and whether it was served from
    /// the cache.
    pub fn query(
        &self,
        rtype: RecordType,
        domain: &str,
        ignore_cache: bool,
    ) -> Result<(Arc<Query>, bool)> {
        let key = QueryKey::new(rtype, domain);

        if !ignore_cache {
            if let Some(q) = self.inner.lookup(&key) {
                if !q.is_expired() {
                    return Ok((q, true));
                }
            }
        }

        let waiter = Waiter::new()?;
        self.inner
            .qp()
            .submit(key, Completion::Waiter(waiter.clone()))?;
        waiter.event.wait(None);
        let query = waiter
            .slot
            .lock()
            .take()
            .ok_or(DnsError::Parse("query completed without a result"))?;
        Ok((query, false))
    }

    /// Asynchronous query; `callback(query, cache_hit)` runs on the resolver
    /// worker thread (or inline on a cache hit).
    pub fn query_async(
        &self,
        rtype: RecordType,
        domain: &str,
        callback: impl FnOnce(Arc<Query>, bool) + Send + 'static,
        ignore_cache: bool,
    ) -> Result<()> {
        let key = QueryKey::new(rtype, domain);

        if !ignore_cache {
            if let Some(q) = self.inner.lookup(&key) {
                if !q.is_expired() {
                    callback(q, true);
                    return Ok(());
                }
            }
        }

        self.inner
            .qp()
            .submit(key, Completion::Callback(Box::new(callback)))
    }

    /// Looks up a cached entry without querying.
    pub fn lookup(&self, rtype: RecordType, domain: &str) -> Option<Arc<Query>> {
        self.inner.lookup(&QueryKey::new(rtype, domain))
    }

    /// Count of cached entries.
    pub fn len(&self) -> usize {
        self.inner.map.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Replays the persisted query file, submitting an async query for each
    /// entry, bounded by the refresh concurrency.
    pub fn load_queries(&self, path: &str) -> Result<()> {
        crate::refresher::load_queries(&self.inner, path)
    }

    /// Configures periodic persistence of the query list.
    pub fn init_save_queries(&self, path: &str, save_frequency_ms: i64) -> Result<()> {
        self.inner
            .refresher_shared
            .set_save_config(path, save_frequency_ms);
        self.send_refresher(crate::refresher::CR_INIT_SAVE)
    }

    /// Asks the refresher to persist the query list now.
    pub fn save_queries(&self) -> Result<()> {
        self.send_refresher(crate::refresher::CR_SAVE_QUERIES)
    }

    /// Asks the refresher to re-query every cached key.
    pub fn force_refresh(&self) -> Result<()> {
        self.send_refresher(crate::refresher::CR_FORCE_REFRESH)
    }

    /// Resets the new-query counter, returning the previous value.
    pub fn reset_new_query_count(&self) -> i64 {
        self.inner.reset_new_query_count()
    }

    fn send_refresher(&self, id: u32) -> Result<()> {
        let refresher = self.inner.refresher.lock();
        if let Some(thread) = refresher.as_ref() {
            thread.handle().send_id(id)?;
        }
        Ok(())
    }

    /// Stops the refresher thread and the resolver worker, and removes this
    /// instance from the registry.
    pub fn shutdown(&self) {
        {
            let mut instances = INSTANCES.lock();
            if let Some(map) = instances.as_mut() {
                map.remove(&self.inner.nsid);
            }
        }
        let refresher = self.inner.refresher.lock().take();
        if let Some(thread) = refresher {
            let _ = thread.quit();
            let _ = thread.join();
        }
        self.inner.qp().shutdown();
    }
}

impl std::fmt::Debug for Cache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Cache")
            .field("nsid", &self.inner.nsid)
            .field("entries", &self.len())
            .finish()
    }
}
