//! The resolver channel and its worker thread.
//!
//! One channel exists per cache instance. Queries go out over UDP to the
//! configured named servers with a per-try timeout and retry-across-servers
//! policy; the worker thread sleeps on the channel's sockets (or, when idle,
//! on the active-query semaphore) and completes query objects as answers
//! arrive. Completions run after the channel lock is released, so a
//! completion callback may submit new queries.

use std::collections::{BTreeMap, HashMap};
use std::net::{IpAddr, SocketAddr, UdpSocket};
use std::os::fd::{AsRawFd, RawFd};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use epcore_sync::{Event, Semaphore};
use parking_lot::Mutex;

use crate::error::{DnsError, Result};
use crate::query::{Query, QueryCallback};
use crate::record::QueryKey;
use crate::wire;

/// Tries per server before a query fails with a timeout.
const TRIES_PER_SERVER: usize = 2;
/// Per-try timeout, matching the channel option the original stack uses.
const TRY_TIMEOUT: Duration = Duration::from_millis(1000);

/// A configured named server.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NamedServer {
    pub address: IpAddr,
    pub udp_port: u16,
    pub tcp_port: u16,
}

/// How a submitted query reports completion.
pub(crate) enum Completion {
    /// Synchronous waiter: the result lands in the slot, then the event is
    /// set.
    Waiter(Waiter),
    /// Asynchronous callback, run on the worker thread.
    Callback(QueryCallback),
}

/// Completion rendezvous for synchronous queries.
#[derive(Clone)]
pub(crate) struct Waiter {
    pub event: Arc<Event>,
    pub slot: Arc<Mutex<Option<Arc<Query>>>>,
}

impl Waiter {
    pub fn new() -> Result<Self> {
        Ok(Self {
            event: Arc::new(Event::new()?),
            slot: Arc::new(Mutex::new(None)),
        })
    }
}

struct Pending {
    key: QueryKey,
    deadline: Instant,
    server_idx: usize,
    tries_left: usize,
    completion: Completion,
}

struct Channel {
    sock_v4: Option<UdpSocket>,
    sock_v6: Option<UdpSocket>,
    servers: Vec<SocketAddr>,
    pending: HashMap<u16, Pending>,
    next_wire_id: u16,
}

impl Channel {
    fn socket_for(&mut self, addr: &SocketAddr) -> Result<&UdpSocket> {
        let slot = match addr {
            SocketAddr::V4(_) => &mut self.sock_v4,
            SocketAddr::V6(_) => &mut self.sock_v6,
        };
        if slot.is_none() {
            let bind: SocketAddr = match addr {
                SocketAddr::V4(_) => "0.0.0.0:0".parse().expect("literal"),
                SocketAddr::V6(_) => "[::]:0".parse().expect("literal"),
            };
            let sock = UdpSocket::bind(bind).map_err(|e| DnsError::io("bind", e))?;
            sock.set_nonblocking(true)
                .map_err(|e| DnsError::io("set_nonblocking", e))?;
            *slot = Some(sock);
        }
        Ok(slot.as_ref().expect("socket just created"))
    }

    fn send_to_server(&mut self, wire_id: u16, key: &QueryKey, server_idx: usize) -> Result<()> {
        if self.servers.is_empty() {
            return Err(DnsError::NoServers);
        }
        let server = self.servers[server_idx % self.servers.len()];
        let packet = wire::encode_query(wire_id, key.domain(), key.rtype())?;
        let sock = self.socket_for(&server)?;
        sock.send_to(&packet, server)
            .map_err(|e| DnsError::io("send_to", e))?;
        Ok(())
    }

    fn assign_wire_id(&mut self) -> u16 {
        loop {
            self.next_wire_id = self.next_wire_id.wrapping_add(1);
            if !self.pending.contains_key(&self.next_wire_id) {
                return self.next_wire_id;
            }
        }
    }

    fn poll_fds(&self) -> Vec<RawFd> {
        let mut fds = Vec::with_capacity(2);
        if let Some(s) = &self.sock_v4 {
            fds.push(s.as_raw_fd());
        }
        if let Some(s) = &self.sock_v6 {
            fds.push(s.as_raw_fd());
        }
        fds
    }
}

type UpdateSink = Box<dyn Fn(&Arc<Query>) + Send + Sync>;

/// Drives the channel: submission, retries, completion fan-out.
pub(crate) struct QueryProcessor {
    channel: Mutex<Channel>,
    servers: Mutex<BTreeMap<IpAddr, NamedServer>>,
    active: Semaphore,
    shutdown: AtomicBool,
    worker: Mutex<Option<JoinHandle<()>>>,
    update_sink: UpdateSink,
}

impl QueryProcessor {
    /// Creates the processor; `update_sink` is invoked (from the worker
    /// thread) with every error-free completed query, before the caller's
    /// completion is delivered.
    pub fn new(update_sink: UpdateSink) -> Result<Arc<Self>> {
        let processor = Arc::new(Self {
            channel: Mutex::new(Channel {
                sock_v4: None,
                sock_v6: None,
                servers: Vec::new(),
                pending: HashMap::new(),
                next_wire_id: rand::random(),
            }),
            servers: Mutex::new(BTreeMap::new()),
            active: Semaphore::new(0)?,
            shutdown: AtomicBool::new(false),
            worker: Mutex::new(None),
            update_sink,
        });

        let worker_ref = Arc::clone(&processor);
        let join = std::thread::Builder::new()
            .name("epcore-dns-worker".into())
            .spawn(move || worker_ref.worker_main())
            .map_err(|e| DnsError::io("spawn dns worker", e))?;
        *processor.worker.lock() = Some(join);
        Ok(processor)
    }

    /// Registers (or replaces) a named server. Takes effect at the next
    /// [`QueryProcessor::apply_named_servers`].
    pub fn add_named_server(&self, address: &str, udp_port: u16, tcp_port: u16) -> Result<()> {
        let address: IpAddr = address
            .parse()
            .map_err(|_| DnsError::BadServerAddress(address.to_owned()))?;
        self.servers.lock().insert(
            address,
            NamedServer {
                address,
                udp_port,
                tcp_port,
            },
        );
        Ok(())
    }

    pub fn remove_named_server(&self, address: &str) -> Result<()> {
        let address: IpAddr = address
            .parse()
            .map_err(|_| DnsError::BadServerAddress(address.to_owned()))?;
        self.servers.lock().remove(&address);
        Ok(())
    }

    /// Rebuilds the channel's server list from the registered set, in one
    /// step.
    pub fn apply_named_servers(&self) -> Result<()> {
        let servers: Vec<SocketAddr> = self
            .servers
            .lock()
            .values()
            .map(|ns| SocketAddr::new(ns.address, ns.udp_port))
            .collect();
        self.channel.lock().servers = servers;
        Ok(())
    }

    /// Count of queries currently in flight.
    pub fn active_queries(&self) -> i64 {
        self.active.current_count()
    }

    /// Submits a query. The completion runs on the worker thread (or, for
    /// waiters, the waiting thread resumes once the slot is filled).
    pub fn submit(&self, key: QueryKey, completion: Completion) -> Result<()> {
        if self.shutdown.load(Ordering::SeqCst) {
            return Err(DnsError::ShuttingDown);
        }

        self.active.increment()?;

        let mut channel = self.channel.lock();
        let wire_id = channel.assign_wire_id();
        if let Err(e) = channel.send_to_server(wire_id, &key, 0) {
            drop(channel);
            // finalize releases the in-flight slot taken above
            self.finalize(
                Pending {
                    key: key.clone(),
                    deadline: Instant::now(),
                    server_idx: 0,
                    tries_left: 0,
                    completion,
                },
                Arc::new(Query::failed(key, e.to_string())),
            );
            return Ok(());
        }
        let tries = channel.servers.len().max(1) * TRIES_PER_SERVER;
        channel.pending.insert(
            wire_id,
            Pending {
                key,
                deadline: Instant::now() + TRY_TIMEOUT,
                server_idx: 0,
                tries_left: tries - 1,
                completion,
            },
        );
        Ok(())
    }

    /// Stops the worker once the in-flight count drains.
    pub fn shutdown(&self) {
        self.shutdown.store(true, Ordering::SeqCst);
        let _ = self.active.increment();
        let join = self.worker.lock().take();
        if let Some(join) = join {
            let _ = join.join();
        }
    }

    fn worker_main(self: Arc<Self>) {
        loop {
            let count = self.active.current_count();
            if count == 0 {
                // wait for a new query to be submitted or for shutdown
                if self.active.decrement(true).is_err() {
                    break;
                }
                if self.shutdown.load(Ordering::SeqCst) && self.active.current_count() == 0 {
                    break;
                }
                let _ = self.active.increment();
            } else if self.shutdown.load(Ordering::SeqCst) && count == 1 {
                // only the shutdown bump remains
                break;
            }

            self.wait_for_completion();
        }
    }

    /// Services the channel until no queries remain in flight.
    fn wait_for_completion(&self) {
        loop {
            let (fds, timeout_ms) = {
                let channel = self.channel.lock();
                if channel.pending.is_empty() {
                    return;
                }
                let now = Instant::now();
                let nearest = channel
                    .pending
                    .values()
                    .map(|p| p.deadline)
                    .min()
                    .unwrap_or(now);
                let timeout = nearest.saturating_duration_since(now);
                (channel.poll_fds(), timeout.as_millis() as i32)
            };

            let mut pollfds: Vec<libc::pollfd> = fds
                .iter()
                .map(|fd| libc::pollfd {
                    fd: *fd,
                    events: libc::POLLIN,
                    revents: 0,
                })
                .collect();
            unsafe {
                libc::poll(
                    pollfds.as_mut_ptr(),
                    pollfds.len() as libc::nfds_t,
                    timeout_ms.max(0),
                );
            }

            let mut completions: Vec<(Pending, Arc<Query>)> = Vec::new();
            {
                let mut channel = self.channel.lock();
                self.drain_sockets(&mut channel, &mut completions);
                self.expire_pending(&mut channel, &mut completions);
            }
            for (pending, query) in completions {
                self.finalize(pending, query);
            }
        }
    }

    fn drain_sockets(&self, channel: &mut Channel, out: &mut Vec<(Pending, Arc<Query>)>) {
        let mut buf = [0u8; 4096];
        for sock in [channel.sock_v4.as_ref(), channel.sock_v6.as_ref()]
            .into_iter()
            .flatten()
        {
            loop {
                let len = match sock.recv_from(&mut buf) {
                    Ok((len, _)) => len,
                    Err(_) => break,
                };
                match wire::parse_response(&buf[..len]) {
                    Ok(parsed) => {
                        let Some(pending) = channel.pending.remove(&parsed.wire_id) else {
                            continue; // late or spoofed answer
                        };
                        let query = if parsed.rcode == 0 {
                            Arc::new(Query::completed(
                                pending.key.clone(),
                                parsed.answers,
                                parsed.additional,
                            ))
                        } else {
                            Arc::new(Query::failed(
                                pending.key.clone(),
                                DnsError::ResponseCode(parsed.rcode).to_string(),
                            ))
                        };
                        out.push((pending, query));
                    }
                    Err(e) => {
                        tracing::debug!(error = %e, "discarding unparseable datagram");
                    }
                }
            }
        }
    }

    fn expire_pending(&self, channel: &mut Channel, out: &mut Vec<(Pending, Arc<Query>)>) {
        let now = Instant::now();
        let expired: Vec<u16> = channel
            .pending
            .iter()
            .filter(|(_, p)| p.deadline <= now)
            .map(|(id, _)| *id)
            .collect();

        for wire_id in expired {
            let mut pending = channel.pending.remove(&wire_id).expect("pending present");
            if pending.tries_left > 0 {
                pending.tries_left -= 1;
                pending.server_idx += 1;
                pending.deadline = now + TRY_TIMEOUT;
                let idx = pending.server_idx;
                if channel.send_to_server(wire_id, &pending.key, idx).is_ok() {
                    channel.pending.insert(wire_id, pending);
                    continue;
                }
            }
            let query = Arc::new(Query::failed(
                pending.key.clone(),
                DnsError::Timeout.to_string(),
            ));
            out.push((pending, query));
        }
    }

    /// Runs the completion protocol for one finished query: release the
    /// in-flight slot, update the cache on success, then notify the caller.
    fn finalize(&self, pending: Pending, query: Arc<Query>) {
        let _ = self.active.decrement(false);

        if !query.error() {
            (self.update_sink)(&query);
        }

        match pending.completion {
            Completion::Waiter(waiter) => {
                *waiter.slot.lock() = Some(query);
                waiter.event.set();
            }
            Completion::Callback(cb) => cb(query, false),
        }
    }
}

impl std::fmt::Debug for QueryProcessor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("QueryProcessor")
            .field("active", &self.active.current_count())
            .field("shutdown", &self.shutdown.load(Ordering::SeqCst))
            .finish_non_exhaustive()
    }
}
