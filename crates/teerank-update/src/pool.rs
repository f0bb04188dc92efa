//! Bounded pool of in-flight UDP queries.
//!
//! Entries move idle -> pending -> (failed | consumed). Only
//! [`Pool::MAX_PENDING`] queries are ever in flight at once; an entry
//! that doesn't get a reply within `MAX_PING` is retried up to
//! `MAX_RETRIES` times before it's reported as failed. This replaces
//! the original's three intrusive doubly-linked lists with plain
//! `VecDeque`/`Vec` storage — nothing here needs pointer stability.

use std::collections::VecDeque;
use std::net::SocketAddr;
use std::time::{Duration, Instant};

use teerank_net::packet::Transport;

pub const MAX_PENDING: usize = 25;
pub const MAX_RETRIES: u32 = 2;
pub const MAX_PING: Duration = Duration::from_millis(999);

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PoolEntry {
    pub netclient_id: usize,
    pub addr: SocketAddr,
    pub payload: Vec<u8>,
    pub retries: u32,
    /// Set once a reply (even a partial one, e.g. one packet of a
    /// multi-packet master list) has been seen for this attempt. A
    /// failed entry with this set is known to have been reachable, just
    /// unresponsive after that — a timeout handler treats that
    /// differently from total silence.
    pub polled: bool,
}

struct PendingEntry {
    entry: PoolEntry,
    start: Instant,
}

pub enum PoolEvent {
    Reply {
        netclient_id: usize,
        addr: SocketAddr,
        payload: Vec<u8>,
    },
    Failed(PoolEntry),
}

#[derive(Default)]
pub struct Pool {
    idle: VecDeque<PoolEntry>,
    pending: Vec<PendingEntry>,
    failed: Vec<PoolEntry>,
}

impl Pool {
    pub fn new() -> Self {
        Pool {
            idle: VecDeque::new(),
            pending: Vec::new(),
            failed: Vec::new(),
        }
    }

    pub fn add(&mut self, netclient_id: usize, addr: SocketAddr, payload: Vec<u8>) {
        self.idle.push_back(PoolEntry {
            netclient_id,
            addr,
            payload,
            retries: 0,
            polled: false,
        });
    }

    pub fn pending_count(&self) -> usize {
        self.pending.len()
    }

    pub fn is_idle(&self) -> bool {
        self.idle.is_empty() && self.pending.is_empty() && self.failed.is_empty()
    }

    fn requeue_or_fail(&mut self, mut entry: PoolEntry) {
        if entry.retries >= MAX_RETRIES {
            self.failed.push(entry);
        } else {
            entry.retries += 1;
            entry.polled = false;
            self.idle.push_back(entry);
        }
    }

    fn fill_pending(&mut self, transport: &Transport) {
        while self.pending.len() < MAX_PENDING {
            let Some(entry) = self.idle.pop_front() else {
                break;
            };
            match transport.send(entry.addr, &entry.payload) {
                Ok(()) => self.pending.push(PendingEntry {
                    entry,
                    start: Instant::now(),
                }),
                Err(_) => self.requeue_or_fail(entry),
            }
        }
    }

    fn clean_expired(&mut self) {
        let now = Instant::now();
        let mut expired = Vec::new();
        self.pending.retain(|p| {
            if now.duration_since(p.start) >= MAX_PING {
                expired.push(p.entry.clone());
                false
            } else {
                true
            }
        });
        for entry in expired {
            self.requeue_or_fail(entry);
        }
    }

    /// Marks a pending entry's reply as "still being assembled" —
    /// refreshes its start time so a legacy-64 continuation packet
    /// doesn't time out between two parts of the same reply, without
    /// removing it from the pending set.
    pub fn touch(&mut self, addr: SocketAddr) {
        if let Some(p) = self.pending.iter_mut().find(|p| p.entry.addr == addr) {
            p.start = Instant::now();
            p.entry.polled = true;
        }
    }

    /// Removes a fully-handled reply from the pending set.
    pub fn complete(&mut self, addr: SocketAddr) {
        self.pending.retain(|p| p.entry.addr != addr);
    }

    /// Drives the pool forward by one step: fills pending slots from
    /// idle, then either reports a failed entry, a reply, or that
    /// nothing happened this round.
    pub fn poll(&mut self, transport: &mut Transport) -> Option<PoolEvent> {
        loop {
            self.fill_pending(transport);

            if let Some(entry) = self.failed.pop() {
                return Some(PoolEvent::Failed(entry));
            }

            if self.pending.is_empty() {
                return None;
            }

            match transport.recv() {
                Ok(Some((addr, payload))) => {
                    if self.pending.iter().any(|p| p.entry.addr == addr) {
                        let netclient_id = self
                            .pending
                            .iter()
                            .find(|p| p.entry.addr == addr)
                            .unwrap()
                            .entry
                            .netclient_id;
                        self.touch(addr);
                        return Some(PoolEvent::Reply {
                            netclient_id,
                            addr,
                            payload,
                        });
                    }
                    self.clean_expired();
                }
                Ok(None) => {
                    self.clean_expired();
                    return None;
                }
                Err(_) => {
                    self.clean_expired();
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn addr(port: u16) -> SocketAddr {
        format!("127.0.0.1:{port}").parse().unwrap()
    }

    #[test]
    fn fresh_entry_starts_idle() {
        let pool = Pool::new();
        assert!(pool.is_idle());
    }

    #[test]
    fn added_entry_is_not_idle() {
        let mut pool = Pool::new();
        pool.add(0, addr(1), b"gie3".to_vec());
        assert!(!pool.is_idle());
    }

    #[test]
    fn requeue_then_fail_after_max_retries() {
        let mut pool = Pool::new();
        let mut entry = PoolEntry {
            netclient_id: 0,
            addr: addr(1),
            payload: vec![],
            retries: 0,
            polled: false,
        };
        pool.requeue_or_fail(entry.clone());
        assert_eq!(pool.idle.len(), 1);
        assert_eq!(pool.idle[0].retries, 1);

        entry.retries = MAX_RETRIES;
        pool.requeue_or_fail(entry);
        assert_eq!(pool.failed.len(), 1);
    }

    #[test]
    fn complete_removes_from_pending() {
        let mut pool = Pool::new();
        pool.pending.push(PendingEntry {
            entry: PoolEntry {
                netclient_id: 0,
                addr: addr(1),
                payload: vec![],
                retries: 0,
                polled: false,
            },
            start: Instant::now(),
        });
        pool.complete(addr(1));
        assert!(pool.pending.is_empty());
    }

    #[test]
    fn touch_refreshes_start_without_removing() {
        let mut pool = Pool::new();
        pool.pending.push(PendingEntry {
            entry: PoolEntry {
                netclient_id: 0,
                addr: addr(1),
                payload: vec![],
                retries: 0,
                polled: false,
            },
            start: Instant::now() - Duration::from_millis(900),
        });
        pool.touch(addr(1));
        assert_eq!(pool.pending.len(), 1);
        assert!(pool.pending[0].start.elapsed() < Duration::from_millis(100));
        assert!(pool.pending[0].entry.polled);
    }

    #[test]
    fn retry_resets_polled_but_final_failure_keeps_it() {
        let mut pool = Pool::new();
        let mut entry = PoolEntry {
            netclient_id: 0,
            addr: addr(1),
            payload: vec![],
            retries: 0,
            polled: true,
        };
        pool.requeue_or_fail(entry.clone());
        assert!(!pool.idle[0].polled);

        entry.retries = MAX_RETRIES;
        entry.polled = true;
        pool.requeue_or_fail(entry);
        assert!(pool.failed[0].polled);
    }
}
