//! Wires the scheduler, pool, netclient registry, and transport together
//! into the single control loop the binary runs.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use log::{debug, warn};
use rusqlite::Connection;
use teerank_common::error::DbError;
use teerank_common::model::Master;
use teerank_net::addr::MasterAddrCursor;
use teerank_net::packet::Transport;
use teerank_net::unpack::{self, PartialServerInfo, PacketType, UnpackOutcome};

use crate::handlers;
use crate::netclient::{NetClientKind, NetClientRegistry};
use crate::pool::{Pool, PoolEvent};
use crate::rank;
use crate::request;
use crate::scheduler::{JobKind, Scheduler};
use crate::store;

/// The reference implementation's well-known master list, seeded once
/// when the `masters` table is empty.
pub const DEFAULT_MASTERS: &[(&str, &str)] = &[
    ("master1.teeworlds.com", "8300"),
    ("master2.teeworlds.com", "8300"),
    ("master3.teeworlds.com", "8300"),
    ("master4.teeworlds.com", "8300"),
];

/// How often ranks are recomputed from the `pending` staging table.
const RECOMPUTE_INTERVAL_SECS: i64 = 300;
/// A brand new database has no ranks at all; recompute shortly after
/// startup instead of waiting out the first full interval, so a fresh
/// install gets a player list with ranks quickly.
const WARMUP_RECOMPUTE_SECS: i64 = 10;
/// Upper bound on one sleep chunk, so a termination signal is never
/// delayed by more than this long.
const MAX_SLEEP: Duration = Duration::from_secs(1);

pub fn now_unix() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs() as i64
}

pub struct Engine {
    conn: Connection,
    scheduler: Scheduler,
    pool: Pool,
    registry: NetClientRegistry,
    transport: Transport,
    /// In-flight server decodes, keyed by sender address, so a
    /// multi-packet legacy-64 reply can be assembled across calls.
    partials: HashMap<SocketAddr, PartialServerInfo>,
}

impl Engine {
    pub fn new(conn: Connection, transport: Transport) -> Self {
        Engine {
            conn,
            scheduler: Scheduler::new(),
            pool: Pool::new(),
            registry: NetClientRegistry::new(),
            transport,
            partials: HashMap::new(),
        }
    }

    /// Populates the registry and scheduler from whatever was persisted
    /// from the previous run, seeding the default master list if none
    /// are known yet.
    pub fn load(&mut self) -> Result<(), DbError> {
        let now = now_unix();

        let masters = store::all_masters(&self.conn)?;
        if masters.is_empty() {
            for (node, service) in DEFAULT_MASTERS {
                let master = Master {
                    node: node.to_string(),
                    service: service.to_string(),
                    lastseen: 0,
                    expire: now,
                };
                store::write_master(&self.conn, &master)?;
            }
        }

        for master in store::all_masters(&self.conn)? {
            if let Some(addr) = resolve(&master.node, &master.service) {
                if self.registry.add(NetClientKind::Master, addr).is_some() {
                    self.scheduler.schedule(master.expire.max(now), JobKind::PollMaster(addr));
                }
            }
        }

        for server in store::all_servers(&self.conn)? {
            if let Ok(addr) = format!("{}:{}", server.ip, server.port).parse() {
                if self.registry.add(NetClientKind::Server, addr).is_some() {
                    self.scheduler.schedule(server.expire.max(now), JobKind::PollServer(addr));
                }
            }
        }

        self.scheduler.schedule(now + WARMUP_RECOMPUTE_SECS, JobKind::RecomputeRanks);
        Ok(())
    }

    /// Runs until `stop` is set, checking it at least once per second.
    pub fn run(&mut self, stop: &AtomicBool) {
        while !stop.load(Ordering::Relaxed) {
            self.tick();
        }
    }

    fn tick(&mut self) {
        let now = now_unix();

        if let Some(job) = self.scheduler.next_schedule(now) {
            self.dispatch(job.kind, now);
            return;
        }

        if !self.pool.is_idle() {
            if let Some(event) = self.pool.poll(&mut self.transport) {
                if let Err(e) = self.handle_pool_event(event, now) {
                    warn!("handling poll reply failed: {e}");
                }
            }
            return;
        }

        let wait = self.scheduler.waiting_time(now).clamp(0, MAX_SLEEP.as_secs() as i64);
        thread::sleep(Duration::from_secs(wait.max(0) as u64).min(MAX_SLEEP));
    }

    fn dispatch(&mut self, kind: JobKind, now: i64) {
        match kind {
            JobKind::PollServer(addr) => {
                if let Some(id) = self.registry.find_by_addr(addr) {
                    self.pool.add(id, addr, request::build_info_request());
                }
            }
            JobKind::PollMaster(addr) => {
                if let Some(id) = self.registry.find_by_addr(addr) {
                    if let Some(master) = self.find_master_by_addr(addr) {
                        if let Err(e) = store::unreference_servers(&self.conn, &master.node, &master.service) {
                            warn!("failed to unreference servers for master {}: {e}", master.node);
                        }
                    }
                    self.pool.add(id, addr, request::build_list_request());
                }
            }
            JobKind::RecomputeRanks => {
                if let Err(e) = rank::recompute_ranks(&mut self.conn, now) {
                    warn!("rank recomputation failed: {e}");
                }
                let _ = self.conn.execute_batch("PRAGMA wal_checkpoint(PASSIVE);");
                self.scheduler.schedule(now + RECOMPUTE_INTERVAL_SECS, JobKind::RecomputeRanks);
            }
        }
    }

    fn find_master_by_addr(&self, addr: SocketAddr) -> Option<Master> {
        store::all_masters(&self.conn)
            .ok()?
            .into_iter()
            .find(|m| resolve(&m.node, &m.service) == Some(addr))
    }

    fn handle_pool_event(&mut self, event: PoolEvent, now: i64) -> Result<(), DbError> {
        match event {
            PoolEvent::Reply {
                netclient_id,
                addr,
                payload,
            } => {
                let Some(nc) = self.registry.get(netclient_id).cloned() else {
                    return Ok(());
                };
                match nc.kind {
                    NetClientKind::Server => self.handle_server_packet(addr, &payload, now),
                    NetClientKind::Master => self.handle_master_packet(addr, &payload, now),
                }
            }
            PoolEvent::Failed(entry) => {
                let Some(nc) = self.registry.get(entry.netclient_id).cloned() else {
                    return Ok(());
                };
                match nc.kind {
                    NetClientKind::Server => {
                        self.partials.remove(&entry.addr);
                        handlers::handle_server_timeout(
                            &self.conn,
                            &mut self.scheduler,
                            &mut self.registry,
                            entry.netclient_id,
                            now,
                        )
                    }
                    NetClientKind::Master => {
                        if let Some(master) = self.find_master_by_addr(entry.addr) {
                            handlers::handle_master_timeout(
                                &self.conn,
                                &mut self.scheduler,
                                now,
                                &master.node,
                                &master.service,
                                &entry,
                            )
                        } else {
                            Ok(())
                        }
                    }
                }
            }
        }
    }

    fn handle_server_packet(&mut self, addr: SocketAddr, payload: &[u8], now: i64) -> Result<(), DbError> {
        let state = self
            .partials
            .entry(addr)
            .or_insert_with(|| PartialServerInfo::new(&addr.ip().to_string(), addr.port()));

        match unpack::unpack_server_info(payload, state) {
            Ok(UnpackOutcome::Incomplete) => {
                self.pool.touch(addr);
                Ok(())
            }
            Ok(UnpackOutcome::Complete(server)) => {
                self.partials.remove(&addr);
                self.pool.complete(addr);
                handlers::handle_server_reply(&self.conn, &mut self.scheduler, now, server)
            }
            Err(e) => {
                debug!("dropping malformed server packet from {addr}: {e}");
                Ok(())
            }
        }
    }

    fn handle_master_packet(&mut self, addr: SocketAddr, payload: &[u8], now: i64) -> Result<(), DbError> {
        if unpack::packet_type(payload) != Some(PacketType::List) {
            debug!("dropping non-list packet from master {addr}");
            return Ok(());
        }
        let Some(master) = self.find_master_by_addr(addr) else {
            return Ok(());
        };

        self.pool.touch(addr);
        for (ip, port) in MasterAddrCursor::new(&payload[4..]) {
            handlers::reference_server(
                &self.conn,
                &mut self.scheduler,
                &mut self.registry,
                now,
                &ip,
                port,
                &master.node,
                &master.service,
            )?;
        }
        Ok(())
    }
}

/// Masters are stored by hostname, but a `SocketAddr` identifies a
/// registry entry — resolve once, accepting the first address returned.
fn resolve(node: &str, service: &str) -> Option<SocketAddr> {
    use std::net::ToSocketAddrs;
    format!("{node}:{service}").to_socket_addrs().ok()?.next()
}
