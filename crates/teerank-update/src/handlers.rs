//! Reply and timeout handlers: the logic that runs once a poll of a
//! server or master either succeeds or gives up.

use rand::Rng;
use rusqlite::Connection;
use teerank_common::error::DbError;
use teerank_common::model::Server;

use crate::netclient::{NetClientKind, NetClientRegistry};
use crate::pool::PoolEntry;
use crate::rank;
use crate::scheduler::{JobKind, Scheduler};
use crate::store;

pub const SERVER_EXPIRE_SECS: i64 = 300;
pub const SERVER_EXPIRE_JITTER: i64 = 30;
pub const MASTER_EXPIRE_SECS: i64 = 300;
pub const MASTER_EXPIRE_JITTER: i64 = 60;
pub const MIN_EXPIRY_DELAY: i64 = 300; // 5 minutes
pub const MAX_EXPIRY_DELAY: i64 = 7200; // 2 hours
pub const STALE_SERVER_DAYS: i64 = 1;

/// `sec` seconds from `now`, jittered by up to `maxdist` seconds either
/// way, so pollable entries don't all become due on the same tick.
pub fn expire_in(now: i64, sec: i64, maxdist: i64) -> i64 {
    let jitter = if maxdist > 0 {
        rand::thread_rng().gen_range(-maxdist..=maxdist)
    } else {
        0
    };
    now + sec + jitter
}

/// Doubles the previous poll interval (bounded to [5min, 2h]) — used
/// for exponential backoff against unresponsive servers and masters.
pub fn double_expiry_date(lastexpire: i64, lastseen: i64) -> i64 {
    let delay = ((lastexpire - lastseen) * 2).clamp(MIN_EXPIRY_DELAY, MAX_EXPIRY_DELAY);
    lastseen + delay
}

pub fn elapsed_days(now: i64, lastseen: i64) -> i64 {
    (now - lastseen) / 86400
}

/// A server replied with a complete info packet: rank whatever's
/// rankable, persist the new snapshot, and schedule the next poll.
pub fn handle_server_reply(
    conn: &Connection,
    scheduler: &mut Scheduler,
    now: i64,
    mut new: Server,
) -> Result<(), DbError> {
    let old = store::read_server(conn, &new.ip, new.port)?.unwrap_or_else(|| Server::new(&new.ip, new.port));

    new.lastseen = now;
    if !new.gametype.is_empty() && old.lastseen != 0 {
        rank::rank_players(conn, &old, &new)?;
    }

    new.expire = expire_in(now, SERVER_EXPIRE_SECS, SERVER_EXPIRE_JITTER);
    store::write_server(conn, &new)?;
    store::write_server_clients(conn, &new, now)?;

    scheduler.schedule(
        new.expire,
        JobKind::PollServer(format!("{}:{}", new.ip, new.port).parse().unwrap()),
    );
    Ok(())
}

/// A server never replied: either it's been gone long enough to drop
/// entirely, or it gets a longer grace period before the next attempt.
pub fn handle_server_timeout(
    conn: &Connection,
    scheduler: &mut Scheduler,
    registry: &mut NetClientRegistry,
    netclient_id: usize,
    now: i64,
) -> Result<(), DbError> {
    let Some(nc) = registry.get(netclient_id).cloned() else {
        return Ok(());
    };
    let ip = nc.addr.ip().to_string();
    let port = nc.addr.port();

    let Some(mut server) = store::read_server(conn, &ip, port)? else {
        registry.remove(netclient_id);
        return Ok(());
    };

    if elapsed_days(now, server.lastseen) >= STALE_SERVER_DAYS {
        store::remove_server(conn, &ip, port)?;
        registry.remove(netclient_id);
        return Ok(());
    }

    server.expire = double_expiry_date(server.expire, server.lastseen);
    store::write_server(conn, &server)?;
    scheduler.schedule(server.expire, JobKind::PollServer(nc.addr));
    Ok(())
}

/// Creates the server if it's new (scheduling an immediate poll), or
/// just re-points its master ownership if it's already known.
pub fn reference_server(
    conn: &Connection,
    scheduler: &mut Scheduler,
    registry: &mut NetClientRegistry,
    now: i64,
    ip: &str,
    port: u16,
    master_node: &str,
    master_service: &str,
) -> Result<(), DbError> {
    let existed = store::read_server(conn, ip, port)?.is_some();
    store::create_or_reowner_server(conn, ip, port, master_node, master_service)?;

    if !existed {
        let addr = format!("{ip}:{port}").parse().expect("formatted from validated ip/port");
        if registry.add(NetClientKind::Server, addr).is_some() {
            scheduler.schedule(now, JobKind::PollServer(addr));
        }
    }
    Ok(())
}

/// A master poll failed outright. If at least one list packet got
/// through before the attempt was abandoned, the master counts as
/// online and gets the normal jittered interval; total silence gets
/// exponential backoff instead.
pub fn handle_master_timeout(
    conn: &Connection,
    scheduler: &mut Scheduler,
    now: i64,
    node: &str,
    service: &str,
    failed: &PoolEntry,
) -> Result<(), DbError> {
    let mut master = store::read_master(conn, node, service)?.unwrap_or(teerank_common::model::Master {
        node: node.to_string(),
        service: service.to_string(),
        lastseen: 0,
        expire: now,
    });

    master.expire = if failed.polled {
        master.lastseen = now;
        expire_in(now, MASTER_EXPIRE_SECS, MASTER_EXPIRE_JITTER)
    } else {
        double_expiry_date(master.expire, master.lastseen.max(1))
    };

    store::write_master(conn, &master)?;
    scheduler.schedule(master.expire, JobKind::PollMaster(failed.addr));
    Ok(())
}
