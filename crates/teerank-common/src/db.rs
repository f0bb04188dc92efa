//! Database bootstrap and schema management.
//!
//! A single synchronous `rusqlite::Connection` is used for the whole
//! process, matching the single-threaded cooperative model: there is
//! never a second connection or a pool. Statement caching is handled by
//! `rusqlite`'s own `prepare_cached`, which gives us the same effect as
//! the original's pointer-identity query cache (reuse a compiled
//! statement across calls to the same query text) without needing to
//! track raw string pointers ourselves.

use std::path::Path;
use std::time::Duration;

use rusqlite::Connection;

use crate::error::DbError;

pub const DATABASE_VERSION: i32 = 7;

const SCHEMA: &[&str] = &[
    "CREATE TABLE IF NOT EXISTS version (version INTEGER NOT NULL)",
    "CREATE TABLE IF NOT EXISTS masters (
        node TEXT NOT NULL,
        service TEXT NOT NULL,
        lastseen INTEGER NOT NULL,
        expire INTEGER NOT NULL,
        PRIMARY KEY (node, service)
    )",
    "CREATE TABLE IF NOT EXISTS servers (
        ip TEXT NOT NULL,
        port INTEGER NOT NULL,
        name TEXT NOT NULL DEFAULT '',
        gametype TEXT NOT NULL DEFAULT '',
        map TEXT NOT NULL DEFAULT '',
        lastseen INTEGER NOT NULL DEFAULT 0,
        expire INTEGER NOT NULL DEFAULT 0,
        max_clients INTEGER NOT NULL DEFAULT 0,
        master_node TEXT,
        master_service TEXT,
        PRIMARY KEY (ip, port)
    )",
    "CREATE TABLE IF NOT EXISTS server_clients (
        server_ip TEXT NOT NULL,
        server_port INTEGER NOT NULL,
        name TEXT NOT NULL,
        clan TEXT NOT NULL DEFAULT '',
        score INTEGER NOT NULL DEFAULT 0,
        ingame INTEGER NOT NULL DEFAULT 0,
        PRIMARY KEY (server_ip, server_port, name)
    )",
    "CREATE TABLE IF NOT EXISTS players (
        name TEXT NOT NULL,
        clan TEXT NOT NULL DEFAULT '',
        lastseen INTEGER NOT NULL DEFAULT 0,
        server_ip TEXT,
        server_port INTEGER,
        PRIMARY KEY (name)
    )",
    "CREATE TABLE IF NOT EXISTS ranks (
        name TEXT NOT NULL,
        gametype TEXT NOT NULL,
        map TEXT NOT NULL DEFAULT '',
        elo INTEGER NOT NULL,
        rank INTEGER,
        lastseen INTEGER NOT NULL DEFAULT 0,
        PRIMARY KEY (name, gametype, map)
    )",
    "CREATE TABLE IF NOT EXISTS pending (
        name TEXT NOT NULL,
        gametype TEXT NOT NULL,
        map TEXT NOT NULL DEFAULT '',
        elo INTEGER NOT NULL,
        PRIMARY KEY (name, gametype, map)
    )",
    "CREATE TABLE IF NOT EXISTS ranks_historic (
        name TEXT NOT NULL,
        gametype TEXT NOT NULL,
        map TEXT NOT NULL DEFAULT '',
        elo INTEGER NOT NULL,
        rank INTEGER,
        ts INTEGER NOT NULL,
        PRIMARY KEY (name, ts, gametype, map)
    )",
];

/// Opens (creating if necessary) the database at `path`, applies the
/// pragmas the engine relies on, and ensures the schema exists.
pub fn open(path: &Path) -> Result<Connection, DbError> {
    if let Some(parent) = path.parent() {
        let _ = std::fs::create_dir_all(parent);
    }

    let conn = Connection::open(path)?;
    conn.busy_timeout(Duration::from_secs(5))?;
    conn.pragma_update(None, "journal_mode", "WAL")?;
    conn.pragma_update(None, "synchronous", "NORMAL")?;

    create_schema(&conn)?;
    check_or_stamp_version(&conn)?;

    Ok(conn)
}

fn create_schema(conn: &Connection) -> Result<(), DbError> {
    conn.execute_batch("BEGIN EXCLUSIVE")?;
    for stmt in SCHEMA {
        if let Err(e) = conn.execute(stmt, []) {
            conn.execute_batch("ROLLBACK")?;
            return Err(e.into());
        }
    }
    if let Err(e) = create_all_indices(conn) {
        conn.execute_batch("ROLLBACK")?;
        return Err(e);
    }
    conn.execute_batch("COMMIT")?;
    Ok(())
}

fn check_or_stamp_version(conn: &Connection) -> Result<(), DbError> {
    let count: i64 = conn.query_row("SELECT COUNT(*) FROM version", [], |r| r.get(0))?;
    if count == 0 {
        conn.execute("INSERT INTO version (version) VALUES (?1)", [DATABASE_VERSION])?;
        return Ok(());
    }

    let found: i32 = conn.query_row("SELECT version FROM version LIMIT 1", [], |r| r.get(0))?;
    if found != DATABASE_VERSION {
        return Err(DbError::SchemaMismatch {
            expected: DATABASE_VERSION,
            found,
        });
    }
    Ok(())
}

/// Creates the indices used by read paths and by rank recomputation.
/// Recomputation drops these first (see [`drop_all_indices`]) since a
/// full rewrite of `ranks` is faster without them maintained row by row.
pub fn create_all_indices(conn: &Connection) -> Result<(), DbError> {
    conn.execute(
        "CREATE INDEX IF NOT EXISTS ranks_by_gametype ON ranks (gametype, map, rank)",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS players_by_clan ON players (clan)",
        [],
    )?;
    Ok(())
}

/// Drops every non-sqlite-internal index, in preparation for a bulk
/// rewrite of `ranks` during recomputation.
pub fn drop_all_indices(conn: &Connection) -> Result<(), DbError> {
    let mut stmt = conn.prepare(
        "SELECT name FROM sqlite_master WHERE type = 'index' AND name NOT LIKE 'sqlite%'",
    )?;
    let names: Vec<String> = stmt
        .query_map([], |r| r.get::<_, String>(0))?
        .collect::<Result<_, _>>()?;
    drop(stmt);

    for name in names {
        conn.execute(&format!("DROP INDEX {name}"), [])?;
    }
    Ok(())
}

/// Returns the mtime of the database file or its `-wal` sibling,
/// whichever is newer — used by the presentation layer to show "data
/// current as of".
pub fn last_database_update(path: &Path) -> Option<std::time::SystemTime> {
    let main = std::fs::metadata(path).ok()?.modified().ok();
    let wal_path = {
        let mut p = path.as_os_str().to_owned();
        p.push("-wal");
        std::path::PathBuf::from(p)
    };
    let wal = std::fs::metadata(&wal_path).ok().and_then(|m| m.modified().ok());

    match (main, wal) {
        (Some(a), Some(b)) => Some(a.max(b)),
        (Some(a), None) => Some(a),
        (None, Some(b)) => Some(b),
        (None, None) => None,
    }
}
