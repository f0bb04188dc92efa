//! Reads and writes for the `servers`, `server_clients`, and `masters`
//! tables — the rows a poll reply or timeout actually touches.

use rusqlite::{params, Connection, OptionalExtension};
use teerank_common::error::DbError;
use teerank_common::model::{Client, Master, Server};

pub fn read_server(conn: &Connection, ip: &str, port: u16) -> Result<Option<Server>, DbError> {
    let row = conn
        .query_row(
            "SELECT ip, port, name, gametype, map, lastseen, expire, max_clients, master_node, master_service
             FROM servers WHERE ip = ?1 AND port = ?2",
            params![ip, port],
            |r| {
                Ok(Server {
                    ip: r.get(0)?,
                    port: r.get::<_, i64>(1)? as u16,
                    name: r.get(2)?,
                    gametype: r.get(3)?,
                    map: r.get(4)?,
                    lastseen: r.get(5)?,
                    expire: r.get(6)?,
                    max_clients: r.get(7)?,
                    master_node: r.get(8)?,
                    master_service: r.get(9)?,
                    clients: Vec::new(),
                })
            },
        )
        .optional()?;

    let Some(mut server) = row else {
        return Ok(None);
    };
    server.clients = read_server_clients(conn, ip, port)?;
    Ok(Some(server))
}

fn read_server_clients(conn: &Connection, ip: &str, port: u16) -> Result<Vec<Client>, DbError> {
    let mut stmt = conn.prepare(
        "SELECT name, clan, score, ingame FROM server_clients
         WHERE server_ip = ?1 AND server_port = ?2 ORDER BY score DESC",
    )?;
    let rows = stmt
        .query_map(params![ip, port], |r| {
            Ok(Client {
                name: r.get(0)?,
                clan: r.get(1)?,
                score: r.get(2)?,
                ingame: r.get::<_, i64>(3)? != 0,
            })
        })?
        .collect::<Result<_, _>>()?;
    Ok(rows)
}

pub fn write_server(conn: &Connection, server: &Server) -> Result<(), DbError> {
    conn.execute(
        "INSERT OR REPLACE INTO servers
         (ip, port, name, gametype, map, lastseen, expire, max_clients, master_node, master_service)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)",
        params![
            server.ip,
            server.port,
            server.name,
            server.gametype,
            server.map,
            server.lastseen,
            server.expire,
            server.max_clients,
            server.master_node,
            server.master_service,
        ],
    )?;
    Ok(())
}

/// Deletes and re-inserts every client row for this server — cheaper
/// and simpler than diffing old vs. new rosters. Also creates or
/// refreshes a `players` row for each client: players are created
/// lazily the first time a snapshot mentions their name, and otherwise
/// just get their clan/lastseen/current-server columns refreshed.
pub fn write_server_clients(conn: &Connection, server: &Server, now: i64) -> Result<(), DbError> {
    conn.execute(
        "DELETE FROM server_clients WHERE server_ip = ?1 AND server_port = ?2",
        params![server.ip, server.port],
    )?;
    for client in &server.clients {
        conn.execute(
            "INSERT INTO server_clients (server_ip, server_port, name, clan, score, ingame)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            params![server.ip, server.port, client.name, client.clan, client.score, client.ingame as i64],
        )?;
        conn.execute(
            "INSERT INTO players (name, clan, lastseen, server_ip, server_port)
             VALUES (?1, ?2, ?3, ?4, ?5)
             ON CONFLICT(name) DO UPDATE SET clan = excluded.clan, lastseen = excluded.lastseen,
                 server_ip = excluded.server_ip, server_port = excluded.server_port",
            params![client.name, client.clan, now, server.ip, server.port],
        )?;
    }
    Ok(())
}

pub fn remove_server(conn: &Connection, ip: &str, port: u16) -> Result<(), DbError> {
    conn.execute(
        "DELETE FROM server_clients WHERE server_ip = ?1 AND server_port = ?2",
        params![ip, port],
    )?;
    conn.execute("DELETE FROM servers WHERE ip = ?1 AND port = ?2", params![ip, port])?;
    Ok(())
}

/// Creates a server row if it doesn't already exist, or, if it does,
/// just updates its master ownership columns.
pub fn create_or_reowner_server(
    conn: &Connection,
    ip: &str,
    port: u16,
    master_node: &str,
    master_service: &str,
) -> Result<Server, DbError> {
    if let Some(mut existing) = read_server(conn, ip, port)? {
        conn.execute(
            "UPDATE servers SET master_node = ?1, master_service = ?2 WHERE ip = ?3 AND port = ?4",
            params![master_node, master_service, ip, port],
        )?;
        existing.master_node = Some(master_node.to_string());
        existing.master_service = Some(master_service.to_string());
        Ok(existing)
    } else {
        let mut server = Server::new(ip, port);
        server.master_node = Some(master_node.to_string());
        server.master_service = Some(master_service.to_string());
        write_server(conn, &server)?;
        Ok(server)
    }
}

/// Clears master ownership for every server this master currently owns
/// — called before the master is (re)polled, so any server it no
/// longer reports gets orphaned instead of stuck pointing at a stale
/// owner.
pub fn unreference_servers(conn: &Connection, master_node: &str, master_service: &str) -> Result<(), DbError> {
    conn.execute(
        "UPDATE servers SET master_node = NULL, master_service = NULL
         WHERE master_node = ?1 AND master_service = ?2",
        params![master_node, master_service],
    )?;
    Ok(())
}

pub fn read_master(conn: &Connection, node: &str, service: &str) -> Result<Option<Master>, DbError> {
    conn.query_row(
        "SELECT node, service, lastseen, expire FROM masters WHERE node = ?1 AND service = ?2",
        params![node, service],
        |r| {
            Ok(Master {
                node: r.get(0)?,
                service: r.get(1)?,
                lastseen: r.get(2)?,
                expire: r.get(3)?,
            })
        },
    )
    .optional()
    .map_err(DbError::from)
}

pub fn write_master(conn: &Connection, master: &Master) -> Result<(), DbError> {
    conn.execute(
        "INSERT OR REPLACE INTO masters (node, service, lastseen, expire) VALUES (?1, ?2, ?3, ?4)",
        params![master.node, master.service, master.lastseen, master.expire],
    )?;
    Ok(())
}

pub fn all_servers(conn: &Connection) -> Result<Vec<Server>, DbError> {
    let mut stmt = conn.prepare("SELECT ip, port FROM servers")?;
    let keys: Vec<(String, i64)> = stmt
        .query_map([], |r| Ok((r.get(0)?, r.get(1)?)))?
        .collect::<Result<_, _>>()?;
    drop(stmt);

    let mut out = Vec::with_capacity(keys.len());
    for (ip, port) in keys {
        if let Some(s) = read_server(conn, &ip, port as u16)? {
            out.push(s);
        }
    }
    Ok(out)
}

pub fn all_masters(conn: &Connection) -> Result<Vec<Master>, DbError> {
    let mut stmt = conn.prepare("SELECT node, service, lastseen, expire FROM masters")?;
    let rows = stmt
        .query_map([], |r| {
            Ok(Master {
                node: r.get(0)?,
                service: r.get(1)?,
                lastseen: r.get(2)?,
                expire: r.get(3)?,
            })
        })?
        .collect::<Result<_, _>>()?;
    Ok(rows)
}
